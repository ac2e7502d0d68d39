//! Static bit-to-error tables for the 14 status registers.
//!
//! Bit positions are LSB-first: bit `i` is `(register >> i) & 1`. Bits
//! without an entry carry no operator-facing meaning and are ignored by
//! the diff engine.

use icd::StatusRegister;
use pedestal_types::{ErrorCategory, Severity};

/// Meaning of one status bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitMapping {
    pub bit: u8,
    pub category: ErrorCategory,
    pub severity: Severity,
    pub error_key: &'static str,
    pub component: &'static str,
}

const fn bit(
    bit: u8,
    category: ErrorCategory,
    severity: Severity,
    error_key: &'static str,
    component: &'static str,
) -> BitMapping {
    BitMapping {
        bit,
        category,
        severity,
        error_key,
        component,
    }
}

use ErrorCategory::{Feed, Limit, Power, Protocol, Servo, System};
use Severity::{Critical, Error, Warning};

const MAIN_BOARD_PROTOCOL: &[BitMapping] = &[
    bit(0, Protocol, Warning, "CRC_ERROR", "MAIN_BOARD"),
    bit(1, Protocol, Warning, "FRAME_ERROR", "MAIN_BOARD"),
    bit(2, Protocol, Warning, "UNKNOWN_COMMAND", "MAIN_BOARD"),
    bit(3, Protocol, Warning, "LENGTH_ERROR", "MAIN_BOARD"),
    bit(4, Protocol, Error, "COMMAND_TIMEOUT", "MAIN_BOARD"),
    bit(5, Protocol, Error, "BUFFER_OVERFLOW", "MAIN_BOARD"),
];

const MAIN_BOARD_STATUS: &[BitMapping] = &[
    bit(0, System, Critical, "EMERGENCY_STOP", "MAIN_BOARD"),
    bit(1, System, Error, "WATCHDOG_RESET", "MAIN_BOARD"),
    bit(2, System, Warning, "OVER_TEMPERATURE", "MAIN_BOARD"),
    bit(3, System, Warning, "GPS_UNLOCKED", "MAIN_BOARD"),
    bit(4, System, Warning, "TIME_SYNC_LOST", "MAIN_BOARD"),
    bit(5, System, Critical, "SAFETY_INTERLOCK", "MAIN_BOARD"),
];

const MAIN_BOARD_MOTOR_POWER: &[BitMapping] = &[
    bit(0, Power, Error, "AZIMUTH_MOTOR_POWER_FAULT", "MAIN_BOARD"),
    bit(1, Power, Error, "ELEVATION_MOTOR_POWER_FAULT", "MAIN_BOARD"),
    bit(2, Power, Error, "TRAIN_MOTOR_POWER_FAULT", "MAIN_BOARD"),
    bit(3, Power, Warning, "BRAKE_POWER_FAULT", "MAIN_BOARD"),
    bit(4, Power, Critical, "MAIN_POWER_FAULT", "MAIN_BOARD"),
];

const AZIMUTH_SERVO: &[BitMapping] = &servo_bits("AZIMUTH_BOARD");
const ELEVATION_SERVO: &[BitMapping] = &servo_bits("ELEVATION_BOARD");
const TRAIN_SERVO: &[BitMapping] = &servo_bits("TRAIN_BOARD");

const fn servo_bits(component: &'static str) -> [BitMapping; 6] {
    [
        bit(0, Servo, Error, "SERVO_ALARM", component),
        bit(1, Servo, Critical, "SERVO_OVERCURRENT", component),
        bit(2, Servo, Error, "ENCODER_ERROR", component),
        bit(3, Servo, Warning, "POSITION_ERROR", component),
        bit(4, Servo, Error, "SERVO_OVERLOAD", component),
        bit(5, Servo, Warning, "SERVO_OVERHEAT", component),
    ]
}

const AZIMUTH_STATUS: &[BitMapping] = &axis_status_bits("AZIMUTH_BOARD");
const ELEVATION_STATUS: &[BitMapping] = &axis_status_bits("ELEVATION_BOARD");
const TRAIN_STATUS: &[BitMapping] = &axis_status_bits("TRAIN_BOARD");

const fn axis_status_bits(component: &'static str) -> [BitMapping; 5] {
    [
        bit(0, Limit, Warning, "CW_SOFT_LIMIT", component),
        bit(1, Limit, Warning, "CCW_SOFT_LIMIT", component),
        bit(2, Limit, Critical, "CW_HARD_LIMIT", component),
        bit(3, Limit, Critical, "CCW_HARD_LIMIT", component),
        bit(4, Protocol, Error, "BOARD_COMMUNICATION_ERROR", component),
    ]
}

const FEED_S: &[BitMapping] = &feed_bits("FEED_S_BOARD");
const FEED_X: &[BitMapping] = &[
    bit(0, Feed, Error, "LNA_FAULT", "FEED_X_BOARD"),
    bit(1, Feed, Warning, "LNA_OVER_TEMPERATURE", "FEED_X_BOARD"),
    bit(2, Feed, Error, "LO_UNLOCKED", "FEED_X_BOARD"),
    bit(3, Feed, Warning, "FEED_POWER_FAULT", "FEED_X_BOARD"),
    bit(4, Feed, Critical, "TX_HIGH_REFLECTED_POWER", "FEED_X_BOARD"),
    bit(5, Feed, Error, "TX_AMPLIFIER_FAULT", "FEED_X_BOARD"),
];
const FEED_KA: &[BitMapping] = &feed_bits("FEED_KA_BOARD");

const fn feed_bits(component: &'static str) -> [BitMapping; 4] {
    [
        bit(0, Feed, Error, "LNA_FAULT", component),
        bit(1, Feed, Warning, "LNA_OVER_TEMPERATURE", component),
        bit(2, Feed, Error, "LO_UNLOCKED", component),
        bit(3, Feed, Warning, "FEED_POWER_FAULT", component),
    ]
}

const FEED_COMMUNICATION: &[BitMapping] = &[
    bit(0, Protocol, Error, "FEED_S_COMMUNICATION_ERROR", "FEED_BOARD"),
    bit(1, Protocol, Error, "FEED_X_COMMUNICATION_ERROR", "FEED_BOARD"),
    bit(2, Protocol, Error, "FEED_KA_COMMUNICATION_ERROR", "FEED_BOARD"),
];

/// Every mapped bit of `register`.
pub fn mappings(register: StatusRegister) -> &'static [BitMapping] {
    match register {
        StatusRegister::MainBoardProtocol => MAIN_BOARD_PROTOCOL,
        StatusRegister::MainBoardStatus => MAIN_BOARD_STATUS,
        StatusRegister::MainBoardMotorPower => MAIN_BOARD_MOTOR_POWER,
        StatusRegister::MainBoardReserved => &[],
        StatusRegister::AzimuthBoardServo => AZIMUTH_SERVO,
        StatusRegister::AzimuthBoardStatus => AZIMUTH_STATUS,
        StatusRegister::ElevationBoardServo => ELEVATION_SERVO,
        StatusRegister::ElevationBoardStatus => ELEVATION_STATUS,
        StatusRegister::TrainBoardServo => TRAIN_SERVO,
        StatusRegister::TrainBoardStatus => TRAIN_STATUS,
        StatusRegister::FeedSBoard => FEED_S,
        StatusRegister::FeedXBoard => FEED_X,
        StatusRegister::FeedKaBoard => FEED_KA,
        StatusRegister::FeedBoardCommunication => FEED_COMMUNICATION,
    }
}

/// Meaning of bit `bit` of `register`, if it has one.
pub fn lookup(register: StatusRegister, bit: u8) -> Option<&'static BitMapping> {
    mappings(register).iter().find(|m| m.bit == bit)
}
