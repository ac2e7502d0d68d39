//! Inbound replies: status snapshot and firmware versions
//!
//! # Status frame (framed, 93 bytes)
//!
//! | offset | size | field |
//! |---|---|---|
//! | 0 | 1 | START |
//! | 1 | 2 | `R` `D` |
//! | 3 | 9 | UTC time |
//! | 12 | 12 | azimuth, elevation, train angle (f32 deg) |
//! | 24 | 12 | azimuth, elevation, train speed (f32 deg/s) |
//! | 36 | 12 | azimuth, elevation, train acceleration (f32 deg/s²) |
//! | 48 | 12 | azimuth, elevation, train torque (f32 %) |
//! | 60 | 8 | wind speed (m/s), wind direction (deg) |
//! | 68 | 8 | RTD 1, RTD 2 temperature (°C) |
//! | 76 | 14 | status registers, see [`StatusRegister`] |
//! | 90 | 2 | CRC16 |
//! | 92 | 1 | END |
//!
//! # Firmware info frame (fixed-length, 14 bytes)
//!
//! `I` `V`, then major/minor pairs for the main, azimuth, elevation, train
//! and feed boards, then CRC16.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use strum::{EnumCount, EnumIter, IntoEnumIterator};

use crate::axis::Axis;
use crate::frame::{seal, unframe, FrameError, FrameFamily, FrameResult};
use crate::time::IcdTime;

const STATUS_SELECTOR: &[u8] = b"RD";
const FIRMWARE_INFO_SELECTOR: &[u8] = b"IV";

const STATUS_PAYLOAD_LEN: usize = IcdTime::WIRE_SIZE + 16 * 4 + StatusRegister::COUNT;
const FIRMWARE_INFO_PAYLOAD_LEN: usize = 10;

/// Total length of a status frame.
pub const STATUS_FRAME_LEN: usize =
    FrameFamily::Framed.overhead() + STATUS_SELECTOR.len() + STATUS_PAYLOAD_LEN;
/// Total length of a firmware info frame.
pub const FIRMWARE_INFO_FRAME_LEN: usize =
    FrameFamily::FixedLength.overhead() + FIRMWARE_INFO_SELECTOR.len() + FIRMWARE_INFO_PAYLOAD_LEN;

/// The 14 status registers, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter, EnumCount)]
pub enum StatusRegister {
    MainBoardProtocol,
    MainBoardStatus,
    MainBoardMotorPower,
    MainBoardReserved,
    AzimuthBoardServo,
    AzimuthBoardStatus,
    ElevationBoardServo,
    ElevationBoardStatus,
    TrainBoardServo,
    TrainBoardStatus,
    FeedSBoard,
    FeedXBoard,
    FeedKaBoard,
    FeedBoardCommunication,
}

impl StatusRegister {
    /// Position in the register block.
    pub fn index(self) -> usize {
        self as usize
    }

    /// JSON key used when presenting the register.
    pub fn key(self) -> &'static str {
        match self {
            StatusRegister::MainBoardProtocol => "mainBoardProtocolStatusBits",
            StatusRegister::MainBoardStatus => "mainBoardStatusBits",
            StatusRegister::MainBoardMotorPower => "mainBoardMotorPowerStatusBits",
            StatusRegister::MainBoardReserved => "mainBoardReservedStatusBits",
            StatusRegister::AzimuthBoardServo => "azimuthBoardServoStatusBits",
            StatusRegister::AzimuthBoardStatus => "azimuthBoardStatusBits",
            StatusRegister::ElevationBoardServo => "elevationBoardServoStatusBits",
            StatusRegister::ElevationBoardStatus => "elevationBoardStatusBits",
            StatusRegister::TrainBoardServo => "trainBoardServoStatusBits",
            StatusRegister::TrainBoardStatus => "trainBoardStatusBits",
            StatusRegister::FeedSBoard => "feedSBoardStatusBits",
            StatusRegister::FeedXBoard => "feedXBoardStatusBits",
            StatusRegister::FeedKaBoard => "feedKaBoardStatusBits",
            StatusRegister::FeedBoardCommunication => "feedBoardCommunicationStatusBits",
        }
    }
}

impl std::fmt::Display for StatusRegister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Raw values of all status registers.
///
/// Serializes as a map from register key to its 8-character MSB-first bit
/// string, e.g. `"mainBoardStatusBits": "00000101"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusRegisters(pub [u8; StatusRegister::COUNT]);

impl StatusRegisters {
    pub fn get(&self, register: StatusRegister) -> u8 {
        self.0[register.index()]
    }

    pub fn set(&mut self, register: StatusRegister, value: u8) {
        self.0[register.index()] = value;
    }

    /// Set or clear a single bit (0 is least significant).
    pub fn set_bit(&mut self, register: StatusRegister, bit: u8, on: bool) {
        let value = self.get(register);
        let mask = 1u8 << (bit & 7);
        self.set(register, if on { value | mask } else { value & !mask });
    }

    /// 8-character bit string, most significant bit first.
    pub fn bit_string(&self, register: StatusRegister) -> String {
        format!("{:08b}", self.get(register))
    }

    pub fn iter(&self) -> impl Iterator<Item = (StatusRegister, u8)> + '_ {
        StatusRegister::iter().map(move |r| (r, self.get(r)))
    }
}

impl Serialize for StatusRegisters {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(StatusRegister::COUNT))?;
        for register in StatusRegister::iter() {
            map.serialize_entry(register.key(), &self.bit_string(register))?;
        }
        map.end()
    }
}

/// Decoded firmware status snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadData {
    pub time: IcdTime,
    pub azimuth_angle: f32,
    pub elevation_angle: f32,
    pub train_angle: f32,
    pub azimuth_speed: f32,
    pub elevation_speed: f32,
    pub train_speed: f32,
    pub azimuth_acceleration: f32,
    pub elevation_acceleration: f32,
    pub train_acceleration: f32,
    pub azimuth_torque: f32,
    pub elevation_torque: f32,
    pub train_torque: f32,
    pub wind_speed: f32,
    pub wind_direction: f32,
    pub rtd1_temperature: f32,
    pub rtd2_temperature: f32,
    #[serde(flatten)]
    pub registers: StatusRegisters,
}

impl ReadData {
    pub fn angle(&self, axis: Axis) -> f32 {
        match axis {
            Axis::Azimuth => self.azimuth_angle,
            Axis::Elevation => self.elevation_angle,
            Axis::Train => self.train_angle,
        }
    }

    pub fn speed(&self, axis: Axis) -> f32 {
        match axis {
            Axis::Azimuth => self.azimuth_speed,
            Axis::Elevation => self.elevation_speed,
            Axis::Train => self.train_speed,
        }
    }

    /// Encode as a status frame, as firmware would send it.
    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::with_capacity(STATUS_SELECTOR.len() + STATUS_PAYLOAD_LEN);
        body.put_slice(STATUS_SELECTOR);
        self.time.write_to(&mut body);
        for value in [
            self.azimuth_angle,
            self.elevation_angle,
            self.train_angle,
            self.azimuth_speed,
            self.elevation_speed,
            self.train_speed,
            self.azimuth_acceleration,
            self.elevation_acceleration,
            self.train_acceleration,
            self.azimuth_torque,
            self.elevation_torque,
            self.train_torque,
            self.wind_speed,
            self.wind_direction,
            self.rtd1_temperature,
            self.rtd2_temperature,
        ] {
            body.put_f32_le(value);
        }
        body.put_slice(&self.registers.0);
        seal(FrameFamily::Framed, &body)
    }

    /// Decode a status frame, rejecting any other reply kind.
    pub fn decode(bytes: &[u8]) -> FrameResult<Self> {
        match decode_reply(bytes)? {
            Reply::Status(data) => Ok(data),
            other => Err(FrameError::UnexpectedKind {
                expected: "Status",
                actual: other.name(),
            }),
        }
    }

    fn read_payload(mut buf: &[u8]) -> Self {
        let time = IcdTime::read_from(&mut buf);
        let mut f = || buf.get_f32_le();
        let mut data = ReadData {
            time,
            azimuth_angle: f(),
            elevation_angle: f(),
            train_angle: f(),
            azimuth_speed: f(),
            elevation_speed: f(),
            train_speed: f(),
            azimuth_acceleration: f(),
            elevation_acceleration: f(),
            train_acceleration: f(),
            azimuth_torque: f(),
            elevation_torque: f(),
            train_torque: f(),
            wind_speed: f(),
            wind_direction: f(),
            rtd1_temperature: f(),
            rtd2_temperature: f(),
            registers: StatusRegisters::default(),
        };
        buf.copy_to_slice(&mut data.registers.0);
        data
    }
}

/// Major/minor version of one board's firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
}

impl std::fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Firmware versions reported in reply to a firmware info request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareInfo {
    pub main: FirmwareVersion,
    pub azimuth: FirmwareVersion,
    pub elevation: FirmwareVersion,
    pub train: FirmwareVersion,
    pub feed: FirmwareVersion,
}

impl FirmwareInfo {
    pub fn encode(&self) -> Bytes {
        let mut body =
            BytesMut::with_capacity(FIRMWARE_INFO_SELECTOR.len() + FIRMWARE_INFO_PAYLOAD_LEN);
        body.put_slice(FIRMWARE_INFO_SELECTOR);
        for version in [self.main, self.azimuth, self.elevation, self.train, self.feed] {
            body.put_u8(version.major);
            body.put_u8(version.minor);
        }
        seal(FrameFamily::FixedLength, &body)
    }

    fn read_payload(mut buf: &[u8]) -> Self {
        let mut version = || FirmwareVersion {
            major: buf.get_u8(),
            minor: buf.get_u8(),
        };
        FirmwareInfo {
            main: version(),
            azimuth: version(),
            elevation: version(),
            train: version(),
            feed: version(),
        }
    }
}

/// Any frame firmware sends to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Status(ReadData),
    FirmwareInfo(FirmwareInfo),
}

impl Reply {
    pub fn name(&self) -> &'static str {
        match self {
            Reply::Status(_) => "Status",
            Reply::FirmwareInfo(_) => "FirmwareInfo",
        }
    }
}

/// Decode an inbound datagram.
pub fn decode_reply(bytes: &[u8]) -> FrameResult<Reply> {
    let raw = unframe(bytes)?;
    let (name, selector, expected) = match raw.family {
        FrameFamily::Framed if raw.body.starts_with(STATUS_SELECTOR) => {
            ("Status", STATUS_SELECTOR, STATUS_FRAME_LEN)
        }
        FrameFamily::FixedLength if raw.body.starts_with(FIRMWARE_INFO_SELECTOR) => {
            ("FirmwareInfo", FIRMWARE_INFO_SELECTOR, FIRMWARE_INFO_FRAME_LEN)
        }
        _ => {
            return Err(FrameError::UnknownSelector {
                cmd1: raw.cmd1(),
                cmd2: raw.cmd2(),
            })
        }
    };
    if raw.total_len != expected {
        return Err(FrameError::LengthMismatch {
            kind: name,
            expected,
            actual: raw.total_len,
        });
    }

    let payload = &raw.body[selector.len()..];
    Ok(match raw.family {
        FrameFamily::Framed => Reply::Status(ReadData::read_payload(payload)),
        FrameFamily::FixedLength => Reply::FirmwareInfo(FirmwareInfo::read_payload(payload)),
    })
}
