//! Outbound command frames
//!
//! Every command kind has a fixed selector, family and payload width, held
//! by [`CommandKind`]. [`Command`] carries the typed payload and encodes
//! to a complete frame including CRC16.
//!
//! # Payload layouts
//!
//! | kind | selector | payload |
//! |---|---|---|
//! | ReadStatus | `R` `Q` | time |
//! | ManualControl | `M` | axes, az angle, az speed, el angle, el speed, train angle, train speed |
//! | Stop / Standby / ServoPreset / ServoAlarmReset | `S` / `B` / `P` / `A` | axes |
//! | Emergency | `E` | code (`E` or `R`) |
//! | PositionOffset | `O` `P` | axes, az offset, el offset, train offset |
//! | TimeOffset | `O` `T` | time, offset ms |
//! | FeedOnOff | `F` | feeds |
//! | TimeSync | `T` | time |
//! | FirmwareInfoRequest | `I` `F` (fixed-length) | none |

use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use strum::{EnumIter, IntoEnumIterator};
use thiserror::Error;

use crate::axis::{Axis, AxisSet, FeedSet};
use crate::frame::{seal, unframe, FrameError, FrameFamily, FrameResult, RawFrame};
use crate::time::IcdTime;

/// Errors raised when building a command from operator input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Invalid emergency command '{0}': expected 'E' (activate) or 'R' (release)")]
    InvalidEmergencyCommand(char),

    #[error("Invalid emergency command string '{0}'")]
    InvalidEmergencyString(String),
}

/// Emergency stop activation or release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
pub enum EmergencyCommand {
    Activate,
    Release,
}

impl EmergencyCommand {
    /// Wire code for this command.
    pub const fn code(self) -> u8 {
        match self {
            EmergencyCommand::Activate => b'E',
            EmergencyCommand::Release => b'R',
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            b'E' => Some(EmergencyCommand::Activate),
            b'R' => Some(EmergencyCommand::Release),
            _ => None,
        }
    }
}

impl TryFrom<char> for EmergencyCommand {
    type Error = CommandError;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c.to_ascii_uppercase() {
            'E' => Ok(EmergencyCommand::Activate),
            'R' => Ok(EmergencyCommand::Release),
            _ => Err(CommandError::InvalidEmergencyCommand(c)),
        }
    }
}

impl FromStr for EmergencyCommand {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => EmergencyCommand::try_from(c),
            _ => Err(CommandError::InvalidEmergencyString(s.to_string())),
        }
    }
}

/// Target angle and slew speed for one axis.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AxisMotion {
    /// Degrees
    pub angle: f32,
    /// Degrees per second
    pub speed: f32,
}

impl AxisMotion {
    pub const fn new(angle: f32, speed: f32) -> Self {
        Self { angle, speed }
    }

    /// Hold position at `angle`.
    pub const fn hold(angle: f32) -> Self {
        Self { angle, speed: 0.0 }
    }
}

/// Discriminant of [`Command`], carrying the static frame shape.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, strum::Display, strum::IntoStaticStr,
)]
pub enum CommandKind {
    ReadStatus,
    ManualControl,
    Stop,
    Standby,
    Emergency,
    PositionOffset,
    TimeOffset,
    FeedOnOff,
    ServoPreset,
    ServoAlarmReset,
    TimeSync,
    FirmwareInfoRequest,
}

impl CommandKind {
    pub const fn selector(self) -> &'static [u8] {
        match self {
            CommandKind::ReadStatus => b"RQ",
            CommandKind::ManualControl => b"M",
            CommandKind::Stop => b"S",
            CommandKind::Standby => b"B",
            CommandKind::Emergency => b"E",
            CommandKind::PositionOffset => b"OP",
            CommandKind::TimeOffset => b"OT",
            CommandKind::FeedOnOff => b"F",
            CommandKind::ServoPreset => b"P",
            CommandKind::ServoAlarmReset => b"A",
            CommandKind::TimeSync => b"T",
            CommandKind::FirmwareInfoRequest => b"IF",
        }
    }

    pub const fn family(self) -> FrameFamily {
        match self {
            CommandKind::FirmwareInfoRequest => FrameFamily::FixedLength,
            _ => FrameFamily::Framed,
        }
    }

    /// Payload width in bytes, excluding selector and envelope.
    pub const fn payload_len(self) -> usize {
        const F32: usize = 4;
        match self {
            CommandKind::ReadStatus | CommandKind::TimeSync => IcdTime::WIRE_SIZE,
            CommandKind::ManualControl => 1 + 6 * F32,
            CommandKind::Stop
            | CommandKind::Standby
            | CommandKind::Emergency
            | CommandKind::FeedOnOff
            | CommandKind::ServoPreset
            | CommandKind::ServoAlarmReset => 1,
            CommandKind::PositionOffset => 1 + 3 * F32,
            CommandKind::TimeOffset => IcdTime::WIRE_SIZE + F32,
            CommandKind::FirmwareInfoRequest => 0,
        }
    }

    /// Total encoded frame length.
    pub const fn frame_len(self) -> usize {
        self.family().overhead() + self.selector().len() + self.payload_len()
    }

    pub fn name(self) -> &'static str {
        self.into()
    }

    fn lookup(raw: &RawFrame<'_>) -> FrameResult<Self> {
        CommandKind::iter()
            .find(|kind| kind.family() == raw.family && raw.body.starts_with(kind.selector()))
            .ok_or(FrameError::UnknownSelector {
                cmd1: raw.cmd1(),
                cmd2: raw.cmd2(),
            })
    }
}

/// A typed outbound command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Periodic status poll, answered by a status reply
    ReadStatus { time: IcdTime },
    /// Drive each selected axis to its target at the given speed
    ManualControl {
        axes: AxisSet,
        azimuth: AxisMotion,
        elevation: AxisMotion,
        train: AxisMotion,
    },
    Stop { axes: AxisSet },
    Standby { axes: AxisSet },
    Emergency { command: EmergencyCommand },
    /// Angular offsets in degrees applied by firmware to tracking targets
    PositionOffset {
        axes: AxisSet,
        azimuth: f32,
        elevation: f32,
        train: f32,
    },
    TimeOffset { time: IcdTime, offset_ms: f32 },
    FeedOnOff { feeds: FeedSet },
    ServoPreset { axes: AxisSet },
    ServoAlarmReset { axes: AxisSet },
    TimeSync { time: IcdTime },
    FirmwareInfoRequest,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::ReadStatus { .. } => CommandKind::ReadStatus,
            Command::ManualControl { .. } => CommandKind::ManualControl,
            Command::Stop { .. } => CommandKind::Stop,
            Command::Standby { .. } => CommandKind::Standby,
            Command::Emergency { .. } => CommandKind::Emergency,
            Command::PositionOffset { .. } => CommandKind::PositionOffset,
            Command::TimeOffset { .. } => CommandKind::TimeOffset,
            Command::FeedOnOff { .. } => CommandKind::FeedOnOff,
            Command::ServoPreset { .. } => CommandKind::ServoPreset,
            Command::ServoAlarmReset { .. } => CommandKind::ServoAlarmReset,
            Command::TimeSync { .. } => CommandKind::TimeSync,
            Command::FirmwareInfoRequest => CommandKind::FirmwareInfoRequest,
        }
    }

    /// The axis selector carried by this command, if any.
    pub fn axes(&self) -> Option<AxisSet> {
        match self {
            Command::ManualControl { axes, .. }
            | Command::Stop { axes }
            | Command::Standby { axes }
            | Command::PositionOffset { axes, .. }
            | Command::ServoPreset { axes }
            | Command::ServoAlarmReset { axes } => Some(*axes),
            _ => None,
        }
    }

    /// Motion for one axis of a manual control command.
    pub fn motion(&self, axis: Axis) -> Option<AxisMotion> {
        match self {
            Command::ManualControl {
                azimuth,
                elevation,
                train,
                ..
            } => Some(match axis {
                Axis::Azimuth => *azimuth,
                Axis::Elevation => *elevation,
                Axis::Train => *train,
            }),
            _ => None,
        }
    }

    /// Encode to a complete frame. Encoding cannot fail.
    pub fn encode(&self) -> Bytes {
        let kind = self.kind();
        let mut body = BytesMut::with_capacity(kind.selector().len() + kind.payload_len());
        body.put_slice(kind.selector());
        self.write_payload(&mut body);
        debug_assert_eq!(body.len(), kind.selector().len() + kind.payload_len());
        seal(kind.family(), &body)
    }

    fn write_payload(&self, buf: &mut BytesMut) {
        match self {
            Command::ReadStatus { time } | Command::TimeSync { time } => time.write_to(buf),
            Command::ManualControl {
                axes,
                azimuth,
                elevation,
                train,
            } => {
                buf.put_u8(axes.bits());
                for motion in [azimuth, elevation, train] {
                    buf.put_f32_le(motion.angle);
                    buf.put_f32_le(motion.speed);
                }
            }
            Command::Stop { axes }
            | Command::Standby { axes }
            | Command::ServoPreset { axes }
            | Command::ServoAlarmReset { axes } => buf.put_u8(axes.bits()),
            Command::Emergency { command } => buf.put_u8(command.code()),
            Command::PositionOffset {
                axes,
                azimuth,
                elevation,
                train,
            } => {
                buf.put_u8(axes.bits());
                buf.put_f32_le(*azimuth);
                buf.put_f32_le(*elevation);
                buf.put_f32_le(*train);
            }
            Command::TimeOffset { time, offset_ms } => {
                time.write_to(buf);
                buf.put_f32_le(*offset_ms);
            }
            Command::FeedOnOff { feeds } => buf.put_u8(feeds.bits()),
            Command::FirmwareInfoRequest => {}
        }
    }

    /// Decode a command frame.
    ///
    /// Checks run in order: envelope, CRC16, selector, exact length, field
    /// values.
    pub fn decode(bytes: &[u8]) -> FrameResult<Self> {
        let raw = unframe(bytes)?;
        let kind = CommandKind::lookup(&raw)?;
        if raw.total_len != kind.frame_len() {
            return Err(FrameError::LengthMismatch {
                kind: kind.name(),
                expected: kind.frame_len(),
                actual: raw.total_len,
            });
        }

        let mut buf = &raw.body[kind.selector().len()..];
        let command = match kind {
            CommandKind::ReadStatus => Command::ReadStatus {
                time: IcdTime::read_from(&mut buf),
            },
            CommandKind::ManualControl => {
                let axes = read_axes(&mut buf)?;
                let mut motion = || AxisMotion::new(buf.get_f32_le(), buf.get_f32_le());
                let azimuth = motion();
                let elevation = motion();
                let train = motion();
                Command::ManualControl {
                    axes,
                    azimuth,
                    elevation,
                    train,
                }
            }
            CommandKind::Stop => Command::Stop {
                axes: read_axes(&mut buf)?,
            },
            CommandKind::Standby => Command::Standby {
                axes: read_axes(&mut buf)?,
            },
            CommandKind::Emergency => {
                let code = buf.get_u8();
                let command = EmergencyCommand::from_code(code).ok_or(FrameError::InvalidField {
                    field: "emergency",
                    value: code,
                })?;
                Command::Emergency { command }
            }
            CommandKind::PositionOffset => Command::PositionOffset {
                axes: read_axes(&mut buf)?,
                azimuth: buf.get_f32_le(),
                elevation: buf.get_f32_le(),
                train: buf.get_f32_le(),
            },
            CommandKind::TimeOffset => Command::TimeOffset {
                time: IcdTime::read_from(&mut buf),
                offset_ms: buf.get_f32_le(),
            },
            CommandKind::FeedOnOff => {
                let bits = buf.get_u8();
                let feeds = FeedSet::from_bits(bits).ok_or(FrameError::InvalidField {
                    field: "feeds",
                    value: bits,
                })?;
                Command::FeedOnOff { feeds }
            }
            CommandKind::ServoPreset => Command::ServoPreset {
                axes: read_axes(&mut buf)?,
            },
            CommandKind::ServoAlarmReset => Command::ServoAlarmReset {
                axes: read_axes(&mut buf)?,
            },
            CommandKind::TimeSync => Command::TimeSync {
                time: IcdTime::read_from(&mut buf),
            },
            CommandKind::FirmwareInfoRequest => Command::FirmwareInfoRequest,
        };
        Ok(command)
    }
}

fn read_axes(buf: &mut &[u8]) -> FrameResult<AxisSet> {
    let bits = buf.get_u8();
    AxisSet::from_bits(bits).ok_or(FrameError::InvalidField {
        field: "axes",
        value: bits,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc16::compute_crc16;
    use crate::frame::{END_MARKER, START_MARKER};

    fn sample_time() -> IcdTime {
        IcdTime {
            year: 2025,
            month: 6,
            day: 30,
            hour: 23,
            minute: 59,
            second: 58,
            millisecond: 999,
        }
    }

    fn sample(kind: CommandKind) -> Command {
        match kind {
            CommandKind::ReadStatus => Command::ReadStatus {
                time: sample_time(),
            },
            CommandKind::ManualControl => Command::ManualControl {
                axes: AxisSet::TRAIN | AxisSet::STOW,
                azimuth: AxisMotion::new(-179.5, 0.0),
                elevation: AxisMotion::new(89.99, 2.5),
                train: AxisMotion::new(0.0, 5.0),
            },
            CommandKind::Stop => Command::Stop {
                axes: AxisSet::ALL_AXES,
            },
            CommandKind::Standby => Command::Standby {
                axes: AxisSet::ELEVATION,
            },
            CommandKind::Emergency => Command::Emergency {
                command: EmergencyCommand::Release,
            },
            CommandKind::PositionOffset => Command::PositionOffset {
                axes: AxisSet::AZIMUTH | AxisSet::ELEVATION,
                azimuth: 0.125,
                elevation: -0.5,
                train: 0.0,
            },
            CommandKind::TimeOffset => Command::TimeOffset {
                time: sample_time(),
                offset_ms: -250.0,
            },
            CommandKind::FeedOnOff => Command::FeedOnOff {
                feeds: FeedSet::X_RX | FeedSet::X_TX,
            },
            CommandKind::ServoPreset => Command::ServoPreset {
                axes: AxisSet::AZIMUTH,
            },
            CommandKind::ServoAlarmReset => Command::ServoAlarmReset {
                axes: AxisSet::ALL_AXES,
            },
            CommandKind::TimeSync => Command::TimeSync {
                time: sample_time(),
            },
            CommandKind::FirmwareInfoRequest => Command::FirmwareInfoRequest,
        }
    }

    #[test]
    fn test_roundtrip_every_kind() {
        for kind in CommandKind::iter() {
            let command = sample(kind);
            let bytes = command.encode();
            assert_eq!(bytes.len(), kind.frame_len(), "{kind}");
            assert_eq!(Command::decode(&bytes).unwrap(), command, "{kind}");
        }
    }

    #[test]
    fn test_crc_tamper_every_byte() {
        for kind in CommandKind::iter() {
            let bytes = sample(kind).encode().to_vec();
            let covered = match kind.family() {
                FrameFamily::Framed => 1..bytes.len() - 3,
                FrameFamily::FixedLength => 0..bytes.len() - 2,
            };
            for i in covered {
                let mut tampered = bytes.clone();
                tampered[i] ^= 0xFF;
                assert!(
                    matches!(Command::decode(&tampered), Err(FrameError::Checksum { .. })),
                    "{kind} byte {i}"
                );
            }
        }
    }

    #[test]
    fn test_stop_exact_bytes() {
        let bytes = Command::Stop {
            axes: AxisSet::AZIMUTH | AxisSet::ELEVATION,
        }
        .encode();
        let crc = compute_crc16(&[b'S', 0x03]).to_le_bytes();
        assert_eq!(
            bytes.as_ref(),
            &[START_MARKER, b'S', 0x03, crc[0], crc[1], END_MARKER]
        );
    }

    #[test]
    fn test_manual_control_field_order() {
        let bytes = sample(CommandKind::ManualControl).encode();
        assert_eq!(bytes[1], b'M');
        assert_eq!(bytes[2], 0b1100);
        assert_eq!(&bytes[3..7], &(-179.5f32).to_le_bytes());
        assert_eq!(&bytes[11..15], &89.99f32.to_le_bytes());
        assert_eq!(&bytes[15..19], &2.5f32.to_le_bytes());
        assert_eq!(&bytes[23..27], &5.0f32.to_le_bytes());
    }

    #[test]
    fn test_firmware_info_request_is_fixed_length() {
        let bytes = Command::FirmwareInfoRequest.encode();
        assert_eq!(bytes.len(), 4);
        assert_eq!(&bytes[..2], b"IF");
    }

    #[test]
    fn test_length_mismatch() {
        let bytes = seal(FrameFamily::Framed, b"S\x01\x00");
        assert_eq!(
            Command::decode(&bytes),
            Err(FrameError::LengthMismatch {
                kind: "Stop",
                expected: 6,
                actual: 7,
            })
        );
    }

    #[test]
    fn test_unknown_selector() {
        let bytes = seal(FrameFamily::Framed, b"Z\x00");
        assert_eq!(
            Command::decode(&bytes),
            Err(FrameError::UnknownSelector {
                cmd1: b'Z',
                cmd2: Some(0x00),
            })
        );
        // Status replies are not commands
        let bytes = seal(FrameFamily::Framed, b"RD");
        assert!(matches!(
            Command::decode(&bytes),
            Err(FrameError::UnknownSelector { .. })
        ));
    }

    #[test]
    fn test_invalid_fields() {
        let bytes = seal(FrameFamily::Framed, b"S\x10");
        assert_eq!(
            Command::decode(&bytes),
            Err(FrameError::InvalidField {
                field: "axes",
                value: 0x10,
            })
        );
        let bytes = seal(FrameFamily::Framed, b"EX");
        assert_eq!(
            Command::decode(&bytes),
            Err(FrameError::InvalidField {
                field: "emergency",
                value: b'X',
            })
        );
    }

    #[test]
    fn test_emergency_from_char() {
        assert_eq!(
            EmergencyCommand::try_from('E'),
            Ok(EmergencyCommand::Activate)
        );
        assert_eq!(EmergencyCommand::try_from('r'), Ok(EmergencyCommand::Release));
        assert_eq!(
            EmergencyCommand::try_from('X'),
            Err(CommandError::InvalidEmergencyCommand('X'))
        );
        assert_eq!("R".parse::<EmergencyCommand>(), Ok(EmergencyCommand::Release));
        assert!("ER".parse::<EmergencyCommand>().is_err());
    }

    #[test]
    fn test_axes_accessor() {
        assert_eq!(sample(CommandKind::Stop).axes(), Some(AxisSet::ALL_AXES));
        assert_eq!(sample(CommandKind::Emergency).axes(), None);
        assert_eq!(
            sample(CommandKind::ManualControl).motion(Axis::Train),
            Some(AxisMotion::new(0.0, 5.0))
        );
    }
}
