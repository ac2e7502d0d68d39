//! Antenna pedestal ICD (Interface Control Document) protocol
//!
//! This crate provides the frame codec for the binary UDP protocol spoken
//! between the pedestal server and the antenna control firmware: typed
//! command frames, the decoded status snapshot ([`ReadData`]), and the
//! CRC16 used by every frame.
//!
//! # Frame Families
//!
//! Most frames are *framed*:
//!
//! ```text
//! [0x02] [CMD1] [CMD2?] [payload...] [CRC16 LE] [0x03]
//! ```
//!
//! A few are *fixed-length* and carry no START/END markers; their total
//! length identifies them:
//!
//! ```text
//! [CMD1] [CMD2] [payload...] [CRC16 LE]
//! ```
//!
//! All multi-byte fields are little-endian. Decoding verifies the CRC
//! before interpreting the selector bytes, so a corrupted frame always
//! fails with [`FrameError::Checksum`].
//!
//! # Example
//!
//! ```
//! use icd::{AxisSet, Command};
//!
//! let stop = Command::Stop { axes: AxisSet::AZIMUTH | AxisSet::ELEVATION };
//! let bytes = stop.encode();
//! assert_eq!(Command::decode(&bytes).unwrap(), stop);
//! ```

mod axis;
mod command;
mod crc16;
mod frame;
mod status;
mod time;

pub use axis::{Axis, AxisSet, FeedSet};
pub use command::{AxisMotion, Command, CommandError, CommandKind, EmergencyCommand};
pub use crc16::{compute_crc16, verify_crc16};
pub use frame::{FrameError, FrameFamily, FrameResult, END_MARKER, START_MARKER};
pub use status::{
    decode_reply, FirmwareInfo, FirmwareVersion, ReadData, Reply, StatusRegister,
    StatusRegisters, FIRMWARE_INFO_FRAME_LEN, STATUS_FRAME_LEN,
};
pub use time::IcdTime;
