//! Frame envelope handling shared by commands and replies
//!
//! [`unframe`] strips the envelope and verifies the CRC before anything
//! looks at the selector bytes. [`seal`] is the inverse.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::crc16::compute_crc16;

/// Start-of-frame marker for framed frames.
pub const START_MARKER: u8 = 0x02;
/// End-of-frame marker for framed frames.
pub const END_MARKER: u8 = 0x03;

const CRC_LEN: usize = 2;

/// Envelope style of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum FrameFamily {
    /// `[START] body [CRC16] [END]`
    Framed,
    /// `body [CRC16]`, identified by total length
    FixedLength,
}

impl FrameFamily {
    /// Number of envelope bytes added around the body.
    pub const fn overhead(self) -> usize {
        match self {
            FrameFamily::Framed => CRC_LEN + 2,
            FrameFamily::FixedLength => CRC_LEN,
        }
    }
}

/// Errors produced while decoding a frame.
///
/// A decode failure means the datagram is dropped. None of these are fatal
/// to the link.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame too short: {len} bytes")]
    TooShort { len: usize },

    #[error("Missing END marker: found 0x{found:02X}")]
    MissingEndMarker { found: u8 },

    #[error("Checksum mismatch: stored 0x{stored:04X}, computed 0x{computed:04X}")]
    Checksum { stored: u16, computed: u16 },

    #[error("Unknown selector 0x{cmd1:02X}{}", .cmd2.map(|b| format!(" 0x{b:02X}")).unwrap_or_default())]
    UnknownSelector { cmd1: u8, cmd2: Option<u8> },

    #[error("Length mismatch for {kind}: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid value 0x{value:02X} for field {field}")]
    InvalidField { field: &'static str, value: u8 },

    #[error("Unexpected frame kind: expected {expected}, got {actual}")]
    UnexpectedKind {
        expected: &'static str,
        actual: &'static str,
    },
}

pub type FrameResult<T> = Result<T, FrameError>;

/// A frame with its envelope removed and CRC verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawFrame<'a> {
    pub family: FrameFamily,
    /// Selector bytes followed by payload
    pub body: &'a [u8],
    /// Length of the whole datagram
    pub total_len: usize,
}

impl RawFrame<'_> {
    pub fn cmd1(&self) -> u8 {
        self.body[0]
    }

    pub fn cmd2(&self) -> Option<u8> {
        self.body.get(1).copied()
    }
}

/// Strip the envelope from a datagram and verify its CRC.
///
/// The family is detected from the first byte. The returned body is never
/// empty.
pub(crate) fn unframe(bytes: &[u8]) -> FrameResult<RawFrame<'_>> {
    let len = bytes.len();
    if bytes.first() == Some(&START_MARKER) {
        if len < FrameFamily::Framed.overhead() + 1 {
            return Err(FrameError::TooShort { len });
        }
        let end = bytes[len - 1];
        if end != END_MARKER {
            return Err(FrameError::MissingEndMarker { found: end });
        }
        let crc_at = len - 1 - CRC_LEN;
        let body = &bytes[1..crc_at];
        check_crc(body, [bytes[crc_at], bytes[crc_at + 1]])?;
        Ok(RawFrame {
            family: FrameFamily::Framed,
            body,
            total_len: len,
        })
    } else {
        // Fixed-length frames always carry two selector bytes
        if len < FrameFamily::FixedLength.overhead() + 2 {
            return Err(FrameError::TooShort { len });
        }
        let crc_at = len - CRC_LEN;
        let body = &bytes[..crc_at];
        check_crc(body, [bytes[crc_at], bytes[crc_at + 1]])?;
        Ok(RawFrame {
            family: FrameFamily::FixedLength,
            body,
            total_len: len,
        })
    }
}

fn check_crc(covered: &[u8], stored: [u8; 2]) -> FrameResult<()> {
    let stored = u16::from_le_bytes(stored);
    let computed = compute_crc16(covered);
    if stored == computed {
        Ok(())
    } else {
        Err(FrameError::Checksum { stored, computed })
    }
}

/// Wrap a body (selector bytes plus payload) in the envelope for `family`.
pub(crate) fn seal(family: FrameFamily, body: &[u8]) -> Bytes {
    let crc = compute_crc16(body);
    let mut buf = BytesMut::with_capacity(body.len() + family.overhead());
    if family == FrameFamily::Framed {
        buf.put_u8(START_MARKER);
    }
    buf.put_slice(body);
    buf.put_u16_le(crc);
    if family == FrameFamily::Framed {
        buf.put_u8(END_MARKER);
    }
    buf.freeze()
}
