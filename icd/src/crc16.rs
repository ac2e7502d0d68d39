//! CRC16 computation for ICD frames
//!
//! Every frame carries a CRC-16/CCITT-FALSE checksum (polynomial 0x1021,
//! initial value 0xFFFF, no reflection). The checksum is stored
//! little-endian, LSB first.
//!
//! Coverage depends on the frame family:
//! - Framed: every byte after START up to (excluding) the CRC
//! - Fixed-length: every byte before the CRC

use crc::{Crc, CRC_16_IBM_3740};

/// CRC-16/CCITT-FALSE (catalogued as CRC-16/IBM-3740)
const ICD_CRC: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Compute the CRC16 over a byte slice.
pub fn compute_crc16(data: &[u8]) -> u16 {
    ICD_CRC.checksum(data)
}

/// Verify a checksum region followed by its little-endian CRC16.
///
/// `covered` is the checksummed region and `stored` the two CRC bytes that
/// follow it on the wire.
pub fn verify_crc16(covered: &[u8], stored: [u8; 2]) -> bool {
    compute_crc16(covered) == u16::from_le_bytes(stored)
}
