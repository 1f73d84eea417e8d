//! Checksums used by instrument protocols and record formats.
//!
//! Every function here is pure. The `verify_*` helpers turn a mismatch into
//! [`DiveError::Checksum`] so both the download path and the parser report
//! corruption the same way.

use log::error;

use crate::error::{DiveError, Result};

/// XOR of all bytes, seeded with `init`.
pub fn xor8(init: u8, data: &[u8]) -> u8 {
    data.iter().fold(init, |acc, b| acc ^ b)
}

/// Wrapping byte sum, seeded with `init`.
pub fn add8(init: u8, data: &[u8]) -> u8 {
    data.iter().fold(init, |acc, b| acc.wrapping_add(*b))
}

/// Wrapping 16-bit sum of bytes, seeded with `init`.
pub fn add16(init: u16, data: &[u8]) -> u16 {
    data.iter()
        .fold(init, |acc, b| acc.wrapping_add(u16::from(*b)))
}

/// CRC-16/CCITT-FALSE: polynomial 0x1021, no reflection, no final xor.
/// Pass `0xFFFF` as `init` for the standard variant.
pub fn crc16_ccitt(init: u16, data: &[u8]) -> u16 {
    data.iter().fold(init, |crc, b| crc16_byte(crc, *b))
}

fn crc16_byte(mut crc: u16, b: u8) -> u16 {
    crc ^= u16::from(b) << 8;
    for _ in 0..8 {
        crc = if crc & 0x8000 != 0 {
            (crc << 1) ^ 0x1021
        } else {
            crc << 1
        };
    }
    crc
}

fn check(expected: u32, computed: u32) -> Result<()> {
    if expected == computed {
        Ok(())
    } else {
        error!("checksum mismatch: expected 0x{expected:04x}, computed 0x{computed:04x}");
        Err(DiveError::Checksum { expected, computed })
    }
}

pub fn verify_xor8(data: &[u8], expected: u8) -> Result<()> {
    check(u32::from(expected), u32::from(xor8(0, data)))
}

pub fn verify_add8(data: &[u8], expected: u8) -> Result<()> {
    check(u32::from(expected), u32::from(add8(0, data)))
}

pub fn verify_add16(data: &[u8], expected: u16) -> Result<()> {
    check(u32::from(expected), u32::from(add16(0, data)))
}

pub fn verify_crc16_ccitt(data: &[u8], expected: u16) -> Result<()> {
    check(u32::from(expected), u32::from(crc16_ccitt(0xFFFF, data)))
}

/// Validate a block whose last two bytes are a little-endian CRC-16/CCITT of
/// everything before them. Returns the payload without the trailer.
pub fn verify_crc16_trailer(block: &[u8]) -> Result<&[u8]> {
    if block.len() < 2 {
        return Err(DiveError::data_format(format!(
            "block of {} bytes has no room for a checksum",
            block.len()
        )));
    }
    let (payload, trailer) = block.split_at(block.len() - 2);
    let expected = u16::from_le_bytes([trailer[0], trailer[1]]);
    verify_crc16_ccitt(payload, expected)?;
    Ok(payload)
}
