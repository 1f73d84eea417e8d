//! Packet framing and command payloads.
//!
//! ```text
//! 0x7E | cmd u8 | len u16 | payload[len] | crc16 u16
//! ```
//!
//! The CRC is CRC-16/CCITT-FALSE over `cmd`, `len` and the payload. Replies
//! echo the command with the high bit set, or answer [`NAK`] with a reason
//! code.

use nom::number::complete::{le_u16, le_u32, le_u8};
use nom::IResult;

use crate::checksum;
use crate::error::{DiveError, Result};

pub const START: u8 = 0x7E;
pub const CMD_IDENTIFY: u8 = 0x10;
pub const CMD_DIRECTORY: u8 = 0x11;
pub const CMD_READ: u8 = 0x12;
pub const REPLY: u8 = 0x80;
pub const NAK: u8 = 0xEE;

/// Largest payload either side may send in one packet.
pub const MAX_PAYLOAD: usize = 512;
/// Start byte, command and length.
pub const HEADER_LEN: usize = 4;
pub const CRC_LEN: usize = 2;

pub const DIR_ENTRY_LEN: usize = 8;
const DIR_FLAG_IN_USE: u8 = 0x01;

type PResult<'a, T> = IResult<&'a [u8], T>;

fn byte(input: &[u8]) -> PResult<'_, u8> {
    le_u8(input)
}

fn word(input: &[u8]) -> PResult<'_, u16> {
    le_u16(input)
}

fn dword(input: &[u8]) -> PResult<'_, u32> {
    le_u32(input)
}

fn truncated(what: &str) -> DiveError {
    DiveError::data_format(format!("truncated {what}"))
}

pub fn encode_frame(cmd: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + CRC_LEN);
    frame.push(START);
    frame.push(cmd);
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(payload);
    let crc = checksum::crc16_ccitt(0xFFFF, &frame[1..]);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub cmd: u8,
    pub len: usize,
}

fn frame_header(input: &[u8]) -> PResult<'_, (u8, u8, u16)> {
    let (input, start) = byte(input)?;
    let (input, cmd) = byte(input)?;
    let (input, len) = word(input)?;
    Ok((input, (start, cmd, len)))
}

/// Decode the fixed four leading bytes of a packet.
pub fn parse_frame_header(header: &[u8]) -> Result<FrameHeader> {
    let (_, (start, cmd, len)) = frame_header(header).map_err(|_| truncated("packet header"))?;
    if start != START {
        return Err(DiveError::data_format(format!(
            "unexpected start byte 0x{start:02x}"
        )));
    }
    let len = usize::from(len);
    if len > MAX_PAYLOAD {
        return Err(DiveError::data_format(format!(
            "packet payload of {len} bytes exceeds {MAX_PAYLOAD}"
        )));
    }
    Ok(FrameHeader { cmd, len })
}

/// Check the CRC of a packet. `body` is the payload followed by the CRC.
pub fn verify_frame<'a>(header: &[u8], body: &'a [u8]) -> Result<&'a [u8]> {
    if header.len() != HEADER_LEN || body.len() < CRC_LEN {
        return Err(truncated("packet"));
    }
    let (payload, trailer) = body.split_at(body.len() - CRC_LEN);
    let crc = checksum::crc16_ccitt(0xFFFF, &header[1..]);
    let crc = checksum::crc16_ccitt(crc, payload);
    let expected = u16::from_le_bytes([trailer[0], trailer[1]]);
    if crc != expected {
        return Err(DiveError::Checksum {
            expected: u32::from(expected),
            computed: u32::from(crc),
        });
    }
    Ok(payload)
}

/// Reply to [`CMD_IDENTIFY`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Identity {
    pub model: u8,
    pub firmware: u16,
    pub serial: u32,
    /// Instrument clock, seconds since 2000-01-01.
    pub clock: u32,
}

pub const IDENTITY_LEN: usize = 11;

fn identity(input: &[u8]) -> PResult<'_, Identity> {
    let (input, model) = byte(input)?;
    let (input, firmware) = word(input)?;
    let (input, serial) = dword(input)?;
    let (input, clock) = dword(input)?;
    Ok((
        input,
        Identity {
            model,
            firmware,
            serial,
            clock,
        },
    ))
}

impl Identity {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() != IDENTITY_LEN {
            return Err(DiveError::data_format(format!(
                "identity payload is {} bytes, expected {IDENTITY_LEN}",
                payload.len()
            )));
        }
        identity(payload)
            .map(|(_, identity)| identity)
            .map_err(|_| truncated("identity"))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(IDENTITY_LEN);
        out.push(self.model);
        out.extend_from_slice(&self.firmware.to_le_bytes());
        out.extend_from_slice(&self.serial.to_le_bytes());
        out.extend_from_slice(&self.clock.to_le_bytes());
        out
    }
}

/// One slot of the instrument's dive directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub id: u16,
    pub length: u32,
    pub in_use: bool,
}

impl DirEntry {
    pub fn encode(&self) -> [u8; DIR_ENTRY_LEN] {
        let mut out = [0u8; DIR_ENTRY_LEN];
        out[0..2].copy_from_slice(&self.id.to_le_bytes());
        out[2..6].copy_from_slice(&self.length.to_le_bytes());
        out[6] = if self.in_use { DIR_FLAG_IN_USE } else { 0 };
        out[7] = checksum::xor8(0, &out[..7]);
        out
    }
}

fn dir_entry(input: &[u8]) -> PResult<'_, (u16, u32, u8, u8)> {
    let (input, id) = word(input)?;
    let (input, length) = dword(input)?;
    let (input, flags) = byte(input)?;
    let (input, check) = byte(input)?;
    Ok((input, (id, length, flags, check)))
}

/// Decode a [`CMD_DIRECTORY`] reply, oldest dive first.
pub fn parse_directory(payload: &[u8]) -> Result<Vec<DirEntry>> {
    let (mut input, count) = word(payload).map_err(|_| truncated("directory"))?;
    let count = usize::from(count);
    if input.len() != count * DIR_ENTRY_LEN {
        return Err(DiveError::data_format(format!(
            "directory announces {count} entries but carries {} bytes",
            input.len()
        )));
    }

    let mut entries = Vec::with_capacity(count);
    for slot in 0..count {
        checksum::verify_xor8(&input[..DIR_ENTRY_LEN - 1], input[DIR_ENTRY_LEN - 1])?;
        let (rest, (id, length, flags, _)) =
            dir_entry(input).map_err(|_| truncated("directory entry"))?;
        if flags & !DIR_FLAG_IN_USE != 0 {
            return Err(DiveError::data_format(format!(
                "directory slot {slot} has unknown flags 0x{flags:02x}"
            )));
        }
        entries.push(DirEntry {
            id,
            length,
            in_use: flags & DIR_FLAG_IN_USE != 0,
        });
        input = rest;
    }
    Ok(entries)
}

pub fn encode_directory(entries: &[DirEntry]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + entries.len() * DIR_ENTRY_LEN);
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for entry in entries {
        out.extend_from_slice(&entry.encode());
    }
    out
}

/// Payload of [`CMD_READ`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadRequest {
    pub id: u16,
    pub offset: u32,
    pub size: u16,
}

pub const READ_REQUEST_LEN: usize = 8;

fn read_request(input: &[u8]) -> PResult<'_, ReadRequest> {
    let (input, id) = word(input)?;
    let (input, offset) = dword(input)?;
    let (input, size) = word(input)?;
    Ok((input, ReadRequest { id, offset, size }))
}

impl ReadRequest {
    pub fn encode(&self) -> [u8; READ_REQUEST_LEN] {
        let mut out = [0u8; READ_REQUEST_LEN];
        out[0..2].copy_from_slice(&self.id.to_le_bytes());
        out[2..6].copy_from_slice(&self.offset.to_le_bytes());
        out[6..8].copy_from_slice(&self.size.to_le_bytes());
        out
    }

    pub fn parse(payload: &[u8]) -> Result<Self> {
        match read_request(payload) {
            Ok((rest, request)) if rest.is_empty() => Ok(request),
            _ => Err(truncated("read request")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_frame_round_trip() {
        let frame = encode_frame(CMD_READ | REPLY, &[1, 2, 3]);
        assert_eq!(frame[0], START);
        let header = parse_frame_header(&frame[..HEADER_LEN]).unwrap();
        assert_eq!(
            header,
            FrameHeader {
                cmd: CMD_READ | REPLY,
                len: 3
            }
        );
        let payload = verify_frame(&frame[..HEADER_LEN], &frame[HEADER_LEN..]).unwrap();
        assert_eq!(payload, &[1, 2, 3]);
    }

    #[test]
    fn test_frame_corruption_detected() {
        let mut frame = encode_frame(CMD_IDENTIFY | REPLY, &[9; 11]);
        frame[6] ^= 0x40;
        let err = verify_frame(&frame[..HEADER_LEN], &frame[HEADER_LEN..]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataFormat);
    }

    #[test]
    fn test_bad_start_byte() {
        let err = parse_frame_header(&[0x00, 0x90, 0x00, 0x00]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataFormat);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let err = parse_frame_header(&[START, 0x92, 0x01, 0x10]).unwrap_err();
        assert!(err.to_string().contains("exceeds"), "got: {err}");
    }

    #[test]
    fn test_identity_round_trip() {
        let identity = Identity {
            model: 3,
            firmware: 0x0102,
            serial: 123_456,
            clock: 800_000_000,
        };
        assert_eq!(Identity::parse(&identity.encode()).unwrap(), identity);
        assert!(Identity::parse(&[0; 5]).is_err());
    }

    #[test]
    fn test_directory_parse() {
        let entries = vec![
            DirEntry {
                id: 1,
                length: 100,
                in_use: true,
            },
            DirEntry {
                id: 2,
                length: 0,
                in_use: false,
            },
        ];
        let parsed = parse_directory(&encode_directory(&entries)).unwrap();
        assert_eq!(parsed, entries);
    }

    #[test]
    fn test_directory_unknown_flags() {
        let mut payload = encode_directory(&[DirEntry {
            id: 7,
            length: 64,
            in_use: true,
        }]);
        payload[2 + 6] = 0x81;
        payload[2 + 7] = checksum::xor8(0, &payload[2..2 + 7]);
        let err = parse_directory(&payload).unwrap_err();
        assert!(err.to_string().contains("unknown flags"), "got: {err}");
    }

    #[test]
    fn test_directory_bad_entry_checksum() {
        let mut payload = encode_directory(&[DirEntry {
            id: 7,
            length: 64,
            in_use: true,
        }]);
        payload[2 + 7] ^= 0xFF;
        let err = parse_directory(&payload).unwrap_err();
        assert!(matches!(err, DiveError::Checksum { .. }));
    }

    #[test]
    fn test_directory_length_mismatch() {
        let err = parse_directory(&[2, 0, 1, 2, 3]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataFormat);
    }
}
