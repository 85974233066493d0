//! Wire framing: `magic(4) | command(12) | length(u32 LE) | checksum(4) | payload`.
//!
//! The codec surfaces the magic of every frame instead of validating it, so
//! that the identity gate (not the parser) decides what a foreign tag means.

use chain::sha256d;
use forks::params::MAGIC_LEN;
use forks::NetworkMagic;

use crate::constants::{CHECKSUM_SIZE, COMMAND_SIZE, FRAME_HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: NetworkMagic,
    pub command: String,
    pub length: u32,
    pub checksum: [u8; CHECKSUM_SIZE],
}

/// A fully read frame whose checksum has been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub magic: NetworkMagic,
    pub command: String,
    pub payload: Vec<u8>,
}

/// First four bytes of the double SHA-256 of the payload.
pub fn checksum(payload: &[u8]) -> [u8; CHECKSUM_SIZE] {
    let digest = sha256d(payload);
    let mut out = [0u8; CHECKSUM_SIZE];
    out.copy_from_slice(&digest[..CHECKSUM_SIZE]);
    out
}

pub fn encode_frame(magic: NetworkMagic, command: &str, payload: &[u8]) -> Result<Vec<u8>, Error> {
    if command.is_empty() || command.len() > COMMAND_SIZE || !command.is_ascii() {
        return Err(Error::Frame(format!("invalid command {:?}", command)));
    }
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(Error::PayloadTooLarge(payload.len()));
    }

    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    out.extend_from_slice(magic.as_bytes());
    let mut cmd = [0u8; COMMAND_SIZE];
    cmd[..command.len()].copy_from_slice(command.as_bytes());
    out.extend_from_slice(&cmd);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&checksum(payload));
    out.extend_from_slice(payload);
    Ok(out)
}

pub fn decode_header(buf: &[u8; FRAME_HEADER_SIZE]) -> Result<FrameHeader, Error> {
    let mut magic = [0u8; MAGIC_LEN];
    magic.copy_from_slice(&buf[..MAGIC_LEN]);

    let cmd_bytes = &buf[MAGIC_LEN..MAGIC_LEN + COMMAND_SIZE];
    let cmd_len = cmd_bytes
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(COMMAND_SIZE);
    // Everything after the first NUL must also be NUL.
    if cmd_len == 0 || cmd_bytes[cmd_len..].iter().any(|&b| b != 0) {
        return Err(Error::Frame("malformed command field".to_string()));
    }
    let command = std::str::from_utf8(&cmd_bytes[..cmd_len])
        .ok()
        .filter(|s| s.bytes().all(|b| b.is_ascii_graphic()))
        .ok_or_else(|| Error::Frame("non-ASCII command".to_string()))?
        .to_string();

    let len_offset = MAGIC_LEN + COMMAND_SIZE;
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&buf[len_offset..len_offset + 4]);
    let length = u32::from_le_bytes(len_bytes);
    if length as usize > MAX_PAYLOAD_SIZE {
        return Err(Error::PayloadTooLarge(length as usize));
    }

    let mut checksum = [0u8; CHECKSUM_SIZE];
    checksum.copy_from_slice(&buf[len_offset + 4..FRAME_HEADER_SIZE]);

    Ok(FrameHeader {
        magic: NetworkMagic(magic),
        command,
        length,
        checksum,
    })
}

pub fn verify_payload(header: &FrameHeader, payload: &[u8]) -> Result<(), Error> {
    if payload.len() != header.length as usize {
        return Err(Error::Frame(format!(
            "payload length {} does not match header {}",
            payload.len(),
            header.length
        )));
    }
    if checksum(payload) != header.checksum {
        return Err(Error::Frame(format!(
            "checksum mismatch for {}",
            header.command
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use forks::{POSTFORK_MAGIC, PREFORK_MAGIC};

    fn header_of(frame: &[u8]) -> [u8; FRAME_HEADER_SIZE] {
        let mut h = [0u8; FRAME_HEADER_SIZE];
        h.copy_from_slice(&frame[..FRAME_HEADER_SIZE]);
        h
    }

    #[test]
    fn test_header_layout() {
        let frame = encode_frame(PREFORK_MAGIC, "ping", &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        assert_eq!(frame.len(), FRAME_HEADER_SIZE + 8);
        assert_eq!(&frame[..4], PREFORK_MAGIC.as_bytes());
        assert_eq!(&frame[4..8], b"ping");
        assert!(frame[8..16].iter().all(|&b| b == 0));
        assert_eq!(&frame[16..20], &8u32.to_le_bytes());
    }

    #[test]
    fn test_decode_surfaces_foreign_magic() {
        let frame = encode_frame(POSTFORK_MAGIC, "block", b"payload").unwrap();
        let header = decode_header(&header_of(&frame)).unwrap();
        assert_eq!(header.magic, POSTFORK_MAGIC);
        assert_eq!(header.command, "block");
        assert_eq!(header.length, 7);
        assert!(verify_payload(&header, &frame[FRAME_HEADER_SIZE..]).is_ok());
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut frame = encode_frame(PREFORK_MAGIC, "block", b"payload").unwrap();
        let header = decode_header(&header_of(&frame)).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        assert!(verify_payload(&header, &frame[FRAME_HEADER_SIZE..]).is_err());
    }

    #[test]
    fn test_empty_payload_checksum() {
        let frame = encode_frame(PREFORK_MAGIC, "verack", &[]).unwrap();
        let header = decode_header(&header_of(&frame)).unwrap();
        assert_eq!(header.checksum, [0x5d, 0xf6, 0xe0, 0xe2]);
        assert!(verify_payload(&header, &[]).is_ok());
    }

    #[test]
    fn test_invalid_commands_rejected() {
        assert!(encode_frame(PREFORK_MAGIC, "", &[]).is_err());
        assert!(encode_frame(PREFORK_MAGIC, "thirteen_char", &[]).is_err());

        let mut frame = encode_frame(PREFORK_MAGIC, "ping", &[]).unwrap();
        // Garbage after the NUL terminator
        frame[10] = b'x';
        assert!(decode_header(&header_of(&frame)).is_err());
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut frame = encode_frame(PREFORK_MAGIC, "block", &[]).unwrap();
        frame[16..20].copy_from_slice(&(MAX_PAYLOAD_SIZE as u32 + 1).to_le_bytes());
        assert!(matches!(
            decode_header(&header_of(&frame)),
            Err(Error::PayloadTooLarge(_))
        ));
    }
}
