// Native proto header layout, message-group unwrapping, and zlib decompression.
use bytes::Bytes;
use flate2::read::ZlibDecoder;
use std::io::Read;

use crate::core::error::Error;

pub const PROTO_HEADER_LEN: usize = 8;
pub const PROTO_VERSION: u8 = 2;
pub const MSG_TYPE_MESSAGE: u8 = 3;
pub const MSG_TYPE_COMPRESSED: u8 = 4;
pub const MAX_GROUP_SIZE: u64 = 128 * 1024 * 1024;

const SIZE_MASK: u64 = 0xFFFF_FFFF_FFFF;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProtoHeader {
    pub version: u8,
    pub msg_type: u8,
    pub size: u64,
}

impl ProtoHeader {
    pub fn new(msg_type: u8, size: u64) -> Self {
        Self {
            version: PROTO_VERSION,
            msg_type,
            size,
        }
    }

    pub fn encode(&self) -> [u8; PROTO_HEADER_LEN] {
        let raw = ((self.version as u64) << 56) | ((self.msg_type as u64) << 48) | (self.size & SIZE_MASK);
        raw.to_be_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < PROTO_HEADER_LEN {
            return Err(Error::parse("proto header too small"));
        }
        let raw = read_u64(buf, 0);
        let header = Self {
            version: (raw >> 56) as u8,
            msg_type: ((raw >> 48) & 0xFF) as u8,
            size: raw & SIZE_MASK,
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.msg_type != MSG_TYPE_MESSAGE && self.msg_type != MSG_TYPE_COMPRESSED {
            return Err(Error::parse(format!(
                "unexpected message type {}",
                self.msg_type
            )));
        }
        if self.size > MAX_GROUP_SIZE {
            return Err(Error::parse(format!(
                "message group size {} exceeds max",
                self.size
            )));
        }
        Ok(())
    }

    pub fn is_compressed(&self) -> bool {
        self.msg_type == MSG_TYPE_COMPRESSED
    }
}

/// Returns the plain message body behind `header`.
///
/// Compressed bodies carry an 8-byte uncompressed length, then a zlib stream
/// holding a complete inner message (its own proto header plus body).
pub fn unwrap_group(header: ProtoHeader, body: Bytes) -> Result<Bytes, Error> {
    if !header.is_compressed() {
        return Ok(body);
    }
    if body.len() < PROTO_HEADER_LEN {
        return Err(Error::parse("compressed body missing length prefix"));
    }
    let expected = read_u64(&body, 0);
    if expected > MAX_GROUP_SIZE + PROTO_HEADER_LEN as u64 {
        return Err(Error::parse("compressed length exceeds max"));
    }
    let mut inflated = Vec::with_capacity(expected as usize);
    ZlibDecoder::new(&body[PROTO_HEADER_LEN..])
        .read_to_end(&mut inflated)
        .map_err(|err| Error::parse("failed to inflate message").with_source(err))?;
    if inflated.len() as u64 != expected {
        return Err(Error::parse(format!(
            "inflated {} bytes, expected {expected}",
            inflated.len()
        )));
    }

    let inner = ProtoHeader::decode(&inflated)?;
    if inner.is_compressed() {
        return Err(Error::parse("nested compressed message"));
    }
    let end = PROTO_HEADER_LEN as u64 + inner.size;
    if end != inflated.len() as u64 {
        return Err(Error::parse("inner message size mismatch"));
    }
    let mut inflated = Bytes::from(inflated);
    Ok(inflated.split_off(PROTO_HEADER_LEN))
}

pub(crate) fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_be_bytes(out)
}
