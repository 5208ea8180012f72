//! Purpose: Decode the native per-record message header, key fields, and bin entries.
//! Exports: `RecordCursor`, `MessageHeader`, `DecodeOptions`, `KeyEcho`, record/outcome helpers.
//! Role: Shared by unary commands, batch reassembly, and query/scan streams.
//! Invariants: Byte offsets follow the native layout exactly (result code at body offset 5).
//! Invariants: Decoding is pure; the same bytes always yield the same outcome.

use bytes::Bytes;

use crate::core::error::Error;
use crate::core::record::{DIGEST_LEN, Key, ParticleType, Record, Value};
use crate::core::result_code;

pub const MSG_HEADER_LEN: usize = 22;
pub const RESULT_CODE_OFFSET: usize = 5;

pub const INFO3_LAST: u8 = 0x01;
pub const INFO3_PARTITION_DONE: u8 = 0x04;

pub const FIELD_NAMESPACE: u8 = 0;
pub const FIELD_SET: u8 = 1;
pub const FIELD_KEY: u8 = 2;
pub const FIELD_DIGEST: u8 = 4;

pub const UDF_SUCCESS_BIN: &str = "SUCCESS";
pub const UDF_FAILURE_BIN: &str = "FAILURE";

/// Forward-only reader over one decoded message group.
#[derive(Clone, Debug)]
pub struct RecordCursor {
    buf: Bytes,
    pos: usize,
}

impl RecordCursor {
    pub fn new(buf: Bytes) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        let bytes = self.take(1)?;
        Ok(bytes[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, Error> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, Error> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Bytes, Error> {
        let start = self.pos;
        self.take(n)?;
        Ok(self.buf.slice(start..start + n))
    }

    pub fn skip(&mut self, n: usize) -> Result<(), Error> {
        self.take(n).map(|_| ())
    }

    fn take(&mut self, n: usize) -> Result<&[u8], Error> {
        if self.remaining() < n {
            return Err(Error::parse(format!(
                "record truncated: need {n} bytes at offset {}, have {}",
                self.pos,
                self.remaining()
            )));
        }
        let start = self.pos;
        self.pos += n;
        Ok(&self.buf[start..self.pos])
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MessageHeader {
    pub header_len: u8,
    pub info1: u8,
    pub info2: u8,
    pub info3: u8,
    pub result_code: i32,
    pub generation: u32,
    pub expiration: u32,
    /// Transaction-ttl slot; batch responses carry the row index here.
    pub batch_index: u32,
    pub field_count: u16,
    pub op_count: u16,
}

impl MessageHeader {
    pub fn parse(cursor: &mut RecordCursor) -> Result<Self, Error> {
        let header_len = cursor.read_u8()?;
        if (header_len as usize) < MSG_HEADER_LEN {
            return Err(Error::parse(format!(
                "message header length {header_len} below {MSG_HEADER_LEN}"
            )));
        }
        let info1 = cursor.read_u8()?;
        let info2 = cursor.read_u8()?;
        let info3 = cursor.read_u8()?;
        cursor.skip(1)?;
        let result_code = cursor.read_u8()? as i32;
        let generation = cursor.read_u32()?;
        let expiration = cursor.read_u32()?;
        let batch_index = cursor.read_u32()?;
        let field_count = cursor.read_u16()?;
        let op_count = cursor.read_u16()?;
        cursor.skip(header_len as usize - MSG_HEADER_LEN)?;
        Ok(Self {
            header_len,
            info1,
            info2,
            info3,
            result_code,
            generation,
            expiration,
            batch_index,
            field_count,
            op_count,
        })
    }

    pub fn is_last(&self) -> bool {
        self.info3 & INFO3_LAST != 0
    }

    pub fn is_partition_done(&self) -> bool {
        self.info3 & INFO3_PARTITION_DONE != 0
    }
}

/// Key identity echoed back by the server ahead of the bins.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeyEcho {
    pub namespace: Option<String>,
    pub set_name: Option<String>,
    pub digest: Option<[u8; DIGEST_LEN]>,
    pub user_key: Option<Value>,
}

impl KeyEcho {
    pub fn into_key(self) -> Key {
        Key {
            namespace: self.namespace.unwrap_or_default(),
            set_name: self.set_name.unwrap_or_default(),
            user_key: self.user_key,
            digest: self.digest,
        }
    }
}

pub fn skip_key_fields(cursor: &mut RecordCursor, field_count: u16) -> Result<(), Error> {
    for _ in 0..field_count {
        let size = cursor.read_u32()? as usize;
        cursor.skip(size)?;
    }
    Ok(())
}

pub fn parse_key(cursor: &mut RecordCursor, field_count: u16) -> Result<KeyEcho, Error> {
    let mut key = KeyEcho::default();
    for _ in 0..field_count {
        let size = cursor.read_u32()? as usize;
        if size == 0 {
            return Err(Error::parse("zero length field"));
        }
        let field_type = cursor.read_u8()?;
        let data = cursor.read_bytes(size - 1)?;
        match field_type {
            FIELD_NAMESPACE => key.namespace = Some(utf8(&data, "namespace")?),
            FIELD_SET => key.set_name = Some(utf8(&data, "set name")?),
            FIELD_DIGEST => {
                let digest: [u8; DIGEST_LEN] = data[..]
                    .try_into()
                    .map_err(|_| Error::parse(format!("digest field has {} bytes", data.len())))?;
                key.digest = Some(digest);
            }
            FIELD_KEY => {
                if data.is_empty() {
                    return Err(Error::parse("empty user key field"));
                }
                key.user_key = Some(decode_particle(data[0], data.slice(1..))?);
            }
            _ => {}
        }
    }
    Ok(key)
}

/// Decodes `op_count` bin entries into a record.
pub fn parse_record(
    cursor: &mut RecordCursor,
    op_count: u16,
    generation: u32,
    expiration: u32,
) -> Result<Record, Error> {
    let mut record = Record::new(generation, expiration);
    for _ in 0..op_count {
        let op_size = cursor.read_u32()? as usize;
        let _op_type = cursor.read_u8()?;
        let particle = cursor.read_u8()?;
        let _version = cursor.read_u8()?;
        let name_len = cursor.read_u8()? as usize;
        let value_len = op_size
            .checked_sub(4 + name_len)
            .ok_or_else(|| Error::parse(format!("op size {op_size} smaller than its header")))?;
        let name = utf8(&cursor.read_bytes(name_len)?, "bin name")?;
        let value = decode_particle(particle, cursor.read_bytes(value_len)?)?;
        record.push_bin(name, value);
    }
    Ok(record)
}

/// Parses header, key fields, and bins of one message.
pub fn parse_message(cursor: &mut RecordCursor) -> Result<(MessageHeader, Record), Error> {
    let header = MessageHeader::parse(cursor)?;
    skip_key_fields(cursor, header.field_count)?;
    let record = parse_record(cursor, header.op_count, header.generation, header.expiration)?;
    Ok((header, record))
}

pub fn decode_particle(particle: u8, bytes: Bytes) -> Result<Value, Error> {
    let particle = ParticleType::from_u8(particle);
    match particle {
        ParticleType::Null => Ok(Value::Nil),
        ParticleType::Integer => decode_integer(&bytes).map(Value::Int),
        ParticleType::Double => {
            let raw: [u8; 8] = bytes[..]
                .try_into()
                .map_err(|_| Error::parse(format!("double particle has {} bytes", bytes.len())))?;
            Ok(Value::Float(f64::from_bits(u64::from_be_bytes(raw))))
        }
        ParticleType::String => utf8(&bytes, "string particle").map(Value::String),
        ParticleType::Blob => Ok(Value::Blob(bytes.to_vec())),
        ParticleType::Bool => match bytes.len() {
            1 => Ok(Value::Bool(bytes[0] != 0)),
            _ => decode_integer(&bytes).map(|value| Value::Bool(value != 0)),
        },
        ParticleType::GeoJson => {
            let mut cursor = RecordCursor::new(bytes);
            let _flags = cursor.read_u8()?;
            let ncells = cursor.read_u16()? as usize;
            cursor.skip(ncells * 8)?;
            let json = cursor.read_bytes(cursor.remaining())?;
            utf8(&json, "geojson particle").map(Value::GeoJson)
        }
        ParticleType::Hll | ParticleType::Map | ParticleType::List | ParticleType::Other(_) => {
            Ok(Value::Packed { particle, bytes })
        }
    }
}

fn decode_integer(bytes: &[u8]) -> Result<i64, Error> {
    match bytes.len() {
        8 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            Ok(i64::from_be_bytes(raw))
        }
        0..=7 => Ok(bytes
            .iter()
            .fold(0i64, |acc, byte| (acc << 8) | *byte as i64)),
        len => Err(Error::parse(format!("integer particle has {len} bytes"))),
    }
}

fn utf8(bytes: &[u8], what: &str) -> Result<String, Error> {
    String::from_utf8(bytes.to_vec())
        .map_err(|err| Error::parse(format!("{what} is not utf-8")).with_source(err))
}

/// How a caller treats the policy-dependent result codes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DecodeOptions {
    pub fail_on_not_found: bool,
    pub fail_on_filtered_out: bool,
}

impl DecodeOptions {
    pub fn read(fail_on_filtered_out: bool) -> Self {
        Self {
            fail_on_not_found: false,
            fail_on_filtered_out,
        }
    }

    pub fn write(fail_on_filtered_out: bool) -> Self {
        Self {
            fail_on_not_found: true,
            fail_on_filtered_out,
        }
    }
}

/// Turns a decoded single-record message into a record, absence, or an error.
///
/// `Ok(None)` means legitimate absence: not found for readers, or filtered
/// out when the policy tolerates it.
pub fn resolve_record(
    header: &MessageHeader,
    record: Record,
    options: DecodeOptions,
) -> Result<Option<Record>, Error> {
    match header.result_code {
        result_code::OK => match udf_failure(&record) {
            Some(err) => Err(err),
            None => Ok(Some(record)),
        },
        result_code::KEY_NOT_FOUND if !options.fail_on_not_found => Ok(None),
        result_code::FILTERED_OUT if !options.fail_on_filtered_out => Ok(None),
        result_code::UDF_BAD_RESPONSE => {
            Err(udf_failure(&record).unwrap_or_else(|| Error::from_result_code(result_code::UDF_BAD_RESPONSE)))
        }
        code => Err(Error::from_result_code(code)),
    }
}

/// Error described by a `FAILURE` bin, if the record carries one.
pub fn udf_failure(record: &Record) -> Option<Error> {
    let value = record.get(UDF_FAILURE_BIN)?;
    let message = match value.as_str() {
        Some(message) => message.to_string(),
        None => format!("{value:?}"),
    };
    let (code, message) = parse_udf_failure(&message);
    Some(Error::from_result_code(code).with_message(message))
}

/// Splits `file:line:code:message` into the embedded code and `file:line message`.
///
/// Falls back to `UDF_BAD_RESPONSE` and the raw text when the shape does not match.
pub fn parse_udf_failure(message: &str) -> (i32, String) {
    let parts: Vec<&str> = message.splitn(4, ':').collect();
    if parts.len() == 4 {
        if let Ok(code) = parts[2].trim().parse::<i32>() {
            return (code, format!("{}:{} {}", parts[0], parts[1], parts[3].trim()));
        }
    }
    (result_code::UDF_BAD_RESPONSE, message.to_string())
}
