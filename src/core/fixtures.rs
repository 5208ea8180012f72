// Test-only builders for native message bytes.
use flate2::Compression;
use flate2::write::ZlibEncoder;
use std::io::Write;

use crate::core::decoder::{
    FIELD_DIGEST, FIELD_KEY, FIELD_NAMESPACE, FIELD_SET, INFO3_LAST, INFO3_PARTITION_DONE,
    MSG_HEADER_LEN,
};
use crate::core::frame::{MSG_TYPE_COMPRESSED, MSG_TYPE_MESSAGE, PROTO_HEADER_LEN, ProtoHeader};
use crate::core::result_code;

pub type Particle = (u8, Vec<u8>);

pub fn int(value: i64) -> Particle {
    (1, value.to_be_bytes().to_vec())
}

pub fn float(value: f64) -> Particle {
    (2, value.to_bits().to_be_bytes().to_vec())
}

pub fn string(value: &str) -> Particle {
    (3, value.as_bytes().to_vec())
}

pub fn boolean(value: bool) -> Particle {
    (17, vec![value as u8])
}

#[derive(Clone, Debug, Default)]
pub struct Row {
    info3: u8,
    result_code: i32,
    generation: u32,
    expiration: u32,
    batch_index: u32,
    fields: Vec<(u8, Vec<u8>)>,
    ops: Vec<(String, Particle)>,
}

impl Row {
    pub fn ok(generation: u32, expiration: u32) -> Self {
        Self {
            generation,
            expiration,
            ..Self::default()
        }
    }

    pub fn code(result_code: i32) -> Self {
        Self {
            result_code,
            ..Self::default()
        }
    }

    /// Stream terminator row.
    pub fn last() -> Self {
        Self {
            info3: INFO3_LAST,
            ..Self::default()
        }
    }

    /// Partition-done marker; the partition id rides in the generation slot.
    pub fn partition_done(partition: u32) -> Self {
        Self {
            info3: INFO3_PARTITION_DONE,
            result_code: result_code::OK,
            generation: partition,
            ..Self::default()
        }
    }

    pub fn index(mut self, index: u32) -> Self {
        self.batch_index = index;
        self
    }

    pub fn namespace(self, namespace: &str) -> Self {
        self.field(FIELD_NAMESPACE, namespace.as_bytes().to_vec())
    }

    pub fn set(self, set_name: &str) -> Self {
        self.field(FIELD_SET, set_name.as_bytes().to_vec())
    }

    pub fn digest(self, digest: [u8; 20]) -> Self {
        self.field(FIELD_DIGEST, digest.to_vec())
    }

    pub fn user_key(self, (particle, bytes): Particle) -> Self {
        let mut data = vec![particle];
        data.extend_from_slice(&bytes);
        self.field(FIELD_KEY, data)
    }

    pub fn field(mut self, field_type: u8, data: Vec<u8>) -> Self {
        self.fields.push((field_type, data));
        self
    }

    pub fn bin(mut self, name: &str, value: Particle) -> Self {
        self.ops.push((name.to_string(), value));
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MSG_HEADER_LEN);
        out.push(MSG_HEADER_LEN as u8);
        out.extend_from_slice(&[0, 0, self.info3, 0, self.result_code as u8]);
        out.extend_from_slice(&self.generation.to_be_bytes());
        out.extend_from_slice(&self.expiration.to_be_bytes());
        out.extend_from_slice(&self.batch_index.to_be_bytes());
        out.extend_from_slice(&(self.fields.len() as u16).to_be_bytes());
        out.extend_from_slice(&(self.ops.len() as u16).to_be_bytes());
        for (field_type, data) in &self.fields {
            out.extend_from_slice(&(data.len() as u32 + 1).to_be_bytes());
            out.push(*field_type);
            out.extend_from_slice(data);
        }
        for (name, (particle, value)) in &self.ops {
            let size = 4 + name.len() + value.len();
            out.extend_from_slice(&(size as u32).to_be_bytes());
            out.extend_from_slice(&[1, *particle, 0, name.len() as u8]);
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(value);
        }
        out
    }
}

/// One message group holding every row, prefixed by its proto header.
pub fn group(rows: &[Row]) -> Vec<u8> {
    let body: Vec<u8> = rows.iter().flat_map(Row::encode).collect();
    let mut out = ProtoHeader::new(MSG_TYPE_MESSAGE, body.len() as u64)
        .encode()
        .to_vec();
    out.extend_from_slice(&body);
    out
}

pub fn message(row: Row) -> Vec<u8> {
    group(&[row])
}

/// Wraps a full plain message in a compressed envelope.
pub fn compress(plain: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(plain).expect("deflate");
    let deflated = encoder.finish().expect("finish");
    let size = (PROTO_HEADER_LEN + deflated.len()) as u64;
    let mut out = ProtoHeader::new(MSG_TYPE_COMPRESSED, size).encode().to_vec();
    out.extend_from_slice(&(plain.len() as u64).to_be_bytes());
    out.extend_from_slice(&deflated);
    out
}
