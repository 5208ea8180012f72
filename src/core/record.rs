// Keys, values, bins, operations, and decoded records.
use bytes::Bytes;
use std::collections::BTreeMap;

pub const DIGEST_LEN: usize = 20;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParticleType {
    Null,
    Integer,
    Double,
    String,
    Blob,
    Bool,
    Hll,
    Map,
    List,
    GeoJson,
    Other(u8),
}

impl ParticleType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ParticleType::Null,
            1 => ParticleType::Integer,
            2 => ParticleType::Double,
            3 => ParticleType::String,
            4 => ParticleType::Blob,
            17 => ParticleType::Bool,
            18 => ParticleType::Hll,
            19 => ParticleType::Map,
            20 => ParticleType::List,
            23 => ParticleType::GeoJson,
            other => ParticleType::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            ParticleType::Null => 0,
            ParticleType::Integer => 1,
            ParticleType::Double => 2,
            ParticleType::String => 3,
            ParticleType::Blob => 4,
            ParticleType::Bool => 17,
            ParticleType::Hll => 18,
            ParticleType::Map => 19,
            ParticleType::List => 20,
            ParticleType::GeoJson => 23,
            ParticleType::Other(value) => value,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Blob(Vec<u8>),
    GeoJson(String),
    /// Server-packed collection (map, list, HLL) left in its wire encoding.
    Packed { particle: ParticleType, bytes: Bytes },
    /// Repeated results for one bin, in op order.
    List(Vec<Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) | Value::GeoJson(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Key {
    pub namespace: String,
    pub set_name: String,
    pub user_key: Option<Value>,
    pub digest: Option<[u8; DIGEST_LEN]>,
}

impl Key {
    pub fn new(namespace: impl Into<String>, set_name: impl Into<String>, user_key: impl Into<Value>) -> Self {
        Self {
            namespace: namespace.into(),
            set_name: set_name.into(),
            user_key: Some(user_key.into()),
            digest: None,
        }
    }

    pub fn from_digest(
        namespace: impl Into<String>,
        set_name: impl Into<String>,
        digest: [u8; DIGEST_LEN],
    ) -> Self {
        Self {
            namespace: namespace.into(),
            set_name: set_name.into(),
            user_key: None,
            digest: Some(digest),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bin {
    pub name: String,
    pub value: Value,
}

impl Bin {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OperationType {
    Read,
    ReadHeader,
    Write,
    Add,
    Append,
    Prepend,
    Touch,
    Delete,
    CdtRead,
    CdtModify,
}

impl OperationType {
    pub fn is_write(self) -> bool {
        !matches!(
            self,
            OperationType::Read | OperationType::ReadHeader | OperationType::CdtRead
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Operation {
    pub op_type: OperationType,
    pub bin_name: Option<String>,
    pub value: Value,
}

impl Operation {
    pub fn get(bin_name: impl Into<String>) -> Self {
        Self {
            op_type: OperationType::Read,
            bin_name: Some(bin_name.into()),
            value: Value::Nil,
        }
    }

    pub fn get_header() -> Self {
        Self {
            op_type: OperationType::ReadHeader,
            bin_name: None,
            value: Value::Nil,
        }
    }

    pub fn put(bin: Bin) -> Self {
        Self::with_bin(OperationType::Write, bin)
    }

    pub fn add(bin: Bin) -> Self {
        Self::with_bin(OperationType::Add, bin)
    }

    pub fn append(bin: Bin) -> Self {
        Self::with_bin(OperationType::Append, bin)
    }

    pub fn prepend(bin: Bin) -> Self {
        Self::with_bin(OperationType::Prepend, bin)
    }

    pub fn touch() -> Self {
        Self {
            op_type: OperationType::Touch,
            bin_name: None,
            value: Value::Nil,
        }
    }

    pub fn delete() -> Self {
        Self {
            op_type: OperationType::Delete,
            bin_name: None,
            value: Value::Nil,
        }
    }

    fn with_bin(op_type: OperationType, bin: Bin) -> Self {
        Self {
            op_type,
            bin_name: Some(bin.name),
            value: bin.value,
        }
    }
}

pub fn has_write(ops: &[Operation]) -> bool {
    ops.iter().any(|op| op.op_type.is_write())
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    pub bins: BTreeMap<String, Value>,
    pub generation: u32,
    pub expiration: u32,
}

impl Record {
    pub fn new(generation: u32, expiration: u32) -> Self {
        Self {
            bins: BTreeMap::new(),
            generation,
            expiration,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bins.get(name)
    }

    /// Adds a bin; a name seen twice collects its values into `Value::List`.
    pub fn push_bin(&mut self, name: String, value: Value) {
        match self.bins.get_mut(&name) {
            None => {
                self.bins.insert(name, value);
            }
            Some(Value::List(values)) => values.push(value),
            Some(existing) => {
                let first = std::mem::replace(existing, Value::Nil);
                *existing = Value::List(vec![first, value]);
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct KeyRecord {
    pub key: Key,
    pub record: Record,
}

#[cfg(test)]
mod tests {
    use super::{Bin, Operation, OperationType, ParticleType, Record, Value, has_write};

    #[test]
    fn particle_type_round_trips_known_codes() {
        for code in [0u8, 1, 2, 3, 4, 17, 18, 19, 20, 23, 99] {
            assert_eq!(ParticleType::from_u8(code).as_u8(), code);
        }
    }

    #[test]
    fn repeated_bin_collects_into_list() {
        let mut record = Record::new(1, 0);
        record.push_bin("x".to_string(), Value::Int(1));
        record.push_bin("x".to_string(), Value::Int(2));
        record.push_bin("x".to_string(), Value::Int(3));
        assert_eq!(
            record.get("x"),
            Some(&Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]))
        );
    }

    #[test]
    fn write_detection_ignores_reads() {
        let reads = [Operation::get("a"), Operation::get_header()];
        assert!(!has_write(&reads));
        let mixed = [Operation::get("a"), Operation::add(Bin::new("a", 1i64))];
        assert!(has_write(&mixed));
        assert!(OperationType::Touch.is_write());
    }
}
