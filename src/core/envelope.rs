//! Purpose: Proxy request/response envelopes exchanged with the gateway.
//! Exports: `ProxyRequest`, `ProxyResponse`, policy/query/scan sub-messages, auth messages.
//! Role: Wire types for the gRPC channel; the native payload rides inside as opaque bytes.
//! Invariants: Field tags are stable; a non-zero `ProxyResponse::status` is fatal for the response.
//! Invariants: `has_next == false` marks the terminal frame of a stream.

use bytes::Bytes;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Replica {
    Sequence = 0,
    Master = 1,
    MasterProles = 2,
    PreferRack = 3,
    Random = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ReadModeAp {
    One = 0,
    All = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ReadModeSc {
    Session = 0,
    Linearize = 1,
    AllowReplica = 2,
    AllowUnavailable = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum BackgroundTaskStatus {
    NotFound = 0,
    InProgress = 1,
    Complete = 2,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReadPolicyMessage {
    #[prost(enumeration = "Replica", tag = "1")]
    pub replica: i32,
    #[prost(enumeration = "ReadModeAp", tag = "2")]
    pub read_mode_ap: i32,
    #[prost(enumeration = "ReadModeSc", tag = "3")]
    pub read_mode_sc: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WritePolicyMessage {
    #[prost(enumeration = "Replica", tag = "1")]
    pub replica: i32,
    #[prost(enumeration = "ReadModeAp", tag = "2")]
    pub read_mode_ap: i32,
    #[prost(enumeration = "ReadModeSc", tag = "3")]
    pub read_mode_sc: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryPolicyMessage {
    #[prost(enumeration = "Replica", tag = "1")]
    pub replica: i32,
    #[prost(enumeration = "ReadModeAp", tag = "2")]
    pub read_mode_ap: i32,
    #[prost(enumeration = "ReadModeSc", tag = "3")]
    pub read_mode_sc: i32,
    #[prost(uint32, tag = "4")]
    pub total_timeout_ms: u32,
    #[prost(bool, tag = "5")]
    pub include_bin_data: bool,
    #[prost(uint32, tag = "6")]
    pub record_queue_size: u32,
    #[prost(bool, tag = "7")]
    pub short_query: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ScanPolicyMessage {
    #[prost(enumeration = "Replica", tag = "1")]
    pub replica: i32,
    #[prost(enumeration = "ReadModeAp", tag = "2")]
    pub read_mode_ap: i32,
    #[prost(enumeration = "ReadModeSc", tag = "3")]
    pub read_mode_sc: i32,
    #[prost(uint32, tag = "4")]
    pub total_timeout_ms: u32,
    #[prost(bool, tag = "5")]
    pub include_bin_data: bool,
    #[prost(uint32, tag = "6")]
    pub records_per_second: u32,
    #[prost(uint64, tag = "7")]
    pub max_records: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FilterMessage {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int32, tag = "2")]
    pub index_type: i32,
    #[prost(int32, tag = "3")]
    pub value_type: i32,
    #[prost(bytes = "vec", tag = "4")]
    pub begin: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub end: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OperationMessage {
    #[prost(int32, tag = "1")]
    pub op_type: i32,
    #[prost(string, optional, tag = "2")]
    pub bin_name: Option<String>,
    #[prost(bytes = "vec", tag = "3")]
    pub value: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StatementMessage {
    #[prost(string, tag = "1")]
    pub namespace: String,
    #[prost(string, tag = "2")]
    pub set_name: String,
    #[prost(string, optional, tag = "3")]
    pub index_name: Option<String>,
    #[prost(string, repeated, tag = "4")]
    pub bin_names: Vec<String>,
    #[prost(message, optional, tag = "5")]
    pub filter: Option<FilterMessage>,
    #[prost(string, optional, tag = "6")]
    pub package_name: Option<String>,
    #[prost(string, optional, tag = "7")]
    pub function_name: Option<String>,
    #[prost(bytes = "vec", repeated, tag = "8")]
    pub function_args: Vec<Vec<u8>>,
    #[prost(message, repeated, tag = "9")]
    pub operations: Vec<OperationMessage>,
    #[prost(uint64, tag = "10")]
    pub task_id: u64,
    #[prost(uint64, tag = "11")]
    pub max_records: u64,
    #[prost(uint32, tag = "12")]
    pub records_per_second: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PartitionStatusMessage {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(int64, optional, tag = "2")]
    pub bval: Option<i64>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub digest: Option<Vec<u8>>,
    #[prost(bool, tag = "4")]
    pub retry: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PartitionFilterMessage {
    #[prost(uint32, tag = "1")]
    pub begin: u32,
    #[prost(uint32, tag = "2")]
    pub count: u32,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub digest: Option<Vec<u8>>,
    #[prost(message, repeated, tag = "4")]
    pub partition_statuses: Vec<PartitionStatusMessage>,
    #[prost(bool, tag = "5")]
    pub retry: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryRequest {
    #[prost(message, optional, tag = "1")]
    pub query_policy: Option<QueryPolicyMessage>,
    #[prost(message, optional, tag = "2")]
    pub statement: Option<StatementMessage>,
    #[prost(message, optional, tag = "3")]
    pub partition_filter: Option<PartitionFilterMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ScanRequest {
    #[prost(message, optional, tag = "1")]
    pub scan_policy: Option<ScanPolicyMessage>,
    #[prost(string, tag = "2")]
    pub namespace: String,
    #[prost(string, tag = "3")]
    pub set_name: String,
    #[prost(string, repeated, tag = "4")]
    pub bin_names: Vec<String>,
    #[prost(message, optional, tag = "5")]
    pub partition_filter: Option<PartitionFilterMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BackgroundExecuteRequest {
    #[prost(message, optional, tag = "1")]
    pub write_policy: Option<WritePolicyMessage>,
    #[prost(message, optional, tag = "2")]
    pub statement: Option<StatementMessage>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BackgroundTaskStatusRequest {
    #[prost(uint64, tag = "1")]
    pub task_id: u64,
    #[prost(bool, tag = "2")]
    pub is_scan: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProxyRequest {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(uint32, tag = "2")]
    pub iteration: u32,
    #[prost(bytes = "vec", tag = "3")]
    pub payload: Vec<u8>,
    #[prost(message, optional, tag = "4")]
    pub read_policy: Option<ReadPolicyMessage>,
    #[prost(message, optional, tag = "5")]
    pub write_policy: Option<WritePolicyMessage>,
    #[prost(message, optional, tag = "6")]
    pub scan_request: Option<ScanRequest>,
    #[prost(message, optional, tag = "7")]
    pub query_request: Option<QueryRequest>,
    #[prost(message, optional, tag = "8")]
    pub background_execute_request: Option<BackgroundExecuteRequest>,
    #[prost(message, optional, tag = "9")]
    pub background_task_status_request: Option<BackgroundTaskStatusRequest>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProxyResponse {
    #[prost(int32, tag = "1")]
    pub status: i32,
    #[prost(bytes = "bytes", tag = "2")]
    pub payload: Bytes,
    #[prost(bool, tag = "3")]
    pub in_doubt: bool,
    #[prost(uint32, tag = "4")]
    pub id: u32,
    #[prost(bool, tag = "5")]
    pub has_next: bool,
    #[prost(enumeration = "BackgroundTaskStatus", optional, tag = "6")]
    pub background_task_status: Option<i32>,
}

impl ProxyResponse {
    /// Terminal frame with the given payload and no embedded status.
    pub fn last(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::default()
        }
    }

    /// Non-terminal frame of a stream.
    pub fn chunk(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            has_next: true,
            ..Self::default()
        }
    }

    pub fn failed(status: i32) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AuthRequest {
    #[prost(string, tag = "1")]
    pub username: String,
    #[prost(string, tag = "2")]
    pub password: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AuthResponse {
    #[prost(string, tag = "1")]
    pub token: String,
}
