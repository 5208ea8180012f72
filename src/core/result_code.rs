// Native result codes reported in the message header, plus client-side codes (negative).

pub const GRPC_ERROR: i32 = -21;
pub const BATCH_FAILED: i32 = -16;
pub const NO_RESPONSE: i32 = -15;
pub const MAX_RETRIES_EXCEEDED: i32 = -11;
pub const SERIALIZE_ERROR: i32 = -10;
pub const SERVER_NOT_AVAILABLE: i32 = -8;
pub const QUERY_TERMINATED: i32 = -5;
pub const PARSE_ERROR: i32 = -2;
pub const CLIENT_ERROR: i32 = -1;

pub const OK: i32 = 0;
pub const SERVER_ERROR: i32 = 1;
pub const KEY_NOT_FOUND: i32 = 2;
pub const GENERATION_ERROR: i32 = 3;
pub const PARAMETER_ERROR: i32 = 4;
pub const KEY_EXISTS: i32 = 5;
pub const BIN_EXISTS: i32 = 6;
pub const TIMEOUT: i32 = 9;
pub const ALWAYS_FORBIDDEN: i32 = 10;
pub const PARTITION_UNAVAILABLE: i32 = 11;
pub const BIN_TYPE_ERROR: i32 = 12;
pub const RECORD_TOO_BIG: i32 = 13;
pub const KEY_BUSY: i32 = 14;
pub const UNSUPPORTED_FEATURE: i32 = 16;
pub const BIN_NOT_FOUND: i32 = 17;
pub const DEVICE_OVERLOAD: i32 = 18;
pub const INVALID_NAMESPACE: i32 = 20;
pub const FILTERED_OUT: i32 = 27;
pub const QUERY_END: i32 = 50;
pub const NOT_AUTHENTICATED: i32 = 80;
pub const ROLE_VIOLATION: i32 = 81;
pub const FORBIDDEN: i32 = 82;
pub const QUOTA_EXCEEDED: i32 = 83;
pub const UDF_BAD_RESPONSE: i32 = 100;
pub const BATCH_DISABLED: i32 = 150;
pub const INDEX_NOT_FOUND: i32 = 201;
pub const QUERY_ABORTED: i32 = 210;
pub const QUERY_QUEUE_FULL: i32 = 211;

/// Envelope status the gateway uses when its request queue is saturated.
pub const ENVELOPE_SERVER_QUEUE_FULL: i32 = -3;

pub fn describe(code: i32) -> &'static str {
    match code {
        GRPC_ERROR => "grpc error",
        BATCH_FAILED => "one or more batch sub-commands failed",
        NO_RESPONSE => "no response received",
        MAX_RETRIES_EXCEEDED => "max retries exceeded",
        SERIALIZE_ERROR => "serialize error",
        SERVER_NOT_AVAILABLE => "server not available",
        ENVELOPE_SERVER_QUEUE_FULL => "server queue full",
        QUERY_TERMINATED => "query terminated",
        PARSE_ERROR => "parse error",
        CLIENT_ERROR => "client error",
        OK => "ok",
        SERVER_ERROR => "server error",
        KEY_NOT_FOUND => "key not found",
        GENERATION_ERROR => "generation error",
        PARAMETER_ERROR => "parameter error",
        KEY_EXISTS => "key already exists",
        BIN_EXISTS => "bin already exists",
        TIMEOUT => "timeout",
        ALWAYS_FORBIDDEN => "operation not allowed",
        PARTITION_UNAVAILABLE => "partition unavailable",
        BIN_TYPE_ERROR => "bin type error",
        RECORD_TOO_BIG => "record too big",
        KEY_BUSY => "hot key",
        UNSUPPORTED_FEATURE => "unsupported server feature",
        BIN_NOT_FOUND => "bin not found",
        DEVICE_OVERLOAD => "device overload",
        INVALID_NAMESPACE => "namespace not found",
        FILTERED_OUT => "transaction filtered out",
        QUERY_END => "query end",
        NOT_AUTHENTICATED => "not authenticated",
        ROLE_VIOLATION => "role violation",
        FORBIDDEN => "operation forbidden",
        QUOTA_EXCEEDED => "quota exceeded",
        UDF_BAD_RESPONSE => "udf returned error",
        BATCH_DISABLED => "batch functionality has been disabled",
        INDEX_NOT_FOUND => "index not found",
        QUERY_ABORTED => "query aborted",
        QUERY_QUEUE_FULL => "query queue full",
        _ => "unknown result code",
    }
}
