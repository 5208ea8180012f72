//! Purpose: Seams to the collaborators this crate does not implement.
//! Exports: `ProxyTransport`, `Framer`, `CallKind`.
//! Role: `ProxyTransport` is the gRPC channel to the gateway; `Framer` encodes native requests.
//! Invariants: Transports return raw `tonic::Status` errors; classification happens here, not there.

use async_trait::async_trait;

use crate::core::batch::BatchRecord;
use crate::core::command::Command;
use crate::core::cursor::ResponseStream;
use crate::core::envelope::{AuthRequest, AuthResponse, ProxyRequest, ProxyResponse};
use crate::core::error::Error;
use crate::core::policy::BatchPolicy;
use crate::core::record::Value;

/// Gateway method a request is routed to.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CallKind {
    Read,
    GetHeader,
    Exists,
    Write,
    Delete,
    Touch,
    Operate,
    Execute,
    BatchOperate,
    Scan,
    Query,
    BackgroundExecute,
    BackgroundTaskStatus,
}

impl CallKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CallKind::Read => "read",
            CallKind::GetHeader => "get_header",
            CallKind::Exists => "exists",
            CallKind::Write => "write",
            CallKind::Delete => "delete",
            CallKind::Touch => "touch",
            CallKind::Operate => "operate",
            CallKind::Execute => "execute",
            CallKind::BatchOperate => "batch_operate",
            CallKind::Scan => "scan",
            CallKind::Query => "query",
            CallKind::BackgroundExecute => "background_execute",
            CallKind::BackgroundTaskStatus => "background_task_status",
        }
    }
}

#[async_trait]
pub trait ProxyTransport: Send + Sync {
    async fn unary(
        &self,
        kind: CallKind,
        request: tonic::Request<ProxyRequest>,
    ) -> Result<ProxyResponse, tonic::Status>;

    async fn server_stream(
        &self,
        kind: CallKind,
        request: tonic::Request<ProxyRequest>,
    ) -> Result<ResponseStream, tonic::Status>;

    async fn authenticate(
        &self,
        request: tonic::Request<AuthRequest>,
    ) -> Result<AuthResponse, tonic::Status>;
}

/// Native request encoder.
pub trait Framer: Send + Sync {
    fn encode_command(&self, command: &Command<'_>) -> Result<Vec<u8>, Error>;

    fn encode_batch(&self, policy: &BatchPolicy, records: &[BatchRecord]) -> Result<Vec<u8>, Error>;

    /// Packs a standalone value (filter bounds, UDF args, op operands).
    fn pack_value(&self, value: &Value) -> Result<Vec<u8>, Error>;
}
