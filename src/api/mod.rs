//! Purpose: Public client surface of the proxy adapter.
//! Exports: `ProxyClient`, `ExecuteTask`, and the core types callers pass in or get back.
//! Role: Stable boundary for embedding applications and the CLI.
//! Invariants: Transport and framer are injected; this module never opens sockets itself.

mod batch;
mod client;
mod query;

pub use crate::core::auth::{AccessToken, TokenClaims, TokenManager, parse_claims};
pub use crate::core::batch::{BatchAction, BatchError, BatchRecord};
pub use crate::core::command::Command;
pub use crate::core::config::{ClientConfig, Credentials};
#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::policy::{
    BasePolicy, BatchPolicy, QueryPolicy, ReadPolicy, ScanPolicy, WritePolicy,
};
pub use crate::core::query::{Filter, IndexCollection, PartitionFilter, RecordSet, Statement};
pub use crate::core::record::{Bin, Key, KeyRecord, Operation, Record, Value};
pub use crate::core::transport::{CallKind, Framer, ProxyTransport};
pub use client::{ApiResult, CLIENT_VERSION_HEADER, ProxyClient};
pub use query::{ExecuteTask, TaskStatus};
