//! Purpose: Client adapter that reaches a record database through a streaming gRPC proxy gateway.
//! Exports: `core` (framing, decoding, batch/query reassembly, credentials, errors) and `api`.
//! Role: Library backing the `kvgate` CLI and embedding applications.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
//! Invariants: No process-wide statics; configuration is passed into `api::ProxyClient`.
pub mod api;
pub mod core;
