// Core modules implementing framing, decoding, batch/stream reassembly, and error modeling.
pub mod auth;
pub mod batch;
pub mod classify;
pub mod command;
pub mod config;
pub mod cursor;
pub mod decoder;
pub mod envelope;
pub mod error;
#[cfg(test)]
pub(crate) mod fixtures;
pub mod frame;
pub mod policy;
pub mod query;
pub mod record;
pub mod result_code;
pub mod transport;
