//! Purpose: Map transport statuses and envelope status codes onto the client error taxonomy.
//! Exports: `Classifier`, `DEFAULT_MAX_MESSAGE_LEN`, `DEFAULT_SEPARATOR`.
//! Role: Single funnel every transport failure passes through before reaching a caller.
//! Invariants: Timeouts carry `in_doubt == is_write`; reads are never in doubt.
//! Invariants: Rendered messages never exceed the configured maximum length.

use std::error::Error as StdError;
use tonic::Code;

use crate::core::error::{Error, ErrorKind};
use crate::core::result_code;

pub const DEFAULT_MAX_MESSAGE_LEN: usize = 10 * 1024;
pub const DEFAULT_SEPARATOR: &str = " -> ";

#[derive(Clone, Debug)]
pub struct Classifier {
    max_message_len: usize,
    separator: String,
}

impl Classifier {
    pub fn new(max_message_len: usize, separator: impl Into<String>) -> Self {
        Self {
            max_message_len,
            separator: separator.into(),
        }
    }

    pub fn max_message_len(&self) -> usize {
        self.max_message_len
    }

    pub fn classify_status(&self, status: &tonic::Status, is_write: bool) -> Error {
        let head = format!("{:?}: {}", status.code(), status.message());
        let message = self.join_causes(head, status.source());
        let err = match status.code() {
            Code::DeadlineExceeded => Error::new(ErrorKind::Timeout).with_in_doubt(is_write),
            Code::PermissionDenied => Error::new(ErrorKind::Forbidden),
            Code::ResourceExhausted => Error::new(ErrorKind::QuotaExceeded),
            Code::Unauthenticated => Error::new(ErrorKind::NotAuthenticated),
            Code::Unavailable => Error::new(ErrorKind::ServerUnavailable),
            _ => Error::new(ErrorKind::Client).with_result_code(result_code::GRPC_ERROR),
        };
        err.with_message(message).with_source(status.clone())
    }

    /// Classifies a non-zero status embedded in a proxy response envelope.
    pub fn classify_envelope(&self, status: i32, in_doubt: bool, is_write: bool) -> Error {
        match status {
            result_code::ENVELOPE_SERVER_QUEUE_FULL => Error::new(ErrorKind::Server)
                .with_result_code(status)
                .with_message("server queue full")
                .with_in_doubt(in_doubt),
            result_code::TIMEOUT => Error::new(ErrorKind::Timeout)
                .with_message("server timeout")
                .with_in_doubt(in_doubt || is_write),
            _ => Error::from_result_code(status).with_in_doubt(in_doubt),
        }
    }

    pub fn timeout(&self, is_write: bool) -> Error {
        Error::new(ErrorKind::Timeout)
            .with_message("client deadline exceeded")
            .with_in_doubt(is_write)
    }

    pub fn cancelled(&self) -> Error {
        Error::new(ErrorKind::Cancelled).with_message("call cancelled")
    }

    /// Joins the error and its causes with the separator, bounded in length.
    pub fn display_message(&self, err: &(dyn StdError + 'static)) -> String {
        self.join_causes(err.to_string(), err.source())
    }

    fn join_causes(&self, head: String, mut cause: Option<&(dyn StdError + 'static)>) -> String {
        let mut out = head;
        while let Some(next) = cause {
            if out.len() >= self.max_message_len {
                break;
            }
            out.push_str(&self.separator);
            out.push_str(&next.to_string());
            cause = next.source();
        }
        self.truncate(out)
    }

    pub fn truncate(&self, mut message: String) -> String {
        if message.len() <= self.max_message_len {
            return message;
        }
        let mut end = self.max_message_len;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
        message
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_LEN, DEFAULT_SEPARATOR)
    }
}
