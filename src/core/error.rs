use std::error::Error as StdError;
use std::fmt;

use crate::core::result_code;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Deadline or per-attempt timeout. Check `in_doubt()` before retrying a write.
    Timeout,
    Client,
    Server,
    Forbidden,
    QuotaExceeded,
    NotAuthenticated,
    ServerUnavailable,
    Serialize,
    Parse,
    Cancelled,
    /// A native non-zero result code reported by the database.
    Result,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    result_code: i32,
    in_doubt: bool,
    message: Option<String>,
    iteration: Option<u32>,
    partition: Option<u32>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            result_code: default_result_code(kind),
            in_doubt: false,
            message: None,
            iteration: None,
            partition: None,
            source: None,
        }
    }

    /// Error carrying a native result code; the kind is derived from the code.
    pub fn from_result_code(code: i32) -> Self {
        let kind = match code {
            result_code::TIMEOUT => ErrorKind::Timeout,
            result_code::NOT_AUTHENTICATED => ErrorKind::NotAuthenticated,
            result_code::FORBIDDEN | result_code::ROLE_VIOLATION => ErrorKind::Forbidden,
            result_code::QUOTA_EXCEEDED => ErrorKind::QuotaExceeded,
            result_code::SERVER_NOT_AVAILABLE => ErrorKind::ServerUnavailable,
            result_code::SERIALIZE_ERROR => ErrorKind::Serialize,
            result_code::PARSE_ERROR => ErrorKind::Parse,
            result_code::CLIENT_ERROR => ErrorKind::Client,
            _ => ErrorKind::Result,
        };
        let mut err = Self::new(kind);
        err.result_code = code;
        err
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn result_code(&self) -> i32 {
        self.result_code
    }

    pub fn in_doubt(&self) -> bool {
        self.in_doubt
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn iteration(&self) -> Option<u32> {
        self.iteration
    }

    pub fn partition(&self) -> Option<u32> {
        self.partition
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_result_code(mut self, code: i32) -> Self {
        self.result_code = code;
        self
    }

    pub fn with_in_doubt(mut self, in_doubt: bool) -> Self {
        self.in_doubt = in_doubt;
        self
    }

    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = Some(iteration);
        self
    }

    pub fn with_partition(mut self, partition: u32) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse).with_message(message)
    }

    pub(crate) fn client(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Client).with_message(message)
    }
}

fn default_result_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Timeout => result_code::TIMEOUT,
        ErrorKind::Client => result_code::CLIENT_ERROR,
        ErrorKind::Server => result_code::SERVER_ERROR,
        ErrorKind::Forbidden => result_code::FORBIDDEN,
        ErrorKind::QuotaExceeded => result_code::QUOTA_EXCEEDED,
        ErrorKind::NotAuthenticated => result_code::NOT_AUTHENTICATED,
        ErrorKind::ServerUnavailable => result_code::SERVER_NOT_AVAILABLE,
        ErrorKind::Serialize => result_code::SERIALIZE_ERROR,
        ErrorKind::Parse => result_code::PARSE_ERROR,
        ErrorKind::Cancelled => result_code::CLIENT_ERROR,
        ErrorKind::Result => result_code::SERVER_ERROR,
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        write!(
            f,
            " ({}: {})",
            self.result_code,
            result_code::describe(self.result_code)
        )?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(partition) = self.partition {
            write!(f, " (partition: {partition})")?;
        }
        if let Some(iteration) = self.iteration {
            write!(f, " (iteration: {iteration})")?;
        }
        if self.in_doubt {
            write!(f, " (in doubt)")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Client => 1,
        ErrorKind::Parse => 2,
        ErrorKind::Serialize => 3,
        ErrorKind::Result => 4,
        ErrorKind::Server => 5,
        ErrorKind::Timeout => 6,
        ErrorKind::Forbidden => 7,
        ErrorKind::QuotaExceeded => 8,
        ErrorKind::NotAuthenticated => 9,
        ErrorKind::ServerUnavailable => 10,
        ErrorKind::Cancelled => 11,
    }
}
