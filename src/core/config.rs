//! Purpose: Process-wide client configuration, loaded once and passed into the client.
//! Exports: `ClientConfig`, `Credentials`.
//! Role: Single source for message bounds, queue sizing, and credential refresh timing.
//! Invariants: Every field has a default; partial JSON documents are valid.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::classify::{Classifier, DEFAULT_MAX_MESSAGE_LEN, DEFAULT_SEPARATOR};
use crate::core::error::Error;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub credentials: Option<Credentials>,
    pub max_error_message_len: usize,
    pub error_separator: String,
    pub query_queue_capacity: usize,
    pub token_refresh_fraction: f64,
    pub token_retry_interval_ms: u64,
    pub client_version: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            credentials: None,
            max_error_message_len: DEFAULT_MAX_MESSAGE_LEN,
            error_separator: DEFAULT_SEPARATOR.to_string(),
            query_queue_capacity: 5000,
            token_refresh_fraction: 0.8,
            token_retry_interval_ms: 1000,
            client_version: concat!("kvgate-", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ClientConfig {
    pub fn from_json_str(input: &str) -> Result<Self, Error> {
        let config: Self = serde_json::from_str(input)
            .map_err(|err| Error::client("invalid client config json").with_source(err))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|err| {
            Error::client(format!("failed to read config {}", path.display())).with_source(err)
        })?;
        Self::from_json_str(&input)
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            user: user.into(),
            password: password.into(),
        });
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !(self.token_refresh_fraction > 0.0 && self.token_refresh_fraction < 1.0) {
            return Err(Error::client(format!(
                "token_refresh_fraction must be in (0, 1), got {}",
                self.token_refresh_fraction
            )));
        }
        if self.query_queue_capacity == 0 {
            return Err(Error::client("query_queue_capacity must be positive"));
        }
        if self.max_error_message_len == 0 {
            return Err(Error::client("max_error_message_len must be positive"));
        }
        Ok(())
    }

    pub fn classifier(&self) -> Classifier {
        Classifier::new(self.max_error_message_len, self.error_separator.clone())
    }

    pub fn token_retry_interval(&self) -> Duration {
        Duration::from_millis(self.token_retry_interval_ms)
    }
}
