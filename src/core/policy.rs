//! Purpose: Per-call policies (timeouts, retries, result-code handling) and their envelope forms.
//! Exports: `BasePolicy`, `ReadPolicy`, `WritePolicy`, `BatchPolicy`, `QueryPolicy`, `ScanPolicy`.
//! Role: Immutable inputs to every command; converted to proxy policy messages on the wire.
//! Invariants: A zero duration means "unbounded" for `total_timeout` and `socket_timeout`.

use std::time::Duration;
use tokio::time::Instant;

use crate::core::envelope::{
    QueryPolicyMessage, ReadModeAp, ReadModeSc, ReadPolicyMessage, Replica, ScanPolicyMessage,
    WritePolicyMessage,
};

#[derive(Clone, Debug, PartialEq)]
pub struct BasePolicy {
    pub total_timeout: Duration,
    pub socket_timeout: Duration,
    pub max_retries: u32,
    pub sleep_between_retries: Duration,
    pub replica: Replica,
    pub read_mode_ap: ReadModeAp,
    pub read_mode_sc: ReadModeSc,
    pub fail_on_filtered_out: bool,
}

impl Default for BasePolicy {
    fn default() -> Self {
        Self {
            total_timeout: Duration::from_millis(1000),
            socket_timeout: Duration::from_secs(30),
            max_retries: 2,
            sleep_between_retries: Duration::ZERO,
            replica: Replica::Sequence,
            read_mode_ap: ReadModeAp::One,
            read_mode_sc: ReadModeSc::Session,
            fail_on_filtered_out: false,
        }
    }
}

impl BasePolicy {
    /// Absolute deadline for the whole call, if bounded.
    pub fn deadline(&self, start: Instant) -> Option<Instant> {
        (!self.total_timeout.is_zero()).then(|| start + self.total_timeout)
    }

    /// Deadline for one attempt: the socket timeout capped by the call deadline.
    pub fn attempt_deadline(&self, now: Instant, total: Option<Instant>) -> Option<Instant> {
        let socket = (!self.socket_timeout.is_zero()).then(|| now + self.socket_timeout);
        match (socket, total) {
            (Some(socket), Some(total)) => Some(socket.min(total)),
            (socket, total) => socket.or(total),
        }
    }

    pub fn read_message(&self) -> ReadPolicyMessage {
        ReadPolicyMessage {
            replica: self.replica as i32,
            read_mode_ap: self.read_mode_ap as i32,
            read_mode_sc: self.read_mode_sc as i32,
        }
    }

    pub fn write_message(&self) -> WritePolicyMessage {
        WritePolicyMessage {
            replica: self.replica as i32,
            read_mode_ap: self.read_mode_ap as i32,
            read_mode_sc: self.read_mode_sc as i32,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReadPolicy {
    pub base: BasePolicy,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WritePolicy {
    pub base: BasePolicy,
    /// Expected generation when non-zero.
    pub generation: u32,
    /// Record ttl in seconds; 0 uses the namespace default.
    pub expiration: u32,
    pub durable_delete: bool,
    pub send_key: bool,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            base: BasePolicy {
                max_retries: 0,
                ..BasePolicy::default()
            },
            generation: 0,
            expiration: 0,
            durable_delete: false,
            send_key: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BatchPolicy {
    pub base: BasePolicy,
    pub allow_inline: bool,
    /// Keep processing the remaining keys after a row error.
    pub respond_all_keys: bool,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            base: BasePolicy::default(),
            allow_inline: true,
            respond_all_keys: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryPolicy {
    pub base: BasePolicy,
    pub include_bin_data: bool,
    /// Overrides the client's queue capacity when set.
    pub record_queue_size: Option<usize>,
    pub short_query: bool,
}

impl Default for QueryPolicy {
    fn default() -> Self {
        Self {
            base: BasePolicy {
                total_timeout: Duration::ZERO,
                max_retries: 5,
                ..BasePolicy::default()
            },
            include_bin_data: true,
            record_queue_size: None,
            short_query: false,
        }
    }
}

impl QueryPolicy {
    pub fn message(&self) -> QueryPolicyMessage {
        QueryPolicyMessage {
            replica: self.base.replica as i32,
            read_mode_ap: self.base.read_mode_ap as i32,
            read_mode_sc: self.base.read_mode_sc as i32,
            total_timeout_ms: millis(self.base.total_timeout),
            include_bin_data: self.include_bin_data,
            record_queue_size: self.record_queue_size.unwrap_or_default() as u32,
            short_query: self.short_query,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScanPolicy {
    pub base: BasePolicy,
    pub include_bin_data: bool,
    pub records_per_second: u32,
    pub max_records: u64,
    pub record_queue_size: Option<usize>,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            base: BasePolicy {
                total_timeout: Duration::ZERO,
                max_retries: 5,
                ..BasePolicy::default()
            },
            include_bin_data: true,
            records_per_second: 0,
            max_records: 0,
            record_queue_size: None,
        }
    }
}

impl ScanPolicy {
    pub fn message(&self) -> ScanPolicyMessage {
        ScanPolicyMessage {
            replica: self.base.replica as i32,
            read_mode_ap: self.base.read_mode_ap as i32,
            read_mode_sc: self.base.read_mode_sc as i32,
            total_timeout_ms: millis(self.base.total_timeout),
            include_bin_data: self.include_bin_data,
            records_per_second: self.records_per_second,
            max_records: self.max_records,
        }
    }
}

fn millis(duration: Duration) -> u32 {
    duration.as_millis().min(u32::MAX as u128) as u32
}

#[cfg(test)]
mod tests {
    use super::{BasePolicy, QueryPolicy, WritePolicy};
    use std::time::Duration;
    use tokio::time::Instant;

    #[test]
    fn zero_total_timeout_is_unbounded() {
        let policy = BasePolicy {
            total_timeout: Duration::ZERO,
            ..BasePolicy::default()
        };
        assert!(policy.deadline(Instant::now()).is_none());
    }

    #[test]
    fn attempt_deadline_is_capped_by_total() {
        let now = Instant::now();
        let policy = BasePolicy {
            total_timeout: Duration::from_millis(50),
            socket_timeout: Duration::from_millis(500),
            ..BasePolicy::default()
        };
        let total = policy.deadline(now);
        assert_eq!(policy.attempt_deadline(now, total), total);

        let policy = BasePolicy {
            total_timeout: Duration::from_millis(500),
            socket_timeout: Duration::from_millis(50),
            ..BasePolicy::default()
        };
        let total = policy.deadline(now);
        assert_eq!(
            policy.attempt_deadline(now, total),
            Some(now + Duration::from_millis(50))
        );
    }

    #[test]
    fn defaults_follow_command_kind() {
        assert_eq!(WritePolicy::default().base.max_retries, 0);
        assert_eq!(QueryPolicy::default().base.max_retries, 5);
        assert_eq!(QueryPolicy::default().message().total_timeout_ms, 0);
    }
}
