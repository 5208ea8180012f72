//! Purpose: Query, scan, and background-execution entry points of the proxy client.
//! Exports: `ExecuteTask`, `TaskStatus`.
//! Role: Builds typed query/scan sub-requests and hands streams to the partition producer.
//! Invariants: Each round re-sends the statement with the tracker's outstanding partitions.
#![allow(clippy::result_large_err)]

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::client::{ApiResult, ProxyClient};
use crate::core::cursor::{CallContext, ResponseStream};
use crate::core::envelope::{
    BackgroundExecuteRequest, BackgroundTaskStatus, BackgroundTaskStatusRequest,
    PartitionFilterMessage, ProxyRequest, QueryRequest, ScanRequest,
};
use crate::core::error::{Error, ErrorKind};
use crate::core::policy::{BasePolicy, QueryPolicy, ScanPolicy, WritePolicy};
use crate::core::query::{
    PartitionFilter, PartitionTracker, ProducerSettings, RecordSet, Statement, StreamOpener,
};
use crate::core::transport::CallKind;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskStatus {
    NotFound,
    InProgress,
    Complete,
}

struct PartitionOpener {
    client: ProxyClient,
    kind: CallKind,
    template: ProxyRequest,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

#[async_trait]
impl StreamOpener for PartitionOpener {
    async fn open(
        &self,
        filter: PartitionFilterMessage,
        iteration: u32,
    ) -> Result<ResponseStream, Error> {
        let mut request = self.template.clone();
        request.iteration = iteration;
        if let Some(query) = request.query_request.as_mut() {
            query.partition_filter = Some(filter);
        } else if let Some(scan) = request.scan_request.as_mut() {
            scan.partition_filter = Some(filter);
        }
        let context = CallContext::new(self.deadline, false).with_cancel(Some(self.cancel.clone()));
        self.client.server_stream(self.kind, request, &context).await
    }
}

impl ProxyClient {
    /// Streams every record matching `statement`.
    ///
    /// Must be called inside a Tokio runtime; the producer runs as its own task.
    pub fn query(&self, policy: &QueryPolicy, statement: &Statement) -> ApiResult<RecordSet> {
        self.query_partitions(policy, statement, PartitionFilter::all())
    }

    pub fn query_partitions(
        &self,
        policy: &QueryPolicy,
        statement: &Statement,
        filter: PartitionFilter,
    ) -> ApiResult<RecordSet> {
        let tracker = PartitionTracker::new(&filter, statement.max_records)?;
        let message = statement.to_message(self.inner.framer.as_ref())?;
        let template = ProxyRequest {
            id: self.next_id(),
            query_request: Some(QueryRequest {
                query_policy: Some(policy.message()),
                statement: Some(message),
                partition_filter: None,
            }),
            ..ProxyRequest::default()
        };
        Ok(self.spawn_record_set(
            CallKind::Query,
            template,
            tracker,
            &policy.base,
            policy.record_queue_size,
        ))
    }

    pub fn scan(
        &self,
        policy: &ScanPolicy,
        namespace: &str,
        set_name: &str,
        bins: &[String],
    ) -> ApiResult<RecordSet> {
        self.scan_partitions(policy, namespace, set_name, bins, PartitionFilter::all())
    }

    pub fn scan_partitions(
        &self,
        policy: &ScanPolicy,
        namespace: &str,
        set_name: &str,
        bins: &[String],
        filter: PartitionFilter,
    ) -> ApiResult<RecordSet> {
        let tracker = PartitionTracker::new(&filter, policy.max_records)?;
        let template = ProxyRequest {
            id: self.next_id(),
            scan_request: Some(ScanRequest {
                scan_policy: Some(policy.message()),
                namespace: namespace.to_string(),
                set_name: set_name.to_string(),
                bin_names: bins.to_vec(),
                partition_filter: None,
            }),
            ..ProxyRequest::default()
        };
        Ok(self.spawn_record_set(
            CallKind::Scan,
            template,
            tracker,
            &policy.base,
            policy.record_queue_size,
        ))
    }

    fn spawn_record_set(
        &self,
        kind: CallKind,
        template: ProxyRequest,
        tracker: PartitionTracker,
        base: &BasePolicy,
        queue_size: Option<usize>,
    ) -> RecordSet {
        let deadline = base.deadline(Instant::now());
        let cancel = self
            .cancel
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();
        let settings = ProducerSettings {
            deadline,
            cancel: cancel.clone(),
            classifier: self.inner.classifier.clone(),
            max_retries: base.max_retries,
            sleep_between_retries: base.sleep_between_retries,
            queue_capacity: queue_size.unwrap_or(self.inner.config.query_queue_capacity),
        };
        debug!(request_id = template.id, kind = kind.as_str(), "starting record set");
        let opener = PartitionOpener {
            client: self.clone(),
            kind,
            template,
            deadline,
            cancel,
        };
        RecordSet::spawn(Arc::new(opener), tracker, settings)
    }

    /// Starts `statement` as a server-side background job (UDF or operations).
    pub async fn execute_background(
        &self,
        policy: &WritePolicy,
        statement: &Statement,
    ) -> ApiResult<ExecuteTask> {
        if statement.function_name.is_none() && statement.operations.is_empty() {
            return Err(Error::client("background execution needs a UDF or operations"));
        }
        let mut statement = statement.clone();
        if statement.task_id == 0 {
            statement.task_id = random_task_id()?;
        }
        let message = statement.to_message(self.inner.framer.as_ref())?;
        let request = ProxyRequest {
            id: self.next_id(),
            iteration: 1,
            background_execute_request: Some(BackgroundExecuteRequest {
                write_policy: Some(policy.base.write_message()),
                statement: Some(message),
            }),
            ..ProxyRequest::default()
        };
        let context = CallContext::new(policy.base.deadline(Instant::now()), true)
            .with_cancel(self.cancel.clone());
        let response = self
            .unary(CallKind::BackgroundExecute, request, context)
            .await?;
        if response.status != 0 {
            return Err(self
                .inner
                .classifier
                .classify_envelope(response.status, response.in_doubt, true));
        }
        debug!(task_id = statement.task_id, "background task started");
        Ok(ExecuteTask {
            client: self.clone(),
            task_id: statement.task_id,
            is_scan: statement.is_scan(),
        })
    }
}

/// Handle to a running background job.
#[derive(Clone)]
pub struct ExecuteTask {
    client: ProxyClient,
    task_id: u64,
    is_scan: bool,
}

impl std::fmt::Debug for ExecuteTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteTask")
            .field("task_id", &self.task_id)
            .field("is_scan", &self.is_scan)
            .finish_non_exhaustive()
    }
}

impl ExecuteTask {
    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    pub async fn status(&self) -> ApiResult<TaskStatus> {
        let policy = BasePolicy::default();
        let request = ProxyRequest {
            id: self.client.next_id(),
            iteration: 1,
            background_task_status_request: Some(BackgroundTaskStatusRequest {
                task_id: self.task_id,
                is_scan: self.is_scan,
            }),
            ..ProxyRequest::default()
        };
        let context = CallContext::new(policy.deadline(Instant::now()), false)
            .with_cancel(self.client.cancel.clone());
        let response = self
            .client
            .unary(CallKind::BackgroundTaskStatus, request, context)
            .await?;
        if response.status != 0 {
            return Err(self
                .client
                .inner
                .classifier
                .classify_envelope(response.status, response.in_doubt, false));
        }
        let status = response
            .background_task_status
            .and_then(|value| BackgroundTaskStatus::try_from(value).ok());
        Ok(match status {
            Some(BackgroundTaskStatus::Complete) => TaskStatus::Complete,
            Some(BackgroundTaskStatus::InProgress) => TaskStatus::InProgress,
            Some(BackgroundTaskStatus::NotFound) | None => TaskStatus::NotFound,
        })
    }

    /// Polls `status` until the job completes or `timeout` elapses.
    pub async fn wait_till_complete(
        &self,
        poll_interval: Duration,
        timeout: Option<Duration>,
    ) -> ApiResult<()> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            match self.status().await? {
                TaskStatus::Complete => return Ok(()),
                TaskStatus::NotFound => {
                    return Err(Error::client(format!(
                        "background task {} not found",
                        self.task_id
                    )));
                }
                TaskStatus::InProgress => {}
            }
            if deadline.is_some_and(|deadline| Instant::now() + poll_interval > deadline) {
                return Err(Error::new(ErrorKind::Timeout)
                    .with_message(format!("background task {} still running", self.task_id)));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

fn random_task_id() -> ApiResult<u64> {
    let mut bytes = [0u8; 8];
    getrandom::fill(&mut bytes).map_err(|err| {
        Error::client(format!("failed to generate task id: {err}"))
    })?;
    Ok(u64::from_be_bytes(bytes).max(1))
}
