//! Purpose: The proxy client and its single-record command set.
//! Exports: `ProxyClient`.
//! Role: Encodes commands via the `Framer`, calls the gateway, and decodes one record per reply.
//! Invariants: Every call stamps id, iteration, client version, and (when configured) a bearer token.
//! Invariants: Transport failures always pass through the classifier before reaching callers.
#![allow(clippy::result_large_err)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::Instant;
use tonic::metadata::{Ascii, MetadataValue};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::core::auth::TokenManager;
use crate::core::classify::Classifier;
use crate::core::command::{Command, CommandOutput};
use crate::core::config::ClientConfig;
use crate::core::cursor::{self, CallContext, unary_reader};
use crate::core::decoder::{self, RecordCursor};
use crate::core::envelope::{ProxyRequest, ProxyResponse};
use crate::core::error::{Error, ErrorKind};
use crate::core::policy::{BasePolicy, ReadPolicy, WritePolicy};
use crate::core::record::{Bin, Key, Operation, OperationType, Record, Value};
use crate::core::transport::{CallKind, Framer, ProxyTransport};

pub type ApiResult<T> = Result<T, Error>;

pub const CLIENT_VERSION_HEADER: &str = "x-client-version";

#[derive(Clone)]
pub struct ProxyClient {
    pub(super) inner: Arc<ClientInner>,
    pub(super) cancel: Option<CancellationToken>,
}

pub(super) struct ClientInner {
    pub(super) transport: Arc<dyn ProxyTransport>,
    pub(super) framer: Arc<dyn Framer>,
    pub(super) config: ClientConfig,
    pub(super) classifier: Classifier,
    tokens: Option<TokenManager>,
    next_id: AtomicU32,
}

impl ProxyClient {
    /// Builds a client; with credentials configured, login starts in the background.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(
        transport: Arc<dyn ProxyTransport>,
        framer: Arc<dyn Framer>,
        config: ClientConfig,
    ) -> ApiResult<Self> {
        config.validate()?;
        let tokens = config
            .credentials
            .clone()
            .map(|credentials| TokenManager::spawn(transport.clone(), credentials, &config));
        let classifier = config.classifier();
        Ok(Self {
            inner: Arc::new(ClientInner {
                transport,
                framer,
                config,
                classifier,
                tokens,
                next_id: AtomicU32::new(1),
            }),
            cancel: None,
        })
    }

    /// Handle whose calls abort when `token` is cancelled.
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            inner: self.inner.clone(),
            cancel: Some(token),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn classifier(&self) -> &Classifier {
        &self.inner.classifier
    }

    pub fn tokens(&self) -> Option<&TokenManager> {
        self.inner.tokens.as_ref()
    }

    pub async fn get(
        &self,
        policy: &ReadPolicy,
        key: &Key,
        bins: Option<&[String]>,
    ) -> ApiResult<Option<Record>> {
        let output = self.execute(&Command::Get { policy, key, bins }).await?;
        expect_record(output)
    }

    pub async fn get_header(&self, policy: &ReadPolicy, key: &Key) -> ApiResult<Option<Record>> {
        let output = self.execute(&Command::GetHeader { policy, key }).await?;
        expect_record(output)
    }

    pub async fn exists(&self, policy: &ReadPolicy, key: &Key) -> ApiResult<bool> {
        let output = self.execute(&Command::Exists { policy, key }).await?;
        expect_flag(output)
    }

    pub async fn put(&self, policy: &WritePolicy, key: &Key, bins: &[Bin]) -> ApiResult<()> {
        self.write(policy, key, OperationType::Write, bins).await
    }

    pub async fn add(&self, policy: &WritePolicy, key: &Key, bins: &[Bin]) -> ApiResult<()> {
        self.write(policy, key, OperationType::Add, bins).await
    }

    pub async fn append(&self, policy: &WritePolicy, key: &Key, bins: &[Bin]) -> ApiResult<()> {
        self.write(policy, key, OperationType::Append, bins).await
    }

    pub async fn prepend(&self, policy: &WritePolicy, key: &Key, bins: &[Bin]) -> ApiResult<()> {
        self.write(policy, key, OperationType::Prepend, bins).await
    }

    /// Returns whether the record existed.
    pub async fn delete(&self, policy: &WritePolicy, key: &Key) -> ApiResult<bool> {
        let output = self.execute(&Command::Delete { policy, key }).await?;
        expect_flag(output)
    }

    pub async fn touch(&self, policy: &WritePolicy, key: &Key) -> ApiResult<()> {
        self.execute(&Command::Touch { policy, key }).await.map(|_| ())
    }

    pub async fn operate(
        &self,
        policy: &WritePolicy,
        key: &Key,
        ops: &[Operation],
    ) -> ApiResult<Option<Record>> {
        if ops.is_empty() {
            return Err(Error::client("operate requires at least one operation"));
        }
        let output = self.execute(&Command::Operate { policy, key, ops }).await?;
        expect_record(output)
    }

    /// Runs a record UDF and returns its `SUCCESS` value.
    pub async fn execute_udf(
        &self,
        policy: &WritePolicy,
        key: &Key,
        package: &str,
        function: &str,
        args: &[Value],
    ) -> ApiResult<Option<Value>> {
        let command = Command::Execute {
            policy,
            key,
            package,
            function,
            args,
        };
        match self.execute(&command).await? {
            CommandOutput::UdfResult(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    async fn write(
        &self,
        policy: &WritePolicy,
        key: &Key,
        op_type: OperationType,
        bins: &[Bin],
    ) -> ApiResult<()> {
        let command = Command::Write {
            policy,
            key,
            op_type,
            bins,
        };
        self.execute(&command).await.map(|_| ())
    }

    async fn execute(&self, command: &Command<'_>) -> ApiResult<CommandOutput> {
        let payload = self.inner.framer.encode_command(command)?;
        let policy = command.base_policy();
        let is_write = command.is_write();
        let total = policy.deadline(Instant::now());
        let id = self.next_id();
        let mut iteration = 1;
        let mut sent_unknown = false;
        loop {
            let deadline = policy.attempt_deadline(Instant::now(), total);
            let context = CallContext::new(deadline, is_write).with_cancel(self.cancel.clone());
            let request = self.envelope(id, iteration, &payload, policy, is_write);
            trace!(request_id = id, iteration, kind = command.kind().as_str(), "unary call");
            let err = match self.unary(command.kind(), request, context).await {
                Ok(response) => match self.decode_unary(command, response, is_write).await {
                    Ok(output) => return Ok(output),
                    Err(err) => err,
                },
                Err(err) => err,
            };
            // An earlier write attempt may have landed even if this one never left.
            sent_unknown |= is_write && err.in_doubt();
            if !self.should_retry(&err, policy, total, iteration) {
                let in_doubt = err.in_doubt() || sent_unknown;
                return Err(err.with_in_doubt(in_doubt).with_iteration(iteration));
            }
            debug!(request_id = id, iteration, error = %err, "retrying command");
            if !policy.sleep_between_retries.is_zero() {
                tokio::time::sleep(policy.sleep_between_retries).await;
            }
            iteration += 1;
        }
    }

    async fn decode_unary(
        &self,
        command: &Command<'_>,
        response: ProxyResponse,
        is_write: bool,
    ) -> ApiResult<CommandOutput> {
        let context = CallContext::new(None, is_write);
        let mut reader = unary_reader(response, context, self.inner.classifier.clone());
        let body = reader
            .read_group()
            .await?
            .ok_or_else(|| Error::parse("empty response payload"))?;
        let mut cursor = RecordCursor::new(body);
        let (header, record) = decoder::parse_message(&mut cursor)?;
        command.decode(&header, record)
    }

    pub(super) fn envelope(
        &self,
        id: u32,
        iteration: u32,
        payload: &[u8],
        policy: &BasePolicy,
        is_write: bool,
    ) -> ProxyRequest {
        let mut request = ProxyRequest {
            id,
            iteration,
            payload: payload.to_vec(),
            ..ProxyRequest::default()
        };
        if is_write {
            request.write_policy = Some(policy.write_message());
        } else {
            request.read_policy = Some(policy.read_message());
        }
        request
    }

    /// One unary round trip under the attempt's deadline and cancellation.
    pub(super) async fn unary(
        &self,
        kind: CallKind,
        message: ProxyRequest,
        context: CallContext,
    ) -> ApiResult<ProxyResponse> {
        let classifier = &self.inner.classifier;
        let request = self.request(message, &context).await?;
        let call = self.inner.transport.unary(kind, request);
        let response = cursor::bounded(&context, classifier, call).await?;
        response.map_err(|status| self.on_status(&status, context.is_write))
    }

    /// Opens a server stream; frame-level limits are applied by the reader.
    pub(super) async fn server_stream(
        &self,
        kind: CallKind,
        message: ProxyRequest,
        context: &CallContext,
    ) -> ApiResult<cursor::ResponseStream> {
        let classifier = &self.inner.classifier;
        let request = self.request(message, context).await?;
        let call = self.inner.transport.server_stream(kind, request);
        let stream = cursor::bounded(context, classifier, call).await?;
        stream.map_err(|status| self.on_status(&status, context.is_write))
    }

    /// Wraps `message` with call metadata and, when configured, a bearer token.
    pub(super) async fn request<T>(
        &self,
        message: T,
        context: &CallContext,
    ) -> ApiResult<tonic::Request<T>> {
        let mut request = tonic::Request::new(message);
        if let Some(deadline) = context.deadline {
            request.set_timeout(deadline.saturating_duration_since(Instant::now()));
        }
        let version: MetadataValue<Ascii> = self
            .inner
            .config
            .client_version
            .parse()
            .map_err(|err| Error::client("client version is not a valid header").with_source(err))?;
        request.metadata_mut().insert(CLIENT_VERSION_HEADER, version);
        if let Some(tokens) = &self.inner.tokens {
            let token = cursor::bounded(context, &self.inner.classifier, tokens.token(context.deadline))
                .await??;
            let value: MetadataValue<Ascii> = token
                .header_value()
                .parse()
                .map_err(|err| Error::client("access token is not a valid header").with_source(err))?;
            request.metadata_mut().insert("authorization", value);
        }
        Ok(request)
    }

    fn on_status(&self, status: &tonic::Status, is_write: bool) -> Error {
        let err = self.inner.classifier.classify_status(status, is_write);
        if err.kind() == ErrorKind::NotAuthenticated {
            if let Some(tokens) = &self.inner.tokens {
                debug!("gateway rejected credentials, forcing token refresh");
                tokens.force_refresh();
            }
        }
        err
    }

    fn should_retry(
        &self,
        err: &Error,
        policy: &BasePolicy,
        total: Option<Instant>,
        iteration: u32,
    ) -> bool {
        if iteration > policy.max_retries {
            return false;
        }
        match err.kind() {
            ErrorKind::Timeout => total.is_none_or(|total| Instant::now() < total),
            ErrorKind::ServerUnavailable => true,
            _ => false,
        }
    }

    pub(super) fn next_id(&self) -> u32 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

fn expect_record(output: CommandOutput) -> ApiResult<Option<Record>> {
    match output {
        CommandOutput::Record(record) => Ok(record),
        other => Err(unexpected(other)),
    }
}

fn expect_flag(output: CommandOutput) -> ApiResult<bool> {
    match output {
        CommandOutput::Flag(flag) => Ok(flag),
        other => Err(unexpected(other)),
    }
}

fn unexpected(output: CommandOutput) -> Error {
    Error::client(format!("unexpected command output {output:?}"))
}
