//! Purpose: Streaming query/scan executors with per-partition progress tracking.
//! Exports: `Statement`, `Filter`, `PartitionFilter`, `PartitionTracker`, `RecordSet`, `StreamOpener`.
//! Role: One producer task per record set feeds a bounded queue the caller drains.
//! Invariants: Partition-done rows update the tracker and are never delivered as data.
//! Invariants: A set ends with exactly one terminal item (`End` or `Failed`).
//! Invariants: Rows for a partition are resumed after its last delivered digest on retry.

use async_trait::async_trait;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::classify::Classifier;
use crate::core::cursor::{CallContext, FrameReader, ResponseStream};
use crate::core::decoder::{self, MessageHeader, RecordCursor};
use crate::core::envelope::{
    FilterMessage, OperationMessage, PartitionFilterMessage, PartitionStatusMessage,
    StatementMessage,
};
use crate::core::error::{Error, ErrorKind};
use crate::core::record::{DIGEST_LEN, KeyRecord, Operation, OperationType, ParticleType, Value};
use crate::core::result_code;
use crate::core::transport::Framer;

pub const PARTITIONS: u32 = 4096;

/// Partition owning a key digest.
pub fn partition_id(digest: &[u8; DIGEST_LEN]) -> u32 {
    u16::from_le_bytes([digest[0], digest[1]]) as u32 & (PARTITIONS - 1)
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum IndexCollection {
    #[default]
    Default,
    List,
    MapKeys,
    MapValues,
}

/// Secondary-index predicate.
#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
    pub bin_name: String,
    pub collection: IndexCollection,
    pub particle: ParticleType,
    pub begin: Value,
    pub end: Value,
}

impl Filter {
    pub fn equal(bin_name: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        Self {
            bin_name: bin_name.into(),
            collection: IndexCollection::Default,
            particle: particle_of(&value),
            begin: value.clone(),
            end: value,
        }
    }

    pub fn range(bin_name: impl Into<String>, begin: i64, end: i64) -> Self {
        Self {
            bin_name: bin_name.into(),
            collection: IndexCollection::Default,
            particle: ParticleType::Integer,
            begin: Value::Int(begin),
            end: Value::Int(end),
        }
    }

    pub fn contains(
        bin_name: impl Into<String>,
        collection: IndexCollection,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            collection,
            ..Self::equal(bin_name, value)
        }
    }

    fn to_message(&self, framer: &dyn Framer) -> Result<FilterMessage, Error> {
        Ok(FilterMessage {
            name: self.bin_name.clone(),
            index_type: self.collection as i32,
            value_type: self.particle.as_u8() as i32,
            begin: framer.pack_value(&self.begin)?,
            end: framer.pack_value(&self.end)?,
        })
    }
}

fn particle_of(value: &Value) -> ParticleType {
    match value {
        Value::Int(_) => ParticleType::Integer,
        Value::GeoJson(_) => ParticleType::GeoJson,
        Value::Blob(_) => ParticleType::Blob,
        _ => ParticleType::String,
    }
}

/// Query or scan definition.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Statement {
    pub namespace: String,
    pub set_name: String,
    pub index_name: Option<String>,
    pub bin_names: Vec<String>,
    pub filter: Option<Filter>,
    pub package_name: Option<String>,
    pub function_name: Option<String>,
    pub function_args: Vec<Value>,
    pub operations: Vec<Operation>,
    pub task_id: u64,
    pub max_records: u64,
    pub records_per_second: u32,
}

impl Statement {
    pub fn new(namespace: impl Into<String>, set_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            set_name: set_name.into(),
            ..Self::default()
        }
    }

    pub fn with_bins<I, S>(mut self, bins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bin_names = bins.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_max_records(mut self, max_records: u64) -> Self {
        self.max_records = max_records;
        self
    }

    pub fn with_udf(
        mut self,
        package: impl Into<String>,
        function: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        self.package_name = Some(package.into());
        self.function_name = Some(function.into());
        self.function_args = args;
        self
    }

    pub fn with_operations(mut self, operations: Vec<Operation>) -> Self {
        self.operations = operations;
        self
    }

    /// A statement without a filter runs as a scan on the server.
    pub fn is_scan(&self) -> bool {
        self.filter.is_none()
    }

    pub fn to_message(&self, framer: &dyn Framer) -> Result<StatementMessage, Error> {
        let filter = self
            .filter
            .as_ref()
            .map(|filter| filter.to_message(framer))
            .transpose()?;
        let function_args = self
            .function_args
            .iter()
            .map(|arg| framer.pack_value(arg))
            .collect::<Result<Vec<_>, _>>()?;
        let operations = self
            .operations
            .iter()
            .map(|op| {
                Ok(OperationMessage {
                    op_type: op_code(op.op_type),
                    bin_name: op.bin_name.clone(),
                    value: framer.pack_value(&op.value)?,
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(StatementMessage {
            namespace: self.namespace.clone(),
            set_name: self.set_name.clone(),
            index_name: self.index_name.clone(),
            bin_names: self.bin_names.clone(),
            filter,
            package_name: self.package_name.clone(),
            function_name: self.function_name.clone(),
            function_args,
            operations,
            task_id: self.task_id,
            max_records: self.max_records,
            records_per_second: self.records_per_second,
        })
    }
}

fn op_code(op_type: OperationType) -> i32 {
    match op_type {
        OperationType::Read | OperationType::ReadHeader => 1,
        OperationType::Write => 2,
        OperationType::CdtRead => 3,
        OperationType::CdtModify => 4,
        OperationType::Add => 5,
        OperationType::Append => 9,
        OperationType::Prepend => 10,
        OperationType::Touch => 11,
        OperationType::Delete => 14,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionStatus {
    pub id: u32,
    pub digest: Option<[u8; DIGEST_LEN]>,
    pub retry: bool,
    pub done: bool,
}

impl PartitionStatus {
    fn new(id: u32) -> Self {
        Self {
            id,
            digest: None,
            retry: true,
            done: false,
        }
    }
}

/// Which partitions a query/scan covers, and where to resume inside them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionFilter {
    pub begin: u32,
    pub count: u32,
    pub digest: Option<[u8; DIGEST_LEN]>,
    pub partitions: Option<Vec<PartitionStatus>>,
}

impl PartitionFilter {
    pub fn all() -> Self {
        Self::range(0, PARTITIONS)
    }

    pub fn id(id: u32) -> Self {
        Self::range(id, 1)
    }

    pub fn range(begin: u32, count: u32) -> Self {
        Self {
            begin,
            count,
            digest: None,
            partitions: None,
        }
    }

    /// The partition holding `digest`, resuming after that digest.
    pub fn after_digest(digest: [u8; DIGEST_LEN]) -> Self {
        Self {
            begin: partition_id(&digest),
            count: 1,
            digest: Some(digest),
            partitions: None,
        }
    }

    /// True once every covered partition has been fully read.
    pub fn is_done(&self) -> bool {
        self.partitions
            .as_ref()
            .is_some_and(|parts| parts.iter().all(|part| part.done))
    }

    fn validate(&self) -> Result<(), Error> {
        let end = self.begin.checked_add(self.count);
        if self.count == 0 || self.begin >= PARTITIONS || end.is_none_or(|end| end > PARTITIONS) {
            return Err(Error::client(format!(
                "invalid partition range {}+{}",
                self.begin, self.count
            )));
        }
        Ok(())
    }
}

/// Per-partition progress for one record set across retry rounds.
#[derive(Clone, Debug)]
pub struct PartitionTracker {
    parts: Vec<PartitionStatus>,
    max_records: u64,
    record_count: u64,
    iteration: u32,
}

impl PartitionTracker {
    pub fn new(filter: &PartitionFilter, max_records: u64) -> Result<Self, Error> {
        filter.validate()?;
        let parts = match &filter.partitions {
            Some(parts) => parts.clone(),
            None => {
                let mut parts: Vec<_> = (filter.begin..filter.begin + filter.count)
                    .map(PartitionStatus::new)
                    .collect();
                if let (Some(digest), Some(first)) = (filter.digest, parts.first_mut()) {
                    first.digest = Some(digest);
                }
                parts
            }
        };
        Ok(Self {
            parts,
            max_records,
            record_count: 0,
            iteration: 0,
        })
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Starts a round and returns the filter covering what is still outstanding.
    pub fn start_round(&mut self) -> PartitionFilterMessage {
        self.iteration += 1;
        let retry = self.iteration > 1;
        let mut statuses = Vec::new();
        for part in self.parts.iter_mut().filter(|part| !part.done) {
            part.retry = false;
            statuses.push(PartitionStatusMessage {
                id: part.id,
                bval: None,
                digest: part.digest.map(|digest| digest.to_vec()),
                retry,
            });
        }
        PartitionFilterMessage {
            begin: statuses.first().map(|status| status.id).unwrap_or_default(),
            count: statuses.len() as u32,
            digest: None,
            partition_statuses: statuses,
            retry,
        }
    }

    /// Records a delivered row; returns false once `max_records` is reached.
    pub fn record_delivered(&mut self, digest: Option<[u8; DIGEST_LEN]>) -> bool {
        if let Some(digest) = digest {
            let id = partition_id(&digest);
            if let Some(part) = self.part_mut(id) {
                part.digest = Some(digest);
            }
        }
        self.record_count += 1;
        self.max_records == 0 || self.record_count < self.max_records
    }

    /// Applies a partition-done marker; a non-zero code asks for a retry.
    pub fn partition_done(&mut self, id: u32, code: i32) {
        if let Some(part) = self.part_mut(id) {
            if code != result_code::OK {
                debug!(partition = id, code, "partition unavailable");
                part.retry = true;
            }
        }
    }

    /// Marks every partition of a failed round for retry.
    pub fn fail_round(&mut self) {
        for part in self.parts.iter_mut().filter(|part| !part.done) {
            part.retry = true;
        }
    }

    /// Closes a round that reached its terminal row.
    pub fn finish_round(&mut self) {
        for part in self.parts.iter_mut().filter(|part| !part.done && !part.retry) {
            part.done = true;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.parts.iter().all(|part| part.done) || self.max_records_reached()
    }

    pub fn max_records_reached(&self) -> bool {
        self.max_records > 0 && self.record_count >= self.max_records
    }

    pub fn outstanding(&self) -> usize {
        self.parts.iter().filter(|part| !part.done).count()
    }

    /// Filter that resumes this set where it stopped.
    pub fn resume_filter(&self) -> PartitionFilter {
        PartitionFilter {
            begin: self.parts.first().map(|part| part.id).unwrap_or_default(),
            count: self.parts.len() as u32,
            digest: None,
            partitions: Some(self.parts.clone()),
        }
    }

    fn part_mut(&mut self, id: u32) -> Option<&mut PartitionStatus> {
        let first = self.parts.first()?.id;
        let index = id.checked_sub(first)? as usize;
        if self.parts.get(index).is_some_and(|part| part.id == id) {
            return self.parts.get_mut(index);
        }
        self.parts.iter_mut().find(|part| part.id == id)
    }
}

/// Opens one round of a partitioned stream.
#[async_trait]
pub trait StreamOpener: Send + Sync {
    async fn open(
        &self,
        filter: PartitionFilterMessage,
        iteration: u32,
    ) -> Result<ResponseStream, Error>;
}

#[derive(Debug)]
pub enum QueueItem {
    Row(KeyRecord),
    End(PartitionFilter),
    Failed(Error),
}

#[derive(Clone, Debug)]
pub struct ProducerSettings {
    pub deadline: Option<Instant>,
    pub cancel: CancellationToken,
    pub classifier: Classifier,
    pub max_retries: u32,
    pub sleep_between_retries: Duration,
    pub queue_capacity: usize,
}

/// Caller side of a query/scan: a lazily drained record stream.
pub struct RecordSet {
    rx: mpsc::Receiver<QueueItem>,
    cancel: CancellationToken,
    resume: Option<PartitionFilter>,
    finished: bool,
}

impl RecordSet {
    /// Spawns the producer for `tracker` and returns the consumer half.
    pub fn spawn(
        opener: Arc<dyn StreamOpener>,
        tracker: PartitionTracker,
        settings: ProducerSettings,
    ) -> Self {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let cancel = settings.cancel.clone();
        tokio::spawn(produce(opener, tracker, settings, tx));
        Self {
            rx,
            cancel,
            resume: None,
            finished: false,
        }
    }

    /// Next row, `None` after a graceful end.
    pub async fn next_record(&mut self) -> Option<Result<KeyRecord, Error>> {
        if self.finished {
            return None;
        }
        let item = self.rx.recv().await;
        self.accept(item)
    }

    /// Resumption filter; available once the set has ended gracefully.
    pub fn partition_filter(&self) -> Option<&PartitionFilter> {
        self.resume.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Stops the producer; rows already queued are discarded.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.rx.close();
        self.finished = true;
    }

    fn accept(&mut self, item: Option<QueueItem>) -> Option<Result<KeyRecord, Error>> {
        match item {
            Some(QueueItem::Row(row)) => Some(Ok(row)),
            Some(QueueItem::End(filter)) => {
                self.resume = Some(filter);
                self.finished = true;
                None
            }
            Some(QueueItem::Failed(err)) => {
                self.finished = true;
                Some(Err(err))
            }
            None => {
                self.finished = true;
                Some(Err(Error::new(ErrorKind::Client)
                    .with_result_code(result_code::QUERY_TERMINATED)
                    .with_message("record producer stopped without a terminal item")))
            }
        }
    }
}

impl Stream for RecordSet {
    type Item = Result<KeyRecord, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(item) => Poll::Ready(self.accept(item)),
        }
    }
}

impl Drop for RecordSet {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum RoundEnd {
    Finished,
    MaxRecords,
    ConsumerGone,
}

async fn produce(
    opener: Arc<dyn StreamOpener>,
    mut tracker: PartitionTracker,
    settings: ProducerSettings,
    tx: mpsc::Sender<QueueItem>,
) {
    let item = match drive(opener.as_ref(), &mut tracker, &settings, &tx).await {
        Ok(Some(filter)) => QueueItem::End(filter),
        Ok(None) => return,
        Err(err) => QueueItem::Failed(err),
    };
    let _ = tx.send(item).await;
}

async fn drive(
    opener: &dyn StreamOpener,
    tracker: &mut PartitionTracker,
    settings: &ProducerSettings,
    tx: &mpsc::Sender<QueueItem>,
) -> Result<Option<PartitionFilter>, Error> {
    loop {
        let filter = tracker.start_round();
        let iteration = tracker.iteration();
        debug!(iteration, partitions = filter.count, "partition round");
        let context = CallContext::new(settings.deadline, false).with_cancel(Some(settings.cancel.clone()));
        context.check_cancelled(&settings.classifier)?;

        let round = match opener.open(filter, iteration).await {
            Ok(stream) => {
                let mut reader = FrameReader::new(stream, context, settings.classifier.clone());
                read_round(&mut reader, tracker, tx).await
            }
            Err(err) => Err(err),
        };
        match round {
            Ok(RoundEnd::ConsumerGone) => return Ok(None),
            Ok(RoundEnd::MaxRecords) => return Ok(Some(tracker.resume_filter())),
            Ok(RoundEnd::Finished) => tracker.finish_round(),
            Err(err) if is_retryable(&err) => {
                warn!(iteration, error = %err, "partition round failed, retrying");
                tracker.fail_round();
            }
            Err(err) => return Err(err.with_iteration(iteration)),
        }

        if tracker.is_complete() {
            return Ok(Some(tracker.resume_filter()));
        }
        if iteration > settings.max_retries {
            return Err(Error::from_result_code(result_code::MAX_RETRIES_EXCEEDED)
                .with_message(format!(
                    "{} partitions incomplete after {iteration} attempts",
                    tracker.outstanding()
                ))
                .with_iteration(iteration));
        }
        if !settings.sleep_between_retries.is_zero() {
            tokio::time::sleep(settings.sleep_between_retries).await;
        }
    }
}

fn is_retryable(err: &Error) -> bool {
    matches!(err.kind(), ErrorKind::ServerUnavailable)
        || err.result_code() == result_code::PARTITION_UNAVAILABLE
}

async fn read_round(
    reader: &mut FrameReader<ResponseStream>,
    tracker: &mut PartitionTracker,
    tx: &mpsc::Sender<QueueItem>,
) -> Result<RoundEnd, Error> {
    while let Some(body) = reader.read_group().await? {
        let mut cursor = RecordCursor::new(body);
        while cursor.remaining() > 0 {
            let header = MessageHeader::parse(&mut cursor)?;
            if header.is_last() {
                if header.result_code != result_code::OK {
                    return Err(Error::from_result_code(header.result_code));
                }
                return Ok(RoundEnd::Finished);
            }
            if header.is_partition_done() {
                decoder::skip_key_fields(&mut cursor, header.field_count)?;
                decoder::parse_record(&mut cursor, header.op_count, 0, 0)?;
                tracker.partition_done(header.generation, header.result_code);
                continue;
            }
            if header.result_code != result_code::OK {
                return Err(Error::from_result_code(header.result_code));
            }
            let key = decoder::parse_key(&mut cursor, header.field_count)?;
            let record = decoder::parse_record(
                &mut cursor,
                header.op_count,
                header.generation,
                header.expiration,
            )?;
            let more = tracker.record_delivered(key.digest);
            let row = KeyRecord {
                key: key.into_key(),
                record,
            };
            if tx.send(QueueItem::Row(row)).await.is_err() {
                return Ok(RoundEnd::ConsumerGone);
            }
            if !more {
                return Ok(RoundEnd::MaxRecords);
            }
        }
    }
    Ok(RoundEnd::Finished)
}
