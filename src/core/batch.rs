//! Purpose: Fan one streamed batch response out into per-key result slots.
//! Exports: `BatchRecord`, `BatchAction`, `BatchStatus`, `BatchPlan`, `BatchError`, `reassemble`, `sweep_in_doubt`.
//! Role: Batch Reassembly Engine; owns slot bookkeeping for the duration of one batch call.
//! Invariants: Every slot starts at `NO_RESPONSE` and is written at most once by row parsing.
//! Invariants: The doubt sweep only touches slots still at `NO_RESPONSE`; reads never become in doubt.
//! Invariants: A row error never aborts collection of the remaining rows.

use std::error::Error as StdError;
use std::fmt;
use tokio_stream::Stream;
use tracing::{debug, trace, warn};

use crate::core::cursor::FrameReader;
use crate::core::decoder::{self, MessageHeader, RecordCursor};
use crate::core::envelope::ProxyResponse;
use crate::core::error::Error;
use crate::core::record::{Key, Operation, Record, Value, has_write};
use crate::core::result_code;

/// What a batch slot asks the server to do.
#[derive(Clone, Debug, PartialEq)]
pub enum BatchAction {
    Read {
        bins: Option<Vec<String>>,
        ops: Vec<Operation>,
        header_only: bool,
    },
    Write {
        ops: Vec<Operation>,
    },
    Delete,
    Udf {
        package: String,
        function: String,
        args: Vec<Value>,
    },
}

/// One caller-owned slot: the request plus its eventual outcome.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchRecord {
    pub key: Key,
    pub action: BatchAction,
    pub record: Option<Record>,
    pub result_code: i32,
    pub in_doubt: bool,
    pub has_write: bool,
}

impl BatchRecord {
    fn with_action(key: Key, action: BatchAction) -> Self {
        let has_write = match &action {
            BatchAction::Read { ops, .. } => has_write(ops),
            BatchAction::Write { .. } | BatchAction::Delete | BatchAction::Udf { .. } => true,
        };
        Self {
            key,
            action,
            record: None,
            result_code: result_code::NO_RESPONSE,
            in_doubt: false,
            has_write,
        }
    }

    pub fn read(key: Key, bins: Option<Vec<String>>) -> Self {
        Self::with_action(
            key,
            BatchAction::Read {
                bins,
                ops: Vec::new(),
                header_only: false,
            },
        )
    }

    pub fn read_header(key: Key) -> Self {
        Self::with_action(
            key,
            BatchAction::Read {
                bins: None,
                ops: Vec::new(),
                header_only: true,
            },
        )
    }

    pub fn read_ops(key: Key, ops: Vec<Operation>) -> Self {
        Self::with_action(
            key,
            BatchAction::Read {
                bins: None,
                ops,
                header_only: false,
            },
        )
    }

    pub fn write(key: Key, ops: Vec<Operation>) -> Self {
        Self::with_action(key, BatchAction::Write { ops })
    }

    pub fn delete(key: Key) -> Self {
        Self::with_action(key, BatchAction::Delete)
    }

    pub fn udf(
        key: Key,
        package: impl Into<String>,
        function: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self::with_action(
            key,
            BatchAction::Udf {
                package: package.into(),
                function: function.into(),
                args,
            },
        )
    }

    /// Clears any previous outcome so the slot can be reused.
    pub fn reset(&mut self) {
        self.record = None;
        self.result_code = result_code::NO_RESPONSE;
        self.in_doubt = false;
    }

    pub fn is_ok(&self) -> bool {
        self.result_code == result_code::OK
    }

    pub fn is_pending(&self) -> bool {
        self.result_code == result_code::NO_RESPONSE
    }

    /// Error described by this slot, if its outcome was not a success.
    ///
    /// A UDF failure keeps the embedded code and message of its `FAILURE` bin.
    pub fn error(&self) -> Option<Error> {
        match self.result_code {
            result_code::OK => None,
            result_code::KEY_NOT_FOUND if !self.has_write => None,
            result_code::UDF_BAD_RESPONSE => Some(
                self.record
                    .as_ref()
                    .and_then(decoder::udf_failure)
                    .unwrap_or_else(|| Error::from_result_code(result_code::UDF_BAD_RESPONSE))
                    .with_in_doubt(self.in_doubt),
            ),
            code => Some(Error::from_result_code(code).with_in_doubt(self.in_doubt)),
        }
    }

    fn set_record(&mut self, record: Record) {
        self.record = Some(record);
        self.result_code = result_code::OK;
    }

    fn set_error(&mut self, code: i32, in_doubt: bool) {
        self.result_code = code;
        self.in_doubt = in_doubt;
    }
}

/// A batch call that failed as a whole, with every slot as it stood at the failure.
///
/// Answered slots stay valid; unanswered ones are swept for doubt.
#[derive(Debug)]
pub struct BatchError {
    pub records: Vec<BatchRecord>,
    pub error: Error,
}

impl BatchError {
    pub fn new(records: Vec<BatchRecord>, error: Error) -> Self {
        Self { records, error }
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let answered = self.records.iter().filter(|slot| !slot.is_pending()).count();
        write!(f, "{} ({answered}/{} rows answered)", self.error, self.records.len())
    }
}

impl StdError for BatchError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.error)
    }
}

impl From<BatchError> for Error {
    fn from(err: BatchError) -> Self {
        err.error
    }
}

/// Aggregate outcome of one batch call.
#[derive(Debug, Default)]
pub struct BatchStatus {
    pub has_row_error: bool,
    pub rows: usize,
}

/// Maps the row index the server echoes back onto caller slot positions.
///
/// The gateway receives the whole batch in one request and splits it per node
/// itself, so rows echo their position in that request and `identity` is the
/// plan every client call uses. `from_offsets` serves callers that encode a
/// reordered or filtered subset of their slots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchPlan {
    offsets: Vec<usize>,
}

impl BatchPlan {
    pub fn identity(len: usize) -> Self {
        Self {
            offsets: (0..len).collect(),
        }
    }

    pub fn from_offsets(offsets: Vec<usize>) -> Self {
        Self { offsets }
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn slot(&self, row_index: u32) -> Result<usize, Error> {
        self.offsets
            .get(row_index as usize)
            .copied()
            .ok_or_else(|| {
                Error::parse(format!(
                    "batch row index {row_index} outside plan of {}",
                    self.offsets.len()
                ))
            })
    }
}

/// Reads every row of one batch stream into `records`.
///
/// Returns `Ok` once the terminal frame has been consumed. Any error leaves the
/// rows parsed so far in place; callers follow up with `sweep_in_doubt`.
pub async fn reassemble<S>(
    reader: &mut FrameReader<S>,
    plan: &BatchPlan,
    records: &mut [BatchRecord],
    status: &mut BatchStatus,
) -> Result<(), Error>
where
    S: Stream<Item = Result<ProxyResponse, tonic::Status>> + Unpin,
{
    while let Some(body) = reader.read_group().await? {
        let mut cursor = RecordCursor::new(body);
        while cursor.remaining() > 0 {
            let header = MessageHeader::parse(&mut cursor)?;
            if header.is_last() {
                if header.result_code != result_code::OK {
                    return Err(Error::from_result_code(header.result_code)
                        .with_message("batch terminated by server"));
                }
                trace!(rows = status.rows, "batch terminator row");
                reader.drain().await?;
                return finish(records, status);
            }
            decoder::skip_key_fields(&mut cursor, header.field_count)?;
            let record = decoder::parse_record(
                &mut cursor,
                header.op_count,
                header.generation,
                header.expiration,
            )?;
            let index = plan.slot(header.batch_index)?;
            let len = records.len();
            let slot = records.get_mut(index).ok_or_else(|| {
                Error::parse(format!("batch slot {index} outside {len} records"))
            })?;
            apply_row(slot, &header, record, status);
        }
    }
    finish(records, status)
}

fn apply_row(slot: &mut BatchRecord, header: &MessageHeader, record: Record, status: &mut BatchStatus) {
    if !slot.is_pending() {
        warn!(
            index = header.batch_index,
            code = header.result_code,
            "duplicate batch row ignored"
        );
        return;
    }
    status.rows += 1;
    let code = header.result_code;
    match code {
        result_code::OK => slot.set_record(record),
        result_code::KEY_NOT_FOUND if !slot.has_write => {
            slot.record = None;
            slot.result_code = code;
        }
        result_code::UDF_BAD_RESPONSE if record.get(decoder::UDF_FAILURE_BIN).is_some() => {
            slot.record = Some(record);
            slot.set_error(code, false);
            status.has_row_error = true;
        }
        code => {
            slot.set_error(code, slot.has_write && code == result_code::TIMEOUT);
            status.has_row_error = true;
        }
    }
}

fn finish(records: &[BatchRecord], status: &mut BatchStatus) -> Result<(), Error> {
    let missing = records.iter().filter(|slot| slot.is_pending()).count();
    if missing > 0 {
        debug!(missing, "batch stream ended with unanswered rows");
        status.has_row_error = true;
    }
    Ok(())
}

/// Marks unanswered slots after an abnormal stream end.
///
/// A slot still at `NO_RESPONSE` is in doubt exactly when it could have written.
pub fn sweep_in_doubt(records: &mut [BatchRecord]) -> usize {
    let mut swept = 0;
    for slot in records.iter_mut().filter(|slot| slot.is_pending()) {
        slot.in_doubt = slot.has_write;
        swept += 1;
    }
    if swept > 0 {
        debug!(swept, "batch in-doubt sweep");
    }
    swept
}
