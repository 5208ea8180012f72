// Batch calls over caller-owned slots, plus per-verb convenience wrappers.
#![allow(clippy::result_large_err)]

use tokio::time::Instant;
use tracing::{debug, warn};

use super::client::{ApiResult, ProxyClient};
use crate::core::batch::{self, BatchError, BatchPlan, BatchRecord, BatchStatus};
use crate::core::cursor::{CallContext, FrameReader};
use crate::core::policy::BatchPolicy;
use crate::core::record::{Key, Record, Value};
use crate::core::transport::CallKind;

impl ProxyClient {
    /// Runs every slot in `records` as one streamed batch.
    ///
    /// Returns `Ok(true)` when every row succeeded (read misses count as
    /// success). Slots keep whatever rows arrived even when `Err` is returned,
    /// and unanswered slots carry `in_doubt` when they could have written.
    pub async fn batch_operate(
        &self,
        policy: &BatchPolicy,
        records: &mut [BatchRecord],
    ) -> ApiResult<bool> {
        records.iter_mut().for_each(BatchRecord::reset);
        if records.is_empty() {
            return Ok(true);
        }
        let plan = BatchPlan::identity(records.len());
        let is_write = records.iter().any(|slot| slot.has_write);
        let mut status = BatchStatus::default();
        match self.run_batch(policy, &plan, records, &mut status, is_write).await {
            Ok(()) => {
                debug!(rows = status.rows, has_row_error = status.has_row_error, "batch complete");
                Ok(!status.has_row_error)
            }
            Err(err) => {
                warn!(rows = status.rows, error = %err, "batch stream failed");
                batch::sweep_in_doubt(records);
                Err(err)
            }
        }
    }

    async fn run_batch(
        &self,
        policy: &BatchPolicy,
        plan: &BatchPlan,
        records: &mut [BatchRecord],
        status: &mut BatchStatus,
        is_write: bool,
    ) -> ApiResult<()> {
        let payload = self.inner.framer.encode_batch(policy, records)?;
        let deadline = policy.base.deadline(Instant::now());
        let context = CallContext::new(deadline, is_write).with_cancel(self.cancel.clone());
        let request = self.envelope(self.next_id(), 1, &payload, &policy.base, is_write);
        let stream = self
            .server_stream(CallKind::BatchOperate, request, &context)
            .await?;
        let mut reader = FrameReader::new(stream, context, self.inner.classifier.clone());
        batch::reassemble(&mut reader, plan, records, status).await
    }

    /// Reads many keys; each key gets its own outcome and misses are `None`.
    ///
    /// A row error stays with its key. A failed stream returns every slot in
    /// the `BatchError`, including the rows answered before the failure.
    pub async fn get_many(
        &self,
        policy: &BatchPolicy,
        keys: &[Key],
        bins: Option<&[String]>,
    ) -> Result<Vec<ApiResult<Option<Record>>>, BatchError> {
        let bins = bins.map(<[String]>::to_vec);
        let records = keys
            .iter()
            .map(|key| BatchRecord::read(key.clone(), bins.clone()))
            .collect();
        let records = self.run_slots(policy, records).await?;
        Ok(records.into_iter().map(slot_record).collect())
    }

    pub async fn get_headers_many(
        &self,
        policy: &BatchPolicy,
        keys: &[Key],
    ) -> Result<Vec<ApiResult<Option<Record>>>, BatchError> {
        let records = keys
            .iter()
            .map(|key| BatchRecord::read_header(key.clone()))
            .collect();
        let records = self.run_slots(policy, records).await?;
        Ok(records.into_iter().map(slot_record).collect())
    }

    pub async fn exists_many(
        &self,
        policy: &BatchPolicy,
        keys: &[Key],
    ) -> Result<Vec<ApiResult<bool>>, BatchError> {
        let headers = self.get_headers_many(policy, keys).await?;
        Ok(headers
            .into_iter()
            .map(|header| header.map(|record| record.is_some()))
            .collect())
    }

    /// Deletes many keys; per-key outcomes stay in the returned slots.
    pub async fn delete_many(
        &self,
        policy: &BatchPolicy,
        keys: &[Key],
    ) -> Result<Vec<BatchRecord>, BatchError> {
        let records = keys.iter().cloned().map(BatchRecord::delete).collect();
        self.run_slots(policy, records).await
    }

    /// Applies one UDF to many keys; per-key outcomes stay in the returned slots.
    pub async fn apply_udf_many(
        &self,
        policy: &BatchPolicy,
        keys: &[Key],
        package: &str,
        function: &str,
        args: &[Value],
    ) -> Result<Vec<BatchRecord>, BatchError> {
        let records = keys
            .iter()
            .map(|key| BatchRecord::udf(key.clone(), package, function, args.to_vec()))
            .collect();
        self.run_slots(policy, records).await
    }

    async fn run_slots(
        &self,
        policy: &BatchPolicy,
        mut records: Vec<BatchRecord>,
    ) -> Result<Vec<BatchRecord>, BatchError> {
        match self.batch_operate(policy, &mut records).await {
            Ok(_) => Ok(records),
            Err(err) => Err(BatchError::new(records, err)),
        }
    }
}

/// Record of one answered slot; misses are `None`, hard row errors stay per key.
fn slot_record(slot: BatchRecord) -> ApiResult<Option<Record>> {
    match slot.error() {
        Some(err) => Err(err),
        None => Ok(slot.record),
    }
}
