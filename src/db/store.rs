//! Storage seams for the reconciliation pipeline
//!
//! The engine, worker and upload service only talk to these traits. `PgStore`
//! is the production backend; claims are row locks taken with
//! `FOR UPDATE SKIP LOCKED`, so any number of processes can share one queue.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::queries;
use crate::types::{
    BatchSummary, BranchUploadConfig, Classifier, DateSpan, MappingErrorReason, NewStagedRow,
    ProcessingJob, UploadBatch,
};

/// Result of persisting one upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedUpload {
    /// Prior staged rows removed by replace-by-range
    pub deleted_rows: u64,
    pub job_id: i64,
}

#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Latest upload layout for a branch
    async fn branch_config(&self, branch: &str) -> Result<Option<BranchUploadConfig>>;

    /// Atomically replace the branch's staged rows within `span`, insert the
    /// new batch and enqueue a PENDING job for it. "The branch's rows" are
    /// those of earlier uploads made under `batch.branch`, whatever branch
    /// codes the rows themselves carry.
    async fn stage_upload(
        &self,
        batch: &UploadBatch,
        rows: &[NewStagedRow],
        span: DateSpan,
    ) -> Result<StagedUpload>;

    /// Claim up to `limit` resolvable unmoved rows of a batch, write their
    /// fact rows and mark them moved, in one transaction. Returns the number
    /// of rows moved; zero means no resolvable candidates remain.
    async fn move_resolvable(&self, upload_batch_id: Uuid, limit: i64, actor: &str) -> Result<u64>;

    /// Classify up to `limit` remaining unmoved rows, write one error row
    /// each and mark them moved, in one transaction. Returns the reasons
    /// recorded, in row order.
    async fn drain_unresolved(
        &self,
        upload_batch_id: Uuid,
        limit: i64,
        classify: Classifier,
        actor: &str,
    ) -> Result<Vec<MappingErrorReason>>;

    async fn batch_summary(&self, upload_batch_id: Uuid) -> Result<Option<BatchSummary>>;
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Claim the oldest claimable job and mark it PROCESSING. The returned
    /// job's `started_at` is the lease token for `mark_done`/`mark_failed`.
    async fn claim_next(&self, lease_timeout: Duration) -> Result<Option<ProcessingJob>>;

    /// Returns false when the lease was lost to another worker
    async fn mark_done(&self, job: &ProcessingJob) -> Result<bool>;

    /// Returns false when the lease was lost to another worker
    async fn mark_failed(&self, job: &ProcessingJob, error: &str) -> Result<bool>;

    /// Move a FAILED job back to PENDING. `None` if the job does not exist or
    /// is not FAILED.
    async fn retry_failed(&self, job_id: i64) -> Result<Option<ProcessingJob>>;

    async fn find_by_batch(&self, upload_batch_id: Uuid) -> Result<Option<ProcessingJob>>;
}

/// PostgreSQL implementation of both seams
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StagingStore for PgStore {
    async fn branch_config(&self, branch: &str) -> Result<Option<BranchUploadConfig>> {
        queries::branch_config::latest_for_branch(&self.pool, branch)
            .await?
            .map(BranchUploadConfig::try_from)
            .transpose()
    }

    async fn stage_upload(
        &self,
        batch: &UploadBatch,
        rows: &[NewStagedRow],
        span: DateSpan,
    ) -> Result<StagedUpload> {
        queries::staging::stage_upload(&self.pool, batch, rows, span).await
    }

    async fn move_resolvable(&self, upload_batch_id: Uuid, limit: i64, actor: &str) -> Result<u64> {
        queries::reconcile::move_resolvable_batch(&self.pool, upload_batch_id, limit, actor).await
    }

    async fn drain_unresolved(
        &self,
        upload_batch_id: Uuid,
        limit: i64,
        classify: Classifier,
        actor: &str,
    ) -> Result<Vec<MappingErrorReason>> {
        queries::reconcile::drain_unresolved_batch(&self.pool, upload_batch_id, limit, classify, actor)
            .await
    }

    async fn batch_summary(&self, upload_batch_id: Uuid) -> Result<Option<BatchSummary>> {
        queries::summary::batch_summary(&self.pool, upload_batch_id).await
    }
}

#[async_trait]
impl JobQueue for PgStore {
    async fn claim_next(&self, lease_timeout: Duration) -> Result<Option<ProcessingJob>> {
        queries::jobs::claim_next(&self.pool, lease_timeout).await
    }

    async fn mark_done(&self, job: &ProcessingJob) -> Result<bool> {
        queries::jobs::mark_done(&self.pool, job).await
    }

    async fn mark_failed(&self, job: &ProcessingJob, error: &str) -> Result<bool> {
        queries::jobs::mark_failed(&self.pool, job, error).await
    }

    async fn retry_failed(&self, job_id: i64) -> Result<Option<ProcessingJob>> {
        queries::jobs::retry_failed(&self.pool, job_id).await
    }

    async fn find_by_batch(&self, upload_batch_id: Uuid) -> Result<Option<ProcessingJob>> {
        queries::jobs::find_by_batch(&self.pool, upload_batch_id).await
    }
}
