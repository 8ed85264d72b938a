//! Processing queue queries

use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::types::{JobStatus, ProcessingJob};

/// Claim the oldest claimable job in a single statement. The row lock from
/// `SKIP LOCKED` lasts only until the statement commits; afterwards the
/// refreshed `started_at` keeps other workers away until the lease expires.
pub async fn claim_next(pool: &PgPool, lease_timeout: Duration) -> Result<Option<ProcessingJob>> {
    let job = sqlx::query_as::<_, ProcessingJob>(
        r#"
        UPDATE sellout_process_queue q
        SET status = 'PROCESSING',
            started_at = NOW(),
            attempts = q.attempts + 1
        FROM (
            SELECT id
            FROM sellout_process_queue
            WHERE status IN ('PENDING', 'PROCESSING')
              AND (started_at IS NULL OR started_at < NOW() - make_interval(secs => $1))
            ORDER BY created_at, id
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        ) next
        WHERE q.id = next.id
        RETURNING
            q.id, q.upload_batch_id, q.status, q.attempts, q.error_message,
            q.created_at, q.started_at, q.finished_at
        "#,
    )
    .bind(lease_timeout.as_secs_f64())
    .fetch_optional(pool)
    .await?;

    Ok(job)
}

/// Finish a job; conditioned on the lease token observed at claim time
pub async fn mark_done(pool: &PgPool, job: &ProcessingJob) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE sellout_process_queue
        SET status = $3, finished_at = NOW(), error_message = NULL
        WHERE id = $1 AND status = 'PROCESSING' AND started_at = $2
        "#,
    )
    .bind(job.id)
    .bind(job.started_at)
    .bind(JobStatus::Done)
    .execute(pool)
    .await?;

    let owned = result.rows_affected() == 1;
    if !owned {
        warn!("Job {} lease lost before it could be marked DONE", job.id);
    }
    Ok(owned)
}

pub async fn mark_failed(pool: &PgPool, job: &ProcessingJob, error: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE sellout_process_queue
        SET status = $3, finished_at = NOW(), error_message = $4
        WHERE id = $1 AND status = 'PROCESSING' AND started_at = $2
        "#,
    )
    .bind(job.id)
    .bind(job.started_at)
    .bind(JobStatus::Failed)
    .bind(error)
    .execute(pool)
    .await?;

    let owned = result.rows_affected() == 1;
    if !owned {
        warn!("Job {} lease lost before it could be marked FAILED", job.id);
    }
    Ok(owned)
}

/// Operator retry: FAILED → PENDING with a fresh lease
pub async fn retry_failed(pool: &PgPool, job_id: i64) -> Result<Option<ProcessingJob>> {
    let job = sqlx::query_as::<_, ProcessingJob>(
        r#"
        UPDATE sellout_process_queue
        SET status = 'PENDING',
            started_at = NULL,
            finished_at = NULL,
            error_message = NULL
        WHERE id = $1 AND status = 'FAILED'
        RETURNING
            id, upload_batch_id, status, attempts, error_message,
            created_at, started_at, finished_at
        "#,
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    Ok(job)
}

/// Most recent job for an upload batch
pub async fn find_by_batch(pool: &PgPool, upload_batch_id: Uuid) -> Result<Option<ProcessingJob>> {
    let job = sqlx::query_as::<_, ProcessingJob>(
        r#"
        SELECT
            id, upload_batch_id, status, attempts, error_message,
            created_at, started_at, finished_at
        FROM sellout_process_queue
        WHERE upload_batch_id = $1
        ORDER BY created_at DESC, id DESC
        LIMIT 1
        "#,
    )
    .bind(upload_batch_id)
    .fetch_optional(pool)
    .await?;

    Ok(job)
}
