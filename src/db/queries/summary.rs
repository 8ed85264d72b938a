//! Batch summary queries (read side of the fact/error stores)

use anyhow::Result;
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use super::jobs;
use crate::types::{BatchSummary, MappingErrorReason, ReasonCount};

pub async fn batch_summary(pool: &PgPool, upload_batch_id: Uuid) -> Result<Option<BatchSummary>> {
    let (known, staged_rows, pending_rows, fact_rows, error_rows): (bool, i64, i64, i64, i64) =
        sqlx::query_as(
            r#"
            SELECT
                EXISTS (SELECT 1 FROM upload_batch WHERE id = $1),
                (SELECT COUNT(*) FROM sellout_temp WHERE upload_batch_id = $1),
                (SELECT COUNT(*) FROM sellout_temp WHERE upload_batch_id = $1 AND flag_move = 'N'),
                (SELECT COUNT(*) FROM sellout WHERE upload_batch_id = $1),
                (SELECT COUNT(*) FROM mapping_error WHERE upload_batch_id = $1)
            "#,
        )
        .bind(upload_batch_id)
        .fetch_one(pool)
        .await?;

    if !known {
        return Ok(None);
    }

    let by_status: Vec<(String, i64)> = sqlx::query_as(
        r#"
        SELECT status, COUNT(*)
        FROM mapping_error
        WHERE upload_batch_id = $1
        GROUP BY status
        "#,
    )
    .bind(upload_batch_id)
    .fetch_all(pool)
    .await?;

    let mut errors_by_reason: Vec<ReasonCount> = by_status
        .into_iter()
        .filter_map(|(status, count)| match MappingErrorReason::from_str(&status) {
            Some(status) => Some(ReasonCount { status, count }),
            None => {
                warn!("Batch {}: unrecognized mapping_error status '{}'", upload_batch_id, status);
                None
            }
        })
        .collect();
    errors_by_reason.sort_by_key(|r| r.status);

    let job_status = jobs::find_by_batch(pool, upload_batch_id)
        .await?
        .map(|job| job.status);

    Ok(Some(BatchSummary {
        upload_batch_id,
        job_status,
        staged_rows,
        pending_rows,
        fact_rows,
        error_rows,
        errors_by_reason,
    }))
}
