//! Processing queue types
//!
//! One job per upload batch. The state machine is
//! `PENDING → PROCESSING → {DONE, FAILED}`; a PROCESSING job whose lease
//! (`started_at`) is older than the lease timeout can be claimed again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use uuid::Uuid;

/// Job status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "job_status", rename_all = "UPPERCASE")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }
}

/// Row of `sellout_process_queue`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingJob {
    pub id: i64,
    pub upload_batch_id: Uuid,
    pub status: JobStatus,
    pub attempts: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
impl ProcessingJob {
    pub fn pending(id: i64, upload_batch_id: Uuid, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            upload_batch_id,
            status: JobStatus::Pending,
            attempts: 0,
            error_message: None,
            created_at,
            started_at: None,
            finished_at: None,
        }
    }

    /// Claim predicate: PENDING or PROCESSING, and never started or lease expired.
    /// FAILED jobs are never claimable; they need an explicit operator retry.
    pub fn is_claimable(&self, now: DateTime<Utc>, lease_timeout: chrono::Duration) -> bool {
        let open = matches!(self.status, JobStatus::Pending | JobStatus::Processing);
        let lease_free = match self.started_at {
            None => true,
            Some(started) => started < now - lease_timeout,
        };
        open && lease_free
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job(status: JobStatus, started_mins_ago: Option<i64>) -> ProcessingJob {
        let now = Utc::now();
        ProcessingJob {
            status,
            started_at: started_mins_ago.map(|m| now - Duration::minutes(m)),
            ..ProcessingJob::pending(1, Uuid::nil(), now)
        }
    }

    #[test]
    fn test_pending_job_is_claimable() {
        assert!(job(JobStatus::Pending, None).is_claimable(Utc::now(), Duration::minutes(10)));
    }

    #[test]
    fn test_processing_job_with_fresh_lease_is_not_claimable() {
        let j = job(JobStatus::Processing, Some(2));
        assert!(!j.is_claimable(Utc::now(), Duration::minutes(10)));
    }

    #[test]
    fn test_processing_job_with_stale_lease_is_claimable() {
        let j = job(JobStatus::Processing, Some(11));
        assert!(j.is_claimable(Utc::now(), Duration::minutes(10)));
    }

    #[test]
    fn test_terminal_jobs_are_never_claimable() {
        assert!(!job(JobStatus::Failed, Some(60)).is_claimable(Utc::now(), Duration::minutes(10)));
        assert!(!job(JobStatus::Done, Some(60)).is_claimable(Utc::now(), Duration::minutes(10)));
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn test_job_serializes_to_camel_case() {
        let json = serde_json::to_string(&job(JobStatus::Pending, None)).unwrap();
        assert!(json.contains("uploadBatchId"));
        assert!(json.contains("\"PENDING\""));
    }
}
