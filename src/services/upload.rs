//! Upload handling: configuration lookup, normalization and staging
//!
//! Every rejection happens before anything is written; the replace-by-range
//! delete, the inserts and the enqueue run as one store operation.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::normalizer::{normalize_file, NormalizeError};
use crate::db::StagingStore;
use crate::types::{DateSpan, FileFormat, UploadBatch, UploadReceipt, UploadRequest};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("no configuration for branch {0}")]
    NoConfiguration(String),

    #[error("file extension mismatch: branch {branch} expects .{expected}, got '{actual}'")]
    ExtensionMismatch {
        branch: String,
        expected: &'static str,
        actual: String,
    },

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error("no valid rows parsed")]
    NoValidRows,

    #[error("no invoice dates found in parsed rows")]
    NoInvoiceDates,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub struct UploadService {
    store: Arc<dyn StagingStore>,
}

impl UploadService {
    pub fn new(store: Arc<dyn StagingStore>) -> Self {
        Self { store }
    }

    pub async fn upload(&self, request: UploadRequest) -> Result<UploadReceipt, UploadError> {
        let config = self
            .store
            .branch_config(&request.branch)
            .await?
            .ok_or_else(|| UploadError::NoConfiguration(request.branch.clone()))?;

        let extension = request.extension();
        if FileFormat::from_extension(&extension) != Some(config.format) {
            warn!(
                "Rejected upload '{}' for branch {}: expected .{}",
                request.filename,
                request.branch,
                config.format.as_str()
            );
            return Err(UploadError::ExtensionMismatch {
                branch: request.branch,
                expected: config.format.as_str(),
                actual: extension,
            });
        }

        let upload_batch_id = Uuid::new_v4();
        let rows = normalize_file(&request.content, &config, &request.uploaded_by, upload_batch_id)?;
        if rows.is_empty() {
            return Err(UploadError::NoValidRows);
        }
        let span = DateSpan::of_rows(&rows).ok_or(UploadError::NoInvoiceDates)?;

        let batch = UploadBatch {
            id: upload_batch_id,
            branch: request.branch,
            created_by: request.uploaded_by,
            total_rows: rows.len() as i32,
            created_at: Utc::now(),
        };
        let staged = self.store.stage_upload(&batch, &rows, span).await?;

        info!(
            "Upload {} for branch {} by {}: {} rows ({}..={}), job {}",
            upload_batch_id,
            batch.branch,
            batch.created_by,
            rows.len(),
            span.start,
            span.end,
            staged.job_id
        );

        Ok(UploadReceipt {
            upload_batch_id,
            total_row: rows.len(),
            job_id: staged.job_id,
        })
    }
}
