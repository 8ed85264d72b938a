//! Reconciliation engine
//!
//! Drains one upload batch: resolvable rows are moved into the fact table in
//! bounded, individually committed batches; whatever is left is classified
//! and moved into the error table. A failure aborts only the in-flight batch,
//! so running the engine again resumes where it stopped.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::StagingStore;
use crate::types::{classify, Classifier, MappingErrorReason};

/// What one engine run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Committed fact batches
    pub batches: u32,
    pub fact_rows: u64,
    pub error_rows: u64,
    pub errors_by_reason: BTreeMap<MappingErrorReason, u64>,
}

impl ReconcileOutcome {
    pub fn total_rows(&self) -> u64 {
        self.fact_rows + self.error_rows
    }
}

pub struct Reconciler {
    store: Arc<dyn StagingStore>,
    batch_size: i64,
    actor: String,
    classifier: Classifier,
}

impl Reconciler {
    pub fn new(store: Arc<dyn StagingStore>, batch_size: usize, actor: impl Into<String>) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1) as i64,
            actor: actor.into(),
            classifier: classify,
        }
    }

    pub async fn run(&self, upload_batch_id: Uuid) -> Result<ReconcileOutcome> {
        let mut outcome = ReconcileOutcome::default();

        loop {
            let moved = self
                .store
                .move_resolvable(upload_batch_id, self.batch_size, &self.actor)
                .await
                .with_context(|| {
                    format!("moving fact batch {} of upload {}", outcome.batches + 1, upload_batch_id)
                })?;
            if moved == 0 {
                break;
            }
            outcome.batches += 1;
            outcome.fact_rows += moved;
            debug!(
                "Upload {}: fact batch {} committed ({} rows)",
                upload_batch_id, outcome.batches, moved
            );
        }

        loop {
            let reasons = self
                .store
                .drain_unresolved(upload_batch_id, self.batch_size, self.classifier, &self.actor)
                .await
                .with_context(|| format!("draining unresolved rows of upload {}", upload_batch_id))?;
            if reasons.is_empty() {
                break;
            }
            outcome.error_rows += reasons.len() as u64;
            for reason in reasons {
                *outcome.errors_by_reason.entry(reason).or_default() += 1;
            }
        }

        info!(
            "Upload {} reconciled: {} fact rows in {} batches, {} error rows {:?}",
            upload_batch_id,
            outcome.fact_rows,
            outcome.batches,
            outcome.error_rows,
            outcome.errors_by_reason
        );
        Ok(outcome)
    }
}
