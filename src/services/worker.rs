//! Queue worker
//!
//! Polls the processing queue, runs the reconciliation engine for each
//! claimed job and records DONE/FAILED. Workers coordinate only through the
//! queue's claim; several can run in one process or across processes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::reconcile::{ReconcileOutcome, Reconciler};
use crate::db::JobQueue;

/// Result of one scheduler tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Nothing claimable
    Idle,
    Done {
        job_id: i64,
        outcome: ReconcileOutcome,
    },
    Failed {
        job_id: i64,
        error: String,
    },
    /// Finished, but another worker reclaimed the job in the meantime
    LeaseLost { job_id: i64 },
}

pub struct SelloutWorker {
    name: String,
    queue: Arc<dyn JobQueue>,
    reconciler: Arc<Reconciler>,
    lease_timeout: Duration,
    poll_interval: Duration,
}

impl SelloutWorker {
    pub fn new(
        name: impl Into<String>,
        queue: Arc<dyn JobQueue>,
        reconciler: Arc<Reconciler>,
        lease_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            queue,
            reconciler,
            lease_timeout,
            poll_interval,
        }
    }

    /// Claim at most one job and drive it to a terminal state
    pub async fn tick(&self) -> Result<TickOutcome> {
        let Some(job) = self.queue.claim_next(self.lease_timeout).await? else {
            return Ok(TickOutcome::Idle);
        };

        info!(
            "[{}] Claimed job {} for upload {} (attempt {})",
            self.name, job.id, job.upload_batch_id, job.attempts
        );

        match self.reconciler.run(job.upload_batch_id).await {
            Ok(outcome) => {
                if !self.queue.mark_done(&job).await? {
                    warn!("[{}] Job {} was reclaimed by another worker", self.name, job.id);
                    return Ok(TickOutcome::LeaseLost { job_id: job.id });
                }
                info!(
                    "[{}] Job {} DONE: {} rows ({} facts, {} errors)",
                    self.name,
                    job.id,
                    outcome.total_rows(),
                    outcome.fact_rows,
                    outcome.error_rows
                );
                Ok(TickOutcome::Done {
                    job_id: job.id,
                    outcome,
                })
            }
            Err(e) => {
                let message = format!("{:#}", e);
                error!("[{}] Job {} FAILED: {}", self.name, job.id, message);
                if !self.queue.mark_failed(&job, &message).await? {
                    warn!("[{}] Job {} was reclaimed by another worker", self.name, job.id);
                    return Ok(TickOutcome::LeaseLost { job_id: job.id });
                }
                Ok(TickOutcome::Failed {
                    job_id: job.id,
                    error: message,
                })
            }
        }
    }

    /// Poll until `shutdown` fires. Cancellation is observed between jobs only.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "[{}] Worker started (lease {:?}, poll {:?})",
            self.name, self.lease_timeout, self.poll_interval
        );

        while !shutdown.is_cancelled() {
            let idle = match self.tick().await {
                Ok(TickOutcome::Idle) => true,
                Ok(_) => false,
                Err(e) => {
                    error!("[{}] Queue error: {:#}", self.name, e);
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }

        info!("[{}] Worker stopped", self.name);
    }
}

/// Run every worker on its own task until shutdown
pub async fn run_workers(workers: Vec<SelloutWorker>, shutdown: CancellationToken) {
    let handles: Vec<_> = workers
        .into_iter()
        .map(|worker| {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { worker.run(shutdown).await })
        })
        .collect();

    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            error!("Worker task ended abnormally: {}", e);
        }
    }
}
