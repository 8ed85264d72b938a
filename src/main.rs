//! Sellout Worker - distributor sellout ingestion and reconciliation
//!
//! Stages distributor files, resolves their codes against the master data
//! and loads the sellout fact table from a Postgres-backed job queue.

mod cli;
mod config;
mod db;
mod defaults;
mod services;
mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use cli::{Cli, Command};
use config::Config;
use db::{JobQueue, PgStore, StagingStore};
use services::reconcile::Reconciler;
use services::upload::UploadService;
use services::worker::{run_workers, SelloutWorker};
use types::UploadRequest;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs directory - use LOGS_DIR env var or default to ../logs (relative to worker)
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| defaults::DEFAULT_LOGS_DIR.to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "sellout-worker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| defaults::DEFAULT_LOG_FILTER.into()),
        ))
        .with(tracing_subscriber::fmt::layer()) // stdout
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false)) // file
        .init();

    let config = Config::from_env()?;
    info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    info!("Connected to PostgreSQL");
    let store = Arc::new(PgStore::new(pool.clone()));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            db::run_migrations(&pool).await?;
            serve(&config, store).await
        }
        Command::Migrate => db::run_migrations(&pool).await,
        Command::Upload { branch, file, username } => upload(store, branch, &file, username).await,
        Command::Reconcile { batch_id } => {
            if let Some(job) = store.find_by_batch(batch_id).await? {
                if !job.status.is_terminal() {
                    warn!(
                        "Job {} for batch {} is still {:?}; a worker may drain it concurrently",
                        job.id, batch_id, job.status
                    );
                }
            }
            let reconciler = Reconciler::new(store, config.batch_size, config.actor.clone());
            let outcome = reconciler.run(batch_id).await?;
            println!(
                "Batch {}: {} fact rows, {} error rows {:?}",
                batch_id, outcome.fact_rows, outcome.error_rows, outcome.errors_by_reason
            );
            Ok(())
        }
        Command::RetryJob { job_id } => match store.retry_failed(job_id).await? {
            Some(job) => {
                println!("Job {} for upload {} is PENDING again", job.id, job.upload_batch_id);
                Ok(())
            }
            None => anyhow::bail!("Job {} does not exist or is not FAILED", job_id),
        },
        Command::Summary { batch_id } => summary(store, batch_id).await,
    }
}

async fn serve(config: &Config, store: Arc<PgStore>) -> Result<()> {
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        config.batch_size,
        config.actor.clone(),
    ));
    let workers: Vec<SelloutWorker> = (1..=config.worker_concurrency)
        .map(|n| {
            SelloutWorker::new(
                format!("worker-{}", n),
                store.clone(),
                reconciler.clone(),
                config.lease_timeout,
                config.poll_interval,
            )
        })
        .collect();

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested, finishing in-flight jobs..."),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
        signal.cancel();
    });

    info!("Starting {} worker(s)", workers.len());
    run_workers(workers, shutdown).await;
    info!("All workers stopped");
    Ok(())
}

async fn upload(store: Arc<PgStore>, branch: String, file: &Path, username: String) -> Result<()> {
    let content = tokio::fs::read(file)
        .await
        .with_context(|| format!("cannot read {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let service = UploadService::new(store);
    let receipt = service
        .upload(UploadRequest {
            branch,
            filename,
            content,
            uploaded_by: username,
        })
        .await?;

    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

async fn summary(store: Arc<PgStore>, batch_id: Uuid) -> Result<()> {
    let Some(summary) = store.batch_summary(batch_id).await? else {
        anyhow::bail!("Upload batch {} not found", batch_id);
    };
    if summary.pending_rows > 0 {
        warn!("Batch {} still has {} unreconciled rows", batch_id, summary.pending_rows);
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
