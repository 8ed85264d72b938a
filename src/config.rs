//! Configuration management

use std::str::FromStr;
use std::time::Duration;

use anyhow::{self, Context, Result};

use crate::defaults::*;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string
    pub database_url: String,

    pub database_max_connections: u32,

    /// Staged rows per engine transaction
    pub batch_size: usize,

    /// Age after which a PROCESSING job can be claimed again
    pub lease_timeout: Duration,

    /// Idle sleep between queue polls
    pub poll_interval: Duration,

    /// Independent worker loops started by `serve`
    pub worker_concurrency: usize,

    /// Identity written to fact/error audit columns
    pub actor: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset and empty values fall back to defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = get("DATABASE_URL").context("DATABASE_URL must be set")?;

        let batch_size = parse_or(&get, "RECON_BATCH_SIZE", DEFAULT_RECON_BATCH_SIZE)?;
        if batch_size == 0 {
            anyhow::bail!("RECON_BATCH_SIZE must be greater than 0");
        }

        let worker_concurrency = parse_or(&get, "WORKER_CONCURRENCY", DEFAULT_WORKER_CONCURRENCY)?;
        if worker_concurrency == 0 {
            anyhow::bail!("WORKER_CONCURRENCY must be greater than 0");
        }

        Ok(Self {
            database_url,
            database_max_connections: parse_or(
                &get,
                "DATABASE_MAX_CONNECTIONS",
                DEFAULT_DATABASE_MAX_CONNECTIONS,
            )?,
            batch_size,
            lease_timeout: Duration::from_secs(parse_or(
                &get,
                "JOB_LEASE_TIMEOUT_SECS",
                DEFAULT_JOB_LEASE_TIMEOUT_SECS,
            )?),
            poll_interval: Duration::from_millis(parse_or(
                &get,
                "JOB_POLL_INTERVAL_MS",
                DEFAULT_JOB_POLL_INTERVAL_MS,
            )?),
            worker_concurrency,
            actor: get("RECON_ACTOR").unwrap_or_else(|| DEFAULT_RECON_ACTOR.to_string()),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} has invalid value '{}': {}", key, raw, e)),
    }
}
