//! Built-in defaults for tunables that can be overridden from the environment

/// Staged rows claimed per engine transaction
pub const DEFAULT_RECON_BATCH_SIZE: usize = 1000;

/// A PROCESSING job older than this is presumed abandoned
pub const DEFAULT_JOB_LEASE_TIMEOUT_SECS: u64 = 600;

/// Idle backoff between queue polls
pub const DEFAULT_JOB_POLL_INTERVAL_MS: u64 = 2000;

pub const DEFAULT_WORKER_CONCURRENCY: usize = 1;

pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Audit identity written to fact and error rows
pub const DEFAULT_RECON_ACTOR: &str = "SYSTEM";

pub const DEFAULT_LOGS_DIR: &str = "../logs";

pub const DEFAULT_LOG_FILTER: &str = "info,sellout_worker=debug";
