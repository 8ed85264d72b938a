//! CLI argument parsing for the sellout-worker binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "sellout-worker", about = "Sellout reconciliation worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the queue workers (default if no subcommand given)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Stage a distributor file for a branch and enqueue it
    Upload {
        /// Branch whose configuration describes the file
        #[arg(long)]
        branch: String,
        /// Path to the xlsx/csv/txt export
        #[arg(long)]
        file: PathBuf,
        /// Recorded as the uploader
        #[arg(long, default_value = "cli")]
        username: String,
    },
    /// Reconcile one upload batch in the foreground, bypassing the queue
    Reconcile {
        #[arg(long)]
        batch_id: Uuid,
    },
    /// Move a FAILED job back to PENDING
    RetryJob {
        #[arg(long)]
        job_id: i64,
    },
    /// Print fact/error counts for an upload batch
    Summary {
        #[arg(long)]
        batch_id: Uuid,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_migrate_command_parses() {
        let cli = Cli::parse_from(["sellout-worker", "migrate"]);
        assert!(matches!(cli.command, Some(Command::Migrate)));
    }

    #[test]
    fn test_cli_no_command_defaults_to_none() {
        let cli = Cli::parse_from(["sellout-worker"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_upload_parses_with_default_username() {
        let cli = Cli::parse_from([
            "sellout-worker",
            "upload",
            "--branch",
            "B01",
            "--file",
            "/tmp/march.xlsx",
        ]);
        match cli.command {
            Some(Command::Upload { branch, file, username }) => {
                assert_eq!(branch, "B01");
                assert_eq!(file, PathBuf::from("/tmp/march.xlsx"));
                assert_eq!(username, "cli");
            }
            _ => panic!("expected upload command"),
        }
    }

    #[test]
    fn test_cli_retry_job_parses() {
        let cli = Cli::parse_from(["sellout-worker", "retry-job", "--job-id", "42"]);
        assert!(matches!(cli.command, Some(Command::RetryJob { job_id: 42 })));
    }

    #[test]
    fn test_cli_rejects_malformed_batch_id() {
        let result = Cli::try_parse_from(["sellout-worker", "summary", "--batch-id", "nope"]);
        assert!(result.is_err());
    }
}
