//! Database module

#[cfg(test)]
pub mod memory;
pub mod queries;
pub mod store;

pub use store::{JobQueue, PgStore, StagingStore};

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

/// Create a database connection pool
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .context("failed to connect to PostgreSQL")?;

    Ok(pool)
}

/// Apply embedded migrations.
///
/// `_sqlx_migrations` is repaired first: records for versions that no longer
/// ship with the binary are dropped, and stored checksums are refreshed when
/// the same file was checked out with different line endings.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let migrator = sqlx::migrate!("./migrations");

    let shipped: Vec<(i64, &[u8])> = migrator
        .iter()
        .filter(|m| !m.migration_type.is_down_migration())
        .map(|m| (m.version, m.checksum.as_ref()))
        .collect();

    let applied = applied_migrations(pool).await?;
    info!(
        "Migrations: {} shipped, {} recorded as applied",
        shipped.len(),
        applied.len()
    );

    for (version, stored_checksum) in &applied {
        match shipped.iter().find(|(v, _)| v == version) {
            None => {
                warn!("Dropping record of migration {} (no longer shipped)", version);
                sqlx::query("DELETE FROM _sqlx_migrations WHERE version = $1")
                    .bind(version)
                    .execute(pool)
                    .await?;
            }
            Some((_, checksum)) if stored_checksum.as_slice() != *checksum => {
                warn!("Refreshing checksum of migration {}", version);
                sqlx::query("UPDATE _sqlx_migrations SET checksum = $1 WHERE version = $2")
                    .bind(*checksum)
                    .bind(version)
                    .execute(pool)
                    .await?;
            }
            Some(_) => {}
        }
    }

    migrator
        .run(pool)
        .await
        .context("failed to apply migrations")?;
    info!("Database migrations complete");
    Ok(())
}

async fn applied_migrations(pool: &PgPool) -> Result<Vec<(i64, Vec<u8>)>> {
    let has_table: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM information_schema.tables
            WHERE table_schema = current_schema() AND table_name = '_sqlx_migrations'
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    if !has_table {
        return Ok(Vec::new());
    }

    let rows = sqlx::query_as::<_, (i64, Vec<u8>)>(
        "SELECT version, checksum FROM _sqlx_migrations ORDER BY version",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
