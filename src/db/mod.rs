mod action_log;
pub mod codec;
mod engine;
mod error;
mod migrate;
mod repository;
pub mod schema;
mod sync_runs;
mod writer;

pub use action_log::{ActionKind, ActionLog, ActionLogEntry, PendingActions, ACTION_LOG_COLLECTION};
pub use codec::Row;
pub use engine::{ConnectionState, EngineOptions, Journal, RetryPolicy, StorageEngine};
pub use error::{StorageError, StorageResult};
pub use migrate::{migrate, MigrationReport};
pub use repository::{Repository, WriteOptions};
pub use schema::{CollectionSchema, FieldDef, FieldKind, Record, SchemaRegistry};
pub use sync_runs::{SyncKind, SyncRun, SyncRunLog, SyncStatus, SYNC_RUNS_COLLECTION};
pub use writer::WriteChain;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Open the connection pool for the database file, creating it if needed.
///
/// Schema setup is not done here; see [`migrate`].
pub async fn open_pool(path: &Path, max_connections: u32) -> StorageResult<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            StorageError::ConnectionLost(format!(
                "failed to create database directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    let db_url = format!("sqlite:{}?mode=rwc", path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .foreign_keys(true)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_open_pool_creates_missing_directories() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("dir").join("store.db");

        let pool = open_pool(&db_path, 2).await.unwrap();
        let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&pool).await.unwrap();

        assert_eq!(one, 1);
        assert!(db_path.exists());
    }
}
