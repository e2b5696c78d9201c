//! Durable SQLite storage for the offline subsystem.
//!
//! One database file holds the pending operation queue, the draft
//! documents and the response cache generations. Everything in it survives
//! process restarts.

mod draft_repo;
mod operation_repo;

pub use draft_repo::DraftStore;
pub use operation_repo::OperationStore;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// SQLite primary result code for "database or disk is full".
const SQLITE_FULL: &str = "13";

/// Errors raised by the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage medium has no room left. Fatal for the whole subsystem.
    #[error("Storage exhausted: {0}")]
    StorageExhausted(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Failed to create store directory {}: {}", .0.display(), .1)]
    Io(PathBuf, std::io::Error),

    #[error("Invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        let exhausted = matches!(
            &e,
            sqlx::Error::Database(db) if db.code().as_deref() == Some(SQLITE_FULL)
        );
        if exhausted {
            StoreError::StorageExhausted(e.to_string())
        } else {
            StoreError::Database(e)
        }
    }
}

/// Opens (creating if needed) the store at `path` and runs migrations.
pub async fn init_store(path: &Path) -> Result<SqlitePool, StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(parent.to_path_buf(), e))?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    tracing::debug!("Opened offline store at {}", path.display());

    Ok(pool)
}
