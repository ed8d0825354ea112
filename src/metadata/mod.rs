//! Persistence of file records and the download audit log.
//!
//! Every operation is a single statement against the backing store; nothing
//! spans both tables in a transaction.

pub mod memory;
pub mod sql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;

use crate::models::file::{DownloadEvent, FileRecord, NewFile};

pub use memory::MemoryMetadataStore;
pub use sql::SqlMetadataStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("File id already exists: {0}")]
    Duplicate(String),

    #[error("Metadata store timed out")]
    Timeout,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Bounds a store call by `limit`.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| StoreError::Timeout)?
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn create_file(&self, file: &NewFile) -> StoreResult<()>;

    async fn get_file(&self, id: &str) -> StoreResult<Option<FileRecord>>;

    async fn increment_download_count(&self, id: &str) -> StoreResult<()>;

    async fn record_download_event(
        &self,
        id: &str,
        ip: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Sets `deleted` where both ids match and the record is still live.
    /// Returns the number of records changed, 0 or 1.
    async fn mark_deleted(&self, id: &str, delete_id: &str) -> StoreResult<u64>;

    /// Hard-removes a record. Only used to undo an upload whose bytes never landed.
    async fn remove_file(&self, id: &str) -> StoreResult<()>;

    async fn download_events(&self, id: &str) -> StoreResult<Vec<DownloadEvent>>;
}
