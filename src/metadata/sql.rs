use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

use super::{MetadataStore, StoreError, StoreResult};
use crate::models::file::{format_uploaded_at, DownloadEvent, FileRecord, NewFile};

/// sqlx-backed store over the `files` and `downloads` tables.
#[derive(Clone)]
pub struct SqlMetadataStore {
    pool: SqlitePool,
}

impl SqlMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens a pool for `url` and applies the embedded migrations.
    pub async fn connect(url: &str, acquire_timeout: Duration) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Each in-memory connection is its own database, so pin it to one.
        let pool_options = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };
        let pool = pool_options
            .acquire_timeout(acquire_timeout)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Metadata store ready");

        Ok(Self::new(pool))
    }
}

#[async_trait]
impl MetadataStore for SqlMetadataStore {
    #[tracing::instrument(skip(self, file), fields(db.table = "files", file_id = %file.id))]
    async fn create_file(&self, file: &NewFile) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO files (id, delete_id, filename, filesize, upload_ip, uploaded)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&file.id)
        .bind(&file.delete_id)
        .bind(&file.filename)
        .bind(file.filesize)
        .bind(&file.upload_ip)
        .bind(format_uploaded_at(file.uploaded_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if e.as_database_error().is_some_and(|db| db.is_unique_violation()) {
                StoreError::Duplicate(file.id.clone())
            } else {
                StoreError::Database(e)
            }
        })?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "files"))]
    async fn get_file(&self, id: &str) -> StoreResult<Option<FileRecord>> {
        let record = sqlx::query_as::<_, FileRecord>(
            "SELECT id, delete_id, filename, filesize, upload_ip, uploaded, downloads, deleted
             FROM files WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(ref r) = record {
            tracing::debug!(
                filename = %r.filename,
                downloads = r.downloads,
                deleted = r.deleted,
                "file exists"
            );
        }
        Ok(record)
    }

    #[tracing::instrument(skip(self), fields(db.table = "files"))]
    async fn increment_download_count(&self, id: &str) -> StoreResult<()> {
        sqlx::query("UPDATE files SET downloads = downloads + 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "downloads"))]
    async fn record_download_event(
        &self,
        id: &str,
        ip: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query("INSERT INTO downloads (file_id, ip_address, datetime) VALUES (?, ?, ?)")
            .bind(id)
            .bind(ip)
            .bind(format_uploaded_at(at))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, delete_id), fields(db.table = "files"))]
    async fn mark_deleted(&self, id: &str, delete_id: &str) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE files SET deleted = 1 WHERE id = ? AND delete_id = ? AND deleted = 0",
        )
        .bind(id)
        .bind(delete_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    #[tracing::instrument(skip(self), fields(db.table = "files"))]
    async fn remove_file(&self, id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "downloads"))]
    async fn download_events(&self, id: &str) -> StoreResult<Vec<DownloadEvent>> {
        let events = sqlx::query_as::<_, DownloadEvent>(
            "SELECT file_id, ip_address, datetime FROM downloads
             WHERE file_id = ? ORDER BY rowid",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }
}
