use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use super::{MetadataStore, StoreError, StoreResult};
use crate::models::file::{format_uploaded_at, DownloadEvent, FileRecord, NewFile};

/// In-process store. Each operation holds at most one shard lock, which keeps
/// the conditional delete atomic per record.
#[derive(Clone, Default)]
pub struct MemoryMetadataStore {
    files: Arc<DashMap<String, FileRecord>>,
    events: Arc<DashMap<String, Vec<DownloadEvent>>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces a stored record wholesale. Test fixtures use this to set counters
    /// and timestamps directly.
    pub fn put_record(&self, record: FileRecord) {
        self.files.insert(record.id.clone(), record);
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn create_file(&self, file: &NewFile) -> StoreResult<()> {
        match self.files.entry(file.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(file.id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(file.clone().into_record());
                Ok(())
            }
        }
    }

    async fn get_file(&self, id: &str) -> StoreResult<Option<FileRecord>> {
        Ok(self.files.get(id).map(|r| r.value().clone()))
    }

    async fn increment_download_count(&self, id: &str) -> StoreResult<()> {
        if let Some(mut record) = self.files.get_mut(id) {
            record.downloads += 1;
        }
        Ok(())
    }

    async fn record_download_event(
        &self,
        id: &str,
        ip: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.events
            .entry(id.to_string())
            .or_default()
            .push(DownloadEvent {
                file_id: id.to_string(),
                ip_address: ip.to_string(),
                datetime: format_uploaded_at(at),
            });
        Ok(())
    }

    async fn mark_deleted(&self, id: &str, delete_id: &str) -> StoreResult<u64> {
        match self.files.get_mut(id) {
            Some(mut record) if record.delete_id == delete_id && !record.deleted => {
                record.deleted = true;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn remove_file(&self, id: &str) -> StoreResult<()> {
        self.files.remove(id);
        self.events.remove(id);
        Ok(())
    }

    async fn download_events(&self, id: &str) -> StoreResult<Vec<DownloadEvent>> {
        Ok(self
            .events
            .get(id)
            .map(|e| e.value().clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_file() -> NewFile {
        NewFile {
            id: "abc123".into(),
            delete_id: "secret".into(),
            filename: "a.txt".into(),
            filesize: 10,
            upload_ip: "10.0.0.1".into(),
            uploaded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn concurrent_deletes_succeed_exactly_once() {
        let store = MemoryMetadataStore::new();
        store.create_file(&new_file()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.mark_deleted("abc123", "secret").await.unwrap()
            }));
        }

        let mut total = 0;
        for h in handles {
            total += h.await.unwrap();
        }
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn wrong_secret_leaves_record_live() {
        let store = MemoryMetadataStore::new();
        store.create_file(&new_file()).await.unwrap();
        assert_eq!(store.mark_deleted("abc123", "guess").await.unwrap(), 0);
        assert!(!store.get_file("abc123").await.unwrap().unwrap().deleted);
    }

    #[tokio::test]
    async fn duplicate_id_keeps_first_record() {
        let store = MemoryMetadataStore::new();
        store.create_file(&new_file()).await.unwrap();

        let mut other = new_file();
        other.delete_id = "other-secret".into();
        assert!(matches!(
            store.create_file(&other).await,
            Err(StoreError::Duplicate(id)) if id == "abc123"
        ));
        assert_eq!(
            store.get_file("abc123").await.unwrap().unwrap().delete_id,
            "secret"
        );
    }
}
