//! Upload, download authorization and deletion of shared files.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::Instrument;

use crate::background::bookkeeping::DownloadGranted;
use crate::error::AppError;
use crate::gateway::{self, object_key, GatewayResult};
use crate::ids;
use crate::metadata;
use crate::models::file::{FileRecord, NewFile, UploadResponse};
use crate::state::AppState;

/// Stores `data` and returns the public id and delete secret. The secret is
/// not retrievable through any other call.
#[tracing::instrument(skip(state, data), fields(size = data.len()))]
pub async fn upload(
    state: &AppState,
    filename: &str,
    data: Bytes,
    client_ip: &str,
) -> Result<UploadResponse, AppError> {
    if filename.is_empty() {
        return Err(AppError::BadRequest("missing filename".into()));
    }

    let filesize = data.len() as u64;
    if filesize > state.config.max_upload_size {
        return Err(AppError::PayloadTooLarge(format!(
            "File size {} exceeds max upload size {}",
            filesize, state.config.max_upload_size
        )));
    }

    let file = NewFile {
        id: ids::public_id(),
        delete_id: ids::delete_secret(),
        filename: filename.to_string(),
        filesize: filesize as i64,
        upload_ip: client_ip.to_string(),
        uploaded_at: Utc::now(),
    };

    // Detached so the row and the object settle even if the caller is dropped.
    let task = tokio::spawn(store_upload(state.clone(), file, data).in_current_span());
    task.await.map_err(|e| {
        tracing::error!(error = %e, "Upload task failed");
        AppError::Internal("unable to store uploaded file".into())
    })?
}

/// Writes the metadata row, then the object. A failed object write removes
/// the row again.
async fn store_upload(
    state: AppState,
    file: NewFile,
    data: Bytes,
) -> Result<UploadResponse, AppError> {
    let filesize = data.len();
    let timeout = state.config.store_timeout();
    metadata::with_timeout(timeout, state.metadata.create_file(&file)).await?;

    let key = object_key(&file.id, &file.filename);
    if let Err(e) = push_object(&state, &key, data).await {
        tracing::error!(file_id = %file.id, key = %key, error = %e, "Object upload failed, rolling back");
        roll_back(&state, &file.id, &key).await;
        return Err(AppError::Internal("unable to store uploaded file".into()));
    }

    tracing::info!(file_id = %file.id, filename = %file.filename, size = filesize, "File uploaded");

    Ok(UploadResponse {
        id: file.id,
        delete_id: file.delete_id,
    })
}

async fn push_object(state: &AppState, key: &str, data: Bytes) -> GatewayResult<()> {
    let timeout = state.config.store_timeout();
    gateway::with_timeout(timeout, state.gateway.put(key, data)).await?;
    gateway::with_timeout(timeout, state.gateway.grant_public_read(key)).await
}

/// Removes the metadata row for an upload whose bytes did not land, plus any
/// partial object. Failures leave an orphan that is logged with its id.
async fn roll_back(state: &AppState, id: &str, key: &str) {
    let timeout = state.config.store_timeout();

    if let Err(e) = gateway::with_timeout(timeout, state.gateway.delete(key)).await {
        tracing::warn!(file_id = %id, key = %key, error = %e, "Failed to remove partial object");
    }
    if let Err(e) = metadata::with_timeout(timeout, state.metadata.remove_file(id)).await {
        tracing::error!(file_id = %id, error = %e, "Orphaned file record after failed upload");
    }
}

/// Access checks for a download, in order: deleted, quota, expiry.
///
/// The quota check is `downloads > max_downloads`, so a file is served
/// `max_downloads + 1` times. Expiry is exclusive: a file is still served at
/// exactly `uploaded + ttl`. An unparsable upload time skips the expiry check.
pub fn check_download(
    record: &FileRecord,
    now: DateTime<Utc>,
    max_downloads: i64,
    ttl_secs: i64,
) -> Result<(), AppError> {
    if record.deleted {
        return Err(AppError::Forbidden("this file has been deleted".into()));
    }

    if record.downloads > max_downloads {
        return Err(AppError::Forbidden(
            "this file has been downloaded too many times".into(),
        ));
    }

    match record.uploaded_at() {
        Ok(uploaded) => {
            if uploaded.timestamp().saturating_add(ttl_secs) < now.timestamp() {
                return Err(AppError::Forbidden("this file has expired".into()));
            }
        }
        Err(e) => {
            tracing::warn!(
                file_id = %record.id,
                uploaded = %record.uploaded,
                error = %e,
                "Unable to verify upload datetime"
            );
        }
    }

    Ok(())
}

/// Authorizes a download and returns the signed URL to redirect to. The
/// counter and audit writes are queued and not awaited.
#[tracing::instrument(skip(state))]
pub async fn request_download(
    state: &AppState,
    id: &str,
    client_ip: &str,
    now: DateTime<Utc>,
) -> Result<String, AppError> {
    let timeout = state.config.store_timeout();
    let record = metadata::with_timeout(timeout, state.metadata.get_file(id))
        .await?
        .ok_or_else(|| AppError::NotFound("unable to get specified file".into()))?;

    check_download(
        &record,
        now,
        state.config.max_downloads,
        state.config.file_ttl_secs,
    )?;

    let url = gateway::with_timeout(
        timeout,
        state
            .gateway
            .signed_url(&record.object_key(), state.config.signed_url_ttl()),
    )
    .await
    .map_err(|e| {
        tracing::error!(file_id = %id, error = %e, "Signing failed");
        AppError::Internal("unable to generate signed url to download".into())
    })?;

    state.bookkeeping.submit(DownloadGranted {
        file_id: record.id,
        client_ip: client_ip.to_string(),
        at: now,
    });

    Ok(url)
}

/// Soft-deletes a file when `delete_id` matches.
#[tracing::instrument(skip(state, delete_id))]
pub async fn delete_file(state: &AppState, id: &str, delete_id: &str) -> Result<(), AppError> {
    let timeout = state.config.store_timeout();

    if metadata::with_timeout(timeout, state.metadata.get_file(id))
        .await?
        .is_none()
    {
        return Err(AppError::NotFound("unable to find requested id".into()));
    }

    let changed =
        metadata::with_timeout(timeout, state.metadata.mark_deleted(id, delete_id)).await?;
    if changed == 0 {
        return Err(AppError::Unauthorized("failed to delete file".into()));
    }

    tracing::info!(file_id = %id, "File deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::bookkeeping::BookkeepingQueue;
    use crate::config::test_config;
    use crate::gateway::{GatewayError, ObjectGateway};
    use crate::metadata::{MemoryMetadataStore, MetadataStore};
    use crate::models::file::format_uploaded_at;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use dashmap::DashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeGateway {
        objects: DashMap<String, Bytes>,
        put_calls: AtomicUsize,
        put_delay: Option<Duration>,
        fail_put: bool,
        fail_sign: bool,
    }

    #[async_trait]
    impl ObjectGateway for FakeGateway {
        async fn put(&self, key: &str, data: Bytes) -> GatewayResult<()> {
            self.put_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.put_delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_put {
                return Err(GatewayError::UploadFailed("bucket unavailable".into()));
            }
            self.objects.insert(key.to_string(), data);
            Ok(())
        }

        async fn grant_public_read(&self, _key: &str) -> GatewayResult<()> {
            Ok(())
        }

        async fn signed_url(&self, key: &str, ttl: Duration) -> GatewayResult<String> {
            if self.fail_sign {
                return Err(GatewayError::SigningFailed("no key".into()));
            }
            Ok(format!("https://signed.test/{}?ttl={}", key, ttl.as_secs()))
        }

        async fn delete(&self, key: &str) -> GatewayResult<()> {
            self.objects.remove(key);
            Ok(())
        }

        fn backend_name(&self) -> &'static str {
            "fake"
        }
    }

    struct Harness {
        state: AppState,
        store: MemoryMetadataStore,
        gateway: Arc<FakeGateway>,
        jobs: tokio::sync::mpsc::Receiver<DownloadGranted>,
    }

    fn harness(gateway: FakeGateway) -> Harness {
        let store = MemoryMetadataStore::new();
        let gateway = Arc::new(gateway);
        let (queue, jobs) = BookkeepingQueue::new(16);
        let state = AppState::new(
            test_config(),
            Arc::new(store.clone()),
            gateway.clone(),
            queue,
        );
        Harness {
            state,
            store,
            gateway,
            jobs,
        }
    }

    fn record(downloads: i64, uploaded_at: DateTime<Utc>) -> FileRecord {
        FileRecord {
            id: "abc123".into(),
            delete_id: "secret".into(),
            filename: "a.txt".into(),
            filesize: 10,
            upload_ip: "10.0.0.1".into(),
            uploaded: format_uploaded_at(uploaded_at),
            downloads,
            deleted: false,
        }
    }

    fn forbidden_message(result: Result<(), AppError>) -> String {
        match result {
            Err(AppError::Forbidden(msg)) => msg,
            other => panic!("expected Forbidden, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn upload_persists_record_and_object() {
        let h = harness(FakeGateway::default());
        let resp = upload(&h.state, "a.txt", Bytes::from_static(b"0123456789"), "10.0.0.1")
            .await
            .unwrap();

        assert_eq!(resp.id.len(), ids::PUBLIC_ID_LEN);
        assert_ne!(resp.id, resp.delete_id);
        assert!(!resp.delete_id.contains(&resp.id));

        let stored = h.store.get_file(&resp.id).await.unwrap().unwrap();
        assert_eq!(stored.filesize, 10);
        assert_eq!(stored.downloads, 0);
        assert!(!stored.deleted);
        assert_eq!(stored.upload_ip, "10.0.0.1");
        assert!(h.gateway.objects.contains_key(&format!("{}/a.txt", resp.id)));
    }

    #[tokio::test]
    async fn upload_ids_are_unique_across_uploads() {
        let h = harness(FakeGateway::default());
        let mut seen = std::collections::HashSet::new();
        for _ in 0..50 {
            let resp = upload(&h.state, "a.txt", Bytes::from_static(b"x"), "10.0.0.1")
                .await
                .unwrap();
            assert!(seen.insert(resp.id));
        }
    }

    #[tokio::test]
    async fn failed_object_upload_rolls_back_metadata() {
        let h = harness(FakeGateway {
            fail_put: true,
            ..Default::default()
        });
        let err = upload(&h.state, "a.txt", Bytes::from_static(b"x"), "10.0.0.1")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Internal(_)));
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn dropped_upload_still_rolls_back_failed_object() {
        let h = harness(FakeGateway {
            put_delay: Some(Duration::from_millis(100)),
            fail_put: true,
            ..Default::default()
        });

        let dropped = tokio::time::timeout(
            Duration::from_millis(10),
            upload(&h.state, "a.txt", Bytes::from_static(b"x"), "10.0.0.1"),
        )
        .await;
        assert!(dropped.is_err());

        for _ in 0..200 {
            if h.gateway.put_calls.load(Ordering::SeqCst) == 1 && h.store.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.gateway.put_calls.load(Ordering::SeqCst), 1);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn dropped_upload_that_lands_keeps_record_and_object() {
        let h = harness(FakeGateway {
            put_delay: Some(Duration::from_millis(100)),
            ..Default::default()
        });

        let dropped = tokio::time::timeout(
            Duration::from_millis(10),
            upload(&h.state, "a.txt", Bytes::from_static(b"x"), "10.0.0.1"),
        )
        .await;
        assert!(dropped.is_err());

        let mut key = None;
        for _ in 0..200 {
            if let Some(entry) = h.gateway.objects.iter().next() {
                key = Some(entry.key().clone());
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let key = key.expect("object never written");
        let id = key.trim_end_matches("/a.txt");
        assert!(h.store.get_file(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn oversized_and_nameless_uploads_are_rejected() {
        let h = harness(FakeGateway::default());
        let big = Bytes::from(vec![0u8; 2048]);
        assert!(matches!(
            upload(&h.state, "big.bin", big, "10.0.0.1").await,
            Err(AppError::PayloadTooLarge(_))
        ));
        assert!(matches!(
            upload(&h.state, "", Bytes::from_static(b"x"), "10.0.0.1").await,
            Err(AppError::BadRequest(_))
        ));
        assert!(h.store.is_empty());
    }

    #[test]
    fn quota_boundary_is_strictly_greater_than() {
        let now = Utc::now();
        // downloads == max is still served; max + 1 downloads are possible in total.
        assert!(check_download(&record(10, now), now, 10, 60).is_ok());
        let msg = forbidden_message(check_download(&record(11, now), now, 10, 60));
        assert!(msg.contains("too many"));
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let uploaded = Utc::now() - ChronoDuration::seconds(120);
        let at_boundary = uploaded + ChronoDuration::seconds(60);

        assert!(check_download(&record(0, uploaded), at_boundary, 10, 60).is_ok());
        let msg = forbidden_message(check_download(
            &record(0, uploaded),
            at_boundary + ChronoDuration::seconds(1),
            10,
            60,
        ));
        assert!(msg.contains("expired"));
    }

    #[test]
    fn huge_ttl_never_expires() {
        let now = Utc::now();
        assert!(check_download(&record(0, now), now, 10, i64::MAX).is_ok());
    }

    #[test]
    fn unparsable_upload_time_fails_open() {
        let mut r = record(0, Utc::now());
        r.uploaded = "not a date".into();
        let far_future = Utc::now() + ChronoDuration::days(3650);
        assert!(check_download(&r, far_future, 10, 60).is_ok());
    }

    #[test]
    fn deleted_is_checked_before_quota() {
        let now = Utc::now();
        let mut r = record(100, now);
        r.deleted = true;
        assert!(forbidden_message(check_download(&r, now, 10, 60)).contains("deleted"));
    }

    #[tokio::test]
    async fn download_returns_signed_url_and_queues_bookkeeping() {
        let mut h = harness(FakeGateway::default());
        h.store.put_record(record(0, Utc::now()));

        let url = request_download(&h.state, "abc123", "10.0.0.9", Utc::now())
            .await
            .unwrap();
        assert_eq!(url, "https://signed.test/abc123/a.txt?ttl=3600");

        let job = h.jobs.try_recv().unwrap();
        assert_eq!(job.file_id, "abc123");
        assert_eq!(job.client_ip, "10.0.0.9");
        // Counter is untouched until the worker applies the job.
        assert_eq!(h.store.get_file("abc123").await.unwrap().unwrap().downloads, 0);
    }

    #[tokio::test]
    async fn download_of_unknown_id_is_not_found() {
        let h = harness(FakeGateway::default());
        assert!(matches!(
            request_download(&h.state, "nope", "10.0.0.9", Utc::now()).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn signing_failure_is_internal_and_queues_nothing() {
        let mut h = harness(FakeGateway {
            fail_sign: true,
            ..Default::default()
        });
        h.store.put_record(record(0, Utc::now()));

        assert!(matches!(
            request_download(&h.state, "abc123", "10.0.0.9", Utc::now()).await,
            Err(AppError::Internal(_))
        ));
        assert!(h.jobs.try_recv().is_err());
    }

    #[tokio::test]
    async fn delete_requires_matching_secret_and_succeeds_once() {
        let h = harness(FakeGateway::default());
        h.store.put_record(record(0, Utc::now()));

        assert!(matches!(
            delete_file(&h.state, "abc123", "wrong").await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(!h.store.get_file("abc123").await.unwrap().unwrap().deleted);

        delete_file(&h.state, "abc123", "secret").await.unwrap();
        assert!(h.store.get_file("abc123").await.unwrap().unwrap().deleted);

        assert!(matches!(
            delete_file(&h.state, "abc123", "secret").await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            delete_file(&h.state, "missing", "secret").await,
            Err(AppError::NotFound(_))
        ));
    }
}
