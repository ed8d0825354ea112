//! Post-download bookkeeping.
//!
//! A granted download queues one job. The single worker applies the counter
//! increment and the audit append after the redirect has already gone out.
//! Delivery is at most once: a full queue drops the job, and a failed write is
//! logged and not retried.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::metadata::{with_timeout, MetadataStore};
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct DownloadGranted {
    pub file_id: String,
    pub client_ip: String,
    pub at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct BookkeepingQueue {
    tx: mpsc::Sender<DownloadGranted>,
}

impl BookkeepingQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DownloadGranted>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queues a job without waiting. Returns false if it was dropped.
    pub fn submit(&self, job: DownloadGranted) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(file_id = %job.file_id, "Bookkeeping queue full, dropping job");
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::warn!(file_id = %job.file_id, "Bookkeeping worker gone, dropping job");
                false
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Handle to a running worker. Its shutdown is independent of the HTTP
/// server's, so the caller drains it only once no handler can submit jobs.
pub struct BookkeepingWorker {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl BookkeepingWorker {
    pub fn spawn(state: AppState, jobs: mpsc::Receiver<DownloadGranted>) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(state, jobs, shutdown_rx));
        Self { handle, shutdown }
    }

    /// Applies every queued job, then stops the worker.
    pub async fn drain(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Bookkeeping worker panicked");
        }
    }
}

async fn run(
    state: AppState,
    mut jobs: mpsc::Receiver<DownloadGranted>,
    mut shutdown: watch::Receiver<bool>,
) {
    let timeout = state.config.store_timeout();

    loop {
        tokio::select! {
            job = jobs.recv() => match job {
                Some(job) => apply(state.metadata.as_ref(), &job, timeout).await,
                None => return,
            },
            _ = shutdown.changed() => {
                jobs.close();
                let mut drained = 0u64;
                while let Some(job) = jobs.recv().await {
                    apply(state.metadata.as_ref(), &job, timeout).await;
                    drained += 1;
                }
                tracing::info!(drained, "Bookkeeping worker shutting down");
                return;
            }
        }
    }
}

async fn apply(metadata: &dyn MetadataStore, job: &DownloadGranted, timeout: Duration) {
    if let Err(e) = with_timeout(timeout, metadata.increment_download_count(&job.file_id)).await {
        tracing::warn!(file_id = %job.file_id, error = %e, "Failed to increment download count");
    }

    if let Err(e) = with_timeout(
        timeout,
        metadata.record_download_event(&job.file_id, &job.client_ip, job.at),
    )
    .await
    {
        tracing::warn!(file_id = %job.file_id, error = %e, "Failed to record download event");
    }
}
