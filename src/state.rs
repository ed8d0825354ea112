use crate::background::bookkeeping::BookkeepingQueue;
use crate::config::AppConfig;
use crate::gateway::{LocalGateway, ObjectGateway};
use crate::metadata::MetadataStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub metadata: Arc<dyn MetadataStore>,
    pub gateway: Arc<dyn ObjectGateway>,
    /// Set only when the local backend is active; serves `/blob` requests.
    pub local_blobs: Option<Arc<LocalGateway>>,
    pub bookkeeping: BookkeepingQueue,
    pub config: Arc<AppConfig>,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        metadata: Arc<dyn MetadataStore>,
        gateway: Arc<dyn ObjectGateway>,
        bookkeeping: BookkeepingQueue,
    ) -> Self {
        Self {
            metadata,
            gateway,
            local_blobs: None,
            bookkeeping,
            config: Arc::new(config),
            start_time: chrono::Utc::now(),
        }
    }

    /// Uses `local` as the gateway and enables the `/blob` route for its signed URLs.
    pub fn with_local_gateway(mut self, local: Arc<LocalGateway>) -> Self {
        self.gateway = local.clone();
        self.local_blobs = Some(local);
        self
    }
}
