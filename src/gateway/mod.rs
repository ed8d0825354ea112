//! Object storage for uploaded bytes.
//!
//! Objects are addressed by `{public_id}/{filename}`. The gateway has no notion
//! of deletion state; that lives entirely in the metadata store.

pub mod cloud;
pub mod local;

use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::time::Duration;

pub use cloud::ObjectStoreGateway;
pub use local::LocalGateway;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Object store timed out")]
    Timeout,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Bounds a gateway call by `limit`.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> GatewayResult<T>
where
    F: Future<Output = GatewayResult<T>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| GatewayError::Timeout)?
}

pub fn object_key(public_id: &str, filename: &str) -> String {
    format!("{}/{}", public_id, filename)
}

#[async_trait]
pub trait ObjectGateway: Send + Sync {
    async fn put(&self, key: &str, data: Bytes) -> GatewayResult<()>;

    /// Makes a stored object readable without credentials. Runs after `put` as a
    /// separate step, so an object can briefly exist without it.
    async fn grant_public_read(&self, key: &str) -> GatewayResult<()>;

    /// Time-limited GET URL for `key`.
    async fn signed_url(&self, key: &str, ttl: Duration) -> GatewayResult<String>;

    async fn delete(&self, key: &str) -> GatewayResult<()>;

    fn backend_name(&self) -> &'static str;
}
