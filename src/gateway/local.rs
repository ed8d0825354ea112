use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{GatewayError, GatewayResult, ObjectGateway};

type HmacSha256 = Hmac<Sha256>;

/// Filesystem gateway. Signed URLs point back at this service's `/blob` route
/// and carry an HMAC-SHA256 over the key and expiry.
#[derive(Clone)]
pub struct LocalGateway {
    base_path: PathBuf,
    base_url: String,
    signing_key: Vec<u8>,
}

impl LocalGateway {
    pub async fn new(
        base_path: impl Into<PathBuf>,
        base_url: String,
        signing_key_path: impl AsRef<Path>,
    ) -> GatewayResult<Self> {
        let signing_key_path = signing_key_path.as_ref();
        let signing_key = fs::read(signing_key_path).await.map_err(|e| {
            GatewayError::Config(format!(
                "Failed to read signing key {}: {}",
                signing_key_path.display(),
                e
            ))
        })?;
        Self::with_key(base_path, base_url, signing_key).await
    }

    pub async fn with_key(
        base_path: impl Into<PathBuf>,
        base_url: String,
        signing_key: Vec<u8>,
    ) -> GatewayResult<Self> {
        if signing_key.is_empty() {
            return Err(GatewayError::Config("Signing key is empty".into()));
        }

        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await.map_err(|e| {
            GatewayError::Config(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(Self {
            base_path,
            base_url,
            signing_key,
        })
    }

    /// Rejects keys that could escape the storage directory.
    fn key_to_path(&self, key: &str) -> GatewayResult<PathBuf> {
        let bad_segment = key
            .split('/')
            .any(|s| s.is_empty() || s == "." || s == "..");
        if bad_segment || key.starts_with('/') || key.contains('\\') {
            return Err(GatewayError::InvalidKey(key.to_string()));
        }
        Ok(self.base_path.join(key))
    }

    fn mac_for(&self, key: &str, expires: i64) -> GatewayResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|e| GatewayError::SigningFailed(e.to_string()))?;
        mac.update(format!("GET\n{}\n{}", key, expires).as_bytes());
        Ok(mac)
    }

    /// True when `signature` matches `key` and `expires` has not passed at `now`.
    pub fn verify(&self, key: &str, expires: i64, signature: &str, now: i64) -> bool {
        if expires < now {
            return false;
        }
        let Ok(provided) = hex::decode(signature) else {
            return false;
        };
        match self.mac_for(key, expires) {
            Ok(mac) => mac.verify_slice(&provided).is_ok(),
            Err(_) => false,
        }
    }

    /// Opens a stored object for streaming, returning the file and its length.
    pub async fn open(&self, key: &str) -> GatewayResult<(fs::File, u64)> {
        let path = self.key_to_path(key)?;
        let file = match fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GatewayError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    fn url_for(&self, key: &str, expires: i64, signature: &str) -> String {
        let encoded: Vec<String> = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!(
            "{}/blob/{}?expires={}&signature={}",
            self.base_url.trim_end_matches('/'),
            encoded.join("/"),
            expires,
            signature
        )
    }
}

#[async_trait]
impl ObjectGateway for LocalGateway {
    async fn put(&self, key: &str, data: Bytes) -> GatewayResult<()> {
        let path = self.key_to_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&path).await.map_err(|e| {
            GatewayError::UploadFailed(format!("Failed to create {}: {}", path.display(), e))
        })?;
        file.write_all(&data).await.map_err(|e| {
            GatewayError::UploadFailed(format!("Failed to write {}: {}", path.display(), e))
        })?;
        file.sync_all().await?;

        tracing::info!(
            path = %path.display(),
            key = %key,
            size_bytes = data.len(),
            "Local object written"
        );
        Ok(())
    }

    async fn grant_public_read(&self, key: &str) -> GatewayResult<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let path = self.key_to_path(key)?;
            fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).await?;
        }
        #[cfg(not(unix))]
        let _ = key;
        Ok(())
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> GatewayResult<String> {
        self.key_to_path(key)?;
        let ttl_secs = i64::try_from(ttl.as_secs())
            .map_err(|_| GatewayError::SigningFailed("ttl out of range".into()))?;
        let expires = Utc::now().timestamp().saturating_add(ttl_secs);
        let signature = hex::encode(self.mac_for(key, expires)?.finalize().into_bytes());
        Ok(self.url_for(key, expires, &signature))
    }

    async fn delete(&self, key: &str) -> GatewayResult<()> {
        let path = self.key_to_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
