use anyhow::{bail, Context};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Gcs,
    S3,
    Local,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Gcs => "gcs",
            StorageBackend::S3 => "s3",
            StorageBackend::Local => "local",
        }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gcs" | "google" => Ok(StorageBackend::Gcs),
            "s3" => Ok(StorageBackend::S3),
            "local" => Ok(StorageBackend::Local),
            other => bail!("unknown STORAGE_BACKEND '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: String,
    pub storage_backend: StorageBackend,
    pub gcs_bucket: Option<String>,
    pub gcs_service_account_path: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: String,
    pub s3_endpoint: Option<String>,
    pub local_storage_dir: String,
    pub public_base_url: String,
    pub signing_key_path: Option<String>,
    /// Downloads allowed before a file is blocked. The check is `downloads > max`.
    pub max_downloads: i64,
    pub max_upload_size: u64,
    pub file_ttl_secs: i64,
    pub signed_url_ttl_secs: u64,
    pub store_timeout_secs: u64,
    pub bookkeeping_queue_capacity: usize,
    pub cors_allowed_origins: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let storage_backend: StorageBackend = env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".into())
            .parse()?;

        let port = env::var("PORT")
            .unwrap_or_else(|_| "8081".into())
            .parse()
            .context("PORT must be a number")?;

        let config = Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://filedrop.db?mode=rwc".into()),
            storage_backend,
            gcs_bucket: env::var("GCS_BUCKET").ok(),
            gcs_service_account_path: env::var("GCS_SERVICE_ACCOUNT_PATH").ok(),
            s3_bucket: env::var("S3_BUCKET").ok(),
            s3_region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".into()),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            local_storage_dir: env::var("LOCAL_STORAGE_DIR").unwrap_or_else(|_| "./data".into()),
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8081".into()),
            signing_key_path: env::var("SIGNING_KEY_PATH").ok(),
            max_downloads: parse_env("MAX_UNVERIFIED_DOWNLOADS", 10),
            max_upload_size: parse_env("MAX_UPLOAD_SIZE", 104_857_600),
            file_ttl_secs: parse_env("FILE_TTL_SECS", 86_400),
            signed_url_ttl_secs: parse_env("SIGNED_URL_TTL_SECS", 3600),
            store_timeout_secs: parse_env("STORE_TIMEOUT_SECS", 30),
            bookkeeping_queue_capacity: parse_env("BOOKKEEPING_QUEUE_CAPACITY", 1024),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".into()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks that the settings the selected backend depends on are present.
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.storage_backend {
            StorageBackend::Gcs => {
                if self.gcs_bucket.is_none() {
                    bail!("GCS_BUCKET must be set for the gcs backend");
                }
                if self.gcs_service_account_path.is_none() {
                    bail!("GCS_SERVICE_ACCOUNT_PATH must be set for the gcs backend");
                }
            }
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    bail!("S3_BUCKET must be set for the s3 backend");
                }
            }
            StorageBackend::Local => {
                if self.signing_key_path.is_none() {
                    bail!("SIGNING_KEY_PATH must be set for the local backend");
                }
            }
        }
        Ok(())
    }

    pub fn local_storage_path(&self) -> PathBuf {
        PathBuf::from(&self.local_storage_dir)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.signed_url_ttl_secs)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Local-backend settings with short limits, for unit tests.
#[cfg(test)]
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        host: "127.0.0.1".into(),
        port: 0,
        log_level: "error".into(),
        database_url: "sqlite::memory:".into(),
        storage_backend: StorageBackend::Local,
        gcs_bucket: None,
        gcs_service_account_path: None,
        s3_bucket: None,
        s3_region: "us-east-1".into(),
        s3_endpoint: None,
        local_storage_dir: "./data".into(),
        public_base_url: "http://localhost:8081".into(),
        signing_key_path: Some("key.pem".into()),
        max_downloads: 10,
        max_upload_size: 1024,
        file_ttl_secs: 60,
        signed_url_ttl_secs: 3600,
        store_timeout_secs: 5,
        bookkeeping_queue_capacity: 16,
        cors_allowed_origins: "*".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_parse() {
        assert_eq!("gcs".parse::<StorageBackend>().unwrap(), StorageBackend::Gcs);
        assert_eq!("S3".parse::<StorageBackend>().unwrap(), StorageBackend::S3);
        assert_eq!("local".parse::<StorageBackend>().unwrap(), StorageBackend::Local);
        assert!("ftp".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn gcs_backend_requires_bucket_and_key() {
        let mut config = test_config();
        config.storage_backend = StorageBackend::Gcs;
        assert!(config.validate().is_err());

        config.gcs_bucket = Some("bucket".into());
        assert!(config.validate().is_err());

        config.gcs_service_account_path = Some("sa.json".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn local_backend_requires_signing_key() {
        let mut config = test_config();
        assert!(config.validate().is_ok());
        config.signing_key_path = None;
        assert!(config.validate().is_err());
    }
}
