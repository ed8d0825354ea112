use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::gcp::{GoogleCloudStorage, GoogleCloudStorageBuilder};
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::Error as ObjectStoreError;
use object_store::{ObjectStore, ObjectStoreExt, PutPayload, Result as ObjectResult};
use std::time::Duration;

use super::{GatewayError, GatewayResult, ObjectGateway};

/// Gateway over any `object_store` backend that can also sign URLs.
#[derive(Debug)]
pub struct ObjectStoreGateway<S> {
    store: S,
    bucket: String,
    backend: &'static str,
}

impl ObjectStoreGateway<GoogleCloudStorage> {
    /// The service account key is read once here and also serves as the URL signing key.
    pub fn gcs(bucket: String, service_account_path: &str) -> GatewayResult<Self> {
        let store = GoogleCloudStorageBuilder::new()
            .with_bucket_name(bucket.clone())
            .with_service_account_path(service_account_path)
            .build()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        Ok(Self {
            store,
            bucket,
            backend: "gcs",
        })
    }
}

impl ObjectStoreGateway<AmazonS3> {
    pub fn s3(bucket: String, region: String, endpoint_url: Option<String>) -> GatewayResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(region)
            .with_bucket_name(bucket.clone());

        if let Some(endpoint) = endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder.with_endpoint(endpoint).with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        Ok(Self {
            store,
            bucket,
            backend: "s3",
        })
    }
}

#[async_trait]
impl<S> ObjectGateway for ObjectStoreGateway<S>
where
    S: ObjectStore + Signer,
{
    async fn put(&self, key: &str, data: Bytes) -> GatewayResult<()> {
        let location = Path::from(key);
        let size = data.len();
        let start = std::time::Instant::now();

        let result: ObjectResult<_> = self.store.put(&location, PutPayload::from(data)).await;

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %key,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Object upload failed"
            );
            GatewayError::UploadFailed(e.to_string())
        })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Object upload successful"
        );
        Ok(())
    }

    async fn grant_public_read(&self, key: &str) -> GatewayResult<()> {
        // object_store has no per-object ACL call; bucket policy decides visibility.
        tracing::debug!(
            bucket = %self.bucket,
            key = %key,
            "Public read left to bucket policy"
        );
        Ok(())
    }

    async fn signed_url(&self, key: &str, ttl: Duration) -> GatewayResult<String> {
        let location = Path::from(key);
        let url_result: ObjectResult<_> = self.store.signed_url(Method::GET, &location, ttl).await;

        let url = url_result
            .map_err(|e| GatewayError::SigningFailed(e.to_string()))?
            .to_string();
        Ok(url)
    }

    async fn delete(&self, key: &str) -> GatewayResult<()> {
        let location = Path::from(key);
        let result: ObjectResult<_> = self.store.delete(&location).await;

        match result {
            Ok(()) | Err(ObjectStoreError::NotFound { .. }) => Ok(()),
            Err(e) => Err(GatewayError::Backend(e.to_string())),
        }
    }

    fn backend_name(&self) -> &'static str {
        self.backend
    }
}
