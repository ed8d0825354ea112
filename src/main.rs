use anyhow::Context;
use filedrop::background::bookkeeping::{BookkeepingQueue, BookkeepingWorker};
use filedrop::config::{AppConfig, StorageBackend};
use filedrop::gateway::{LocalGateway, ObjectGateway, ObjectStoreGateway};
use filedrop::metadata::{MetadataStore, SqlMetadataStore};
use filedrop::routes;
use filedrop::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = AppConfig::from_env().context("Invalid configuration")?;

    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    tracing::info!("Starting filedrop v{}", env!("CARGO_PKG_VERSION"));

    let metadata = SqlMetadataStore::connect(&config.database_url, config.store_timeout())
        .await
        .context("Failed to open metadata store")?;

    let (bookkeeping, jobs) = BookkeepingQueue::new(config.bookkeeping_queue_capacity);
    let state = build_state(config.clone(), Arc::new(metadata), bookkeeping).await?;

    tracing::info!(
        backend = config.storage_backend.as_str(),
        max_downloads = config.max_downloads,
        file_ttl_secs = config.file_ttl_secs,
        "Object storage ready"
    );

    let bookkeeping = BookkeepingWorker::spawn(state.clone(), jobs);

    let app = routes::build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    // Handlers can no longer queue jobs once serve has returned.
    tracing::info!("Waiting for bookkeeping to drain");
    bookkeeping.drain().await;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn build_state(
    config: AppConfig,
    metadata: Arc<dyn MetadataStore>,
    bookkeeping: BookkeepingQueue,
) -> anyhow::Result<AppState> {
    let state = match config.storage_backend {
        StorageBackend::Local => {
            let key_path = config
                .signing_key_path
                .clone()
                .context("SIGNING_KEY_PATH must be set for the local backend")?;
            let local = LocalGateway::new(
                config.local_storage_path(),
                config.public_base_url.clone(),
                key_path,
            )
            .await
            .context("Failed to initialise local object storage")?;
            let local = Arc::new(local);
            AppState::new(config, metadata, local.clone(), bookkeeping).with_local_gateway(local)
        }
        StorageBackend::Gcs => {
            let bucket = config.gcs_bucket.clone().context("GCS_BUCKET must be set")?;
            let key_path = config
                .gcs_service_account_path
                .clone()
                .context("GCS_SERVICE_ACCOUNT_PATH must be set")?;
            let gateway: Arc<dyn ObjectGateway> = Arc::new(
                ObjectStoreGateway::gcs(bucket, &key_path)
                    .context("Failed to build Google Cloud Storage client")?,
            );
            AppState::new(config, metadata, gateway, bookkeeping)
        }
        StorageBackend::S3 => {
            let bucket = config.s3_bucket.clone().context("S3_BUCKET must be set")?;
            let gateway: Arc<dyn ObjectGateway> = Arc::new(
                ObjectStoreGateway::s3(bucket, config.s3_region.clone(), config.s3_endpoint.clone())
                    .context("Failed to build S3 client")?,
            );
            AppState::new(config, metadata, gateway, bookkeeping)
        }
    };
    Ok(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
