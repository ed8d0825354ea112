pub mod blobs;
pub mod client_ip;
pub mod files;
pub mod health;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn build_router(state: AppState) -> Router {
    let body_limit = (state.config.max_upload_size as usize).saturating_add(MULTIPART_OVERHEAD);
    let cors = cors_layer(&state.config.cors_allowed_origins);

    let x_request_id = http::HeaderName::from_static("x-request-id");

    Router::new()
        .route("/health", get(health::health))
        .route("/status", get(health::status))
        .route("/", post(files::upload_file))
        .route("/{id}", get(files::download_file))
        .route("/{id}/{delete_id}", delete(files::delete_file))
        .route("/blob/{id}/{*filename}", get(blobs::get_blob))
        .layer(cors)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed: &str) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if allowed.trim() == "*" {
        return base.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .filter_map(|o| o.parse().ok())
        .collect();
    base.allow_origin(AllowOrigin::list(origins))
}
