use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use tokio_util::io::ReaderStream;

use crate::error::AppError;
use crate::gateway::{object_key, GatewayError};
use crate::models::file::BlobQuery;
use crate::state::AppState;

/// Serves bytes behind a URL signed by the local gateway.
pub async fn get_blob(
    State(state): State<AppState>,
    Path((id, filename)): Path<(String, String)>,
    Query(query): Query<BlobQuery>,
) -> Result<Response, AppError> {
    let local = state
        .local_blobs
        .as_ref()
        .ok_or_else(|| AppError::NotFound("local object storage is not enabled".into()))?;

    let key = object_key(&id, &filename);
    if !local.verify(&key, query.expires, &query.signature, Utc::now().timestamp()) {
        return Err(AppError::Forbidden("invalid or expired signature".into()));
    }

    let (file, len) = local.open(&key).await.map_err(|e| match e {
        GatewayError::NotFound(_) | GatewayError::InvalidKey(_) => {
            AppError::NotFound(format!("object not found: {}", key))
        }
        other => other.into(),
    })?;

    let content_type = mime_guess::from_path(&filename)
        .first_or_octet_stream()
        .to_string();
    let disposition = format!(
        "attachment; filename*=UTF-8''{}",
        urlencoding::encode(&filename)
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_LENGTH, len.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CACHE_CONTROL, "private, no-store".to_string()),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}
