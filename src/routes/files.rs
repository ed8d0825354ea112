use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::Redirect;
use axum::Json;
use bytes::Bytes;
use chrono::Utc;

use crate::error::AppError;
use crate::models::file::UploadResponse;
use crate::routes::client_ip::ClientIp;
use crate::services::lifecycle;
use crate::state::AppState;

/// Multipart field names that carry the file.
const FILE_FIELDS: [&str; 2] = ["upload", "file"];

pub async fn upload_file(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let mut upload: Option<(String, Bytes)> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or("").to_string();
        if !FILE_FIELDS.contains(&name.as_str()) {
            continue;
        }
        let filename = field.file_name().unwrap_or("").to_string();
        let data = field.bytes().await.map_err(multipart_error)?;
        upload = Some((filename, data));
        break;
    }

    let (filename, data) =
        upload.ok_or_else(|| AppError::BadRequest("no file provided".into()))?;

    let created = lifecycle::upload(&state, &filename, data, &ip).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ClientIp(ip): ClientIp,
) -> Result<Redirect, AppError> {
    let url = lifecycle::request_download(&state, &id, &ip, Utc::now()).await?;
    Ok(Redirect::temporary(&url))
}

pub async fn delete_file(
    State(state): State<AppState>,
    Path((id, delete_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    lifecycle::delete_file(&state, &id, &delete_id).await?;
    Ok(StatusCode::ACCEPTED)
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(e.body_text())
    } else {
        AppError::BadRequest(format!("invalid multipart data: {}", e.body_text()))
    }
}
