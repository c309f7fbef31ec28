//! HTTP handlers for the admin upload API.
//!
//! Every handler checks the admin gate before looking at the body. Part
//! bytes never pass through here; clients PUT them to presigned URLs.

use crate::{
    errors::AppError,
    models::upload::{
        CompleteUploadResponse, CompletedPart, ConfigDiagnostics, CreateUploadResponse,
        PresignResponse,
    },
    services::{
        metadata_service::{MetadataError, NewMedia},
        naming::{is_allowed_path, is_allowed_video_type, is_safe_path, sanitize_file_name},
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::HeaderMap,
};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

/// Body of `POST /api/admin/uploads/create`. Fields are optional so that a
/// missing one is reported as such rather than as a malformed body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePayload {
    pub title: Option<String>,
    pub file_name: Option<String>,
    pub size_bytes: Option<u64>,
    pub content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePayload {
    pub media_id: Option<Uuid>,
    pub upload_id: Option<String>,
    pub object_key: Option<String>,
    pub size_bytes: Option<u64>,
    pub parts: Option<Vec<CompletedPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignPayload {
    pub media_id: Option<String>,
    pub path: Option<String>,
    pub content_type: Option<String>,
}

/// Open a multipart session and record the media item as `uploading`.
pub async fn create_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreatePayload>, JsonRejection>,
) -> Result<Json<CreateUploadResponse>, AppError> {
    authorize(&state, &headers)?;
    let Json(payload) = payload.map_err(invalid_request)?;

    let (Some(title), Some(file_name), Some(size_bytes), Some(content_type)) = (
        present(payload.title),
        present(payload.file_name),
        payload.size_bytes.filter(|s| *s > 0),
        present(payload.content_type),
    ) else {
        return Err(AppError::bad_request("Missing upload fields."));
    };
    if !is_allowed_video_type(&content_type) {
        return Err(AppError::bad_request("Unsupported video format."));
    }

    let media_id = Uuid::new_v4();
    let slug = state.metadata.unique_slug(&title, media_id).await?;
    let safe_name = match sanitize_file_name(&file_name) {
        name if name.is_empty() => format!("{slug}.mp4"),
        name => name,
    };
    let object_key = format!("videos/{media_id}/{safe_name}");

    let session = state
        .uploads
        .create_session(&object_key, &content_type, size_bytes)
        .await?;

    state
        .metadata
        .insert_uploading(NewMedia {
            id: media_id,
            slug: &slug,
            title: &title,
            object_key: &object_key,
            content_type: &content_type,
            size_bytes,
        })
        .await?;

    info!(%media_id, %slug, parts = session.total_parts, "upload session opened");
    Ok(Json(CreateUploadResponse {
        media_id,
        slug,
        session,
    }))
}

/// Commit the parts at the provider, then mark the media item `ready`.
/// The media item must exist and own the key before anything is committed.
pub async fn complete_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CompletePayload>, JsonRejection>,
) -> Result<Json<CompleteUploadResponse>, AppError> {
    authorize(&state, &headers)?;
    let Json(payload) = payload.map_err(invalid_request)?;

    let (Some(media_id), Some(upload_id), Some(object_key), Some(size_bytes), Some(parts)) = (
        payload.media_id,
        present(payload.upload_id),
        present(payload.object_key),
        payload.size_bytes.filter(|s| *s > 0),
        payload.parts.filter(|p| !p.is_empty()),
    ) else {
        return Err(AppError::bad_request("Missing completion fields."));
    };

    let media = match state.metadata.get(media_id).await {
        Ok(media) => media,
        Err(MetadataError::NotFound(_)) => {
            return Err(AppError::bad_request("Unknown media id."));
        }
        Err(err) => return Err(err.into()),
    };
    if media.object_key != object_key {
        warn!(%media_id, object_key = %object_key, "completion key does not match media item");
        return Err(AppError::bad_request("Object key does not match media item."));
    }

    state
        .uploads
        .complete_upload(&object_key, &upload_id, &parts)
        .await?;
    state.metadata.mark_ready(media_id, size_bytes).await?;

    info!(%media_id, size_bytes, "media ready");
    Ok(Json(CompleteUploadResponse { ok: true }))
}

/// Presigned PUT for a derived asset of an existing media item.
pub async fn presign_upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<PresignPayload>, JsonRejection>,
) -> Result<Json<PresignResponse>, AppError> {
    authorize(&state, &headers)?;
    state.uploads.settings()?;
    let Json(payload) = payload.map_err(invalid_request)?;

    let trimmed = |v: Option<String>| present(v.map(|s| s.trim().to_string()));
    let (Some(media_id), Some(path), Some(content_type)) = (
        trimmed(payload.media_id),
        trimmed(payload.path),
        trimmed(payload.content_type),
    ) else {
        return Err(AppError::bad_request("Missing upload fields."));
    };
    let Ok(media_id) = Uuid::parse_str(&media_id) else {
        return Err(AppError::bad_request("Invalid media id."));
    };
    if !is_safe_path(&path) || !is_allowed_path(&path) {
        return Err(AppError::bad_request("Invalid upload path."));
    }

    let object_key = format!("videos/{media_id}/{path}");
    let upload_url = state.uploads.presign_object_upload(&object_key, &content_type)?;
    Ok(Json(PresignResponse {
        upload_url,
        object_key,
    }))
}

/// Storage settings with secrets reduced to their length and last characters.
pub async fn upload_diagnostics(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ConfigDiagnostics>, AppError> {
    authorize(&state, &headers)?;
    Ok(Json(state.uploads.diagnostics()))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    if state.gate.is_authorized(headers) {
        Ok(())
    } else {
        warn!("rejected admin request without a valid key");
        Err(AppError::forbidden())
    }
}

fn invalid_request(rejection: JsonRejection) -> AppError {
    warn!("unreadable request body: {}", rejection.body_text());
    AppError::bad_request("Invalid request.")
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
