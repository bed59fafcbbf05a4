use super::JsonBody;
use crate::auth::AdminUser;
use crate::error::{AppError, AppResult};
use crate::services::passport_service::{
    CustomerParams, SendRequest, SubmitRequest, UploadedFile, MAX_UPLOAD_BYTES, MAX_UPLOAD_FILES,
};
use crate::AppState;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use std::sync::Arc;

const UPLOAD_FIELD: &str = "files";

/// Room for a full batch of maximum-size files plus multipart framing
pub fn upload_body_limit() -> DefaultBodyLimit {
    DefaultBodyLimit::max(MAX_UPLOAD_FILES * MAX_UPLOAD_BYTES + 1024 * 1024)
}

pub async fn send(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    JsonBody(request): JsonBody<SendRequest>,
) -> AppResult<impl IntoResponse> {
    let response = state.passport_service.send(admin.id, request).await?;
    Ok(Json(response))
}

pub async fn customers(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
    Query(params): Query<CustomerParams>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.passport_service.customers(params).await?))
}

pub async fn lookup(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.passport_service.lookup(&token).await?))
}

pub async fn upload(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    mut multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(e.body_text()))?;

        files.push(UploadedFile {
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        });
    }

    let stored = state.passport_service.upload(&token, files).await?;
    Ok(Json(json!({ "ok": true, "files": stored })))
}

pub async fn submit(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    JsonBody(request): JsonBody<SubmitRequest>,
) -> AppResult<impl IntoResponse> {
    let submission = state.passport_service.submit(&token, request).await?;
    Ok(Json(json!({
        "ok": true,
        "submission": {
            "id": submission.id,
            "isSubmitted": submission.is_submitted,
            "submittedAt": submission.submitted_at,
        },
    })))
}
