use super::{parse_id, JsonBody};
use crate::auth::AdminUser;
use crate::error::AppResult;
use crate::services::scheduled_message_service::MessageRequest;
use crate::services::user_service::LockRequest;
use crate::AppState;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use std::sync::Arc;

const INVALID_USER_ID: &str = "유효하지 않은 사용자 ID입니다.";
const INVALID_MESSAGE_ID: &str = "Invalid message ID";

pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.user_service.dashboard().await?))
}

pub async fn user_detail(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let user_id = parse_id(&id, INVALID_USER_ID)?;
    Ok(Json(state.user_service.detail(user_id).await?))
}

pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let user_id = parse_id(&id, INVALID_USER_ID)?;
    state.user_service.delete(&admin, user_id).await?;
    Ok(Json(json!({ "ok": true, "deletedUserId": user_id })))
}

pub async fn lock_user(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    request: Option<JsonBody<LockRequest>>,
) -> AppResult<impl IntoResponse> {
    let user_id = parse_id(&id, INVALID_USER_ID)?;
    let request = request.map(|JsonBody(r)| r).unwrap_or_default();
    let user = state.user_service.lock(&admin, user_id, request).await?;
    Ok(Json(json!({ "ok": true, "user": user })))
}

pub async fn unlock_user(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let user_id = parse_id(&id, INVALID_USER_ID)?;
    let user = state.user_service.unlock(&admin, user_id).await?;
    Ok(Json(json!({ "ok": true, "user": user })))
}

pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
) -> AppResult<impl IntoResponse> {
    let messages = state.scheduled_message_service.list().await?;
    Ok(Json(json!({ "ok": true, "messages": messages })))
}

pub async fn create_message(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    JsonBody(request): JsonBody<MessageRequest>,
) -> AppResult<impl IntoResponse> {
    let message = state.scheduled_message_service.create(admin.id, request).await?;
    Ok(Json(json!({ "ok": true, "message": message })))
}

pub async fn update_message(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
    Path(id): Path<String>,
    JsonBody(request): JsonBody<MessageRequest>,
) -> AppResult<impl IntoResponse> {
    let message_id = parse_id(&id, INVALID_MESSAGE_ID)?;
    let message = state.scheduled_message_service.update(message_id, request).await?;
    Ok(Json(json!({ "ok": true, "message": message })))
}

pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let message_id = parse_id(&id, INVALID_MESSAGE_ID)?;
    state.scheduled_message_service.delete(message_id).await?;
    Ok(Json(json!({ "ok": true })))
}
