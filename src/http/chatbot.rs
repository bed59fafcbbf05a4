use super::{parse_id, JsonBody};
use crate::auth::{AdminUser, MaybeUser};
use crate::error::AppResult;
use crate::services::chatbot_service::{
    CreateFlowRequest, CreateSessionRequest, SaveFlowRequest, UpdateSessionRequest,
};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProductQuery {
    pub product_code: Option<String>,
}

pub async fn start(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    Query(query): Query<ProductQuery>,
) -> AppResult<impl IntoResponse> {
    let response = state
        .chatbot_service
        .start(user.as_ref(), query.product_code.as_deref())
        .await?;
    Ok(Json(response))
}

pub async fn question(
    State(state): State<Arc<AppState>>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<String>,
    Query(query): Query<ProductQuery>,
) -> AppResult<impl IntoResponse> {
    let question_id = parse_id(&id, "유효하지 않은 질문 ID입니다.")?;
    let response = state
        .chatbot_service
        .question(user.as_ref(), question_id, query.product_code.as_deref())
        .await?;
    Ok(Json(response))
}

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    JsonBody(request): JsonBody<CreateSessionRequest>,
) -> AppResult<impl IntoResponse> {
    let session = state.chatbot_service.create_session(request).await?;
    Ok(Json(json!({ "ok": true, "data": session })))
}

pub async fn update_session(
    State(state): State<Arc<AppState>>,
    JsonBody(request): JsonBody<UpdateSessionRequest>,
) -> AppResult<impl IntoResponse> {
    let session = state.chatbot_service.update_session(request).await?;
    Ok(Json(json!({ "ok": true, "data": session })))
}

pub async fn list_flows(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
) -> AppResult<impl IntoResponse> {
    let flows = state.chatbot_service.list_flows().await?;
    Ok(Json(json!({ "ok": true, "flows": flows })))
}

pub async fn create_flow(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
    JsonBody(request): JsonBody<CreateFlowRequest>,
) -> AppResult<impl IntoResponse> {
    let flow = state.chatbot_service.create_flow(request).await?;
    Ok(Json(json!({ "ok": true, "flow": flow })))
}

pub async fn save_flow(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
    Path(id): Path<String>,
    JsonBody(request): JsonBody<SaveFlowRequest>,
) -> AppResult<impl IntoResponse> {
    let flow_id = parse_id(&id, "유효하지 않은 플로우 ID입니다.")?;
    Ok(Json(state.chatbot_service.save_flow(flow_id, request).await?))
}
