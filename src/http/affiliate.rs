use super::{parse_id, JsonBody};
use crate::auth::{AdminUser, SessionUser};
use crate::error::AppResult;
use crate::services::affiliate_service::{
    ConfirmSaleRequest, CreateLeadRequest, CreateProfileRequest, CreateSaleRequest,
    LeadListQuery, LeadStatusRequest, MetricsQuery, ProfileListQuery, RefundSaleRequest,
    RelationRequest, SaleListQuery,
};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

const INVALID_LEAD_ID: &str = "유효하지 않은 리드 ID입니다.";
const INVALID_SALE_ID: &str = "유효하지 않은 판매 ID입니다.";

/// `agent-metrics-2026-03-01.csv`
fn csv_file_name() -> String {
    format!("agent-metrics-{}.csv", Utc::now().format("%Y-%m-%d"))
}

pub async fn list_profiles(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
    Query(query): Query<ProfileListQuery>,
) -> AppResult<impl IntoResponse> {
    let profiles = state.affiliate_service.list_profiles(query).await?;
    Ok(Json(json!({ "ok": true, "profiles": profiles })))
}

pub async fn create_profile(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
    JsonBody(request): JsonBody<CreateProfileRequest>,
) -> AppResult<impl IntoResponse> {
    let profile = state.affiliate_service.create_profile(request).await?;
    Ok(Json(json!({ "ok": true, "profile": profile })))
}

pub async fn set_relation(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
    JsonBody(request): JsonBody<RelationRequest>,
) -> AppResult<impl IntoResponse> {
    let relation = state.affiliate_service.set_relation(request).await?;
    Ok(Json(json!({ "ok": true, "relation": relation })))
}

pub async fn list_leads(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
    Query(query): Query<LeadListQuery>,
) -> AppResult<impl IntoResponse> {
    let leads = state.affiliate_service.list_leads(query).await?;
    Ok(Json(json!({ "ok": true, "leads": leads })))
}

pub async fn create_lead(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
    JsonBody(request): JsonBody<CreateLeadRequest>,
) -> AppResult<impl IntoResponse> {
    let lead = state.affiliate_service.create_lead(request).await?;
    Ok(Json(json!({ "ok": true, "lead": lead })))
}

/// Open to managers and agents; the service decides who may touch the lead
pub async fn update_lead_status(
    State(state): State<Arc<AppState>>,
    SessionUser { user, .. }: SessionUser,
    Path(id): Path<String>,
    JsonBody(request): JsonBody<LeadStatusRequest>,
) -> AppResult<impl IntoResponse> {
    let lead_id = parse_id(&id, INVALID_LEAD_ID)?;
    let lead = state
        .affiliate_service
        .update_lead_status(&user, lead_id, request)
        .await?;
    Ok(Json(json!({ "ok": true, "lead": lead })))
}

pub async fn list_sales(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
    Query(query): Query<SaleListQuery>,
) -> AppResult<impl IntoResponse> {
    let sales = state.affiliate_service.list_sales(query).await?;
    Ok(Json(json!({ "ok": true, "sales": sales })))
}

pub async fn create_sale(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
    JsonBody(request): JsonBody<CreateSaleRequest>,
) -> AppResult<impl IntoResponse> {
    let sale = state.affiliate_service.create_sale(request).await?;
    Ok(Json(json!({ "ok": true, "sale": sale })))
}

pub async fn confirm_sale(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    request: Option<JsonBody<ConfirmSaleRequest>>,
) -> AppResult<impl IntoResponse> {
    let sale_id = parse_id(&id, INVALID_SALE_ID)?;
    let request = request.map(|JsonBody(r)| r).unwrap_or_default();
    let confirmed = state
        .affiliate_service
        .confirm_sale(admin.id, sale_id, request)
        .await?;
    Ok(Json(confirmed))
}

pub async fn refund_sale(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
    JsonBody(request): JsonBody<RefundSaleRequest>,
) -> AppResult<impl IntoResponse> {
    let sale_id = parse_id(&id, INVALID_SALE_ID)?;
    let refunded = state
        .affiliate_service
        .refund_sale(admin.id, sale_id, request)
        .await?;
    Ok(Json(refunded))
}

pub async fn cancel_refund(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let sale_id = parse_id(&id, INVALID_SALE_ID)?;
    let sale = state.affiliate_service.cancel_refund(admin.id, sale_id).await?;
    Ok(Json(json!({ "ok": true, "sale": sale })))
}

pub async fn agent_metrics(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
    Query(query): Query<MetricsQuery>,
) -> AppResult<Response> {
    let report = state.affiliate_service.agent_metrics(&query).await?;

    if query.wants_csv() {
        let headers = [
            (CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", csv_file_name()),
            ),
        ];
        return Ok((headers, report.to_csv()).into_response());
    }

    Ok(Json(report).into_response())
}

pub async fn team_metrics(
    State(state): State<Arc<AppState>>,
    AdminUser(_): AdminUser,
    Query(query): Query<MetricsQuery>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.affiliate_service.team_metrics(&query).await?))
}
