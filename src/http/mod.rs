//! HTTP API
//!
//! Every handler answers with a JSON body carrying `ok`; failures go through
//! [`AppError`]'s `IntoResponse` so callers always see `{ ok: false, error }`.

mod admin;
mod affiliate;
mod auth;
mod chatbot;
mod passport;

use crate::error::{AppError, AppResult};
use crate::AppState;
use axum::extract::{FromRequest, Request, State};
use axum::http::header::{CONTENT_TYPE, COOKIE};
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// JSON body whose rejection is reported as a 400 `{ ok: false }` body
pub struct JsonBody<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::Validation(rejection.body_text()))?;
        Ok(JsonBody(value))
    }
}

/// Numeric path segment
pub(crate) fn parse_id(raw: &str, message: &str) -> AppResult<i64> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::Validation(message.to_string()))
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE, COOKIE])
        .max_age(Duration::from_secs(60 * 60));

    let uploads = ServeDir::new(&state.config.passport.upload_dir);

    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
        // Sessions
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        // Passport collection
        .route("/api/admin/passport-request/send", post(passport::send))
        .route("/api/admin/passport-request/customers", get(passport::customers))
        .route("/api/passport/:token", get(passport::lookup))
        .route(
            "/api/passport/:token/upload",
            post(passport::upload).layer(passport::upload_body_limit()),
        )
        .route("/api/passport/:token/submit", post(passport::submit))
        // Affiliate network
        .route(
            "/api/admin/affiliate/profiles",
            get(affiliate::list_profiles).post(affiliate::create_profile),
        )
        .route("/api/admin/affiliate/relations", post(affiliate::set_relation))
        .route(
            "/api/admin/affiliate/leads",
            get(affiliate::list_leads).post(affiliate::create_lead),
        )
        .route("/api/affiliate/leads/:id/status", patch(affiliate::update_lead_status))
        .route(
            "/api/admin/affiliate/sales",
            get(affiliate::list_sales).post(affiliate::create_sale),
        )
        .route("/api/admin/affiliate/sales/:id/confirm", post(affiliate::confirm_sale))
        .route(
            "/api/admin/affiliate/sales/:id/refund",
            post(affiliate::refund_sale).delete(affiliate::cancel_refund),
        )
        .route("/api/admin/affiliate/agents/metrics", get(affiliate::agent_metrics))
        .route("/api/admin/affiliate/teams/metrics", get(affiliate::team_metrics))
        // Chat-bot
        .route("/api/chat-bot/start", get(chatbot::start))
        .route("/api/chat-bot/question/:id", get(chatbot::question))
        .route(
            "/api/chat-bot/session",
            post(chatbot::create_session).patch(chatbot::update_session),
        )
        .route(
            "/api/admin/chat-bot/flows",
            get(chatbot::list_flows).post(chatbot::create_flow),
        )
        .route("/api/admin/chat-bot/flows/:id/nodes", post(chatbot::save_flow))
        // Back office
        .route("/api/admin/dashboard", get(admin::dashboard))
        .route(
            "/api/admin/users/:id",
            get(admin::user_detail).delete(admin::delete_user),
        )
        .route("/api/admin/users/:id/lock", post(admin::lock_user))
        .route("/api/admin/users/:id/unlock", post(admin::unlock_user))
        .route(
            "/api/admin/scheduled-messages",
            get(admin::list_messages).post(admin::create_message),
        )
        .route(
            "/api/admin/scheduled-messages/:id",
            delete(admin::delete_message).put(admin::update_message),
        )
        .nest_service("/uploads", uploads)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness: the database answers
async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.database.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "ok": true, "database": "up" }))),
        Err(e) => {
            tracing::warn!("Readiness check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "ok": false, "database": "down" })),
            )
        }
    }
}
