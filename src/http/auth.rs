use super::JsonBody;
use crate::auth::{clear_session_cookie, read_cookie, session_cookie, SessionUser};
use crate::error::AppResult;
use crate::services::auth_service::LoginRequest;
use crate::AppState;
use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use std::sync::Arc;

pub async fn login(
    State(state): State<Arc<AppState>>,
    JsonBody(request): JsonBody<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    let (session, user) = state.auth_service.login(request).await?;
    let cookie = session_cookie(&state.config.session, &session.id);

    Ok((
        [(SET_COOKIE, cookie)],
        Json(json!({
            "ok": true,
            "user": user,
            "csrfToken": session.csrf_token,
        })),
    ))
}

pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> AppResult<impl IntoResponse> {
    if let Some(session_id) = read_cookie(&headers, &state.config.session.cookie_name) {
        state.auth_service.logout(&session_id).await?;
    }

    Ok((
        [(SET_COOKIE, clear_session_cookie(&state.config.session))],
        Json(json!({ "ok": true })),
    ))
}

pub async fn me(State(state): State<Arc<AppState>>, SessionUser { session, user }: SessionUser) -> impl IntoResponse {
    state.auth_service.touch(&user).await;
    Json(json!({
        "ok": true,
        "user": user,
        "csrfToken": session.csrf_token,
    }))
}
