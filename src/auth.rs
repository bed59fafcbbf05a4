//! Session authentication
//!
//! Passwords are argon2 hashes. A login creates a row in `sessions` whose id
//! travels in the HTTP-only `cg.sid.v2` cookie; the extractors below resolve
//! that cookie back to a user on every request.

use crate::config::SessionConfig;
use crate::error::{AppError, AppResult};
use crate::models::{Session, User};
use crate::AppState;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::extract::FromRequestParts;
use axum::http::header::COOKIE;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use chrono::Utc;
use cookie::{Cookie, SameSite};
use rand::RngCore;
use std::sync::Arc;
use tracing::{debug, warn};

/// Bytes of randomness behind a session id
pub const SESSION_TOKEN_BYTES: usize = 32;

/// Random hex token of `bytes` bytes (`2 * bytes` characters)
pub fn generate_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

pub fn hash_password(password: &str) -> AppResult<String> {
    let mut salt_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::Message(format!("Salt encoding failed: {}", e)))?;

    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Message(format!("Password hashing failed: {}", e)))?;

    Ok(hash.to_string())
}

/// False for a wrong password or an unparseable stored hash
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!("Stored password hash is not a valid PHC string: {}", e);
            false
        }
    }
}

/// `Set-Cookie` value carrying a new session id
pub fn session_cookie(config: &SessionConfig, session_id: &str) -> String {
    Cookie::build((config.cookie_name.clone(), session_id.to_string()))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .secure(config.cookie_secure)
        .max_age(cookie::time::Duration::days(config.ttl_days))
        .build()
        .to_string()
}

/// `Set-Cookie` value that makes the browser drop the session cookie
pub fn clear_session_cookie(config: &SessionConfig) -> String {
    let mut cookie = Cookie::build((config.cookie_name.clone(), String::new()))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .build();
    cookie.make_removal();
    cookie.to_string()
}

/// Value of the named cookie across all `Cookie` headers
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| Cookie::split_parse(raw.to_string()))
        .filter_map(Result::ok)
        .find(|c| c.name() == name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

/// Resolve the session cookie to a live session and an unlocked user
pub async fn resolve_session(state: &AppState, headers: &HeaderMap) -> AppResult<Option<(Session, User)>> {
    let Some(session_id) = read_cookie(headers, &state.config.session.cookie_name) else {
        return Ok(None);
    };

    let Some(session) = state.user_repo.find_session(&session_id).await? else {
        debug!("Unknown session id presented");
        return Ok(None);
    };

    if session.is_expired(Utc::now()) {
        state.user_repo.delete_session(&session.id).await?;
        return Ok(None);
    }

    let Some(user) = state.user_repo.find_by_id(session.user_id).await? else {
        return Ok(None);
    };

    if user.is_locked {
        return Ok(None);
    }

    Ok(Some((session, user)))
}

/// Any logged-in user. Rejects with 401.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub session: Session,
    pub user: User,
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for SessionUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        match resolve_session(state, &parts.headers).await? {
            Some((session, user)) => Ok(SessionUser { session, user }),
            None => Err(AppError::Unauthorized("로그인이 필요합니다.".to_string())),
        }
    }
}

/// Logged-in admin. Rejects with 401 without a session and 403 for other roles.
#[derive(Debug, Clone)]
pub struct AdminUser(pub User);

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let SessionUser { user, .. } = SessionUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(AppError::Forbidden("관리자 권한이 필요합니다.".to_string()));
        }
        Ok(AdminUser(user))
    }
}

/// Session user when there is one; never rejects
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let user = resolve_session(state, &parts.headers)
            .await
            .unwrap_or_else(|e| {
                warn!("Session lookup failed: {}", e);
                None
            })
            .map(|(_, user)| user);
        Ok(MaybeUser(user))
    }
}
