//! Login, logout and session lookup

use crate::auth::{generate_token, verify_password, SESSION_TOKEN_BYTES};
use crate::config::SessionConfig;
use crate::error::{AppError, AppResult};
use crate::models::{Session, User};
use crate::repositories::UserRepository;
use crate::services::input::clean;
use chrono::{Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

const CSRF_TOKEN_BYTES: usize = 16;
const INVALID_CREDENTIALS: &str = "아이디 또는 비밀번호가 올바르지 않습니다.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginMode {
    Admin,
    #[default]
    User,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub mode: LoginMode,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
}

/// Digits of a phone number as typed on the login form
pub fn phone_digits(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

pub struct AuthService {
    user_repo: Arc<UserRepository>,
    config: SessionConfig,
}

impl AuthService {
    pub fn new(user_repo: Arc<UserRepository>, config: SessionConfig) -> Self {
        Self { user_repo, config }
    }

    /// Verify credentials and open a session
    pub async fn login(&self, request: LoginRequest) -> AppResult<(Session, User)> {
        let name = clean(request.name.as_deref())
            .ok_or_else(|| AppError::Validation("이름을 입력해주세요.".to_string()))?;
        let phone = request
            .phone
            .as_deref()
            .map(phone_digits)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::Validation("연락처를 입력해주세요.".to_string()))?;
        let password = request
            .password
            .filter(|p| !p.is_empty())
            .ok_or_else(|| AppError::Validation("비밀번호를 입력해주세요.".to_string()))?;

        let admin = request.mode == LoginMode::Admin;
        let Some(user) = self.user_repo.find_for_login(&name, &phone, admin).await? else {
            warn!("Login failed: no {} account for the given name/phone", if admin { "admin" } else { "user" });
            return Err(AppError::Unauthorized(INVALID_CREDENTIALS.to_string()));
        };

        if !verify_password(&password, &user.password_hash) {
            warn!("Login failed: wrong password for user {}", user.id);
            return Err(AppError::Unauthorized(INVALID_CREDENTIALS.to_string()));
        }

        if user.is_locked {
            return Err(AppError::Forbidden(
                "로그인이 불가능한 계정입니다. 관리자에게 문의해주세요.".to_string(),
            ));
        }

        let expires_at = Utc::now() + Duration::days(self.config.ttl_days);
        let session = self
            .user_repo
            .create_session(
                &generate_token(SESSION_TOKEN_BYTES),
                user.id,
                &generate_token(CSRF_TOKEN_BYTES),
                expires_at,
            )
            .await?;

        self.user_repo.record_login(user.id).await?;
        info!("User {} logged in ({})", user.id, user.role);

        Ok((session, user))
    }

    pub async fn logout(&self, session_id: &str) -> AppResult<()> {
        self.user_repo.delete_session(session_id).await?;
        Ok(())
    }

    /// Marks the user active; failures are only logged
    pub async fn touch(&self, user: &User) {
        if let Err(e) = self.user_repo.touch_last_active(user.id).await {
            warn!("Failed to update last activity for user {}: {}", user.id, e);
        }
    }
}
