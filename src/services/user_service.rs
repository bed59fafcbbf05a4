//! Account administration and the admin dashboard

use crate::error::{AppError, AppResult};
use crate::models::{PassportRequestLog, PassportSubmission, PasswordEvent, Trip, User};
use crate::repositories::affiliate_repository::{SaleTotals, StatusCount};
use crate::repositories::user_repository::UserCounts;
use crate::repositories::{AffiliateRepository, PassportRepository, TripRepository, UserRepository};
use crate::services::input::clean;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Lock reason recorded by administrators when none is given
pub const ADMIN_LOCK_REASON: &str = "admin_lock";
/// Lock reason recorded by housekeeping once a trip is over
pub const TRIP_ENDED_LOCK_REASON: &str = "trip_ended";

const DETAIL_LOG_LIMIT: i64 = 20;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDetail {
    pub ok: bool,
    pub user: User,
    pub trips: Vec<Trip>,
    pub passport: Option<PassportSubmission>,
    pub passport_logs: Vec<PassportRequestLog>,
    pub password_events: Vec<PasswordEvent>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LockRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub ok: bool,
    #[serde(flatten)]
    pub counts: UserCounts,
    pub lead_status_counts: Vec<StatusCount>,
    pub confirmed_sales: SaleTotals,
}

pub struct UserService {
    user_repo: Arc<UserRepository>,
    trip_repo: Arc<TripRepository>,
    passport_repo: Arc<PassportRepository>,
    affiliate_repo: Arc<AffiliateRepository>,
}

impl UserService {
    pub fn new(
        user_repo: Arc<UserRepository>,
        trip_repo: Arc<TripRepository>,
        passport_repo: Arc<PassportRepository>,
        affiliate_repo: Arc<AffiliateRepository>,
    ) -> Self {
        Self {
            user_repo,
            trip_repo,
            passport_repo,
            affiliate_repo,
        }
    }

    async fn require_user(&self, user_id: i64) -> AppResult<User> {
        self.user_repo
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("사용자를 찾을 수 없습니다.".to_string()))
    }

    pub async fn detail(&self, user_id: i64) -> AppResult<UserDetail> {
        let user = self.require_user(user_id).await?;

        let (trips, passport, passport_logs, password_events) = futures::try_join!(
            self.trip_repo.find_by_user(user_id),
            self.passport_repo.latest_submission(user_id),
            self.passport_repo.logs_for_user(user_id, DETAIL_LOG_LIMIT),
            self.user_repo.password_events(user_id),
        )?;

        Ok(UserDetail {
            ok: true,
            user,
            trips,
            passport,
            passport_logs,
            password_events,
        })
    }

    /// Remove a customer and everything hanging off the account
    pub async fn delete(&self, admin: &User, user_id: i64) -> AppResult<()> {
        let user = self.require_user(user_id).await?;
        if user.is_admin() {
            return Err(AppError::Forbidden("관리자 계정은 삭제할 수 없습니다.".to_string()));
        }

        self.user_repo.delete_with_dependents(user_id).await?;
        info!("Admin {} deleted user {}", admin.id, user_id);
        Ok(())
    }

    pub async fn lock(&self, admin: &User, user_id: i64, request: LockRequest) -> AppResult<User> {
        let user = self.require_user(user_id).await?;
        if user.is_admin() {
            return Err(AppError::Forbidden("관리자 계정은 잠글 수 없습니다.".to_string()));
        }

        let reason = clean(request.reason.as_deref()).unwrap_or_else(|| ADMIN_LOCK_REASON.to_string());
        let locked = self.user_repo.lock(user_id, &reason, Some(admin.id)).await?;
        info!("Admin {} locked user {} ({})", admin.id, user_id, reason);
        Ok(locked)
    }

    pub async fn unlock(&self, admin: &User, user_id: i64) -> AppResult<User> {
        let unlocked = self.user_repo.unlock(user_id, Some(admin.id)).await?;
        info!("Admin {} unlocked user {}", admin.id, user_id);
        Ok(unlocked)
    }

    pub async fn dashboard(&self) -> AppResult<Dashboard> {
        let (counts, lead_status_counts, confirmed_sales) = futures::try_join!(
            self.user_repo.counts(Utc::now()),
            self.affiliate_repo.lead_status_counts(),
            self.affiliate_repo.counted_sale_totals(),
        )?;

        Ok(Dashboard {
            ok: true,
            counts,
            lead_status_counts,
            confirmed_sales,
        })
    }

    /// Lock every customer whose trip ended more than a day ago.
    /// Returns the number of accounts locked.
    pub async fn lock_finished_trips(&self) -> AppResult<usize> {
        let cutoff = Utc::now() - Duration::days(1);
        let users = self.user_repo.find_trip_ended_unlocked(cutoff).await?;

        let mut locked = 0;
        for user in users {
            self.user_repo.lock(user.id, TRIP_ENDED_LOCK_REASON, None).await?;
            locked += 1;
        }

        Ok(locked)
    }

    pub async fn purge_expired_sessions(&self) -> AppResult<u64> {
        Ok(self.user_repo.purge_expired_sessions(Utc::now()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_dashboard_flattens_counts() {
        let dashboard = Dashboard {
            ok: true,
            counts: UserCounts {
                total_users: 12,
                locked_users: 2,
                ..Default::default()
            },
            lead_status_counts: vec![StatusCount {
                status: "NEW".to_string(),
                count: 4,
            }],
            confirmed_sales: SaleTotals {
                count: 1,
                sale_amount: Decimal::from(1_000_000),
                net_revenue: Decimal::from(200_000),
            },
        };

        let value = serde_json::to_value(&dashboard).unwrap();
        assert_eq!(value["totalUsers"], 12);
        assert_eq!(value["lockedUsers"], 2);
        assert_eq!(value["leadStatusCounts"][0]["status"], "NEW");
        assert_eq!(value["confirmedSales"]["count"], 1);
    }

    #[test]
    fn test_lock_request_reason_is_optional() {
        let req: LockRequest = serde_json::from_str("{}").unwrap();
        assert!(req.reason.is_none());
    }
}
