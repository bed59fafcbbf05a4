//! Repository for accounts, login sessions and account administration

use crate::error::RepositoryError;
use crate::models::{PasswordEvent, Session, User, UserRole};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};

/// Head counts shown on the admin dashboard
#[derive(Debug, Clone, Default, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserCounts {
    pub total_users: i64,
    pub guide_users: i64,
    pub community_users: i64,
    pub locked_users: i64,
    pub active_trips: i64,
    pub pending_passports: i64,
    pub submitted_passports: i64,
}

/// Repository for user data access
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    /// Create a new UserRepository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new user
    pub async fn create(
        &self,
        name: Option<&str>,
        phone: Option<&str>,
        email: Option<&str>,
        password_hash: &str,
        role: UserRole,
    ) -> Result<User, RepositoryError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, phone, email, password_hash, role)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(phone)
        .bind(email)
        .bind(password_hash)
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    /// Find a user by id
    pub async fn find_by_id(&self, id: i64) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    /// Find the login candidate for a name and phone pair.
    /// Phones are compared digit-only so `010-1234-5678` matches `01012345678`.
    pub async fn find_for_login(
        &self,
        name: &str,
        phone_digits: &str,
        admin: bool,
    ) -> Result<Option<User>, RepositoryError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users
            WHERE name = $1
              AND regexp_replace(COALESCE(phone, ''), '[^0-9]', '', 'g') = $2
              AND ((role = 'admin') = $3)
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(name)
        .bind(phone_digits)
        .bind(admin)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// Non-admin users among `ids`
    pub async fn find_customers_by_ids(&self, ids: &[i64]) -> Result<Vec<User>, RepositoryError> {
        let users = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE id = ANY($1) AND role <> 'admin' ORDER BY id",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    pub async fn record_login(&self, user_id: i64) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE users SET login_count = login_count + 1, last_active_at = NOW(), updated_at = NOW() WHERE id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn touch_last_active(&self, user_id: i64) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE users SET last_active_at = NOW() WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    pub async fn create_session(
        &self,
        id: &str,
        user_id: i64,
        csrf_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Session, RepositoryError> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions (id, user_id, csrf_token, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(csrf_token)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(session)
    }

    pub async fn find_session(&self, id: &str) -> Result<Option<Session>, RepositoryError> {
        let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(session)
    }

    pub async fn delete_session(&self, id: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Remove every session that expired before `now`, returning how many were deleted
    pub async fn purge_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    // =========================================================================
    // Account locking
    // =========================================================================

    /// Lock an account, drop its sessions and record the event
    pub async fn lock(
        &self,
        user_id: i64,
        reason: &str,
        actor_id: Option<i64>,
    ) -> Result<User, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET is_locked = TRUE, locked_at = NOW(), locked_reason = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(reason)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("User {} not found", user_id)))?;

        sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO password_events (user_id, actor_id, reason) VALUES ($1, $2, $3)")
            .bind(user_id)
            .bind(actor_id)
            .bind(reason)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(user)
    }

    pub async fn unlock(&self, user_id: i64, actor_id: Option<i64>) -> Result<User, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET is_locked = FALSE, locked_at = NULL, locked_reason = NULL, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("User {} not found", user_id)))?;

        sqlx::query("INSERT INTO password_events (user_id, actor_id, reason) VALUES ($1, $2, 'unlock')")
            .bind(user_id)
            .bind(actor_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(user)
    }

    /// Unlocked customers whose current trip ended before `cutoff`
    pub async fn find_trip_ended_unlocked(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<User>, RepositoryError> {
        let users = sqlx::query_as::<_, User>(
            r#"
            SELECT * FROM users
            WHERE role = 'user'
              AND is_locked = FALSE
              AND current_trip_end_date IS NOT NULL
              AND current_trip_end_date < $1
            ORDER BY id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(users)
    }

    pub async fn password_events(&self, user_id: i64) -> Result<Vec<PasswordEvent>, RepositoryError> {
        let events = sqlx::query_as::<_, PasswordEvent>(
            "SELECT * FROM password_events WHERE user_id = $1 ORDER BY created_at DESC LIMIT 50",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(events)
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    /// Delete a user together with every row that depends on it.
    /// Rows owned by the user are removed; rows that merely mention the user
    /// keep living with the reference nulled.
    pub async fn delete_with_dependents(&self, user_id: i64) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let statements = [
            "DELETE FROM sessions WHERE user_id = $1",
            "DELETE FROM password_events WHERE user_id = $1",
            "UPDATE password_events SET actor_id = NULL WHERE actor_id = $1",
            r#"DELETE FROM passport_submission_guests
               WHERE submission_id IN (SELECT id FROM passport_submissions WHERE user_id = $1)"#,
            "DELETE FROM passport_submissions WHERE user_id = $1",
            "DELETE FROM passport_request_logs WHERE user_id = $1",
            "UPDATE passport_request_logs SET admin_id = NULL WHERE admin_id = $1",
            "DELETE FROM scheduled_messages WHERE admin_id = $1",
            "UPDATE chat_bot_sessions SET user_id = NULL WHERE user_id = $1",
            "UPDATE affiliate_profiles SET user_id = NULL WHERE user_id = $1",
            "DELETE FROM trips WHERE user_id = $1",
        ];

        for statement in statements {
            sqlx::query(statement)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
        }

        let deleted = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("User {} not found", user_id)));
        }

        tx.commit().await?;

        Ok(())
    }

    // =========================================================================
    // Dashboard
    // =========================================================================

    pub async fn counts(&self, now: DateTime<Utc>) -> Result<UserCounts, RepositoryError> {
        let counts = sqlx::query_as::<_, UserCounts>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM users WHERE role <> 'admin') AS total_users,
                (SELECT COUNT(*) FROM users WHERE role = 'user') AS guide_users,
                (SELECT COUNT(*) FROM users WHERE role = 'community') AS community_users,
                (SELECT COUNT(*) FROM users WHERE is_locked) AS locked_users,
                (SELECT COUNT(*) FROM trips WHERE start_date <= $1 AND end_date >= $1) AS active_trips,
                (SELECT COUNT(*) FROM passport_submissions WHERE NOT is_submitted) AS pending_passports,
                (SELECT COUNT(*) FROM passport_submissions WHERE is_submitted) AS submitted_passports
            "#,
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(counts)
    }
}
