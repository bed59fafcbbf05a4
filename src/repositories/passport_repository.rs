//! Repository for passport templates, submissions, guests and request logs

use crate::error::RepositoryError;
use crate::models::{
    LogStatus, MessageChannel, PassportGuest, PassportRequestLog, PassportRequestTemplate,
    PassportSubmission,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};

/// Guest row to insert on submit
#[derive(Debug, Clone)]
pub struct NewGuest {
    pub group_number: i32,
    pub name: String,
    pub phone: Option<String>,
    pub passport_number: Option<String>,
    pub nationality: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub passport_expiry_date: Option<NaiveDate>,
}

/// Request log row to insert after a send attempt
#[derive(Debug, Clone)]
pub struct NewRequestLog<'a> {
    pub user_id: i64,
    pub admin_id: Option<i64>,
    pub template_id: Option<i64>,
    pub message_body: &'a str,
    pub channel: MessageChannel,
    pub status: LogStatus,
    pub error_reason: Option<&'a str>,
}

/// Submission state filter for the customer listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomerStatusFilter {
    Submitted,
    Pending,
    NotRequested,
    /// No request log at all
    NoRequest,
}

impl CustomerStatusFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "submitted" => Some(Self::Submitted),
            "pending" => Some(Self::Pending),
            "not_requested" => Some(Self::NotRequested),
            "no_request" => Some(Self::NoRequest),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CustomerQuery {
    pub search: Option<String>,
    /// Digit-only form of the search, matched against phones
    pub search_digits: Option<String>,
    pub status: Option<CustomerStatusFilter>,
    pub role: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

/// One customer with the latest trip, submission and request log flattened in
#[derive(Debug, Clone, FromRow)]
pub struct CustomerRow {
    pub id: i64,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub trip_id: Option<i64>,
    pub trip_cruise_name: Option<String>,
    pub trip_reservation_code: Option<String>,
    pub trip_start_date: Option<DateTime<Utc>>,
    pub trip_end_date: Option<DateTime<Utc>>,
    pub submission_id: Option<i64>,
    pub submission_token: Option<String>,
    pub submission_expires_at: Option<DateTime<Utc>>,
    pub submission_is_submitted: Option<bool>,
    pub submission_submitted_at: Option<DateTime<Utc>>,
    pub submission_updated_at: Option<DateTime<Utc>>,
    pub log_id: Option<i64>,
    pub log_status: Option<String>,
    pub log_channel: Option<String>,
    pub log_sent_at: Option<DateTime<Utc>>,
    pub log_admin_id: Option<i64>,
    pub log_admin_name: Option<String>,
}

pub struct PassportRepository {
    pool: PgPool,
}

impl PassportRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Templates
    // =========================================================================

    pub async fn find_template(&self, id: i64) -> Result<Option<PassportRequestTemplate>, RepositoryError> {
        let template = sqlx::query_as::<_, PassportRequestTemplate>(
            "SELECT * FROM passport_request_templates WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(template)
    }

    /// Newest default template
    pub async fn find_default_template(&self) -> Result<Option<PassportRequestTemplate>, RepositoryError> {
        let template = sqlx::query_as::<_, PassportRequestTemplate>(
            r#"
            SELECT * FROM passport_request_templates
            WHERE is_default = TRUE
            ORDER BY updated_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(template)
    }

    pub async fn create_template(
        &self,
        title: &str,
        body: &str,
        is_default: bool,
    ) -> Result<PassportRequestTemplate, RepositoryError> {
        let template = sqlx::query_as::<_, PassportRequestTemplate>(
            r#"
            INSERT INTO passport_request_templates (title, body, is_default)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(title)
        .bind(body)
        .bind(is_default)
        .fetch_one(&self.pool)
        .await?;

        Ok(template)
    }

    // =========================================================================
    // Submissions
    // =========================================================================

    /// Most recently updated submission of a user
    pub async fn latest_submission(&self, user_id: i64) -> Result<Option<PassportSubmission>, RepositoryError> {
        let submission = sqlx::query_as::<_, PassportSubmission>(
            r#"
            SELECT * FROM passport_submissions
            WHERE user_id = $1
            ORDER BY updated_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(submission)
    }

    pub async fn find_by_token(&self, token: &str) -> Result<Option<PassportSubmission>, RepositoryError> {
        let submission = sqlx::query_as::<_, PassportSubmission>(
            "SELECT * FROM passport_submissions WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(submission)
    }

    pub async fn create_submission(
        &self,
        user_id: i64,
        trip_id: Option<i64>,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<PassportSubmission, RepositoryError> {
        let submission = sqlx::query_as::<_, PassportSubmission>(
            r#"
            INSERT INTO passport_submissions (user_id, trip_id, token, token_expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(trip_id)
        .bind(token)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(submission)
    }

    /// Give an unsubmitted row a fresh token and expiry, clearing earlier form data
    pub async fn rotate_token(
        &self,
        submission_id: i64,
        trip_id: Option<i64>,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<PassportSubmission, RepositoryError> {
        let submission = sqlx::query_as::<_, PassportSubmission>(
            r#"
            UPDATE passport_submissions
            SET token = $2, token_expires_at = $3, trip_id = $4, extra_data = NULL, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(submission_id)
        .bind(token)
        .bind(expires_at)
        .bind(trip_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("Submission {} not found", submission_id)))?;

        Ok(submission)
    }

    pub async fn set_extra_data(&self, submission_id: i64, extra: &Value) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE passport_submissions SET extra_data = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(submission_id)
        .bind(extra)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn guests(&self, submission_id: i64) -> Result<Vec<PassportGuest>, RepositoryError> {
        let guests = sqlx::query_as::<_, PassportGuest>(
            "SELECT * FROM passport_submission_guests WHERE submission_id = $1 ORDER BY group_number, id",
        )
        .bind(submission_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(guests)
    }

    /// Replace guests, mark the submission as submitted and flip the latest request log to SUCCESS
    pub async fn submit(
        &self,
        submission: &PassportSubmission,
        guests: &[NewGuest],
        extra: &Value,
    ) -> Result<PassportSubmission, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM passport_submission_guests WHERE submission_id = $1")
            .bind(submission.id)
            .execute(&mut *tx)
            .await?;

        for guest in guests {
            sqlx::query(
                r#"
                INSERT INTO passport_submission_guests
                    (submission_id, group_number, name, phone, passport_number, nationality,
                     date_of_birth, passport_expiry_date)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(submission.id)
            .bind(guest.group_number)
            .bind(&guest.name)
            .bind(&guest.phone)
            .bind(&guest.passport_number)
            .bind(&guest.nationality)
            .bind(guest.date_of_birth)
            .bind(guest.passport_expiry_date)
            .execute(&mut *tx)
            .await?;
        }

        let updated = sqlx::query_as::<_, PassportSubmission>(
            r#"
            UPDATE passport_submissions
            SET is_submitted = TRUE, submitted_at = NOW(), extra_data = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(submission.id)
        .bind(extra)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE passport_request_logs
            SET status = 'SUCCESS', error_reason = NULL
            WHERE id = (
                SELECT id FROM passport_request_logs
                WHERE user_id = $1
                ORDER BY sent_at DESC, id DESC
                LIMIT 1
            )
            "#,
        )
        .bind(submission.user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(updated)
    }

    // =========================================================================
    // Request logs
    // =========================================================================

    pub async fn insert_log(&self, log: NewRequestLog<'_>) -> Result<PassportRequestLog, RepositoryError> {
        let row = sqlx::query_as::<_, PassportRequestLog>(
            r#"
            INSERT INTO passport_request_logs
                (user_id, admin_id, template_id, message_body, message_channel, status, error_reason)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(log.user_id)
        .bind(log.admin_id)
        .bind(log.template_id)
        .bind(log.message_body)
        .bind(log.channel.as_str())
        .bind(log.status.as_str())
        .bind(log.error_reason)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn logs_for_user(&self, user_id: i64, limit: i64) -> Result<Vec<PassportRequestLog>, RepositoryError> {
        let logs = sqlx::query_as::<_, PassportRequestLog>(
            "SELECT * FROM passport_request_logs WHERE user_id = $1 ORDER BY sent_at DESC, id DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(logs)
    }

    // =========================================================================
    // Customer listing
    // =========================================================================

    pub async fn customers(&self, query: &CustomerQuery) -> Result<Vec<CustomerRow>, RepositoryError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            SELECT
                u.id, u.name, u.phone, u.email, u.role, u.created_at,
                t.id AS trip_id, t.cruise_name AS trip_cruise_name,
                t.reservation_code AS trip_reservation_code,
                t.start_date AS trip_start_date, t.end_date AS trip_end_date,
                s.id AS submission_id, s.token AS submission_token,
                s.token_expires_at AS submission_expires_at,
                s.is_submitted AS submission_is_submitted,
                s.submitted_at AS submission_submitted_at,
                s.updated_at AS submission_updated_at,
                l.id AS log_id, l.status AS log_status, l.message_channel AS log_channel,
                l.sent_at AS log_sent_at, l.admin_id AS log_admin_id, a.name AS log_admin_name
            FROM users u
            LEFT JOIN LATERAL (
                SELECT * FROM trips WHERE user_id = u.id
                ORDER BY start_date DESC NULLS LAST, id DESC LIMIT 1
            ) t ON TRUE
            LEFT JOIN LATERAL (
                SELECT * FROM passport_submissions WHERE user_id = u.id
                ORDER BY updated_at DESC, id DESC LIMIT 1
            ) s ON TRUE
            LEFT JOIN LATERAL (
                SELECT * FROM passport_request_logs WHERE user_id = u.id
                ORDER BY sent_at DESC, id DESC LIMIT 1
            ) l ON TRUE
            LEFT JOIN users a ON a.id = l.admin_id
            WHERE u.role <> 'admin'
            "#,
        );

        if let Some(search) = query.search.as_deref() {
            let pattern = format!("%{}%", search);
            builder.push(" AND (u.name ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR u.email ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR u.phone ILIKE ");
            builder.push_bind(pattern);
            if let Some(digits) = query.search_digits.as_deref() {
                builder.push(" OR regexp_replace(COALESCE(u.phone, ''), '[^0-9]', '', 'g') LIKE ");
                builder.push_bind(format!("%{}%", digits));
            }
            builder.push(")");
        }

        if let Some(role) = query.role.as_deref() {
            builder.push(" AND u.role = ");
            builder.push_bind(role.to_string());
        }

        match query.status {
            Some(CustomerStatusFilter::Submitted) => {
                builder.push(" AND s.is_submitted = TRUE");
            }
            Some(CustomerStatusFilter::Pending) => {
                builder.push(" AND s.id IS NOT NULL AND s.is_submitted = FALSE");
            }
            Some(CustomerStatusFilter::NotRequested) => {
                builder.push(" AND s.id IS NULL");
            }
            Some(CustomerStatusFilter::NoRequest) => {
                builder.push(" AND l.id IS NULL");
            }
            None => {}
        }

        builder.push(" ORDER BY u.created_at DESC, u.id DESC LIMIT ");
        builder.push_bind(query.limit);
        builder.push(" OFFSET ");
        builder.push_bind(query.offset);

        let rows = builder
            .build_query_as::<CustomerRow>()
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }
}
