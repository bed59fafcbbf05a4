//! Repository for chat-bot flows, questions and visitor sessions

use crate::chatbot::CompiledFlow;
use crate::error::RepositoryError;
use crate::models::{ChatBotFlow, ChatBotQuestion, ChatBotSession};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct NewChatSession {
    pub flow_id: i64,
    pub user_id: Option<i64>,
    pub user_phone: Option<String>,
    pub user_email: Option<String>,
    pub product_code: Option<String>,
}

/// Fields a client may change on a tracking session. `None` leaves a column untouched.
#[derive(Debug, Clone, Default)]
pub struct ChatSessionUpdate {
    pub is_completed: Option<bool>,
    pub final_status: Option<String>,
    pub final_page_url: Option<String>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub payment_status: Option<String>,
    pub payment_order_id: Option<String>,
}

pub struct ChatBotRepository {
    pool: PgPool,
}

impl ChatBotRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Flows and questions
    // =========================================================================

    pub async fn create_flow(
        &self,
        name: &str,
        category: &str,
        order: i32,
        final_page_url: Option<&str>,
    ) -> Result<ChatBotFlow, RepositoryError> {
        let flow = sqlx::query_as::<_, ChatBotFlow>(
            r#"
            INSERT INTO chat_bot_flows (name, category, "order", final_page_url)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(category)
        .bind(order)
        .bind(final_page_url)
        .fetch_one(&self.pool)
        .await?;

        Ok(flow)
    }

    pub async fn list_flows(&self) -> Result<Vec<ChatBotFlow>, RepositoryError> {
        let flows = sqlx::query_as::<_, ChatBotFlow>(
            r#"SELECT * FROM chat_bot_flows ORDER BY category, "order", id"#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(flows)
    }

    pub async fn find_flow(&self, id: i64) -> Result<Option<ChatBotFlow>, RepositoryError> {
        let flow = sqlx::query_as::<_, ChatBotFlow>("SELECT * FROM chat_bot_flows WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(flow)
    }

    /// Active flow of a category with the lowest order
    pub async fn first_active_flow(&self, category: &str) -> Result<Option<ChatBotFlow>, RepositoryError> {
        let flow = sqlx::query_as::<_, ChatBotFlow>(
            r#"
            SELECT * FROM chat_bot_flows
            WHERE category = $1 AND is_active = TRUE
            ORDER BY "order" ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(category)
        .fetch_optional(&self.pool)
        .await?;

        Ok(flow)
    }

    pub async fn find_question(&self, id: i64) -> Result<Option<ChatBotQuestion>, RepositoryError> {
        let question = sqlx::query_as::<_, ChatBotQuestion>("SELECT * FROM chat_bot_questions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(question)
    }

    pub async fn first_active_question(&self, flow_id: i64) -> Result<Option<ChatBotQuestion>, RepositoryError> {
        let question = sqlx::query_as::<_, ChatBotQuestion>(
            r#"
            SELECT * FROM chat_bot_questions
            WHERE flow_id = $1 AND is_active = TRUE
            ORDER BY "order" ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(flow_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(question)
    }

    pub async fn active_question_ids(&self, flow_id: i64) -> Result<Vec<i64>, RepositoryError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM chat_bot_questions WHERE flow_id = $1 AND is_active = TRUE",
        )
        .bind(flow_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    pub async fn questions(&self, flow_id: i64) -> Result<Vec<ChatBotQuestion>, RepositoryError> {
        let questions = sqlx::query_as::<_, ChatBotQuestion>(
            r#"SELECT * FROM chat_bot_questions WHERE flow_id = $1 ORDER BY "order", id"#,
        )
        .bind(flow_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(questions)
    }

    /// Replace every question of a flow with a compiled graph and repoint the start question
    pub async fn replace_questions(
        &self,
        flow_id: i64,
        compiled: &CompiledFlow,
    ) -> Result<Vec<ChatBotQuestion>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE chat_bot_flows SET start_question_id = NULL WHERE id = $1")
            .bind(flow_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE chat_bot_questions SET next_question_id_a = NULL, next_question_id_b = NULL WHERE flow_id = $1",
        )
        .bind(flow_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chat_bot_questions WHERE flow_id = $1")
            .bind(flow_id)
            .execute(&mut *tx)
            .await?;

        let mut ids = Vec::with_capacity(compiled.questions.len());
        for question in &compiled.questions {
            let id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO chat_bot_questions
                    (flow_id, question_text, question_type, information, option_a, option_b, "order", is_active)
                VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE)
                RETURNING id
                "#,
            )
            .bind(flow_id)
            .bind(&question.question_text)
            .bind(question.question_type)
            .bind(&question.information)
            .bind(&question.option_a)
            .bind(&question.option_b)
            .bind(question.order)
            .fetch_one(&mut *tx)
            .await?;
            ids.push(id);
        }

        for (position, question) in compiled.questions.iter().enumerate() {
            if question.next_a.is_none() && question.next_b.is_none() {
                continue;
            }
            sqlx::query(
                "UPDATE chat_bot_questions SET next_question_id_a = $2, next_question_id_b = $3 WHERE id = $1",
            )
            .bind(ids[position])
            .bind(question.next_a.map(|i| ids[i]))
            .bind(question.next_b.map(|i| ids[i]))
            .execute(&mut *tx)
            .await?;
        }

        if let Some(start) = compiled.start {
            sqlx::query("UPDATE chat_bot_flows SET start_question_id = $2 WHERE id = $1")
                .bind(flow_id)
                .bind(ids[start])
                .execute(&mut *tx)
                .await?;
        }

        let saved = sqlx::query_as::<_, ChatBotQuestion>(
            r#"SELECT * FROM chat_bot_questions WHERE flow_id = $1 ORDER BY "order", id"#,
        )
        .bind(flow_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(saved)
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    pub async fn create_session(&self, session: &NewChatSession) -> Result<ChatBotSession, RepositoryError> {
        let created = sqlx::query_as::<_, ChatBotSession>(
            r#"
            INSERT INTO chat_bot_sessions (session_id, flow_id, user_id, user_phone, user_email, product_code)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(session.flow_id)
        .bind(session.user_id)
        .bind(&session.user_phone)
        .bind(&session.user_email)
        .bind(&session.product_code)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    pub async fn update_session(
        &self,
        session_id: Uuid,
        update: &ChatSessionUpdate,
    ) -> Result<ChatBotSession, RepositoryError> {
        let session = sqlx::query_as::<_, ChatBotSession>(
            r#"
            UPDATE chat_bot_sessions
            SET is_completed = COALESCE($2, is_completed),
                completed_at = CASE WHEN $2 = TRUE THEN NOW() ELSE completed_at END,
                final_status = COALESCE($3, final_status),
                final_page_url = COALESCE($4, final_page_url),
                ended_at = COALESCE($5, ended_at),
                duration_ms = COALESCE($6, duration_ms),
                payment_status = COALESCE($7, payment_status),
                payment_order_id = COALESCE($8, payment_order_id)
            WHERE session_id = $1
            RETURNING *
            "#,
        )
        .bind(session_id)
        .bind(update.is_completed)
        .bind(&update.final_status)
        .bind(&update.final_page_url)
        .bind(update.ended_at)
        .bind(update.duration_ms)
        .bind(&update.payment_status)
        .bind(&update.payment_order_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("Session {} not found", session_id)))?;

        Ok(session)
    }
}
