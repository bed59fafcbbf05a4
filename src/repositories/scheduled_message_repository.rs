use crate::error::RepositoryError;
use crate::models::{ScheduledMessage, ScheduledMessageStage, ScheduledMessageWithStages};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;

/// Validated message fields ready to persist
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub title: String,
    pub category: String,
    pub group_name: Option<String>,
    pub description: Option<String>,
    pub send_method: String,
    pub sender_name: Option<String>,
    pub sender_phone: Option<String>,
    pub sender_email: Option<String>,
    pub opt_out_number: Option<String>,
    pub is_ad_message: bool,
    pub auto_add_ad_tag: bool,
    pub auto_add_opt_out: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub start_time: Option<String>,
    pub max_days: i32,
    pub repeat_interval: Option<i32>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageDraft {
    pub stage_number: i32,
    pub days_after: i32,
    pub send_time: Option<String>,
    pub title: String,
    pub content: String,
    pub order: i32,
}

pub struct ScheduledMessageRepository {
    pool: PgPool,
}

impl ScheduledMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> Result<Vec<ScheduledMessageWithStages>, RepositoryError> {
        let messages = sqlx::query_as::<_, ScheduledMessage>(
            "SELECT * FROM scheduled_messages ORDER BY created_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
        let stages = sqlx::query_as::<_, ScheduledMessageStage>(
            r#"
            SELECT * FROM scheduled_message_stages
            WHERE scheduled_message_id = ANY($1)
            ORDER BY scheduled_message_id, "order", id
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_message: HashMap<i64, Vec<ScheduledMessageStage>> = HashMap::new();
        for stage in stages {
            by_message.entry(stage.scheduled_message_id).or_default().push(stage);
        }

        Ok(messages
            .into_iter()
            .map(|message| ScheduledMessageWithStages {
                stages: by_message.remove(&message.id).unwrap_or_default(),
                message,
            })
            .collect())
    }

    pub async fn find(&self, id: i64) -> Result<Option<ScheduledMessageWithStages>, RepositoryError> {
        let Some(message) = sqlx::query_as::<_, ScheduledMessage>(
            "SELECT * FROM scheduled_messages WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let stages = sqlx::query_as::<_, ScheduledMessageStage>(
            r#"SELECT * FROM scheduled_message_stages WHERE scheduled_message_id = $1 ORDER BY "order", id"#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(ScheduledMessageWithStages { message, stages }))
    }

    pub async fn create(
        &self,
        admin_id: i64,
        draft: &MessageDraft,
        stages: &[StageDraft],
    ) -> Result<ScheduledMessageWithStages, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let message = sqlx::query_as::<_, ScheduledMessage>(
            r#"
            INSERT INTO scheduled_messages
                (admin_id, title, category, group_name, description, send_method, sender_name,
                 sender_phone, sender_email, opt_out_number, is_ad_message, auto_add_ad_tag,
                 auto_add_opt_out, start_date, start_time, max_days, repeat_interval, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            RETURNING *
            "#,
        )
        .bind(admin_id)
        .bind(&draft.title)
        .bind(&draft.category)
        .bind(&draft.group_name)
        .bind(&draft.description)
        .bind(&draft.send_method)
        .bind(&draft.sender_name)
        .bind(&draft.sender_phone)
        .bind(&draft.sender_email)
        .bind(&draft.opt_out_number)
        .bind(draft.is_ad_message)
        .bind(draft.auto_add_ad_tag)
        .bind(draft.auto_add_opt_out)
        .bind(draft.start_date)
        .bind(&draft.start_time)
        .bind(draft.max_days)
        .bind(draft.repeat_interval)
        .bind(draft.is_active)
        .fetch_one(&mut *tx)
        .await?;

        let stages = insert_stages(&mut tx, message.id, stages).await?;
        tx.commit().await?;

        Ok(ScheduledMessageWithStages { message, stages })
    }

    /// Overwrite the message fields and replace all stages
    pub async fn update(
        &self,
        id: i64,
        draft: &MessageDraft,
        stages: &[StageDraft],
    ) -> Result<ScheduledMessageWithStages, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let message = sqlx::query_as::<_, ScheduledMessage>(
            r#"
            UPDATE scheduled_messages
            SET title = $2, category = $3, group_name = $4, description = $5, send_method = $6,
                sender_name = $7, sender_phone = $8, sender_email = $9, opt_out_number = $10,
                is_ad_message = $11, auto_add_ad_tag = $12, auto_add_opt_out = $13,
                start_date = $14, start_time = $15, max_days = $16, repeat_interval = $17,
                is_active = $18, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&draft.title)
        .bind(&draft.category)
        .bind(&draft.group_name)
        .bind(&draft.description)
        .bind(&draft.send_method)
        .bind(&draft.sender_name)
        .bind(&draft.sender_phone)
        .bind(&draft.sender_email)
        .bind(&draft.opt_out_number)
        .bind(draft.is_ad_message)
        .bind(draft.auto_add_ad_tag)
        .bind(draft.auto_add_opt_out)
        .bind(draft.start_date)
        .bind(&draft.start_time)
        .bind(draft.max_days)
        .bind(draft.repeat_interval)
        .bind(draft.is_active)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("Scheduled message {} not found", id)))?;

        sqlx::query("DELETE FROM scheduled_message_stages WHERE scheduled_message_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let stages = insert_stages(&mut tx, id, stages).await?;
        tx.commit().await?;

        Ok(ScheduledMessageWithStages { message, stages })
    }

    /// Stages go with the message through the cascade
    pub async fn delete(&self, id: i64) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM scheduled_messages WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

async fn insert_stages(
    tx: &mut Transaction<'_, Postgres>,
    message_id: i64,
    stages: &[StageDraft],
) -> Result<Vec<ScheduledMessageStage>, RepositoryError> {
    let mut saved = Vec::with_capacity(stages.len());
    for stage in stages {
        let row = sqlx::query_as::<_, ScheduledMessageStage>(
            r#"
            INSERT INTO scheduled_message_stages
                (scheduled_message_id, stage_number, days_after, send_time, title, content, "order")
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(message_id)
        .bind(stage.stage_number)
        .bind(stage.days_after)
        .bind(&stage.send_time)
        .bind(&stage.title)
        .bind(&stage.content)
        .bind(stage.order)
        .fetch_one(&mut **tx)
        .await?;
        saved.push(row);
    }

    Ok(saved)
}
