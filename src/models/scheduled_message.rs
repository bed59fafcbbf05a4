use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledMessage {
    pub id: i64,
    pub admin_id: i64,
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
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledMessageStage {
    pub id: i64,
    pub scheduled_message_id: i64,
    pub stage_number: i32,
    pub days_after: i32,
    pub send_time: Option<String>,
    pub title: String,
    pub content: String,
    pub order: i32,
}

/// A message together with its stages, ordered by `order`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledMessageWithStages {
    #[serde(flatten)]
    pub message: ScheduledMessage,
    pub stages: Vec<ScheduledMessageStage>,
}
