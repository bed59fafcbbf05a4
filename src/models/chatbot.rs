use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Flow category served by the purchase chat-bot
pub const PURCHASE_FLOW_CATEGORY: &str = "AI 지니 채팅봇(구매)";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChatBotFlow {
    pub id: i64,
    pub name: String,
    pub category: String,
    pub is_active: bool,
    pub order: i32,
    pub start_question_id: Option<i64>,
    pub final_page_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A node in a flow graph. `next_question_id_a`/`_b` are the two answer
/// branches; `next_question_ids` is an optional ordered fan-out list.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChatBotQuestion {
    pub id: i64,
    pub flow_id: i64,
    pub question_text: String,
    pub question_type: String,
    pub information: Option<String>,
    pub option_a: Option<String>,
    pub option_b: Option<String>,
    pub next_question_id_a: Option<i64>,
    pub next_question_id_b: Option<i64>,
    pub next_question_ids: Option<Value>,
    pub order: Decimal,
    pub is_active: bool,
}

impl ChatBotQuestion {
    /// Ids from `next_question_ids`, skipping anything that is not an integer
    pub fn next_ids(&self) -> Vec<i64> {
        match &self.next_question_ids {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| match v {
                    Value::Number(n) => n.as_i64(),
                    Value::String(s) => s.trim().parse().ok(),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// True when the question has no outgoing pointer at all
    pub fn is_terminal(&self) -> bool {
        self.next_question_id_a.is_none()
            && self.next_question_id_b.is_none()
            && self.next_ids().is_empty()
    }
}

/// Visitor tracking row for one chat-bot run
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChatBotSession {
    pub id: i64,
    pub session_id: Uuid,
    pub flow_id: i64,
    pub user_id: Option<i64>,
    pub user_phone: Option<String>,
    pub user_email: Option<String>,
    pub product_code: Option<String>,
    pub is_completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub final_status: Option<String>,
    pub final_page_url: Option<String>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub payment_status: Option<String>,
    pub payment_order_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(next_ids: Option<Value>) -> ChatBotQuestion {
        ChatBotQuestion {
            id: 1,
            flow_id: 1,
            question_text: "q".to_string(),
            question_type: "choice".to_string(),
            information: None,
            option_a: None,
            option_b: None,
            next_question_id_a: None,
            next_question_id_b: None,
            next_question_ids: next_ids,
            order: Decimal::ZERO,
            is_active: true,
        }
    }

    #[test]
    fn test_next_ids_accepts_numbers_and_numeric_strings() {
        let q = question(Some(serde_json::json!([3, "4", "x", null])));
        assert_eq!(q.next_ids(), vec![3, 4]);
        assert!(!q.is_terminal());
    }

    #[test]
    fn test_terminal_question() {
        assert!(question(None).is_terminal());
        assert!(question(Some(serde_json::json!([]))).is_terminal());
    }
}
