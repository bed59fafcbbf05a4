//! Passport collection models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// Delivery channel for a passport request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageChannel {
    Sms,
    Kakao,
    Alimtalk,
}

impl MessageChannel {
    /// Unknown or missing values fall back to SMS
    pub fn parse(s: Option<&str>) -> Self {
        match s.map(|v| v.trim().to_uppercase()).as_deref() {
            Some("KAKAO") => MessageChannel::Kakao,
            Some("ALIMTALK") => MessageChannel::Alimtalk,
            _ => MessageChannel::Sms,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageChannel::Sms => "SMS",
            MessageChannel::Kakao => "KAKAO",
            MessageChannel::Alimtalk => "ALIMTALK",
        }
    }
}

/// Outcome recorded on a request log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogStatus {
    Success,
    Failed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Success => "SUCCESS",
            LogStatus::Failed => "FAILED",
        }
    }
}

/// Message template for passport requests
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PassportRequestTemplate {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Token-gated passport form for one customer
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PassportSubmission {
    pub id: i64,
    pub user_id: i64,
    pub trip_id: Option<i64>,
    pub token: String,
    pub token_expires_at: DateTime<Utc>,
    pub is_submitted: bool,
    pub submitted_at: Option<DateTime<Utc>>,
    pub drive_folder_url: Option<String>,
    pub extra_data: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PassportSubmission {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.token_expires_at < now
    }

    /// Extra data as a JSON object, empty when unset or not an object
    pub fn extra_object(&self) -> serde_json::Map<String, Value> {
        match &self.extra_data {
            Some(Value::Object(map)) => map.clone(),
            _ => serde_json::Map::new(),
        }
    }
}

/// One traveller entered on a passport form
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PassportGuest {
    pub id: i64,
    pub submission_id: i64,
    pub group_number: i32,
    pub name: String,
    pub phone: Option<String>,
    pub passport_number: Option<String>,
    pub nationality: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub passport_expiry_date: Option<NaiveDate>,
}

/// Audit row for every passport request sent
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PassportRequestLog {
    pub id: i64,
    pub user_id: i64,
    pub admin_id: Option<i64>,
    pub template_id: Option<i64>,
    pub message_body: String,
    pub message_channel: String,
    pub status: String,
    pub error_reason: Option<String>,
    pub sent_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_parsing() {
        assert_eq!(MessageChannel::parse(None), MessageChannel::Sms);
        assert_eq!(MessageChannel::parse(Some("kakao")), MessageChannel::Kakao);
        assert_eq!(MessageChannel::parse(Some(" ALIMTALK ")), MessageChannel::Alimtalk);
        assert_eq!(MessageChannel::parse(Some("fax")), MessageChannel::Sms);
    }
}
