//! Aligo SMS gateway client
//!
//! Sends SMS/LMS messages and reads the remaining balance. Without complete
//! credentials the client runs in simulation mode: nothing leaves the process
//! and every send reports success.

use crate::config::SmsConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// SMS payload limit in bytes; longer messages go out as LMS
pub const SMS_BYTE_LIMIT: usize = 90;

#[derive(Error, Debug)]
pub enum SmsError {
    #[error("SMS gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("SMS gateway rejected the request: {0}")]
    Rejected(String),
}

/// Aligo message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Sms,
    Lms,
}

impl MessageType {
    /// LMS when the UTF-8 encoding exceeds the SMS byte limit
    pub fn for_message(message: &str) -> Self {
        if message.len() > SMS_BYTE_LIMIT {
            MessageType::Lms
        } else {
            MessageType::Sms
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Sms => "SMS",
            MessageType::Lms => "LMS",
        }
    }
}

/// Outcome of a send call. `result_code` is `"1"` on success.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendOutcome {
    pub result_code: String,
    pub message: Option<String>,
    pub message_id: Option<String>,
}

impl SendOutcome {
    pub fn is_success(&self) -> bool {
        self.result_code == "1"
    }

    /// Human readable failure reason, `None` on success
    pub fn failure_reason(&self) -> Option<String> {
        if self.is_success() {
            return None;
        }
        Some(
            self.message
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| format!("알리고 오류 (코드: {})", self.result_code)),
        )
    }
}

/// Remaining message allowance
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemainOutcome {
    pub result_code: String,
    pub sms_count: Option<i64>,
    pub lms_count: Option<i64>,
    pub mms_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    result_code: Option<Value>,
    message: Option<Value>,
    msg_id: Option<Value>,
    message_id: Option<Value>,
    #[serde(rename = "SMS_CNT")]
    sms_cnt: Option<Value>,
    #[serde(rename = "LMS_CNT")]
    lms_cnt: Option<Value>,
    #[serde(rename = "MMS_CNT")]
    mms_cnt: Option<Value>,
}

/// Gateway fields arrive as either JSON strings or numbers
fn value_to_string(value: &Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn value_to_i64(value: &Option<Value>) -> Option<i64> {
    match value {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

pub struct AligoClient {
    config: SmsConfig,
    http: reqwest::Client,
}

impl AligoClient {
    pub fn new(config: SmsConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { config, http }
    }

    /// True when sends are simulated
    pub fn is_simulation(&self) -> bool {
        !self.config.is_live()
    }

    pub fn low_balance_threshold(&self) -> i64 {
        self.config.low_balance_threshold
    }

    fn auth_form(&self) -> Vec<(&'static str, String)> {
        vec![
            ("key", self.config.api_key.clone().unwrap_or_default()),
            ("user_id", self.config.user_id.clone().unwrap_or_default()),
        ]
    }

    async fn post(&self, path: &str, form: &[(&'static str, String)]) -> Result<RawResponse, SmsError> {
        let url = format!("{}/{}/", self.config.base_url, path);
        debug!("POST {}", url);
        let response = self
            .http
            .post(&url)
            .form(form)
            .send()
            .await?
            .error_for_status()?
            .json::<RawResponse>()
            .await?;
        Ok(response)
    }

    /// Send one message
    ///
    /// # Arguments
    /// * `receiver` - Normalised phone number (digits only)
    /// * `message` - Message body
    /// * `title` - LMS subject line
    pub async fn send(&self, receiver: &str, message: &str, title: &str) -> Result<SendOutcome, SmsError> {
        let msg_type = MessageType::for_message(message);

        if self.is_simulation() {
            warn!(
                "No Aligo credentials configured - simulating {} to {}",
                msg_type.as_str(),
                receiver
            );
            return Ok(SendOutcome {
                result_code: "1".to_string(),
                message: Some("simulated".to_string()),
                message_id: Some(format!("sim_{}", chrono::Utc::now().timestamp_millis())),
            });
        }

        let mut form = self.auth_form();
        form.push(("sender", self.config.sender_phone.clone().unwrap_or_default()));
        form.push(("receiver", receiver.to_string()));
        form.push(("msg", message.to_string()));
        form.push(("msg_type", msg_type.as_str().to_string()));
        if msg_type == MessageType::Lms {
            form.push(("title", title.to_string()));
        }

        let raw = self.post("send", &form).await?;
        let outcome = SendOutcome {
            result_code: value_to_string(&raw.result_code).unwrap_or_default(),
            message: value_to_string(&raw.message),
            message_id: value_to_string(&raw.message_id).or_else(|| value_to_string(&raw.msg_id)),
        };

        if outcome.is_success() {
            info!("Aligo {} sent to {}", msg_type.as_str(), receiver);
        } else {
            warn!(
                "Aligo rejected message to {}: code {}",
                receiver, outcome.result_code
            );
        }

        Ok(outcome)
    }

    /// Remaining balance. Simulation mode reports nothing.
    pub async fn remain(&self) -> Result<Option<RemainOutcome>, SmsError> {
        if self.is_simulation() {
            return Ok(None);
        }

        let raw = self.post("remain", &self.auth_form()).await?;
        let result_code = value_to_string(&raw.result_code).unwrap_or_default();
        if result_code != "1" {
            return Err(SmsError::Rejected(
                value_to_string(&raw.message).unwrap_or(result_code),
            ));
        }

        Ok(Some(RemainOutcome {
            result_code,
            sms_count: value_to_i64(&raw.sms_cnt),
            lms_count: value_to_i64(&raw.lms_cnt),
            mms_count: value_to_i64(&raw.mms_cnt),
        }))
    }

    /// Low balance when a positive threshold is configured and the SMS count is at or below it
    pub fn is_low_balance(&self, remain: Option<&RemainOutcome>) -> bool {
        let threshold = self.config.low_balance_threshold;
        match remain.and_then(|r| r.sms_count) {
            Some(count) if threshold > 0 => count <= threshold,
            _ => false,
        }
    }
}
