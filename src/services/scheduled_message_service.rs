//! Staged message campaigns managed from the admin console

use crate::error::{AppError, AppResult};
use crate::models::ScheduledMessageWithStages;
use crate::repositories::scheduled_message_repository::{MessageDraft, StageDraft};
use crate::repositories::ScheduledMessageRepository;
use crate::services::input::{clean, opt_i64};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_CATEGORY: &str = "예약메시지";
const SMS_MAX_DAYS: i32 = 999_999;
const OTHER_MAX_DAYS: i32 = 99_999;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRequest {
    #[serde(default, deserialize_with = "opt_i64")]
    pub stage_number: Option<i64>,
    #[serde(default, deserialize_with = "opt_i64")]
    pub days_after: Option<i64>,
    pub send_time: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    pub title: Option<String>,
    pub category: Option<String>,
    pub group_name: Option<String>,
    pub description: Option<String>,
    pub send_method: Option<String>,
    pub sender_name: Option<String>,
    pub sender_phone: Option<String>,
    pub sender_email: Option<String>,
    pub opt_out_number: Option<String>,
    pub is_ad_message: Option<bool>,
    pub auto_add_ad_tag: Option<bool>,
    pub auto_add_opt_out: Option<bool>,
    pub start_date: Option<String>,
    pub start_time: Option<String>,
    #[serde(default, deserialize_with = "opt_i64")]
    pub max_days: Option<i64>,
    #[serde(default, deserialize_with = "opt_i64")]
    pub repeat_interval: Option<i64>,
    pub is_active: Option<bool>,
    #[serde(default)]
    pub stages: Option<Vec<StageRequest>>,
}

/// Accepts an RFC 3339 timestamp or a bare `YYYY-MM-DD`
fn parse_start_date(raw: Option<&str>) -> AppResult<Option<DateTime<Utc>>> {
    let Some(raw) = clean(raw) else {
        return Ok(None);
    };

    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }

    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Some(dt.and_utc()))
        .ok_or_else(|| AppError::Validation(format!("잘못된 시작일입니다: {}", raw)))
}

/// Zero and out-of-range values count as absent
fn positive_i32(value: Option<i64>) -> Option<i32> {
    value
        .filter(|v| *v > 0)
        .and_then(|v| i32::try_from(v).ok())
}

/// Validate a create/update body into drafts
pub fn build_drafts(request: MessageRequest) -> AppResult<(MessageDraft, Vec<StageDraft>)> {
    let (Some(title), Some(send_method)) = (
        clean(request.title.as_deref()),
        clean(request.send_method.as_deref()),
    ) else {
        return Err(AppError::Validation("제목과 발송 방식은 필수입니다.".to_string()));
    };

    let stages = request.stages.unwrap_or_default();
    if stages.is_empty() {
        return Err(AppError::Validation("최소 1개의 메시지 단계가 필요합니다.".to_string()));
    }

    let stages = stages
        .into_iter()
        .enumerate()
        .map(|(index, stage)| {
            let position = index as i32;
            let content = clean(stage.content.as_deref()).ok_or_else(|| {
                AppError::Validation(format!("{}번째 단계의 내용이 필요합니다.", index + 1))
            })?;
            Ok(StageDraft {
                stage_number: positive_i32(stage.stage_number).unwrap_or(position + 1),
                days_after: stage
                    .days_after
                    .and_then(|v| i32::try_from(v).ok())
                    .unwrap_or(0),
                send_time: clean(stage.send_time.as_deref()),
                title: stage.title.map(|t| t.trim().to_string()).unwrap_or_default(),
                content,
                order: position,
            })
        })
        .collect::<AppResult<Vec<_>>>()?;

    let default_max_days = if send_method == "sms" { SMS_MAX_DAYS } else { OTHER_MAX_DAYS };

    let draft = MessageDraft {
        title,
        category: clean(request.category.as_deref()).unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        group_name: clean(request.group_name.as_deref()),
        description: clean(request.description.as_deref()),
        sender_name: clean(request.sender_name.as_deref()),
        sender_phone: clean(request.sender_phone.as_deref()),
        sender_email: clean(request.sender_email.as_deref()),
        opt_out_number: clean(request.opt_out_number.as_deref()),
        is_ad_message: request.is_ad_message.unwrap_or(false),
        auto_add_ad_tag: request.auto_add_ad_tag != Some(false),
        auto_add_opt_out: request.auto_add_opt_out != Some(false),
        start_date: parse_start_date(request.start_date.as_deref())?,
        start_time: clean(request.start_time.as_deref()),
        max_days: positive_i32(request.max_days).unwrap_or(default_max_days),
        repeat_interval: positive_i32(request.repeat_interval),
        is_active: request.is_active.unwrap_or(true),
        send_method,
    };

    Ok((draft, stages))
}

pub struct ScheduledMessageService {
    repo: Arc<ScheduledMessageRepository>,
}

impl ScheduledMessageService {
    pub fn new(repo: Arc<ScheduledMessageRepository>) -> Self {
        Self { repo }
    }

    pub async fn list(&self) -> AppResult<Vec<ScheduledMessageWithStages>> {
        Ok(self.repo.list().await?)
    }

    pub async fn create(&self, admin_id: i64, request: MessageRequest) -> AppResult<ScheduledMessageWithStages> {
        let (draft, stages) = build_drafts(request)?;
        let created = self.repo.create(admin_id, &draft, &stages).await?;
        info!(
            "Admin {} created scheduled message {} with {} stages",
            admin_id,
            created.message.id,
            created.stages.len()
        );
        Ok(created)
    }

    pub async fn update(&self, id: i64, request: MessageRequest) -> AppResult<ScheduledMessageWithStages> {
        let (draft, stages) = build_drafts(request)?;
        Ok(self.repo.update(id, &draft, &stages).await?)
    }

    pub async fn delete(&self, id: i64) -> AppResult<()> {
        if !self.repo.delete(id).await? {
            return Err(AppError::NotFound("예약 메시지를 찾을 수 없습니다.".to_string()));
        }
        info!("Deleted scheduled message {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: serde_json::Value) -> MessageRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_title_and_send_method_required() {
        let err = build_drafts(request(json!({ "title": "안내", "stages": [{ "content": "x" }] })))
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = build_drafts(request(json!({ "sendMethod": "sms", "stages": [{ "content": "x" }] })))
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_at_least_one_stage() {
        let err = build_drafts(request(json!({ "title": "안내", "sendMethod": "sms", "stages": [] })))
            .unwrap_err();
        assert_eq!(err.to_string(), "최소 1개의 메시지 단계가 필요합니다.");
    }

    #[test]
    fn test_defaults() {
        let (draft, stages) = build_drafts(request(json!({
            "title": " 출발 안내 ",
            "sendMethod": "sms",
            "stages": [
                { "content": "첫 안내" },
                { "stageNumber": 5, "daysAfter": "3", "title": "둘째", "content": "둘째 안내" }
            ]
        })))
        .unwrap();

        assert_eq!(draft.title, "출발 안내");
        assert_eq!(draft.category, DEFAULT_CATEGORY);
        assert!(draft.auto_add_ad_tag);
        assert!(draft.auto_add_opt_out);
        assert!(!draft.is_ad_message);
        assert!(draft.is_active);
        assert_eq!(draft.max_days, 999_999);

        assert_eq!(stages[0].stage_number, 1);
        assert_eq!(stages[0].order, 0);
        assert_eq!(stages[0].days_after, 0);
        assert_eq!(stages[1].stage_number, 5);
        assert_eq!(stages[1].order, 1);
        assert_eq!(stages[1].days_after, 3);
    }

    #[test]
    fn test_explicit_false_flags_and_email_max_days() {
        let (draft, _) = build_drafts(request(json!({
            "title": "뉴스레터",
            "sendMethod": "email",
            "autoAddAdTag": false,
            "autoAddOptOut": false,
            "isActive": false,
            "startDate": "2026-03-01",
            "stages": [{ "content": "본문" }]
        })))
        .unwrap();

        assert!(!draft.auto_add_ad_tag);
        assert!(!draft.auto_add_opt_out);
        assert!(!draft.is_active);
        assert_eq!(draft.max_days, 99_999);
        assert_eq!(
            draft.start_date.unwrap().format("%Y-%m-%d").to_string(),
            "2026-03-01"
        );
    }

    #[test]
    fn test_stage_without_content_is_rejected() {
        let err = build_drafts(request(json!({
            "title": "안내",
            "sendMethod": "sms",
            "stages": [{ "title": "비어 있음" }]
        })))
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
