//! Passport collection
//!
//! Admins send customers a tokenised link by SMS; the customer opens the link,
//! uploads passport images and submits traveller details. Sends are processed
//! per user so one bad phone number never aborts a batch.

use crate::auth::generate_token;
use crate::config::PassportConfig;
use crate::error::{AppError, AppResult};
use crate::models::{
    LogStatus, MessageChannel, PassportGuest, PassportRequestTemplate, PassportSubmission, Trip,
    User,
};
use crate::repositories::passport_repository::{
    CustomerQuery, CustomerRow, CustomerStatusFilter, NewGuest, NewRequestLog,
};
use crate::repositories::{PassportRepository, TripRepository, UserRepository};
use crate::services::input::value_to_i64;
use crate::sms_client::AligoClient;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub const DEFAULT_EXPIRES_HOURS: i64 = 72;
pub const MAX_EXPIRES_HOURS: i64 = 24 * 14;
pub const TOKEN_BYTES: usize = 24;
pub const MIN_TOKEN_LENGTH: usize = 10;
pub const MAX_GROUPS: usize = 30;
pub const MAX_UPLOAD_FILES: usize = 10;
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub const DEFAULT_TEMPLATE_TITLE: &str = "여권 제출 안내";
pub const DEFAULT_TEMPLATE_BODY: &str = "[크루즈 가이드] {고객명}, {상품명} ({출발일} 출발) 승선을 위해 여권 정보 제출을 부탁드립니다.\n아래 링크에서 여권 사진과 탑승자 정보를 입력해 주세요.\n{링크}";

const INVALID_PHONE_REASON: &str = "유효한 전화번호가 없습니다.";
const ALREADY_SUBMITTED: &str = "이미 제출이 완료된 여권 정보입니다.";

// ============================================================================
// Pure helpers
// ============================================================================

/// Digits-only Korean mobile number, or `None` when it cannot be one
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    match digits.len() {
        11 if digits.starts_with("010") => Some(digits),
        10 => Some(format!("0{}", digits)),
        n if n >= 10 => Some(digits),
        _ => None,
    }
}

/// Requested validity, defaulted and clamped to one hour .. fourteen days
pub fn clamp_expires_hours(requested: Option<i64>) -> i64 {
    requested
        .unwrap_or(DEFAULT_EXPIRES_HOURS)
        .clamp(1, MAX_EXPIRES_HOURS)
}

pub fn passport_link(base_url: &str, token: &str) -> String {
    format!("{}/passport/{}", base_url.trim_end_matches('/'), token)
}

/// Numeric ids and numeric strings; everything else is dropped
pub fn parse_user_ids(raw: &[Value]) -> Vec<i64> {
    raw.iter().filter_map(value_to_i64).collect()
}

/// Values substituted into a message body
pub struct TemplateValues<'a> {
    pub customer_name: Option<&'a str>,
    pub link: &'a str,
    pub product_name: Option<&'a str>,
    pub departure: Option<DateTime<Utc>>,
}

pub fn fill_template(body: &str, values: &TemplateValues<'_>) -> String {
    let name = values
        .customer_name
        .map(|n| format!("{}님", n))
        .unwrap_or_else(|| "고객님".to_string());
    let departure = values
        .departure
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default();

    body.replace("{고객명}", &name)
        .replace("{링크}", values.link)
        .replace("{상품명}", values.product_name.unwrap_or_default())
        .replace("{출발일}", &departure)
}

/// Parse `YYYY-MM-DD`, also accepting a full ISO timestamp
fn parse_date(raw: Option<&str>) -> Option<NaiveDate> {
    let raw = raw?.trim();
    let day = raw.split('T').next().unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

fn trimmed(raw: &Option<String>) -> Option<String> {
    raw.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(default)]
    pub user_ids: Vec<Value>,
    pub template_id: Option<i64>,
    pub message_body: Option<String>,
    pub channel: Option<String>,
    pub expires_in_hours: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SendResultItem {
    pub user_id: i64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_code: Option<String>,
}

impl SendResultItem {
    fn failed(user_id: i64, error: impl Into<String>) -> Self {
        Self {
            user_id,
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub ok: bool,
    pub channel: MessageChannel,
    pub expires_in_hours: i64,
    pub results: Vec<SendResultItem>,
    pub missing_user_ids: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_count: Option<i64>,
    pub low_balance: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionView {
    pub id: i64,
    pub expires_at: DateTime<Utc>,
    pub is_submitted: bool,
    pub submitted_at: Option<DateTime<Utc>>,
    pub extra_data: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionUser {
    pub id: i64,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupResponse {
    pub ok: bool,
    pub submission: SubmissionView,
    pub user: Option<SubmissionUser>,
    pub trip: Option<Trip>,
    pub guests: Vec<PassportGuest>,
}

/// One file received by the upload endpoint
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub file_name: String,
    pub url: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GuestPayload {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub passport_number: Option<String>,
    pub nationality: Option<String>,
    pub date_of_birth: Option<String>,
    pub passport_expiry_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupPayload {
    pub group_number: Value,
    #[serde(default)]
    pub guests: Vec<GuestPayload>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub groups: Option<Vec<GroupPayload>>,
    pub remarks: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CustomerParams {
    pub search: Option<String>,
    pub status: Option<String>,
    pub role: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerTrip {
    pub id: i64,
    pub cruise_name: Option<String>,
    pub reservation_code: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerSubmission {
    pub id: i64,
    pub token: Option<String>,
    pub token_expires_at: Option<DateTime<Utc>>,
    pub is_submitted: bool,
    pub submitted_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerLastRequest {
    pub id: i64,
    pub status: Option<String>,
    pub message_channel: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub admin: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerRecord {
    pub id: i64,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub latest_trip: Option<CustomerTrip>,
    pub submission: Option<CustomerSubmission>,
    pub last_request: Option<CustomerLastRequest>,
    pub submission_status: &'static str,
}

impl From<CustomerRow> for CustomerRecord {
    fn from(row: CustomerRow) -> Self {
        let submission_status = match row.submission_is_submitted {
            Some(true) => "submitted",
            Some(false) => "pending",
            None => "not_requested",
        };

        CustomerRecord {
            latest_trip: row.trip_id.map(|id| CustomerTrip {
                id,
                cruise_name: row.trip_cruise_name,
                reservation_code: row.trip_reservation_code,
                start_date: row.trip_start_date,
                end_date: row.trip_end_date,
            }),
            submission: row.submission_id.map(|id| CustomerSubmission {
                id,
                token: row.submission_token,
                token_expires_at: row.submission_expires_at,
                is_submitted: row.submission_is_submitted.unwrap_or(false),
                submitted_at: row.submission_submitted_at,
                updated_at: row.submission_updated_at,
            }),
            last_request: row.log_id.map(|id| CustomerLastRequest {
                id,
                status: row.log_status,
                message_channel: row.log_channel,
                sent_at: row.log_sent_at,
                admin: row
                    .log_admin_id
                    .map(|admin_id| json!({ "id": admin_id, "name": row.log_admin_name })),
            }),
            submission_status,
            id: row.id,
            name: row.name,
            phone: row.phone,
            email: row.email,
            role: row.role,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CustomersMeta {
    pub page: i64,
    pub limit: i64,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct CustomersResponse {
    pub ok: bool,
    pub data: Vec<CustomerRecord>,
    pub meta: CustomersMeta,
}

// ============================================================================
// Service
// ============================================================================

/// Service for passport requests and submissions
pub struct PassportService {
    user_repo: Arc<UserRepository>,
    trip_repo: Arc<TripRepository>,
    passport_repo: Arc<PassportRepository>,
    sms_client: Arc<AligoClient>,
    config: PassportConfig,
}

impl PassportService {
    pub fn new(
        user_repo: Arc<UserRepository>,
        trip_repo: Arc<TripRepository>,
        passport_repo: Arc<PassportRepository>,
        sms_client: Arc<AligoClient>,
        config: PassportConfig,
    ) -> Self {
        Self {
            user_repo,
            trip_repo,
            passport_repo,
            sms_client,
            config,
        }
    }

    async fn resolve_template(&self, template_id: Option<i64>) -> AppResult<PassportRequestTemplate> {
        if let Some(id) = template_id {
            return self
                .passport_repo
                .find_template(id)
                .await?
                .ok_or_else(|| AppError::NotFound("Template not found.".to_string()));
        }

        if let Some(template) = self.passport_repo.find_default_template().await? {
            return Ok(template);
        }

        info!("No default passport template found, creating one");
        Ok(self
            .passport_repo
            .create_template(DEFAULT_TEMPLATE_TITLE, DEFAULT_TEMPLATE_BODY, true)
            .await?)
    }

    /// Send passport request links to a batch of customers
    pub async fn send(&self, admin_id: i64, request: SendRequest) -> AppResult<SendResponse> {
        if request.user_ids.is_empty() {
            return Err(AppError::Validation("userIds must be a non-empty array.".to_string()));
        }

        let user_ids = parse_user_ids(&request.user_ids);
        if user_ids.is_empty() {
            return Err(AppError::Validation("No valid userIds provided.".to_string()));
        }

        let expires_in_hours = clamp_expires_hours(request.expires_in_hours);
        let channel = MessageChannel::parse(request.channel.as_deref());
        if channel != MessageChannel::Sms {
            return Err(AppError::Validation(
                "현재는 SMS 채널만 지원합니다. 알림톡 발송은 추후 지원 예정입니다.".to_string(),
            ));
        }

        let template = self.resolve_template(request.template_id).await?;
        let base_message = trimmed(&request.message_body)
            .or_else(|| Some(template.body.trim().to_string()).filter(|b| !b.is_empty()))
            .unwrap_or_else(|| DEFAULT_TEMPLATE_BODY.to_string());
        let title = Some(template.title.trim())
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TEMPLATE_TITLE)
            .to_string();

        let users = self.user_repo.find_customers_by_ids(&user_ids).await?;
        let missing_user_ids: Vec<i64> = user_ids
            .iter()
            .copied()
            .filter(|id| !users.iter().any(|u| u.id == *id))
            .collect();

        info!(
            "Sending passport requests: admin={}, users={}, missing={}",
            admin_id,
            users.len(),
            missing_user_ids.len()
        );

        let users_by_id: HashMap<i64, &User> = users.iter().map(|u| (u.id, u)).collect();
        let ctx = SendContext {
            admin_id,
            template_id: template.id,
            base_message: &base_message,
            title: &title,
            expires_in_hours,
        };

        // results follow the request order, duplicates included
        let mut results = Vec::with_capacity(user_ids.len());
        for id in &user_ids {
            let Some(user) = users_by_id.get(id).copied() else {
                results.push(SendResultItem::failed(*id, "User not found."));
                continue;
            };
            let item = match self.send_one(&ctx, user).await {
                Ok(item) => item,
                Err(e) => {
                    warn!("Passport request for user {} failed: {}", user.id, e);
                    let reason = e.public_message();
                    self.write_log(&ctx, user.id, &base_message, LogStatus::Failed, Some(&reason))
                        .await;
                    SendResultItem::failed(user.id, reason)
                }
            };
            results.push(item);
        }

        let remain = match self.sms_client.remain().await {
            Ok(remain) => remain,
            Err(e) => {
                warn!("Failed to fetch SMS balance: {}", e);
                None
            }
        };
        let low_balance = self.sms_client.is_low_balance(remain.as_ref());
        if low_balance {
            warn!("SMS balance is low: {:?}", remain.as_ref().and_then(|r| r.sms_count));
        }

        Ok(SendResponse {
            ok: true,
            channel,
            expires_in_hours,
            results,
            missing_user_ids,
            remaining_count: remain.and_then(|r| r.sms_count),
            low_balance,
        })
    }

    async fn send_one(&self, ctx: &SendContext<'_>, user: &User) -> AppResult<SendResultItem> {
        let trip = self.trip_repo.latest_for_user(user.id).await?;

        let token = generate_token(TOKEN_BYTES);
        let expires_at = Utc::now() + Duration::hours(ctx.expires_in_hours);
        let link = passport_link(&self.config.base_url, &token);
        let message = fill_template(
            ctx.base_message,
            &TemplateValues {
                customer_name: user.display_name(),
                link: &link,
                product_name: trip.as_ref().and_then(|t| t.cruise_name.as_deref()),
                departure: trip.as_ref().and_then(|t| t.start_date),
            },
        );

        let Some(phone) = user.phone.as_deref().and_then(normalize_phone) else {
            self.write_log(ctx, user.id, &message, LogStatus::Failed, Some(INVALID_PHONE_REASON))
                .await;
            return Ok(SendResultItem::failed(user.id, INVALID_PHONE_REASON));
        };

        let latest = self.passport_repo.latest_submission(user.id).await?;
        let trip_id = trip.as_ref().map(|t| t.id);

        // An unsubmitted row is reused so the customer never holds two live links
        let submission = match latest {
            Some(existing) if !existing.is_submitted => {
                self.passport_repo
                    .rotate_token(existing.id, trip_id.or(existing.trip_id), &token, expires_at)
                    .await?
            }
            _ => {
                self.passport_repo
                    .create_submission(user.id, trip_id, &token, expires_at)
                    .await?
            }
        };

        let outcome = self.sms_client.send(&phone, &message, ctx.title).await;
        let failure = match &outcome {
            Ok(o) => o.failure_reason(),
            Err(e) => Some(e.to_string()),
        };

        match failure {
            None => {
                self.write_log(ctx, user.id, &message, LogStatus::Success, None).await;
                let outcome = outcome.ok();
                Ok(SendResultItem {
                    user_id: user.id,
                    success: true,
                    link: Some(link),
                    token: Some(token),
                    submission_id: Some(submission.id),
                    message: Some(message),
                    error: None,
                    message_id: outcome.as_ref().and_then(|o| o.message_id.clone()),
                    result_code: outcome.map(|o| o.result_code),
                })
            }
            Some(reason) => {
                self.write_log(ctx, user.id, &message, LogStatus::Failed, Some(&reason)).await;
                Ok(SendResultItem {
                    user_id: user.id,
                    success: false,
                    link: Some(link),
                    token: Some(token),
                    submission_id: Some(submission.id),
                    message: Some(message),
                    error: Some(reason),
                    message_id: None,
                    result_code: outcome.ok().map(|o| o.result_code),
                })
            }
        }
    }

    /// Log write failures are reported but never fail the send
    async fn write_log(
        &self,
        ctx: &SendContext<'_>,
        user_id: i64,
        message_body: &str,
        status: LogStatus,
        error_reason: Option<&str>,
    ) {
        let log = NewRequestLog {
            user_id,
            admin_id: Some(ctx.admin_id),
            template_id: Some(ctx.template_id),
            message_body,
            channel: MessageChannel::Sms,
            status,
            error_reason,
        };
        if let Err(e) = self.passport_repo.insert_log(log).await {
            warn!("Failed to write passport request log for user {}: {}", user_id, e);
        }
    }

    /// Resolve a customer token, enforcing length, existence and expiry
    pub async fn find_live_submission(&self, token: &str) -> AppResult<PassportSubmission> {
        if token.len() < MIN_TOKEN_LENGTH {
            return Err(AppError::Validation("잘못된 토큰입니다.".to_string()));
        }

        let submission = self
            .passport_repo
            .find_by_token(token)
            .await?
            .ok_or_else(|| AppError::NotFound("토큰이 유효하지 않습니다.".to_string()))?;

        if submission.is_expired(Utc::now()) {
            return Err(AppError::Gone("제출 가능 시간이 만료되었습니다.".to_string()));
        }

        Ok(submission)
    }

    pub async fn lookup(&self, token: &str) -> AppResult<LookupResponse> {
        let submission = self.find_live_submission(token).await?;

        let user = self.user_repo.find_by_id(submission.user_id).await?;
        let trip = match submission.trip_id {
            Some(id) => self.trip_repo.find_by_id(id).await?,
            None => None,
        };
        let guests = self.passport_repo.guests(submission.id).await?;

        Ok(LookupResponse {
            ok: true,
            user: user.map(|u| SubmissionUser {
                id: u.id,
                name: u.name,
                phone: u.phone,
                email: u.email,
            }),
            trip,
            guests,
            submission: SubmissionView {
                id: submission.id,
                expires_at: submission.token_expires_at,
                is_submitted: submission.is_submitted,
                submitted_at: submission.submitted_at,
                extra_data: submission.extra_data,
            },
        })
    }

    /// Store passport images and record them on the submission
    pub async fn upload(&self, token: &str, files: Vec<UploadedFile>) -> AppResult<Vec<StoredFile>> {
        let submission = self.find_live_submission(token).await?;
        if submission.is_submitted {
            return Err(AppError::BusinessLogic(ALREADY_SUBMITTED.to_string()));
        }
        validate_uploads(&files)?;

        let dir = self
            .config
            .upload_dir
            .join("passport")
            .join(submission.id.to_string());
        tokio::fs::create_dir_all(&dir).await?;

        let now = Utc::now();
        let mut stored = Vec::with_capacity(files.len());
        for file in &files {
            let name = stored_file_name(file);
            tokio::fs::write(dir.join(&name), &file.bytes).await?;
            stored.push(StoredFile {
                file_name: file.file_name.clone(),
                url: format!("/uploads/passport/{}/{}", submission.id, name),
                uploaded_at: now,
            });
        }

        let mut extra = submission.extra_object();
        let mut list = match extra.remove("passportFiles") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        for file in &stored {
            list.push(serde_json::to_value(file)?);
        }
        extra.insert("passportFiles".to_string(), Value::Array(list));
        self.passport_repo
            .set_extra_data(submission.id, &Value::Object(extra))
            .await?;

        info!("Stored {} passport file(s) for submission {}", stored.len(), submission.id);
        Ok(stored)
    }

    pub async fn submit(&self, token: &str, request: SubmitRequest) -> AppResult<PassportSubmission> {
        let groups = request
            .groups
            .ok_or_else(|| AppError::Validation("제출할 그룹 정보가 필요합니다.".to_string()))?;
        let submission = self.find_live_submission(token).await?;

        let (valid_groups, guests) = collect_guests(groups);
        if valid_groups.is_empty() {
            return Err(AppError::Validation("최소 한 개 이상의 그룹이 필요합니다.".to_string()));
        }
        if guests.is_empty() {
            return Err(AppError::Validation(
                "각 그룹에 최소 한 명 이상의 탑승자를 입력해주세요.".to_string(),
            ));
        }

        let mut extra = submission.extra_object();
        extra.insert(
            "groups".to_string(),
            Value::Array(
                valid_groups
                    .iter()
                    .map(|(number, guests)| json!({ "groupNumber": number, "guests": guests }))
                    .collect(),
            ),
        );
        extra.insert(
            "remarks".to_string(),
            Value::String(request.remarks.unwrap_or_default()),
        );

        let updated = self
            .passport_repo
            .submit(&submission, &guests, &Value::Object(extra))
            .await?;

        info!(
            "Passport submission {} completed with {} guest(s)",
            updated.id,
            guests.len()
        );
        Ok(updated)
    }

    pub async fn customers(&self, params: CustomerParams) -> AppResult<CustomersResponse> {
        let page = params.page.unwrap_or(1).max(1);
        let limit = params.limit.unwrap_or(100).clamp(1, 200);

        let search = trimmed(&params.search);
        let search_digits = search.as_deref().and_then(|s| {
            let digits: String = s.chars().filter(char::is_ascii_digit).collect();
            (digits.len() >= 3 && digits != s).then_some(digits)
        });

        let role = match params.role.as_deref().map(str::trim) {
            Some("guide") => Some("user".to_string()),
            Some("mall") => Some("community".to_string()),
            _ => None,
        };

        let query = CustomerQuery {
            search,
            search_digits,
            status: params.status.as_deref().and_then(CustomerStatusFilter::parse),
            role,
            limit,
            offset: (page - 1) * limit,
        };

        let data: Vec<CustomerRecord> = self
            .passport_repo
            .customers(&query)
            .await?
            .into_iter()
            .map(CustomerRecord::from)
            .collect();

        Ok(CustomersResponse {
            ok: true,
            meta: CustomersMeta {
                page,
                limit,
                count: data.len(),
            },
            data,
        })
    }
}

struct SendContext<'a> {
    admin_id: i64,
    template_id: i64,
    base_message: &'a str,
    title: &'a str,
    expires_in_hours: i64,
}

fn is_allowed_content_type(content_type: &str) -> bool {
    content_type.starts_with("image/") || content_type == "application/pdf"
}

fn validate_uploads(files: &[UploadedFile]) -> AppResult<()> {
    if files.is_empty() {
        return Err(AppError::Validation("업로드할 파일이 없습니다.".to_string()));
    }
    if files.len() > MAX_UPLOAD_FILES {
        return Err(AppError::Validation(format!(
            "파일은 한 번에 최대 {}개까지 업로드할 수 있습니다.",
            MAX_UPLOAD_FILES
        )));
    }
    for file in files {
        if file.bytes.len() > MAX_UPLOAD_BYTES {
            return Err(AppError::Validation(format!(
                "{}: 파일 크기는 10MB 이하여야 합니다.",
                file.file_name
            )));
        }
        if !is_allowed_content_type(&file.content_type) {
            return Err(AppError::Validation(format!(
                "{}: 이미지 또는 PDF 파일만 업로드할 수 있습니다.",
                file.file_name
            )));
        }
    }
    Ok(())
}

/// Content-addressed name, keeping a short alphanumeric extension
fn stored_file_name(file: &UploadedFile) -> String {
    let digest = hex::encode(Sha256::digest(&file.bytes));
    let ext = file
        .file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()));

    match ext {
        Some(ext) => format!("{}.{}", &digest[..32], ext),
        None => digest[..32].to_string(),
    }
}

/// Groups with a usable number (first thirty considered) and their non-blank guests
fn collect_guests(groups: Vec<GroupPayload>) -> (Vec<(i32, Vec<GuestPayload>)>, Vec<NewGuest>) {
    let valid: Vec<(i32, Vec<GuestPayload>)> = groups
        .into_iter()
        .take(MAX_GROUPS)
        .filter_map(|group| {
            let number = value_to_i64(&group.group_number)?;
            (1..=MAX_GROUPS as i64)
                .contains(&number)
                .then_some((number as i32, group.guests))
        })
        .collect();

    let guests = valid
        .iter()
        .flat_map(|(number, guests)| {
            guests.iter().filter_map(move |guest| {
                let name = trimmed(&guest.name)?;
                Some(NewGuest {
                    group_number: *number,
                    name,
                    phone: trimmed(&guest.phone),
                    passport_number: trimmed(&guest.passport_number),
                    nationality: trimmed(&guest.nationality),
                    date_of_birth: parse_date(guest.date_of_birth.as_deref()),
                    passport_expiry_date: parse_date(guest.passport_expiry_date.as_deref()),
                })
            })
        })
        .collect();

    (valid, guests)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("010-1234-5678").as_deref(), Some("01012345678"));
        assert_eq!(normalize_phone("1012345678").as_deref(), Some("01012345678"));
        assert_eq!(normalize_phone("+82 10 1234 5678").as_deref(), Some("821012345678"));
        assert_eq!(normalize_phone("12345"), None);
        assert_eq!(normalize_phone(""), None);
    }

    #[test]
    fn test_clamp_expires_hours() {
        assert_eq!(clamp_expires_hours(None), 72);
        assert_eq!(clamp_expires_hours(Some(0)), 1);
        assert_eq!(clamp_expires_hours(Some(-5)), 1);
        assert_eq!(clamp_expires_hours(Some(48)), 48);
        assert_eq!(clamp_expires_hours(Some(1000)), 336);
    }

    #[test]
    fn test_parse_user_ids() {
        let raw = vec![json!(1), json!("2"), json!("x"), json!(null), json!(3.5)];
        assert_eq!(parse_user_ids(&raw), vec![1, 2]);
    }

    #[test]
    fn test_fill_template() {
        let start = Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap();
        let text = fill_template(
            DEFAULT_TEMPLATE_BODY,
            &TemplateValues {
                customer_name: Some("홍길동"),
                link: "https://example.com/passport/abc",
                product_name: Some("MSC 벨리시마"),
                departure: Some(start),
            },
        );
        assert!(text.contains("홍길동님"));
        assert!(text.contains("MSC 벨리시마 (2025-05-01 출발)"));
        assert!(text.ends_with("https://example.com/passport/abc"));

        let anonymous = fill_template(
            "{고객명} {상품명}|{출발일}|",
            &TemplateValues {
                customer_name: None,
                link: "",
                product_name: None,
                departure: None,
            },
        );
        assert_eq!(anonymous, "고객님 ||");
    }

    #[test]
    fn test_passport_link() {
        assert_eq!(
            passport_link("https://cruise.example/", "tok"),
            "https://cruise.example/passport/tok"
        );
    }

    #[test]
    fn test_collect_guests_filters_groups_and_blank_names() {
        let groups = vec![
            GroupPayload {
                group_number: json!(1),
                guests: vec![
                    GuestPayload {
                        name: Some(" 김철수 ".into()),
                        date_of_birth: Some("1990-02-03T00:00:00.000Z".into()),
                        ..Default::default()
                    },
                    GuestPayload {
                        name: Some("   ".into()),
                        ..Default::default()
                    },
                ],
            },
            GroupPayload {
                group_number: json!("31"),
                guests: vec![GuestPayload {
                    name: Some("dropped".into()),
                    ..Default::default()
                }],
            },
            GroupPayload {
                group_number: json!("2"),
                guests: vec![],
            },
        ];

        let (valid, guests) = collect_guests(groups);
        assert_eq!(valid.len(), 2);
        assert_eq!(guests.len(), 1);
        assert_eq!(guests[0].name, "김철수");
        assert_eq!(guests[0].group_number, 1);
        assert_eq!(guests[0].date_of_birth, NaiveDate::from_ymd_opt(1990, 2, 3));
    }

    #[test]
    fn test_validate_uploads() {
        let ok = UploadedFile {
            file_name: "passport.jpg".into(),
            content_type: "image/jpeg".into(),
            bytes: vec![1, 2, 3],
        };
        assert!(validate_uploads(&[ok.clone()]).is_ok());
        assert!(validate_uploads(&[]).is_err());

        let text = UploadedFile {
            content_type: "text/plain".into(),
            ..ok.clone()
        };
        assert!(validate_uploads(&[text]).is_err());

        let too_many = vec![ok.clone(); MAX_UPLOAD_FILES + 1];
        assert!(validate_uploads(&too_many).is_err());
    }

    #[test]
    fn test_stored_file_name_is_content_addressed() {
        let file = UploadedFile {
            file_name: "My Passport.JPG".into(),
            content_type: "image/jpeg".into(),
            bytes: b"hello".to_vec(),
        };
        let name = stored_file_name(&file);
        assert!(name.ends_with(".jpg"));
        assert_eq!(name.len(), 32 + 4);
        assert_eq!(name, stored_file_name(&file));

        let odd = UploadedFile {
            file_name: "noext".into(),
            ..file
        };
        assert_eq!(stored_file_name(&odd).len(), 32);
    }
}
