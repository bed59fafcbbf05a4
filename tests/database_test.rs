//! Database-backed tests. `sqlx::test` creates a fresh database per test on
//! the server named by `DATABASE_URL` and applies the migrations to it.

mod helpers;

use chrono::{Duration, Utc};
use cruise_guide_backend::auth::generate_token;
use cruise_guide_backend::chatbot::{EditorEdge, EditorNode};
use cruise_guide_backend::error::AppError;
use cruise_guide_backend::models::*;
use cruise_guide_backend::repositories::chatbot_repository::NewChatSession;
use cruise_guide_backend::services::affiliate_service::{
    ConfirmSaleRequest, CreateLeadRequest, CreateProfileRequest, CreateSaleRequest,
    LeadStatusRequest, MetricsQuery, RefundSaleRequest, RelationRequest,
};
use cruise_guide_backend::services::auth_service::{LoginMode, LoginRequest};
use cruise_guide_backend::services::chatbot_service::{CreateFlowRequest, SaveFlowRequest};
use cruise_guide_backend::services::passport_service::{
    GroupPayload, GuestPayload, SendRequest, SubmitRequest, UploadedFile,
};
use cruise_guide_backend::services::scheduled_message_service::MessageRequest;
use cruise_guide_backend::services::user_service::LockRequest;
use helpers::*;
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::{PgPool, Row};

fn send_request(user_ids: &[i64]) -> SendRequest {
    SendRequest {
        user_ids: user_ids.iter().map(|id| json!(id)).collect(),
        template_id: None,
        message_body: None,
        channel: None,
        expires_in_hours: None,
    }
}

fn login_request(mode: LoginMode, name: &str, phone: &str, password: &str) -> LoginRequest {
    LoginRequest {
        mode,
        name: Some(name.to_string()),
        phone: Some(phone.to_string()),
        password: Some(password.to_string()),
    }
}

async fn create_profile(db: &TestDatabase, body: serde_json::Value) -> AffiliateProfile {
    let request: CreateProfileRequest = serde_json::from_value(body).unwrap();
    db.state
        .affiliate_service
        .create_profile(request)
        .await
        .expect("Failed to create profile")
}

// ============================================================================
// Migrations
// ============================================================================

#[sqlx::test]
async fn test_migrations_ran(pool: PgPool) {
    let tables = [
        "users",
        "sessions",
        "password_events",
        "trips",
        "cruise_products",
        "passport_request_templates",
        "passport_submissions",
        "passport_submission_guests",
        "passport_request_logs",
        "affiliate_profiles",
        "affiliate_relations",
        "affiliate_leads",
        "affiliate_sales",
        "commission_ledger",
        "chat_bot_flows",
        "chat_bot_questions",
        "chat_bot_sessions",
        "scheduled_messages",
        "scheduled_message_stages",
    ];

    for table in tables {
        let exists: bool = sqlx::query(
            "SELECT EXISTS (SELECT FROM information_schema.tables WHERE table_name = $1)",
        )
        .bind(table)
        .fetch_one(&pool)
        .await
        .unwrap()
        .get(0);
        assert!(exists, "Table {} should exist", table);
    }
}

// ============================================================================
// Passport collection
// ============================================================================

#[sqlx::test]
async fn test_expired_token_is_gone(pool: PgPool) {
    let db = TestDatabase::from_pool(pool);
    let customer = create_customer(&db, "김민수", "010-1234-5678").await;

    let token = generate_token(24);
    db.state
        .passport_repo
        .create_submission(customer.id, None, &token, Utc::now() - Duration::hours(1))
        .await
        .unwrap();

    let err = db.state.passport_service.lookup(&token).await.unwrap_err();
    assert!(matches!(err, AppError::Gone(_)));
    assert_eq!(err.status_code().as_u16(), 410);
}

#[sqlx::test]
async fn test_lookup_rejects_short_and_unknown_tokens(pool: PgPool) {
    let db = TestDatabase::from_pool(pool);

    let err = db.state.passport_service.lookup("abc").await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = db
        .state
        .passport_service
        .lookup(&generate_token(24))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[sqlx::test]
async fn test_resend_reuses_unsubmitted_row(pool: PgPool) {
    let db = TestDatabase::from_pool(pool);
    let admin = create_admin(&db, "관리자").await;
    let customer = create_customer(&db, "김민수", "010-1234-5678").await;
    let now = Utc::now();
    let trip = create_trip(&db, &customer, "MSC 벨리시마", now + Duration::days(30), now + Duration::days(35)).await;

    let first = db
        .state
        .passport_service
        .send(admin.id, send_request(&[customer.id]))
        .await
        .unwrap();
    assert_eq!(first.expires_in_hours, 72);
    assert!(first.missing_user_ids.is_empty());
    let first_item = &first.results[0];
    assert!(first_item.success, "{:?}", first_item);
    assert!(first_item
        .link
        .as_deref()
        .unwrap()
        .starts_with("https://guide.test/passport/"));
    assert!(first_item.message.as_deref().unwrap().contains("김민수님"));

    let second = db
        .state
        .passport_service
        .send(admin.id, send_request(&[customer.id]))
        .await
        .unwrap();
    let second_item = &second.results[0];

    assert_eq!(first_item.submission_id, second_item.submission_id);
    assert_ne!(first_item.token, second_item.token);

    // the old token no longer resolves, the new one does and points at the trip
    let old = db
        .state
        .passport_service
        .lookup(first_item.token.as_deref().unwrap())
        .await;
    assert!(matches!(old, Err(AppError::NotFound(_))));

    let lookup = db
        .state
        .passport_service
        .lookup(second_item.token.as_deref().unwrap())
        .await
        .unwrap();
    assert_eq!(lookup.trip.map(|t| t.id), Some(trip.id));
    assert_eq!(db.count_where("passport_request_logs", "user_id", customer.id).await, 2);
}

#[sqlx::test]
async fn test_send_after_submission_creates_new_row(pool: PgPool) {
    let db = TestDatabase::from_pool(pool);
    let admin = create_admin(&db, "관리자").await;
    let customer = create_customer(&db, "이영희", "01022223333").await;

    let first = db
        .state
        .passport_service
        .send(admin.id, send_request(&[customer.id]))
        .await
        .unwrap();
    let token = first.results[0].token.clone().unwrap();

    let submitted = db
        .state
        .passport_service
        .submit(
            &token,
            SubmitRequest {
                groups: Some(vec![GroupPayload {
                    group_number: json!(1),
                    guests: vec![
                        GuestPayload {
                            name: Some("이영희".to_string()),
                            passport_number: Some("M12345678".to_string()),
                            ..Default::default()
                        },
                        GuestPayload {
                            name: Some("  ".to_string()),
                            ..Default::default()
                        },
                    ],
                }]),
                remarks: Some("창가 객실 희망".to_string()),
            },
        )
        .await
        .unwrap();
    assert!(submitted.is_submitted);
    assert!(submitted.submitted_at.is_some());
    assert_eq!(db.count_where("passport_submission_guests", "submission_id", submitted.id).await, 1);

    let second = db
        .state
        .passport_service
        .send(admin.id, send_request(&[customer.id]))
        .await
        .unwrap();
    assert_ne!(second.results[0].submission_id, Some(submitted.id));
}

#[sqlx::test]
async fn test_send_reports_invalid_phone_and_missing_users(pool: PgPool) {
    let db = TestDatabase::from_pool(pool);
    let admin = create_admin(&db, "관리자").await;
    let customer = create_customer(&db, "박철수", "123").await;

    let response = db
        .state
        .passport_service
        .send(admin.id, send_request(&[customer.id, 999_999]))
        .await
        .unwrap();

    assert_eq!(response.missing_user_ids, vec![999_999]);
    assert_eq!(response.results.len(), 2);
    assert!(response.results.iter().all(|r| !r.success));
    assert_eq!(db.count_where("passport_submissions", "user_id", customer.id).await, 0);
}

#[sqlx::test]
async fn test_send_results_follow_request_order(pool: PgPool) {
    let db = TestDatabase::from_pool(pool);
    let admin = create_admin(&db, "관리자").await;
    let customer = create_customer(&db, "박철수", "123").await;

    let response = db
        .state
        .passport_service
        .send(admin.id, send_request(&[999_999, customer.id, customer.id]))
        .await
        .unwrap();

    let order: Vec<i64> = response.results.iter().map(|r| r.user_id).collect();
    assert_eq!(order, vec![999_999, customer.id, customer.id]);
    assert_eq!(response.missing_user_ids, vec![999_999]);

    // the failed log carries the message the customer would have received
    let bodies: Vec<String> = sqlx::query_scalar(
        "SELECT message_body FROM passport_request_logs WHERE user_id = $1 AND status = 'FAILED'",
    )
    .bind(customer.id)
    .fetch_all(&db.pool)
    .await
    .unwrap();
    assert_eq!(bodies.len(), 2);
    assert!(bodies.iter().all(|b| b.contains("박철수님") && !b.contains("{링크}")));
}

#[sqlx::test]
async fn test_upload_after_submission_is_rejected(pool: PgPool) {
    let db = TestDatabase::from_pool(pool);
    let admin = create_admin(&db, "관리자").await;
    let customer = create_customer(&db, "최지원", "01033334444").await;

    let sent = db
        .state
        .passport_service
        .send(admin.id, send_request(&[customer.id]))
        .await
        .unwrap();
    let token = sent.results[0].token.clone().unwrap();

    db.state
        .passport_service
        .submit(
            &token,
            SubmitRequest {
                groups: Some(vec![GroupPayload {
                    group_number: json!(1),
                    guests: vec![GuestPayload {
                        name: Some("최지원".to_string()),
                        ..Default::default()
                    }],
                }]),
                remarks: None,
            },
        )
        .await
        .unwrap();

    let err = db
        .state
        .passport_service
        .upload(
            &token,
            vec![UploadedFile {
                file_name: "passport.jpg".to_string(),
                content_type: "image/jpeg".to_string(),
                bytes: vec![0xFF, 0xD8, 0xFF],
            }],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BusinessLogic(_)), "{:?}", err);
}

// ============================================================================
// Users and sessions
// ============================================================================

#[sqlx::test]
async fn test_login_and_lock(pool: PgPool) {
    let db = TestDatabase::from_pool(pool);
    let admin = create_admin(&db, "관리자").await;
    let customer = create_customer(&db, "김민수", "010-1234-5678").await;

    let (session, user) = db
        .state
        .auth_service
        .login(login_request(LoginMode::User, "김민수", "01012345678", TEST_PASSWORD))
        .await
        .unwrap();
    assert_eq!(user.id, customer.id);
    assert_eq!(session.id.len(), 64);

    let wrong = db
        .state
        .auth_service
        .login(login_request(LoginMode::User, "김민수", "01012345678", "nope"))
        .await;
    assert!(matches!(wrong, Err(AppError::Unauthorized(_))));

    // customers cannot log in through the admin door
    let as_admin = db
        .state
        .auth_service
        .login(login_request(LoginMode::Admin, "김민수", "01012345678", TEST_PASSWORD))
        .await;
    assert!(matches!(as_admin, Err(AppError::Unauthorized(_))));

    db.state
        .user_service
        .lock(&admin, customer.id, LockRequest::default())
        .await
        .unwrap();
    assert_eq!(db.count_where("sessions", "user_id", customer.id).await, 0);
    assert_eq!(db.count_where("password_events", "user_id", customer.id).await, 1);

    let locked = db
        .state
        .auth_service
        .login(login_request(LoginMode::User, "김민수", "01012345678", TEST_PASSWORD))
        .await;
    assert!(matches!(locked, Err(AppError::Forbidden(_))));

    let unlocked = db.state.user_service.unlock(&admin, customer.id).await.unwrap();
    assert!(!unlocked.is_locked);
}

#[sqlx::test]
async fn test_delete_user_leaves_no_orphans(pool: PgPool) {
    let db = TestDatabase::from_pool(pool);
    let admin = create_admin(&db, "관리자").await;
    let customer = create_customer(&db, "김민수", "010-1234-5678").await;
    let now = Utc::now();
    create_trip(&db, &customer, "MSC 벨리시마", now + Duration::days(10), now + Duration::days(15)).await;

    db.state
        .passport_service
        .send(admin.id, send_request(&[customer.id]))
        .await
        .unwrap();
    db.state
        .auth_service
        .login(login_request(LoginMode::User, "김민수", "01012345678", TEST_PASSWORD))
        .await
        .unwrap();

    let flow = db
        .state
        .chatbot_repo
        .create_flow("구매", PURCHASE_FLOW_CATEGORY, 1, None)
        .await
        .unwrap();
    let chat = db
        .state
        .chatbot_repo
        .create_session(&NewChatSession {
            flow_id: flow.id,
            user_id: Some(customer.id),
            user_phone: None,
            user_email: None,
            product_code: None,
        })
        .await
        .unwrap();
    let profile = create_profile(
        &db,
        json!({ "userId": customer.id, "type": "SALES_AGENT", "displayName": "김민수" }),
    )
    .await;

    tokio_test::assert_ok!(db.state.user_service.delete(&admin, customer.id).await);

    for (table, column) in [
        ("users", "id"),
        ("sessions", "user_id"),
        ("password_events", "user_id"),
        ("trips", "user_id"),
        ("passport_submissions", "user_id"),
        ("passport_request_logs", "user_id"),
        ("chat_bot_sessions", "user_id"),
        ("affiliate_profiles", "user_id"),
    ] {
        assert_eq!(
            db.count_where(table, column, customer.id).await,
            0,
            "{}.{} still references the deleted user",
            table,
            column
        );
    }

    // rows that only mention the user survive with the link cleared
    assert_eq!(db.count_where("chat_bot_sessions", "id", chat.id).await, 1);
    assert_eq!(db.count_where("affiliate_profiles", "id", profile.id).await, 1);
}

#[sqlx::test]
async fn test_admin_cannot_be_deleted(pool: PgPool) {
    let db = TestDatabase::from_pool(pool);
    let admin = create_admin(&db, "관리자").await;
    let other = create_admin(&db, "부관리자").await;

    let err = db.state.user_service.delete(&admin, other.id).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let err = db.state.user_service.delete(&admin, 424_242).await.unwrap_err();
    assert!(err.is_not_found());
}

#[sqlx::test]
async fn test_housekeeping_locks_finished_trips(pool: PgPool) {
    let db = TestDatabase::from_pool(pool);
    let traveller = create_customer(&db, "여행자", "01011112222").await;
    let upcoming = create_customer(&db, "예정자", "01033334444").await;
    let now = Utc::now();
    create_trip(&db, &traveller, "지난 항해", now - Duration::days(10), now - Duration::days(3)).await;
    create_trip(&db, &upcoming, "다음 항해", now + Duration::days(3), now + Duration::days(10)).await;

    let housekeeper = cruise_guide_backend::housekeeping::Housekeeper::new(
        db.state.user_service.clone(),
        std::time::Duration::from_secs(60),
    );
    let report = housekeeper.run_once().await.unwrap();
    assert_eq!(report.accounts_locked, 1);

    let traveller = db.state.user_repo.find_by_id(traveller.id).await.unwrap().unwrap();
    let upcoming = db.state.user_repo.find_by_id(upcoming.id).await.unwrap().unwrap();
    assert!(traveller.is_locked);
    assert_eq!(traveller.locked_reason.as_deref(), Some("trip_ended"));
    assert!(!upcoming.is_locked);
}

// ============================================================================
// Affiliate network
// ============================================================================

#[sqlx::test]
async fn test_confirm_sale_writes_ledger(pool: PgPool) {
    let db = TestDatabase::from_pool(pool);
    let admin = create_admin(&db, "관리자").await;
    let manager = create_profile(&db, json!({ "type": "BRANCH_MANAGER", "displayName": "부산지점" })).await;
    let agent = create_profile(&db, json!({ "type": "SALES_AGENT", "displayName": "판매원" })).await;
    assert!(manager.affiliate_code.starts_with("BM"));
    assert!(agent.affiliate_code.starts_with("SA"));

    let sale_request: CreateSaleRequest = serde_json::from_value(json!({
        "managerId": manager.id,
        "agentId": agent.id,
        "saleAmount": 1_000_000,
        "costAmount": "600000",
    }))
    .unwrap();
    let sale = db.state.affiliate_service.create_sale(sale_request).await.unwrap();

    let confirm: ConfirmSaleRequest = serde_json::from_value(json!({
        "branchCommission": 100_000,
        "salesCommission": 150_000,
    }))
    .unwrap();
    let confirmed = db
        .state
        .affiliate_service
        .confirm_sale(admin.id, sale.id, confirm)
        .await
        .unwrap();

    assert_eq!(confirmed.sale.status, "CONFIRMED");
    assert!(confirmed.sale.confirmed_at.is_some());
    assert_eq!(confirmed.breakdown.net_revenue, Decimal::from(400_000));
    assert_eq!(confirmed.breakdown.hq_net, Decimal::from(150_000));
    assert_eq!(confirmed.breakdown.withholding_amount, Decimal::from(4_950));
    assert_eq!(confirmed.breakdown.branch_withholding, Decimal::from(3_300));
    assert_eq!(confirmed.breakdown.total_withholding, Decimal::from(8_250));

    let amount_of = |entry_type: &str| {
        confirmed
            .ledger
            .iter()
            .find(|e| e.entry_type == entry_type)
            .map(|e| e.amount)
    };
    assert_eq!(amount_of("HQ_NET"), Some(Decimal::from(150_000)));
    assert_eq!(amount_of("BRANCH_COMMISSION"), Some(Decimal::from(100_000)));
    assert_eq!(amount_of("SALES_COMMISSION"), Some(Decimal::from(150_000)));
    assert_eq!(amount_of("WITHHOLDING"), Some(Decimal::from(-3_300)));
    assert_eq!(amount_of("OVERRIDE_COMMISSION"), None);

    // confirming again replaces the ledger instead of duplicating it
    let again = db
        .state
        .affiliate_service
        .confirm_sale(admin.id, sale.id, ConfirmSaleRequest::default())
        .await
        .unwrap();
    assert_eq!(again.ledger.len(), confirmed.ledger.len());
    assert_eq!(db.count_where("commission_ledger", "sale_id", sale.id).await, confirmed.ledger.len() as i64);
}

/// A 1,000,000 sale split between a branch manager and an agent, confirmed once
async fn confirmed_sale(db: &TestDatabase, admin_id: i64, lead_id: Option<i64>) -> AffiliateSale {
    let manager = create_profile(db, json!({ "type": "BRANCH_MANAGER" })).await;
    let agent = create_profile(db, json!({ "type": "SALES_AGENT" })).await;
    let sale_request: CreateSaleRequest = serde_json::from_value(json!({
        "leadId": lead_id,
        "managerId": manager.id,
        "agentId": agent.id,
        "saleAmount": 1_000_000,
        "costAmount": 600_000,
    }))
    .unwrap();
    let sale = db.state.affiliate_service.create_sale(sale_request).await.unwrap();

    let confirm: ConfirmSaleRequest = serde_json::from_value(json!({
        "branchCommission": 100_000,
        "salesCommission": 150_000,
    }))
    .unwrap();
    db.state
        .affiliate_service
        .confirm_sale(admin_id, sale.id, confirm)
        .await
        .unwrap()
        .sale
}

async fn settled_rows(pool: &PgPool, sale_id: i64) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM commission_ledger WHERE sale_id = $1 AND is_settled = TRUE")
        .bind(sale_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[sqlx::test]
async fn test_paid_sale_cannot_be_reconfirmed(pool: PgPool) {
    let db = TestDatabase::from_pool(pool);
    let admin = create_admin(&db, "관리자").await;
    let sale = confirmed_sale(&db, admin.id, None).await;

    sqlx::query("UPDATE commission_ledger SET is_settled = TRUE WHERE sale_id = $1")
        .bind(sale.id)
        .execute(&db.pool)
        .await
        .unwrap();
    sqlx::query("UPDATE affiliate_sales SET status = 'PAID' WHERE id = $1")
        .bind(sale.id)
        .execute(&db.pool)
        .await
        .unwrap();
    let settled = settled_rows(&db.pool, sale.id).await;
    assert!(settled > 0);

    let err = db
        .state
        .affiliate_service
        .confirm_sale(admin.id, sale.id, ConfirmSaleRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BusinessLogic(_)), "{:?}", err);

    assert_eq!(settled_rows(&db.pool, sale.id).await, settled);
    let status: String = sqlx::query_scalar("SELECT status FROM affiliate_sales WHERE id = $1")
        .bind(sale.id)
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(status, "PAID");
}

#[sqlx::test]
async fn test_reconfirm_keeps_settled_rows(pool: PgPool) {
    let db = TestDatabase::from_pool(pool);
    let admin = create_admin(&db, "관리자").await;
    let sale = confirmed_sale(&db, admin.id, None).await;

    sqlx::query(
        "UPDATE commission_ledger SET is_settled = TRUE WHERE sale_id = $1 AND entry_type = 'BRANCH_COMMISSION'",
    )
    .bind(sale.id)
    .execute(&db.pool)
    .await
    .unwrap();
    let total_before = db.count_where("commission_ledger", "sale_id", sale.id).await;

    let again = db
        .state
        .affiliate_service
        .confirm_sale(admin.id, sale.id, ConfirmSaleRequest::default())
        .await
        .unwrap();

    assert_eq!(again.sale.status, "CONFIRMED");
    assert_eq!(settled_rows(&db.pool, sale.id).await, 1);
    let branch_rows = again
        .ledger
        .iter()
        .filter(|e| e.entry_type == "BRANCH_COMMISSION")
        .count();
    assert_eq!(branch_rows, 1);
    assert_eq!(db.count_where("commission_ledger", "sale_id", sale.id).await, total_before);
}

#[sqlx::test]
async fn test_refund_reverses_ledger(pool: PgPool) {
    let db = TestDatabase::from_pool(pool);
    let admin = create_admin(&db, "관리자").await;
    let lead: CreateLeadRequest = serde_json::from_value(json!({ "customerName": "환불고객" })).unwrap();
    let lead = db.state.affiliate_service.create_lead(lead).await.unwrap();
    let sale = confirmed_sale(&db, admin.id, Some(lead.id)).await;
    let original = db.state.affiliate_repo.ledger_for_sale(sale.id).await.unwrap();

    let missing_reason = db
        .state
        .affiliate_service
        .refund_sale(admin.id, sale.id, RefundSaleRequest { reason: Some(" ".to_string()) })
        .await;
    assert!(matches!(missing_reason, Err(AppError::Validation(_))));

    let refunded = db
        .state
        .affiliate_service
        .refund_sale(admin.id, sale.id, RefundSaleRequest { reason: Some("일정 취소".to_string()) })
        .await
        .unwrap();

    assert_eq!(refunded.sale.status, "REFUNDED");
    assert_eq!(refunded.sale.refund_reason.as_deref(), Some("일정 취소"));
    assert!(refunded.sale.refunded_at.is_some());
    assert_eq!(refunded.refund_entries.len(), original.len());
    let original_sum: Decimal = original.iter().map(|e| e.amount).sum();
    let refund_sum: Decimal = refunded.refund_entries.iter().map(|e| e.amount).sum();
    assert_eq!(original_sum + refund_sum, Decimal::ZERO);
    assert!(refunded
        .refund_entries
        .iter()
        .all(|e| e.entry_type == "REFUND" && e.notes.as_deref() == Some("환불: 일정 취소")));

    let lead_status: String = sqlx::query_scalar("SELECT status FROM affiliate_leads WHERE id = $1")
        .bind(lead.id)
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(lead_status, "REFUNDED");

    let twice = db
        .state
        .affiliate_service
        .refund_sale(admin.id, sale.id, RefundSaleRequest { reason: Some("중복".to_string()) })
        .await;
    assert!(matches!(twice, Err(AppError::BusinessLogic(_))));
    let reconfirm = db
        .state
        .affiliate_service
        .confirm_sale(admin.id, sale.id, ConfirmSaleRequest::default())
        .await;
    assert!(matches!(reconfirm, Err(AppError::BusinessLogic(_))));

    let restored = db.state.affiliate_service.cancel_refund(admin.id, sale.id).await.unwrap();
    assert_eq!(restored.status, "CONFIRMED");
    assert!(restored.refund_reason.is_none());
    assert_eq!(db.count_where("commission_ledger", "sale_id", sale.id).await, original.len() as i64);
}

#[sqlx::test]
async fn test_agent_metrics_totals_equal_sum_of_rows(pool: PgPool) {
    let db = TestDatabase::from_pool(pool);
    let admin = create_admin(&db, "관리자").await;
    let manager = create_profile(&db, json!({ "type": "BRANCH_MANAGER", "displayName": "서울지점" })).await;
    let agents = [
        create_profile(&db, json!({ "type": "SALES_AGENT", "displayName": "가" })).await,
        create_profile(&db, json!({ "type": "SALES_AGENT", "displayName": "나" })).await,
    ];

    for (i, agent) in agents.iter().enumerate() {
        let relation: RelationRequest =
            serde_json::from_value(json!({ "managerId": manager.id, "agentId": agent.id })).unwrap();
        db.state.affiliate_service.set_relation(relation).await.unwrap();

        let lead: CreateLeadRequest = serde_json::from_value(json!({
            "managerId": manager.id,
            "agentId": agent.id,
            "customerName": format!("고객{}", i),
        }))
        .unwrap();
        db.state.affiliate_service.create_lead(lead).await.unwrap();

        let sale: CreateSaleRequest = serde_json::from_value(json!({
            "managerId": manager.id,
            "agentId": agent.id,
            "saleAmount": 500_000 * (i as i64 + 1),
            "costAmount": 300_000,
        }))
        .unwrap();
        let sale = db.state.affiliate_service.create_sale(sale).await.unwrap();
        let confirm: ConfirmSaleRequest =
            serde_json::from_value(json!({ "salesCommission": 50_000, "branchCommission": 20_000 })).unwrap();
        db.state
            .affiliate_service
            .confirm_sale(admin.id, sale.id, confirm)
            .await
            .unwrap();
    }

    let report = db
        .state
        .affiliate_service
        .agent_metrics(&MetricsQuery::default())
        .await
        .unwrap();
    assert_eq!(report.agents.len(), 2);
    let totals = report.totals.clone().unwrap();

    let sum = |f: fn(&cruise_guide_backend::commission::AgentMetrics) -> Decimal| -> Decimal {
        report.agents.iter().map(f).sum()
    };
    assert_eq!(totals.agent_count, 2);
    assert_eq!(totals.total_leads, report.agents.iter().map(|a| a.leads.total).sum::<i64>());
    assert_eq!(totals.total_sales_count, 2);
    assert_eq!(totals.total_sales_amount, sum(|a| a.sales.sale_amount));
    assert_eq!(totals.total_sales_amount, Decimal::from(1_500_000));
    assert_eq!(totals.total_sales_commission, sum(|a| a.sales.sales_commission));
    assert_eq!(totals.total_withholding, sum(|a| a.ledger.total_withholding));
    assert_eq!(report.managers.len(), 1);

    let csv = report.to_csv();
    assert_eq!(csv.lines().count(), 3);

    let team = db
        .state
        .affiliate_service
        .team_metrics(&MetricsQuery::default())
        .await
        .unwrap();
    assert_eq!(team.managers.len(), 1);
}

#[sqlx::test]
async fn test_lead_status_permissions(pool: PgPool) {
    let db = TestDatabase::from_pool(pool);
    let owner_user = create_customer(&db, "담당자", "01055556666").await;
    let other_user = create_customer(&db, "다른사람", "01077778888").await;
    let owner = create_profile(&db, json!({ "userId": owner_user.id, "type": "SALES_AGENT" })).await;
    create_profile(&db, json!({ "userId": other_user.id, "type": "SALES_AGENT" })).await;

    let lead: CreateLeadRequest = serde_json::from_value(json!({
        "agentId": owner.id,
        "customerName": "잠재고객",
    }))
    .unwrap();
    let lead = db.state.affiliate_service.create_lead(lead).await.unwrap();

    let denied = db
        .state
        .affiliate_service
        .update_lead_status(
            &other_user,
            lead.id,
            LeadStatusRequest {
                status: Some("CONTACTED".to_string()),
                notes: None,
            },
        )
        .await;
    assert!(matches!(denied, Err(AppError::Forbidden(_))));

    let updated = db
        .state
        .affiliate_service
        .update_lead_status(
            &owner_user,
            lead.id,
            LeadStatusRequest {
                status: Some("PURCHASED".to_string()),
                notes: Some("결제 완료".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.status, "PURCHASED");
    assert_eq!(updated.notes.as_deref(), Some("결제 완료"));

    let history = &updated.metadata.unwrap()["statusHistory"];
    assert_eq!(history[0]["from"], "NEW");
    assert_eq!(history[0]["to"], "PURCHASED");
}

// ============================================================================
// Chat-bot
// ============================================================================

#[sqlx::test]
async fn test_saved_flow_can_be_walked(pool: PgPool) {
    let db = TestDatabase::from_pool(pool);
    let chatbot = &db.state.chatbot_service;

    let flow = chatbot
        .create_flow(CreateFlowRequest {
            name: Some("구매 상담".to_string()),
            category: None,
            order: Some(1),
            final_page_url: Some("/thanks".to_string()),
        })
        .await
        .unwrap();

    let nodes: Vec<EditorNode> = serde_json::from_value(json!([
        { "id": "s", "type": "start", "data": {} },
        { "id": "q", "type": "question", "data": { "content": "{userName}, {packageName} 어떠세요?", "options": ["좋아요", "글쎄요"] } },
        { "id": "yes", "type": "text", "data": { "content": "결제로 이동합니다." } },
        { "id": "no", "type": "text", "data": { "content": "다른 상품을 보여드릴게요." } },
        { "id": "e", "type": "end", "data": {} }
    ]))
    .unwrap();
    let edges: Vec<EditorEdge> = serde_json::from_value(json!([
        { "source": "s", "target": "q" },
        { "source": "q", "target": "yes" },
        { "source": "q", "target": "no" },
        { "source": "yes", "target": "e" }
    ]))
    .unwrap();

    let saved = chatbot
        .save_flow(flow.id, SaveFlowRequest { nodes, edges })
        .await
        .unwrap();
    assert_eq!(saved.questions.len(), 3);
    assert!(saved.start_question_id.is_some());

    let start = chatbot.start(None, None).await.unwrap();
    assert!(start.ok);
    assert_eq!(start.flow_id, Some(flow.id));
    assert_eq!(start.final_page_url.as_deref(), Some("/thanks"));
    let first = start.question.unwrap();
    assert_eq!(first.id, saved.start_question_id.unwrap());
    assert!(first.question_text.starts_with("행복♥"));
    assert_eq!(first.option_a.as_deref(), Some("좋아요"));

    let yes_id = first.next_question_id_a.unwrap();
    let terminal = chatbot.question(None, yes_id, None).await.unwrap();
    assert!(terminal.question.is_none());
    assert_eq!(terminal.final_page_url.as_deref(), Some("/thanks"));

    let missing = chatbot.question(None, 987_654, None).await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));
}

#[sqlx::test]
async fn test_start_skips_inactive_start_question(pool: PgPool) {
    let db = TestDatabase::from_pool(pool);
    let chatbot = &db.state.chatbot_service;

    let flow = chatbot
        .create_flow(CreateFlowRequest {
            name: Some("구매 상담".to_string()),
            category: None,
            order: Some(1),
            final_page_url: None,
        })
        .await
        .unwrap();
    let nodes: Vec<EditorNode> = serde_json::from_value(json!([
        { "id": "s", "type": "start", "data": {} },
        { "id": "q", "type": "question", "data": { "content": "여행은 처음이세요?", "options": ["네", "아니요"] } },
        { "id": "t", "type": "text", "data": { "content": "안내를 이어갈게요." } }
    ]))
    .unwrap();
    let edges: Vec<EditorEdge> = serde_json::from_value(json!([
        { "source": "s", "target": "q" },
        { "source": "q", "target": "t" }
    ]))
    .unwrap();
    let saved = chatbot
        .save_flow(flow.id, SaveFlowRequest { nodes, edges })
        .await
        .unwrap();
    let start_id = saved.start_question_id.unwrap();

    sqlx::query("UPDATE chat_bot_questions SET is_active = FALSE WHERE id = $1")
        .bind(start_id)
        .execute(&db.pool)
        .await
        .unwrap();

    let start = chatbot.start(None, None).await.unwrap();
    assert!(start.ok);
    let first = start.question.unwrap();
    assert_ne!(first.id, start_id);
    assert!(saved.questions.iter().any(|q| q.id == first.id));
}

#[sqlx::test]
async fn test_start_without_flow_reports_not_ok(pool: PgPool) {
    let db = TestDatabase::from_pool(pool);
    let start = db.state.chatbot_service.start(None, Some("msc01")).await.unwrap();
    assert!(!start.ok);
    assert!(start.error.is_some());
}

// ============================================================================
// Scheduled messages
// ============================================================================

#[sqlx::test]
async fn test_scheduled_message_crud(pool: PgPool) {
    let db = TestDatabase::from_pool(pool);
    let admin = create_admin(&db, "관리자").await;
    let service = &db.state.scheduled_message_service;

    let request: MessageRequest = serde_json::from_value(json!({
        "title": "출발 안내",
        "sendMethod": "sms",
        "stages": [
            { "daysAfter": 0, "title": "1단계", "content": "곧 출발합니다" },
            { "daysAfter": 3, "title": "2단계", "content": "즐거운 여행 되세요" }
        ]
    }))
    .unwrap();
    let created = service.create(admin.id, request).await.unwrap();
    assert_eq!(created.stages.len(), 2);
    assert_eq!(created.message.max_days, 999_999);

    let update: MessageRequest = serde_json::from_value(json!({
        "title": "출발 안내 (수정)",
        "sendMethod": "email",
        "isActive": false,
        "stages": [{ "content": "한 단계만" }]
    }))
    .unwrap();
    let updated = service.update(created.message.id, update).await.unwrap();
    assert_eq!(updated.stages.len(), 1);
    assert!(!updated.message.is_active);
    assert_eq!(db.count_where("scheduled_message_stages", "scheduled_message_id", created.message.id).await, 1);

    assert_eq!(service.list().await.unwrap().len(), 1);
    tokio_test::assert_ok!(service.delete(created.message.id).await);
    assert!(service.delete(created.message.id).await.unwrap_err().is_not_found());
}
