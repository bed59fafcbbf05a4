//! Cruise Guide back office
//!
//! This module exposes the backend components for use by the binary and the tests.

pub mod auth;
pub mod chatbot;
pub mod commission;
pub mod config;
pub mod database;
pub mod error;
pub mod housekeeping;
pub mod http;
pub mod models;
pub mod repositories;
pub mod services;
pub mod sms_client;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{AppError, AppResult};

use database::Database;
use repositories::*;
use services::*;
use sms_client::AligoClient;
use std::sync::Arc;

/// Application state containing all repositories and services
pub struct AppState {
    pub config: AppConfig,
    pub database: Database,
    pub user_repo: Arc<UserRepository>,
    pub trip_repo: Arc<TripRepository>,
    pub passport_repo: Arc<PassportRepository>,
    pub affiliate_repo: Arc<AffiliateRepository>,
    pub chatbot_repo: Arc<ChatBotRepository>,
    pub scheduled_message_repo: Arc<ScheduledMessageRepository>,
    pub sms_client: Arc<AligoClient>,
    pub auth_service: Arc<AuthService>,
    pub passport_service: Arc<PassportService>,
    pub affiliate_service: Arc<AffiliateService>,
    pub chatbot_service: Arc<ChatBotService>,
    pub user_service: Arc<UserService>,
    pub scheduled_message_service: Arc<ScheduledMessageService>,
}

impl AppState {
    /// Create a new AppState with initialized repositories and services
    pub fn new(pool: sqlx::PgPool, config: AppConfig) -> Self {
        let database = Database::new(pool.clone());

        let user_repo = Arc::new(UserRepository::new(pool.clone()));
        let trip_repo = Arc::new(TripRepository::new(pool.clone()));
        let passport_repo = Arc::new(PassportRepository::new(pool.clone()));
        let affiliate_repo = Arc::new(AffiliateRepository::new(pool.clone()));
        let chatbot_repo = Arc::new(ChatBotRepository::new(pool.clone()));
        let scheduled_message_repo = Arc::new(ScheduledMessageRepository::new(pool));
        let sms_client = Arc::new(AligoClient::new(config.sms.clone()));

        Self {
            auth_service: Arc::new(AuthService::new(user_repo.clone(), config.session.clone())),
            passport_service: Arc::new(PassportService::new(
                user_repo.clone(),
                trip_repo.clone(),
                passport_repo.clone(),
                sms_client.clone(),
                config.passport.clone(),
            )),
            affiliate_service: Arc::new(AffiliateService::new(affiliate_repo.clone())),
            chatbot_service: Arc::new(ChatBotService::new(chatbot_repo.clone(), trip_repo.clone())),
            user_service: Arc::new(UserService::new(
                user_repo.clone(),
                trip_repo.clone(),
                passport_repo.clone(),
                affiliate_repo.clone(),
            )),
            scheduled_message_service: Arc::new(ScheduledMessageService::new(
                scheduled_message_repo.clone(),
            )),
            config,
            database,
            user_repo,
            trip_repo,
            passport_repo,
            affiliate_repo,
            chatbot_repo,
            scheduled_message_repo,
            sms_client,
        }
    }
}
