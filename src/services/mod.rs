pub mod affiliate_service;
pub mod auth_service;
pub mod chatbot_service;
pub mod input;
pub mod passport_service;
pub mod scheduled_message_service;
pub mod user_service;

pub use affiliate_service::AffiliateService;
pub use auth_service::AuthService;
pub use chatbot_service::ChatBotService;
pub use passport_service::PassportService;
pub use scheduled_message_service::ScheduledMessageService;
pub use user_service::UserService;
