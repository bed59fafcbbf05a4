pub mod affiliate_repository;
pub mod chatbot_repository;
pub mod passport_repository;
pub mod scheduled_message_repository;
pub mod trip_repository;
pub mod user_repository;

// Re-export all repositories for convenient access
pub use affiliate_repository::AffiliateRepository;
pub use chatbot_repository::ChatBotRepository;
pub use passport_repository::PassportRepository;
pub use scheduled_message_repository::ScheduledMessageRepository;
pub use trip_repository::TripRepository;
pub use user_repository::UserRepository;
