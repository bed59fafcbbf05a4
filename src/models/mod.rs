//! Domain models for the cruise guide back office.
//!
//! Each struct maps one table row; enum columns are stored as TEXT and
//! exposed through `as_str`/`from_str` helpers.

pub mod affiliate;
pub mod chatbot;
pub mod passport;
pub mod scheduled_message;
pub mod trip;
pub mod user;

pub use affiliate::{
    AffiliateLead, AffiliateProfile, AffiliateRelation, AffiliateSale, CommissionLedgerEntry,
    LeadStatus, LedgerEntryType, ProfileType, RelationStatus, SaleStatus,
};
pub use chatbot::{ChatBotFlow, ChatBotQuestion, ChatBotSession, PURCHASE_FLOW_CATEGORY};
pub use passport::{
    LogStatus, MessageChannel, PassportGuest, PassportRequestLog, PassportRequestTemplate,
    PassportSubmission,
};
pub use scheduled_message::{ScheduledMessage, ScheduledMessageStage, ScheduledMessageWithStages};
pub use trip::{CruiseProduct, Trip};
pub use user::{PasswordEvent, Session, User, UserRole};
