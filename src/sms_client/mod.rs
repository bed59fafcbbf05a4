pub mod aligo_client;

pub use aligo_client::{AligoClient, MessageType, RemainOutcome, SendOutcome, SmsError, SMS_BYTE_LIMIT};
