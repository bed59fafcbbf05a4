use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A customer's booked cruise
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub id: i64,
    pub user_id: i64,
    pub cruise_name: Option<String>,
    pub reservation_code: Option<String>,
    pub product_code: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Trip {
    /// Whether the trip covers the given instant
    pub fn in_progress_at(&self, now: DateTime<Utc>) -> bool {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) => start <= now && now <= end,
            _ => false,
        }
    }
}

/// Sellable cruise package
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CruiseProduct {
    pub id: i64,
    pub product_code: String,
    pub package_name: String,
    pub cruise_line: String,
    pub ship_name: String,
    pub nights: i32,
    pub days: i32,
    pub base_price: Option<i64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub itinerary_pattern: Option<String>,
}
