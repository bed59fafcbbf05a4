//! Affiliate network models: profiles, relations, leads, sales and the commission ledger

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// Tier of an affiliate profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProfileType {
    Hq,
    BranchManager,
    SalesAgent,
}

impl ProfileType {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_uppercase().as_str() {
            "HQ" => Ok(ProfileType::Hq),
            "BRANCH_MANAGER" => Ok(ProfileType::BranchManager),
            "SALES_AGENT" => Ok(ProfileType::SalesAgent),
            _ => Err(format!("Invalid profile type: {}", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileType::Hq => "HQ",
            ProfileType::BranchManager => "BRANCH_MANAGER",
            ProfileType::SalesAgent => "SALES_AGENT",
        }
    }

    /// Prefix for generated affiliate codes
    pub fn code_prefix(&self) -> &'static str {
        match self {
            ProfileType::Hq => "HQ",
            ProfileType::BranchManager => "BM",
            ProfileType::SalesAgent => "SA",
        }
    }
}

/// Manager to agent link state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RelationStatus {
    Active,
    Paused,
    Terminated,
}

impl RelationStatus {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Ok(RelationStatus::Active),
            "PAUSED" => Ok(RelationStatus::Paused),
            "TERMINATED" => Ok(RelationStatus::Terminated),
            _ => Err(format!("Invalid relation status: {}", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationStatus::Active => "ACTIVE",
            RelationStatus::Paused => "PAUSED",
            RelationStatus::Terminated => "TERMINATED",
        }
    }
}

/// Lead pipeline status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeadStatus {
    New,
    Contacted,
    InProgress,
    Purchased,
    Refunded,
    Closed,
    TestGuide,
}

impl LeadStatus {
    pub const ALL: [LeadStatus; 7] = [
        LeadStatus::New,
        LeadStatus::Contacted,
        LeadStatus::InProgress,
        LeadStatus::Purchased,
        LeadStatus::Refunded,
        LeadStatus::Closed,
        LeadStatus::TestGuide,
    ];

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.trim().to_uppercase().as_str() {
            "NEW" => Ok(LeadStatus::New),
            "CONTACTED" => Ok(LeadStatus::Contacted),
            "IN_PROGRESS" => Ok(LeadStatus::InProgress),
            "PURCHASED" => Ok(LeadStatus::Purchased),
            "REFUNDED" => Ok(LeadStatus::Refunded),
            "CLOSED" => Ok(LeadStatus::Closed),
            "TEST_GUIDE" => Ok(LeadStatus::TestGuide),
            _ => Err(format!("Invalid lead status: {}", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "NEW",
            LeadStatus::Contacted => "CONTACTED",
            LeadStatus::InProgress => "IN_PROGRESS",
            LeadStatus::Purchased => "PURCHASED",
            LeadStatus::Refunded => "REFUNDED",
            LeadStatus::Closed => "CLOSED",
            LeadStatus::TestGuide => "TEST_GUIDE",
        }
    }
}

/// Sale lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaleStatus {
    Pending,
    Confirmed,
    Paid,
    PayoutScheduled,
    Cancelled,
    Refunded,
}

impl SaleStatus {
    /// Statuses that count towards commission metrics
    pub const COUNTED: [SaleStatus; 3] = [
        SaleStatus::Confirmed,
        SaleStatus::Paid,
        SaleStatus::PayoutScheduled,
    ];

    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(SaleStatus::Pending),
            "CONFIRMED" => Ok(SaleStatus::Confirmed),
            "PAID" => Ok(SaleStatus::Paid),
            "PAYOUT_SCHEDULED" => Ok(SaleStatus::PayoutScheduled),
            "CANCELLED" => Ok(SaleStatus::Cancelled),
            "REFUNDED" => Ok(SaleStatus::Refunded),
            _ => Err(format!("Invalid sale status: {}", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Pending => "PENDING",
            SaleStatus::Confirmed => "CONFIRMED",
            SaleStatus::Paid => "PAID",
            SaleStatus::PayoutScheduled => "PAYOUT_SCHEDULED",
            SaleStatus::Cancelled => "CANCELLED",
            SaleStatus::Refunded => "REFUNDED",
        }
    }

    /// Only sales that have not been paid out or reversed may be (re)confirmed
    pub fn is_confirmable(&self) -> bool {
        matches!(self, SaleStatus::Pending | SaleStatus::Confirmed)
    }

    pub fn counted_strs() -> Vec<String> {
        Self::COUNTED.iter().map(|s| s.as_str().to_string()).collect()
    }
}

/// Ledger row kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerEntryType {
    HqNet,
    BranchCommission,
    SalesCommission,
    OverrideCommission,
    Withholding,
    Adjustment,
    Refund,
}

impl LedgerEntryType {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_uppercase().as_str() {
            "HQ_NET" => Ok(LedgerEntryType::HqNet),
            "BRANCH_COMMISSION" => Ok(LedgerEntryType::BranchCommission),
            "SALES_COMMISSION" => Ok(LedgerEntryType::SalesCommission),
            "OVERRIDE_COMMISSION" => Ok(LedgerEntryType::OverrideCommission),
            "WITHHOLDING" => Ok(LedgerEntryType::Withholding),
            "ADJUSTMENT" => Ok(LedgerEntryType::Adjustment),
            "REFUND" => Ok(LedgerEntryType::Refund),
            _ => Err(format!("Invalid ledger entry type: {}", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEntryType::HqNet => "HQ_NET",
            LedgerEntryType::BranchCommission => "BRANCH_COMMISSION",
            LedgerEntryType::SalesCommission => "SALES_COMMISSION",
            LedgerEntryType::OverrideCommission => "OVERRIDE_COMMISSION",
            LedgerEntryType::Withholding => "WITHHOLDING",
            LedgerEntryType::Adjustment => "ADJUSTMENT",
            LedgerEntryType::Refund => "REFUND",
        }
    }
}

/// Reseller account
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AffiliateProfile {
    pub id: i64,
    pub user_id: Option<i64>,
    #[serde(rename = "type")]
    pub r#type: String,
    pub affiliate_code: String,
    pub display_name: Option<String>,
    pub nickname: Option<String>,
    pub contact_phone: Option<String>,
    pub status: String,
    pub withholding_rate: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

impl AffiliateProfile {
    pub fn type_enum(&self) -> Option<ProfileType> {
        ProfileType::from_str(&self.r#type).ok()
    }

    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.nickname.as_deref())
            .unwrap_or(&self.affiliate_code)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AffiliateRelation {
    pub id: i64,
    pub manager_id: i64,
    pub agent_id: Option<i64>,
    pub status: String,
    pub connected_at: DateTime<Utc>,
}

/// Prospective customer owned by a manager and/or agent
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AffiliateLead {
    pub id: i64,
    pub manager_id: Option<i64>,
    pub agent_id: Option<i64>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub status: String,
    pub notes: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AffiliateSale {
    pub id: i64,
    pub lead_id: Option<i64>,
    pub manager_id: Option<i64>,
    pub agent_id: Option<i64>,
    pub product_code: Option<String>,
    pub sale_amount: Decimal,
    pub cost_amount: Option<Decimal>,
    pub net_revenue: Option<Decimal>,
    pub branch_commission: Option<Decimal>,
    pub sales_commission: Option<Decimal>,
    pub override_commission: Option<Decimal>,
    pub withholding_amount: Option<Decimal>,
    pub status: String,
    pub sale_date: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refund_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AffiliateSale {
    pub fn status_enum(&self) -> Option<SaleStatus> {
        SaleStatus::from_str(&self.status).ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CommissionLedgerEntry {
    pub id: i64,
    pub sale_id: i64,
    pub profile_id: Option<i64>,
    pub entry_type: String,
    pub amount: Decimal,
    pub currency: String,
    pub withholding_amount: Decimal,
    pub is_settled: bool,
    pub notes: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lead_status_round_trip_names() {
        for status in LeadStatus::ALL {
            assert_eq!(LeadStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(LeadStatus::from_str("WON").is_err());
    }

    #[test]
    fn test_counted_sale_statuses() {
        assert_eq!(
            SaleStatus::counted_strs(),
            vec!["CONFIRMED", "PAID", "PAYOUT_SCHEDULED"]
        );
    }

    #[test]
    fn test_only_pending_and_confirmed_sales_are_confirmable() {
        assert!(SaleStatus::Pending.is_confirmable());
        assert!(SaleStatus::Confirmed.is_confirmable());
        for status in [
            SaleStatus::Paid,
            SaleStatus::PayoutScheduled,
            SaleStatus::Cancelled,
            SaleStatus::Refunded,
        ] {
            assert!(!status.is_confirmable(), "{:?}", status);
        }
        assert_eq!(SaleStatus::from_str("refunded").unwrap(), SaleStatus::Refunded);
    }

    #[test]
    fn test_profile_type_serde_names() {
        let json = serde_json::to_string(&ProfileType::BranchManager).unwrap();
        assert_eq!(json, "\"BRANCH_MANAGER\"");
        assert_eq!(ProfileType::from_str("sales_agent").unwrap(), ProfileType::SalesAgent);
    }
}
