use crate::models::{CommissionLedgerEntry, LedgerEntryType};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_CURRENCY: &str = "KRW";

/// Default withholding tax rate in percent (3.3%)
pub fn default_withholding_rate() -> Decimal {
    Decimal::new(33, 1)
}

/// Error types for commission calculations
#[derive(Error, Debug, PartialEq)]
pub enum CommissionError {
    #[error("Ledger generation requires a sale id")]
    MissingSaleId,
}

pub type CommissionResult<T> = Result<T, CommissionError>;

/// Amounts are whole currency units. Halves round up towards positive
/// infinity, so -1.5 becomes -1.
fn round_amount(value: Decimal) -> Decimal {
    (value + Decimal::new(5, 1)).floor()
}

fn percent_of(amount: Decimal, rate: Decimal) -> Decimal {
    round_amount(amount * rate / Decimal::ONE_HUNDRED)
}

/// Commission split snapshot from a product tier. Explicit input values win
/// over tier values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionTier {
    pub sale_amount: Option<Decimal>,
    pub cost_amount: Option<Decimal>,
    pub hq_share_amount: Option<Decimal>,
    pub branch_share_amount: Option<Decimal>,
    pub sales_share_amount: Option<Decimal>,
    pub override_amount: Option<Decimal>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionInput {
    pub sale_amount: Decimal,
    pub cost_amount: Option<Decimal>,
    pub branch_commission: Option<Decimal>,
    pub sales_commission: Option<Decimal>,
    pub override_commission: Option<Decimal>,
    /// Agent rate in percent
    pub withholding_rate: Option<Decimal>,
    /// Manager rate in percent; falls back to the agent rate
    pub manager_withholding_rate: Option<Decimal>,
    pub include_hq_net: bool,
    pub tier: Option<CommissionTier>,
    pub currency: Option<String>,
}

impl CommissionInput {
    pub fn new(sale_amount: Decimal) -> Self {
        Self {
            sale_amount,
            cost_amount: None,
            branch_commission: None,
            sales_commission: None,
            override_commission: None,
            withholding_rate: None,
            manager_withholding_rate: None,
            include_hq_net: true,
            tier: None,
            currency: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommissionBreakdown {
    pub sale_amount: Decimal,
    pub cost_amount: Decimal,
    pub net_revenue: Decimal,
    pub hq_net: Decimal,
    pub branch_commission: Decimal,
    pub sales_commission: Decimal,
    pub override_commission: Decimal,
    /// Withholding on the sales commission
    pub withholding_amount: Decimal,
    pub branch_withholding: Decimal,
    pub override_withholding: Decimal,
    pub total_withholding: Decimal,
    pub currency: String,
}

/// Split a sale into HQ, branch, sales and override shares plus withholding
pub fn calculate_breakdown(input: &CommissionInput) -> CommissionBreakdown {
    let tier = input.tier.clone().unwrap_or_default();

    let sale_amount = round_amount(input.sale_amount);
    let cost_amount = round_amount(input.cost_amount.or(tier.cost_amount).unwrap_or(Decimal::ZERO));
    let net_revenue = sale_amount - cost_amount;

    let branch_commission = round_amount(
        input
            .branch_commission
            .or(tier.branch_share_amount)
            .unwrap_or(Decimal::ZERO),
    );
    let sales_commission = round_amount(
        input
            .sales_commission
            .or(tier.sales_share_amount)
            .unwrap_or(Decimal::ZERO),
    );
    let override_commission = round_amount(
        input
            .override_commission
            .or(tier.override_amount)
            .unwrap_or(Decimal::ZERO),
    );

    let hq_net = if input.include_hq_net {
        let candidate = tier.hq_share_amount.unwrap_or(
            net_revenue - branch_commission - sales_commission - override_commission,
        );
        round_amount(candidate).max(Decimal::ZERO)
    } else {
        Decimal::ZERO
    };

    let agent_rate = input.withholding_rate.unwrap_or_else(default_withholding_rate);
    let manager_rate = input
        .manager_withholding_rate
        .or(input.withholding_rate)
        .unwrap_or_else(default_withholding_rate);

    let withholding_amount = percent_of(sales_commission, agent_rate);
    let branch_withholding = if branch_commission > Decimal::ZERO {
        percent_of(branch_commission, manager_rate)
    } else {
        Decimal::ZERO
    };
    let override_withholding = if override_commission > Decimal::ZERO {
        percent_of(override_commission, manager_rate)
    } else {
        Decimal::ZERO
    };

    let currency = tier
        .currency
        .or_else(|| input.currency.clone())
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

    CommissionBreakdown {
        sale_amount,
        cost_amount,
        net_revenue,
        hq_net,
        branch_commission,
        sales_commission,
        override_commission,
        withholding_amount,
        branch_withholding,
        override_withholding,
        total_withholding: withholding_amount + branch_withholding + override_withholding,
        currency,
    }
}

/// Manual ledger adjustment appended after the generated rows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerAdjustment {
    pub entry_type: LedgerEntryType,
    pub amount: Decimal,
    pub profile_id: Option<i64>,
    pub withholding_amount: Option<Decimal>,
    pub notes: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct LedgerOptions {
    pub sale_id: i64,
    pub manager_profile_id: Option<i64>,
    pub agent_profile_id: Option<i64>,
    pub override_profile_id: Option<i64>,
    pub extra_adjustments: Vec<LedgerAdjustment>,
    pub metadata: Option<Value>,
}

/// Ledger row ready to insert
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLedgerEntry {
    pub sale_id: i64,
    pub profile_id: Option<i64>,
    pub entry_type: LedgerEntryType,
    pub amount: Decimal,
    pub currency: String,
    pub withholding_amount: Decimal,
    pub notes: Option<String>,
    pub metadata: Option<Value>,
}

fn note_metadata(base: &Option<Value>, note: &str) -> Value {
    match base {
        None => serde_json::json!({ "note": note }),
        Some(Value::Object(map)) => {
            let mut map = map.clone();
            map.insert("note".to_string(), Value::String(note.to_string()));
            Value::Object(map)
        }
        Some(other) => serde_json::json!({ "note": note, "context": other }),
    }
}

/// Compute the breakdown and the ledger rows it produces
///
/// Rows with a zero amount, or whose owning profile is unknown, are skipped.
pub fn generate_ledger_entries(
    input: &CommissionInput,
    options: &LedgerOptions,
) -> CommissionResult<(CommissionBreakdown, Vec<NewLedgerEntry>)> {
    if options.sale_id <= 0 {
        return Err(CommissionError::MissingSaleId);
    }

    let breakdown = calculate_breakdown(input);
    let currency = breakdown.currency.clone();
    let entry = |profile_id: Option<i64>,
                 entry_type: LedgerEntryType,
                 amount: Decimal,
                 withholding_amount: Decimal| NewLedgerEntry {
        sale_id: options.sale_id,
        profile_id,
        entry_type,
        amount,
        currency: currency.clone(),
        withholding_amount,
        notes: None,
        metadata: options.metadata.clone(),
    };

    let mut entries = Vec::new();
    let override_owner = options.override_profile_id.or(options.manager_profile_id);

    if input.include_hq_net && breakdown.hq_net > Decimal::ZERO {
        entries.push(entry(None, LedgerEntryType::HqNet, breakdown.hq_net, Decimal::ZERO));
    }

    if let Some(manager_id) = options.manager_profile_id {
        if breakdown.branch_commission > Decimal::ZERO {
            entries.push(entry(
                Some(manager_id),
                LedgerEntryType::BranchCommission,
                breakdown.branch_commission,
                breakdown.branch_withholding,
            ));
        }
    }

    if let Some(agent_id) = options.agent_profile_id {
        if breakdown.sales_commission > Decimal::ZERO {
            entries.push(entry(
                Some(agent_id),
                LedgerEntryType::SalesCommission,
                breakdown.sales_commission,
                breakdown.withholding_amount,
            ));
        }
    }

    if breakdown.override_commission > Decimal::ZERO {
        entries.push(entry(
            override_owner,
            LedgerEntryType::OverrideCommission,
            breakdown.override_commission,
            breakdown.override_withholding,
        ));
    }

    if let Some(manager_id) = options.manager_profile_id {
        if breakdown.branch_withholding > Decimal::ZERO {
            let mut row = entry(
                Some(manager_id),
                LedgerEntryType::Withholding,
                -breakdown.branch_withholding,
                Decimal::ZERO,
            );
            row.notes = Some("자동 원천징수 (대리점장 브랜치)".to_string());
            row.metadata = Some(note_metadata(&options.metadata, "branch-withholding"));
            entries.push(row);
        }

        if breakdown.override_withholding > Decimal::ZERO {
            let mut row = entry(
                override_owner,
                LedgerEntryType::Withholding,
                -breakdown.override_withholding,
                Decimal::ZERO,
            );
            row.notes = Some("자동 원천징수 (대리점장 오버라이드)".to_string());
            row.metadata = Some(note_metadata(&options.metadata, "override-withholding"));
            entries.push(row);
        }
    }

    for adjustment in &options.extra_adjustments {
        if adjustment.amount.is_zero() {
            continue;
        }
        entries.push(NewLedgerEntry {
            sale_id: options.sale_id,
            profile_id: adjustment.profile_id,
            entry_type: adjustment.entry_type,
            amount: round_amount(adjustment.amount),
            currency: currency.clone(),
            withholding_amount: adjustment.withholding_amount.unwrap_or(Decimal::ZERO),
            notes: adjustment.notes.clone(),
            metadata: adjustment.metadata.clone().or_else(|| options.metadata.clone()),
        });
    }

    Ok((breakdown, entries))
}

/// Negated copies of a sale's ledger rows, booked when the sale is refunded.
/// Rows that are themselves refunds are not reversed again.
pub fn refund_entries(
    ledger: &[CommissionLedgerEntry],
    reason: &str,
    processed_by: i64,
    now: DateTime<Utc>,
) -> Vec<NewLedgerEntry> {
    ledger
        .iter()
        .filter(|e| e.entry_type != LedgerEntryType::Refund.as_str())
        .map(|e| NewLedgerEntry {
            sale_id: e.sale_id,
            profile_id: e.profile_id,
            entry_type: LedgerEntryType::Refund,
            amount: -e.amount,
            currency: e.currency.clone(),
            withholding_amount: -e.withholding_amount,
            notes: Some(format!("환불: {}", reason)),
            metadata: Some(serde_json::json!({
                "originalEntryId": e.id,
                "originalEntryType": e.entry_type,
                "refundReason": reason,
                "processedBy": processed_by,
                "processedAt": now.to_rfc3339(),
            })),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(v: i64) -> Decimal {
        Decimal::new(v, 0)
    }

    fn sample_input() -> CommissionInput {
        let mut input = CommissionInput::new(dec(3_000_000));
        input.cost_amount = Some(dec(2_000_000));
        input.branch_commission = Some(dec(200_000));
        input.sales_commission = Some(dec(300_000));
        input.override_commission = Some(dec(50_000));
        input
    }

    #[test]
    fn test_breakdown_with_default_rate() {
        let b = calculate_breakdown(&sample_input());

        assert_eq!(b.net_revenue, dec(1_000_000));
        assert_eq!(b.hq_net, dec(450_000));
        // 3.3% of 300,000
        assert_eq!(b.withholding_amount, dec(9_900));
        assert_eq!(b.branch_withholding, dec(6_600));
        assert_eq!(b.override_withholding, dec(1_650));
        assert_eq!(b.total_withholding, dec(18_150));
        assert_eq!(b.currency, "KRW");
    }

    #[test]
    fn test_manager_rate_defaults_to_agent_rate() {
        let mut input = sample_input();
        input.withholding_rate = Some(dec(10));
        let b = calculate_breakdown(&input);
        assert_eq!(b.withholding_amount, dec(30_000));
        assert_eq!(b.branch_withholding, dec(20_000));

        input.manager_withholding_rate = Some(Decimal::ZERO);
        let b = calculate_breakdown(&input);
        assert_eq!(b.branch_withholding, Decimal::ZERO);
        assert_eq!(b.override_withholding, Decimal::ZERO);
    }

    #[test]
    fn test_hq_net_never_negative() {
        let mut input = sample_input();
        input.cost_amount = Some(dec(2_900_000));
        let b = calculate_breakdown(&input);
        assert_eq!(b.hq_net, Decimal::ZERO);

        input.include_hq_net = false;
        input.cost_amount = Some(Decimal::ZERO);
        assert_eq!(calculate_breakdown(&input).hq_net, Decimal::ZERO);
    }

    #[test]
    fn test_tier_values_fill_gaps() {
        let mut input = CommissionInput::new(dec(1_000_000));
        input.sales_commission = Some(dec(10_000));
        input.tier = Some(CommissionTier {
            sales_share_amount: Some(dec(99_999)),
            branch_share_amount: Some(dec(20_000)),
            hq_share_amount: Some(dec(123_456)),
            currency: Some("USD".to_string()),
            ..Default::default()
        });

        let b = calculate_breakdown(&input);
        assert_eq!(b.sales_commission, dec(10_000));
        assert_eq!(b.branch_commission, dec(20_000));
        assert_eq!(b.hq_net, dec(123_456));
        assert_eq!(b.currency, "USD");
    }

    #[test]
    fn test_half_rounds_up() {
        let mut input = CommissionInput::new(dec(100));
        input.sales_commission = Some(dec(15));
        input.withholding_rate = Some(dec(10));
        // 1.5 -> 2
        assert_eq!(calculate_breakdown(&input).withholding_amount, dec(2));
    }

    fn ledger_row(id: i64, entry_type: LedgerEntryType, amount: i64, withholding: i64) -> CommissionLedgerEntry {
        CommissionLedgerEntry {
            id,
            sale_id: 9,
            profile_id: Some(4),
            entry_type: entry_type.as_str().to_string(),
            amount: dec(amount),
            currency: DEFAULT_CURRENCY.to_string(),
            withholding_amount: dec(withholding),
            is_settled: true,
            notes: None,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_refund_entries_reverse_commissions() {
        let ledger = vec![
            ledger_row(1, LedgerEntryType::SalesCommission, 150_000, 4_950),
            ledger_row(2, LedgerEntryType::Withholding, -3_300, 0),
            ledger_row(3, LedgerEntryType::Refund, -10, 0),
        ];

        let refunds = refund_entries(&ledger, "고객 변심", 77, Utc::now());

        assert_eq!(refunds.len(), 2);
        assert!(refunds.iter().all(|e| e.entry_type == LedgerEntryType::Refund));
        assert_eq!(refunds[0].amount, dec(-150_000));
        assert_eq!(refunds[0].withholding_amount, dec(-4_950));
        assert_eq!(refunds[1].amount, dec(3_300));
        assert_eq!(refunds[0].notes.as_deref(), Some("환불: 고객 변심"));
        let meta = refunds[0].metadata.as_ref().unwrap();
        assert_eq!(meta["originalEntryId"], 1);
        assert_eq!(meta["originalEntryType"], "SALES_COMMISSION");
        assert_eq!(meta["processedBy"], 77);
    }

    #[test]
    fn test_negative_half_rounds_towards_positive_infinity() {
        assert_eq!(round_amount(Decimal::new(-15, 1)), dec(-1));
        assert_eq!(round_amount(Decimal::new(-25, 1)), dec(-2));
        assert_eq!(round_amount(Decimal::new(-26, 1)), dec(-3));
        assert_eq!(round_amount(Decimal::new(25, 1)), dec(3));
        assert_eq!(round_amount(dec(-7)), dec(-7));

        let options = LedgerOptions {
            sale_id: 3,
            manager_profile_id: None,
            agent_profile_id: Some(2),
            override_profile_id: None,
            extra_adjustments: vec![LedgerAdjustment {
                entry_type: LedgerEntryType::Adjustment,
                amount: Decimal::new(-10_005, 1),
                profile_id: Some(2),
                withholding_amount: None,
                notes: None,
                metadata: None,
            }],
            metadata: None,
        };
        let input = CommissionInput {
            include_hq_net: false,
            ..CommissionInput::new(dec(10_000))
        };
        let (_, entries) = generate_ledger_entries(&input, &options).unwrap();
        let adjustment = entries
            .iter()
            .find(|e| e.entry_type == LedgerEntryType::Adjustment)
            .unwrap();
        assert_eq!(adjustment.amount, dec(-1_000));
    }

    #[test]
    fn test_ledger_entries() {
        let options = LedgerOptions {
            sale_id: 7,
            manager_profile_id: Some(1),
            agent_profile_id: Some(2),
            override_profile_id: None,
            extra_adjustments: vec![LedgerAdjustment {
                entry_type: LedgerEntryType::Adjustment,
                amount: dec(-1_000),
                profile_id: Some(2),
                withholding_amount: None,
                notes: Some("promo".to_string()),
                metadata: None,
            }],
            metadata: None,
        };

        let (_, entries) = generate_ledger_entries(&sample_input(), &options).unwrap();
        let kinds: Vec<_> = entries.iter().map(|e| e.entry_type).collect();
        assert_eq!(
            kinds,
            vec![
                LedgerEntryType::HqNet,
                LedgerEntryType::BranchCommission,
                LedgerEntryType::SalesCommission,
                LedgerEntryType::OverrideCommission,
                LedgerEntryType::Withholding,
                LedgerEntryType::Withholding,
                LedgerEntryType::Adjustment,
            ]
        );

        assert_eq!(entries[0].profile_id, None);
        assert_eq!(entries[3].profile_id, Some(1));
        assert_eq!(entries[4].amount, dec(-6_600));
        assert_eq!(entries[5].amount, dec(-1_650));
        assert_eq!(
            entries[4].metadata,
            Some(serde_json::json!({ "note": "branch-withholding" }))
        );
    }

    #[test]
    fn test_ledger_skips_rows_without_owner() {
        let options = LedgerOptions {
            sale_id: 1,
            manager_profile_id: None,
            agent_profile_id: None,
            override_profile_id: None,
            extra_adjustments: vec![],
            metadata: None,
        };
        let (_, entries) = generate_ledger_entries(&sample_input(), &options).unwrap();
        let kinds: Vec<_> = entries.iter().map(|e| e.entry_type).collect();
        assert_eq!(
            kinds,
            vec![LedgerEntryType::HqNet, LedgerEntryType::OverrideCommission]
        );
    }

    #[test]
    fn test_ledger_requires_sale_id() {
        let options = LedgerOptions {
            sale_id: 0,
            manager_profile_id: None,
            agent_profile_id: None,
            override_profile_id: None,
            extra_adjustments: vec![],
            metadata: None,
        };
        assert_eq!(
            generate_ledger_entries(&sample_input(), &options).unwrap_err(),
            CommissionError::MissingSaleId
        );
    }
}
