//! Agent and team commission metrics.
//!
//! Repositories return grouped rows; everything here folds those rows into
//! per-profile summaries and totals without touching the database.

use crate::models::{AffiliateProfile, LedgerEntryType};
use chrono::{DateTime, Datelike, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use sqlx::FromRow;
use std::collections::{BTreeMap, HashMap};

/// Number of months in a trend series
pub const TREND_MONTHS: usize = 6;
/// Recent leads listed per agent
pub const RECENT_LEADS_PER_AGENT: usize = 10;

// ============================================================================
// Date handling
// ============================================================================

/// Inclusive reporting window. `from` starts at 00:00:00 and `to` ends at 23:59:59.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    /// Parse `YYYY-MM-DD` bounds; unparsable values are ignored
    pub fn parse(from: Option<&str>, to: Option<&str>) -> Self {
        fn day(value: Option<&str>, time: NaiveTime) -> Option<DateTime<Utc>> {
            value
                .and_then(|v| NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d").ok())
                .map(|d| Utc.from_utc_datetime(&d.and_time(time)))
        }

        Self {
            from: day(from, NaiveTime::MIN),
            to: day(to, NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)),
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.from.is_some() || self.to.is_some()
    }

    /// Start and end of the trend window. Without bounds it is the six months up to `now`.
    pub fn trend_window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let end = self.to.unwrap_or(now);
        let base = self.from.unwrap_or_else(|| {
            end.checked_sub_months(Months::new(TREND_MONTHS as u32 - 1))
                .unwrap_or(end)
        });
        (start_of_month(base), end)
    }
}

fn start_of_month(date: DateTime<Utc>) -> DateTime<Utc> {
    let first = NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date.date_naive());
    Utc.from_utc_datetime(&first.and_time(NaiveTime::MIN))
}

/// `YYYY-MM` bucket key
pub fn month_key(date: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// Month keys from `start` through `end`, keeping the last `limit`.
/// Always yields at least one month.
pub fn build_month_series(start: DateTime<Utc>, end: DateTime<Utc>, limit: usize) -> Vec<String> {
    let mut months = Vec::new();
    let mut cursor = start_of_month(start);
    let end_month = start_of_month(end);

    while (cursor <= end_month || months.is_empty()) && months.len() < limit + 12 {
        months.push(month_key(cursor));
        cursor = match cursor.checked_add_months(Months::new(1)) {
            Some(next) => next,
            None => break,
        };
        if cursor > end_month && months.len() >= limit {
            break;
        }
    }

    let skip = months.len().saturating_sub(limit);
    months.split_off(skip)
}

// ============================================================================
// Grouped rows
// ============================================================================

/// Lead count per (owner, status)
#[derive(Debug, Clone, FromRow)]
pub struct LeadGroupRow {
    pub owner_id: i64,
    pub status: String,
    pub count: i64,
}

/// Counted sale totals per owner
#[derive(Debug, Clone, Default, FromRow)]
pub struct SaleSumRow {
    pub owner_id: i64,
    pub count: i64,
    pub sale_amount: Decimal,
    pub net_revenue: Decimal,
    pub branch_commission: Decimal,
    pub sales_commission: Decimal,
    pub override_commission: Decimal,
}

/// Ledger sums per (profile, entry type, settled flag)
#[derive(Debug, Clone, FromRow)]
pub struct LedgerGroupRow {
    pub profile_id: i64,
    pub entry_type: String,
    pub is_settled: bool,
    pub amount: Decimal,
    pub withholding_amount: Decimal,
}

/// A single counted sale inside the trend window
#[derive(Debug, Clone, FromRow)]
pub struct TrendSaleRow {
    pub owner_id: i64,
    pub sale_date: DateTime<Utc>,
    pub sale_amount: Decimal,
    pub branch_commission: Decimal,
    pub sales_commission: Decimal,
    pub override_commission: Decimal,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RecentLead {
    #[serde(skip)]
    pub agent_id: i64,
    pub id: i64,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Active or paused manager link for an agent
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct RelationLink {
    pub manager_id: i64,
    pub agent_id: Option<i64>,
    pub status: String,
    pub connected_at: DateTime<Utc>,
    pub manager_name: Option<String>,
    pub manager_code: Option<String>,
}

// ============================================================================
// Summaries
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadSummary {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
}

fn lead_summaries(rows: &[LeadGroupRow]) -> HashMap<i64, LeadSummary> {
    let mut map: HashMap<i64, LeadSummary> = HashMap::new();
    for row in rows {
        let summary = map.entry(row.owner_id).or_default();
        summary.total += row.count;
        *summary.by_status.entry(row.status.clone()).or_insert(0) += row.count;
    }
    map
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleSummary {
    pub count: i64,
    pub sale_amount: Decimal,
    pub net_revenue: Decimal,
    pub sales_commission: Decimal,
    pub override_commission: Decimal,
    pub branch_commission: Decimal,
}

impl From<&SaleSumRow> for SaleSummary {
    fn from(row: &SaleSumRow) -> Self {
        Self {
            count: row.count,
            sale_amount: row.sale_amount,
            net_revenue: row.net_revenue,
            sales_commission: row.sales_commission,
            override_commission: row.override_commission,
            branch_commission: row.branch_commission,
        }
    }
}

/// Ledger position of a sales agent
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentLedgerTotals {
    pub settled: Decimal,
    pub pending: Decimal,
    pub withholding: Decimal,
    pub withholding_adjustments: Decimal,
    pub withholding_settled: Decimal,
    pub withholding_pending: Decimal,
    pub sales_settled: Decimal,
    pub sales_pending: Decimal,
    pub override_settled: Decimal,
    pub override_pending: Decimal,
    pub sales_withholding: Decimal,
    pub override_withholding: Decimal,
    pub total_withholding: Decimal,
    pub gross_commission: Decimal,
    pub net_commission: Decimal,
}

impl AgentLedgerTotals {
    /// Fold ledger rows, then derive gross and net from the sale sums.
    /// Gross is sales plus override commission; net subtracts the sales and override withholding.
    pub fn fold(rows: &[&LedgerGroupRow], sales: &SaleSummary) -> Self {
        let mut acc = Self::default();
        for row in rows {
            if row.is_settled {
                acc.settled += row.amount;
            } else {
                acc.pending += row.amount;
            }
            match LedgerEntryType::from_str(&row.entry_type) {
                Ok(LedgerEntryType::SalesCommission) => {
                    if row.is_settled {
                        acc.sales_settled += row.amount;
                    } else {
                        acc.sales_pending += row.amount;
                    }
                    acc.sales_withholding += row.withholding_amount;
                }
                Ok(LedgerEntryType::OverrideCommission) => {
                    if row.is_settled {
                        acc.override_settled += row.amount;
                    } else {
                        acc.override_pending += row.amount;
                    }
                    acc.override_withholding += row.withholding_amount;
                }
                Ok(LedgerEntryType::Withholding) => {
                    if row.is_settled {
                        acc.withholding_settled += row.amount;
                    } else {
                        acc.withholding_pending += row.amount;
                    }
                    acc.withholding_adjustments += row.amount;
                }
                _ => {}
            }
            acc.withholding += row.withholding_amount;
        }

        acc.total_withholding = acc.sales_withholding + acc.override_withholding;
        acc.gross_commission = sales.sales_commission + sales.override_commission;
        acc.net_commission = acc.gross_commission - acc.total_withholding;
        acc
    }
}

/// Ledger position of a branch manager
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerLedgerTotals {
    pub branch_settled: Decimal,
    pub branch_pending: Decimal,
    pub override_settled: Decimal,
    pub override_pending: Decimal,
    pub withholding: Decimal,
    pub withholding_adjustments: Decimal,
    pub withholding_settled: Decimal,
    pub withholding_pending: Decimal,
    pub branch_withholding: Decimal,
    pub override_withholding: Decimal,
    pub total_withholding: Decimal,
    pub gross_commission: Decimal,
    pub net_commission: Decimal,
}

impl ManagerLedgerTotals {
    /// Gross is branch plus override commission; net subtracts their withholding
    pub fn fold(rows: &[&LedgerGroupRow], sales: &SaleSummary) -> Self {
        let mut acc = Self::default();
        for row in rows {
            match LedgerEntryType::from_str(&row.entry_type) {
                Ok(LedgerEntryType::BranchCommission) => {
                    if row.is_settled {
                        acc.branch_settled += row.amount;
                    } else {
                        acc.branch_pending += row.amount;
                    }
                    acc.branch_withholding += row.withholding_amount;
                }
                Ok(LedgerEntryType::OverrideCommission) => {
                    if row.is_settled {
                        acc.override_settled += row.amount;
                    } else {
                        acc.override_pending += row.amount;
                    }
                    acc.override_withholding += row.withholding_amount;
                }
                Ok(LedgerEntryType::Withholding) => {
                    if row.is_settled {
                        acc.withholding_settled += row.amount;
                    } else {
                        acc.withholding_pending += row.amount;
                    }
                    acc.withholding_adjustments += row.amount;
                }
                _ => {}
            }
            acc.withholding += row.withholding_amount;
        }

        acc.total_withholding = acc.branch_withholding + acc.override_withholding;
        acc.gross_commission = sales.branch_commission + sales.override_commission;
        acc.net_commission = acc.gross_commission - acc.total_withholding;
        acc
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub month: String,
    pub sale_count: i64,
    pub sale_amount: Decimal,
    pub sales_commission: Decimal,
    pub override_commission: Decimal,
    pub branch_commission: Decimal,
}

fn trend_by_owner(rows: &[TrendSaleRow]) -> HashMap<i64, HashMap<String, TrendPoint>> {
    let mut map: HashMap<i64, HashMap<String, TrendPoint>> = HashMap::new();
    for row in rows {
        let key = month_key(row.sale_date);
        let bucket = map
            .entry(row.owner_id)
            .or_default()
            .entry(key.clone())
            .or_insert_with(|| TrendPoint {
                month: key,
                ..Default::default()
            });
        bucket.sale_count += 1;
        bucket.sale_amount += row.sale_amount;
        bucket.sales_commission += row.sales_commission;
        bucket.override_commission += row.override_commission;
        bucket.branch_commission += row.branch_commission;
    }
    map
}

fn trend_series(
    months: &[String],
    buckets: Option<&HashMap<String, TrendPoint>>,
) -> Vec<TrendPoint> {
    months
        .iter()
        .map(|month| {
            buckets
                .and_then(|b| b.get(month))
                .cloned()
                .unwrap_or_else(|| TrendPoint {
                    month: month.clone(),
                    ..Default::default()
                })
        })
        .collect()
}

fn group_ledger(rows: &[LedgerGroupRow]) -> HashMap<i64, Vec<&LedgerGroupRow>> {
    let mut map: HashMap<i64, Vec<&LedgerGroupRow>> = HashMap::new();
    for row in rows {
        map.entry(row.profile_id).or_default().push(row);
    }
    map
}

// ============================================================================
// Agent metrics
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetrics {
    pub agent: AffiliateProfile,
    pub manager_relations: Vec<RelationLink>,
    pub leads: LeadSummary,
    pub sales: SaleSummary,
    pub ledger: AgentLedgerTotals,
    pub monthly_trend: Vec<TrendPoint>,
    pub recent_leads: Vec<RecentLead>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTotals {
    pub agent_count: usize,
    pub total_leads: i64,
    pub total_sales_count: i64,
    pub total_sales_amount: Decimal,
    pub total_net_revenue: Decimal,
    pub total_sales_commission: Decimal,
    pub total_override_commission: Decimal,
    pub total_branch_contribution: Decimal,
    pub total_withholding: Decimal,
    pub total_settled: Decimal,
    pub total_pending: Decimal,
    pub total_net_commission: Decimal,
}

impl AgentTotals {
    /// Sum of the per-agent rows
    pub fn from_agents(agents: &[AgentMetrics]) -> Self {
        agents.iter().fold(
            Self {
                agent_count: agents.len(),
                ..Default::default()
            },
            |mut t, a| {
                t.total_leads += a.leads.total;
                t.total_sales_count += a.sales.count;
                t.total_sales_amount += a.sales.sale_amount;
                t.total_net_revenue += a.sales.net_revenue;
                t.total_sales_commission += a.sales.sales_commission;
                t.total_override_commission += a.sales.override_commission;
                t.total_branch_contribution += a.sales.branch_commission;
                t.total_withholding += a.ledger.total_withholding;
                t.total_settled += a.ledger.settled;
                t.total_pending += a.ledger.pending;
                t.total_net_commission += a.ledger.net_commission;
                t
            },
        )
    }
}

/// Everything fetched for an agent metrics report
#[derive(Debug, Default)]
pub struct AgentMetricRows {
    pub relations: Vec<RelationLink>,
    pub leads: Vec<LeadGroupRow>,
    pub sales: Vec<SaleSumRow>,
    pub ledger: Vec<LedgerGroupRow>,
    pub trend: Vec<TrendSaleRow>,
    /// Newest first
    pub recent_leads: Vec<RecentLead>,
}

pub fn build_agent_metrics(
    agents: Vec<AffiliateProfile>,
    rows: AgentMetricRows,
    months: &[String],
) -> Vec<AgentMetrics> {
    let leads = lead_summaries(&rows.leads);
    let sales: HashMap<i64, SaleSummary> = rows
        .sales
        .iter()
        .map(|r| (r.owner_id, SaleSummary::from(r)))
        .collect();
    let ledger = group_ledger(&rows.ledger);
    let trend = trend_by_owner(&rows.trend);

    let mut relations: HashMap<i64, Vec<RelationLink>> = HashMap::new();
    for link in rows.relations {
        if let Some(agent_id) = link.agent_id {
            relations.entry(agent_id).or_default().push(link);
        }
    }

    let mut recent: HashMap<i64, Vec<RecentLead>> = HashMap::new();
    for lead in rows.recent_leads {
        let list = recent.entry(lead.agent_id).or_default();
        if list.len() < RECENT_LEADS_PER_AGENT {
            list.push(lead);
        }
    }

    agents
        .into_iter()
        .map(|agent| {
            let sale_summary = sales.get(&agent.id).cloned().unwrap_or_default();
            let ledger_rows = ledger.get(&agent.id).map(Vec::as_slice).unwrap_or(&[]);
            AgentMetrics {
                manager_relations: relations.remove(&agent.id).unwrap_or_default(),
                leads: leads.get(&agent.id).cloned().unwrap_or_default(),
                ledger: AgentLedgerTotals::fold(ledger_rows, &sale_summary),
                sales: sale_summary,
                monthly_trend: trend_series(months, trend.get(&agent.id)),
                recent_leads: recent.remove(&agent.id).unwrap_or_default(),
                agent,
            }
        })
        .collect()
}

/// Quote a CSV field when it contains a quote, comma or newline
pub fn escape_csv(value: &str) -> String {
    if value.contains(['"', ',', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn agent_metrics_csv(agents: &[AgentMetrics]) -> String {
    let header = [
        "agent_id",
        "agent_name",
        "affiliate_code",
        "managers",
        "sales_count",
        "sales_amount",
        "sales_commission",
        "override_commission",
        "branch_contribution",
        "lead_total",
        "ledger_settled",
        "ledger_pending",
    ]
    .join(",");

    let mut lines = vec![header];
    for m in agents {
        let managers = m
            .manager_relations
            .iter()
            .map(|r| {
                r.manager_name
                    .clone()
                    .unwrap_or_else(|| format!("#{}", r.manager_id))
            })
            .collect::<Vec<_>>()
            .join("; ");
        let name = m
            .agent
            .display_name
            .clone()
            .or_else(|| m.agent.nickname.clone())
            .unwrap_or_else(|| format!("판매원 #{}", m.agent.id));

        let fields = [
            m.agent.id.to_string(),
            name,
            m.agent.affiliate_code.clone(),
            managers,
            m.sales.count.to_string(),
            m.sales.sale_amount.to_string(),
            m.sales.sales_commission.to_string(),
            m.sales.override_commission.to_string(),
            m.sales.branch_commission.to_string(),
            m.leads.total.to_string(),
            m.ledger.settled.to_string(),
            m.ledger.pending.to_string(),
        ];
        lines.push(
            fields
                .iter()
                .map(|f| escape_csv(f))
                .collect::<Vec<_>>()
                .join(","),
        );
    }

    lines.join("\n")
}

// ============================================================================
// Team metrics
// ============================================================================

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TeamAgentLink {
    pub manager_id: i64,
    pub agent_id: i64,
    pub status: String,
    pub connected_at: DateTime<Utc>,
    pub agent_code: String,
    pub agent_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamAgentSummary {
    pub agent: TeamAgentLink,
    pub leads: LeadSummary,
    pub sales: SaleSummary,
    pub ledger: AgentLedgerTotals,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerMetrics {
    pub manager: AffiliateProfile,
    pub agent_count: usize,
    pub leads: LeadSummary,
    pub sales: SaleSummary,
    pub ledger: ManagerLedgerTotals,
    pub agents: Vec<TeamAgentSummary>,
    pub monthly_trend: Vec<TrendPoint>,
}

/// Head-office position after card fees (3.5% of sales) and corporate tax (10% of net revenue)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HqSummary {
    pub gross_revenue: Decimal,
    pub card_fees: Decimal,
    pub corporate_tax: Decimal,
    pub net_after_fees: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamTotals {
    pub manager_count: usize,
    pub agent_count: usize,
    pub total_sales_count: i64,
    pub total_sales_amount: Decimal,
    pub total_net_revenue: Decimal,
    pub total_branch_commission: Decimal,
    pub total_override_commission: Decimal,
    pub total_sales_commission: Decimal,
    pub total_leads: i64,
    pub total_withholding: Decimal,
    pub total_net_commission: Decimal,
    pub hq: HqSummary,
}

fn round_whole(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

impl TeamTotals {
    pub fn from_managers(managers: &[ManagerMetrics]) -> Self {
        let mut t = managers.iter().fold(
            Self {
                manager_count: managers.len(),
                ..Default::default()
            },
            |mut t, m| {
                t.agent_count += m.agent_count;
                t.total_leads += m.leads.total;
                t.total_sales_count += m.sales.count;
                t.total_sales_amount += m.sales.sale_amount;
                t.total_net_revenue += m.sales.net_revenue;
                t.total_branch_commission += m.sales.branch_commission;
                t.total_override_commission += m.sales.override_commission;
                t.total_sales_commission += m.sales.sales_commission;
                t.total_withholding += m.ledger.total_withholding;
                t.total_net_commission += m.ledger.net_commission;
                t
            },
        );

        let gross_revenue = round_whole(t.total_net_revenue);
        let card_fees = round_whole(t.total_sales_amount * Decimal::new(35, 3));
        let corporate_tax = round_whole(gross_revenue * Decimal::new(1, 1));
        t.hq = HqSummary {
            gross_revenue,
            card_fees,
            corporate_tax,
            net_after_fees: (gross_revenue - card_fees - corporate_tax).max(Decimal::ZERO),
        };
        t.total_withholding = round_whole(t.total_withholding);
        t.total_net_commission = round_whole(t.total_net_commission);
        t
    }
}

/// Everything fetched for a team metrics report
#[derive(Debug, Default)]
pub struct TeamMetricRows {
    pub agents: Vec<TeamAgentLink>,
    pub manager_leads: Vec<LeadGroupRow>,
    pub manager_sales: Vec<SaleSumRow>,
    pub manager_ledger: Vec<LedgerGroupRow>,
    pub manager_trend: Vec<TrendSaleRow>,
    pub agent_leads: Vec<LeadGroupRow>,
    pub agent_sales: Vec<SaleSumRow>,
    pub agent_ledger: Vec<LedgerGroupRow>,
}

pub fn build_team_metrics(
    managers: Vec<AffiliateProfile>,
    rows: TeamMetricRows,
    months: &[String],
) -> Vec<ManagerMetrics> {
    let manager_leads = lead_summaries(&rows.manager_leads);
    let manager_sales: HashMap<i64, SaleSummary> = rows
        .manager_sales
        .iter()
        .map(|r| (r.owner_id, SaleSummary::from(r)))
        .collect();
    let manager_ledger = group_ledger(&rows.manager_ledger);
    let manager_trend = trend_by_owner(&rows.manager_trend);

    let agent_leads = lead_summaries(&rows.agent_leads);
    let agent_sales: HashMap<i64, SaleSummary> = rows
        .agent_sales
        .iter()
        .map(|r| (r.owner_id, SaleSummary::from(r)))
        .collect();
    let agent_ledger = group_ledger(&rows.agent_ledger);

    let mut team: HashMap<i64, Vec<TeamAgentSummary>> = HashMap::new();
    for link in rows.agents {
        let sales = agent_sales.get(&link.agent_id).cloned().unwrap_or_default();
        let ledger_rows = agent_ledger
            .get(&link.agent_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let summary = TeamAgentSummary {
            leads: agent_leads.get(&link.agent_id).cloned().unwrap_or_default(),
            ledger: AgentLedgerTotals::fold(ledger_rows, &sales),
            sales,
            agent: link,
        };
        team.entry(summary.agent.manager_id).or_default().push(summary);
    }

    managers
        .into_iter()
        .map(|manager| {
            let sales = manager_sales.get(&manager.id).cloned().unwrap_or_default();
            let ledger_rows = manager_ledger
                .get(&manager.id)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let agents = team.remove(&manager.id).unwrap_or_default();
            ManagerMetrics {
                agent_count: agents.len(),
                leads: manager_leads.get(&manager.id).cloned().unwrap_or_default(),
                ledger: ManagerLedgerTotals::fold(ledger_rows, &sales),
                sales,
                agents,
                monthly_trend: trend_series(months, manager_trend.get(&manager.id)),
                manager,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(v: i64) -> Decimal {
        Decimal::new(v, 0)
    }

    fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn profile(id: i64, kind: &str) -> AffiliateProfile {
        AffiliateProfile {
            id,
            user_id: None,
            r#type: kind.to_string(),
            affiliate_code: format!("SA{:04}", id),
            display_name: Some(format!("Agent {}", id)),
            nickname: None,
            contact_phone: None,
            status: "ACTIVE".to_string(),
            withholding_rate: None,
            created_at: utc(2024, 1, 1),
        }
    }

    fn ledger_row(profile_id: i64, entry_type: &str, settled: bool, amount: i64, wh: i64) -> LedgerGroupRow {
        LedgerGroupRow {
            profile_id,
            entry_type: entry_type.to_string(),
            is_settled: settled,
            amount: dec(amount),
            withholding_amount: dec(wh),
        }
    }

    #[test]
    fn test_date_range_bounds() {
        let range = DateRange::parse(Some("2024-03-01"), Some("2024-03-31"));
        assert_eq!(range.from, Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));
        assert_eq!(range.to, Some(Utc.with_ymd_and_hms(2024, 3, 31, 23, 59, 59).unwrap()));

        let range = DateRange::parse(Some("not-a-date"), None);
        assert!(!range.is_bounded());
    }

    #[test]
    fn test_month_series_defaults_to_six_months() {
        let range = DateRange::default();
        let (start, end) = range.trend_window(utc(2024, 8, 15));
        let months = build_month_series(start, end, TREND_MONTHS);
        assert_eq!(
            months,
            vec!["2024-03", "2024-04", "2024-05", "2024-06", "2024-07", "2024-08"]
        );
    }

    #[test]
    fn test_month_series_spans_year_and_keeps_last_months() {
        let months = build_month_series(utc(2023, 1, 10), utc(2024, 2, 1), TREND_MONTHS);
        assert_eq!(
            months,
            vec!["2023-09", "2023-10", "2023-11", "2023-12", "2024-01", "2024-02"]
        );

        let months = build_month_series(utc(2024, 5, 1), utc(2024, 5, 20), TREND_MONTHS);
        assert_eq!(months, vec!["2024-05"]);
    }

    #[test]
    fn test_agent_ledger_fold() {
        let rows = vec![
            ledger_row(1, "SALES_COMMISSION", true, 100_000, 3_300),
            ledger_row(1, "SALES_COMMISSION", false, 50_000, 1_650),
            ledger_row(1, "OVERRIDE_COMMISSION", false, 10_000, 330),
            ledger_row(1, "WITHHOLDING", false, -330, 0),
        ];
        let refs: Vec<&LedgerGroupRow> = rows.iter().collect();
        let sales = SaleSummary {
            sales_commission: dec(150_000),
            override_commission: dec(10_000),
            ..Default::default()
        };

        let totals = AgentLedgerTotals::fold(&refs, &sales);
        assert_eq!(totals.settled, dec(100_000));
        assert_eq!(totals.pending, dec(59_670));
        assert_eq!(totals.sales_withholding, dec(4_950));
        assert_eq!(totals.override_withholding, dec(330));
        assert_eq!(totals.total_withholding, dec(5_280));
        assert_eq!(totals.withholding_adjustments, dec(-330));
        assert_eq!(totals.gross_commission, dec(160_000));
        assert_eq!(totals.net_commission, dec(154_720));
    }

    #[test]
    fn test_totals_equal_sum_of_agent_rows() {
        let rows = AgentMetricRows {
            leads: vec![
                LeadGroupRow { owner_id: 1, status: "NEW".into(), count: 3 },
                LeadGroupRow { owner_id: 1, status: "PURCHASED".into(), count: 1 },
                LeadGroupRow { owner_id: 2, status: "CONTACTED".into(), count: 2 },
            ],
            sales: vec![
                SaleSumRow {
                    owner_id: 1,
                    count: 2,
                    sale_amount: dec(6_000_000),
                    net_revenue: dec(2_000_000),
                    sales_commission: dec(600_000),
                    override_commission: dec(100_000),
                    branch_commission: dec(400_000),
                },
                SaleSumRow {
                    owner_id: 2,
                    count: 1,
                    sale_amount: dec(1_000_000),
                    net_revenue: dec(300_000),
                    sales_commission: dec(100_000),
                    override_commission: Decimal::ZERO,
                    branch_commission: dec(50_000),
                },
            ],
            ledger: vec![
                ledger_row(1, "SALES_COMMISSION", true, 600_000, 19_800),
                ledger_row(2, "SALES_COMMISSION", false, 100_000, 3_300),
            ],
            ..Default::default()
        };
        let months = vec!["2024-01".to_string()];
        let metrics = build_agent_metrics(vec![profile(1, "SALES_AGENT"), profile(2, "SALES_AGENT")], rows, &months);
        let totals = AgentTotals::from_agents(&metrics);

        assert_eq!(totals.agent_count, 2);
        assert_eq!(totals.total_leads, metrics.iter().map(|m| m.leads.total).sum::<i64>());
        assert_eq!(totals.total_leads, 6);
        assert_eq!(totals.total_sales_count, 3);
        assert_eq!(totals.total_sales_amount, dec(7_000_000));
        assert_eq!(totals.total_settled, dec(600_000));
        assert_eq!(totals.total_pending, dec(100_000));
        assert_eq!(
            totals.total_net_commission,
            metrics.iter().map(|m| m.ledger.net_commission).sum::<Decimal>()
        );
        assert_eq!(totals.total_withholding, dec(23_100));
    }

    #[test]
    fn test_trend_and_recent_leads() {
        let rows = AgentMetricRows {
            trend: vec![
                TrendSaleRow {
                    owner_id: 1,
                    sale_date: utc(2024, 2, 3),
                    sale_amount: dec(100),
                    branch_commission: dec(1),
                    sales_commission: dec(2),
                    override_commission: dec(3),
                },
                TrendSaleRow {
                    owner_id: 1,
                    sale_date: utc(2024, 2, 20),
                    sale_amount: dec(200),
                    branch_commission: dec(1),
                    sales_commission: dec(2),
                    override_commission: dec(3),
                },
            ],
            recent_leads: (0..15)
                .map(|i| RecentLead {
                    agent_id: 1,
                    id: i,
                    customer_name: None,
                    customer_phone: None,
                    status: "NEW".into(),
                    created_at: utc(2024, 2, 1),
                })
                .collect(),
            ..Default::default()
        };
        let months = vec!["2024-01".to_string(), "2024-02".to_string()];
        let metrics = build_agent_metrics(vec![profile(1, "SALES_AGENT")], rows, &months);

        let trend = &metrics[0].monthly_trend;
        assert_eq!(trend.len(), 2);
        assert_eq!(trend[0].sale_count, 0);
        assert_eq!(trend[1].sale_count, 2);
        assert_eq!(trend[1].sale_amount, dec(300));
        assert_eq!(metrics[0].recent_leads.len(), RECENT_LEADS_PER_AGENT);
    }

    #[test]
    fn test_escape_csv() {
        assert_eq!(escape_csv("plain"), "plain");
        assert_eq!(escape_csv("a,b"), "\"a,b\"");
        assert_eq!(escape_csv("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_agent_csv_rows() {
        let mut agent = profile(3, "SALES_AGENT");
        agent.display_name = Some("Kim, Jisoo".to_string());
        let metrics = build_agent_metrics(vec![agent], AgentMetricRows::default(), &[]);
        let csv = agent_metrics_csv(&metrics);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("agent_id,agent_name"));
        assert_eq!(lines[1], "3,\"Kim, Jisoo\",SA0003,,0,0,0,0,0,0,0,0");
    }

    #[test]
    fn test_team_rollup() {
        let rows = TeamMetricRows {
            agents: vec![TeamAgentLink {
                manager_id: 10,
                agent_id: 1,
                status: "ACTIVE".into(),
                connected_at: utc(2024, 1, 1),
                agent_code: "SA0001".into(),
                agent_name: None,
            }],
            manager_sales: vec![SaleSumRow {
                owner_id: 10,
                count: 1,
                sale_amount: dec(1_000_000),
                net_revenue: dec(400_000),
                branch_commission: dec(100_000),
                sales_commission: dec(150_000),
                override_commission: dec(20_000),
            }],
            manager_ledger: vec![
                ledger_row(10, "BRANCH_COMMISSION", false, 100_000, 3_300),
                ledger_row(10, "OVERRIDE_COMMISSION", false, 20_000, 660),
            ],
            ..Default::default()
        };
        let metrics = build_team_metrics(vec![profile(10, "BRANCH_MANAGER")], rows, &[]);
        assert_eq!(metrics[0].agent_count, 1);
        assert_eq!(metrics[0].ledger.gross_commission, dec(120_000));
        assert_eq!(metrics[0].ledger.net_commission, dec(116_040));

        let totals = TeamTotals::from_managers(&metrics);
        assert_eq!(totals.agent_count, 1);
        assert_eq!(totals.hq.gross_revenue, dec(400_000));
        assert_eq!(totals.hq.card_fees, dec(35_000));
        assert_eq!(totals.hq.corporate_tax, dec(40_000));
        assert_eq!(totals.hq.net_after_fees, dec(325_000));
    }
}
