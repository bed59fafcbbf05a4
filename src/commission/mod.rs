//! Affiliate commission math: per-sale breakdown, ledger rows and metric roll-ups.

pub mod calculator;
pub mod metrics;

pub use calculator::{
    calculate_breakdown, default_withholding_rate, generate_ledger_entries, refund_entries, CommissionBreakdown,
    CommissionError, CommissionInput, CommissionTier, LedgerAdjustment, LedgerOptions,
    NewLedgerEntry, DEFAULT_CURRENCY,
};
pub use metrics::{
    agent_metrics_csv, build_agent_metrics, build_month_series, build_team_metrics, AgentMetrics,
    AgentTotals, DateRange, ManagerMetrics, TeamTotals, TREND_MONTHS,
};
