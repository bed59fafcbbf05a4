//! Affiliate network service
//!
//! Profiles, manager/agent relations, leads, sale confirmation and the agent
//! and team commission reports.

use crate::commission::metrics::{AgentMetricRows, TeamMetricRows};
use crate::commission::{
    agent_metrics_csv, build_agent_metrics, build_month_series, build_team_metrics,
    generate_ledger_entries, AgentMetrics, AgentTotals, CommissionBreakdown, CommissionInput,
    DateRange, LedgerAdjustment, LedgerOptions, ManagerMetrics, TeamTotals, TREND_MONTHS,
};
use crate::error::{AppError, AppResult, RepositoryError};
use crate::models::{
    AffiliateLead, AffiliateProfile, AffiliateRelation, AffiliateSale, CommissionLedgerEntry,
    LeadStatus, LedgerEntryType, ProfileType, RelationStatus, User,
};
use crate::repositories::affiliate_repository::{LeadQuery, NewLead, NewProfile, NewSale, Owner};
use crate::repositories::AffiliateRepository;
use crate::services::input::{clean, opt_decimal, opt_i64};
use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Agents listed in one metrics report
pub const AGENT_REPORT_LIMIT: i64 = 300;
/// Managers listed in one team report
pub const MANAGER_REPORT_LIMIT: i64 = 200;
/// Recent leads fetched across all agents of a report
pub const RECENT_LEADS_FETCH: i64 = 500;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 6;
const CODE_ATTEMPTS: usize = 5;

/// Affiliate code such as `SA7K3QXZ`
pub fn generate_affiliate_code(profile_type: ProfileType) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    format!("{}{}", profile_type.code_prefix(), suffix)
}

fn digits_only(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// `YYYY-MM-DD` or RFC 3339
fn parse_sale_date(raw: Option<&str>) -> AppResult<Option<DateTime<Utc>>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| Some(d.and_utc()))
        .ok_or_else(|| AppError::Validation(format!("Invalid saleDate: {}", raw)))
}

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct ProfileListQuery {
    #[serde(rename = "type")]
    pub profile_type: Option<String>,
    pub search: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProfileRequest {
    #[serde(default, deserialize_with = "opt_i64")]
    pub user_id: Option<i64>,
    #[serde(rename = "type")]
    pub profile_type: String,
    pub affiliate_code: Option<String>,
    pub display_name: Option<String>,
    pub nickname: Option<String>,
    pub contact_phone: Option<String>,
    #[serde(default, deserialize_with = "opt_decimal")]
    pub withholding_rate: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationRequest {
    #[serde(default, deserialize_with = "opt_i64")]
    pub manager_id: Option<i64>,
    #[serde(default, deserialize_with = "opt_i64")]
    pub agent_id: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LeadListQuery {
    pub manager_id: Option<i64>,
    pub agent_id: Option<i64>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLeadRequest {
    #[serde(default, deserialize_with = "opt_i64")]
    pub manager_id: Option<i64>,
    #[serde(default, deserialize_with = "opt_i64")]
    pub agent_id: Option<i64>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub notes: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct LeadStatusRequest {
    pub status: Option<String>,
    /// Present (even empty) replaces the notes
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSaleRequest {
    #[serde(default, deserialize_with = "opt_i64")]
    pub lead_id: Option<i64>,
    #[serde(default, deserialize_with = "opt_i64")]
    pub manager_id: Option<i64>,
    #[serde(default, deserialize_with = "opt_i64")]
    pub agent_id: Option<i64>,
    pub product_code: Option<String>,
    #[serde(default, deserialize_with = "opt_decimal")]
    pub sale_amount: Option<Decimal>,
    #[serde(default, deserialize_with = "opt_decimal")]
    pub cost_amount: Option<Decimal>,
    pub sale_date: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SaleListQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustmentRequest {
    pub entry_type: LedgerEntryType,
    #[serde(default, deserialize_with = "opt_decimal")]
    pub amount: Option<Decimal>,
    #[serde(default, deserialize_with = "opt_i64")]
    pub profile_id: Option<i64>,
    #[serde(default, deserialize_with = "opt_decimal")]
    pub withholding_amount: Option<Decimal>,
    pub notes: Option<String>,
    pub metadata: Option<Value>,
}

/// Overrides applied when confirming a sale; absent fields use the stored sale values
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmSaleRequest {
    #[serde(default, deserialize_with = "opt_decimal")]
    pub cost_amount: Option<Decimal>,
    #[serde(default, deserialize_with = "opt_decimal")]
    pub branch_commission: Option<Decimal>,
    #[serde(default, deserialize_with = "opt_decimal")]
    pub sales_commission: Option<Decimal>,
    #[serde(default, deserialize_with = "opt_decimal")]
    pub override_commission: Option<Decimal>,
    #[serde(default, deserialize_with = "opt_i64")]
    pub override_profile_id: Option<i64>,
    pub include_hq_net: Option<bool>,
    #[serde(default)]
    pub adjustments: Vec<AdjustmentRequest>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmedSale {
    pub ok: bool,
    pub sale: AffiliateSale,
    pub breakdown: CommissionBreakdown,
    pub ledger: Vec<CommissionLedgerEntry>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RefundSaleRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundedSale {
    pub ok: bool,
    pub sale: AffiliateSale,
    pub refund_entries: Vec<CommissionLedgerEntry>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MetricsQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub search: Option<String>,
    pub manager_id: Option<String>,
    pub format: Option<String>,
}

impl MetricsQuery {
    pub fn wants_csv(&self) -> bool {
        self.format.as_deref().map(str::trim) == Some("csv")
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagerRef {
    pub id: i64,
    pub name: Option<String>,
    pub affiliate_code: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetricsReport {
    pub ok: bool,
    pub agents: Vec<AgentMetrics>,
    pub totals: Option<AgentTotals>,
    pub filters: MetricsFilters,
    pub managers: Vec<ManagerRef>,
    pub months: Vec<String>,
}

impl AgentMetricsReport {
    pub fn to_csv(&self) -> String {
        agent_metrics_csv(&self.agents)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMetricsReport {
    pub ok: bool,
    pub managers: Vec<ManagerMetrics>,
    pub totals: Option<TeamTotals>,
    pub filters: MetricsFilters,
    pub months: Vec<String>,
}

// ============================================================================
// Service
// ============================================================================

pub struct AffiliateService {
    affiliate_repo: Arc<AffiliateRepository>,
}

impl AffiliateService {
    pub fn new(affiliate_repo: Arc<AffiliateRepository>) -> Self {
        Self { affiliate_repo }
    }

    // =========================================================================
    // Profiles and relations
    // =========================================================================

    pub async fn list_profiles(&self, query: ProfileListQuery) -> AppResult<Vec<AffiliateProfile>> {
        let profile_type = match clean(query.profile_type.as_deref()) {
            Some(raw) => Some(ProfileType::from_str(&raw).map_err(AppError::Validation)?),
            None => None,
        };
        let search = clean(query.search.as_deref());
        let limit = query.limit.unwrap_or(100).clamp(1, AGENT_REPORT_LIMIT);

        Ok(self
            .affiliate_repo
            .search_profiles(profile_type, search.as_deref(), None, limit)
            .await?)
    }

    /// Create a profile, generating a unique affiliate code when none is given
    pub async fn create_profile(&self, request: CreateProfileRequest) -> AppResult<AffiliateProfile> {
        let profile_type = ProfileType::from_str(request.profile_type.trim()).map_err(AppError::Validation)?;

        if let Some(rate) = request.withholding_rate {
            if rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED {
                return Err(AppError::Validation(
                    "withholdingRate must be between 0 and 100.".to_string(),
                ));
            }
        }

        let explicit_code = clean(request.affiliate_code.as_deref()).map(|c| c.to_uppercase());
        let mut profile = NewProfile {
            user_id: request.user_id,
            profile_type,
            affiliate_code: explicit_code
                .clone()
                .unwrap_or_else(|| generate_affiliate_code(profile_type)),
            display_name: clean(request.display_name.as_deref()),
            nickname: clean(request.nickname.as_deref()),
            contact_phone: request
                .contact_phone
                .as_deref()
                .map(digits_only)
                .filter(|p| !p.is_empty()),
            withholding_rate: request.withholding_rate,
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.affiliate_repo.create_profile(&profile).await {
                Ok(created) => {
                    info!(
                        "Created affiliate profile {} ({}) code={}",
                        created.id, created.r#type, created.affiliate_code
                    );
                    return Ok(created);
                }
                Err(RepositoryError::Duplicate(_)) if explicit_code.is_none() && attempts < CODE_ATTEMPTS => {
                    warn!("Affiliate code collision on {}, retrying", profile.affiliate_code);
                    profile.affiliate_code = generate_affiliate_code(profile_type);
                }
                Err(RepositoryError::Duplicate(_)) => {
                    return Err(AppError::BusinessLogic(
                        "이미 사용 중인 어필리에이트 코드입니다.".to_string(),
                    ));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn require_profile(&self, id: i64, expected: ProfileType) -> AppResult<AffiliateProfile> {
        let profile = self
            .affiliate_repo
            .find_profile(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Profile {} not found.", id)))?;

        if profile.type_enum() != Some(expected) {
            return Err(AppError::Validation(format!(
                "Profile {} is not a {}.",
                id,
                expected.as_str()
            )));
        }
        Ok(profile)
    }

    /// Attach an agent to a branch manager or change the link status
    pub async fn set_relation(&self, request: RelationRequest) -> AppResult<AffiliateRelation> {
        let (Some(manager_id), Some(agent_id)) = (request.manager_id, request.agent_id) else {
            return Err(AppError::Validation("managerId and agentId are required.".to_string()));
        };
        let status = match clean(request.status.as_deref()) {
            Some(raw) => RelationStatus::from_str(&raw).map_err(AppError::Validation)?,
            None => RelationStatus::Active,
        };

        self.require_profile(manager_id, ProfileType::BranchManager).await?;
        self.require_profile(agent_id, ProfileType::SalesAgent).await?;

        let relation = self
            .affiliate_repo
            .upsert_relation(manager_id, agent_id, status)
            .await?;
        info!(
            "Relation manager={} agent={} set to {}",
            manager_id,
            agent_id,
            status.as_str()
        );
        Ok(relation)
    }

    // =========================================================================
    // Leads
    // =========================================================================

    pub async fn list_leads(&self, query: LeadListQuery) -> AppResult<Vec<AffiliateLead>> {
        let status = match clean(query.status.as_deref()) {
            Some(raw) => Some(
                LeadStatus::from_str(&raw)
                    .map_err(AppError::Validation)?
                    .as_str()
                    .to_string(),
            ),
            None => None,
        };

        Ok(self
            .affiliate_repo
            .list_leads(&LeadQuery {
                manager_id: query.manager_id,
                agent_id: query.agent_id,
                status,
                limit: query.limit.unwrap_or(100).clamp(1, 500),
            })
            .await?)
    }

    pub async fn create_lead(&self, request: CreateLeadRequest) -> AppResult<AffiliateLead> {
        let customer_name = clean(request.customer_name.as_deref());
        let customer_phone = request
            .customer_phone
            .as_deref()
            .map(digits_only)
            .filter(|p| !p.is_empty());

        if customer_name.is_none() && customer_phone.is_none() {
            return Err(AppError::Validation(
                "고객 이름 또는 연락처가 필요합니다.".to_string(),
            ));
        }

        let lead = self
            .affiliate_repo
            .create_lead(&NewLead {
                manager_id: request.manager_id,
                agent_id: request.agent_id,
                customer_name,
                customer_phone,
                notes: clean(request.notes.as_deref()),
                metadata: request.metadata,
            })
            .await?;

        info!("Created lead {}", lead.id);
        Ok(lead)
    }

    /// Whether `actor` may change the status of `lead`
    async fn can_edit_lead(&self, actor: &User, lead: &AffiliateLead) -> AppResult<bool> {
        if actor.is_admin() {
            return Ok(true);
        }

        let Some(profile) = self.affiliate_repo.find_profile_by_user(actor.id).await? else {
            return Ok(false);
        };

        match profile.type_enum() {
            Some(ProfileType::BranchManager) => {
                if lead.manager_id == Some(profile.id) || lead.agent_id == Some(profile.id) {
                    return Ok(true);
                }
                match lead.agent_id {
                    Some(agent_id) => Ok(self
                        .affiliate_repo
                        .has_active_relation(profile.id, agent_id)
                        .await?),
                    None => Ok(false),
                }
            }
            Some(ProfileType::SalesAgent) => Ok(lead.agent_id == Some(profile.id)),
            _ => Ok(false),
        }
    }

    /// Change a lead's status and append the change to `metadata.statusHistory`
    pub async fn update_lead_status(
        &self,
        actor: &User,
        lead_id: i64,
        request: LeadStatusRequest,
    ) -> AppResult<AffiliateLead> {
        let lead = self
            .affiliate_repo
            .find_lead(lead_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Lead not found".to_string()))?;

        if !self.can_edit_lead(actor, &lead).await? {
            return Err(AppError::Forbidden("Access denied".to_string()));
        }

        let next = match clean(request.status.as_deref()) {
            Some(raw) => LeadStatus::from_str(&raw)
                .map_err(|_| AppError::Validation(format!("유효하지 않은 상태입니다: {}", raw)))?
                .as_str()
                .to_string(),
            None => lead.status.clone(),
        };

        let metadata = append_status_history(lead.metadata.as_ref(), &lead.status, &next, actor.id, Utc::now());
        let notes = request.notes.as_deref().map(|n| Some(n.trim()).filter(|n| !n.is_empty()));

        let updated = self
            .affiliate_repo
            .update_lead_status(lead_id, &next, notes, &metadata)
            .await?;

        info!(
            "Lead {} status {} -> {} by user {}",
            lead_id, lead.status, next, actor.id
        );
        Ok(updated)
    }

    // =========================================================================
    // Sales
    // =========================================================================

    pub async fn list_sales(&self, query: SaleListQuery) -> AppResult<Vec<AffiliateSale>> {
        let status = clean(query.status.as_deref()).map(|s| s.to_uppercase());
        let limit = query.limit.unwrap_or(50).clamp(1, 200);
        Ok(self.affiliate_repo.list_sales(status.as_deref(), limit).await?)
    }

    /// Record a pending sale; manager and agent default to the lead's owners
    pub async fn create_sale(&self, request: CreateSaleRequest) -> AppResult<AffiliateSale> {
        let sale_amount = request
            .sale_amount
            .filter(|a| *a > Decimal::ZERO)
            .ok_or_else(|| AppError::Validation("saleAmount must be a positive number.".to_string()))?;

        let lead = match request.lead_id {
            Some(id) => Some(
                self.affiliate_repo
                    .find_lead(id)
                    .await?
                    .ok_or_else(|| AppError::NotFound("Lead not found".to_string()))?,
            ),
            None => None,
        };

        let sale = self
            .affiliate_repo
            .create_sale(&NewSale {
                lead_id: request.lead_id,
                manager_id: request.manager_id.or(lead.as_ref().and_then(|l| l.manager_id)),
                agent_id: request.agent_id.or(lead.as_ref().and_then(|l| l.agent_id)),
                product_code: clean(request.product_code.as_deref()).map(|c| c.to_uppercase()),
                sale_amount,
                cost_amount: request.cost_amount,
                sale_date: parse_sale_date(request.sale_date.as_deref())?,
            })
            .await?;

        info!("Created sale {} amount={}", sale.id, sale.sale_amount);
        Ok(sale)
    }

    async fn withholding_rate(&self, profile_id: Option<i64>) -> AppResult<Option<Decimal>> {
        match profile_id {
            Some(id) => Ok(self
                .affiliate_repo
                .find_profile(id)
                .await?
                .and_then(|p| p.withholding_rate)),
            None => Ok(None),
        }
    }

    /// Compute the commission breakdown, write it to the sale and regenerate its ledger
    pub async fn confirm_sale(
        &self,
        admin_id: i64,
        sale_id: i64,
        request: ConfirmSaleRequest,
    ) -> AppResult<ConfirmedSale> {
        let sale = self
            .affiliate_repo
            .find_sale(sale_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Sale not found".to_string()))?;

        let agent_rate = self.withholding_rate(sale.agent_id).await?;
        let manager_rate = self.withholding_rate(sale.manager_id).await?;

        let input = CommissionInput {
            cost_amount: request.cost_amount.or(sale.cost_amount),
            branch_commission: request.branch_commission.or(sale.branch_commission),
            sales_commission: request.sales_commission.or(sale.sales_commission),
            override_commission: request.override_commission.or(sale.override_commission),
            withholding_rate: agent_rate,
            manager_withholding_rate: manager_rate,
            include_hq_net: request.include_hq_net.unwrap_or(true),
            ..CommissionInput::new(sale.sale_amount)
        };

        let extra_adjustments = request
            .adjustments
            .into_iter()
            .filter_map(|a| {
                let amount = a.amount?;
                Some(LedgerAdjustment {
                    entry_type: a.entry_type,
                    amount,
                    profile_id: a.profile_id,
                    withholding_amount: a.withholding_amount,
                    notes: a.notes,
                    metadata: a.metadata,
                })
            })
            .collect();

        let options = LedgerOptions {
            sale_id,
            manager_profile_id: sale.manager_id,
            agent_profile_id: sale.agent_id,
            override_profile_id: request.override_profile_id,
            extra_adjustments,
            metadata: Some(json!({ "saleId": sale_id, "confirmedBy": admin_id })),
        };

        let (breakdown, entries) =
            generate_ledger_entries(&input, &options).map_err(|e| AppError::Validation(e.to_string()))?;

        let sale = self
            .affiliate_repo
            .confirm_sale(sale_id, &breakdown, &entries)
            .await?;
        let ledger = self.affiliate_repo.ledger_for_sale(sale_id).await?;

        info!(
            "Confirmed sale {} with {} ledger entries (net revenue {})",
            sale_id,
            ledger.len(),
            breakdown.net_revenue
        );

        Ok(ConfirmedSale {
            ok: true,
            sale,
            breakdown,
            ledger,
        })
    }

    /// Reverse a sale's commissions with negative REFUND ledger rows
    pub async fn refund_sale(
        &self,
        admin_id: i64,
        sale_id: i64,
        request: RefundSaleRequest,
    ) -> AppResult<RefundedSale> {
        let reason = clean(request.reason.as_deref())
            .ok_or_else(|| AppError::Validation("환불 사유를 입력해주세요.".to_string()))?;

        let (sale, refund_entries) = self
            .affiliate_repo
            .refund_sale(sale_id, &reason, admin_id)
            .await?;

        info!(
            "Refunded sale {} by admin {} ({} reversing entries)",
            sale_id,
            admin_id,
            refund_entries.len()
        );

        Ok(RefundedSale {
            ok: true,
            sale,
            refund_entries,
        })
    }

    pub async fn cancel_refund(&self, admin_id: i64, sale_id: i64) -> AppResult<AffiliateSale> {
        let sale = self.affiliate_repo.cancel_refund(sale_id).await?;
        info!("Refund of sale {} cancelled by admin {}", sale_id, admin_id);
        Ok(sale)
    }

    // =========================================================================
    // Metrics
    // =========================================================================

    /// Per-agent commission report with totals
    pub async fn agent_metrics(&self, query: &MetricsQuery) -> AppResult<AgentMetricsReport> {
        let manager_id = match query.manager_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => Some(
                raw.parse::<i64>()
                    .map_err(|_| AppError::Validation("잘못된 매니저 ID 입니다.".to_string()))?,
            ),
            None => None,
        };
        let search = clean(query.search.as_deref());
        let range = DateRange::parse(query.from.as_deref(), query.to.as_deref());
        let filters = MetricsFilters {
            from: clean(query.from.as_deref()),
            to: clean(query.to.as_deref()),
            search: search.clone(),
            manager_id,
        };

        let scoped_ids = match manager_id {
            Some(id) => Some(self.affiliate_repo.agent_ids_for_manager(id).await?),
            None => None,
        };

        let agents = match &scoped_ids {
            Some(ids) if ids.is_empty() => Vec::new(),
            _ => {
                self.affiliate_repo
                    .search_profiles(
                        Some(ProfileType::SalesAgent),
                        search.as_deref(),
                        scoped_ids.as_deref(),
                        AGENT_REPORT_LIMIT,
                    )
                    .await?
            }
        };

        let agent_ids: Vec<i64> = agents.iter().map(|a| a.id).collect();
        let relations = if agent_ids.is_empty() {
            Vec::new()
        } else {
            self.affiliate_repo.relations_for_agents(&agent_ids).await?
        };

        let mut managers: BTreeMap<i64, ManagerRef> = relations
            .iter()
            .map(|r| {
                (
                    r.manager_id,
                    ManagerRef {
                        id: r.manager_id,
                        name: r.manager_name.clone(),
                        affiliate_code: r.manager_code.clone(),
                    },
                )
            })
            .collect();
        if let Some(id) = manager_id {
            if !managers.contains_key(&id) {
                if let Some(profile) = self.affiliate_repo.find_profile(id).await? {
                    managers.insert(
                        id,
                        ManagerRef {
                            id,
                            name: profile.display_name.clone().or(profile.nickname.clone()),
                            affiliate_code: Some(profile.affiliate_code.clone()),
                        },
                    );
                }
            }
        }
        let managers: Vec<ManagerRef> = managers.into_values().collect();

        if agents.is_empty() {
            return Ok(AgentMetricsReport {
                ok: true,
                agents: Vec::new(),
                totals: None,
                filters,
                managers,
                months: Vec::new(),
            });
        }

        let (trend_start, trend_end) = range.trend_window(Utc::now());
        let months = build_month_series(trend_start, trend_end, TREND_MONTHS);
        let repo = &self.affiliate_repo;

        let (leads, sales, ledger, trend, recent_leads) = futures::try_join!(
            repo.lead_groups(Owner::Agent, &agent_ids, &range),
            repo.sale_sums(Owner::Agent, &agent_ids, &range),
            repo.ledger_groups(
                &agent_ids,
                &[
                    LedgerEntryType::SalesCommission,
                    LedgerEntryType::OverrideCommission,
                    LedgerEntryType::Withholding,
                ],
                &range,
            ),
            repo.trend_sales(Owner::Agent, &agent_ids, trend_start, trend_end),
            repo.recent_leads(&agent_ids, RECENT_LEADS_FETCH),
        )?;

        let metrics = build_agent_metrics(
            agents,
            AgentMetricRows {
                relations,
                leads,
                sales,
                ledger,
                trend,
                recent_leads,
            },
            &months,
        );
        let totals = AgentTotals::from_agents(&metrics);

        info!(
            "Agent metrics: {} agents, {} sales",
            totals.agent_count, totals.total_sales_count
        );

        Ok(AgentMetricsReport {
            ok: true,
            agents: metrics,
            totals: Some(totals),
            filters,
            managers,
            months,
        })
    }

    /// Per-branch-manager roll-up of team sales, commissions and withholding
    pub async fn team_metrics(&self, query: &MetricsQuery) -> AppResult<TeamMetricsReport> {
        let search = clean(query.search.as_deref());
        let range = DateRange::parse(query.from.as_deref(), query.to.as_deref());
        let filters = MetricsFilters {
            from: clean(query.from.as_deref()),
            to: clean(query.to.as_deref()),
            search: search.clone(),
            manager_id: None,
        };

        let managers = self
            .affiliate_repo
            .search_profiles(
                Some(ProfileType::BranchManager),
                search.as_deref(),
                None,
                MANAGER_REPORT_LIMIT,
            )
            .await?;

        if managers.is_empty() {
            return Ok(TeamMetricsReport {
                ok: true,
                managers: Vec::new(),
                totals: None,
                filters,
                months: Vec::new(),
            });
        }

        let manager_ids: Vec<i64> = managers.iter().map(|m| m.id).collect();
        let agents = self.affiliate_repo.team_agents(&manager_ids).await?;
        let mut agent_ids: Vec<i64> = agents.iter().map(|a| a.agent_id).collect();
        agent_ids.sort_unstable();
        agent_ids.dedup();

        let (trend_start, trend_end) = range.trend_window(Utc::now());
        let months = build_month_series(trend_start, trend_end, TREND_MONTHS);
        let repo = &self.affiliate_repo;

        let manager_types = [
            LedgerEntryType::BranchCommission,
            LedgerEntryType::OverrideCommission,
            LedgerEntryType::Withholding,
        ];
        let agent_types = [
            LedgerEntryType::SalesCommission,
            LedgerEntryType::OverrideCommission,
            LedgerEntryType::Withholding,
        ];

        let (manager_leads, manager_sales, manager_ledger, manager_trend) = futures::try_join!(
            repo.lead_groups(Owner::Manager, &manager_ids, &range),
            repo.sale_sums(Owner::Manager, &manager_ids, &range),
            repo.ledger_groups(&manager_ids, &manager_types, &range),
            repo.trend_sales(Owner::Manager, &manager_ids, trend_start, trend_end),
        )?;

        let (agent_leads, agent_sales, agent_ledger) = futures::try_join!(
            repo.lead_groups(Owner::Agent, &agent_ids, &range),
            repo.sale_sums(Owner::Agent, &agent_ids, &range),
            repo.ledger_groups(&agent_ids, &agent_types, &range),
        )?;

        let metrics = build_team_metrics(
            managers,
            TeamMetricRows {
                agents,
                manager_leads,
                manager_sales,
                manager_ledger,
                manager_trend,
                agent_leads,
                agent_sales,
                agent_ledger,
            },
            &months,
        );
        let totals = TeamTotals::from_managers(&metrics);

        Ok(TeamMetricsReport {
            ok: true,
            managers: metrics,
            totals: Some(totals),
            filters,
            months,
        })
    }
}

/// Existing metadata with one more `statusHistory` entry and purchase/refund stamps
pub fn append_status_history(
    metadata: Option<&Value>,
    from: &str,
    to: &str,
    changed_by: i64,
    now: DateTime<Utc>,
) -> Value {
    let mut map = match metadata {
        Some(Value::Object(map)) => map.clone(),
        _ => serde_json::Map::new(),
    };

    let mut history = match map.remove("statusHistory") {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };
    let stamp = now.to_rfc3339();
    history.push(json!({
        "from": from,
        "to": to,
        "changedAt": stamp,
        "changedBy": changed_by,
    }));
    map.insert("statusHistory".to_string(), Value::Array(history));

    match to {
        "PURCHASED" => {
            map.insert("purchasedAt".to_string(), json!(stamp));
            map.insert("purchasedBy".to_string(), json!(changed_by));
        }
        "REFUNDED" => {
            map.insert("refundedAt".to_string(), json!(stamp));
            map.insert("refundedBy".to_string(), json!(changed_by));
        }
        "CONTACTED" => {
            map.insert("lastContactedAt".to_string(), json!(stamp));
        }
        _ => {}
    }

    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_generate_affiliate_code() {
        let code = generate_affiliate_code(ProfileType::SalesAgent);
        assert!(code.starts_with("SA"));
        assert_eq!(code.len(), 2 + CODE_LENGTH);
        assert!(code[2..].bytes().all(|b| CODE_ALPHABET.contains(&b)));

        assert!(generate_affiliate_code(ProfileType::BranchManager).starts_with("BM"));
    }

    #[test]
    fn test_status_history_is_appended() {
        let now = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let existing = json!({
            "source": "landing",
            "statusHistory": [{ "from": "NEW", "to": "CONTACTED" }]
        });

        let updated = append_status_history(Some(&existing), "CONTACTED", "PURCHASED", 9, now);
        let history = updated["statusHistory"].as_array().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1]["from"], "CONTACTED");
        assert_eq!(history[1]["to"], "PURCHASED");
        assert_eq!(history[1]["changedBy"], 9);
        assert_eq!(updated["source"], "landing");
        assert_eq!(updated["purchasedBy"], 9);
    }

    #[test]
    fn test_status_history_from_empty_metadata() {
        let now = Utc::now();
        let updated = append_status_history(Some(&json!("not an object")), "NEW", "NEW", 1, now);
        assert_eq!(updated["statusHistory"].as_array().unwrap().len(), 1);
        assert!(updated.get("purchasedAt").is_none());
    }

    #[test]
    fn test_parse_sale_date() {
        let day = parse_sale_date(Some("2025-04-10")).unwrap().unwrap();
        assert_eq!(day, Utc.with_ymd_and_hms(2025, 4, 10, 0, 0, 0).unwrap());

        let ts = parse_sale_date(Some("2025-04-10T09:30:00+09:00")).unwrap().unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 4, 10, 0, 30, 0).unwrap());

        assert!(parse_sale_date(None).unwrap().is_none());
        assert!(parse_sale_date(Some("  ")).unwrap().is_none());
        assert!(parse_sale_date(Some("10/04/2025")).is_err());
    }

    #[test]
    fn test_metrics_query_csv_flag() {
        let query = MetricsQuery {
            format: Some("csv".to_string()),
            ..Default::default()
        };
        assert!(query.wants_csv());
        assert!(!MetricsQuery::default().wants_csv());
    }

    #[test]
    fn test_confirm_request_accepts_string_amounts() {
        let request: ConfirmSaleRequest = serde_json::from_value(json!({
            "costAmount": "800000",
            "salesCommission": 50000,
            "adjustments": [{ "entryType": "ADJUSTMENT", "amount": "-1000", "profileId": "4" }]
        }))
        .unwrap();
        assert_eq!(request.cost_amount, Some(Decimal::from(800_000)));
        assert_eq!(request.sales_commission, Some(Decimal::from(50_000)));
        assert_eq!(request.adjustments[0].amount, Some(Decimal::from(-1000)));
        assert_eq!(request.adjustments[0].profile_id, Some(4));
    }
}
