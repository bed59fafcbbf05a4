//! Repository for the affiliate network and commission ledger

use crate::commission::metrics::{
    LeadGroupRow, LedgerGroupRow, RecentLead, RelationLink, SaleSumRow, TeamAgentLink, TrendSaleRow,
};
use crate::commission::{refund_entries, CommissionBreakdown, DateRange, NewLedgerEntry};
use crate::error::RepositoryError;
use crate::models::{
    AffiliateLead, AffiliateProfile, AffiliateRelation, AffiliateSale, CommissionLedgerEntry,
    LeadStatus, LedgerEntryType, ProfileType, RelationStatus, SaleStatus,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use sqlx::{FromRow, PgPool, Postgres, Transaction};

/// Which profile column a metric query groups by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Manager,
    Agent,
}

impl Owner {
    fn column(&self) -> &'static str {
        match self {
            Owner::Manager => "manager_id",
            Owner::Agent => "agent_id",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewProfile {
    pub user_id: Option<i64>,
    pub profile_type: ProfileType,
    pub affiliate_code: String,
    pub display_name: Option<String>,
    pub nickname: Option<String>,
    pub contact_phone: Option<String>,
    pub withholding_rate: Option<Decimal>,
}

#[derive(Debug, Clone)]
pub struct NewLead {
    pub manager_id: Option<i64>,
    pub agent_id: Option<i64>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub notes: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct NewSale {
    pub lead_id: Option<i64>,
    pub manager_id: Option<i64>,
    pub agent_id: Option<i64>,
    pub product_code: Option<String>,
    pub sale_amount: Decimal,
    pub cost_amount: Option<Decimal>,
    pub sale_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct LeadQuery {
    pub manager_id: Option<i64>,
    pub agent_id: Option<i64>,
    pub status: Option<String>,
    pub limit: i64,
}

/// Lead count per status for the dashboard
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

#[derive(Debug, Clone, Default, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SaleTotals {
    pub count: i64,
    pub sale_amount: Decimal,
    pub net_revenue: Decimal,
}

pub struct AffiliateRepository {
    pool: PgPool,
}

impl AffiliateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Profiles
    // =========================================================================

    pub async fn create_profile(&self, profile: &NewProfile) -> Result<AffiliateProfile, RepositoryError> {
        let created = sqlx::query_as::<_, AffiliateProfile>(
            r#"
            INSERT INTO affiliate_profiles
                (user_id, type, affiliate_code, display_name, nickname, contact_phone, withholding_rate)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(profile.user_id)
        .bind(profile.profile_type.as_str())
        .bind(&profile.affiliate_code)
        .bind(&profile.display_name)
        .bind(&profile.nickname)
        .bind(&profile.contact_phone)
        .bind(profile.withholding_rate)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    pub async fn find_profile(&self, id: i64) -> Result<Option<AffiliateProfile>, RepositoryError> {
        let profile = sqlx::query_as::<_, AffiliateProfile>("SELECT * FROM affiliate_profiles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(profile)
    }

    pub async fn find_profile_by_user(&self, user_id: i64) -> Result<Option<AffiliateProfile>, RepositoryError> {
        let profile = sqlx::query_as::<_, AffiliateProfile>(
            "SELECT * FROM affiliate_profiles WHERE user_id = $1 ORDER BY id LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(profile)
    }

    /// Profiles of one tier, optionally filtered by a free-text search and an id set
    pub async fn search_profiles(
        &self,
        profile_type: Option<ProfileType>,
        search: Option<&str>,
        ids: Option<&[i64]>,
        limit: i64,
    ) -> Result<Vec<AffiliateProfile>, RepositoryError> {
        let pattern = search.map(|s| format!("%{}%", s));
        let profiles = sqlx::query_as::<_, AffiliateProfile>(
            r#"
            SELECT * FROM affiliate_profiles
            WHERE ($1::text IS NULL OR type = $1)
              AND ($2::text IS NULL
                   OR display_name ILIKE $2
                   OR nickname ILIKE $2
                   OR contact_phone ILIKE $2
                   OR affiliate_code ILIKE $2)
              AND ($3::bigint[] IS NULL OR id = ANY($3))
            ORDER BY display_name ASC NULLS LAST, id ASC
            LIMIT $4
            "#,
        )
        .bind(profile_type.map(|t| t.as_str()))
        .bind(pattern)
        .bind(ids)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(profiles)
    }

    // =========================================================================
    // Relations
    // =========================================================================

    /// Attach an agent to a manager, or change the status of an existing link
    pub async fn upsert_relation(
        &self,
        manager_id: i64,
        agent_id: i64,
        status: RelationStatus,
    ) -> Result<AffiliateRelation, RepositoryError> {
        let relation = sqlx::query_as::<_, AffiliateRelation>(
            r#"
            INSERT INTO affiliate_relations (manager_id, agent_id, status)
            VALUES ($1, $2, $3)
            ON CONFLICT (manager_id, agent_id) DO UPDATE SET status = EXCLUDED.status
            RETURNING *
            "#,
        )
        .bind(manager_id)
        .bind(agent_id)
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(relation)
    }

    pub async fn has_active_relation(&self, manager_id: i64, agent_id: i64) -> Result<bool, RepositoryError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM affiliate_relations
                WHERE manager_id = $1 AND agent_id = $2 AND status = 'ACTIVE'
            )
            "#,
        )
        .bind(manager_id)
        .bind(agent_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    /// Agent ids linked to a manager through an ACTIVE or PAUSED relation
    pub async fn agent_ids_for_manager(&self, manager_id: i64) -> Result<Vec<i64>, RepositoryError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT agent_id FROM affiliate_relations
            WHERE manager_id = $1 AND agent_id IS NOT NULL AND status IN ('ACTIVE', 'PAUSED')
            "#,
        )
        .bind(manager_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    /// Manager links of the given agents, with the manager's name and code
    pub async fn relations_for_agents(&self, agent_ids: &[i64]) -> Result<Vec<RelationLink>, RepositoryError> {
        let links = sqlx::query_as::<_, RelationLink>(
            r#"
            SELECT r.manager_id, r.agent_id, r.status, r.connected_at,
                   p.display_name AS manager_name, p.affiliate_code AS manager_code
            FROM affiliate_relations r
            JOIN affiliate_profiles p ON p.id = r.manager_id
            WHERE r.agent_id = ANY($1) AND r.status IN ('ACTIVE', 'PAUSED')
            ORDER BY r.connected_at DESC
            "#,
        )
        .bind(agent_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(links)
    }

    /// Agents under the given managers
    pub async fn team_agents(&self, manager_ids: &[i64]) -> Result<Vec<TeamAgentLink>, RepositoryError> {
        let links = sqlx::query_as::<_, TeamAgentLink>(
            r#"
            SELECT r.manager_id, r.agent_id, r.status, r.connected_at,
                   p.affiliate_code AS agent_code, p.display_name AS agent_name
            FROM affiliate_relations r
            JOIN affiliate_profiles p ON p.id = r.agent_id
            WHERE r.manager_id = ANY($1) AND r.status IN ('ACTIVE', 'PAUSED')
            ORDER BY p.display_name ASC NULLS LAST, p.id ASC
            "#,
        )
        .bind(manager_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(links)
    }

    // =========================================================================
    // Leads
    // =========================================================================

    pub async fn create_lead(&self, lead: &NewLead) -> Result<AffiliateLead, RepositoryError> {
        let created = sqlx::query_as::<_, AffiliateLead>(
            r#"
            INSERT INTO affiliate_leads (manager_id, agent_id, customer_name, customer_phone, notes, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(lead.manager_id)
        .bind(lead.agent_id)
        .bind(&lead.customer_name)
        .bind(&lead.customer_phone)
        .bind(&lead.notes)
        .bind(&lead.metadata)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    pub async fn find_lead(&self, id: i64) -> Result<Option<AffiliateLead>, RepositoryError> {
        let lead = sqlx::query_as::<_, AffiliateLead>("SELECT * FROM affiliate_leads WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(lead)
    }

    pub async fn list_leads(&self, query: &LeadQuery) -> Result<Vec<AffiliateLead>, RepositoryError> {
        let leads = sqlx::query_as::<_, AffiliateLead>(
            r#"
            SELECT * FROM affiliate_leads
            WHERE ($1::bigint IS NULL OR manager_id = $1)
              AND ($2::bigint IS NULL OR agent_id = $2)
              AND ($3::text IS NULL OR status = $3)
            ORDER BY created_at DESC, id DESC
            LIMIT $4
            "#,
        )
        .bind(query.manager_id)
        .bind(query.agent_id)
        .bind(&query.status)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(leads)
    }

    /// `notes: Some(..)` overwrites the notes (`Some(None)` clears them); `None` keeps them
    pub async fn update_lead_status(
        &self,
        id: i64,
        status: &str,
        notes: Option<Option<&str>>,
        metadata: &Value,
    ) -> Result<AffiliateLead, RepositoryError> {
        let lead = sqlx::query_as::<_, AffiliateLead>(
            r#"
            UPDATE affiliate_leads
            SET status = $2,
                notes = CASE WHEN $3 THEN $4 ELSE notes END,
                metadata = $5,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(notes.is_some())
        .bind(notes.flatten())
        .bind(metadata)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("Lead {} not found", id)))?;

        Ok(lead)
    }

    // =========================================================================
    // Sales and ledger
    // =========================================================================

    pub async fn create_sale(&self, sale: &NewSale) -> Result<AffiliateSale, RepositoryError> {
        let created = sqlx::query_as::<_, AffiliateSale>(
            r#"
            INSERT INTO affiliate_sales
                (lead_id, manager_id, agent_id, product_code, sale_amount, cost_amount, sale_date)
            VALUES ($1, $2, $3, $4, $5, $6, COALESCE($7, NOW()))
            RETURNING *
            "#,
        )
        .bind(sale.lead_id)
        .bind(sale.manager_id)
        .bind(sale.agent_id)
        .bind(&sale.product_code)
        .bind(sale.sale_amount)
        .bind(sale.cost_amount)
        .bind(sale.sale_date)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    pub async fn find_sale(&self, id: i64) -> Result<Option<AffiliateSale>, RepositoryError> {
        let sale = sqlx::query_as::<_, AffiliateSale>("SELECT * FROM affiliate_sales WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(sale)
    }

    pub async fn list_sales(&self, status: Option<&str>, limit: i64) -> Result<Vec<AffiliateSale>, RepositoryError> {
        let sales = sqlx::query_as::<_, AffiliateSale>(
            r#"
            SELECT * FROM affiliate_sales
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY sale_date DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(sales)
    }

    pub async fn ledger_for_sale(&self, sale_id: i64) -> Result<Vec<CommissionLedgerEntry>, RepositoryError> {
        let entries = sqlx::query_as::<_, CommissionLedgerEntry>(
            "SELECT * FROM commission_ledger WHERE sale_id = $1 ORDER BY id",
        )
        .bind(sale_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Write the breakdown onto the sale, mark it CONFIRMED and replace its
    /// unsettled ledger rows. Settled rows are kept and not booked twice.
    pub async fn confirm_sale(
        &self,
        sale_id: i64,
        breakdown: &CommissionBreakdown,
        entries: &[NewLedgerEntry],
    ) -> Result<AffiliateSale, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let status = lock_sale_status(&mut tx, sale_id).await?;
        match status {
            SaleStatus::Cancelled => {
                return Err(RepositoryError::BusinessRule("Cancelled sales cannot be confirmed".into()))
            }
            other if !other.is_confirmable() => {
                return Err(RepositoryError::BusinessRule(format!(
                    "Sale in status {} cannot be confirmed",
                    other.as_str()
                )))
            }
            _ => {}
        }

        let sale = sqlx::query_as::<_, AffiliateSale>(
            r#"
            UPDATE affiliate_sales
            SET cost_amount = $2, net_revenue = $3, branch_commission = $4, sales_commission = $5,
                override_commission = $6, withholding_amount = $7, status = $8,
                confirmed_at = COALESCE(confirmed_at, NOW())
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(sale_id)
        .bind(breakdown.cost_amount)
        .bind(breakdown.net_revenue)
        .bind(breakdown.branch_commission)
        .bind(breakdown.sales_commission)
        .bind(breakdown.override_commission)
        .bind(breakdown.total_withholding)
        .bind(SaleStatus::Confirmed.as_str())
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM commission_ledger WHERE sale_id = $1 AND is_settled = FALSE")
            .bind(sale_id)
            .execute(&mut *tx)
            .await?;

        let settled: Vec<(String, Option<i64>)> = sqlx::query_as(
            "SELECT entry_type, profile_id FROM commission_ledger WHERE sale_id = $1 AND is_settled = TRUE",
        )
        .bind(sale_id)
        .fetch_all(&mut *tx)
        .await?;

        let fresh: Vec<&NewLedgerEntry> = entries
            .iter()
            .filter(|e| {
                !settled
                    .iter()
                    .any(|(kind, profile)| kind == e.entry_type.as_str() && *profile == e.profile_id)
            })
            .collect();
        insert_ledger_entries(&mut tx, &fresh).await?;

        tx.commit().await?;

        Ok(sale)
    }

    /// Book reversing REFUND rows for every non-refund ledger row of the sale
    /// and mark the sale (and its lead) REFUNDED.
    pub async fn refund_sale(
        &self,
        sale_id: i64,
        reason: &str,
        processed_by: i64,
    ) -> Result<(AffiliateSale, Vec<CommissionLedgerEntry>), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        match lock_sale_status(&mut tx, sale_id).await? {
            SaleStatus::Refunded => {
                return Err(RepositoryError::BusinessRule("이미 환불 처리된 판매입니다.".into()))
            }
            SaleStatus::Cancelled => {
                return Err(RepositoryError::BusinessRule("취소된 판매는 환불할 수 없습니다.".into()))
            }
            _ => {}
        }

        let ledger = sqlx::query_as::<_, CommissionLedgerEntry>(
            "SELECT * FROM commission_ledger WHERE sale_id = $1 ORDER BY id",
        )
        .bind(sale_id)
        .fetch_all(&mut *tx)
        .await?;

        let now = Utc::now();
        let reversals = refund_entries(&ledger, reason, processed_by, now);
        let refs: Vec<&NewLedgerEntry> = reversals.iter().collect();
        insert_ledger_entries(&mut tx, &refs).await?;

        let sale = sqlx::query_as::<_, AffiliateSale>(
            r#"
            UPDATE affiliate_sales
            SET status = $2, refunded_at = $3, refund_reason = $4
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(sale_id)
        .bind(SaleStatus::Refunded.as_str())
        .bind(now)
        .bind(reason)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(lead_id) = sale.lead_id {
            sqlx::query(
                r#"
                UPDATE affiliate_leads
                SET status = $2, metadata = COALESCE(metadata, '{}'::jsonb) || $3, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(lead_id)
            .bind(LeadStatus::Refunded.as_str())
            .bind(serde_json::json!({
                "refundSaleId": sale_id,
                "refundProcessedAt": now.to_rfc3339(),
            }))
            .execute(&mut *tx)
            .await?;
        }

        let refund_rows = sqlx::query_as::<_, CommissionLedgerEntry>(
            "SELECT * FROM commission_ledger WHERE sale_id = $1 AND entry_type = $2 ORDER BY id",
        )
        .bind(sale_id)
        .bind(LedgerEntryType::Refund.as_str())
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((sale, refund_rows))
    }

    /// Undo a refund: drop the REFUND rows and put the sale back to CONFIRMED
    /// (or PENDING when it was never confirmed).
    pub async fn cancel_refund(&self, sale_id: i64) -> Result<AffiliateSale, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        if lock_sale_status(&mut tx, sale_id).await? != SaleStatus::Refunded {
            return Err(RepositoryError::BusinessRule("환불 처리된 판매가 아닙니다.".into()));
        }

        sqlx::query("DELETE FROM commission_ledger WHERE sale_id = $1 AND entry_type = $2")
            .bind(sale_id)
            .bind(LedgerEntryType::Refund.as_str())
            .execute(&mut *tx)
            .await?;

        let sale = sqlx::query_as::<_, AffiliateSale>(
            r#"
            UPDATE affiliate_sales
            SET status = CASE WHEN confirmed_at IS NOT NULL THEN $2 ELSE $3 END,
                refunded_at = NULL, refund_reason = NULL
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(sale_id)
        .bind(SaleStatus::Confirmed.as_str())
        .bind(SaleStatus::Pending.as_str())
        .fetch_one(&mut *tx)
        .await?;

        if let Some(lead_id) = sale.lead_id {
            let lead_status = if sale.confirmed_at.is_some() {
                LeadStatus::Purchased
            } else {
                LeadStatus::New
            };
            sqlx::query(
                r#"
                UPDATE affiliate_leads
                SET status = $2, metadata = COALESCE(metadata, '{}'::jsonb) - 'refundSaleId' - 'refundProcessedAt',
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(lead_id)
            .bind(lead_status.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(sale)
    }

    // =========================================================================
    // Metric queries
    // =========================================================================

    pub async fn lead_groups(
        &self,
        owner: Owner,
        ids: &[i64],
        range: &DateRange,
    ) -> Result<Vec<LeadGroupRow>, RepositoryError> {
        let sql = format!(
            r#"
            SELECT {col} AS owner_id, status, COUNT(*) AS count
            FROM affiliate_leads
            WHERE {col} = ANY($1)
              AND ($2::timestamptz IS NULL OR created_at >= $2)
              AND ($3::timestamptz IS NULL OR created_at <= $3)
            GROUP BY {col}, status
            "#,
            col = owner.column()
        );

        let rows = sqlx::query_as::<_, LeadGroupRow>(&sql)
            .bind(ids)
            .bind(range.from)
            .bind(range.to)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    /// Sale sums over counted statuses, filtered by confirmation time
    pub async fn sale_sums(
        &self,
        owner: Owner,
        ids: &[i64],
        range: &DateRange,
    ) -> Result<Vec<SaleSumRow>, RepositoryError> {
        let sql = format!(
            r#"
            SELECT {col} AS owner_id,
                   COUNT(*) AS count,
                   COALESCE(SUM(sale_amount), 0) AS sale_amount,
                   COALESCE(SUM(net_revenue), 0) AS net_revenue,
                   COALESCE(SUM(branch_commission), 0) AS branch_commission,
                   COALESCE(SUM(sales_commission), 0) AS sales_commission,
                   COALESCE(SUM(override_commission), 0) AS override_commission
            FROM affiliate_sales
            WHERE {col} = ANY($1)
              AND status = ANY($2)
              AND ($3::timestamptz IS NULL OR confirmed_at >= $3)
              AND ($4::timestamptz IS NULL OR confirmed_at <= $4)
            GROUP BY {col}
            "#,
            col = owner.column()
        );

        let rows = sqlx::query_as::<_, SaleSumRow>(&sql)
            .bind(ids)
            .bind(SaleStatus::counted_strs())
            .bind(range.from)
            .bind(range.to)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    pub async fn ledger_groups(
        &self,
        profile_ids: &[i64],
        entry_types: &[LedgerEntryType],
        range: &DateRange,
    ) -> Result<Vec<LedgerGroupRow>, RepositoryError> {
        let types: Vec<String> = entry_types.iter().map(|t| t.as_str().to_string()).collect();
        let rows = sqlx::query_as::<_, LedgerGroupRow>(
            r#"
            SELECT profile_id, entry_type, is_settled,
                   COALESCE(SUM(amount), 0) AS amount,
                   COALESCE(SUM(withholding_amount), 0) AS withholding_amount
            FROM commission_ledger
            WHERE profile_id = ANY($1)
              AND entry_type = ANY($2)
              AND ($3::timestamptz IS NULL OR created_at >= $3)
              AND ($4::timestamptz IS NULL OR created_at <= $4)
            GROUP BY profile_id, entry_type, is_settled
            "#,
        )
        .bind(profile_ids)
        .bind(types)
        .bind(range.from)
        .bind(range.to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Individual counted sales inside the trend window, by sale date
    pub async fn trend_sales(
        &self,
        owner: Owner,
        ids: &[i64],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TrendSaleRow>, RepositoryError> {
        let sql = format!(
            r#"
            SELECT {col} AS owner_id, sale_date,
                   sale_amount,
                   COALESCE(branch_commission, 0) AS branch_commission,
                   COALESCE(sales_commission, 0) AS sales_commission,
                   COALESCE(override_commission, 0) AS override_commission
            FROM affiliate_sales
            WHERE {col} = ANY($1)
              AND status = ANY($2)
              AND sale_date >= $3 AND sale_date <= $4
            "#,
            col = owner.column()
        );

        let rows = sqlx::query_as::<_, TrendSaleRow>(&sql)
            .bind(ids)
            .bind(SaleStatus::counted_strs())
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    pub async fn recent_leads(&self, agent_ids: &[i64], limit: i64) -> Result<Vec<RecentLead>, RepositoryError> {
        let rows = sqlx::query_as::<_, RecentLead>(
            r#"
            SELECT agent_id, id, customer_name, customer_phone, status, created_at
            FROM affiliate_leads
            WHERE agent_id = ANY($1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(agent_ids)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // =========================================================================
    // Dashboard
    // =========================================================================

    pub async fn lead_status_counts(&self) -> Result<Vec<StatusCount>, RepositoryError> {
        let rows = sqlx::query_as::<_, StatusCount>(
            "SELECT status, COUNT(*) AS count FROM affiliate_leads GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn counted_sale_totals(&self) -> Result<SaleTotals, RepositoryError> {
        let totals = sqlx::query_as::<_, SaleTotals>(
            r#"
            SELECT COUNT(*) AS count,
                   COALESCE(SUM(sale_amount), 0) AS sale_amount,
                   COALESCE(SUM(net_revenue), 0) AS net_revenue
            FROM affiliate_sales
            WHERE status = ANY($1)
            "#,
        )
        .bind(SaleStatus::counted_strs())
        .fetch_one(&self.pool)
        .await?;

        Ok(totals)
    }
}

async fn lock_sale_status(
    tx: &mut Transaction<'_, Postgres>,
    sale_id: i64,
) -> Result<SaleStatus, RepositoryError> {
    let status: Option<String> = sqlx::query_scalar("SELECT status FROM affiliate_sales WHERE id = $1 FOR UPDATE")
        .bind(sale_id)
        .fetch_optional(&mut **tx)
        .await?;

    let status = status.ok_or_else(|| RepositoryError::NotFound(format!("Sale {} not found", sale_id)))?;
    SaleStatus::from_str(&status).map_err(RepositoryError::BusinessRule)
}

async fn insert_ledger_entries(
    tx: &mut Transaction<'_, Postgres>,
    entries: &[&NewLedgerEntry],
) -> Result<(), RepositoryError> {
    for entry in entries {
        sqlx::query(
            r#"
            INSERT INTO commission_ledger
                (sale_id, profile_id, entry_type, amount, currency, withholding_amount, notes, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.sale_id)
        .bind(entry.profile_id)
        .bind(entry.entry_type.as_str())
        .bind(entry.amount)
        .bind(&entry.currency)
        .bind(entry.withholding_amount)
        .bind(&entry.notes)
        .bind(&entry.metadata)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}
