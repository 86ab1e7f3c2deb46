use crate::error::{OrchestratorError, Result};
use crate::plans::PlanLimits;
use crate::providers::{BillingInterval, ExternalSubscription, NativeSubscriptionStatus};
use crate::status::{self, CanonicalStatus, Resolution, StatusInputs};
use crate::usage::UsageCounters;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

/// The canonical tenant record.
///
/// A row always references an organization. Billing references are optional:
/// a row may never have reached checkout, or may have a customer whose
/// checkout was abandoned before a subscription existed.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Workspace {
    pub id: String,
    pub org_ref: String,
    pub name: String,
    pub slug: Option<String>,

    pub billing_customer_ref: Option<String>,
    pub billing_subscription_ref: Option<String>,
    pub checkout_ref: Option<String>,

    /// Mirror of the billing provider's subscription state.
    pub subscription_status: NativeSubscriptionStatus,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub trial_start: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub cancel_at_period_end: bool,
    pub is_active: bool,

    pub admin_suspended: bool,
    pub suspended_at: Option<DateTime<Utc>>,
    pub suspension_reason: Option<String>,

    pub plan: Option<String>,
    pub billing_interval: Option<BillingInterval>,
    pub price_cents: Option<i64>,

    pub usage: UsageCounters,
    pub limits: PlanLimits,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    /// Resolver inputs for this row. `has_org` comes from the caller because
    /// only the identity provider can confirm the organization still exists.
    pub fn status_inputs(&self, has_org: bool) -> StatusInputs {
        StatusInputs {
            has_org,
            has_workspace_row: true,
            has_billing_customer: self.billing_customer_ref.is_some(),
            has_billing_subscription: self.billing_subscription_ref.is_some(),
            native_status: Some(self.subscription_status),
            cancel_at_period_end: self.cancel_at_period_end,
            admin_suspended: self.admin_suspended,
        }
    }

    /// Resolution assuming the referenced organization exists.
    pub fn resolution(&self) -> Resolution {
        status::resolve(&self.status_inputs(!self.org_ref.is_empty()))
    }

    pub fn canonical_status(&self) -> CanonicalStatus {
        self.resolution().status
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewWorkspace {
    pub org_ref: String,
    pub name: String,
    pub slug: Option<String>,
}

/// Billing references and plan data written by the linking step.
#[derive(Debug, Clone)]
pub struct BillingLink {
    pub checkout_ref: String,
    pub customer_ref: String,
    pub subscription: ExternalSubscription,
    pub plan: String,
    pub interval: BillingInterval,
    pub price_cents: Option<i64>,
    pub limits: PlanLimits,
}

#[derive(Debug, Clone, Default)]
pub struct WorkspaceFilters {
    pub plan: Option<String>,
    pub subscription_status: Option<NativeSubscriptionStatus>,
    pub admin_suspended: Option<bool>,
}

/// Datastore access for workspace rows and the operation audit trail.
#[derive(Clone)]
pub struct WorkspaceStore {
    pool: SqlitePool,
}

impl WorkspaceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a workspace row for an existing organization.
    #[instrument(skip(self, req), fields(org_ref = %req.org_ref))]
    pub async fn create_workspace(&self, req: NewWorkspace) -> Result<Workspace> {
        if req.org_ref.trim().is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "workspace requires an organization reference".to_string(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO workspaces (id, org_ref, name, slug, subscription_status, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&req.org_ref)
        .bind(&req.name)
        .bind(&req.slug)
        .bind(NativeSubscriptionStatus::Active)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_workspace(&id).await
    }

    /// Get a single workspace by ID
    pub async fn get_workspace(&self, id: &str) -> Result<Workspace> {
        let row = sqlx::query_as::<_, WorkspaceRow>("SELECT * FROM workspaces WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("workspace {id}")))?;

        Ok(row.into())
    }

    pub async fn find_by_org_ref(&self, org_ref: &str) -> Result<Option<Workspace>> {
        let row = sqlx::query_as::<_, WorkspaceRow>("SELECT * FROM workspaces WHERE org_ref = ?")
            .bind(org_ref)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Workspace::from))
    }

    pub async fn find_by_checkout_ref(&self, checkout_ref: &str) -> Result<Option<Workspace>> {
        let row =
            sqlx::query_as::<_, WorkspaceRow>("SELECT * FROM workspaces WHERE checkout_ref = ?")
                .bind(checkout_ref)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(Workspace::from))
    }

    /// List workspaces with optional filters
    pub async fn list_workspaces(&self, filters: WorkspaceFilters) -> Result<Vec<Workspace>> {
        let mut query = "SELECT * FROM workspaces WHERE 1=1".to_string();

        if filters.plan.is_some() {
            query.push_str(" AND plan = ?");
        }
        if filters.subscription_status.is_some() {
            query.push_str(" AND subscription_status = ?");
        }
        if filters.admin_suspended.is_some() {
            query.push_str(" AND admin_suspended = ?");
        }

        query.push_str(" ORDER BY created_at DESC");

        let mut q = sqlx::query_as::<_, WorkspaceRow>(&query);

        if let Some(plan) = &filters.plan {
            q = q.bind(plan);
        }
        if let Some(status) = filters.subscription_status {
            q = q.bind(status);
        }
        if let Some(suspended) = filters.admin_suspended {
            q = q.bind(suspended);
        }

        let rows = q.fetch_all(&self.pool).await?;

        Ok(rows.into_iter().map(Workspace::from).collect())
    }

    /// Persist billing references onto a row that has none yet.
    ///
    /// The unique indexes on `billing_subscription_ref` and `checkout_ref`
    /// guarantee a subscription is linked to at most one workspace.
    #[instrument(skip(self, link), fields(checkout_ref = %link.checkout_ref))]
    pub async fn link_billing(&self, id: &str, link: &BillingLink) -> Result<Workspace> {
        let sub = &link.subscription;
        let now = Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE workspaces SET
                checkout_ref = ?, billing_customer_ref = ?, billing_subscription_ref = ?,
                subscription_status = ?, current_period_start = ?, current_period_end = ?,
                trial_start = ?, trial_end = ?, canceled_at = ?, ended_at = ?,
                cancel_at_period_end = ?,
                is_active = CASE WHEN admin_suspended = 1 THEN 0 ELSE ? END,
                plan = ?, billing_interval = ?, price_cents = ?,
                max_brands = ?, max_members = ?, max_storage_bytes = ?, max_api_calls = ?,
                max_ai_credits = ?, updated_at = ?
            WHERE id = ? AND billing_subscription_ref IS NULL
            "#,
        )
        .bind(&link.checkout_ref)
        .bind(&link.customer_ref)
        .bind(&sub.id)
        .bind(sub.status)
        .bind(sub.current_period_start.map(|dt| dt.timestamp()))
        .bind(sub.current_period_end.map(|dt| dt.timestamp()))
        .bind(sub.trial_start.map(|dt| dt.timestamp()))
        .bind(sub.trial_end.map(|dt| dt.timestamp()))
        .bind(sub.canceled_at.map(|dt| dt.timestamp()))
        .bind(sub.ended_at.map(|dt| dt.timestamp()))
        .bind(sub.cancel_at_period_end)
        .bind(sub.status.grants_access())
        .bind(&link.plan)
        .bind(link.interval)
        .bind(link.price_cents)
        .bind(link.limits.max_brands)
        .bind(link.limits.max_members)
        .bind(link.limits.max_storage_bytes)
        .bind(link.limits.max_api_calls)
        .bind(link.limits.max_ai_credits)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let existing = self.get_workspace(id).await?;
            return Err(OrchestratorError::InvariantViolation(format!(
                "workspace {} is already linked to subscription {}",
                id,
                existing.billing_subscription_ref.unwrap_or_default()
            )));
        }

        self.get_workspace(id).await
    }

    /// Overwrite the mirrored subscription fields with the provider's copy.
    #[instrument(skip(self, sub), fields(subscription = %sub.id))]
    pub async fn apply_subscription(
        &self,
        id: &str,
        sub: &ExternalSubscription,
    ) -> Result<Workspace> {
        let now = Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            UPDATE workspaces SET
                billing_customer_ref = ?, subscription_status = ?,
                current_period_start = ?, current_period_end = ?,
                trial_start = ?, trial_end = ?, canceled_at = ?, ended_at = ?,
                cancel_at_period_end = ?,
                is_active = CASE WHEN admin_suspended = 1 THEN 0 ELSE ? END,
                billing_interval = COALESCE(?, billing_interval),
                price_cents = COALESCE(?, price_cents),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&sub.customer_ref)
        .bind(sub.status)
        .bind(sub.current_period_start.map(|dt| dt.timestamp()))
        .bind(sub.current_period_end.map(|dt| dt.timestamp()))
        .bind(sub.trial_start.map(|dt| dt.timestamp()))
        .bind(sub.trial_end.map(|dt| dt.timestamp()))
        .bind(sub.canceled_at.map(|dt| dt.timestamp()))
        .bind(sub.ended_at.map(|dt| dt.timestamp()))
        .bind(sub.cancel_at_period_end)
        .bind(sub.status.grants_access())
        .bind(sub.interval)
        .bind(sub.unit_amount_cents)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::NotFound(format!("workspace {id}")));
        }

        self.get_workspace(id).await
    }

    /// Set or clear the administrative suspension flag.
    pub async fn set_admin_suspended(
        &self,
        id: &str,
        suspended: bool,
        reason: Option<String>,
    ) -> Result<Workspace> {
        let now = Utc::now().timestamp();

        let result = if suspended {
            sqlx::query(
                "UPDATE workspaces
                 SET admin_suspended = 1, is_active = 0, suspended_at = ?, suspension_reason = ?, updated_at = ?
                 WHERE id = ?",
            )
            .bind(now)
            .bind(reason)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query(
                "UPDATE workspaces
                 SET admin_suspended = 0,
                     is_active = CASE WHEN subscription_status IN ('active', 'trialing') THEN 1 ELSE 0 END,
                     suspended_at = NULL, suspension_reason = NULL, updated_at = ?
                 WHERE id = ?",
            )
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?
        };

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::NotFound(format!("workspace {id}")));
        }

        self.get_workspace(id).await
    }
}

// Internal row type for sqlx
#[derive(sqlx::FromRow)]
pub(crate) struct WorkspaceRow {
    id: String,
    org_ref: String,
    name: String,
    slug: Option<String>,
    billing_customer_ref: Option<String>,
    billing_subscription_ref: Option<String>,
    checkout_ref: Option<String>,
    subscription_status: NativeSubscriptionStatus,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
    trial_start: Option<i64>,
    trial_end: Option<i64>,
    canceled_at: Option<i64>,
    ended_at: Option<i64>,
    cancel_at_period_end: bool,
    is_active: bool,
    admin_suspended: bool,
    suspended_at: Option<i64>,
    suspension_reason: Option<String>,
    plan: Option<String>,
    billing_interval: Option<BillingInterval>,
    price_cents: Option<i64>,
    brands_count: i64,
    brands_lifetime: i64,
    members_count: i64,
    members_lifetime: i64,
    storage_bytes: i64,
    storage_bytes_lifetime: i64,
    api_calls: i64,
    api_calls_lifetime: i64,
    ai_credits_used: i64,
    ai_credits_lifetime: i64,
    bonus_ai_credits: i64,
    max_brands: Option<i64>,
    max_members: Option<i64>,
    max_storage_bytes: Option<i64>,
    max_api_calls: Option<i64>,
    max_ai_credits: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

fn timestamp(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(|ts| DateTime::from_timestamp(ts, 0))
}

impl From<WorkspaceRow> for Workspace {
    fn from(row: WorkspaceRow) -> Self {
        Self {
            id: row.id,
            org_ref: row.org_ref,
            name: row.name,
            slug: row.slug,
            billing_customer_ref: row.billing_customer_ref,
            billing_subscription_ref: row.billing_subscription_ref,
            checkout_ref: row.checkout_ref,
            subscription_status: row.subscription_status,
            current_period_start: timestamp(row.current_period_start),
            current_period_end: timestamp(row.current_period_end),
            trial_start: timestamp(row.trial_start),
            trial_end: timestamp(row.trial_end),
            canceled_at: timestamp(row.canceled_at),
            ended_at: timestamp(row.ended_at),
            cancel_at_period_end: row.cancel_at_period_end,
            is_active: row.is_active,
            admin_suspended: row.admin_suspended,
            suspended_at: timestamp(row.suspended_at),
            suspension_reason: row.suspension_reason,
            plan: row.plan,
            billing_interval: row.billing_interval,
            price_cents: row.price_cents,
            usage: UsageCounters {
                brands: row.brands_count,
                brands_lifetime: row.brands_lifetime,
                members: row.members_count,
                members_lifetime: row.members_lifetime,
                storage_bytes: row.storage_bytes,
                storage_bytes_lifetime: row.storage_bytes_lifetime,
                api_calls: row.api_calls,
                api_calls_lifetime: row.api_calls_lifetime,
                ai_credits: row.ai_credits_used,
                ai_credits_lifetime: row.ai_credits_lifetime,
                bonus_ai_credits: row.bonus_ai_credits,
            },
            limits: PlanLimits {
                max_brands: row.max_brands,
                max_members: row.max_members,
                max_storage_bytes: row.max_storage_bytes,
                max_api_calls: row.max_api_calls,
                max_ai_credits: row.max_ai_credits,
            },
            created_at: DateTime::from_timestamp(row.created_at, 0).unwrap_or_default(),
            updated_at: DateTime::from_timestamp(row.updated_at, 0).unwrap_or_default(),
        }
    }
}
