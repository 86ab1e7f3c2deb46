//! Workspace provisioning saga.
//!
//! Provisioning touches three systems with no shared transaction: the
//! identity provider (organization), the datastore (workspace row) and the
//! billing provider (customer and subscription). The saga runs the steps in
//! order, each at most once per invocation, and stops at the first failure.
//!
//! ```text
//! idle -> creating_org -> creating_workspace -> linking_billing -> done
//!              \                 \                    \
//!               +-----------------+--------------------+--> failed
//! ```
//!
//! The checkout reference returned by the billing provider is the idempotency
//! key. A `provisioning_runs` row keyed by it is claimed atomically before any
//! side effect, which rejects concurrent duplicates. A run whose checkout is
//! already linked returns the linked workspace instead of starting over. A
//! failed run is retried from `creating_org`; attempt `n > 1` suffixes the
//! slug with `-n` so it never collides with the organization orphaned by the
//! earlier attempt.

use crate::error::{OrchestratorError, Result};
use crate::intent::{IntentStore, ProvisioningIntent};
use crate::plans::PlanCatalog;
use crate::providers::{bounded, BillingProvider, IdentityProvider};
use crate::workspace::{BillingLink, NewWorkspace, Workspace, WorkspaceStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum SagaState {
    Idle,
    CreatingOrg,
    CreatingWorkspace,
    LinkingBilling,
    Done,
    Failed,
}

impl SagaState {
    pub fn as_str(self) -> &'static str {
        match self {
            SagaState::Idle => "idle",
            SagaState::CreatingOrg => "creating_org",
            SagaState::CreatingWorkspace => "creating_workspace",
            SagaState::LinkingBilling => "linking_billing",
            SagaState::Done => "done",
            SagaState::Failed => "failed",
        }
    }

    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            SagaState::CreatingOrg | SagaState::CreatingWorkspace | SagaState::LinkingBilling
        )
    }
}

impl fmt::Display for SagaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum ProvisioningError {
    /// No valid intent or no checkout reference. Re-running will not help;
    /// the signup has to start over.
    #[error("Missing session data: {0}")]
    MissingSessionData(String),

    #[error("Provisioning is already running for checkout {0}")]
    AlreadyRunning(String),

    /// A step's external call failed. Re-invoking the saga restarts from
    /// `creating_org`.
    #[error("Provisioning failed at {step}: {cause}")]
    ExternalCallFailed {
        step: SagaState,
        #[source]
        cause: anyhow::Error,
    },

    #[error(transparent)]
    Store(#[from] OrchestratorError),
}

impl ProvisioningError {
    pub fn failed_step(&self) -> Option<SagaState> {
        match self {
            ProvisioningError::ExternalCallFailed { step, .. } => Some(*step),
            _ => None,
        }
    }

    pub fn is_retriable(&self) -> bool {
        matches!(self, ProvisioningError::ExternalCallFailed { .. })
    }
}

/// A state transition broadcast to progress subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SagaProgress {
    pub checkout_ref: String,
    pub state: SagaState,
}

/// Persisted record of a saga run, keyed by checkout reference.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProvisioningRun {
    pub checkout_ref: String,
    #[serde(skip_serializing, default)]
    pub session_key: String,
    pub state: SagaState,
    pub attempt: i64,
    pub failed_step: Option<SagaState>,
    pub error: Option<String>,
    pub org_ref: Option<String>,
    pub workspace_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Storage for `provisioning_runs`.
#[derive(Clone)]
pub struct ProvisioningRuns {
    pool: SqlitePool,
}

impl ProvisioningRuns {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Claim the run for `checkout_ref`. Inserts a fresh run, or restarts a
    /// failed one with the attempt counter bumped. Returns `None` when the
    /// run exists and is in progress or done.
    pub async fn claim(&self, checkout_ref: &str, session_key: &str) -> Result<Option<i64>> {
        let now = Utc::now().timestamp();

        let claimed: Option<(i64,)> = sqlx::query_as(
            r#"
            INSERT INTO provisioning_runs (checkout_ref, session_key, state, attempt, started_at, updated_at)
            VALUES (?, ?, ?, 1, ?, ?)
            ON CONFLICT(checkout_ref) DO UPDATE SET
                session_key = excluded.session_key,
                state = excluded.state,
                attempt = provisioning_runs.attempt + 1,
                failed_step = NULL,
                error = NULL,
                org_ref = NULL,
                workspace_id = NULL,
                started_at = excluded.started_at,
                updated_at = excluded.updated_at
            WHERE provisioning_runs.state = 'failed'
            RETURNING attempt
            "#,
        )
        .bind(checkout_ref)
        .bind(session_key)
        .bind(SagaState::CreatingOrg)
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.map(|(attempt,)| attempt))
    }

    pub async fn get(&self, checkout_ref: &str) -> Result<Option<ProvisioningRun>> {
        let row = sqlx::query_as::<_, RunRow>(
            "SELECT * FROM provisioning_runs WHERE checkout_ref = ?",
        )
        .bind(checkout_ref)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ProvisioningRun::from))
    }

    async fn advance(
        &self,
        checkout_ref: &str,
        state: SagaState,
        org_ref: Option<&str>,
        workspace_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE provisioning_runs
             SET state = ?, org_ref = COALESCE(?, org_ref), workspace_id = COALESCE(?, workspace_id), updated_at = ?
             WHERE checkout_ref = ?",
        )
        .bind(state)
        .bind(org_ref)
        .bind(workspace_id)
        .bind(Utc::now().timestamp())
        .bind(checkout_ref)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_failed(&self, checkout_ref: &str, step: SagaState, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE provisioning_runs SET state = ?, failed_step = ?, error = ?, updated_at = ?
             WHERE checkout_ref = ?",
        )
        .bind(SagaState::Failed)
        .bind(step)
        .bind(error)
        .bind(Utc::now().timestamp())
        .bind(checkout_ref)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fail runs that made no progress since `cutoff` so they can be retried.
    pub async fn fail_stale(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE provisioning_runs
             SET failed_step = state, state = 'failed', error = 'abandoned without progress', updated_at = ?
             WHERE state IN ('creating_org', 'creating_workspace', 'linking_billing') AND updated_at < ?",
        )
        .bind(Utc::now().timestamp())
        .bind(cutoff.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    checkout_ref: String,
    session_key: String,
    state: SagaState,
    attempt: i64,
    failed_step: Option<SagaState>,
    error: Option<String>,
    org_ref: Option<String>,
    workspace_id: Option<String>,
    started_at: i64,
    updated_at: i64,
}

impl From<RunRow> for ProvisioningRun {
    fn from(row: RunRow) -> Self {
        Self {
            checkout_ref: row.checkout_ref,
            session_key: row.session_key,
            state: row.state,
            attempt: row.attempt,
            failed_step: row.failed_step,
            error: row.error,
            org_ref: row.org_ref,
            workspace_id: row.workspace_id,
            started_at: DateTime::from_timestamp(row.started_at, 0).unwrap_or_default(),
            updated_at: DateTime::from_timestamp(row.updated_at, 0).unwrap_or_default(),
        }
    }
}

/// Slug requested from the identity provider on a given attempt.
pub fn attempt_slug(slug: Option<&str>, attempt: i64) -> Option<String> {
    slug.map(|slug| {
        if attempt > 1 {
            format!("{slug}-{attempt}")
        } else {
            slug.to_string()
        }
    })
}

type StepFailure = (SagaState, anyhow::Error);

#[derive(Clone)]
pub struct ProvisioningSaga {
    store: WorkspaceStore,
    runs: ProvisioningRuns,
    intents: Arc<dyn IntentStore>,
    identity: Arc<dyn IdentityProvider>,
    billing: Arc<dyn BillingProvider>,
    plans: Arc<PlanCatalog>,
    call_timeout: Duration,
    progress: broadcast::Sender<SagaProgress>,
}

impl ProvisioningSaga {
    pub fn new(
        pool: SqlitePool,
        intents: Arc<dyn IntentStore>,
        identity: Arc<dyn IdentityProvider>,
        billing: Arc<dyn BillingProvider>,
        plans: Arc<PlanCatalog>,
    ) -> Self {
        let (progress, _) = broadcast::channel(64);

        Self {
            store: WorkspaceStore::new(pool.clone()),
            runs: ProvisioningRuns::new(pool),
            intents,
            identity,
            billing,
            plans,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            progress,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Receive every state transition of every run from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SagaProgress> {
        self.progress.subscribe()
    }

    pub fn runs(&self) -> &ProvisioningRuns {
        &self.runs
    }

    /// Provision the workspace for a completed checkout.
    ///
    /// `session_key` selects the staged intent; `checkout_ref` is the
    /// checkout session the billing provider redirected back with.
    #[instrument(skip(self, session_key))]
    pub async fn run(
        &self,
        session_key: &str,
        checkout_ref: &str,
    ) -> std::result::Result<Workspace, ProvisioningError> {
        let checkout_ref = checkout_ref.trim();
        if checkout_ref.is_empty() {
            return Err(ProvisioningError::MissingSessionData(
                "no checkout reference was returned from checkout".to_string(),
            ));
        }

        if let Some(workspace) = self.store.find_by_checkout_ref(checkout_ref).await? {
            // Only the session that ran the signup gets the workspace back.
            let owned = self
                .runs
                .get(checkout_ref)
                .await?
                .is_some_and(|run| run.session_key == session_key);
            if !owned {
                return Err(ProvisioningError::MissingSessionData(format!(
                    "checkout {checkout_ref} does not belong to this session"
                )));
            }
            info!(workspace_id = %workspace.id, "checkout already provisioned");
            return Ok(workspace);
        }

        let intent = self.intents.load(session_key).await?.ok_or_else(|| {
            ProvisioningError::MissingSessionData(
                "no unexpired provisioning intent for this session".to_string(),
            )
        })?;

        if intent.checkout_session_ref != checkout_ref {
            return Err(ProvisioningError::MissingSessionData(format!(
                "checkout {checkout_ref} does not belong to the staged signup"
            )));
        }

        let Some(attempt) = self.runs.claim(checkout_ref, session_key).await? else {
            // Lost the race to a run that finished in between.
            if let Some(workspace) = self.store.find_by_checkout_ref(checkout_ref).await? {
                return Ok(workspace);
            }
            return Err(ProvisioningError::AlreadyRunning(checkout_ref.to_string()));
        };

        info!(attempt, "provisioning started");

        match self.execute(checkout_ref, attempt, &intent).await {
            Ok(workspace) => {
                if let Err(e) = self
                    .runs
                    .advance(checkout_ref, SagaState::Done, None, Some(&workspace.id))
                    .await
                {
                    warn!(error = %e, "failed to record completed provisioning run");
                }
                self.emit(checkout_ref, SagaState::Done);

                if let Err(e) = self.intents.clear(session_key).await {
                    warn!(error = %e, "failed to clear consumed provisioning intent");
                }

                info!(workspace_id = %workspace.id, org_ref = %workspace.org_ref, "provisioning complete");
                Ok(workspace)
            }
            Err((step, cause)) => {
                error!(%step, error = %format!("{cause:#}"), "provisioning step failed");

                if let Err(e) = self
                    .runs
                    .mark_failed(checkout_ref, step, &format!("{cause:#}"))
                    .await
                {
                    warn!(error = %e, "failed to record failed provisioning run");
                }
                self.emit(checkout_ref, SagaState::Failed);

                Err(ProvisioningError::ExternalCallFailed { step, cause })
            }
        }
    }

    async fn execute(
        &self,
        checkout_ref: &str,
        attempt: i64,
        intent: &ProvisioningIntent,
    ) -> std::result::Result<Workspace, StepFailure> {
        // creating_org
        self.enter(checkout_ref, SagaState::CreatingOrg, None, None)
            .await?;

        let slug = attempt_slug(intent.slug.as_deref(), attempt);
        let org = bounded(
            self.call_timeout,
            self.identity
                .create_organization(&intent.name, slug.as_deref()),
        )
        .await
        .map_err(|e| (SagaState::CreatingOrg, anyhow::Error::from(e)))?;

        if let Some(logo) = &intent.logo {
            let upload = bounded(
                self.call_timeout,
                self.identity
                    .set_logo(&org.id, &logo.content_type, logo.data.clone()),
            )
            .await;

            if let Err(e) = upload {
                warn!(org_ref = %org.id, error = %e, "logo upload failed, continuing without logo");
            }
        }

        // creating_workspace
        self.enter(
            checkout_ref,
            SagaState::CreatingWorkspace,
            Some(&org.id),
            None,
        )
        .await?;

        let workspace = self
            .store
            .create_workspace(NewWorkspace {
                org_ref: org.id.clone(),
                name: intent.name.clone(),
                slug: org.slug.clone().or(slug),
            })
            .await
            .map_err(|e| (SagaState::CreatingWorkspace, anyhow::Error::from(e)))?;

        // linking_billing
        self.enter(
            checkout_ref,
            SagaState::LinkingBilling,
            None,
            Some(&workspace.id),
        )
        .await?;

        let resolved = bounded(
            self.call_timeout,
            self.billing.resolve_checkout_session(checkout_ref),
        )
        .await
        .map_err(|e| (SagaState::LinkingBilling, anyhow::Error::from(e)))?;

        let plan = self.plans.get(&intent.plan);
        let interval = resolved.subscription.interval.unwrap_or(intent.interval);
        let link = BillingLink {
            checkout_ref: checkout_ref.to_string(),
            customer_ref: resolved.customer_ref,
            price_cents: resolved
                .subscription
                .unit_amount_cents
                .or_else(|| plan.map(|p| p.price(interval).amount_cents)),
            limits: plan.map(|p| p.limits.clone()).unwrap_or_default(),
            plan: intent.plan.clone(),
            interval,
            subscription: resolved.subscription,
        };

        self.store
            .link_billing(&workspace.id, &link)
            .await
            .map_err(|e| (SagaState::LinkingBilling, anyhow::Error::from(e)))
    }

    async fn enter(
        &self,
        checkout_ref: &str,
        state: SagaState,
        org_ref: Option<&str>,
        workspace_id: Option<&str>,
    ) -> std::result::Result<(), StepFailure> {
        self.runs
            .advance(checkout_ref, state, org_ref, workspace_id)
            .await
            .map_err(|e| (state, anyhow::Error::from(e)))?;
        self.emit(checkout_ref, state);
        Ok(())
    }

    fn emit(&self, checkout_ref: &str, state: SagaState) {
        // No subscribers is fine.
        let _ = self.progress.send(SagaProgress {
            checkout_ref: checkout_ref.to_string(),
            state,
        });
    }
}
