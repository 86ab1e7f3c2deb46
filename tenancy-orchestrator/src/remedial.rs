//! Administrative and self-service repairs to a tenant's subscription state.
//!
//! Billing-backed actions treat the provider as the source of truth: the
//! provider is mutated first, then the subscription is fetched back and the
//! local mirror overwritten. A failed provider call leaves the row untouched.
//! Every action is audited in the `operations` table.
//!
//! Actions on the same workspace are not serialized against each other; the
//! last mirror write wins.

use crate::error::{OrchestratorError, Result};
use crate::operation::{OperationStatus, OperationType};
use crate::providers::{bounded, BillingProvider, ExternalSubscription};
use crate::saga::DEFAULT_CALL_TIMEOUT;
use crate::status::CanonicalStatus;
use crate::usage::{ResetScope, UsageCounter, UsageLedger, UsageSnapshot};
use crate::workspace::{Workspace, WorkspaceStore};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Longest single trial extension accepted.
pub const MAX_TRIAL_EXTENSION_DAYS: i64 = 365;

#[derive(Clone)]
pub struct RemedialExecutor {
    store: WorkspaceStore,
    ledger: UsageLedger,
    billing: Arc<dyn BillingProvider>,
    call_timeout: std::time::Duration,
}

impl RemedialExecutor {
    pub fn new(pool: SqlitePool, billing: Arc<dyn BillingProvider>) -> Self {
        Self {
            store: WorkspaceStore::new(pool.clone()),
            ledger: UsageLedger::new(pool),
            billing,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: std::time::Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Push the trial end out by `days`. Only trialing workspaces qualify,
    /// and repeated extensions accumulate. A trial end already in the past
    /// is extended from now, since the provider rejects past trial ends.
    #[instrument(skip(self))]
    pub async fn extend_trial(&self, workspace_id: &str, days: i64, actor: &str) -> Result<Workspace> {
        let op = self.begin(workspace_id, OperationType::ExtendTrial, actor).await?;
        let result = self.do_extend_trial(workspace_id, days).await;
        self.finish(&op, result).await
    }

    async fn do_extend_trial(&self, workspace_id: &str, days: i64) -> Result<Workspace> {
        if !(1..=MAX_TRIAL_EXTENSION_DAYS).contains(&days) {
            return Err(OrchestratorError::InvalidInput(format!(
                "trial extension must be between 1 and {MAX_TRIAL_EXTENSION_DAYS} days"
            )));
        }

        let workspace = self.store.get_workspace(workspace_id).await?;
        let status = workspace.canonical_status();
        if status != CanonicalStatus::Trialing {
            return Err(OrchestratorError::InvariantViolation(format!(
                "trial can only be extended while trialing (status is {status:?})"
            )));
        }

        let subscription_ref = require_subscription(&workspace)?;
        let base = workspace
            .trial_end
            .filter(|end| *end > Utc::now())
            .unwrap_or_else(Utc::now);
        let trial_end = base + Duration::days(days);

        self.call("extend_trial", self.billing.set_trial_end(subscription_ref, trial_end))
            .await?;

        info!(%trial_end, "trial extended");
        self.resync(&workspace, "extend_trial", None).await
    }

    /// Administrative override of the trial end date.
    #[instrument(skip(self))]
    pub async fn set_trial_end(
        &self,
        workspace_id: &str,
        trial_end: DateTime<Utc>,
        actor: &str,
    ) -> Result<Workspace> {
        let op = self.begin(workspace_id, OperationType::SetTrialEnd, actor).await?;
        let result = self.do_set_trial_end(workspace_id, trial_end).await;
        self.finish(&op, result).await
    }

    async fn do_set_trial_end(&self, workspace_id: &str, trial_end: DateTime<Utc>) -> Result<Workspace> {
        if trial_end <= Utc::now() {
            return Err(OrchestratorError::InvalidInput(
                "trial end must be in the future".to_string(),
            ));
        }

        let workspace = self.store.get_workspace(workspace_id).await?;
        let subscription_ref = require_subscription(&workspace)?;

        self.call("set_trial_end", self.billing.set_trial_end(subscription_ref, trial_end))
            .await?;

        self.resync(&workspace, "set_trial_end", None).await
    }

    /// Cancel now, or at the end of the current period.
    #[instrument(skip(self))]
    pub async fn cancel_subscription(
        &self,
        workspace_id: &str,
        immediate: bool,
        actor: &str,
    ) -> Result<Workspace> {
        let op = self
            .begin(workspace_id, OperationType::CancelSubscription, actor)
            .await?;
        let result = self.do_cancel(workspace_id, immediate).await;
        self.finish(&op, result).await
    }

    async fn do_cancel(&self, workspace_id: &str, immediate: bool) -> Result<Workspace> {
        let workspace = self.store.get_workspace(workspace_id).await?;
        let subscription_ref = require_subscription(&workspace)?;

        self.call(
            "cancel_subscription",
            self.billing.cancel_subscription(subscription_ref, immediate),
        )
        .await?;

        let ended_at = immediate.then(Utc::now);
        self.resync(&workspace, "cancel_subscription", ended_at).await
    }

    /// Undo a scheduled cancellation.
    #[instrument(skip(self))]
    pub async fn reactivate_subscription(&self, workspace_id: &str, actor: &str) -> Result<Workspace> {
        let op = self
            .begin(workspace_id, OperationType::ReactivateSubscription, actor)
            .await?;
        let result = self.do_reactivate(workspace_id).await;
        self.finish(&op, result).await
    }

    async fn do_reactivate(&self, workspace_id: &str) -> Result<Workspace> {
        let workspace = self.store.get_workspace(workspace_id).await?;
        let subscription_ref = require_subscription(&workspace)?;

        if !workspace.resolution().facets.canceling {
            return Err(OrchestratorError::InvariantViolation(
                "subscription is not scheduled to cancel".to_string(),
            ));
        }

        self.call(
            "reactivate_subscription",
            self.billing.reactivate_subscription(subscription_ref),
        )
        .await?;

        self.resync(&workspace, "reactivate_subscription", None).await
    }

    /// Overwrite the mirrored subscription with the provider's current copy.
    #[instrument(skip(self))]
    pub async fn refresh_subscription(&self, workspace_id: &str, actor: &str) -> Result<Workspace> {
        let op = self
            .begin(workspace_id, OperationType::RefreshSubscription, actor)
            .await?;
        let result = async {
            let workspace = self.store.get_workspace(workspace_id).await?;
            require_subscription(&workspace)?;
            self.resync(&workspace, "refresh_subscription", None).await
        }
        .await;
        self.finish(&op, result).await
    }

    /// Local access override. Suspending a suspended workspace is a no-op.
    #[instrument(skip(self))]
    pub async fn suspend(
        &self,
        workspace_id: &str,
        reason: Option<String>,
        actor: &str,
    ) -> Result<Workspace> {
        let op = self.begin(workspace_id, OperationType::Suspend, actor).await?;
        let result = async {
            let workspace = self.store.get_workspace(workspace_id).await?;
            if workspace.admin_suspended {
                return Ok(workspace);
            }
            self.store
                .set_admin_suspended(workspace_id, true, reason)
                .await
        }
        .await;
        self.finish(&op, result).await
    }

    #[instrument(skip(self))]
    pub async fn unsuspend(&self, workspace_id: &str, actor: &str) -> Result<Workspace> {
        let op = self.begin(workspace_id, OperationType::Unsuspend, actor).await?;
        let result = async {
            let workspace = self.store.get_workspace(workspace_id).await?;
            if !workspace.admin_suspended {
                return Ok(workspace);
            }
            self.store.set_admin_suspended(workspace_id, false, None).await
        }
        .await;
        self.finish(&op, result).await
    }

    #[instrument(skip(self))]
    pub async fn add_bonus_credits(
        &self,
        workspace_id: &str,
        amount: i64,
        actor: &str,
    ) -> Result<UsageSnapshot> {
        let op = self
            .begin(workspace_id, OperationType::AddBonusCredits, actor)
            .await?;
        let result = async {
            self.ledger.add_bonus_credits(workspace_id, amount).await?;
            self.ledger.snapshot(workspace_id).await
        }
        .await;
        self.finish(&op, result).await
    }

    #[instrument(skip(self))]
    pub async fn reset_usage(
        &self,
        workspace_id: &str,
        scope: ResetScope,
        counter: Option<UsageCounter>,
        actor: &str,
    ) -> Result<UsageSnapshot> {
        let op = self.begin(workspace_id, OperationType::ResetUsage, actor).await?;
        let result = async {
            self.ledger.reset(workspace_id, scope, counter).await?;
            self.ledger.snapshot(workspace_id).await
        }
        .await;
        self.finish(&op, result).await
    }

    /// Audit entries reference an existing workspace, so a missing one is
    /// reported before anything is recorded.
    async fn begin(&self, workspace_id: &str, operation_type: OperationType, actor: &str) -> Result<String> {
        self.store.get_workspace(workspace_id).await?;
        self.store
            .record_operation(workspace_id, operation_type, OperationStatus::Running, Some(actor))
            .await
    }

    async fn finish<T>(&self, operation_id: &str, result: Result<T>) -> Result<T> {
        let (status, error) = match &result {
            Ok(_) => (OperationStatus::Success, None),
            Err(e) => (OperationStatus::Failed, Some(e.to_string())),
        };

        if let Err(e) = self.store.complete_operation(operation_id, status, error).await {
            warn!(operation_id, error = %e, "failed to complete operation record");
        }

        result
    }

    async fn call<T>(
        &self,
        operation: &str,
        fut: impl std::future::Future<Output = std::result::Result<T, crate::providers::ProviderError>>,
    ) -> Result<T> {
        bounded(self.call_timeout, fut)
            .await
            .map_err(|e| OrchestratorError::external(operation, e))
    }

    /// Fetch the provider's subscription and overwrite the mirror.
    async fn resync(
        &self,
        workspace: &Workspace,
        operation: &str,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<Workspace> {
        let subscription_ref = require_subscription(workspace)?;
        let mut subscription: ExternalSubscription = self
            .call(operation, self.billing.get_subscription(subscription_ref))
            .await?;

        if subscription.ended_at.is_none() {
            subscription.ended_at = ended_at;
        }

        self.store.apply_subscription(&workspace.id, &subscription).await
    }
}

fn require_subscription(workspace: &Workspace) -> Result<&str> {
    workspace.billing_subscription_ref.as_deref().ok_or_else(|| {
        OrchestratorError::InvariantViolation(format!(
            "workspace {} has no billing subscription",
            workspace.id
        ))
    })
}
