use crate::config::Config;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tenancy_orchestrator::intent::DEFAULT_INTENT_TTL;
use tenancy_orchestrator::saga::DEFAULT_CALL_TIMEOUT;
use tenancy_orchestrator::{
    BillingProvider, IdentityProvider, IntentStore, PlanCatalog, ProvisioningSaga, Reconciler,
    RemedialExecutor, SqliteIntentStore, UsageLedger, WorkspaceStore,
};

/// Tunables the service wires into its components.
#[derive(Clone)]
pub struct StateOptions {
    pub plans: PlanCatalog,
    pub intent_ttl: chrono::Duration,
    pub call_timeout: Duration,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
}

impl Default for StateOptions {
    fn default() -> Self {
        Self {
            plans: PlanCatalog::default(),
            intent_ttl: DEFAULT_INTENT_TTL,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            checkout_success_url: "http://localhost:3000/signup/complete".to_string(),
            checkout_cancel_url: "http://localhost:3000/signup".to_string(),
        }
    }
}

impl StateOptions {
    pub fn from_config(config: &Config, plans: PlanCatalog) -> Self {
        Self {
            plans,
            intent_ttl: config.intent_ttl(),
            call_timeout: config.call_timeout(),
            checkout_success_url: config.checkout_success_url.clone(),
            checkout_cancel_url: config.checkout_cancel_url.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: WorkspaceStore,
    pub ledger: UsageLedger,
    pub intents: Arc<dyn IntentStore>,
    pub saga: ProvisioningSaga,
    pub executor: RemedialExecutor,
    pub reconciler: Reconciler,
    pub billing: Arc<dyn BillingProvider>,
    pub plans: Arc<PlanCatalog>,
    pub call_timeout: Duration,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,
}

impl AppState {
    pub fn new(
        pool: SqlitePool,
        identity: Arc<dyn IdentityProvider>,
        billing: Arc<dyn BillingProvider>,
        options: StateOptions,
    ) -> Self {
        let intents: Arc<dyn IntentStore> =
            Arc::new(SqliteIntentStore::new(pool.clone(), options.intent_ttl));
        let plans = Arc::new(options.plans);

        let saga = ProvisioningSaga::new(
            pool.clone(),
            intents.clone(),
            identity.clone(),
            billing.clone(),
            plans.clone(),
        )
        .with_call_timeout(options.call_timeout);

        Self {
            store: WorkspaceStore::new(pool.clone()),
            ledger: UsageLedger::new(pool.clone()),
            intents,
            saga,
            executor: RemedialExecutor::new(pool.clone(), billing.clone())
                .with_call_timeout(options.call_timeout),
            reconciler: Reconciler::new(pool, identity).with_call_timeout(options.call_timeout),
            billing,
            plans,
            call_timeout: options.call_timeout,
            checkout_success_url: options.checkout_success_url,
            checkout_cancel_url: options.checkout_cancel_url,
        }
    }
}
