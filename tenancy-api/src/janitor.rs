use chrono::Utc;
use sqlx::SqlitePool;
use tenancy_orchestrator::{IntentStore, ProvisioningRuns, SqliteIntentStore};
use tokio::time::{interval, Duration};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JanitorReport {
    pub intents_purged: u64,
    pub runs_failed: u64,
}

/// Periodically expire signup intents and fail provisioning runs that
/// stopped making progress. Never re-runs provider side effects.
pub async fn start_janitor_task(
    pool: SqlitePool,
    interval_secs: u64,
    intent_ttl: chrono::Duration,
    stale_run_after: chrono::Duration,
) {
    let intents = SqliteIntentStore::new(pool.clone(), intent_ttl);
    let runs = ProvisioningRuns::new(pool);
    let mut interval = interval(Duration::from_secs(interval_secs.max(1)));

    info!(
        "Janitor task running (checks every {} seconds)",
        interval_secs
    );

    loop {
        interval.tick().await;

        if let Err(e) = run_janitor_pass(&intents, &runs, stale_run_after).await {
            error!("Janitor pass failed: {:#}", e);
        }
    }
}

pub async fn run_janitor_pass(
    intents: &dyn IntentStore,
    runs: &ProvisioningRuns,
    stale_run_after: chrono::Duration,
) -> anyhow::Result<JanitorReport> {
    let intents_purged = intents.purge_expired().await?;
    let runs_failed = runs.fail_stale(Utc::now() - stale_run_after).await?;

    if intents_purged > 0 || runs_failed > 0 {
        info!(intents_purged, runs_failed, "janitor pass complete");
    }

    Ok(JanitorReport {
        intents_purged,
        runs_failed,
    })
}
