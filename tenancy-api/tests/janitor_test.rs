//! Integration tests for the janitor cleanup pass
//!
//! Tests that the janitor drops expired signup intents and fails
//! provisioning runs that stopped making progress, leaving everything else
//! alone.

use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use tenancy_api::run_janitor_pass;
use tenancy_orchestrator::providers::BillingInterval;
use tenancy_orchestrator::test_utils::create_test_db;
use tenancy_orchestrator::{
    IntentStore, ProvisioningIntent, ProvisioningRuns, SagaState, SqliteIntentStore,
};

fn intent(checkout_ref: &str, age: Duration) -> ProvisioningIntent {
    ProvisioningIntent {
        name: "Acme".to_string(),
        slug: None,
        logo: None,
        plan: "starter".to_string(),
        interval: BillingInterval::Month,
        checkout_session_ref: checkout_ref.to_string(),
        created_at: Utc::now() - age,
    }
}

async fn backdate_run(pool: &SqlitePool, checkout_ref: &str, age: Duration) {
    sqlx::query("UPDATE provisioning_runs SET updated_at = ? WHERE checkout_ref = ?")
        .bind((Utc::now() - age).timestamp())
        .bind(checkout_ref)
        .execute(pool)
        .await
        .expect("Failed to backdate run");
}

#[tokio::test]
async fn test_janitor_purges_expired_intents() {
    let pool = create_test_db().await;
    let intents = SqliteIntentStore::new(pool.clone(), Duration::minutes(30));
    let runs = ProvisioningRuns::new(pool);

    intents
        .save("stale", &intent("cs_1", Duration::hours(2)))
        .await
        .unwrap();
    intents
        .save("fresh", &intent("cs_2", Duration::minutes(1)))
        .await
        .unwrap();

    let report = run_janitor_pass(&intents, &runs, Duration::minutes(10))
        .await
        .unwrap();

    assert_eq!(report.intents_purged, 1);
    assert_eq!(report.runs_failed, 0);
    assert!(intents.load("stale").await.unwrap().is_none());
    assert!(intents.load("fresh").await.unwrap().is_some());
}

#[tokio::test]
async fn test_janitor_fails_abandoned_runs() {
    let pool = create_test_db().await;
    let intents = SqliteIntentStore::new(pool.clone(), Duration::minutes(30));
    let runs = ProvisioningRuns::new(pool.clone());

    runs.claim("cs_abandoned", "session-1").await.unwrap();
    runs.claim("cs_active", "session-2").await.unwrap();
    backdate_run(&pool, "cs_abandoned", Duration::hours(1)).await;

    let report = run_janitor_pass(&intents, &runs, Duration::minutes(10))
        .await
        .unwrap();
    assert_eq!(report.runs_failed, 1);

    let abandoned = runs.get("cs_abandoned").await.unwrap().unwrap();
    assert_eq!(abandoned.state, SagaState::Failed);
    assert_eq!(abandoned.failed_step, Some(SagaState::CreatingOrg));

    let active = runs.get("cs_active").await.unwrap().unwrap();
    assert_eq!(active.state, SagaState::CreatingOrg);
}

#[tokio::test]
async fn test_failed_run_can_be_reclaimed_after_janitor() {
    let pool = create_test_db().await;
    let intents = SqliteIntentStore::new(pool.clone(), Duration::minutes(30));
    let runs = ProvisioningRuns::new(pool.clone());

    assert_eq!(runs.claim("cs_1", "session-1").await.unwrap(), Some(1));
    assert_eq!(runs.claim("cs_1", "session-1").await.unwrap(), None);

    backdate_run(&pool, "cs_1", Duration::hours(1)).await;
    run_janitor_pass(&intents, &runs, Duration::minutes(10))
        .await
        .unwrap();

    assert_eq!(runs.claim("cs_1", "session-1").await.unwrap(), Some(2));
}

#[tokio::test]
async fn test_janitor_pass_on_empty_database() {
    let pool = create_test_db().await;
    let intents = SqliteIntentStore::new(pool.clone(), Duration::minutes(30));
    let runs = ProvisioningRuns::new(pool);

    let report = run_janitor_pass(&intents, &runs, Duration::minutes(10))
        .await
        .unwrap();

    assert_eq!(report.intents_purged, 0);
    assert_eq!(report.runs_failed, 0);
}
