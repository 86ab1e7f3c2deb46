//! Integration tests for tenancy-orchestrator
//!
//! Tests the workspace store, usage ledger, operation audit trail and the
//! SQLite intent store against an in-memory database.

use chrono::{Duration, Utc};
use tenancy_orchestrator::providers::{BillingInterval, ExternalSubscription, NativeSubscriptionStatus};
use tenancy_orchestrator::test_utils::create_test_db;
use tenancy_orchestrator::workspace::BillingLink;
use tenancy_orchestrator::{
    CanonicalStatus, IntentStore, NewWorkspace, OperationFilters, OperationStatus, OperationType,
    OrchestratorError, PlanCatalog, ProvisioningIntent, ResetScope, SqliteIntentStore,
    UsageCounter, UsageLedger, WorkspaceFilters, WorkspaceStore,
};

fn new_workspace(org_ref: &str) -> NewWorkspace {
    NewWorkspace {
        org_ref: org_ref.to_string(),
        name: "Acme".to_string(),
        slug: Some("acme".to_string()),
    }
}

fn subscription(id: &str, status: NativeSubscriptionStatus) -> ExternalSubscription {
    let now = Utc::now();
    ExternalSubscription {
        id: id.to_string(),
        customer_ref: "cus_1".to_string(),
        status,
        cancel_at_period_end: false,
        current_period_start: Some(now),
        current_period_end: Some(now + Duration::days(365)),
        trial_start: Some(now),
        trial_end: Some(now + Duration::days(14)),
        canceled_at: None,
        ended_at: None,
        plan: None,
        interval: Some(BillingInterval::Year),
        unit_amount_cents: Some(79_000),
    }
}

fn link(checkout_ref: &str, sub: ExternalSubscription) -> BillingLink {
    let catalog = PlanCatalog::default();
    BillingLink {
        checkout_ref: checkout_ref.to_string(),
        customer_ref: sub.customer_ref.clone(),
        subscription: sub,
        plan: "growth".to_string(),
        interval: BillingInterval::Year,
        price_cents: Some(79_000),
        limits: catalog.require("growth").unwrap().limits.clone(),
    }
}

#[tokio::test]
async fn test_create_workspace_seeds_active_without_billing() {
    let pool = create_test_db().await;
    let store = WorkspaceStore::new(pool);

    let workspace = store
        .create_workspace(new_workspace("org_1"))
        .await
        .expect("Failed to create workspace");

    assert_eq!(workspace.org_ref, "org_1");
    assert_eq!(workspace.subscription_status, NativeSubscriptionStatus::Active);
    assert!(workspace.is_active);
    assert!(workspace.billing_customer_ref.is_none());
    assert_eq!(workspace.canonical_status(), CanonicalStatus::NoBilling);
    assert_eq!(workspace.limits.max_brands, None);
}

#[tokio::test]
async fn test_create_workspace_requires_org_ref() {
    let pool = create_test_db().await;
    let store = WorkspaceStore::new(pool);

    let result = store.create_workspace(new_workspace("  ")).await;
    assert!(matches!(result, Err(OrchestratorError::InvalidInput(_))));
}

#[tokio::test]
async fn test_org_ref_is_unique() {
    let pool = create_test_db().await;
    let store = WorkspaceStore::new(pool);

    store.create_workspace(new_workspace("org_1")).await.unwrap();
    let duplicate = store.create_workspace(new_workspace("org_1")).await;

    assert!(matches!(duplicate, Err(OrchestratorError::Database(_))));
}

#[tokio::test]
async fn test_link_billing_sets_refs_plan_and_limits() {
    let pool = create_test_db().await;
    let store = WorkspaceStore::new(pool);
    let workspace = store.create_workspace(new_workspace("org_1")).await.unwrap();

    let linked = store
        .link_billing(
            &workspace.id,
            &link("cs_123", subscription("sub_1", NativeSubscriptionStatus::Trialing)),
        )
        .await
        .unwrap();

    assert_eq!(linked.checkout_ref.as_deref(), Some("cs_123"));
    assert_eq!(linked.billing_customer_ref.as_deref(), Some("cus_1"));
    assert_eq!(linked.billing_subscription_ref.as_deref(), Some("sub_1"));
    assert_eq!(linked.plan.as_deref(), Some("growth"));
    assert_eq!(linked.billing_interval, Some(BillingInterval::Year));
    assert_eq!(linked.price_cents, Some(79_000));
    assert_eq!(linked.limits.max_brands, Some(5));
    assert_eq!(linked.canonical_status(), CanonicalStatus::Trialing);

    let found = store.find_by_checkout_ref("cs_123").await.unwrap().unwrap();
    assert_eq!(found.id, workspace.id);
}

#[tokio::test]
async fn test_link_billing_twice_is_an_invariant_violation() {
    let pool = create_test_db().await;
    let store = WorkspaceStore::new(pool);
    let workspace = store.create_workspace(new_workspace("org_1")).await.unwrap();

    store
        .link_billing(
            &workspace.id,
            &link("cs_123", subscription("sub_1", NativeSubscriptionStatus::Active)),
        )
        .await
        .unwrap();

    let again = store
        .link_billing(
            &workspace.id,
            &link("cs_456", subscription("sub_2", NativeSubscriptionStatus::Active)),
        )
        .await;

    assert!(matches!(again, Err(OrchestratorError::InvariantViolation(_))));
}

#[tokio::test]
async fn test_subscription_links_to_at_most_one_workspace() {
    let pool = create_test_db().await;
    let store = WorkspaceStore::new(pool);
    let first = store.create_workspace(new_workspace("org_1")).await.unwrap();
    let second = store.create_workspace(new_workspace("org_2")).await.unwrap();

    store
        .link_billing(
            &first.id,
            &link("cs_1", subscription("sub_1", NativeSubscriptionStatus::Active)),
        )
        .await
        .unwrap();

    let stolen = store
        .link_billing(
            &second.id,
            &link("cs_2", subscription("sub_1", NativeSubscriptionStatus::Active)),
        )
        .await;

    assert!(matches!(stolen, Err(OrchestratorError::Database(_))));
}

#[tokio::test]
async fn test_apply_subscription_keeps_suspended_rows_inactive() {
    let pool = create_test_db().await;
    let store = WorkspaceStore::new(pool);
    let workspace = store.create_workspace(new_workspace("org_1")).await.unwrap();
    store
        .link_billing(
            &workspace.id,
            &link("cs_1", subscription("sub_1", NativeSubscriptionStatus::PastDue)),
        )
        .await
        .unwrap();

    store
        .set_admin_suspended(&workspace.id, true, Some("chargeback".to_string()))
        .await
        .unwrap();

    let refreshed = store
        .apply_subscription(&workspace.id, &subscription("sub_1", NativeSubscriptionStatus::Active))
        .await
        .unwrap();

    assert!(!refreshed.is_active);
    assert_eq!(refreshed.canonical_status(), CanonicalStatus::AdminSuspended);
    assert_eq!(refreshed.suspension_reason.as_deref(), Some("chargeback"));

    let restored = store
        .set_admin_suspended(&workspace.id, false, None)
        .await
        .unwrap();
    assert!(restored.is_active);
    assert!(restored.suspended_at.is_none());
    assert_eq!(restored.canonical_status(), CanonicalStatus::Active);
}

#[tokio::test]
async fn test_list_workspaces_with_filters() {
    let pool = create_test_db().await;
    let store = WorkspaceStore::new(pool);

    let growth = store.create_workspace(new_workspace("org_1")).await.unwrap();
    store
        .link_billing(
            &growth.id,
            &link("cs_1", subscription("sub_1", NativeSubscriptionStatus::Trialing)),
        )
        .await
        .unwrap();
    let suspended = store.create_workspace(new_workspace("org_2")).await.unwrap();
    store
        .set_admin_suspended(&suspended.id, true, None)
        .await
        .unwrap();
    store.create_workspace(new_workspace("org_3")).await.unwrap();

    let all = store.list_workspaces(WorkspaceFilters::default()).await.unwrap();
    assert_eq!(all.len(), 3);

    let by_plan = store
        .list_workspaces(WorkspaceFilters {
            plan: Some("growth".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_plan.len(), 1);
    assert_eq!(by_plan[0].id, growth.id);

    let trialing = store
        .list_workspaces(WorkspaceFilters {
            subscription_status: Some(NativeSubscriptionStatus::Trialing),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(trialing.len(), 1);

    let only_suspended = store
        .list_workspaces(WorkspaceFilters {
            admin_suspended: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(only_suspended.len(), 1);
    assert_eq!(only_suspended[0].id, suspended.id);
}

#[tokio::test]
async fn test_get_missing_workspace_is_not_found() {
    let pool = create_test_db().await;
    let store = WorkspaceStore::new(pool);

    let result = store.get_workspace("nope").await;
    assert!(matches!(result, Err(OrchestratorError::NotFound(_))));
}

#[tokio::test]
async fn test_record_operation() {
    let pool = create_test_db().await;
    let store = WorkspaceStore::new(pool);
    let workspace = store.create_workspace(new_workspace("org_1")).await.unwrap();

    let op_id = store
        .record_operation(
            &workspace.id,
            OperationType::Suspend,
            OperationStatus::Running,
            Some("admin@example.com"),
        )
        .await
        .unwrap();

    store
        .complete_operation(&op_id, OperationStatus::Success, None)
        .await
        .unwrap();

    let op = store.get_operation(&op_id).await.unwrap();
    assert_eq!(op.operation_type, OperationType::Suspend);
    assert_eq!(op.status, OperationStatus::Success);
    assert_eq!(op.actor.as_deref(), Some("admin@example.com"));
    assert!(op.completed_at.is_some());

    let failed = store
        .get_operations(OperationFilters {
            status: Some(OperationStatus::Failed),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(failed.is_empty());

    let for_workspace = store
        .get_operations(OperationFilters {
            workspace_id: Some(workspace.id.clone()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(for_workspace.len(), 1);
}

#[tokio::test]
async fn test_usage_increment_updates_current_and_lifetime() {
    let pool = create_test_db().await;
    let store = WorkspaceStore::new(pool.clone());
    let ledger = UsageLedger::new(pool);
    let workspace = store.create_workspace(new_workspace("org_1")).await.unwrap();

    ledger.increment(&workspace.id, UsageCounter::Brands, 1).await.unwrap();
    ledger.increment(&workspace.id, UsageCounter::Brands, 2).await.unwrap();
    let value = ledger
        .increment(&workspace.id, UsageCounter::Brands, -1)
        .await
        .unwrap();

    assert_eq!(value.current, 2);
    assert_eq!(value.lifetime, 3);
}

#[tokio::test]
async fn test_usage_decrement_floors_at_zero() {
    let pool = create_test_db().await;
    let store = WorkspaceStore::new(pool.clone());
    let ledger = UsageLedger::new(pool);
    let workspace = store.create_workspace(new_workspace("org_1")).await.unwrap();

    ledger.increment(&workspace.id, UsageCounter::Members, 2).await.unwrap();
    let value = ledger
        .increment(&workspace.id, UsageCounter::Members, -5)
        .await
        .unwrap();

    assert_eq!(value.current, 0);
    assert_eq!(value.lifetime, 2);
}

#[tokio::test]
async fn test_usage_zero_amount_and_missing_workspace() {
    let pool = create_test_db().await;
    let store = WorkspaceStore::new(pool.clone());
    let ledger = UsageLedger::new(pool);
    let workspace = store.create_workspace(new_workspace("org_1")).await.unwrap();

    assert!(matches!(
        ledger.increment(&workspace.id, UsageCounter::ApiCalls, 0).await,
        Err(OrchestratorError::InvalidInput(_))
    ));
    assert!(matches!(
        ledger.increment("missing", UsageCounter::ApiCalls, 1).await,
        Err(OrchestratorError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_usage_overflow_is_rejected_and_row_stays_readable() {
    let pool = create_test_db().await;
    let store = WorkspaceStore::new(pool.clone());
    let ledger = UsageLedger::new(pool);
    let workspace = store.create_workspace(new_workspace("org_1")).await.unwrap();

    let value = ledger
        .increment(&workspace.id, UsageCounter::ApiCalls, i64::MAX)
        .await
        .unwrap();
    assert_eq!(value.current, i64::MAX);

    assert!(matches!(
        ledger.increment(&workspace.id, UsageCounter::ApiCalls, i64::MAX).await,
        Err(OrchestratorError::InvalidInput(_))
    ));
    assert!(matches!(
        ledger.increment(&workspace.id, UsageCounter::ApiCalls, 1).await,
        Err(OrchestratorError::InvalidInput(_))
    ));

    // Decrements still apply and the row decodes afterwards
    let value = ledger
        .increment(&workspace.id, UsageCounter::ApiCalls, -1)
        .await
        .unwrap();
    assert_eq!(value.current, i64::MAX - 1);
    assert_eq!(value.lifetime, i64::MAX);

    let reloaded = store.get_workspace(&workspace.id).await.unwrap();
    assert_eq!(reloaded.usage.current(UsageCounter::ApiCalls), i64::MAX - 1);
    ledger.snapshot(&workspace.id).await.unwrap();
}

#[tokio::test]
async fn test_bonus_credit_overflow_is_rejected() {
    let pool = create_test_db().await;
    let store = WorkspaceStore::new(pool.clone());
    let ledger = UsageLedger::new(pool);
    let workspace = store.create_workspace(new_workspace("org_1")).await.unwrap();

    assert_eq!(
        ledger.add_bonus_credits(&workspace.id, i64::MAX).await.unwrap(),
        i64::MAX
    );
    assert!(matches!(
        ledger.add_bonus_credits(&workspace.id, 1).await,
        Err(OrchestratorError::InvalidInput(_))
    ));
    assert!(matches!(
        ledger.add_bonus_credits("missing", 1).await,
        Err(OrchestratorError::NotFound(_))
    ));
    store.get_workspace(&workspace.id).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_increments_are_not_lost() {
    let pool = create_test_db().await;
    let store = WorkspaceStore::new(pool.clone());
    let ledger = UsageLedger::new(pool);
    let workspace = store.create_workspace(new_workspace("org_1")).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let ledger = ledger.clone();
        let id = workspace.id.clone();
        handles.push(tokio::spawn(async move {
            ledger.increment(&id, UsageCounter::ApiCalls, 1).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let snapshot = ledger.snapshot(&workspace.id).await.unwrap();
    let api_calls = snapshot
        .counters
        .iter()
        .find(|c| c.counter == UsageCounter::ApiCalls)
        .unwrap();
    assert_eq!(api_calls.current, 20);
    assert_eq!(api_calls.lifetime, 20);
}

#[tokio::test]
async fn test_check_limit_counts_bonus_credits() {
    let pool = create_test_db().await;
    let store = WorkspaceStore::new(pool.clone());
    let ledger = UsageLedger::new(pool);
    let workspace = store.create_workspace(new_workspace("org_1")).await.unwrap();
    store
        .link_billing(
            &workspace.id,
            &link("cs_1", subscription("sub_1", NativeSubscriptionStatus::Active)),
        )
        .await
        .unwrap();

    ledger
        .increment(&workspace.id, UsageCounter::AiCredits, 4_900)
        .await
        .unwrap();

    let check = ledger
        .check_limit(&workspace.id, UsageCounter::AiCredits, 200)
        .await
        .unwrap();
    assert_eq!(check.limit, Some(5_000));
    assert!(!check.allowed);

    assert_eq!(ledger.add_bonus_credits(&workspace.id, 500).await.unwrap(), 500);

    let check = ledger
        .check_limit(&workspace.id, UsageCounter::AiCredits, 200)
        .await
        .unwrap();
    assert_eq!(check.limit, Some(5_500));
    assert!(check.allowed);

    let brands = ledger
        .check_limit(&workspace.id, UsageCounter::Brands, 6)
        .await
        .unwrap();
    assert!(!brands.allowed);
}

#[tokio::test]
async fn test_unlinked_workspace_has_no_limits() {
    let pool = create_test_db().await;
    let store = WorkspaceStore::new(pool.clone());
    let ledger = UsageLedger::new(pool);
    let workspace = store.create_workspace(new_workspace("org_1")).await.unwrap();

    let check = ledger
        .check_limit(&workspace.id, UsageCounter::Storage, i64::MAX)
        .await
        .unwrap();
    assert_eq!(check.limit, None);
    assert!(check.allowed);
}

#[tokio::test]
async fn test_reset_current_period_keeps_levels_and_lifetime() {
    let pool = create_test_db().await;
    let store = WorkspaceStore::new(pool.clone());
    let ledger = UsageLedger::new(pool);
    let workspace = store.create_workspace(new_workspace("org_1")).await.unwrap();

    ledger.increment(&workspace.id, UsageCounter::Brands, 2).await.unwrap();
    ledger.increment(&workspace.id, UsageCounter::ApiCalls, 40).await.unwrap();
    ledger.increment(&workspace.id, UsageCounter::AiCredits, 7).await.unwrap();
    ledger.add_bonus_credits(&workspace.id, 100).await.unwrap();

    ledger
        .reset(&workspace.id, ResetScope::CurrentPeriod, None)
        .await
        .unwrap();

    let usage = store.get_workspace(&workspace.id).await.unwrap().usage;
    assert_eq!(usage.brands, 2);
    assert_eq!(usage.api_calls, 0);
    assert_eq!(usage.api_calls_lifetime, 40);
    assert_eq!(usage.ai_credits, 0);
    assert_eq!(usage.bonus_ai_credits, 100);

    ledger.reset(&workspace.id, ResetScope::All, None).await.unwrap();

    let usage = store.get_workspace(&workspace.id).await.unwrap().usage;
    assert_eq!(usage.brands, 0);
    assert_eq!(usage.api_calls_lifetime, 0);
    assert_eq!(usage.bonus_ai_credits, 0);
}

#[tokio::test]
async fn test_sqlite_intent_store_expires_after_ttl() {
    let pool = create_test_db().await;
    let store = SqliteIntentStore::new(pool, Duration::hours(1));
    let t0 = Utc::now();

    let fresh = ProvisioningIntent {
        name: "Acme".to_string(),
        slug: Some("acme".to_string()),
        logo: None,
        plan: "growth".to_string(),
        interval: BillingInterval::Year,
        checkout_session_ref: "cs_123".to_string(),
        created_at: t0,
    };
    store.save("session-fresh", &fresh).await.unwrap();

    let stale = ProvisioningIntent {
        created_at: t0 - Duration::hours(1) - Duration::seconds(1),
        ..fresh.clone()
    };
    store.save("session-stale", &stale).await.unwrap();
    store
        .save(
            "session-purged",
            &ProvisioningIntent {
                created_at: t0 - Duration::hours(2),
                ..fresh.clone()
            },
        )
        .await
        .unwrap();

    assert_eq!(store.load("session-fresh").await.unwrap(), Some(fresh));
    assert!(store.load("session-stale").await.unwrap().is_none());

    assert_eq!(store.purge_expired().await.unwrap(), 1);
    assert!(store.load("session-fresh").await.unwrap().is_some());
}
