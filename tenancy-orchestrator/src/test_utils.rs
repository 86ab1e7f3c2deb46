//! Test doubles shared by this crate's tests and the API crate's tests.

use crate::providers::{
    BillingInterval, BillingProvider, CheckoutRequest, CheckoutSession, ExternalOrganization,
    ExternalSubscription, IdentityProvider, NativeSubscriptionStatus, ProviderError,
    ResolvedCheckout,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Helper to create an in-memory test database with migrations applied
pub async fn create_test_db() -> SqlitePool {
    // Every connection to sqlite::memory: is a separate database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

fn injected(operation: &str) -> ProviderError {
    ProviderError::Rejected {
        status: 503,
        message: format!("injected failure in {operation}"),
    }
}

/// Identity provider that keeps organizations in memory.
#[derive(Default)]
pub struct FakeIdentityProvider {
    orgs: Mutex<Vec<ExternalOrganization>>,
    logos: Mutex<HashMap<String, Vec<u8>>>,
    failing: Mutex<HashSet<&'static str>>,
    create_calls: AtomicUsize,
}

impl FakeIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call to `operation` fail until [`Self::recover`].
    pub fn fail_on(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    pub fn recover(&self, operation: &'static str) {
        self.failing.lock().unwrap().remove(operation);
    }

    fn check(&self, operation: &'static str) -> Result<(), ProviderError> {
        if self.failing.lock().unwrap().contains(operation) {
            return Err(injected(operation));
        }
        Ok(())
    }

    /// Seed an organization that exists outside any saga run.
    pub fn insert_org(&self, id: &str, name: &str) -> ExternalOrganization {
        let org = ExternalOrganization {
            id: id.to_string(),
            name: name.to_string(),
            slug: None,
        };
        self.orgs.lock().unwrap().push(org.clone());
        org
    }

    pub fn remove_org(&self, id: &str) {
        self.orgs.lock().unwrap().retain(|org| org.id != id);
    }

    pub fn organizations(&self) -> Vec<ExternalOrganization> {
        self.orgs.lock().unwrap().clone()
    }

    pub fn logo(&self, org_id: &str) -> Option<Vec<u8>> {
        self.logos.lock().unwrap().get(org_id).cloned()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn create_organization(
        &self,
        name: &str,
        slug: Option<&str>,
    ) -> Result<ExternalOrganization, ProviderError> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.check("create_organization")?;

        let mut orgs = self.orgs.lock().unwrap();
        if let Some(slug) = slug {
            if orgs.iter().any(|org| org.slug.as_deref() == Some(slug)) {
                return Err(ProviderError::Conflict(format!("slug {slug} is taken")));
            }
        }

        let org = ExternalOrganization {
            id: format!("org_{n}"),
            name: name.to_string(),
            slug: slug.map(str::to_string),
        };
        orgs.push(org.clone());
        Ok(org)
    }

    async fn set_logo(
        &self,
        org_id: &str,
        _content_type: &str,
        image: Vec<u8>,
    ) -> Result<(), ProviderError> {
        self.check("set_logo")?;
        self.logos.lock().unwrap().insert(org_id.to_string(), image);
        Ok(())
    }

    async fn get_organization(
        &self,
        org_id: &str,
    ) -> Result<Option<ExternalOrganization>, ProviderError> {
        self.check("get_organization")?;
        Ok(self
            .orgs
            .lock()
            .unwrap()
            .iter()
            .find(|org| org.id == org_id)
            .cloned())
    }

    async fn list_organizations(&self) -> Result<Vec<ExternalOrganization>, ProviderError> {
        self.check("list_organizations")?;
        Ok(self.organizations())
    }
}

/// Billing provider with in-memory checkout sessions and subscriptions.
#[derive(Default)]
pub struct FakeBillingProvider {
    sessions: Mutex<HashMap<String, ResolvedCheckout>>,
    subscriptions: Mutex<HashMap<String, ExternalSubscription>>,
    failing: Mutex<HashSet<&'static str>>,
    counter: AtomicUsize,
    resolve_calls: AtomicUsize,
}

impl FakeBillingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    pub fn recover(&self, operation: &'static str) {
        self.failing.lock().unwrap().remove(operation);
    }

    fn check(&self, operation: &'static str) -> Result<(), ProviderError> {
        if self.failing.lock().unwrap().contains(operation) {
            return Err(injected(operation));
        }
        Ok(())
    }

    /// Register a completed checkout session backed by a new subscription.
    /// Trialing subscriptions get a 14 day trial.
    pub fn complete_checkout(
        &self,
        session_id: &str,
        status: NativeSubscriptionStatus,
    ) -> ResolvedCheckout {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        let customer_ref = format!("cus_{n}");

        let subscription = ExternalSubscription {
            id: format!("sub_{n}"),
            customer_ref: customer_ref.clone(),
            status,
            cancel_at_period_end: false,
            current_period_start: Some(now),
            current_period_end: Some(now + Duration::days(365)),
            trial_start: (status == NativeSubscriptionStatus::Trialing).then_some(now),
            trial_end: (status == NativeSubscriptionStatus::Trialing)
                .then(|| now + Duration::days(14)),
            canceled_at: None,
            ended_at: None,
            plan: Some("price_growth_year".to_string()),
            interval: Some(BillingInterval::Year),
            unit_amount_cents: Some(79_000),
        };

        let resolved = ResolvedCheckout {
            customer_ref,
            subscription: subscription.clone(),
        };

        self.subscriptions
            .lock()
            .unwrap()
            .insert(subscription.id.clone(), subscription);
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.to_string(), resolved.clone());

        resolved
    }

    pub fn subscription(&self, subscription_ref: &str) -> Option<ExternalSubscription> {
        self.subscriptions
            .lock()
            .unwrap()
            .get(subscription_ref)
            .cloned()
    }

    /// Change a subscription behind the mirror's back.
    pub fn update_subscription(
        &self,
        subscription_ref: &str,
        update: impl FnOnce(&mut ExternalSubscription),
    ) {
        if let Some(sub) = self.subscriptions.lock().unwrap().get_mut(subscription_ref) {
            update(sub);
        }
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    fn modify(
        &self,
        subscription_ref: &str,
        update: impl FnOnce(&mut ExternalSubscription),
    ) -> Result<(), ProviderError> {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let sub = subscriptions
            .get_mut(subscription_ref)
            .ok_or_else(|| ProviderError::NotFound(subscription_ref.to_string()))?;
        update(sub);
        Ok(())
    }
}

#[async_trait]
impl BillingProvider for FakeBillingProvider {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        self.check("create_checkout_session")?;
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let session_id = format!("cs_test_{n}");

        Ok(CheckoutSession {
            redirect_url: format!(
                "https://checkout.test/{session_id}?price={}",
                request.price_ref
            ),
            session_id,
        })
    }

    async fn resolve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<ResolvedCheckout, ProviderError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.check("resolve_checkout_session")?;

        let resolved = self
            .sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(session_id.to_string()))?;

        // Return the live subscription, not the one captured at checkout.
        let subscription = self
            .subscription(&resolved.subscription.id)
            .unwrap_or(resolved.subscription);

        Ok(ResolvedCheckout {
            customer_ref: resolved.customer_ref,
            subscription,
        })
    }

    async fn cancel_subscription(
        &self,
        subscription_ref: &str,
        immediate: bool,
    ) -> Result<(), ProviderError> {
        self.check("cancel_subscription")?;
        let now = Utc::now();

        self.modify(subscription_ref, |sub| {
            sub.canceled_at = Some(now);
            if immediate {
                sub.status = NativeSubscriptionStatus::Canceled;
                sub.cancel_at_period_end = false;
            } else {
                sub.cancel_at_period_end = true;
            }
        })
    }

    async fn reactivate_subscription(&self, subscription_ref: &str) -> Result<(), ProviderError> {
        self.check("reactivate_subscription")?;

        self.modify(subscription_ref, |sub| {
            sub.cancel_at_period_end = false;
            sub.canceled_at = None;
        })
    }

    async fn set_trial_end(
        &self,
        subscription_ref: &str,
        trial_end: DateTime<Utc>,
    ) -> Result<(), ProviderError> {
        self.check("set_trial_end")?;

        self.modify(subscription_ref, |sub| {
            sub.trial_end = Some(trial_end);
            sub.status = NativeSubscriptionStatus::Trialing;
        })
    }

    async fn get_subscription(
        &self,
        subscription_ref: &str,
    ) -> Result<ExternalSubscription, ProviderError> {
        self.check("get_subscription")?;

        self.subscription(subscription_ref)
            .ok_or_else(|| ProviderError::NotFound(subscription_ref.to_string()))
    }
}
