//! Interfaces to the identity and billing systems of record.
//!
//! Both providers own their records; this crate only holds weak references
//! (`org_ref`, `billing_customer_ref`, `billing_subscription_ref`) and mirrors
//! a subset of subscription fields. Every call made through these traits is
//! expected to be wrapped in [`bounded`] so a hung provider surfaces as a
//! failure instead of stalling the caller.

pub mod clerk;
pub mod stripe;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

pub use clerk::{ClerkConfig, ClerkIdentityProvider};
pub use stripe::{StripeBillingProvider, StripeConfig};

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Map a non-success HTTP response to the matching error variant.
    pub(crate) fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            404 => ProviderError::NotFound(body),
            409 => ProviderError::Conflict(body),
            code => ProviderError::Rejected {
                status: code,
                message: body,
            },
        }
    }
}

/// Run a provider call under a deadline. Elapsed calls are failures and are
/// never retried here.
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(limit)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ExternalOrganization {
    pub id: String,
    pub name: String,
    pub slug: Option<String>,
}

/// Native subscription state as reported by the billing provider.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum NativeSubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Paused,
    Incomplete,
}

impl NativeSubscriptionStatus {
    /// Parse the provider's wire value. `incomplete_expired` folds into
    /// `Incomplete`; unknown values are rejected.
    pub fn from_provider(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "trialing" => Some(Self::Trialing),
            "past_due" => Some(Self::PastDue),
            "canceled" => Some(Self::Canceled),
            "unpaid" => Some(Self::Unpaid),
            "paused" => Some(Self::Paused),
            "incomplete" | "incomplete_expired" => Some(Self::Incomplete),
            _ => None,
        }
    }

    /// Whether the tenant should have access to paid features.
    pub fn grants_access(self) -> bool {
        matches!(self, Self::Active | Self::Trialing)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum BillingInterval {
    Month,
    Year,
}

impl BillingInterval {
    pub fn as_str(self) -> &'static str {
        match self {
            BillingInterval::Month => "month",
            BillingInterval::Year => "year",
        }
    }
}

/// The subset of the billing provider's subscription object mirrored locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ExternalSubscription {
    pub id: String,
    pub customer_ref: String,
    pub status: NativeSubscriptionStatus,
    pub cancel_at_period_end: bool,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub trial_start: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub plan: Option<String>,
    pub interval: Option<BillingInterval>,
    pub unit_amount_cents: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub plan: String,
    pub interval: BillingInterval,
    /// Provider-side price identifier resolved from the plan catalog.
    pub price_ref: String,
    pub trial_days: Option<u32>,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CheckoutSession {
    pub session_id: String,
    pub redirect_url: String,
}

/// A completed checkout exchanged for its billing references.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCheckout {
    pub customer_ref: String,
    pub subscription: ExternalSubscription,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn create_organization(
        &self,
        name: &str,
        slug: Option<&str>,
    ) -> Result<ExternalOrganization, ProviderError>;

    /// Attach a logo. Callers treat failures as non-fatal.
    async fn set_logo(
        &self,
        org_id: &str,
        content_type: &str,
        image: Vec<u8>,
    ) -> Result<(), ProviderError>;

    async fn get_organization(
        &self,
        org_id: &str,
    ) -> Result<Option<ExternalOrganization>, ProviderError>;

    async fn list_organizations(&self) -> Result<Vec<ExternalOrganization>, ProviderError>;
}

#[async_trait]
pub trait BillingProvider: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError>;

    /// Exchange a completed checkout session for its customer and
    /// subscription. Read-only on the provider side, so safe to repeat.
    async fn resolve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<ResolvedCheckout, ProviderError>;

    async fn cancel_subscription(
        &self,
        subscription_ref: &str,
        immediate: bool,
    ) -> Result<(), ProviderError>;

    async fn reactivate_subscription(&self, subscription_ref: &str) -> Result<(), ProviderError>;

    async fn set_trial_end(
        &self,
        subscription_ref: &str,
        trial_end: DateTime<Utc>,
    ) -> Result<(), ProviderError>;

    async fn get_subscription(
        &self,
        subscription_ref: &str,
    ) -> Result<ExternalSubscription, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_status_parses_provider_values() {
        assert_eq!(
            NativeSubscriptionStatus::from_provider("past_due"),
            Some(NativeSubscriptionStatus::PastDue)
        );
        assert_eq!(
            NativeSubscriptionStatus::from_provider("incomplete_expired"),
            Some(NativeSubscriptionStatus::Incomplete)
        );
        assert_eq!(NativeSubscriptionStatus::from_provider("bogus"), None);
    }

    #[test]
    fn test_only_active_and_trialing_grant_access() {
        assert!(NativeSubscriptionStatus::Active.grants_access());
        assert!(NativeSubscriptionStatus::Trialing.grants_access());
        assert!(!NativeSubscriptionStatus::PastDue.grants_access());
        assert!(!NativeSubscriptionStatus::Canceled.grants_access());
    }

    #[tokio::test]
    async fn test_bounded_times_out_slow_calls() {
        let result: Result<(), ProviderError> = bounded(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(ProviderError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_bounded_passes_through_results() {
        let result = bounded(Duration::from_secs(1), async { Ok::<_, ProviderError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
