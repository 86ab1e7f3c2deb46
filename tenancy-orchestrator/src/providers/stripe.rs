//! Billing provider client for the Stripe REST API.

use super::{
    BillingInterval, BillingProvider, CheckoutRequest, CheckoutSession, ExternalSubscription,
    NativeSubscriptionStatus, ProviderError, ResolvedCheckout,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct StripeConfig {
    pub api_key: String,
    pub api_base: String,
    pub timeout: Duration,
}

// Keeps the key out of logs and panic messages.
impl fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripeConfig")
            .field("api_key", &"[redacted]")
            .field("api_base", &self.api_base)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: "https://api.stripe.com".to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

pub struct StripeBillingProvider {
    client: Client,
    config: StripeConfig,
}

impl StripeBillingProvider {
    pub fn new(config: StripeConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("tenancy-orchestrator/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client, config })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/v1/{}", self.config.api_base.trim_end_matches('/'), path);
        self.client
            .request(method, url)
            .bearer_auth(&self.config.api_key)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ProviderError> {
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, body));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

#[async_trait]
impl BillingProvider for StripeBillingProvider {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, ProviderError> {
        let mut form = vec![
            ("mode", "subscription".to_string()),
            ("line_items[0][price]", request.price_ref.clone()),
            ("line_items[0][quantity]", "1".to_string()),
            ("success_url", request.success_url.clone()),
            ("cancel_url", request.cancel_url.clone()),
            ("metadata[plan]", request.plan.clone()),
            ("metadata[interval]", request.interval.as_str().to_string()),
            ("subscription_data[metadata][plan]", request.plan.clone()),
        ];
        if let Some(days) = request.trial_days {
            form.push(("subscription_data[trial_period_days]", days.to_string()));
        }

        let session: StripeCheckoutSession = self
            .send(self.request(Method::POST, "checkout/sessions").form(&form))
            .await?;

        debug!(session_id = %session.id, plan = %request.plan, "created checkout session");

        Ok(CheckoutSession {
            redirect_url: session
                .url
                .ok_or_else(|| ProviderError::Decode("checkout session has no url".into()))?,
            session_id: session.id,
        })
    }

    async fn resolve_checkout_session(
        &self,
        session_id: &str,
    ) -> Result<ResolvedCheckout, ProviderError> {
        let path = format!("checkout/sessions/{session_id}");
        let session: StripeCheckoutSession = self
            .send(
                self.request(Method::GET, &path)
                    .query(&[("expand[]", "subscription")]),
            )
            .await?;

        resolved_from_session(session)
    }

    async fn cancel_subscription(
        &self,
        subscription_ref: &str,
        immediate: bool,
    ) -> Result<(), ProviderError> {
        let path = format!("subscriptions/{subscription_ref}");
        let request = if immediate {
            self.request(Method::DELETE, &path)
        } else {
            self.request(Method::POST, &path)
                .form(&[("cancel_at_period_end", "true")])
        };

        let _: StripeSubscription = self.send(request).await?;
        Ok(())
    }

    async fn reactivate_subscription(&self, subscription_ref: &str) -> Result<(), ProviderError> {
        let path = format!("subscriptions/{subscription_ref}");
        let _: StripeSubscription = self
            .send(
                self.request(Method::POST, &path)
                    .form(&[("cancel_at_period_end", "false")]),
            )
            .await?;
        Ok(())
    }

    async fn set_trial_end(
        &self,
        subscription_ref: &str,
        trial_end: DateTime<Utc>,
    ) -> Result<(), ProviderError> {
        let path = format!("subscriptions/{subscription_ref}");
        let form = [
            ("trial_end", trial_end.timestamp().to_string()),
            ("proration_behavior", "none".to_string()),
        ];
        let _: StripeSubscription = self
            .send(self.request(Method::POST, &path).form(&form))
            .await?;
        Ok(())
    }

    async fn get_subscription(
        &self,
        subscription_ref: &str,
    ) -> Result<ExternalSubscription, ProviderError> {
        let path = format!("subscriptions/{subscription_ref}");
        let raw: StripeSubscription = self.send(self.request(Method::GET, &path)).await?;
        raw.try_into()
    }
}

// Wire types. Only the fields we mirror are modeled.

#[derive(Debug, Deserialize)]
struct StripeCheckoutSession {
    id: String,
    url: Option<String>,
    status: Option<String>,
    customer: Option<ExpandableId>,
    subscription: Option<ExpandableSubscription>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExpandableId {
    Id(String),
    Object { id: String },
}

impl ExpandableId {
    fn into_id(self) -> String {
        match self {
            ExpandableId::Id(id) | ExpandableId::Object { id } => id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExpandableSubscription {
    Object(Box<StripeSubscription>),
    Id(String),
}

#[derive(Debug, Deserialize)]
struct StripeSubscription {
    id: String,
    customer: ExpandableId,
    status: String,
    #[serde(default)]
    cancel_at_period_end: bool,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
    trial_start: Option<i64>,
    trial_end: Option<i64>,
    canceled_at: Option<i64>,
    ended_at: Option<i64>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    items: Option<StripeList<StripeSubscriptionItem>>,
}

#[derive(Debug, Deserialize)]
struct StripeList<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct StripeSubscriptionItem {
    price: Option<StripePrice>,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StripePrice {
    unit_amount: Option<i64>,
    lookup_key: Option<String>,
    recurring: Option<StripeRecurring>,
}

#[derive(Debug, Deserialize)]
struct StripeRecurring {
    interval: String,
}

fn timestamp(ts: Option<i64>) -> Option<DateTime<Utc>> {
    ts.and_then(|ts| DateTime::from_timestamp(ts, 0))
}

impl TryFrom<StripeSubscription> for ExternalSubscription {
    type Error = ProviderError;

    fn try_from(raw: StripeSubscription) -> Result<Self, Self::Error> {
        let status = NativeSubscriptionStatus::from_provider(&raw.status).ok_or_else(|| {
            ProviderError::Decode(format!("unknown subscription status '{}'", raw.status))
        })?;

        let item = raw.items.and_then(|items| items.data.into_iter().next());
        // Newer API versions report the billing period on the item instead.
        let period_start = raw
            .current_period_start
            .or_else(|| item.as_ref().and_then(|i| i.current_period_start));
        let period_end = raw
            .current_period_end
            .or_else(|| item.as_ref().and_then(|i| i.current_period_end));
        let price = item.and_then(|i| i.price);

        let interval = price
            .as_ref()
            .and_then(|p| p.recurring.as_ref())
            .and_then(|r| match r.interval.as_str() {
                "month" => Some(BillingInterval::Month),
                "year" => Some(BillingInterval::Year),
                _ => None,
            });
        let plan = raw
            .metadata
            .get("plan")
            .cloned()
            .or_else(|| price.as_ref().and_then(|p| p.lookup_key.clone()));

        Ok(ExternalSubscription {
            id: raw.id,
            customer_ref: raw.customer.into_id(),
            status,
            cancel_at_period_end: raw.cancel_at_period_end,
            current_period_start: timestamp(period_start),
            current_period_end: timestamp(period_end),
            trial_start: timestamp(raw.trial_start),
            trial_end: timestamp(raw.trial_end),
            canceled_at: timestamp(raw.canceled_at),
            ended_at: timestamp(raw.ended_at),
            plan,
            interval,
            unit_amount_cents: price.and_then(|p| p.unit_amount),
        })
    }
}

fn resolved_from_session(session: StripeCheckoutSession) -> Result<ResolvedCheckout, ProviderError> {
    if let Some(status) = session.status.as_deref() {
        if status != "complete" {
            return Err(ProviderError::Conflict(format!(
                "checkout session {} is {status}, not complete",
                session.id
            )));
        }
    }

    let subscription = match session.subscription {
        Some(ExpandableSubscription::Object(sub)) => ExternalSubscription::try_from(*sub)?,
        Some(ExpandableSubscription::Id(id)) => {
            return Err(ProviderError::Decode(format!(
                "subscription {id} was not expanded"
            )))
        }
        None => {
            return Err(ProviderError::Decode(format!(
                "checkout session {} has no subscription",
                session.id
            )))
        }
    };

    let customer_ref = session
        .customer
        .map(ExpandableId::into_id)
        .unwrap_or_else(|| subscription.customer_ref.clone());

    Ok(ResolvedCheckout {
        customer_ref,
        subscription,
    })
}
