//! Staged signup data that survives the redirect to hosted checkout.
//!
//! An intent lives in one slot per signup session. It is valid for a fixed
//! TTL after creation; `load` discards stale entries and reports them absent,
//! after which the signup has to start over.

use crate::error::{OrchestratorError, Result};
use crate::providers::BillingInterval;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sqlx::SqlitePool;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;
use utoipa::ToSchema;

pub const DEFAULT_INTENT_TTL: Duration = Duration::hours(1);

/// Largest logo accepted for staging.
pub const MAX_LOGO_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StagedLogo {
    pub content_type: String,
    /// Base64 encoded image bytes.
    #[serde(serialize_with = "encode_bytes", deserialize_with = "decode_bytes")]
    #[schema(value_type = String)]
    pub data: Vec<u8>,
}

fn encode_bytes<S: Serializer>(data: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(data))
}

fn decode_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD.decode(encoded).map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningIntent {
    pub name: String,
    pub slug: Option<String>,
    pub logo: Option<StagedLogo>,
    pub plan: String,
    pub interval: BillingInterval,
    /// Checkout session issued by the billing provider for this signup.
    pub checkout_session_ref: String,
    pub created_at: DateTime<Utc>,
}

impl ProvisioningIntent {
    pub fn is_expired_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.created_at >= ttl
    }

    pub fn expires_at(&self, ttl: Duration) -> DateTime<Utc> {
        self.created_at + ttl
    }

    /// Reject intents the identity provider would refuse anyway.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "workspace name must not be empty".to_string(),
            ));
        }
        if let Some(slug) = &self.slug {
            validate_slug(slug)?;
        }
        if let Some(logo) = &self.logo {
            if logo.data.len() > MAX_LOGO_BYTES {
                return Err(OrchestratorError::InvalidInput(format!(
                    "logo exceeds {MAX_LOGO_BYTES} bytes"
                )));
            }
            if !logo.content_type.starts_with("image/") {
                return Err(OrchestratorError::InvalidInput(format!(
                    "logo content type {} is not an image",
                    logo.content_type
                )));
            }
        }
        Ok(())
    }
}

/// Slugs are lowercase ASCII letters, digits and inner hyphens.
pub fn validate_slug(slug: &str) -> Result<()> {
    let valid = !slug.is_empty()
        && slug.len() <= 64
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

    if valid {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidInput(format!(
            "invalid slug '{slug}': use lowercase letters, digits and hyphens"
        )))
    }
}

/// Single-slot, TTL-bounded storage for signup intents keyed by session.
#[async_trait]
pub trait IntentStore: Send + Sync {
    /// Store an intent, replacing any previous one for the session.
    async fn save(&self, session_key: &str, intent: &ProvisioningIntent) -> Result<()>;

    /// Return the session's intent if it has not expired. Expired entries
    /// are removed.
    async fn load(&self, session_key: &str) -> Result<Option<ProvisioningIntent>>;

    async fn clear(&self, session_key: &str) -> Result<()>;

    /// Drop every expired entry. Returns how many were removed.
    async fn purge_expired(&self) -> Result<u64>;

    fn ttl(&self) -> Duration;
}

/// Server-side intent store backed by the `provisioning_intents` table.
#[derive(Clone)]
pub struct SqliteIntentStore {
    pool: SqlitePool,
    ttl: Duration,
}

impl SqliteIntentStore {
    pub fn new(pool: SqlitePool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }
}

#[async_trait]
impl IntentStore for SqliteIntentStore {
    async fn save(&self, session_key: &str, intent: &ProvisioningIntent) -> Result<()> {
        let payload = serde_json::to_string(intent)?;

        sqlx::query(
            "INSERT INTO provisioning_intents (session_key, payload, created_at)
             VALUES (?, ?, ?)
             ON CONFLICT(session_key) DO UPDATE SET payload = excluded.payload, created_at = excluded.created_at",
        )
        .bind(session_key)
        .bind(payload)
        .bind(intent.created_at.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load(&self, session_key: &str) -> Result<Option<ProvisioningIntent>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT payload FROM provisioning_intents WHERE session_key = ?")
                .bind(session_key)
                .fetch_optional(&self.pool)
                .await?;

        let Some((payload,)) = row else {
            return Ok(None);
        };

        let intent: ProvisioningIntent = serde_json::from_str(&payload)?;
        if intent.is_expired_at(Utc::now(), self.ttl) {
            debug!(session_key, "discarding expired provisioning intent");
            self.clear(session_key).await?;
            return Ok(None);
        }

        Ok(Some(intent))
    }

    async fn clear(&self, session_key: &str) -> Result<()> {
        sqlx::query("DELETE FROM provisioning_intents WHERE session_key = ?")
            .bind(session_key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let cutoff = (Utc::now() - self.ttl).timestamp();

        let result = sqlx::query("DELETE FROM provisioning_intents WHERE created_at <= ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Process-local intent store.
pub struct MemoryIntentStore {
    entries: Mutex<HashMap<String, ProvisioningIntent>>,
    ttl: Duration,
}

impl MemoryIntentStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }
}

impl Default for MemoryIntentStore {
    fn default() -> Self {
        Self::new(DEFAULT_INTENT_TTL)
    }
}

#[async_trait]
impl IntentStore for MemoryIntentStore {
    async fn save(&self, session_key: &str, intent: &ProvisioningIntent) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(session_key.to_string(), intent.clone());
        Ok(())
    }

    async fn load(&self, session_key: &str) -> Result<Option<ProvisioningIntent>> {
        let mut entries = self.entries.lock().await;

        let expired = match entries.get(session_key) {
            Some(intent) => intent.is_expired_at(Utc::now(), self.ttl),
            None => return Ok(None),
        };

        if expired {
            entries.remove(session_key);
            return Ok(None);
        }

        Ok(entries.get(session_key).cloned())
    }

    async fn clear(&self, session_key: &str) -> Result<()> {
        self.entries.lock().await.remove(session_key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, intent| !intent.is_expired_at(now, self.ttl));
        Ok((before - entries.len()) as u64)
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }
}
