use anyhow::Context;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tenancy_orchestrator::providers::{ClerkConfig, StripeConfig};
use tenancy_orchestrator::PlanCatalog;

#[derive(Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_janitor_interval")]
    pub janitor_interval_secs: u64,

    #[serde(default = "default_intent_ttl")]
    pub intent_ttl_secs: u64,

    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    #[serde(default = "default_stale_run_after")]
    pub stale_run_after_secs: u64,

    #[serde(default = "default_plans_file")]
    pub plans_file: Option<PathBuf>,

    #[serde(default = "default_checkout_success_url")]
    pub checkout_success_url: String,

    #[serde(default = "default_checkout_cancel_url")]
    pub checkout_cancel_url: String,

    #[serde(default = "default_stripe_api_key")]
    pub stripe_api_key: Option<String>,

    #[serde(default = "default_stripe_api_base")]
    pub stripe_api_base: String,

    #[serde(default = "default_clerk_secret_key")]
    pub clerk_secret_key: Option<String>,

    #[serde(default = "default_clerk_api_base")]
    pub clerk_api_base: String,
}

fn env_secs(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn default_bind_addr() -> String {
    std::env::var("TENANCY_API_BIND").unwrap_or_else(|_| "0.0.0.0:3131".to_string())
}

fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("TENANCY_API_DB_PATH") {
        return PathBuf::from(path);
    }

    if cfg!(windows) {
        let appdata = std::env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(appdata)
            .join("tenancy")
            .join("api")
            .join("tenancy.db")
    } else {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home)
            .join(".tenancy")
            .join("api")
            .join("tenancy.db")
    }
}

fn default_janitor_interval() -> u64 {
    env_secs("TENANCY_JANITOR_INTERVAL", 300)
}

fn default_intent_ttl() -> u64 {
    env_secs("TENANCY_INTENT_TTL", 3600)
}

fn default_call_timeout() -> u64 {
    env_secs("TENANCY_CALL_TIMEOUT", 15)
}

fn default_stale_run_after() -> u64 {
    env_secs("TENANCY_STALE_RUN_AFTER", 900)
}

fn default_plans_file() -> Option<PathBuf> {
    env_opt("TENANCY_PLANS_FILE").map(PathBuf::from)
}

fn default_checkout_success_url() -> String {
    std::env::var("TENANCY_CHECKOUT_SUCCESS_URL").unwrap_or_else(|_| {
        "http://localhost:3000/signup/complete?session_id={CHECKOUT_SESSION_ID}".to_string()
    })
}

fn default_checkout_cancel_url() -> String {
    std::env::var("TENANCY_CHECKOUT_CANCEL_URL")
        .unwrap_or_else(|_| "http://localhost:3000/signup".to_string())
}

fn default_stripe_api_key() -> Option<String> {
    env_opt("STRIPE_API_KEY")
}

fn default_stripe_api_base() -> String {
    std::env::var("STRIPE_API_BASE").unwrap_or_else(|_| StripeConfig::default().api_base)
}

fn default_clerk_secret_key() -> Option<String> {
    env_opt("CLERK_SECRET_KEY")
}

fn default_clerk_api_base() -> String {
    std::env::var("CLERK_API_BASE").unwrap_or_else(|_| ClerkConfig::default().api_base)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: default_db_path(),
            janitor_interval_secs: default_janitor_interval(),
            intent_ttl_secs: default_intent_ttl(),
            call_timeout_secs: default_call_timeout(),
            stale_run_after_secs: default_stale_run_after(),
            plans_file: default_plans_file(),
            checkout_success_url: default_checkout_success_url(),
            checkout_cancel_url: default_checkout_cancel_url(),
            stripe_api_key: default_stripe_api_key(),
            stripe_api_base: default_stripe_api_base(),
            clerk_secret_key: default_clerk_secret_key(),
            clerk_api_base: default_clerk_api_base(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn intent_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.intent_ttl_secs as i64)
    }

    pub fn stale_run_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_run_after_secs as i64)
    }

    /// The configured plan catalog, or the built-in one.
    pub fn load_plans(&self) -> anyhow::Result<PlanCatalog> {
        match &self.plans_file {
            Some(path) => PlanCatalog::load(path)
                .with_context(|| format!("loading plan catalog from {}", path.display())),
            None => Ok(PlanCatalog::default()),
        }
    }

    pub fn stripe(&self) -> anyhow::Result<StripeConfig> {
        let api_key = self
            .stripe_api_key
            .clone()
            .context("STRIPE_API_KEY must be set")?;

        Ok(StripeConfig {
            api_key,
            api_base: self.stripe_api_base.clone(),
            timeout: self.call_timeout(),
        })
    }

    pub fn clerk(&self) -> anyhow::Result<ClerkConfig> {
        let secret_key = self
            .clerk_secret_key
            .clone()
            .context("CLERK_SECRET_KEY must be set")?;

        Ok(ClerkConfig {
            secret_key,
            api_base: self.clerk_api_base.clone(),
            timeout: self.call_timeout(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_provider_keys_are_reported() {
        let config = Config {
            stripe_api_key: None,
            clerk_secret_key: None,
            ..Config::default()
        };

        let Err(err) = config.stripe() else {
            panic!("stripe config should require an api key");
        };
        assert!(err.to_string().contains("STRIPE_API_KEY"));
        assert!(config.clerk().is_err());
    }

    #[test]
    fn test_provider_configs_share_call_timeout() {
        let config = Config {
            call_timeout_secs: 7,
            stripe_api_key: Some("sk_test".to_string()),
            clerk_secret_key: Some("sk_clerk".to_string()),
            ..Config::default()
        };

        assert_eq!(config.stripe().unwrap().timeout, Duration::from_secs(7));
        assert_eq!(config.clerk().unwrap().secret_key, "sk_clerk");
    }

    #[test]
    fn test_provider_configs_redact_keys_in_debug() {
        let config = Config {
            stripe_api_key: Some("sk_live_secret".to_string()),
            clerk_secret_key: Some("sk_clerk_secret".to_string()),
            ..Config::default()
        };

        let stripe = format!("{:?}", config.stripe().unwrap());
        assert!(!stripe.contains("sk_live_secret"));
        assert!(stripe.contains("api_base"));

        let clerk = format!("{:?}", config.clerk().unwrap());
        assert!(!clerk.contains("sk_clerk_secret"));
    }

    #[test]
    fn test_plans_default_to_builtin_catalog() {
        let config = Config {
            plans_file: None,
            ..Config::default()
        };

        let plans = config.load_plans().unwrap();
        assert!(plans.get("growth").is_some());
    }

    #[test]
    fn test_plans_file_errors_name_the_path() {
        let config = Config {
            plans_file: Some(PathBuf::from("/nonexistent/plans.yaml")),
            ..Config::default()
        };

        let err = config.load_plans().unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/plans.yaml"));
    }

    #[test]
    fn test_plans_file_replaces_builtin_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plans.yaml");
        std::fs::write(
            &path,
            r#"
plans:
  - id: team
    name: Team
    trial_days: 30
    monthly: { price_ref: price_team_m, amount_cents: 4900 }
    yearly: { price_ref: price_team_y, amount_cents: 49000 }
    limits:
      max_members: 25
"#,
        )
        .unwrap();

        let config = Config {
            plans_file: Some(path),
            ..Config::default()
        };

        let plans = config.load_plans().unwrap();
        assert!(plans.get("growth").is_none());
        let team = plans.get("team").unwrap();
        assert_eq!(team.trial_days, Some(30));
        assert_eq!(team.limits.max_members, Some(25));
        assert_eq!(team.limits.max_brands, None);
    }
}
