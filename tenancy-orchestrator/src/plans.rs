//! Plan catalog: prices, billing provider price ids and usage limits.

use crate::error::{OrchestratorError, Result};
use crate::providers::BillingInterval;
use serde::{Deserialize, Serialize};
use std::path::Path;
use utoipa::ToSchema;

const GIB: i64 = 1024 * 1024 * 1024;

/// Usage limits. `None` means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PlanLimits {
    pub max_brands: Option<i64>,
    pub max_members: Option<i64>,
    pub max_storage_bytes: Option<i64>,
    pub max_api_calls: Option<i64>,
    pub max_ai_credits: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPrice {
    /// Billing provider price identifier.
    pub price_ref: String,
    pub amount_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub trial_days: Option<u32>,
    pub monthly: PlanPrice,
    pub yearly: PlanPrice,
    #[serde(default)]
    pub limits: PlanLimits,
}

impl Plan {
    pub fn price(&self, interval: BillingInterval) -> &PlanPrice {
        match interval {
            BillingInterval::Month => &self.monthly,
            BillingInterval::Year => &self.yearly,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCatalog {
    plans: Vec<Plan>,
}

impl PlanCatalog {
    pub fn new(plans: Vec<Plan>) -> Self {
        Self { plans }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let catalog: PlanCatalog = serde_yaml_ng::from_str(yaml)?;
        if catalog.plans.is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "plan catalog defines no plans".to_string(),
            ));
        }
        Ok(catalog)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn get(&self, id: &str) -> Option<&Plan> {
        self.plans.iter().find(|plan| plan.id == id)
    }

    pub fn require(&self, id: &str) -> Result<&Plan> {
        self.get(id)
            .ok_or_else(|| OrchestratorError::InvalidInput(format!("Unknown plan: {id}")))
    }

    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }
}

fn price(plan: &str, interval: &str, amount_cents: i64) -> PlanPrice {
    PlanPrice {
        price_ref: format!("price_{plan}_{interval}"),
        amount_cents,
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new(vec![
            Plan {
                id: "starter".to_string(),
                name: "Starter".to_string(),
                trial_days: Some(14),
                monthly: price("starter", "month", 2_900),
                yearly: price("starter", "year", 29_000),
                limits: PlanLimits {
                    max_brands: Some(1),
                    max_members: Some(3),
                    max_storage_bytes: Some(GIB),
                    max_api_calls: Some(10_000),
                    max_ai_credits: Some(500),
                },
            },
            Plan {
                id: "growth".to_string(),
                name: "Growth".to_string(),
                trial_days: Some(14),
                monthly: price("growth", "month", 7_900),
                yearly: price("growth", "year", 79_000),
                limits: PlanLimits {
                    max_brands: Some(5),
                    max_members: Some(10),
                    max_storage_bytes: Some(10 * GIB),
                    max_api_calls: Some(100_000),
                    max_ai_credits: Some(5_000),
                },
            },
            Plan {
                id: "scale".to_string(),
                name: "Scale".to_string(),
                trial_days: Some(14),
                monthly: price("scale", "month", 19_900),
                yearly: price("scale", "year", 199_000),
                limits: PlanLimits {
                    max_brands: None,
                    max_members: None,
                    max_storage_bytes: Some(100 * GIB),
                    max_api_calls: None,
                    max_ai_credits: Some(50_000),
                },
            },
        ])
    }
}
