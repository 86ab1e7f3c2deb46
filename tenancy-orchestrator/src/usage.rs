//! Per-workspace usage counters.
//!
//! Every adjustment is a single `UPDATE ... SET x = x + ?` statement that
//! touches the current-period and lifetime columns together, so concurrent
//! increments from feature code never lose writes.

use crate::error::{OrchestratorError, Result};
use crate::plans::PlanLimits;
use crate::workspace::WorkspaceStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, instrument};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UsageCounter {
    Brands,
    Members,
    Storage,
    ApiCalls,
    AiCredits,
}

impl UsageCounter {
    pub const ALL: [UsageCounter; 5] = [
        UsageCounter::Brands,
        UsageCounter::Members,
        UsageCounter::Storage,
        UsageCounter::ApiCalls,
        UsageCounter::AiCredits,
    ];

    /// (current, lifetime) column names.
    fn columns(self) -> (&'static str, &'static str) {
        match self {
            UsageCounter::Brands => ("brands_count", "brands_lifetime"),
            UsageCounter::Members => ("members_count", "members_lifetime"),
            UsageCounter::Storage => ("storage_bytes", "storage_bytes_lifetime"),
            UsageCounter::ApiCalls => ("api_calls", "api_calls_lifetime"),
            UsageCounter::AiCredits => ("ai_credits_used", "ai_credits_lifetime"),
        }
    }

    /// Flow counters start over each billing period. Brands, members and
    /// storage are levels and keep their value across periods.
    pub fn is_periodic(self) -> bool {
        matches!(self, UsageCounter::ApiCalls | UsageCounter::AiCredits)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UsageCounters {
    pub brands: i64,
    pub brands_lifetime: i64,
    pub members: i64,
    pub members_lifetime: i64,
    pub storage_bytes: i64,
    pub storage_bytes_lifetime: i64,
    pub api_calls: i64,
    pub api_calls_lifetime: i64,
    pub ai_credits: i64,
    pub ai_credits_lifetime: i64,
    pub bonus_ai_credits: i64,
}

impl UsageCounters {
    pub fn current(&self, counter: UsageCounter) -> i64 {
        match counter {
            UsageCounter::Brands => self.brands,
            UsageCounter::Members => self.members,
            UsageCounter::Storage => self.storage_bytes,
            UsageCounter::ApiCalls => self.api_calls,
            UsageCounter::AiCredits => self.ai_credits,
        }
    }

    pub fn lifetime(&self, counter: UsageCounter) -> i64 {
        match counter {
            UsageCounter::Brands => self.brands_lifetime,
            UsageCounter::Members => self.members_lifetime,
            UsageCounter::Storage => self.storage_bytes_lifetime,
            UsageCounter::ApiCalls => self.api_calls_lifetime,
            UsageCounter::AiCredits => self.ai_credits_lifetime,
        }
    }
}

/// Effective limit for a counter. AI credit limits grow by bonus credits.
pub fn effective_limit(
    limits: &PlanLimits,
    counters: &UsageCounters,
    counter: UsageCounter,
) -> Option<i64> {
    match counter {
        UsageCounter::Brands => limits.max_brands,
        UsageCounter::Members => limits.max_members,
        UsageCounter::Storage => limits.max_storage_bytes,
        UsageCounter::ApiCalls => limits.max_api_calls,
        UsageCounter::AiCredits => limits
            .max_ai_credits
            .map(|max| max.saturating_add(counters.bonus_ai_credits)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResetScope {
    /// Zero the periodic counters (API calls, AI credits), or the named
    /// counter when one is given.
    CurrentPeriod,
    /// Zero every counter including lifetime totals and bonus credits.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CounterValue {
    pub counter: UsageCounter,
    pub current: i64,
    pub lifetime: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CounterUsage {
    pub counter: UsageCounter,
    pub current: i64,
    pub lifetime: i64,
    pub limit: Option<i64>,
    pub remaining: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UsageSnapshot {
    pub workspace_id: String,
    pub plan: Option<String>,
    pub limits: PlanLimits,
    pub bonus_ai_credits: i64,
    pub counters: Vec<CounterUsage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LimitCheck {
    pub counter: UsageCounter,
    pub current: i64,
    pub requested: i64,
    pub limit: Option<i64>,
    pub allowed: bool,
}

#[derive(Clone)]
pub struct UsageLedger {
    pool: SqlitePool,
}

impl UsageLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Adjust a counter. Positive amounts add to both the current and the
    /// lifetime value; negative amounts only lower the current value, which
    /// never drops below zero.
    #[instrument(skip(self))]
    pub async fn increment(
        &self,
        workspace_id: &str,
        counter: UsageCounter,
        amount: i64,
    ) -> Result<CounterValue> {
        if amount == 0 {
            return Err(OrchestratorError::InvalidInput(
                "usage adjustment must be non-zero".to_string(),
            ));
        }

        let (current, lifetime) = counter.columns();
        // SQLite promotes an overflowing integer sum to REAL, so the row
        // only matches while both sums still fit in an i64.
        let query = format!(
            "UPDATE workspaces
             SET {current} = MAX({current} + ?, 0), {lifetime} = {lifetime} + MAX(?, 0), updated_at = ?
             WHERE id = ?
               AND {current} <= {max} - MAX(?, 0)
               AND {lifetime} <= {max} - MAX(?, 0)
             RETURNING {current}, {lifetime}",
            max = i64::MAX,
        );

        let updated: Option<(i64, i64)> = sqlx::query_as(&query)
            .bind(amount)
            .bind(amount)
            .bind(Utc::now().timestamp())
            .bind(workspace_id)
            .bind(amount)
            .bind(amount)
            .fetch_optional(&self.pool)
            .await?;

        let Some((current, lifetime)) = updated else {
            return Err(self.rejected_update(workspace_id, counter).await);
        };

        debug!(current, lifetime, "usage counter adjusted");

        Ok(CounterValue {
            counter,
            current,
            lifetime,
        })
    }

    pub async fn snapshot(&self, workspace_id: &str) -> Result<UsageSnapshot> {
        let workspace = WorkspaceStore::new(self.pool.clone())
            .get_workspace(workspace_id)
            .await?;

        let counters = UsageCounter::ALL
            .iter()
            .map(|&counter| {
                let current = workspace.usage.current(counter);
                let limit = effective_limit(&workspace.limits, &workspace.usage, counter);
                CounterUsage {
                    counter,
                    current,
                    lifetime: workspace.usage.lifetime(counter),
                    limit,
                    remaining: limit.map(|limit| (limit - current).max(0)),
                }
            })
            .collect();

        Ok(UsageSnapshot {
            workspace_id: workspace.id,
            plan: workspace.plan,
            limits: workspace.limits,
            bonus_ai_credits: workspace.usage.bonus_ai_credits,
            counters,
        })
    }

    /// Whether adding `amount` would stay within the workspace's limit.
    pub async fn check_limit(
        &self,
        workspace_id: &str,
        counter: UsageCounter,
        amount: i64,
    ) -> Result<LimitCheck> {
        let workspace = WorkspaceStore::new(self.pool.clone())
            .get_workspace(workspace_id)
            .await?;

        let current = workspace.usage.current(counter);
        let limit = effective_limit(&workspace.limits, &workspace.usage, counter);

        Ok(LimitCheck {
            counter,
            current,
            requested: amount,
            limit,
            allowed: limit.map_or(true, |limit| current.saturating_add(amount) <= limit),
        })
    }

    /// Grant extra AI credits on top of the plan limit. Returns the new bonus total.
    pub async fn add_bonus_credits(&self, workspace_id: &str, amount: i64) -> Result<i64> {
        if amount <= 0 {
            return Err(OrchestratorError::InvalidInput(
                "bonus credits must be positive".to_string(),
            ));
        }

        let query = format!(
            "UPDATE workspaces
             SET bonus_ai_credits = bonus_ai_credits + ?, updated_at = ?
             WHERE id = ? AND bonus_ai_credits <= {max} - ?
             RETURNING bonus_ai_credits",
            max = i64::MAX,
        );

        let updated: Option<(i64,)> = sqlx::query_as(&query)
            .bind(amount)
            .bind(Utc::now().timestamp())
            .bind(workspace_id)
            .bind(amount)
            .fetch_optional(&self.pool)
            .await?;

        match updated {
            Some((bonus,)) => Ok(bonus),
            None => Err(self.rejected_update(workspace_id, UsageCounter::AiCredits).await),
        }
    }

    /// Explain why a guarded counter update matched no row.
    async fn rejected_update(&self, workspace_id: &str, counter: UsageCounter) -> OrchestratorError {
        let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM workspaces WHERE id = ?")
            .bind(workspace_id)
            .fetch_one(&self.pool)
            .await;

        match exists {
            Ok(0) => OrchestratorError::NotFound(format!("workspace {workspace_id}")),
            Ok(_) => OrchestratorError::InvalidInput(format!(
                "adjustment would overflow the {counter:?} counter"
            )),
            Err(e) => e.into(),
        }
    }

    /// Zero counters according to `scope`, all in one statement.
    pub async fn reset(
        &self,
        workspace_id: &str,
        scope: ResetScope,
        counter: Option<UsageCounter>,
    ) -> Result<()> {
        let assignments: Vec<String> = match (scope, counter) {
            (ResetScope::CurrentPeriod, Some(counter)) => {
                vec![format!("{} = 0", counter.columns().0)]
            }
            (ResetScope::CurrentPeriod, None) => UsageCounter::ALL
                .iter()
                .filter(|c| c.is_periodic())
                .map(|c| format!("{} = 0", c.columns().0))
                .collect(),
            (ResetScope::All, Some(counter)) => {
                let (current, lifetime) = counter.columns();
                vec![format!("{current} = 0"), format!("{lifetime} = 0")]
            }
            (ResetScope::All, None) => UsageCounter::ALL
                .iter()
                .flat_map(|c| {
                    let (current, lifetime) = c.columns();
                    [format!("{current} = 0"), format!("{lifetime} = 0")]
                })
                .chain(std::iter::once("bonus_ai_credits = 0".to_string()))
                .collect(),
        };

        let query = format!(
            "UPDATE workspaces SET {}, updated_at = ? WHERE id = ?",
            assignments.join(", ")
        );

        let result = sqlx::query(&query)
            .bind(Utc::now().timestamp())
            .bind(workspace_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(OrchestratorError::NotFound(format!(
                "workspace {workspace_id}"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ai_credit_limit_includes_bonus() {
        let limits = PlanLimits {
            max_ai_credits: Some(500),
            ..Default::default()
        };
        let counters = UsageCounters {
            bonus_ai_credits: 250,
            ..Default::default()
        };

        assert_eq!(
            effective_limit(&limits, &counters, UsageCounter::AiCredits),
            Some(750)
        );
        assert_eq!(
            effective_limit(&limits, &counters, UsageCounter::Brands),
            None
        );
    }

    #[test]
    fn test_only_flow_counters_are_periodic() {
        let periodic: Vec<_> = UsageCounter::ALL
            .into_iter()
            .filter(|c| c.is_periodic())
            .collect();
        assert_eq!(periodic, vec![UsageCounter::ApiCalls, UsageCounter::AiCredits]);
    }
}
