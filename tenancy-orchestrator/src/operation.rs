//! Audit trail for remedial actions.

use crate::error::{OrchestratorError, Result};
use crate::workspace::WorkspaceStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Operation {
    pub id: String,
    pub workspace_id: String,
    pub operation_type: OperationType,
    pub status: OperationStatus,
    pub actor: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum OperationType {
    ExtendTrial,
    SetTrialEnd,
    CancelSubscription,
    ReactivateSubscription,
    RefreshSubscription,
    Suspend,
    Unsuspend,
    AddBonusCredits,
    ResetUsage,
    CreateRecordForOrg,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::ExtendTrial => "extend_trial",
            OperationType::SetTrialEnd => "set_trial_end",
            OperationType::CancelSubscription => "cancel_subscription",
            OperationType::ReactivateSubscription => "reactivate_subscription",
            OperationType::RefreshSubscription => "refresh_subscription",
            OperationType::Suspend => "suspend",
            OperationType::Unsuspend => "unsuspend",
            OperationType::AddBonusCredits => "add_bonus_credits",
            OperationType::ResetUsage => "reset_usage",
            OperationType::CreateRecordForOrg => "create_record_for_org",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum OperationStatus {
    Pending,
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, Default)]
pub struct OperationFilters {
    pub workspace_id: Option<String>,
    pub operation_type: Option<OperationType>,
    pub status: Option<OperationStatus>,
}

impl WorkspaceStore {
    /// Record an operation for tracking
    pub async fn record_operation(
        &self,
        workspace_id: &str,
        operation_type: OperationType,
        status: OperationStatus,
        actor: Option<&str>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO operations (id, workspace_id, operation_type, status, actor, started_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(workspace_id)
        .bind(operation_type)
        .bind(status)
        .bind(actor)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(id)
    }

    /// Mark an operation finished with its final status.
    pub async fn complete_operation(
        &self,
        id: &str,
        status: OperationStatus,
        error: Option<String>,
    ) -> Result<()> {
        sqlx::query("UPDATE operations SET status = ?, completed_at = ?, error = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now().timestamp())
            .bind(error)
            .bind(id)
            .execute(self.pool())
            .await?;

        Ok(())
    }

    /// Get a single operation by ID
    pub async fn get_operation(&self, id: &str) -> Result<Operation> {
        let row = sqlx::query_as::<_, OperationRow>("SELECT * FROM operations WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("operation {id}")))?;

        Ok(row.into())
    }

    /// Get all operations with optional filters, newest first
    pub async fn get_operations(&self, filters: OperationFilters) -> Result<Vec<Operation>> {
        let mut query = "SELECT * FROM operations WHERE 1=1".to_string();

        if filters.workspace_id.is_some() {
            query.push_str(" AND workspace_id = ?");
        }
        if filters.operation_type.is_some() {
            query.push_str(" AND operation_type = ?");
        }
        if filters.status.is_some() {
            query.push_str(" AND status = ?");
        }

        query.push_str(" ORDER BY started_at DESC, rowid DESC");

        let mut q = sqlx::query_as::<_, OperationRow>(&query);

        if let Some(wid) = &filters.workspace_id {
            q = q.bind(wid);
        }
        if let Some(ot) = filters.operation_type {
            q = q.bind(ot);
        }
        if let Some(s) = filters.status {
            q = q.bind(s);
        }

        let rows = q.fetch_all(self.pool()).await?;

        Ok(rows.into_iter().map(Operation::from).collect())
    }
}

#[derive(sqlx::FromRow)]
struct OperationRow {
    id: String,
    workspace_id: String,
    operation_type: OperationType,
    status: OperationStatus,
    actor: Option<String>,
    started_at: i64,
    completed_at: Option<i64>,
    error: Option<String>,
}

impl From<OperationRow> for Operation {
    fn from(row: OperationRow) -> Self {
        Self {
            id: row.id,
            workspace_id: row.workspace_id,
            operation_type: row.operation_type,
            status: row.status,
            actor: row.actor,
            started_at: DateTime::from_timestamp(row.started_at, 0).unwrap_or_default(),
            completed_at: row
                .completed_at
                .and_then(|ts| DateTime::from_timestamp(ts, 0)),
            error: row.error,
        }
    }
}
