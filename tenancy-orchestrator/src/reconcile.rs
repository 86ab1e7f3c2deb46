//! Drift reporting and manual repair between the identity provider and the
//! workspace table.
//!
//! Repair is deliberately manual: the report lists every organization and
//! every row whose organization is gone, with its resolved status, and an
//! admin decides which rows to create.

use crate::error::{OrchestratorError, Result};
use crate::operation::{OperationStatus, OperationType};
use crate::providers::{bounded, IdentityProvider};
use crate::saga::DEFAULT_CALL_TIMEOUT;
use crate::status::{self, Resolution, StatusInputs};
use crate::workspace::{NewWorkspace, Workspace, WorkspaceFilters, WorkspaceStore};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DriftEntry {
    pub org_ref: String,
    pub org_name: Option<String>,
    pub workspace_id: Option<String>,
    #[serde(flatten)]
    pub resolution: Resolution,
}

impl DriftEntry {
    /// Whether any pairwise link is broken.
    pub fn is_drifted(&self) -> bool {
        let facets = self.resolution.facets;
        !(facets.org_db && facets.db_customer && facets.customer_subscription)
    }
}

#[derive(Clone)]
pub struct Reconciler {
    store: WorkspaceStore,
    identity: Arc<dyn IdentityProvider>,
    call_timeout: std::time::Duration,
}

impl Reconciler {
    pub fn new(pool: SqlitePool, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            store: WorkspaceStore::new(pool),
            identity,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: std::time::Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Resolve a row's status with the organization's existence confirmed
    /// against the identity provider.
    pub async fn resolve_workspace(&self, workspace: &Workspace) -> Result<Resolution> {
        let org = bounded(
            self.call_timeout,
            self.identity.get_organization(&workspace.org_ref),
        )
        .await
        .map_err(|e| OrchestratorError::external("get_organization", e))?;

        Ok(status::resolve(&workspace.status_inputs(org.is_some())))
    }

    /// One entry per organization, plus one per row whose organization no
    /// longer exists. Organizations come first in provider order.
    #[instrument(skip(self))]
    pub async fn drift_report(&self) -> Result<Vec<DriftEntry>> {
        let orgs = bounded(self.call_timeout, self.identity.list_organizations())
            .await
            .map_err(|e| OrchestratorError::external("list_organizations", e))?;

        let workspaces = self.store.list_workspaces(WorkspaceFilters::default()).await?;
        let mut by_org: HashMap<&str, &Workspace> = workspaces
            .iter()
            .map(|w| (w.org_ref.as_str(), w))
            .collect();

        let mut entries = Vec::with_capacity(orgs.len());
        let mut seen = HashSet::new();

        for org in &orgs {
            seen.insert(org.id.as_str());
            let entry = match by_org.remove(org.id.as_str()) {
                Some(workspace) => DriftEntry {
                    org_ref: org.id.clone(),
                    org_name: Some(org.name.clone()),
                    workspace_id: Some(workspace.id.clone()),
                    resolution: status::resolve(&workspace.status_inputs(true)),
                },
                None => DriftEntry {
                    org_ref: org.id.clone(),
                    org_name: Some(org.name.clone()),
                    workspace_id: None,
                    resolution: status::resolve(&StatusInputs {
                        has_org: true,
                        ..Default::default()
                    }),
                },
            };
            entries.push(entry);
        }

        for workspace in workspaces.iter().filter(|w| !seen.contains(w.org_ref.as_str())) {
            entries.push(DriftEntry {
                org_ref: workspace.org_ref.clone(),
                org_name: None,
                workspace_id: Some(workspace.id.clone()),
                resolution: status::resolve(&workspace.status_inputs(false)),
            });
        }

        let drifted = entries.iter().filter(|e| e.is_drifted()).count();
        info!(total = entries.len(), drifted, "drift report built");

        Ok(entries)
    }

    /// Create the missing workspace row for an existing organization.
    #[instrument(skip(self))]
    pub async fn create_record_for_org(&self, org_ref: &str, actor: &str) -> Result<Workspace> {
        if let Some(existing) = self.store.find_by_org_ref(org_ref).await? {
            return Err(OrchestratorError::InvariantViolation(format!(
                "organization {org_ref} already has workspace {}",
                existing.id
            )));
        }

        let org = bounded(self.call_timeout, self.identity.get_organization(org_ref))
            .await
            .map_err(|e| OrchestratorError::external("get_organization", e))?
            .ok_or_else(|| OrchestratorError::NotFound(format!("organization {org_ref}")))?;

        let workspace = self
            .store
            .create_workspace(NewWorkspace {
                org_ref: org.id,
                name: org.name,
                slug: org.slug,
            })
            .await?;

        let op = self
            .store
            .record_operation(
                &workspace.id,
                OperationType::CreateRecordForOrg,
                OperationStatus::Running,
                Some(actor),
            )
            .await?;
        self.store
            .complete_operation(&op, OperationStatus::Success, None)
            .await?;

        info!(workspace_id = %workspace.id, "workspace record created for organization");
        Ok(workspace)
    }
}
