//! Tenant provisioning and status reconciliation
//!
//! This crate contains the core business logic for tenants that live across an
//! identity provider, the local datastore and a billing provider. It is
//! consumed by the tenancy-api HTTP service but can also be used by CLI
//! commands, background workers, or other entry points.

pub mod db;
pub mod error;
pub mod intent;
pub mod operation;
pub mod plans;
pub mod providers;
pub mod reconcile;
pub mod remedial;
pub mod saga;
pub mod status;
pub mod usage;
pub mod workspace;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::{OrchestratorError, Result};
pub use intent::{IntentStore, MemoryIntentStore, ProvisioningIntent, SqliteIntentStore, StagedLogo};
pub use operation::{Operation, OperationFilters, OperationStatus, OperationType};
pub use plans::{Plan, PlanCatalog, PlanLimits};
pub use providers::{BillingProvider, IdentityProvider, ProviderError};
pub use reconcile::{DriftEntry, Reconciler};
pub use remedial::RemedialExecutor;
pub use saga::{ProvisioningError, ProvisioningRun, ProvisioningRuns, ProvisioningSaga, SagaProgress, SagaState};
pub use status::{CanonicalStatus, Resolution, StatusInputs, SyncFacets};
pub use usage::{ResetScope, UsageCounter, UsageLedger, UsageSnapshot};
pub use workspace::{NewWorkspace, Workspace, WorkspaceFilters, WorkspaceStore};
