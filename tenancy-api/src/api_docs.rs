use crate::routes::{
    provisioning::{IntentView, RunProvisioningRequest, StartSignupRequest, StartSignupResponse},
    workspaces::{
        AddCreditsRequest, CancelRequest, ExtendTrialRequest, RecordUsageRequest,
        ResetUsageRequest, SetTrialEndRequest, StatusView, SuspendRequest, WorkspaceView,
    },
};
use tenancy_orchestrator::providers::{BillingInterval, NativeSubscriptionStatus};
use tenancy_orchestrator::usage::{CounterUsage, CounterValue, LimitCheck, UsageCounters};
use tenancy_orchestrator::{
    CanonicalStatus, DriftEntry, Operation, OperationStatus, OperationType, PlanLimits,
    ProvisioningRun, ResetScope, Resolution, SagaState, StagedLogo, SyncFacets, UsageCounter,
    UsageSnapshot, Workspace,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health::health_check,
        crate::routes::health::readiness_check,
        crate::routes::provisioning::start_signup,
        crate::routes::provisioning::get_intent,
        crate::routes::provisioning::clear_intent,
        crate::routes::provisioning::run_provisioning,
        crate::routes::provisioning::get_run,
        crate::routes::workspaces::list_workspaces,
        crate::routes::workspaces::get_workspace,
        crate::routes::workspaces::get_status,
        crate::routes::workspaces::get_usage,
        crate::routes::workspaces::record_usage,
        crate::routes::workspaces::check_usage,
        crate::routes::workspaces::extend_trial,
        crate::routes::workspaces::set_trial_end,
        crate::routes::workspaces::cancel_subscription,
        crate::routes::workspaces::reactivate_subscription,
        crate::routes::workspaces::suspend_workspace,
        crate::routes::workspaces::unsuspend_workspace,
        crate::routes::workspaces::add_credits,
        crate::routes::workspaces::reset_usage,
        crate::routes::workspaces::refresh_subscription,
        crate::routes::admin::list_organizations,
        crate::routes::admin::create_record_for_org,
        crate::routes::operations::list_operations,
        crate::routes::operations::get_operation,
    ),
    components(
        schemas(
            Workspace,
            WorkspaceView,
            StatusView,
            CanonicalStatus,
            SyncFacets,
            Resolution,
            NativeSubscriptionStatus,
            BillingInterval,
            PlanLimits,
            UsageCounters,
            UsageCounter,
            UsageSnapshot,
            CounterUsage,
            CounterValue,
            LimitCheck,
            ResetScope,
            StagedLogo,
            StartSignupRequest,
            StartSignupResponse,
            IntentView,
            RunProvisioningRequest,
            ProvisioningRun,
            SagaState,
            DriftEntry,
            ExtendTrialRequest,
            SetTrialEndRequest,
            CancelRequest,
            SuspendRequest,
            AddCreditsRequest,
            ResetUsageRequest,
            RecordUsageRequest,
            Operation,
            OperationStatus,
            OperationType
        )
    ),
    tags(
        (name = "tenancy-api", description = "Tenant provisioning and lifecycle API")
    )
)]
pub struct ApiDoc;
