use crate::{
    auth::{check_workspace_access, require_admin, AuthenticatedUser},
    error::ApiResult,
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tenancy_orchestrator::providers::NativeSubscriptionStatus;
use tenancy_orchestrator::usage::{CounterValue, LimitCheck};
use tenancy_orchestrator::{
    CanonicalStatus, ResetScope, SyncFacets, UsageCounter, UsageSnapshot, Workspace,
    WorkspaceFilters,
};
use utoipa::{IntoParams, ToSchema};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/workspaces", get(list_workspaces))
        .route("/api/v1/workspaces/{id}", get(get_workspace))
        .route("/api/v1/workspaces/{id}/status", get(get_status))
        .route(
            "/api/v1/workspaces/{id}/usage",
            get(get_usage).post(record_usage),
        )
        .route("/api/v1/workspaces/{id}/usage/check", get(check_usage))
        .route("/api/v1/workspaces/{id}/extendTrial", post(extend_trial))
        .route("/api/v1/workspaces/{id}/setTrialEnd", post(set_trial_end))
        .route("/api/v1/workspaces/{id}/cancel", post(cancel_subscription))
        .route("/api/v1/workspaces/{id}/reactivate", post(reactivate_subscription))
        .route("/api/v1/workspaces/{id}/suspend", post(suspend_workspace))
        .route("/api/v1/workspaces/{id}/unsuspend", post(unsuspend_workspace))
        .route("/api/v1/workspaces/{id}/addCredits", post(add_credits))
        .route("/api/v1/workspaces/{id}/resetUsage", post(reset_usage))
        .route("/api/v1/workspaces/{id}/refresh", post(refresh_subscription))
}

/// A workspace row with its resolved status.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkspaceView {
    #[serde(flatten)]
    pub workspace: Workspace,
    pub status: CanonicalStatus,
    pub facets: SyncFacets,
}

impl WorkspaceView {
    pub fn new(workspace: Workspace) -> Self {
        let resolution = workspace.resolution();
        Self {
            workspace,
            status: resolution.status,
            facets: resolution.facets,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StatusView {
    pub workspace_id: String,
    pub org_ref: String,
    pub status: CanonicalStatus,
    pub facets: SyncFacets,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct WorkspacesQuery {
    plan: Option<String>,
    subscription_status: Option<NativeSubscriptionStatus>,
    admin_suspended: Option<bool>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ExtendTrialRequest {
    pub days: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SetTrialEndRequest {
    pub trial_end: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CancelRequest {
    #[serde(default)]
    pub immediate: bool,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct SuspendRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddCreditsRequest {
    pub amount: i64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResetUsageRequest {
    pub scope: ResetScope,
    pub counter: Option<UsageCounter>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RecordUsageRequest {
    pub counter: UsageCounter,
    #[serde(default = "default_amount")]
    pub amount: i64,
}

fn default_amount() -> i64 {
    1
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct UsageCheckQuery {
    counter: UsageCounter,
    #[serde(default = "default_amount")]
    amount: i64,
}

#[utoipa::path(get, path = "/api/v1/workspaces", tag = "workspaces",
    params(WorkspacesQuery),
    responses((status = 200, body = [WorkspaceView]), (status = 403, description = "Admin only")))]
pub async fn list_workspaces(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<WorkspacesQuery>,
) -> ApiResult<Json<Vec<WorkspaceView>>> {
    require_admin(&user)?;

    let filters = WorkspaceFilters {
        plan: query.plan,
        subscription_status: query.subscription_status,
        admin_suspended: query.admin_suspended,
    };

    let workspaces = state.store.list_workspaces(filters).await?;

    Ok(Json(workspaces.into_iter().map(WorkspaceView::new).collect()))
}

#[utoipa::path(get, path = "/api/v1/workspaces/{id}", tag = "workspaces",
    params(("id" = String, Path, description = "Workspace id")),
    responses((status = 200, body = WorkspaceView), (status = 404, description = "Not found")))]
pub async fn get_workspace(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkspaceView>> {
    let workspace = check_workspace_access(&state.store, &id, &user).await?;

    Ok(Json(WorkspaceView::new(workspace)))
}

/// Canonical status with the organization confirmed against the identity
/// provider.
#[utoipa::path(get, path = "/api/v1/workspaces/{id}/status", tag = "workspaces",
    params(("id" = String, Path, description = "Workspace id")),
    responses((status = 200, body = StatusView), (status = 502, description = "Identity provider failed")))]
pub async fn get_status(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<StatusView>> {
    let workspace = check_workspace_access(&state.store, &id, &user).await?;
    let resolution = state.reconciler.resolve_workspace(&workspace).await?;

    Ok(Json(StatusView {
        workspace_id: workspace.id,
        org_ref: workspace.org_ref,
        status: resolution.status,
        facets: resolution.facets,
    }))
}

#[utoipa::path(get, path = "/api/v1/workspaces/{id}/usage", tag = "usage",
    params(("id" = String, Path, description = "Workspace id")),
    responses((status = 200, body = UsageSnapshot)))]
pub async fn get_usage(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<UsageSnapshot>> {
    check_workspace_access(&state.store, &id, &user).await?;

    Ok(Json(state.ledger.snapshot(&id).await?))
}

/// Adjust a usage counter. Negative amounts release capacity.
#[utoipa::path(post, path = "/api/v1/workspaces/{id}/usage", tag = "usage",
    params(("id" = String, Path, description = "Workspace id")),
    request_body = RecordUsageRequest,
    responses((status = 200, body = CounterValue)))]
pub async fn record_usage(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Json(req): Json<RecordUsageRequest>,
) -> ApiResult<Json<CounterValue>> {
    check_workspace_access(&state.store, &id, &user).await?;

    Ok(Json(state.ledger.increment(&id, req.counter, req.amount).await?))
}

#[utoipa::path(get, path = "/api/v1/workspaces/{id}/usage/check", tag = "usage",
    params(("id" = String, Path, description = "Workspace id"), UsageCheckQuery),
    responses((status = 200, body = LimitCheck)))]
pub async fn check_usage(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Query(query): Query<UsageCheckQuery>,
) -> ApiResult<Json<LimitCheck>> {
    check_workspace_access(&state.store, &id, &user).await?;

    Ok(Json(
        state
            .ledger
            .check_limit(&id, query.counter, query.amount)
            .await?,
    ))
}

#[utoipa::path(post, path = "/api/v1/workspaces/{id}/extendTrial", tag = "remedial",
    params(("id" = String, Path, description = "Workspace id")),
    request_body = ExtendTrialRequest,
    responses(
        (status = 200, body = WorkspaceView),
        (status = 422, description = "Workspace is not trialing"),
    ))]
pub async fn extend_trial(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Json(req): Json<ExtendTrialRequest>,
) -> ApiResult<Json<WorkspaceView>> {
    require_admin(&user)?;

    let workspace = state
        .executor
        .extend_trial(&id, req.days, &user.username)
        .await?;

    Ok(Json(WorkspaceView::new(workspace)))
}

#[utoipa::path(post, path = "/api/v1/workspaces/{id}/setTrialEnd", tag = "remedial",
    params(("id" = String, Path, description = "Workspace id")),
    request_body = SetTrialEndRequest,
    responses((status = 200, body = WorkspaceView)))]
pub async fn set_trial_end(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Json(req): Json<SetTrialEndRequest>,
) -> ApiResult<Json<WorkspaceView>> {
    require_admin(&user)?;

    let workspace = state
        .executor
        .set_trial_end(&id, req.trial_end, &user.username)
        .await?;

    Ok(Json(WorkspaceView::new(workspace)))
}

/// Cancel immediately or at period end. Open to members of the workspace.
#[utoipa::path(post, path = "/api/v1/workspaces/{id}/cancel", tag = "remedial",
    params(("id" = String, Path, description = "Workspace id")),
    request_body = CancelRequest,
    responses((status = 200, body = WorkspaceView)))]
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Json(req): Json<CancelRequest>,
) -> ApiResult<Json<WorkspaceView>> {
    check_workspace_access(&state.store, &id, &user).await?;

    let workspace = state
        .executor
        .cancel_subscription(&id, req.immediate, &user.username)
        .await?;

    Ok(Json(WorkspaceView::new(workspace)))
}

#[utoipa::path(post, path = "/api/v1/workspaces/{id}/reactivate", tag = "remedial",
    params(("id" = String, Path, description = "Workspace id")),
    responses(
        (status = 200, body = WorkspaceView),
        (status = 422, description = "No cancellation is scheduled"),
    ))]
pub async fn reactivate_subscription(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkspaceView>> {
    check_workspace_access(&state.store, &id, &user).await?;

    let workspace = state
        .executor
        .reactivate_subscription(&id, &user.username)
        .await?;

    Ok(Json(WorkspaceView::new(workspace)))
}

#[utoipa::path(post, path = "/api/v1/workspaces/{id}/suspend", tag = "remedial",
    params(("id" = String, Path, description = "Workspace id")),
    request_body = SuspendRequest,
    responses((status = 200, body = WorkspaceView)))]
pub async fn suspend_workspace(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Json(req): Json<SuspendRequest>,
) -> ApiResult<Json<WorkspaceView>> {
    require_admin(&user)?;

    let workspace = state
        .executor
        .suspend(&id, req.reason, &user.username)
        .await?;

    Ok(Json(WorkspaceView::new(workspace)))
}

#[utoipa::path(post, path = "/api/v1/workspaces/{id}/unsuspend", tag = "remedial",
    params(("id" = String, Path, description = "Workspace id")),
    responses((status = 200, body = WorkspaceView)))]
pub async fn unsuspend_workspace(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkspaceView>> {
    require_admin(&user)?;

    let workspace = state.executor.unsuspend(&id, &user.username).await?;

    Ok(Json(WorkspaceView::new(workspace)))
}

#[utoipa::path(post, path = "/api/v1/workspaces/{id}/addCredits", tag = "remedial",
    params(("id" = String, Path, description = "Workspace id")),
    request_body = AddCreditsRequest,
    responses((status = 200, body = UsageSnapshot)))]
pub async fn add_credits(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Json(req): Json<AddCreditsRequest>,
) -> ApiResult<Json<UsageSnapshot>> {
    require_admin(&user)?;

    Ok(Json(
        state
            .executor
            .add_bonus_credits(&id, req.amount, &user.username)
            .await?,
    ))
}

#[utoipa::path(post, path = "/api/v1/workspaces/{id}/resetUsage", tag = "remedial",
    params(("id" = String, Path, description = "Workspace id")),
    request_body = ResetUsageRequest,
    responses((status = 200, body = UsageSnapshot)))]
pub async fn reset_usage(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
    Json(req): Json<ResetUsageRequest>,
) -> ApiResult<Json<UsageSnapshot>> {
    require_admin(&user)?;

    Ok(Json(
        state
            .executor
            .reset_usage(&id, req.scope, req.counter, &user.username)
            .await?,
    ))
}

#[utoipa::path(post, path = "/api/v1/workspaces/{id}/refresh", tag = "remedial",
    params(("id" = String, Path, description = "Workspace id")),
    responses((status = 200, body = WorkspaceView)))]
pub async fn refresh_subscription(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<WorkspaceView>> {
    require_admin(&user)?;

    let workspace = state
        .executor
        .refresh_subscription(&id, &user.username)
        .await?;

    Ok(Json(WorkspaceView::new(workspace)))
}
