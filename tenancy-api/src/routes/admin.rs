//! Cross-system drift report and manual repair.

use crate::{
    auth::{require_admin, AuthenticatedUser},
    error::ApiResult,
    routes::workspaces::WorkspaceView,
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use tenancy_orchestrator::DriftEntry;
use utoipa::IntoParams;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/admin/organizations", get(list_organizations))
        .route(
            "/api/v1/admin/organizations/{org_id}/workspace",
            post(create_record_for_org),
        )
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct OrganizationsQuery {
    #[serde(default)]
    drifted_only: bool,
}

#[utoipa::path(get, path = "/api/v1/admin/organizations", tag = "admin",
    params(OrganizationsQuery),
    responses(
        (status = 200, body = [DriftEntry]),
        (status = 502, description = "Identity provider failed"),
    ))]
pub async fn list_organizations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<OrganizationsQuery>,
) -> ApiResult<Json<Vec<DriftEntry>>> {
    require_admin(&user)?;

    let mut report = state.reconciler.drift_report().await?;
    if query.drifted_only {
        report.retain(DriftEntry::is_drifted);
    }

    Ok(Json(report))
}

/// Create the missing workspace row for an organization that has none.
#[utoipa::path(post, path = "/api/v1/admin/organizations/{org_id}/workspace", tag = "admin",
    params(("org_id" = String, Path, description = "Identity provider organization id")),
    responses(
        (status = 201, body = WorkspaceView),
        (status = 404, description = "Organization not found"),
        (status = 422, description = "Organization already has a workspace"),
    ))]
pub async fn create_record_for_org(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(org_id): Path<String>,
) -> ApiResult<(StatusCode, Json<WorkspaceView>)> {
    require_admin(&user)?;

    let workspace = state
        .reconciler
        .create_record_for_org(&org_id, &user.username)
        .await?;

    Ok((StatusCode::CREATED, Json(WorkspaceView::new(workspace))))
}
