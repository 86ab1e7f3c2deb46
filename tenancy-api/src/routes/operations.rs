use crate::{
    auth::{check_workspace_access, AuthenticatedUser},
    error::{ApiError, ApiResult},
    state::AppState,
};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Extension, Json, Router,
};
use serde::Deserialize;
use tenancy_orchestrator::{Operation, OperationFilters, OperationStatus, OperationType};
use utoipa::IntoParams;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/operations", get(list_operations))
        .route("/api/v1/operations/{id}", get(get_operation))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct OperationsQuery {
    workspace_id: Option<String>,
    #[serde(rename = "type")]
    operation_type: Option<OperationType>,
    status: Option<OperationStatus>,
}

/// Audit trail of remedial actions. Non-admins must scope the listing to a
/// workspace they belong to.
#[utoipa::path(get, path = "/api/v1/operations", tag = "operations",
    params(OperationsQuery),
    responses((status = 200, body = [Operation])))]
pub async fn list_operations(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Query(query): Query<OperationsQuery>,
) -> ApiResult<Json<Vec<Operation>>> {
    match query.workspace_id.as_deref() {
        Some(id) => {
            check_workspace_access(&state.store, id, &user).await?;
        }
        None if !user.is_admin() => {
            return Err(ApiError::BadRequest(
                "workspace_id is required".to_string(),
            ));
        }
        None => {}
    }

    let operations = state
        .store
        .get_operations(OperationFilters {
            workspace_id: query.workspace_id,
            operation_type: query.operation_type,
            status: query.status,
        })
        .await?;

    Ok(Json(operations))
}

#[utoipa::path(get, path = "/api/v1/operations/{id}", tag = "operations",
    params(("id" = String, Path, description = "Operation id")),
    responses((status = 200, body = Operation), (status = 404, description = "Not found")))]
pub async fn get_operation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Operation>> {
    let operation = state.store.get_operation(&id).await?;

    if !user.is_admin() {
        check_workspace_access(&state.store, &operation.workspace_id, &user).await?;
    }

    Ok(Json(operation))
}
