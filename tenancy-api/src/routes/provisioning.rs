//! Signup flow: stage an intent and open checkout, then provision once the
//! billing provider redirects back.

use crate::{
    auth::{signup_session, AuthenticatedUser},
    error::{ApiError, ApiResult},
    routes::workspaces::WorkspaceView,
    state::AppState,
};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tenancy_orchestrator::providers::{bounded, BillingInterval, CheckoutRequest};
use tenancy_orchestrator::{OrchestratorError, ProvisioningIntent, ProvisioningRun, StagedLogo};
use tracing::info;
use utoipa::ToSchema;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/v1/provisioning/intent",
            post(start_signup).get(get_intent).delete(clear_intent),
        )
        .route("/api/v1/provisioning/run", post(run_provisioning))
        .route("/api/v1/provisioning/runs/{checkout_ref}", get(get_run))
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StartSignupRequest {
    pub name: String,
    pub slug: Option<String>,
    pub plan: String,
    pub interval: BillingInterval,
    pub logo: Option<StagedLogo>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StartSignupResponse {
    pub checkout_session_id: String,
    pub redirect_url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IntentView {
    pub name: String,
    pub slug: Option<String>,
    pub plan: String,
    pub interval: BillingInterval,
    pub has_logo: bool,
    pub checkout_session_ref: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RunProvisioningRequest {
    pub checkout_ref: String,
}

/// Stage the signup and open a hosted checkout session for it.
#[utoipa::path(post, path = "/api/v1/provisioning/intent", tag = "provisioning",
    request_body = StartSignupRequest,
    params(("x-signup-session" = String, Header, description = "Signup session key")),
    responses(
        (status = 201, body = StartSignupResponse),
        (status = 400, description = "Invalid name, slug, logo or plan"),
        (status = 502, description = "Billing provider failed"),
    ))]
pub async fn start_signup(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    headers: HeaderMap,
    Json(req): Json<StartSignupRequest>,
) -> ApiResult<(StatusCode, Json<StartSignupResponse>)> {
    let session_key = signup_session(&headers)?;
    let plan = state.plans.require(&req.plan)?;

    let mut intent = ProvisioningIntent {
        name: req.name.trim().to_string(),
        slug: req.slug.filter(|s| !s.trim().is_empty()),
        logo: req.logo,
        plan: plan.id.clone(),
        interval: req.interval,
        checkout_session_ref: String::new(),
        created_at: Utc::now(),
    };
    intent.validate()?;

    let checkout = CheckoutRequest {
        plan: plan.id.clone(),
        interval: req.interval,
        price_ref: plan.price(req.interval).price_ref.clone(),
        trial_days: plan.trial_days,
        success_url: state.checkout_success_url.clone(),
        cancel_url: state.checkout_cancel_url.clone(),
    };

    let session = bounded(
        state.call_timeout,
        state.billing.create_checkout_session(&checkout),
    )
    .await
    .map_err(|e| OrchestratorError::external("create_checkout_session", e))?;

    intent.checkout_session_ref = session.session_id.clone();
    intent.created_at = Utc::now();
    state.intents.save(&session_key, &intent).await?;

    info!(
        user = %user.username,
        plan = %intent.plan,
        checkout_session = %session.session_id,
        "signup staged"
    );

    Ok((
        StatusCode::CREATED,
        Json(StartSignupResponse {
            checkout_session_id: session.session_id,
            redirect_url: session.redirect_url,
            expires_at: intent.expires_at(state.intents.ttl()),
        }),
    ))
}

#[utoipa::path(get, path = "/api/v1/provisioning/intent", tag = "provisioning",
    params(("x-signup-session" = String, Header, description = "Signup session key")),
    responses(
        (status = 200, body = IntentView),
        (status = 404, description = "No unexpired intent; restart signup"),
    ))]
pub async fn get_intent(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<IntentView>> {
    let session_key = signup_session(&headers)?;
    let intent = state
        .intents
        .load(&session_key)
        .await?
        .ok_or_else(|| ApiError::NotFound("No pending signup; please restart signup".to_string()))?;

    Ok(Json(IntentView {
        expires_at: intent.expires_at(state.intents.ttl()),
        has_logo: intent.logo.is_some(),
        name: intent.name,
        slug: intent.slug,
        plan: intent.plan,
        interval: intent.interval,
        checkout_session_ref: intent.checkout_session_ref,
        created_at: intent.created_at,
    }))
}

#[utoipa::path(delete, path = "/api/v1/provisioning/intent", tag = "provisioning",
    params(("x-signup-session" = String, Header, description = "Signup session key")),
    responses((status = 200, description = "Intent cleared")))]
pub async fn clear_intent(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let session_key = signup_session(&headers)?;
    state.intents.clear(&session_key).await?;

    Ok(Json(json!({ "message": "Signup intent cleared" })))
}

/// Run the provisioning saga for a completed checkout.
#[utoipa::path(post, path = "/api/v1/provisioning/run", tag = "provisioning",
    request_body = RunProvisioningRequest,
    params(("x-signup-session" = String, Header, description = "Signup session key")),
    responses(
        (status = 200, body = WorkspaceView),
        (status = 400, description = "Missing session data; restart signup"),
        (status = 409, description = "A run for this checkout is in progress"),
        (status = 502, description = "A step failed; retry to resume"),
    ))]
pub async fn run_provisioning(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    headers: HeaderMap,
    Json(req): Json<RunProvisioningRequest>,
) -> ApiResult<Json<WorkspaceView>> {
    let session_key = signup_session(&headers)?;

    let workspace = state.saga.run(&session_key, &req.checkout_ref).await?;
    info!(user = %user.username, workspace_id = %workspace.id, "workspace provisioned");

    Ok(Json(WorkspaceView::new(workspace)))
}

/// Progress of a provisioning run. Visible to the signup session that
/// started it and to admins.
#[utoipa::path(get, path = "/api/v1/provisioning/runs/{checkout_ref}", tag = "provisioning",
    params(("checkout_ref" = String, Path, description = "Checkout session reference")),
    responses(
        (status = 200, body = ProvisioningRun),
        (status = 404, description = "No run for this checkout"),
    ))]
pub async fn get_run(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    headers: HeaderMap,
    Path(checkout_ref): Path<String>,
) -> ApiResult<Json<ProvisioningRun>> {
    let not_found = || ApiError::NotFound(format!("No provisioning run for {checkout_ref}"));

    let run = state
        .saga
        .runs()
        .get(&checkout_ref)
        .await?
        .ok_or_else(not_found)?;

    let owns_run = signup_session(&headers).is_ok_and(|key| key == run.session_key);
    if !owns_run && !user.is_admin() {
        return Err(not_found());
    }

    Ok(Json(run))
}
