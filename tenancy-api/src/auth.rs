use crate::error::ApiError;
use axum::{
    extract::Request,
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use tenancy_orchestrator::{Workspace, WorkspaceStore};

pub const ADMIN_ROLE: &str = "admin";

/// Header carrying the signup session that owns a provisioning intent.
pub const SIGNUP_SESSION_HEADER: &str = "x-signup-session";

#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub username: String,
    pub role: Option<String>,
    /// Organization the caller is currently acting in.
    pub org_id: Option<String>,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some(ADMIN_ROLE)
    }
}

fn header(req: &Request, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Auth middleware - extracts the caller from auth proxy headers
///
/// Token verification happens upstream; the proxy sets `x-user`, and
/// optionally `x-user-role` and `x-org-id`, after verifying the session.
pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, ApiError> {
    let username = header(&req, "x-user")
        .ok_or_else(|| ApiError::Unauthorized("Missing x-user header".to_string()))?;
    let role = header(&req, "x-user-role");
    let org_id = header(&req, "x-org-id");

    req.extensions_mut().insert(AuthenticatedUser {
        username,
        role,
        org_id,
    });

    Ok(next.run(req).await)
}

pub fn require_admin(user: &AuthenticatedUser) -> Result<(), ApiError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(ApiError::Forbidden("Admin role required".to_string()))
    }
}

/// Load a workspace the caller may act on
///
/// Returns:
/// - ApiError::NotFound if the workspace doesn't exist
/// - ApiError::Forbidden if the caller is neither an admin nor a member of
///   the workspace's organization
pub async fn check_workspace_access(
    store: &WorkspaceStore,
    workspace_id: &str,
    user: &AuthenticatedUser,
) -> Result<Workspace, ApiError> {
    let workspace = store.get_workspace(workspace_id).await?;

    if user.is_admin() || user.org_id.as_deref() == Some(workspace.org_ref.as_str()) {
        return Ok(workspace);
    }

    Err(ApiError::Forbidden(format!(
        "Access denied: workspace {workspace_id} belongs to another organization"
    )))
}

/// The signup session key from request headers.
pub fn signup_session(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(SIGNUP_SESSION_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            ApiError::BadRequest(format!("Missing {SIGNUP_SESSION_HEADER} header"))
        })
}
