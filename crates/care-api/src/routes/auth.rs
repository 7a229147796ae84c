//! # Authentication API
//!
//! - **POST `/auth/login`** — Email + password; returns an access/refresh pair
//! - **POST `/auth/refresh`** — Rotate a refresh token within its family
//! - **POST `/auth/logout`** — Revoke the family of a refresh token
//! - **GET `/auth/me`** — The caller's user, employee profile and role
//!
//! The first three are public; login additionally passes the login rate
//! limiter. `/auth/` is outside the request audit, so login outcomes are
//! recorded here.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::middleware::from_fn;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use care_auth::TokenPair;
use care_core::{AuditAction, AuditStatus, NewAuditEntry};

use crate::auth::{ClientMeta, RequestContext};
use crate::extractors::{extract_validated_json, ok, ok_with_message, require_non_blank, ApiResult, Validate};
use crate::middleware::login_rate_limit::login_rate_limit_middleware;
use crate::services::auth::{self as service, AuthError, LoginResult, Profile};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl Validate for LoginRequest {
    fn validate(&self) -> Result<(), String> {
        require_non_blank("email", &self.email)?;
        require_non_blank("password", &self.password)
    }
}

/// Body of `/auth/refresh` and `/auth/logout`.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

impl Validate for RefreshRequest {
    fn validate(&self) -> Result<(), String> {
        require_non_blank("refreshToken", &self.refresh_token)
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogoutResponse {
    /// Sessions revoked in the token's family.
    pub revoked: u64,
}

// ---------------------------------------------------------------------------
// Routers
// ---------------------------------------------------------------------------

/// Unauthenticated endpoints.
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route(
            "/auth/login",
            post(login).route_layer(from_fn(login_rate_limit_middleware)),
        )
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
}

/// Endpoints behind the auth middleware.
pub fn router() -> Router<AppState> {
    Router::new().route("/auth/me", get(me))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /auth/login — Exchange credentials for a token pair.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in; access and refresh tokens issued"),
        (status = 401, description = "Invalid email or password", body = crate::error::ErrorBody),
        (status = 429, description = "Too many attempts", body = crate::error::ErrorBody),
    ),
    tag = "auth"
)]
async fn login(
    State(state): State<AppState>,
    meta: ClientMeta,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<LoginResult> {
    let req = extract_validated_json(body)?;
    let result = service::login(&state, &req.email, &req.password, &meta).await;
    state.audit.record(login_entry(&meta, &result));
    ok(result?)
}

fn login_entry(meta: &ClientMeta, result: &Result<LoginResult, AuthError>) -> NewAuditEntry {
    let (user_id, employee_id) = match result {
        Ok(login) => (
            Some(login.user.id.clone()),
            login.employee.as_ref().map(|e| e.id.clone()),
        ),
        Err(_) => (None, None),
    };
    let failure_reason = match result {
        Ok(_) => None,
        Err(AuthError::InvalidCredentials) => Some("invalid_credentials".to_string()),
        Err(_) => Some("server_error".to_string()),
    };
    NewAuditEntry {
        resource_id: user_id.clone(),
        user_id,
        employee_id,
        client_id: None,
        action: AuditAction::Create,
        resource_type: "session".into(),
        old_value: None,
        new_value: None,
        ip_address: Some(meta.ip.clone()),
        user_agent: meta.user_agent.clone(),
        request_id: meta.request_id.clone(),
        status: if result.is_ok() {
            AuditStatus::Success
        } else {
            AuditStatus::Failure
        },
        failure_reason,
    }
}

/// POST /auth/refresh — Rotate a refresh token.
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair in the same family"),
        (status = 401, description = "Invalid, expired or reused token", body = crate::error::ErrorBody),
    ),
    tag = "auth"
)]
async fn refresh(
    State(state): State<AppState>,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> ApiResult<TokenPair> {
    let req = extract_validated_json(body)?;
    ok(service::refresh(&state, &req.refresh_token).await?)
}

/// POST /auth/logout — Revoke a refresh family.
#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Family revoked", body = LogoutResponse),
        (status = 401, description = "Invalid token", body = crate::error::ErrorBody),
    ),
    tag = "auth"
)]
async fn logout(
    State(state): State<AppState>,
    body: Result<Json<RefreshRequest>, JsonRejection>,
) -> ApiResult<LogoutResponse> {
    let req = extract_validated_json(body)?;
    let revoked = service::logout(&state, &req.refresh_token).await?;
    ok_with_message(LogoutResponse { revoked }, "logged out")
}

/// GET /auth/me — The caller's profile.
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Caller profile", body = Profile),
        (status = 401, description = "Not authenticated", body = crate::error::ErrorBody),
    ),
    tag = "auth"
)]
async fn me(State(state): State<AppState>, ctx: RequestContext) -> ApiResult<Profile> {
    ok(service::profile(&state, &ctx.user_id).await?)
}
