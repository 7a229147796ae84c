//! # care-api — Axum API Services for the Care Coordination Stack
//!
//! Back-end of a youth and family care organization: the intake pipeline
//! from registration to the waiting list, the client lifecycle through
//! care and two-phase discharge, periodic evaluations, incidents and
//! attachments, role-based access control and a hash-chained audit log.
//!
//! ## API Surface
//!
//! | Prefix | Module | Domain |
//! |--------|--------|--------|
//! | `/auth/*` | [`routes::auth`] | Sessions |
//! | `/employees/*`, `/users/*` | [`routes::employees`] | Staff |
//! | `/referring-orgs/*` | [`routes::referring_orgs`] | Referrers |
//! | `/locations/*` | [`routes::locations`] | Capacity |
//! | `/registration-forms/*` | [`routes::registration_forms`] | Applications |
//! | `/intake-forms/*` | [`routes::intake_forms`] | Intake and goals |
//! | `/clients/*` | [`routes::clients`] | Client lifecycle |
//! | `/evaluations/*` | [`routes::evaluations`] | Evaluations |
//! | `/incidents/*` | [`routes::incidents`] | Incidents |
//! | `/attachments/*` | [`routes::attachments`] | Documents |
//! | `/roles/*`, `/permissions` | [`routes::roles`] | RBAC |
//! | `/dashboard/*` | [`routes::dashboard`] | Overview |
//! | `/audit/*` | [`routes::audit`] | Audit log |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → metrics → request id → auth → audit → pagination → RBAC guard → handler
//! ```
//!
//! Public routes (`/auth/login|refresh|logout`, `/health*`, `/metrics`,
//! `/swagger/openapi.json`) stop after request id.
//!
//! ## OpenAPI
//!
//! Generated by utoipa at `/swagger/openapi.json`.

pub mod audit;
pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod services;
pub mod state;
pub mod storage;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use prometheus::TEXT_FORMAT;
use axum::routing::get;
use axum::{Extension, Router};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Assemble the full application router with all routes and middleware.
pub fn app(state: AppState) -> Router {
    // Authenticated API routes.
    let api = Router::new()
        .merge(routes::auth::router())
        .merge(routes::employees::router())
        .merge(routes::referring_orgs::router())
        .merge(routes::locations::router())
        .merge(routes::registration_forms::router())
        .merge(routes::intake_forms::router())
        .merge(routes::clients::router())
        .merge(routes::evaluations::router())
        .merge(routes::incidents::router())
        .merge(routes::attachments::router())
        .merge(routes::roles::router())
        .merge(routes::dashboard::router())
        .merge(routes::audit::router())
        .layer(from_fn(middleware::pagination::pagination_middleware))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::audit::audit_middleware,
        ))
        .layer(from_fn_with_state(state.clone(), auth::auth_middleware));

    // Unauthenticated routes.
    let public = Router::new()
        .merge(routes::auth::public_router())
        .merge(openapi::router())
        .route("/health", get(liveness))
        .route("/health/readiness", get(readiness))
        .route("/metrics", get(prometheus_metrics));

    Router::new()
        .merge(public)
        .merge(api)
        .layer(from_fn(auth::request_id_middleware))
        .layer(from_fn(middleware::metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(state.metrics.clone()))
        .layer(Extension(state.store.clone()))
        .layer(Extension(state.limiter.clone()))
        .with_state(state)
}

/// Liveness check: 200 while the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness check: 200 when the datastore answers a ping, 503 otherwise.
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, "ready"),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "database unreachable")
        }
    }
}

/// GET /metrics — Prometheus scrape endpoint.
async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    match state.metrics.gather_and_encode() {
        Ok(body) => ([(header::CONTENT_TYPE, TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
