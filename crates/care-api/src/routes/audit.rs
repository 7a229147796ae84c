//! # Audit Log API
//!
//! - **GET `/audit`** — Audit entries, newest first (paginated)
//! - **GET `/audit/verify`** — Recompute the hash chain and report the first break
//!
//! Both are excluded from request auditing.

use axum::extract::State;
use axum::routing::get;
use axum::Router;

use care_core::{verify_chain, AuditEntry, ChainVerification, Page};

use crate::extractors::{ok, ApiResult};
use crate::middleware::pagination::Pagination;
use crate::middleware::rbac::guard;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/audit", guard(get(list_audit), "audit", "read"))
        .route("/audit/verify", guard(get(verify), "audit", "read"))
}

/// GET /audit
#[utoipa::path(
    get,
    path = "/audit",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("page_size" = Option<i64>, Query, description = "Page size, default 10, max 100"),
    ),
    responses((status = 200, description = "One page of audit entries", body = [AuditEntry])),
    tag = "audit"
)]
async fn list_audit(
    State(state): State<AppState>,
    Pagination(page): Pagination,
) -> ApiResult<Page<AuditEntry>> {
    ok(state.store.list_audit(page).await?)
}

/// GET /audit/verify — Entries still queued are written first.
#[utoipa::path(
    get,
    path = "/audit/verify",
    responses((status = 200, description = "Chain verification result", body = ChainVerification)),
    tag = "audit"
)]
async fn verify(State(state): State<AppState>) -> ApiResult<ChainVerification> {
    state.audit.flush().await;
    let chain = state.store.audit_chain().await?;
    let result = verify_chain(&chain);
    if !result.valid {
        tracing::error!(
            first_broken_id = ?result.first_broken_id,
            reason = ?result.reason,
            "audit chain verification failed"
        );
    }
    ok(result)
}
