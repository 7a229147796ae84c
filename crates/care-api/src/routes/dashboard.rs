//! # Dashboard API
//!
//! - **GET `/dashboard/overview`** — Client counts, waiting-list priorities,
//!   location occupancy, critical evaluations and open incidents

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use chrono::Utc;

use care_core::records::DashboardOverview;

use crate::extractors::{ok, ApiResult};
use crate::middleware::rbac::guard;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/dashboard/overview", guard(get(overview), "dashboard", "read"))
}

/// GET /dashboard/overview
#[utoipa::path(
    get,
    path = "/dashboard/overview",
    responses((status = 200, description = "Overview counters", body = DashboardOverview)),
    tag = "dashboard"
)]
async fn overview(State(state): State<AppState>) -> ApiResult<DashboardOverview> {
    let today = Utc::now().date_naive();
    ok(state.store.dashboard_overview(today).await?)
}
