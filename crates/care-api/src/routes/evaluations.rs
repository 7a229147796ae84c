//! # Evaluations API
//!
//! - **POST `/evaluations`** — Create a submitted evaluation or a draft (`isDraft`)
//! - **POST `/evaluations/drafts`** — Upsert the client's single draft
//! - **POST `/evaluations/:id/submit`** — Submit a draft and reschedule
//! - **PUT `/evaluations/:id`** — Amend a submitted evaluation
//! - **DELETE `/evaluations/:id`** — Delete a draft
//! - **GET `/evaluations/:id`** — Evaluation with its progress logs
//! - **GET `/evaluations/critical`** — Due within 7 days, overdue included
//! - **GET `/evaluations/scheduled`** — Due in 8 to 30 days
//! - **GET `/evaluations/recent`** — Latest submissions (`limit`, max 50)
//! - **GET `/clients/:id/evaluations`** — History of a client (paginated)
//! - **GET `/clients/:id/evaluations/last`** — Latest submission, or null
//! - **GET `/clients/:id/evaluations/draft`** — Current draft, or null

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use care_core::records::{
    ClientEvaluation, EvaluationDetail, EvaluationSummary, GoalProgressLog, UpcomingEvaluation,
};
use care_core::{GoalProgressStatus, Page};
use care_state::ProgressEntry;

use crate::auth::RequestContext;
use crate::db::{EvaluationOutcome, EvaluationUpdate};
use crate::extractors::{
    extract_id, extract_query, extract_validated_json, ok, ok_with_message, require_id,
    ApiResult, Validate,
};
use crate::middleware::pagination::Pagination;
use crate::middleware::rbac::guard;
use crate::services::evaluations::{self as service, EvaluationInput};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

/// One goal's progress within an evaluation.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressLogRequest {
    pub goal_id: String,
    pub status: GoalProgressStatus,
    pub notes: Option<String>,
}

impl From<ProgressLogRequest> for ProgressEntry {
    fn from(log: ProgressLogRequest) -> Self {
        ProgressEntry {
            goal_id: log.goal_id,
            status: log.status,
            notes: log.notes,
        }
    }
}

fn check_logs(logs: &[ProgressLogRequest]) -> Result<(), String> {
    logs.iter()
        .try_for_each(|log| require_id("progressLogs.goalId", &log.goal_id))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateEvaluationRequest {
    pub client_id: String,
    /// Defaults to the caller's employee profile.
    pub coordinator_id: Option<String>,
    pub evaluation_date: NaiveDate,
    pub overall_notes: Option<String>,
    #[serde(default)]
    pub progress_logs: Vec<ProgressLogRequest>,
    #[serde(default)]
    pub is_draft: bool,
}

impl Validate for CreateEvaluationRequest {
    fn validate(&self) -> Result<(), String> {
        require_id("clientId", &self.client_id)?;
        if let Some(id) = &self.coordinator_id {
            require_id("coordinatorId", id)?;
        }
        check_logs(&self.progress_logs)
    }
}

impl CreateEvaluationRequest {
    fn into_input(self) -> (EvaluationInput, bool) {
        let input = EvaluationInput {
            client_id: self.client_id,
            coordinator_id: self.coordinator_id,
            evaluation_date: self.evaluation_date,
            overall_notes: self.overall_notes,
            progress: self.progress_logs.into_iter().map(Into::into).collect(),
        };
        (input, self.is_draft)
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEvaluationRequest {
    pub evaluation_date: NaiveDate,
    pub overall_notes: Option<String>,
    #[serde(default)]
    pub progress_logs: Vec<ProgressLogRequest>,
}

impl Validate for UpdateEvaluationRequest {
    fn validate(&self) -> Result<(), String> {
        check_logs(&self.progress_logs)
    }
}

/// Evaluation, its logs and, once submitted, the client's next date.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResponse {
    pub evaluation: ClientEvaluation,
    pub progress_logs: Vec<GoalProgressLog>,
    pub next_evaluation_date: Option<NaiveDate>,
}

impl From<EvaluationOutcome> for EvaluationResponse {
    fn from(outcome: EvaluationOutcome) -> Self {
        Self {
            evaluation: outcome.detail.evaluation,
            progress_logs: outcome.detail.progress_logs,
            next_evaluation_date: outcome.next_evaluation_date,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DraftSaved {
    pub id: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RecentQuery {
    /// Default 10, at most 50.
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/evaluations", guard(post(create_evaluation), "evaluation", "create"))
        .route("/evaluations/drafts", guard(post(save_draft), "evaluation", "create"))
        .route("/evaluations/critical", guard(get(critical), "evaluation", "read"))
        .route("/evaluations/scheduled", guard(get(scheduled), "evaluation", "read"))
        .route("/evaluations/recent", guard(get(recent), "evaluation", "read"))
        .route("/evaluations/:id", guard(get(get_evaluation), "evaluation", "read"))
        .route("/evaluations/:id", guard(put(update_evaluation), "evaluation", "update"))
        .route("/evaluations/:id", guard(delete(delete_draft), "evaluation", "delete"))
        .route("/evaluations/:id/submit", guard(post(submit_draft), "evaluation", "update"))
        .route("/clients/:id/evaluations", guard(get(client_history), "evaluation", "read"))
        .route(
            "/clients/:id/evaluations/last",
            guard(get(client_last), "evaluation", "read"),
        )
        .route(
            "/clients/:id/evaluations/draft",
            guard(get(client_draft), "evaluation", "read"),
        )
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /evaluations — `CreateEvaluationTx`.
#[utoipa::path(
    post,
    path = "/evaluations",
    request_body = CreateEvaluationRequest,
    responses(
        (status = 200, description = "Evaluation created", body = EvaluationResponse),
        (status = 400, description = "Invalid progress logs", body = crate::error::ErrorBody),
        (status = 404, description = "Client not found", body = crate::error::ErrorBody),
        (status = 409, description = "Client already has a draft", body = crate::error::ErrorBody),
    ),
    tag = "evaluations"
)]
async fn create_evaluation(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: Result<Json<CreateEvaluationRequest>, JsonRejection>,
) -> ApiResult<EvaluationResponse> {
    let req = extract_validated_json(body)?;
    let (input, draft) = req.into_input();
    let outcome = service::create(&state.store, ctx.employee_id.as_deref(), input, draft).await?;
    ok(outcome.into())
}

/// POST /evaluations/drafts — `SaveDraftTx`.
#[utoipa::path(
    post,
    path = "/evaluations/drafts",
    request_body = CreateEvaluationRequest,
    responses(
        (status = 200, description = "Draft saved", body = DraftSaved),
        (status = 404, description = "Client not found", body = crate::error::ErrorBody),
    ),
    tag = "evaluations"
)]
async fn save_draft(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: Result<Json<CreateEvaluationRequest>, JsonRejection>,
) -> ApiResult<DraftSaved> {
    let req = extract_validated_json(body)?;
    let (input, _) = req.into_input();
    let draft = service::save_draft(&state.store, ctx.employee_id.as_deref(), input).await?;
    ok_with_message(
        DraftSaved {
            id: draft.id,
            updated_at: draft.updated_at,
        },
        "draft saved",
    )
}

/// POST /evaluations/:id/submit — `SubmitDraftTx`.
#[utoipa::path(
    post,
    path = "/evaluations/{id}/submit",
    params(("id" = String, Path, description = "Draft evaluation ID")),
    responses(
        (status = 200, description = "Draft submitted", body = EvaluationResponse),
        (status = 404, description = "Draft not found", body = crate::error::ErrorBody),
    ),
    tag = "evaluations"
)]
async fn submit_draft(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<EvaluationResponse> {
    let id = extract_id(id)?;
    let outcome = service::submit_draft(&state.store, &id).await?;
    ok_with_message(outcome.into(), "evaluation submitted")
}

/// PUT /evaluations/:id — `UpdateEvaluationTx`; the schedule is kept.
#[utoipa::path(
    put,
    path = "/evaluations/{id}",
    params(("id" = String, Path, description = "Evaluation ID")),
    request_body = UpdateEvaluationRequest,
    responses(
        (status = 200, description = "Evaluation updated", body = EvaluationDetail),
        (status = 400, description = "Evaluation is a draft or logs are invalid", body = crate::error::ErrorBody),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "evaluations"
)]
async fn update_evaluation(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    body: Result<Json<UpdateEvaluationRequest>, JsonRejection>,
) -> ApiResult<EvaluationDetail> {
    let id = extract_id(id)?;
    let req = extract_validated_json(body)?;
    let update = EvaluationUpdate {
        evaluation_date: req.evaluation_date,
        overall_notes: req.overall_notes,
        progress: req.progress_logs.into_iter().map(Into::into).collect(),
    };
    ok(service::update(&state.store, &id, update).await?)
}

/// DELETE /evaluations/:id — `DeleteDraftTx`; submitted evaluations stay.
#[utoipa::path(
    delete,
    path = "/evaluations/{id}",
    params(("id" = String, Path, description = "Draft evaluation ID")),
    responses(
        (status = 200, description = "Draft deleted"),
        (status = 400, description = "Evaluation is not a draft", body = crate::error::ErrorBody),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "evaluations"
)]
async fn delete_draft(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<()> {
    let id = extract_id(id)?;
    service::delete_draft(&state.store, &id).await?;
    ok_with_message((), "draft deleted")
}

/// GET /evaluations/:id
#[utoipa::path(
    get,
    path = "/evaluations/{id}",
    params(("id" = String, Path, description = "Evaluation ID")),
    responses(
        (status = 200, description = "Evaluation found", body = EvaluationDetail),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "evaluations"
)]
async fn get_evaluation(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<EvaluationDetail> {
    let id = extract_id(id)?;
    ok(service::get(&state.store, &id).await?)
}

/// GET /evaluations/critical
#[utoipa::path(
    get,
    path = "/evaluations/critical",
    responses((status = 200, description = "Clients due within 7 days", body = [UpcomingEvaluation])),
    tag = "evaluations"
)]
async fn critical(State(state): State<AppState>) -> ApiResult<Vec<UpcomingEvaluation>> {
    ok(service::critical(&state.store, today()).await?)
}

/// GET /evaluations/scheduled
#[utoipa::path(
    get,
    path = "/evaluations/scheduled",
    responses((status = 200, description = "Clients due in 8 to 30 days", body = [UpcomingEvaluation])),
    tag = "evaluations"
)]
async fn scheduled(State(state): State<AppState>) -> ApiResult<Vec<UpcomingEvaluation>> {
    ok(service::scheduled(&state.store, today()).await?)
}

/// GET /evaluations/recent
#[utoipa::path(
    get,
    path = "/evaluations/recent",
    params(RecentQuery),
    responses((status = 200, description = "Latest submitted evaluations", body = [EvaluationSummary])),
    tag = "evaluations"
)]
async fn recent(
    State(state): State<AppState>,
    query: Result<Query<RecentQuery>, QueryRejection>,
) -> ApiResult<Vec<EvaluationSummary>> {
    let query = extract_query(query)?;
    ok(service::recent(&state.store, query.limit).await?)
}

/// GET /clients/:id/evaluations
#[utoipa::path(
    get,
    path = "/clients/{id}/evaluations",
    params(
        ("id" = String, Path, description = "Client ID"),
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("page_size" = Option<i64>, Query, description = "Page size, default 10, max 100"),
    ),
    responses(
        (status = 200, description = "One page of the client's evaluations", body = [ClientEvaluation]),
        (status = 404, description = "Client not found", body = crate::error::ErrorBody),
    ),
    tag = "evaluations"
)]
async fn client_history(
    State(state): State<AppState>,
    Pagination(page): Pagination,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<Page<ClientEvaluation>> {
    let id = extract_id(id)?;
    ok(service::history(&state.store, &id, page).await?)
}

/// GET /clients/:id/evaluations/last
#[utoipa::path(
    get,
    path = "/clients/{id}/evaluations/last",
    params(("id" = String, Path, description = "Client ID")),
    responses(
        (status = 200, description = "Latest submitted evaluation, null when none", body = EvaluationDetail),
        (status = 404, description = "Client not found", body = crate::error::ErrorBody),
    ),
    tag = "evaluations"
)]
async fn client_last(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<Option<EvaluationDetail>> {
    let id = extract_id(id)?;
    ok(service::last(&state.store, &id).await?)
}

/// GET /clients/:id/evaluations/draft
#[utoipa::path(
    get,
    path = "/clients/{id}/evaluations/draft",
    params(("id" = String, Path, description = "Client ID")),
    responses(
        (status = 200, description = "Current draft, null when none", body = EvaluationDetail),
        (status = 404, description = "Client not found", body = crate::error::ErrorBody),
    ),
    tag = "evaluations"
)]
async fn client_draft(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<Option<EvaluationDetail>> {
    let id = extract_id(id)?;
    ok(service::current_draft(&state.store, &id).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_defaults_to_submitted() {
        let goal = care_core::new_id();
        let req: CreateEvaluationRequest = serde_json::from_value(serde_json::json!({
            "clientId": care_core::new_id(),
            "evaluationDate": "2024-03-01",
            "progressLogs": [{"goalId": goal, "status": "on_track", "notes": "steady"}],
        }))
        .unwrap();
        assert!(req.validate().is_ok());
        let (input, draft) = req.into_input();
        assert!(!draft);
        assert_eq!(input.progress.len(), 1);
        assert_eq!(input.progress[0].goal_id, goal);
        assert_eq!(input.progress[0].status, GoalProgressStatus::OnTrack);
    }

    #[test]
    fn malformed_goal_ids_are_rejected() {
        let req: CreateEvaluationRequest = serde_json::from_value(serde_json::json!({
            "clientId": care_core::new_id(),
            "evaluationDate": "2024-03-01",
            "progressLogs": [{"goalId": "nope", "status": "delayed"}],
            "isDraft": true,
        }))
        .unwrap();
        assert!(req.validate().is_err());
    }
}
