//! # Clients API
//!
//! Lifecycle endpoints. Each command runs one named datastore transaction
//! with the client row locked:
//!
//! - **POST `/clients/move-to-waiting-list`** — Promote an intake to a client
//! - **GET `/clients`** — List clients, filtered by `status` and `search`
//! - **GET `/clients/:id`** — Get a client
//! - **GET `/clients/:id/goals`** — Goals linked to the client
//! - **POST `/clients/:id/move-to-care`** — `waiting_list → in_care`
//! - **POST `/clients/:id/start-discharge`** — Open a discharge
//! - **POST `/clients/:id/complete-discharge`** — `in_care → discharged`
//! - **PATCH `/clients/:id/priority`** — Reprioritize a waiting client

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use care_core::records::{Client, ClientGoal};
use care_core::{ClientStatus, DischargeReason, Page, WaitingListPriority};
use care_state::{CompleteDischarge, MoveToCare, StartDischarge};

use crate::db::{ClientFilter, ClientTransition};
use crate::extractors::{
    extract_id, extract_json, extract_query, extract_validated_json, ok, ok_with_message,
    require_id, require_non_blank, ApiResult, Validate,
};
use crate::middleware::pagination::Pagination;
use crate::middleware::rbac::guard;
use crate::services::clients as service;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MoveToWaitingListRequest {
    pub intake_form_id: String,
    pub waiting_list_priority: WaitingListPriority,
}

impl Validate for MoveToWaitingListRequest {
    fn validate(&self) -> Result<(), String> {
        require_id("intakeFormId", &self.intake_form_id)
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MoveToCareRequest {
    pub care_start_date: NaiveDate,
    pub care_end_date: Option<NaiveDate>,
    /// Required for ambulatory care, rejected otherwise.
    pub ambulatory_weekly_hours: Option<i32>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartDischargeRequest {
    pub discharge_date: NaiveDate,
    #[serde(alias = "reasonForDischarge")]
    pub discharge_reason: DischargeReason,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CompleteDischargeRequest {
    pub closing_report: String,
    pub evaluation_report: String,
    #[serde(default)]
    pub attachment_ids: Vec<String>,
}

impl Validate for CompleteDischargeRequest {
    fn validate(&self) -> Result<(), String> {
        require_non_blank("closingReport", &self.closing_report)?;
        require_non_blank("evaluationReport", &self.evaluation_report)?;
        self.attachment_ids
            .iter()
            .try_for_each(|id| require_id("attachmentIds", id))
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePriorityRequest {
    pub waiting_list_priority: WaitingListPriority,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WaitingListPlacement {
    pub client_id: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ClientQuery {
    /// Only clients in this status.
    pub status: Option<ClientStatus>,
    /// Case-insensitive match on first name, last name or BSN.
    pub search: Option<String>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/clients/move-to-waiting-list",
            guard(post(move_to_waiting_list), "client", "create"),
        )
        .route("/clients", guard(get(list_clients), "client", "read"))
        .route("/clients/:id", guard(get(get_client), "client", "read"))
        .route("/clients/:id/goals", guard(get(client_goals), "client", "read"))
        .route(
            "/clients/:id/move-to-care",
            guard(post(move_to_care), "client", "update"),
        )
        .route(
            "/clients/:id/start-discharge",
            guard(post(start_discharge), "client", "update"),
        )
        .route(
            "/clients/:id/complete-discharge",
            guard(post(complete_discharge), "client", "update"),
        )
        .route(
            "/clients/:id/priority",
            guard(patch(update_priority), "client", "update"),
        )
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /clients/move-to-waiting-list — `MoveClientToWaitingListTx`.
#[utoipa::path(
    post,
    path = "/clients/move-to-waiting-list",
    request_body = MoveToWaitingListRequest,
    responses(
        (status = 200, description = "Client created on the waiting list", body = WaitingListPlacement),
        (status = 404, description = "Intake or registration not found", body = crate::error::ErrorBody),
        (status = 409, description = "Intake already promoted", body = crate::error::ErrorBody),
    ),
    tag = "clients"
)]
async fn move_to_waiting_list(
    State(state): State<AppState>,
    body: Result<Json<MoveToWaitingListRequest>, JsonRejection>,
) -> ApiResult<WaitingListPlacement> {
    let req = extract_validated_json(body)?;
    let client =
        service::move_to_waiting_list(&state.store, &req.intake_form_id, req.waiting_list_priority)
            .await?;
    ok_with_message(
        WaitingListPlacement { client_id: client.id },
        "client moved to waiting list",
    )
}

/// GET /clients — List clients.
#[utoipa::path(
    get,
    path = "/clients",
    params(
        ClientQuery,
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("page_size" = Option<i64>, Query, description = "Page size, default 10, max 100"),
    ),
    responses((status = 200, description = "One page of clients", body = [Client])),
    tag = "clients"
)]
async fn list_clients(
    State(state): State<AppState>,
    Pagination(page): Pagination,
    query: Result<Query<ClientQuery>, QueryRejection>,
) -> ApiResult<Page<Client>> {
    let query = extract_query(query)?;
    let filter = ClientFilter {
        status: query.status,
        search: query.search,
    };
    ok(service::list(&state.store, filter, page).await?)
}

/// GET /clients/:id
#[utoipa::path(
    get,
    path = "/clients/{id}",
    params(("id" = String, Path, description = "Client ID")),
    responses(
        (status = 200, description = "Client found", body = Client),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "clients"
)]
async fn get_client(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<Client> {
    let id = extract_id(id)?;
    ok(service::get(&state.store, &id).await?)
}

/// GET /clients/:id/goals
#[utoipa::path(
    get,
    path = "/clients/{id}/goals",
    params(("id" = String, Path, description = "Client ID")),
    responses(
        (status = 200, description = "Goals of the client", body = [ClientGoal]),
        (status = 404, description = "Client not found", body = crate::error::ErrorBody),
    ),
    tag = "clients"
)]
async fn client_goals(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<Vec<ClientGoal>> {
    let id = extract_id(id)?;
    ok(service::goals(&state.store, &id).await?)
}

/// POST /clients/:id/move-to-care — `MoveClientToCareTx`.
#[utoipa::path(
    post,
    path = "/clients/{id}/move-to-care",
    params(("id" = String, Path, description = "Client ID")),
    request_body = MoveToCareRequest,
    responses(
        (status = 200, description = "Client in care", body = Client),
        (status = 400, description = "Invalid status or ambulatory hours", body = crate::error::ErrorBody),
        (status = 404, description = "Client not found", body = crate::error::ErrorBody),
    ),
    tag = "clients"
)]
async fn move_to_care(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    body: Result<Json<MoveToCareRequest>, JsonRejection>,
) -> ApiResult<Client> {
    let id = extract_id(id)?;
    let req = extract_json(body)?;
    let transition = ClientTransition::MoveToCare(MoveToCare {
        care_start_date: req.care_start_date,
        care_end_date: req.care_end_date,
        ambulatory_weekly_hours: req.ambulatory_weekly_hours,
    });
    let client = service::transition(&state.store, &id, transition).await?;
    ok_with_message(client, "client moved to care")
}

/// POST /clients/:id/start-discharge — `StartDischargeTx`.
#[utoipa::path(
    post,
    path = "/clients/{id}/start-discharge",
    params(("id" = String, Path, description = "Client ID")),
    request_body = StartDischargeRequest,
    responses(
        (status = 200, description = "Discharge in progress", body = Client),
        (status = 400, description = "Client not in care or discharge already started", body = crate::error::ErrorBody),
        (status = 404, description = "Client not found", body = crate::error::ErrorBody),
    ),
    tag = "clients"
)]
async fn start_discharge(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    body: Result<Json<StartDischargeRequest>, JsonRejection>,
) -> ApiResult<Client> {
    let id = extract_id(id)?;
    let req = extract_json(body)?;
    let transition = ClientTransition::StartDischarge(StartDischarge {
        discharge_date: req.discharge_date,
        reason: req.discharge_reason,
    });
    let client = service::transition(&state.store, &id, transition).await?;
    ok_with_message(client, "discharge started")
}

/// POST /clients/:id/complete-discharge — `CompleteDischargeTx`.
#[utoipa::path(
    post,
    path = "/clients/{id}/complete-discharge",
    params(("id" = String, Path, description = "Client ID")),
    request_body = CompleteDischargeRequest,
    responses(
        (status = 200, description = "Client discharged", body = Client),
        (status = 400, description = "Discharge not started or empty report", body = crate::error::ErrorBody),
        (status = 404, description = "Client not found", body = crate::error::ErrorBody),
    ),
    tag = "clients"
)]
async fn complete_discharge(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    body: Result<Json<CompleteDischargeRequest>, JsonRejection>,
) -> ApiResult<Client> {
    let id = extract_id(id)?;
    let req = extract_validated_json(body)?;
    let transition = ClientTransition::CompleteDischarge(CompleteDischarge {
        closing_report: req.closing_report,
        evaluation_report: req.evaluation_report,
        attachment_ids: req.attachment_ids,
    });
    let client = service::transition(&state.store, &id, transition).await?;
    ok_with_message(client, "client discharged")
}

/// PATCH /clients/:id/priority — Waiting-list clients only.
#[utoipa::path(
    patch,
    path = "/clients/{id}/priority",
    params(("id" = String, Path, description = "Client ID")),
    request_body = UpdatePriorityRequest,
    responses(
        (status = 200, description = "Priority updated", body = Client),
        (status = 400, description = "Client not on the waiting list", body = crate::error::ErrorBody),
        (status = 404, description = "Client not found", body = crate::error::ErrorBody),
    ),
    tag = "clients"
)]
async fn update_priority(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    body: Result<Json<UpdatePriorityRequest>, JsonRejection>,
) -> ApiResult<Client> {
    let id = extract_id(id)?;
    let req = extract_json(body)?;
    let transition = ClientTransition::Priority(req.waiting_list_priority);
    ok(service::transition(&state.store, &id, transition).await?)
}
