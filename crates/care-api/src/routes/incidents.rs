//! # Incidents API
//!
//! - **POST `/incidents`** — Report an incident (status `pending`)
//! - **GET `/incidents`** — List incidents, optionally for one `client_id`
//! - **GET/PUT/DELETE `/incidents/:id`** — Read, update, soft-delete

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use care_core::records::Incident;
use care_core::{new_id, now_micros, IncidentSeverity, IncidentStatus, IncidentType, Page};

use crate::auth::RequestContext;
use crate::error::AppError;
use crate::extractors::{
    created, extract_id, extract_query, extract_validated_json, ok, ok_with_message, require_id,
    require_non_blank, ApiResult, Validate,
};
use crate::middleware::pagination::Pagination;
use crate::middleware::rbac::guard;
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateIncidentRequest {
    pub client_id: String,
    pub incident_date: NaiveDate,
    #[serde(with = "care_core::temporal::time_of_day")]
    #[schema(value_type = String, example = "14:05:00")]
    pub incident_time: NaiveTime,
    pub incident_type: IncidentType,
    pub severity: IncidentSeverity,
    pub location_id: String,
    /// Defaults to the reporting employee.
    pub coordinator_id: Option<String>,
    pub description: String,
    pub action_taken: String,
    pub other_parties: Option<String>,
}

impl Validate for CreateIncidentRequest {
    fn validate(&self) -> Result<(), String> {
        require_id("clientId", &self.client_id)?;
        require_id("locationId", &self.location_id)?;
        if let Some(id) = &self.coordinator_id {
            require_id("coordinatorId", id)?;
        }
        require_non_blank("description", &self.description)?;
        require_non_blank("actionTaken", &self.action_taken)
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateIncidentRequest {
    pub incident_date: Option<NaiveDate>,
    #[serde(default, with = "care_core::temporal::time_of_day::option")]
    #[schema(value_type = Option<String>, example = "14:05:00")]
    pub incident_time: Option<NaiveTime>,
    pub incident_type: Option<IncidentType>,
    pub severity: Option<IncidentSeverity>,
    pub location_id: Option<String>,
    pub coordinator_id: Option<String>,
    pub description: Option<String>,
    pub action_taken: Option<String>,
    pub other_parties: Option<String>,
    pub status: Option<IncidentStatus>,
}

impl Validate for UpdateIncidentRequest {
    fn validate(&self) -> Result<(), String> {
        if let Some(id) = &self.location_id {
            require_id("locationId", id)?;
        }
        if let Some(id) = &self.coordinator_id {
            require_id("coordinatorId", id)?;
        }
        if let Some(v) = &self.description {
            require_non_blank("description", v)?;
        }
        if let Some(v) = &self.action_taken {
            require_non_blank("actionTaken", v)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct IncidentQuery {
    /// Only incidents of this client.
    pub client_id: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/incidents", guard(post(create_incident), "incident", "create"))
        .route("/incidents", guard(get(list_incidents), "incident", "read"))
        .route("/incidents/:id", guard(get(get_incident), "incident", "read"))
        .route("/incidents/:id", guard(put(update_incident), "incident", "update"))
        .route("/incidents/:id", guard(delete(delete_incident), "incident", "delete"))
}

async fn load(state: &AppState, id: &str) -> Result<Incident, AppError> {
    state
        .store
        .incident(id)
        .await?
        .ok_or_else(|| AppError::NotFound("incident".into()))
}

/// POST /incidents
#[utoipa::path(
    post,
    path = "/incidents",
    request_body = CreateIncidentRequest,
    responses(
        (status = 201, description = "Incident reported", body = Incident),
        (status = 400, description = "Validation error or unknown reference", body = crate::error::ErrorBody),
    ),
    tag = "incidents"
)]
async fn create_incident(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: Result<Json<CreateIncidentRequest>, JsonRejection>,
) -> ApiResult<Incident> {
    let req = extract_validated_json(body)?;
    let coordinator_id = req
        .coordinator_id
        .or(ctx.employee_id)
        .ok_or_else(|| {
            AppError::Validation(
                "coordinatorId is required when the caller has no employee profile".into(),
            )
        })?;
    let now = now_micros();
    let incident = Incident {
        id: new_id(),
        client_id: req.client_id,
        incident_date: req.incident_date,
        incident_time: req.incident_time,
        incident_type: req.incident_type,
        severity: req.severity,
        location_id: req.location_id,
        coordinator_id,
        description: req.description,
        action_taken: req.action_taken,
        other_parties: req.other_parties,
        status: IncidentStatus::Pending,
        deleted_at: None,
        created_at: now,
        updated_at: now,
    };
    let incident = state.store.insert_incident(incident).await?;
    tracing::info!(
        incident_id = %incident.id,
        client_id = %incident.client_id,
        severity = %incident.severity,
        "incident reported"
    );
    created(incident)
}

/// GET /incidents
#[utoipa::path(
    get,
    path = "/incidents",
    params(
        IncidentQuery,
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("page_size" = Option<i64>, Query, description = "Page size, default 10, max 100"),
    ),
    responses((status = 200, description = "One page of incidents", body = [Incident])),
    tag = "incidents"
)]
async fn list_incidents(
    State(state): State<AppState>,
    Pagination(page): Pagination,
    query: Result<Query<IncidentQuery>, QueryRejection>,
) -> ApiResult<Page<Incident>> {
    let query = extract_query(query)?;
    let client_id = query.client_id.filter(|id| !id.trim().is_empty());
    ok(state.store.list_incidents(client_id, page).await?)
}

/// GET /incidents/:id
#[utoipa::path(
    get,
    path = "/incidents/{id}",
    params(("id" = String, Path, description = "Incident ID")),
    responses(
        (status = 200, description = "Incident found", body = Incident),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "incidents"
)]
async fn get_incident(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<Incident> {
    let id = extract_id(id)?;
    ok(load(&state, &id).await?)
}

/// PUT /incidents/:id
#[utoipa::path(
    put,
    path = "/incidents/{id}",
    params(("id" = String, Path, description = "Incident ID")),
    request_body = UpdateIncidentRequest,
    responses(
        (status = 200, description = "Incident updated", body = Incident),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "incidents"
)]
async fn update_incident(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    body: Result<Json<UpdateIncidentRequest>, JsonRejection>,
) -> ApiResult<Incident> {
    let id = extract_id(id)?;
    let req = extract_validated_json(body)?;
    let mut incident = load(&state, &id).await?;
    if let Some(v) = req.incident_date {
        incident.incident_date = v;
    }
    if let Some(v) = req.incident_time {
        incident.incident_time = v;
    }
    if let Some(v) = req.incident_type {
        incident.incident_type = v;
    }
    if let Some(v) = req.severity {
        incident.severity = v;
    }
    if let Some(v) = req.location_id {
        incident.location_id = v;
    }
    if let Some(v) = req.coordinator_id {
        incident.coordinator_id = v;
    }
    if let Some(v) = req.description {
        incident.description = v;
    }
    if let Some(v) = req.action_taken {
        incident.action_taken = v;
    }
    if req.other_parties.is_some() {
        incident.other_parties = req.other_parties;
    }
    if let Some(v) = req.status {
        incident.status = v;
    }
    incident.updated_at = now_micros();
    ok(state.store.update_incident(incident).await?)
}

/// DELETE /incidents/:id — Soft-delete.
#[utoipa::path(
    delete,
    path = "/incidents/{id}",
    params(("id" = String, Path, description = "Incident ID")),
    responses(
        (status = 200, description = "Incident deleted"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "incidents"
)]
async fn delete_incident(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<()> {
    let id = extract_id(id)?;
    state.store.delete_incident(&id, now_micros()).await?;
    ok_with_message((), "incident deleted")
}
