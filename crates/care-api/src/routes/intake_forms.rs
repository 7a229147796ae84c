//! # Intake Forms API
//!
//! - **POST `/intake-forms`** — Record the intake for a registration
//! - **GET `/intake-forms`** — List intakes (paginated)
//! - **GET/PUT `/intake-forms/:id`** — Read or update an intake
//! - **GET/POST `/intake-forms/:id/goals`** — Goals agreed at intake
//! - **DELETE `/intake-forms/:id/goals/:goal_id`** — Drop an unused goal
//!
//! Intakes are never deleted; promotion to the waiting list flips them to
//! `completed`.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use utoipa::ToSchema;

use care_core::records::{ClientGoal, IntakeForm};
use care_core::{new_id, now_micros, IntakeStatus, Page};

use crate::error::AppError;
use crate::extractors::{
    created, extract_id, extract_id_pair, extract_validated_json, ok, ok_with_message, require_id,
    require_non_blank, ApiResult, Validate,
};
use crate::middleware::pagination::Pagination;
use crate::middleware::rbac::guard;
use crate::state::AppState;

/// Weeks between evaluations when the intake leaves it open.
pub const DEFAULT_EVALUATION_INTERVAL_WEEKS: i32 = 5;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntakeRequest {
    pub registration_form_id: String,
    pub intake_date: NaiveDate,
    #[serde(with = "care_core::temporal::time_of_day")]
    #[schema(value_type = String, example = "09:30:00")]
    pub intake_time: NaiveTime,
    pub location_id: String,
    pub coordinator_id: String,
    pub family_situation: Option<String>,
    pub main_provider: Option<String>,
    pub limitations: Option<String>,
    pub focus_areas: Option<String>,
    pub notes: Option<String>,
    pub evaluation_interval_weeks: Option<i32>,
}

impl Validate for CreateIntakeRequest {
    fn validate(&self) -> Result<(), String> {
        require_id("registrationFormId", &self.registration_form_id)?;
        require_id("locationId", &self.location_id)?;
        require_id("coordinatorId", &self.coordinator_id)?;
        check_interval(self.evaluation_interval_weeks)
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateIntakeRequest {
    pub intake_date: Option<NaiveDate>,
    #[serde(default, with = "care_core::temporal::time_of_day::option")]
    #[schema(value_type = Option<String>, example = "09:30:00")]
    pub intake_time: Option<NaiveTime>,
    pub location_id: Option<String>,
    pub coordinator_id: Option<String>,
    pub family_situation: Option<String>,
    pub main_provider: Option<String>,
    pub limitations: Option<String>,
    pub focus_areas: Option<String>,
    pub notes: Option<String>,
    pub evaluation_interval_weeks: Option<i32>,
}

impl Validate for UpdateIntakeRequest {
    fn validate(&self) -> Result<(), String> {
        if let Some(id) = &self.location_id {
            require_id("locationId", id)?;
        }
        if let Some(id) = &self.coordinator_id {
            require_id("coordinatorId", id)?;
        }
        check_interval(self.evaluation_interval_weeks)
    }
}

fn check_interval(weeks: Option<i32>) -> Result<(), String> {
    match weeks {
        Some(w) if w < 1 => Err("evaluationIntervalWeeks must be at least 1".into()),
        _ => Ok(()),
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateGoalRequest {
    pub title: String,
    pub description: Option<String>,
}

impl Validate for CreateGoalRequest {
    fn validate(&self) -> Result<(), String> {
        require_non_blank("title", &self.title)
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/intake-forms", guard(post(create_intake), "intake_form", "create"))
        .route("/intake-forms", guard(get(list_intakes), "intake_form", "read"))
        .route("/intake-forms/:id", guard(get(get_intake), "intake_form", "read"))
        .route("/intake-forms/:id", guard(put(update_intake), "intake_form", "update"))
        .route("/intake-forms/:id/goals", guard(get(list_goals), "intake_form", "read"))
        .route("/intake-forms/:id/goals", guard(post(add_goal), "intake_form", "update"))
        .route(
            "/intake-forms/:id/goals/:goal_id",
            guard(delete(delete_goal), "intake_form", "update"),
        )
}

async fn load(state: &AppState, id: &str) -> Result<IntakeForm, AppError> {
    state
        .store
        .intake_form(id)
        .await?
        .ok_or_else(|| AppError::NotFound("intake form".into()))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /intake-forms — One intake per registration.
#[utoipa::path(
    post,
    path = "/intake-forms",
    request_body = CreateIntakeRequest,
    responses(
        (status = 201, description = "Intake created", body = IntakeForm),
        (status = 400, description = "Validation error or unknown reference", body = crate::error::ErrorBody),
        (status = 409, description = "Registration already has an intake", body = crate::error::ErrorBody),
    ),
    tag = "intake-forms"
)]
async fn create_intake(
    State(state): State<AppState>,
    body: Result<Json<CreateIntakeRequest>, JsonRejection>,
) -> ApiResult<IntakeForm> {
    let req = extract_validated_json(body)?;
    let now = now_micros();
    let form = IntakeForm {
        id: new_id(),
        registration_form_id: req.registration_form_id,
        intake_date: req.intake_date,
        intake_time: req.intake_time,
        location_id: req.location_id,
        coordinator_id: req.coordinator_id,
        family_situation: req.family_situation,
        main_provider: req.main_provider,
        limitations: req.limitations,
        focus_areas: req.focus_areas,
        notes: req.notes,
        evaluation_interval_weeks: req
            .evaluation_interval_weeks
            .unwrap_or(DEFAULT_EVALUATION_INTERVAL_WEEKS),
        status: IntakeStatus::Pending,
        created_at: now,
        updated_at: now,
    };
    created(state.store.insert_intake_form(form).await?)
}

/// GET /intake-forms
#[utoipa::path(
    get,
    path = "/intake-forms",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("page_size" = Option<i64>, Query, description = "Page size, default 10, max 100"),
    ),
    responses((status = 200, description = "One page of intakes", body = [IntakeForm])),
    tag = "intake-forms"
)]
async fn list_intakes(
    State(state): State<AppState>,
    Pagination(page): Pagination,
) -> ApiResult<Page<IntakeForm>> {
    ok(state.store.list_intake_forms(page).await?)
}

/// GET /intake-forms/:id
#[utoipa::path(
    get,
    path = "/intake-forms/{id}",
    params(("id" = String, Path, description = "Intake form ID")),
    responses(
        (status = 200, description = "Intake found", body = IntakeForm),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "intake-forms"
)]
async fn get_intake(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<IntakeForm> {
    let id = extract_id(id)?;
    ok(load(&state, &id).await?)
}

/// PUT /intake-forms/:id
#[utoipa::path(
    put,
    path = "/intake-forms/{id}",
    params(("id" = String, Path, description = "Intake form ID")),
    request_body = UpdateIntakeRequest,
    responses(
        (status = 200, description = "Intake updated", body = IntakeForm),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "intake-forms"
)]
async fn update_intake(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    body: Result<Json<UpdateIntakeRequest>, JsonRejection>,
) -> ApiResult<IntakeForm> {
    let id = extract_id(id)?;
    let req = extract_validated_json(body)?;
    let mut form = load(&state, &id).await?;
    if let Some(v) = req.intake_date {
        form.intake_date = v;
    }
    if let Some(v) = req.intake_time {
        form.intake_time = v;
    }
    if let Some(v) = req.location_id {
        form.location_id = v;
    }
    if let Some(v) = req.coordinator_id {
        form.coordinator_id = v;
    }
    if req.family_situation.is_some() {
        form.family_situation = req.family_situation;
    }
    if req.main_provider.is_some() {
        form.main_provider = req.main_provider;
    }
    if req.limitations.is_some() {
        form.limitations = req.limitations;
    }
    if req.focus_areas.is_some() {
        form.focus_areas = req.focus_areas;
    }
    if req.notes.is_some() {
        form.notes = req.notes;
    }
    if let Some(v) = req.evaluation_interval_weeks {
        form.evaluation_interval_weeks = v;
    }
    form.updated_at = now_micros();
    ok(state.store.update_intake_form(form).await?)
}

/// GET /intake-forms/:id/goals
#[utoipa::path(
    get,
    path = "/intake-forms/{id}/goals",
    params(("id" = String, Path, description = "Intake form ID")),
    responses(
        (status = 200, description = "Goals of the intake", body = [ClientGoal]),
        (status = 404, description = "Intake not found", body = crate::error::ErrorBody),
    ),
    tag = "intake-forms"
)]
async fn list_goals(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<Vec<ClientGoal>> {
    let id = extract_id(id)?;
    load(&state, &id).await?;
    ok(state.store.intake_goals(&id).await?)
}

/// POST /intake-forms/:id/goals — Goals added after promotion are linked
/// to the client as well.
#[utoipa::path(
    post,
    path = "/intake-forms/{id}/goals",
    params(("id" = String, Path, description = "Intake form ID")),
    request_body = CreateGoalRequest,
    responses(
        (status = 201, description = "Goal added", body = ClientGoal),
        (status = 404, description = "Intake not found", body = crate::error::ErrorBody),
    ),
    tag = "intake-forms"
)]
async fn add_goal(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    body: Result<Json<CreateGoalRequest>, JsonRejection>,
) -> ApiResult<ClientGoal> {
    let id = extract_id(id)?;
    let req = extract_validated_json(body)?;
    load(&state, &id).await?;
    let now = now_micros();
    let goal = ClientGoal {
        id: new_id(),
        intake_form_id: id,
        client_id: None,
        title: req.title.trim().to_string(),
        description: req.description,
        created_at: now,
        updated_at: now,
    };
    created(state.store.insert_goal(goal).await?)
}

/// DELETE /intake-forms/:id/goals/:goal_id — Refused once progress was
/// logged against the goal.
#[utoipa::path(
    delete,
    path = "/intake-forms/{id}/goals/{goal_id}",
    params(
        ("id" = String, Path, description = "Intake form ID"),
        ("goal_id" = String, Path, description = "Goal ID"),
    ),
    responses(
        (status = 200, description = "Goal deleted"),
        (status = 400, description = "Goal has progress logs", body = crate::error::ErrorBody),
        (status = 404, description = "Goal not found", body = crate::error::ErrorBody),
    ),
    tag = "intake-forms"
)]
async fn delete_goal(
    State(state): State<AppState>,
    ids: Result<Path<(String, String)>, PathRejection>,
) -> ApiResult<()> {
    let (intake_id, goal_id) = extract_id_pair(ids)?;
    state.store.delete_goal(&intake_id, &goal_id).await?;
    ok_with_message((), "goal deleted")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_must_be_positive() {
        assert!(check_interval(None).is_ok());
        assert!(check_interval(Some(5)).is_ok());
        assert!(check_interval(Some(0)).is_err());
    }

    #[test]
    fn intake_time_accepts_seconds_precision() {
        let req: CreateIntakeRequest = serde_json::from_value(serde_json::json!({
            "registrationFormId": care_core::new_id(),
            "intakeDate": "2024-03-01",
            "intakeTime": "09:30:00",
            "locationId": care_core::new_id(),
            "coordinatorId": care_core::new_id(),
        }))
        .unwrap();
        assert_eq!(req.intake_time, NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        assert!(req.validate().is_ok());
        assert_eq!(req.evaluation_interval_weeks, None);
    }
}
