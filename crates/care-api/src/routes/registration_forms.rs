//! # Registration Forms API
//!
//! - **POST `/registration-forms`** — File a registration (status `pending`)
//! - **GET `/registration-forms`** — List, optionally filtered by `status`
//! - **GET/PUT/DELETE `/registration-forms/:id`** — Read, update, soft-delete
//! - **PATCH `/registration-forms/:id/status`** — Move through review

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, patch, post, put};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

use care_core::records::RegistrationForm;
use care_core::{new_id, now_micros, CareType, Gender, Page, RegistrationStatus};

use crate::error::AppError;
use crate::extractors::{
    created, extract_id, extract_json, extract_query, extract_validated_json, ok, ok_with_message,
    require_bsn, require_id, require_non_blank, ApiResult, Validate,
};
use crate::middleware::pagination::Pagination;
use crate::middleware::rbac::guard;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateRegistrationRequest {
    pub first_name: String,
    pub last_name: String,
    pub bsn: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub referring_org_id: Option<String>,
    pub care_type: CareType,
    pub registration_date: NaiveDate,
    pub reason: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub attachment_ids: Vec<String>,
}

impl Validate for CreateRegistrationRequest {
    fn validate(&self) -> Result<(), String> {
        require_non_blank("firstName", &self.first_name)?;
        require_non_blank("lastName", &self.last_name)?;
        require_bsn("bsn", &self.bsn)?;
        if let Some(org) = &self.referring_org_id {
            require_id("referringOrgId", org)?;
        }
        check_attachments(&self.attachment_ids)
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRegistrationRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bsn: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub referring_org_id: Option<String>,
    pub care_type: Option<CareType>,
    pub registration_date: Option<NaiveDate>,
    pub reason: Option<String>,
    pub notes: Option<String>,
    /// Replaces the attachment list whole.
    pub attachment_ids: Option<Vec<String>>,
}

impl Validate for UpdateRegistrationRequest {
    fn validate(&self) -> Result<(), String> {
        if let Some(v) = &self.first_name {
            require_non_blank("firstName", v)?;
        }
        if let Some(v) = &self.last_name {
            require_non_blank("lastName", v)?;
        }
        if let Some(v) = &self.bsn {
            require_bsn("bsn", v)?;
        }
        if let Some(org) = &self.referring_org_id {
            require_id("referringOrgId", org)?;
        }
        match &self.attachment_ids {
            Some(ids) => check_attachments(ids),
            None => Ok(()),
        }
    }
}

fn check_attachments(ids: &[String]) -> Result<(), String> {
    ids.iter().try_for_each(|id| require_id("attachmentIds", id))
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub status: RegistrationStatus,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RegistrationQuery {
    /// Only forms in this status.
    pub status: Option<RegistrationStatus>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/registration-forms",
            guard(post(create_registration), "registration_form", "create"),
        )
        .route(
            "/registration-forms",
            guard(get(list_registrations), "registration_form", "read"),
        )
        .route(
            "/registration-forms/:id",
            guard(get(get_registration), "registration_form", "read"),
        )
        .route(
            "/registration-forms/:id",
            guard(put(update_registration), "registration_form", "update"),
        )
        .route(
            "/registration-forms/:id",
            guard(delete(delete_registration), "registration_form", "delete"),
        )
        .route(
            "/registration-forms/:id/status",
            guard(patch(update_status), "registration_form", "update"),
        )
}

async fn load(state: &AppState, id: &str) -> Result<RegistrationForm, AppError> {
    state
        .store
        .registration_form(id)
        .await?
        .ok_or_else(|| AppError::NotFound("registration form".into()))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /registration-forms — File a new registration.
#[utoipa::path(
    post,
    path = "/registration-forms",
    request_body = CreateRegistrationRequest,
    responses(
        (status = 201, description = "Registration created", body = RegistrationForm),
        (status = 400, description = "Validation error or unknown reference", body = crate::error::ErrorBody),
        (status = 409, description = "BSN already registered", body = crate::error::ErrorBody),
    ),
    tag = "registration-forms"
)]
async fn create_registration(
    State(state): State<AppState>,
    body: Result<Json<CreateRegistrationRequest>, JsonRejection>,
) -> ApiResult<RegistrationForm> {
    let req = extract_validated_json(body)?;
    let now = now_micros();
    let form = RegistrationForm {
        id: new_id(),
        first_name: req.first_name.trim().to_string(),
        last_name: req.last_name.trim().to_string(),
        bsn: req.bsn,
        date_of_birth: req.date_of_birth,
        gender: req.gender,
        referring_org_id: req.referring_org_id,
        care_type: req.care_type,
        registration_date: req.registration_date,
        reason: req.reason,
        notes: req.notes,
        attachment_ids: req.attachment_ids,
        status: RegistrationStatus::Pending,
        deleted_at: None,
        created_at: now,
        updated_at: now,
    };
    created(state.store.insert_registration_form(form).await?)
}

/// GET /registration-forms — List registrations.
#[utoipa::path(
    get,
    path = "/registration-forms",
    params(
        RegistrationQuery,
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("page_size" = Option<i64>, Query, description = "Page size, default 10, max 100"),
    ),
    responses(
        (status = 200, description = "One page of registrations", body = [RegistrationForm]),
    ),
    tag = "registration-forms"
)]
async fn list_registrations(
    State(state): State<AppState>,
    Pagination(page): Pagination,
    query: Result<Query<RegistrationQuery>, QueryRejection>,
) -> ApiResult<Page<RegistrationForm>> {
    let query = extract_query(query)?;
    ok(state.store.list_registration_forms(query.status, page).await?)
}

/// GET /registration-forms/:id
#[utoipa::path(
    get,
    path = "/registration-forms/{id}",
    params(("id" = String, Path, description = "Registration form ID")),
    responses(
        (status = 200, description = "Registration found", body = RegistrationForm),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "registration-forms"
)]
async fn get_registration(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<RegistrationForm> {
    let id = extract_id(id)?;
    ok(load(&state, &id).await?)
}

/// PUT /registration-forms/:id — Update fields; status has its own endpoint.
#[utoipa::path(
    put,
    path = "/registration-forms/{id}",
    params(("id" = String, Path, description = "Registration form ID")),
    request_body = UpdateRegistrationRequest,
    responses(
        (status = 200, description = "Registration updated", body = RegistrationForm),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "BSN already registered", body = crate::error::ErrorBody),
    ),
    tag = "registration-forms"
)]
async fn update_registration(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    body: Result<Json<UpdateRegistrationRequest>, JsonRejection>,
) -> ApiResult<RegistrationForm> {
    let id = extract_id(id)?;
    let req = extract_validated_json(body)?;
    let mut form = load(&state, &id).await?;
    if let Some(v) = req.first_name {
        form.first_name = v.trim().to_string();
    }
    if let Some(v) = req.last_name {
        form.last_name = v.trim().to_string();
    }
    if let Some(v) = req.bsn {
        form.bsn = v;
    }
    if let Some(v) = req.date_of_birth {
        form.date_of_birth = v;
    }
    if let Some(v) = req.gender {
        form.gender = v;
    }
    if req.referring_org_id.is_some() {
        form.referring_org_id = req.referring_org_id;
    }
    if let Some(v) = req.care_type {
        form.care_type = v;
    }
    if let Some(v) = req.registration_date {
        form.registration_date = v;
    }
    if req.reason.is_some() {
        form.reason = req.reason;
    }
    if req.notes.is_some() {
        form.notes = req.notes;
    }
    if let Some(ids) = req.attachment_ids {
        form.attachment_ids = ids;
    }
    form.updated_at = now_micros();
    ok(state.store.update_registration_form(form).await?)
}

/// DELETE /registration-forms/:id — Soft-delete.
#[utoipa::path(
    delete,
    path = "/registration-forms/{id}",
    params(("id" = String, Path, description = "Registration form ID")),
    responses(
        (status = 200, description = "Registration deleted"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "registration-forms"
)]
async fn delete_registration(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<()> {
    let id = extract_id(id)?;
    state.store.delete_registration_form(&id, now_micros()).await?;
    ok_with_message((), "registration form deleted")
}

/// PATCH /registration-forms/:id/status — Set the review status.
#[utoipa::path(
    patch,
    path = "/registration-forms/{id}/status",
    params(("id" = String, Path, description = "Registration form ID")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = RegistrationForm),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "registration-forms"
)]
async fn update_status(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    body: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> ApiResult<RegistrationForm> {
    let id = extract_id(id)?;
    let req = extract_json(body)?;
    let mut form = load(&state, &id).await?;
    let previous = form.status;
    form.status = req.status;
    form.updated_at = now_micros();
    let form = state.store.update_registration_form(form).await?;
    tracing::info!(registration_id = %id, from = %previous, to = %form.status, "registration status changed");
    ok(form)
}
