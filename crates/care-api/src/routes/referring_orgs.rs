//! # Referring Organizations API
//!
//! - **POST `/referring-orgs`** — Register an organization
//! - **GET `/referring-orgs`** — List organizations (paginated)
//! - **GET/PUT/DELETE `/referring-orgs/:id`** — Read, update, soft-delete

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;

use care_core::records::ReferringOrg;
use care_core::{new_id, now_micros, Page};

use crate::error::AppError;
use crate::extractors::{
    created, extract_id, extract_validated_json, ok, ok_with_message, require_non_blank,
    ApiResult, Validate,
};
use crate::middleware::pagination::Pagination;
use crate::middleware::rbac::guard;
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateReferringOrgRequest {
    pub name: String,
    pub contact_person: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl Validate for CreateReferringOrgRequest {
    fn validate(&self) -> Result<(), String> {
        require_non_blank("name", &self.name)
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReferringOrgRequest {
    pub name: Option<String>,
    pub contact_person: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl Validate for UpdateReferringOrgRequest {
    fn validate(&self) -> Result<(), String> {
        match &self.name {
            Some(name) => require_non_blank("name", name),
            None => Ok(()),
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/referring-orgs", guard(post(create_org), "referring_org", "create"))
        .route("/referring-orgs", guard(get(list_orgs), "referring_org", "read"))
        .route("/referring-orgs/:id", guard(get(get_org), "referring_org", "read"))
        .route("/referring-orgs/:id", guard(put(update_org), "referring_org", "update"))
        .route("/referring-orgs/:id", guard(delete(delete_org), "referring_org", "delete"))
}

async fn load(state: &AppState, id: &str) -> Result<ReferringOrg, AppError> {
    state
        .store
        .referring_org(id)
        .await?
        .ok_or_else(|| AppError::NotFound("referring organization".into()))
}

/// POST /referring-orgs
#[utoipa::path(
    post,
    path = "/referring-orgs",
    request_body = CreateReferringOrgRequest,
    responses(
        (status = 201, description = "Organization created", body = ReferringOrg),
        (status = 400, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "referring-orgs"
)]
async fn create_org(
    State(state): State<AppState>,
    body: Result<Json<CreateReferringOrgRequest>, JsonRejection>,
) -> ApiResult<ReferringOrg> {
    let req = extract_validated_json(body)?;
    let now = now_micros();
    let org = ReferringOrg {
        id: new_id(),
        name: req.name.trim().to_string(),
        contact_person: req.contact_person,
        phone: req.phone,
        email: req.email,
        deleted_at: None,
        created_at: now,
        updated_at: now,
    };
    created(state.store.insert_referring_org(org).await?)
}

/// GET /referring-orgs
#[utoipa::path(
    get,
    path = "/referring-orgs",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("page_size" = Option<i64>, Query, description = "Page size, default 10, max 100"),
    ),
    responses((status = 200, description = "One page of organizations", body = [ReferringOrg])),
    tag = "referring-orgs"
)]
async fn list_orgs(
    State(state): State<AppState>,
    Pagination(page): Pagination,
) -> ApiResult<Page<ReferringOrg>> {
    ok(state.store.list_referring_orgs(page).await?)
}

/// GET /referring-orgs/:id
#[utoipa::path(
    get,
    path = "/referring-orgs/{id}",
    params(("id" = String, Path, description = "Organization ID")),
    responses(
        (status = 200, description = "Organization found", body = ReferringOrg),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "referring-orgs"
)]
async fn get_org(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<ReferringOrg> {
    let id = extract_id(id)?;
    ok(load(&state, &id).await?)
}

/// PUT /referring-orgs/:id
#[utoipa::path(
    put,
    path = "/referring-orgs/{id}",
    params(("id" = String, Path, description = "Organization ID")),
    request_body = UpdateReferringOrgRequest,
    responses(
        (status = 200, description = "Organization updated", body = ReferringOrg),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "referring-orgs"
)]
async fn update_org(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    body: Result<Json<UpdateReferringOrgRequest>, JsonRejection>,
) -> ApiResult<ReferringOrg> {
    let id = extract_id(id)?;
    let req = extract_validated_json(body)?;
    let mut org = load(&state, &id).await?;
    if let Some(name) = req.name {
        org.name = name.trim().to_string();
    }
    if req.contact_person.is_some() {
        org.contact_person = req.contact_person;
    }
    if req.phone.is_some() {
        org.phone = req.phone;
    }
    if req.email.is_some() {
        org.email = req.email;
    }
    org.updated_at = now_micros();
    ok(state.store.update_referring_org(org).await?)
}

/// DELETE /referring-orgs/:id
#[utoipa::path(
    delete,
    path = "/referring-orgs/{id}",
    params(("id" = String, Path, description = "Organization ID")),
    responses(
        (status = 200, description = "Organization deleted"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "referring-orgs"
)]
async fn delete_org(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<()> {
    let id = extract_id(id)?;
    state.store.delete_referring_org(&id, now_micros()).await?;
    ok_with_message((), "referring organization deleted")
}
