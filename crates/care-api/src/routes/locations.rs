//! # Locations API
//!
//! - **POST `/locations`** — Create a location
//! - **GET `/locations`** — List locations (paginated)
//! - **GET/PUT/DELETE `/locations/:id`** — Read, update, soft-delete
//!
//! `occupied` may exceed `capacity`; the dashboard flags it.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;

use care_core::records::Location;
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
pub struct CreateLocationRequest {
    pub name: String,
    pub postal_code: String,
    pub address: String,
    /// At least 1.
    pub capacity: i32,
    #[serde(default)]
    pub occupied: i32,
}

impl Validate for CreateLocationRequest {
    fn validate(&self) -> Result<(), String> {
        require_non_blank("name", &self.name)?;
        require_non_blank("postalCode", &self.postal_code)?;
        require_non_blank("address", &self.address)?;
        check_counts(Some(self.capacity), Some(self.occupied))
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLocationRequest {
    pub name: Option<String>,
    pub postal_code: Option<String>,
    pub address: Option<String>,
    pub capacity: Option<i32>,
    pub occupied: Option<i32>,
}

impl Validate for UpdateLocationRequest {
    fn validate(&self) -> Result<(), String> {
        if let Some(name) = &self.name {
            require_non_blank("name", name)?;
        }
        check_counts(self.capacity, self.occupied)
    }
}

fn check_counts(capacity: Option<i32>, occupied: Option<i32>) -> Result<(), String> {
    if matches!(capacity, Some(c) if c < 1) {
        return Err("capacity must be at least 1".into());
    }
    if matches!(occupied, Some(o) if o < 0) {
        return Err("occupied must not be negative".into());
    }
    Ok(())
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/locations", guard(post(create_location), "location", "create"))
        .route("/locations", guard(get(list_locations), "location", "read"))
        .route("/locations/:id", guard(get(get_location), "location", "read"))
        .route("/locations/:id", guard(put(update_location), "location", "update"))
        .route("/locations/:id", guard(delete(delete_location), "location", "delete"))
}

async fn load(state: &AppState, id: &str) -> Result<Location, AppError> {
    state
        .store
        .location(id)
        .await?
        .ok_or_else(|| AppError::NotFound("location".into()))
}

/// POST /locations
#[utoipa::path(
    post,
    path = "/locations",
    request_body = CreateLocationRequest,
    responses(
        (status = 201, description = "Location created", body = Location),
        (status = 400, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "locations"
)]
async fn create_location(
    State(state): State<AppState>,
    body: Result<Json<CreateLocationRequest>, JsonRejection>,
) -> ApiResult<Location> {
    let req = extract_validated_json(body)?;
    let now = now_micros();
    let location = Location {
        id: new_id(),
        name: req.name.trim().to_string(),
        postal_code: req.postal_code.trim().to_string(),
        address: req.address.trim().to_string(),
        capacity: req.capacity,
        occupied: req.occupied,
        deleted_at: None,
        created_at: now,
        updated_at: now,
    };
    if location.is_over_capacity() {
        tracing::warn!(location = %location.name, "location created over capacity");
    }
    created(state.store.insert_location(location).await?)
}

/// GET /locations
#[utoipa::path(
    get,
    path = "/locations",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("page_size" = Option<i64>, Query, description = "Page size, default 10, max 100"),
    ),
    responses((status = 200, description = "One page of locations", body = [Location])),
    tag = "locations"
)]
async fn list_locations(
    State(state): State<AppState>,
    Pagination(page): Pagination,
) -> ApiResult<Page<Location>> {
    ok(state.store.list_locations(page).await?)
}

/// GET /locations/:id
#[utoipa::path(
    get,
    path = "/locations/{id}",
    params(("id" = String, Path, description = "Location ID")),
    responses(
        (status = 200, description = "Location found", body = Location),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "locations"
)]
async fn get_location(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<Location> {
    let id = extract_id(id)?;
    ok(load(&state, &id).await?)
}

/// PUT /locations/:id
#[utoipa::path(
    put,
    path = "/locations/{id}",
    params(("id" = String, Path, description = "Location ID")),
    request_body = UpdateLocationRequest,
    responses(
        (status = 200, description = "Location updated", body = Location),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "locations"
)]
async fn update_location(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    body: Result<Json<UpdateLocationRequest>, JsonRejection>,
) -> ApiResult<Location> {
    let id = extract_id(id)?;
    let req = extract_validated_json(body)?;
    let mut location = load(&state, &id).await?;
    if let Some(v) = req.name {
        location.name = v.trim().to_string();
    }
    if let Some(v) = req.postal_code {
        location.postal_code = v.trim().to_string();
    }
    if let Some(v) = req.address {
        location.address = v.trim().to_string();
    }
    if let Some(v) = req.capacity {
        location.capacity = v;
    }
    if let Some(v) = req.occupied {
        location.occupied = v;
    }
    location.updated_at = now_micros();
    ok(state.store.update_location(location).await?)
}

/// DELETE /locations/:id
#[utoipa::path(
    delete,
    path = "/locations/{id}",
    params(("id" = String, Path, description = "Location ID")),
    responses(
        (status = 200, description = "Location deleted"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "locations"
)]
async fn delete_location(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<()> {
    let id = extract_id(id)?;
    state.store.delete_location(&id, now_micros()).await?;
    ok_with_message((), "location deleted")
}
