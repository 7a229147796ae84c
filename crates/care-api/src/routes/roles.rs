//! # Roles & Permissions API
//!
//! - **GET `/permissions`** — The seeded `(resource, action)` permissions
//! - **POST `/roles`** — Create a role with an initial permission set
//! - **GET `/roles`** — List roles with their permissions
//! - **GET/PUT/DELETE `/roles/:id`** — Read, update (set replaced whole), delete
//! - **POST/DELETE `/roles/:id/permissions/:permission_id`** — Grant or revoke one

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;

use care_core::records::{Permission, RoleDetail};

use crate::db::RoleUpdate;
use crate::extractors::{
    created, extract_id, extract_id_pair, extract_validated_json, ok, ok_with_message,
    require_non_blank, ApiResult, Validate,
};
use crate::middleware::rbac::guard;
use crate::services::rbac as service;
use crate::state::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoleRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub permission_ids: Vec<String>,
}

impl Validate for CreateRoleRequest {
    fn validate(&self) -> Result<(), String> {
        require_non_blank("name", &self.name)
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRoleRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    /// Replaces the permission set when present.
    pub permission_ids: Option<Vec<String>>,
}

impl Validate for UpdateRoleRequest {
    fn validate(&self) -> Result<(), String> {
        match &self.name {
            Some(name) => require_non_blank("name", name),
            None => Ok(()),
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/permissions", guard(get(list_permissions), "role", "read"))
        .route("/roles", guard(post(create_role), "role", "create"))
        .route("/roles", guard(get(list_roles), "role", "read"))
        .route("/roles/:id", guard(get(get_role), "role", "read"))
        .route("/roles/:id", guard(put(update_role), "role", "update"))
        .route("/roles/:id", guard(delete(delete_role), "role", "delete"))
        .route(
            "/roles/:id/permissions/:permission_id",
            guard(post(grant_permission), "role", "update"),
        )
        .route(
            "/roles/:id/permissions/:permission_id",
            guard(delete(revoke_permission), "role", "update"),
        )
}

/// GET /permissions
#[utoipa::path(
    get,
    path = "/permissions",
    responses((status = 200, description = "All permissions", body = [Permission])),
    tag = "roles"
)]
async fn list_permissions(State(state): State<AppState>) -> ApiResult<Vec<Permission>> {
    ok(service::list_permissions(&state.store).await?)
}

/// POST /roles — `CreateRoleWithPermissionsTx`.
#[utoipa::path(
    post,
    path = "/roles",
    request_body = CreateRoleRequest,
    responses(
        (status = 201, description = "Role created", body = RoleDetail),
        (status = 404, description = "Unknown permission", body = crate::error::ErrorBody),
        (status = 409, description = "Role name taken", body = crate::error::ErrorBody),
    ),
    tag = "roles"
)]
async fn create_role(
    State(state): State<AppState>,
    body: Result<Json<CreateRoleRequest>, JsonRejection>,
) -> ApiResult<RoleDetail> {
    let req = extract_validated_json(body)?;
    let role =
        service::create_role(&state.store, &req.name, req.description, req.permission_ids).await?;
    created(role)
}

/// GET /roles
#[utoipa::path(
    get,
    path = "/roles",
    responses((status = 200, description = "All roles", body = [RoleDetail])),
    tag = "roles"
)]
async fn list_roles(State(state): State<AppState>) -> ApiResult<Vec<RoleDetail>> {
    ok(service::list_roles(&state.store).await?)
}

/// GET /roles/:id
#[utoipa::path(
    get,
    path = "/roles/{id}",
    params(("id" = String, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Role found", body = RoleDetail),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "roles"
)]
async fn get_role(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<RoleDetail> {
    let id = extract_id(id)?;
    ok(service::get_role(&state.store, &id).await?)
}

/// PUT /roles/:id — `UpdateRoleWithPermissionsTx`.
#[utoipa::path(
    put,
    path = "/roles/{id}",
    params(("id" = String, Path, description = "Role ID")),
    request_body = UpdateRoleRequest,
    responses(
        (status = 200, description = "Role updated", body = RoleDetail),
        (status = 404, description = "Role or permission not found", body = crate::error::ErrorBody),
        (status = 409, description = "Role name taken", body = crate::error::ErrorBody),
    ),
    tag = "roles"
)]
async fn update_role(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    body: Result<Json<UpdateRoleRequest>, JsonRejection>,
) -> ApiResult<RoleDetail> {
    let id = extract_id(id)?;
    let req = extract_validated_json(body)?;
    let update = RoleUpdate {
        name: req.name.map(|n| n.trim().to_string()),
        description: req.description,
        permission_ids: req.permission_ids,
    };
    ok(service::update_role(&state.store, &id, update).await?)
}

/// DELETE /roles/:id
#[utoipa::path(
    delete,
    path = "/roles/{id}",
    params(("id" = String, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Role deleted"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "roles"
)]
async fn delete_role(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<()> {
    let id = extract_id(id)?;
    service::delete_role(&state.store, &id).await?;
    ok_with_message((), "role deleted")
}

/// POST /roles/:id/permissions/:permission_id
#[utoipa::path(
    post,
    path = "/roles/{id}/permissions/{permission_id}",
    params(
        ("id" = String, Path, description = "Role ID"),
        ("permission_id" = String, Path, description = "Permission ID"),
    ),
    responses(
        (status = 200, description = "Permission granted", body = RoleDetail),
        (status = 404, description = "Role or permission not found", body = crate::error::ErrorBody),
    ),
    tag = "roles"
)]
async fn grant_permission(
    State(state): State<AppState>,
    ids: Result<Path<(String, String)>, PathRejection>,
) -> ApiResult<RoleDetail> {
    let (role_id, permission_id) = extract_id_pair(ids)?;
    ok(service::grant(&state.store, &role_id, &permission_id).await?)
}

/// DELETE /roles/:id/permissions/:permission_id
#[utoipa::path(
    delete,
    path = "/roles/{id}/permissions/{permission_id}",
    params(
        ("id" = String, Path, description = "Role ID"),
        ("permission_id" = String, Path, description = "Permission ID"),
    ),
    responses(
        (status = 200, description = "Permission revoked", body = RoleDetail),
        (status = 404, description = "Role or permission not found", body = crate::error::ErrorBody),
    ),
    tag = "roles"
)]
async fn revoke_permission(
    State(state): State<AppState>,
    ids: Result<Path<(String, String)>, PathRejection>,
) -> ApiResult<RoleDetail> {
    let (role_id, permission_id) = extract_id_pair(ids)?;
    ok(service::revoke(&state.store, &role_id, &permission_id).await?)
}
