//! # Employees & Users API
//!
//! - **POST `/employees`** — Create an employee together with its login user
//! - **GET `/employees`** — List employees (paginated)
//! - **GET `/employees/:id`** — Get an employee
//! - **PUT `/employees/:id`** — Update profile fields
//! - **DELETE `/employees/:id`** — Soft-delete an employee
//! - **DELETE `/users/:id`** — Delete a user with its sessions and role
//! - **GET/PUT/DELETE `/users/:id/role`** — Read, assign or remove a user's role

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::Deserialize;
use utoipa::ToSchema;

use care_core::records::{Employee, RoleDetail};
use care_core::{now_micros, Gender, Page};

use crate::error::AppError;
use crate::extractors::{
    created, extract_id, extract_validated_json, ok, ok_with_message, require_bsn, require_id,
    require_non_blank, ApiResult, Validate,
};
use crate::middleware::pagination::Pagination;
use crate::middleware::rbac::guard;
use crate::services::auth::{self as auth_service, NewEmployeeAccount};
use crate::services::rbac as rbac_service;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateEmployeeRequest {
    pub email: String,
    /// At least 8 characters.
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub bsn: String,
    pub date_of_birth: NaiveDate,
    pub phone: Option<String>,
    pub gender: Gender,
    /// Free-text job title, unrelated to RBAC.
    pub role_label: Option<String>,
    /// RBAC role to assign to the new user.
    pub role_id: Option<String>,
}

impl Validate for CreateEmployeeRequest {
    fn validate(&self) -> Result<(), String> {
        require_non_blank("email", &self.email)?;
        if !self.email.contains('@') {
            return Err("email must be a valid address".into());
        }
        require_non_blank("firstName", &self.first_name)?;
        require_non_blank("lastName", &self.last_name)?;
        require_bsn("bsn", &self.bsn)?;
        if let Some(role_id) = &self.role_id {
            require_id("roleId", role_id)?;
        }
        Ok(())
    }
}

/// Fields left out keep their current value.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEmployeeRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bsn: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub phone: Option<String>,
    pub gender: Option<Gender>,
    pub role_label: Option<String>,
}

impl Validate for UpdateEmployeeRequest {
    fn validate(&self) -> Result<(), String> {
        if let Some(name) = &self.first_name {
            require_non_blank("firstName", name)?;
        }
        if let Some(name) = &self.last_name {
            require_non_blank("lastName", name)?;
        }
        if let Some(bsn) = &self.bsn {
            require_bsn("bsn", bsn)?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AssignRoleRequest {
    pub role_id: String,
}

impl Validate for AssignRoleRequest {
    fn validate(&self) -> Result<(), String> {
        require_id("roleId", &self.role_id)
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/employees", guard(post(create_employee), "employee", "create"))
        .route("/employees", guard(get(list_employees), "employee", "read"))
        .route("/employees/:id", guard(get(get_employee), "employee", "read"))
        .route("/employees/:id", guard(put(update_employee), "employee", "update"))
        .route("/employees/:id", guard(delete(delete_employee), "employee", "delete"))
        .route("/users/:id", guard(delete(delete_user), "user", "delete"))
        .route("/users/:id/role", guard(get(get_user_role), "user", "read"))
        .route("/users/:id/role", guard(put(assign_user_role), "user", "update"))
        .route("/users/:id/role", guard(delete(remove_user_role), "user", "update"))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /employees — Create an employee and its login user in one transaction.
#[utoipa::path(
    post,
    path = "/employees",
    request_body = CreateEmployeeRequest,
    responses(
        (status = 201, description = "Employee created", body = Employee),
        (status = 400, description = "Validation error", body = crate::error::ErrorBody),
        (status = 409, description = "Email or BSN already in use", body = crate::error::ErrorBody),
    ),
    tag = "employees"
)]
async fn create_employee(
    State(state): State<AppState>,
    body: Result<Json<CreateEmployeeRequest>, JsonRejection>,
) -> ApiResult<Employee> {
    let req = extract_validated_json(body)?;
    let employee = auth_service::create_employee_account(
        &state,
        NewEmployeeAccount {
            email: req.email,
            password: req.password,
            first_name: req.first_name.trim().to_string(),
            last_name: req.last_name.trim().to_string(),
            bsn: req.bsn,
            date_of_birth: req.date_of_birth,
            phone: req.phone,
            gender: req.gender,
            role_label: req.role_label,
            role_id: req.role_id,
        },
    )
    .await?;
    created(employee)
}

/// GET /employees — List employees.
#[utoipa::path(
    get,
    path = "/employees",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("page_size" = Option<i64>, Query, description = "Page size, default 10, max 100"),
    ),
    responses(
        (status = 200, description = "One page of employees", body = [Employee]),
    ),
    tag = "employees"
)]
async fn list_employees(
    State(state): State<AppState>,
    Pagination(page): Pagination,
) -> ApiResult<Page<Employee>> {
    ok(state.store.list_employees(page).await?)
}

/// GET /employees/:id — Get an employee.
#[utoipa::path(
    get,
    path = "/employees/{id}",
    params(("id" = String, Path, description = "Employee ID")),
    responses(
        (status = 200, description = "Employee found", body = Employee),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "employees"
)]
async fn get_employee(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<Employee> {
    let id = extract_id(id)?;
    let employee = state
        .store
        .employee(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("employee".into()))?;
    ok(employee)
}

/// PUT /employees/:id — Update profile fields.
#[utoipa::path(
    put,
    path = "/employees/{id}",
    params(("id" = String, Path, description = "Employee ID")),
    request_body = UpdateEmployeeRequest,
    responses(
        (status = 200, description = "Employee updated", body = Employee),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "employees"
)]
async fn update_employee(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    body: Result<Json<UpdateEmployeeRequest>, JsonRejection>,
) -> ApiResult<Employee> {
    let id = extract_id(id)?;
    let req = extract_validated_json(body)?;
    let mut employee = state
        .store
        .employee(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("employee".into()))?;

    if let Some(v) = req.first_name {
        employee.first_name = v.trim().to_string();
    }
    if let Some(v) = req.last_name {
        employee.last_name = v.trim().to_string();
    }
    if let Some(v) = req.bsn {
        employee.bsn = v;
    }
    if let Some(v) = req.date_of_birth {
        employee.date_of_birth = v;
    }
    if req.phone.is_some() {
        employee.phone = req.phone;
    }
    if let Some(v) = req.gender {
        employee.gender = v;
    }
    if req.role_label.is_some() {
        employee.role_label = req.role_label;
    }
    employee.updated_at = now_micros();
    ok(state.store.update_employee(employee).await?)
}

/// DELETE /employees/:id — Soft-delete an employee.
#[utoipa::path(
    delete,
    path = "/employees/{id}",
    params(("id" = String, Path, description = "Employee ID")),
    responses(
        (status = 200, description = "Employee deleted"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "employees"
)]
async fn delete_employee(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<()> {
    let id = extract_id(id)?;
    state.store.delete_employee(&id, now_micros()).await?;
    ok_with_message((), "employee deleted")
}

/// DELETE /users/:id — `DeleteUserTx`: revoke sessions, drop the role and
/// soft-delete the linked employee.
#[utoipa::path(
    delete,
    path = "/users/{id}",
    params(("id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "User deleted"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "users"
)]
async fn delete_user(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<()> {
    let id = extract_id(id)?;
    state.store.delete_user(&id, now_micros()).await?;
    tracing::info!(user_id = %id, "user deleted");
    ok_with_message((), "user deleted")
}

/// GET /users/:id/role — The user's role, null when unassigned.
#[utoipa::path(
    get,
    path = "/users/{id}/role",
    params(("id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Role of the user", body = RoleDetail),
        (status = 404, description = "User not found", body = crate::error::ErrorBody),
    ),
    tag = "users"
)]
async fn get_user_role(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<Option<RoleDetail>> {
    let id = extract_id(id)?;
    ok(rbac_service::user_role(&state.store, &id).await?)
}

/// PUT /users/:id/role — Assign a role, replacing any current one.
#[utoipa::path(
    put,
    path = "/users/{id}/role",
    params(("id" = String, Path, description = "User ID")),
    request_body = AssignRoleRequest,
    responses(
        (status = 200, description = "Role assigned", body = RoleDetail),
        (status = 404, description = "User or role not found", body = crate::error::ErrorBody),
    ),
    tag = "users"
)]
async fn assign_user_role(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    body: Result<Json<AssignRoleRequest>, JsonRejection>,
) -> ApiResult<RoleDetail> {
    let id = extract_id(id)?;
    let req = extract_validated_json(body)?;
    ok(rbac_service::assign_role(&state.store, &id, &req.role_id).await?)
}

/// DELETE /users/:id/role — Remove the user's role.
#[utoipa::path(
    delete,
    path = "/users/{id}/role",
    params(("id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Role removed"),
        (status = 404, description = "User has no role", body = crate::error::ErrorBody),
    ),
    tag = "users"
)]
async fn remove_user_role(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<()> {
    let id = extract_id(id)?;
    rbac_service::unassign_role(&state.store, &id).await?;
    ok_with_message((), "role removed")
}
