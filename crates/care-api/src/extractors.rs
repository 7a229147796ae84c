//! # Custom Extractors & Validation
//!
//! Provides the [`Validate`] trait for request DTOs, helpers to extract and
//! validate JSON bodies in handlers, and the success envelope every handler
//! returns.

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::error::AppError;

/// Trait for request types that can validate their business rules
/// beyond what serde deserialization checks.
pub trait Validate {
    /// Validate business rules. Returns an error message on failure.
    fn validate(&self) -> Result<(), String>;
}

/// Extract a JSON body, mapping deserialization errors to [`AppError::BadRequest`].
///
/// ```ignore
/// async fn handler(body: Result<Json<T>, JsonRejection>) -> Result<..., AppError> {
///     let req = extract_json(body)?;
/// }
/// ```
pub fn extract_json<T>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    result
        .map(|Json(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Extract a JSON body and validate it using the [`Validate`] trait.
pub fn extract_validated_json<T: Validate>(
    result: Result<Json<T>, JsonRejection>,
) -> Result<T, AppError> {
    let value = extract_json(result)?;
    value.validate().map_err(AppError::Validation)?;
    Ok(value)
}

/// Extract an `:id` path segment and check that it is a well-formed id.
pub fn extract_id(result: Result<Path<String>, PathRejection>) -> Result<String, AppError> {
    let Path(id) = result.map_err(|err| AppError::BadRequest(err.body_text()))?;
    if !care_core::is_valid_id(&id) {
        return Err(AppError::Validation(format!("malformed id: {id}")));
    }
    Ok(id)
}

/// Extract a `/:id/.../:child_id` pair of path segments.
pub fn extract_id_pair(
    result: Result<Path<(String, String)>, PathRejection>,
) -> Result<(String, String), AppError> {
    let Path((parent, child)) = result.map_err(|err| AppError::BadRequest(err.body_text()))?;
    for id in [&parent, &child] {
        if !care_core::is_valid_id(id) {
            return Err(AppError::Validation(format!("malformed id: {id}")));
        }
    }
    Ok((parent, child))
}

/// Extract query parameters, mapping parse errors to [`AppError::BadRequest`].
pub fn extract_query<T>(result: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    result
        .map(|Query(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Validation helper: reject blank required strings.
pub fn require_non_blank(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    Ok(())
}

/// Validation helper: a BSN is exactly nine digits.
pub fn require_bsn(field: &str, value: &str) -> Result<(), String> {
    if value.len() != 9 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("{field} must be exactly 9 digits"));
    }
    Ok(())
}

/// Validation helper: optional ids must be well-formed when present.
pub fn require_id(field: &str, value: &str) -> Result<(), String> {
    if !care_core::is_valid_id(value) {
        return Err(format!("{field} is not a valid id"));
    }
    Ok(())
}

// ── Success envelope ────────────────────────────────────────────────

/// `{success: true, data, message}`.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    pub message: Option<String>,
}

/// Handler return type for the success envelope.
pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), AppError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    respond(StatusCode::OK, data, None)
}

pub fn created<T>(data: T) -> ApiResult<T> {
    respond(StatusCode::CREATED, data, None)
}

pub fn ok_with_message<T>(data: T, message: &str) -> ApiResult<T> {
    respond(StatusCode::OK, data, Some(message.to_string()))
}

fn respond<T>(status: StatusCode, data: T, message: Option<String>) -> ApiResult<T> {
    Ok((
        status,
        Json(ApiResponse {
            success: true,
            data,
            message,
        }),
    ))
}
