//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Store, lifecycle and evaluation errors map to HTTP status codes here;
//! services raise the domain sentinels and handlers only propagate.
//!
//! | Variant | Status | Code |
//! |---------|--------|------|
//! | `Validation` | 400 | `INVALID_REQUEST` |
//! | `BadRequest` | 400 | `BAD_REQUEST` |
//! | `Unauthorized` | 401 | `UNAUTHORIZED` |
//! | `Forbidden` | 403 | `FORBIDDEN` |
//! | `NotFound` | 404 | `NOT_FOUND` |
//! | `Conflict` | 409 | `CONFLICT` |
//! | `RateLimited` | 429 | `RATE_LIMIT_EXCEEDED` |
//! | `Internal` | 500 | `INTERNAL_ERROR` |
//! | `ServiceUnavailable` | 503 | `SERVICE_UNAVAILABLE` |
//! | `Domain` | per sentinel | e.g. `AMBULATORY_HOURS_REQUIRED` |
//!
//! Internal error details are logged and never returned to the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use care_state::{EvaluationRuleError, LifecycleError};

use crate::db::StoreError;

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND", "DISCHARGE_NOT_STARTED").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional details, present only for client errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Request validation failed (400).
    #[error("{0}")]
    Validation(String),

    /// Request body could not be parsed (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or invalid credentials (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not permitted (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Resource not found (404).
    #[error("{0} not found")]
    NotFound(String),

    /// Conflict with current resource state (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Login throttled (429).
    #[error("too many login attempts; retry in {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    /// A dependency is not reachable (503).
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error (500). Message is logged but not returned to client.
    #[error("internal error: {0}")]
    Internal(String),

    /// A named domain sentinel with its canonical code.
    #[error("{message}")]
    Domain {
        status: StatusCode,
        code: &'static str,
        message: String,
    },
}

impl AppError {
    pub fn domain(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self::Domain {
            status,
            code,
            message: message.into(),
        }
    }

    /// Return the HTTP status code and machine-readable error code for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED"),
            Self::ServiceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE")
            }
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            Self::Domain { status, code, .. } => (*status, code),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Never expose internal error messages to clients.
        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        if matches!(&self, Self::Internal(_)) {
            tracing::error!(error = %self, "internal server error");
        }

        let retry_after = match &self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details: None,
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(axum::http::header::RETRY_AFTER, secs.into());
        }
        response
    }
}

impl From<care_core::ValidationError> for AppError {
    fn from(err: care_core::ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        let code = match &err {
            LifecycleError::InvalidClientStatus { .. } => "INVALID_CLIENT_STATUS",
            LifecycleError::AmbulatoryHoursRequired => "AMBULATORY_HOURS_REQUIRED",
            LifecycleError::AmbulatoryHoursNotAllowed => "AMBULATORY_HOURS_NOT_ALLOWED",
            LifecycleError::CareEndBeforeStart { .. } => "CARE_END_BEFORE_START",
            LifecycleError::ClientNotInCare { .. } => "CLIENT_NOT_IN_CARE",
            LifecycleError::DischargeAlreadyStarted => "DISCHARGE_ALREADY_STARTED",
            LifecycleError::DischargeNotStarted => "DISCHARGE_NOT_STARTED",
            LifecycleError::EmptyReport(_) => "INVALID_REQUEST",
        };
        Self::domain(StatusCode::BAD_REQUEST, code, err.to_string())
    }
}

impl From<EvaluationRuleError> for AppError {
    fn from(err: EvaluationRuleError) -> Self {
        let code = match &err {
            EvaluationRuleError::ProgressLogsRequired => "PROGRESS_LOGS_REQUIRED",
            EvaluationRuleError::DuplicateGoal(_) => "DUPLICATE_GOAL",
            EvaluationRuleError::UnknownGoal(_) => "GOAL_NOT_FOUND",
            EvaluationRuleError::NotADraft(_) => "EVALUATION_NOT_DRAFT",
            EvaluationRuleError::NotSubmitted(_) => "EVALUATION_NOT_SUBMITTED",
            EvaluationRuleError::DateOutOfRange => "INVALID_REQUEST",
        };
        Self::domain(StatusCode::BAD_REQUEST, code, err.to_string())
    }
}

/// Generic translation for routes that talk to the store directly.
/// Services translate the variants they own before this applies.
impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what.to_string()),
            StoreError::AlreadyExists(constraint)
                if constraint == "client_evaluations_one_draft_key" =>
            {
                StoreError::DraftAlreadyExists.into()
            }
            StoreError::AlreadyExists(constraint) => Self::domain(
                StatusCode::CONFLICT,
                "ALREADY_EXISTS",
                duplicate_message(&constraint),
            ),
            StoreError::InvalidReference(constraint) => Self::Validation(format!(
                "referenced record does not exist ({constraint})"
            )),
            StoreError::Conflict => {
                Self::Conflict("the record was modified concurrently; retry".into())
            }
            StoreError::IntakeAlreadyPromoted => Self::domain(
                StatusCode::CONFLICT,
                "INTAKE_ALREADY_PROMOTED",
                "intake form has already been promoted to a client",
            ),
            StoreError::DraftAlreadyExists => Self::domain(
                StatusCode::CONFLICT,
                "DRAFT_ALREADY_EXISTS",
                "client already has a draft evaluation",
            ),
            StoreError::Lifecycle(e) => e.into(),
            StoreError::Evaluation(e) => e.into(),
            StoreError::Corrupt(_) | StoreError::Database(_) => Self::Internal(err.to_string()),
        }
    }
}

/// Human message for a unique-constraint name.
fn duplicate_message(constraint: &str) -> String {
    let what = match constraint {
        "users_email_key" => "a user with this email",
        "employees_bsn_key" => "an employee with this BSN",
        "employees_user_id_key" => "an employee for this user",
        "registration_forms_bsn_key" => "a registration form with this BSN",
        "intake_forms_registration_form_id_key" => "an intake form for this registration",
        "clients_registration_form_id_key" | "clients_intake_form_id_key" => {
            "a client for this registration"
        }
        "roles_name_key" => "a role with this name",
        _ => return format!("record already exists ({constraint})"),
    };
    format!("{what} already exists")
}
