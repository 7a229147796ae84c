//! # Evaluation Service
//!
//! Periodic client evaluations. A client has at most one draft; submitting
//! an evaluation reschedules the client to `evaluation date + interval × 7
//! days`. Due listings bucket in-care clients by their next date:
//!
//! | Listing | Window |
//! |---------|--------|
//! | critical | due within 7 days, overdue included |
//! | scheduled | due in 8 to 30 days |

use axum::http::StatusCode;
use chrono::{Days, NaiveDate};
use thiserror::Error;

use care_core::records::{
    ClientEvaluation, EvaluationDetail, EvaluationSummary, UpcomingEvaluation,
};
use care_core::{new_id, now_micros, Page, PageRequest};
use care_state::evaluation::{CRITICAL_WINDOW_DAYS, SCHEDULED_WINDOW_DAYS};
use care_state::{EvaluationRuleError, ProgressEntry};

use crate::db::{
    DraftInput, EvaluationOutcome, EvaluationUpdate, NewEvaluation, Store, StoreError,
};
use crate::error::AppError;

/// Default and maximum size of the recent-evaluations listing.
pub const DEFAULT_RECENT_LIMIT: i64 = 10;
pub const MAX_RECENT_LIMIT: i64 = 50;

#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("client not found")]
    ClientNotFound,

    #[error("evaluation not found")]
    EvaluationNotFound,

    #[error("draft evaluation not found")]
    DraftNotFound,

    #[error("coordinatorId is required when the caller has no employee profile")]
    CoordinatorRequired,

    #[error("client already has a draft evaluation")]
    DraftAlreadyExists,

    #[error(transparent)]
    Rule(#[from] EvaluationRuleError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for EvaluationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound("client") => Self::ClientNotFound,
            StoreError::NotFound("evaluation") => Self::EvaluationNotFound,
            StoreError::NotFound("draft evaluation") => Self::DraftNotFound,
            StoreError::DraftAlreadyExists => Self::DraftAlreadyExists,
            StoreError::AlreadyExists(constraint)
                if constraint == "client_evaluations_one_draft_key" =>
            {
                Self::DraftAlreadyExists
            }
            StoreError::Evaluation(e) => Self::Rule(e),
            other => Self::Store(other),
        }
    }
}

impl From<EvaluationError> for AppError {
    fn from(err: EvaluationError) -> Self {
        match err {
            EvaluationError::ClientNotFound => {
                AppError::domain(StatusCode::NOT_FOUND, "CLIENT_NOT_FOUND", err.to_string())
            }
            EvaluationError::EvaluationNotFound => AppError::domain(
                StatusCode::NOT_FOUND,
                "EVALUATION_NOT_FOUND",
                err.to_string(),
            ),
            EvaluationError::DraftNotFound => {
                AppError::domain(StatusCode::NOT_FOUND, "DRAFT_NOT_FOUND", err.to_string())
            }
            EvaluationError::CoordinatorRequired => AppError::Validation(err.to_string()),
            EvaluationError::DraftAlreadyExists => AppError::domain(
                StatusCode::CONFLICT,
                "DRAFT_ALREADY_EXISTS",
                err.to_string(),
            ),
            EvaluationError::Rule(e) => e.into(),
            EvaluationError::Store(e) => e.into(),
        }
    }
}

/// Payload shared by create and save-draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationInput {
    pub client_id: String,
    /// Defaults to the caller's employee id.
    pub coordinator_id: Option<String>,
    pub evaluation_date: NaiveDate,
    pub overall_notes: Option<String>,
    pub progress: Vec<ProgressEntry>,
}

fn coordinator(
    explicit: Option<String>,
    caller_employee: Option<&str>,
) -> Result<String, EvaluationError> {
    explicit
        .filter(|id| !id.trim().is_empty())
        .or_else(|| caller_employee.map(str::to_string))
        .ok_or(EvaluationError::CoordinatorRequired)
}

/// `CreateEvaluationTx`. A submitted evaluation returns the client's new
/// next evaluation date.
pub async fn create(
    store: &Store,
    caller_employee: Option<&str>,
    input: EvaluationInput,
    draft: bool,
) -> Result<EvaluationOutcome, EvaluationError> {
    let coordinator_id = coordinator(input.coordinator_id, caller_employee)?;
    let outcome = store
        .create_evaluation(
            NewEvaluation {
                id: new_id(),
                client_id: input.client_id,
                coordinator_id,
                evaluation_date: input.evaluation_date,
                overall_notes: input.overall_notes,
                progress: input.progress,
                draft,
            },
            now_micros(),
        )
        .await?;
    tracing::info!(
        evaluation_id = %outcome.detail.evaluation.id,
        client_id = %outcome.detail.evaluation.client_id,
        draft,
        "evaluation created"
    );
    Ok(outcome)
}

/// `SaveDraftTx`: upsert the client's single draft.
pub async fn save_draft(
    store: &Store,
    caller_employee: Option<&str>,
    input: EvaluationInput,
) -> Result<ClientEvaluation, EvaluationError> {
    let coordinator_id = coordinator(input.coordinator_id, caller_employee)?;
    let draft = store
        .save_draft(
            DraftInput {
                id: new_id(),
                client_id: input.client_id,
                coordinator_id,
                evaluation_date: input.evaluation_date,
                overall_notes: input.overall_notes,
                progress: input.progress,
            },
            now_micros(),
        )
        .await?;
    Ok(draft)
}

/// `SubmitDraftTx`.
pub async fn submit_draft(store: &Store, id: &str) -> Result<EvaluationOutcome, EvaluationError> {
    let outcome = store.submit_draft(id, now_micros()).await?;
    tracing::info!(
        evaluation_id = id,
        next_evaluation_date = ?outcome.next_evaluation_date,
        "draft submitted"
    );
    Ok(outcome)
}

/// `DeleteDraftTx`.
pub async fn delete_draft(store: &Store, id: &str) -> Result<(), EvaluationError> {
    store.delete_draft(id).await?;
    Ok(())
}

/// `UpdateEvaluationTx`: submitted evaluations only; the schedule is kept.
pub async fn update(
    store: &Store,
    id: &str,
    update: EvaluationUpdate,
) -> Result<EvaluationDetail, EvaluationError> {
    Ok(store.update_evaluation(id, update, now_micros()).await?)
}

pub async fn get(store: &Store, id: &str) -> Result<EvaluationDetail, EvaluationError> {
    store
        .evaluation(id)
        .await?
        .ok_or(EvaluationError::EvaluationNotFound)
}

/// Next evaluation due within 7 days of `today`, overdue included.
pub async fn critical(
    store: &Store,
    today: NaiveDate,
) -> Result<Vec<UpcomingEvaluation>, EvaluationError> {
    let to = offset(today, CRITICAL_WINDOW_DAYS)?;
    Ok(store.upcoming_evaluations(None, to, today).await?)
}

/// Next evaluation due 8 to 30 days after `today`.
pub async fn scheduled(
    store: &Store,
    today: NaiveDate,
) -> Result<Vec<UpcomingEvaluation>, EvaluationError> {
    let from = offset(today, CRITICAL_WINDOW_DAYS + 1)?;
    let to = offset(today, SCHEDULED_WINDOW_DAYS)?;
    Ok(store.upcoming_evaluations(Some(from), to, today).await?)
}

fn offset(today: NaiveDate, days: i64) -> Result<NaiveDate, EvaluationError> {
    let days = u64::try_from(days).map_err(|_| EvaluationRuleError::DateOutOfRange)?;
    today
        .checked_add_days(Days::new(days))
        .ok_or(EvaluationError::Rule(EvaluationRuleError::DateOutOfRange))
}

/// Clamp a requested limit for [`recent`].
pub fn recent_limit(requested: Option<i64>) -> i64 {
    match requested {
        Some(n) if n > MAX_RECENT_LIMIT => MAX_RECENT_LIMIT,
        Some(n) if n > 0 => n,
        _ => DEFAULT_RECENT_LIMIT,
    }
}

/// Most recently submitted evaluations.
pub async fn recent(
    store: &Store,
    limit: Option<i64>,
) -> Result<Vec<EvaluationSummary>, EvaluationError> {
    Ok(store.recent_evaluations(recent_limit(limit)).await?)
}

pub async fn history(
    store: &Store,
    client_id: &str,
    page: PageRequest,
) -> Result<Page<ClientEvaluation>, EvaluationError> {
    ensure_client(store, client_id).await?;
    Ok(store.client_evaluations(client_id, page).await?)
}

/// Latest submitted evaluation, `None` when the client has none yet.
pub async fn last(
    store: &Store,
    client_id: &str,
) -> Result<Option<EvaluationDetail>, EvaluationError> {
    ensure_client(store, client_id).await?;
    Ok(store.last_evaluation(client_id).await?)
}

/// The client's draft, `None` when there is none.
pub async fn current_draft(
    store: &Store,
    client_id: &str,
) -> Result<Option<EvaluationDetail>, EvaluationError> {
    ensure_client(store, client_id).await?;
    Ok(store.client_draft(client_id).await?)
}

async fn ensure_client(store: &Store, client_id: &str) -> Result<(), EvaluationError> {
    match store.client(client_id).await? {
        Some(_) => Ok(()),
        None => Err(EvaluationError::ClientNotFound),
    }
}
