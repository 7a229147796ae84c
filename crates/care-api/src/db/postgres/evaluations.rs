//! Evaluation transactions and listings.
//!
//! Every transaction locks the client row first, so two writers for the
//! same client serialize there; the partial unique index on drafts is the
//! backstop for the one-draft rule.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgConnection, PgPool};

use care_core::records::{
    ClientEvaluation, EvaluationDetail, EvaluationSummary, GoalProgressLog, UpcomingEvaluation,
};
use care_core::{EvaluationStatus, Page, PageRequest};
use care_state::{
    ensure_draft, ensure_submitted, next_evaluation_date, validate_progress_logs, ProgressEntry,
};

use super::clients;
use super::parse;
use crate::db::{DraftInput, EvaluationOutcome, EvaluationUpdate, NewEvaluation, StoreError};

const EVALUATION_COLUMNS: &str =
    "id, client_id, coordinator_id, evaluation_date, overall_notes, status, created_at, updated_at";

const LOG_COLUMNS: &str = "id, evaluation_id, goal_id, status, progress_notes";

/// `CreateEvaluationTx`.
pub(super) async fn create(
    conn: &mut PgConnection,
    input: NewEvaluation,
    now: DateTime<Utc>,
) -> Result<EvaluationOutcome, StoreError> {
    let client = clients::client_for_update(&mut *conn, &input.client_id)
        .await?
        .ok_or(StoreError::NotFound("client"))?;
    let goals = goal_ids(&mut *conn, &client.id).await?;
    validate_progress_logs(&input.progress, &goals)?;
    if input.draft && find_draft(&mut *conn, &client.id).await?.is_some() {
        return Err(StoreError::DraftAlreadyExists);
    }

    let evaluation = ClientEvaluation {
        id: input.id,
        client_id: input.client_id,
        coordinator_id: input.coordinator_id,
        evaluation_date: input.evaluation_date,
        overall_notes: input.overall_notes,
        status: if input.draft {
            EvaluationStatus::Draft
        } else {
            EvaluationStatus::Submitted
        },
        created_at: now,
        updated_at: now,
    };
    insert(&mut *conn, &evaluation).await?;
    for entry in &input.progress {
        upsert_log(&mut *conn, &evaluation.id, entry).await?;
    }

    let next_evaluation_date = if input.draft {
        None
    } else {
        let next = next_evaluation_date(evaluation.evaluation_date, client.evaluation_interval_weeks)?;
        clients::set_next_evaluation(&mut *conn, &client.id, next, now).await?;
        Some(next)
    };
    let detail = detail(&mut *conn, evaluation).await?;
    Ok(EvaluationOutcome {
        detail,
        next_evaluation_date,
    })
}

/// `SaveDraftTx`.
pub(super) async fn save_draft(
    conn: &mut PgConnection,
    input: DraftInput,
    now: DateTime<Utc>,
) -> Result<ClientEvaluation, StoreError> {
    let client = clients::client_for_update(&mut *conn, &input.client_id)
        .await?
        .ok_or(StoreError::NotFound("client"))?;
    if !input.progress.is_empty() {
        validate_progress_logs(&input.progress, &goal_ids(&mut *conn, &client.id).await?)?;
    }

    let evaluation = match find_draft(&mut *conn, &client.id).await? {
        Some(existing) => {
            let draft = ClientEvaluation {
                coordinator_id: input.coordinator_id,
                evaluation_date: input.evaluation_date,
                overall_notes: input.overall_notes,
                updated_at: now,
                ..existing
            };
            write_scalars(&mut *conn, &draft).await?;
            draft
        }
        None => {
            let draft = ClientEvaluation {
                id: input.id,
                client_id: input.client_id,
                coordinator_id: input.coordinator_id,
                evaluation_date: input.evaluation_date,
                overall_notes: input.overall_notes,
                status: EvaluationStatus::Draft,
                created_at: now,
                updated_at: now,
            };
            insert(&mut *conn, &draft).await?;
            draft
        }
    };

    let keep: Vec<String> = input.progress.iter().map(|e| e.goal_id.clone()).collect();
    sqlx::query("DELETE FROM goal_progress_logs WHERE evaluation_id = $1 AND goal_id <> ALL($2)")
        .bind(&evaluation.id)
        .bind(&keep)
        .execute(&mut *conn)
        .await?;
    for entry in &input.progress {
        upsert_log(&mut *conn, &evaluation.id, entry).await?;
    }
    Ok(evaluation)
}

/// `SubmitDraftTx`.
pub(super) async fn submit_draft(
    conn: &mut PgConnection,
    id: &str,
    now: DateTime<Utc>,
) -> Result<EvaluationOutcome, StoreError> {
    let mut evaluation = evaluation_for_update(&mut *conn, id)
        .await?
        .ok_or(StoreError::NotFound("draft evaluation"))?;
    ensure_draft(&evaluation)?;
    let client = clients::client_for_update(&mut *conn, &evaluation.client_id)
        .await?
        .ok_or(StoreError::NotFound("client"))?;

    let progress: Vec<ProgressEntry> = logs(&mut *conn, id)
        .await?
        .into_iter()
        .map(|log| ProgressEntry {
            goal_id: log.goal_id,
            status: log.status,
            notes: log.progress_notes,
        })
        .collect();
    validate_progress_logs(&progress, &goal_ids(&mut *conn, &client.id).await?)?;

    evaluation.status = EvaluationStatus::Submitted;
    evaluation.updated_at = now;
    write_scalars(&mut *conn, &evaluation).await?;
    let next = next_evaluation_date(evaluation.evaluation_date, client.evaluation_interval_weeks)?;
    clients::set_next_evaluation(&mut *conn, &client.id, next, now).await?;
    let detail = detail(&mut *conn, evaluation).await?;
    Ok(EvaluationOutcome {
        detail,
        next_evaluation_date: Some(next),
    })
}

/// `DeleteDraftTx`. Logs cascade.
pub(super) async fn delete_draft(conn: &mut PgConnection, id: &str) -> Result<(), StoreError> {
    let evaluation = evaluation_for_update(&mut *conn, id)
        .await?
        .ok_or(StoreError::NotFound("evaluation"))?;
    ensure_draft(&evaluation)?;
    sqlx::query("DELETE FROM client_evaluations WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// `UpdateEvaluationTx`.
pub(super) async fn update(
    conn: &mut PgConnection,
    id: &str,
    update: EvaluationUpdate,
    now: DateTime<Utc>,
) -> Result<EvaluationDetail, StoreError> {
    let mut evaluation = evaluation_for_update(&mut *conn, id)
        .await?
        .ok_or(StoreError::NotFound("evaluation"))?;
    ensure_submitted(&evaluation)?;
    validate_progress_logs(&update.progress, &goal_ids(&mut *conn, &evaluation.client_id).await?)?;

    for entry in &update.progress {
        upsert_log(&mut *conn, id, entry).await?;
    }
    evaluation.evaluation_date = update.evaluation_date;
    evaluation.overall_notes = update.overall_notes;
    evaluation.updated_at = now;
    write_scalars(&mut *conn, &evaluation).await?;
    detail(&mut *conn, evaluation).await
}

// ── Reads ───────────────────────────────────────────────────────────

pub(super) async fn detail_by_id(
    pool: &PgPool,
    id: &str,
) -> Result<Option<EvaluationDetail>, StoreError> {
    let row = sqlx::query_as::<_, EvaluationRow>(&format!(
        "SELECT {EVALUATION_COLUMNS} FROM client_evaluations WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    match row {
        Some(row) => Ok(Some(detail(pool, row.into_record()?).await?)),
        None => Ok(None),
    }
}

pub(super) async fn upcoming(
    pool: &PgPool,
    from: Option<NaiveDate>,
    to: NaiveDate,
    today: NaiveDate,
) -> Result<Vec<UpcomingEvaluation>, StoreError> {
    let rows = sqlx::query_as::<_, UpcomingRow>(
        "SELECT c.id, c.first_name, c.last_name, c.coordinator_id, c.assigned_location_id,
                c.next_evaluation_date,
                EXISTS (SELECT 1 FROM client_evaluations e
                        WHERE e.client_id = c.id AND e.status = 'draft') AS has_draft
         FROM clients c
         WHERE c.status = 'in_care'
           AND c.next_evaluation_date IS NOT NULL
           AND c.next_evaluation_date <= $1
           AND ($2::date IS NULL OR c.next_evaluation_date >= $2)
         ORDER BY c.next_evaluation_date, c.id",
    )
    .bind(to)
    .bind(from)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| UpcomingEvaluation {
            days_until: (r.next_evaluation_date - today).num_days(),
            client_id: r.id,
            first_name: r.first_name,
            last_name: r.last_name,
            coordinator_id: r.coordinator_id,
            assigned_location_id: r.assigned_location_id,
            next_evaluation_date: r.next_evaluation_date,
            has_draft: r.has_draft,
        })
        .collect())
}

pub(super) async fn recent(pool: &PgPool, limit: i64) -> Result<Vec<EvaluationSummary>, StoreError> {
    let rows = sqlx::query_as::<_, SummaryRow>(
        "SELECT e.id, e.client_id, e.coordinator_id, e.evaluation_date, e.overall_notes,
                e.status, e.created_at, e.updated_at,
                c.first_name AS client_first_name, c.last_name AS client_last_name,
                (SELECT COUNT(*) FROM goal_progress_logs l WHERE l.evaluation_id = e.id)
                    AS progress_log_count,
                EXISTS (SELECT 1 FROM client_evaluations d
                        WHERE d.client_id = e.client_id AND d.status = 'draft') AS has_draft
         FROM client_evaluations e
         JOIN clients c ON c.id = e.client_id
         WHERE e.status = 'submitted'
         ORDER BY e.evaluation_date DESC, e.created_at DESC, e.id DESC
         LIMIT $1",
    )
    .bind(limit.max(0))
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|r| {
            Ok(EvaluationSummary {
                evaluation: ClientEvaluation {
                    id: r.id,
                    client_id: r.client_id,
                    coordinator_id: r.coordinator_id,
                    evaluation_date: r.evaluation_date,
                    overall_notes: r.overall_notes,
                    status: parse(&r.status)?,
                    created_at: r.created_at,
                    updated_at: r.updated_at,
                },
                client_first_name: r.client_first_name,
                client_last_name: r.client_last_name,
                progress_log_count: r.progress_log_count,
                has_draft: r.has_draft,
            })
        })
        .collect()
}

pub(super) async fn for_client(
    pool: &PgPool,
    client_id: &str,
    page: PageRequest,
) -> Result<Page<ClientEvaluation>, StoreError> {
    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM client_evaluations WHERE client_id = $1")
            .bind(client_id)
            .fetch_one(pool)
            .await?;
    let rows = sqlx::query_as::<_, EvaluationRow>(&format!(
        "SELECT {EVALUATION_COLUMNS} FROM client_evaluations WHERE client_id = $1
         ORDER BY evaluation_date DESC, created_at DESC, id DESC LIMIT $2 OFFSET $3"
    ))
    .bind(client_id)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await?;
    let items = rows
        .into_iter()
        .map(EvaluationRow::into_record)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Page::new(items, total, page))
}

pub(super) async fn last_submitted(
    pool: &PgPool,
    client_id: &str,
) -> Result<Option<EvaluationDetail>, StoreError> {
    let row = sqlx::query_as::<_, EvaluationRow>(&format!(
        "SELECT {EVALUATION_COLUMNS} FROM client_evaluations
         WHERE client_id = $1 AND status = 'submitted'
         ORDER BY evaluation_date DESC, created_at DESC, id DESC LIMIT 1"
    ))
    .bind(client_id)
    .fetch_optional(pool)
    .await?;
    match row {
        Some(row) => Ok(Some(detail(pool, row.into_record()?).await?)),
        None => Ok(None),
    }
}

pub(super) async fn draft_of(
    pool: &PgPool,
    client_id: &str,
) -> Result<Option<EvaluationDetail>, StoreError> {
    match find_draft(pool, client_id).await? {
        Some(draft) => Ok(Some(detail(pool, draft).await?)),
        None => Ok(None),
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

async fn detail<'c>(
    executor: impl sqlx::PgExecutor<'c>,
    evaluation: ClientEvaluation,
) -> Result<EvaluationDetail, StoreError> {
    let progress_logs = logs(executor, &evaluation.id).await?;
    Ok(EvaluationDetail {
        evaluation,
        progress_logs,
    })
}

async fn logs<'c>(
    executor: impl sqlx::PgExecutor<'c>,
    evaluation_id: &str,
) -> Result<Vec<GoalProgressLog>, StoreError> {
    let rows = sqlx::query_as::<_, LogRow>(&format!(
        "SELECT {LOG_COLUMNS} FROM goal_progress_logs WHERE evaluation_id = $1 ORDER BY goal_id"
    ))
    .bind(evaluation_id)
    .fetch_all(executor)
    .await?;
    rows.into_iter().map(LogRow::into_record).collect()
}

async fn goal_ids(conn: &mut PgConnection, client_id: &str) -> Result<HashSet<String>, StoreError> {
    let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM client_goals WHERE client_id = $1")
        .bind(client_id)
        .fetch_all(conn)
        .await?;
    Ok(ids.into_iter().collect())
}

async fn find_draft<'c>(
    executor: impl sqlx::PgExecutor<'c>,
    client_id: &str,
) -> Result<Option<ClientEvaluation>, StoreError> {
    let row = sqlx::query_as::<_, EvaluationRow>(&format!(
        "SELECT {EVALUATION_COLUMNS} FROM client_evaluations
         WHERE client_id = $1 AND status = 'draft'"
    ))
    .bind(client_id)
    .fetch_optional(executor)
    .await?;
    row.map(EvaluationRow::into_record).transpose()
}

async fn evaluation_for_update(
    conn: &mut PgConnection,
    id: &str,
) -> Result<Option<ClientEvaluation>, StoreError> {
    let row = sqlx::query_as::<_, EvaluationRow>(&format!(
        "SELECT {EVALUATION_COLUMNS} FROM client_evaluations WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;
    row.map(EvaluationRow::into_record).transpose()
}

async fn insert(conn: &mut PgConnection, e: &ClientEvaluation) -> Result<(), StoreError> {
    sqlx::query(&format!(
        "INSERT INTO client_evaluations ({EVALUATION_COLUMNS})
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
    ))
    .bind(&e.id)
    .bind(&e.client_id)
    .bind(&e.coordinator_id)
    .bind(e.evaluation_date)
    .bind(&e.overall_notes)
    .bind(e.status.as_str())
    .bind(e.created_at)
    .bind(e.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn write_scalars(conn: &mut PgConnection, e: &ClientEvaluation) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE client_evaluations SET coordinator_id = $2, evaluation_date = $3,
         overall_notes = $4, status = $5, updated_at = $6 WHERE id = $1",
    )
    .bind(&e.id)
    .bind(&e.coordinator_id)
    .bind(e.evaluation_date)
    .bind(&e.overall_notes)
    .bind(e.status.as_str())
    .bind(e.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Insert or overwrite the `(evaluation, goal)` log, keeping its row id.
async fn upsert_log(
    conn: &mut PgConnection,
    evaluation_id: &str,
    entry: &ProgressEntry,
) -> Result<(), StoreError> {
    sqlx::query(&format!(
        "INSERT INTO goal_progress_logs ({LOG_COLUMNS}) VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (evaluation_id, goal_id)
         DO UPDATE SET status = EXCLUDED.status, progress_notes = EXCLUDED.progress_notes"
    ))
    .bind(care_core::new_id())
    .bind(evaluation_id)
    .bind(&entry.goal_id)
    .bind(entry.status.as_str())
    .bind(&entry.notes)
    .execute(conn)
    .await?;
    Ok(())
}

// ── Rows ────────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct EvaluationRow {
    id: String,
    client_id: String,
    coordinator_id: String,
    evaluation_date: NaiveDate,
    overall_notes: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl EvaluationRow {
    fn into_record(self) -> Result<ClientEvaluation, StoreError> {
        Ok(ClientEvaluation {
            id: self.id,
            client_id: self.client_id,
            coordinator_id: self.coordinator_id,
            evaluation_date: self.evaluation_date,
            overall_notes: self.overall_notes,
            status: parse(&self.status)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    id: String,
    evaluation_id: String,
    goal_id: String,
    status: String,
    progress_notes: Option<String>,
}

impl LogRow {
    fn into_record(self) -> Result<GoalProgressLog, StoreError> {
        Ok(GoalProgressLog {
            id: self.id,
            evaluation_id: self.evaluation_id,
            goal_id: self.goal_id,
            status: parse(&self.status)?,
            progress_notes: self.progress_notes,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UpcomingRow {
    id: String,
    first_name: String,
    last_name: String,
    coordinator_id: Option<String>,
    assigned_location_id: Option<String>,
    next_evaluation_date: NaiveDate,
    has_draft: bool,
}

#[derive(sqlx::FromRow)]
struct SummaryRow {
    id: String,
    client_id: String,
    coordinator_id: String,
    evaluation_date: NaiveDate,
    overall_notes: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    client_first_name: String,
    client_last_name: String,
    progress_log_count: i64,
    has_draft: bool,
}
