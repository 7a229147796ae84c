//! Clients: promotion, lifecycle transitions and listings.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgConnection, PgPool};

use care_core::records::{Client, ClientGoal};
use care_core::{IntakeStatus, Page, PageRequest, WaitingListPriority};

use super::directory::ensure_attachments;
use super::forms::{self, GoalRow, GOAL_COLUMNS};
use super::{like_pattern, parse, parse_opt};
use crate::db::{ClientFilter, ClientTransition, StoreError};

const CLIENT_COLUMNS: &str = "id, registration_form_id, intake_form_id, first_name, last_name, \
     bsn, date_of_birth, gender, care_type, status, waiting_list_priority, care_start_date, \
     care_end_date, ambulatory_weekly_hours, assigned_location_id, coordinator_id, \
     family_situation, main_provider, limitations, focus_areas, notes, discharge_date, \
     discharge_reason, discharge_status, closing_report, evaluation_report, \
     discharge_attachment_ids, next_evaluation_date, evaluation_interval_weeks, created_at, \
     updated_at";

const FILTER: &str = "($1::text IS NULL OR status = $1)
     AND ($2::text IS NULL OR first_name ILIKE $2 OR last_name ILIKE $2 OR bsn LIKE $2)";

/// `MoveClientToWaitingListTx`.
pub(super) async fn move_to_waiting_list(
    conn: &mut PgConnection,
    intake_form_id: &str,
    priority: WaitingListPriority,
    client_id: String,
    now: DateTime<Utc>,
) -> Result<Client, StoreError> {
    let intake = forms::intake_form_for_update(&mut *conn, intake_form_id)
        .await?
        .ok_or(StoreError::NotFound("intake form"))?;
    let promoted: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM clients WHERE intake_form_id = $1)")
            .bind(&intake.id)
            .fetch_one(&mut *conn)
            .await?;
    if promoted {
        return Err(StoreError::IntakeAlreadyPromoted);
    }
    let registration = forms::registration_for_update(&mut *conn, &intake.registration_form_id)
        .await?
        .ok_or(StoreError::NotFound("registration form"))?;

    let client = care_state::promote(client_id, &registration, &intake, priority, now);
    insert(&mut *conn, &client).await?;

    sqlx::query("UPDATE intake_forms SET status = $2, updated_at = $3 WHERE id = $1")
        .bind(&intake.id)
        .bind(IntakeStatus::Completed.as_str())
        .bind(now)
        .execute(&mut *conn)
        .await?;
    sqlx::query("UPDATE client_goals SET client_id = $2, updated_at = $3 WHERE intake_form_id = $1")
        .bind(&intake.id)
        .bind(&client.id)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    Ok(client)
}

/// Lock the client row, apply the transition and write the row back.
pub(super) async fn transition(
    conn: &mut PgConnection,
    id: &str,
    transition: &ClientTransition,
    now: DateTime<Utc>,
) -> Result<Client, StoreError> {
    if let ClientTransition::CompleteDischarge(input) = transition {
        ensure_attachments(&mut *conn, &input.attachment_ids, "discharge_attachment_ids").await?;
    }
    let row = sqlx::query_as::<_, ClientRow>(&format!(
        "SELECT {CLIENT_COLUMNS} FROM clients WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    let mut client = row
        .map(ClientRow::into_record)
        .transpose()?
        .ok_or(StoreError::NotFound("client"))?;
    transition.apply(&mut client, now)?;
    tracing::debug!(client_id = %client.id, tx = transition.name(), "client transition applied");
    write_back(&mut *conn, &client).await?;
    Ok(client)
}

pub(super) async fn client<'c>(
    executor: impl sqlx::PgExecutor<'c>,
    id: &str,
) -> Result<Option<Client>, StoreError> {
    let row = sqlx::query_as::<_, ClientRow>(&format!(
        "SELECT {CLIENT_COLUMNS} FROM clients WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;
    row.map(ClientRow::into_record).transpose()
}

pub(super) async fn client_for_update(
    conn: &mut PgConnection,
    id: &str,
) -> Result<Option<Client>, StoreError> {
    let row = sqlx::query_as::<_, ClientRow>(&format!(
        "SELECT {CLIENT_COLUMNS} FROM clients WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;
    row.map(ClientRow::into_record).transpose()
}

pub(super) async fn list_clients(
    pool: &PgPool,
    filter: &ClientFilter,
    page: PageRequest,
) -> Result<Page<Client>, StoreError> {
    let status = filter.status.map(|s| s.as_str());
    let search = filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(like_pattern);

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM clients WHERE {FILTER}"))
        .bind(status)
        .bind(&search)
        .fetch_one(pool)
        .await?;
    let rows = sqlx::query_as::<_, ClientRow>(&format!(
        "SELECT {CLIENT_COLUMNS} FROM clients WHERE {FILTER}
         ORDER BY created_at DESC, id DESC LIMIT $3 OFFSET $4"
    ))
    .bind(status)
    .bind(&search)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await?;
    let items = rows
        .into_iter()
        .map(ClientRow::into_record)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Page::new(items, total, page))
}

pub(super) async fn client_goals<'c>(
    executor: impl sqlx::PgExecutor<'c>,
    client_id: &str,
) -> Result<Vec<ClientGoal>, StoreError> {
    let rows = sqlx::query_as::<_, GoalRow>(&format!(
        "SELECT {GOAL_COLUMNS} FROM client_goals WHERE client_id = $1 ORDER BY created_at, id"
    ))
    .bind(client_id)
    .fetch_all(executor)
    .await?;
    Ok(rows.into_iter().map(GoalRow::into_record).collect())
}

/// Persist `next_evaluation_date` after a submission.
pub(super) async fn set_next_evaluation(
    conn: &mut PgConnection,
    client_id: &str,
    next: NaiveDate,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE clients SET next_evaluation_date = $2, updated_at = $3 WHERE id = $1")
        .bind(client_id)
        .bind(next)
        .bind(now)
        .execute(conn)
        .await?;
    Ok(())
}

async fn insert(conn: &mut PgConnection, c: &Client) -> Result<(), StoreError> {
    sqlx::query(&format!(
        "INSERT INTO clients ({CLIENT_COLUMNS})
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                 $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31)"
    ))
    .bind(&c.id)
    .bind(&c.registration_form_id)
    .bind(&c.intake_form_id)
    .bind(&c.first_name)
    .bind(&c.last_name)
    .bind(&c.bsn)
    .bind(c.date_of_birth)
    .bind(c.gender.as_str())
    .bind(c.care_type.as_str())
    .bind(c.status.as_str())
    .bind(c.waiting_list_priority.as_str())
    .bind(c.care_start_date)
    .bind(c.care_end_date)
    .bind(c.ambulatory_weekly_hours)
    .bind(&c.assigned_location_id)
    .bind(&c.coordinator_id)
    .bind(&c.family_situation)
    .bind(&c.main_provider)
    .bind(&c.limitations)
    .bind(&c.focus_areas)
    .bind(&c.notes)
    .bind(c.discharge_date)
    .bind(c.discharge_reason.map(|r| r.as_str()))
    .bind(c.discharge_status.map(|s| s.as_str()))
    .bind(&c.closing_report)
    .bind(&c.evaluation_report)
    .bind(&c.discharge_attachment_ids)
    .bind(c.next_evaluation_date)
    .bind(c.evaluation_interval_weeks)
    .bind(c.created_at)
    .bind(c.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

/// Write every column a lifecycle transition may touch.
async fn write_back(conn: &mut PgConnection, c: &Client) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE clients SET status = $2, waiting_list_priority = $3, care_start_date = $4,
         care_end_date = $5, ambulatory_weekly_hours = $6, discharge_date = $7,
         discharge_reason = $8, discharge_status = $9, closing_report = $10,
         evaluation_report = $11, discharge_attachment_ids = $12, updated_at = $13
         WHERE id = $1",
    )
    .bind(&c.id)
    .bind(c.status.as_str())
    .bind(c.waiting_list_priority.as_str())
    .bind(c.care_start_date)
    .bind(c.care_end_date)
    .bind(c.ambulatory_weekly_hours)
    .bind(c.discharge_date)
    .bind(c.discharge_reason.map(|r| r.as_str()))
    .bind(c.discharge_status.map(|s| s.as_str()))
    .bind(&c.closing_report)
    .bind(&c.evaluation_report)
    .bind(&c.discharge_attachment_ids)
    .bind(c.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

#[derive(sqlx::FromRow)]
struct ClientRow {
    id: String,
    registration_form_id: String,
    intake_form_id: String,
    first_name: String,
    last_name: String,
    bsn: String,
    date_of_birth: NaiveDate,
    gender: String,
    care_type: String,
    status: String,
    waiting_list_priority: String,
    care_start_date: Option<NaiveDate>,
    care_end_date: Option<NaiveDate>,
    ambulatory_weekly_hours: Option<i32>,
    assigned_location_id: Option<String>,
    coordinator_id: Option<String>,
    family_situation: Option<String>,
    main_provider: Option<String>,
    limitations: Option<String>,
    focus_areas: Option<String>,
    notes: Option<String>,
    discharge_date: Option<NaiveDate>,
    discharge_reason: Option<String>,
    discharge_status: Option<String>,
    closing_report: Option<String>,
    evaluation_report: Option<String>,
    discharge_attachment_ids: Vec<String>,
    next_evaluation_date: Option<NaiveDate>,
    evaluation_interval_weeks: Option<i32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ClientRow {
    fn into_record(self) -> Result<Client, StoreError> {
        Ok(Client {
            id: self.id,
            registration_form_id: self.registration_form_id,
            intake_form_id: self.intake_form_id,
            first_name: self.first_name,
            last_name: self.last_name,
            bsn: self.bsn,
            date_of_birth: self.date_of_birth,
            gender: parse(&self.gender)?,
            care_type: parse(&self.care_type)?,
            status: parse(&self.status)?,
            waiting_list_priority: parse(&self.waiting_list_priority)?,
            care_start_date: self.care_start_date,
            care_end_date: self.care_end_date,
            ambulatory_weekly_hours: self.ambulatory_weekly_hours,
            assigned_location_id: self.assigned_location_id,
            coordinator_id: self.coordinator_id,
            family_situation: self.family_situation,
            main_provider: self.main_provider,
            limitations: self.limitations,
            focus_areas: self.focus_areas,
            notes: self.notes,
            discharge_date: self.discharge_date,
            discharge_reason: parse_opt(self.discharge_reason.as_deref())?,
            discharge_status: parse_opt(self.discharge_status.as_deref())?,
            closing_report: self.closing_report,
            evaluation_report: self.evaluation_report,
            discharge_attachment_ids: self.discharge_attachment_ids,
            next_evaluation_date: self.next_evaluation_date,
            evaluation_interval_weeks: self.evaluation_interval_weeks,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
