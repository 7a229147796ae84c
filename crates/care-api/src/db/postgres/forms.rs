//! Registration forms, intake forms and intake goals.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::PgPool;

use care_core::records::{ClientGoal, IntakeForm, RegistrationForm};
use care_core::{Page, PageRequest, RegistrationStatus};

use super::directory::ensure_attachments;
use super::parse;
use crate::db::StoreError;

const REGISTRATION_COLUMNS: &str = "id, first_name, last_name, bsn, date_of_birth, gender, \
     referring_org_id, care_type, registration_date, reason, notes, attachment_ids, status, \
     deleted_at, created_at, updated_at";

const INTAKE_COLUMNS: &str = "id, registration_form_id, intake_date, intake_time, location_id, \
     coordinator_id, family_situation, main_provider, limitations, focus_areas, notes, \
     evaluation_interval_weeks, status, created_at, updated_at";

pub(super) const GOAL_COLUMNS: &str =
    "id, intake_form_id, client_id, title, description, created_at, updated_at";

// ── Registration forms ──────────────────────────────────────────────

pub(super) async fn insert_registration_form(
    pool: &PgPool,
    form: RegistrationForm,
) -> Result<RegistrationForm, StoreError> {
    ensure_attachments(pool, &form.attachment_ids, "attachment_ids").await?;
    sqlx::query(&format!(
        "INSERT INTO registration_forms ({REGISTRATION_COLUMNS})
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
    ))
    .bind(&form.id)
    .bind(&form.first_name)
    .bind(&form.last_name)
    .bind(&form.bsn)
    .bind(form.date_of_birth)
    .bind(form.gender.as_str())
    .bind(&form.referring_org_id)
    .bind(form.care_type.as_str())
    .bind(form.registration_date)
    .bind(&form.reason)
    .bind(&form.notes)
    .bind(&form.attachment_ids)
    .bind(form.status.as_str())
    .bind(form.deleted_at)
    .bind(form.created_at)
    .bind(form.updated_at)
    .execute(pool)
    .await?;
    Ok(form)
}

pub(super) async fn registration_form(
    pool: &PgPool,
    id: &str,
) -> Result<Option<RegistrationForm>, StoreError> {
    let row = sqlx::query_as::<_, RegistrationRow>(&format!(
        "SELECT {REGISTRATION_COLUMNS} FROM registration_forms WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(RegistrationRow::into_record).transpose()
}

pub(super) async fn list_registration_forms(
    pool: &PgPool,
    status: Option<RegistrationStatus>,
    page: PageRequest,
) -> Result<Page<RegistrationForm>, StoreError> {
    let status = status.map(|s| s.as_str());
    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM registration_forms
         WHERE deleted_at IS NULL AND ($1::text IS NULL OR status = $1)",
    )
    .bind(status)
    .fetch_one(pool)
    .await?;
    let rows = sqlx::query_as::<_, RegistrationRow>(&format!(
        "SELECT {REGISTRATION_COLUMNS} FROM registration_forms
         WHERE deleted_at IS NULL AND ($1::text IS NULL OR status = $1)
         ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
    ))
    .bind(status)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await?;
    let items = rows
        .into_iter()
        .map(RegistrationRow::into_record)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Page::new(items, total, page))
}

pub(super) async fn update_registration_form(
    pool: &PgPool,
    form: RegistrationForm,
) -> Result<RegistrationForm, StoreError> {
    ensure_attachments(pool, &form.attachment_ids, "attachment_ids").await?;
    let result = sqlx::query(
        "UPDATE registration_forms SET first_name = $2, last_name = $3, bsn = $4,
         date_of_birth = $5, gender = $6, referring_org_id = $7, care_type = $8,
         registration_date = $9, reason = $10, notes = $11, attachment_ids = $12, status = $13,
         updated_at = $14
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(&form.id)
    .bind(&form.first_name)
    .bind(&form.last_name)
    .bind(&form.bsn)
    .bind(form.date_of_birth)
    .bind(form.gender.as_str())
    .bind(&form.referring_org_id)
    .bind(form.care_type.as_str())
    .bind(form.registration_date)
    .bind(&form.reason)
    .bind(&form.notes)
    .bind(&form.attachment_ids)
    .bind(form.status.as_str())
    .bind(form.updated_at)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("registration form"));
    }
    Ok(form)
}

// ── Intake forms ────────────────────────────────────────────────────

pub(super) async fn insert_intake_form(
    pool: &PgPool,
    form: IntakeForm,
) -> Result<IntakeForm, StoreError> {
    let live: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM registration_forms WHERE id = $1 AND deleted_at IS NULL)",
    )
    .bind(&form.registration_form_id)
    .fetch_one(pool)
    .await?;
    if !live {
        return Err(StoreError::InvalidReference(
            "intake_forms_registration_form_id_fkey".into(),
        ));
    }
    sqlx::query(&format!(
        "INSERT INTO intake_forms ({INTAKE_COLUMNS})
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
    ))
    .bind(&form.id)
    .bind(&form.registration_form_id)
    .bind(form.intake_date)
    .bind(form.intake_time)
    .bind(&form.location_id)
    .bind(&form.coordinator_id)
    .bind(&form.family_situation)
    .bind(&form.main_provider)
    .bind(&form.limitations)
    .bind(&form.focus_areas)
    .bind(&form.notes)
    .bind(form.evaluation_interval_weeks)
    .bind(form.status.as_str())
    .bind(form.created_at)
    .bind(form.updated_at)
    .execute(pool)
    .await?;
    Ok(form)
}

pub(super) async fn intake_form<'c>(
    executor: impl sqlx::PgExecutor<'c>,
    id: &str,
) -> Result<Option<IntakeForm>, StoreError> {
    let row = sqlx::query_as::<_, IntakeRow>(&format!(
        "SELECT {INTAKE_COLUMNS} FROM intake_forms WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;
    row.map(IntakeRow::into_record).transpose()
}

/// Same as [`intake_form`], row-locked for the surrounding transaction.
pub(super) async fn intake_form_for_update(
    conn: &mut sqlx::PgConnection,
    id: &str,
) -> Result<Option<IntakeForm>, StoreError> {
    let row = sqlx::query_as::<_, IntakeRow>(&format!(
        "SELECT {INTAKE_COLUMNS} FROM intake_forms WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;
    row.map(IntakeRow::into_record).transpose()
}

pub(super) async fn registration_for_update(
    conn: &mut sqlx::PgConnection,
    id: &str,
) -> Result<Option<RegistrationForm>, StoreError> {
    let row = sqlx::query_as::<_, RegistrationRow>(&format!(
        "SELECT {REGISTRATION_COLUMNS} FROM registration_forms
         WHERE id = $1 AND deleted_at IS NULL FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(conn)
    .await?;
    row.map(RegistrationRow::into_record).transpose()
}

pub(super) async fn list_intake_forms(
    pool: &PgPool,
    page: PageRequest,
) -> Result<Page<IntakeForm>, StoreError> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM intake_forms")
        .fetch_one(pool)
        .await?;
    let rows = sqlx::query_as::<_, IntakeRow>(&format!(
        "SELECT {INTAKE_COLUMNS} FROM intake_forms
         ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
    ))
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await?;
    let items = rows
        .into_iter()
        .map(IntakeRow::into_record)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Page::new(items, total, page))
}

pub(super) async fn update_intake_form(
    pool: &PgPool,
    form: IntakeForm,
) -> Result<IntakeForm, StoreError> {
    let result = sqlx::query(
        "UPDATE intake_forms SET intake_date = $2, intake_time = $3, location_id = $4,
         coordinator_id = $5, family_situation = $6, main_provider = $7, limitations = $8,
         focus_areas = $9, notes = $10, evaluation_interval_weeks = $11, status = $12,
         updated_at = $13
         WHERE id = $1",
    )
    .bind(&form.id)
    .bind(form.intake_date)
    .bind(form.intake_time)
    .bind(&form.location_id)
    .bind(&form.coordinator_id)
    .bind(&form.family_situation)
    .bind(&form.main_provider)
    .bind(&form.limitations)
    .bind(&form.focus_areas)
    .bind(&form.notes)
    .bind(form.evaluation_interval_weeks)
    .bind(form.status.as_str())
    .bind(form.updated_at)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("intake form"));
    }
    Ok(form)
}

// ── Goals ───────────────────────────────────────────────────────────

pub(super) async fn intake_goals(
    pool: &PgPool,
    intake_form_id: &str,
) -> Result<Vec<ClientGoal>, StoreError> {
    let rows = sqlx::query_as::<_, GoalRow>(&format!(
        "SELECT {GOAL_COLUMNS} FROM client_goals WHERE intake_form_id = $1
         ORDER BY created_at, id"
    ))
    .bind(intake_form_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(GoalRow::into_record).collect())
}

/// Goals added after promotion are linked to the client straight away.
pub(super) async fn insert_goal(pool: &PgPool, goal: ClientGoal) -> Result<ClientGoal, StoreError> {
    let row = sqlx::query_as::<_, GoalRow>(&format!(
        "INSERT INTO client_goals ({GOAL_COLUMNS})
         VALUES ($1, $2,
                 COALESCE($3, (SELECT id FROM clients WHERE intake_form_id = $2)),
                 $4, $5, $6, $7)
         RETURNING {GOAL_COLUMNS}"
    ))
    .bind(&goal.id)
    .bind(&goal.intake_form_id)
    .bind(&goal.client_id)
    .bind(&goal.title)
    .bind(&goal.description)
    .bind(goal.created_at)
    .bind(goal.updated_at)
    .fetch_one(pool)
    .await?;
    Ok(row.into_record())
}

pub(super) async fn delete_goal(
    pool: &PgPool,
    intake_form_id: &str,
    goal_id: &str,
) -> Result<(), StoreError> {
    let result = sqlx::query("DELETE FROM client_goals WHERE id = $1 AND intake_form_id = $2")
        .bind(goal_id)
        .bind(intake_form_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("goal"));
    }
    Ok(())
}

// ── Rows ────────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct RegistrationRow {
    id: String,
    first_name: String,
    last_name: String,
    bsn: String,
    date_of_birth: NaiveDate,
    gender: String,
    referring_org_id: Option<String>,
    care_type: String,
    registration_date: NaiveDate,
    reason: Option<String>,
    notes: Option<String>,
    attachment_ids: Vec<String>,
    status: String,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RegistrationRow {
    fn into_record(self) -> Result<RegistrationForm, StoreError> {
        Ok(RegistrationForm {
            id: self.id,
            first_name: self.first_name,
            last_name: self.last_name,
            bsn: self.bsn,
            date_of_birth: self.date_of_birth,
            gender: parse(&self.gender)?,
            referring_org_id: self.referring_org_id,
            care_type: parse(&self.care_type)?,
            registration_date: self.registration_date,
            reason: self.reason,
            notes: self.notes,
            attachment_ids: self.attachment_ids,
            status: parse(&self.status)?,
            deleted_at: self.deleted_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct IntakeRow {
    id: String,
    registration_form_id: String,
    intake_date: NaiveDate,
    intake_time: NaiveTime,
    location_id: String,
    coordinator_id: String,
    family_situation: Option<String>,
    main_provider: Option<String>,
    limitations: Option<String>,
    focus_areas: Option<String>,
    notes: Option<String>,
    evaluation_interval_weeks: i32,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl IntakeRow {
    fn into_record(self) -> Result<IntakeForm, StoreError> {
        Ok(IntakeForm {
            id: self.id,
            registration_form_id: self.registration_form_id,
            intake_date: self.intake_date,
            intake_time: self.intake_time,
            location_id: self.location_id,
            coordinator_id: self.coordinator_id,
            family_situation: self.family_situation,
            main_provider: self.main_provider,
            limitations: self.limitations,
            focus_areas: self.focus_areas,
            notes: self.notes,
            evaluation_interval_weeks: self.evaluation_interval_weeks,
            status: parse(&self.status)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct GoalRow {
    id: String,
    intake_form_id: String,
    client_id: Option<String>,
    title: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl GoalRow {
    pub(super) fn into_record(self) -> ClientGoal {
        ClientGoal {
            id: self.id,
            intake_form_id: self.intake_form_id,
            client_id: self.client_id,
            title: self.title,
            description: self.description,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}
