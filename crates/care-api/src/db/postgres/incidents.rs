//! Incident reports.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::PgPool;

use care_core::records::Incident;
use care_core::{Page, PageRequest};

use super::parse;
use crate::db::StoreError;

const INCIDENT_COLUMNS: &str = "id, client_id, incident_date, incident_time, incident_type, \
     severity, location_id, coordinator_id, description, action_taken, other_parties, status, \
     deleted_at, created_at, updated_at";

pub(super) async fn insert(pool: &PgPool, incident: Incident) -> Result<Incident, StoreError> {
    sqlx::query(&format!(
        "INSERT INTO incidents ({INCIDENT_COLUMNS})
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
    ))
    .bind(&incident.id)
    .bind(&incident.client_id)
    .bind(incident.incident_date)
    .bind(incident.incident_time)
    .bind(incident.incident_type.as_str())
    .bind(incident.severity.as_str())
    .bind(&incident.location_id)
    .bind(&incident.coordinator_id)
    .bind(&incident.description)
    .bind(&incident.action_taken)
    .bind(&incident.other_parties)
    .bind(incident.status.as_str())
    .bind(incident.deleted_at)
    .bind(incident.created_at)
    .bind(incident.updated_at)
    .execute(pool)
    .await?;
    Ok(incident)
}

pub(super) async fn get(pool: &PgPool, id: &str) -> Result<Option<Incident>, StoreError> {
    let row = sqlx::query_as::<_, IncidentRow>(&format!(
        "SELECT {INCIDENT_COLUMNS} FROM incidents WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(IncidentRow::into_record).transpose()
}

pub(super) async fn list(
    pool: &PgPool,
    client_id: Option<&str>,
    page: PageRequest,
) -> Result<Page<Incident>, StoreError> {
    let total: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM incidents
         WHERE deleted_at IS NULL AND ($1::text IS NULL OR client_id = $1)",
    )
    .bind(client_id)
    .fetch_one(pool)
    .await?;
    let rows = sqlx::query_as::<_, IncidentRow>(&format!(
        "SELECT {INCIDENT_COLUMNS} FROM incidents
         WHERE deleted_at IS NULL AND ($1::text IS NULL OR client_id = $1)
         ORDER BY incident_date DESC, created_at DESC, id DESC LIMIT $2 OFFSET $3"
    ))
    .bind(client_id)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await?;
    let items = rows
        .into_iter()
        .map(IncidentRow::into_record)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Page::new(items, total, page))
}

pub(super) async fn update(pool: &PgPool, incident: Incident) -> Result<Incident, StoreError> {
    let result = sqlx::query(
        "UPDATE incidents SET client_id = $2, incident_date = $3, incident_time = $4,
         incident_type = $5, severity = $6, location_id = $7, coordinator_id = $8,
         description = $9, action_taken = $10, other_parties = $11, status = $12,
         updated_at = $13
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(&incident.id)
    .bind(&incident.client_id)
    .bind(incident.incident_date)
    .bind(incident.incident_time)
    .bind(incident.incident_type.as_str())
    .bind(incident.severity.as_str())
    .bind(&incident.location_id)
    .bind(&incident.coordinator_id)
    .bind(&incident.description)
    .bind(&incident.action_taken)
    .bind(&incident.other_parties)
    .bind(incident.status.as_str())
    .bind(incident.updated_at)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("incident"));
    }
    Ok(incident)
}

#[derive(sqlx::FromRow)]
struct IncidentRow {
    id: String,
    client_id: String,
    incident_date: NaiveDate,
    incident_time: NaiveTime,
    incident_type: String,
    severity: String,
    location_id: String,
    coordinator_id: String,
    description: String,
    action_taken: String,
    other_parties: Option<String>,
    status: String,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl IncidentRow {
    fn into_record(self) -> Result<Incident, StoreError> {
        Ok(Incident {
            id: self.id,
            client_id: self.client_id,
            incident_date: self.incident_date,
            incident_time: self.incident_time,
            incident_type: parse(&self.incident_type)?,
            severity: parse(&self.severity)?,
            location_id: self.location_id,
            coordinator_id: self.coordinator_id,
            description: self.description,
            action_taken: self.action_taken,
            other_parties: self.other_parties,
            status: parse(&self.status)?,
            deleted_at: self.deleted_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
