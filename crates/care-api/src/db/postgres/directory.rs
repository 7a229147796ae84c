//! Referring organizations, locations, attachments and soft deletion.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use care_core::records::{Attachment, Location, ReferringOrg};
use care_core::{Page, PageRequest};

use crate::db::StoreError;

const ORG_COLUMNS: &str =
    "id, name, contact_person, phone, email, deleted_at, created_at, updated_at";

const LOCATION_COLUMNS: &str =
    "id, name, postal_code, address, capacity, occupied, deleted_at, created_at, updated_at";

const ATTACHMENT_COLUMNS: &str =
    "id, name, content_type, size, object_key, uploaded_by, created_at";

/// Tombstone a live row. `table` is always a literal from this crate.
pub(super) async fn soft_delete(
    pool: &PgPool,
    table: &'static str,
    id: &str,
    now: DateTime<Utc>,
    what: &'static str,
) -> Result<(), StoreError> {
    let result = sqlx::query(&format!(
        "UPDATE {table} SET deleted_at = $2, updated_at = $2 WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(id)
    .bind(now)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(what));
    }
    Ok(())
}

// ── Referring organizations ─────────────────────────────────────────

pub(super) async fn insert_referring_org(
    pool: &PgPool,
    org: ReferringOrg,
) -> Result<ReferringOrg, StoreError> {
    sqlx::query(&format!(
        "INSERT INTO referring_orgs ({ORG_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
    ))
    .bind(&org.id)
    .bind(&org.name)
    .bind(&org.contact_person)
    .bind(&org.phone)
    .bind(&org.email)
    .bind(org.deleted_at)
    .bind(org.created_at)
    .bind(org.updated_at)
    .execute(pool)
    .await?;
    Ok(org)
}

pub(super) async fn referring_org(
    pool: &PgPool,
    id: &str,
) -> Result<Option<ReferringOrg>, StoreError> {
    let row = sqlx::query_as::<_, OrgRow>(&format!(
        "SELECT {ORG_COLUMNS} FROM referring_orgs WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(OrgRow::into_record))
}

pub(super) async fn list_referring_orgs(
    pool: &PgPool,
    page: PageRequest,
) -> Result<Page<ReferringOrg>, StoreError> {
    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM referring_orgs WHERE deleted_at IS NULL")
            .fetch_one(pool)
            .await?;
    let rows = sqlx::query_as::<_, OrgRow>(&format!(
        "SELECT {ORG_COLUMNS} FROM referring_orgs WHERE deleted_at IS NULL
         ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
    ))
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await?;
    Ok(Page::new(
        rows.into_iter().map(OrgRow::into_record).collect(),
        total,
        page,
    ))
}

pub(super) async fn update_referring_org(
    pool: &PgPool,
    org: ReferringOrg,
) -> Result<ReferringOrg, StoreError> {
    let result = sqlx::query(
        "UPDATE referring_orgs SET name = $2, contact_person = $3, phone = $4, email = $5,
         updated_at = $6 WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(&org.id)
    .bind(&org.name)
    .bind(&org.contact_person)
    .bind(&org.phone)
    .bind(&org.email)
    .bind(org.updated_at)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("referring organization"));
    }
    Ok(org)
}

// ── Locations ───────────────────────────────────────────────────────

pub(super) async fn insert_location(
    pool: &PgPool,
    location: Location,
) -> Result<Location, StoreError> {
    sqlx::query(&format!(
        "INSERT INTO locations ({LOCATION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
    ))
    .bind(&location.id)
    .bind(&location.name)
    .bind(&location.postal_code)
    .bind(&location.address)
    .bind(location.capacity)
    .bind(location.occupied)
    .bind(location.deleted_at)
    .bind(location.created_at)
    .bind(location.updated_at)
    .execute(pool)
    .await?;
    Ok(location)
}

pub(super) async fn location(pool: &PgPool, id: &str) -> Result<Option<Location>, StoreError> {
    let row = sqlx::query_as::<_, LocationRow>(&format!(
        "SELECT {LOCATION_COLUMNS} FROM locations WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(LocationRow::into_record))
}

pub(super) async fn list_locations(
    pool: &PgPool,
    page: PageRequest,
) -> Result<Page<Location>, StoreError> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM locations WHERE deleted_at IS NULL")
        .fetch_one(pool)
        .await?;
    let rows = sqlx::query_as::<_, LocationRow>(&format!(
        "SELECT {LOCATION_COLUMNS} FROM locations WHERE deleted_at IS NULL
         ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
    ))
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await?;
    Ok(Page::new(
        rows.into_iter().map(LocationRow::into_record).collect(),
        total,
        page,
    ))
}

/// All live locations by name, for the dashboard.
pub(super) async fn all_locations(pool: &PgPool) -> Result<Vec<Location>, StoreError> {
    let rows = sqlx::query_as::<_, LocationRow>(&format!(
        "SELECT {LOCATION_COLUMNS} FROM locations WHERE deleted_at IS NULL ORDER BY name, id"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(LocationRow::into_record).collect())
}

pub(super) async fn update_location(
    pool: &PgPool,
    location: Location,
) -> Result<Location, StoreError> {
    let result = sqlx::query(
        "UPDATE locations SET name = $2, postal_code = $3, address = $4, capacity = $5,
         occupied = $6, updated_at = $7 WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(&location.id)
    .bind(&location.name)
    .bind(&location.postal_code)
    .bind(&location.address)
    .bind(location.capacity)
    .bind(location.occupied)
    .bind(location.updated_at)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("location"));
    }
    Ok(location)
}

// ── Attachments ─────────────────────────────────────────────────────

pub(super) async fn insert_attachment(
    pool: &PgPool,
    attachment: Attachment,
) -> Result<Attachment, StoreError> {
    sqlx::query(&format!(
        "INSERT INTO attachments ({ATTACHMENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
    ))
    .bind(&attachment.id)
    .bind(&attachment.name)
    .bind(&attachment.content_type)
    .bind(attachment.size)
    .bind(&attachment.object_key)
    .bind(&attachment.uploaded_by)
    .bind(attachment.created_at)
    .execute(pool)
    .await?;
    Ok(attachment)
}

pub(super) async fn attachment(pool: &PgPool, id: &str) -> Result<Option<Attachment>, StoreError> {
    let row = sqlx::query_as::<_, AttachmentRow>(&format!(
        "SELECT {ATTACHMENT_COLUMNS} FROM attachments WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(AttachmentRow::into_record))
}

/// Fail with `InvalidReference(field)` unless every id names an attachment.
pub(super) async fn ensure_attachments<'c>(
    executor: impl sqlx::PgExecutor<'c>,
    ids: &[String],
    field: &str,
) -> Result<(), StoreError> {
    if ids.is_empty() {
        return Ok(());
    }
    let found: i64 = sqlx::query_scalar(
        "SELECT COUNT(DISTINCT id) FROM attachments WHERE id = ANY($1)",
    )
    .bind(ids)
    .fetch_one(executor)
    .await?;
    let wanted = ids.iter().collect::<std::collections::HashSet<_>>().len();
    if usize::try_from(found).ok() != Some(wanted) {
        return Err(StoreError::InvalidReference(field.to_string()));
    }
    Ok(())
}

// ── Rows ────────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct OrgRow {
    id: String,
    name: String,
    contact_person: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrgRow {
    fn into_record(self) -> ReferringOrg {
        ReferringOrg {
            id: self.id,
            name: self.name,
            contact_person: self.contact_person,
            phone: self.phone,
            email: self.email,
            deleted_at: self.deleted_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LocationRow {
    id: String,
    name: String,
    postal_code: String,
    address: String,
    capacity: i32,
    occupied: i32,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl LocationRow {
    fn into_record(self) -> Location {
        Location {
            id: self.id,
            name: self.name,
            postal_code: self.postal_code,
            address: self.address,
            capacity: self.capacity,
            occupied: self.occupied,
            deleted_at: self.deleted_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AttachmentRow {
    id: String,
    name: String,
    content_type: String,
    size: i64,
    object_key: String,
    uploaded_by: Option<String>,
    created_at: DateTime<Utc>,
}

impl AttachmentRow {
    fn into_record(self) -> Attachment {
        Attachment {
            id: self.id,
            name: self.name,
            content_type: self.content_type,
            size: self.size,
            object_key: self.object_key,
            uploaded_by: self.uploaded_by,
            created_at: self.created_at,
        }
    }
}
