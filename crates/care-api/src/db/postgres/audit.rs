//! Audit log persistence.
//!
//! Appends are serialized with a transaction-scoped advisory lock so two
//! writers never chain onto the same head.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use care_core::audit::{AuditEntry, NewAuditEntry, GENESIS};
use care_core::{Page, PageRequest};

use super::parse;
use crate::db::StoreError;

/// Advisory lock key guarding the chain head.
const CHAIN_LOCK: i64 = 0x6175_6469_745f_6c6f;

const AUDIT_COLUMNS: &str = "id, user_id, employee_id, client_id, action, resource_type, \
     resource_id, old_value, new_value, ip_address, user_agent, request_id, status, \
     failure_reason, prev_hash, current_hash, created_at";

pub(super) async fn append(
    conn: &mut PgConnection,
    entry: NewAuditEntry,
    id: String,
    now: DateTime<Utc>,
) -> Result<AuditEntry, StoreError> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(CHAIN_LOCK)
        .execute(&mut *conn)
        .await?;
    let head: Option<String> =
        sqlx::query_scalar("SELECT current_hash FROM audit_logs ORDER BY seq DESC LIMIT 1")
            .fetch_optional(&mut *conn)
            .await?;
    let sealed = AuditEntry::seal(entry, id, head.as_deref().unwrap_or(GENESIS), now);

    sqlx::query(&format!(
        "INSERT INTO audit_logs ({AUDIT_COLUMNS})
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
    ))
    .bind(&sealed.id)
    .bind(&sealed.user_id)
    .bind(&sealed.employee_id)
    .bind(&sealed.client_id)
    .bind(sealed.action.as_str())
    .bind(&sealed.resource_type)
    .bind(&sealed.resource_id)
    .bind(sealed.old_value.as_ref().map(|v| v.to_string()))
    .bind(sealed.new_value.as_ref().map(|v| v.to_string()))
    .bind(&sealed.ip_address)
    .bind(&sealed.user_agent)
    .bind(&sealed.request_id)
    .bind(sealed.status.as_str())
    .bind(&sealed.failure_reason)
    .bind(&sealed.prev_hash)
    .bind(&sealed.current_hash)
    .bind(sealed.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(sealed)
}

/// Newest first.
pub(super) async fn list(pool: &PgPool, page: PageRequest) -> Result<Page<AuditEntry>, StoreError> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_logs")
        .fetch_one(pool)
        .await?;
    let rows = sqlx::query_as::<_, AuditRow>(&format!(
        "SELECT {AUDIT_COLUMNS} FROM audit_logs ORDER BY seq DESC LIMIT $1 OFFSET $2"
    ))
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await?;
    let items = rows
        .into_iter()
        .map(AuditRow::into_record)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Page::new(items, total, page))
}

/// The whole chain in insertion order.
pub(super) async fn chain(pool: &PgPool) -> Result<Vec<AuditEntry>, StoreError> {
    let rows = sqlx::query_as::<_, AuditRow>(&format!(
        "SELECT {AUDIT_COLUMNS} FROM audit_logs ORDER BY seq ASC"
    ))
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(AuditRow::into_record).collect()
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: String,
    user_id: Option<String>,
    employee_id: Option<String>,
    client_id: Option<String>,
    action: String,
    resource_type: String,
    resource_id: Option<String>,
    old_value: Option<String>,
    new_value: Option<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    request_id: Option<String>,
    status: String,
    failure_reason: Option<String>,
    prev_hash: String,
    current_hash: String,
    created_at: DateTime<Utc>,
}

impl AuditRow {
    fn into_record(self) -> Result<AuditEntry, StoreError> {
        Ok(AuditEntry {
            id: self.id,
            user_id: self.user_id,
            employee_id: self.employee_id,
            client_id: self.client_id,
            action: parse(&self.action)?,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            old_value: json_column(self.old_value)?,
            new_value: json_column(self.new_value)?,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            request_id: self.request_id,
            status: parse(&self.status)?,
            failure_reason: self.failure_reason,
            prev_hash: self.prev_hash,
            current_hash: self.current_hash,
            created_at: self.created_at,
        })
    }
}

fn json_column(text: Option<String>) -> Result<Option<serde_json::Value>, StoreError> {
    text.map(|t| {
        serde_json::from_str(&t)
            .map_err(|e| StoreError::Corrupt(format!("audit value is not JSON: {e}")))
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_json_text_parses_back() {
        let value = json_column(Some(r#"{"name":"x"}"#.to_string())).unwrap();
        assert_eq!(value, Some(serde_json::json!({"name": "x"})));
        assert_eq!(json_column(None).unwrap(), None);
    }

    #[test]
    fn malformed_json_text_is_corruption() {
        let err = json_column(Some("{not json".to_string())).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }
}
