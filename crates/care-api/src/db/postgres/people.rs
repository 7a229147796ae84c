//! Users, sessions and employees.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgConnection, PgPool};

use care_core::records::{Employee, Session, User};
use care_core::{Page, PageRequest};

use super::parse;
use crate::db::{token_hashes_match, RotateOutcome, StoreError};

const USER_COLUMNS: &str = "id, email, password_hash, created_at, updated_at";

const SESSION_COLUMNS: &str = "id, user_id, token_family, token_hash, expires_at, user_agent, \
     ip_address, revoked_at, created_at, updated_at";

const EMPLOYEE_COLUMNS: &str = "id, user_id, first_name, last_name, bsn, date_of_birth, phone, \
     gender, role_label, deleted_at, created_at, updated_at";

// ── Users ───────────────────────────────────────────────────────────

pub(super) async fn count_users(pool: &PgPool) -> Result<i64, StoreError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub(super) async fn user_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, StoreError> {
    let row = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
    ))
    .bind(email.trim().to_lowercase())
    .fetch_optional(pool)
    .await?;
    Ok(row.map(UserRow::into_record))
}

pub(super) async fn user_by_id(pool: &PgPool, id: &str) -> Result<Option<User>, StoreError> {
    let row = sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(UserRow::into_record))
}

/// `DeleteUserTx`. Sessions and the role assignment cascade.
pub(super) async fn delete_user(
    conn: &mut PgConnection,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE employees SET deleted_at = $2, updated_at = $2
         WHERE user_id = $1 AND deleted_at IS NULL",
    )
    .bind(user_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("user"));
    }
    Ok(())
}

// ── Sessions ────────────────────────────────────────────────────────

pub(super) async fn insert_session(pool: &PgPool, session: &Session) -> Result<(), StoreError> {
    sqlx::query(&format!(
        "INSERT INTO sessions ({SESSION_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
    ))
    .bind(&session.id)
    .bind(&session.user_id)
    .bind(&session.token_family)
    .bind(&session.token_hash)
    .bind(session.expires_at)
    .bind(&session.user_agent)
    .bind(&session.ip_address)
    .bind(session.revoked_at)
    .bind(session.created_at)
    .bind(session.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

/// `RotateSessionTx`.
pub(super) async fn rotate_session(
    conn: &mut PgConnection,
    family: &str,
    presented_hash: &str,
    next_hash: &str,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<RotateOutcome, StoreError> {
    let row = sqlx::query_as::<_, SessionRow>(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions
         WHERE token_family = $1 AND revoked_at IS NULL AND expires_at > $2
         FOR UPDATE"
    ))
    .bind(family)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;
    let Some(mut session) = row.map(SessionRow::into_record) else {
        return Ok(RotateOutcome::NotFound);
    };
    if !token_hashes_match(&session.token_hash, presented_hash) {
        revoke(&mut *conn, family, now).await?;
        return Ok(RotateOutcome::ReuseDetected);
    }
    sqlx::query(
        "UPDATE sessions SET token_hash = $2, expires_at = $3, updated_at = $4 WHERE id = $1",
    )
    .bind(&session.id)
    .bind(next_hash)
    .bind(expires_at)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    session.token_hash = next_hash.to_string();
    session.expires_at = expires_at;
    session.updated_at = now;
    Ok(RotateOutcome::Rotated(session))
}

pub(super) async fn revoke_family(
    pool: &PgPool,
    family: &str,
    now: DateTime<Utc>,
) -> Result<u64, StoreError> {
    revoke(pool, family, now).await
}

async fn revoke<'c>(
    executor: impl sqlx::PgExecutor<'c>,
    family: &str,
    now: DateTime<Utc>,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "UPDATE sessions SET revoked_at = $2, updated_at = $2
         WHERE token_family = $1 AND revoked_at IS NULL",
    )
    .bind(family)
    .bind(now)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

// ── Employees ───────────────────────────────────────────────────────

/// `CreateEmployeeWithUserTx`.
pub(super) async fn create_employee_with_user(
    conn: &mut PgConnection,
    user: &User,
    employee: Employee,
) -> Result<Employee, StoreError> {
    sqlx::query(&format!(
        "INSERT INTO users ({USER_COLUMNS}) VALUES ($1, $2, $3, $4, $5)"
    ))
    .bind(&user.id)
    .bind(user.email.trim().to_lowercase())
    .bind(&user.password_hash)
    .bind(user.created_at)
    .bind(user.updated_at)
    .execute(&mut *conn)
    .await?;

    sqlx::query(&format!(
        "INSERT INTO employees ({EMPLOYEE_COLUMNS})
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)"
    ))
    .bind(&employee.id)
    .bind(&employee.user_id)
    .bind(&employee.first_name)
    .bind(&employee.last_name)
    .bind(&employee.bsn)
    .bind(employee.date_of_birth)
    .bind(&employee.phone)
    .bind(employee.gender.as_str())
    .bind(&employee.role_label)
    .bind(employee.deleted_at)
    .bind(employee.created_at)
    .bind(employee.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(employee)
}

pub(super) async fn employee(pool: &PgPool, id: &str) -> Result<Option<Employee>, StoreError> {
    let row = sqlx::query_as::<_, EmployeeRow>(&format!(
        "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE id = $1 AND deleted_at IS NULL"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.map(EmployeeRow::into_record).transpose()
}

pub(super) async fn employee_by_user(
    pool: &PgPool,
    user_id: &str,
) -> Result<Option<Employee>, StoreError> {
    let row = sqlx::query_as::<_, EmployeeRow>(&format!(
        "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE user_id = $1 AND deleted_at IS NULL"
    ))
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    row.map(EmployeeRow::into_record).transpose()
}

pub(super) async fn list_employees(
    pool: &PgPool,
    page: PageRequest,
) -> Result<Page<Employee>, StoreError> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM employees WHERE deleted_at IS NULL")
        .fetch_one(pool)
        .await?;
    let rows = sqlx::query_as::<_, EmployeeRow>(&format!(
        "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE deleted_at IS NULL
         ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
    ))
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await?;
    let items = rows
        .into_iter()
        .map(EmployeeRow::into_record)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Page::new(items, total, page))
}

pub(super) async fn update_employee(
    pool: &PgPool,
    employee: Employee,
) -> Result<Employee, StoreError> {
    let result = sqlx::query(
        "UPDATE employees SET first_name = $2, last_name = $3, bsn = $4, date_of_birth = $5,
         phone = $6, gender = $7, role_label = $8, updated_at = $9
         WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(&employee.id)
    .bind(&employee.first_name)
    .bind(&employee.last_name)
    .bind(&employee.bsn)
    .bind(employee.date_of_birth)
    .bind(&employee.phone)
    .bind(employee.gender.as_str())
    .bind(&employee.role_label)
    .bind(employee.updated_at)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("employee"));
    }
    Ok(employee)
}

// ── Rows ────────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    email: String,
    password_hash: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn into_record(self) -> User {
        User {
            id: self.id,
            email: self.email,
            password_hash: self.password_hash,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    user_id: String,
    token_family: String,
    token_hash: String,
    expires_at: DateTime<Utc>,
    user_agent: Option<String>,
    ip_address: Option<String>,
    revoked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SessionRow {
    fn into_record(self) -> Session {
        Session {
            id: self.id,
            user_id: self.user_id,
            token_family: self.token_family,
            token_hash: self.token_hash,
            expires_at: self.expires_at,
            user_agent: self.user_agent,
            ip_address: self.ip_address,
            revoked_at: self.revoked_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct EmployeeRow {
    id: String,
    user_id: String,
    first_name: String,
    last_name: String,
    bsn: String,
    date_of_birth: NaiveDate,
    phone: Option<String>,
    gender: String,
    role_label: Option<String>,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl EmployeeRow {
    fn into_record(self) -> Result<Employee, StoreError> {
        Ok(Employee {
            id: self.id,
            user_id: self.user_id,
            first_name: self.first_name,
            last_name: self.last_name,
            bsn: self.bsn,
            date_of_birth: self.date_of_birth,
            phone: self.phone,
            gender: parse(&self.gender)?,
            role_label: self.role_label,
            deleted_at: self.deleted_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
