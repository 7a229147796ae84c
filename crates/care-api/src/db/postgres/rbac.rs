//! Roles, permissions and user role assignment.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use care_core::records::{Permission, Role, RoleDetail};

use crate::db::{RoleUpdate, StoreError};

const ROLE_COLUMNS: &str = "id, name, description, created_at, updated_at";

pub(super) async fn permissions(pool: &PgPool) -> Result<Vec<Permission>, StoreError> {
    let rows = sqlx::query_as::<_, PermissionRow>(
        "SELECT id, resource, action, description FROM permissions ORDER BY resource, action",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(PermissionRow::into_record).collect())
}

/// `CreateRoleWithPermissionsTx`.
pub(super) async fn create_role(
    conn: &mut PgConnection,
    role: &Role,
    permission_ids: &[String],
) -> Result<(), StoreError> {
    ensure_permissions(&mut *conn, permission_ids).await?;
    sqlx::query(&format!(
        "INSERT INTO roles ({ROLE_COLUMNS}) VALUES ($1, $2, $3, $4, $5)"
    ))
    .bind(&role.id)
    .bind(&role.name)
    .bind(&role.description)
    .bind(role.created_at)
    .bind(role.updated_at)
    .execute(&mut *conn)
    .await?;
    grant_all(&mut *conn, &role.id, permission_ids).await
}

/// `UpdateRoleWithPermissionsTx`.
pub(super) async fn update_role(
    conn: &mut PgConnection,
    id: &str,
    update: RoleUpdate,
    now: DateTime<Utc>,
) -> Result<Role, StoreError> {
    let row = sqlx::query_as::<_, RoleRow>(&format!(
        "UPDATE roles SET name = COALESCE($2, name),
                          description = COALESCE($3, description),
                          updated_at = $4
         WHERE id = $1
         RETURNING {ROLE_COLUMNS}"
    ))
    .bind(id)
    .bind(&update.name)
    .bind(&update.description)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(StoreError::NotFound("role"))?;

    if let Some(permission_ids) = &update.permission_ids {
        ensure_permissions(&mut *conn, permission_ids).await?;
        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        grant_all(&mut *conn, id, permission_ids).await?;
    }
    Ok(row.into_record())
}

/// Permissions and user assignments cascade.
pub(super) async fn delete_role(pool: &PgPool, id: &str) -> Result<(), StoreError> {
    let result = sqlx::query("DELETE FROM roles WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("role"));
    }
    Ok(())
}

pub(super) async fn detail<'c>(
    executor: impl sqlx::PgExecutor<'c>,
    role: Role,
) -> Result<RoleDetail, StoreError> {
    let rows = sqlx::query_as::<_, PermissionRow>(
        "SELECT p.id, p.resource, p.action, p.description
         FROM permissions p JOIN role_permissions rp ON rp.permission_id = p.id
         WHERE rp.role_id = $1
         ORDER BY p.resource, p.action",
    )
    .bind(&role.id)
    .fetch_all(executor)
    .await?;
    Ok(RoleDetail {
        role,
        permissions: rows.into_iter().map(PermissionRow::into_record).collect(),
    })
}

pub(super) async fn role(pool: &PgPool, id: &str) -> Result<Option<RoleDetail>, StoreError> {
    let row = sqlx::query_as::<_, RoleRow>(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    match row {
        Some(row) => Ok(Some(detail(pool, row.into_record()).await?)),
        None => Ok(None),
    }
}

pub(super) async fn role_by_name(
    pool: &PgPool,
    name: &str,
) -> Result<Option<RoleDetail>, StoreError> {
    let row = sqlx::query_as::<_, RoleRow>(&format!(
        "SELECT {ROLE_COLUMNS} FROM roles WHERE name = $1"
    ))
    .bind(name)
    .fetch_optional(pool)
    .await?;
    match row {
        Some(row) => Ok(Some(detail(pool, row.into_record()).await?)),
        None => Ok(None),
    }
}

pub(super) async fn list_roles(pool: &PgPool) -> Result<Vec<RoleDetail>, StoreError> {
    let rows = sqlx::query_as::<_, RoleRow>(&format!(
        "SELECT {ROLE_COLUMNS} FROM roles ORDER BY name"
    ))
    .fetch_all(pool)
    .await?;
    let mut roles = Vec::with_capacity(rows.len());
    for row in rows {
        roles.push(detail(pool, row.into_record()).await?);
    }
    Ok(roles)
}

pub(super) async fn grant_permission(
    pool: &PgPool,
    role_id: &str,
    permission_id: &str,
) -> Result<(), StoreError> {
    ensure_role(pool, role_id).await?;
    ensure_permissions(pool, &[permission_id.to_string()]).await?;
    sqlx::query(
        "INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2)
         ON CONFLICT DO NOTHING",
    )
    .bind(role_id)
    .bind(permission_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub(super) async fn revoke_permission(
    pool: &PgPool,
    role_id: &str,
    permission_id: &str,
) -> Result<(), StoreError> {
    ensure_role(pool, role_id).await?;
    let result =
        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1 AND permission_id = $2")
            .bind(role_id)
            .bind(permission_id)
            .execute(pool)
            .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("permission"));
    }
    Ok(())
}

pub(super) async fn user_role(
    pool: &PgPool,
    user_id: &str,
) -> Result<Option<RoleDetail>, StoreError> {
    let row = sqlx::query_as::<_, RoleRow>(
        "SELECT r.id, r.name, r.description, r.created_at, r.updated_at
         FROM roles r JOIN user_roles ur ON ur.role_id = r.id
         WHERE ur.user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    match row {
        Some(row) => Ok(Some(detail(pool, row.into_record()).await?)),
        None => Ok(None),
    }
}

/// Replaces any role the user already holds.
pub(super) async fn assign_role(
    pool: &PgPool,
    user_id: &str,
    role_id: &str,
) -> Result<(), StoreError> {
    let user_exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
        .bind(user_id)
        .fetch_one(pool)
        .await?;
    if !user_exists {
        return Err(StoreError::NotFound("user"));
    }
    ensure_role(pool, role_id).await?;
    sqlx::query(
        "INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2)
         ON CONFLICT (user_id) DO UPDATE SET role_id = EXCLUDED.role_id",
    )
    .bind(user_id)
    .bind(role_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub(super) async fn unassign_role(pool: &PgPool, user_id: &str) -> Result<(), StoreError> {
    let result = sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound("user role"));
    }
    Ok(())
}

pub(super) async fn user_has_permission(
    pool: &PgPool,
    user_id: &str,
    resource: &str,
    action: &str,
) -> Result<bool, StoreError> {
    let allowed: bool = sqlx::query_scalar(
        "SELECT EXISTS (
             SELECT 1 FROM user_roles ur
             JOIN role_permissions rp ON rp.role_id = ur.role_id
             JOIN permissions p ON p.id = rp.permission_id
             WHERE ur.user_id = $1 AND p.resource = $2 AND p.action = $3)",
    )
    .bind(user_id)
    .bind(resource)
    .bind(action)
    .fetch_one(pool)
    .await?;
    Ok(allowed)
}

async fn ensure_role<'c>(executor: impl sqlx::PgExecutor<'c>, id: &str) -> Result<(), StoreError> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM roles WHERE id = $1)")
        .bind(id)
        .fetch_one(executor)
        .await?;
    if !exists {
        return Err(StoreError::NotFound("role"));
    }
    Ok(())
}

async fn ensure_permissions<'c>(
    executor: impl sqlx::PgExecutor<'c>,
    ids: &[String],
) -> Result<(), StoreError> {
    if ids.is_empty() {
        return Ok(());
    }
    let found: i64 =
        sqlx::query_scalar("SELECT COUNT(DISTINCT id) FROM permissions WHERE id = ANY($1)")
            .bind(ids)
            .fetch_one(executor)
            .await?;
    let wanted = ids.iter().collect::<std::collections::HashSet<_>>().len();
    if usize::try_from(found).ok() != Some(wanted) {
        return Err(StoreError::NotFound("permission"));
    }
    Ok(())
}

async fn grant_all(
    conn: &mut PgConnection,
    role_id: &str,
    permission_ids: &[String],
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO role_permissions (role_id, permission_id)
         SELECT $1, unnest($2::text[])
         ON CONFLICT DO NOTHING",
    )
    .bind(role_id)
    .bind(permission_ids)
    .execute(conn)
    .await?;
    Ok(())
}

#[derive(sqlx::FromRow)]
struct RoleRow {
    id: String,
    name: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RoleRow {
    fn into_record(self) -> Role {
        Role {
            id: self.id,
            name: self.name,
            description: self.description,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PermissionRow {
    id: String,
    resource: String,
    action: String,
    description: Option<String>,
}

impl PermissionRow {
    fn into_record(self) -> Permission {
        Permission {
            id: self.id,
            resource: self.resource,
            action: self.action,
            description: self.description,
        }
    }
}
