//! # RBAC Service
//!
//! Roles and their permission sets. Permissions are seeded per
//! `(resource, action)` and read-only; roles are named sets of them, and a
//! user holds at most one role.

use axum::http::StatusCode;
use thiserror::Error;

use care_core::records::{Permission, Role, RoleDetail};
use care_core::{new_id, now_micros};

use crate::db::{RoleUpdate, Store, StoreError};
use crate::error::AppError;

#[derive(Error, Debug)]
pub enum RbacError {
    #[error("a role with this name already exists")]
    RoleAlreadyExists,

    #[error("role not found")]
    RoleNotFound,

    #[error("permission not found")]
    PermissionNotFound,

    #[error("user not found")]
    UserNotFound,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for RbacError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AlreadyExists(constraint) if constraint == "roles_name_key" => {
                Self::RoleAlreadyExists
            }
            StoreError::NotFound("role") => Self::RoleNotFound,
            StoreError::NotFound("permission") => Self::PermissionNotFound,
            StoreError::NotFound("user") => Self::UserNotFound,
            StoreError::InvalidReference(constraint) if constraint.contains("permission") => {
                Self::PermissionNotFound
            }
            other => Self::Store(other),
        }
    }
}

impl From<RbacError> for AppError {
    fn from(err: RbacError) -> Self {
        let (status, code) = match &err {
            RbacError::RoleAlreadyExists => (StatusCode::CONFLICT, "ROLE_ALREADY_EXISTS"),
            RbacError::RoleNotFound => (StatusCode::NOT_FOUND, "ROLE_NOT_FOUND"),
            RbacError::PermissionNotFound => (StatusCode::NOT_FOUND, "PERMISSION_NOT_FOUND"),
            RbacError::UserNotFound => (StatusCode::NOT_FOUND, "USER_NOT_FOUND"),
            RbacError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };
        match err {
            RbacError::Store(e) => e.into(),
            other => AppError::domain(status, code, other.to_string()),
        }
    }
}

/// `CreateRoleWithPermissionsTx`.
pub async fn create_role(
    store: &Store,
    name: &str,
    description: Option<String>,
    permission_ids: Vec<String>,
) -> Result<RoleDetail, RbacError> {
    let now = now_micros();
    let role = Role {
        id: new_id(),
        name: name.trim().to_string(),
        description,
        created_at: now,
        updated_at: now,
    };
    let detail = store.create_role(role, permission_ids).await?;
    tracing::info!(role_id = %detail.role.id, role = %detail.role.name, "role created");
    Ok(detail)
}

/// `UpdateRoleWithPermissionsTx`: a supplied permission set replaces the
/// current one whole.
pub async fn update_role(
    store: &Store,
    id: &str,
    update: RoleUpdate,
) -> Result<RoleDetail, RbacError> {
    Ok(store.update_role(id, update, now_micros()).await?)
}

pub async fn delete_role(store: &Store, id: &str) -> Result<(), RbacError> {
    store.delete_role(id).await?;
    tracing::info!(role_id = id, "role deleted");
    Ok(())
}

pub async fn get_role(store: &Store, id: &str) -> Result<RoleDetail, RbacError> {
    store.role(id).await?.ok_or(RbacError::RoleNotFound)
}

pub async fn list_roles(store: &Store) -> Result<Vec<RoleDetail>, RbacError> {
    Ok(store.list_roles().await?)
}

pub async fn list_permissions(store: &Store) -> Result<Vec<Permission>, RbacError> {
    Ok(store.permissions().await?)
}

pub async fn grant(store: &Store, role_id: &str, permission_id: &str) -> Result<RoleDetail, RbacError> {
    store.grant_permission(role_id, permission_id).await?;
    get_role(store, role_id).await
}

pub async fn revoke(
    store: &Store,
    role_id: &str,
    permission_id: &str,
) -> Result<RoleDetail, RbacError> {
    store.revoke_permission(role_id, permission_id).await?;
    get_role(store, role_id).await
}

/// The user's role, `None` when unassigned.
pub async fn user_role(store: &Store, user_id: &str) -> Result<Option<RoleDetail>, RbacError> {
    ensure_user(store, user_id).await?;
    Ok(store.user_role(user_id).await?)
}

/// Replaces any role the user already holds.
pub async fn assign_role(
    store: &Store,
    user_id: &str,
    role_id: &str,
) -> Result<RoleDetail, RbacError> {
    store.assign_role(user_id, role_id).await?;
    tracing::info!(user_id, role_id, "role assigned");
    get_role(store, role_id).await
}

pub async fn unassign_role(store: &Store, user_id: &str) -> Result<(), RbacError> {
    ensure_user(store, user_id).await?;
    store.unassign_role(user_id).await.map_err(|err| match err {
        StoreError::NotFound("user role") => RbacError::RoleNotFound,
        other => other.into(),
    })
}

async fn ensure_user(store: &Store, user_id: &str) -> Result<(), RbacError> {
    match store.user_by_id(user_id).await? {
        Some(_) => Ok(()),
        None => Err(RbacError::UserNotFound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use care_core::records::User;

    use crate::db::memory::MemoryStore;
    use crate::db::permission_id;

    fn store() -> Store {
        Arc::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn role_names_are_unique() {
        let store = store();
        create_role(&store, "planner", None, vec![]).await.unwrap();
        let err = create_role(&store, "planner", None, vec![]).await.unwrap_err();
        assert!(matches!(err, RbacError::RoleAlreadyExists));
        assert_eq!(
            AppError::from(err).status_and_code(),
            (StatusCode::CONFLICT, "ROLE_ALREADY_EXISTS")
        );
    }

    #[tokio::test]
    async fn update_replaces_the_permission_set() {
        let store = store();
        let role = create_role(
            &store,
            "planner",
            Some("plans care".into()),
            vec![permission_id("client", "read"), permission_id("client", "update")],
        )
        .await
        .unwrap();
        assert_eq!(role.permissions.len(), 2);

        let updated = update_role(
            &store,
            &role.role.id,
            RoleUpdate {
                name: None,
                description: None,
                permission_ids: Some(vec![permission_id("evaluation", "read")]),
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.role.name, "planner");
        assert_eq!(updated.permissions.len(), 1);
        assert_eq!(updated.permissions[0].resource, "evaluation");
    }

    #[tokio::test]
    async fn grant_and_revoke_single_permissions() {
        let store = store();
        let role = create_role(&store, "viewer", None, vec![]).await.unwrap();
        let id = &role.role.id;

        let granted = grant(&store, id, &permission_id("dashboard", "read")).await.unwrap();
        assert_eq!(granted.permissions.len(), 1);
        let revoked = revoke(&store, id, &permission_id("dashboard", "read")).await.unwrap();
        assert!(revoked.permissions.is_empty());

        assert!(matches!(
            grant(&store, id, "unknown-permission-id").await,
            Err(RbacError::PermissionNotFound)
        ));
        assert!(matches!(
            grant(&store, &new_id(), &permission_id("dashboard", "read")).await,
            Err(RbacError::RoleNotFound)
        ));
    }

    #[tokio::test]
    async fn assignment_requires_a_known_user() {
        let store = store();
        let role = create_role(&store, "viewer", None, vec![]).await.unwrap();
        assert!(matches!(
            assign_role(&store, "ghost", &role.role.id).await,
            Err(RbacError::UserNotFound)
        ));
        assert!(matches!(user_role(&store, "ghost").await, Err(RbacError::UserNotFound)));
    }

    #[tokio::test]
    async fn user_role_round_trip() {
        let store = store();
        let now = now_micros();
        let user_id = new_id();
        store
            .create_employee_with_user(
                User {
                    id: user_id.clone(),
                    email: "x@example.nl".into(),
                    password_hash: String::new(),
                    created_at: now,
                    updated_at: now,
                },
                care_core::records::Employee {
                    id: new_id(),
                    user_id: user_id.clone(),
                    first_name: "X".into(),
                    last_name: "Y".into(),
                    bsn: "222333444".into(),
                    date_of_birth: chrono::NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
                    phone: None,
                    gender: care_core::Gender::Other,
                    role_label: None,
                    deleted_at: None,
                    created_at: now,
                    updated_at: now,
                },
            )
            .await
            .unwrap();
        let role = create_role(&store, "viewer", None, vec![permission_id("client", "read")])
            .await
            .unwrap();

        assert!(user_role(&store, &user_id).await.unwrap().is_none());
        assign_role(&store, &user_id, &role.role.id).await.unwrap();
        assert_eq!(
            user_role(&store, &user_id).await.unwrap().unwrap().role.id,
            role.role.id
        );
        assert!(store.user_has_permission(&user_id, "client", "read").await.unwrap());

        unassign_role(&store, &user_id).await.unwrap();
        assert!(!store.user_has_permission(&user_id, "client", "read").await.unwrap());
    }
}
