//! # Administrator Bootstrap
//!
//! Runs once at startup, after the datastore is reachable.
//!
//! ## Sequence
//!
//! 1. **Check configuration**: both `BOOTSTRAP_ADMIN_EMAIL` and
//!    `BOOTSTRAP_ADMIN_PASSWORD` must be set, otherwise nothing happens.
//! 2. **Check emptiness**: only a datastore without any user is seeded.
//! 3. **Admin role**: reuse the `admin` role or create it holding every
//!    seeded permission.
//! 4. **Account**: create the user and employee profile and assign the role.
//! 5. **Audit**: one entry for the created employee, written synchronously.

use chrono::NaiveDate;

use care_core::records::RoleDetail;
use care_core::{AuditAction, AuditStatus, Gender, NewAuditEntry};

use crate::db::{permission_id, StoreError, ACTIONS, RESOURCES};
use crate::services::auth::{self, AuthError, NewEmployeeAccount};
use crate::services::rbac::{self, RbacError};
use crate::state::AppState;

/// Name of the role holding every permission.
pub const ADMIN_ROLE: &str = "admin";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("datastore error: {0}")]
    Store(#[from] StoreError),

    #[error("admin role: {0}")]
    Role(#[from] RbacError),

    #[error("admin account: {0}")]
    Account(#[from] AuthError),
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Email or password not configured.
    NotConfigured,
    /// At least one user already exists.
    AlreadyInitialized,
    /// The administrator was created.
    Created { user_id: String, employee_id: String },
}

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Create the first administrator when configured and the datastore holds
/// no users.
pub async fn bootstrap_admin(state: &AppState) -> Result<BootstrapOutcome, BootstrapError> {
    let (Some(email), Some(password)) = (
        state.config.bootstrap_admin_email.clone(),
        state.config.bootstrap_admin_password.clone(),
    ) else {
        return Ok(BootstrapOutcome::NotConfigured);
    };

    let users = state.store.count_users().await?;
    if users > 0 {
        tracing::debug!(users, "users present; skipping admin bootstrap");
        return Ok(BootstrapOutcome::AlreadyInitialized);
    }

    let role = admin_role(state).await?;
    let employee = auth::create_employee_account(
        state,
        NewEmployeeAccount {
            email,
            password,
            first_name: "System".into(),
            last_name: "Administrator".into(),
            bsn: "000000000".into(),
            date_of_birth: NaiveDate::default(),
            phone: None,
            gender: Gender::Other,
            role_label: Some(ADMIN_ROLE.into()),
            role_id: Some(role.role.id.clone()),
        },
    )
    .await?;

    state
        .audit
        .append_now(NewAuditEntry {
            user_id: Some(employee.user_id.clone()),
            employee_id: Some(employee.id.clone()),
            client_id: None,
            action: AuditAction::Create,
            resource_type: "employee".into(),
            resource_id: Some(employee.id.clone()),
            old_value: None,
            new_value: None,
            ip_address: None,
            user_agent: None,
            request_id: None,
            status: AuditStatus::Success,
            failure_reason: None,
        })
        .await?;

    tracing::info!(
        user_id = %employee.user_id,
        employee_id = %employee.id,
        "bootstrap administrator created"
    );
    Ok(BootstrapOutcome::Created {
        user_id: employee.user_id,
        employee_id: employee.id,
    })
}

async fn admin_role(state: &AppState) -> Result<RoleDetail, BootstrapError> {
    if let Some(existing) = state.store.role_by_name(ADMIN_ROLE).await? {
        return Ok(existing);
    }
    let every_permission = RESOURCES
        .iter()
        .flat_map(|resource| ACTIONS.iter().map(move |action| permission_id(resource, action)))
        .collect();
    Ok(rbac::create_role(
        &state.store,
        ADMIN_ROLE,
        Some("Every permission".into()),
        every_permission,
    )
    .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn configured() -> AppState {
        let mut config = AppConfig::development();
        config.bootstrap_admin_email = Some("Admin@Example.nl".into());
        config.bootstrap_admin_password = Some("bootstrap secret".into());
        AppState::with_config(config).unwrap()
    }

    #[tokio::test]
    async fn unconfigured_bootstrap_does_nothing() {
        let state = AppState::in_memory().unwrap();
        assert_eq!(
            bootstrap_admin(&state).await.unwrap(),
            BootstrapOutcome::NotConfigured
        );
        assert_eq!(state.store.count_users().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn admin_holds_every_permission() {
        let state = configured();
        let BootstrapOutcome::Created { user_id, .. } = bootstrap_admin(&state).await.unwrap()
        else {
            panic!("expected the admin to be created");
        };
        for resource in RESOURCES {
            for action in ACTIONS {
                assert!(
                    state
                        .store
                        .user_has_permission(&user_id, resource, action)
                        .await
                        .unwrap(),
                    "missing {resource}.{action}"
                );
            }
        }
        let user = state.store.user_by_id(&user_id).await.unwrap().unwrap();
        assert_eq!(user.email, "admin@example.nl");
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let state = configured();
        bootstrap_admin(&state).await.unwrap();
        assert_eq!(
            bootstrap_admin(&state).await.unwrap(),
            BootstrapOutcome::AlreadyInitialized
        );
        assert_eq!(state.store.count_users().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn bootstrap_is_audited() {
        let state = configured();
        bootstrap_admin(&state).await.unwrap();
        let chain = state.store.audit_chain().await.unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].resource_type, "employee");
    }
}
