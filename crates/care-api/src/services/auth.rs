//! # Authentication Service
//!
//! Login, refresh rotation, logout and employee account creation.
//!
//! ## Refresh families
//!
//! Login starts a new family with a random rotation hash. The refresh token
//! carries the raw hash; the session row stores only its SHA-256. On refresh
//! the gateway's `RotateSessionTx` compares the presented hash with the
//! live session under a row lock:
//!
//! - match: the hash is replaced and a new pair is issued in the same family;
//! - mismatch: the whole family is revoked ([`AuthError::RefreshReuseDetected`]);
//! - no live session: [`AuthError::InvalidToken`].

use axum::http::StatusCode;
use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use care_auth::password::verify_dummy;
use care_auth::{hash_password, verify_password, PasswordError, TokenError, TokenPair};
use care_core::records::{Employee, RoleDetail, Session, User};
use care_core::{new_id, now_micros, sha256_hex, Gender};

use crate::auth::ClientMeta;
use crate::db::{RotateOutcome, StoreError};
use crate::error::AppError;
use crate::state::AppState;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("invalid or expired token")]
    InvalidToken,

    #[error("refresh token reuse detected; all sessions in this family were revoked")]
    RefreshReuseDetected,

    #[error("user not found")]
    UserNotFound,

    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error(transparent)]
    Token(TokenError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::InvalidToken => Self::InvalidToken,
            other => Self::Token(other),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => {
                AppError::domain(StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS", err.to_string())
            }
            AuthError::InvalidToken => {
                AppError::domain(StatusCode::UNAUTHORIZED, "INVALID_TOKEN", err.to_string())
            }
            AuthError::RefreshReuseDetected => AppError::domain(
                StatusCode::UNAUTHORIZED,
                "REFRESH_REUSE_DETECTED",
                err.to_string(),
            ),
            AuthError::UserNotFound => {
                AppError::domain(StatusCode::NOT_FOUND, "USER_NOT_FOUND", err.to_string())
            }
            AuthError::Password(PasswordError::TooShort) => AppError::Validation(err.to_string()),
            AuthError::Password(_) | AuthError::Token(_) => AppError::Internal(err.to_string()),
            AuthError::Store(e) => e.into(),
        }
    }
}

/// Tokens plus the identity they were issued to.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResult {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user: User,
    pub employee: Option<Employee>,
}

/// The caller's own profile.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user: User,
    pub employee: Option<Employee>,
    pub role: Option<RoleDetail>,
}

/// Everything needed to open an employee account.
#[derive(Debug, Clone)]
pub struct NewEmployeeAccount {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub bsn: String,
    pub date_of_birth: NaiveDate,
    pub phone: Option<String>,
    pub gender: Gender,
    pub role_label: Option<String>,
    /// Role assigned to the new user, if any.
    pub role_id: Option<String>,
}

pub async fn login(
    state: &AppState,
    email: &str,
    password: &str,
    meta: &ClientMeta,
) -> Result<LoginResult, AuthError> {
    let email = email.trim().to_lowercase();
    let Some(user) = state.store.user_by_email(&email).await? else {
        verify_dummy(password);
        return Err(AuthError::InvalidCredentials);
    };
    if !verify_password(password, &user.password_hash)? {
        tracing::info!(user_id = %user.id, "login failed: wrong password");
        return Err(AuthError::InvalidCredentials);
    }

    let employee = state.store.employee_by_user(&user.id).await?;
    let tokens = open_session(
        state,
        &user.id,
        employee.as_ref().map(|e| e.id.as_str()),
        meta,
    )
    .await?;
    tracing::info!(user_id = %user.id, "login succeeded");
    Ok(LoginResult {
        tokens,
        user,
        employee,
    })
}

/// Start a new refresh family for `user_id`.
async fn open_session(
    state: &AppState,
    user_id: &str,
    employee_id: Option<&str>,
    meta: &ClientMeta,
) -> Result<TokenPair, AuthError> {
    let family = new_id();
    let hash = new_id();
    let now = now_micros();
    let pair = state
        .tokens
        .issue_pair(user_id, employee_id, &family, &hash, now)?;
    state
        .store
        .insert_session(Session {
            id: new_id(),
            user_id: user_id.to_string(),
            token_family: family,
            token_hash: sha256_hex(&hash),
            expires_at: pair.refresh_expires_at,
            user_agent: meta.user_agent.clone(),
            ip_address: Some(meta.ip.clone()),
            revoked_at: None,
            created_at: now,
            updated_at: now,
        })
        .await?;
    Ok(pair)
}

pub async fn refresh(state: &AppState, refresh_token: &str) -> Result<TokenPair, AuthError> {
    let claims = state.tokens.verify_refresh(refresh_token)?;
    let next_hash = new_id();
    let now = now_micros();
    let expires_at = now + state.tokens.refresh_ttl();

    let outcome = state
        .store
        .rotate_session(
            &claims.token_family,
            &sha256_hex(&claims.token_hash),
            &sha256_hex(&next_hash),
            expires_at,
            now,
        )
        .await?;

    match outcome {
        RotateOutcome::Rotated(session) if session.user_id == claims.sub => {
            let employee = state.store.employee_by_user(&claims.sub).await?;
            let pair = state.tokens.issue_pair(
                &claims.sub,
                employee.as_ref().map(|e| e.id.as_str()),
                &claims.token_family,
                &next_hash,
                now,
            )?;
            Ok(pair)
        }
        RotateOutcome::Rotated(_) | RotateOutcome::NotFound => Err(AuthError::InvalidToken),
        RotateOutcome::ReuseDetected => {
            tracing::warn!(
                user_id = %claims.sub,
                family = %claims.token_family,
                "refresh token reuse detected; family revoked"
            );
            Err(AuthError::RefreshReuseDetected)
        }
    }
}

/// Revoke the family of a valid refresh token. Returns the number of
/// sessions revoked.
pub async fn logout(state: &AppState, refresh_token: &str) -> Result<u64, AuthError> {
    let claims = state.tokens.verify_refresh(refresh_token)?;
    let revoked = state
        .store
        .revoke_family(&claims.token_family, now_micros())
        .await?;
    tracing::info!(user_id = %claims.sub, revoked, "logged out");
    Ok(revoked)
}

pub async fn profile(state: &AppState, user_id: &str) -> Result<Profile, AuthError> {
    let user = state
        .store
        .user_by_id(user_id)
        .await?
        .ok_or(AuthError::UserNotFound)?;
    let employee = state.store.employee_by_user(user_id).await?;
    let role = state.store.user_role(user_id).await?;
    Ok(Profile {
        user,
        employee,
        role,
    })
}

/// `CreateEmployeeWithUserTx`, then the optional role assignment.
pub async fn create_employee_account(
    state: &AppState,
    account: NewEmployeeAccount,
) -> Result<Employee, AuthError> {
    let password_hash = hash_password(&account.password)?;
    let now = now_micros();
    let user_id = new_id();
    let user = User {
        id: user_id.clone(),
        email: account.email.trim().to_lowercase(),
        password_hash,
        created_at: now,
        updated_at: now,
    };
    let employee = Employee {
        id: new_id(),
        user_id: user_id.clone(),
        first_name: account.first_name,
        last_name: account.last_name,
        bsn: account.bsn,
        date_of_birth: account.date_of_birth,
        phone: account.phone,
        gender: account.gender,
        role_label: account.role_label,
        deleted_at: None,
        created_at: now,
        updated_at: now,
    };
    let employee = state.store.create_employee_with_user(user, employee).await?;
    if let Some(role_id) = &account.role_id {
        state.store.assign_role(&user_id, role_id).await?;
    }
    tracing::info!(employee_id = %employee.id, "employee account created");
    Ok(employee)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> ClientMeta {
        ClientMeta {
            request_id: None,
            ip: "192.0.2.10".into(),
            user_agent: Some("tests".into()),
        }
    }

    fn account(email: &str) -> NewEmployeeAccount {
        NewEmployeeAccount {
            email: email.into(),
            password: "correct horse".into(),
            first_name: "Sanne".into(),
            last_name: "de Vries".into(),
            bsn: "123456782".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1988, 4, 12).unwrap(),
            phone: None,
            gender: Gender::Female,
            role_label: Some("coordinator".into()),
            role_id: None,
        }
    }

    #[tokio::test]
    async fn login_issues_a_pair_bound_to_the_employee() {
        let state = AppState::in_memory().unwrap();
        let employee = create_employee_account(&state, account("Sanne@Example.nl"))
            .await
            .unwrap();

        let result = login(&state, " sanne@example.nl ", "correct horse", &meta())
            .await
            .unwrap();
        assert_eq!(result.user.email, "sanne@example.nl");
        let claims = state.tokens.verify_access(&result.tokens.access_token).unwrap();
        assert_eq!(claims.employee_id.as_deref(), Some(employee.id.as_str()));
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_look_the_same() {
        let state = AppState::in_memory().unwrap();
        create_employee_account(&state, account("a@example.nl")).await.unwrap();

        let wrong = login(&state, "a@example.nl", "nope nope", &meta()).await;
        let unknown = login(&state, "b@example.nl", "correct horse", &meta()).await;
        assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));
        assert!(matches!(unknown, Err(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn refresh_rotates_and_reuse_revokes_the_family() {
        let state = AppState::in_memory().unwrap();
        create_employee_account(&state, account("a@example.nl")).await.unwrap();
        let first = login(&state, "a@example.nl", "correct horse", &meta())
            .await
            .unwrap()
            .tokens;

        let second = refresh(&state, &first.refresh_token).await.unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);

        let reused = refresh(&state, &first.refresh_token).await;
        assert!(matches!(reused, Err(AuthError::RefreshReuseDetected)));

        // The family is gone, so even the newest token is dead.
        let after = refresh(&state, &second.refresh_token).await;
        assert!(matches!(after, Err(AuthError::InvalidToken)));
    }

    #[tokio::test]
    async fn logout_revokes_the_family() {
        let state = AppState::in_memory().unwrap();
        create_employee_account(&state, account("a@example.nl")).await.unwrap();
        let pair = login(&state, "a@example.nl", "correct horse", &meta())
            .await
            .unwrap()
            .tokens;

        assert_eq!(logout(&state, &pair.refresh_token).await.unwrap(), 1);
        assert!(matches!(
            refresh(&state, &pair.refresh_token).await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn access_tokens_are_not_refresh_tokens() {
        let state = AppState::in_memory().unwrap();
        create_employee_account(&state, account("a@example.nl")).await.unwrap();
        let pair = login(&state, "a@example.nl", "correct horse", &meta())
            .await
            .unwrap()
            .tokens;
        assert!(matches!(
            refresh(&state, &pair.access_token).await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn short_passwords_are_rejected_before_any_write() {
        let state = AppState::in_memory().unwrap();
        let mut short = account("a@example.nl");
        short.password = "short".into();
        let err = create_employee_account(&state, short).await.unwrap_err();
        assert!(matches!(err, AuthError::Password(PasswordError::TooShort)));
        assert_eq!(state.store.count_users().await.unwrap(), 0);
        assert_eq!(
            AppError::from(err).status_and_code(),
            (StatusCode::BAD_REQUEST, "INVALID_REQUEST")
        );
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let state = AppState::in_memory().unwrap();
        create_employee_account(&state, account("a@example.nl")).await.unwrap();
        let mut again = account("A@example.nl");
        again.bsn = "987654321".into();
        let err = create_employee_account(&state, again).await.unwrap_err();
        assert_eq!(AppError::from(err).status_and_code().0, StatusCode::CONFLICT);
    }
}
