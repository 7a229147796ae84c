//! # Persistence Gateway
//!
//! One seam, [`Datastore`], with two backends:
//!
//! | Backend | When | Transactions |
//! |---------|------|--------------|
//! | [`memory::MemoryStore`] | `DATABASE_URL` unset (development, tests) | snapshot, committed on `Ok` |
//! | [`postgres::PgStore`] | `DATABASE_URL` set | `SERIALIZABLE` through [`postgres::PgStore::exec_tx`], rows locked `FOR UPDATE` |
//!
//! Multi-statement operations are exposed as named transactions so callers
//! never assemble them inline:
//!
//! | Transaction | Method |
//! |-------------|--------|
//! | `MoveClientToWaitingListTx` | [`Datastore::move_client_to_waiting_list`] |
//! | `MoveClientToCareTx`, `StartDischargeTx`, `CompleteDischargeTx` | [`Datastore::transition_client`] |
//! | `CreateEvaluationTx` | [`Datastore::create_evaluation`] |
//! | `SaveDraftTx` / `SubmitDraftTx` / `DeleteDraftTx` | [`Datastore::save_draft`] / [`Datastore::submit_draft`] / [`Datastore::delete_draft`] |
//! | `UpdateEvaluationTx` | [`Datastore::update_evaluation`] |
//! | `CreateRoleWithPermissionsTx` / `UpdateRoleWithPermissionsTx` | [`Datastore::create_role`] / [`Datastore::update_role`] |
//! | `CreateEmployeeWithUserTx` | [`Datastore::create_employee_with_user`] |
//! | `RotateSessionTx` | [`Datastore::rotate_session`] |
//! | `DeleteUserTx` | [`Datastore::delete_user`] |
//! | `AppendAuditTx` | [`Datastore::append_audit`] |
//!
//! Lifecycle and evaluation rules come from `care-state`; both backends call
//! the same functions with the affected rows held, so a rule violation
//! aborts the transaction.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use care_core::audit::{AuditEntry, NewAuditEntry};
use care_core::records::{
    Attachment, Client, ClientEvaluation, ClientGoal, DashboardOverview, Employee,
    EvaluationDetail, EvaluationSummary, Incident, IntakeForm, Location, Permission,
    ReferringOrg, RegistrationForm, RoleDetail, Session, UpcomingEvaluation, User,
};
use care_core::{
    sha256_hex, ClientStatus, Page, PageRequest, RegistrationStatus, WaitingListPriority,
};
use care_state::{
    CompleteDischarge, EvaluationRuleError, LifecycleError, MoveToCare, ProgressEntry,
    StartDischarge,
};

use sqlx::postgres::{PgPool, PgPoolOptions};
use subtle::ConstantTimeEq;

/// Shared handle to the active backend.
pub type Store = Arc<dyn Datastore>;

/// Resources that carry seeded `(resource, action)` permissions.
pub const RESOURCES: &[&str] = &[
    "user",
    "employee",
    "referring_org",
    "location",
    "registration_form",
    "intake_form",
    "client",
    "evaluation",
    "incident",
    "attachment",
    "role",
    "dashboard",
    "audit",
];

pub const ACTIONS: &[&str] = &["read", "create", "update", "delete"];

/// Deterministic id of a seeded permission. Must agree with the seed in
/// `migrations/0001_init.sql`.
pub fn permission_id(resource: &str, action: &str) -> String {
    sha256_hex(format!("{resource}:{action}"))[..care_core::ID_LEN].to_string()
}

/// Compare a stored refresh-token hash with the presented one in constant
/// time. Both backends decide `RotateSessionTx` reuse with this.
pub fn token_hashes_match(stored: &str, presented: &str) -> bool {
    bool::from(stored.as_bytes().ct_eq(presented.as_bytes()))
}

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Unique violation; carries the constraint or field name.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Foreign key violation.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// Serialization failure; the caller may retry.
    #[error("conflicting concurrent update")]
    Conflict,

    #[error("intake form has already been promoted")]
    IntakeAlreadyPromoted,

    #[error("client already has a draft evaluation")]
    DraftAlreadyExists,

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationRuleError),

    /// A stored value could not be decoded into its domain type.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            let constraint = db.constraint().unwrap_or("constraint").to_string();
            match db.code().as_deref() {
                Some("23505") => return Self::AlreadyExists(constraint),
                Some("23503") => return Self::InvalidReference(constraint),
                Some("40001") | Some("40P01") => return Self::Conflict,
                _ => {}
            }
        }
        Self::Database(err)
    }
}

impl From<care_core::ValidationError> for StoreError {
    fn from(err: care_core::ValidationError) -> Self {
        Self::Corrupt(err.to_string())
    }
}

// ── Transaction inputs ──────────────────────────────────────────────

/// Result of `RotateSessionTx`.
#[derive(Debug, Clone, PartialEq)]
pub enum RotateOutcome {
    /// Live session with the presented hash; hash replaced.
    Rotated(Session),
    /// Live family but a stale hash; the family is now revoked.
    ReuseDetected,
    /// No live session in the family.
    NotFound,
}

/// A lifecycle transition applied to a locked client row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientTransition {
    MoveToCare(MoveToCare),
    StartDischarge(StartDischarge),
    CompleteDischarge(CompleteDischarge),
    Priority(WaitingListPriority),
}

impl ClientTransition {
    pub fn apply(&self, client: &mut Client, now: DateTime<Utc>) -> Result<(), LifecycleError> {
        match self {
            Self::MoveToCare(input) => care_state::move_to_care(client, input, now),
            Self::StartDischarge(input) => care_state::start_discharge(client, input, now),
            Self::CompleteDischarge(input) => care_state::complete_discharge(client, input, now),
            Self::Priority(priority) => {
                care_state::update_waiting_list_priority(client, *priority, now)
            }
        }
    }

    /// Transaction name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MoveToCare(_) => "MoveClientToCareTx",
            Self::StartDischarge(_) => "StartDischargeTx",
            Self::CompleteDischarge(_) => "CompleteDischargeTx",
            Self::Priority(_) => "UpdateWaitingListPriorityTx",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientFilter {
    pub status: Option<ClientStatus>,
    /// Case-insensitive match on first name, last name or BSN.
    pub search: Option<String>,
}

impl ClientFilter {
    pub fn matches(&self, client: &Client) -> bool {
        if let Some(status) = self.status {
            if client.status != status {
                return false;
            }
        }
        match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => {
                let term = term.to_lowercase();
                client.first_name.to_lowercase().contains(&term)
                    || client.last_name.to_lowercase().contains(&term)
                    || client.bsn.contains(&term)
            }
            _ => true,
        }
    }
}

/// Input of `CreateEvaluationTx`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvaluation {
    pub id: String,
    pub client_id: String,
    pub coordinator_id: String,
    pub evaluation_date: NaiveDate,
    pub overall_notes: Option<String>,
    pub progress: Vec<ProgressEntry>,
    pub draft: bool,
}

/// Input of `SaveDraftTx`. `id` is used only when no draft exists yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftInput {
    pub id: String,
    pub client_id: String,
    pub coordinator_id: String,
    pub evaluation_date: NaiveDate,
    pub overall_notes: Option<String>,
    pub progress: Vec<ProgressEntry>,
}

/// Input of `UpdateEvaluationTx`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationUpdate {
    pub evaluation_date: NaiveDate,
    pub overall_notes: Option<String>,
    pub progress: Vec<ProgressEntry>,
}

/// Evaluation plus the rescheduled date when it was submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOutcome {
    pub detail: EvaluationDetail,
    pub next_evaluation_date: Option<NaiveDate>,
}

/// Role fields for `UpdateRoleWithPermissionsTx`; `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub permission_ids: Option<Vec<String>>,
}

// ── Gateway ─────────────────────────────────────────────────────────

#[axum::async_trait]
pub trait Datastore: Send + Sync + 'static {
    fn backend(&self) -> &'static str;
    async fn ping(&self) -> Result<(), StoreError>;
    async fn close(&self);

    // -- Users & sessions --
    async fn count_users(&self) -> Result<i64, StoreError>;
    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn user_by_id(&self, id: &str) -> Result<Option<User>, StoreError>;
    async fn insert_session(&self, session: Session) -> Result<(), StoreError>;
    async fn rotate_session(
        &self,
        family: &str,
        presented_hash: &str,
        next_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, StoreError>;
    async fn revoke_family(&self, family: &str, now: DateTime<Utc>) -> Result<u64, StoreError>;
    async fn delete_user(&self, user_id: &str, now: DateTime<Utc>) -> Result<(), StoreError>;

    // -- Employees --
    async fn create_employee_with_user(
        &self,
        user: User,
        employee: Employee,
    ) -> Result<Employee, StoreError>;
    async fn employee(&self, id: &str) -> Result<Option<Employee>, StoreError>;
    async fn employee_by_user(&self, user_id: &str) -> Result<Option<Employee>, StoreError>;
    async fn list_employees(&self, page: PageRequest) -> Result<Page<Employee>, StoreError>;
    async fn update_employee(&self, employee: Employee) -> Result<Employee, StoreError>;
    async fn delete_employee(&self, id: &str, now: DateTime<Utc>) -> Result<(), StoreError>;

    // -- Referring organizations --
    async fn insert_referring_org(&self, org: ReferringOrg) -> Result<ReferringOrg, StoreError>;
    async fn referring_org(&self, id: &str) -> Result<Option<ReferringOrg>, StoreError>;
    async fn list_referring_orgs(&self, page: PageRequest)
        -> Result<Page<ReferringOrg>, StoreError>;
    async fn update_referring_org(&self, org: ReferringOrg) -> Result<ReferringOrg, StoreError>;
    async fn delete_referring_org(&self, id: &str, now: DateTime<Utc>) -> Result<(), StoreError>;

    // -- Locations --
    async fn insert_location(&self, location: Location) -> Result<Location, StoreError>;
    async fn location(&self, id: &str) -> Result<Option<Location>, StoreError>;
    async fn list_locations(&self, page: PageRequest) -> Result<Page<Location>, StoreError>;
    async fn update_location(&self, location: Location) -> Result<Location, StoreError>;
    async fn delete_location(&self, id: &str, now: DateTime<Utc>) -> Result<(), StoreError>;

    // -- Registration forms --
    async fn insert_registration_form(
        &self,
        form: RegistrationForm,
    ) -> Result<RegistrationForm, StoreError>;
    async fn registration_form(&self, id: &str) -> Result<Option<RegistrationForm>, StoreError>;
    async fn list_registration_forms(
        &self,
        status: Option<RegistrationStatus>,
        page: PageRequest,
    ) -> Result<Page<RegistrationForm>, StoreError>;
    async fn update_registration_form(
        &self,
        form: RegistrationForm,
    ) -> Result<RegistrationForm, StoreError>;
    async fn delete_registration_form(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    // -- Intake forms & goals --
    async fn insert_intake_form(&self, form: IntakeForm) -> Result<IntakeForm, StoreError>;
    async fn intake_form(&self, id: &str) -> Result<Option<IntakeForm>, StoreError>;
    async fn list_intake_forms(&self, page: PageRequest) -> Result<Page<IntakeForm>, StoreError>;
    async fn update_intake_form(&self, form: IntakeForm) -> Result<IntakeForm, StoreError>;
    async fn intake_goals(&self, intake_form_id: &str) -> Result<Vec<ClientGoal>, StoreError>;
    async fn insert_goal(&self, goal: ClientGoal) -> Result<ClientGoal, StoreError>;
    async fn delete_goal(&self, intake_form_id: &str, goal_id: &str) -> Result<(), StoreError>;

    // -- Clients --
    async fn move_client_to_waiting_list(
        &self,
        intake_form_id: &str,
        priority: WaitingListPriority,
        client_id: String,
        now: DateTime<Utc>,
    ) -> Result<Client, StoreError>;
    async fn client(&self, id: &str) -> Result<Option<Client>, StoreError>;
    async fn list_clients(
        &self,
        filter: ClientFilter,
        page: PageRequest,
    ) -> Result<Page<Client>, StoreError>;
    async fn client_goals(&self, client_id: &str) -> Result<Vec<ClientGoal>, StoreError>;
    async fn transition_client(
        &self,
        id: &str,
        transition: ClientTransition,
        now: DateTime<Utc>,
    ) -> Result<Client, StoreError>;

    // -- Evaluations --
    async fn create_evaluation(
        &self,
        input: NewEvaluation,
        now: DateTime<Utc>,
    ) -> Result<EvaluationOutcome, StoreError>;
    async fn save_draft(
        &self,
        input: DraftInput,
        now: DateTime<Utc>,
    ) -> Result<ClientEvaluation, StoreError>;
    async fn submit_draft(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<EvaluationOutcome, StoreError>;
    async fn delete_draft(&self, id: &str) -> Result<(), StoreError>;
    async fn update_evaluation(
        &self,
        id: &str,
        update: EvaluationUpdate,
        now: DateTime<Utc>,
    ) -> Result<EvaluationDetail, StoreError>;
    async fn evaluation(&self, id: &str) -> Result<Option<EvaluationDetail>, StoreError>;
    /// Clients with `from <= next_evaluation_date <= to` (no lower bound when
    /// `from` is `None`), soonest first.
    async fn upcoming_evaluations(
        &self,
        from: Option<NaiveDate>,
        to: NaiveDate,
        today: NaiveDate,
    ) -> Result<Vec<UpcomingEvaluation>, StoreError>;
    async fn recent_evaluations(&self, limit: i64) -> Result<Vec<EvaluationSummary>, StoreError>;
    async fn client_evaluations(
        &self,
        client_id: &str,
        page: PageRequest,
    ) -> Result<Page<ClientEvaluation>, StoreError>;
    async fn last_evaluation(&self, client_id: &str)
        -> Result<Option<EvaluationDetail>, StoreError>;
    async fn client_draft(&self, client_id: &str) -> Result<Option<EvaluationDetail>, StoreError>;

    // -- Incidents --
    async fn insert_incident(&self, incident: Incident) -> Result<Incident, StoreError>;
    async fn incident(&self, id: &str) -> Result<Option<Incident>, StoreError>;
    async fn list_incidents(
        &self,
        client_id: Option<String>,
        page: PageRequest,
    ) -> Result<Page<Incident>, StoreError>;
    async fn update_incident(&self, incident: Incident) -> Result<Incident, StoreError>;
    async fn delete_incident(&self, id: &str, now: DateTime<Utc>) -> Result<(), StoreError>;

    // -- Attachments --
    async fn insert_attachment(&self, attachment: Attachment) -> Result<Attachment, StoreError>;
    async fn attachment(&self, id: &str) -> Result<Option<Attachment>, StoreError>;

    // -- RBAC --
    async fn permissions(&self) -> Result<Vec<Permission>, StoreError>;
    async fn create_role(
        &self,
        role: care_core::records::Role,
        permission_ids: Vec<String>,
    ) -> Result<RoleDetail, StoreError>;
    async fn update_role(
        &self,
        id: &str,
        update: RoleUpdate,
        now: DateTime<Utc>,
    ) -> Result<RoleDetail, StoreError>;
    async fn delete_role(&self, id: &str) -> Result<(), StoreError>;
    async fn role(&self, id: &str) -> Result<Option<RoleDetail>, StoreError>;
    async fn role_by_name(&self, name: &str) -> Result<Option<RoleDetail>, StoreError>;
    async fn list_roles(&self) -> Result<Vec<RoleDetail>, StoreError>;
    async fn grant_permission(&self, role_id: &str, permission_id: &str)
        -> Result<(), StoreError>;
    async fn revoke_permission(
        &self,
        role_id: &str,
        permission_id: &str,
    ) -> Result<(), StoreError>;
    async fn user_role(&self, user_id: &str) -> Result<Option<RoleDetail>, StoreError>;
    async fn assign_role(&self, user_id: &str, role_id: &str) -> Result<(), StoreError>;
    async fn unassign_role(&self, user_id: &str) -> Result<(), StoreError>;
    async fn user_has_permission(
        &self,
        user_id: &str,
        resource: &str,
        action: &str,
    ) -> Result<bool, StoreError>;

    // -- Audit --
    async fn append_audit(
        &self,
        entry: NewAuditEntry,
        id: String,
        now: DateTime<Utc>,
    ) -> Result<AuditEntry, StoreError>;
    /// Newest first.
    async fn list_audit(&self, page: PageRequest) -> Result<Page<AuditEntry>, StoreError>;
    /// The whole chain in insertion order.
    async fn audit_chain(&self) -> Result<Vec<AuditEntry>, StoreError>;

    // -- Dashboard --
    async fn dashboard_overview(&self, today: NaiveDate) -> Result<DashboardOverview, StoreError>;
}

/// Connect to Postgres when `DATABASE_URL` is set, otherwise fall back to
/// the in-memory backend.
pub async fn init_store(database_url: Option<&str>) -> Result<Store, StoreError> {
    match init_pool(database_url).await? {
        Some(pool) => Ok(Arc::new(postgres::PgStore::new(pool))),
        None => Ok(Arc::new(memory::MemoryStore::new())),
    }
}

/// Initialize the connection pool and run migrations.
///
/// Returns `None` if no URL is configured (in-memory mode).
pub async fn init_pool(database_url: Option<&str>) -> Result<Option<PgPool>, StoreError> {
    let url = match database_url {
        Some(url) if !url.trim().is_empty() => url,
        _ => {
            tracing::warn!(
                "DATABASE_URL not set — running in-memory only mode. \
                 State will not survive restarts."
            );
            return Ok(None);
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(std::time::Duration::from_secs(5))
        .connect(url)
        .await?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StoreError::Database(e.into()))?;
    tracing::info!("Database migrations applied");

    Ok(Some(pool))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_hash_comparison() {
        assert!(token_hashes_match("3f2a9c", "3f2a9c"));
        assert!(!token_hashes_match("3f2a9c", "3f2a9d"));
        assert!(!token_hashes_match("3f2a9c", "3f2a9"));
        assert!(!token_hashes_match("", "3f2a9c"));
    }

    #[test]
    fn permission_ids_are_well_formed_and_distinct() {
        let mut seen = std::collections::HashSet::new();
        for resource in RESOURCES {
            for action in ACTIONS {
                let id = permission_id(resource, action);
                assert!(care_core::is_valid_id(&id), "{id}");
                assert!(seen.insert(id));
            }
        }
    }

    #[test]
    fn client_filter_matches_status_and_search() {
        let filter = ClientFilter {
            status: Some(ClientStatus::WaitingList),
            search: Some("DOE".into()),
        };
        let json = serde_json::json!({
            "id": "c", "registrationFormId": "r", "intakeFormId": "i",
            "firstName": "John", "lastName": "Doe", "bsn": "123456789",
            "dateOfBirth": "1990-01-01", "gender": "male", "careType": "ambulatory_care",
            "status": "waiting_list", "waitingListPriority": "high",
            "careStartDate": null, "careEndDate": null, "ambulatoryWeeklyHours": null,
            "assignedLocationId": null, "coordinatorId": null, "familySituation": null,
            "mainProvider": null, "limitations": null, "focusAreas": null, "notes": null,
            "dischargeDate": null, "dischargeReason": null, "dischargeStatus": null,
            "closingReport": null, "evaluationReport": null, "dischargeAttachmentIds": [],
            "nextEvaluationDate": null, "evaluationIntervalWeeks": 4,
            "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-01T00:00:00Z"
        });
        let mut client: Client = serde_json::from_value(json).unwrap();
        assert!(filter.matches(&client));
        client.status = ClientStatus::InCare;
        assert!(!filter.matches(&client));
        let by_bsn = ClientFilter {
            status: None,
            search: Some("3456".into()),
        };
        assert!(by_bsn.matches(&client));
    }

    #[test]
    fn errors_without_sqlstate_stay_database_errors() {
        let err = StoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::Database(_)));
    }
}
