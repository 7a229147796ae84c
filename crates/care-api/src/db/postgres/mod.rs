//! # PostgreSQL Backend
//!
//! Each submodule owns the queries for one group of tables. Functions take
//! a `&PgPool` for single statements, or a `&mut PgConnection` handed out by
//! [`PgStore::exec_tx`] for the named multi-statement transactions. Enumerations travel as TEXT and are parsed back with
//! their `FromStr` impls; a value that fails to parse surfaces as
//! [`StoreError::Corrupt`].

mod audit;
mod clients;
mod dashboard;
mod directory;
mod evaluations;
mod forms;
mod incidents;
mod people;
mod rbac;

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPool;
use sqlx::PgConnection;

use care_core::audit::{AuditEntry, NewAuditEntry};
use care_core::records::{
    Attachment, Client, ClientEvaluation, ClientGoal, DashboardOverview, Employee,
    EvaluationDetail, EvaluationSummary, Incident, IntakeForm, Location, Permission,
    ReferringOrg, RegistrationForm, Role, RoleDetail, Session, UpcomingEvaluation, User,
};
use care_core::{Page, PageRequest, RegistrationStatus, ValidationError, WaitingListPriority};

use super::{
    ClientFilter, ClientTransition, Datastore, DraftInput, EvaluationOutcome, EvaluationUpdate,
    NewEvaluation, RoleUpdate, RotateOutcome, StoreError,
};

/// Datastore backed by a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Unit of work run by [`PgStore::exec_tx`] on the transaction's connection.
pub type TxFuture<'c, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'c>>;

/// Isolation level of a transaction opened by [`PgStore::run_tx`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Isolation {
    Serializable,
    /// Only for the audit append: its chain head must be read after the
    /// advisory lock is granted, and a serializable snapshot would be taken
    /// by the lock statement itself.
    ReadCommitted,
}

impl Isolation {
    fn statement(self) -> &'static str {
        match self {
            Self::Serializable => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
            Self::ReadCommitted => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
        }
    }
}

impl PgStore {
    /// Run `f` inside one `SERIALIZABLE` transaction. Commits when `f`
    /// returns `Ok`, rolls back when it returns `Err`.
    ///
    /// ```ignore
    /// store.exec_tx(move |conn| Box::pin(async move {
    ///     clients::transition(conn, &id, &transition, now).await
    /// })).await
    /// ```
    pub async fn exec_tx<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut PgConnection) -> TxFuture<'c, T> + Send,
    {
        self.run_tx(Isolation::Serializable, f).await
    }

    /// [`exec_tx`](Self::exec_tx) with an explicit isolation level.
    pub async fn run_tx<T, F>(&self, isolation: Isolation, f: F) -> Result<T, StoreError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut PgConnection) -> TxFuture<'c, T> + Send,
    {
        let mut tx = self.pool.begin().await?;
        sqlx::query(isolation.statement()).execute(&mut *tx).await?;
        match f(&mut *tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

/// Parse a TEXT column into its enum.
fn parse<T>(value: &str) -> Result<T, StoreError>
where
    T: FromStr<Err = ValidationError>,
{
    Ok(value.parse::<T>()?)
}

fn parse_opt<T>(value: Option<&str>) -> Result<Option<T>, StoreError>
where
    T: FromStr<Err = ValidationError>,
{
    value.map(parse).transpose()
}

/// `%term%` for `LIKE`, with the pattern metacharacters escaped.
fn like_pattern(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}

#[axum::async_trait]
impl Datastore for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("PostgreSQL pool closed");
    }

    // -- Users & sessions --

    async fn count_users(&self) -> Result<i64, StoreError> {
        people::count_users(&self.pool).await
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        people::user_by_email(&self.pool, email).await
    }

    async fn user_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        people::user_by_id(&self.pool, id).await
    }

    async fn insert_session(&self, session: Session) -> Result<(), StoreError> {
        people::insert_session(&self.pool, &session).await
    }

    async fn rotate_session(
        &self,
        family: &str,
        presented_hash: &str,
        next_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, StoreError> {
        let (family, presented, next) = (
            family.to_owned(),
            presented_hash.to_owned(),
            next_hash.to_owned(),
        );
        // Reuse detection revokes the family, so that outcome commits too.
        self.exec_tx(move |conn| {
            Box::pin(async move {
                people::rotate_session(conn, &family, &presented, &next, expires_at, now).await
            })
        })
        .await
    }

    async fn revoke_family(&self, family: &str, now: DateTime<Utc>) -> Result<u64, StoreError> {
        people::revoke_family(&self.pool, family, now).await
    }

    async fn delete_user(&self, user_id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let user_id = user_id.to_owned();
        self.exec_tx(move |conn| {
            Box::pin(async move { people::delete_user(conn, &user_id, now).await })
        })
        .await
    }

    // -- Employees --

    async fn create_employee_with_user(
        &self,
        user: User,
        employee: Employee,
    ) -> Result<Employee, StoreError> {
        self.exec_tx(move |conn| {
            Box::pin(async move { people::create_employee_with_user(conn, &user, employee).await })
        })
        .await
    }

    async fn employee(&self, id: &str) -> Result<Option<Employee>, StoreError> {
        people::employee(&self.pool, id).await
    }

    async fn employee_by_user(&self, user_id: &str) -> Result<Option<Employee>, StoreError> {
        people::employee_by_user(&self.pool, user_id).await
    }

    async fn list_employees(&self, page: PageRequest) -> Result<Page<Employee>, StoreError> {
        people::list_employees(&self.pool, page).await
    }

    async fn update_employee(&self, employee: Employee) -> Result<Employee, StoreError> {
        people::update_employee(&self.pool, employee).await
    }

    async fn delete_employee(&self, id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        directory::soft_delete(&self.pool, "employees", id, now, "employee").await
    }

    // -- Referring organizations --

    async fn insert_referring_org(&self, org: ReferringOrg) -> Result<ReferringOrg, StoreError> {
        directory::insert_referring_org(&self.pool, org).await
    }

    async fn referring_org(&self, id: &str) -> Result<Option<ReferringOrg>, StoreError> {
        directory::referring_org(&self.pool, id).await
    }

    async fn list_referring_orgs(
        &self,
        page: PageRequest,
    ) -> Result<Page<ReferringOrg>, StoreError> {
        directory::list_referring_orgs(&self.pool, page).await
    }

    async fn update_referring_org(&self, org: ReferringOrg) -> Result<ReferringOrg, StoreError> {
        directory::update_referring_org(&self.pool, org).await
    }

    async fn delete_referring_org(&self, id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        directory::soft_delete(&self.pool, "referring_orgs", id, now, "referring organization")
            .await
    }

    // -- Locations --

    async fn insert_location(&self, location: Location) -> Result<Location, StoreError> {
        directory::insert_location(&self.pool, location).await
    }

    async fn location(&self, id: &str) -> Result<Option<Location>, StoreError> {
        directory::location(&self.pool, id).await
    }

    async fn list_locations(&self, page: PageRequest) -> Result<Page<Location>, StoreError> {
        directory::list_locations(&self.pool, page).await
    }

    async fn update_location(&self, location: Location) -> Result<Location, StoreError> {
        directory::update_location(&self.pool, location).await
    }

    async fn delete_location(&self, id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        directory::soft_delete(&self.pool, "locations", id, now, "location").await
    }

    // -- Registration forms --

    async fn insert_registration_form(
        &self,
        form: RegistrationForm,
    ) -> Result<RegistrationForm, StoreError> {
        forms::insert_registration_form(&self.pool, form).await
    }

    async fn registration_form(&self, id: &str) -> Result<Option<RegistrationForm>, StoreError> {
        forms::registration_form(&self.pool, id).await
    }

    async fn list_registration_forms(
        &self,
        status: Option<RegistrationStatus>,
        page: PageRequest,
    ) -> Result<Page<RegistrationForm>, StoreError> {
        forms::list_registration_forms(&self.pool, status, page).await
    }

    async fn update_registration_form(
        &self,
        form: RegistrationForm,
    ) -> Result<RegistrationForm, StoreError> {
        forms::update_registration_form(&self.pool, form).await
    }

    async fn delete_registration_form(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        directory::soft_delete(&self.pool, "registration_forms", id, now, "registration form")
            .await
    }

    // -- Intake forms & goals --

    async fn insert_intake_form(&self, form: IntakeForm) -> Result<IntakeForm, StoreError> {
        forms::insert_intake_form(&self.pool, form).await
    }

    async fn intake_form(&self, id: &str) -> Result<Option<IntakeForm>, StoreError> {
        forms::intake_form(&self.pool, id).await
    }

    async fn list_intake_forms(&self, page: PageRequest) -> Result<Page<IntakeForm>, StoreError> {
        forms::list_intake_forms(&self.pool, page).await
    }

    async fn update_intake_form(&self, form: IntakeForm) -> Result<IntakeForm, StoreError> {
        forms::update_intake_form(&self.pool, form).await
    }

    async fn intake_goals(&self, intake_form_id: &str) -> Result<Vec<ClientGoal>, StoreError> {
        forms::intake_goals(&self.pool, intake_form_id).await
    }

    async fn insert_goal(&self, goal: ClientGoal) -> Result<ClientGoal, StoreError> {
        forms::insert_goal(&self.pool, goal).await
    }

    async fn delete_goal(&self, intake_form_id: &str, goal_id: &str) -> Result<(), StoreError> {
        forms::delete_goal(&self.pool, intake_form_id, goal_id).await
    }

    // -- Clients --

    async fn move_client_to_waiting_list(
        &self,
        intake_form_id: &str,
        priority: WaitingListPriority,
        client_id: String,
        now: DateTime<Utc>,
    ) -> Result<Client, StoreError> {
        let intake_form_id = intake_form_id.to_owned();
        self.exec_tx(move |conn| {
            Box::pin(async move {
                clients::move_to_waiting_list(conn, &intake_form_id, priority, client_id, now)
                    .await
            })
        })
        .await
    }

    async fn client(&self, id: &str) -> Result<Option<Client>, StoreError> {
        clients::client(&self.pool, id).await
    }

    async fn list_clients(
        &self,
        filter: ClientFilter,
        page: PageRequest,
    ) -> Result<Page<Client>, StoreError> {
        clients::list_clients(&self.pool, &filter, page).await
    }

    async fn client_goals(&self, client_id: &str) -> Result<Vec<ClientGoal>, StoreError> {
        clients::client_goals(&self.pool, client_id).await
    }

    async fn transition_client(
        &self,
        id: &str,
        transition: ClientTransition,
        now: DateTime<Utc>,
    ) -> Result<Client, StoreError> {
        let id = id.to_owned();
        self.exec_tx(move |conn| {
            Box::pin(async move { clients::transition(conn, &id, &transition, now).await })
        })
        .await
    }

    // -- Evaluations --

    async fn create_evaluation(
        &self,
        input: NewEvaluation,
        now: DateTime<Utc>,
    ) -> Result<EvaluationOutcome, StoreError> {
        self.exec_tx(move |conn| Box::pin(evaluations::create(conn, input, now)))
            .await
    }

    async fn save_draft(
        &self,
        input: DraftInput,
        now: DateTime<Utc>,
    ) -> Result<ClientEvaluation, StoreError> {
        self.exec_tx(move |conn| Box::pin(evaluations::save_draft(conn, input, now)))
            .await
    }

    async fn submit_draft(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<EvaluationOutcome, StoreError> {
        let id = id.to_owned();
        self.exec_tx(move |conn| {
            Box::pin(async move { evaluations::submit_draft(conn, &id, now).await })
        })
        .await
    }

    async fn delete_draft(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_owned();
        self.exec_tx(move |conn| {
            Box::pin(async move { evaluations::delete_draft(conn, &id).await })
        })
        .await
    }

    async fn update_evaluation(
        &self,
        id: &str,
        update: EvaluationUpdate,
        now: DateTime<Utc>,
    ) -> Result<EvaluationDetail, StoreError> {
        let id = id.to_owned();
        self.exec_tx(move |conn| {
            Box::pin(async move { evaluations::update(conn, &id, update, now).await })
        })
        .await
    }

    async fn evaluation(&self, id: &str) -> Result<Option<EvaluationDetail>, StoreError> {
        evaluations::detail_by_id(&self.pool, id).await
    }

    async fn upcoming_evaluations(
        &self,
        from: Option<NaiveDate>,
        to: NaiveDate,
        today: NaiveDate,
    ) -> Result<Vec<UpcomingEvaluation>, StoreError> {
        evaluations::upcoming(&self.pool, from, to, today).await
    }

    async fn recent_evaluations(&self, limit: i64) -> Result<Vec<EvaluationSummary>, StoreError> {
        evaluations::recent(&self.pool, limit).await
    }

    async fn client_evaluations(
        &self,
        client_id: &str,
        page: PageRequest,
    ) -> Result<Page<ClientEvaluation>, StoreError> {
        evaluations::for_client(&self.pool, client_id, page).await
    }

    async fn last_evaluation(
        &self,
        client_id: &str,
    ) -> Result<Option<EvaluationDetail>, StoreError> {
        evaluations::last_submitted(&self.pool, client_id).await
    }

    async fn client_draft(&self, client_id: &str) -> Result<Option<EvaluationDetail>, StoreError> {
        evaluations::draft_of(&self.pool, client_id).await
    }

    // -- Incidents --

    async fn insert_incident(&self, incident: Incident) -> Result<Incident, StoreError> {
        incidents::insert(&self.pool, incident).await
    }

    async fn incident(&self, id: &str) -> Result<Option<Incident>, StoreError> {
        incidents::get(&self.pool, id).await
    }

    async fn list_incidents(
        &self,
        client_id: Option<String>,
        page: PageRequest,
    ) -> Result<Page<Incident>, StoreError> {
        incidents::list(&self.pool, client_id.as_deref(), page).await
    }

    async fn update_incident(&self, incident: Incident) -> Result<Incident, StoreError> {
        incidents::update(&self.pool, incident).await
    }

    async fn delete_incident(&self, id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        directory::soft_delete(&self.pool, "incidents", id, now, "incident").await
    }

    // -- Attachments --

    async fn insert_attachment(&self, attachment: Attachment) -> Result<Attachment, StoreError> {
        directory::insert_attachment(&self.pool, attachment).await
    }

    async fn attachment(&self, id: &str) -> Result<Option<Attachment>, StoreError> {
        directory::attachment(&self.pool, id).await
    }

    // -- RBAC --

    async fn permissions(&self) -> Result<Vec<Permission>, StoreError> {
        rbac::permissions(&self.pool).await
    }

    async fn create_role(
        &self,
        role: Role,
        permission_ids: Vec<String>,
    ) -> Result<RoleDetail, StoreError> {
        self.exec_tx(move |conn| {
            Box::pin(async move {
                rbac::create_role(&mut *conn, &role, &permission_ids).await?;
                rbac::detail(&mut *conn, role).await
            })
        })
        .await
    }

    async fn update_role(
        &self,
        id: &str,
        update: RoleUpdate,
        now: DateTime<Utc>,
    ) -> Result<RoleDetail, StoreError> {
        let id = id.to_owned();
        self.exec_tx(move |conn| {
            Box::pin(async move {
                let role = rbac::update_role(&mut *conn, &id, update, now).await?;
                rbac::detail(&mut *conn, role).await
            })
        })
        .await
    }

    async fn delete_role(&self, id: &str) -> Result<(), StoreError> {
        rbac::delete_role(&self.pool, id).await
    }

    async fn role(&self, id: &str) -> Result<Option<RoleDetail>, StoreError> {
        rbac::role(&self.pool, id).await
    }

    async fn role_by_name(&self, name: &str) -> Result<Option<RoleDetail>, StoreError> {
        rbac::role_by_name(&self.pool, name).await
    }

    async fn list_roles(&self) -> Result<Vec<RoleDetail>, StoreError> {
        rbac::list_roles(&self.pool).await
    }

    async fn grant_permission(
        &self,
        role_id: &str,
        permission_id: &str,
    ) -> Result<(), StoreError> {
        rbac::grant_permission(&self.pool, role_id, permission_id).await
    }

    async fn revoke_permission(
        &self,
        role_id: &str,
        permission_id: &str,
    ) -> Result<(), StoreError> {
        rbac::revoke_permission(&self.pool, role_id, permission_id).await
    }

    async fn user_role(&self, user_id: &str) -> Result<Option<RoleDetail>, StoreError> {
        rbac::user_role(&self.pool, user_id).await
    }

    async fn assign_role(&self, user_id: &str, role_id: &str) -> Result<(), StoreError> {
        rbac::assign_role(&self.pool, user_id, role_id).await
    }

    async fn unassign_role(&self, user_id: &str) -> Result<(), StoreError> {
        rbac::unassign_role(&self.pool, user_id).await
    }

    async fn user_has_permission(
        &self,
        user_id: &str,
        resource: &str,
        action: &str,
    ) -> Result<bool, StoreError> {
        rbac::user_has_permission(&self.pool, user_id, resource, action).await
    }

    // -- Audit --

    async fn append_audit(
        &self,
        entry: NewAuditEntry,
        id: String,
        now: DateTime<Utc>,
    ) -> Result<AuditEntry, StoreError> {
        self.run_tx(Isolation::ReadCommitted, move |conn| {
            Box::pin(audit::append(conn, entry, id, now))
        })
        .await
    }

    async fn list_audit(&self, page: PageRequest) -> Result<Page<AuditEntry>, StoreError> {
        audit::list(&self.pool, page).await
    }

    async fn audit_chain(&self) -> Result<Vec<AuditEntry>, StoreError> {
        audit::chain(&self.pool).await
    }

    // -- Dashboard --

    async fn dashboard_overview(&self, today: NaiveDate) -> Result<DashboardOverview, StoreError> {
        dashboard::overview(&self.pool, today).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_metacharacters() {
        assert_eq!(like_pattern("doe"), "%doe%");
        assert_eq!(like_pattern("50%_a\\"), "%50\\%\\_a\\\\%");
    }

    #[test]
    fn isolation_statements() {
        assert!(Isolation::Serializable.statement().ends_with("SERIALIZABLE"));
        assert!(Isolation::ReadCommitted.statement().ends_with("READ COMMITTED"));
    }

    // The tests below need a database; they return early without
    // `DATABASE_URL`:
    //   DATABASE_URL=postgres://... cargo test -p care-api exec_tx

    async fn connected() -> Option<PgStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = crate::db::init_pool(Some(&url)).await.ok()??;
        Some(PgStore::new(pool))
    }

    fn role(name: &str) -> Role {
        let now = care_core::now_micros();
        Role {
            id: care_core::new_id(),
            name: name.into(),
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn exec_tx_runs_serializable() {
        let Some(store) = connected().await else { return };
        let level: String = store
            .exec_tx(|conn| {
                Box::pin(async move {
                    let level = sqlx::query_scalar::<_, String>(
                        "SELECT current_setting('transaction_isolation')",
                    )
                    .fetch_one(conn)
                    .await?;
                    Ok::<_, StoreError>(level)
                })
            })
            .await
            .unwrap();
        assert_eq!(level, "serializable");
    }

    #[tokio::test]
    async fn exec_tx_commits_on_ok() {
        let Some(store) = connected().await else { return };
        let name = format!("committed-{}", care_core::new_id());
        let created = role(&name);
        store
            .exec_tx(move |conn| {
                Box::pin(async move { rbac::create_role(conn, &created, &[]).await })
            })
            .await
            .unwrap();
        assert!(store.role_by_name(&name).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn exec_tx_rolls_back_on_err() {
        let Some(store) = connected().await else { return };
        let name = format!("rolled-back-{}", care_core::new_id());
        let created = role(&name);
        let err = store
            .exec_tx(move |conn| {
                Box::pin(async move {
                    rbac::create_role(conn, &created, &[]).await?;
                    Err::<(), _>(StoreError::Conflict)
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
        assert!(store.role_by_name(&name).await.unwrap().is_none());
    }

    #[test]
    fn enum_columns_parse_or_report_corruption() {
        let status: care_core::ClientStatus = parse("in_care").unwrap();
        assert_eq!(status, care_core::ClientStatus::InCare);
        let err = parse::<care_core::ClientStatus>("archived").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
        assert_eq!(parse_opt::<care_core::DischargeStatus>(None).unwrap(), None);
    }
}
