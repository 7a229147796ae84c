//! # In-Memory Backend
//!
//! Every table lives in one [`Tables`] value behind a `parking_lot::RwLock`.
//! Reads clone out of a shared guard; a transaction runs against a cloned
//! snapshot that replaces the live tables only when it returns `Ok`, so a
//! failed rule check leaves nothing behind.
//!
//! The audit log sits outside [`Tables`] under its own lock. It is append-only
//! and written one entry at a time, so snapshots never copy it.
//!
//! The lock is never held across an `.await`.

mod clients;
mod directory;
mod evaluations;
mod rbac;
mod tables;

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;

use care_core::audit::{AuditEntry, NewAuditEntry};
use care_core::records::{
    Attachment, Client, ClientEvaluation, ClientGoal, DashboardOverview, Employee,
    EvaluationDetail, EvaluationSummary, Incident, IntakeForm, Location, Permission,
    ReferringOrg, RegistrationForm, Role, RoleDetail, Session, UpcomingEvaluation, User,
};
use care_core::{Page, PageRequest, RegistrationStatus, WaitingListPriority};

use super::{
    ClientFilter, ClientTransition, Datastore, DraftInput, EvaluationOutcome, EvaluationUpdate,
    NewEvaluation, RoleUpdate, RotateOutcome, StoreError,
};

pub(crate) use tables::Tables;

/// Process-local datastore. Cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
    audit: Arc<RwLock<Vec<AuditEntry>>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// An empty store with the system permissions seeded.
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::seeded())),
            audit: Arc::default(),
        }
    }

    fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> R {
        f(&self.tables.read())
    }

    /// Run `f` against a snapshot; commit only on `Ok`.
    fn tx<R>(&self, f: impl FnOnce(&mut Tables) -> Result<R, StoreError>) -> Result<R, StoreError> {
        let mut guard = self.tables.write();
        let mut snapshot = guard.clone();
        let out = f(&mut snapshot)?;
        *guard = snapshot;
        Ok(out)
    }
}

#[axum::async_trait]
impl Datastore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn close(&self) {
        tracing::info!("in-memory datastore closed");
    }

    // -- Users & sessions --

    async fn count_users(&self) -> Result<i64, StoreError> {
        Ok(self.read(|t| tables::count(t.users.len())))
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let email = email.trim().to_lowercase();
        Ok(self.read(|t| t.users.values().find(|u| u.email == email).cloned()))
    }

    async fn user_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.read(|t| t.users.get(id).cloned()))
    }

    async fn insert_session(&self, session: Session) -> Result<(), StoreError> {
        self.tx(|t| t.insert_session(session))
    }

    async fn rotate_session(
        &self,
        family: &str,
        presented_hash: &str,
        next_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, StoreError> {
        self.tx(|t| Ok(t.rotate_session(family, presented_hash, next_hash, expires_at, now)))
    }

    async fn revoke_family(&self, family: &str, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.tx(|t| Ok(t.revoke_family(family, now)))
    }

    async fn delete_user(&self, user_id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.tx(|t| t.delete_user(user_id, now))
    }

    // -- Employees --

    async fn create_employee_with_user(
        &self,
        user: User,
        employee: Employee,
    ) -> Result<Employee, StoreError> {
        self.tx(|t| t.create_employee_with_user(user, employee))
    }

    async fn employee(&self, id: &str) -> Result<Option<Employee>, StoreError> {
        Ok(self.read(|t| tables::live_employee(t, id).cloned()))
    }

    async fn employee_by_user(&self, user_id: &str) -> Result<Option<Employee>, StoreError> {
        Ok(self.read(|t| {
            t.employees
                .values()
                .find(|e| e.user_id == user_id && e.deleted_at.is_none())
                .cloned()
        }))
    }

    async fn list_employees(&self, page: PageRequest) -> Result<Page<Employee>, StoreError> {
        Ok(self.read(|t| {
            let items = tables::newest_first(
                t.employees.values().filter(|e| e.deleted_at.is_none()),
                |e| (e.created_at, e.id.clone()),
            );
            tables::page_of(items, page)
        }))
    }

    async fn update_employee(&self, employee: Employee) -> Result<Employee, StoreError> {
        self.tx(|t| t.update_employee(employee))
    }

    async fn delete_employee(&self, id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.tx(|t| {
            let employee = t
                .employees
                .get_mut(id)
                .filter(|e| e.deleted_at.is_none())
                .ok_or(StoreError::NotFound("employee"))?;
            employee.deleted_at = Some(now);
            employee.updated_at = now;
            Ok(())
        })
    }

    // -- Referring organizations --

    async fn insert_referring_org(&self, org: ReferringOrg) -> Result<ReferringOrg, StoreError> {
        self.tx(|t| t.insert_referring_org(org))
    }

    async fn referring_org(&self, id: &str) -> Result<Option<ReferringOrg>, StoreError> {
        Ok(self.read(|t| {
            t.referring_orgs
                .get(id)
                .filter(|o| o.deleted_at.is_none())
                .cloned()
        }))
    }

    async fn list_referring_orgs(
        &self,
        page: PageRequest,
    ) -> Result<Page<ReferringOrg>, StoreError> {
        Ok(self.read(|t| {
            let items = tables::newest_first(
                t.referring_orgs.values().filter(|o| o.deleted_at.is_none()),
                |o| (o.created_at, o.id.clone()),
            );
            tables::page_of(items, page)
        }))
    }

    async fn update_referring_org(&self, org: ReferringOrg) -> Result<ReferringOrg, StoreError> {
        self.tx(|t| t.update_referring_org(org))
    }

    async fn delete_referring_org(&self, id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.tx(|t| {
            let org = t
                .referring_orgs
                .get_mut(id)
                .filter(|o| o.deleted_at.is_none())
                .ok_or(StoreError::NotFound("referring organization"))?;
            org.deleted_at = Some(now);
            org.updated_at = now;
            Ok(())
        })
    }

    // -- Locations --

    async fn insert_location(&self, location: Location) -> Result<Location, StoreError> {
        self.tx(|t| t.insert_location(location))
    }

    async fn location(&self, id: &str) -> Result<Option<Location>, StoreError> {
        Ok(self.read(|t| tables::live_location(t, id).cloned()))
    }

    async fn list_locations(&self, page: PageRequest) -> Result<Page<Location>, StoreError> {
        Ok(self.read(|t| {
            let items = tables::newest_first(
                t.locations.values().filter(|l| l.deleted_at.is_none()),
                |l| (l.created_at, l.id.clone()),
            );
            tables::page_of(items, page)
        }))
    }

    async fn update_location(&self, location: Location) -> Result<Location, StoreError> {
        self.tx(|t| t.update_location(location))
    }

    async fn delete_location(&self, id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.tx(|t| {
            let location = t
                .locations
                .get_mut(id)
                .filter(|l| l.deleted_at.is_none())
                .ok_or(StoreError::NotFound("location"))?;
            location.deleted_at = Some(now);
            location.updated_at = now;
            Ok(())
        })
    }

    // -- Registration forms --

    async fn insert_registration_form(
        &self,
        form: RegistrationForm,
    ) -> Result<RegistrationForm, StoreError> {
        self.tx(|t| t.insert_registration_form(form))
    }

    async fn registration_form(&self, id: &str) -> Result<Option<RegistrationForm>, StoreError> {
        Ok(self.read(|t| tables::live_registration(t, id).cloned()))
    }

    async fn list_registration_forms(
        &self,
        status: Option<RegistrationStatus>,
        page: PageRequest,
    ) -> Result<Page<RegistrationForm>, StoreError> {
        Ok(self.read(|t| {
            let items = tables::newest_first(
                t.registration_forms.values().filter(|f| {
                    f.deleted_at.is_none() && status.map_or(true, |s| f.status == s)
                }),
                |f| (f.created_at, f.id.clone()),
            );
            tables::page_of(items, page)
        }))
    }

    async fn update_registration_form(
        &self,
        form: RegistrationForm,
    ) -> Result<RegistrationForm, StoreError> {
        self.tx(|t| t.update_registration_form(form))
    }

    async fn delete_registration_form(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.tx(|t| {
            let form = t
                .registration_forms
                .get_mut(id)
                .filter(|f| f.deleted_at.is_none())
                .ok_or(StoreError::NotFound("registration form"))?;
            form.deleted_at = Some(now);
            form.updated_at = now;
            Ok(())
        })
    }

    // -- Intake forms & goals --

    async fn insert_intake_form(&self, form: IntakeForm) -> Result<IntakeForm, StoreError> {
        self.tx(|t| t.insert_intake_form(form))
    }

    async fn intake_form(&self, id: &str) -> Result<Option<IntakeForm>, StoreError> {
        Ok(self.read(|t| t.intake_forms.get(id).cloned()))
    }

    async fn list_intake_forms(&self, page: PageRequest) -> Result<Page<IntakeForm>, StoreError> {
        Ok(self.read(|t| {
            let items =
                tables::newest_first(t.intake_forms.values(), |f| (f.created_at, f.id.clone()));
            tables::page_of(items, page)
        }))
    }

    async fn update_intake_form(&self, form: IntakeForm) -> Result<IntakeForm, StoreError> {
        self.tx(|t| t.update_intake_form(form))
    }

    async fn intake_goals(&self, intake_form_id: &str) -> Result<Vec<ClientGoal>, StoreError> {
        Ok(self.read(|t| {
            tables::oldest_first(
                t.goals.values().filter(|g| g.intake_form_id == intake_form_id),
                |g| (g.created_at, g.id.clone()),
            )
        }))
    }

    async fn insert_goal(&self, goal: ClientGoal) -> Result<ClientGoal, StoreError> {
        self.tx(|t| t.insert_goal(goal))
    }

    async fn delete_goal(&self, intake_form_id: &str, goal_id: &str) -> Result<(), StoreError> {
        self.tx(|t| t.delete_goal(intake_form_id, goal_id))
    }

    // -- Clients --

    async fn move_client_to_waiting_list(
        &self,
        intake_form_id: &str,
        priority: WaitingListPriority,
        client_id: String,
        now: DateTime<Utc>,
    ) -> Result<Client, StoreError> {
        self.tx(|t| t.move_client_to_waiting_list(intake_form_id, priority, client_id, now))
    }

    async fn client(&self, id: &str) -> Result<Option<Client>, StoreError> {
        Ok(self.read(|t| t.clients.get(id).cloned()))
    }

    async fn list_clients(
        &self,
        filter: ClientFilter,
        page: PageRequest,
    ) -> Result<Page<Client>, StoreError> {
        Ok(self.read(|t| {
            let items = tables::newest_first(
                t.clients.values().filter(|c| filter.matches(c)),
                |c| (c.created_at, c.id.clone()),
            );
            tables::page_of(items, page)
        }))
    }

    async fn client_goals(&self, client_id: &str) -> Result<Vec<ClientGoal>, StoreError> {
        Ok(self.read(|t| {
            tables::oldest_first(
                t.goals
                    .values()
                    .filter(|g| g.client_id.as_deref() == Some(client_id)),
                |g| (g.created_at, g.id.clone()),
            )
        }))
    }

    async fn transition_client(
        &self,
        id: &str,
        transition: ClientTransition,
        now: DateTime<Utc>,
    ) -> Result<Client, StoreError> {
        self.tx(|t| t.transition_client(id, &transition, now))
    }

    // -- Evaluations --

    async fn create_evaluation(
        &self,
        input: NewEvaluation,
        now: DateTime<Utc>,
    ) -> Result<EvaluationOutcome, StoreError> {
        self.tx(|t| t.create_evaluation(input, now))
    }

    async fn save_draft(
        &self,
        input: DraftInput,
        now: DateTime<Utc>,
    ) -> Result<ClientEvaluation, StoreError> {
        self.tx(|t| t.save_draft(input, now))
    }

    async fn submit_draft(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<EvaluationOutcome, StoreError> {
        self.tx(|t| t.submit_draft(id, now))
    }

    async fn delete_draft(&self, id: &str) -> Result<(), StoreError> {
        self.tx(|t| t.delete_draft(id))
    }

    async fn update_evaluation(
        &self,
        id: &str,
        update: EvaluationUpdate,
        now: DateTime<Utc>,
    ) -> Result<EvaluationDetail, StoreError> {
        self.tx(|t| t.update_evaluation(id, update, now))
    }

    async fn evaluation(&self, id: &str) -> Result<Option<EvaluationDetail>, StoreError> {
        Ok(self.read(|t| t.evaluations.get(id).map(|e| t.detail(e))))
    }

    async fn upcoming_evaluations(
        &self,
        from: Option<NaiveDate>,
        to: NaiveDate,
        today: NaiveDate,
    ) -> Result<Vec<UpcomingEvaluation>, StoreError> {
        Ok(self.read(|t| t.upcoming_evaluations(from, to, today)))
    }

    async fn recent_evaluations(&self, limit: i64) -> Result<Vec<EvaluationSummary>, StoreError> {
        Ok(self.read(|t| t.recent_evaluations(limit)))
    }

    async fn client_evaluations(
        &self,
        client_id: &str,
        page: PageRequest,
    ) -> Result<Page<ClientEvaluation>, StoreError> {
        Ok(self.read(|t| {
            let items = tables::newest_first(
                t.evaluations.values().filter(|e| e.client_id == client_id),
                |e| (e.evaluation_date, e.created_at, e.id.clone()),
            );
            tables::page_of(items, page)
        }))
    }

    async fn last_evaluation(
        &self,
        client_id: &str,
    ) -> Result<Option<EvaluationDetail>, StoreError> {
        Ok(self.read(|t| t.last_submitted(client_id).map(|e| t.detail(e))))
    }

    async fn client_draft(&self, client_id: &str) -> Result<Option<EvaluationDetail>, StoreError> {
        Ok(self.read(|t| t.draft_of(client_id).map(|e| t.detail(e))))
    }

    // -- Incidents --

    async fn insert_incident(&self, incident: Incident) -> Result<Incident, StoreError> {
        self.tx(|t| t.insert_incident(incident))
    }

    async fn incident(&self, id: &str) -> Result<Option<Incident>, StoreError> {
        Ok(self.read(|t| {
            t.incidents
                .get(id)
                .filter(|i| i.deleted_at.is_none())
                .cloned()
        }))
    }

    async fn list_incidents(
        &self,
        client_id: Option<String>,
        page: PageRequest,
    ) -> Result<Page<Incident>, StoreError> {
        Ok(self.read(|t| {
            let items = tables::newest_first(
                t.incidents.values().filter(|i| {
                    i.deleted_at.is_none()
                        && client_id.as_deref().map_or(true, |c| i.client_id == c)
                }),
                |i| (i.incident_date, i.created_at, i.id.clone()),
            );
            tables::page_of(items, page)
        }))
    }

    async fn update_incident(&self, incident: Incident) -> Result<Incident, StoreError> {
        self.tx(|t| t.update_incident(incident))
    }

    async fn delete_incident(&self, id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.tx(|t| {
            let incident = t
                .incidents
                .get_mut(id)
                .filter(|i| i.deleted_at.is_none())
                .ok_or(StoreError::NotFound("incident"))?;
            incident.deleted_at = Some(now);
            incident.updated_at = now;
            Ok(())
        })
    }

    // -- Attachments --

    async fn insert_attachment(&self, attachment: Attachment) -> Result<Attachment, StoreError> {
        self.tx(|t| {
            if t.attachments.contains_key(&attachment.id) {
                return Err(StoreError::AlreadyExists("attachments_pkey".into()));
            }
            t.attachments
                .insert(attachment.id.clone(), attachment.clone());
            Ok(attachment)
        })
    }

    async fn attachment(&self, id: &str) -> Result<Option<Attachment>, StoreError> {
        Ok(self.read(|t| t.attachments.get(id).cloned()))
    }

    // -- RBAC --

    async fn permissions(&self) -> Result<Vec<Permission>, StoreError> {
        Ok(self.read(|t| t.sorted_permissions()))
    }

    async fn create_role(
        &self,
        role: Role,
        permission_ids: Vec<String>,
    ) -> Result<RoleDetail, StoreError> {
        self.tx(|t| t.create_role(role, permission_ids))
    }

    async fn update_role(
        &self,
        id: &str,
        update: RoleUpdate,
        now: DateTime<Utc>,
    ) -> Result<RoleDetail, StoreError> {
        self.tx(|t| t.update_role(id, update, now))
    }

    async fn delete_role(&self, id: &str) -> Result<(), StoreError> {
        self.tx(|t| t.delete_role(id))
    }

    async fn role(&self, id: &str) -> Result<Option<RoleDetail>, StoreError> {
        Ok(self.read(|t| t.roles.get(id).map(|r| t.role_detail(r))))
    }

    async fn role_by_name(&self, name: &str) -> Result<Option<RoleDetail>, StoreError> {
        Ok(self.read(|t| {
            t.roles
                .values()
                .find(|r| r.name == name)
                .map(|r| t.role_detail(r))
        }))
    }

    async fn list_roles(&self) -> Result<Vec<RoleDetail>, StoreError> {
        Ok(self.read(|t| {
            let mut roles: Vec<&Role> = t.roles.values().collect();
            roles.sort_by(|a, b| a.name.cmp(&b.name));
            roles.into_iter().map(|r| t.role_detail(r)).collect()
        }))
    }

    async fn grant_permission(
        &self,
        role_id: &str,
        permission_id: &str,
    ) -> Result<(), StoreError> {
        self.tx(|t| t.grant_permission(role_id, permission_id))
    }

    async fn revoke_permission(
        &self,
        role_id: &str,
        permission_id: &str,
    ) -> Result<(), StoreError> {
        self.tx(|t| t.revoke_permission(role_id, permission_id))
    }

    async fn user_role(&self, user_id: &str) -> Result<Option<RoleDetail>, StoreError> {
        Ok(self.read(|t| {
            t.user_roles
                .get(user_id)
                .and_then(|role_id| t.roles.get(role_id))
                .map(|r| t.role_detail(r))
        }))
    }

    async fn assign_role(&self, user_id: &str, role_id: &str) -> Result<(), StoreError> {
        self.tx(|t| t.assign_role(user_id, role_id))
    }

    async fn unassign_role(&self, user_id: &str) -> Result<(), StoreError> {
        self.tx(|t| {
            t.user_roles
                .remove(user_id)
                .map(|_| ())
                .ok_or(StoreError::NotFound("user role"))
        })
    }

    async fn user_has_permission(
        &self,
        user_id: &str,
        resource: &str,
        action: &str,
    ) -> Result<bool, StoreError> {
        Ok(self.read(|t| t.user_has_permission(user_id, resource, action)))
    }

    // -- Audit --

    async fn append_audit(
        &self,
        entry: NewAuditEntry,
        id: String,
        now: DateTime<Utc>,
    ) -> Result<AuditEntry, StoreError> {
        let mut log = self.audit.write();
        let prev = log
            .last()
            .map(|e| e.current_hash.clone())
            .unwrap_or_else(|| care_core::GENESIS.to_string());
        let sealed = AuditEntry::seal(entry, id, &prev, now);
        log.push(sealed.clone());
        Ok(sealed)
    }

    async fn list_audit(&self, page: PageRequest) -> Result<Page<AuditEntry>, StoreError> {
        let newest: Vec<AuditEntry> = self.audit.read().iter().rev().cloned().collect();
        Ok(tables::page_of(newest, page))
    }

    async fn audit_chain(&self) -> Result<Vec<AuditEntry>, StoreError> {
        Ok(self.audit.read().clone())
    }

    // -- Dashboard --

    async fn dashboard_overview(&self, today: NaiveDate) -> Result<DashboardOverview, StoreError> {
        Ok(self.read(|t| t.dashboard_overview(today)))
    }
}
