//! Table layout, shared helpers, and the identity tables (users,
//! sessions, employees).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use care_core::records::{
    Attachment, Client, ClientEvaluation, ClientGoal, Employee, GoalProgressLog, Incident,
    IntakeForm, Location, Permission, ReferringOrg, RegistrationForm, Role, Session, User,
};
use care_core::{Page, PageRequest};

use crate::db::{
    permission_id, token_hashes_match, RotateOutcome, StoreError, ACTIONS, RESOURCES,
};

#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    pub(crate) users: BTreeMap<String, User>,
    pub(crate) sessions: BTreeMap<String, Session>,
    pub(crate) employees: BTreeMap<String, Employee>,
    pub(crate) referring_orgs: BTreeMap<String, ReferringOrg>,
    pub(crate) locations: BTreeMap<String, Location>,
    pub(crate) registration_forms: BTreeMap<String, RegistrationForm>,
    pub(crate) intake_forms: BTreeMap<String, IntakeForm>,
    pub(crate) goals: BTreeMap<String, ClientGoal>,
    pub(crate) clients: BTreeMap<String, Client>,
    pub(crate) evaluations: BTreeMap<String, ClientEvaluation>,
    pub(crate) progress_logs: BTreeMap<String, GoalProgressLog>,
    pub(crate) incidents: BTreeMap<String, Incident>,
    pub(crate) attachments: BTreeMap<String, Attachment>,
    pub(crate) roles: BTreeMap<String, Role>,
    pub(crate) permissions: BTreeMap<String, Permission>,
    /// `(role_id, permission_id)`.
    pub(crate) role_permissions: BTreeSet<(String, String)>,
    /// `user_id → role_id`; at most one role per user.
    pub(crate) user_roles: BTreeMap<String, String>,
}

impl Tables {
    /// Empty tables with every `(resource, action)` permission present.
    pub(crate) fn seeded() -> Self {
        let mut tables = Self::default();
        for resource in RESOURCES {
            for action in ACTIONS {
                let id = permission_id(resource, action);
                tables.permissions.insert(
                    id.clone(),
                    Permission {
                        id,
                        resource: (*resource).to_string(),
                        action: (*action).to_string(),
                        description: Some(format!("{action} {resource}")),
                    },
                );
            }
        }
        tables
    }

    // ── Sessions ────────────────────────────────────────────────────

    pub(crate) fn insert_session(&mut self, session: Session) -> Result<(), StoreError> {
        if !self.users.contains_key(&session.user_id) {
            return Err(StoreError::InvalidReference("sessions_user_id_fkey".into()));
        }
        if self
            .sessions
            .values()
            .any(|s| s.token_family == session.token_family)
        {
            return Err(StoreError::AlreadyExists("sessions_token_family_key".into()));
        }
        self.sessions.insert(session.id.clone(), session);
        Ok(())
    }

    pub(crate) fn rotate_session(
        &mut self,
        family: &str,
        presented_hash: &str,
        next_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RotateOutcome {
        let Some(session) = self
            .sessions
            .values_mut()
            .find(|s| s.token_family == family && s.is_live(now))
        else {
            return RotateOutcome::NotFound;
        };
        if !token_hashes_match(&session.token_hash, presented_hash) {
            self.revoke_family(family, now);
            return RotateOutcome::ReuseDetected;
        }
        session.token_hash = next_hash.to_string();
        session.expires_at = expires_at;
        session.updated_at = now;
        RotateOutcome::Rotated(session.clone())
    }

    pub(crate) fn revoke_family(&mut self, family: &str, now: DateTime<Utc>) -> u64 {
        let mut revoked = 0;
        for session in self
            .sessions
            .values_mut()
            .filter(|s| s.token_family == family && s.revoked_at.is_none())
        {
            session.revoked_at = Some(now);
            session.updated_at = now;
            revoked += 1;
        }
        revoked
    }

    /// `DeleteUserTx`: drop sessions and role, tombstone the employee, drop
    /// the user.
    pub(crate) fn delete_user(&mut self, user_id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        if self.users.remove(user_id).is_none() {
            return Err(StoreError::NotFound("user"));
        }
        self.sessions.retain(|_, s| s.user_id != user_id);
        self.user_roles.remove(user_id);
        for employee in self
            .employees
            .values_mut()
            .filter(|e| e.user_id == user_id && e.deleted_at.is_none())
        {
            employee.deleted_at = Some(now);
            employee.updated_at = now;
        }
        Ok(())
    }

    // ── Employees ───────────────────────────────────────────────────

    /// `CreateEmployeeWithUserTx`.
    pub(crate) fn create_employee_with_user(
        &mut self,
        mut user: User,
        employee: Employee,
    ) -> Result<Employee, StoreError> {
        user.email = user.email.trim().to_lowercase();
        if self.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::AlreadyExists("users_email_key".into()));
        }
        self.ensure_employee_bsn_free(&employee.bsn, &employee.id)?;
        self.users.insert(user.id.clone(), user);
        self.employees.insert(employee.id.clone(), employee.clone());
        Ok(employee)
    }

    pub(crate) fn update_employee(&mut self, employee: Employee) -> Result<Employee, StoreError> {
        if live_employee(self, &employee.id).is_none() {
            return Err(StoreError::NotFound("employee"));
        }
        self.ensure_employee_bsn_free(&employee.bsn, &employee.id)?;
        self.employees.insert(employee.id.clone(), employee.clone());
        Ok(employee)
    }

    fn ensure_employee_bsn_free(&self, bsn: &str, id: &str) -> Result<(), StoreError> {
        if self
            .employees
            .values()
            .any(|e| e.bsn == bsn && e.id != id && e.deleted_at.is_none())
        {
            return Err(StoreError::AlreadyExists("employees_bsn_key".into()));
        }
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

pub(crate) fn count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

pub(crate) fn page_of<T: Clone>(items: Vec<T>, page: PageRequest) -> Page<T> {
    let total = count(items.len());
    Page::new(page.slice(&items), total, page)
}

pub(crate) fn newest_first<'a, T, K, I>(items: I, key: impl Fn(&T) -> K) -> Vec<T>
where
    T: Clone + 'a,
    K: Ord,
    I: Iterator<Item = &'a T>,
{
    let mut out: Vec<T> = items.cloned().collect();
    out.sort_by(|a, b| key(b).cmp(&key(a)));
    out
}

pub(crate) fn oldest_first<'a, T, K, I>(items: I, key: impl Fn(&T) -> K) -> Vec<T>
where
    T: Clone + 'a,
    K: Ord,
    I: Iterator<Item = &'a T>,
{
    let mut out: Vec<T> = items.cloned().collect();
    out.sort_by_key(|item| key(item));
    out
}

pub(crate) fn live_employee<'a>(t: &'a Tables, id: &str) -> Option<&'a Employee> {
    t.employees.get(id).filter(|e| e.deleted_at.is_none())
}

pub(crate) fn live_location<'a>(t: &'a Tables, id: &str) -> Option<&'a Location> {
    t.locations.get(id).filter(|l| l.deleted_at.is_none())
}

pub(crate) fn live_registration<'a>(t: &'a Tables, id: &str) -> Option<&'a RegistrationForm> {
    t.registration_forms.get(id).filter(|f| f.deleted_at.is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    fn user(id: &str, email: &str) -> User {
        User {
            id: id.into(),
            email: email.into(),
            password_hash: String::new(),
            created_at: now(),
            updated_at: now(),
        }
    }

    fn employee(id: &str, user_id: &str, bsn: &str) -> Employee {
        Employee {
            id: id.into(),
            user_id: user_id.into(),
            first_name: "Ada".into(),
            last_name: "Jansen".into(),
            bsn: bsn.into(),
            date_of_birth: NaiveDate::from_ymd_opt(1980, 1, 1).unwrap(),
            phone: None,
            gender: care_core::Gender::Female,
            role_label: None,
            deleted_at: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn session(family: &str, hash: &str) -> Session {
        Session {
            id: format!("s-{family}"),
            user_id: "U1".into(),
            token_family: family.into(),
            token_hash: hash.into(),
            expires_at: now() + Duration::days(7),
            user_agent: None,
            ip_address: None,
            revoked_at: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn with_user() -> Tables {
        let mut t = Tables::seeded();
        t.create_employee_with_user(user("U1", "Ada@Care.nl"), employee("E1", "U1", "111"))
            .unwrap();
        t
    }

    #[test]
    fn seeded_permissions_cover_every_resource_action() {
        let t = Tables::seeded();
        assert_eq!(t.permissions.len(), RESOURCES.len() * ACTIONS.len());
    }

    #[test]
    fn emails_are_stored_lower_cased_and_unique() {
        let mut t = with_user();
        assert_eq!(t.users["U1"].email, "ada@care.nl");
        let err = t
            .create_employee_with_user(user("U2", "ADA@care.nl"), employee("E2", "U2", "222"))
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
    }

    #[test]
    fn rotation_replaces_hash_then_detects_reuse() {
        let mut t = with_user();
        t.insert_session(session("F", "h1")).unwrap();
        let later = now() + Duration::days(7);
        match t.rotate_session("F", "h1", "h2", later, now()) {
            RotateOutcome::Rotated(s) => assert_eq!(s.token_hash, "h2"),
            other => panic!("expected rotation, got {other:?}"),
        }
        assert_eq!(
            t.rotate_session("F", "h1", "h3", later, now()),
            RotateOutcome::ReuseDetected
        );
        assert_eq!(
            t.rotate_session("F", "h2", "h4", later, now()),
            RotateOutcome::NotFound
        );
    }

    #[test]
    fn delete_user_tombstones_employee_and_drops_sessions() {
        let mut t = with_user();
        t.insert_session(session("F", "h1")).unwrap();
        t.delete_user("U1", now()).unwrap();
        assert!(t.users.is_empty());
        assert!(t.sessions.is_empty());
        assert!(t.employees["E1"].deleted_at.is_some());
        assert!(matches!(
            t.delete_user("U1", now()),
            Err(StoreError::NotFound("user"))
        ));
    }
}
