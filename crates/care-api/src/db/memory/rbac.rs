//! Roles, permission grants and user role assignment.

use chrono::{DateTime, Utc};

use care_core::records::{Permission, Role, RoleDetail};

use super::tables::Tables;
use crate::db::{RoleUpdate, StoreError};

impl Tables {
    pub(crate) fn sorted_permissions(&self) -> Vec<Permission> {
        let mut permissions: Vec<Permission> = self.permissions.values().cloned().collect();
        permissions.sort_by(|a, b| (&a.resource, &a.action).cmp(&(&b.resource, &b.action)));
        permissions
    }

    /// `CreateRoleWithPermissionsTx`.
    pub(crate) fn create_role(
        &mut self,
        role: Role,
        permission_ids: Vec<String>,
    ) -> Result<RoleDetail, StoreError> {
        self.ensure_role_name_free(&role.name, &role.id)?;
        self.ensure_permissions_exist(&permission_ids)?;
        for permission_id in permission_ids {
            self.role_permissions.insert((role.id.clone(), permission_id));
        }
        self.roles.insert(role.id.clone(), role.clone());
        Ok(self.role_detail(&role))
    }

    /// `UpdateRoleWithPermissionsTx`: the permission set is replaced whole.
    pub(crate) fn update_role(
        &mut self,
        id: &str,
        update: RoleUpdate,
        now: DateTime<Utc>,
    ) -> Result<RoleDetail, StoreError> {
        let mut role = self
            .roles
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound("role"))?;
        if let Some(name) = update.name {
            self.ensure_role_name_free(&name, id)?;
            role.name = name;
        }
        if let Some(description) = update.description {
            role.description = Some(description);
        }
        if let Some(permission_ids) = update.permission_ids {
            self.ensure_permissions_exist(&permission_ids)?;
            self.role_permissions.retain(|(role_id, _)| role_id != id);
            for permission_id in permission_ids {
                self.role_permissions.insert((id.to_string(), permission_id));
            }
        }
        role.updated_at = now;
        self.roles.insert(role.id.clone(), role.clone());
        Ok(self.role_detail(&role))
    }

    pub(crate) fn delete_role(&mut self, id: &str) -> Result<(), StoreError> {
        if self.roles.remove(id).is_none() {
            return Err(StoreError::NotFound("role"));
        }
        self.role_permissions.retain(|(role_id, _)| role_id != id);
        self.user_roles.retain(|_, role_id| role_id != id);
        Ok(())
    }

    pub(crate) fn role_detail(&self, role: &Role) -> RoleDetail {
        let mut permissions: Vec<Permission> = self
            .role_permissions
            .iter()
            .filter(|(role_id, _)| *role_id == role.id)
            .filter_map(|(_, permission_id)| self.permissions.get(permission_id).cloned())
            .collect();
        permissions.sort_by(|a, b| (&a.resource, &a.action).cmp(&(&b.resource, &b.action)));
        RoleDetail {
            role: role.clone(),
            permissions,
        }
    }

    pub(crate) fn grant_permission(
        &mut self,
        role_id: &str,
        permission_id: &str,
    ) -> Result<(), StoreError> {
        if !self.roles.contains_key(role_id) {
            return Err(StoreError::NotFound("role"));
        }
        if !self.permissions.contains_key(permission_id) {
            return Err(StoreError::NotFound("permission"));
        }
        self.role_permissions
            .insert((role_id.to_string(), permission_id.to_string()));
        Ok(())
    }

    pub(crate) fn revoke_permission(
        &mut self,
        role_id: &str,
        permission_id: &str,
    ) -> Result<(), StoreError> {
        if !self.roles.contains_key(role_id) {
            return Err(StoreError::NotFound("role"));
        }
        if !self
            .role_permissions
            .remove(&(role_id.to_string(), permission_id.to_string()))
        {
            return Err(StoreError::NotFound("permission"));
        }
        Ok(())
    }

    /// Replaces any role the user already holds.
    pub(crate) fn assign_role(&mut self, user_id: &str, role_id: &str) -> Result<(), StoreError> {
        if !self.users.contains_key(user_id) {
            return Err(StoreError::NotFound("user"));
        }
        if !self.roles.contains_key(role_id) {
            return Err(StoreError::NotFound("role"));
        }
        self.user_roles
            .insert(user_id.to_string(), role_id.to_string());
        Ok(())
    }

    pub(crate) fn user_has_permission(&self, user_id: &str, resource: &str, action: &str) -> bool {
        let Some(role_id) = self.user_roles.get(user_id) else {
            return false;
        };
        self.role_permissions
            .iter()
            .filter(|(r, _)| r == role_id)
            .filter_map(|(_, p)| self.permissions.get(p))
            .any(|p| p.resource == resource && p.action == action)
    }

    fn ensure_role_name_free(&self, name: &str, id: &str) -> Result<(), StoreError> {
        if self.roles.values().any(|r| r.name == name && r.id != id) {
            return Err(StoreError::AlreadyExists("roles_name_key".into()));
        }
        Ok(())
    }

    fn ensure_permissions_exist(&self, ids: &[String]) -> Result<(), StoreError> {
        if ids.iter().any(|id| !self.permissions.contains_key(id)) {
            return Err(StoreError::NotFound("permission"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use care_core::records::User;

    use super::*;
    use crate::db::permission_id;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn role(id: &str, name: &str) -> Role {
        Role {
            id: id.into(),
            name: name.into(),
            description: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn with_user() -> Tables {
        let mut t = Tables::seeded();
        t.users.insert(
            "U1".into(),
            User {
                id: "U1".into(),
                email: "ada@care.nl".into(),
                password_hash: String::new(),
                created_at: now(),
                updated_at: now(),
            },
        );
        t
    }

    #[test]
    fn role_names_are_unique() {
        let mut t = with_user();
        t.create_role(role("R1", "coordinator"), Vec::new()).unwrap();
        assert!(matches!(
            t.create_role(role("R2", "coordinator"), Vec::new()),
            Err(StoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn unknown_permission_aborts_role_creation() {
        let mut t = with_user();
        assert!(matches!(
            t.create_role(role("R1", "x"), vec!["nope".into()]),
            Err(StoreError::NotFound("permission"))
        ));
    }

    #[test]
    fn permission_check_follows_assigned_role() {
        let mut t = with_user();
        let read_clients = permission_id("client", "read");
        t.create_role(role("R1", "viewer"), vec![read_clients.clone()])
            .unwrap();
        assert!(!t.user_has_permission("U1", "client", "read"));
        t.assign_role("U1", "R1").unwrap();
        assert!(t.user_has_permission("U1", "client", "read"));
        assert!(!t.user_has_permission("U1", "client", "delete"));
        t.revoke_permission("R1", &read_clients).unwrap();
        assert!(!t.user_has_permission("U1", "client", "read"));
    }

    #[test]
    fn update_replaces_permission_set() {
        let mut t = with_user();
        t.create_role(role("R1", "viewer"), vec![permission_id("client", "read")])
            .unwrap();
        let detail = t
            .update_role(
                "R1",
                RoleUpdate {
                    name: Some("auditor".into()),
                    description: None,
                    permission_ids: Some(vec![permission_id("audit", "read")]),
                },
                now(),
            )
            .unwrap();
        assert_eq!(detail.role.name, "auditor");
        assert_eq!(detail.permissions.len(), 1);
        assert_eq!(detail.permissions[0].resource, "audit");
    }

    #[test]
    fn deleting_a_role_unassigns_it() {
        let mut t = with_user();
        t.create_role(role("R1", "viewer"), Vec::new()).unwrap();
        t.assign_role("U1", "R1").unwrap();
        t.delete_role("R1").unwrap();
        assert!(t.user_roles.is_empty());
        assert!(matches!(t.assign_role("U2", "R1"), Err(StoreError::NotFound("user"))));
    }
}
