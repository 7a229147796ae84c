//! Referring organizations, locations, forms, goals, incidents, and the
//! dashboard aggregate.

use chrono::NaiveDate;

use care_core::records::{
    ClientGoal, DashboardOverview, Incident, IntakeForm, Location, LocationOccupancy,
    ReferringOrg, RegistrationForm,
};
use care_core::{ClientStatus, DischargeStatus, IncidentStatus, WaitingListPriority};
use care_state::{classify_due, DueBucket};

use super::tables::{count, live_location, live_registration, Tables};
use crate::db::StoreError;

impl Tables {
    // ── Referring organizations ─────────────────────────────────────

    pub(crate) fn insert_referring_org(
        &mut self,
        org: ReferringOrg,
    ) -> Result<ReferringOrg, StoreError> {
        if self.referring_orgs.contains_key(&org.id) {
            return Err(StoreError::AlreadyExists("referring_orgs_pkey".into()));
        }
        self.referring_orgs.insert(org.id.clone(), org.clone());
        Ok(org)
    }

    pub(crate) fn update_referring_org(
        &mut self,
        org: ReferringOrg,
    ) -> Result<ReferringOrg, StoreError> {
        match self.referring_orgs.get(&org.id) {
            Some(existing) if existing.deleted_at.is_none() => {
                self.referring_orgs.insert(org.id.clone(), org.clone());
                Ok(org)
            }
            _ => Err(StoreError::NotFound("referring organization")),
        }
    }

    // ── Locations ───────────────────────────────────────────────────

    pub(crate) fn insert_location(&mut self, location: Location) -> Result<Location, StoreError> {
        if self.locations.contains_key(&location.id) {
            return Err(StoreError::AlreadyExists("locations_pkey".into()));
        }
        self.locations.insert(location.id.clone(), location.clone());
        Ok(location)
    }

    pub(crate) fn update_location(&mut self, location: Location) -> Result<Location, StoreError> {
        if live_location(self, &location.id).is_none() {
            return Err(StoreError::NotFound("location"));
        }
        self.locations.insert(location.id.clone(), location.clone());
        Ok(location)
    }

    // ── Registration forms ──────────────────────────────────────────

    pub(crate) fn insert_registration_form(
        &mut self,
        form: RegistrationForm,
    ) -> Result<RegistrationForm, StoreError> {
        self.check_registration(&form)?;
        self.registration_forms.insert(form.id.clone(), form.clone());
        Ok(form)
    }

    pub(crate) fn update_registration_form(
        &mut self,
        form: RegistrationForm,
    ) -> Result<RegistrationForm, StoreError> {
        if live_registration(self, &form.id).is_none() {
            return Err(StoreError::NotFound("registration form"));
        }
        self.check_registration(&form)?;
        self.registration_forms.insert(form.id.clone(), form.clone());
        Ok(form)
    }

    fn check_registration(&self, form: &RegistrationForm) -> Result<(), StoreError> {
        if self
            .registration_forms
            .values()
            .any(|f| f.bsn == form.bsn && f.id != form.id && f.deleted_at.is_none())
        {
            return Err(StoreError::AlreadyExists("registration_forms_bsn_key".into()));
        }
        if let Some(org_id) = &form.referring_org_id {
            if !self.referring_orgs.contains_key(org_id) {
                return Err(StoreError::InvalidReference(
                    "registration_forms_referring_org_id_fkey".into(),
                ));
            }
        }
        for attachment_id in &form.attachment_ids {
            if !self.attachments.contains_key(attachment_id) {
                return Err(StoreError::InvalidReference("attachment_ids".into()));
            }
        }
        Ok(())
    }

    // ── Intake forms & goals ────────────────────────────────────────

    pub(crate) fn insert_intake_form(&mut self, form: IntakeForm) -> Result<IntakeForm, StoreError> {
        if self
            .intake_forms
            .values()
            .any(|f| f.registration_form_id == form.registration_form_id)
        {
            return Err(StoreError::AlreadyExists(
                "intake_forms_registration_form_id_key".into(),
            ));
        }
        self.check_intake(&form)?;
        self.intake_forms.insert(form.id.clone(), form.clone());
        Ok(form)
    }

    pub(crate) fn update_intake_form(&mut self, form: IntakeForm) -> Result<IntakeForm, StoreError> {
        if !self.intake_forms.contains_key(&form.id) {
            return Err(StoreError::NotFound("intake form"));
        }
        self.check_intake(&form)?;
        self.intake_forms.insert(form.id.clone(), form.clone());
        Ok(form)
    }

    fn check_intake(&self, form: &IntakeForm) -> Result<(), StoreError> {
        if live_registration(self, &form.registration_form_id).is_none() {
            return Err(StoreError::InvalidReference(
                "intake_forms_registration_form_id_fkey".into(),
            ));
        }
        if !self.locations.contains_key(&form.location_id) {
            return Err(StoreError::InvalidReference(
                "intake_forms_location_id_fkey".into(),
            ));
        }
        if !self.employees.contains_key(&form.coordinator_id) {
            return Err(StoreError::InvalidReference(
                "intake_forms_coordinator_id_fkey".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn insert_goal(&mut self, goal: ClientGoal) -> Result<ClientGoal, StoreError> {
        let Some(intake) = self.intake_forms.get(&goal.intake_form_id) else {
            return Err(StoreError::InvalidReference(
                "client_goals_intake_form_id_fkey".into(),
            ));
        };
        // Goals added after promotion belong to the client too.
        let client_id = self
            .clients
            .values()
            .find(|c| c.intake_form_id == intake.id)
            .map(|c| c.id.clone());
        let goal = ClientGoal {
            client_id: goal.client_id.or(client_id),
            ..goal
        };
        self.goals.insert(goal.id.clone(), goal.clone());
        Ok(goal)
    }

    pub(crate) fn delete_goal(&mut self, intake_form_id: &str, goal_id: &str) -> Result<(), StoreError> {
        match self.goals.get(goal_id) {
            Some(goal) if goal.intake_form_id == intake_form_id => {}
            _ => return Err(StoreError::NotFound("goal")),
        }
        if self.progress_logs.values().any(|l| l.goal_id == goal_id) {
            return Err(StoreError::InvalidReference(
                "goal_progress_logs_goal_id_fkey".into(),
            ));
        }
        self.goals.remove(goal_id);
        Ok(())
    }

    // ── Incidents ───────────────────────────────────────────────────

    pub(crate) fn insert_incident(&mut self, incident: Incident) -> Result<Incident, StoreError> {
        self.check_incident(&incident)?;
        self.incidents.insert(incident.id.clone(), incident.clone());
        Ok(incident)
    }

    pub(crate) fn update_incident(&mut self, incident: Incident) -> Result<Incident, StoreError> {
        match self.incidents.get(&incident.id) {
            Some(existing) if existing.deleted_at.is_none() => {}
            _ => return Err(StoreError::NotFound("incident")),
        }
        self.check_incident(&incident)?;
        self.incidents.insert(incident.id.clone(), incident.clone());
        Ok(incident)
    }

    fn check_incident(&self, incident: &Incident) -> Result<(), StoreError> {
        if !self.clients.contains_key(&incident.client_id) {
            return Err(StoreError::InvalidReference("incidents_client_id_fkey".into()));
        }
        if !self.locations.contains_key(&incident.location_id) {
            return Err(StoreError::InvalidReference(
                "incidents_location_id_fkey".into(),
            ));
        }
        if !self.employees.contains_key(&incident.coordinator_id) {
            return Err(StoreError::InvalidReference(
                "incidents_coordinator_id_fkey".into(),
            ));
        }
        Ok(())
    }

    // ── Dashboard ───────────────────────────────────────────────────

    pub(crate) fn dashboard_overview(&self, today: NaiveDate) -> DashboardOverview {
        let mut overview = DashboardOverview::default();
        for client in self.clients.values() {
            match client.status {
                ClientStatus::WaitingList => {
                    overview.clients_waiting_list += 1;
                    match client.waiting_list_priority {
                        WaitingListPriority::High => overview.waiting_list_high += 1,
                        WaitingListPriority::Normal => overview.waiting_list_normal += 1,
                        WaitingListPriority::Low => overview.waiting_list_low += 1,
                    }
                }
                ClientStatus::InCare => {
                    overview.clients_in_care += 1;
                    if client.discharge_status == Some(DischargeStatus::InProgress) {
                        overview.clients_discharging += 1;
                    }
                }
                ClientStatus::Discharged => overview.clients_discharged += 1,
            }
            if client.status == ClientStatus::InCare {
                if let Some(next) = client.next_evaluation_date {
                    if classify_due(next, today) == DueBucket::Critical {
                        overview.critical_evaluations += 1;
                    }
                }
            }
        }
        overview.open_incidents = count(
            self.incidents
                .values()
                .filter(|i| i.deleted_at.is_none() && i.status != IncidentStatus::Completed)
                .count(),
        );
        let mut locations: Vec<&Location> = self
            .locations
            .values()
            .filter(|l| l.deleted_at.is_none())
            .collect();
        locations.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        overview.locations = locations
            .into_iter()
            .map(|l| LocationOccupancy {
                location_id: l.id.clone(),
                name: l.name.clone(),
                capacity: l.capacity,
                occupied: l.occupied,
                over_capacity: l.is_over_capacity(),
            })
            .collect();
        overview
    }
}
