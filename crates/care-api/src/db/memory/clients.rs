//! Client promotion and lifecycle transitions.

use chrono::{DateTime, Utc};

use care_core::records::Client;
use care_core::{IntakeStatus, WaitingListPriority};

use super::tables::Tables;
use crate::db::{ClientTransition, StoreError};

impl Tables {
    /// `MoveClientToWaitingListTx`.
    pub(crate) fn move_client_to_waiting_list(
        &mut self,
        intake_form_id: &str,
        priority: WaitingListPriority,
        client_id: String,
        now: DateTime<Utc>,
    ) -> Result<Client, StoreError> {
        let intake = self
            .intake_forms
            .get(intake_form_id)
            .cloned()
            .ok_or(StoreError::NotFound("intake form"))?;
        if self.clients.values().any(|c| c.intake_form_id == intake.id) {
            return Err(StoreError::IntakeAlreadyPromoted);
        }
        let registration = self
            .registration_forms
            .get(&intake.registration_form_id)
            .filter(|r| r.deleted_at.is_none())
            .cloned()
            .ok_or(StoreError::NotFound("registration form"))?;
        if self
            .clients
            .values()
            .any(|c| c.registration_form_id == registration.id)
        {
            return Err(StoreError::AlreadyExists(
                "clients_registration_form_id_key".into(),
            ));
        }

        let client = care_state::promote(client_id, &registration, &intake, priority, now);
        self.clients.insert(client.id.clone(), client.clone());

        if let Some(stored) = self.intake_forms.get_mut(intake_form_id) {
            stored.status = IntakeStatus::Completed;
            stored.updated_at = now;
        }
        for goal in self
            .goals
            .values_mut()
            .filter(|g| g.intake_form_id == intake_form_id)
        {
            goal.client_id = Some(client.id.clone());
            goal.updated_at = now;
        }
        Ok(client)
    }

    pub(crate) fn transition_client(
        &mut self,
        id: &str,
        transition: &ClientTransition,
        now: DateTime<Utc>,
    ) -> Result<Client, StoreError> {
        if let ClientTransition::CompleteDischarge(input) = transition {
            if input
                .attachment_ids
                .iter()
                .any(|a| !self.attachments.contains_key(a))
            {
                return Err(StoreError::InvalidReference(
                    "discharge_attachment_ids".into(),
                ));
            }
        }
        let client = self
            .clients
            .get_mut(id)
            .ok_or(StoreError::NotFound("client"))?;
        transition.apply(client, now)?;
        Ok(client.clone())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveTime, TimeZone};

    use care_core::records::{ClientGoal, Employee, IntakeForm, Location, RegistrationForm};
    use care_core::{CareType, ClientStatus, Gender, RegistrationStatus};
    use care_state::{LifecycleError, MoveToCare};

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn fixture() -> Tables {
        let mut t = Tables::seeded();
        t.locations.insert(
            "L1".into(),
            Location {
                id: "L1".into(),
                name: "De Linde".into(),
                postal_code: "1234AB".into(),
                address: "Lindelaan 1".into(),
                capacity: 10,
                occupied: 2,
                deleted_at: None,
                created_at: now(),
                updated_at: now(),
            },
        );
        t.employees.insert(
            "E1".into(),
            Employee {
                id: "E1".into(),
                user_id: "U1".into(),
                first_name: "Ada".into(),
                last_name: "Jansen".into(),
                bsn: "999".into(),
                date_of_birth: date(1980, 1, 1),
                phone: None,
                gender: Gender::Female,
                role_label: None,
                deleted_at: None,
                created_at: now(),
                updated_at: now(),
            },
        );
        t.registration_forms.insert(
            "R1".into(),
            RegistrationForm {
                id: "R1".into(),
                first_name: "John".into(),
                last_name: "Doe".into(),
                bsn: "123456789".into(),
                date_of_birth: date(1990, 4, 2),
                gender: Gender::Male,
                referring_org_id: None,
                care_type: CareType::AmbulatoryCare,
                registration_date: date(2024, 1, 2),
                reason: None,
                notes: None,
                attachment_ids: Vec::new(),
                status: RegistrationStatus::Approved,
                deleted_at: None,
                created_at: now(),
                updated_at: now(),
            },
        );
        t.intake_forms.insert(
            "I1".into(),
            IntakeForm {
                id: "I1".into(),
                registration_form_id: "R1".into(),
                intake_date: date(2024, 1, 5),
                intake_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                location_id: "L1".into(),
                coordinator_id: "E1".into(),
                family_situation: None,
                main_provider: None,
                limitations: None,
                focus_areas: Some("daily structure".into()),
                notes: None,
                evaluation_interval_weeks: 4,
                status: IntakeStatus::Pending,
                created_at: now(),
                updated_at: now(),
            },
        );
        t.goals.insert(
            "G1".into(),
            ClientGoal {
                id: "G1".into(),
                intake_form_id: "I1".into(),
                client_id: None,
                title: "Independent shopping".into(),
                description: None,
                created_at: now(),
                updated_at: now(),
            },
        );
        t
    }

    #[test]
    fn promotion_links_intake_goals_and_completes_intake() {
        let mut t = fixture();
        let client = t
            .move_client_to_waiting_list("I1", WaitingListPriority::High, "C1".into(), now())
            .unwrap();
        assert_eq!(client.status, ClientStatus::WaitingList);
        assert_eq!(client.care_type, CareType::AmbulatoryCare);
        assert_eq!(client.evaluation_interval_weeks, Some(4));
        assert_eq!(t.intake_forms["I1"].status, IntakeStatus::Completed);
        assert_eq!(t.goals["G1"].client_id.as_deref(), Some("C1"));
    }

    #[test]
    fn second_promotion_of_same_intake_is_rejected() {
        let mut t = fixture();
        t.move_client_to_waiting_list("I1", WaitingListPriority::Normal, "C1".into(), now())
            .unwrap();
        let err = t
            .move_client_to_waiting_list("I1", WaitingListPriority::Normal, "C2".into(), now())
            .unwrap_err();
        assert!(matches!(err, StoreError::IntakeAlreadyPromoted));
        assert_eq!(t.clients.len(), 1);
    }

    #[test]
    fn unknown_intake_is_not_found() {
        let mut t = fixture();
        assert!(matches!(
            t.move_client_to_waiting_list("nope", WaitingListPriority::Low, "C1".into(), now()),
            Err(StoreError::NotFound("intake form"))
        ));
    }

    #[test]
    fn rejected_transition_surfaces_lifecycle_error() {
        let mut t = fixture();
        t.move_client_to_waiting_list("I1", WaitingListPriority::Normal, "C1".into(), now())
            .unwrap();
        let err = t
            .transition_client(
                "C1",
                &ClientTransition::MoveToCare(MoveToCare {
                    care_start_date: date(2024, 1, 15),
                    care_end_date: None,
                    ambulatory_weekly_hours: None,
                }),
                now(),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Lifecycle(LifecycleError::AmbulatoryHoursRequired)
        ));
        assert_eq!(t.clients["C1"].status, ClientStatus::WaitingList);
    }
}
