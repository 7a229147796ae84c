//! # Client Lifecycle State Machine
//!
//! ```text
//! waiting_list ──move_to_care──▶ in_care ──start_discharge──▶ in_care + in_progress
//!                                                                   │
//!                                                 complete_discharge▼
//!                                                            discharged + completed
//! ```
//!
//! The graph is a strict DAG: there is no way back and no deletion.
//! Every transition validates all preconditions before touching the
//! record, so an `Err` leaves the client exactly as it was.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use care_core::records::{Client, IntakeForm, RegistrationForm};
use care_core::{ClientStatus, DischargeReason, DischargeStatus, WaitingListPriority};

// ── Phase ───────────────────────────────────────────────────────────

/// The four lifecycle phases, derived from `(status, discharge_status)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientPhase {
    WaitingList,
    InCare,
    Discharging,
    Discharged,
}

impl ClientPhase {
    /// Derive the phase of a stored client.
    pub fn of(client: &Client) -> Self {
        match (client.status, client.discharge_status) {
            (ClientStatus::WaitingList, _) => Self::WaitingList,
            (ClientStatus::InCare, Some(DischargeStatus::InProgress)) => Self::Discharging,
            (ClientStatus::InCare, _) => Self::InCare,
            (ClientStatus::Discharged, _) => Self::Discharged,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingList => "waiting_list",
            Self::InCare => "in_care",
            Self::Discharging => "discharging",
            Self::Discharged => "discharged",
        }
    }

    /// Phases reachable in one step.
    pub fn successors(&self) -> &'static [ClientPhase] {
        match self {
            Self::WaitingList => &[Self::InCare],
            Self::InCare => &[Self::Discharging],
            Self::Discharging => &[Self::Discharged],
            Self::Discharged => &[],
        }
    }
}

impl std::fmt::Display for ClientPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Errors ──────────────────────────────────────────────────────────

/// A lifecycle rule was violated. Variants map one-to-one onto the API's
/// client error codes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("client status is {current}, expected {expected}")]
    InvalidClientStatus {
        current: ClientStatus,
        expected: ClientStatus,
    },

    #[error("ambulatory weekly hours are required for ambulatory care and must be greater than zero")]
    AmbulatoryHoursRequired,

    #[error("ambulatory weekly hours are only allowed for ambulatory care")]
    AmbulatoryHoursNotAllowed,

    #[error("care end date {end} is before care start date {start}")]
    CareEndBeforeStart { start: NaiveDate, end: NaiveDate },

    #[error("client is not in care (status {current})")]
    ClientNotInCare { current: ClientStatus },

    #[error("discharge has already been started")]
    DischargeAlreadyStarted,

    #[error("discharge has not been started")]
    DischargeNotStarted,

    #[error("{0} must not be empty")]
    EmptyReport(&'static str),
}

// ── Inputs ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveToCare {
    pub care_start_date: NaiveDate,
    pub care_end_date: Option<NaiveDate>,
    pub ambulatory_weekly_hours: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartDischarge {
    pub discharge_date: NaiveDate,
    pub reason: DischargeReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteDischarge {
    pub closing_report: String,
    pub evaluation_report: String,
    pub attachment_ids: Vec<String>,
}

// ── Transitions ─────────────────────────────────────────────────────

/// Build the client created by promoting `intake`.
///
/// Identity and care type come from the registration form; coordination
/// attributes and the evaluation interval from the intake.
pub fn promote(
    id: String,
    registration: &RegistrationForm,
    intake: &IntakeForm,
    priority: WaitingListPriority,
    now: DateTime<Utc>,
) -> Client {
    Client {
        id,
        registration_form_id: registration.id.clone(),
        intake_form_id: intake.id.clone(),
        first_name: registration.first_name.clone(),
        last_name: registration.last_name.clone(),
        bsn: registration.bsn.clone(),
        date_of_birth: registration.date_of_birth,
        gender: registration.gender,
        care_type: registration.care_type,
        status: ClientStatus::WaitingList,
        waiting_list_priority: priority,
        care_start_date: None,
        care_end_date: None,
        ambulatory_weekly_hours: None,
        assigned_location_id: Some(intake.location_id.clone()),
        coordinator_id: Some(intake.coordinator_id.clone()),
        family_situation: intake.family_situation.clone(),
        main_provider: intake.main_provider.clone(),
        limitations: intake.limitations.clone(),
        focus_areas: intake.focus_areas.clone(),
        notes: intake.notes.clone(),
        discharge_date: None,
        discharge_reason: None,
        discharge_status: None,
        closing_report: None,
        evaluation_report: None,
        discharge_attachment_ids: Vec::new(),
        next_evaluation_date: None,
        evaluation_interval_weeks: Some(intake.evaluation_interval_weeks),
        created_at: now,
        updated_at: now,
    }
}

/// `waiting_list → in_care`.
pub fn move_to_care(
    client: &mut Client,
    input: &MoveToCare,
    now: DateTime<Utc>,
) -> Result<(), LifecycleError> {
    if client.status != ClientStatus::WaitingList {
        return Err(LifecycleError::InvalidClientStatus {
            current: client.status,
            expected: ClientStatus::WaitingList,
        });
    }
    if client.care_type.requires_weekly_hours() {
        match input.ambulatory_weekly_hours {
            Some(hours) if hours > 0 => {}
            _ => return Err(LifecycleError::AmbulatoryHoursRequired),
        }
    } else if input.ambulatory_weekly_hours.is_some() {
        return Err(LifecycleError::AmbulatoryHoursNotAllowed);
    }
    if let Some(end) = input.care_end_date {
        if end < input.care_start_date {
            return Err(LifecycleError::CareEndBeforeStart {
                start: input.care_start_date,
                end,
            });
        }
    }

    client.status = ClientStatus::InCare;
    client.care_start_date = Some(input.care_start_date);
    client.care_end_date = input.care_end_date;
    client.ambulatory_weekly_hours = input.ambulatory_weekly_hours;
    client.updated_at = now;
    Ok(())
}

/// Phase 1 of discharge. Status stays `in_care`.
pub fn start_discharge(
    client: &mut Client,
    input: &StartDischarge,
    now: DateTime<Utc>,
) -> Result<(), LifecycleError> {
    if client.status != ClientStatus::InCare {
        return Err(LifecycleError::ClientNotInCare {
            current: client.status,
        });
    }
    if client.discharge_status.is_some() {
        return Err(LifecycleError::DischargeAlreadyStarted);
    }

    client.discharge_status = Some(DischargeStatus::InProgress);
    client.discharge_date = Some(input.discharge_date);
    client.discharge_reason = Some(input.reason);
    client.updated_at = now;
    Ok(())
}

/// Phase 2 of discharge: `in_care + in_progress → discharged + completed`.
pub fn complete_discharge(
    client: &mut Client,
    input: &CompleteDischarge,
    now: DateTime<Utc>,
) -> Result<(), LifecycleError> {
    if client.status != ClientStatus::InCare {
        return Err(LifecycleError::ClientNotInCare {
            current: client.status,
        });
    }
    if client.discharge_status != Some(DischargeStatus::InProgress) {
        return Err(LifecycleError::DischargeNotStarted);
    }
    if input.closing_report.trim().is_empty() {
        return Err(LifecycleError::EmptyReport("closingReport"));
    }
    if input.evaluation_report.trim().is_empty() {
        return Err(LifecycleError::EmptyReport("evaluationReport"));
    }

    client.status = ClientStatus::Discharged;
    client.discharge_status = Some(DischargeStatus::Completed);
    client.closing_report = Some(input.closing_report.clone());
    client.evaluation_report = Some(input.evaluation_report.clone());
    client.discharge_attachment_ids = input.attachment_ids.clone();
    client.updated_at = now;
    Ok(())
}

/// Re-prioritise a client that is still waiting.
pub fn update_waiting_list_priority(
    client: &mut Client,
    priority: WaitingListPriority,
    now: DateTime<Utc>,
) -> Result<(), LifecycleError> {
    if client.status != ClientStatus::WaitingList {
        return Err(LifecycleError::InvalidClientStatus {
            current: client.status,
            expected: ClientStatus::WaitingList,
        });
    }
    client.waiting_list_priority = priority;
    client.updated_at = now;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use care_core::{CareType, Gender, IntakeStatus, RegistrationStatus};
    use chrono::{NaiveTime, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn registration(care_type: CareType) -> RegistrationForm {
        RegistrationForm {
            id: "R1".into(),
            first_name: "John".into(),
            last_name: "Doe".into(),
            bsn: "123456789".into(),
            date_of_birth: date(1990, 4, 2),
            gender: Gender::Male,
            referring_org_id: None,
            care_type,
            registration_date: date(2023, 12, 1),
            reason: None,
            notes: None,
            attachment_ids: vec![],
            status: RegistrationStatus::Approved,
            deleted_at: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn intake() -> IntakeForm {
        IntakeForm {
            id: "I1".into(),
            registration_form_id: "R1".into(),
            intake_date: date(2023, 12, 20),
            intake_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            location_id: "L1".into(),
            coordinator_id: "E1".into(),
            family_situation: Some("lives alone".into()),
            main_provider: None,
            limitations: None,
            focus_areas: Some("daily structure".into()),
            notes: None,
            evaluation_interval_weeks: 4,
            status: IntakeStatus::Pending,
            created_at: now(),
            updated_at: now(),
        }
    }

    fn client(care_type: CareType) -> Client {
        promote("C1".into(), &registration(care_type), &intake(), WaitingListPriority::High, now())
    }

    fn care(hours: Option<i32>) -> MoveToCare {
        MoveToCare {
            care_start_date: date(2024, 1, 15),
            care_end_date: None,
            ambulatory_weekly_hours: hours,
        }
    }

    fn in_care_client() -> Client {
        let mut c = client(CareType::ProtectedLiving);
        move_to_care(&mut c, &care(None), now()).unwrap();
        c
    }

    fn start() -> StartDischarge {
        StartDischarge {
            discharge_date: date(2024, 6, 1),
            reason: DischargeReason::TreatmentCompleted,
        }
    }

    fn finish() -> CompleteDischarge {
        CompleteDischarge {
            closing_report: "goals met".into(),
            evaluation_report: "stable".into(),
            attachment_ids: vec!["A1".into()],
        }
    }

    #[test]
    fn promotion_copies_identity_and_coordination() {
        let c = client(CareType::AmbulatoryCare);
        assert_eq!(c.status, ClientStatus::WaitingList);
        assert_eq!(c.waiting_list_priority, WaitingListPriority::High);
        assert_eq!(c.care_type, CareType::AmbulatoryCare);
        assert_eq!(c.first_name, "John");
        assert_eq!(c.bsn, "123456789");
        assert_eq!(c.registration_form_id, "R1");
        assert_eq!(c.intake_form_id, "I1");
        assert_eq!(c.assigned_location_id.as_deref(), Some("L1"));
        assert_eq!(c.coordinator_id.as_deref(), Some("E1"));
        assert_eq!(c.focus_areas.as_deref(), Some("daily structure"));
        assert_eq!(c.evaluation_interval_weeks, Some(4));
        assert!(c.care_start_date.is_none());
        assert!(c.ambulatory_weekly_hours.is_none());
        assert_eq!(ClientPhase::of(&c), ClientPhase::WaitingList);
    }

    #[test]
    fn ambulatory_move_to_care_sets_hours() {
        let mut c = client(CareType::AmbulatoryCare);
        move_to_care(&mut c, &care(Some(20)), now()).unwrap();
        assert_eq!(c.status, ClientStatus::InCare);
        assert_eq!(c.care_start_date, Some(date(2024, 1, 15)));
        assert_eq!(c.ambulatory_weekly_hours, Some(20));
    }

    #[test]
    fn ambulatory_without_hours_is_rejected_and_unchanged() {
        let mut c = client(CareType::AmbulatoryCare);
        let before = c.clone();
        assert_eq!(
            move_to_care(&mut c, &care(None), now()),
            Err(LifecycleError::AmbulatoryHoursRequired)
        );
        assert_eq!(
            move_to_care(&mut c, &care(Some(0)), now()),
            Err(LifecycleError::AmbulatoryHoursRequired)
        );
        assert_eq!(c, before);
    }

    #[test]
    fn non_ambulatory_with_hours_is_rejected() {
        let mut c = client(CareType::SemiIndependentLiving);
        assert_eq!(
            move_to_care(&mut c, &care(Some(8)), now()),
            Err(LifecycleError::AmbulatoryHoursNotAllowed)
        );
        assert_eq!(c.status, ClientStatus::WaitingList);
    }

    #[test]
    fn move_to_care_requires_waiting_list() {
        let mut c = in_care_client();
        let err = move_to_care(&mut c, &care(None), now()).unwrap_err();
        assert_eq!(
            err,
            LifecycleError::InvalidClientStatus {
                current: ClientStatus::InCare,
                expected: ClientStatus::WaitingList
            }
        );
    }

    #[test]
    fn end_date_before_start_is_rejected() {
        let mut c = client(CareType::ProtectedLiving);
        let input = MoveToCare {
            care_end_date: Some(date(2024, 1, 1)),
            ..care(None)
        };
        assert!(matches!(
            move_to_care(&mut c, &input, now()),
            Err(LifecycleError::CareEndBeforeStart { .. })
        ));
    }

    #[test]
    fn two_phase_discharge() {
        let mut c = in_care_client();
        start_discharge(&mut c, &start(), now()).unwrap();
        assert_eq!(c.status, ClientStatus::InCare);
        assert_eq!(c.discharge_status, Some(DischargeStatus::InProgress));
        assert_eq!(ClientPhase::of(&c), ClientPhase::Discharging);

        assert_eq!(
            start_discharge(&mut c, &start(), now()),
            Err(LifecycleError::DischargeAlreadyStarted)
        );

        complete_discharge(&mut c, &finish(), now()).unwrap();
        assert_eq!(c.status, ClientStatus::Discharged);
        assert_eq!(c.discharge_status, Some(DischargeStatus::Completed));
        assert_eq!(c.closing_report.as_deref(), Some("goals met"));
        assert_eq!(c.discharge_attachment_ids, vec!["A1".to_string()]);
        assert_eq!(ClientPhase::of(&c), ClientPhase::Discharged);
    }

    #[test]
    fn discharge_requires_care() {
        let mut c = client(CareType::ProtectedLiving);
        assert!(matches!(
            start_discharge(&mut c, &start(), now()),
            Err(LifecycleError::ClientNotInCare { .. })
        ));
        assert!(matches!(
            complete_discharge(&mut c, &finish(), now()),
            Err(LifecycleError::ClientNotInCare { .. })
        ));
    }

    #[test]
    fn complete_requires_started_discharge() {
        let mut c = in_care_client();
        assert_eq!(
            complete_discharge(&mut c, &finish(), now()),
            Err(LifecycleError::DischargeNotStarted)
        );
    }

    #[test]
    fn complete_requires_non_empty_reports() {
        let mut c = in_care_client();
        start_discharge(&mut c, &start(), now()).unwrap();
        let input = CompleteDischarge {
            closing_report: "  ".into(),
            ..finish()
        };
        assert_eq!(
            complete_discharge(&mut c, &input, now()),
            Err(LifecycleError::EmptyReport("closingReport"))
        );
        assert_eq!(c.status, ClientStatus::InCare);
    }

    #[test]
    fn discharged_is_terminal() {
        assert!(ClientPhase::Discharged.successors().is_empty());
        let mut c = in_care_client();
        start_discharge(&mut c, &start(), now()).unwrap();
        complete_discharge(&mut c, &finish(), now()).unwrap();
        assert!(start_discharge(&mut c, &start(), now()).is_err());
        assert!(move_to_care(&mut c, &care(None), now()).is_err());
    }

    #[test]
    fn priority_only_changes_while_waiting() {
        let mut c = client(CareType::ProtectedLiving);
        update_waiting_list_priority(&mut c, WaitingListPriority::Low, now()).unwrap();
        assert_eq!(c.waiting_list_priority, WaitingListPriority::Low);
        let mut c = in_care_client();
        assert!(update_waiting_list_priority(&mut c, WaitingListPriority::High, now()).is_err());
    }

    #[test]
    fn phase_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ClientPhase::WaitingList).unwrap(),
            "\"waiting_list\""
        );
    }
}
