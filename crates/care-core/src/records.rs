//! # Domain Records
//!
//! The persisted shape of every entity. Both datastore backends produce and
//! consume these structs; the HTTP layer serializes them directly (camelCase
//! keys). Soft-deletable records carry `deleted_at`; reads filter tombstones.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::enums::{
    CareType, ClientStatus, DischargeReason, DischargeStatus, EvaluationStatus, Gender,
    GoalProgressStatus, IncidentSeverity, IncidentStatus, IncidentType, IntakeStatus,
    RegistrationStatus, WaitingListPriority,
};

// ── Identity & access ───────────────────────────────────────────────

/// Login credential. The password hash never leaves the process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Refresh-token session. One row per token family; rotation replaces
/// `token_hash` in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub token_family: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Not revoked and not expired at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A system-defined `(resource, action)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub id: String,
    pub resource: String,
    pub action: String,
    pub description: Option<String>,
}

/// A role together with its permission set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleDetail {
    pub role: Role,
    pub permissions: Vec<Permission>,
}

// ── Organisation ────────────────────────────────────────────────────

/// Staff profile, linked one-to-one with a [`User`]. Coordinator
/// references point here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    pub id: String,
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub bsn: String,
    pub date_of_birth: NaiveDate,
    pub phone: Option<String>,
    pub gender: Gender,
    pub role_label: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReferringOrg {
    pub id: String,
    pub name: String,
    pub contact_person: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Physical site. `occupied > capacity` is stored as-is and surfaced by
/// the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub id: String,
    pub name: String,
    pub postal_code: String,
    pub address: String,
    pub capacity: i32,
    pub occupied: i32,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Location {
    pub fn is_over_capacity(&self) -> bool {
        self.occupied > self.capacity
    }
}

// ── Forms ───────────────────────────────────────────────────────────

/// First application artifact for a prospective client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationForm {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub bsn: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub referring_org_id: Option<String>,
    pub care_type: CareType,
    pub registration_date: NaiveDate,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub attachment_ids: Vec<String>,
    pub status: RegistrationStatus,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Interview artifact; one-to-one child of a registration form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IntakeForm {
    pub id: String,
    pub registration_form_id: String,
    pub intake_date: NaiveDate,
    #[serde(with = "crate::temporal::time_of_day")]
    #[schema(value_type = String, example = "09:30:00")]
    pub intake_time: NaiveTime,
    pub location_id: String,
    pub coordinator_id: String,
    pub family_situation: Option<String>,
    pub main_provider: Option<String>,
    pub limitations: Option<String>,
    pub focus_areas: Option<String>,
    pub notes: Option<String>,
    pub evaluation_interval_weeks: i32,
    pub status: IntakeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Free-text objective. Hangs off an intake; linked to the client on
/// promotion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClientGoal {
    pub id: String,
    pub intake_form_id: String,
    pub client_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Client ──────────────────────────────────────────────────────────

/// The person under care. Created only by promotion from an intake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: String,
    pub registration_form_id: String,
    pub intake_form_id: String,
    pub first_name: String,
    pub last_name: String,
    pub bsn: String,
    pub date_of_birth: NaiveDate,
    pub gender: Gender,
    pub care_type: CareType,
    pub status: ClientStatus,
    pub waiting_list_priority: WaitingListPriority,
    pub care_start_date: Option<NaiveDate>,
    pub care_end_date: Option<NaiveDate>,
    pub ambulatory_weekly_hours: Option<i32>,
    pub assigned_location_id: Option<String>,
    pub coordinator_id: Option<String>,
    pub family_situation: Option<String>,
    pub main_provider: Option<String>,
    pub limitations: Option<String>,
    pub focus_areas: Option<String>,
    pub notes: Option<String>,
    pub discharge_date: Option<NaiveDate>,
    pub discharge_reason: Option<DischargeReason>,
    pub discharge_status: Option<DischargeStatus>,
    pub closing_report: Option<String>,
    pub evaluation_report: Option<String>,
    pub discharge_attachment_ids: Vec<String>,
    pub next_evaluation_date: Option<NaiveDate>,
    pub evaluation_interval_weeks: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Evaluations ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClientEvaluation {
    pub id: String,
    pub client_id: String,
    pub coordinator_id: String,
    pub evaluation_date: NaiveDate,
    pub overall_notes: Option<String>,
    pub status: EvaluationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GoalProgressLog {
    pub id: String,
    pub evaluation_id: String,
    pub goal_id: String,
    pub status: GoalProgressStatus,
    pub progress_notes: Option<String>,
}

/// An evaluation with its progress logs, ordered by goal id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationDetail {
    pub evaluation: ClientEvaluation,
    pub progress_logs: Vec<GoalProgressLog>,
}

/// Row of the critical / scheduled listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpcomingEvaluation {
    pub client_id: String,
    pub first_name: String,
    pub last_name: String,
    pub coordinator_id: Option<String>,
    pub assigned_location_id: Option<String>,
    pub next_evaluation_date: NaiveDate,
    /// Negative when overdue.
    pub days_until: i64,
    pub has_draft: bool,
}

/// Row of the recent-evaluations listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationSummary {
    pub evaluation: ClientEvaluation,
    pub client_first_name: String,
    pub client_last_name: String,
    pub progress_log_count: i64,
    pub has_draft: bool,
}

// ── Incidents & attachments ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    pub id: String,
    pub client_id: String,
    pub incident_date: NaiveDate,
    #[serde(with = "crate::temporal::time_of_day")]
    #[schema(value_type = String, example = "14:05:00")]
    pub incident_time: NaiveTime,
    pub incident_type: IncidentType,
    pub severity: IncidentSeverity,
    pub location_id: String,
    pub coordinator_id: String,
    pub description: String,
    pub action_taken: String,
    pub other_parties: Option<String>,
    pub status: IncidentStatus,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Metadata of an uploaded object; the bytes live in the object store
/// under `object_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub name: String,
    pub content_type: String,
    pub size: i64,
    #[serde(skip_serializing, default)]
    pub object_key: String,
    pub uploaded_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ── Dashboard ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocationOccupancy {
    pub location_id: String,
    pub name: String,
    pub capacity: i32,
    pub occupied: i32,
    pub over_capacity: bool,
}

/// Aggregate counters for the overview dashboard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DashboardOverview {
    pub clients_waiting_list: i64,
    pub clients_in_care: i64,
    pub clients_discharged: i64,
    pub clients_discharging: i64,
    pub waiting_list_high: i64,
    pub waiting_list_normal: i64,
    pub waiting_list_low: i64,
    pub critical_evaluations: i64,
    pub open_incidents: i64,
    pub locations: Vec<LocationOccupancy>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn user_never_serializes_password_hash() {
        let user = User {
            id: "u".into(),
            email: "a@b.nl".into(),
            password_hash: "$argon2id$secret".into(),
            created_at: ts(),
            updated_at: ts(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2"));
        assert!(json.contains("createdAt"));
    }

    #[test]
    fn session_liveness() {
        let mut session = Session {
            id: "s".into(),
            user_id: "u".into(),
            token_family: "f".into(),
            token_hash: "h".into(),
            expires_at: ts() + chrono::Duration::days(1),
            user_agent: None,
            ip_address: None,
            revoked_at: None,
            created_at: ts(),
            updated_at: ts(),
        };
        assert!(session.is_live(ts()));
        assert!(!session.is_live(ts() + chrono::Duration::days(2)));
        session.revoked_at = Some(ts());
        assert!(!session.is_live(ts()));
    }

    #[test]
    fn incident_time_uses_clock_format() {
        let incident = Incident {
            id: "i".into(),
            client_id: "c".into(),
            incident_date: NaiveDate::from_ymd_opt(2024, 2, 3).unwrap(),
            incident_time: NaiveTime::from_hms_opt(14, 5, 0).unwrap(),
            incident_type: IncidentType::Fall,
            severity: IncidentSeverity::Minor,
            location_id: "l".into(),
            coordinator_id: "e".into(),
            description: "slipped".into(),
            action_taken: "first aid".into(),
            other_parties: None,
            status: IncidentStatus::Pending,
            deleted_at: None,
            created_at: ts(),
            updated_at: ts(),
        };
        let json = serde_json::to_value(&incident).unwrap();
        assert_eq!(json["incidentTime"], "14:05:00");
        assert_eq!(json["incidentDate"], "2024-02-03");
        assert_eq!(json["incidentType"], "fall");
    }
}
