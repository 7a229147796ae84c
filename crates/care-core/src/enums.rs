//! # Domain Enums
//!
//! Closed vocabularies shared by the API, the services and both datastore
//! backends. Every enum serializes as a lowercase snake_case string, parses
//! back with [`std::str::FromStr`] (rejecting unknown input with
//! [`ValidationError::UnknownVariant`]), and exposes [`as_str`] for binding
//! into SQL text columns.
//!
//! [`as_str`]: CareType::as_str

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ValidationError;

macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Wire and storage representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( Self::$variant => $text ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok(Self::$variant), )+
                    other => Err(ValidationError::UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

text_enum! {
    /// Gender as recorded on identity documents.
    pub enum Gender {
        Male => "male",
        Female => "female",
        Other => "other",
    }
}

text_enum! {
    /// The form of care a client is registered for.
    pub enum CareType {
        ProtectedLiving => "protected_living",
        SemiIndependentLiving => "semi_independent_living",
        IndependentAssistedLiving => "independent_assisted_living",
        /// The only care type that carries weekly hours.
        AmbulatoryCare => "ambulatory_care",
    }
}

impl CareType {
    /// Whether clients of this care type are planned in weekly hours.
    pub fn requires_weekly_hours(&self) -> bool {
        matches!(self, Self::AmbulatoryCare)
    }
}

text_enum! {
    /// Position of a client in the lifecycle DAG.
    pub enum ClientStatus {
        WaitingList => "waiting_list",
        InCare => "in_care",
        Discharged => "discharged",
    }
}

text_enum! {
    /// Ordering hint for the waiting list.
    pub enum WaitingListPriority {
        Low => "low",
        Normal => "normal",
        High => "high",
    }
}

text_enum! {
    /// Two-phase discharge progress.
    pub enum DischargeStatus {
        InProgress => "in_progress",
        Completed => "completed",
    }
}

text_enum! {
    /// Why care ended.
    pub enum DischargeReason {
        TreatmentCompleted => "treatment_completed",
        ClientRequest => "client_request",
        Transferred => "transferred",
        Moved => "moved",
        Deceased => "deceased",
        Other => "other",
    }
}

text_enum! {
    /// Review state of a registration form.
    pub enum RegistrationStatus {
        Pending => "pending",
        InReview => "in_review",
        Approved => "approved",
        Rejected => "rejected",
    }
}

text_enum! {
    /// An intake becomes `completed` when it is promoted to a client.
    pub enum IntakeStatus {
        Pending => "pending",
        Completed => "completed",
    }
}

text_enum! {
    /// Draft evaluations are mutable; submitted ones are history.
    pub enum EvaluationStatus {
        Draft => "draft",
        Submitted => "submitted",
    }
}

text_enum! {
    /// Per-goal progress recorded in an evaluation.
    pub enum GoalProgressStatus {
        Starting => "starting",
        OnTrack => "on_track",
        Delayed => "delayed",
        Achieved => "achieved",
    }
}

text_enum! {
    /// Category of an incident report.
    pub enum IncidentType {
        Fall => "fall",
        MedicationError => "medication_error",
        Aggression => "aggression",
        SelfHarm => "self_harm",
        PropertyDamage => "property_damage",
        MissingPerson => "missing_person",
        Other => "other",
    }
}

text_enum! {
    /// Incident severity, mildest first.
    pub enum IncidentSeverity {
        Minor => "minor",
        Moderate => "moderate",
        Severe => "severe",
        Critical => "critical",
    }
}

text_enum! {
    /// Follow-up state of an incident.
    pub enum IncidentStatus {
        Pending => "pending",
        UnderInvestigation => "under_investigation",
        Completed => "completed",
    }
}

text_enum! {
    /// Audit action derived from the HTTP method.
    pub enum AuditAction {
        Read => "read",
        Create => "create",
        Update => "update",
        Delete => "delete",
    }
}

text_enum! {
    /// Outcome of an audited request.
    pub enum AuditStatus {
        Success => "success",
        Failure => "failure",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn serializes_as_snake_case() {
        let json = serde_json::to_string(&CareType::AmbulatoryCare).unwrap();
        assert_eq!(json, "\"ambulatory_care\"");
        let json = serde_json::to_string(&IncidentStatus::UnderInvestigation).unwrap();
        assert_eq!(json, "\"under_investigation\"");
    }

    #[test]
    fn deserialization_rejects_unknown_values() {
        assert!(serde_json::from_str::<ClientStatus>("\"archived\"").is_err());
        assert!(serde_json::from_str::<ClientStatus>("\"InCare\"").is_err());
    }

    #[test]
    fn from_str_round_trips_every_variant() {
        for status in GoalProgressStatus::ALL {
            assert_eq!(GoalProgressStatus::from_str(status.as_str()).unwrap(), *status);
        }
        for reason in DischargeReason::ALL {
            assert_eq!(reason.to_string(), reason.as_str());
        }
    }

    #[test]
    fn from_str_reports_kind_and_value() {
        let err = WaitingListPriority::from_str("urgent").unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownVariant {
                kind: "WaitingListPriority",
                value: "urgent".to_string()
            }
        );
    }

    #[test]
    fn only_ambulatory_care_requires_hours() {
        let with_hours: Vec<_> = CareType::ALL
            .iter()
            .filter(|c| c.requires_weekly_hours())
            .collect();
        assert_eq!(with_hours, vec![&CareType::AmbulatoryCare]);
    }
}
