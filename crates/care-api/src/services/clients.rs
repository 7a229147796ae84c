//! # Client Service
//!
//! Promotion of an intake to the waiting list and the lifecycle transitions
//! `waiting_list → in_care → (discharging) → discharged`. The rules live in
//! `care-state`; the gateway applies them with the client row locked, so a
//! failed precondition leaves the client untouched.

use axum::http::StatusCode;
use thiserror::Error;

use care_core::records::{Client, ClientGoal};
use care_core::{new_id, now_micros, Page, PageRequest, WaitingListPriority};
use care_state::LifecycleError;

use crate::db::{ClientFilter, ClientTransition, Store, StoreError};
use crate::error::AppError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("client not found")]
    ClientNotFound,

    #[error("intake form not found")]
    IntakeNotFound,

    #[error("registration form not found")]
    RegistrationNotFound,

    #[error("intake form has already been promoted to a client")]
    IntakeAlreadyPromoted,

    #[error("failed to create client: {0}")]
    FailedToCreateClient(String),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ClientError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound("client") => Self::ClientNotFound,
            StoreError::NotFound("intake form") => Self::IntakeNotFound,
            StoreError::NotFound("registration form") => Self::RegistrationNotFound,
            StoreError::IntakeAlreadyPromoted => Self::IntakeAlreadyPromoted,
            StoreError::AlreadyExists(constraint)
                if constraint == "clients_intake_form_id_key"
                    || constraint == "clients_registration_form_id_key" =>
            {
                Self::IntakeAlreadyPromoted
            }
            StoreError::Lifecycle(e) => Self::Lifecycle(e),
            other => Self::Store(other),
        }
    }
}

impl From<ClientError> for AppError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::ClientNotFound => {
                AppError::domain(StatusCode::NOT_FOUND, "CLIENT_NOT_FOUND", err.to_string())
            }
            ClientError::IntakeNotFound => {
                AppError::domain(StatusCode::NOT_FOUND, "INTAKE_NOT_FOUND", err.to_string())
            }
            ClientError::RegistrationNotFound => AppError::domain(
                StatusCode::NOT_FOUND,
                "REGISTRATION_NOT_FOUND",
                err.to_string(),
            ),
            ClientError::IntakeAlreadyPromoted => AppError::domain(
                StatusCode::CONFLICT,
                "INTAKE_ALREADY_PROMOTED",
                err.to_string(),
            ),
            ClientError::FailedToCreateClient(detail) => {
                tracing::error!(%detail, "client promotion failed");
                AppError::domain(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "FAILED_TO_CREATE_CLIENT",
                    "failed to create client",
                )
            }
            ClientError::Lifecycle(e) => e.into(),
            ClientError::Store(e) => e.into(),
        }
    }
}

/// `MoveClientToWaitingListTx`: promote an intake form to a client.
pub async fn move_to_waiting_list(
    store: &Store,
    intake_form_id: &str,
    priority: WaitingListPriority,
) -> Result<Client, ClientError> {
    let client = store
        .move_client_to_waiting_list(intake_form_id, priority, new_id(), now_micros())
        .await
        .map_err(|err| match ClientError::from(err) {
            ClientError::Store(
                e @ (StoreError::InvalidReference(_)
                | StoreError::Database(_)
                | StoreError::Corrupt(_)),
            ) => ClientError::FailedToCreateClient(e.to_string()),
            other => other,
        })?;
    tracing::info!(
        client_id = %client.id,
        intake_form_id,
        priority = %priority,
        "client placed on waiting list"
    );
    Ok(client)
}

/// Apply one lifecycle transition in its own transaction.
pub async fn transition(
    store: &Store,
    id: &str,
    transition: ClientTransition,
) -> Result<Client, ClientError> {
    let name = transition.name();
    match store.transition_client(id, transition, now_micros()).await {
        Ok(client) => {
            tracing::info!(client_id = %client.id, status = %client.status, tx = name, "client transitioned");
            Ok(client)
        }
        Err(err) => {
            let err = ClientError::from(err);
            if matches!(err, ClientError::Lifecycle(_)) {
                tracing::info!(client_id = id, tx = name, error = %err, "transition rejected");
            }
            Err(err)
        }
    }
}

pub async fn get(store: &Store, id: &str) -> Result<Client, ClientError> {
    store.client(id).await?.ok_or(ClientError::ClientNotFound)
}

pub async fn list(
    store: &Store,
    filter: ClientFilter,
    page: PageRequest,
) -> Result<Page<Client>, ClientError> {
    Ok(store.list_clients(filter, page).await?)
}

pub async fn goals(store: &Store, id: &str) -> Result<Vec<ClientGoal>, ClientError> {
    get(store, id).await?;
    Ok(store.client_goals(id).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::NaiveDate;
    use care_core::records::{Employee, IntakeForm, Location, RegistrationForm, User};
    use care_core::{CareType, ClientStatus, DischargeReason, DischargeStatus, Gender, IntakeStatus, RegistrationStatus};
    use care_state::{CompleteDischarge, MoveToCare, StartDischarge};

    use crate::db::memory::MemoryStore;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Registration, location, coordinator and intake; returns the intake id.
    async fn seeded(care_type: CareType) -> (Store, String) {
        let store: Store = Arc::new(MemoryStore::new());
        let now = now_micros();
        let user_id = new_id();
        let coordinator = store
            .create_employee_with_user(
                User {
                    id: user_id.clone(),
                    email: format!("{}@example.nl", new_id()),
                    password_hash: String::new(),
                    created_at: now,
                    updated_at: now,
                },
                Employee {
                    id: new_id(),
                    user_id,
                    first_name: "Coord".into(),
                    last_name: "Inator".into(),
                    bsn: "111111111".into(),
                    date_of_birth: day(1980, 1, 1),
                    phone: None,
                    gender: Gender::Other,
                    role_label: None,
                    deleted_at: None,
                    created_at: now,
                    updated_at: now,
                },
            )
            .await
            .unwrap();
        let location = store
            .insert_location(Location {
                id: new_id(),
                name: "De Linde".into(),
                postal_code: "1234AB".into(),
                address: "Lindelaan 1".into(),
                capacity: 10,
                occupied: 0,
                deleted_at: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        let registration = store
            .insert_registration_form(RegistrationForm {
                id: new_id(),
                first_name: "Jan".into(),
                last_name: "Jansen".into(),
                bsn: "123456789".into(),
                date_of_birth: day(2001, 5, 5),
                gender: Gender::Male,
                referring_org_id: None,
                care_type,
                registration_date: day(2024, 1, 2),
                reason: None,
                notes: None,
                attachment_ids: vec![],
                status: RegistrationStatus::Approved,
                deleted_at: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        let intake = store
            .insert_intake_form(IntakeForm {
                id: new_id(),
                registration_form_id: registration.id,
                intake_date: day(2024, 1, 10),
                intake_time: chrono::NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                location_id: location.id,
                coordinator_id: coordinator.id,
                family_situation: Some("lives with parents".into()),
                main_provider: None,
                limitations: None,
                focus_areas: None,
                notes: None,
                evaluation_interval_weeks: 4,
                status: IntakeStatus::Pending,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        (store, intake.id)
    }

    #[tokio::test]
    async fn promotion_copies_the_intake_and_is_single_shot() {
        let (store, intake_id) = seeded(CareType::ProtectedLiving).await;
        let client = move_to_waiting_list(&store, &intake_id, WaitingListPriority::High)
            .await
            .unwrap();
        assert_eq!(client.status, ClientStatus::WaitingList);
        assert_eq!(client.intake_form_id, intake_id);
        assert_eq!(client.family_situation.as_deref(), Some("lives with parents"));
        assert_eq!(client.evaluation_interval_weeks, Some(4));

        let intake = store.intake_form(&intake_id).await.unwrap().unwrap();
        assert_eq!(intake.status, IntakeStatus::Completed);

        let again = move_to_waiting_list(&store, &intake_id, WaitingListPriority::Low).await;
        assert!(matches!(again, Err(ClientError::IntakeAlreadyPromoted)));
    }

    #[tokio::test]
    async fn unknown_intake_is_reported() {
        let (store, _) = seeded(CareType::ProtectedLiving).await;
        let err = move_to_waiting_list(&store, &new_id(), WaitingListPriority::Normal)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::IntakeNotFound));
        assert_eq!(
            AppError::from(err).status_and_code(),
            (StatusCode::NOT_FOUND, "INTAKE_NOT_FOUND")
        );
    }

    #[tokio::test]
    async fn ambulatory_hours_are_enforced_without_side_effects() {
        let (store, intake_id) = seeded(CareType::AmbulatoryCare).await;
        let client = move_to_waiting_list(&store, &intake_id, WaitingListPriority::Normal)
            .await
            .unwrap();

        let err = transition(
            &store,
            &client.id,
            ClientTransition::MoveToCare(MoveToCare {
                care_start_date: day(2024, 2, 1),
                care_end_date: None,
                ambulatory_weekly_hours: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(
            AppError::from(err).status_and_code(),
            (StatusCode::BAD_REQUEST, "AMBULATORY_HOURS_REQUIRED")
        );
        assert_eq!(get(&store, &client.id).await.unwrap().status, ClientStatus::WaitingList);

        let in_care = transition(
            &store,
            &client.id,
            ClientTransition::MoveToCare(MoveToCare {
                care_start_date: day(2024, 2, 1),
                care_end_date: None,
                ambulatory_weekly_hours: Some(6),
            }),
        )
        .await
        .unwrap();
        assert_eq!(in_care.status, ClientStatus::InCare);
        assert_eq!(in_care.ambulatory_weekly_hours, Some(6));
    }

    #[tokio::test]
    async fn discharge_runs_in_two_phases() {
        let (store, intake_id) = seeded(CareType::ProtectedLiving).await;
        let client = move_to_waiting_list(&store, &intake_id, WaitingListPriority::Normal)
            .await
            .unwrap();
        transition(
            &store,
            &client.id,
            ClientTransition::MoveToCare(MoveToCare {
                care_start_date: day(2024, 2, 1),
                care_end_date: None,
                ambulatory_weekly_hours: None,
            }),
        )
        .await
        .unwrap();

        let complete = ClientTransition::CompleteDischarge(CompleteDischarge {
            closing_report: "closed".into(),
            evaluation_report: "went well".into(),
            attachment_ids: vec![],
        });
        let early = transition(&store, &client.id, complete.clone()).await.unwrap_err();
        assert!(matches!(early, ClientError::Lifecycle(LifecycleError::DischargeNotStarted)));

        let started = transition(
            &store,
            &client.id,
            ClientTransition::StartDischarge(StartDischarge {
                discharge_date: day(2024, 6, 1),
                reason: DischargeReason::TreatmentCompleted,
            }),
        )
        .await
        .unwrap();
        assert_eq!(started.discharge_status, Some(DischargeStatus::InProgress));

        let done = transition(&store, &client.id, complete).await.unwrap();
        assert_eq!(done.status, ClientStatus::Discharged);
        assert_eq!(done.discharge_status, Some(DischargeStatus::Completed));
    }

    #[tokio::test]
    async fn missing_client_is_client_not_found() {
        let (store, _) = seeded(CareType::ProtectedLiving).await;
        let err = transition(
            &store,
            &new_id(),
            ClientTransition::Priority(WaitingListPriority::High),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ClientError::ClientNotFound));
        assert!(matches!(goals(&store, &new_id()).await, Err(ClientError::ClientNotFound)));
    }
}
