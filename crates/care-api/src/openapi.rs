//! # OpenAPI Specification Assembly
//!
//! Assembles all utoipa-documented routes into a single OpenAPI spec,
//! served unauthenticated at `/swagger/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::state::AppState;

/// Adds the bearer access-token scheme to the spec.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .description(Some("Access token from POST /auth/login or /auth/refresh."))
                        .build(),
                ),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Care Coordination API",
        version = "0.1.0",
        description = "Back-end for a youth and family care organization.\n\nProvides:\n- **Intake pipeline** from registration through intake to the waiting list\n- **Client lifecycle** with two-phase discharge\n- **Evaluations** with single drafts and automatic rescheduling\n- **Incidents**, attachments and a dashboard overview\n- **RBAC** over `(resource, action)` permissions\n- **Hash-chained audit log** with a verification endpoint\n\nAuthentication: `Authorization: Bearer <access token>`. Everything except `/auth/login`, `/auth/refresh`, `/auth/logout`, `/health*`, `/metrics` and this document requires it.",
        license(name = "AGPL-3.0-or-later")
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development server"),
    ),
    security(
        ("bearer_auth" = [])
    ),
    paths(
        // ── Auth ─────────────────────────────────────────────────────────
        crate::routes::auth::login,
        crate::routes::auth::refresh,
        crate::routes::auth::logout,
        crate::routes::auth::me,
        // ── Employees & users ────────────────────────────────────────────
        crate::routes::employees::create_employee,
        crate::routes::employees::list_employees,
        crate::routes::employees::get_employee,
        crate::routes::employees::update_employee,
        crate::routes::employees::delete_employee,
        crate::routes::employees::delete_user,
        crate::routes::employees::get_user_role,
        crate::routes::employees::assign_user_role,
        crate::routes::employees::remove_user_role,
        // ── Referring organizations & locations ──────────────────────────
        crate::routes::referring_orgs::create_org,
        crate::routes::referring_orgs::list_orgs,
        crate::routes::referring_orgs::get_org,
        crate::routes::referring_orgs::update_org,
        crate::routes::referring_orgs::delete_org,
        crate::routes::locations::create_location,
        crate::routes::locations::list_locations,
        crate::routes::locations::get_location,
        crate::routes::locations::update_location,
        crate::routes::locations::delete_location,
        // ── Forms ────────────────────────────────────────────────────────
        crate::routes::registration_forms::create_registration,
        crate::routes::registration_forms::list_registrations,
        crate::routes::registration_forms::get_registration,
        crate::routes::registration_forms::update_registration,
        crate::routes::registration_forms::delete_registration,
        crate::routes::registration_forms::update_status,
        crate::routes::intake_forms::create_intake,
        crate::routes::intake_forms::list_intakes,
        crate::routes::intake_forms::get_intake,
        crate::routes::intake_forms::update_intake,
        crate::routes::intake_forms::list_goals,
        crate::routes::intake_forms::add_goal,
        crate::routes::intake_forms::delete_goal,
        // ── Clients ──────────────────────────────────────────────────────
        crate::routes::clients::move_to_waiting_list,
        crate::routes::clients::list_clients,
        crate::routes::clients::get_client,
        crate::routes::clients::client_goals,
        crate::routes::clients::move_to_care,
        crate::routes::clients::start_discharge,
        crate::routes::clients::complete_discharge,
        crate::routes::clients::update_priority,
        // ── Evaluations ──────────────────────────────────────────────────
        crate::routes::evaluations::create_evaluation,
        crate::routes::evaluations::save_draft,
        crate::routes::evaluations::submit_draft,
        crate::routes::evaluations::update_evaluation,
        crate::routes::evaluations::delete_draft,
        crate::routes::evaluations::get_evaluation,
        crate::routes::evaluations::critical,
        crate::routes::evaluations::scheduled,
        crate::routes::evaluations::recent,
        crate::routes::evaluations::client_history,
        crate::routes::evaluations::client_last,
        crate::routes::evaluations::client_draft,
        // ── Incidents & attachments ──────────────────────────────────────
        crate::routes::incidents::create_incident,
        crate::routes::incidents::list_incidents,
        crate::routes::incidents::get_incident,
        crate::routes::incidents::update_incident,
        crate::routes::incidents::delete_incident,
        crate::routes::attachments::upload,
        crate::routes::attachments::get_attachment,
        crate::routes::attachments::download,
        // ── RBAC ─────────────────────────────────────────────────────────
        crate::routes::roles::list_permissions,
        crate::routes::roles::create_role,
        crate::routes::roles::list_roles,
        crate::routes::roles::get_role,
        crate::routes::roles::update_role,
        crate::routes::roles::delete_role,
        crate::routes::roles::grant_permission,
        crate::routes::roles::revoke_permission,
        // ── Dashboard & audit ────────────────────────────────────────────
        crate::routes::dashboard::overview,
        crate::routes::audit::list_audit,
        crate::routes::audit::verify,
    ),
    components(
        schemas(
            // ── Errors ──────────────────────────────────────────────────
            crate::error::ErrorBody,
            crate::error::ErrorDetail,
            // ── Records ─────────────────────────────────────────────────
            care_core::records::User,
            care_core::records::Role,
            care_core::records::Permission,
            care_core::records::RoleDetail,
            care_core::records::Employee,
            care_core::records::ReferringOrg,
            care_core::records::Location,
            care_core::records::RegistrationForm,
            care_core::records::IntakeForm,
            care_core::records::ClientGoal,
            care_core::records::Client,
            care_core::records::ClientEvaluation,
            care_core::records::GoalProgressLog,
            care_core::records::EvaluationDetail,
            care_core::records::UpcomingEvaluation,
            care_core::records::EvaluationSummary,
            care_core::records::Incident,
            care_core::records::Attachment,
            care_core::records::LocationOccupancy,
            care_core::records::DashboardOverview,
            care_core::AuditEntry,
            care_core::ChainVerification,
            // ── Vocabularies ────────────────────────────────────────────
            care_core::Gender,
            care_core::CareType,
            care_core::ClientStatus,
            care_core::WaitingListPriority,
            care_core::DischargeStatus,
            care_core::DischargeReason,
            care_core::RegistrationStatus,
            care_core::IntakeStatus,
            care_core::EvaluationStatus,
            care_core::GoalProgressStatus,
            care_core::IncidentType,
            care_core::IncidentSeverity,
            care_core::IncidentStatus,
            care_core::AuditAction,
            care_core::AuditStatus,
            // ── Request / response DTOs ─────────────────────────────────
            crate::routes::auth::LoginRequest,
            crate::routes::auth::RefreshRequest,
            crate::routes::auth::LogoutResponse,
            crate::services::auth::Profile,
            crate::routes::employees::CreateEmployeeRequest,
            crate::routes::employees::UpdateEmployeeRequest,
            crate::routes::employees::AssignRoleRequest,
            crate::routes::referring_orgs::CreateReferringOrgRequest,
            crate::routes::referring_orgs::UpdateReferringOrgRequest,
            crate::routes::locations::CreateLocationRequest,
            crate::routes::locations::UpdateLocationRequest,
            crate::routes::registration_forms::CreateRegistrationRequest,
            crate::routes::registration_forms::UpdateRegistrationRequest,
            crate::routes::registration_forms::UpdateStatusRequest,
            crate::routes::intake_forms::CreateIntakeRequest,
            crate::routes::intake_forms::UpdateIntakeRequest,
            crate::routes::intake_forms::CreateGoalRequest,
            crate::routes::clients::MoveToWaitingListRequest,
            crate::routes::clients::WaitingListPlacement,
            crate::routes::clients::MoveToCareRequest,
            crate::routes::clients::StartDischargeRequest,
            crate::routes::clients::CompleteDischargeRequest,
            crate::routes::clients::UpdatePriorityRequest,
            crate::routes::evaluations::ProgressLogRequest,
            crate::routes::evaluations::CreateEvaluationRequest,
            crate::routes::evaluations::UpdateEvaluationRequest,
            crate::routes::evaluations::EvaluationResponse,
            crate::routes::evaluations::DraftSaved,
            crate::routes::incidents::CreateIncidentRequest,
            crate::routes::incidents::UpdateIncidentRequest,
            crate::routes::roles::CreateRoleRequest,
            crate::routes::roles::UpdateRoleRequest,
        ),
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "auth", description = "Login, refresh-token rotation, logout and the caller's profile"),
        (name = "employees", description = "Employee profiles and their login users"),
        (name = "users", description = "User deletion and role assignment"),
        (name = "referring-orgs", description = "Organizations that refer prospective clients"),
        (name = "locations", description = "Care locations with capacity and occupancy"),
        (name = "registration-forms", description = "First application of a prospective client"),
        (name = "intake-forms", description = "Intake conversations and the goals agreed there"),
        (name = "clients", description = "Client lifecycle: waiting list, care, two-phase discharge"),
        (name = "evaluations", description = "Periodic evaluations, drafts and due listings"),
        (name = "incidents", description = "Incident reports"),
        (name = "attachments", description = "Uploaded documents"),
        (name = "roles", description = "Roles and their permission sets"),
        (name = "dashboard", description = "Operational overview"),
        (name = "audit", description = "Hash-chained audit log"),
    )
)]
pub struct ApiDoc;

/// Build the OpenAPI router.
pub fn router() -> Router<AppState> {
    Router::new().route("/swagger/openapi.json", get(openapi_json))
}

/// GET /swagger/openapi.json
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_generates() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "Care Coordination API");
        assert!(!spec.paths.paths.is_empty());
    }

    #[test]
    fn lifecycle_paths_are_documented() {
        let spec = ApiDoc::openapi();
        for path in [
            "/clients/move-to-waiting-list",
            "/clients/{id}/move-to-care",
            "/clients/{id}/start-discharge",
            "/clients/{id}/complete-discharge",
            "/evaluations/{id}/submit",
            "/clients/{id}/evaluations/draft",
            "/roles/{id}/permissions/{permission_id}",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn every_tag_is_declared() {
        let spec = ApiDoc::openapi();
        let tags: Vec<String> = spec
            .tags
            .unwrap_or_default()
            .into_iter()
            .map(|t| t.name)
            .collect();
        for expected in ["auth", "clients", "evaluations", "roles", "audit"] {
            assert!(tags.iter().any(|t| t == expected), "missing tag {expected}");
        }
    }

    #[test]
    fn bearer_scheme_is_registered() {
        let spec = ApiDoc::openapi();
        let components = spec.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
    }
}
