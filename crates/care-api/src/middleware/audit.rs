//! # Request Audit
//!
//! After an authenticated request completes, one [`NewAuditEntry`] is handed
//! to the [`AuditLogger`](crate::audit::AuditLogger). The response is never
//! delayed or altered.
//!
//! | Field | Source |
//! |-------|--------|
//! | action | GET→read, POST→create, PUT/PATCH→update, DELETE→delete |
//! | resource type | first path segment, via [`RESOURCE_PREFIXES`] |
//! | resource id | second path segment, only when it is a well-formed id |
//! | status | success for 2xx/3xx, otherwise failure with a reason |
//!
//! Paths under [`DENYLIST`] are never audited.

use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use care_core::{AuditAction, AuditStatus, NewAuditEntry};

use crate::auth::RequestContext;
use crate::state::AppState;

/// Path prefixes that are never audited.
pub const DENYLIST: &[&str] = &["/swagger", "/health", "/metrics", "/auth/", "/audit"];

/// URL prefix → audited resource type.
pub const RESOURCE_PREFIXES: &[(&str, &str)] = &[
    ("employees", "employee"),
    ("users", "user"),
    ("referring-orgs", "referring_org"),
    ("locations", "location"),
    ("registration-forms", "registration_form"),
    ("intake-forms", "intake_form"),
    ("clients", "client"),
    ("evaluations", "evaluation"),
    ("incidents", "incident"),
    ("attachments", "attachment"),
    ("roles", "role"),
    ("permissions", "permission"),
    ("dashboard", "dashboard"),
];

pub async fn audit_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    if DENYLIST.iter().any(|prefix| path.starts_with(prefix)) {
        return next.run(request).await;
    }
    let Some(ctx) = request.extensions().get::<RequestContext>().cloned() else {
        return next.run(request).await;
    };
    let method = request.method().clone();

    let response = next.run(request).await;

    state
        .audit
        .record(entry_for(&ctx, &method, &path, response.status()));
    response
}

pub fn entry_for(
    ctx: &RequestContext,
    method: &Method,
    path: &str,
    status: StatusCode,
) -> NewAuditEntry {
    let (resource_type, resource_id) = resource_of(path);
    let client_id = match resource_type.as_str() {
        "client" => resource_id.clone(),
        _ => None,
    };
    let success = status.is_success() || status.is_redirection();
    NewAuditEntry {
        user_id: Some(ctx.user_id.clone()),
        employee_id: ctx.employee_id.clone(),
        client_id,
        action: action_of(method),
        resource_type,
        resource_id,
        old_value: None,
        new_value: None,
        ip_address: Some(ctx.ip.clone()),
        user_agent: ctx.user_agent.clone(),
        request_id: Some(ctx.request_id.clone()),
        status: if success {
            AuditStatus::Success
        } else {
            AuditStatus::Failure
        },
        failure_reason: (!success).then(|| failure_reason(status).to_string()),
    }
}

fn action_of(method: &Method) -> AuditAction {
    match *method {
        Method::POST => AuditAction::Create,
        Method::PUT | Method::PATCH => AuditAction::Update,
        Method::DELETE => AuditAction::Delete,
        _ => AuditAction::Read,
    }
}

fn resource_of(path: &str) -> (String, Option<String>) {
    let mut segments = path.trim_start_matches('/').split('/');
    let first = segments.next().unwrap_or_default();
    let resource_type = RESOURCE_PREFIXES
        .iter()
        .find(|(prefix, _)| *prefix == first)
        .map(|(_, kind)| (*kind).to_string())
        .unwrap_or_else(|| first.replace('-', "_"));
    let resource_id = segments
        .next()
        .filter(|s| care_core::is_valid_id(s))
        .map(str::to_string);
    (resource_type, resource_id)
}

fn failure_reason(status: StatusCode) -> &'static str {
    match status {
        StatusCode::UNAUTHORIZED => "unauthorized",
        StatusCode::FORBIDDEN => "forbidden",
        StatusCode::NOT_FOUND => "not_found",
        s if s.is_client_error() => "client_error",
        _ => "server_error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RequestContext {
        RequestContext {
            request_id: "req-1".into(),
            user_id: "user-1".into(),
            employee_id: Some("emp-1".into()),
            ip: "203.0.113.5".into(),
            user_agent: Some("tests".into()),
        }
    }

    #[test]
    fn resource_id_only_when_well_formed() {
        let id = care_core::new_id();
        assert_eq!(
            resource_of(&format!("/clients/{id}/move-to-care")),
            ("client".to_string(), Some(id))
        );
        assert_eq!(
            resource_of("/evaluations/critical"),
            ("evaluation".to_string(), None)
        );
        assert_eq!(
            resource_of("/referring-orgs"),
            ("referring_org".to_string(), None)
        );
    }

    #[test]
    fn client_routes_carry_the_client_id() {
        let id = care_core::new_id();
        let entry = entry_for(&ctx(), &Method::POST, &format!("/clients/{id}/start-discharge"), StatusCode::OK);
        assert_eq!(entry.action, AuditAction::Create);
        assert_eq!(entry.client_id.as_deref(), Some(id.as_str()));
        assert_eq!(entry.status, AuditStatus::Success);
        assert_eq!(entry.failure_reason, None);
        assert_eq!(entry.employee_id.as_deref(), Some("emp-1"));
    }

    #[test]
    fn failures_are_classified() {
        let cases = [
            (StatusCode::UNAUTHORIZED, "unauthorized"),
            (StatusCode::FORBIDDEN, "forbidden"),
            (StatusCode::NOT_FOUND, "not_found"),
            (StatusCode::CONFLICT, "client_error"),
            (StatusCode::INTERNAL_SERVER_ERROR, "server_error"),
        ];
        for (status, reason) in cases {
            let entry = entry_for(&ctx(), &Method::DELETE, "/locations", status);
            assert_eq!(entry.status, AuditStatus::Failure);
            assert_eq!(entry.failure_reason.as_deref(), Some(reason));
            assert_eq!(entry.action, AuditAction::Delete);
        }
    }

    #[test]
    fn methods_map_to_actions() {
        assert_eq!(action_of(&Method::GET), AuditAction::Read);
        assert_eq!(action_of(&Method::PATCH), AuditAction::Update);
        assert_eq!(action_of(&Method::PUT), AuditAction::Update);
    }
}
