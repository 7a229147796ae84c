//! # Integration Tests for care-api
//!
//! Drives the full router over the in-memory backends: public health checks,
//! authentication and refresh rotation, the client lifecycle from
//! registration to discharge, evaluation drafts, permission checks and the
//! audit chain.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use care_api::bootstrap::{bootstrap_admin, BootstrapOutcome};
use care_api::config::AppConfig;
use care_api::state::AppState;

const ADMIN_EMAIL: &str = "admin@example.nl";
const ADMIN_PASSWORD: &str = "admin password";

struct TestApp {
    router: axum::Router,
    admin_employee_id: String,
}

/// Helper: in-memory app with a bootstrapped administrator.
async fn test_app() -> TestApp {
    let mut config = AppConfig::development();
    config.bootstrap_admin_email = Some(ADMIN_EMAIL.into());
    config.bootstrap_admin_password = Some(ADMIN_PASSWORD.into());
    let state = AppState::with_config(config).unwrap();
    let BootstrapOutcome::Created { employee_id, .. } = bootstrap_admin(&state).await.unwrap()
    else {
        panic!("admin not created");
    };
    TestApp {
        router: care_api::app(state),
        admin_employee_id: employee_id,
    }
}

/// Helper: read response body as string.
async fn body_string(response: axum::http::Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: axum::http::Response<Body>) -> Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

impl TestApp {
    async fn send(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> axum::http::Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Send and decode, asserting the status.
    async fn call(
        &self,
        method: &str,
        uri: &str,
        token: &str,
        body: Option<Value>,
        expected: StatusCode,
    ) -> Value {
        let response = self.send(method, uri, Some(token), body).await;
        let status = response.status();
        let json = body_json(response).await;
        assert_eq!(status, expected, "{method} {uri}: {json}");
        json
    }

    async fn login(&self, email: &str, password: &str) -> Value {
        let response = self
            .send(
                "POST",
                "/auth/login",
                None,
                Some(json!({"email": email, "password": password})),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        body_json(response).await["data"].clone()
    }

    async fn admin_token(&self) -> String {
        self.login(ADMIN_EMAIL, ADMIN_PASSWORD).await["accessToken"]
            .as_str()
            .unwrap()
            .to_string()
    }

    /// Location, registration and intake for one prospective client.
    async fn intake(&self, token: &str, bsn: &str, care_type: &str) -> String {
        let location = self
            .call(
                "POST",
                "/locations",
                token,
                Some(json!({
                    "name": "De Linde",
                    "postalCode": "1234AB",
                    "address": "Lindelaan 1",
                    "capacity": 10
                })),
                StatusCode::CREATED,
            )
            .await;
        let registration = self
            .call(
                "POST",
                "/registration-forms",
                token,
                Some(json!({
                    "firstName": "Noor",
                    "lastName": "Bakker",
                    "bsn": bsn,
                    "dateOfBirth": "2009-03-14",
                    "gender": "female",
                    "careType": care_type,
                    "registrationDate": "2024-01-08"
                })),
                StatusCode::CREATED,
            )
            .await;
        let intake = self
            .call(
                "POST",
                "/intake-forms",
                token,
                Some(json!({
                    "registrationFormId": registration["data"]["id"],
                    "intakeDate": "2024-01-15",
                    "intakeTime": "09:30",
                    "locationId": location["data"]["id"],
                    "coordinatorId": self.admin_employee_id
                })),
                StatusCode::CREATED,
            )
            .await;
        intake["data"]["id"].as_str().unwrap().to_string()
    }

    async fn waiting_client(&self, token: &str, bsn: &str, care_type: &str) -> (String, String) {
        let intake_id = self.intake(token, bsn, care_type).await;
        let goal = self
            .call(
                "POST",
                &format!("/intake-forms/{intake_id}/goals"),
                token,
                Some(json!({"title": "Attend school"})),
                StatusCode::CREATED,
            )
            .await;
        let client = self
            .call(
                "POST",
                "/clients/move-to-waiting-list",
                token,
                Some(json!({"intakeFormId": intake_id, "waitingListPriority": "high"})),
                StatusCode::OK,
            )
            .await;
        let client_id = client["data"]["clientId"].as_str().unwrap().to_string();
        let stored = self
            .call("GET", &format!("/clients/{client_id}"), token, None, StatusCode::OK)
            .await;
        assert_eq!(stored["data"]["status"], "waiting_list");
        assert_eq!(stored["data"]["waitingListPriority"], "high");
        (client_id, goal["data"]["id"].as_str().unwrap().to_string())
    }
}

// -- Public Routes ------------------------------------------------------------

#[tokio::test]
async fn test_liveness_check() {
    let app = test_app().await;
    let response = app.send("GET", "/health", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ok");
}

#[tokio::test]
async fn test_readiness_check() {
    let app = test_app().await;
    let response = app.send("GET", "/health/readiness", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "ready");
}

#[tokio::test]
async fn test_metrics_count_requests() {
    let app = test_app().await;
    app.send("GET", "/health", None, None).await;
    app.send("GET", "/clients", None, None).await;
    let response = app.send("GET", "/metrics", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    let body = body_string(response).await;
    assert_eq!(
        sample(&body, "care_api_http_requests_total", &[r#"path="/health""#, r#"status="200""#]),
        Some(1.0),
        "{body}"
    );
    assert_eq!(
        sample(&body, "care_api_http_errors_total", &[r#"path="/clients""#, r#"status="401""#]),
        Some(1.0),
        "{body}"
    );
    assert!(body.contains("care_api_http_request_duration_seconds_bucket"));
}

#[tokio::test]
async fn test_metrics_label_route_templates_not_ids() {
    let app = test_app().await;
    let token = app.admin_token().await;
    let missing = care_core::new_id();
    let response = app
        .send("GET", &format!("/clients/{missing}"), Some(&token), None)
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = body_string(app.send("GET", "/metrics", None, None).await).await;
    assert_eq!(
        sample(&body, "care_api_http_errors_total", &[r#"path="/clients/:id""#, r#"status="404""#]),
        Some(1.0),
        "{body}"
    );
    assert!(!body.contains(&missing), "{body}");
}

/// Value of the first sample of `name` whose label set holds every needle.
fn sample(body: &str, name: &str, needles: &[&str]) -> Option<f64> {
    body.lines()
        .filter(|line| line.starts_with(&format!("{name}{{")))
        .find(|line| needles.iter().all(|n| line.contains(n)))
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|value| value.parse().ok())
}

#[tokio::test]
async fn test_openapi_is_public() {
    let app = test_app().await;
    let response = app.send("GET", "/swagger/openapi.json", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let spec = body_json(response).await;
    assert!(spec["paths"]["/clients/{id}/move-to-care"].is_object());
}

#[tokio::test]
async fn test_request_id_is_echoed_or_minted() {
    let app = test_app().await;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "trace-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "trace-42");

    let response = app.send("GET", "/health", None, None).await;
    let minted = response.headers()["x-request-id"].to_str().unwrap();
    assert_eq!(minted.len(), 36);
}

// -- Authentication -----------------------------------------------------------

#[tokio::test]
async fn test_missing_malformed_and_tampered_tokens_are_rejected() {
    let app = test_app().await;
    let token = app.admin_token().await;
    let (signed, signature) = token.rsplit_once('.').unwrap();
    let flipped = if signature.starts_with('A') { 'B' } else { 'A' };
    let tampered = format!("{signed}.{flipped}{}", &signature[1..]);

    for header in [
        None,
        Some("Bearer ".to_string()),
        Some("Basic abc".to_string()),
        Some("Bearer not-a-jwt".to_string()),
        Some(format!("Bearer {tampered}")),
    ] {
        let mut builder = Request::builder().uri("/clients");
        if let Some(header) = &header {
            builder = builder.header("authorization", header);
        }
        let response = app
            .router
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{header:?}");
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }
}

#[tokio::test]
async fn test_wrong_password_is_unauthorized() {
    let app = test_app().await;
    let response = app
        .send(
            "POST",
            "/auth/login",
            None,
            Some(json!({"email": ADMIN_EMAIL, "password": "nope"})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key("x-ratelimit-remaining"));
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "INVALID_CREDENTIALS");
}

#[tokio::test]
async fn test_me_returns_profile_with_admin_role() {
    let app = test_app().await;
    let token = app.admin_token().await;
    let body = app.call("GET", "/auth/me", &token, None, StatusCode::OK).await;
    assert_eq!(body["data"]["user"]["email"], ADMIN_EMAIL);
    assert_eq!(body["data"]["role"]["role"]["name"], "admin");
    assert!(body["data"]["user"].get("passwordHash").is_none());
}

#[tokio::test]
async fn test_refresh_rotates_and_reuse_revokes_family() {
    let app = test_app().await;
    let login = app.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let first = login["refreshToken"].as_str().unwrap().to_string();

    let response = app
        .send("POST", "/auth/refresh", None, Some(json!({"refreshToken": first})))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let second = body_json(response).await["data"]["refreshToken"]
        .as_str()
        .unwrap()
        .to_string();
    assert_ne!(first, second);

    // Replaying the rotated token revokes the whole family.
    let response = app
        .send("POST", "/auth/refresh", None, Some(json!({"refreshToken": first})))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(response).await["error"]["code"],
        "REFRESH_REUSE_DETECTED"
    );

    let response = app
        .send("POST", "/auth/refresh", None, Some(json!({"refreshToken": second})))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_revokes_refresh_family() {
    let app = test_app().await;
    let login = app.login(ADMIN_EMAIL, ADMIN_PASSWORD).await;
    let refresh = login["refreshToken"].as_str().unwrap().to_string();

    let response = app
        .send("POST", "/auth/logout", None, Some(json!({"refreshToken": refresh})))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["revoked"], 1);

    let response = app
        .send("POST", "/auth/refresh", None, Some(json!({"refreshToken": refresh})))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// -- RBAC ---------------------------------------------------------------------

#[tokio::test]
async fn test_user_without_role_is_forbidden() {
    let app = test_app().await;
    let admin = app.admin_token().await;
    app.call(
        "POST",
        "/employees",
        &admin,
        Some(json!({
            "email": "jan@example.nl",
            "password": "jan password",
            "firstName": "Jan",
            "lastName": "Jansen",
            "bsn": "123456782",
            "dateOfBirth": "1990-05-01",
            "gender": "male"
        })),
        StatusCode::CREATED,
    )
    .await;

    let jan = app.login("jan@example.nl", "jan password").await["accessToken"]
        .as_str()
        .unwrap()
        .to_string();
    let body = app.call("GET", "/clients", &jan, None, StatusCode::FORBIDDEN).await;
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    // /auth/me needs no permission.
    app.call("GET", "/auth/me", &jan, None, StatusCode::OK).await;
}

#[tokio::test]
async fn test_granted_role_opens_access() {
    let app = test_app().await;
    let admin = app.admin_token().await;
    let employee = app
        .call(
            "POST",
            "/employees",
            &admin,
            Some(json!({
                "email": "eva@example.nl",
                "password": "eva password",
                "firstName": "Eva",
                "lastName": "Visser",
                "bsn": "111222333",
                "dateOfBirth": "1985-11-20",
                "gender": "female"
            })),
            StatusCode::CREATED,
        )
        .await;
    let user_id = employee["data"]["userId"].as_str().unwrap().to_string();

    let permissions = app.call("GET", "/permissions", &admin, None, StatusCode::OK).await;
    let client_read = permissions["data"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["resource"] == "client" && p["action"] == "read")
        .unwrap()["id"]
        .clone();
    let role = app
        .call(
            "POST",
            "/roles",
            &admin,
            Some(json!({"name": "reader", "permissionIds": [client_read]})),
            StatusCode::CREATED,
        )
        .await;
    app.call(
        "PUT",
        &format!("/users/{user_id}/role"),
        &admin,
        Some(json!({"roleId": role["data"]["role"]["id"]})),
        StatusCode::OK,
    )
    .await;

    let eva = app.login("eva@example.nl", "eva password").await["accessToken"]
        .as_str()
        .unwrap()
        .to_string();
    app.call("GET", "/clients", &eva, None, StatusCode::OK).await;
    app.call("GET", "/locations", &eva, None, StatusCode::FORBIDDEN).await;
}

// -- Client Lifecycle ---------------------------------------------------------

#[tokio::test]
async fn test_client_lifecycle_through_discharge() {
    let app = test_app().await;
    let token = app.admin_token().await;
    let (client_id, _) = app.waiting_client(&token, "987654321", "protected_living").await;

    // Discharge cannot start before care.
    let body = app
        .call(
            "POST",
            &format!("/clients/{client_id}/start-discharge"),
            &token,
            Some(json!({"dischargeDate": "2024-06-01", "dischargeReason": "moved"})),
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_eq!(body["error"]["code"], "CLIENT_NOT_IN_CARE");

    let body = app
        .call(
            "POST",
            &format!("/clients/{client_id}/move-to-care"),
            &token,
            Some(json!({"careStartDate": "2024-02-01"})),
            StatusCode::OK,
        )
        .await;
    assert_eq!(body["data"]["status"], "in_care");
    assert!(body["data"]["nextEvaluationDate"].is_null());

    let body = app
        .call(
            "POST",
            &format!("/clients/{client_id}/complete-discharge"),
            &token,
            Some(json!({"closingReport": "done", "evaluationReport": "good"})),
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_eq!(body["error"]["code"], "DISCHARGE_NOT_STARTED");

    let body = app
        .call(
            "POST",
            &format!("/clients/{client_id}/start-discharge"),
            &token,
            Some(json!({"dischargeDate": "2024-06-01", "dischargeReason": "treatment_completed"})),
            StatusCode::OK,
        )
        .await;
    assert_eq!(body["data"]["status"], "in_care");
    assert_eq!(body["data"]["dischargeStatus"], "in_progress");

    let body = app
        .call(
            "POST",
            &format!("/clients/{client_id}/start-discharge"),
            &token,
            Some(json!({"dischargeDate": "2024-06-01", "reasonForDischarge": "treatment_completed"})),
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_eq!(body["error"]["code"], "DISCHARGE_ALREADY_STARTED");

    let body = app
        .call(
            "POST",
            &format!("/clients/{client_id}/complete-discharge"),
            &token,
            Some(json!({"closingReport": "done", "evaluationReport": "good"})),
            StatusCode::OK,
        )
        .await;
    assert_eq!(body["data"]["status"], "discharged");
    assert_eq!(body["data"]["dischargeStatus"], "completed");
}

#[tokio::test]
async fn test_intake_promotes_only_once() {
    let app = test_app().await;
    let token = app.admin_token().await;
    let intake_id = app.intake(&token, "123123123", "protected_living").await;
    let request = json!({"intakeFormId": intake_id, "waitingListPriority": "normal"});
    app.call(
        "POST",
        "/clients/move-to-waiting-list",
        &token,
        Some(request.clone()),
        StatusCode::OK,
    )
    .await;
    let body = app
        .call(
            "POST",
            "/clients/move-to-waiting-list",
            &token,
            Some(request),
            StatusCode::CONFLICT,
        )
        .await;
    assert_eq!(body["error"]["code"], "INTAKE_ALREADY_PROMOTED");
}

#[tokio::test]
async fn test_ambulatory_care_requires_weekly_hours() {
    let app = test_app().await;
    let token = app.admin_token().await;
    let (client_id, _) = app.waiting_client(&token, "555666777", "ambulatory_care").await;
    let uri = format!("/clients/{client_id}/move-to-care");

    let body = app
        .call(
            "POST",
            &uri,
            &token,
            Some(json!({"careStartDate": "2024-02-01"})),
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_eq!(body["error"]["code"], "AMBULATORY_HOURS_REQUIRED");

    let body = app
        .call(
            "POST",
            &uri,
            &token,
            Some(json!({"careStartDate": "2024-02-01", "ambulatoryWeeklyHours": 6})),
            StatusCode::OK,
        )
        .await;
    assert_eq!(body["data"]["ambulatoryWeeklyHours"], 6);
}

#[tokio::test]
async fn test_malformed_path_id_is_bad_request() {
    let app = test_app().await;
    let token = app.admin_token().await;
    let body = app
        .call("GET", "/clients/short", &token, None, StatusCode::BAD_REQUEST)
        .await;
    assert_eq!(body["error"]["code"], "INVALID_REQUEST");
}

// -- Evaluations --------------------------------------------------------------

#[tokio::test]
async fn test_draft_save_then_submit_reschedules() {
    let app = test_app().await;
    let token = app.admin_token().await;
    let (client_id, goal_id) = app.waiting_client(&token, "444555666", "protected_living").await;
    app.call(
        "POST",
        &format!("/clients/{client_id}/move-to-care"),
        &token,
        Some(json!({"careStartDate": "2024-02-01"})),
        StatusCode::OK,
    )
    .await;

    // An empty draft may be saved but not submitted.
    let first = app
        .call(
            "POST",
            "/evaluations/drafts",
            &token,
            Some(json!({"clientId": client_id, "evaluationDate": "2024-03-07"})),
            StatusCode::OK,
        )
        .await;
    let draft_id = first["data"]["id"].as_str().unwrap().to_string();
    let body = app
        .call(
            "POST",
            &format!("/evaluations/{draft_id}/submit"),
            &token,
            None,
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_eq!(body["error"]["code"], "PROGRESS_LOGS_REQUIRED");

    // Saving again updates the same draft.
    let second = app
        .call(
            "POST",
            "/evaluations/drafts",
            &token,
            Some(json!({
                "clientId": client_id,
                "evaluationDate": "2024-03-07",
                "progressLogs": [{"goalId": goal_id, "status": "on_track"}]
            })),
            StatusCode::OK,
        )
        .await;
    assert_eq!(second["data"]["id"], draft_id.as_str());

    let draft = app
        .call(
            "GET",
            &format!("/clients/{client_id}/evaluations/draft"),
            &token,
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(draft["data"]["progressLogs"].as_array().unwrap().len(), 1);

    let submitted = app
        .call(
            "POST",
            &format!("/evaluations/{draft_id}/submit"),
            &token,
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(submitted["data"]["evaluation"]["status"], "submitted");
    assert_eq!(submitted["data"]["nextEvaluationDate"], "2024-04-11");

    let client = app
        .call("GET", &format!("/clients/{client_id}"), &token, None, StatusCode::OK)
        .await;
    assert_eq!(client["data"]["nextEvaluationDate"], "2024-04-11");

    let none = app
        .call(
            "GET",
            &format!("/clients/{client_id}/evaluations/draft"),
            &token,
            None,
            StatusCode::OK,
        )
        .await;
    assert!(none["data"].is_null());
}

#[tokio::test]
async fn test_evaluation_rejects_foreign_goal() {
    let app = test_app().await;
    let token = app.admin_token().await;
    let (client_id, _) = app.waiting_client(&token, "222333444", "protected_living").await;
    let (_, other_goal) = app.waiting_client(&token, "333444555", "protected_living").await;

    let body = app
        .call(
            "POST",
            "/evaluations",
            &token,
            Some(json!({
                "clientId": client_id,
                "evaluationDate": "2024-03-07",
                "progressLogs": [{"goalId": other_goal, "status": "delayed"}]
            })),
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_eq!(body["error"]["code"], "GOAL_NOT_FOUND");
}

// -- Audit --------------------------------------------------------------------

#[tokio::test]
async fn test_requests_are_audited_and_chain_verifies() {
    let app = test_app().await;
    let token = app.admin_token().await;
    app.call("GET", "/locations", &token, None, StatusCode::OK).await;
    app.call("GET", "/clients", &token, None, StatusCode::OK).await;

    let verify = app.call("GET", "/audit/verify", &token, None, StatusCode::OK).await;
    assert_eq!(verify["data"]["valid"], true);

    let page = app.call("GET", "/audit?page_size=100", &token, None, StatusCode::OK).await;
    let types: Vec<&str> = page["data"]["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["resourceType"].as_str().unwrap())
        .collect();
    assert!(types.contains(&"session"));
    assert!(types.contains(&"location"));
    assert!(types.contains(&"client"));
    assert!(!types.iter().any(|t| *t == "audit"));
}
