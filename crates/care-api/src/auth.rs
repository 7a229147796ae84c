//! # Authentication Middleware
//!
//! Verifies the `Authorization: Bearer <access token>` header on every
//! protected route and binds a [`RequestContext`] into the request
//! extensions. Handlers extract it via the `FromRequestParts` impl.
//!
//! An empty, malformed, expired or tampered token is rejected with 401
//! before any handler or permission check runs.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::request::Parts;
use axum::http::{header, Extensions, HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::AppError;
use crate::state::AppState;

/// Header carrying the per-request correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LEN: usize = 128;

// ── Request id ──────────────────────────────────────────────────────

/// Correlation id of the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Adopt a caller-supplied `X-Request-Id` or mint one, and echo it on the
/// response.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= MAX_REQUEST_ID_LEN)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    request.extensions_mut().insert(RequestId(id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

// ── Client address ──────────────────────────────────────────────────

/// The caller's address: first `X-Forwarded-For` entry, else `X-Real-IP`,
/// else the peer address, else `"unknown"`.
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }
    let real = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real {
        return ip.to_string();
    }
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

// ── RequestContext ──────────────────────────────────────────────────

/// Identity and provenance of an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: String,
    pub user_id: String,
    /// Employee profile linked to the user, when one exists.
    pub employee_id: Option<String>,
    pub ip: String,
    pub user_agent: Option<String>,
}

/// Returns 401 if the auth middleware did not run for this route.
#[axum::async_trait]
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for RequestContext {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized("no authenticated user in request context".into()))
    }
}

/// Provenance of an unauthenticated request (login, refresh).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMeta {
    pub request_id: Option<String>,
    pub ip: String,
    pub user_agent: Option<String>,
}

#[axum::async_trait]
impl<S: Send + Sync> axum::extract::FromRequestParts<S> for ClientMeta {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self {
            request_id: parts.extensions.get::<RequestId>().map(|r| r.0.clone()),
            ip: client_ip(&parts.headers, &parts.extensions),
            user_agent: user_agent(&parts.headers),
        })
    }
}

// ── Middleware ──────────────────────────────────────────────────────

fn bearer_token(headers: &HeaderMap) -> Result<&str, &'static str> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or("missing authorization header")?
        .to_str()
        .map_err(|_| "authorization header is not valid ASCII")?;
    let token = value
        .strip_prefix("Bearer ")
        .ok_or("authorization header must use Bearer scheme")?
        .trim();
    if token.is_empty() {
        return Err("empty bearer token");
    }
    Ok(token)
}

/// Verify the access token and bind a [`RequestContext`].
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match bearer_token(request.headers()) {
        Ok(token) => token,
        Err(msg) => {
            tracing::warn!(reason = msg, "authentication failed");
            return AppError::Unauthorized(msg.to_string()).into_response();
        }
    };
    let claims = match state.tokens.verify_access(token) {
        Ok(claims) => claims,
        Err(_) => {
            tracing::warn!("authentication failed: invalid access token");
            return AppError::Unauthorized("invalid or expired token".into()).into_response();
        }
    };

    let context = RequestContext {
        request_id: request
            .extensions()
            .get::<RequestId>()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        user_id: claims.sub,
        employee_id: claims.employee_id,
        ip: client_ip(request.headers(), request.extensions()),
        user_agent: user_agent(request.headers()),
    };
    request.extensions_mut().insert(context);
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::middleware::{from_fn, from_fn_with_state};
    use axum::routing::get;
    use axum::Router;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    /// Minimal router with the auth middleware and a handler that echoes
    /// the bound user id.
    fn test_app(state: AppState) -> Router {
        Router::new()
            .route(
                "/test",
                get(|ctx: RequestContext| async move { ctx.user_id }),
            )
            .layer(from_fn_with_state(state.clone(), auth_middleware))
            .layer(from_fn(request_id_middleware))
            .with_state(state)
    }

    async fn call(app: Router, auth: Option<&str>) -> (StatusCode, serde_json::Value) {
        let mut builder = axum::http::Request::builder().uri("/test");
        if let Some(auth) = auth {
            builder = builder.header("Authorization", auth);
        }
        let response = app
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn valid_access_token_binds_context() {
        let state = AppState::in_memory().unwrap();
        let pair = state
            .tokens
            .issue_pair("user-1", None, "fam", "hash", chrono::Utc::now())
            .unwrap();
        let app = test_app(state);
        let request = axum::http::Request::builder()
            .uri("/test")
            .header("Authorization", format!("Bearer {}", pair.access_token))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"user-1");
    }

    #[tokio::test]
    async fn missing_empty_and_malformed_tokens_are_rejected() {
        let state = AppState::in_memory().unwrap();
        for auth in [None, Some("Bearer "), Some("Bearer not.a.jwt"), Some("Basic dXNlcg==")] {
            let (status, body) = call(test_app(state.clone()), auth).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{auth:?}");
            assert_eq!(body["error"]["code"], "UNAUTHORIZED");
        }
    }

    #[tokio::test]
    async fn tampered_token_is_rejected() {
        let state = AppState::in_memory().unwrap();
        let pair = state
            .tokens
            .issue_pair("user-1", None, "fam", "hash", chrono::Utc::now())
            .unwrap();
        let (signed, signature) = pair.access_token.rsplit_once('.').unwrap();
        let first = if signature.starts_with('A') { 'B' } else { 'A' };
        let tampered = format!("{signed}.{first}{}", &signature[1..]);
        let (status, _) = call(test_app(state), Some(&format!("Bearer {tampered}"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn refresh_token_is_not_an_access_token() {
        let state = AppState::in_memory().unwrap();
        let pair = state
            .tokens
            .issue_pair("user-1", None, "fam", "hash", chrono::Utc::now())
            .unwrap();
        let (status, _) =
            call(test_app(state), Some(&format!("Bearer {}", pair.refresh_token))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn client_ip_prefers_forwarded_headers() {
        let mut headers = HeaderMap::new();
        let mut extensions = Extensions::new();
        assert_eq!(client_ip(&headers, &extensions), "unknown");

        extensions.insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 9], 4000))));
        assert_eq!(client_ip(&headers, &extensions), "10.0.0.9");

        headers.insert("x-real-ip", HeaderValue::from_static("192.0.2.7"));
        assert_eq!(client_ip(&headers, &extensions), "192.0.2.7");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.1, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers, &extensions), "203.0.113.1");
    }
}
