//! # Login Rate Limiting
//!
//! Wraps `POST /auth/login` only. Two sliding windows are consulted in
//! order:
//!
//! 1. **IP** — keyed by [`client_ip`].
//! 2. **Email** — keyed by the lower-cased `email` field of the JSON body.
//!    The body is buffered so the handler still receives it.
//!
//! Every checked response carries `X-RateLimit-Limit`,
//! `X-RateLimit-Remaining` and `X-RateLimit-Reset` from the tighter of the
//! two decisions; a rejection adds `Retry-After`. A 2xx login clears the
//! email window. The [`RateLimiter`] is read from the request extensions.

use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use care_auth::{Decision, RateLimiter};
use serde::Deserialize;

use crate::auth::client_ip;
use crate::error::AppError;

/// Largest login body that will be buffered.
pub const MAX_LOGIN_BODY: usize = 16 * 1024;

#[derive(Deserialize)]
struct LoginEmail {
    email: Option<String>,
}

pub async fn login_rate_limit_middleware(request: Request, next: Next) -> Response {
    let Some(limiter) = request.extensions().get::<RateLimiter>().cloned() else {
        return next.run(request).await;
    };

    let ip = client_ip(request.headers(), request.extensions());
    let by_ip = limiter.check_ip(&ip).await;
    if !by_ip.allowed {
        tracing::warn!("login rejected: IP rate limit exceeded");
        return rejected(&by_ip);
    }

    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_LOGIN_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return with_headers(
                AppError::BadRequest("login body too large or unreadable".into()).into_response(),
                &by_ip,
            )
        }
    };
    let email = serde_json::from_slice::<LoginEmail>(&bytes)
        .ok()
        .and_then(|body| body.email)
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty());

    let mut tightest = by_ip;
    if let Some(email) = &email {
        let by_email = limiter.check_email(email).await;
        if !by_email.allowed {
            tracing::warn!("login rejected: email rate limit exceeded");
            return rejected(&by_email);
        }
        if by_email.remaining < tightest.remaining {
            tightest = by_email;
        }
    }

    let response = next
        .run(Request::from_parts(parts, Body::from(bytes)))
        .await;

    if response.status().is_success() {
        if let Some(email) = &email {
            limiter.reset_email(email).await;
        }
    }
    with_headers(response, &tightest)
}

fn rejected(decision: &Decision) -> Response {
    let response = AppError::RateLimited {
        retry_after: decision.retry_after.max(1),
    }
    .into_response();
    with_headers(response, decision)
}

fn with_headers(mut response: Response, decision: &Decision) -> Response {
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_at));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::http::StatusCode;
    use axum::middleware::from_fn;
    use axum::routing::post;
    use axum::{Extension, Json, Router};
    use care_auth::Window;
    use tower::ServiceExt;

    /// Succeeds only for the password "right".
    async fn fake_login(Json(body): Json<serde_json::Value>) -> StatusCode {
        if body["password"] == "right" {
            StatusCode::OK
        } else {
            StatusCode::UNAUTHORIZED
        }
    }

    fn app(limiter: RateLimiter) -> Router {
        Router::new()
            .route(
                "/auth/login",
                post(fake_login).route_layer(from_fn(login_rate_limit_middleware)),
            )
            .layer(Extension(limiter))
    }

    fn login(ip: &str, email: &str, password: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri("/auth/login")
            .header("content-type", "application/json")
            .header("x-forwarded-for", ip)
            .body(Body::from(
                serde_json::json!({"email": email, "password": password}).to_string(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn email_window_blocks_then_reports_retry_after() {
        let limiter = RateLimiter::in_memory(
            Window::new(100, Duration::from_secs(60)),
            Window::new(2, Duration::from_secs(60)),
        );
        for _ in 0..2 {
            let response = app(limiter.clone())
                .oneshot(login("10.0.0.1", "a@b.nl", "wrong"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert!(response.headers().contains_key("x-ratelimit-remaining"));
        }
        let response = app(limiter)
            .oneshot(login("10.0.0.1", "A@B.nl", "right"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("retry-after"));
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    }

    #[tokio::test]
    async fn successful_login_resets_the_email_window() {
        let limiter = RateLimiter::in_memory(
            Window::new(100, Duration::from_secs(60)),
            Window::new(2, Duration::from_secs(60)),
        );
        let response = app(limiter.clone())
            .oneshot(login("10.0.0.1", "a@b.nl", "wrong"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = app(limiter.clone())
            .oneshot(login("10.0.0.1", "a@b.nl", "right"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        for _ in 0..2 {
            let response = app(limiter.clone())
                .oneshot(login("10.0.0.1", "a@b.nl", "wrong"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn ip_window_applies_across_emails() {
        let limiter = RateLimiter::in_memory(
            Window::new(1, Duration::from_secs(60)),
            Window::new(100, Duration::from_secs(60)),
        );
        let first = app(limiter.clone())
            .oneshot(login("198.51.100.1", "one@b.nl", "wrong"))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::UNAUTHORIZED);
        let second = app(limiter.clone())
            .oneshot(login("198.51.100.1", "two@b.nl", "wrong"))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let other_ip = app(limiter)
            .oneshot(login("198.51.100.2", "two@b.nl", "wrong"))
            .await
            .unwrap();
        assert_eq!(other_ip.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn disabled_limiter_always_allows() {
        let limiter = RateLimiter::disabled(
            Window::new(1, Duration::from_secs(60)),
            Window::new(1, Duration::from_secs(60)),
        );
        for _ in 0..3 {
            let response = app(limiter.clone())
                .oneshot(login("10.0.0.1", "a@b.nl", "wrong"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }
}
