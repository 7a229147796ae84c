//! # Permission Guard
//!
//! `RequirePermission(resource, action)` as a route layer:
//!
//! ```ignore
//! .route("/clients", guard(get(list_clients), "client", "read"))
//! ```
//!
//! Runs after the auth middleware, so a missing [`RequestContext`] means the
//! route was mounted outside the authenticated router; that is answered with
//! 401 like any other unauthenticated call. The datastore handle is read
//! from the request extensions.

use axum::extract::Request;
use axum::middleware::{from_fn, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::MethodRouter;

use crate::auth::RequestContext;
use crate::db::Store;
use crate::error::AppError;

/// Wrap `route` so it only runs when the caller holds `resource.action`.
pub fn guard<S>(route: MethodRouter<S>, resource: &'static str, action: &'static str) -> MethodRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    route.route_layer(from_fn(move |request: Request, next: Next| {
        require_permission(resource, action, request, next)
    }))
}

async fn require_permission(
    resource: &'static str,
    action: &'static str,
    request: Request,
    next: Next,
) -> Response {
    let Some(ctx) = request.extensions().get::<RequestContext>().cloned() else {
        return AppError::Unauthorized("authentication required".into()).into_response();
    };
    let Some(store) = request.extensions().get::<Store>().cloned() else {
        return AppError::Internal("datastore not bound to request".into()).into_response();
    };

    match store.user_has_permission(&ctx.user_id, resource, action).await {
        Ok(true) => next.run(request).await,
        Ok(false) => {
            tracing::info!(
                user_id = %ctx.user_id,
                resource,
                action,
                "permission denied"
            );
            AppError::Forbidden(format!("missing permission {resource}.{action}")).into_response()
        }
        Err(e) => AppError::from(e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Extension, Router};
    use care_core::records::{Role, User};
    use tower::ServiceExt;

    use crate::db::memory::MemoryStore;

    fn ctx(user_id: &str) -> RequestContext {
        RequestContext {
            request_id: "req".into(),
            user_id: user_id.into(),
            employee_id: None,
            ip: "127.0.0.1".into(),
            user_agent: None,
        }
    }

    async fn store_with_reader() -> Store {
        let store: Store = Arc::new(MemoryStore::new());
        let now = care_core::now_micros();
        store
            .create_employee_with_user(
                User {
                    id: "reader".into(),
                    email: "reader@example.nl".into(),
                    password_hash: String::new(),
                    created_at: now,
                    updated_at: now,
                },
                care_core::records::Employee {
                    id: "emp".into(),
                    user_id: "reader".into(),
                    first_name: "R".into(),
                    last_name: "D".into(),
                    bsn: "111222333".into(),
                    date_of_birth: chrono::NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
                    phone: None,
                    gender: care_core::Gender::Other,
                    role_label: None,
                    deleted_at: None,
                    created_at: now,
                    updated_at: now,
                },
            )
            .await
            .unwrap();
        let role = Role {
            id: "role".into(),
            name: "reader".into(),
            description: None,
            created_at: now,
            updated_at: now,
        };
        store
            .create_role(role, vec![crate::db::permission_id("client", "read")])
            .await
            .unwrap();
        store.assign_role("reader", "role").await.unwrap();
        store
    }

    fn app(store: Store, user: Option<&str>) -> Router {
        let mut router = Router::new()
            .route("/clients", guard(get(|| async { "ok" }), "client", "read"))
            .route("/roles", guard(get(|| async { "ok" }), "role", "read"));
        if let Some(user) = user {
            router = router.layer(Extension(ctx(user)));
        }
        router.layer(Extension(store))
    }

    async fn status(app: Router, uri: &str) -> StatusCode {
        app.oneshot(
            axum::http::Request::builder()
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
    }

    #[tokio::test]
    async fn granted_permission_passes() {
        let store = store_with_reader().await;
        assert_eq!(status(app(store, Some("reader")), "/clients").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_permission_is_forbidden() {
        let store = store_with_reader().await;
        assert_eq!(status(app(store.clone(), Some("reader")), "/roles").await, StatusCode::FORBIDDEN);
        assert_eq!(status(app(store, Some("stranger")), "/clients").await, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unauthenticated_is_unauthorized() {
        let store = store_with_reader().await;
        assert_eq!(status(app(store, None), "/clients").await, StatusCode::UNAUTHORIZED);
    }
}
