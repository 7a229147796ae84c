//! # Attachments API
//!
//! - **POST `/attachments`** — Upload the raw request body; `name` query
//!   parameter (or `X-File-Name` header) names the file
//! - **GET `/attachments/:id`** — Attachment metadata
//! - **GET `/attachments/:id/content`** — The stored bytes
//!
//! Bytes go to the object store under `attachments/<id>`; the datastore
//! keeps the metadata row that forms and discharges reference.

use axum::body::Bytes;
use axum::extract::rejection::{PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use utoipa::IntoParams;

use care_core::records::Attachment;
use care_core::{new_id, now_micros};

use crate::auth::RequestContext;
use crate::error::AppError;
use crate::extractors::{created, extract_id, extract_query, ok, ApiResult};
use crate::middleware::rbac::guard;
use crate::state::AppState;
use crate::storage::StorageError;

pub const FILE_NAME_HEADER: &str = "x-file-name";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UploadQuery {
    /// File name; falls back to the `X-File-Name` header.
    pub name: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/attachments", guard(post(upload), "attachment", "create"))
        .route("/attachments/:id", guard(get(get_attachment), "attachment", "read"))
        .route(
            "/attachments/:id/content",
            guard(get(download), "attachment", "read"),
        )
}

fn object_key(id: &str) -> String {
    format!("attachments/{id}")
}

fn storage_error(err: StorageError) -> AppError {
    match err {
        StorageError::NotFound { .. } => AppError::NotFound("attachment content".into()),
        other => AppError::Internal(other.to_string()),
    }
}

fn file_name(query: Option<String>, headers: &HeaderMap) -> Result<String, AppError> {
    query
        .or_else(|| {
            headers
                .get(FILE_NAME_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AppError::Validation("name must not be empty".into()))
}

/// POST /attachments — Store the request body.
#[utoipa::path(
    post,
    path = "/attachments",
    params(UploadQuery),
    request_body(content = Vec<u8>, content_type = "application/octet-stream"),
    responses(
        (status = 201, description = "Attachment stored", body = Attachment),
        (status = 400, description = "Empty body or missing name", body = crate::error::ErrorBody),
    ),
    tag = "attachments"
)]
async fn upload(
    State(state): State<AppState>,
    ctx: RequestContext,
    query: Result<Query<UploadQuery>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Attachment> {
    let query = extract_query(query)?;
    let name = file_name(query.name, &headers)?;
    if body.is_empty() {
        return Err(AppError::Validation("attachment body must not be empty".into()));
    }
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();

    let id = new_id();
    let key = object_key(&id);
    let size = i64::try_from(body.len())
        .map_err(|_| AppError::Validation("attachment too large".into()))?;
    state
        .objects
        .put(&key, body.to_vec(), Some(&content_type))
        .await
        .map_err(storage_error)?;

    let attachment = Attachment {
        id,
        name,
        content_type,
        size,
        object_key: key,
        uploaded_by: Some(ctx.user_id),
        created_at: now_micros(),
    };
    let attachment = state.store.insert_attachment(attachment).await?;
    tracing::info!(attachment_id = %attachment.id, size, "attachment stored");
    created(attachment)
}

/// GET /attachments/:id
#[utoipa::path(
    get,
    path = "/attachments/{id}",
    params(("id" = String, Path, description = "Attachment ID")),
    responses(
        (status = 200, description = "Attachment metadata", body = Attachment),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "attachments"
)]
async fn get_attachment(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> ApiResult<Attachment> {
    let id = extract_id(id)?;
    let attachment = state
        .store
        .attachment(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("attachment".into()))?;
    ok(attachment)
}

/// GET /attachments/:id/content
#[utoipa::path(
    get,
    path = "/attachments/{id}/content",
    params(("id" = String, Path, description = "Attachment ID")),
    responses(
        (status = 200, description = "Raw attachment bytes", content_type = "application/octet-stream"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "attachments"
)]
async fn download(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Response, AppError> {
    let id = extract_id(id)?;
    let attachment = state
        .store
        .attachment(&id)
        .await?
        .ok_or_else(|| AppError::NotFound("attachment".into()))?;
    let object = state
        .objects
        .get(&attachment.object_key)
        .await
        .map_err(storage_error)?;
    let content_type = object
        .content_type
        .unwrap_or(attachment.content_type);
    let header = HeaderValue::from_str(&content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE));
    Ok(([(CONTENT_TYPE, header)], object.body).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_comes_from_query_then_header() {
        let mut headers = HeaderMap::new();
        headers.insert(FILE_NAME_HEADER, HeaderValue::from_static("scan.pdf"));
        assert_eq!(file_name(Some("report.pdf".into()), &headers).unwrap(), "report.pdf");
        assert_eq!(file_name(None, &headers).unwrap(), "scan.pdf");
        assert!(file_name(Some("  ".into()), &HeaderMap::new()).is_err());
        assert!(file_name(None, &HeaderMap::new()).is_err());
    }

    #[test]
    fn missing_objects_are_not_found() {
        let err = storage_error(StorageError::NotFound { key: "k".into() });
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
