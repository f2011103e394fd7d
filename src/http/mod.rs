//! HTTP transport for the capsule service.
//!
//! Requires the `http` feature. Uses axum for routing.
//!
//! ## Routes
//!
//! - `POST /v1/capsules` - multipart form with `capsule_file`, `title`, `unlock_at`
//!   (RFC 3339). Responds `201 { "id": "<uuid>" }`.
//! - `GET /v1/capsules/:id` - the caller's capsule metadata.
//! - `GET /health` - `{ "ok": true }`.
//!
//! Callers are identified by the `x-user-id` header, which the authenticating
//! gateway in front of this service sets. Requests without a valid UUID there
//! are rejected with 401.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use time_capsule::{http, CapsuleService, FsBlobStore, SqliteStore};
//!
//! let service = Arc::new(CapsuleService::new(
//!     SqliteStore::open("capsules.db")?,
//!     FsBlobStore::open("blobs")?,
//! ));
//! http::serve(service, "0.0.0.0:8081").await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::error;
use uuid::Uuid;

use crate::blob::BlobStore;
use crate::service::{CapsuleService, CreateCapsuleError, CreateCapsuleRequest};
use crate::store::{CapsuleRepository, TransactionalStore};

/// Header carrying the authenticated caller's user id.
pub const OWNER_HEADER: &str = "x-user-id";

/// Default request body limit for uploads.
pub const DEFAULT_BODY_LIMIT: usize = 32 * 1024 * 1024;

/// Build an axum `Router` over the given service.
pub fn router<S, B>(service: Arc<CapsuleService<S, B>>) -> Router
where
    S: TransactionalStore + CapsuleRepository + 'static,
    B: BlobStore + 'static,
{
    router_with_body_limit(service, DEFAULT_BODY_LIMIT)
}

/// Build an axum `Router` accepting request bodies up to `limit` bytes.
pub fn router_with_body_limit<S, B>(service: Arc<CapsuleService<S, B>>, limit: usize) -> Router
where
    S: TransactionalStore + CapsuleRepository + 'static,
    B: BlobStore + 'static,
{
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/capsules", post(create_handler::<S, B>))
        .route("/v1/capsules/:id", get(get_handler::<S, B>))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(service)
}

/// Serve the service over HTTP at the given address (e.g. `"0.0.0.0:8081"`).
pub async fn serve<S, B>(service: Arc<CapsuleService<S, B>>, addr: &str) -> Result<(), std::io::Error>
where
    S: TransactionalStore + CapsuleRepository + 'static,
    B: BlobStore + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router(service)).await
}

/// Serve on an already-bound listener until `shutdown` resolves.
pub async fn serve_with_shutdown<F>(
    listener: TcpListener,
    app: Router,
    shutdown: F,
) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

/// `GET /health`
async fn health_handler() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

/// `POST /v1/capsules`
async fn create_handler<S, B>(
    State(service): State<Arc<CapsuleService<S, B>>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response
where
    S: TransactionalStore + CapsuleRepository + 'static,
    B: BlobStore + 'static,
{
    let Some(owner_id) = owner_from_headers(&headers) else {
        return error_response(StatusCode::UNAUTHORIZED, "Unauthorized");
    };

    let form = match CapsuleForm::read(&mut multipart).await {
        Ok(form) => form,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, &message),
    };
    let request = CreateCapsuleRequest {
        owner_id,
        title: form.title,
        unlock_at: form.unlock_at.unwrap_or_default(),
        content: form.content.unwrap_or_default(),
    };

    match tokio::task::spawn_blocking(move || service.create(request)).await {
        Ok(Ok(id)) => (StatusCode::CREATED, Json(json!({ "id": id }))).into_response(),
        Ok(Err(err)) => create_error_response(&err),
        Err(err) => {
            error!(error = %err, "capsule creation task aborted");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "capsule creation aborted")
        }
    }
}

/// `GET /v1/capsules/:id`
async fn get_handler<S, B>(
    State(service): State<Arc<CapsuleService<S, B>>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Response
where
    S: TransactionalStore + CapsuleRepository + 'static,
    B: BlobStore + 'static,
{
    let Some(owner_id) = owner_from_headers(&headers) else {
        return error_response(StatusCode::UNAUTHORIZED, "Unauthorized");
    };

    match tokio::task::spawn_blocking(move || service.get(id)).await {
        Ok(Ok(Some(capsule))) if capsule.owner_id == owner_id => {
            (StatusCode::OK, Json(capsule)).into_response()
        }
        Ok(Ok(_)) => error_response(StatusCode::NOT_FOUND, "capsule not found"),
        Ok(Err(err)) => {
            error!(capsule_id = %id, error = %err, "capsule read failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to read capsule")
        }
        Err(err) => {
            error!(error = %err, "capsule read task aborted");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to read capsule")
        }
    }
}

#[derive(Default)]
struct CapsuleForm {
    title: Option<String>,
    unlock_at: Option<String>,
    content: Option<Vec<u8>>,
}

impl CapsuleForm {
    async fn read(multipart: &mut Multipart) -> Result<Self, String> {
        let mut form = CapsuleForm::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| format!("invalid multipart body: {}", err.body_text()))?
        {
            let name = field.name().map(str::to_owned);
            match name.as_deref() {
                Some("capsule_file") => {
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|err| format!("error retrieving file: {}", err.body_text()))?;
                    form.content = Some(bytes.to_vec());
                }
                Some("title") => form.title = Some(text(field).await?),
                Some("unlock_at") => form.unlock_at = Some(text(field).await?),
                _ => {}
            }
        }
        Ok(form)
    }
}

async fn text(field: axum::extract::multipart::Field<'_>) -> Result<String, String> {
    field
        .text()
        .await
        .map_err(|err| format!("invalid form field: {}", err.body_text()))
}

fn owner_from_headers(headers: &HeaderMap) -> Option<Uuid> {
    let value = headers.get(OWNER_HEADER)?.to_str().ok()?;
    Uuid::parse_str(value.trim()).ok()
}

fn create_error_response(err: &CreateCapsuleError) -> Response {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match err {
        CreateCapsuleError::InvalidUnlockTime(_) | CreateCapsuleError::MissingFile => {
            error_response(status, &err.to_string())
        }
        CreateCapsuleError::Upload(_) => {
            error!(error = %err, "capsule upload failed");
            error_response(status, "failed to upload file")
        }
        CreateCapsuleError::Write(_) => {
            error!(error = %err, "capsule write failed");
            error_response(status, "failed to save capsule metadata")
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
