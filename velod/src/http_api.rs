//! HTTP surface of the gateway.
//!
//! Routes:
//! - `POST /v1/negotiate` - existence check + signed-URL vending
//! - `GET|PUT /v1/proxy/blob/{key}` - streaming proxy, local driver only
//! - `GET /health` - liveness, unauthenticated
//!
//! Everything except `/health` sits behind the shared bearer token.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::TryStreamExt;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, error};

use velo_common::{
    validate_object_key, NegotiateRequest, NegotiateResponse, ACTION_DOWNLOAD, ACTION_UPLOAD,
};

use crate::storage::{DriverError, StorageDriver};

/// Shared state for all handlers.
pub struct GatewayState {
    /// Selected storage backend.
    pub driver: Arc<dyn StorageDriver>,
    /// Shared bearer token; `None` disables authentication.
    pub auth_token: Option<String>,
    /// Object root for the streaming proxy; set only for the local
    /// driver, which also enables the proxy routes.
    pub proxy_root: Option<PathBuf>,
}

/// Build the gateway router.
pub fn router(state: GatewayState) -> Router {
    let state = Arc::new(state);

    let mut protected = Router::new().route("/v1/negotiate", post(negotiate));
    if state.proxy_root.is_some() {
        protected = protected.route(
            "/v1/proxy/blob/{key}",
            get(proxy_download).put(proxy_upload),
        );
    }
    let protected = protected.layer(middleware::from_fn_with_state(
        Arc::clone(&state),
        require_bearer,
    ));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "up" }))
}

/// Bearer-token check: missing header is 401, anything that does not
/// match the configured token is 403.
async fn require_bearer(
    State(state): State<Arc<GatewayState>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.auth_token.as_deref() else {
        return next.run(req).await;
    };

    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match header_value {
        None => error_response(StatusCode::UNAUTHORIZED, "missing authorization header"),
        Some(value) => match value.strip_prefix("Bearer ") {
            Some(token) if token == expected => next.run(req).await,
            _ => error_response(StatusCode::FORBIDDEN, "invalid bearer token"),
        },
    }
}

async fn negotiate(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<NegotiateRequest>,
) -> Response {
    if let Err(err) = validate_object_key(&req.hash) {
        return error_response(StatusCode::BAD_REQUEST, &format!("invalid hash: {err}"));
    }

    match req.action.as_str() {
        ACTION_UPLOAD => {
            let exists = match state.driver.exists(&req.hash).await {
                Ok(exists) => exists,
                Err(err) => return driver_failure(&req.hash, err),
            };
            if exists {
                debug!(key = %req.hash, "upload negotiation: already present");
                return Json(NegotiateResponse::skipped()).into_response();
            }
            match state.driver.presign_put(&req.hash).await {
                Ok(url) => Json(NegotiateResponse::upload_needed(url)).into_response(),
                Err(err) => driver_failure(&req.hash, err),
            }
        }
        ACTION_DOWNLOAD => {
            let exists = match state.driver.exists(&req.hash).await {
                Ok(exists) => exists,
                Err(err) => return driver_failure(&req.hash, err),
            };
            if !exists {
                return error_response(StatusCode::NOT_FOUND, "object not found");
            }
            match state.driver.presign_get(&req.hash).await {
                Ok(url) => Json(NegotiateResponse::found(url)).into_response(),
                Err(err) => driver_failure(&req.hash, err),
            }
        }
        _ => error_response(StatusCode::BAD_REQUEST, "invalid action"),
    }
}

static UPLOAD_SEQ: AtomicU64 = AtomicU64::new(0);

/// Streaming object upload for the local driver.
///
/// Bytes stream into a temp file; the final hard-link is what makes the
/// first write win when two uploads race on one key.
async fn proxy_upload(
    State(state): State<Arc<GatewayState>>,
    Path(key): Path<String>,
    body: Body,
) -> Response {
    let Some(root) = state.proxy_root.clone() else {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "proxy not enabled");
    };
    if let Err(err) = validate_object_key(&key) {
        return error_response(StatusCode::BAD_REQUEST, &format!("invalid key: {err}"));
    }

    let dest = root.join(&key);
    if tokio::fs::metadata(&dest).await.is_ok() {
        return error_response(StatusCode::CONFLICT, "object already exists");
    }

    let tmp = root.join(format!(
        ".upload-{}-{}",
        std::process::id(),
        UPLOAD_SEQ.fetch_add(1, Ordering::Relaxed)
    ));

    let written = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        let mut reader = StreamReader::new(body.into_data_stream().map_err(std::io::Error::other));
        let written = tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok::<u64, std::io::Error>(written)
    }
    .await;

    let written = match written {
        Ok(written) => written,
        Err(err) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            error!(key, error = %err, "proxy upload failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "write failed");
        }
    };

    let linked = tokio::fs::hard_link(&tmp, &dest).await;
    let _ = tokio::fs::remove_file(&tmp).await;
    match linked {
        Ok(()) => {
            debug!(key, bytes = written, "proxy upload stored");
            StatusCode::OK.into_response()
        }
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
            error_response(StatusCode::CONFLICT, "object already exists")
        }
        Err(err) => {
            error!(key, error = %err, "proxy upload finalize failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "write failed")
        }
    }
}

/// Streaming object download for the local driver.
async fn proxy_download(
    State(state): State<Arc<GatewayState>>,
    Path(key): Path<String>,
) -> Response {
    let Some(root) = state.proxy_root.clone() else {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "proxy not enabled");
    };
    if let Err(err) = validate_object_key(&key) {
        return error_response(StatusCode::BAD_REQUEST, &format!("invalid key: {err}"));
    }

    let file = match tokio::fs::File::open(root.join(&key)).await {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return error_response(StatusCode::NOT_FOUND, "object not found");
        }
        Err(err) => {
            error!(key, error = %err, "proxy download open failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "read failed");
        }
    };

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn driver_failure(key: &str, err: DriverError) -> Response {
    error!(key, error = %err, "storage driver failure");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "storage driver failure")
}
