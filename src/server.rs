//! Forwarder HTTP server.
//!
//! Turns any known hash into a redirect to a URL that currently serves the
//! content. Read-only; there is no cache, so freshness is whatever the
//! store's `available` flags say.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/url/sha1/{hash}` | 302 to the URL whose id is `hash` |
//! | `GET`  | `/object/head10mbSha1/{hash}` | 302 to an available URL with this prefix hash |
//! | `GET`  | `/object/sha1/{hash}` | 302 via the object's prefix hash |
//! | `GET`  | `/resolve/{hash}` | tries all three rules in order |
//! | `GET`  | `/health` | health check (returns version) |
//! | `GET`  | `/` | `{}` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "no url for hash ..." } }
//! ```
//!
//! Error codes: `not_found` (404, also for malformed hashes), `internal` (500).

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::forward::{self, HashKind};
use crate::store::IdentityStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    store: Arc<dyn IdentityStore>,
}

/// Builds the forwarder router over `store`.
pub fn router(store: Arc<dyn IdentityStore>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/url/sha1/{hash}", get(handle_url_sha1))
        .route("/object/head10mbSha1/{hash}", get(handle_object_prefix))
        .route("/object/sha1/{hash}", get(handle_object_sha1))
        .route("/resolve/{hash}", get(handle_resolve))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { store })
}

/// Binds `bind_addr` and serves until the process is terminated.
pub async fn run_server(bind_addr: &str, store: Arc<dyn IdentityStore>) -> anyhow::Result<()> {
    let app = router(store);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %listener.local_addr()?, "forwarder listening");
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    error!(error = %format!("{:#}", err), "lookup failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: "lookup failed".to_string(),
    }
}

/// 302 with a `Location` header. `Redirect::to` in axum answers 303.
fn found(location: String) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

async fn redirect(
    state: &AppState,
    kind: Option<HashKind>,
    hash: &str,
) -> Result<Response, AppError> {
    let resolved = match kind {
        Some(kind) => forward::resolve(state.store.as_ref(), kind, hash).await,
        None => forward::resolve_any(state.store.as_ref(), hash).await,
    }
    .map_err(internal)?;

    match resolved {
        Some(url) => Ok(found(url)),
        None => Err(not_found(format!("no url for hash {}", hash))),
    }
}

// ============ Handlers ============

async fn handle_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({}))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_url_sha1(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Response, AppError> {
    redirect(&state, Some(HashKind::Url), &hash).await
}

async fn handle_object_prefix(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Response, AppError> {
    redirect(&state, Some(HashKind::Prefix), &hash).await
}

async fn handle_object_sha1(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Response, AppError> {
    redirect(&state, Some(HashKind::Sha1), &hash).await
}

async fn handle_resolve(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Response, AppError> {
    redirect(&state, None, &hash).await
}
