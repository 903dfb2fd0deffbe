//! HTTP surface.
//!
//! An axum [`Router`] over an explicitly constructed [`AppState`]. Every
//! response carries permissive CORS headers and `OPTIONS` preflights are
//! answered directly by the CORS middleware.

pub mod projects;
pub mod sessions;
pub mod status;
pub mod stream;

use std::sync::Arc;

use axum::extract::Request;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::GlobalConfig;
use crate::persistence::ProjectStore;
use crate::session::SessionRegistry;
use crate::{AppError, Result};

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Session pools and routing.
    pub registry: Arc<SessionRegistry>,
    /// Project records.
    pub projects: Arc<ProjectStore>,
    /// Effective configuration.
    pub config: Arc<GlobalConfig>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Decode a JSON request body; an empty body decodes as `{}`.
///
/// # Errors
///
/// Returns `AppError::InvalidRequest` if the body is not valid JSON for `T`.
pub fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T> {
    let raw: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        body
    };
    serde_json::from_slice(raw).map_err(|err| AppError::InvalidRequest(err.to_string()))
}

/// Lenient numeric id from a query parameter; blank or malformed is `None`.
#[must_use]
pub fn parse_id(raw: Option<&str>) -> Option<u64> {
    raw.and_then(|value| value.trim().parse().ok())
}

async fn cors(request: Request, next: Next) -> Response {
    let mut response = if request.method() == Method::OPTIONS {
        StatusCode::OK.into_response()
    } else {
        next.run(request).await
    };
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    response
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(status::health))
        .route("/api/config", get(status::config))
        .route("/api/stream", get(stream::open))
        .route("/api/message", post(stream::message))
        .route("/api/sessions", get(sessions::list).post(sessions::create))
        .route(
            "/api/sessions/{id}",
            get(sessions::get_one).delete(sessions::delete),
        )
        .route("/api/sessions/{id}/stop", post(sessions::stop))
        .route("/api/projects", get(projects::list).post(projects::create))
        .route(
            "/api/projects/{id}",
            put(projects::update).delete(projects::delete),
        )
        .layer(middleware::from_fn(cors))
        .with_state(state)
}

/// Serve the API on `listener` until `ct` is cancelled.
///
/// On cancellation every resident session is stopped, which closes the
/// open event streams and lets the graceful shutdown complete.
///
/// # Errors
///
/// Returns `AppError::Io` if the server fails.
pub async fn serve(listener: TcpListener, state: AppState, ct: CancellationToken) -> Result<()> {
    let registry = Arc::clone(&state.registry);
    let addr = listener.local_addr()?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            ct.cancelled().await;
            registry.shutdown_all();
        })
        .await
        .map_err(|err| AppError::Io(format!("HTTP server error: {err}")))?;

    info!("HTTP server shut down");
    Ok(())
}
