//! Health and configuration probes.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use super::AppState;
use crate::config::PermissionsConfig;

/// Response of `GET /api/health`.
#[derive(Debug, Serialize)]
pub struct Health {
    /// Always `ok`.
    pub status: &'static str,
    /// Active sessions.
    pub sessions: usize,
    /// Detached sessions with a live process.
    pub background_sessions: usize,
    /// Configured agent executable.
    pub agent_binary: String,
    /// Whether a credential is available.
    pub api_key_configured: bool,
    /// Upstream API endpoint.
    pub base_url: String,
    /// Configuration file path.
    pub config_file: Option<String>,
    /// Whether that file exists.
    pub config_exists: bool,
}

/// `GET /api/health`
pub async fn health(State(state): State<AppState>) -> Json<Health> {
    let (sessions, background_sessions) = state.registry.counts();
    let config = &state.config;
    Json(Health {
        status: "ok",
        sessions,
        background_sessions,
        agent_binary: config.agent_binary.display().to_string(),
        api_key_configured: config.api_key_configured(),
        base_url: config.agent_env.base_url.clone(),
        config_file: config.source.as_ref().map(|path| path.display().to_string()),
        config_exists: config.source_exists(),
    })
}

/// Response of `GET /api/config`.
#[derive(Debug, Serialize)]
pub struct ConfigView {
    /// Upstream API endpoint.
    pub base_url: String,
    /// Whether a credential is available.
    pub api_key_configured: bool,
    /// Permission settings.
    pub permissions: PermissionsConfig,
    /// Upstream request timeout.
    pub timeout_ms: u64,
}

/// `GET /api/config`
pub async fn config(State(state): State<AppState>) -> Json<ConfigView> {
    let config = &state.config;
    Json(ConfigView {
        base_url: config.agent_env.base_url.clone(),
        api_key_configured: config.api_key_configured(),
        permissions: config.permissions.clone(),
        timeout_ms: config.agent_env.api_timeout_ms,
    })
}
