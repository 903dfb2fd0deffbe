//! Global configuration parsing, validation, and credential resolution.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::agent::launcher::{AgentEnv, LaunchSpec};
use crate::session::{RetryPolicy, SessionSettings};
use crate::{AppError, Result};

fn default_agent_binary() -> PathBuf {
    PathBuf::from("./claude")
}

fn default_agent_args() -> Vec<String> {
    [
        "--output-format",
        "stream-json",
        "--input-format",
        "stream-json",
        "--verbose",
    ]
    .iter()
    .map(|arg| (*arg).to_owned())
    .collect()
}

fn default_host() -> String {
    "localhost".into()
}

fn default_port() -> u16 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "https://api.anthropic.com".into()
}

fn default_api_timeout_ms() -> u64 {
    300_000
}

fn default_start_delay_ms() -> u64 {
    500
}

fn default_send_retry_delay_ms() -> u64 {
    500
}

fn default_max_send_attempts() -> u32 {
    3
}

fn default_sessions_file() -> PathBuf {
    PathBuf::from("sessions.json")
}

fn default_projects_file() -> PathBuf {
    PathBuf::from("projects.json")
}

fn default_permission_mode() -> String {
    "bypassPermissions".into()
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port to bind.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Keep the agent process running after the client disconnects.
    #[serde(default = "default_true")]
    pub keep_running_in_background: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            keep_running_in_background: default_true(),
        }
    }
}

/// Values exported into the agent process environment.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentEnvConfig {
    /// API credential written to the config file. Superseded by `ANTHROPIC_API_KEY`.
    #[serde(default)]
    pub auth_token: String,
    /// Base endpoint of the upstream API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Request timeout handed to the agent.
    #[serde(default = "default_api_timeout_ms")]
    pub api_timeout_ms: u64,
    /// Disable the agent's non-essential network traffic.
    #[serde(default = "default_true")]
    pub disable_nonessential_traffic: bool,
}

impl Default for AgentEnvConfig {
    fn default() -> Self {
        Self {
            auth_token: String::new(),
            base_url: default_base_url(),
            api_timeout_ms: default_api_timeout_ms(),
            disable_nonessential_traffic: default_true(),
        }
    }
}

/// Timing and retry knobs for session supervisors.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SupervisorConfig {
    /// Delay between a stream attaching and the first process start.
    #[serde(default = "default_start_delay_ms")]
    pub start_delay_ms: u64,
    /// Delay between a restart and the retried send.
    #[serde(default = "default_send_retry_delay_ms")]
    pub send_retry_delay_ms: u64,
    /// Restart-and-retry attempts before a message is reported undeliverable.
    #[serde(default = "default_max_send_attempts")]
    pub max_send_attempts: u32,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            start_delay_ms: default_start_delay_ms(),
            send_retry_delay_ms: default_send_retry_delay_ms(),
            max_send_attempts: default_max_send_attempts(),
        }
    }
}

/// Locations of the flat-file snapshots.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StorageConfig {
    /// Session history snapshot.
    #[serde(default = "default_sessions_file")]
    pub sessions_file: PathBuf,
    /// Project list snapshot.
    #[serde(default = "default_projects_file")]
    pub projects_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sessions_file: default_sessions_file(),
            projects_file: default_projects_file(),
        }
    }
}

/// Permission settings reported by `GET /api/config`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionsConfig {
    /// Permission mode the agent runs under.
    #[serde(default = "default_permission_mode", alias = "default_mode")]
    pub default_mode: String,
    /// Explicitly allowed tools.
    #[serde(default)]
    pub allow: Vec<String>,
}

impl Default for PermissionsConfig {
    fn default() -> Self {
        Self {
            default_mode: default_permission_mode(),
            allow: Vec::new(),
        }
    }
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Path to the agent executable.
    #[serde(default = "default_agent_binary")]
    pub agent_binary: PathBuf,
    /// Flags selecting the streaming JSON protocol.
    #[serde(default = "default_agent_args")]
    pub agent_args: Vec<String>,
    /// HTTP listener settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Agent environment bundle.
    #[serde(default, rename = "env")]
    pub agent_env: AgentEnvConfig,
    /// Supervisor timing.
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// Snapshot file locations.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Permission settings.
    #[serde(default)]
    pub permissions: PermissionsConfig,
    /// Resolved credential (populated at runtime).
    #[serde(skip)]
    pub api_key: Option<String>,
    /// File the configuration was read from, if any (populated at runtime).
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            agent_binary: default_agent_binary(),
            agent_args: default_agent_args(),
            server: ServerConfig::default(),
            agent_env: AgentEnvConfig::default(),
            supervisor: SupervisorConfig::default(),
            storage: StorageConfig::default(),
            permissions: PermissionsConfig::default(),
            api_key: None,
            source: None,
        }
    }
}

impl GlobalConfig {
    /// Load configuration from `path`, falling back to defaults when the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file exists but cannot be read or
    /// contains invalid TOML, or if validation fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "no config file found, using defaults");
            let mut config = Self::default();
            config.source = Some(path.to_path_buf());
            return Ok(config);
        }

        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        let mut config = Self::from_toml_str(&raw)?;
        config.source = Some(path.to_path_buf());
        info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        config.resolve_api_key(None);
        Ok(config)
    }

    /// Apply environment overrides using `lookup` as the variable source.
    ///
    /// Recognised variables: `ANTHROPIC_AUTH_TOKEN`, `ANTHROPIC_BASE_URL`,
    /// `API_TIMEOUT_MS`, `PORT`, `CLAUDE_BINARY` and `ANTHROPIC_API_KEY`.
    /// Empty values are ignored.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a numeric override does not parse.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(token) = get("ANTHROPIC_AUTH_TOKEN") {
            self.agent_env.auth_token = token;
        }
        if let Some(url) = get("ANTHROPIC_BASE_URL") {
            self.agent_env.base_url = url;
        }
        if let Some(timeout) = get("API_TIMEOUT_MS") {
            self.agent_env.api_timeout_ms = timeout
                .parse()
                .map_err(|err| AppError::Config(format!("API_TIMEOUT_MS invalid: {err}")))?;
        }
        if let Some(port) = get("PORT") {
            self.server.port = port
                .parse()
                .map_err(|err| AppError::Config(format!("PORT invalid: {err}")))?;
        }
        if let Some(binary) = get("CLAUDE_BINARY") {
            self.agent_binary = PathBuf::from(binary);
        }

        self.resolve_api_key(get("ANTHROPIC_API_KEY"));
        Ok(())
    }

    /// Apply overrides from the real process environment.
    ///
    /// # Errors
    ///
    /// See [`GlobalConfig::apply_env_overrides`].
    pub fn apply_process_env(&mut self) -> Result<()> {
        self.apply_env_overrides(|key| std::env::var(key).ok())
    }

    /// Whether a credential is available for the agent.
    #[must_use]
    pub fn api_key_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Whether the configuration file this config was loaded from exists.
    #[must_use]
    pub fn source_exists(&self) -> bool {
        self.source.as_deref().is_some_and(Path::exists)
    }

    /// Build the launch specification handed to every supervisor.
    #[must_use]
    pub fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec {
            binary: self.agent_binary.clone(),
            args: self.agent_args.clone(),
            env: AgentEnv {
                api_key: self.api_key.clone(),
                base_url: self.agent_env.base_url.clone(),
                api_timeout_ms: self.agent_env.api_timeout_ms,
                disable_nonessential_traffic: self.agent_env.disable_nonessential_traffic,
            },
        }
    }

    /// Build the settings shared by the registry and its supervisors.
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            launch: self.launch_spec(),
            keep_running_in_background: self.server.keep_running_in_background,
            start_delay: Duration::from_millis(self.supervisor.start_delay_ms),
            send_retry: RetryPolicy {
                max_attempts: self.supervisor.max_send_attempts,
                delay: Duration::from_millis(self.supervisor.send_retry_delay_ms),
            },
            config_hint: self
                .source
                .as_ref()
                .map(|path| path.display().to_string()),
        }
    }

    fn resolve_api_key(&mut self, env_key: Option<String>) {
        self.api_key = env_key.or_else(|| {
            Some(self.agent_env.auth_token.clone()).filter(|token| !token.is_empty())
        });
    }

    fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            return Err(AppError::Config("server.host must not be empty".into()));
        }

        if self.supervisor.max_send_attempts == 0 {
            return Err(AppError::Config(
                "supervisor.max_send_attempts must be greater than zero".into(),
            ));
        }

        if self.agent_binary.as_os_str().is_empty() {
            return Err(AppError::Config("agent_binary must not be empty".into()));
        }

        Ok(())
    }
}
