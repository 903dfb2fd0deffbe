//! Agent process launcher.
//!
//! Spawns one agent process per start request with:
//! - `kill_on_drop(true)` so processes are cleaned up automatically.
//! - `env_clear()` + a safe variable allowlist, then the credential bundle
//!   injected explicitly, so unrelated server secrets never reach the child.
//! - the fixed streaming-JSON flags from [`LaunchSpec::args`].
//! - all three standard streams piped and handed back independently.
//!
//! The launcher never retries; restart policy belongs to the supervisor.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::info;

use crate::{AppError, Result};

// ── Environment allowlist ────────────────────────────────────────────────────

/// Environment variables inherited by the spawned agent process.
///
/// Every other variable from the server's environment is stripped via
/// `env_clear()` before the child is launched.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LOGNAME",
    "SHELL",
    "LANG",
    "LC_ALL",
    "TERM",
    "TMPDIR",
    "RUST_LOG",
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "NO_PROXY",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

// ── Configuration ────────────────────────────────────────────────────────────

/// Credential and endpoint bundle exported to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentEnv {
    /// Resolved API credential; `None` runs the agent degraded.
    pub api_key: Option<String>,
    /// Upstream API base endpoint.
    pub base_url: String,
    /// Upstream request timeout.
    pub api_timeout_ms: u64,
    /// Disable the agent's non-essential network traffic.
    pub disable_nonessential_traffic: bool,
}

impl AgentEnv {
    /// Variables injected on top of the allowlist, for session `session_id`.
    #[must_use]
    pub fn vars(&self, session_id: u64) -> Vec<(&'static str, String)> {
        let key = self.api_key.clone().unwrap_or_default();
        vec![
            ("CLAUDE_SESSION_ID", session_id.to_string()),
            ("ANTHROPIC_API_KEY", key.clone()),
            ("ANTHROPIC_AUTH_TOKEN", key),
            ("ANTHROPIC_BASE_URL", self.base_url.clone()),
            ("API_TIMEOUT_MS", self.api_timeout_ms.to_string()),
            (
                "CLAUDE_CODE_DISABLE_NONESSENTIAL_TRAFFIC",
                u8::from(self.disable_nonessential_traffic).to_string(),
            ),
        ]
    }
}

/// Everything needed to launch the agent binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Agent executable.
    pub binary: PathBuf,
    /// Fixed flags selecting structured streaming input/output.
    pub args: Vec<String>,
    /// Credential bundle.
    pub env: AgentEnv,
}

// ── Process handle ───────────────────────────────────────────────────────────

/// A freshly spawned agent process with its pipes taken.
///
/// The caller is responsible for keeping `child` alive (it has
/// `kill_on_drop(true)`) and for driving the three streams.
#[derive(Debug)]
pub struct AgentProcess {
    /// OS process id, if still known.
    pub pid: Option<u32>,
    /// Child process handle, awaited for the termination notification.
    pub child: Child,
    /// Agent's stdin for user turns.
    pub stdin: ChildStdin,
    /// Agent's structured output stream.
    pub stdout: ChildStdout,
    /// Agent's diagnostic stream.
    pub stderr: ChildStderr,
}

// ── Launcher ─────────────────────────────────────────────────────────────────

/// Verify the configured binary exists.
///
/// Only path-like binaries (containing a separator) are checked; a bare
/// command name is resolved through `PATH` at spawn time.
///
/// # Errors
///
/// Returns `AppError::Config("agent binary not found at: …")`.
pub fn check_binary(spec: &LaunchSpec) -> Result<()> {
    let is_path_like = spec.binary.components().count() > 1 || spec.binary.is_absolute();
    if is_path_like && !spec.binary.exists() {
        return Err(AppError::Config(format!(
            "agent binary not found at: {}",
            spec.binary.display()
        )));
    }
    Ok(())
}

/// Spawn the agent for `session_id`, optionally inside `working_dir`.
///
/// # Errors
///
/// - `AppError::Launch("failed to spawn agent: …")` on OS spawn failure.
/// - `AppError::Launch("failed to capture agent …")` if a pipe was not created.
pub fn launch(
    spec: &LaunchSpec,
    session_id: u64,
    working_dir: Option<&Path>,
) -> Result<AgentProcess> {
    let mut cmd = Command::new(&spec.binary);
    cmd.args(&spec.args);

    // Strip inherited environment, then inject only the safe allowlist.
    cmd.env_clear();
    for &key in ALLOWED_ENV_VARS {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }
    for (key, val) in spec.env.vars(session_id) {
        cmd.env(key, val);
    }

    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::Launch(format!("failed to spawn agent: {err}")))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Launch("failed to capture agent stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Launch("failed to capture agent stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Launch("failed to capture agent stderr".into()))?;

    let pid = child.id();
    info!(
        session_id,
        pid = pid.unwrap_or(0),
        binary = %spec.binary.display(),
        args = ?spec.args,
        working_dir = ?working_dir,
        api_key_configured = spec.env.api_key.is_some(),
        "agent process spawned"
    );

    Ok(AgentProcess {
        pid,
        child,
        stdin,
        stdout,
        stderr,
    })
}
