#![forbid(unsafe_code)]

//! `agent-tether`: HTTP/SSE front end that supervises agent processes.
//!
//! Bootstraps configuration and the flat-file stores, builds the session
//! registry, and serves the API until Ctrl-C or SIGTERM.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_tether::config::GlobalConfig;
use agent_tether::http::{self, AppState};
use agent_tether::persistence::{HistoryStore, ProjectStore};
use agent_tether::session::SessionRegistry;
use agent_tether::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-tether", about = "Agent session supervisor", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the listen host.
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-tether bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_or_default(&args.config)?;
    config.apply_process_env()?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if !config.api_key_configured() {
        warn!("no API key configured; set ANTHROPIC_API_KEY or env.auth_token");
    }
    info!(
        agent_binary = %config.agent_binary.display(),
        base_url = %config.agent_env.base_url,
        keep_running_in_background = config.server.keep_running_in_background,
        "configuration resolved"
    );
    let config = Arc::new(config);

    // ── Open stores ─────────────────────────────────────
    let history = Arc::new(HistoryStore::open(&config.storage.sessions_file)?);
    let projects = Arc::new(ProjectStore::open(&config.storage.projects_file)?);

    let registry = Arc::new(SessionRegistry::new(
        config.session_settings(),
        Arc::clone(&history),
        Arc::clone(&projects),
    ));
    let state = AppState {
        registry: Arc::clone(&registry),
        projects,
        config: Arc::clone(&config),
    };

    // ── Bind ────────────────────────────────────────────
    let bind = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind {bind}: {err}")))?;
    let addr: SocketAddr = listener.local_addr()?;
    info!(%addr, "agent-tether ready");

    // ── Serve until signalled ───────────────────────────
    let ct = CancellationToken::new();
    let server = tokio::spawn(http::serve(listener, state, ct.clone()));

    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(%err, "HTTP server failed"),
        Err(err) => error!(%err, "HTTP server task panicked"),
    }
    registry.shutdown_all();
    if let Err(err) = history.sync() {
        error!(%err, "failed to write final session history");
    }
    info!("agent-tether shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
