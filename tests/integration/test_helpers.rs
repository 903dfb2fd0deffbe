//! Shared fixtures: `/bin/sh` stand-in agents and polling helpers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agent_tether::agent::launcher::{AgentEnv, LaunchSpec};
use agent_tether::models::event::{Event, OutputData};
use agent_tether::persistence::{HistoryStore, ProjectStore};
use agent_tether::session::{RetryPolicy, SessionRegistry, SessionSettings};
use serde_json::Value;
use tokio::sync::mpsc;

/// Replies to every stdin line with one assistant record.
pub const ASSISTANT_ECHO: &str = r#"while IFS= read -r line; do printf '%s\n' '{"type":"assistant","message":{"role":"assistant","content":"pong"}}'; done"#;

/// Stays alive without output until killed.
pub const IDLE: &str = "exec sleep 30";

/// Default wait for asynchronous effects.
pub const WAIT: Duration = Duration::from_secs(5);

/// Launch `script` through `/bin/sh -c`.
pub fn sh_spec(script: &str) -> LaunchSpec {
    LaunchSpec {
        binary: PathBuf::from("/bin/sh"),
        args: vec!["-c".into(), script.into()],
        env: AgentEnv {
            api_key: Some("test-key".into()),
            base_url: "http://127.0.0.1:9".into(),
            api_timeout_ms: 1000,
            disable_nonessential_traffic: true,
        },
    }
}

/// Settings with no start delay and fast retries.
pub fn settings(launch: LaunchSpec, keep_running_in_background: bool) -> SessionSettings {
    SessionSettings {
        launch,
        keep_running_in_background,
        start_delay: Duration::ZERO,
        send_retry: RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(100),
        },
        config_hint: None,
    }
}

/// Registry over in-memory stores.
pub fn registry(settings: SessionSettings) -> (Arc<SessionRegistry>, Arc<HistoryStore>) {
    let history = Arc::new(HistoryStore::in_memory());
    let registry = Arc::new(SessionRegistry::new(
        settings,
        Arc::clone(&history),
        Arc::new(ProjectStore::in_memory()),
    ));
    (registry, history)
}

/// Poll `check` every 20 ms until it holds or `WAIT` elapses.
pub async fn wait_until<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Receive events until one matches `stop`, returning everything received.
pub async fn recv_until<F>(rx: &mut mpsc::UnboundedReceiver<Event>, mut stop: F) -> Vec<Event>
where
    F: FnMut(&Event) -> bool,
{
    let mut seen = Vec::new();
    let collect = async {
        while let Some(event) = rx.recv().await {
            let done = stop(&event);
            seen.push(event);
            if done {
                break;
            }
        }
    };
    let _ = tokio::time::timeout(WAIT, collect).await;
    seen
}

/// Text payload of an output event.
pub fn text_of(event: &Event) -> Option<&str> {
    match event {
        Event::AgentOutput {
            data: OutputData::Text(text),
        } => Some(text),
        _ => None,
    }
}

/// Structured payload of an output event.
pub fn value_of(event: &Event) -> Option<&Value> {
    match event {
        Event::AgentOutput {
            data: OutputData::Structured(value),
        } => Some(value),
        _ => None,
    }
}

/// Whether `event` is a `claude_closed` notification.
pub fn is_closed(event: &Event) -> bool {
    matches!(event, Event::AgentClosed { .. })
}
