//! Per-session supervisor.
//!
//! A [`Supervisor`] owns one session. It holds at most one agent process,
//! the output multiplexer, and the persisted conversation record. All
//! mutable state sits behind one `std::sync::Mutex` that is never held
//! across an `.await`; process I/O runs in spawned tasks that report back
//! through [`AgentEvent`]s.
//!
//! Lifecycle:
//!
//! ```text
//! Created ─start─▶ Starting ─spawned─▶ Running ◀─attach─ Detached
//!                     ▲                  │  └──detach──▶ ─┘
//!                     └──process exit────┘
//! any ──stop──▶ Stopped (terminal, never restarts)
//! ```

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};

use crate::agent::codec::Line;
use crate::agent::launcher::{self, AgentProcess, LaunchSpec};
use crate::agent::protocol::{AgentRecord, UserTurn};
use crate::agent::{monitor, reader, writer, AgentEvent, StreamKind};
use crate::models::event::Event;
use crate::models::session::{Message, Role, SessionRecord, SessionState};
use crate::persistence::HistoryStore;
use crate::session::output::{Multiplexer, TransportSender};
use crate::session::SessionSettings;
use crate::AppError;

/// Capacity of the channel carrying agent output into the pump task.
const EVENT_BUFFER: usize = 256;

/// Handle to the live agent process.
#[derive(Debug)]
struct ProcessHandle {
    launch: u64,
    pid: Option<u32>,
    stdin: mpsc::UnboundedSender<Value>,
    shutdown: CancellationToken,
    monitor: JoinHandle<()>,
}

impl ProcessHandle {
    /// Process still running with a writable stdin.
    fn is_live(&self) -> bool {
        !self.shutdown.is_cancelled() && !self.stdin.is_closed() && !self.monitor.is_finished()
    }

    /// Fire-and-forget kill; the monitor reaps the child.
    fn kill(&self) {
        self.shutdown.cancel();
    }
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    record: SessionRecord,
    output: Multiplexer,
    process: Option<ProcessHandle>,
    launches: u64,
    /// Turns waiting for a writable process, oldest first. Non-empty exactly
    /// while a delivery task is running.
    pending: VecDeque<UserTurn>,
}

/// Outcome of one attempt to write a user turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Sent,
    NotWritable,
    Abandoned,
}

/// Supervisor for one session.
#[derive(Debug)]
pub struct Supervisor {
    id: u64,
    project_id: Option<u64>,
    working_dir: Option<PathBuf>,
    settings: Arc<SessionSettings>,
    history: Arc<HistoryStore>,
    inner: Mutex<Inner>,
}

impl Supervisor {
    /// Build a supervisor around an existing (or freshly created) record.
    ///
    /// Nothing is persisted and no process is started.
    #[must_use]
    pub fn new(
        id: u64,
        record: SessionRecord,
        working_dir: Option<PathBuf>,
        settings: Arc<SessionSettings>,
        history: Arc<HistoryStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            project_id: record.project_id,
            working_dir,
            settings,
            history,
            inner: Mutex::new(Inner {
                state: SessionState::Created,
                record,
                output: Multiplexer::new(),
                process: None,
                launches: 0,
                pending: VecDeque::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Bound project, if any.
    #[must_use]
    pub fn project_id(&self) -> Option<u64> {
        self.project_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Snapshot of the conversation record.
    #[must_use]
    pub fn record(&self) -> SessionRecord {
        self.lock().record.clone()
    }

    /// Snapshot of the replay cache.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.lock().output.events().to_vec()
    }

    /// Whether a live process with writable stdin exists.
    #[must_use]
    pub fn has_live_process(&self) -> bool {
        self.lock().process.as_ref().is_some_and(ProcessHandle::is_live)
    }

    /// OS pid of the live process.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.lock()
            .process
            .as_ref()
            .filter(|process| process.is_live())
            .and_then(|process| process.pid)
    }

    /// Whether a client transport is attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.lock().output.is_attached()
    }

    /// Generation of the attached transport.
    #[must_use]
    pub fn transport_generation(&self) -> Option<u64> {
        self.lock().output.generation()
    }

    fn transition(&self, inner: &mut Inner, next: SessionState) {
        if inner.state == next {
            return;
        }
        if inner.state.can_transition_to(next) {
            debug!(session_id = self.id, from = ?inner.state, to = ?next, "session state change");
            inner.state = next;
        } else {
            debug!(session_id = self.id, from = ?inner.state, to = ?next, "state change ignored");
        }
    }

    /// Attach a client transport, replacing any previous one.
    ///
    /// The transport receives `connected`, then the full replay cache, then
    /// live events, with no gap between replay and live delivery.
    pub fn attach(&self, tx: TransportSender) -> u64 {
        let mut inner = self.lock();
        let replayed = inner.output.len();
        let replayed_output = inner
            .output
            .events()
            .iter()
            .filter(|event| !event.is_control())
            .count();
        let generation = inner.output.attach(
            tx,
            Some(Event::Connected {
                session_id: self.id,
            }),
        );
        if inner.state == SessionState::Detached {
            self.transition(&mut inner, SessionState::Running);
        }
        info!(
            session_id = self.id,
            generation,
            replayed,
            replayed_output,
            "transport attached"
        );
        generation
    }

    /// Mark the session owned by the active pool again without a transport.
    pub fn resume(&self) {
        let mut inner = self.lock();
        if inner.state == SessionState::Detached {
            self.transition(&mut inner, SessionState::Running);
        }
    }

    /// Drop the transport identified by `generation` and enter `Detached`.
    ///
    /// Returns `false` when `generation` is stale.
    pub fn detach(&self, generation: u64) -> bool {
        let mut inner = self.lock();
        if !inner.output.detach(generation) {
            return false;
        }
        if inner.state == SessionState::Running {
            self.transition(&mut inner, SessionState::Detached);
        }
        info!(session_id = self.id, generation, "transport detached");
        true
    }

    /// Kill the process, drop the transport and enter `Stopped`.
    ///
    /// Idempotent. Returns whether a live process was killed.
    pub fn stop(&self) -> bool {
        let mut inner = self.lock();
        let killed = inner.process.take().is_some_and(|process| {
            let live = process.is_live();
            process.kill();
            live
        });
        inner.output.clear_transport();
        inner.pending.clear();
        self.transition(&mut inner, SessionState::Stopped);
        info!(session_id = self.id, killed, "session stopped");
        killed
    }

    /// Start the agent process unless one is live or the session is stopped.
    ///
    /// Failures are reported as events on the session's output and leave it
    /// in `Starting` so a later start may retry.
    pub fn start(self: &Arc<Self>) {
        let span = info_span!("session_start", session_id = self.id);
        let _guard = span.enter();

        let mut inner = self.lock();
        if inner.state == SessionState::Stopped {
            debug!("start skipped: session stopped");
            return;
        }
        if inner.process.as_ref().is_some_and(ProcessHandle::is_live) {
            debug!("start skipped: process already live");
            return;
        }
        if let Some(stale) = inner.process.take() {
            stale.kill();
        }
        self.transition(&mut inner, SessionState::Starting);

        let spec = &self.settings.launch;
        if let Err(err) = launcher::check_binary(spec) {
            warn!(%err, "agent binary missing");
            inner.output.emit(Event::error(error_text(&err)));
            inner.output.emit(Event::text(binary_missing_hint(
                spec,
                self.settings.config_hint.as_deref(),
            )));
            return;
        }
        if spec.env.api_key.is_none() {
            warn!("no API key configured, agent will run without credentials");
        }

        let AgentProcess {
            pid,
            child,
            stdin,
            stdout,
            stderr,
        } = match launcher::launch(spec, self.id, self.working_dir.as_deref()) {
            Ok(process) => process,
            Err(err) => {
                warn!(%err, "agent spawn failed");
                inner.output.emit(Event::error(error_text(&err)));
                inner.output.emit(Event::text(spawn_failure_hint(spec)));
                return;
            }
        };

        inner.launches += 1;
        let launch = inner.launches;
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let drain = CancellationToken::new();
        let shutdown = CancellationToken::new();

        let stdout_task = tokio::spawn(reader::run_reader(
            self.id,
            StreamKind::Stdout,
            stdout,
            event_tx.clone(),
            drain.clone(),
        ));
        let stderr_task = tokio::spawn(reader::run_reader(
            self.id,
            StreamKind::Stderr,
            stderr,
            event_tx.clone(),
            drain.clone(),
        ));

        let (stdin_tx, stdin_rx) = mpsc::unbounded_channel();
        let session_id = self.id;
        let writer_cancel = shutdown.clone();
        tokio::spawn(async move {
            if let Err(err) =
                writer::run_writer(session_id, stdin, stdin_rx, writer_cancel).await
            {
                warn!(session_id, %err, "agent writer stopped");
            }
        });

        let monitor = monitor::monitor_exit(
            self.id,
            child,
            vec![stdout_task, stderr_task],
            event_tx,
            drain,
            shutdown.clone(),
        );
        tokio::spawn(Arc::clone(self).pump(launch, event_rx));

        inner.process = Some(ProcessHandle {
            launch,
            pid,
            stdin: stdin_tx,
            shutdown,
            monitor,
        });
        self.transition(&mut inner, SessionState::Running);
        info!(launch, pid = pid.unwrap_or(0), "session running");
    }

    /// Start after the configured delay unless a process is live by then.
    pub fn schedule_start(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let delay = self.settings.start_delay;
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if !this.has_live_process() {
                this.start();
            }
        });
    }

    async fn pump(self: Arc<Self>, launch: u64, mut events: mpsc::Receiver<AgentEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                AgentEvent::Output { stream, line } => self.on_output(stream, line),
                AgentEvent::Exited { code, reason } => self.on_exit(launch, code, &reason),
            }
        }
        debug!(session_id = self.id, launch, "agent event pump finished");
    }

    fn on_output(&self, stream: StreamKind, line: Line) {
        let assistant = match stream {
            StreamKind::Stdout => line
                .as_structured()
                .and_then(|value| AgentRecord::classify(value).history_message().cloned()),
            StreamKind::Stderr => None,
        };

        let mut inner = self.lock();
        inner.output.emit(Event::output(line));
        if let Some(content) = assistant {
            self.append_message(&mut inner, Message::new(Role::Assistant, content));
        }
    }

    fn on_exit(&self, launch: u64, code: Option<i32>, reason: &str) {
        let mut inner = self.lock();
        if inner
            .process
            .as_ref()
            .is_some_and(|process| process.launch == launch)
        {
            inner.process = None;
        }
        inner.output.emit(Event::AgentClosed { code });
        info!(session_id = self.id, launch, ?code, reason, "agent closed");
    }

    /// Append to history and persist. Stopped sessions never write, so a
    /// deleted record cannot be resurrected by late output.
    fn append_message(&self, inner: &mut Inner, message: Message) {
        if inner.state == SessionState::Stopped {
            debug!(session_id = self.id, "message dropped: session stopped");
            return;
        }
        inner.record.append(message);
        self.history.stage(self.id, inner.record.clone());
    }

    /// Deliver a user turn, restarting the process if needed.
    ///
    /// When no writable process exists the turn is queued and a delivery
    /// task restarts the process, up to the configured number of attempts.
    /// Turns sent while the queue is non-empty line up behind it, so history
    /// and stdin always see turns in send order. On exhaustion every queued
    /// turn is dropped with an `error` event.
    pub fn send_user_turn(self: &Arc<Self>, content: Value) {
        let turn = UserTurn::new(content);
        let mut inner = self.lock();
        if !inner.pending.is_empty() {
            inner.pending.push_back(turn);
            debug!(session_id = self.id, queued = inner.pending.len(), "turn queued");
            return;
        }
        if self.try_deliver(&mut inner, &turn) != Delivery::NotWritable {
            return;
        }
        inner.pending.push_back(turn);
        drop(inner);
        tokio::spawn(Arc::clone(self).deliver_pending());
    }

    async fn deliver_pending(self: Arc<Self>) {
        let policy = self.settings.send_retry;
        for attempt in 1..=policy.max_attempts {
            info!(session_id = self.id, attempt, "agent not writable, restarting before send");
            self.start();
            if self.flush_pending() {
                return;
            }
            tokio::time::sleep(policy.delay).await;
            if self.flush_pending() {
                return;
            }
        }

        let mut inner = self.lock();
        let dropped = inner.pending.len();
        inner.pending.clear();
        warn!(
            session_id = self.id,
            attempts = policy.max_attempts,
            dropped,
            "message not delivered"
        );
        for _ in 0..dropped {
            inner.output.emit(Event::error(format!(
                "message not delivered: agent process unavailable after {} attempts",
                policy.max_attempts
            )));
        }
    }

    /// Deliver queued turns in order. Returns `true` once the queue is empty.
    fn flush_pending(&self) -> bool {
        let mut inner = self.lock();
        while let Some(turn) = inner.pending.pop_front() {
            match self.try_deliver(&mut inner, &turn) {
                Delivery::Sent => {}
                Delivery::Abandoned => {
                    inner.pending.clear();
                    break;
                }
                Delivery::NotWritable => {
                    inner.pending.push_front(turn);
                    return false;
                }
            }
        }
        true
    }

    fn try_deliver(&self, inner: &mut Inner, turn: &UserTurn) -> Delivery {
        if inner.state == SessionState::Stopped {
            warn!(session_id = self.id, "message dropped: session stopped");
            return Delivery::Abandoned;
        }
        let Some(stdin) = inner
            .process
            .as_ref()
            .filter(|process| process.is_live())
            .map(|process| process.stdin.clone())
        else {
            return Delivery::NotWritable;
        };

        self.append_message(inner, Message::new(Role::User, turn.message.content.clone()));
        if stdin.send(turn.to_value()).is_err() {
            warn!(session_id = self.id, "agent stdin closed before the turn was written");
            inner
                .output
                .emit(Event::error("agent stdin closed before the message was written"));
        } else {
            debug!(session_id = self.id, "user turn forwarded");
        }
        Delivery::Sent
    }
}

/// Event text for a launch failure, without the error-kind prefix.
fn error_text(err: &AppError) -> String {
    match err {
        AppError::Config(msg)
        | AppError::Launch(msg)
        | AppError::Storage(msg)
        | AppError::NotFound(msg)
        | AppError::InvalidRequest(msg)
        | AppError::Io(msg) => msg.clone(),
    }
}

fn binary_missing_hint(spec: &LaunchSpec, config_hint: Option<&str>) -> String {
    format!(
        "The agent binary was not found at {}.\n\
         Set `agent_binary` in {} or export CLAUDE_BINARY to point at the executable.",
        spec.binary.display(),
        config_hint.unwrap_or("the config file"),
    )
}

fn spawn_failure_hint(spec: &LaunchSpec) -> String {
    if spec.env.api_key.is_none() {
        return "The agent could not be started and no API key is configured.\n\
                Set `auth_token` under [env] in the config file or export ANTHROPIC_API_KEY."
            .to_owned();
    }
    format!(
        "The agent could not be started. Likely causes:\n\
         - {} is not executable\n\
         - the project working directory no longer exists\n\
         - the agent rejected its arguments: {}",
        spec.binary.display(),
        spec.args.join(" "),
    )
}
