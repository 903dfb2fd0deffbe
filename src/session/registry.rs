//! Session registry.
//!
//! Three pools decide where a session id resolves:
//!
//! | Pool        | Contents                                          |
//! |-------------|---------------------------------------------------|
//! | active      | supervisors owned by a transport or a recent send |
//! | background  | supervisors whose transport left, process alive   |
//! | history     | persisted records with no resident supervisor     |
//!
//! A resident id is in exactly one of active/background. Every mutation
//! of the pools happens under the registry lock; supervisor locks are only
//! taken while it is held, never the other way round.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::models::session::SessionRecord;
use crate::persistence::{HistoryStore, ProjectStore};
use crate::session::output::TransportSender;
use crate::session::supervisor::Supervisor;
use crate::session::SessionSettings;
use crate::{AppError, Result};

/// Result of an explicit stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// A resident supervisor was stopped.
    Stopped,
    /// Nothing was running under that id.
    NotRunning,
}

#[derive(Debug, Default)]
struct Pools {
    active: HashMap<u64, Arc<Supervisor>>,
    background: HashMap<u64, Arc<Supervisor>>,
    last_id: u64,
}

/// Owner of every resident supervisor.
#[derive(Debug)]
pub struct SessionRegistry {
    settings: Arc<SessionSettings>,
    history: Arc<HistoryStore>,
    projects: Arc<ProjectStore>,
    pools: Mutex<Pools>,
}

impl SessionRegistry {
    /// Create a registry; the id counter starts at the largest persisted id.
    #[must_use]
    pub fn new(
        settings: SessionSettings,
        history: Arc<HistoryStore>,
        projects: Arc<ProjectStore>,
    ) -> Self {
        let last_id = history.max_id();
        info!(last_id, "session registry ready");
        Self {
            settings: Arc::new(settings),
            history,
            projects,
            pools: Mutex::new(Pools {
                last_id,
                ..Pools::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Pools> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shared settings.
    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Persisted history.
    #[must_use]
    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    fn supervisor_for(
        &self,
        id: u64,
        record: SessionRecord,
        project: Option<u64>,
    ) -> Arc<Supervisor> {
        let working_dir = project.and_then(|project_id| self.projects.path_of(project_id));
        Supervisor::new(
            id,
            record,
            working_dir,
            Arc::clone(&self.settings),
            Arc::clone(&self.history),
        )
    }

    fn next_id(pools: &mut Pools) -> u64 {
        pools.last_id += 1;
        pools.last_id
    }

    /// Resolve `session` for a new stream and attach `tx` to it.
    ///
    /// Resolution order: background, active, history, then a brand-new
    /// session bound to `project`. A start is scheduled whenever the
    /// resolved supervisor has no live process.
    ///
    /// Returns the supervisor and the transport generation.
    pub fn open_stream(
        &self,
        session: Option<u64>,
        project: Option<u64>,
        tx: TransportSender,
    ) -> (Arc<Supervisor>, u64) {
        let (supervisor, generation) = {
            let mut pools = self.lock();
            let supervisor = self.resolve_for_stream(&mut pools, session, project);
            let generation = supervisor.attach(tx);
            (supervisor, generation)
        };

        if !supervisor.has_live_process() {
            supervisor.schedule_start();
        }
        (supervisor, generation)
    }

    fn resolve_for_stream(
        &self,
        pools: &mut Pools,
        session: Option<u64>,
        project: Option<u64>,
    ) -> Arc<Supervisor> {
        if let Some(id) = session {
            if let Some(supervisor) = pools.background.remove(&id) {
                info!(session_id = id, "reattaching background session");
                pools.active.insert(id, Arc::clone(&supervisor));
                return supervisor;
            }
            if let Some(supervisor) = pools.active.get(&id) {
                info!(session_id = id, "attaching to active session");
                return Arc::clone(supervisor);
            }
            if let Some(record) = self.history.get(id) {
                info!(
                    session_id = id,
                    messages = record.messages.len(),
                    "resuming session from history"
                );
                let bound = record.project_id.or(project);
                let supervisor = self.supervisor_for(id, record, bound);
                pools.active.insert(id, Arc::clone(&supervisor));
                return supervisor;
            }
            debug!(session_id = id, "unknown session requested, creating a new one");
        }

        let id = Self::next_id(pools);
        let record = SessionRecord::new(project);
        if let Err(err) = self.history.upsert(id, record.clone()) {
            warn!(session_id = id, %err, "failed to persist new session");
        }
        info!(session_id = id, ?project, "created new session");
        let supervisor = self.supervisor_for(id, record, project);
        pools.active.insert(id, Arc::clone(&supervisor));
        supervisor
    }

    /// React to a closed transport.
    ///
    /// Notifications for a replaced transport are ignored. Otherwise the
    /// session moves to the background pool when background running is
    /// enabled and its process is live, or is stopped and dropped.
    pub fn handle_disconnect(&self, id: u64, generation: u64) {
        let mut pools = self.lock();
        let Some(supervisor) = pools.active.get(&id).cloned() else {
            debug!(session_id = id, generation, "disconnect for non-active session ignored");
            return;
        };
        if supervisor.transport_generation() != Some(generation) {
            debug!(session_id = id, generation, "stale disconnect ignored");
            return;
        }

        pools.active.remove(&id);
        if self.settings.keep_running_in_background && supervisor.has_live_process() {
            supervisor.detach(generation);
            pools.background.insert(id, supervisor);
            info!(session_id = id, "client disconnected, session moved to background");
        } else {
            supervisor.stop();
            info!(session_id = id, "client disconnected, session stopped");
        }
    }

    /// Deliver user `content` to session `id`.
    ///
    /// A background session is promoted to active; a history-only session
    /// gets a supervisor that is started immediately.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if `id` resolves nowhere.
    pub fn route_message(&self, id: u64, content: Value) -> Result<()> {
        let (supervisor, fresh) = {
            let mut pools = self.lock();
            if let Some(supervisor) = pools.active.get(&id) {
                (Arc::clone(supervisor), false)
            } else if let Some(supervisor) = pools.background.remove(&id) {
                info!(session_id = id, "message for background session, promoting to active");
                supervisor.resume();
                pools.active.insert(id, Arc::clone(&supervisor));
                (supervisor, false)
            } else if let Some(record) = self.history.get(id) {
                info!(session_id = id, "message for history-only session, starting agent");
                let project = record.project_id;
                let supervisor = self.supervisor_for(id, record, project);
                pools.active.insert(id, Arc::clone(&supervisor));
                (supervisor, true)
            } else {
                return Err(AppError::NotFound(format!("session {id}")));
            }
        };

        if fresh {
            supervisor.start();
        }
        supervisor.send_user_turn(content);
        Ok(())
    }

    /// Stop session `id` in every pool. Idempotent.
    pub fn stop(&self, id: u64) -> StopOutcome {
        let (active, background) = {
            let mut pools = self.lock();
            (pools.active.remove(&id), pools.background.remove(&id))
        };

        let mut outcome = StopOutcome::NotRunning;
        if let Some(supervisor) = active {
            if supervisor.stop() {
                outcome = StopOutcome::Stopped;
            }
        }
        if let Some(supervisor) = background {
            supervisor.stop();
            outcome = StopOutcome::Stopped;
        }
        info!(session_id = id, ?outcome, "stop requested");
        outcome
    }

    /// Stop any resident supervisor for `id` and delete its history.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if `id` has no history record.
    /// - `AppError::Storage` if the snapshot cannot be written.
    pub fn delete(&self, id: u64) -> Result<()> {
        let mut pools = self.lock();
        if !self.history.contains(id) {
            return Err(AppError::NotFound(format!("session {id}")));
        }
        for supervisor in [pools.active.remove(&id), pools.background.remove(&id)]
            .into_iter()
            .flatten()
        {
            supervisor.stop();
        }
        self.history.remove(id)?;
        info!(session_id = id, "session deleted");
        Ok(())
    }

    /// Create a persisted session with no supervisor.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the snapshot cannot be written.
    pub fn create_history_only(&self, project: Option<u64>) -> Result<(u64, SessionRecord)> {
        let mut pools = self.lock();
        let id = Self::next_id(&mut pools);
        let record = SessionRecord::new(project);
        self.history.upsert(id, record.clone())?;
        info!(session_id = id, ?project, "created history-only session");
        Ok((id, record))
    }

    /// Resident supervisor for `id`, from either pool.
    #[must_use]
    pub fn resident(&self, id: u64) -> Option<Arc<Supervisor>> {
        let pools = self.lock();
        pools
            .active
            .get(&id)
            .or_else(|| pools.background.get(&id))
            .cloned()
    }

    /// Whether `id` is in the background pool.
    #[must_use]
    pub fn is_background(&self, id: u64) -> bool {
        self.lock().background.contains_key(&id)
    }

    /// Sizes of the active and background pools.
    #[must_use]
    pub fn counts(&self) -> (usize, usize) {
        let pools = self.lock();
        (pools.active.len(), pools.background.len())
    }

    /// Stop every resident supervisor.
    pub fn shutdown_all(&self) {
        let drained: Vec<Arc<Supervisor>> = {
            let mut guard = self.lock();
            let pools = &mut *guard;
            pools
                .active
                .drain()
                .chain(pools.background.drain())
                .map(|(_, supervisor)| supervisor)
                .collect()
        };
        info!(sessions = drained.len(), "stopping all sessions");
        for supervisor in drained {
            supervisor.stop();
        }
    }
}
