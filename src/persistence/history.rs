//! Session history store backed by `sessions.json`.
//!
//! The file is a JSON object keyed by decimal session id. The in-memory map
//! is authoritative; snapshot writes are serialised by a writer lock and
//! each one captures the map as it is when the write begins, so the last
//! write to finish always carries the newest state.
//!
//! [`HistoryStore::stage`] is the hot path used while an agent streams: it
//! updates memory under a short lock and hands the file write to tokio's
//! blocking pool.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::models::session::{SessionRecord, SessionSummary};
use crate::persistence::snapshot;
use crate::Result;

/// Durable map of session id to history record.
#[derive(Debug)]
pub struct HistoryStore {
    path: Option<PathBuf>,
    records: Mutex<BTreeMap<u64, SessionRecord>>,
    writer: Mutex<()>,
    write_queued: AtomicBool,
}

impl HistoryStore {
    /// Load the snapshot at `path`; a missing file starts empty.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the file cannot be read or parsed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records: BTreeMap<u64, SessionRecord> = snapshot::read_json(&path)?;
        info!(path = %path.display(), sessions = records.len(), "session history loaded");
        Ok(Self {
            path: Some(path),
            records: Mutex::new(records),
            writer: Mutex::new(()),
            write_queued: AtomicBool::new(false),
        })
    }

    /// Store with no backing file.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: Mutex::new(BTreeMap::new()),
            writer: Mutex::new(()),
            write_queued: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, SessionRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `mutate` to the map and write the resulting snapshot.
    ///
    /// The map lock is released before any file I/O.
    fn mutate_and_write<T>(
        &self,
        mutate: impl FnOnce(&mut BTreeMap<u64, SessionRecord>) -> T,
    ) -> Result<T> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_queued.store(false, Ordering::SeqCst);
        let (outcome, copy) = {
            let mut records = self.lock();
            let outcome = mutate(&mut records);
            let copy = self.path.as_ref().map(|_| records.clone());
            (outcome, copy)
        };
        if let (Some(path), Some(records)) = (&self.path, copy) {
            snapshot::write_json(path, &records)?;
            debug!(path = %path.display(), sessions = records.len(), "session history saved");
        }
        Ok(outcome)
    }

    /// Write the current contents to disk.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the snapshot cannot be written.
    pub fn sync(&self) -> Result<()> {
        self.mutate_and_write(|_| ())
    }

    /// Update the record for `id` in memory and persist it in the background.
    ///
    /// Bursts coalesce: while a write is queued and has not started, further
    /// stages ride on it. Outside a tokio runtime the write happens inline.
    /// Write failures are logged; the in-memory record stays updated.
    pub fn stage(self: &Arc<Self>, id: u64, record: SessionRecord) {
        self.lock().insert(id, record);
        if self.path.is_none() || self.write_queued.swap(true, Ordering::SeqCst) {
            return;
        }
        let store = Arc::clone(self);
        let write = move || {
            if let Err(err) = store.sync() {
                warn!(session_id = id, %err, "failed to persist session history");
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => drop(handle.spawn_blocking(write)),
            Err(_) => write(),
        }
    }

    /// Largest persisted session id, `0` when empty.
    #[must_use]
    pub fn max_id(&self) -> u64 {
        self.lock().keys().next_back().copied().unwrap_or(0)
    }

    /// Clone of the record for `id`.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<SessionRecord> {
        self.lock().get(&id).cloned()
    }

    /// Whether a record for `id` exists.
    #[must_use]
    pub fn contains(&self, id: u64) -> bool {
        self.lock().contains_key(&id)
    }

    /// Insert or replace the record for `id` and persist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the snapshot cannot be written. The
    /// in-memory record is updated regardless.
    pub fn upsert(&self, id: u64, record: SessionRecord) -> Result<()> {
        self.mutate_and_write(|records| {
            records.insert(id, record);
        })
    }

    /// Remove the record for `id` and persist. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the snapshot cannot be written.
    pub fn remove(&self, id: u64) -> Result<bool> {
        self.mutate_and_write(|records| records.remove(&id).is_some())
    }

    /// Summaries bound to `project_id` (or unbound when `None`), newest
    /// `updated_at` first.
    #[must_use]
    pub fn list(&self, project_id: Option<u64>) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .lock()
            .iter()
            .filter(|(_, record)| record.project_id == project_id)
            .map(|(id, record)| SessionSummary::from_record(*id, record))
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        summaries
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
