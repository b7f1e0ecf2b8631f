//! Durable engine state: the persisted aggregate and its store.
//!
//! All mutable engine state lives in one schema-versioned JSON snapshot:
//! queue order, per-item lifecycle, the active item, the cooldown timestamp,
//! the last poll time, and the last error. The snapshot is written atomically
//! (write temp, fsync, rename, fsync directory), so readers always see either
//! the old or the new state, never a partial write.
//!
//! Exclusive ownership is enforced with a pid file: only one process may
//! mutate the snapshot at a time.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::queue::WorkQueue;
use crate::types::{HistoryEntry, LifecycleState, WorkItem, WorkItemId};

use super::fsync::{fsync_dir, fsync_file};

/// Current schema version. Increment on breaking changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Snapshot filename inside the state directory.
const STATE_FILE: &str = "state.json";

/// Pid filename used for exclusive ownership.
const PID_FILE: &str = "agent-queue.pid";

/// Maximum history entries retained per item.
const MAX_HISTORY_PER_ITEM: usize = 50;

/// Errors from state persistence.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },

    #[error("state is owned by another process (pid {0})")]
    AlreadyOwned(u32),

    #[error(
        "persisted state violates single-item-in-flight: items {0:?} are all in flight"
    )]
    MultipleInFlight(Vec<WorkItemId>),
}

/// Result type for state persistence.
pub type Result<T> = std::result::Result<T, StateError>;

/// The persisted aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineState {
    /// Schema version for forward-compatible migrations.
    pub schema_version: u32,

    /// Ordered ids of items not yet terminal; head is the next assignment
    /// candidate.
    pub queue: WorkQueue,

    /// All known items, including terminal ones, keyed by id.
    pub items: BTreeMap<WorkItemId, WorkItem>,

    /// The single item currently in flight, if any.
    pub active: Option<WorkItemId>,

    /// When the last item completed (starts the cooldown window).
    pub last_completion_at: Option<DateTime<Utc>>,

    /// When the last poll cycle ran.
    pub last_poll_at: Option<DateTime<Utc>>,

    /// The last cycle error, if the most recent cycle recorded one.
    pub last_error: Option<String>,

    /// Bounded per-item action history for status display.
    #[serde(default)]
    pub history: BTreeMap<WorkItemId, Vec<HistoryEntry>>,
}

impl EngineState {
    /// Creates an empty first-run state.
    pub fn empty() -> Self {
        EngineState {
            schema_version: SCHEMA_VERSION,
            queue: WorkQueue::new(),
            items: BTreeMap::new(),
            active: None,
            last_completion_at: None,
            last_poll_at: None,
            last_error: None,
            history: BTreeMap::new(),
        }
    }

    /// Returns the active work item, if one is in flight.
    pub fn active_item(&self) -> Option<&WorkItem> {
        self.active.as_ref().and_then(|id| self.items.get(id))
    }

    /// Appends a history entry for an item, trimming to the retention cap.
    pub fn record_history(&mut self, id: &WorkItemId, event: impl Into<String>, now: DateTime<Utc>) {
        let (state, pr) = match self.items.get(id) {
            Some(item) => (item.state, item.pr),
            None => (LifecycleState::Queued, None),
        };
        let entries = self.history.entry(id.clone()).or_default();
        entries.push(HistoryEntry {
            at: now,
            event: event.into(),
            state,
            pr,
        });
        if entries.len() > MAX_HISTORY_PER_ITEM {
            let excess = entries.len() - MAX_HISTORY_PER_ITEM;
            entries.drain(..excess);
        }
    }

    /// Checks the single-item-in-flight invariant.
    pub fn check_single_flight(&self) -> Result<()> {
        let in_flight: Vec<WorkItemId> = self
            .items
            .values()
            .filter(|item| item.state.is_in_flight())
            .map(|item| item.id.clone())
            .collect();
        if in_flight.len() > 1 {
            return Err(StateError::MultipleInFlight(in_flight));
        }
        Ok(())
    }

    /// Enqueues configured items that the state does not know yet.
    ///
    /// First run seeds the whole queue; later runs append new config entries
    /// at the tail, preserving the persisted order of existing items.
    fn absorb_config(&mut self, config: &Config) {
        for id in &config.issue_queue {
            if self.items.contains_key(id) {
                continue;
            }
            let item = WorkItem::queued(id.clone(), config.issue_number_for(id));
            // Infallible: absent from items implies absent from the queue.
            if self.queue.enqueue(id.clone()).is_ok() {
                self.items.insert(id.clone(), item);
                debug!(item = %id, "Enqueued item from configuration");
            }
        }
    }
}

// ─── Store ────────────────────────────────────────────────────────────────────

/// Owner of the persisted engine state.
///
/// The scheduler is the only writer; everything else takes snapshot reads of
/// the last durable value via [`read_snapshot`].
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: EngineState,
}

impl StateStore {
    /// Loads the state from the configured directory, creating a first-run
    /// state when none exists, and absorbs new queue entries from config.
    pub fn open(config: &Config) -> Result<Self> {
        let path = config.state_dir.join(STATE_FILE);
        let mut state = match try_load(&path)? {
            Some(state) => {
                debug!(path = %path.display(), "Loaded persisted state");
                state
            }
            None => {
                info!(path = %path.display(), "No persisted state, starting fresh");
                EngineState::empty()
            }
        };
        state.absorb_config(config);
        state.check_single_flight()?;
        Ok(StateStore { path, state })
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut EngineState {
        &mut self.state
    }

    /// Replaces the in-memory state (used to roll back a failed cycle).
    pub fn replace(&mut self, state: EngineState) {
        self.state = state;
    }

    /// Persists the state atomically.
    pub fn persist(&self) -> Result<()> {
        save_atomic(&self.path, &self.state)
    }
}

/// Reads the last durable state without taking ownership.
///
/// Returns `None` when no state has been persisted yet.
pub fn read_snapshot(state_dir: &Path) -> Result<Option<EngineState>> {
    try_load(&state_dir.join(STATE_FILE))
}

/// Deletes the persisted state. Explicit reset only.
pub fn reset(state_dir: &Path) -> Result<()> {
    let path = state_dir.join(STATE_FILE);
    match std::fs::remove_file(&path) {
        Ok(()) => {
            info!(path = %path.display(), "Persisted state deleted");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn try_load(path: &Path) -> Result<Option<EngineState>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let state: EngineState = serde_json::from_slice(&bytes)?;
    if state.schema_version != SCHEMA_VERSION {
        return Err(StateError::SchemaMismatch {
            expected: SCHEMA_VERSION,
            got: state.schema_version,
        });
    }
    Ok(Some(state))
}

/// Saves the state atomically: write temp, fsync, rename, fsync directory.
fn save_atomic(path: &Path, state: &EngineState) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(state)?;

    {
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&bytes)?;
        fsync_file(&file)?;
    }

    std::fs::rename(&tmp_path, path)?;
    if let Some(parent) = path.parent() {
        fsync_dir(parent)?;
    }
    Ok(())
}

// ─── Ownership Lock ───────────────────────────────────────────────────────────

/// Exclusive ownership of the persisted state, held via a pid file.
///
/// Acquisition fails when another live process holds the file. A stale pid
/// file (the process is gone) is replaced. The file is removed on drop.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
}

impl StateLock {
    /// Acquires exclusive ownership of the state directory.
    pub fn acquire(state_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_dir)?;
        let path = state_dir.join(PID_FILE);

        if let Some(pid) = read_pid(&path) {
            if process_alive(pid) {
                return Err(StateError::AlreadyOwned(pid));
            }
            warn!(pid, "Removing stale pid file");
            let _ = std::fs::remove_file(&path);
        }

        std::fs::write(&path, std::process::id().to_string())?;
        Ok(StateLock { path })
    }

    /// Returns the pid of the current owner, if a live one exists.
    pub fn current_owner(state_dir: &Path) -> Option<u32> {
        let pid = read_pid(&state_dir.join(PID_FILE))?;
        process_alive(pid).then_some(pid)
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Best-effort liveness probe for a pid.
fn process_alive(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }
    #[cfg(target_os = "linux")]
    {
        Path::new(&format!("/proc/{}", pid)).exists()
    }
    #[cfg(not(target_os = "linux"))]
    {
        // No portable liveness probe; assume alive and let the operator
        // remove the pid file if the process is truly gone.
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IssueNumber, LifecycleState};
    use tempfile::tempdir;

    fn test_config(dir: &Path, queue: &[&str]) -> Config {
        let yaml = format!(
            "owner: acme\nrepo: widgets\nstate_dir: {}\nissue_queue: [{}]\n\
             issue_numbers:\n  TC-A-01: 11\n  TC-A-02: 12\n",
            dir.display(),
            queue.join(", ")
        );
        let path = dir.join("config.yaml");
        std::fs::write(&path, yaml).unwrap();
        Config::load(&path).unwrap()
    }

    #[test]
    fn first_run_seeds_queue_from_config() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path(), &["TC-A-01", "TC-A-02"]);

        let store = StateStore::open(&config).unwrap();
        let ids: Vec<_> = store.state().queue.iter().cloned().collect();
        assert_eq!(ids, vec![WorkItemId::from("TC-A-01"), WorkItemId::from("TC-A-02")]);
        assert_eq!(
            store.state().items[&WorkItemId::from("TC-A-01")].issue,
            Some(IssueNumber(11))
        );
        assert!(store.state().active.is_none());
    }

    #[test]
    fn persisted_order_survives_restart() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path(), &["TC-A-01", "TC-A-02"]);

        let mut store = StateStore::open(&config).unwrap();
        store
            .state_mut()
            .queue
            .reorder(&WorkItemId::from("TC-A-02"), 0)
            .unwrap();
        store.persist().unwrap();
        drop(store);

        let store = StateStore::open(&config).unwrap();
        let ids: Vec<_> = store.state().queue.iter().cloned().collect();
        assert_eq!(ids, vec![WorkItemId::from("TC-A-02"), WorkItemId::from("TC-A-01")]);
    }

    #[test]
    fn reopening_absorbs_only_new_config_items() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path(), &["TC-A-01"]);
        let store = StateStore::open(&config).unwrap();
        store.persist().unwrap();
        drop(store);

        let config = test_config(dir.path(), &["TC-A-01", "TC-A-02"]);
        let store = StateStore::open(&config).unwrap();
        let ids: Vec<_> = store.state().queue.iter().cloned().collect();
        assert_eq!(ids, vec![WorkItemId::from("TC-A-01"), WorkItemId::from("TC-A-02")]);
    }

    #[test]
    fn single_flight_violation_is_rejected_on_load() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path(), &["TC-A-01", "TC-A-02"]);
        let mut store = StateStore::open(&config).unwrap();

        let now = Utc::now();
        for id in ["TC-A-01", "TC-A-02"] {
            store
                .state_mut()
                .items
                .get_mut(&WorkItemId::from(id))
                .unwrap()
                .transition_to(LifecycleState::Assigned, now);
        }
        store.persist().unwrap();
        drop(store);

        let err = StateStore::open(&config).unwrap_err();
        assert!(matches!(err, StateError::MultipleInFlight(_)));
    }

    #[test]
    fn history_is_capped() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path(), &["TC-A-01"]);
        let mut store = StateStore::open(&config).unwrap();

        let id = WorkItemId::from("TC-A-01");
        let now = Utc::now();
        for i in 0..80 {
            store
                .state_mut()
                .record_history(&id, format!("event {}", i), now);
        }

        let entries = &store.state().history[&id];
        assert_eq!(entries.len(), MAX_HISTORY_PER_ITEM);
        assert_eq!(entries.first().unwrap().event, "event 30");
        assert_eq!(entries.last().unwrap().event, "event 79");
    }

    #[test]
    fn read_snapshot_returns_none_before_first_persist() {
        let dir = tempdir().unwrap();
        assert!(read_snapshot(dir.path()).unwrap().is_none());
    }

    #[test]
    fn reset_removes_state() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path(), &["TC-A-01"]);
        let store = StateStore::open(&config).unwrap();
        store.persist().unwrap();
        drop(store);

        assert!(read_snapshot(dir.path()).unwrap().is_some());
        reset(dir.path()).unwrap();
        assert!(read_snapshot(dir.path()).unwrap().is_none());

        // Resetting twice is fine.
        reset(dir.path()).unwrap();
    }

    #[test]
    fn lock_excludes_second_acquisition() {
        let dir = tempdir().unwrap();
        let lock = StateLock::acquire(dir.path()).unwrap();

        let err = StateLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, StateError::AlreadyOwned(pid) if pid == std::process::id()));

        drop(lock);
        let lock = StateLock::acquire(dir.path()).unwrap();
        drop(lock);
    }

    #[test]
    fn current_owner_reports_live_holder() {
        let dir = tempdir().unwrap();
        assert_eq!(StateLock::current_owner(dir.path()), None);

        let lock = StateLock::acquire(dir.path()).unwrap();
        assert_eq!(
            StateLock::current_owner(dir.path()),
            Some(std::process::id())
        );
        drop(lock);
        assert_eq!(StateLock::current_owner(dir.path()), None);
    }
}
