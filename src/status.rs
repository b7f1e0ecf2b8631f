//! Status reporting over the persisted state.
//!
//! Status is assembled purely from snapshot reads of the last durable
//! engine state plus a pid liveness probe, never from in-progress
//! mutations, so it is safe to run while the daemon owns the state.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::persistence::{self, StateError, StateLock};
use crate::types::{LifecycleState, PrNumber, WorkItemId};

/// The active item, as reported.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveItemReport {
    pub id: WorkItemId,
    pub state: LifecycleState,
    pub pr: Option<PrNumber>,
}

/// Cooldown gate status, as reported.
#[derive(Debug, Clone, Serialize)]
pub struct CooldownReport {
    pub last_completion_at: Option<DateTime<Utc>>,
    pub remaining_minutes: Option<i64>,
}

/// Everything `status` reports.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub running: bool,
    pub pid: Option<u32>,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub active: Option<ActiveItemReport>,
    pub queue_length: usize,
    pub completed: usize,
    pub cooldown: CooldownReport,
}

/// Gathers a status report from the state directory.
pub fn gather(state_dir: &Path, cooldown_minutes: u64) -> Result<StatusReport, StateError> {
    let pid = StateLock::current_owner(state_dir);
    let snapshot = persistence::read_snapshot(state_dir)?;

    let report = match snapshot {
        Some(state) => {
            let now = Utc::now();
            let gate = crate::cooldown::CooldownGate::new(cooldown_minutes, state.last_completion_at);
            StatusReport {
                running: pid.is_some(),
                pid,
                last_poll_at: state.last_poll_at,
                last_error: state.last_error.clone(),
                active: state.active_item().map(|item| ActiveItemReport {
                    id: item.id.clone(),
                    state: item.state,
                    pr: item.pr,
                }),
                queue_length: state.queue.len(),
                completed: state
                    .items
                    .values()
                    .filter(|item| item.state.is_terminal())
                    .count(),
                cooldown: CooldownReport {
                    last_completion_at: state.last_completion_at,
                    remaining_minutes: gate.remaining(now).map(|d| d.num_minutes()),
                },
            }
        }
        None => StatusReport {
            running: pid.is_some(),
            pid,
            last_poll_at: None,
            last_error: None,
            active: None,
            queue_length: 0,
            completed: 0,
            cooldown: CooldownReport {
                last_completion_at: None,
                remaining_minutes: None,
            },
        },
    };
    Ok(report)
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.running, self.pid) {
            (true, Some(pid)) => writeln!(f, "running (pid {})", pid)?,
            _ => writeln!(f, "not running")?,
        }
        match &self.last_poll_at {
            Some(at) => writeln!(f, "last poll:   {}", at.to_rfc3339())?,
            None => writeln!(f, "last poll:   never")?,
        }
        match &self.active {
            Some(active) => {
                write!(f, "active item: {} ({})", active.id, active.state)?;
                match active.pr {
                    Some(pr) => writeln!(f, ", change request {}", pr)?,
                    None => writeln!(f)?,
                }
            }
            None => writeln!(f, "active item: none")?,
        }
        writeln!(f, "queued:      {}", self.queue_length)?;
        writeln!(f, "completed:   {}", self.completed)?;
        match self.cooldown.remaining_minutes {
            Some(mins) => writeln!(f, "cooldown:    {} minutes remaining", mins)?,
            None => writeln!(f, "cooldown:    clear")?,
        }
        if let Some(err) = &self.last_error {
            writeln!(f, "last error:  {}", err)?;
        }
        Ok(())
    }
}
