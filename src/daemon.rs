//! Process control: the daemon lifecycle around the scheduler.
//!
//! One process owns the persisted state at a time, via the pid-file lock.
//! Stop is cooperative: the `stop` command drops a marker file next to the
//! state; a watcher task inside the running daemon notices it between sleep
//! slices and cancels the scheduler's token, so the in-flight cycle always
//! finishes before the loop exits. Ctrl-C cancels the same token.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::{AgentApiError, AgentHttpClient};
use crate::config::{Config, ConfigError};
use crate::github::OctocrabClient;
use crate::persistence::{StateError, StateLock, StateStore};
use crate::scheduler::{CycleReport, Scheduler, SchedulerError};

/// Marker file requesting a cooperative stop.
const STOP_MARKER: &str = "stop.request";

/// How often the watcher checks for the stop marker.
const STOP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Errors from daemon operations.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Queue(#[from] crate::queue::QueueError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("platform client construction failed: {0}")]
    Platform(#[from] octocrab::Error),

    #[error("agent client construction failed: {0}")]
    Agent(#[from] AgentApiError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for daemon operations.
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Outcome of a `start` request.
#[derive(Debug)]
pub enum StartOutcome {
    /// Another instance already owns the state; starting was a no-op.
    AlreadyRunning(u32),

    /// The loop ran and stopped cleanly.
    Stopped,
}

/// Outcome of a `stop` request.
#[derive(Debug, PartialEq, Eq)]
pub enum StopOutcome {
    /// No instance is running; stopping was a no-op.
    NotRunning,

    /// The running instance (pid) was asked to stop after its current cycle.
    Requested(u32),
}

fn stop_marker_path(state_dir: &Path) -> PathBuf {
    state_dir.join(STOP_MARKER)
}

/// Returns the pid of a running instance, if any.
pub fn running_instance(state_dir: &Path) -> Option<u32> {
    StateLock::current_owner(state_dir)
}

/// Starts the automation loop in the foreground.
///
/// Starting while another instance owns the state is a no-op that reports
/// the existing instance. The loop runs until a stop request, Ctrl-C, or a
/// fatal authentication failure.
pub async fn start(config: Config) -> Result<StartOutcome> {
    if let Some(pid) = running_instance(&config.state_dir) {
        warn!(pid, "An instance is already running");
        return Ok(StartOutcome::AlreadyRunning(pid));
    }

    let token = Config::github_token()?;
    let lock = StateLock::acquire(&config.state_dir)?;

    // A leftover marker from a previous run must not stop us immediately.
    let marker = stop_marker_path(&config.state_dir);
    let _ = std::fs::remove_file(&marker);

    let store = StateStore::open(&config)?;
    let platform = OctocrabClient::from_token(token.clone(), config.repo.clone())?;
    let agent = AgentHttpClient::new(config.agent_endpoint.clone(), token)?;

    let shutdown = CancellationToken::new();
    spawn_stop_watcher(marker.clone(), shutdown.clone());
    spawn_ctrl_c_handler(shutdown.clone());

    let scheduler = Scheduler::new(config, store, platform, agent);
    let result = scheduler.run(shutdown.clone()).await;

    // Wind down the watcher tasks and clean up the marker either way.
    shutdown.cancel();
    let _ = std::fs::remove_file(&marker);
    drop(lock);

    result?;
    Ok(StartOutcome::Stopped)
}

/// Executes exactly one poll cycle and returns its report.
///
/// Takes the same exclusive ownership as `start`; fails if an instance is
/// running.
pub async fn run_once(config: Config) -> Result<CycleReport> {
    let token = Config::github_token()?;
    let lock = StateLock::acquire(&config.state_dir)?;

    let store = StateStore::open(&config)?;
    let platform = OctocrabClient::from_token(token.clone(), config.repo.clone())?;
    let agent = AgentHttpClient::new(config.agent_endpoint.clone(), token)?;

    let mut scheduler = Scheduler::new(config, store, platform, agent);
    let result = scheduler.run_once().await;
    drop(lock);
    Ok(result?)
}

/// Requests a running instance to stop after its current cycle.
///
/// Stopping a non-running instance is a no-op.
pub fn request_stop(state_dir: &Path) -> Result<StopOutcome> {
    match running_instance(state_dir) {
        Some(pid) => {
            std::fs::write(stop_marker_path(state_dir), b"stop\n")?;
            info!(pid, "Stop requested");
            Ok(StopOutcome::Requested(pid))
        }
        None => Ok(StopOutcome::NotRunning),
    }
}

/// Watches for the stop marker and cancels the scheduler when it appears.
fn spawn_stop_watcher(marker: PathBuf, shutdown: CancellationToken) {
    tokio::spawn(async move {
        loop {
            if shutdown.is_cancelled() {
                break;
            }
            if marker.exists() {
                info!("Stop marker observed, cancelling loop");
                shutdown.cancel();
                break;
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
    });
}

/// Cancels the scheduler on Ctrl-C.
fn spawn_ctrl_c_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling loop");
            shutdown.cancel();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn stop_without_running_instance_is_noop() {
        let dir = tempdir().unwrap();
        assert_eq!(request_stop(dir.path()).unwrap(), StopOutcome::NotRunning);
        assert!(!stop_marker_path(dir.path()).exists());
    }

    #[test]
    fn stop_with_live_owner_writes_marker() {
        let dir = tempdir().unwrap();
        let lock = StateLock::acquire(dir.path()).unwrap();

        let outcome = request_stop(dir.path()).unwrap();
        assert_eq!(outcome, StopOutcome::Requested(std::process::id()));
        assert!(stop_marker_path(dir.path()).exists());

        drop(lock);
    }

    #[tokio::test]
    async fn stop_watcher_cancels_on_marker() {
        let dir = tempdir().unwrap();
        let marker = stop_marker_path(dir.path());
        let shutdown = CancellationToken::new();

        spawn_stop_watcher(marker.clone(), shutdown.clone());
        std::fs::write(&marker, b"stop\n").unwrap();

        tokio::time::timeout(Duration::from_secs(5), shutdown.cancelled())
            .await
            .expect("watcher cancels after marker appears");
    }
}
