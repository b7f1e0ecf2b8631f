//! The poll loop: the single cooperative driver of the engine.
//!
//! One iteration per configured interval. Within an iteration, in order:
//! load state, advance the active item (fetch → classify → dispatch at most
//! one action) or assign the next queued item when idle and off cooldown,
//! persist, sleep until the next tick or cancellation. Iterations never
//! overlap: the loop blocks for the full duration of one cycle's work, so
//! no two actions are ever dispatched concurrently for the same item.
//!
//! Error discipline: nothing escapes the cycle boundary uncaught. Collaborator
//! failures are recorded as the cycle's error and retried next tick; rate
//! limits extend the sleep before the next cycle's calls; authentication
//! failure is the sole fatal condition and stops the loop with the state
//! rolled back to the last durable value.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::classifier;
use crate::config::Config;
use crate::cooldown::CooldownGate;
use crate::dispatch::{
    self, CompletionKind, DispatchContext, PlannedAction, assignment_comment, instruction_comment,
};
use crate::effects::{
    AgentCall, AgentInterpreter, CollaboratorFailure, FailureKind, PlatformEffect,
    PlatformInterpreter, PlatformResponse,
};
use crate::persistence::{StateError, StateStore};
use crate::types::{ItemStatus, LifecycleState, WorkItemId};

/// Extra delay applied before the next cycle after a rate-limit failure.
const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(120);

/// Errors that stop the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Authentication failure against a collaborator. The sole fatal
    /// condition: the loop halts with queue and cooldown state unchanged
    /// from before the failing cycle.
    #[error("authentication failure: {0}")]
    Auth(String),

    /// State persistence failed; the engine cannot guarantee durability.
    #[error("state persistence failed: {0}")]
    State(#[from] StateError),
}

/// Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// What one cycle did.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Human-readable descriptions of dispatched actions.
    pub actions: Vec<String>,

    /// The error recorded for this cycle, if any.
    pub error: Option<String>,

    /// Extra delay requested before the next cycle (rate-limit backoff).
    pub backoff: Option<Duration>,
}

/// A failure inside one cycle.
enum CycleFailure {
    /// Fatal: roll back and stop the loop.
    Fatal(String),
    /// Recorded and retried next tick.
    Recoverable {
        message: String,
        backoff: Option<Duration>,
    },
}

fn failure_from<E: CollaboratorFailure>(context: &str, err: &E) -> CycleFailure {
    match err.kind() {
        FailureKind::Auth => CycleFailure::Fatal(format!("{}: {}", context, err)),
        FailureKind::RateLimited => CycleFailure::Recoverable {
            message: format!("{}: {}", context, err),
            backoff: Some(RATE_LIMIT_BACKOFF),
        },
        _ => CycleFailure::Recoverable {
            message: format!("{}: {}", context, err),
            backoff: None,
        },
    }
}

/// The engine driver, generic over its two collaborators so tests run
/// against fakes.
pub struct Scheduler<P, A> {
    config: Config,
    store: StateStore,
    gate: CooldownGate,
    platform: P,
    agent: A,
}

impl<P, A> Scheduler<P, A>
where
    P: PlatformInterpreter,
    A: AgentInterpreter,
{
    /// Creates a scheduler over an opened state store and the two clients.
    pub fn new(config: Config, store: StateStore, platform: P, agent: A) -> Self {
        let gate = CooldownGate::new(
            config.cooldown_minutes,
            store.state().last_completion_at,
        );
        Scheduler {
            config,
            store,
            gate,
            platform,
            agent,
        }
    }

    /// Read access to the engine state (for inspection and tests).
    pub fn state(&self) -> &crate::persistence::EngineState {
        self.store.state()
    }

    /// Runs the poll loop until cancelled or a fatal error occurs.
    ///
    /// The cancellation token is observed between, never during, the ordered
    /// sub-steps of a cycle: an action in flight finishes before the loop
    /// exits, and the last durable state reflects its success or recorded
    /// failure.
    #[instrument(skip(self, shutdown), fields(repo = %self.config.repo))]
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            cooldown_minutes = self.config.cooldown_minutes,
            "Automation loop started"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let report = self.run_once().await?;
            for action in &report.actions {
                info!(action = %action, "Action dispatched");
            }
            if let Some(err) = &report.error {
                warn!(error = %err, "Cycle completed with error");
            }

            let sleep = match report.backoff {
                Some(backoff) => self.config.poll_interval.max(backoff),
                None => self.config.poll_interval,
            };
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(sleep) => {}
            }
        }

        // Flush on stop: the last durable state reflects the final cycle.
        self.store.persist()?;
        info!("Automation loop stopped");
        Ok(())
    }

    /// Executes exactly one cycle synchronously and returns its report.
    ///
    /// This is the `run-once` entry point: no background loop, no sleeping.
    #[instrument(skip(self), fields(repo = %self.config.repo))]
    pub async fn run_once(&mut self) -> Result<CycleReport> {
        let pristine = self.store.state().clone();
        let now = Utc::now();
        let mut report = CycleReport::default();
        self.store.state_mut().last_error = None;

        let outcome = self.cycle(now, &mut report).await;

        match outcome {
            Ok(()) => {}
            Err(CycleFailure::Fatal(message)) => {
                // Queue and cooldown state remain unchanged from before the
                // failing cycle; only the error is recorded.
                error!(error = %message, "Fatal failure, stopping");
                self.store.replace(pristine);
                self.store.state_mut().last_error = Some(message.clone());
                self.store.state_mut().last_poll_at = Some(now);
                self.store.persist()?;
                return Err(SchedulerError::Auth(message));
            }
            Err(CycleFailure::Recoverable { message, backoff }) => {
                self.store.state_mut().last_error = Some(message.clone());
                report.error = Some(message);
                report.backoff = backoff;
            }
        }

        self.store.state_mut().last_poll_at = Some(now);
        self.store.persist()?;
        Ok(report)
    }

    /// One cycle: advance the active item, or assign the next one.
    async fn cycle(
        &mut self,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> std::result::Result<(), CycleFailure> {
        match self.store.state().active.clone() {
            Some(id) => self.advance_active(id, now, report).await,
            None => self.try_assign_next(now, report).await,
        }
    }

    /// Fetches, classifies, and dispatches at most one action for the
    /// active item.
    async fn advance_active(
        &mut self,
        id: WorkItemId,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> std::result::Result<(), CycleFailure> {
        let Some(item) = self.store.state().items.get(&id).cloned() else {
            warn!(item = %id, "Active item unknown, clearing");
            self.store.state_mut().active = None;
            return Ok(());
        };
        let Some(issue) = item.issue else {
            warn!(item = %id, "Active item has no issue number, clearing");
            self.store.state_mut().active = None;
            return Ok(());
        };

        let effect = PlatformEffect::GetItemStatus {
            item: id.clone(),
            issue,
            pr: item.pr,
        };
        let status = match self.platform.interpret(effect).await {
            Ok(PlatformResponse::ItemStatus(status)) => status,
            Ok(_) => {
                return Err(CycleFailure::Recoverable {
                    message: "platform returned an unexpected response".to_string(),
                    backoff: None,
                });
            }
            Err(e) if e.kind() == FailureKind::NotFound => {
                // The issue or change request is gone; no retry can succeed.
                warn!(item = %id, error = %e, "Item artifact not found, failing item");
                let state = self.store.state_mut();
                if let Some(item) = state.items.get_mut(&id) {
                    item.transition_to(LifecycleState::Failed, now);
                }
                state.record_history(&id, format!("platform reports item gone: {}", e), now);
                self.execute(
                    PlannedAction::Complete {
                        item: id,
                        outcome: CompletionKind::Failed,
                    },
                    now,
                    report,
                )
                .await?;
                report.error = Some(e.to_string());
                self.store.state_mut().last_error = Some(e.to_string());
                return Ok(());
            }
            Err(e) => return Err(failure_from("fetching item status", &e)),
        };

        self.apply_classification(&id, &status, now)?;

        let Some(item) = self.store.state().items.get(&id).cloned() else {
            return Ok(());
        };

        // An active item that classified back to Queued (assignment lost)
        // returns to the pending pool.
        if item.state == LifecycleState::Queued {
            info!(item = %id, "Assignment lost, item returned to queue");
            let state = self.store.state_mut();
            state.active = None;
            state.record_history(&id, "assignment lost, requeued", now);
            return Ok(());
        }

        let ctx = DispatchContext {
            auto_merge: self.config.auto_merge,
            skip_final_review: self.config.skip_final_review,
            agent_login: &self.config.agent_login,
        };
        if let Some(action) = dispatch::plan_item_action(&item, status.change_request.as_ref(), &ctx)
        {
            self.execute(action, now, report).await?;
        } else {
            debug!(item = %id, state = %item.state, "No action for this cycle");
        }
        Ok(())
    }

    /// Applies the classifier's verdict to the active item.
    ///
    /// A classification failure freezes the item in its previous persisted
    /// state for this cycle; the error is recorded and the cycle's remaining
    /// bookkeeping proceeds.
    fn apply_classification(
        &mut self,
        id: &WorkItemId,
        status: &ItemStatus,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), CycleFailure> {
        let new_state = match classifier::classify(status) {
            Ok(state) => state,
            Err(e) => {
                return Err(CycleFailure::Recoverable {
                    message: format!("classification failed for {}: {}", id, e),
                    backoff: None,
                });
            }
        };

        let state = self.store.state_mut();
        let Some(item) = state.items.get_mut(id) else {
            return Ok(());
        };
        if let Some(cr) = &status.change_request {
            item.pr = Some(cr.number);
        }
        if item.transition_to(new_state, now) {
            info!(item = %id, state = %new_state, "Lifecycle transition");
            state.record_history(id, format!("state: {}", new_state), now);
        }
        Ok(())
    }

    /// Assigns the head-of-queue item when idle, queue non-empty, automation
    /// enabled, and the cooldown gate permits.
    async fn try_assign_next(
        &mut self,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> std::result::Result<(), CycleFailure> {
        let permitted = self.gate.permitted(now);
        let plan = dispatch::plan_assignment(
            self.store.state(),
            self.config.auto_assign_next,
            permitted,
        );

        match plan {
            Some(action) => self.execute(action, now, report).await,
            None => {
                if !self.store.state().queue.is_empty() && !permitted {
                    debug!(
                        remaining_mins = self
                            .gate
                            .remaining(now)
                            .map(|d| d.num_minutes())
                            .unwrap_or(0),
                        "Cooldown active, assignment deferred"
                    );
                }
                Ok(())
            }
        }
    }

    /// Executes one planned action against the collaborators and applies its
    /// state advance. A failed action leaves the state unchanged; the error
    /// is recorded and the action retried next poll.
    async fn execute(
        &mut self,
        action: PlannedAction,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> std::result::Result<(), CycleFailure> {
        match action {
            PlannedAction::Assign { item, issue } => {
                let call = AgentCall::assign_to_issue(&self.config.repo, issue);
                self.agent
                    .invoke(call)
                    .await
                    .map_err(|e| failure_from("assigning agent", &e))?;

                if !self.config.agent_instructions.trim().is_empty() {
                    let body = assignment_comment(
                        &self.config.target_branch,
                        &self.config.agent_instructions,
                    );
                    self.platform
                        .interpret(PlatformEffect::CommentOnIssue { issue, body })
                        .await
                        .map_err(|e| failure_from("posting assignment instructions", &e))?;
                }

                let state = self.store.state_mut();
                if let Some(entry) = state.items.get_mut(&item) {
                    entry.transition_to(LifecycleState::Assigned, now);
                    entry.assigned_at = Some(now);
                }
                state.active = Some(item.clone());
                state.record_history(&item, "assigned to agent", now);
                report
                    .actions
                    .push(format!("assigned {} (issue {}) to agent", item, issue));
            }

            PlannedAction::ReassignReview { item, pr } => {
                let call = AgentCall::request_review(&self.config.repo, pr);
                self.agent
                    .invoke(call)
                    .await
                    .map_err(|e| failure_from("reassigning review", &e))?;

                self.store
                    .state_mut()
                    .record_history(&item, "review reassigned to agent", now);
                report
                    .actions
                    .push(format!("reassigned review of {} to agent", pr));
            }

            PlannedAction::PostInstruction {
                item,
                pr,
                revision,
            } => {
                let body = instruction_comment(&self.config.agent_login, revision);
                self.platform
                    .interpret(PlatformEffect::CommentOnChangeRequest { pr, body })
                    .await
                    .map_err(|e| failure_from("posting instruction comment", &e))?;

                let state = self.store.state_mut();
                if let Some(entry) = state.items.get_mut(&item) {
                    entry.last_instruction_revision = Some(revision);
                    entry.transition_to(LifecycleState::ApplyRequested, now);
                }
                state.record_history(&item, format!("instruction posted (revision {})", revision), now);
                report
                    .actions
                    .push(format!("posted instruction comment on {}", pr));
            }

            PlannedAction::MarkReady { item, pr } => {
                self.platform
                    .interpret(PlatformEffect::MarkReadyForReview { pr })
                    .await
                    .map_err(|e| failure_from("marking ready for review", &e))?;

                self.store
                    .state_mut()
                    .record_history(&item, "marked ready for review", now);
                report.actions.push(format!("marked {} ready for review", pr));
            }

            PlannedAction::Merge { item, pr } => {
                self.platform
                    .interpret(PlatformEffect::Merge { pr })
                    .await
                    .map_err(|e| failure_from("merging change request", &e))?;

                let state = self.store.state_mut();
                if let Some(entry) = state.items.get_mut(&item) {
                    entry.transition_to(LifecycleState::Merged, now);
                }
                state.record_history(&item, "merged", now);
                report.actions.push(format!("merged {}", pr));
            }

            PlannedAction::Complete { item, outcome } => {
                // Local bookkeeping only; no collaborator calls.
                let terminal = match outcome {
                    CompletionKind::Merged => {
                        // Record the completion exactly once, synchronously
                        // with the merged-to-done transition.
                        self.gate.record(now);
                        LifecycleState::Done
                    }
                    CompletionKind::Closed => LifecycleState::Closed,
                    CompletionKind::Failed => LifecycleState::Failed,
                };

                let state = self.store.state_mut();
                state.last_completion_at = self.gate.last_completion_at();
                if let Some(entry) = state.items.get_mut(&item) {
                    entry.transition_to(terminal, now);
                }
                if state.queue.contains(&item) {
                    let _ = state.queue.remove(&item);
                }
                state.active = None;
                state.record_history(&item, format!("completed ({:?})", outcome), now);
                report.actions.push(format!("completed {}", item));
            }
        }
        Ok(())
    }
}
