//! Work item lifecycle types.
//!
//! A work item is one queued unit of work. Its canonical lifecycle is an
//! explicit tagged enum; every transition the engine makes goes through this
//! type, never through ad hoc flag combinations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{IssueNumber, PrNumber, WorkItemId};

/// The canonical lifecycle stage of a work item.
///
/// Main path:
/// `Queued → Assigned → PrOpen → ReviewRequested → ChangesRequested →
/// ApplyRequested → (back to ReviewRequested) → Approved → Merged → Done`.
///
/// `Closed` and `Failed` are side branches reachable from any non-terminal
/// state. `Done`, `Closed`, and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// In the queue, not yet started.
    Queued,

    /// Assigned to the agent; no change request exists yet.
    Assigned,

    /// The agent opened a change request (possibly still a draft).
    PrOpen,

    /// A review is pending on the change request.
    ReviewRequested,

    /// The latest review requested changes and no instruction has been
    /// issued for this revision yet.
    ChangesRequested,

    /// The instruction comment for the current revision has been posted;
    /// waiting for the agent to apply the changes.
    ApplyRequested,

    /// The latest review approved the change request.
    Approved,

    /// The change request was merged; completion bookkeeping still pending.
    Merged,

    /// Merged and fully processed. Terminal.
    Done,

    /// The issue or change request was closed without a merge. Terminal.
    Closed,

    /// A permanent failure occurred for this item. Terminal.
    Failed,
}

impl LifecycleState {
    /// Returns true for `Done`, `Closed`, and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleState::Done | LifecycleState::Closed | LifecycleState::Failed
        )
    }

    /// Returns true if the item counts against the single-item-in-flight
    /// invariant (neither queued nor terminal).
    pub fn is_in_flight(&self) -> bool {
        !self.is_terminal() && !matches!(self, LifecycleState::Queued)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleState::Queued => "queued",
            LifecycleState::Assigned => "assigned",
            LifecycleState::PrOpen => "pr_open",
            LifecycleState::ReviewRequested => "review_requested",
            LifecycleState::ChangesRequested => "changes_requested",
            LifecycleState::ApplyRequested => "apply_requested",
            LifecycleState::Approved => "approved",
            LifecycleState::Merged => "merged",
            LifecycleState::Done => "done",
            LifecycleState::Closed => "closed",
            LifecycleState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// One queued unit of work and its progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Opaque operator-chosen identifier.
    pub id: WorkItemId,

    /// The platform issue backing this item, once known.
    pub issue: Option<IssueNumber>,

    /// Canonical lifecycle stage.
    pub state: LifecycleState,

    /// The change request the agent opened for this item, once discovered.
    pub pr: Option<PrNumber>,

    /// When the item was assigned to the agent.
    pub assigned_at: Option<DateTime<Utc>>,

    /// When the lifecycle state last changed.
    pub last_transition_at: Option<DateTime<Utc>>,

    /// Highest change-request revision an instruction comment was posted
    /// for. Backs the comment dedup guard even when the platform has not yet
    /// surfaced the posted comment.
    #[serde(default)]
    pub last_instruction_revision: Option<u32>,
}

impl WorkItem {
    /// Creates a fresh queued item.
    pub fn queued(id: WorkItemId, issue: Option<IssueNumber>) -> Self {
        WorkItem {
            id,
            issue,
            state: LifecycleState::Queued,
            pr: None,
            assigned_at: None,
            last_transition_at: None,
            last_instruction_revision: None,
        }
    }

    /// Moves the item to a new lifecycle state, stamping the transition time.
    ///
    /// A no-op when the state is unchanged, so `last_transition_at` reflects
    /// actual transitions rather than poll cadence.
    pub fn transition_to(&mut self, state: LifecycleState, now: DateTime<Utc>) -> bool {
        if self.state == state {
            return false;
        }
        self.state = state;
        self.last_transition_at = Some(now);
        true
    }
}

/// One timestamped entry in a work item's action history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub at: DateTime<Utc>,
    pub event: String,
    pub state: LifecycleState,
    pub pr: Option<PrNumber>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(LifecycleState::Done.is_terminal());
        assert!(LifecycleState::Closed.is_terminal());
        assert!(LifecycleState::Failed.is_terminal());
        assert!(!LifecycleState::Queued.is_terminal());
        assert!(!LifecycleState::Merged.is_terminal());
    }

    #[test]
    fn in_flight_excludes_queued_and_terminal() {
        assert!(!LifecycleState::Queued.is_in_flight());
        assert!(!LifecycleState::Done.is_in_flight());
        assert!(LifecycleState::Assigned.is_in_flight());
        assert!(LifecycleState::Approved.is_in_flight());
        assert!(LifecycleState::Merged.is_in_flight());
    }

    #[test]
    fn transition_stamps_time_only_on_change() {
        let mut item = WorkItem::queued(WorkItemId::from("TC-A-01"), Some(IssueNumber(7)));
        let t0 = Utc::now();

        assert!(item.transition_to(LifecycleState::Assigned, t0));
        assert_eq!(item.last_transition_at, Some(t0));

        let t1 = t0 + chrono::Duration::seconds(10);
        assert!(!item.transition_to(LifecycleState::Assigned, t1));
        assert_eq!(item.last_transition_at, Some(t0));
    }
}
