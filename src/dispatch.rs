//! Action dispatcher: lifecycle state to at most one action descriptor.
//!
//! Planning is pure: it inspects state and returns a description of what
//! should happen; the scheduler executes descriptors against the
//! collaborators. Every row carries its idempotency guard, so replanning
//! after a crash or an overlapping signal never produces a duplicate
//! side effect.

use serde::{Deserialize, Serialize};

use crate::persistence::EngineState;
use crate::types::{
    ChangeRequestSnapshot, IssueNumber, LifecycleState, MergeState, PrNumber, WorkItem, WorkItemId,
    apply_marker,
};

/// Dispatch-relevant configuration flags.
#[derive(Debug, Clone, Copy)]
pub struct DispatchContext<'a> {
    /// Merge approved change requests automatically.
    pub auto_merge: bool,

    /// Once a revision cycle has happened, merge without a final approval.
    pub skip_final_review: bool,

    /// The agent's platform login, for the reviewer-already-agent guard.
    pub agent_login: &'a str,
}

/// How an item reached its terminal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionKind {
    /// The change request merged; record the cooldown and mark done.
    Merged,
    /// The issue or change request closed without a merge.
    Closed,
    /// A permanent failure retired the item.
    Failed,
}

/// An action descriptor: the single side-effecting step for this cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlannedAction {
    /// Assign the agent to the head-of-queue item.
    Assign {
        item: WorkItemId,
        issue: IssueNumber,
    },

    /// (Re)assign review of the change request to the agent.
    ReassignReview { item: WorkItemId, pr: PrNumber },

    /// Post the fixed instruction comment for the given revision.
    PostInstruction {
        item: WorkItemId,
        pr: PrNumber,
        revision: u32,
    },

    /// Flip a draft change request to ready-for-review (merge follows next
    /// cycle).
    MarkReady { item: WorkItemId, pr: PrNumber },

    /// Merge the change request into the target branch.
    Merge { item: WorkItemId, pr: PrNumber },

    /// Local bookkeeping for a terminal transition: dequeue, and for merges
    /// record the cooldown. No collaborator calls.
    Complete {
        item: WorkItemId,
        outcome: CompletionKind,
    },
}

/// Plans the assignment of the next queued item, honoring the single-flight
/// and cooldown guards.
///
/// Returns `None` when anything blocks assignment: automation disabled, an
/// item already in flight, an empty queue, a closed cooldown gate, or a head
/// item without a mapped issue number.
pub fn plan_assignment(
    state: &EngineState,
    auto_assign_next: bool,
    cooldown_permitted: bool,
) -> Option<PlannedAction> {
    if !auto_assign_next || !cooldown_permitted {
        return None;
    }
    // Single-item-in-flight: never assign while an item is active.
    if state.active.is_some() {
        return None;
    }
    let head = state.queue.head()?;
    let item = state.items.get(head)?;
    if item.state != LifecycleState::Queued {
        return None;
    }
    let issue = item.issue?;
    Some(PlannedAction::Assign {
        item: item.id.clone(),
        issue,
    })
}

/// Plans the single action for the active item, if any.
///
/// The mapping is the dispatch table: each lifecycle state yields at most
/// one action, suppressed by its idempotency guard.
pub fn plan_item_action(
    item: &WorkItem,
    snapshot: Option<&ChangeRequestSnapshot>,
    ctx: &DispatchContext<'_>,
) -> Option<PlannedAction> {
    match item.state {
        // Assignment is planned separately; nothing to do until the agent
        // opens a change request.
        LifecycleState::Queued | LifecycleState::Assigned => None,

        LifecycleState::PrOpen => {
            let cr = snapshot?;
            if cr.is_draft || !cr.requested_reviewers.is_empty() {
                return None;
            }
            Some(PlannedAction::ReassignReview {
                item: item.id.clone(),
                pr: cr.number,
            })
        }

        LifecycleState::ReviewRequested => {
            let cr = snapshot?;
            if ctx.skip_final_review && cr.revision() >= 1 {
                // A revision cycle already ran; land the change without
                // another approval round.
                return plan_merge(item, cr, ctx);
            }
            if cr.reviewer_pending(ctx.agent_login) {
                return None;
            }
            Some(PlannedAction::ReassignReview {
                item: item.id.clone(),
                pr: cr.number,
            })
        }

        LifecycleState::ChangesRequested => {
            let cr = snapshot?;
            let revision = cr.revision();
            // Dedup guard: the marker in the comment history, or the
            // persisted record of having posted it (covers the window where
            // the platform has not surfaced the comment yet).
            if cr.has_marker_for(revision)
                || item.last_instruction_revision.is_some_and(|r| r >= revision)
            {
                return None;
            }
            Some(PlannedAction::PostInstruction {
                item: item.id.clone(),
                pr: cr.number,
                revision,
            })
        }

        // The instruction is out; wait for the agent.
        LifecycleState::ApplyRequested => None,

        LifecycleState::Approved => {
            let cr = snapshot?;
            plan_merge(item, cr, ctx)
        }

        LifecycleState::Merged => Some(PlannedAction::Complete {
            item: item.id.clone(),
            outcome: CompletionKind::Merged,
        }),

        LifecycleState::Closed => Some(PlannedAction::Complete {
            item: item.id.clone(),
            outcome: CompletionKind::Closed,
        }),

        LifecycleState::Failed => Some(PlannedAction::Complete {
            item: item.id.clone(),
            outcome: CompletionKind::Failed,
        }),

        LifecycleState::Done => None,
    }
}

fn plan_merge(
    item: &WorkItem,
    cr: &ChangeRequestSnapshot,
    ctx: &DispatchContext<'_>,
) -> Option<PlannedAction> {
    // Already merged upstream: nothing to do, classification catches up
    // next cycle.
    if cr.merge_state == MergeState::Merged {
        return None;
    }
    if !ctx.auto_merge {
        return None;
    }
    if cr.is_draft {
        return Some(PlannedAction::MarkReady {
            item: item.id.clone(),
            pr: cr.number,
        });
    }
    Some(PlannedAction::Merge {
        item: item.id.clone(),
        pr: cr.number,
    })
}

/// The fixed instruction comment for a revision, carrying the dedup marker.
pub fn instruction_comment(agent_login: &str, revision: u32) -> String {
    format!(
        "@{} apply changes based on the review comments in this thread\n\n{}",
        agent_login,
        apply_marker(revision)
    )
}

/// The comment posted on the issue at assignment time.
pub fn assignment_comment(target_branch: &str, instructions: &str) -> String {
    format!(
        "**Target Branch:** `{}`\n\n---\n\n**Instructions:**\n\n{}",
        target_branch, instructions
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CommentId, CommentRecord, Review, ReviewVerdict, parse_apply_marker};
    use chrono::Utc;

    fn ctx() -> DispatchContext<'static> {
        DispatchContext {
            auto_merge: true,
            skip_final_review: false,
            agent_login: "copilot",
        }
    }

    fn item_in(state: LifecycleState) -> WorkItem {
        let mut item = WorkItem::queued(WorkItemId::from("TC-A-01"), Some(IssueNumber(11)));
        item.state = state;
        item.pr = Some(PrNumber(5));
        item
    }

    fn open_cr() -> ChangeRequestSnapshot {
        ChangeRequestSnapshot {
            number: PrNumber(5),
            merge_state: MergeState::Open,
            is_draft: false,
            requested_reviewers: vec![],
            reviews: vec![],
            comments: vec![],
        }
    }

    fn changes_requested_cr() -> ChangeRequestSnapshot {
        let mut cr = open_cr();
        cr.reviews = vec![Review {
            verdict: ReviewVerdict::ChangesRequested,
            submitted_at: Some(Utc::now()),
        }];
        cr
    }

    // ─── Assignment ───

    fn state_with_queue(ids: &[&str]) -> EngineState {
        let mut state = EngineState::empty();
        for id in ids {
            let wid = WorkItemId::from(*id);
            state.queue.enqueue(wid.clone()).unwrap();
            state
                .items
                .insert(wid.clone(), WorkItem::queued(wid, Some(IssueNumber(11))));
        }
        state
    }

    #[test]
    fn assignment_takes_head_of_queue() {
        let state = state_with_queue(&["TC-A-01", "TC-A-02"]);
        let action = plan_assignment(&state, true, true).unwrap();
        assert_eq!(
            action,
            PlannedAction::Assign {
                item: WorkItemId::from("TC-A-01"),
                issue: IssueNumber(11),
            }
        );
    }

    #[test]
    fn assignment_blocked_by_active_item() {
        let mut state = state_with_queue(&["TC-A-01", "TC-A-02"]);
        state.active = Some(WorkItemId::from("TC-A-02"));
        assert_eq!(plan_assignment(&state, true, true), None);
    }

    #[test]
    fn assignment_blocked_by_cooldown_or_flag() {
        let state = state_with_queue(&["TC-A-01"]);
        assert_eq!(plan_assignment(&state, true, false), None);
        assert_eq!(plan_assignment(&state, false, true), None);
    }

    #[test]
    fn assignment_skips_empty_queue() {
        let state = EngineState::empty();
        assert_eq!(plan_assignment(&state, true, true), None);
    }

    #[test]
    fn assignment_needs_issue_number() {
        let mut state = state_with_queue(&["TC-A-01"]);
        state
            .items
            .get_mut(&WorkItemId::from("TC-A-01"))
            .unwrap()
            .issue = None;
        assert_eq!(plan_assignment(&state, true, true), None);
    }

    // ─── Item actions ───

    #[test]
    fn waiting_states_plan_nothing() {
        for state in [
            LifecycleState::Queued,
            LifecycleState::Assigned,
            LifecycleState::ApplyRequested,
            LifecycleState::Done,
        ] {
            assert_eq!(
                plan_item_action(&item_in(state), Some(&open_cr()), &ctx()),
                None,
                "state {:?} should plan nothing",
                state
            );
        }
    }

    #[test]
    fn pr_open_requests_review_once_ready() {
        let item = item_in(LifecycleState::PrOpen);

        let ready = open_cr();
        assert_eq!(
            plan_item_action(&item, Some(&ready), &ctx()),
            Some(PlannedAction::ReassignReview {
                item: item.id.clone(),
                pr: PrNumber(5),
            })
        );

        let mut draft = open_cr();
        draft.is_draft = true;
        assert_eq!(plan_item_action(&item, Some(&draft), &ctx()), None);

        let mut pending = open_cr();
        pending.requested_reviewers = vec!["maintainer".to_string()];
        assert_eq!(plan_item_action(&item, Some(&pending), &ctx()), None);
    }

    #[test]
    fn review_requested_reassigns_unless_agent_pending() {
        let item = item_in(LifecycleState::ReviewRequested);

        let mut cr = open_cr();
        cr.requested_reviewers = vec!["maintainer".to_string()];
        assert_eq!(
            plan_item_action(&item, Some(&cr), &ctx()),
            Some(PlannedAction::ReassignReview {
                item: item.id.clone(),
                pr: PrNumber(5),
            })
        );

        cr.requested_reviewers = vec!["Copilot".to_string()];
        assert_eq!(plan_item_action(&item, Some(&cr), &ctx()), None);
    }

    #[test]
    fn changes_requested_posts_instruction_once() {
        let item = item_in(LifecycleState::ChangesRequested);
        let cr = changes_requested_cr();

        assert_eq!(
            plan_item_action(&item, Some(&cr), &ctx()),
            Some(PlannedAction::PostInstruction {
                item: item.id.clone(),
                pr: PrNumber(5),
                revision: 1,
            })
        );

        // Marker already posted for this revision: suppressed.
        let mut marked = cr.clone();
        marked.comments = vec![CommentRecord {
            id: CommentId(9),
            body: instruction_comment("copilot", 1),
            created_at: Utc::now(),
        }];
        assert_eq!(plan_item_action(&item, Some(&marked), &ctx()), None);
    }

    #[test]
    fn instruction_guard_uses_persisted_revision() {
        // The platform may not surface our comment immediately; the
        // persisted revision record still suppresses a duplicate.
        let mut item = item_in(LifecycleState::ChangesRequested);
        item.last_instruction_revision = Some(1);
        assert_eq!(
            plan_item_action(&item, Some(&changes_requested_cr()), &ctx()),
            None
        );
    }

    #[test]
    fn approved_merges_marking_ready_first() {
        let item = item_in(LifecycleState::Approved);

        let mut draft = open_cr();
        draft.is_draft = true;
        assert_eq!(
            plan_item_action(&item, Some(&draft), &ctx()),
            Some(PlannedAction::MarkReady {
                item: item.id.clone(),
                pr: PrNumber(5),
            })
        );

        assert_eq!(
            plan_item_action(&item, Some(&open_cr()), &ctx()),
            Some(PlannedAction::Merge {
                item: item.id.clone(),
                pr: PrNumber(5),
            })
        );
    }

    #[test]
    fn approved_respects_auto_merge_and_merged_guard() {
        let item = item_in(LifecycleState::Approved);

        let mut no_auto = ctx();
        no_auto.auto_merge = false;
        assert_eq!(plan_item_action(&item, Some(&open_cr()), &no_auto), None);

        let mut merged = open_cr();
        merged.merge_state = MergeState::Merged;
        assert_eq!(plan_item_action(&item, Some(&merged), &ctx()), None);
    }

    #[test]
    fn skip_final_review_short_circuits_after_revision() {
        let item = item_in(LifecycleState::ReviewRequested);
        let mut shortcut = ctx();
        shortcut.skip_final_review = true;

        // No revision yet: standard review flow.
        let mut cr = open_cr();
        cr.requested_reviewers = vec!["maintainer".to_string()];
        assert_eq!(
            plan_item_action(&item, Some(&cr), &shortcut),
            Some(PlannedAction::ReassignReview {
                item: item.id.clone(),
                pr: PrNumber(5),
            })
        );

        // One revision cycle done: merge without a final approval.
        let cr = changes_requested_cr();
        assert_eq!(
            plan_item_action(&item, Some(&cr), &shortcut),
            Some(PlannedAction::Merge {
                item: item.id.clone(),
                pr: PrNumber(5),
            })
        );
    }

    #[test]
    fn terminal_transitions_complete() {
        for (state, outcome) in [
            (LifecycleState::Merged, CompletionKind::Merged),
            (LifecycleState::Closed, CompletionKind::Closed),
            (LifecycleState::Failed, CompletionKind::Failed),
        ] {
            assert_eq!(
                plan_item_action(&item_in(state), None, &ctx()),
                Some(PlannedAction::Complete {
                    item: WorkItemId::from("TC-A-01"),
                    outcome,
                })
            );
        }
    }

    // ─── Comment bodies ───

    #[test]
    fn instruction_comment_carries_marker_and_mention() {
        let body = instruction_comment("copilot", 3);
        assert!(body.starts_with("@copilot "));
        assert_eq!(parse_apply_marker(&body), Some(3));
    }

    #[test]
    fn assignment_comment_names_target_branch() {
        let body = assignment_comment("develop", "keep commits small");
        assert!(body.contains("`develop`"));
        assert!(body.contains("keep commits small"));
    }
}
