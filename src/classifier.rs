//! State classifier: raw platform state to canonical lifecycle state.
//!
//! Classification is a pure function over an [`ItemStatus`] snapshot. The
//! mapping is exhaustive; there is no silent fallthrough on unexpected
//! combinations. Tie-break rules:
//!
//! - a merged change request wins regardless of any other pending signal;
//! - on conflicting review signals (an approval and a change request both
//!   present) the review with the latest timestamp governs, and an exact
//!   timestamp tie resolves to `ChangesRequested`;
//! - malformed input (an unrecognized review verdict, or a conflict that
//!   cannot be ordered because a timestamp is missing) fails classification;
//!   the caller leaves the item in its previous persisted state for the
//!   cycle and retries next poll.

use thiserror::Error;

use crate::types::{
    ChangeRequestSnapshot, IssueStatus, ItemStatus, LifecycleState, Review, ReviewVerdict,
    platform::MergeState,
};

/// Classification failure: the snapshot cannot be mapped safely.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifyError {
    /// A governing review carries a verdict this engine does not recognize.
    #[error("unrecognized review verdict: {0}")]
    UnknownVerdict(String),

    /// Conflicting review signals cannot be ordered: a participating review
    /// has no submission timestamp.
    #[error("conflicting reviews cannot be ordered: missing submission timestamp")]
    MissingTimestamp,
}

/// Result type for classification.
pub type Result<T> = std::result::Result<T, ClassifyError>;

/// Maps a raw status snapshot to exactly one canonical lifecycle state.
pub fn classify(status: &ItemStatus) -> Result<LifecycleState> {
    match &status.change_request {
        Some(cr) => classify_change_request(cr),
        None => Ok(match status.issue {
            IssueStatus::Closed => LifecycleState::Closed,
            IssueStatus::InProgress => LifecycleState::Assigned,
            IssueStatus::Open => LifecycleState::Queued,
        }),
    }
}

fn classify_change_request(cr: &ChangeRequestSnapshot) -> Result<LifecycleState> {
    // Merge state outranks every review signal.
    match cr.merge_state {
        MergeState::Merged => return Ok(LifecycleState::Merged),
        MergeState::Closed => return Ok(LifecycleState::Closed),
        MergeState::Open => {}
    }

    match governing_review(&cr.reviews)? {
        Some(review) if review.verdict == ReviewVerdict::ChangesRequested => {
            let revision = cr.revision();
            if cr.has_marker_for(revision) {
                // The instruction for this revision is already out. A pending
                // review request means the agent finished applying and asked
                // for review again; otherwise it is still working.
                if cr.requested_reviewers.is_empty() {
                    Ok(LifecycleState::ApplyRequested)
                } else {
                    Ok(LifecycleState::ReviewRequested)
                }
            } else {
                Ok(LifecycleState::ChangesRequested)
            }
        }
        Some(_) => Ok(LifecycleState::Approved),
        None => {
            if !cr.requested_reviewers.is_empty() {
                Ok(LifecycleState::ReviewRequested)
            } else {
                Ok(LifecycleState::PrOpen)
            }
        }
    }
}

/// Selects the review that governs the lifecycle, if any.
///
/// Only approvals and change requests govern; comments, dismissals, and
/// pending reviews do not. When both kinds are present the latest timestamp
/// wins, with `ChangesRequested` taking an exact tie.
fn governing_review(reviews: &[Review]) -> Result<Option<&Review>> {
    let candidates: Vec<&Review> = reviews.iter().filter(|r| r.verdict.is_governing()).collect();

    for review in &candidates {
        if let ReviewVerdict::Unknown(s) = &review.verdict {
            return Err(ClassifyError::UnknownVerdict(s.clone()));
        }
    }

    let has_approval = candidates
        .iter()
        .any(|r| r.verdict == ReviewVerdict::Approved);
    let has_changes = candidates
        .iter()
        .any(|r| r.verdict == ReviewVerdict::ChangesRequested);

    if has_approval && has_changes {
        if candidates.iter().any(|r| r.submitted_at.is_none()) {
            return Err(ClassifyError::MissingTimestamp);
        }
        // Latest timestamp wins; ChangesRequested outranks Approved on an
        // exact tie. max_by keeps the last maximal element, so rank the
        // change request above the approval at equal timestamps.
        Ok(candidates.iter().copied().max_by(|a, b| {
            (a.submitted_at, verdict_rank(a)).cmp(&(b.submitted_at, verdict_rank(b)))
        }))
    } else {
        // A single kind of signal: the last one in fetch order governs.
        Ok(candidates.last().copied())
    }
}

fn verdict_rank(review: &Review) -> u8 {
    match review.verdict {
        ReviewVerdict::ChangesRequested => 1,
        _ => 0,
    }
}
