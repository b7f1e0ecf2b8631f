//! Raw platform state for the active item's issue and change request.
//!
//! These types hold what the platform client fetched, before classification.
//! They deliberately stay close to the wire: the classifier is the only place
//! that turns them into a canonical lifecycle state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{CommentId, PrNumber};

/// Prefix of the instruction-comment dedup marker.
///
/// The marker is embedded as an HTML comment in every instruction comment the
/// engine posts, keyed by the change-request revision. It lives in the
/// platform's comment history, so dedup survives restarts without any local
/// bookkeeping.
const APPLY_MARKER_PREFIX: &str = "<!-- agent-queue:apply-r";
const APPLY_MARKER_SUFFIX: &str = " -->";

/// Renders the dedup marker for a change-request revision.
pub fn apply_marker(revision: u32) -> String {
    format!("{}{}{}", APPLY_MARKER_PREFIX, revision, APPLY_MARKER_SUFFIX)
}

/// Extracts the revision from a comment body carrying a dedup marker.
pub fn parse_apply_marker(body: &str) -> Option<u32> {
    let start = body.find(APPLY_MARKER_PREFIX)? + APPLY_MARKER_PREFIX.len();
    let rest = &body[start..];
    let end = rest.find(APPLY_MARKER_SUFFIX)?;
    rest[..end].parse().ok()
}

/// The platform-side status of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    /// Open and unassigned.
    Open,
    /// Open with an assignee (the agent is working on it).
    InProgress,
    /// Closed.
    Closed,
}

/// The merge state of a change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeState {
    Open,
    Merged,
    Closed,
}

/// The verdict of a submitted review.
///
/// `Unknown` preserves verdict strings this engine does not recognize;
/// classification refuses to act on them rather than guessing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVerdict {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
    Pending,
    Unknown(String),
}

impl ReviewVerdict {
    /// Parses a platform review-state string (e.g. `APPROVED`).
    pub fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "APPROVED" => ReviewVerdict::Approved,
            "CHANGES_REQUESTED" => ReviewVerdict::ChangesRequested,
            "COMMENTED" => ReviewVerdict::Commented,
            "DISMISSED" => ReviewVerdict::Dismissed,
            "PENDING" => ReviewVerdict::Pending,
            other => ReviewVerdict::Unknown(other.to_string()),
        }
    }

    /// Returns true for verdicts that can govern the lifecycle
    /// (approval or change request).
    pub fn is_governing(&self) -> bool {
        matches!(
            self,
            ReviewVerdict::Approved | ReviewVerdict::ChangesRequested | ReviewVerdict::Unknown(_)
        )
    }
}

/// A submitted review on a change request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub verdict: ReviewVerdict,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// A comment on a change request, as fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: CommentId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Raw state of the change request tied to a work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequestSnapshot {
    pub number: PrNumber,
    pub merge_state: MergeState,
    pub is_draft: bool,
    /// Logins with a currently pending review request.
    pub requested_reviewers: Vec<String>,
    /// All submitted reviews, in fetch order.
    pub reviews: Vec<Review>,
    /// Comment history, in fetch order (oldest first).
    pub comments: Vec<CommentRecord>,
}

impl ChangeRequestSnapshot {
    /// The change-request revision: the number of change-requesting reviews
    /// observed so far. Each such review opens a new revision for which at
    /// most one instruction comment may be posted.
    pub fn revision(&self) -> u32 {
        self.reviews
            .iter()
            .filter(|r| r.verdict == ReviewVerdict::ChangesRequested)
            .count() as u32
    }

    /// Returns true if any comment carries the dedup marker for `revision`.
    pub fn has_marker_for(&self, revision: u32) -> bool {
        self.comments
            .iter()
            .any(|c| parse_apply_marker(&c.body) == Some(revision))
    }

    /// Returns true if `login` has a pending review request.
    pub fn reviewer_pending(&self, login: &str) -> bool {
        self.requested_reviewers
            .iter()
            .any(|r| r.eq_ignore_ascii_case(login))
    }
}

/// Everything fetched for one work item in one poll: the issue status plus
/// the change request, if one exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStatus {
    pub issue: IssueStatus,
    pub change_request: Option<ChangeRequestSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_roundtrip() {
        for revision in [0, 1, 7, 42] {
            let body = format!("apply the changes\n\n{}", apply_marker(revision));
            assert_eq!(parse_apply_marker(&body), Some(revision));
        }
    }

    #[test]
    fn marker_absent() {
        assert_eq!(parse_apply_marker("no marker here"), None);
        assert_eq!(parse_apply_marker("<!-- agent-queue:apply-rX -->"), None);
    }

    #[test]
    fn verdict_parse() {
        assert_eq!(ReviewVerdict::parse("APPROVED"), ReviewVerdict::Approved);
        assert_eq!(
            ReviewVerdict::parse("changes_requested"),
            ReviewVerdict::ChangesRequested
        );
        assert_eq!(
            ReviewVerdict::parse("SOMETHING_NEW"),
            ReviewVerdict::Unknown("SOMETHING_NEW".to_string())
        );
    }

    #[test]
    fn revision_counts_change_requests() {
        let snapshot = ChangeRequestSnapshot {
            number: PrNumber(5),
            merge_state: MergeState::Open,
            is_draft: false,
            requested_reviewers: vec![],
            reviews: vec![
                Review {
                    verdict: ReviewVerdict::Commented,
                    submitted_at: None,
                },
                Review {
                    verdict: ReviewVerdict::ChangesRequested,
                    submitted_at: None,
                },
                Review {
                    verdict: ReviewVerdict::ChangesRequested,
                    submitted_at: None,
                },
            ],
            comments: vec![],
        };
        assert_eq!(snapshot.revision(), 2);
    }

    #[test]
    fn reviewer_pending_is_case_insensitive() {
        let snapshot = ChangeRequestSnapshot {
            number: PrNumber(5),
            merge_state: MergeState::Open,
            is_draft: false,
            requested_reviewers: vec!["Copilot".to_string()],
            reviews: vec![],
            comments: vec![],
        };
        assert!(snapshot.reviewer_pending("copilot"));
        assert!(!snapshot.reviewer_pending("someone-else"));
    }
}
