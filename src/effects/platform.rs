//! Platform API effect types.
//!
//! These types describe code-hosting-platform operations as data, without
//! executing them. The interpreter in `crate::github` executes them against
//! the real API; tests substitute a fake.

use serde::{Deserialize, Serialize};

use crate::types::{CommentId, IssueNumber, ItemStatus, PrNumber, WorkItemId};

/// A platform API effect.
///
/// Effects are repo-scoped: the interpreter is constructed with a `RepoId`,
/// so effects don't carry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlatformEffect {
    /// Fetch the full status of a work item: issue state plus the change
    /// request (reviews, comments, pending reviewers, merge state).
    ///
    /// When `pr` is unset the interpreter searches open change requests for
    /// one referencing the item's issue.
    GetItemStatus {
        item: WorkItemId,
        issue: IssueNumber,
        pr: Option<PrNumber>,
    },

    /// Post a comment on an issue.
    CommentOnIssue { issue: IssueNumber, body: String },

    /// Post a comment on a change request.
    CommentOnChangeRequest { pr: PrNumber, body: String },

    /// Flip a draft change request to ready-for-review.
    MarkReadyForReview { pr: PrNumber },

    /// Merge a change request into its target branch.
    Merge { pr: PrNumber },
}

/// Response to a platform effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlatformResponse {
    /// Status for [`PlatformEffect::GetItemStatus`].
    ItemStatus(ItemStatus),

    /// A comment was posted.
    CommentPosted { id: CommentId },

    /// The change request is ready for review.
    MarkedReady,

    /// The change request was merged.
    Merged,
}
