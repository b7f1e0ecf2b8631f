//! Core domain types for the automation engine.

pub mod ids;
pub mod item;
pub mod platform;

pub use ids::{CommentId, IssueNumber, PrNumber, RepoId, WorkItemId};
pub use item::{HistoryEntry, LifecycleState, WorkItem};
pub use platform::{
    ChangeRequestSnapshot, CommentRecord, IssueStatus, ItemStatus, MergeState, Review,
    ReviewVerdict, apply_marker, parse_apply_marker,
};
