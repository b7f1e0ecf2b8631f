//! Platform effect interpreter using octocrab.
//!
//! Executes [`PlatformEffect`]s against the real API. Item status assembly
//! pulls the issue, the change request, its reviews, its comments, and the
//! pending reviewer list into one [`ItemStatus`] snapshot per poll.
//!
//! Implementation notes:
//! - Raw REST routes with local response structs are used where octocrab's
//!   typed models don't cover a field the engine needs (requested reviewers,
//!   review timestamps, the merge endpoint's SHA-less form).
//! - Ready-for-review has no REST endpoint; it goes through GraphQL.
//! - Every effect runs under the retry/timeout policy in `retry`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::effects::{PlatformEffect, PlatformInterpreter, PlatformResponse};
use crate::types::{
    ChangeRequestSnapshot, CommentId, CommentRecord, IssueNumber, IssueStatus, ItemStatus,
    MergeState, PrNumber, Review, ReviewVerdict, WorkItemId,
};

use super::client::OctocrabClient;
use super::error::PlatformApiError;
use super::retry::{RetryConfig, retry_with_backoff};

// ─── Wire Types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct UserRef {
    login: String,
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    state: String,
    #[serde(default)]
    assignees: Vec<UserRef>,
}

#[derive(Debug, Deserialize)]
struct BranchRef {
    #[serde(rename = "ref")]
    ref_name: String,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    number: u64,
    node_id: String,
    state: String,
    merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    requested_reviewers: Vec<UserRef>,
    body: Option<String>,
    head: BranchRef,
}

#[derive(Debug, Deserialize)]
struct ReviewResponse {
    state: String,
    submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct CommentResponse {
    id: u64,
    body: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct MergeResponse {
    merged: bool,
    message: Option<String>,
}

/// GraphQL mutation flipping a draft change request to ready-for-review.
/// The REST API has no equivalent.
const MARK_READY_MUTATION: &str = r#"
mutation($id: ID!) {
    markPullRequestReadyForReview(input: { pullRequestId: $id }) {
        pullRequest { isDraft }
    }
}
"#;

// ─── Interpreter Implementation ───────────────────────────────────────────────

impl PlatformInterpreter for OctocrabClient {
    type Error = PlatformApiError;

    async fn interpret(&self, effect: PlatformEffect) -> Result<PlatformResponse, Self::Error> {
        retry_with_backoff(RetryConfig::DEFAULT, || {
            execute_effect(self, effect.clone())
        })
        .await
    }
}

async fn execute_effect(
    client: &OctocrabClient,
    effect: PlatformEffect,
) -> Result<PlatformResponse, PlatformApiError> {
    match effect {
        PlatformEffect::GetItemStatus { item, issue, pr } => {
            get_item_status(client, &item, issue, pr).await
        }
        PlatformEffect::CommentOnIssue { issue, body } => post_comment(client, issue.0, body).await,
        PlatformEffect::CommentOnChangeRequest { pr, body } => {
            post_comment(client, pr.0, body).await
        }
        PlatformEffect::MarkReadyForReview { pr } => mark_ready(client, pr).await,
        PlatformEffect::Merge { pr } => merge(client, pr).await,
    }
}

// ─── Item Status ──────────────────────────────────────────────────────────────

async fn get_item_status(
    client: &OctocrabClient,
    item: &WorkItemId,
    issue: IssueNumber,
    pr: Option<PrNumber>,
) -> Result<PlatformResponse, PlatformApiError> {
    let issue_url = format!(
        "/repos/{}/{}/issues/{}",
        client.owner(),
        client.repo_name(),
        issue.0
    );
    let issue_data: IssueResponse = client
        .inner()
        .get(&issue_url, None::<&()>)
        .await
        .map_err(PlatformApiError::from_octocrab)?;
    let issue_status = map_issue_status(&issue_data);

    // Resolve the change request: a known number takes a direct lookup; an
    // in-progress issue without one triggers discovery over open PRs. Queued
    // items skip the search entirely.
    let pr_number = match pr {
        Some(number) => Some(number),
        None if issue_status == IssueStatus::InProgress => {
            discover_change_request(client, item, issue).await?
        }
        None => None,
    };

    let change_request = match pr_number {
        Some(number) => Some(fetch_snapshot(client, number).await?),
        None => None,
    };

    Ok(PlatformResponse::ItemStatus(ItemStatus {
        issue: issue_status,
        change_request,
    }))
}

fn map_issue_status(issue: &IssueResponse) -> IssueStatus {
    if issue.state.eq_ignore_ascii_case("closed") {
        IssueStatus::Closed
    } else if issue.assignees.is_empty() {
        IssueStatus::Open
    } else {
        IssueStatus::InProgress
    }
}

/// Searches open change requests for one referencing the item's issue.
async fn discover_change_request(
    client: &OctocrabClient,
    item: &WorkItemId,
    issue: IssueNumber,
) -> Result<Option<PrNumber>, PlatformApiError> {
    let path = format!("/repos/{}/{}/pulls", client.owner(), client.repo_name());
    let open: Vec<PullResponse> = get_paged(client, &path, &[("state", "open")]).await?;

    Ok(open
        .iter()
        .find(|pull| {
            references_issue(
                pull.body.as_deref().unwrap_or(""),
                &pull.head.ref_name,
                item,
                issue,
            )
        })
        .map(|pull| PrNumber(pull.number)))
}

/// Returns true if a change request's body or head branch references the
/// given work item.
///
/// Matches the closing keyword form `#<n>` in the body (with a non-digit
/// boundary, so `#12` does not match `#123`) or the item id / issue number
/// embedded in the head branch name.
fn references_issue(body: &str, head_ref: &str, item: &WorkItemId, issue: IssueNumber) -> bool {
    let needle = format!("#{}", issue.0);
    let mut search_from = 0;
    while let Some(found) = body[search_from..].find(&needle) {
        let end = search_from + found + needle.len();
        let boundary_ok = body[end..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_ascii_digit());
        if boundary_ok {
            return true;
        }
        search_from = end;
    }

    let head_lower = head_ref.to_lowercase();
    head_lower.contains(&item.as_str().to_lowercase())
        || head_lower.ends_with(&format!("-{}", issue.0))
}

async fn fetch_snapshot(
    client: &OctocrabClient,
    pr: PrNumber,
) -> Result<ChangeRequestSnapshot, PlatformApiError> {
    let pull = fetch_pull(client, pr).await?;

    let reviews_path = format!(
        "/repos/{}/{}/pulls/{}/reviews",
        client.owner(),
        client.repo_name(),
        pr.0
    );
    let reviews: Vec<ReviewResponse> = get_paged(client, &reviews_path, &[]).await?;

    let comments_path = format!(
        "/repos/{}/{}/issues/{}/comments",
        client.owner(),
        client.repo_name(),
        pr.0
    );
    let comments: Vec<CommentResponse> = get_paged(client, &comments_path, &[]).await?;

    Ok(ChangeRequestSnapshot {
        number: pr,
        merge_state: merge_state_of(&pull),
        is_draft: pull.draft,
        requested_reviewers: pull
            .requested_reviewers
            .into_iter()
            .map(|u| u.login)
            .collect(),
        reviews: reviews
            .into_iter()
            .map(|r| Review {
                verdict: ReviewVerdict::parse(&r.state),
                submitted_at: r.submitted_at,
            })
            .collect(),
        comments: comments
            .into_iter()
            .map(|c| CommentRecord {
                id: CommentId(c.id),
                body: c.body.unwrap_or_default(),
                created_at: c.created_at,
            })
            .collect(),
    })
}

async fn fetch_pull(
    client: &OctocrabClient,
    pr: PrNumber,
) -> Result<PullResponse, PlatformApiError> {
    let url = format!(
        "/repos/{}/{}/pulls/{}",
        client.owner(),
        client.repo_name(),
        pr.0
    );
    client
        .inner()
        .get(&url, None::<&()>)
        .await
        .map_err(PlatformApiError::from_octocrab)
}

fn merge_state_of(pull: &PullResponse) -> MergeState {
    if pull.merged_at.is_some() {
        MergeState::Merged
    } else if pull.state.eq_ignore_ascii_case("closed") {
        MergeState::Closed
    } else {
        MergeState::Open
    }
}

// ─── Mutations ────────────────────────────────────────────────────────────────

async fn post_comment(
    client: &OctocrabClient,
    number: u64,
    body: String,
) -> Result<PlatformResponse, PlatformApiError> {
    let result = client
        .inner()
        .issues(client.owner(), client.repo_name())
        .create_comment(number, body)
        .await;

    match result {
        Ok(comment) => Ok(PlatformResponse::CommentPosted {
            id: CommentId(comment.id.into_inner()),
        }),
        Err(e) => Err(PlatformApiError::from_octocrab(e)),
    }
}

async fn mark_ready(
    client: &OctocrabClient,
    pr: PrNumber,
) -> Result<PlatformResponse, PlatformApiError> {
    let pull = fetch_pull(client, pr).await?;

    let result: Result<serde_json::Value, _> = client
        .inner()
        .graphql(&serde_json::json!({
            "query": MARK_READY_MUTATION,
            "variables": { "id": pull.node_id },
        }))
        .await;

    match result {
        Ok(_) => Ok(PlatformResponse::MarkedReady),
        Err(e) => Err(PlatformApiError::from_octocrab(e)),
    }
}

async fn merge(
    client: &OctocrabClient,
    pr: PrNumber,
) -> Result<PlatformResponse, PlatformApiError> {
    let url = format!(
        "/repos/{}/{}/pulls/{}/merge",
        client.owner(),
        client.repo_name(),
        pr.0
    );

    #[derive(Serialize)]
    struct MergeRequest {
        merge_method: &'static str,
    }

    let result: Result<MergeResponse, _> = client
        .inner()
        .put(&url, Some(&MergeRequest {
            merge_method: "squash",
        }))
        .await;

    match result {
        Ok(response) if response.merged => Ok(PlatformResponse::Merged),
        Ok(response) => Err(PlatformApiError::transient(format!(
            "merge request returned merged=false: {}",
            response.message.as_deref().unwrap_or("unknown reason")
        ))),
        Err(e) => Err(PlatformApiError::from_octocrab(e)),
    }
}

// ─── Pagination ───────────────────────────────────────────────────────────────

/// Fetches all pages of a list endpoint.
async fn get_paged<T: serde::de::DeserializeOwned>(
    client: &OctocrabClient,
    path: &str,
    params: &[(&str, &str)],
) -> Result<Vec<T>, PlatformApiError> {
    let mut page = 1u32;
    let mut all = Vec::new();

    loop {
        let mut url = format!("{}?per_page=100&page={}", path, page);
        for (key, value) in params {
            url.push_str(&format!("&{}={}", key, value));
        }

        let items: Vec<T> = client
            .inner()
            .get(&url, None::<&()>)
            .await
            .map_err(PlatformApiError::from_octocrab)?;

        let is_last_page = items.len() < 100;
        all.extend(items);
        if is_last_page {
            break;
        }
        page += 1;
    }

    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> WorkItemId {
        WorkItemId::from("TC-A-01")
    }

    #[test]
    fn issue_status_mapping() {
        let closed = IssueResponse {
            state: "closed".to_string(),
            assignees: vec![],
        };
        assert_eq!(map_issue_status(&closed), IssueStatus::Closed);

        let assigned = IssueResponse {
            state: "open".to_string(),
            assignees: vec![UserRef {
                login: "copilot".to_string(),
            }],
        };
        assert_eq!(map_issue_status(&assigned), IssueStatus::InProgress);

        let open = IssueResponse {
            state: "open".to_string(),
            assignees: vec![],
        };
        assert_eq!(map_issue_status(&open), IssueStatus::Open);
    }

    #[test]
    fn body_reference_with_boundary() {
        assert!(references_issue("Fixes #12", "feature/x", &item(), IssueNumber(12)));
        assert!(!references_issue("Fixes #123", "feature/x", &item(), IssueNumber(12)));
        assert!(references_issue(
            "see #123 and #12.",
            "feature/x",
            &item(),
            IssueNumber(12)
        ));
    }

    #[test]
    fn branch_reference_matches_item_or_issue() {
        assert!(references_issue("", "copilot/tc-a-01-widget", &item(), IssueNumber(12)));
        assert!(references_issue("", "copilot/fix-12", &item(), IssueNumber(12)));
        assert!(!references_issue("", "copilot/fix-120", &item(), IssueNumber(12)));
    }

    #[test]
    fn merge_state_derivation() {
        let mut pull = PullResponse {
            number: 1,
            node_id: "x".to_string(),
            state: "open".to_string(),
            merged_at: None,
            draft: false,
            requested_reviewers: vec![],
            body: None,
            head: BranchRef {
                ref_name: "b".to_string(),
            },
        };
        assert_eq!(merge_state_of(&pull), MergeState::Open);

        pull.state = "closed".to_string();
        assert_eq!(merge_state_of(&pull), MergeState::Closed);

        pull.merged_at = Some(Utc::now());
        assert_eq!(merge_state_of(&pull), MergeState::Merged);
    }
}
