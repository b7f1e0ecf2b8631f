//! Shared test utilities: fake collaborators and config/state builders.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;

use crate::config::Config;
use crate::effects::{
    AgentCall, AgentInterpreter, AgentOutcome, CollaboratorFailure, FailureKind, PlatformEffect,
    PlatformInterpreter, PlatformResponse,
};
use crate::types::{
    ChangeRequestSnapshot, IssueStatus, ItemStatus, MergeState, PrNumber, RepoId,
};

/// A scripted collaborator failure.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct FakeFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl FakeFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        FakeFailure {
            kind,
            message: message.into(),
        }
    }
}

impl CollaboratorFailure for FakeFailure {
    fn kind(&self) -> FailureKind {
        self.kind
    }
}

/// Platform fake: serves scripted responses in order and records every
/// effect it receives.
#[derive(Debug, Default)]
pub struct FakePlatform {
    responses: Mutex<VecDeque<Result<PlatformResponse, FakeFailure>>>,
    calls: Mutex<Vec<PlatformEffect>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: Result<PlatformResponse, FakeFailure>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn push_status(&self, status: ItemStatus) {
        self.push(Ok(PlatformResponse::ItemStatus(status)));
    }

    pub fn push_ok(&self, response: PlatformResponse) {
        self.push(Ok(response));
    }

    pub fn push_failure(&self, kind: FailureKind, message: &str) {
        self.push(Err(FakeFailure::new(kind, message)));
    }

    /// Every effect interpreted so far, in order.
    pub fn calls(&self) -> Vec<PlatformEffect> {
        self.calls.lock().unwrap().clone()
    }

    /// Count of interpreted effects matching a predicate.
    pub fn count_calls(&self, pred: impl Fn(&PlatformEffect) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|e| pred(e)).count()
    }
}

impl PlatformInterpreter for FakePlatform {
    type Error = FakeFailure;

    async fn interpret(&self, effect: PlatformEffect) -> Result<PlatformResponse, FakeFailure> {
        self.calls.lock().unwrap().push(effect);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(FakeFailure::new(
                    FailureKind::Transient,
                    "no scripted platform response",
                ))
            })
    }
}

/// Agent fake: records calls; fails only when a failure is scripted.
#[derive(Debug, Default)]
pub struct FakeAgent {
    failures: Mutex<VecDeque<FakeFailure>>,
    calls: Mutex<Vec<AgentCall>>,
}

impl FakeAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_failure(&self, kind: FailureKind, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .push_back(FakeFailure::new(kind, message));
    }

    pub fn calls(&self) -> Vec<AgentCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl AgentInterpreter for FakeAgent {
    type Error = FakeFailure;

    async fn invoke(&self, call: AgentCall) -> Result<AgentOutcome, FakeFailure> {
        self.calls.lock().unwrap().push(call);
        match self.failures.lock().unwrap().pop_front() {
            Some(failure) => Err(failure),
            None => Ok(AgentOutcome::default()),
        }
    }
}

impl PlatformInterpreter for std::sync::Arc<FakePlatform> {
    type Error = FakeFailure;

    async fn interpret(&self, effect: PlatformEffect) -> Result<PlatformResponse, FakeFailure> {
        self.as_ref().interpret(effect).await
    }
}

impl AgentInterpreter for std::sync::Arc<FakeAgent> {
    type Error = FakeFailure;

    async fn invoke(&self, call: AgentCall) -> Result<AgentOutcome, FakeFailure> {
        self.as_ref().invoke(call).await
    }
}

/// A config suitable for engine tests: no instructions comment, fast poll.
pub fn test_config(state_dir: &Path) -> Config {
    Config {
        repo: RepoId::new("acme", "widgets"),
        target_branch: "main".to_string(),
        poll_interval: Duration::from_millis(10),
        cooldown_minutes: 60,
        auto_merge: true,
        auto_assign_next: true,
        skip_final_review: false,
        agent_login: "copilot".to_string(),
        agent_endpoint: "http://localhost:0/".to_string(),
        agent_instructions: String::new(),
        issue_queue: Vec::new(),
        issue_numbers: std::collections::BTreeMap::new(),
        state_dir: state_dir.to_path_buf(),
    }
}

/// An open change request with no review activity.
pub fn bare_change_request(pr: u64) -> ChangeRequestSnapshot {
    ChangeRequestSnapshot {
        number: PrNumber(pr),
        merge_state: MergeState::Open,
        is_draft: false,
        requested_reviewers: vec![],
        reviews: vec![],
        comments: vec![],
    }
}

/// Status for an in-progress item with the given change request.
pub fn status_with_cr(cr: ChangeRequestSnapshot) -> ItemStatus {
    ItemStatus {
        issue: IssueStatus::InProgress,
        change_request: Some(cr),
    }
}
