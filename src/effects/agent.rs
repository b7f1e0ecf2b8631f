//! Agent-invocation effect types.
//!
//! The agent collaborator exposes exactly one operation: invoke a named
//! remote capability with structured arguments. The two capabilities the
//! engine uses are described here as constructors; the interpreter in
//! `crate::agent` speaks the wire protocol.

use serde::{Deserialize, Serialize};

use crate::types::{IssueNumber, PrNumber, RepoId};

/// Capability that assigns the agent to an issue.
pub const ASSIGN_CAPABILITY: &str = "assign_copilot_to_issue";

/// Capability that requests an agent review on a change request.
pub const REVIEW_CAPABILITY: &str = "request_copilot_review";

/// An invocation of a named remote capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCall {
    /// Name of the remote capability.
    pub capability: String,

    /// Structured arguments, passed through verbatim.
    pub arguments: serde_json::Value,
}

impl AgentCall {
    /// Builds the call that assigns the agent to an issue.
    pub fn assign_to_issue(repo: &RepoId, issue: IssueNumber) -> Self {
        AgentCall {
            capability: ASSIGN_CAPABILITY.to_string(),
            arguments: serde_json::json!({
                "owner": repo.owner,
                "repo": repo.repo,
                "issueNumber": issue.0,
            }),
        }
    }

    /// Builds the call that requests an agent review on a change request.
    pub fn request_review(repo: &RepoId, pr: PrNumber) -> Self {
        AgentCall {
            capability: REVIEW_CAPABILITY.to_string(),
            arguments: serde_json::json!({
                "owner": repo.owner,
                "repo": repo.repo,
                "pullNumber": pr.0,
            }),
        }
    }
}

/// The structured result of a successful capability invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOutcome {
    /// Whatever content the capability returned, preserved for logging.
    pub content: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_call_shape() {
        let call = AgentCall::assign_to_issue(&RepoId::new("acme", "widgets"), IssueNumber(12));
        assert_eq!(call.capability, ASSIGN_CAPABILITY);
        assert_eq!(call.arguments["owner"], "acme");
        assert_eq!(call.arguments["repo"], "widgets");
        assert_eq!(call.arguments["issueNumber"], 12);
    }

    #[test]
    fn review_call_shape() {
        let call = AgentCall::request_review(&RepoId::new("acme", "widgets"), PrNumber(34));
        assert_eq!(call.capability, REVIEW_CAPABILITY);
        assert_eq!(call.arguments["pullNumber"], 34);
    }
}
