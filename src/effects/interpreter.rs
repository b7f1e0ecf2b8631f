//! Effect interpreter traits and the shared failure taxonomy.
//!
//! The engine's logic never talks to the network directly; it emits effects
//! and hands them to an interpreter. The trait-based design enables mock
//! interpreters for testing and keeps both integrations behind capability
//! interfaces.

use std::future::Future;

use super::agent::{AgentCall, AgentOutcome};
use super::platform::{PlatformEffect, PlatformResponse};

/// Categorization of a collaborator failure, shared by both clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Network-level or transient server failure. Retried on the next cycle
    /// with no state change.
    Transient,

    /// The collaborator is rate limiting us. The scheduler backs off before
    /// the next cycle's calls.
    RateLimited,

    /// The referenced artifact does not exist. Permanent for the item.
    NotFound,

    /// Authentication or authorization failure. Fatal to the scheduler.
    Auth,
}

impl FailureKind {
    /// Returns true if retrying the same call later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Transient | FailureKind::RateLimited)
    }
}

/// A typed collaborator failure.
pub trait CollaboratorFailure: std::error::Error + Send + Sync + 'static {
    /// The failure category, driving retry and fatality decisions.
    fn kind(&self) -> FailureKind;
}

/// Interprets platform effects against the code-hosting platform.
///
/// Implementations are constructed with a `RepoId`, so all effects executed
/// through a single interpreter instance are scoped to that repository.
///
/// # Example (fake for testing)
///
/// ```ignore
/// struct FakePlatform {
///     responses: RefCell<VecDeque<Result<PlatformResponse, FakeFailure>>>,
/// }
///
/// impl PlatformInterpreter for FakePlatform {
///     type Error = FakeFailure;
///
///     async fn interpret(&self, effect: PlatformEffect) -> Result<PlatformResponse, FakeFailure> {
///         self.responses.borrow_mut().pop_front().expect("unexpected effect")
///     }
/// }
/// ```
pub trait PlatformInterpreter {
    /// The error type returned by this interpreter.
    type Error: CollaboratorFailure;

    /// Execute a platform effect and return its response.
    fn interpret(
        &self,
        effect: PlatformEffect,
    ) -> impl Future<Output = Result<PlatformResponse, Self::Error>> + Send;
}

/// Invokes remote agent capabilities.
pub trait AgentInterpreter {
    /// The error type returned by this interpreter.
    type Error: CollaboratorFailure;

    /// Invoke a named capability and return its structured outcome.
    fn invoke(
        &self,
        call: AgentCall,
    ) -> impl Future<Output = Result<AgentOutcome, Self::Error>> + Send;
}
