//! Effects-as-data for the two external collaborators.
//!
//! Operations are described as plain values and executed by interpreters.
//! This keeps the engine's core pure and testable: dispatch decides *what*
//! should happen, an interpreter decides *how*.

pub mod agent;
pub mod interpreter;
pub mod platform;

pub use agent::{AgentCall, AgentOutcome};
pub use interpreter::{
    AgentInterpreter, CollaboratorFailure, FailureKind, PlatformInterpreter,
};
pub use platform::{PlatformEffect, PlatformResponse};
