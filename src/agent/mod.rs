//! Agent-invocation client: JSON-RPC over HTTPS against the remote
//! capability server.

pub mod client;

pub use client::{AgentApiError, AgentHttpClient};
