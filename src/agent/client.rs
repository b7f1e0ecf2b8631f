//! HTTP client for the remote agent capability server.
//!
//! The server speaks JSON-RPC 2.0 over HTTPS with bearer authentication and
//! a session header: an `initialize` call opens the session, after which
//! capabilities are invoked via `tools/call`. The session is established
//! lazily on first use and re-established after a session-level failure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::effects::{AgentCall, AgentInterpreter, AgentOutcome, CollaboratorFailure, FailureKind};

/// Bound on any single capability call.
const CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Header carrying the session id.
const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Protocol version announced during initialization.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// Errors from the agent capability server.
#[derive(Debug, Error)]
pub enum AgentApiError {
    #[error("agent endpoint request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("agent endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("agent session could not be initialized: {0}")]
    Initialize(String),

    #[error("capability {capability} failed: {message}")]
    Capability { capability: String, message: String },
}

impl CollaboratorFailure for AgentApiError {
    fn kind(&self) -> FailureKind {
        match self {
            AgentApiError::Http(_) => FailureKind::Transient,
            AgentApiError::Status { status: 401, .. } | AgentApiError::Status { status: 403, .. } => {
                FailureKind::Auth
            }
            AgentApiError::Status { status: 404, .. } => FailureKind::NotFound,
            AgentApiError::Status { status: 429, .. } => FailureKind::RateLimited,
            AgentApiError::Status { .. } => FailureKind::Transient,
            AgentApiError::Initialize(_) => FailureKind::Transient,
            AgentApiError::Capability { .. } => FailureKind::Transient,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<serde_json::Value>,
    error: Option<RpcError>,
}

/// JSON-RPC client for the remote capability server.
pub struct AgentHttpClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
    session: Mutex<Option<String>>,
    next_id: AtomicU64,
}

impl AgentHttpClient {
    /// Creates a client for the given endpoint with bearer authentication.
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Result<Self, AgentApiError> {
        let http = reqwest::Client::builder().timeout(CALL_TIMEOUT).build()?;
        Ok(AgentHttpClient {
            http,
            endpoint: endpoint.into(),
            token: token.into(),
            session: Mutex::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    fn request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends one JSON-RPC request, attaching the session header when a
    /// session is open.
    async fn post(
        &self,
        session: Option<&str>,
        method: &str,
        params: serde_json::Value,
    ) -> Result<(RpcResponse, Option<String>), AgentApiError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.request_id(),
            "method": method,
            "params": params,
        });

        let mut request = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&body);
        if let Some(sid) = session {
            request = request.header(SESSION_HEADER, sid);
        }

        let response = request.send().await?;
        let status = response.status();
        let returned_session = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: RpcResponse = response.json().await?;
        Ok((parsed, returned_session))
    }

    /// Opens a session if none is open yet, returning the session id.
    async fn ensure_session(&self) -> Result<String, AgentApiError> {
        let mut guard = self.session.lock().await;
        if let Some(sid) = guard.as_ref() {
            return Ok(sid.clone());
        }

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        let (response, returned_session) = self.post(None, "initialize", params).await?;

        if let Some(error) = response.error {
            return Err(AgentApiError::Initialize(error.message));
        }
        let sid = returned_session
            .ok_or_else(|| AgentApiError::Initialize("server returned no session id".to_string()))?;

        info!(session = %sid, "Agent capability session initialized");
        *guard = Some(sid.clone());
        Ok(sid)
    }

    /// Drops the current session so the next call re-initializes.
    async fn reset_session(&self) {
        *self.session.lock().await = None;
    }
}

impl AgentInterpreter for AgentHttpClient {
    type Error = AgentApiError;

    async fn invoke(&self, call: AgentCall) -> Result<AgentOutcome, Self::Error> {
        let session = self.ensure_session().await?;
        debug!(capability = %call.capability, "Invoking agent capability");

        let params = json!({
            "name": call.capability.clone(),
            "arguments": call.arguments,
        });
        let result = self.post(Some(&session), "tools/call", params).await;

        let (response, _) = match result {
            Ok(ok) => ok,
            Err(err) => {
                // A dead session is not recoverable by retrying the same
                // call; drop it so the next cycle starts fresh.
                self.reset_session().await;
                return Err(err);
            }
        };

        if let Some(error) = response.error {
            return Err(AgentApiError::Capability {
                capability: call.capability,
                message: error.message,
            });
        }

        Ok(AgentOutcome {
            content: response.result.unwrap_or(serde_json::Value::Null),
        })
    }
}

impl std::fmt::Debug for AgentHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHttpClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_kinds() {
        let auth = AgentApiError::Status {
            status: 401,
            body: String::new(),
        };
        assert_eq!(auth.kind(), FailureKind::Auth);

        let limited = AgentApiError::Status {
            status: 429,
            body: String::new(),
        };
        assert_eq!(limited.kind(), FailureKind::RateLimited);

        let server = AgentApiError::Status {
            status: 502,
            body: String::new(),
        };
        assert_eq!(server.kind(), FailureKind::Transient);
    }

    #[test]
    fn capability_failures_are_transient() {
        let err = AgentApiError::Capability {
            capability: "assign_copilot_to_issue".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(err.kind(), FailureKind::Transient);
    }
}
