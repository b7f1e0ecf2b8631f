//! Platform API error types.
//!
//! Errors are categorized into the engine's failure taxonomy. The
//! categorization drives everything downstream: transient failures retry,
//! rate limits back the scheduler off, missing artifacts fail the item, and
//! auth failures stop the loop.

use std::fmt;
use thiserror::Error;

use crate::effects::{CollaboratorFailure, FailureKind};

/// A platform API error with categorization.
#[derive(Debug, Error)]
pub struct PlatformApiError {
    /// The failure category.
    pub kind: FailureKind,

    /// The HTTP status code, if one could be determined.
    pub status_code: Option<u16>,

    /// A human-readable description.
    pub message: String,

    /// The underlying octocrab error, if any.
    #[source]
    pub source: Option<octocrab::Error>,
}

impl fmt::Display for PlatformApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "platform API error (HTTP {}): {}", code, self.message),
            None => write!(f, "platform API error: {}", self.message),
        }
    }
}

impl CollaboratorFailure for PlatformApiError {
    fn kind(&self) -> FailureKind {
        self.kind
    }
}

impl PlatformApiError {
    /// Creates a transient error without an underlying octocrab source.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a not-found error without an underlying octocrab source.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::NotFound,
            status_code: Some(404),
            message: message.into(),
            source: None,
        }
    }

    /// Categorizes an octocrab error into the failure taxonomy.
    ///
    /// - 401, and 403 without rate-limit markers → `Auth`
    /// - 404 → `NotFound`
    /// - 429, and 403 with rate-limit markers → `RateLimited`
    /// - 5xx and network-level failures → `Transient`
    /// - anything else → `Transient` (the engine's actions are idempotent,
    ///   so an optimistic retry next cycle is safe)
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let status_code = extract_status_code(&err);
        let message = err.to_string();

        let kind = match status_code {
            Some(401) => FailureKind::Auth,
            Some(403) if is_rate_limit_message(&message) => FailureKind::RateLimited,
            Some(403) => FailureKind::Auth,
            Some(404) => FailureKind::NotFound,
            Some(429) => FailureKind::RateLimited,
            Some(code) if (500..600).contains(&code) => FailureKind::Transient,
            Some(_) => FailureKind::Transient,
            None => FailureKind::Transient,
        };

        Self {
            kind,
            status_code,
            message,
            source: Some(err),
        }
    }
}

/// Extracts the HTTP status code from an octocrab error, if present.
///
/// octocrab does not expose a stable status-code accessor across all of its
/// error variants, so this parses well-established message patterns; `None`
/// results in the conservative `Transient` categorization.
fn extract_status_code(err: &octocrab::Error) -> Option<u16> {
    let err_str = err.to_string();

    if let Some(idx) = err_str.find("status: ") {
        let rest = &err_str[idx + 8..];
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(code) = digits.parse() {
            return Some(code);
        }
    }

    for code in [401u16, 403, 404, 422, 429, 500, 502, 503] {
        if err_str.contains(&code.to_string()) {
            return Some(code);
        }
    }
    None
}

/// Checks if an error message indicates a rate limit rather than a
/// permissions problem (both surface as HTTP 403).
fn is_rate_limit_message(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("rate limit")
        || message_lower.contains("api rate")
        || message_lower.contains("secondary rate")
        || message_lower.contains("abuse detection")
}
