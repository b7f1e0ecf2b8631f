//! Platform client: octocrab wrapper, error categorization, retry policy,
//! and the effect interpreter.

pub mod client;
pub mod error;
pub mod interpreter;
pub mod retry;

pub use client::OctocrabClient;
pub use error::PlatformApiError;
pub use retry::{CALL_TIMEOUT, RetryConfig, retry_with_backoff};
