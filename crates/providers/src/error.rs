//! Provider-level error type.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by a provider's `execute` method.
///
/// The engine uses the variant to decide retry behaviour:
/// - `Retryable` / `Timeout` — the attempt counts against the step's retry policy.
/// - `Fatal`                 — remaining retries are abandoned.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    /// Transient failure; another attempt may succeed.
    #[error("retryable provider error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal provider error: {0}")]
    Fatal(String),

    /// The call did not settle within the step's timeout.
    #[error("provider call timed out after {0:?}")]
    Timeout(Duration),
}

impl ProviderError {
    /// Whether the engine may spend another attempt after this error.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Fatal(_))
    }
}
