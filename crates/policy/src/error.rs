//! Policy-layer error types.

use thiserror::Error;

use engine::EngineError;

/// Why the external classifier could not pick a template.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClassifierError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    #[error("classifier timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("template '{0}' is not in the catalog")]
    UnknownTemplate(String),

    /// Customisation filtered out every step of the template.
    #[error("no steps of template '{0}' survive customisation")]
    NoStepsLeft(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}
