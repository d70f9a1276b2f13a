//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

use crate::models::ExecutionRecord;

/// A malformed workflow definition. Raised at registration; never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is empty.
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    /// A step has an empty id or provider type.
    #[error("step #{index} is missing its '{field}'")]
    MissingStepField {
        index: usize,
        field: &'static str,
    },

    /// Two or more steps share the same ID.
    #[error("duplicate step ID: '{0}'")]
    DuplicateStepId(String),

    /// A dependency names a step that doesn't exist in the workflow.
    #[error("step '{step_id}' depends on unknown step '{dependency}'")]
    UnknownDependency {
        step_id: String,
        dependency: String,
    },

    /// Depth-first traversal revisited a step still on the stack.
    #[error("workflow graph contains a cycle: {}", path.join(" -> "))]
    CycleDetected { path: Vec<String> },

    #[error("max concurrent steps must be at least 1")]
    InvalidConcurrency,
}

/// How a budget was exceeded.
#[derive(Debug, Clone, PartialEq)]
pub enum BudgetViolation {
    Cost { limit: f64, incurred: f64 },
    Duration { limit_ms: u64, elapsed_ms: u64 },
}

impl std::fmt::Display for BudgetViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cost { limit, incurred } => {
                write!(f, "cost {incurred:.4} exceeds limit {limit:.4}")
            }
            Self::Duration { limit_ms, elapsed_ms } => {
                write!(f, "elapsed {elapsed_ms}ms exceeds limit {limit_ms}ms")
            }
        }
    }
}

/// A runtime scheduling failure. Fatal to the run.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProcessingError {
    /// A step was dispatched before all of its dependencies settled.
    #[error("step '{step_id}' has unmet dependencies: {missing:?}")]
    UnmetDependencies {
        step_id: String,
        missing: Vec<String>,
    },

    /// A required step's provider is not registered or not available.
    #[error("provider '{provider_type}' for required step '{step_id}' is unavailable")]
    ProviderUnavailable {
        step_id: String,
        provider_type: String,
    },

    /// A step cannot run because one of its dependencies failed.
    #[error("step '{step_id}' is blocked by failed dependency '{dependency}'")]
    BlockedByFailedDependency {
        step_id: String,
        dependency: String,
    },

    /// A step failed after exhausting its retry policy.
    #[error("step '{step_id}' failed after {attempts} attempt(s): {message}")]
    StepFailed {
        step_id: String,
        attempts: u32,
        message: String,
    },

    #[error("budget exceeded: {0}")]
    BudgetExceeded(BudgetViolation),

    /// No remaining step became ready during planning.
    #[error("deadlock while planning: no ready step among {remaining:?}")]
    Deadlock { remaining: Vec<String> },
}

/// Errors produced by the orchestration engine (validation + execution).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error("workflow '{0}' is not registered")]
    UnknownWorkflow(String),

    /// The run terminated `failed`. `record` is the terminal record, the same
    /// one `status` returns for `execution_id`.
    #[error("execution {execution_id} failed: {source}")]
    ExecutionFailed {
        execution_id: Uuid,
        #[source]
        source: ProcessingError,
        record: Box<ExecutionRecord>,
    },
}

impl EngineError {
    /// The partial record of a failed run, if this error carries one.
    pub fn record(&self) -> Option<&ExecutionRecord> {
        match self {
            Self::ExecutionFailed { record, .. } => Some(record),
            _ => None,
        }
    }
}
