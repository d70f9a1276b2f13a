//! `engine` crate — workflow models, dependency planning, the capability
//! registry and the execution engine.

pub mod config;
pub mod dag;
pub mod error;
pub mod events;
pub mod executor;
pub mod models;
pub mod registry;
pub mod service;

pub use config::ExecutorConfig;
pub use dag::{plan, validate, validate_and_plan, Phase};
pub use error::{BudgetViolation, EngineError, ProcessingError, ValidationError};
pub use events::{EventBus, ExecutionEvent};
pub use executor::{ExecutionHandle, WorkflowExecutor};
pub use models::{
    Budget, ErrorEntry, ExecutionMetrics, ExecutionRecord, ExecutionStatus, FailureStrategy,
    RetryPolicy, Step, StepOutcome, WorkflowDefinition,
};
pub use registry::{CapabilityDescriptor, CapabilityRegistry, ResolvedCapability};
pub use service::Orchestrator;
