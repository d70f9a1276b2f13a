//! `policy` crate — turns an objective into a registered workflow.
//!
//! The policy layer picks a template from a fixed catalog (asking a pluggable
//! classifier first, falling back to a deterministic heuristic), customises a
//! copy of it for the caller's constraints and preferences, computes plan-time
//! estimates from the capability registry, and registers the result with the
//! engine.

pub mod classifier;
pub mod customize;
pub mod error;
pub mod estimate;
pub mod layer;
pub mod request;
pub mod templates;

pub use classifier::{heuristic_template, SelectionSource, TemplateClassifier};
pub use customize::customize;
pub use error::{ClassifierError, PolicyError};
pub use estimate::{estimate, Estimate, RiskLevel};
pub use layer::{OrchestrationPlan, PolicyLayer, Selection};
pub use request::{Constraints, PlanRequest, Preferences, Priority, QualityLevel};
pub use templates::{TemplateCatalog, TemplateKey, WorkflowTemplate};
