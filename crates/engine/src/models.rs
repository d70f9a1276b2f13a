//! Core domain models for the orchestration engine.
//!
//! These types are the source of truth for what a workflow looks like in
//! memory, and what a single run of it looks like while (and after) it
//! executes. Definitions serialise to/from the JSON files the CLI reads.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// How many extra attempts a step gets, and how long to wait between them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Attempts made after the first one fails.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    /// Double the wait after every failed attempt.
    pub exponential: bool,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_base_ms: 0,
            exponential: false,
        }
    }

    pub fn exponential(max_retries: u32, backoff_base_ms: u64) -> Self {
        Self {
            max_retries,
            backoff_base_ms,
            exponential: true,
        }
    }

    pub fn fixed(max_retries: u32, backoff_base_ms: u64) -> Self {
        Self {
            max_retries,
            backoff_base_ms,
            exponential: false,
        }
    }

    /// Total attempts the policy allows, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait before retry `k` (1-indexed).
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = Duration::from_millis(self.backoff_base_ms);
        if !self.exponential || retry <= 1 {
            return base;
        }
        let factor = 2u32.saturating_pow(retry - 1);
        base.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(2, 1_000)
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// A single unit of work in a workflow, bound to a provider type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Unique identifier within this workflow (referenced by dependencies).
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Maps to a registered capability provider.
    pub provider_type: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Per-attempt timeout; falls back to the workflow default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default = "default_true")]
    pub parallelizable: bool,
    /// Static inputs merged into every invocation.
    #[serde(default)]
    pub inputs: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

impl Step {
    /// Convenience constructor: required, parallelizable, no retries.
    pub fn new(id: impl Into<String>, provider_type: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            provider_type: provider_type.into(),
            dependencies: Vec::new(),
            timeout_ms: None,
            retry: RetryPolicy::none(),
            required: true,
            parallelizable: true,
            inputs: Map::new(),
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn sequential(mut self) -> Self {
        self.parallelizable = false;
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// What happens to the run when a step fails after exhausting its retries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureStrategy {
    /// Any failure aborts the run.
    #[default]
    FailFast,
    /// Failures of non-required steps are absorbed.
    ContinueOnError,
}

/// A complete, immutable workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub steps: Vec<Step>,
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_max_concurrent_steps")]
    pub max_concurrent_steps: usize,
    #[serde(default)]
    pub failure_strategy: FailureStrategy,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_version() -> String {
    "1.0.0".to_owned()
}

fn default_timeout_ms() -> u64 {
    300_000
}

fn default_max_concurrent_steps() -> usize {
    4
}

impl WorkflowDefinition {
    /// Convenience constructor for testing.
    pub fn new(id: impl Into<String>, name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: default_version(),
            steps,
            default_timeout_ms: default_timeout_ms(),
            max_concurrent_steps: default_max_concurrent_steps(),
            failure_strategy: FailureStrategy::default(),
            metadata: Map::new(),
        }
    }

    pub fn with_failure_strategy(mut self, strategy: FailureStrategy) -> Self {
        self.failure_strategy = strategy;
        self
    }

    pub fn with_max_concurrent_steps(mut self, max: usize) -> Self {
        self.max_concurrent_steps = max;
        self
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Timeout for one attempt of `step`.
    pub fn step_timeout(&self, step: &Step) -> Duration {
        Duration::from_millis(step.timeout_ms.unwrap_or(self.default_timeout_ms))
    }
}

// ---------------------------------------------------------------------------
// Budget
// ---------------------------------------------------------------------------

/// Run-scoped ceilings, checked after every phase settles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_ms: Option<u64>,
}

impl Budget {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = Some(max_cost);
        self
    }

    pub fn with_max_duration_ms(mut self, max_duration_ms: u64) -> Self {
        self.max_duration_ms = Some(max_duration_ms);
        self
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_ms.map(Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// ExecutionStatus
// ---------------------------------------------------------------------------

/// Lifecycle of an execution record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Failed)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending"   => Ok(Self::Pending),
            "running"   => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed"    => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other       => Err(format!("unknown execution status: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionRecord
// ---------------------------------------------------------------------------

/// One entry of the ordered error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEntry {
    pub step_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Running counters kept alongside the id sets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    pub total_steps: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub skipped_count: usize,
    pub total_duration_ms: u64,
    pub cost_incurred: f64,
}

/// Where a step ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    Failed,
    Skipped,
}

/// The state of one run of a workflow.
///
/// `completed_steps`, `failed_steps` and `skipped_steps` are pairwise
/// disjoint; a step id, once settled, never moves between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub completed_steps: BTreeSet<String>,
    pub failed_steps: BTreeSet<String>,
    pub skipped_steps: BTreeSet<String>,
    pub step_results: HashMap<String, Value>,
    pub errors: Vec<ErrorEntry>,
    /// Why the run failed, once it has.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub context: Map<String, Value>,
    pub budget: Budget,
    pub metrics: ExecutionMetrics,
}

impl ExecutionRecord {
    /// A fresh record in `pending`.
    pub fn new(workflow: &WorkflowDefinition, context: Map<String, Value>, budget: Budget) -> Self {
        let mut context = context;
        if let Some(max_cost) = budget.max_cost {
            context.insert("maxCost".into(), Value::from(max_cost));
        }
        if let Some(max_duration) = budget.max_duration_ms {
            context.insert("maxDuration".into(), Value::from(max_duration));
        }

        Self {
            id: Uuid::new_v4(),
            workflow_id: workflow.id.clone(),
            status: ExecutionStatus::Pending,
            started_at: None,
            ended_at: None,
            completed_steps: BTreeSet::new(),
            failed_steps: BTreeSet::new(),
            skipped_steps: BTreeSet::new(),
            step_results: HashMap::new(),
            errors: Vec::new(),
            error: None,
            context,
            budget,
            metrics: ExecutionMetrics {
                total_steps: workflow.steps.len(),
                ..ExecutionMetrics::default()
            },
        }
    }

    /// Which set (if any) already holds `step_id`.
    pub fn outcome_of(&self, step_id: &str) -> Option<StepOutcome> {
        if self.completed_steps.contains(step_id) {
            Some(StepOutcome::Completed)
        } else if self.failed_steps.contains(step_id) {
            Some(StepOutcome::Failed)
        } else if self.skipped_steps.contains(step_id) {
            Some(StepOutcome::Skipped)
        } else {
            None
        }
    }

    /// A dependency is satisfied by a completion or a skip.
    pub fn satisfies_dependency(&self, step_id: &str) -> bool {
        matches!(
            self.outcome_of(step_id),
            Some(StepOutcome::Completed | StepOutcome::Skipped)
        )
    }

    /// Record a success. Returns `false` if the step had already settled.
    pub fn mark_completed(&mut self, step_id: &str, result: Value, cost: f64) -> bool {
        if self.outcome_of(step_id).is_some() {
            return false;
        }
        self.completed_steps.insert(step_id.to_owned());
        self.step_results.insert(step_id.to_owned(), result);
        self.metrics.completed_count += 1;
        self.metrics.cost_incurred += cost;
        true
    }

    /// Record a failure and append it to the error log.
    pub fn mark_failed(&mut self, step_id: &str, message: impl Into<String>) -> bool {
        if self.outcome_of(step_id).is_some() {
            return false;
        }
        self.failed_steps.insert(step_id.to_owned());
        self.metrics.failed_count += 1;
        self.log_error(step_id, message);
        true
    }

    /// Record a skip; skipped steps satisfy their dependents.
    pub fn mark_skipped(&mut self, step_id: &str) -> bool {
        if self.outcome_of(step_id).is_some() {
            return false;
        }
        self.skipped_steps.insert(step_id.to_owned());
        self.metrics.skipped_count += 1;
        true
    }

    pub fn log_error(&mut self, step_id: &str, message: impl Into<String>) {
        self.errors.push(ErrorEntry {
            step_id: step_id.to_owned(),
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    /// Move to `next` if the state machine allows it. Terminal states also
    /// stamp `ended_at`.
    pub fn transition(&mut self, next: ExecutionStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        let now = Utc::now();
        if next == ExecutionStatus::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.ended_at = Some(now);
        }
        self.status = next;
        true
    }

    /// Number of steps that have settled in any of the three sets.
    pub fn settled_count(&self) -> usize {
        self.completed_steps.len() + self.failed_steps.len() + self.skipped_steps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workflow() -> WorkflowDefinition {
        WorkflowDefinition::new("wf", "test", vec![Step::new("a", "mock"), Step::new("b", "mock")])
    }

    #[test]
    fn exponential_backoff_doubles_per_retry() {
        let policy = RetryPolicy::exponential(3, 100);
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.max_attempts(), 4);
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let policy = RetryPolicy::fixed(3, 250);
        assert_eq!(policy.backoff(1), Duration::from_millis(250));
        assert_eq!(policy.backoff(3), Duration::from_millis(250));
    }

    #[test]
    fn settled_sets_stay_disjoint() {
        let mut record = ExecutionRecord::new(&workflow(), Map::new(), Budget::unlimited());
        assert!(record.mark_completed("a", json!(1), 0.1));
        assert!(!record.mark_failed("a", "late failure"));
        assert!(!record.mark_skipped("a"));
        assert!(record.mark_skipped("b"));

        assert_eq!(record.outcome_of("a"), Some(StepOutcome::Completed));
        assert!(record.satisfies_dependency("b"));
        assert!(record.failed_steps.is_empty());
        assert!(record.errors.is_empty());
        assert_eq!(record.settled_count(), 2);
    }

    #[test]
    fn terminal_states_are_absorbing() {
        let mut record = ExecutionRecord::new(&workflow(), Map::new(), Budget::unlimited());
        assert!(!record.transition(ExecutionStatus::Completed));
        assert!(record.transition(ExecutionStatus::Running));
        assert!(record.started_at.is_some());
        assert!(record.transition(ExecutionStatus::Cancelled));
        assert!(record.ended_at.is_some());
        assert!(!record.transition(ExecutionStatus::Running));
        assert!(!record.transition(ExecutionStatus::Failed));
        assert_eq!(record.status, ExecutionStatus::Cancelled);
    }

    #[test]
    fn budget_limits_are_mirrored_into_context() {
        let budget = Budget::unlimited().with_max_cost(0.5).with_max_duration_ms(1_000);
        let record = ExecutionRecord::new(&workflow(), Map::new(), budget);
        assert_eq!(record.context["maxCost"], json!(0.5));
        assert_eq!(record.context["maxDuration"], json!(1_000));
        assert_eq!(record.metrics.total_steps, 2);
    }

    #[test]
    fn step_defaults_when_deserialised() {
        let step: Step = serde_json::from_value(json!({
            "id": "fetch",
            "providerType": "http",
        }))
        .unwrap();
        assert!(step.required);
        assert!(step.parallelizable);
        assert_eq!(step.retry, RetryPolicy::default());

        let strategy: FailureStrategy = serde_json::from_value(json!("continue-on-error")).unwrap();
        assert_eq!(strategy, FailureStrategy::ContinueOnError);
        assert_eq!("cancelled".parse::<ExecutionStatus>().unwrap(), ExecutionStatus::Cancelled);
    }
}
