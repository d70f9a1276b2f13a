//! What a caller asks the policy layer for.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use engine::Budget;

/// Minimum result quality the caller will accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    Basic,
    Standard,
    High,
    Excellent,
}

/// Hard limits on a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityLevel>,
    /// Provider types the workflow may use. `None` means whatever the
    /// registry reports as available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_providers: Option<Vec<String>>,
}

impl Constraints {
    pub fn budget(&self) -> Budget {
        Budget {
            max_cost: self.max_cost,
            max_duration_ms: self.max_duration_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Balanced,
    Speed,
    Cost,
    Quality,
}

/// Soft preferences that shape customisation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub priority: Priority,
}

impl Preferences {
    pub fn prioritising(priority: Priority) -> Self {
        Self { priority }
    }
}

/// Everything needed to plan one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanRequest {
    pub objective: String,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub preferences: Preferences,
    /// Shared inputs merged into every step.
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl PlanRequest {
    pub fn new(objective: impl Into<String>) -> Self {
        Self {
            objective: objective.into(),
            ..Self::default()
        }
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.preferences.priority = priority;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}
