//! The `CapabilityProvider` trait — the contract every provider must fulfil.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProviderError;

/// What a successful provider call hands back to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderOutput {
    /// The step's result, stored verbatim in the execution record.
    pub output: Value,
    /// Cost the provider reports for this call. `None` lets the engine fall
    /// back to the registered cost-per-call.
    pub cost_incurred: Option<f64>,
    /// Wall-clock latency the provider observed.
    pub latency_ms: u64,
}

impl ProviderOutput {
    /// An output with no self-reported cost.
    pub fn new(output: Value, latency_ms: u64) -> Self {
        Self {
            output,
            cost_incurred: None,
            latency_ms,
        }
    }

    /// Attach a self-reported cost.
    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost_incurred = Some(cost);
        self
    }
}

/// The core provider trait.
///
/// `inputs` is the step's static input map merged with its dependencies'
/// results, the execution id and the shared context. `timeout` is advisory:
/// the engine enforces it independently.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    async fn execute(
        &self,
        step_id: &str,
        inputs: Value,
        timeout: Duration,
    ) -> Result<ProviderOutput, ProviderError>;
}
