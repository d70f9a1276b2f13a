//! Plan-time estimates.
//!
//! Computed once from the capability registry before a run starts, and
//! compared against the actual record afterwards by the analyzer.

use serde::{Deserialize, Serialize};

use engine::{CapabilityDescriptor, CapabilityRegistry, WorkflowDefinition};

/// Required steps whose provider succeeds less often than this are high risk.
pub const HIGH_RISK_SUCCESS_RATE: f64 = 0.80;
/// ...and less often than this, medium risk.
pub const MEDIUM_RISK_SUCCESS_RATE: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Estimate {
    /// Worst case: every step spends all of its retries.
    pub cost: f64,
    /// Sequential steps summed plus the slowest parallel step.
    pub duration_ms: u64,
    /// Sum over phases of each phase's slowest path, honouring batch size.
    pub critical_path_ms: u64,
    /// Mean success rate of the workflow's providers.
    pub quality: f64,
    pub risk: RiskLevel,
}

/// Estimate cost, duration, quality and risk of running `workflow`.
///
/// Steps whose provider isn't registered contribute no cost or latency; a
/// required one makes the risk high.
pub fn estimate(workflow: &WorkflowDefinition, registry: &CapabilityRegistry) -> Estimate {
    let descriptor = |provider_type: &str| -> Option<CapabilityDescriptor> { registry.get(provider_type) };
    let latency = |provider_type: &str| descriptor(provider_type).map_or(0, |d| d.avg_latency_ms);

    let cost: f64 = workflow
        .steps
        .iter()
        .filter_map(|s| {
            descriptor(&s.provider_type)
                .map(|d| d.cost_per_call * f64::from(s.retry.max_attempts()))
        })
        .sum();

    let mut sequential_ms = 0u64;
    let mut parallel_max_ms = 0u64;
    for step in &workflow.steps {
        let ms = latency(&step.provider_type);
        if step.parallelizable {
            parallel_max_ms = parallel_max_ms.max(ms);
        } else {
            sequential_ms += ms;
        }
    }
    let duration_ms = sequential_ms + parallel_max_ms;

    let critical_path_ms: u64 = match engine::plan(workflow) {
        Ok(phases) => {
            let batch = workflow.max_concurrent_steps.max(1);
            phases
                .iter()
                .map(|phase| {
                    let steps: Vec<_> = phase.iter().filter_map(|id| workflow.step(id)).collect();
                    let parallel: Vec<u64> = steps
                        .iter()
                        .filter(|s| s.parallelizable)
                        .map(|s| latency(&s.provider_type))
                        .collect();
                    let batches: u64 = parallel
                        .chunks(batch)
                        .map(|chunk| chunk.iter().copied().max().unwrap_or(0))
                        .sum();
                    let sequential: u64 = steps
                        .iter()
                        .filter(|s| !s.parallelizable)
                        .map(|s| latency(&s.provider_type))
                        .sum();
                    batches + sequential
                })
                .sum()
        }
        Err(_) => duration_ms,
    };

    let rates: Vec<f64> = workflow
        .steps
        .iter()
        .filter_map(|s| descriptor(&s.provider_type).map(|d| d.success_rate))
        .collect();
    let quality = if rates.is_empty() {
        if workflow.steps.is_empty() {
            1.0
        } else {
            0.0
        }
    } else {
        rates.iter().sum::<f64>() / rates.len() as f64
    };

    let risk = workflow
        .steps
        .iter()
        .filter(|s| s.required)
        .map(|s| match descriptor(&s.provider_type) {
            Some(d) if d.available && d.success_rate >= MEDIUM_RISK_SUCCESS_RATE => RiskLevel::Low,
            Some(d) if d.available && d.success_rate >= HIGH_RISK_SUCCESS_RATE => RiskLevel::Medium,
            _ => RiskLevel::High,
        })
        .max()
        .unwrap_or(RiskLevel::Low);

    Estimate {
        cost,
        duration_ms,
        critical_path_ms,
        quality,
        risk,
    }
}
