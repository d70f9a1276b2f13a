//! Executor tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning knobs for the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Per-attempt timeout used when neither the step nor the workflow sets one.
    pub default_step_timeout_ms: u64,
    /// Buffer size of the event broadcast channel.
    pub event_channel_capacity: usize,
    /// Hard cap on batch size, applied on top of each workflow's own limit.
    pub max_concurrent_steps_ceiling: usize,
}

impl ExecutorConfig {
    pub fn default_step_timeout(&self) -> Duration {
        Duration::from_millis(self.default_step_timeout_ms)
    }

    /// Batch size for a workflow asking for `requested` concurrent steps.
    pub fn batch_size(&self, requested: usize) -> usize {
        requested.clamp(1, self.max_concurrent_steps_ceiling.max(1))
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_ms: 300_000,
            event_channel_capacity: 1024,
            max_concurrent_steps_ceiling: 32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_size_is_clamped() {
        let config = ExecutorConfig {
            max_concurrent_steps_ceiling: 4,
            ..ExecutorConfig::default()
        };
        assert_eq!(config.batch_size(0), 1);
        assert_eq!(config.batch_size(3), 3);
        assert_eq!(config.batch_size(10), 4);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: ExecutorConfig =
            serde_json::from_str(r#"{ "event_channel_capacity": 16 }"#).unwrap();
        assert_eq!(config.event_channel_capacity, 16);
        assert_eq!(config.default_step_timeout(), Duration::from_secs(300));
    }
}
