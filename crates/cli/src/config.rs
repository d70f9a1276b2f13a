//! YAML configuration for the `orchestrator` binary.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use engine::{CapabilityDescriptor, ExecutorConfig};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub executor: ExecutorConfig,
    /// Used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Descriptors registered before planning or running; dry runs bind an
    /// echo provider to each.
    pub capabilities: Vec<CapabilityDescriptor>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            log_level: "info".to_string(),
            capabilities: default_capabilities(),
        }
    }
}

/// A latency/cost profile covering every provider type the built-in
/// templates use.
fn default_capabilities() -> Vec<CapabilityDescriptor> {
    vec![
        CapabilityDescriptor::new("research", 0.05, 200).with_capabilities(["search", "research"]),
        CapabilityDescriptor::new("data", 0.02, 100)
            .with_success_rate(0.97)
            .with_capabilities(["market-data"]),
        CapabilityDescriptor::new("analysis", 0.08, 300).with_capabilities(["analysis", "reasoning"]),
        CapabilityDescriptor::new("review", 0.06, 250).with_capabilities(["review"]),
        CapabilityDescriptor::new("synthesis", 0.04, 150).with_capabilities(["writing", "summary"]),
        CapabilityDescriptor::new("evaluation", 0.01, 50).with_capabilities(["scoring"]),
    ]
}

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<CliConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: CliConfig = serde_yaml::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &CliConfig) -> Result<(), ConfigError> {
    let level = config.log_level.trim().to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        return Err(ConfigError::Invalid(format!(
            "log_level '{}' must be one of {}",
            config.log_level,
            LOG_LEVELS.join(", ")
        )));
    }

    let executor = &config.executor;
    if executor.default_step_timeout_ms == 0 {
        return Err(ConfigError::Invalid(
            "executor.default_step_timeout_ms must be > 0".to_string(),
        ));
    }
    if executor.event_channel_capacity == 0 {
        return Err(ConfigError::Invalid(
            "executor.event_channel_capacity must be > 0".to_string(),
        ));
    }
    if executor.max_concurrent_steps_ceiling == 0 {
        return Err(ConfigError::Invalid(
            "executor.max_concurrent_steps_ceiling must be > 0".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for descriptor in &config.capabilities {
        let name = descriptor.provider_type.trim();
        if name.is_empty() {
            return Err(ConfigError::Invalid(
                "capabilities[].providerType must not be empty".to_string(),
            ));
        }
        if !seen.insert(name) {
            return Err(ConfigError::Invalid(format!(
                "capabilities[{name}] is declared more than once"
            )));
        }
        if !descriptor.cost_per_call.is_finite() || descriptor.cost_per_call < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "capabilities[{name}].costPerCall must be a non-negative number"
            )));
        }
        if !(0.0..=1.0).contains(&descriptor.success_rate) {
            return Err(ConfigError::Invalid(format!(
                "capabilities[{name}].successRate must be within 0.0..=1.0"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<CliConfig, ConfigError> {
        let config: CliConfig = serde_yaml::from_str(yaml)?;
        validate_config(&config)?;
        Ok(config)
    }

    #[test]
    fn empty_file_means_defaults() {
        let config = parse("{}").unwrap();
        assert_eq!(config, CliConfig::default());
        assert_eq!(config.capabilities.len(), 6);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = parse(
            r#"
log_level: debug
executor:
  max_concurrent_steps_ceiling: 2
capabilities:
  - providerType: research
    costPerCall: 0.1
    avgLatencyMs: 10
    maxConcurrency: 1
"#,
        )
        .unwrap();

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.executor.max_concurrent_steps_ceiling, 2);
        assert_eq!(config.executor.default_step_timeout_ms, 300_000);
        assert_eq!(config.capabilities.len(), 1);
        let research = &config.capabilities[0];
        assert_eq!(research.max_concurrency, 1);
        assert_eq!(research.success_rate, 1.0);
        assert!(research.available);
    }

    #[test]
    fn rejects_duplicate_providers() {
        let err = parse(
            r#"
capabilities:
  - { providerType: research, costPerCall: 0.1, avgLatencyMs: 10 }
  - { providerType: research, costPerCall: 0.2, avgLatencyMs: 20 }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("more than once")));
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(matches!(
            parse("log_level: loud").unwrap_err(),
            ConfigError::Invalid(_)
        ));
        assert!(matches!(
            parse("executor: { event_channel_capacity: 0 }").unwrap_err(),
            ConfigError::Invalid(_)
        ));
        assert!(matches!(
            parse("capabilities: [{ providerType: x, costPerCall: 0.1, avgLatencyMs: 1, successRate: 1.5 }]")
                .unwrap_err(),
            ConfigError::Invalid(_)
        ));
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        assert!(matches!(parse("executor: [").unwrap_err(), ConfigError::Parse(_)));
    }
}
