//! `EchoProvider` — echoes its inputs back after a fixed delay.
//!
//! Used by `orchestrator run` to dry-run a workflow against the registered
//! latency profile without calling any real backend.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::debug;

use crate::{CapabilityProvider, ProviderError, ProviderOutput};

pub struct EchoProvider {
    provider_type: String,
    delay: Duration,
}

impl EchoProvider {
    pub fn new(provider_type: impl Into<String>, delay: Duration) -> Self {
        Self {
            provider_type: provider_type.into(),
            delay,
        }
    }
}

#[async_trait]
impl CapabilityProvider for EchoProvider {
    async fn execute(
        &self,
        step_id: &str,
        inputs: Value,
        _timeout: Duration,
    ) -> Result<ProviderOutput, ProviderError> {
        let started = Instant::now();
        tokio::time::sleep(self.delay).await;
        debug!(provider = %self.provider_type, step_id, "echo provider settled");

        let output = json!({
            "provider": self.provider_type,
            "step": step_id,
            "echo": inputs,
        });
        Ok(ProviderOutput::new(output, started.elapsed().as_millis() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn echoes_inputs_after_delay() {
        let provider = EchoProvider::new("analysis", Duration::from_millis(250));
        let started = Instant::now();

        let out = provider
            .execute("s1", json!({ "topic": "rust" }), Duration::from_secs(1))
            .await
            .expect("echo never fails");

        assert!(started.elapsed() >= Duration::from_millis(250));
        assert_eq!(out.output["echo"]["topic"], "rust");
        assert_eq!(out.output["provider"], "analysis");
        assert_eq!(out.latency_ms, 250);
        assert!(out.cost_incurred.is_none());
    }
}
