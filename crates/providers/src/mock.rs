//! `MockProvider` — a test double for `CapabilityProvider`.
//!
//! Useful in unit and integration tests where a real provider is either
//! unavailable or irrelevant.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::{CapabilityProvider, ProviderError, ProviderOutput};

/// Behaviour injected into `MockProvider` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value.
    ReturnValue(Value),
    /// Fail with a `Retryable` error on every call.
    FailRetryable(String),
    /// Fail with a `Fatal` error on every call.
    FailFatal(String),
    /// Fail with a `Retryable` error for the first `failures` calls, then succeed.
    Flaky { failures: usize, then: Value },
    /// Never settle; only the engine's timeout ends the call.
    Hang,
}

/// A mock provider that records every call it receives and returns a
/// programmer-specified result.
pub struct MockProvider {
    /// Label used in test assertions.
    pub name: String,
    /// What the provider will do when `execute` is called.
    pub behaviour: MockBehaviour,
    /// Simulated latency applied before settling.
    pub latency: Duration,
    /// Cost reported on success (`None` defers to the registry).
    pub reported_cost: Option<f64>,
    /// All inputs seen by this provider (in call order).
    pub calls: Arc<Mutex<Vec<Value>>>,
    /// When each call started.
    pub call_times: Arc<Mutex<Vec<Instant>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockProvider {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            latency: Duration::ZERO,
            reported_cost: None,
            calls: Arc::new(Mutex::new(Vec::new())),
            call_times: Arc::new(Mutex::new(Vec::new())),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailFatal(msg.into()))
    }

    /// Create a mock that always fails with a `Retryable` error.
    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailRetryable(msg.into()))
    }

    /// Create a mock that fails `failures` times before succeeding.
    pub fn flaky(name: impl Into<String>, failures: usize, then: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::Flaky { failures, then })
    }

    /// Create a mock that never returns.
    pub fn hanging(name: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::Hang)
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.reported_cost = Some(cost);
        self
    }

    /// Number of times this provider has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Inputs of the `n`-th call.
    pub fn call_input(&self, n: usize) -> Option<Value> {
        self.calls.lock().unwrap().get(n).cloned()
    }

    /// Start instants of every call, in order.
    pub fn call_instants(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    /// Highest number of calls that were in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityProvider for MockProvider {
    async fn execute(
        &self,
        step_id: &str,
        inputs: Value,
        _timeout: Duration,
    ) -> Result<ProviderOutput, ProviderError> {
        let call_index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(inputs);
            calls.len() - 1
        };
        self.call_times.lock().unwrap().push(Instant::now());

        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        if matches!(self.behaviour, MockBehaviour::Hang) {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(self.latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let succeed = |v: &Value| -> Result<ProviderOutput, ProviderError> {
            // Tag the output with the mock's name so tests can trace data flow.
            let mut out = json!({ "provider": self.name, "step": step_id });
            if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), v.as_object()) {
                for (k, val) in v_obj {
                    out_obj.insert(k.clone(), val.clone());
                }
            }
            let result = ProviderOutput::new(out, self.latency.as_millis() as u64);
            Ok(match self.reported_cost {
                Some(cost) => result.with_cost(cost),
                None => result,
            })
        };

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => succeed(v),
            MockBehaviour::FailRetryable(msg) => Err(ProviderError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(ProviderError::Fatal(msg.clone())),
            MockBehaviour::Flaky { failures, then } => {
                if call_index < *failures {
                    Err(ProviderError::Retryable(format!(
                        "{} flaked on call {}",
                        self.name,
                        call_index + 1
                    )))
                } else {
                    succeed(then)
                }
            }
            MockBehaviour::Hang => unreachable!("hanging mock never settles"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returning_mock_tags_output_and_records_input() {
        let mock = MockProvider::returning("search", json!({ "hits": 3 })).with_cost(0.2);

        let out = mock
            .execute("find", json!({ "q": "dag" }), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(out.output["provider"], "search");
        assert_eq!(out.output["step"], "find");
        assert_eq!(out.output["hits"], 3);
        assert_eq!(out.cost_incurred, Some(0.2));
        assert_eq!(mock.call_count(), 1);
        assert_eq!(mock.call_input(0).unwrap()["q"], "dag");
    }

    #[tokio::test]
    async fn flaky_mock_recovers_after_scripted_failures() {
        let mock = MockProvider::flaky("flaky", 2, json!({ "ok": true }));
        let t = Duration::from_secs(1);

        assert!(matches!(
            mock.execute("s", json!({}), t).await,
            Err(ProviderError::Retryable(_))
        ));
        assert!(mock.execute("s", json!({}), t).await.is_err());
        assert!(mock.execute("s", json!({}), t).await.is_ok());
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn fatal_mock_is_not_retryable() {
        let mock = MockProvider::failing_fatal("broken", "bad credentials");
        let err = mock
            .execute("s", json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(ProviderError::Timeout(Duration::from_millis(5)).is_retryable());
    }
}
