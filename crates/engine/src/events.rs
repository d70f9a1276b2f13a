//! Execution events — realtime fan-out of a run's lifecycle to the analyzer,
//! telemetry sinks, or anything else that subscribes.
//!
//! Publishing never fails: with no live subscriber the event is simply dropped;
//! the execution record remains the source of truth.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Something that happened during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    PhaseStarted {
        execution_id: Uuid,
        phase: usize,
        step_ids: Vec<String>,
    },
    StepStarted {
        execution_id: Uuid,
        step_id: String,
        provider_type: String,
    },
    StepRetrying {
        execution_id: Uuid,
        step_id: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    StepCompleted {
        execution_id: Uuid,
        step_id: String,
        cost: f64,
        latency_ms: u64,
        attempts: u32,
        output: Value,
    },
    StepFailed {
        execution_id: Uuid,
        step_id: String,
        attempts: u32,
        error: String,
    },
    StepSkipped {
        execution_id: Uuid,
        step_id: String,
        reason: String,
    },
    WorkflowCompleted {
        execution_id: Uuid,
        workflow_id: String,
        cost_incurred: f64,
        duration_ms: u64,
    },
    WorkflowFailed {
        execution_id: Uuid,
        workflow_id: String,
        error: String,
    },
    WorkflowCancelled {
        execution_id: Uuid,
        workflow_id: String,
    },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> Uuid {
        match self {
            Self::PhaseStarted { execution_id, .. }
            | Self::StepStarted { execution_id, .. }
            | Self::StepRetrying { execution_id, .. }
            | Self::StepCompleted { execution_id, .. }
            | Self::StepFailed { execution_id, .. }
            | Self::StepSkipped { execution_id, .. }
            | Self::WorkflowCompleted { execution_id, .. }
            | Self::WorkflowFailed { execution_id, .. }
            | Self::WorkflowCancelled { execution_id, .. } => *execution_id,
        }
    }

    /// Whether this event ends a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowCompleted { .. } | Self::WorkflowFailed { .. } | Self::WorkflowCancelled { .. }
        )
    }
}

/// In-process event bus based on a tokio broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: ExecutionEvent) {
        // No receivers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();

        bus.publish(ExecutionEvent::WorkflowCancelled {
            execution_id: id,
            workflow_id: "wf".into(),
        });

        let event = rx.recv().await.expect("event");
        assert_eq!(event.execution_id(), id);
        assert!(event.is_terminal());
    }

    #[test]
    fn publish_without_subscribers_is_ok() {
        let bus = EventBus::default();
        bus.publish(ExecutionEvent::StepSkipped {
            execution_id: Uuid::new_v4(),
            step_id: "s".into(),
            reason: "unavailable".into(),
        });
    }

    #[test]
    fn events_serialise_with_a_type_tag() {
        let event = ExecutionEvent::PhaseStarted {
            execution_id: Uuid::nil(),
            phase: 0,
            step_ids: vec!["a".into()],
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "phase_started");
        assert_eq!(value["step_ids"][0], "a");
    }
}
