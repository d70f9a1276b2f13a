//! The engine's public face: workflow registration plus the execution API.
//!
//! `Orchestrator` owns the workflow catalog and a [`WorkflowExecutor`]; the
//! policy layer registers customised workflows here and callers execute,
//! poll and cancel them by id.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::ExecutorConfig;
use crate::dag::{self, Phase};
use crate::error::EngineError;
use crate::events::ExecutionEvent;
use crate::executor::{ExecutionHandle, WorkflowExecutor};
use crate::models::{Budget, ExecutionRecord, WorkflowDefinition};
use crate::registry::CapabilityRegistry;

pub struct Orchestrator {
    workflows: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
    executor: WorkflowExecutor,
}

impl Orchestrator {
    pub fn new(registry: Arc<CapabilityRegistry>, config: ExecutorConfig) -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            executor: WorkflowExecutor::new(registry, config),
        }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        self.executor.registry()
    }

    pub fn executor(&self) -> &WorkflowExecutor {
        &self.executor
    }

    /// Validate and store a workflow definition, replacing any earlier one
    /// with the same id. Returns its execution phases.
    ///
    /// # Errors
    /// `EngineError::Validation` on any malformed definition; nothing is stored.
    #[instrument(skip(self, definition), fields(workflow_id = %definition.id))]
    pub fn register_workflow(&self, definition: WorkflowDefinition) -> Result<Vec<Phase>, EngineError> {
        let phases = dag::validate_and_plan(&definition)?;
        info!(steps = definition.steps.len(), phases = phases.len(), "workflow registered");

        self.workflows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(definition.id.clone(), Arc::new(definition));
        Ok(phases)
    }

    pub fn workflow(&self, workflow_id: &str) -> Option<Arc<WorkflowDefinition>> {
        let workflows = self.workflows.read().unwrap_or_else(PoisonError::into_inner);
        workflows.get(workflow_id).cloned()
    }

    /// Registered workflow ids, sorted.
    pub fn workflow_ids(&self) -> Vec<String> {
        let workflows = self.workflows.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<_> = workflows.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Run a registered workflow to completion.
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        context: Map<String, Value>,
        budget: Budget,
    ) -> Result<ExecutionRecord, EngineError> {
        let workflow = self
            .workflow(workflow_id)
            .ok_or_else(|| EngineError::UnknownWorkflow(workflow_id.to_owned()))?;
        self.executor.run(&workflow, context, budget).await
    }

    /// Start a registered workflow in the background.
    pub fn submit_workflow(
        &self,
        workflow_id: &str,
        context: Map<String, Value>,
        budget: Budget,
    ) -> Result<ExecutionHandle, EngineError> {
        let workflow = self
            .workflow(workflow_id)
            .ok_or_else(|| EngineError::UnknownWorkflow(workflow_id.to_owned()))?;
        self.executor.spawn(workflow, context, budget)
    }

    pub fn cancel_execution(&self, execution_id: Uuid) -> bool {
        self.executor.cancel(execution_id)
    }

    pub fn get_status(&self, execution_id: Uuid) -> Option<ExecutionRecord> {
        self.executor.status(execution_id)
    }

    /// Release a finished execution's record. See [`WorkflowExecutor::forget`].
    pub fn forget_execution(&self, execution_id: Uuid) -> Option<ExecutionRecord> {
        self.executor.forget(execution_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.executor.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::models::{ExecutionStatus, Step};
    use crate::registry::CapabilityDescriptor;
    use providers::mock::MockProvider;
    use serde_json::json;

    fn orchestrator() -> Orchestrator {
        let registry = Arc::new(CapabilityRegistry::new());
        registry.register_provider(
            CapabilityDescriptor::new("mock", 0.05, 10),
            Arc::new(MockProvider::returning("mock", json!({ "ok": true }))),
        );
        Orchestrator::new(registry, ExecutorConfig::default())
    }

    #[test]
    fn cyclic_workflow_is_never_registered() {
        let orch = orchestrator();
        let wf = WorkflowDefinition::new(
            "loop",
            "loop",
            vec![
                Step::new("a", "mock").depends_on(["b"]),
                Step::new("b", "mock").depends_on(["a"]),
            ],
        );

        let err = orch.register_workflow(wf).unwrap_err();
        assert!(matches!(err, EngineError::Validation(ValidationError::CycleDetected { .. })));
        assert!(orch.workflow("loop").is_none());
    }

    #[tokio::test]
    async fn registered_workflow_executes_by_id() {
        let orch = orchestrator();
        let phases = orch
            .register_workflow(WorkflowDefinition::new(
                "pair",
                "pair",
                vec![Step::new("a", "mock"), Step::new("b", "mock").depends_on(["a"])],
            ))
            .unwrap();
        assert_eq!(phases.len(), 2);
        assert_eq!(orch.workflow_ids(), vec!["pair"]);

        let record = orch
            .execute_workflow("pair", Map::new(), Budget::unlimited())
            .await
            .unwrap();
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(orch.get_status(record.id), Some(record));
    }

    #[tokio::test]
    async fn unknown_workflow_and_execution_ids() {
        let orch = orchestrator();
        assert!(matches!(
            orch.execute_workflow("nope", Map::new(), Budget::unlimited()).await,
            Err(EngineError::UnknownWorkflow(id)) if id == "nope"
        ));
        assert!(orch.get_status(Uuid::new_v4()).is_none());
        assert!(!orch.cancel_execution(Uuid::new_v4()));
        assert!(orch.forget_execution(Uuid::new_v4()).is_none());
    }

    #[tokio::test]
    async fn forgotten_execution_is_no_longer_tracked() {
        let orch = orchestrator();
        orch.register_workflow(WorkflowDefinition::new("one", "one", vec![Step::new("a", "mock")]))
            .unwrap();
        let record = orch
            .execute_workflow("one", Map::new(), Budget::unlimited())
            .await
            .unwrap();

        assert_eq!(orch.forget_execution(record.id), Some(record.clone()));
        assert!(orch.get_status(record.id).is_none());
        assert!(orch.executor().executions().is_empty());
        // The definition stays registered.
        assert!(orch.workflow("one").is_some());
    }
}
