//! `PolicyLayer`: template selection, customisation, estimation and
//! registration in one place.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, instrument, warn};

use engine::{Budget, CapabilityRegistry, Orchestrator, WorkflowDefinition};

use crate::classifier::{heuristic_template, SelectionSource, TemplateClassifier};
use crate::customize::customize;
use crate::error::{ClassifierError, PolicyError};
use crate::estimate::{estimate, Estimate};
use crate::request::{Constraints, PlanRequest, Preferences};
use crate::templates::{TemplateCatalog, TemplateKey, WorkflowTemplate};

/// How long the classifier may take before the heuristic decides.
pub const DEFAULT_CLASSIFIER_TIMEOUT: Duration = Duration::from_secs(10);

/// A selected template and who selected it.
#[derive(Debug, Clone)]
pub struct Selection {
    pub template: WorkflowTemplate,
    pub source: SelectionSource,
}

/// A customised workflow ready to run, with its plan-time estimate.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationPlan {
    pub template: TemplateKey,
    pub source: SelectionSource,
    pub workflow: WorkflowDefinition,
    pub estimate: Estimate,
    pub budget: Budget,
}

pub struct PolicyLayer {
    catalog: TemplateCatalog,
    registry: Arc<CapabilityRegistry>,
    classifier: Option<Arc<dyn TemplateClassifier>>,
    classifier_timeout: Duration,
}

impl PolicyLayer {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            catalog: TemplateCatalog::builtin(),
            registry,
            classifier: None,
            classifier_timeout: DEFAULT_CLASSIFIER_TIMEOUT,
        }
    }

    pub fn with_catalog(mut self, catalog: TemplateCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn TemplateClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_classifier_timeout(mut self, timeout: Duration) -> Self {
        self.classifier_timeout = timeout;
        self
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    /// Pick a template: the classifier's answer when it gives a known key,
    /// the heuristic otherwise.
    pub async fn select_template(
        &self,
        objective: &str,
        constraints: &Constraints,
        preferences: &Preferences,
    ) -> Result<Selection, PolicyError> {
        let (key, source) = match self.classify(objective, constraints).await {
            Some(key) => (key, SelectionSource::Classifier),
            None => (
                heuristic_template(constraints, preferences),
                SelectionSource::Heuristic,
            ),
        };

        let template = self
            .catalog
            .get(key)
            .cloned()
            .ok_or_else(|| PolicyError::UnknownTemplate(key.to_string()))?;
        info!(template = %key, ?source, "template selected");
        Ok(Selection { template, source })
    }

    async fn classify(&self, objective: &str, constraints: &Constraints) -> Option<TemplateKey> {
        let classifier = self.classifier.as_ref()?;
        let candidates: Vec<TemplateKey> = self.catalog.iter().map(|t| t.key).collect();

        let answer = tokio::time::timeout(
            self.classifier_timeout,
            classifier.classify(objective, constraints, &candidates),
        )
        .await
        .unwrap_or(Err(ClassifierError::Timeout));

        match answer {
            Ok(raw) => match raw.parse::<TemplateKey>() {
                Ok(key) if candidates.contains(&key) => Some(key),
                _ => {
                    warn!(answer = %raw, "classifier named an unknown template, using heuristic");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "classifier failed, using heuristic");
                None
            }
        }
    }

    /// Customise a copy of `template` for `request`.
    ///
    /// Without an explicit allow-list the registry's available providers are
    /// used, unless the registry is empty.
    pub fn customize(
        &self,
        template: &WorkflowTemplate,
        request: &PlanRequest,
    ) -> Result<WorkflowDefinition, PolicyError> {
        let registered: Option<Vec<String>> = match &request.constraints.available_providers {
            Some(_) => None,
            None if self.registry.is_empty() => None,
            None => Some(
                self.registry
                    .list_available()
                    .into_iter()
                    .map(|d| d.provider_type)
                    .collect(),
            ),
        };
        let allowed = request
            .constraints
            .available_providers
            .as_deref()
            .or(registered.as_deref());

        customize(template, request, allowed)
    }

    pub fn estimate(&self, workflow: &WorkflowDefinition) -> Estimate {
        estimate(workflow, &self.registry)
    }

    /// Select, customise and estimate.
    #[instrument(skip(self, request), fields(objective = %request.objective))]
    pub async fn plan(&self, request: &PlanRequest) -> Result<OrchestrationPlan, PolicyError> {
        let selection = self
            .select_template(&request.objective, &request.constraints, &request.preferences)
            .await?;
        let workflow = self.customize(&selection.template, request)?;
        engine::validate(&workflow).map_err(engine::EngineError::from)?;
        let estimate = self.estimate(&workflow);

        info!(
            workflow_id = %workflow.id,
            steps = workflow.steps.len(),
            est_cost = estimate.cost,
            est_duration_ms = estimate.duration_ms,
            "workflow planned"
        );
        Ok(OrchestrationPlan {
            template: selection.template.key,
            source: selection.source,
            workflow,
            estimate,
            budget: request.constraints.budget(),
        })
    }

    /// [`plan`](Self::plan), then register the workflow with `orchestrator`.
    pub async fn plan_and_register(
        &self,
        request: &PlanRequest,
        orchestrator: &Orchestrator,
    ) -> Result<OrchestrationPlan, PolicyError> {
        let plan = self.plan(request).await?;
        orchestrator.register_workflow(plan.workflow.clone())?;
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use engine::{CapabilityDescriptor, ExecutionStatus, ExecutorConfig};
    use providers::mock::MockProvider;
    use serde_json::{json, Map};

    use crate::request::{Priority, QualityLevel};

    struct FixedClassifier(Result<String, ClassifierError>);

    #[async_trait]
    impl TemplateClassifier for FixedClassifier {
        async fn classify(
            &self,
            _objective: &str,
            _constraints: &Constraints,
            _candidates: &[TemplateKey],
        ) -> Result<String, ClassifierError> {
            self.0.clone()
        }
    }

    struct SlowClassifier;

    #[async_trait]
    impl TemplateClassifier for SlowClassifier {
        async fn classify(
            &self,
            _objective: &str,
            _constraints: &Constraints,
            _candidates: &[TemplateKey],
        ) -> Result<String, ClassifierError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("deep".into())
        }
    }

    fn layer_with(classifier: Option<Arc<dyn TemplateClassifier>>) -> PolicyLayer {
        let layer = PolicyLayer::new(Arc::new(CapabilityRegistry::new()));
        match classifier {
            Some(c) => layer.with_classifier(c),
            None => layer,
        }
    }

    #[tokio::test]
    async fn classifier_answer_is_used_when_recognised() {
        let layer = layer_with(Some(Arc::new(FixedClassifier(Ok("Deep".into())))));
        let selection = layer
            .select_template("anything", &Constraints::default(), &Preferences::default())
            .await
            .unwrap();
        assert_eq!(selection.template.key, TemplateKey::Deep);
        assert_eq!(selection.source, SelectionSource::Classifier);
    }

    #[tokio::test]
    async fn unknown_answer_falls_back_to_heuristic() {
        let layer = layer_with(Some(Arc::new(FixedClassifier(Ok("turbo".into())))));
        let constraints = Constraints {
            quality: Some(QualityLevel::Excellent),
            ..Constraints::default()
        };
        let selection = layer
            .select_template("x", &constraints, &Preferences::default())
            .await
            .unwrap();
        assert_eq!(selection.template.key, TemplateKey::Deep);
        assert_eq!(selection.source, SelectionSource::Heuristic);
    }

    #[tokio::test]
    async fn unavailable_classifier_falls_back_to_heuristic() {
        let layer = layer_with(Some(Arc::new(FixedClassifier(Err(
            ClassifierError::Unavailable("offline".into()),
        )))));
        let selection = layer
            .select_template("x", &Constraints::default(), &Preferences::default())
            .await
            .unwrap();
        assert_eq!(selection.template.key, TemplateKey::Comprehensive);
        assert_eq!(selection.source, SelectionSource::Heuristic);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_classifier_times_out() {
        let layer = layer_with(Some(Arc::new(SlowClassifier)))
            .with_classifier_timeout(Duration::from_millis(100));
        let constraints = Constraints {
            max_duration_ms: Some(10_000),
            ..Constraints::default()
        };
        let selection = layer
            .select_template("x", &constraints, &Preferences::default())
            .await
            .unwrap();
        assert_eq!(selection.template.key, TemplateKey::Rapid);
        assert_eq!(selection.source, SelectionSource::Heuristic);
    }

    #[tokio::test]
    async fn registry_availability_filters_steps_without_allow_list() {
        let registry = Arc::new(CapabilityRegistry::new());
        for provider in ["research", "analysis", "synthesis"] {
            registry.register(CapabilityDescriptor::new(provider, 0.1, 100));
        }
        registry.register(CapabilityDescriptor::new("review", 0.1, 100).unavailable());

        let layer = PolicyLayer::new(registry);
        let plan = layer.plan(&PlanRequest::new("analyse")).await.unwrap();

        assert_eq!(plan.template, TemplateKey::Comprehensive);
        let providers: Vec<_> = plan.workflow.steps.iter().map(|s| s.provider_type.as_str()).collect();
        assert_eq!(providers, vec!["research", "analysis", "synthesis"]);
        assert!((plan.estimate.cost - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn planned_workflow_registers_and_runs() {
        let registry = Arc::new(CapabilityRegistry::new());
        for provider in ["research", "synthesis"] {
            registry.register_provider(
                CapabilityDescriptor::new(provider, 0.05, 0),
                Arc::new(MockProvider::returning(provider, json!({ "done": true }))),
            );
        }
        let orchestrator = Orchestrator::new(registry.clone(), ExecutorConfig::default());
        let layer = PolicyLayer::new(registry);

        let request = PlanRequest::new("quick look")
            .with_constraints(Constraints {
                max_duration_ms: Some(5_000),
                max_cost: Some(1.0),
                ..Constraints::default()
            })
            .with_priority(Priority::Speed);

        let plan = layer.plan_and_register(&request, &orchestrator).await.unwrap();
        assert_eq!(plan.template, TemplateKey::Rapid);
        assert_eq!(plan.budget.max_cost, Some(1.0));

        let record = orchestrator
            .execute_workflow(&plan.workflow.id, Map::new(), plan.budget)
            .await
            .unwrap();
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.completed_steps.len(), 2);
    }
}
