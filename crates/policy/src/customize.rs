//! Template customisation.
//!
//! Applied in order to a clone of the template's workflow:
//! 1. Allow-list: drop steps whose provider type isn't allowed.
//! 2. Cost priority: drop every optional step; force basic-tier inputs.
//! 3. Speed priority: cap timeouts and retry counts.
//! 4. Every remaining step gets the objective and the shared context.
//!
//! Dependencies on dropped steps are removed, so the rest stays valid.

use std::collections::HashSet;

use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use engine::WorkflowDefinition;

use crate::error::PolicyError;
use crate::request::{PlanRequest, Priority};
use crate::templates::WorkflowTemplate;

/// Timeout ceiling applied to every step under speed priority.
pub const SPEED_TIMEOUT_CEILING_MS: u64 = 30_000;
/// Retry ceiling applied to every step under speed priority.
pub const SPEED_MAX_RETRIES: u32 = 1;

/// Produce a registrable workflow from `template` for `request`.
///
/// `allowed_providers` is the effective allow-list (`None` keeps every step).
pub fn customize(
    template: &WorkflowTemplate,
    request: &PlanRequest,
    allowed_providers: Option<&[String]>,
) -> Result<WorkflowDefinition, PolicyError> {
    let mut workflow = template.workflow.clone();
    let priority = request.preferences.priority;

    if let Some(allowed) = allowed_providers {
        let allowed: HashSet<&str> = allowed.iter().map(String::as_str).collect();
        workflow
            .steps
            .retain(|s| allowed.contains(s.provider_type.as_str()));
    }

    if priority == Priority::Cost {
        workflow.steps.retain(|s| s.required);
        for step in &mut workflow.steps {
            step.inputs.insert("tier".into(), json!("basic"));
            step.inputs.insert("quality".into(), json!("basic"));
        }
    }

    if priority == Priority::Speed {
        workflow.default_timeout_ms = workflow.default_timeout_ms.min(SPEED_TIMEOUT_CEILING_MS);
        for step in &mut workflow.steps {
            let timeout = step.timeout_ms.unwrap_or(SPEED_TIMEOUT_CEILING_MS);
            step.timeout_ms = Some(timeout.min(SPEED_TIMEOUT_CEILING_MS));
            step.retry.max_retries = step.retry.max_retries.min(SPEED_MAX_RETRIES);
        }
    }

    let kept: HashSet<String> = workflow.steps.iter().map(|s| s.id.clone()).collect();
    let dropped = template.workflow.steps.len() - kept.len();
    if kept.is_empty() {
        return Err(PolicyError::NoStepsLeft(template.key.to_string()));
    }

    for step in &mut workflow.steps {
        step.dependencies.retain(|d| kept.contains(d));
        step.inputs
            .insert("objective".into(), Value::String(request.objective.clone()));
        for (key, value) in &request.context {
            step.inputs.insert(key.clone(), value.clone());
        }
    }

    let suffix = Uuid::new_v4().simple().to_string();
    workflow.id = format!("{}-{}", template.key, &suffix[..8]);
    workflow.metadata.insert("objective".into(), json!(request.objective));
    workflow.metadata.insert("priority".into(), json!(priority));

    debug!(
        workflow_id = %workflow.id,
        template = %template.key,
        dropped,
        "customised template"
    );
    Ok(workflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::{TemplateCatalog, TemplateKey};

    fn template(key: TemplateKey) -> WorkflowTemplate {
        TemplateCatalog::builtin().get(key).unwrap().clone()
    }

    #[test]
    fn speed_caps_timeouts_and_retries() {
        let tpl = template(TemplateKey::Deep);
        let request = PlanRequest::new("fast please").with_priority(Priority::Speed);

        let wf = customize(&tpl, &request, None).unwrap();
        assert_eq!(wf.steps.len(), tpl.workflow.steps.len());
        for step in &wf.steps {
            assert!(step.timeout_ms.unwrap() <= SPEED_TIMEOUT_CEILING_MS);
            assert!(step.retry.max_retries <= SPEED_MAX_RETRIES);
        }
        engine::validate(&wf).unwrap();
    }

    #[test]
    fn cost_drops_optional_steps_and_prunes_their_dependencies() {
        let tpl = template(TemplateKey::Comprehensive);
        let request = PlanRequest::new("cheap").with_priority(Priority::Cost);

        let wf = customize(&tpl, &request, None).unwrap();
        assert!(wf.steps.iter().all(|s| s.required));
        assert!(wf.step("market-data").is_none());
        assert_eq!(wf.step("analysis").unwrap().dependencies, vec!["research"]);
        assert_eq!(wf.step("synthesis").unwrap().dependencies, vec!["analysis"]);
        assert!(wf.steps.iter().all(|s| s.inputs["tier"] == "basic"));
        engine::validate(&wf).unwrap();
    }

    #[test]
    fn allow_list_filters_providers() {
        let tpl = template(TemplateKey::Comprehensive);
        let allowed = vec!["research".to_string(), "analysis".to_string(), "synthesis".to_string()];

        let wf = customize(&tpl, &PlanRequest::new("x"), Some(allowed.as_slice())).unwrap();
        let ids: Vec<_> = wf.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["research", "analysis", "synthesis"]);
        engine::validate(&wf).unwrap();
    }

    #[test]
    fn every_step_receives_objective_and_context() {
        let tpl = template(TemplateKey::Rapid);
        let request = PlanRequest::new("summarise the market").with_context("region", json!("EU"));

        let wf = customize(&tpl, &request, None).unwrap();
        for step in &wf.steps {
            assert_eq!(step.inputs["objective"], "summarise the market");
            assert_eq!(step.inputs["region"], "EU");
        }
        assert!(wf.id.starts_with("rapid-"));
        assert_eq!(wf.metadata["priority"], "balanced");
    }

    #[test]
    fn catalog_entry_is_never_mutated() {
        let catalog = TemplateCatalog::builtin();
        let tpl = catalog.get(TemplateKey::Comprehensive).unwrap();
        let before = tpl.workflow.clone();

        customize(tpl, &PlanRequest::new("x").with_priority(Priority::Cost), None).unwrap();
        assert_eq!(tpl.workflow, before);
    }

    #[test]
    fn empty_allow_list_is_an_error() {
        let tpl = template(TemplateKey::Rapid);
        let err = customize(&tpl, &PlanRequest::new("x"), Some(&[] as &[String])).unwrap_err();
        assert!(matches!(err, PolicyError::NoStepsLeft(key) if key == "rapid"));
    }
}
