//! The fixed catalog of workflow templates.
//!
//! Templates are shared, read-only definitions. Customisation always works on
//! a clone, never on the catalog entry itself.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use engine::{FailureStrategy, RetryPolicy, Step, WorkflowDefinition};

/// Id of the step whose reported score overrides the derived quality score.
pub const EVALUATION_STEP_ID: &str = "evaluation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKey {
    /// Few steps, short timeouts; for tight deadlines.
    Rapid,
    /// Balanced default.
    Comprehensive,
    /// Extra review and validation steps; for quality-first objectives.
    Deep,
}

impl TemplateKey {
    pub const ALL: [TemplateKey; 3] = [Self::Rapid, Self::Comprehensive, Self::Deep];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rapid => "rapid",
            Self::Comprehensive => "comprehensive",
            Self::Deep => "deep",
        }
    }
}

impl std::fmt::Display for TemplateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TemplateKey {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rapid"         => Ok(Self::Rapid),
            "comprehensive" => Ok(Self::Comprehensive),
            "deep"          => Ok(Self::Deep),
            other           => Err(format!("unknown template key: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub key: TemplateKey,
    pub description: String,
    pub workflow: WorkflowDefinition,
}

/// Templates keyed by [`TemplateKey`].
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    templates: BTreeMap<TemplateKey, WorkflowTemplate>,
}

impl TemplateCatalog {
    /// The built-in rapid / comprehensive / deep templates.
    pub fn builtin() -> Self {
        let templates = [rapid(), comprehensive(), deep()]
            .into_iter()
            .map(|t| (t.key, t))
            .collect();
        Self { templates }
    }

    /// Replace the template registered under `template.key`.
    pub fn with_template(mut self, template: WorkflowTemplate) -> Self {
        self.templates.insert(template.key, template);
        self
    }

    pub fn get(&self, key: TemplateKey) -> Option<&WorkflowTemplate> {
        self.templates.get(&key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkflowTemplate> {
        self.templates.values()
    }
}

impl Default for TemplateCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn template_workflow(key: TemplateKey, name: &str, steps: Vec<Step>) -> WorkflowDefinition {
    let mut workflow = WorkflowDefinition::new(key.as_str(), name, steps);
    workflow.metadata.insert("template".into(), json!(key.as_str()));
    workflow
}

fn rapid() -> WorkflowTemplate {
    let steps = vec![
        Step::new("research", "research")
            .with_timeout_ms(30_000)
            .with_retry(RetryPolicy::fixed(1, 500))
            .with_input("depth", json!("shallow")),
        Step::new("summary", "synthesis")
            .depends_on(["research"])
            .sequential()
            .with_timeout_ms(30_000)
            .with_retry(RetryPolicy::fixed(1, 500)),
    ];

    let mut workflow = template_workflow(TemplateKey::Rapid, "Rapid analysis", steps);
    workflow.default_timeout_ms = 30_000;
    workflow.max_concurrent_steps = 2;
    workflow.failure_strategy = FailureStrategy::FailFast;

    WorkflowTemplate {
        key: TemplateKey::Rapid,
        description: "Single research pass followed by a summary".into(),
        workflow,
    }
}

fn comprehensive() -> WorkflowTemplate {
    let retry = RetryPolicy::exponential(2, 1_000);
    let steps = vec![
        Step::new("research", "research")
            .with_timeout_ms(120_000)
            .with_retry(retry.clone()),
        Step::new("market-data", "data")
            .optional()
            .with_timeout_ms(60_000)
            .with_retry(retry.clone()),
        Step::new("analysis", "analysis")
            .depends_on(["research", "market-data"])
            .with_timeout_ms(180_000)
            .with_retry(retry.clone()),
        Step::new("risk-review", "review")
            .depends_on(["analysis"])
            .optional()
            .with_timeout_ms(120_000)
            .with_retry(retry.clone()),
        Step::new("synthesis", "synthesis")
            .depends_on(["analysis", "risk-review"])
            .sequential()
            .with_timeout_ms(120_000)
            .with_retry(retry.clone()),
        Step::new(EVALUATION_STEP_ID, "evaluation")
            .depends_on(["synthesis"])
            .optional()
            .sequential()
            .with_timeout_ms(60_000)
            .with_retry(RetryPolicy::fixed(1, 1_000)),
    ];

    let mut workflow = template_workflow(TemplateKey::Comprehensive, "Comprehensive analysis", steps);
    workflow.max_concurrent_steps = 3;
    workflow.failure_strategy = FailureStrategy::ContinueOnError;

    WorkflowTemplate {
        key: TemplateKey::Comprehensive,
        description: "Research and data gathering, analysis, review, synthesis and evaluation".into(),
        workflow,
    }
}

fn deep() -> WorkflowTemplate {
    let retry = RetryPolicy::exponential(3, 2_000);
    let steps = vec![
        Step::new("research", "research")
            .with_timeout_ms(300_000)
            .with_retry(retry.clone())
            .with_input("depth", json!("exhaustive")),
        Step::new("literature", "research")
            .with_timeout_ms(300_000)
            .with_retry(retry.clone())
            .with_input("scope", json!("literature")),
        Step::new("market-data", "data")
            .optional()
            .with_timeout_ms(120_000)
            .with_retry(retry.clone()),
        Step::new("analysis", "analysis")
            .depends_on(["research", "literature", "market-data"])
            .with_timeout_ms(300_000)
            .with_retry(retry.clone()),
        Step::new("expert-review", "review")
            .depends_on(["analysis"])
            .with_timeout_ms(240_000)
            .with_retry(retry.clone()),
        Step::new("cross-validation", "analysis")
            .depends_on(["analysis"])
            .optional()
            .with_timeout_ms(240_000)
            .with_retry(retry.clone()),
        Step::new("synthesis", "synthesis")
            .depends_on(["expert-review", "cross-validation"])
            .sequential()
            .with_timeout_ms(240_000)
            .with_retry(retry.clone()),
        Step::new(EVALUATION_STEP_ID, "evaluation")
            .depends_on(["synthesis"])
            .sequential()
            .with_timeout_ms(120_000)
            .with_retry(RetryPolicy::fixed(2, 1_000)),
    ];

    let mut workflow = template_workflow(TemplateKey::Deep, "Deep analysis", steps);
    workflow.default_timeout_ms = 600_000;
    workflow.max_concurrent_steps = 4;
    workflow.failure_strategy = FailureStrategy::ContinueOnError;

    WorkflowTemplate {
        key: TemplateKey::Deep,
        description: "Parallel research, expert review and cross-validation before synthesis".into(),
        workflow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_templates_are_valid_workflows() {
        let catalog = TemplateCatalog::builtin();
        for key in TemplateKey::ALL {
            let template = catalog.get(key).expect("builtin template");
            engine::validate(&template.workflow)
                .unwrap_or_else(|e| panic!("{key} template invalid: {e}"));
            assert_eq!(template.workflow.id, key.as_str());
        }
    }

    #[test]
    fn keys_parse_case_insensitively() {
        assert_eq!(" Deep ".parse::<TemplateKey>(), Ok(TemplateKey::Deep));
        assert!("turbo".parse::<TemplateKey>().is_err());
        assert_eq!(TemplateKey::Comprehensive.to_string(), "comprehensive");
    }

    #[test]
    fn deep_template_ends_in_required_evaluation() {
        let catalog = TemplateCatalog::builtin();
        let deep = &catalog.get(TemplateKey::Deep).unwrap().workflow;
        let evaluation = deep.step(EVALUATION_STEP_ID).unwrap();
        assert!(evaluation.required);
        assert_eq!(engine::plan(deep).unwrap().last().unwrap(), &vec![EVALUATION_STEP_ID.to_string()]);
    }
}
