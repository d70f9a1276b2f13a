//! `orchestrator` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`  — validate a workflow JSON file and print its phases.
//! - `templates` — list the built-in workflow templates.
//! - `plan`      — select and customise a template for an objective.
//! - `run`       — dry-run a workflow JSON file against echo providers.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use engine::{Budget, CapabilityRegistry, Orchestrator, WorkflowDefinition};
use policy::{Constraints, PlanRequest, PolicyLayer, Priority, QualityLevel, TemplateCatalog};
use providers::EchoProvider;

use crate::config::{load_config, CliConfig};

#[derive(Parser)]
#[command(
    name = "orchestrator",
    about = "Dependency-aware workflow orchestration over pluggable capability providers",
    version
)]
struct Cli {
    /// YAML config file (executor settings, log level, capability profile).
    #[arg(long, short, global = true, env = "ORCHESTRATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Log level used when `RUST_LOG` is unset. Overrides the config file.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// List the built-in workflow templates.
    Templates,
    /// Plan a workflow for an objective and print it with its estimate.
    Plan {
        objective: String,
        #[arg(long)]
        max_duration_ms: Option<u64>,
        #[arg(long)]
        max_cost: Option<f64>,
        #[arg(long, value_enum)]
        quality: Option<QualityArg>,
        #[arg(long, value_enum, default_value_t = PriorityArg::Balanced)]
        priority: PriorityArg,
        /// Restrict the workflow to these provider types (repeatable).
        #[arg(long = "provider")]
        providers: Vec<String>,
    },
    /// Dry-run a workflow: every provider echoes its inputs after its
    /// configured average latency.
    Run {
        /// Path to the workflow JSON file.
        path: PathBuf,
        #[arg(long)]
        max_cost: Option<f64>,
        #[arg(long)]
        max_duration_ms: Option<u64>,
        /// Initial context as a JSON object.
        #[arg(long)]
        context: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum QualityArg {
    Basic,
    Standard,
    High,
    Excellent,
}

impl From<QualityArg> for QualityLevel {
    fn from(arg: QualityArg) -> Self {
        match arg {
            QualityArg::Basic => QualityLevel::Basic,
            QualityArg::Standard => QualityLevel::Standard,
            QualityArg::High => QualityLevel::High,
            QualityArg::Excellent => QualityLevel::Excellent,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PriorityArg {
    Balanced,
    Speed,
    Cost,
    Quality,
}

impl From<PriorityArg> for Priority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::Balanced => Priority::Balanced,
            PriorityArg::Speed => Priority::Speed,
            PriorityArg::Cost => Priority::Cost,
            PriorityArg::Quality => Priority::Quality,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("cannot load config {}", path.display()))?,
        None => CliConfig::default(),
    };
    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    init_tracing(level);

    match cli.command {
        Command::Validate { path } => validate(&path),
        Command::Templates => templates(),
        Command::Plan {
            objective,
            max_duration_ms,
            max_cost,
            quality,
            priority,
            providers,
        } => {
            let constraints = Constraints {
                max_duration_ms,
                max_cost,
                quality: quality.map(QualityLevel::from),
                available_providers: (!providers.is_empty()).then_some(providers),
            };
            let request = PlanRequest::new(objective)
                .with_constraints(constraints)
                .with_priority(priority.into());
            plan(&config, &request).await
        }
        Command::Run {
            path,
            max_cost,
            max_duration_ms,
            context,
        } => {
            let context = parse_context(context.as_deref())?;
            let budget = Budget {
                max_cost,
                max_duration_ms,
            };
            run(&config, &path, context, budget).await
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_workflow(path: &Path) -> Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid workflow JSON in {}", path.display()))
}

fn parse_context(raw: Option<&str>) -> Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };
    match serde_json::from_str(raw).context("invalid --context JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("--context must be a JSON object, got {other}"),
    }
}

fn registry_from(config: &CliConfig, with_echo: bool) -> Arc<CapabilityRegistry> {
    let registry = Arc::new(CapabilityRegistry::new());
    for descriptor in &config.capabilities {
        if with_echo {
            let delay = Duration::from_millis(descriptor.avg_latency_ms);
            let echo = Arc::new(EchoProvider::new(descriptor.provider_type.clone(), delay));
            registry.register_provider(descriptor.clone(), echo);
        } else {
            registry.register(descriptor.clone());
        }
    }
    registry
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn validate(path: &Path) -> Result<()> {
    let workflow = read_workflow(path)?;
    let phases = engine::validate_and_plan(&workflow)
        .with_context(|| format!("workflow '{}' is invalid", workflow.id))?;

    println!("Workflow '{}' is valid: {} phase(s)", workflow.id, phases.len());
    for (index, phase) in phases.iter().enumerate() {
        println!("  phase {}: {}", index + 1, phase.join(", "));
    }
    Ok(())
}

fn templates() -> Result<()> {
    let catalog = TemplateCatalog::builtin();
    let listing: Vec<Value> = catalog
        .iter()
        .map(|t| {
            json!({
                "key": t.key,
                "description": t.description,
                "failureStrategy": t.workflow.failure_strategy,
                "steps": t.workflow.steps.iter().map(|s| json!({
                    "id": s.id,
                    "providerType": s.provider_type,
                    "required": s.required,
                    "dependencies": s.dependencies,
                })).collect::<Vec<_>>(),
            })
        })
        .collect();
    print_json(&listing)
}

async fn plan(config: &CliConfig, request: &PlanRequest) -> Result<()> {
    let layer = PolicyLayer::new(registry_from(config, false));
    let plan = layer.plan(request).await.context("planning failed")?;
    print_json(&plan)
}

async fn run(
    config: &CliConfig,
    path: &Path,
    context: Map<String, Value>,
    budget: Budget,
) -> Result<()> {
    let workflow = read_workflow(path)?;
    let registry = registry_from(config, true);
    let estimate = policy::estimate(&workflow, &registry);

    let orchestrator = Orchestrator::new(registry, config.executor.clone());
    orchestrator
        .register_workflow(workflow.clone())
        .with_context(|| format!("workflow '{}' is invalid", workflow.id))?;
    info!(workflow_id = %workflow.id, est_cost = estimate.cost, "starting dry run");

    let (record, failure) = match orchestrator.execute_workflow(&workflow.id, context, budget).await {
        Ok(record) => (record, None),
        Err(e) => match e.record().cloned() {
            Some(record) => (record, Some(e)),
            None => return Err(e).context("execution did not start"),
        },
    };

    let analysis = analyzer::analyze(&record, &estimate);
    print_json(&json!({
        "record": record,
        "estimate": estimate,
        "analysis": analysis,
    }))?;

    if let Some(e) = failure {
        warn!(execution_id = %record.id, "dry run failed");
        return Err(e).context("workflow execution failed");
    }
    Ok(())
}
