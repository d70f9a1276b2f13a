//! Workflow execution engine.
//!
//! `WorkflowExecutor` is the central orchestrator:
//! 1. Validates the workflow and groups its steps into phases.
//! 2. Runs phases strictly in order. Within a phase, parallelizable steps go
//!    out in batches of at most `max_concurrent_steps` (every batch settles
//!    before the next starts), then the remaining steps run one at a time.
//! 3. Dispatches each step to its capability provider with a timeout and the
//!    step's retry/backoff policy.
//! 4. Records every settled step in exactly one of completed/failed/skipped.
//! 5. Checks the cost/duration budget after each phase settles.
//! 6. Escalates a failure to the whole run when the workflow is fail-fast or
//!    the failed step is required.
//!
//! The execution record is shared with `cancel`/`status` callers behind a
//! single mutex; every mutation is a short critical section and the lock is
//! never held across an await point.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use futures::future::join_all;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use providers::{CapabilityProvider, ProviderError, ProviderOutput};

use crate::config::ExecutorConfig;
use crate::dag;
use crate::error::{BudgetViolation, EngineError, ProcessingError};
use crate::events::{EventBus, ExecutionEvent};
use crate::models::{
    Budget, ExecutionRecord, ExecutionStatus, FailureStrategy, Step, StepOutcome, WorkflowDefinition,
};
use crate::registry::CapabilityRegistry;

type SharedRecord = Arc<Mutex<ExecutionRecord>>;

fn update<R>(record: &SharedRecord, f: impl FnOnce(&mut ExecutionRecord) -> R) -> R {
    let mut guard = record.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
}

fn read<R>(record: &SharedRecord, f: impl FnOnce(&ExecutionRecord) -> R) -> R {
    let guard = record.lock().unwrap_or_else(PoisonError::into_inner);
    f(&guard)
}

/// A run started in the background with [`WorkflowExecutor::spawn`].
pub struct ExecutionHandle {
    pub execution_id: Uuid,
    pub join: JoinHandle<Result<ExecutionRecord, EngineError>>,
}

/// State of one run that the phase loop threads through.
struct Run<'a> {
    workflow: &'a WorkflowDefinition,
    record: SharedRecord,
    execution_id: Uuid,
    started: Instant,
}

impl Run<'_> {
    fn is_cancelled(&self) -> bool {
        read(&self.record, |r| r.status == ExecutionStatus::Cancelled)
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Runs workflows against a capability registry and tracks every execution
/// it has started.
///
/// Cloning is cheap: clones share the registry, the event bus and the
/// execution table.
#[derive(Clone)]
pub struct WorkflowExecutor {
    registry: Arc<CapabilityRegistry>,
    config: ExecutorConfig,
    events: EventBus,
    executions: Arc<RwLock<HashMap<Uuid, SharedRecord>>>,
}

impl WorkflowExecutor {
    /// Create a new executor.
    pub fn new(registry: Arc<CapabilityRegistry>, config: ExecutorConfig) -> Self {
        let events = EventBus::new(config.event_channel_capacity);
        Self {
            registry,
            config,
            events,
            executions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    /// Run the workflow to a terminal state.
    ///
    /// Returns the terminal record for `completed` and `cancelled` runs.
    ///
    /// # Errors
    /// - `EngineError::Validation` if the definition is malformed (no record is created).
    /// - `EngineError::ExecutionFailed` when the run ends `failed`; it carries
    ///   the terminal record.
    #[instrument(skip(self, workflow, context), fields(workflow_id = %workflow.id))]
    pub async fn run(
        &self,
        workflow: &WorkflowDefinition,
        context: Map<String, Value>,
        budget: Budget,
    ) -> Result<ExecutionRecord, EngineError> {
        let record = self.prepare(workflow, context, budget)?;
        self.drive(workflow, record).await
    }

    /// Start the workflow on a background task.
    ///
    /// The execution id is known (and `status`/`cancel` work) before this returns.
    pub fn spawn(
        &self,
        workflow: Arc<WorkflowDefinition>,
        context: Map<String, Value>,
        budget: Budget,
    ) -> Result<ExecutionHandle, EngineError> {
        let record = self.prepare(&workflow, context, budget)?;
        let execution_id = read(&record, |r| r.id);

        let executor = self.clone();
        let join = tokio::spawn(async move { executor.drive(&workflow, record).await });
        Ok(ExecutionHandle { execution_id, join })
    }

    /// Request cooperative cancellation. Only effective while the run is
    /// `running`: the status flips to `cancelled` at once and no further step
    /// is scheduled, but calls already in flight are not interrupted.
    ///
    /// The status stays `cancelled` from here on, but the record is not
    /// frozen: when those in-flight calls settle their outcomes, results and
    /// cost are still written to it. The value returned by `run` or by the
    /// spawned task is the settled record.
    pub fn cancel(&self, execution_id: Uuid) -> bool {
        let Some(record) = self.shared(execution_id) else {
            return false;
        };
        let cancelled = update(&record, |r| {
            r.status == ExecutionStatus::Running && r.transition(ExecutionStatus::Cancelled)
        });
        if cancelled {
            info!(%execution_id, "cancellation requested");
        }
        cancelled
    }

    /// Snapshot of an execution record.
    ///
    /// A snapshot taken right after `cancel` may be missing steps that were
    /// in flight at the time; they land in the record once they settle.
    pub fn status(&self, execution_id: Uuid) -> Option<ExecutionRecord> {
        self.shared(execution_id).map(|record| read(&record, Clone::clone))
    }

    /// Drop a finished execution from the table and return its final record.
    ///
    /// Records stay until forgotten. Running executions are kept and `None`
    /// is returned for them, as for unknown ids.
    pub fn forget(&self, execution_id: Uuid) -> Option<ExecutionRecord> {
        let mut executions = self.executions.write().unwrap_or_else(PoisonError::into_inner);
        let finished = executions
            .get(&execution_id)
            .is_some_and(|record| read(record, |r| r.status.is_terminal()));
        if !finished {
            return None;
        }
        let record = executions.remove(&execution_id)?;
        debug!(%execution_id, "execution record forgotten");
        Some(read(&record, Clone::clone))
    }

    /// Ids of every execution this executor has started.
    pub fn executions(&self) -> Vec<Uuid> {
        let executions = self.executions.read().unwrap_or_else(PoisonError::into_inner);
        executions.keys().copied().collect()
    }

    fn shared(&self, execution_id: Uuid) -> Option<SharedRecord> {
        let executions = self.executions.read().unwrap_or_else(PoisonError::into_inner);
        executions.get(&execution_id).cloned()
    }

    fn prepare(
        &self,
        workflow: &WorkflowDefinition,
        context: Map<String, Value>,
        budget: Budget,
    ) -> Result<SharedRecord, EngineError> {
        dag::validate(workflow)?;

        let record = ExecutionRecord::new(workflow, context, budget);
        let execution_id = record.id;
        let record = Arc::new(Mutex::new(record));

        self.executions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(execution_id, Arc::clone(&record));
        debug!(%execution_id, workflow_id = %workflow.id, "execution record created");
        Ok(record)
    }

    // -----------------------------------------------------------------------
    // Run lifecycle
    // -----------------------------------------------------------------------

    async fn drive(
        &self,
        workflow: &WorkflowDefinition,
        record: SharedRecord,
    ) -> Result<ExecutionRecord, EngineError> {
        let run = Run {
            workflow,
            execution_id: read(&record, |r| r.id),
            record,
            started: Instant::now(),
        };

        let outcome = match dag::plan(workflow) {
            Ok(phases) => {
                info!(
                    execution_id = %run.execution_id,
                    "planned {} steps into {} phases",
                    workflow.steps.len(),
                    phases.len()
                );
                update(&run.record, |r| r.transition(ExecutionStatus::Running));
                self.run_phases(&run, &phases).await
            }
            Err(e) => Err(e),
        };

        self.finish(&run, outcome)
    }

    async fn run_phases(&self, run: &Run<'_>, phases: &[dag::Phase]) -> Result<(), ProcessingError> {
        let steps: HashMap<&str, &Step> = run
            .workflow
            .steps
            .iter()
            .map(|s| (s.id.as_str(), s))
            .collect();
        let batch_size = self.config.batch_size(run.workflow.max_concurrent_steps);

        for (index, phase) in phases.iter().enumerate() {
            if run.is_cancelled() {
                return Ok(());
            }

            info!(execution_id = %run.execution_id, phase = index, steps = ?phase, "phase started");
            self.events.publish(ExecutionEvent::PhaseStarted {
                execution_id: run.execution_id,
                phase: index,
                step_ids: phase.clone(),
            });

            let (parallel, sequential): (Vec<&Step>, Vec<&Step>) = phase
                .iter()
                .filter_map(|id| steps.get(id.as_str()).copied())
                .partition(|s| s.parallelizable);

            for batch in parallel.chunks(batch_size) {
                if run.is_cancelled() {
                    return Ok(());
                }
                // Every sibling settles before the first escalation is raised.
                let settled = join_all(batch.iter().map(|step| self.execute_step(run, step))).await;
                if let Some(err) = settled.into_iter().find_map(Result::err) {
                    return Err(err);
                }
            }

            for step in sequential {
                if run.is_cancelled() {
                    return Ok(());
                }
                self.execute_step(run, step).await?;
            }

            let elapsed = run.started.elapsed();
            let cost = update(&run.record, |r| {
                r.metrics.total_duration_ms = elapsed.as_millis() as u64;
                r.metrics.cost_incurred
            });
            let budget = read(&run.record, |r| r.budget);
            if let Some(violation) = check_budget(&budget, cost, elapsed) {
                warn!(execution_id = %run.execution_id, %violation, "budget exceeded, aborting run");
                return Err(ProcessingError::BudgetExceeded(violation));
            }
        }

        Ok(())
    }

    /// Move the record to its terminal state and report it.
    fn finish(
        &self,
        run: &Run<'_>,
        outcome: Result<(), ProcessingError>,
    ) -> Result<ExecutionRecord, EngineError> {
        let elapsed_ms = run.started.elapsed().as_millis() as u64;
        let target = match outcome {
            Ok(()) => ExecutionStatus::Completed,
            Err(_) => ExecutionStatus::Failed,
        };
        let failure = outcome.as_ref().err().map(ToString::to_string);

        let snapshot = update(&run.record, |r| {
            r.metrics.total_duration_ms = elapsed_ms;
            if r.transition(target) && target == ExecutionStatus::Failed {
                r.error = failure.clone();
            }
            r.clone()
        });

        let execution_id = run.execution_id;
        let workflow_id = run.workflow.id.clone();
        match (snapshot.status, outcome) {
            (ExecutionStatus::Cancelled, _) => {
                info!(%execution_id, "workflow cancelled");
                self.events.publish(ExecutionEvent::WorkflowCancelled {
                    execution_id,
                    workflow_id,
                });
                Ok(snapshot)
            }
            (_, Ok(())) => {
                info!(
                    %execution_id,
                    cost = snapshot.metrics.cost_incurred,
                    duration_ms = elapsed_ms,
                    "workflow completed"
                );
                self.events.publish(ExecutionEvent::WorkflowCompleted {
                    execution_id,
                    workflow_id,
                    cost_incurred: snapshot.metrics.cost_incurred,
                    duration_ms: elapsed_ms,
                });
                Ok(snapshot)
            }
            (_, Err(source)) => {
                error!(%execution_id, error = %source, "workflow failed");
                self.events.publish(ExecutionEvent::WorkflowFailed {
                    execution_id,
                    workflow_id,
                    error: source.to_string(),
                });
                Err(EngineError::ExecutionFailed {
                    execution_id,
                    source,
                    record: Box::new(snapshot),
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Per-step execution
    // -----------------------------------------------------------------------

    /// Settle one step. `Err` means the failure escalates to the whole run.
    async fn execute_step(&self, run: &Run<'_>, step: &Step) -> Result<(), ProcessingError> {
        let execution_id = run.execution_id;

        // Dependencies were placed in earlier phases; re-check anyway.
        let (missing, failed_dep) = read(&run.record, |r| {
            let (failed, missing): (Vec<String>, Vec<String>) = step
                .dependencies
                .iter()
                .filter(|dep| !r.satisfies_dependency(dep))
                .cloned()
                .partition(|dep| r.outcome_of(dep) == Some(StepOutcome::Failed));
            (missing, failed.into_iter().next())
        });

        if !missing.is_empty() {
            let err = ProcessingError::UnmetDependencies {
                step_id: step.id.clone(),
                missing,
            };
            self.record_failure(run, step, 0, &err);
            return Err(err);
        }

        if let Some(dependency) = failed_dep {
            let err = ProcessingError::BlockedByFailedDependency {
                step_id: step.id.clone(),
                dependency,
            };
            self.record_failure(run, step, 0, &err);
            return self.escalate(run.workflow, step, err);
        }

        let Some(capability) = self.registry.resolve(&step.provider_type) else {
            if step.required {
                let err = ProcessingError::ProviderUnavailable {
                    step_id: step.id.clone(),
                    provider_type: step.provider_type.clone(),
                };
                self.record_failure(run, step, 0, &err);
                return Err(err);
            }
            let reason = format!("provider '{}' is unavailable", step.provider_type);
            warn!(%execution_id, step_id = %step.id, %reason, "skipping optional step");
            update(&run.record, |r| r.mark_skipped(&step.id));
            self.events.publish(ExecutionEvent::StepSkipped {
                execution_id,
                step_id: step.id.clone(),
                reason,
            });
            return Ok(());
        };
        let inputs = read(&run.record, |r| build_inputs(step, r));

        info!(%execution_id, step_id = %step.id, provider = %step.provider_type, "step started");
        self.events.publish(ExecutionEvent::StepStarted {
            execution_id,
            step_id: step.id.clone(),
            provider_type: step.provider_type.clone(),
        });

        let timeout = self.step_timeout(run.workflow, step);
        let attempt = self
            .invoke_with_retry(
                run,
                step,
                capability.provider.as_ref(),
                &capability.permits,
                inputs,
                timeout,
            )
            .await;

        match attempt {
            Ok((output, attempts)) => {
                let cost = output
                    .cost_incurred
                    .unwrap_or(capability.descriptor.cost_per_call);
                update(&run.record, |r| r.mark_completed(&step.id, output.output.clone(), cost));
                info!(%execution_id, step_id = %step.id, attempts, cost, "step completed");
                self.events.publish(ExecutionEvent::StepCompleted {
                    execution_id,
                    step_id: step.id.clone(),
                    cost,
                    latency_ms: output.latency_ms,
                    attempts,
                    output: output.output,
                });
                Ok(())
            }
            Err((cause, attempts)) => {
                let err = ProcessingError::StepFailed {
                    step_id: step.id.clone(),
                    attempts,
                    message: cause.to_string(),
                };
                self.record_failure(run, step, attempts, &err);
                self.escalate(run.workflow, step, err)
            }
        }
    }

    /// Call the provider until it succeeds, fails fatally, or the retry
    /// policy runs out. Returns the attempts made alongside the outcome.
    async fn invoke_with_retry(
        &self,
        run: &Run<'_>,
        step: &Step,
        provider: &dyn CapabilityProvider,
        permits: &tokio::sync::Semaphore,
        inputs: Value,
        timeout: Duration,
    ) -> Result<(ProviderOutput, u32), (ProviderError, u32)> {
        let max_attempts = step.retry.max_attempts();
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let result = match permits.acquire().await {
                Ok(_permit) => tokio::time::timeout(
                    timeout,
                    provider.execute(&step.id, inputs.clone(), timeout),
                )
                .await
                .unwrap_or(Err(ProviderError::Timeout(timeout))),
                Err(_) => Err(ProviderError::Fatal("capability permits closed".into())),
            };

            match result {
                Ok(output) => return Ok((output, attempts)),
                Err(err) if !err.is_retryable() || attempts >= max_attempts => {
                    return Err((err, attempts));
                }
                Err(err) => {
                    let delay = step.retry.backoff(attempts);
                    warn!(
                        "step '{}' failed (attempt {}/{}), retrying in {:?}: {}",
                        step.id, attempts, max_attempts, delay, err
                    );
                    self.events.publish(ExecutionEvent::StepRetrying {
                        execution_id: run.execution_id,
                        step_id: step.id.clone(),
                        attempt: attempts,
                        delay_ms: delay.as_millis() as u64,
                        error: err.to_string(),
                    });
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn record_failure(&self, run: &Run<'_>, step: &Step, attempts: u32, err: &ProcessingError) {
        let message = err.to_string();
        error!(execution_id = %run.execution_id, step_id = %step.id, "{message}");
        update(&run.record, |r| r.mark_failed(&step.id, message.clone()));
        self.events.publish(ExecutionEvent::StepFailed {
            execution_id: run.execution_id,
            step_id: step.id.clone(),
            attempts,
            error: message,
        });
    }

    fn escalate(
        &self,
        workflow: &WorkflowDefinition,
        step: &Step,
        err: ProcessingError,
    ) -> Result<(), ProcessingError> {
        if step.required || workflow.failure_strategy == FailureStrategy::FailFast {
            Err(err)
        } else {
            debug!(step_id = %step.id, "absorbing failure of optional step");
            Ok(())
        }
    }

    fn step_timeout(&self, workflow: &WorkflowDefinition, step: &Step) -> Duration {
        match (step.timeout_ms, workflow.default_timeout_ms) {
            (Some(ms), _) => Duration::from_millis(ms),
            (None, 0) => self.config.default_step_timeout(),
            (None, _) => workflow.step_timeout(step),
        }
    }
}

/// Step inputs: static inputs, each dependency's result under
/// `<dependency>_result`, the execution id and the shared context.
fn build_inputs(step: &Step, record: &ExecutionRecord) -> Value {
    let mut inputs = step.inputs.clone();
    for dep in &step.dependencies {
        if let Some(result) = record.step_results.get(dep) {
            inputs.insert(format!("{dep}_result"), result.clone());
        }
    }
    inputs.insert("execution_id".into(), Value::String(record.id.to_string()));
    inputs.insert("context".into(), Value::Object(record.context.clone()));
    Value::Object(inputs)
}

fn check_budget(budget: &Budget, cost: f64, elapsed: Duration) -> Option<BudgetViolation> {
    if let Some(limit) = budget.max_cost {
        if cost > limit {
            return Some(BudgetViolation::Cost {
                limit,
                incurred: cost,
            });
        }
    }
    if let Some(limit) = budget.max_duration() {
        if elapsed > limit {
            return Some(BudgetViolation::Duration {
                limit_ms: limit.as_millis() as u64,
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }
    }
    None
}
