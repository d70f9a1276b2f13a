//! Dependency graph planning — run this before registering or executing a
//! workflow.
//!
//! Rules enforced by [`validate`]:
//! 1. The workflow has an id and a name; every step has an id and a provider type.
//! 2. Step IDs are unique within the workflow.
//! 3. Every dependency references an existing step.
//! 4. The dependency relation is acyclic (depth-first search with a
//!    recursion stack; a step revisited while still on the stack is a cycle).
//!
//! [`plan`] groups the steps into execution phases: phase *k* holds exactly
//! the steps whose dependencies all sit in phases `0..k`.

use std::collections::{HashMap, HashSet};

use crate::error::{ProcessingError, ValidationError};
use crate::models::WorkflowDefinition;

/// One group of steps that may start once every earlier phase has settled.
/// Step ids keep the order they have in the definition.
pub type Phase = Vec<String>;

/// Validate the workflow definition.
///
/// # Errors
/// - [`ValidationError::MissingField`] / [`ValidationError::MissingStepField`]
/// - [`ValidationError::DuplicateStepId`] if two steps share an ID.
/// - [`ValidationError::UnknownDependency`] for a dangling dependency.
/// - [`ValidationError::CycleDetected`] if the graph is not acyclic.
pub fn validate(workflow: &WorkflowDefinition) -> Result<(), ValidationError> {
    if workflow.id.trim().is_empty() {
        return Err(ValidationError::MissingField("id"));
    }
    if workflow.name.trim().is_empty() {
        return Err(ValidationError::MissingField("name"));
    }
    if workflow.max_concurrent_steps == 0 {
        return Err(ValidationError::InvalidConcurrency);
    }

    let mut seen_ids: HashSet<&str> = HashSet::new();
    for (index, step) in workflow.steps.iter().enumerate() {
        if step.id.trim().is_empty() {
            return Err(ValidationError::MissingStepField { index, field: "id" });
        }
        if step.provider_type.trim().is_empty() {
            return Err(ValidationError::MissingStepField {
                index,
                field: "providerType",
            });
        }
        if !seen_ids.insert(step.id.as_str()) {
            return Err(ValidationError::DuplicateStepId(step.id.clone()));
        }
    }

    for step in &workflow.steps {
        for dep in &step.dependencies {
            if !seen_ids.contains(dep.as_str()) {
                return Err(ValidationError::UnknownDependency {
                    step_id: step.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    detect_cycle(workflow)
}

fn detect_cycle(workflow: &WorkflowDefinition) -> Result<(), ValidationError> {
    let deps: HashMap<&str, Vec<&str>> = workflow
        .steps
        .iter()
        .map(|s| (s.id.as_str(), s.dependencies.iter().map(String::as_str).collect()))
        .collect();

    let mut visited: HashSet<&str> = HashSet::new();
    let mut on_stack: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = Vec::new();

    for step in &workflow.steps {
        visit(step.id.as_str(), &deps, &mut visited, &mut on_stack, &mut stack)?;
    }
    Ok(())
}

fn visit<'a>(
    id: &'a str,
    deps: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    on_stack: &mut HashSet<&'a str>,
    stack: &mut Vec<&'a str>,
) -> Result<(), ValidationError> {
    if on_stack.contains(id) {
        // Report the loop starting at its first occurrence on the stack.
        let start = stack.iter().position(|s| *s == id).unwrap_or(0);
        let mut path: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
        path.push(id.to_owned());
        return Err(ValidationError::CycleDetected { path });
    }
    if !visited.insert(id) {
        return Ok(());
    }

    on_stack.insert(id);
    stack.push(id);
    for &dep in deps.get(id).into_iter().flatten() {
        visit(dep, deps, visited, on_stack, stack)?;
    }
    stack.pop();
    on_stack.remove(id);
    Ok(())
}

/// Group the workflow's steps into ordered execution phases.
///
/// Expects a workflow that already passed [`validate`].
///
/// # Errors
/// [`ProcessingError::Deadlock`] if steps remain but none is ready. Cycle
/// validation makes this unreachable; it is re-checked here regardless.
pub fn plan(workflow: &WorkflowDefinition) -> Result<Vec<Phase>, ProcessingError> {
    let mut placed: HashSet<&str> = HashSet::with_capacity(workflow.steps.len());
    let mut remaining: Vec<_> = workflow.steps.iter().collect();
    let mut phases: Vec<Phase> = Vec::new();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<_>, Vec<_>) = remaining.into_iter().partition(|step| {
            step.dependencies
                .iter()
                .all(|dep| placed.contains(dep.as_str()))
        });

        if ready.is_empty() {
            return Err(ProcessingError::Deadlock {
                remaining: blocked.iter().map(|s| s.id.clone()).collect(),
            });
        }

        placed.extend(ready.iter().map(|s| s.id.as_str()));
        phases.push(ready.iter().map(|s| s.id.clone()).collect());
        remaining = blocked;
    }

    Ok(phases)
}

/// [`validate`] then [`plan`].
pub fn validate_and_plan(workflow: &WorkflowDefinition) -> Result<Vec<Phase>, crate::EngineError> {
    validate(workflow)?;
    Ok(plan(workflow)?)
}
