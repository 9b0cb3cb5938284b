//! Step-level state logic for workflow executions.
//!
//! The engine never performs I/O. It decides whether a step may start, records
//! outcomes, and tells the caller whether a failed step should be retried and after
//! what delay. The async orchestrator drives it one step at a time.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::classify::suggest_recovery;
use crate::domain::tool::ToolResult;
use crate::domain::workflow::{
    StepStatus, WorkflowExecution, WorkflowExecutionStep, WorkflowStatus,
};
use crate::template::{self, PlaceholderError};

#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionEngineConfig {
    /// Upper bound for one tool invocation.
    pub step_timeout: Duration,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before retry `n` is `retry_backoff_base * n`.
    pub retry_backoff_base: Duration,
    /// How long finished workflows are kept before purge.
    pub retention: chrono::Duration,
}

impl Default for ExecutionEngineConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff_base: Duration::from_millis(1000),
            retention: chrono::Duration::minutes(60),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("workflow plan has no steps")]
    EmptyPlan,
    #[error("duplicate step id `{0}`")]
    DuplicateStep(String),
    #[error("step `{step}` depends on unknown step `{dependency}`")]
    UnknownDependency { step: String, dependency: String },
    #[error("step index {0} is out of range")]
    StepOutOfRange(usize),
    #[error("step `{step}` cannot start: dependency `{dependency}` is {status:?}")]
    DependencyNotCompleted { step: String, dependency: String, status: StepStatus },
    #[error("step `{step}` cannot move from {from:?} to {to:?}")]
    InvalidStepTransition { step: String, from: StepStatus, to: StepStatus },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryPolicy {
    Retry { delay: Duration },
    FailTerminal,
}

/// Aggregate view over a set of workflows.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetrics {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub average_wall_time_ms: Option<f64>,
    /// `completed / (completed + failed)`; cancelled workflows do not count.
    pub success_rate: Option<f64>,
}

#[derive(Clone, Debug, Default)]
pub struct StepExecutionEngine {
    config: ExecutionEngineConfig,
}

impl StepExecutionEngine {
    pub fn new() -> Self {
        Self::with_config(ExecutionEngineConfig::default())
    }

    pub fn with_config(config: ExecutionEngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutionEngineConfig {
        &self.config
    }

    /// Rejects plans that could never be executed: no steps, repeated ids, or
    /// dependencies on ids that are not in the plan. Dependencies on later steps are
    /// accepted here and fail at run time.
    pub fn validate_plan(&self, steps: &[WorkflowExecutionStep]) -> Result<(), ExecutionError> {
        if steps.is_empty() {
            return Err(ExecutionError::EmptyPlan);
        }
        let mut ids = BTreeSet::new();
        for step in steps {
            if !ids.insert(step.id.as_str()) {
                return Err(ExecutionError::DuplicateStep(step.id.clone()));
            }
        }
        for step in steps {
            if let Some(dependency) =
                step.depends_on.iter().find(|dependency| !ids.contains(dependency.as_str()))
            {
                return Err(ExecutionError::UnknownDependency {
                    step: step.id.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
        Ok(())
    }

    /// Moves step `index` from pending to executing. Every dependency must already be
    /// completed; otherwise the step is left untouched.
    pub fn claim_step(
        &self,
        workflow: &mut WorkflowExecution,
        index: usize,
    ) -> Result<(), ExecutionError> {
        let step = workflow.steps.get(index).ok_or(ExecutionError::StepOutOfRange(index))?;
        if step.status != StepStatus::Pending {
            return Err(ExecutionError::InvalidStepTransition {
                step: step.id.clone(),
                from: step.status,
                to: StepStatus::Executing,
            });
        }
        for dependency in &step.depends_on {
            let status = workflow.step(dependency).map(|found| found.status).ok_or_else(|| {
                ExecutionError::UnknownDependency {
                    step: step.id.clone(),
                    dependency: dependency.clone(),
                }
            })?;
            if status != StepStatus::Completed {
                return Err(ExecutionError::DependencyNotCompleted {
                    step: step.id.clone(),
                    dependency: dependency.clone(),
                    status,
                });
            }
        }

        workflow.current_step = index;
        let step = &mut workflow.steps[index];
        step.status = StepStatus::Executing;
        step.started_at.get_or_insert_with(Utc::now);
        Ok(())
    }

    /// Parameters of step `index` with every placeholder substituted from earlier
    /// results, the workflow variables, and `objective`.
    pub fn resolve_parameters(
        &self,
        workflow: &WorkflowExecution,
        index: usize,
    ) -> Result<Value, PlaceholderError> {
        let Some(step) = workflow.steps.get(index) else {
            return Err(PlaceholderError::Unresolved(format!("step #{index}")));
        };
        let mut variables = workflow.context.variables.clone();
        variables
            .entry("objective".to_string())
            .or_insert_with(|| Value::String(workflow.objective.clone()));
        template::resolve(&step.parameters, &workflow.results, &variables)
    }

    pub fn complete_step(
        &self,
        workflow: &mut WorkflowExecution,
        index: usize,
        result: ToolResult,
    ) -> Result<(), ExecutionError> {
        let step = executing_step(workflow, index, StepStatus::Completed)?;
        step.status = StepStatus::Completed;
        step.completed_at = Some(Utc::now());
        let step_id = step.id.clone();
        let data = result.data.clone();
        step.result = Some(result);
        workflow.results.insert(step_id, data);
        Ok(())
    }

    /// Records a failed attempt of step `index`. A retryable failure with attempts
    /// left puts the step back to pending and returns the delay before the next
    /// attempt; anything else marks the step failed for good.
    pub fn fail_step(
        &self,
        workflow: &mut WorkflowExecution,
        index: usize,
        result: ToolResult,
        retryable: bool,
    ) -> Result<RetryPolicy, ExecutionError> {
        let message = failure_message(&result);
        let max_retries = self.config.max_retries;
        let step = executing_step(workflow, index, StepStatus::Failed)?;
        let step_id = step.id.clone();
        step.result = Some(result);

        let policy = if retryable && step.retry_count < max_retries {
            step.retry_count += 1;
            step.status = StepStatus::Pending;
            RetryPolicy::Retry { delay: self.config.retry_backoff_base * step.retry_count }
        } else {
            step.status = StepStatus::Failed;
            step.completed_at = Some(Utc::now());
            RetryPolicy::FailTerminal
        };

        let suggestion = suggest_recovery(&message).message().to_string();
        workflow.record_error(Some(&step_id), message, Some(suggestion));
        Ok(policy)
    }

    /// Terminal workflows whose end lies further back than the retention window.
    pub fn is_expired(&self, workflow: &WorkflowExecution, now: DateTime<Utc>) -> bool {
        workflow.status.is_terminal()
            && workflow.ended_at.is_some_and(|ended_at| now - ended_at > self.config.retention)
    }
}

fn executing_step(
    workflow: &mut WorkflowExecution,
    index: usize,
    to: StepStatus,
) -> Result<&mut WorkflowExecutionStep, ExecutionError> {
    let step = workflow.steps.get_mut(index).ok_or(ExecutionError::StepOutOfRange(index))?;
    if step.status != StepStatus::Executing {
        return Err(ExecutionError::InvalidStepTransition {
            step: step.id.clone(),
            from: step.status,
            to,
        });
    }
    Ok(step)
}

fn failure_message(result: &ToolResult) -> String {
    match &result.error {
        Some(error) => format!("{}: {}", error.code.as_str(), error.message),
        None => result.message.clone(),
    }
}

pub fn compute_metrics<'a, I>(workflows: I) -> WorkflowMetrics
where
    I: IntoIterator<Item = &'a WorkflowExecution>,
{
    let mut metrics = WorkflowMetrics::default();
    let mut wall_times = Vec::new();
    for workflow in workflows {
        metrics.total += 1;
        match workflow.status {
            WorkflowStatus::Planning | WorkflowStatus::Executing | WorkflowStatus::Paused => {
                metrics.active += 1
            }
            WorkflowStatus::Completed => metrics.completed += 1,
            WorkflowStatus::Failed => metrics.failed += 1,
            WorkflowStatus::Cancelled => metrics.cancelled += 1,
        }
        if workflow.status.is_terminal() {
            wall_times.extend(workflow.wall_time_ms());
        }
    }

    if !wall_times.is_empty() {
        let total: i64 = wall_times.iter().sum();
        metrics.average_wall_time_ms = Some(total as f64 / wall_times.len() as f64);
    }
    let finished = metrics.completed + metrics.failed;
    if finished > 0 {
        metrics.success_rate = Some(metrics.completed as f64 / finished as f64);
    }
    metrics
}

/// Step statuses keyed by id, handy for status reports.
pub fn step_statuses(workflow: &WorkflowExecution) -> BTreeMap<String, StepStatus> {
    workflow.steps.iter().map(|step| (step.id.clone(), step.status)).collect()
}
