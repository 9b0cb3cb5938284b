//! Multi-step workflow driver.
//!
//! Steps run strictly in declared order. Before each attempt the workflow status is
//! re-read, so pause and cancel take effect at the next step boundary; an in-flight
//! tool call is never interrupted. The workflow table is only touched through
//! atomic `modify` calls and no lock is held while a tool runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dealpilot_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink,
};
use dealpilot_core::classify::{classify_workflow, suggest_recovery, WorkflowCategory};
use dealpilot_core::domain::rule::WorkflowPattern;
use dealpilot_core::domain::tool::{ExecutionContext, ToolErrorCode, ToolResult};
use dealpilot_core::domain::workflow::{
    StepStatus, WorkflowContext, WorkflowErrorEntry, WorkflowExecution, WorkflowExecutionStep,
    WorkflowId, WorkflowStatus,
};
use dealpilot_core::errors::{DomainError, WorkflowError};
use dealpilot_core::execution_engine::{
    compute_metrics, step_statuses, ExecutionEngineConfig, RetryPolicy, StepExecutionEngine,
    WorkflowMetrics,
};
use dealpilot_core::flows::{WorkflowEvent, WorkflowStateMachine};
use dealpilot_core::rules::RuleStore;
use dealpilot_core::store::{InMemoryStore, KeyValueStore};
use serde::Serialize;
use serde_json::{json, Value};

use crate::tools::{ToolDispatcher, THINK_TOOL};

/// Reserved tool name the decision engine uses to request a multi-step plan.
pub const RUN_WORKFLOW_TOOL: &str = "run_workflow";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WorkflowStatusReport {
    pub id: WorkflowId,
    pub objective: String,
    pub status: WorkflowStatus,
    pub current_step: usize,
    pub total_steps: usize,
    pub steps: BTreeMap<String, StepStatus>,
    pub errors: Vec<WorkflowErrorEntry>,
}

enum Attempt {
    Completed,
    Stopped,
}

pub struct WorkflowOrchestrator {
    dispatcher: Arc<ToolDispatcher>,
    rules: Arc<RuleStore>,
    engine: StepExecutionEngine,
    machine: WorkflowStateMachine,
    workflows: Arc<dyn KeyValueStore<WorkflowId, WorkflowExecution>>,
    audit: Arc<dyn AuditSink>,
}

impl WorkflowOrchestrator {
    pub fn new(
        dispatcher: Arc<ToolDispatcher>,
        rules: Arc<RuleStore>,
        config: ExecutionEngineConfig,
    ) -> Self {
        Self::with_store(
            dispatcher,
            rules,
            config,
            Arc::new(InMemoryStore::new()),
            Arc::new(TracingAuditSink),
        )
    }

    pub fn with_store(
        dispatcher: Arc<ToolDispatcher>,
        rules: Arc<RuleStore>,
        config: ExecutionEngineConfig,
        workflows: Arc<dyn KeyValueStore<WorkflowId, WorkflowExecution>>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            dispatcher,
            rules,
            engine: StepExecutionEngine::with_config(config),
            machine: WorkflowStateMachine::new(),
            workflows,
            audit,
        }
    }

    /// Expands the workflow pattern matching `objective`. Falls back to the generic
    /// pattern, then to a lone `think` step when no pattern is registered.
    pub fn plan(&self, objective: &str) -> Vec<WorkflowExecutionStep> {
        let category = classify_workflow(objective);
        let pattern = self
            .rules
            .get_workflow_pattern(category.pattern_name())
            .or_else(|| self.rules.get_workflow_pattern(WorkflowCategory::Generic.pattern_name()));

        match pattern {
            Some(pattern) => steps_from_pattern(&pattern),
            None => vec![WorkflowExecutionStep::new(
                THINK_TOOL,
                THINK_TOOL,
                json!({ "thought": "Plan how to reach the objective: ${objective}" }),
            )],
        }
    }

    pub fn create_workflow(
        &self,
        objective: &str,
        steps: Option<Vec<WorkflowExecutionStep>>,
        context: WorkflowContext,
    ) -> Result<WorkflowExecution, WorkflowError> {
        let objective = objective.trim();
        if objective.is_empty() {
            return Err(WorkflowError::InvalidPlan("objective must not be empty".to_string()));
        }
        let planned = steps.is_none();
        let steps = steps.unwrap_or_else(|| self.plan(objective));
        self.engine
            .validate_plan(&steps)
            .map_err(|error| WorkflowError::InvalidPlan(error.to_string()))?;

        let workflow = WorkflowExecution::new(objective, steps, context);
        self.workflows.set(workflow.id.clone(), workflow.clone());
        self.audit.emit(
            AuditEvent::from_context(
                &audit_context(&workflow),
                "workflow.created",
                AuditCategory::Workflow,
                AuditOutcome::Success,
            )
            .with_metadata("steps", workflow.steps.len().to_string())
            .with_metadata("planned", planned.to_string()),
        );
        tracing::info!(
            event_name = "workflow.created",
            workflow_id = %workflow.id,
            session_id = %workflow.context.session_id,
            steps = workflow.steps.len(),
            planned,
            "workflow created"
        );
        Ok(workflow)
    }

    /// Starts a workflow in `planning` and drives it until it finishes, fails, or is
    /// paused or cancelled between steps. Step failures are reported through the
    /// returned workflow's status, not as an `Err`.
    pub async fn execute(&self, id: &WorkflowId) -> Result<WorkflowExecution, WorkflowError> {
        let workflow = self.get(id)?;
        if workflow.status != WorkflowStatus::Planning {
            return Err(WorkflowError::NotRunnable { id: id.clone(), status: workflow.status });
        }
        self.transition(id, WorkflowEvent::PlanAccepted)?;
        self.run(id).await
    }

    pub fn pause(&self, id: &WorkflowId) -> Result<WorkflowExecution, WorkflowError> {
        self.transition(id, WorkflowEvent::PauseRequested)
    }

    /// Moves a paused workflow back to `executing` and continues from the first step
    /// that has not completed.
    pub async fn resume(&self, id: &WorkflowId) -> Result<WorkflowExecution, WorkflowError> {
        self.transition(id, WorkflowEvent::ResumeRequested)?;
        self.run(id).await
    }

    pub fn cancel(&self, id: &WorkflowId) -> Result<WorkflowExecution, WorkflowError> {
        self.transition(id, WorkflowEvent::CancelRequested)
    }

    pub fn get(&self, id: &WorkflowId) -> Result<WorkflowExecution, WorkflowError> {
        self.workflows.get(id).ok_or_else(|| WorkflowError::NotFound(id.clone()))
    }

    pub fn status(&self, id: &WorkflowId) -> Result<WorkflowStatusReport, WorkflowError> {
        let workflow = self.get(id)?;
        Ok(WorkflowStatusReport {
            steps: step_statuses(&workflow),
            id: workflow.id,
            objective: workflow.objective,
            status: workflow.status,
            current_step: workflow.current_step,
            total_steps: workflow.steps.len(),
            errors: workflow.errors,
        })
    }

    pub fn metrics(&self) -> WorkflowMetrics {
        let workflows = self.workflows.values();
        compute_metrics(workflows.iter())
    }

    /// Drops terminal workflows that ended longer ago than the retention window.
    pub fn purge_finished(&self, now: DateTime<Utc>) -> usize {
        let mut purged = 0;
        for id in self.workflows.keys() {
            self.workflows.modify(id, &mut |current| {
                let workflow = current?;
                if self.engine.is_expired(&workflow, now) {
                    purged += 1;
                    None
                } else {
                    Some(workflow)
                }
            });
        }
        if purged > 0 {
            tracing::info!(event_name = "workflow.purged", purged, "purged finished workflows");
        }
        purged
    }

    async fn run(&self, id: &WorkflowId) -> Result<WorkflowExecution, WorkflowError> {
        let total = self.get(id)?.steps.len();
        for index in 0..total {
            loop {
                let workflow = self.get(id)?;
                if workflow.status != WorkflowStatus::Executing {
                    tracing::info!(
                        event_name = "workflow.halted",
                        workflow_id = %id,
                        status = workflow.status.as_str(),
                        step = index,
                        "workflow stopped at step boundary"
                    );
                    return Ok(workflow);
                }
                if workflow.steps[index].status == StepStatus::Completed {
                    break;
                }
                match self.attempt_step(id, index).await? {
                    Some(Attempt::Completed) => break,
                    Some(Attempt::Stopped) => return self.get(id),
                    None => continue,
                }
            }
        }

        let workflow = self.get(id)?;
        if workflow.status != WorkflowStatus::Executing {
            tracing::info!(
                event_name = "workflow.halted",
                workflow_id = %id,
                status = workflow.status.as_str(),
                step = total,
                "workflow stopped after its last step"
            );
            return Ok(workflow);
        }
        let finished = self.transition(id, WorkflowEvent::AllStepsCompleted)?;
        tracing::info!(
            event_name = "workflow.completed",
            workflow_id = %id,
            wall_time_ms = finished.wall_time_ms().unwrap_or_default(),
            "workflow completed"
        );
        Ok(finished)
    }

    /// One attempt at step `index`. `None` means the step was put back to pending
    /// and should be attempted again.
    async fn attempt_step(
        &self,
        id: &WorkflowId,
        index: usize,
    ) -> Result<Option<Attempt>, WorkflowError> {
        let prepared = self.update(id, |workflow| {
            self.engine.claim_step(workflow, index).map_err(|error| error.to_string())?;
            let step = &workflow.steps[index];
            let context = ExecutionContext {
                session_id: workflow.context.session_id.clone(),
                user_id: workflow.context.user_id.clone(),
                permissions: workflow.context.permissions.clone(),
                request_id: workflow.id.to_string(),
                tool_call_id: format!("{}:{}:{}", workflow.id, step.id, step.retry_count),
                ..ExecutionContext::default()
            };
            let prepared = (step.id.clone(), step.tool.clone(), context);
            Ok::<_, String>((prepared, self.engine.resolve_parameters(workflow, index)))
        })?;

        let ((step_id, tool, context), parameters) = match prepared {
            Ok(prepared) => prepared,
            Err(message) => {
                self.abort(id, index, message)?;
                return Ok(Some(Attempt::Stopped));
            }
        };

        let result = match parameters {
            Ok(parameters) => self.dispatch(&tool, parameters, &context).await,
            Err(error) => {
                let result = ToolResult::failure(ToolErrorCode::InvalidParameters, error.to_string());
                self.fail_terminal(id, index, &step_id, result)?;
                return Ok(Some(Attempt::Stopped));
            }
        };

        if result.success {
            self.update(id, |workflow| self.engine.complete_step(workflow, index, result))?
                .map_err(|error| DomainError::InvariantViolation(error.to_string()))?;
            tracing::debug!(
                event_name = "workflow.step.completed",
                workflow_id = %id,
                step_id = %step_id,
                tool = %tool,
                "workflow step completed"
            );
            return Ok(Some(Attempt::Completed));
        }

        let retryable = result.is_retryable();
        let policy = self
            .update(id, |workflow| self.engine.fail_step(workflow, index, result, retryable))?
            .map_err(|error| DomainError::InvariantViolation(error.to_string()))?;
        match policy {
            RetryPolicy::Retry { delay } => {
                tracing::warn!(
                    event_name = "workflow.step.retry",
                    workflow_id = %id,
                    step_id = %step_id,
                    tool = %tool,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "workflow step failed, retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                Ok(None)
            }
            RetryPolicy::FailTerminal => {
                self.finish_failed(id, &step_id)?;
                Ok(Some(Attempt::Stopped))
            }
        }
    }

    async fn dispatch(&self, tool: &str, parameters: Value, context: &ExecutionContext) -> ToolResult {
        let timeout = self.engine.config().step_timeout;
        match tokio::time::timeout(timeout, self.dispatcher.execute(tool, parameters, context)).await
        {
            Ok(result) => result,
            Err(_) => ToolResult::failure(
                ToolErrorCode::ToolTimeout,
                format!("step timed out after {}s", timeout.as_secs()),
            ),
        }
    }

    /// Run-time plan violation such as a dependency that has not completed. The step
    /// never starts and the whole workflow fails.
    fn abort(&self, id: &WorkflowId, index: usize, message: String) -> Result<(), WorkflowError> {
        let step_id = self.update(id, |workflow| {
            let step_id = workflow.steps.get(index).map(|step| step.id.clone());
            let suggestion = suggest_recovery(&message).message().to_string();
            workflow.record_error(step_id.as_deref(), message.clone(), Some(suggestion));
            step_id
        })?;
        self.finish_failed(id, step_id.as_deref().unwrap_or("unknown"))
    }

    fn fail_terminal(
        &self,
        id: &WorkflowId,
        index: usize,
        step_id: &str,
        result: ToolResult,
    ) -> Result<(), WorkflowError> {
        self.update(id, |workflow| self.engine.fail_step(workflow, index, result, false))?
            .map_err(|error| DomainError::InvariantViolation(error.to_string()))?;
        self.finish_failed(id, step_id)
    }

    /// A pause or cancel that landed while the step was running wins over the failure.
    fn finish_failed(&self, id: &WorkflowId, step_id: &str) -> Result<(), WorkflowError> {
        if self.get(id)?.status != WorkflowStatus::Executing {
            return Ok(());
        }
        let failed = self.transition(id, WorkflowEvent::StepFailed)?;
        tracing::warn!(
            event_name = "workflow.failed",
            workflow_id = %id,
            step_id,
            error = failed.errors.last().map(|error| error.message.as_str()).unwrap_or("unknown"),
            "workflow failed"
        );
        Ok(())
    }

    fn transition(
        &self,
        id: &WorkflowId,
        event: WorkflowEvent,
    ) -> Result<WorkflowExecution, WorkflowError> {
        self.update(id, |workflow| {
            let outcome = self
                .machine
                .apply_with_audit(
                    workflow.status,
                    event,
                    self.audit.as_ref(),
                    &audit_context(workflow),
                )
                .map_err(DomainError::from)?;
            workflow.status = outcome.to;
            if outcome.to.is_terminal() {
                workflow.ended_at = Some(Utc::now());
            }
            Ok::<_, WorkflowError>(workflow.clone())
        })?
    }

    fn update<T>(
        &self,
        id: &WorkflowId,
        apply: impl FnOnce(&mut WorkflowExecution) -> T,
    ) -> Result<T, WorkflowError> {
        let mut apply = Some(apply);
        let mut output = None;
        self.workflows.modify(id.clone(), &mut |current| {
            let mut workflow = current?;
            if let Some(apply) = apply.take() {
                output = Some(apply(&mut workflow));
            }
            Some(workflow)
        });
        output.ok_or_else(|| WorkflowError::NotFound(id.clone()))
    }
}

fn steps_from_pattern(pattern: &WorkflowPattern) -> Vec<WorkflowExecutionStep> {
    pattern
        .steps
        .iter()
        .map(|template| {
            template.depends_on.iter().fold(
                WorkflowExecutionStep::new(&template.id, &template.tool, template.parameters.clone())
                    .with_description(&template.description),
                |step, dependency| step.depends_on(dependency),
            )
        })
        .collect()
}

fn audit_context(workflow: &WorkflowExecution) -> AuditContext {
    AuditContext::new(
        Some(workflow.context.session_id.clone()),
        Some(workflow.id.to_string()),
        workflow.id.to_string(),
        workflow.context.user_id.clone(),
    )
}
