use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::tool::ToolResult;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    pub fn generate() -> Self {
        Self(format!("wf_{}", uuid::Uuid::new_v4()))
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Planning,
    Executing,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Executing => "executing",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionStep {
    pub id: String,
    pub sequence: usize,
    pub tool: String,
    pub description: String,
    /// May contain unresolved `${...}` placeholders until the step is dispatched.
    pub parameters: Value,
    pub depends_on: BTreeSet<String>,
    pub status: StepStatus,
    pub retry_count: u32,
    pub result: Option<ToolResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowExecutionStep {
    pub fn new(id: impl Into<String>, tool: impl Into<String>, parameters: Value) -> Self {
        Self {
            id: id.into(),
            sequence: 0,
            tool: tool.into(),
            description: String::new(),
            parameters,
            depends_on: BTreeSet::new(),
            status: StepStatus::Pending,
            retry_count: 0,
            result: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.insert(step_id.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowErrorEntry {
    pub step_id: Option<String>,
    pub message: String,
    pub recovery_suggestion: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Caller identity and named variables available to `${...}` placeholders.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub user_id: String,
    pub session_id: String,
    pub permissions: BTreeSet<String>,
    pub variables: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: WorkflowId,
    pub objective: String,
    pub status: WorkflowStatus,
    pub steps: Vec<WorkflowExecutionStep>,
    pub current_step: usize,
    /// Successful step payloads keyed by step id.
    pub results: BTreeMap<String, Value>,
    pub errors: Vec<WorkflowErrorEntry>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub context: WorkflowContext,
}

impl WorkflowExecution {
    /// Creates a workflow in `planning`. Step sequence numbers are fixed here and
    /// never change afterwards.
    pub fn new(
        objective: impl Into<String>,
        mut steps: Vec<WorkflowExecutionStep>,
        context: WorkflowContext,
    ) -> Self {
        for (index, step) in steps.iter_mut().enumerate() {
            step.sequence = index + 1;
        }
        Self {
            id: WorkflowId::generate(),
            objective: objective.into(),
            status: WorkflowStatus::Planning,
            steps,
            current_step: 0,
            results: BTreeMap::new(),
            errors: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
            context,
        }
    }

    pub fn step(&self, step_id: &str) -> Option<&WorkflowExecutionStep> {
        self.steps.iter().find(|step| step.id == step_id)
    }

    pub fn record_error(
        &mut self,
        step_id: Option<&str>,
        message: impl Into<String>,
        recovery_suggestion: Option<String>,
    ) {
        self.errors.push(WorkflowErrorEntry {
            step_id: step_id.map(str::to_string),
            message: message.into(),
            recovery_suggestion,
            occurred_at: Utc::now(),
        });
    }

    pub fn wall_time_ms(&self) -> Option<i64> {
        self.ended_at.map(|ended_at| (ended_at - self.started_at).num_milliseconds().max(0))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{WorkflowContext, WorkflowExecution, WorkflowExecutionStep, WorkflowStatus};

    #[test]
    fn new_workflow_fixes_sequence_numbers_in_declared_order() {
        let workflow = WorkflowExecution::new(
            "find deals",
            vec![
                WorkflowExecutionStep::new("think", "think", json!({"thought": "plan"})),
                WorkflowExecutionStep::new("search", "search_entities", json!({}))
                    .depends_on("think"),
            ],
            WorkflowContext::default(),
        );

        assert_eq!(workflow.status, WorkflowStatus::Planning);
        assert_eq!(workflow.steps[0].sequence, 1);
        assert_eq!(workflow.steps[1].sequence, 2);
        assert!(workflow.id.0.starts_with("wf_"));
        assert!(workflow.step("search").is_some());
    }

    #[test]
    fn terminal_statuses() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
        assert!(!WorkflowStatus::Paused.is_terminal());
    }
}
