use serde::{Deserialize, Serialize};

use crate::domain::workflow::WorkflowStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEvent {
    PlanAccepted,
    PauseRequested,
    ResumeRequested,
    AllStepsCompleted,
    StepFailed,
    CancelRequested,
}

impl WorkflowEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlanAccepted => "plan_accepted",
            Self::PauseRequested => "pause_requested",
            Self::ResumeRequested => "resume_requested",
            Self::AllStepsCompleted => "all_steps_completed",
            Self::StepFailed => "step_failed",
            Self::CancelRequested => "cancel_requested",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: WorkflowStatus,
    pub to: WorkflowStatus,
    pub event: WorkflowEvent,
}
