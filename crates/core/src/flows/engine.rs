use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::workflow::WorkflowStatus;
use crate::flows::states::{TransitionOutcome, WorkflowEvent};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: WorkflowStatus, event: WorkflowEvent },
}

/// Workflow lifecycle:
///
/// ```text
/// planning -> executing -> {completed | failed | cancelled}
/// executing <-> paused
/// any non-terminal -> cancelled
/// ```
#[derive(Clone, Debug, Default)]
pub struct WorkflowStateMachine;

impl WorkflowStateMachine {
    pub fn new() -> Self {
        Self
    }

    pub fn initial_state(&self) -> WorkflowStatus {
        WorkflowStatus::Planning
    }

    pub fn apply(
        &self,
        current: WorkflowStatus,
        event: WorkflowEvent,
    ) -> Result<TransitionOutcome, WorkflowTransitionError> {
        transition(current, event)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: WorkflowStatus,
        event: WorkflowEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, WorkflowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "workflow.transition_applied",
                        AuditCategory::Workflow,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("event", outcome.event.as_str()),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "workflow.transition_rejected",
                        AuditCategory::Workflow,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

fn transition(
    current: WorkflowStatus,
    event: WorkflowEvent,
) -> Result<TransitionOutcome, WorkflowTransitionError> {
    use WorkflowEvent::{
        AllStepsCompleted, CancelRequested, PauseRequested, PlanAccepted, ResumeRequested,
        StepFailed,
    };
    use WorkflowStatus::{Cancelled, Completed, Executing, Failed, Paused, Planning};

    let to = match (current, event) {
        (Planning, PlanAccepted) => Executing,
        (Executing, PauseRequested) => Paused,
        (Paused, ResumeRequested) => Executing,
        (Executing, AllStepsCompleted) => Completed,
        (Planning, StepFailed) | (Executing, StepFailed) => Failed,
        (Planning, CancelRequested) | (Executing, CancelRequested) | (Paused, CancelRequested) => {
            Cancelled
        }
        _ => return Err(WorkflowTransitionError::InvalidTransition { state: current, event }),
    };

    Ok(TransitionOutcome { from: current, to, event })
}
