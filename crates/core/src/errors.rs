use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::workflow::{WorkflowId, WorkflowStatus};
use crate::flows::WorkflowTransitionError;

/// Failure taxonomy shared by tools, workflows and the request boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Validation,
    Permission,
    NotFound,
    Execution,
    Timeout,
    DecisionParse,
    System,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Permission => "permission",
            Self::NotFound => "not_found",
            Self::Execution => "execution",
            Self::Timeout => "timeout",
            Self::DecisionParse => "decision_parse",
            Self::System => "system",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::Permission => "PERMISSION_DENIED",
            Self::NotFound => "NOT_FOUND",
            Self::Execution => "EXECUTION_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::DecisionParse => "DECISION_PARSE_ERROR",
            Self::System => "SYSTEM_ERROR",
        }
    }

    pub fn recoverable(&self) -> bool {
        match self {
            Self::Validation | Self::Permission => false,
            Self::NotFound
            | Self::Execution
            | Self::Timeout
            | Self::DecisionParse
            | Self::System => true,
        }
    }

    pub fn retryable(&self) -> bool {
        matches!(self, Self::Execution | Self::Timeout)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    WorkflowTransition(#[from] WorkflowTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("workflow `{0}` not found")]
    NotFound(WorkflowId),
    #[error("workflow `{id}` cannot run while {status:?}")]
    NotRunnable { id: WorkflowId, status: WorkflowStatus },
    #[error("invalid workflow plan: {0}")]
    InvalidPlan(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl WorkflowError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::NotRunnable { .. } | Self::InvalidPlan(_) | Self::Domain(_) => {
                ErrorClass::Validation
            }
        }
    }
}

/// Failures surfaced by the agent request boundary.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("operation timed out: {0}")]
    Timeout(String),
    #[error("internal failure: {0}")]
    System(String),
}

impl AgentError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(_) => ErrorClass::Validation,
            Self::Permission(_) => ErrorClass::Permission,
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::Execution(_) => ErrorClass::Execution,
            Self::Timeout(_) => ErrorClass::Timeout,
            Self::System(_) => ErrorClass::System,
        }
    }

    pub fn into_envelope(self, correlation_id: impl Into<String>) -> ErrorEnvelope {
        let class = self.class();
        ErrorEnvelope {
            code: class.code().to_string(),
            message: user_message(class).to_string(),
            recoverable: class.recoverable(),
            correlation_id: correlation_id.into(),
        }
    }
}

impl From<WorkflowError> for AgentError {
    fn from(value: WorkflowError) -> Self {
        match value.class() {
            ErrorClass::NotFound => Self::NotFound(value.to_string()),
            _ => Self::Validation(value.to_string()),
        }
    }
}

/// Caller-facing error. Carries a stable code and a user-safe message only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    pub recoverable: bool,
    pub correlation_id: String,
}

pub fn user_message(class: ErrorClass) -> &'static str {
    match class {
        ErrorClass::Validation => {
            "The request could not be processed. Check the details and try again."
        }
        ErrorClass::Permission => "You do not have permission to perform that action.",
        ErrorClass::NotFound => {
            "I could not find what you were looking for. Could you try a different name or filter?"
        }
        ErrorClass::Execution => "That action did not complete. Please try again in a moment.",
        ErrorClass::Timeout => "That took longer than expected. Please retry shortly.",
        ErrorClass::DecisionParse => {
            "I did not fully understand that. Could you rephrase or add more detail?"
        }
        ErrorClass::System => "An unexpected internal error occurred. Please try again.",
    }
}
