pub mod engine;
pub mod states;

pub use engine::{WorkflowStateMachine, WorkflowTransitionError};
pub use states::{TransitionOutcome, WorkflowEvent};
