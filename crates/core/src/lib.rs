//! Domain model, stores and pure decision helpers for the dealpilot agent.
//!
//! Nothing in this crate performs network I/O. The async orchestration that talks
//! to the language provider and to tools lives in `dealpilot-agent`.

pub mod audit;
pub mod cache;
pub mod classify;
pub mod config;
pub mod domain;
pub mod errors;
pub mod execution_engine;
pub mod flows;
pub mod rules;
pub mod store;
pub mod template;

pub use audit::{AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink};
pub use cache::{is_stale, TimedEntry};
pub use domain::conversation::{ConversationContext, ConversationTurn};
pub use domain::decision::{DecisionAction, DecisionContext, DecisionResult, Objective};
pub use domain::rule::{BusinessRule, RulePriority, WorkflowPattern};
pub use domain::snapshot::{PipelineHealth, SystemSnapshot};
pub use domain::tool::{ExecutionContext, ToolDefinition, ToolErrorCode, ToolResult};
pub use domain::workflow::{WorkflowExecution, WorkflowId, WorkflowStatus};
pub use errors::{AgentError, DomainError, ErrorClass, ErrorEnvelope, WorkflowError};
pub use rules::RuleStore;
pub use store::{InMemoryStore, KeyValueStore};
