//! Agent runtime for the dealpilot assistant.
//!
//! A request moves through a fixed loop:
//! 1. **Session** (`conversation`) - load or create the per-session context.
//! 2. **Snapshot** (`snapshot`) - attach a cached or freshly generated view of
//!    business state.
//! 3. **Decision** (`decision`, `prompt`, `llm`) - ask the model for one structured
//!    next action and repair or replace malformed answers.
//! 4. **Guardrails** (`guardrails`) - reject or degrade decisions before dispatch.
//! 5. **Dispatch** (`tools`, `workflow`) - run one tool, or plan and drive a
//!    multi-step workflow with retries.
//!
//! `runtime::AgentOrchestrator` wires the loop together and is the only entry
//! point callers need.
//!
//! # Safety Principle
//!
//! The model only chooses among registered tools. Permissions, retries, and every
//! state transition are decided by deterministic code.

pub mod conversation;
pub mod decision;
pub mod guardrails;
pub mod llm;
pub mod prompt;
pub mod runtime;
pub mod snapshot;
pub mod tools;
pub mod workflow;

pub use runtime::{AgentOrchestrator, AgentParts, AgentRequest, AgentResponse, SnapshotUse};
