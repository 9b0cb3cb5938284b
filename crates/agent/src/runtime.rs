//! Request pipeline.
//!
//! One [`AgentRequest`] flows through: session lookup, snapshot cache, objective
//! classification, decision, guardrail check, dispatch, history append. Every
//! failure is folded into an [`AgentResponse`] carrying an [`ErrorEnvelope`]; the
//! caller never sees an `Err`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dealpilot_core::cache::TimedEntry;
use dealpilot_core::classify::classify_objective;
use dealpilot_core::config::{AgentConfig, AppConfig};
use dealpilot_core::domain::conversation::{ConversationContext, ConversationTurn};
use dealpilot_core::domain::decision::{
    DecisionAction, DecisionContext, DecisionResult, Objective, OperationType,
};
use dealpilot_core::domain::snapshot::SystemSnapshot;
use dealpilot_core::domain::tool::{ExecutionContext, ToolDefinition, ToolError, ToolResult};
use dealpilot_core::domain::workflow::{StepStatus, WorkflowContext, WorkflowStatus};
use dealpilot_core::errors::{AgentError, ErrorClass, ErrorEnvelope};
use dealpilot_core::rules::{RuleQuery, RuleStore};
use dealpilot_core::store::InMemoryStore;
use secrecy::SecretString;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::conversation::SessionStore;
use crate::decision::DecisionEngine;
use crate::guardrails::{GuardrailDecision, GuardrailPolicy};
use crate::llm::{CompletionOptions, LlmClient};
use crate::prompt::PromptComposer;
use crate::snapshot::SnapshotProvider;
use crate::tools::{ToolDispatcher, THINK_TOOL};
use crate::workflow::{WorkflowOrchestrator, WorkflowStatusReport, RUN_WORKFLOW_TOOL};

const BASE_CONFIDENCE: f64 = 0.5;
const SUCCESS_BONUS: f64 = 0.3;
const TOOL_RESULT_BONUS: f64 = 0.2;

#[derive(Clone, Debug)]
pub struct AgentRequest {
    pub user_id: String,
    pub session_id: String,
    pub message: String,
    /// Opaque caller credential. Authentication happens upstream; it is carried for
    /// tools that call back into authenticated services and never logged.
    pub auth_token: SecretString,
    pub permissions: BTreeSet<String>,
    pub context: Option<BTreeMap<String, Value>>,
}

impl AgentRequest {
    pub fn new(
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            message: message.into(),
            auth_token: SecretString::from(String::new()),
            permissions: BTreeSet::new(),
            context: None,
        }
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = SecretString::from(token.into());
        self
    }

    pub fn with_context(mut self, context: BTreeMap<String, Value>) -> Self {
        self.context = Some(context);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotUse {
    Fresh,
    Reused,
    Unavailable,
    Disabled,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResponseMetadata {
    pub request_id: String,
    pub objective: Option<Objective>,
    pub operation: Option<OperationType>,
    pub snapshot: SnapshotUse,
    pub processing_time_ms: u64,
    pub confidence: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AgentResponse {
    pub success: bool,
    pub message: String,
    pub decision: Option<DecisionResult>,
    pub tool_result: Option<ToolResult>,
    pub workflow: Option<WorkflowStatusReport>,
    pub error: Option<ErrorEnvelope>,
    pub metadata: ResponseMetadata,
}

struct Outcome {
    success: bool,
    message: String,
    tool_result: Option<ToolResult>,
    workflow: Option<WorkflowStatusReport>,
    error: Option<ErrorEnvelope>,
}

impl Outcome {
    fn reply(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            tool_result: None,
            workflow: None,
            error: None,
        }
    }

    fn failed(error: AgentError, request_id: &str, recoverable: bool) -> Self {
        let mut envelope = error.into_envelope(request_id);
        envelope.recoverable = recoverable;
        Self {
            success: false,
            message: envelope.message.clone(),
            tool_result: None,
            workflow: None,
            error: Some(envelope),
        }
    }
}

/// Collaborators an [`AgentOrchestrator`] is assembled from.
pub struct AgentParts {
    pub llm: Arc<dyn LlmClient>,
    pub snapshots: Arc<dyn SnapshotProvider>,
    pub dispatcher: Arc<ToolDispatcher>,
    pub rules: Arc<RuleStore>,
}

pub struct AgentOrchestrator {
    config: AgentConfig,
    sessions: SessionStore,
    rules: Arc<RuleStore>,
    rule_max_age: chrono::Duration,
    dispatcher: Arc<ToolDispatcher>,
    workflows: Arc<WorkflowOrchestrator>,
    decisions: Arc<DecisionEngine>,
    snapshots: Arc<dyn SnapshotProvider>,
    guardrails: GuardrailPolicy,
}

impl AgentOrchestrator {
    pub fn from_config(config: &AppConfig, parts: AgentParts) -> Self {
        let workflows = Arc::new(WorkflowOrchestrator::new(
            Arc::clone(&parts.dispatcher),
            Arc::clone(&parts.rules),
            config.execution_engine(),
        ));
        let decisions = Arc::new(DecisionEngine::new(
            parts.llm,
            PromptComposer::new(config.agent.prompt_history_turns),
            CompletionOptions::from(&config.llm),
            config.agent.rate_limit_per_minute,
        ));

        Self {
            config: config.agent.clone(),
            sessions: SessionStore::new(Arc::new(InMemoryStore::new()), config.agent.history_limit),
            rules: parts.rules,
            rule_max_age: config.rule_max_age(),
            dispatcher: parts.dispatcher,
            workflows,
            decisions,
            snapshots: parts.snapshots,
            guardrails: GuardrailPolicy::default(),
        }
    }

    pub fn with_guardrails(mut self, guardrails: GuardrailPolicy) -> Self {
        self.guardrails = guardrails;
        self
    }

    pub fn workflows(&self) -> &Arc<WorkflowOrchestrator> {
        &self.workflows
    }

    pub fn dispatcher(&self) -> &Arc<ToolDispatcher> {
        &self.dispatcher
    }

    pub fn session_history(&self, session_id: &str) -> Vec<ConversationTurn> {
        self.sessions.history(session_id)
    }

    pub fn session(&self, session_id: &str) -> Option<ConversationContext> {
        self.sessions.get(session_id)
    }

    pub async fn handle(&self, request: AgentRequest) -> AgentResponse {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        tracing::info!(
            event_name = "agent.request.received",
            request_id = %request_id,
            session_id = %request.session_id,
            user_id = %request.user_id,
            message_chars = request.message.chars().count(),
            "agent request received"
        );

        let mut metadata = ResponseMetadata {
            request_id: request_id.clone(),
            objective: None,
            operation: None,
            snapshot: SnapshotUse::Disabled,
            processing_time_ms: 0,
            confidence: BASE_CONFIDENCE,
        };

        if let Err(error) = validate(&request) {
            let outcome = Outcome::failed(error, &request_id, false);
            return finish(outcome, None, metadata, started);
        }

        let _guard = self.sessions.lock(&request.session_id).await;
        let fields = request.context.clone().unwrap_or_default();
        let session = self.sessions.open(&request.session_id, &request.user_id, &fields);

        let (snapshot, snapshot_use) = self.snapshot_for(&request, &session).await;
        metadata.snapshot = snapshot_use;

        let objective = classify_objective(&request.message);
        let operation = operation_for(&session, objective);
        metadata.objective = Some(objective);
        metadata.operation = Some(operation);

        let context = DecisionContext {
            objective,
            user_message: request.message.clone(),
            available_tools: self.available_tools(&request.permissions),
            snapshot: snapshot.clone(),
            history: session.recent_history(self.config.prompt_history_turns),
            rules: self.rules.get_relevant_rules(
                &RuleQuery::new(objective, &request.message),
                self.rule_max_age,
            ),
            constraints: self.guardrails.constraints(objective, &request.permissions),
        };
        let decision = match self.decide(&request.user_id, context, operation).await {
            Ok(decision) => decision,
            Err(error) => {
                let outcome = Outcome::failed(error, &request_id, true);
                self.record_exchange(&request, &outcome);
                return finish(outcome, None, metadata, started);
            }
        };

        let outcome = match self.guardrails.evaluate(&decision) {
            GuardrailDecision::Allow => {
                self.dispatch(&request, &request_id, &decision, snapshot, &session).await
            }
            GuardrailDecision::Deny { reason_code, user_message } => {
                tracing::warn!(
                    event_name = "agent.guardrail.denied",
                    request_id = %request_id,
                    reason_code,
                    "decision rejected by guardrail"
                );
                let mut outcome =
                    Outcome::failed(AgentError::Execution(reason_code.into()), &request_id, false);
                outcome.message = user_message;
                outcome
            }
            GuardrailDecision::Degrade { reason_code, user_message, fallback_path } => {
                tracing::info!(
                    event_name = "agent.guardrail.degraded",
                    request_id = %request_id,
                    reason_code,
                    fallback_path,
                    "decision degraded by guardrail"
                );
                Outcome::reply(user_message)
            }
        };

        self.record_exchange(&request, &outcome);
        finish(outcome, Some(decision), metadata, started)
    }

    /// Runs the decision engine on its own task so a panicking model client surfaces
    /// as a system error instead of unwinding through the caller.
    async fn decide(
        &self,
        user_id: &str,
        context: DecisionContext,
        operation: OperationType,
    ) -> Result<DecisionResult, AgentError> {
        let engine = Arc::clone(&self.decisions);
        let user_id = user_id.to_string();
        tokio::spawn(async move { engine.decide(&user_id, &context, operation).await })
            .await
            .map_err(|error| {
                tracing::error!(
                    event_name = "agent.decision.crashed",
                    error = %error,
                    "decision task did not finish"
                );
                AgentError::System(format!("decision task failed: {error}"))
            })
    }

    fn record_exchange(&self, request: &AgentRequest, outcome: &Outcome) {
        let failed = !outcome.success;
        self.sessions.append_exchange(
            &request.session_id,
            ConversationTurn::user(request.message.clone()),
            ConversationTurn::assistant(outcome.message.clone()),
        );
        self.sessions.update(&request.session_id, |session| {
            session.last_request_failed = failed;
        });
    }

    /// Cached snapshot when younger than the configured age, else a fresh one that
    /// is written back only after the provider answers.
    async fn snapshot_for(
        &self,
        request: &AgentRequest,
        session: &ConversationContext,
    ) -> (Option<SystemSnapshot>, SnapshotUse) {
        if !self.config.real_time_context {
            return (None, SnapshotUse::Disabled);
        }
        let now = Utc::now();
        if let Some(cached) = session
            .snapshot
            .as_ref()
            .and_then(|entry| entry.fresh_value(self.config.snapshot_max_age(), now))
        {
            tracing::debug!(
                event_name = "agent.snapshot.reused",
                session_id = %request.session_id,
                "reusing cached system snapshot"
            );
            return (Some(cached.clone()), SnapshotUse::Reused);
        }

        let mut task = {
            let provider = Arc::clone(&self.snapshots);
            let user_id = request.user_id.clone();
            let permissions = request.permissions.clone();
            tokio::spawn(async move { provider.generate_snapshot(&user_id, &permissions).await })
        };
        let fetched = tokio::time::timeout(self.config.snapshot_timeout(), &mut task).await;
        match fetched {
            Ok(Ok(Ok(snapshot))) => {
                let entry = TimedEntry::new(snapshot.clone(), Utc::now());
                self.sessions.update(&request.session_id, |session| session.snapshot = Some(entry));
                (Some(snapshot), SnapshotUse::Fresh)
            }
            Ok(Ok(Err(error))) => {
                tracing::warn!(
                    event_name = "agent.snapshot.unavailable",
                    session_id = %request.session_id,
                    error = %error,
                    "snapshot provider failed"
                );
                (None, SnapshotUse::Unavailable)
            }
            Ok(Err(error)) => {
                tracing::error!(
                    event_name = "agent.snapshot.unavailable",
                    session_id = %request.session_id,
                    error = %error,
                    "snapshot task did not finish"
                );
                (None, SnapshotUse::Unavailable)
            }
            Err(_) => {
                task.abort();
                tracing::warn!(
                    event_name = "agent.snapshot.unavailable",
                    session_id = %request.session_id,
                    error = "timeout",
                    "snapshot provider timed out"
                );
                (None, SnapshotUse::Unavailable)
            }
        }
    }

    fn available_tools(&self, permissions: &BTreeSet<String>) -> Vec<ToolDefinition> {
        let mut tools = self.dispatcher.available_tools(permissions);
        if self.guardrails.workflows_enabled {
            tools.push(
                ToolDefinition::new(
                    RUN_WORKFLOW_TOOL,
                    "Plan and run a multi-step workflow for an objective",
                    "workflow",
                )
                .with_schema(json!({
                    "type": "object",
                    "properties": { "objective": { "type": "string" } },
                    "required": ["objective"]
                }))
                .with_guidance("Use when the request needs several dependent tool calls"),
            );
        }
        tools
    }

    async fn dispatch(
        &self,
        request: &AgentRequest,
        request_id: &str,
        decision: &DecisionResult,
        snapshot: Option<SystemSnapshot>,
        session: &ConversationContext,
    ) -> Outcome {
        match decision.action {
            DecisionAction::ExecuteTool => {}
            DecisionAction::SuggestAlternatives => {
                let mut message = decision.reasoning.clone();
                for alternative in &decision.alternatives {
                    message.push_str(&format!("\n- {}", alternative.description));
                }
                return Outcome::reply(message);
            }
            DecisionAction::AskClarification
            | DecisionAction::ProvideInfo
            | DecisionAction::EndConversation => return Outcome::reply(decision.reasoning.clone()),
        }

        let tool = decision.tool.as_deref().map(str::trim).unwrap_or_default();
        let parameters = decision.parameters.clone().unwrap_or_else(|| json!({}));
        if tool == RUN_WORKFLOW_TOOL {
            return self.run_workflow(request, request_id, &parameters).await;
        }

        let context = ExecutionContext {
            session_id: request.session_id.clone(),
            user_id: request.user_id.clone(),
            permissions: request.permissions.clone(),
            request_id: request_id.to_string(),
            tool_call_id: Uuid::new_v4().to_string(),
            snapshot,
            history: session.history(),
        };
        let result = self.dispatcher.execute(tool, parameters, &context).await;

        match &result.error {
            None if tool == THINK_TOOL => Outcome {
                message: narrate_thought(&result),
                tool_result: Some(result),
                ..Outcome::reply("")
            },
            None => Outcome {
                message: result.message.clone(),
                tool_result: Some(result),
                ..Outcome::reply("")
            },
            Some(error) => {
                let mut outcome =
                    Outcome::failed(tool_failure(error), request_id, error.recoverable);
                outcome.tool_result = Some(result);
                outcome
            }
        }
    }

    async fn run_workflow(
        &self,
        request: &AgentRequest,
        request_id: &str,
        parameters: &Value,
    ) -> Outcome {
        let objective = parameters
            .get("objective")
            .and_then(Value::as_str)
            .filter(|objective| !objective.trim().is_empty())
            .unwrap_or(&request.message);
        let context = WorkflowContext {
            user_id: request.user_id.clone(),
            session_id: request.session_id.clone(),
            permissions: request.permissions.clone(),
            variables: BTreeMap::new(),
        };

        let workflow = match self.workflows.create_workflow(objective, None, context) {
            Ok(workflow) => workflow,
            Err(error) => return Outcome::failed(AgentError::from(error), request_id, false),
        };
        let id = workflow.id.clone();
        self.sessions.update(&request.session_id, |session| {
            session.active_workflow = Some(id.clone());
        });

        let executed = self.workflows.execute(&id).await;
        let report = self.workflows.status(&id);
        self.sessions.update(&request.session_id, |session| {
            let still_running = report
                .as_ref()
                .is_ok_and(|report| !report.status.is_terminal());
            if !still_running {
                session.active_workflow = None;
            }
        });

        let (executed, report) = match (executed, report) {
            (Ok(executed), Ok(report)) => (executed, report),
            (Err(error), _) | (_, Err(error)) => {
                return Outcome::failed(AgentError::from(error), request_id, false)
            }
        };

        let completed =
            report.steps.values().filter(|status| **status == StepStatus::Completed).count();
        let summary = format!(
            "Workflow {} {}: {completed} of {} steps completed.",
            report.id,
            report.status.as_str(),
            report.total_steps
        );
        let result_data = json!({ "workflow_id": report.id, "results": executed.results });

        if report.status == WorkflowStatus::Failed {
            let suggestion = report
                .errors
                .last()
                .and_then(|error| error.recovery_suggestion.clone())
                .unwrap_or_default();
            let mut outcome =
                Outcome::failed(AgentError::Execution(summary.clone()), request_id, true);
            outcome.message = format!("{summary} {suggestion}").trim_end().to_string();
            outcome.workflow = Some(report);
            return outcome;
        }

        Outcome {
            tool_result: Some(ToolResult::success(result_data, summary.clone())),
            workflow: Some(report),
            ..Outcome::reply(summary)
        }
    }
}

fn validate(request: &AgentRequest) -> Result<(), AgentError> {
    if request.user_id.trim().is_empty() {
        return Err(AgentError::Validation("user_id is required".to_string()));
    }
    if request.session_id.trim().is_empty() {
        return Err(AgentError::Validation("session_id is required".to_string()));
    }
    if request.message.trim().is_empty() {
        return Err(AgentError::Validation("message is required".to_string()));
    }
    Ok(())
}

fn operation_for(session: &ConversationContext, objective: Objective) -> OperationType {
    if session.active_workflow.is_some() {
        OperationType::Workflow
    } else if session.last_request_failed {
        OperationType::ErrorRecovery
    } else if objective == Objective::GeneralInquiry {
        OperationType::Lightweight
    } else {
        OperationType::Complete
    }
}

fn tool_failure(error: &ToolError) -> AgentError {
    let detail = format!("{}: {}", error.code.as_str(), error.message);
    match error.code.class() {
        ErrorClass::Validation => AgentError::Validation(detail),
        ErrorClass::Permission => AgentError::Permission(detail),
        ErrorClass::NotFound => AgentError::NotFound(detail),
        ErrorClass::Execution => AgentError::Execution(detail),
        ErrorClass::Timeout => AgentError::Timeout(detail),
        ErrorClass::DecisionParse | ErrorClass::System => AgentError::System(detail),
    }
}

fn narrate_thought(result: &ToolResult) -> String {
    let data = &result.data;
    let reasoning_type = data.get("reasoning_type").and_then(Value::as_str).unwrap_or("analysis");
    let mut message = format!(
        "Thinking ({reasoning_type}): {}",
        data.get("thought").and_then(Value::as_str).unwrap_or_default()
    );
    let list = |key: &str| -> Vec<String> {
        data.get(key)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default()
    };
    let next_actions = list("next_actions");
    if !next_actions.is_empty() {
        message.push_str(&format!("\nNext: {}", next_actions.join("; ")));
    }
    let insights = list("insights");
    if !insights.is_empty() {
        message.push_str(&format!("\nNoted: {}", insights.join("; ")));
    }
    message
}

fn finish(
    outcome: Outcome,
    decision: Option<DecisionResult>,
    mut metadata: ResponseMetadata,
    started: Instant,
) -> AgentResponse {
    let mut confidence = BASE_CONFIDENCE;
    if outcome.success {
        confidence += SUCCESS_BONUS;
    }
    if outcome.tool_result.is_some() {
        confidence += TOOL_RESULT_BONUS;
    }
    metadata.confidence = confidence.min(1.0);
    metadata.processing_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    if let Some(error) = &outcome.error {
        tracing::warn!(
            event_name = "agent.request.failed",
            request_id = %metadata.request_id,
            code = %error.code,
            recoverable = error.recoverable,
            "agent request failed"
        );
    }
    tracing::info!(
        event_name = "agent.request.completed",
        request_id = %metadata.request_id,
        success = outcome.success,
        processing_time_ms = metadata.processing_time_ms,
        confidence = metadata.confidence,
        "agent request completed"
    );

    AgentResponse {
        success: outcome.success,
        message: outcome.message,
        decision,
        tool_result: outcome.tool_result,
        workflow: outcome.workflow,
        error: outcome.error,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use dealpilot_core::domain::conversation::ConversationContext;
    use dealpilot_core::domain::decision::{Objective, OperationType};
    use dealpilot_core::domain::tool::{ToolErrorCode, ToolResult};
    use dealpilot_core::domain::workflow::WorkflowId;
    use dealpilot_core::errors::ErrorClass;
    use serde_json::{json, Value};

    use super::{narrate_thought, operation_for, tool_failure, validate, AgentRequest};

    #[test]
    fn blank_fields_fail_validation() {
        assert!(validate(&AgentRequest::new("u", "s", "hello")).is_ok());
        assert!(validate(&AgentRequest::new("u", "s", "   ")).is_err());
        assert!(validate(&AgentRequest::new("", "s", "hello")).is_err());
    }

    #[test]
    fn operation_follows_session_state() {
        let mut session = ConversationContext::new("s", "u");
        assert_eq!(operation_for(&session, Objective::CreateDeal), OperationType::Complete);
        assert_eq!(operation_for(&session, Objective::GeneralInquiry), OperationType::Lightweight);

        session.metadata.insert("last_request_failed".to_string(), Value::Bool(true));
        assert_eq!(operation_for(&session, Objective::CreateDeal), OperationType::Complete);

        session.last_request_failed = true;
        assert_eq!(operation_for(&session, Objective::CreateDeal), OperationType::ErrorRecovery);

        session.active_workflow = Some(WorkflowId("wf_1".to_string()));
        assert_eq!(operation_for(&session, Objective::CreateDeal), OperationType::Workflow);
    }

    #[test]
    fn tool_errors_map_onto_the_shared_taxonomy() {
        let denied = ToolResult::failure(ToolErrorCode::InsufficientPermissions, "no");
        let error = tool_failure(denied.error.as_ref().unwrap());
        assert_eq!(error.class(), ErrorClass::Permission);

        let envelope = error.into_envelope("req");
        assert_eq!(envelope.code, "PERMISSION_DENIED");
        assert!(!envelope.message.contains("INSUFFICIENT"));
    }

    #[test]
    fn thoughts_are_narrated_rather_than_dumped() {
        let result = ToolResult::success(
            json!({
                "reasoning_type": "planning",
                "thought": "search first",
                "next_actions": ["Run a targeted search"],
                "insights": []
            }),
            "recorded",
        );
        let narrated = narrate_thought(&result);
        assert!(narrated.starts_with("Thinking (planning): search first"));
        assert!(narrated.contains("Next: Run a targeted search"));
        assert!(!narrated.contains('{'));
    }
}
