use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::conversation::ConversationTurn;
use crate::domain::rule::BusinessRule;
use crate::domain::snapshot::SystemSnapshot;
use crate::domain::tool::ToolDefinition;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    ExecuteTool,
    AskClarification,
    ProvideInfo,
    SuggestAlternatives,
    EndConversation,
}

impl DecisionAction {
    pub const ALL: [Self; 5] = [
        Self::ExecuteTool,
        Self::AskClarification,
        Self::ProvideInfo,
        Self::SuggestAlternatives,
        Self::EndConversation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExecuteTool => "execute_tool",
            Self::AskClarification => "ask_clarification",
            Self::ProvideInfo => "provide_info",
            Self::SuggestAlternatives => "suggest_alternatives",
            Self::EndConversation => "end_conversation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "execute_tool" => Some(Self::ExecuteTool),
            "ask_clarification" => Some(Self::AskClarification),
            "provide_info" => Some(Self::ProvideInfo),
            "suggest_alternatives" => Some(Self::SuggestAlternatives),
            "end_conversation" => Some(Self::EndConversation),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alternative {
    pub action: String,
    pub description: String,
    pub confidence: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Risk {
    pub description: String,
    pub likelihood: f64,
    pub impact: f64,
    pub mitigation: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionResult {
    pub action: DecisionAction,
    pub tool: Option<String>,
    pub parameters: Option<Value>,
    pub reasoning: String,
    pub confidence: f64,
    pub alternatives: Vec<Alternative>,
    pub risks: Vec<Risk>,
}

impl DecisionResult {
    pub fn clarification(reasoning: impl Into<String>, confidence: f64) -> Self {
        Self {
            action: DecisionAction::AskClarification,
            tool: None,
            parameters: None,
            reasoning: reasoning.into(),
            confidence: confidence.clamp(0.0, 1.0),
            alternatives: Vec::new(),
            risks: Vec::new(),
        }
    }
}

/// Coarse intent of a raw user message, used to pick rules and constraints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    CreateDeal,
    SearchEntities,
    UpdateEntity,
    GeneralInquiry,
}

impl Objective {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateDeal => "create_deal",
            Self::SearchEntities => "search_entities",
            Self::UpdateEntity => "update_entity",
            Self::GeneralInquiry => "general_inquiry",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::CreateDeal => "Create a new deal from the user's request",
            Self::SearchEntities => "Find deals, organizations, or people matching the request",
            Self::UpdateEntity => "Update an existing business record",
            Self::GeneralInquiry => "Answer a general question about the business pipeline",
        }
    }
}

/// Prompt emphasis. Every mode renders the same ordered sections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Complete,
    Lightweight,
    ErrorRecovery,
    Workflow,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Lightweight => "lightweight",
            Self::ErrorRecovery => "error_recovery",
            Self::Workflow => "workflow",
        }
    }
}

/// Everything the decision engine sees for one request. Built per request and
/// discarded afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionContext {
    pub objective: Objective,
    pub user_message: String,
    pub available_tools: Vec<ToolDefinition>,
    pub snapshot: Option<SystemSnapshot>,
    pub history: Vec<ConversationTurn>,
    pub rules: Vec<BusinessRule>,
    pub constraints: Vec<String>,
}
