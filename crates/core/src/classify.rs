//! Keyword heuristics.
//!
//! Each classifier is a pure `&str -> enum` function so it can be tested on its own
//! and swapped for a model-backed classifier later. None of them attempt language
//! understanding; they match normalized tokens and word stems.

use serde::{Deserialize, Serialize};

use crate::domain::decision::Objective;
use crate::domain::thinking::ReasoningType;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowCategory {
    DealCreation,
    Search,
    Update,
    Analysis,
    Generic,
}

impl WorkflowCategory {
    pub const ALL: [Self; 5] =
        [Self::DealCreation, Self::Search, Self::Update, Self::Analysis, Self::Generic];

    /// Name of the workflow pattern this category expands.
    pub fn pattern_name(&self) -> &'static str {
        match self {
            Self::DealCreation => "deal_creation",
            Self::Search => "search",
            Self::Update => "update",
            Self::Analysis => "analysis",
            Self::Generic => "generic",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoverySuggestion {
    CheckPermissions,
    VerifyIdentifiers,
    RetryLater,
    FixParameters,
    CheckConnectivity,
    ManualReview,
}

impl RecoverySuggestion {
    pub fn message(&self) -> &'static str {
        match self {
            Self::CheckPermissions => "Check that the user has the permissions this step requires.",
            Self::VerifyIdentifiers => {
                "Verify the referenced record exists or search for it first."
            }
            Self::RetryLater => "The step timed out; retry once the upstream service recovers.",
            Self::FixParameters => "Review the step parameters for missing or invalid values.",
            Self::CheckConnectivity => "Check connectivity to the upstream service.",
            Self::ManualReview => "Review the error details and adjust the plan manually.",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThoughtSynthesis {
    pub reasoning_type: ReasoningType,
    pub next_actions: Vec<String>,
    pub insights: Vec<String>,
}

const CREATE_WORDS: &[&str] = &["create", "add", "new", "open", "register", "start"];
const UPDATE_WORDS: &[&str] =
    &["update", "change", "edit", "modify", "set", "move", "rename", "mark", "assign"];
const SEARCH_WORDS: &[&str] =
    &["find", "search", "show", "list", "lookup", "get", "which", "who", "where", "display"];
const ANALYSIS_STEMS: &[&str] =
    &["analy", "report", "forecast", "trend", "summar", "health", "insight", "performance"];
const ENTITY_STEMS: &[&str] =
    &["deal", "opportunit", "organization", "company", "person", "people", "contact"];

pub fn classify_objective(message: &str) -> Objective {
    let tokens = tokenize(message);

    if has_any_word(&tokens, CREATE_WORDS) && has_any_stem(&tokens, ENTITY_STEMS) {
        return Objective::CreateDeal;
    }
    if has_any_word(&tokens, UPDATE_WORDS) {
        return Objective::UpdateEntity;
    }
    if has_any_word(&tokens, SEARCH_WORDS) || message.to_ascii_lowercase().contains("look up") {
        return Objective::SearchEntities;
    }
    Objective::GeneralInquiry
}

pub fn classify_workflow(objective: &str) -> WorkflowCategory {
    let tokens = tokenize(objective);

    if has_any_word(&tokens, CREATE_WORDS) && has_any_stem(&tokens, &["deal", "opportunit"]) {
        return WorkflowCategory::DealCreation;
    }
    if has_any_stem(&tokens, ANALYSIS_STEMS) {
        return WorkflowCategory::Analysis;
    }
    if has_any_word(&tokens, UPDATE_WORDS) {
        return WorkflowCategory::Update;
    }
    if has_any_word(&tokens, SEARCH_WORDS) {
        return WorkflowCategory::Search;
    }
    WorkflowCategory::Generic
}

pub fn suggest_recovery(error: &str) -> RecoverySuggestion {
    let normalized = error.to_ascii_lowercase();
    let contains_any = |needles: &[&str]| needles.iter().any(|needle| normalized.contains(needle));

    if contains_any(&["permission", "forbidden", "unauthorized", "denied"]) {
        RecoverySuggestion::CheckPermissions
    } else if contains_any(&["not found", "unknown", "missing record", "does not exist"]) {
        RecoverySuggestion::VerifyIdentifiers
    } else if contains_any(&["timeout", "timed out"]) {
        RecoverySuggestion::RetryLater
    } else if contains_any(&["invalid", "validation", "required", "placeholder", "parameter"]) {
        RecoverySuggestion::FixParameters
    } else if contains_any(&["network", "connection", "unreachable", "dns"]) {
        RecoverySuggestion::CheckConnectivity
    } else {
        RecoverySuggestion::ManualReview
    }
}

pub fn infer_reasoning_type(thought: &str) -> ReasoningType {
    let tokens = tokenize(thought);

    if has_any_stem(&tokens, &["plan", "step", "sequence", "first"]) {
        ReasoningType::Planning
    } else if has_any_stem(&tokens, &["verif", "check", "validat", "confirm"]) {
        ReasoningType::Validation
    } else if has_any_stem(&tokens, &["decid", "choose", "should", "option"]) {
        ReasoningType::Decision
    } else if has_any_stem(&tokens, &["summar", "combin", "overall", "conclu"]) {
        ReasoningType::Synthesis
    } else {
        ReasoningType::Analysis
    }
}

/// Template next-actions and insights keyed off words in the thought.
pub fn synthesize_thought(
    thought: &str,
    reasoning_type: Option<ReasoningType>,
) -> ThoughtSynthesis {
    let tokens = tokenize(thought);
    let mut next_actions = Vec::new();
    let mut insights = Vec::new();

    if has_any_word(&tokens, SEARCH_WORDS) {
        next_actions.push("Run a targeted search with the identified criteria".to_string());
    }
    if has_any_word(&tokens, CREATE_WORDS) {
        next_actions.push("Validate required fields before creating the record".to_string());
    }
    if has_any_word(&tokens, UPDATE_WORDS) {
        next_actions.push("Confirm the target record before applying changes".to_string());
    }
    if has_any_stem(&tokens, &["organization", "company", "account"]) {
        next_actions.push("Resolve the organization before linking related records".to_string());
    }
    if has_any_stem(&tokens, &["deal", "pipeline", "opportunit"]) {
        insights.push("The request concerns the deal pipeline".to_string());
    }
    if has_any_stem(&tokens, &["risk", "concern", "blocker", "stall"]) {
        insights.push("Potential risks identified; consider mitigation before acting".to_string());
    }
    if has_any_stem(&tokens, &["permission", "access"]) {
        insights.push("Permission constraints may limit the available actions".to_string());
    }
    if thought.contains('$') || has_any_stem(&tokens, &["amount", "value", "worth", "price"]) {
        insights.push("A monetary value is involved; validate currency and amount".to_string());
    }
    if next_actions.is_empty() {
        next_actions.push("Gather more context before choosing an action".to_string());
    }

    ThoughtSynthesis {
        reasoning_type: reasoning_type.unwrap_or_else(|| infer_reasoning_type(thought)),
        next_actions,
        insights,
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_ascii_lowercase()
        .split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

fn has_any_word(tokens: &[String], words: &[&str]) -> bool {
    tokens.iter().any(|token| words.contains(&token.as_str()))
}

fn has_any_stem(tokens: &[String], stems: &[&str]) -> bool {
    tokens.iter().any(|token| stems.iter().any(|stem| token.starts_with(stem)))
}

#[cfg(test)]
mod tests {
    use super::{
        classify_objective, classify_workflow, infer_reasoning_type, suggest_recovery,
        synthesize_thought, RecoverySuggestion, WorkflowCategory,
    };
    use crate::domain::decision::Objective;
    use crate::domain::thinking::ReasoningType;

    #[test]
    fn objective_classification() {
        assert_eq!(classify_objective("create a deal for Acme worth $5000"), Objective::CreateDeal);
        assert_eq!(classify_objective("Find deals over 50000"), Objective::SearchEntities);
        assert_eq!(classify_objective("please look up Jane"), Objective::SearchEntities);
        assert_eq!(classify_objective("update the Acme deal stage"), Objective::UpdateEntity);
        assert_eq!(classify_objective("how is our quarter going?"), Objective::GeneralInquiry);
    }

    #[test]
    fn objective_words_match_whole_tokens_only() {
        // "asset" must not trigger the "set" update keyword.
        assert_eq!(classify_objective("tell me about asset classes"), Objective::GeneralInquiry);
    }

    #[test]
    fn workflow_classification() {
        assert_eq!(classify_workflow("find deals over 50000"), WorkflowCategory::Search);
        assert_eq!(classify_workflow("Create a new deal for Acme"), WorkflowCategory::DealCreation);
        assert_eq!(classify_workflow("update the Globex deal value"), WorkflowCategory::Update);
        assert_eq!(classify_workflow("analyze pipeline health"), WorkflowCategory::Analysis);
        assert_eq!(classify_workflow("hello there"), WorkflowCategory::Generic);
    }

    #[test]
    fn recovery_suggestions_follow_error_text() {
        assert_eq!(
            suggest_recovery("INSUFFICIENT_PERMISSIONS: permission denied"),
            RecoverySuggestion::CheckPermissions
        );
        assert_eq!(suggest_recovery("step timed out after 30s"), RecoverySuggestion::RetryLater);
        assert_eq!(
            suggest_recovery("unresolved placeholder ${lookup.id}"),
            RecoverySuggestion::FixParameters
        );
        assert_eq!(suggest_recovery("connection reset"), RecoverySuggestion::CheckConnectivity);
        assert_eq!(suggest_recovery("something odd"), RecoverySuggestion::ManualReview);
    }

    #[test]
    fn thought_synthesis_uses_keywords() {
        let synthesis = synthesize_thought(
            "First find the organization, then create the deal worth $5000",
            None,
        );

        assert_eq!(synthesis.reasoning_type, ReasoningType::Planning);
        assert!(synthesis.next_actions.iter().any(|action| action.contains("targeted search")));
        assert!(synthesis
            .next_actions
            .iter()
            .any(|action| action.contains("Resolve the organization")));
        assert!(synthesis.insights.iter().any(|insight| insight.contains("monetary value")));
    }

    #[test]
    fn thought_synthesis_has_default_action() {
        let synthesis = synthesize_thought("hmm", Some(ReasoningType::Decision));
        assert_eq!(synthesis.reasoning_type, ReasoningType::Decision);
        assert_eq!(synthesis.next_actions.len(), 1);
        assert!(synthesis.insights.is_empty());
        assert_eq!(infer_reasoning_type("let me verify the amount"), ReasoningType::Validation);
    }
}
