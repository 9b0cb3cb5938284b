//! Turns a decision context into a typed [`DecisionResult`] via one provider call.
//!
//! The engine never returns an error. Provider failures, timeouts and unusable
//! output all collapse into a low-confidence `ask_clarification` decision.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use dealpilot_core::domain::decision::{
    Alternative, DecisionAction, DecisionContext, DecisionResult, OperationType, Risk,
};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::llm::{CompletionOptions, LlmClient};
use crate::prompt::PromptComposer;

pub const FALLBACK_CONFIDENCE: f64 = 0.3;
const DEFAULT_CONFIDENCE: f64 = 0.5;
const RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecisionParseError {
    #[error("response did not contain a JSON object")]
    NoJson,
    #[error("response JSON was malformed: {0}")]
    InvalidJson(String),
    #[error("response JSON was not an object")]
    NotAnObject,
    #[error("decision is missing required field `{0}`")]
    MissingField(&'static str),
}

fn fenced_json_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").expect("valid fenced json regex")
    })
}

/// The JSON object text inside `raw`: a fenced block if present, otherwise the span
/// from the first `{` to the last `}`.
pub fn extract_json(raw: &str) -> Option<&str> {
    if let Some(body) = fenced_json_pattern().captures(raw).and_then(|captures| captures.get(1)) {
        return Some(body.as_str());
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

pub fn parse_decision(raw: &str) -> Result<DecisionResult, DecisionParseError> {
    let json = extract_json(raw).ok_or(DecisionParseError::NoJson)?;
    let value: Value = serde_json::from_str(json)
        .map_err(|error| DecisionParseError::InvalidJson(error.to_string()))?;
    let object = value.as_object().ok_or(DecisionParseError::NotAnObject)?;

    let action_text = object
        .get("action")
        .and_then(Value::as_str)
        .ok_or(DecisionParseError::MissingField("action"))?;
    let reasoning = object
        .get("reasoning")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|reasoning| !reasoning.is_empty())
        .ok_or(DecisionParseError::MissingField("reasoning"))?;

    let action = DecisionAction::parse(action_text).unwrap_or_else(|| {
        tracing::warn!(
            event_name = "decision.action.coerced",
            action = action_text,
            "unknown decision action coerced to ask_clarification"
        );
        DecisionAction::AskClarification
    });

    Ok(DecisionResult {
        action,
        tool: object
            .get("tool")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|tool| !tool.is_empty())
            .map(str::to_string),
        parameters: object.get("parameters").filter(|parameters| !parameters.is_null()).cloned(),
        reasoning: reasoning.to_string(),
        confidence: unit_field(object, "confidence").unwrap_or(DEFAULT_CONFIDENCE),
        alternatives: list_field(object, "alternatives").filter_map(parse_alternative).collect(),
        risks: list_field(object, "risks").filter_map(parse_risk).collect(),
    })
}

fn unit_field(object: &Map<String, Value>, key: &str) -> Option<f64> {
    object.get(key).and_then(Value::as_f64).filter(|value| value.is_finite()).map(clamp_unit)
}

fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

fn list_field<'a>(
    object: &'a Map<String, Value>,
    key: &str,
) -> impl Iterator<Item = &'a Map<String, Value>> {
    object
        .get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

fn parse_alternative(object: &Map<String, Value>) -> Option<Alternative> {
    let description = object.get("description").and_then(Value::as_str)?;
    Some(Alternative {
        action: object.get("action").and_then(Value::as_str).unwrap_or("provide_info").to_string(),
        description: description.to_string(),
        confidence: unit_field(object, "confidence").unwrap_or(DEFAULT_CONFIDENCE),
    })
}

fn parse_risk(object: &Map<String, Value>) -> Option<Risk> {
    let description = object.get("description").and_then(Value::as_str)?;
    Some(Risk {
        description: description.to_string(),
        likelihood: unit_field(object, "likelihood").unwrap_or(DEFAULT_CONFIDENCE),
        impact: unit_field(object, "impact").unwrap_or(DEFAULT_CONFIDENCE),
        mitigation: object.get("mitigation").and_then(Value::as_str).map(str::to_string),
    })
}

pub fn fallback_decision(error: impl std::fmt::Display) -> DecisionResult {
    DecisionResult::clarification(
        format!(
            "I could not determine a reliable next step ({error}). \
             Could you clarify what you would like me to do?"
        ),
        FALLBACK_CONFIDENCE,
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub requests_in_window: usize,
    pub limit: u32,
}

/// Per-user request counter over a rolling 60 second window. Advisory only: it
/// reports whether a user is over the limit but never blocks a call.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    requests: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit_per_minute: u32) -> Self {
        Self { limit: limit_per_minute, requests: Mutex::default() }
    }

    pub fn check(&self, user_id: &str) -> RateLimitStatus {
        self.check_at(user_id, Instant::now())
    }

    pub fn check_at(&self, user_id: &str, now: Instant) -> RateLimitStatus {
        let mut requests = match self.requests.lock() {
            Ok(requests) => requests,
            Err(poisoned) => poisoned.into_inner(),
        };
        let window = requests.entry(user_id.to_string()).or_default();
        while window.front().is_some_and(|seen| now.duration_since(*seen) >= RATE_WINDOW) {
            window.pop_front();
        }
        window.push_back(now);

        let requests_in_window = window.len();
        RateLimitStatus {
            allowed: requests_in_window <= self.limit as usize,
            requests_in_window,
            limit: self.limit,
        }
    }
}

pub struct DecisionEngine {
    client: Arc<dyn LlmClient>,
    composer: PromptComposer,
    options: CompletionOptions,
    rate_limiter: RateLimiter,
}

impl DecisionEngine {
    pub fn new(
        client: Arc<dyn LlmClient>,
        composer: PromptComposer,
        options: CompletionOptions,
        rate_limit_per_minute: u32,
    ) -> Self {
        Self { client, composer, options, rate_limiter: RateLimiter::new(rate_limit_per_minute) }
    }

    pub fn composer(&self) -> &PromptComposer {
        &self.composer
    }

    pub async fn decide(
        &self,
        user_id: &str,
        context: &DecisionContext,
        operation: OperationType,
    ) -> DecisionResult {
        let rate = self.rate_limiter.check(user_id);
        if !rate.allowed {
            tracing::warn!(
                event_name = "decision.rate_limit.exceeded",
                user_id,
                requests_in_window = rate.requests_in_window,
                limit = rate.limit,
                "user is over the advisory decision rate limit"
            );
        }

        let prompt = self.composer.compose(context, operation);
        let completion =
            tokio::time::timeout(self.options.timeout, self.client.complete(&prompt, &self.options))
                .await;

        let raw = match completion {
            Ok(Ok(raw)) => raw,
            Ok(Err(error)) => return self.fallback("provider_error", error),
            Err(_) => {
                return self.fallback(
                    "provider_timeout",
                    format!("provider did not answer within {:?}", self.options.timeout),
                )
            }
        };

        match parse_decision(&raw) {
            Ok(decision) => {
                tracing::debug!(
                    event_name = "decision.parsed",
                    action = decision.action.as_str(),
                    tool = decision.tool.as_deref().unwrap_or("none"),
                    confidence = decision.confidence,
                    "decision parsed"
                );
                decision
            }
            Err(error) => self.fallback("parse_error", error),
        }
    }

    fn fallback(&self, reason: &'static str, error: impl std::fmt::Display) -> DecisionResult {
        tracing::warn!(
            event_name = "decision.fallback",
            reason,
            error = %error,
            "falling back to a clarification decision"
        );
        fallback_decision(error)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use dealpilot_core::domain::decision::{
        DecisionAction, DecisionContext, Objective, OperationType,
    };

    use super::{extract_json, parse_decision, DecisionEngine, DecisionParseError, RateLimiter};
    use crate::llm::{CompletionOptions, ScriptedLlmClient};
    use crate::prompt::PromptComposer;

    fn context() -> DecisionContext {
        DecisionContext {
            objective: Objective::SearchEntities,
            user_message: "find deals over 50000".to_string(),
            available_tools: Vec::new(),
            snapshot: None,
            history: Vec::new(),
            rules: Vec::new(),
            constraints: Vec::new(),
        }
    }

    fn engine(responses: Vec<Result<String, String>>) -> DecisionEngine {
        DecisionEngine::new(
            Arc::new(ScriptedLlmClient::new(responses)),
            PromptComposer::default(),
            CompletionOptions::default(),
            30,
        )
    }

    #[test]
    fn fenced_block_is_preferred_over_bare_braces() {
        let raw = "Thinking {not json}\n```json\n{\"action\":\"provide_info\"}\n```\ntrailing }";
        assert_eq!(extract_json(raw), Some("{\"action\":\"provide_info\"}"));
        assert_eq!(extract_json("answer: {\"a\": {\"b\": 1}} done"), Some("{\"a\": {\"b\": 1}}"));
        assert_eq!(extract_json("no braces here"), None);
    }

    #[test]
    fn parse_clamps_scores_and_defaults_lists() {
        let decision = parse_decision(
            r#"{"action":"execute_tool","tool":"search_entities","parameters":{"q":"deals"},
               "reasoning":"search","confidence":1.7,
               "risks":[{"description":"too broad","likelihood":-2,"impact":3}]}"#,
        )
        .unwrap();

        assert_eq!(decision.action, DecisionAction::ExecuteTool);
        assert_eq!(decision.tool.as_deref(), Some("search_entities"));
        assert_eq!(decision.confidence, 1.0);
        assert!(decision.alternatives.is_empty());
        assert_eq!(decision.risks[0].likelihood, 0.0);
        assert_eq!(decision.risks[0].impact, 1.0);
    }

    #[test]
    fn parse_coerces_unknown_action_and_requires_reasoning() {
        let decision = parse_decision(r#"{"action":"dance","reasoning":"why not"}"#).unwrap();
        assert_eq!(decision.action, DecisionAction::AskClarification);

        assert_eq!(
            parse_decision(r#"{"action":"provide_info"}"#),
            Err(DecisionParseError::MissingField("reasoning"))
        );
        assert_eq!(
            parse_decision(r#"{"reasoning":"no action"}"#),
            Err(DecisionParseError::MissingField("action"))
        );
    }

    #[tokio::test]
    async fn malformed_output_falls_back_to_clarification() {
        let engine = engine(vec![Ok("Sure! I will search for those deals.".to_string())]);
        let decision = engine.decide("u1", &context(), OperationType::Complete).await;

        assert_eq!(decision.action, DecisionAction::AskClarification);
        assert!(decision.confidence <= 0.5);
        assert!(decision.reasoning.contains("JSON"));
    }

    #[tokio::test]
    async fn provider_failure_falls_back_to_clarification() {
        let engine = engine(vec![Err("connection refused".to_string())]);
        let decision = engine.decide("u1", &context(), OperationType::Complete).await;

        assert_eq!(decision.action, DecisionAction::AskClarification);
        assert_eq!(decision.confidence, 0.3);
        assert!(decision.reasoning.contains("connection refused"));
    }

    #[test]
    fn rate_limiter_is_advisory_and_rolls_over() {
        let limiter = RateLimiter::new(2);
        let start = Instant::now();

        assert!(limiter.check_at("u1", start).allowed);
        assert!(limiter.check_at("u1", start).allowed);
        let third = limiter.check_at("u1", start + Duration::from_secs(1));
        assert!(!third.allowed);
        assert_eq!(third.requests_in_window, 3);
        assert!(limiter.check_at("u2", start).allowed);

        let later = limiter.check_at("u1", start + Duration::from_secs(61));
        assert!(later.allowed);
        assert_eq!(later.requests_in_window, 1);
    }
}
