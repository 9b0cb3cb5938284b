use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use dealpilot_core::classify::synthesize_thought;
use dealpilot_core::domain::thinking::{ReasoningType, ThinkingStep};
use dealpilot_core::domain::tool::{ExecutionContext, ToolDefinition, ToolErrorCode, ToolResult};
use serde_json::{json, Value};

use super::{string_param, Tool};

pub const THINK_TOOL: &str = "think";

const DEFAULT_THOUGHT_CONFIDENCE: f64 = 0.8;

/// Append-only record of reasoning steps, shared by every `think` invocation.
#[derive(Debug, Default)]
pub struct ThinkingJournal {
    steps: Mutex<Vec<ThinkingStep>>,
}

impl ThinkingJournal {
    pub fn append(&self, step: ThinkingStep) {
        match self.steps.lock() {
            Ok(mut steps) => steps.push(step),
            Err(poisoned) => poisoned.into_inner().push(step),
        }
    }

    /// The last `count` steps, oldest first.
    pub fn recent(&self, count: usize) -> Vec<ThinkingStep> {
        let steps = match self.steps.lock() {
            Ok(steps) => steps,
            Err(poisoned) => poisoned.into_inner(),
        };
        let skip = steps.len().saturating_sub(count);
        steps.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        match self.steps.lock() {
            Ok(steps) => steps.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Structured scratchpad. Records the thought and returns template next actions
/// and insights derived from its wording.
#[derive(Clone, Debug, Default)]
pub struct ThinkTool {
    journal: Arc<ThinkingJournal>,
}

impl ThinkTool {
    pub fn new(journal: Arc<ThinkingJournal>) -> Self {
        Self { journal }
    }

    pub fn journal(&self) -> Arc<ThinkingJournal> {
        Arc::clone(&self.journal)
    }
}

#[async_trait]
impl Tool for ThinkTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(
            THINK_TOOL,
            "Record a structured reasoning step before acting",
            "reasoning",
        )
        .with_schema(json!({
            "type": "object",
            "properties": {
                "thought": { "type": "string" },
                "reasoning_type": {
                    "type": "string",
                    "enum": ["planning", "analysis", "decision", "validation", "synthesis"]
                },
                "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
                "focus_areas": { "type": "array", "items": { "type": "string" } },
                "constraints": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["thought"]
        }))
        .with_guidance("Use to plan multi-step work or to reason about ambiguous requests")
    }

    async fn execute(
        &self,
        params: Value,
        _context: &ExecutionContext,
    ) -> anyhow::Result<ToolResult> {
        let Some(thought) = string_param(&params, "thought") else {
            return Ok(ToolResult::failure(
                ToolErrorCode::InvalidParameters,
                "thought must be a non-empty string",
            ));
        };

        let requested_type = string_param(&params, "reasoning_type").and_then(ReasoningType::parse);
        let synthesis = synthesize_thought(thought, requested_type);
        let confidence = params
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_THOUGHT_CONFIDENCE)
            .clamp(0.0, 1.0);

        let step = ThinkingStep {
            id: format!("thought_{}", uuid::Uuid::new_v4()),
            timestamp: Utc::now(),
            reasoning_type: synthesis.reasoning_type,
            thought: thought.to_string(),
            confidence,
            focus_areas: string_list(&params, "focus_areas"),
            constraints: string_list(&params, "constraints"),
        };
        let data = json!({
            "step_id": step.id,
            "reasoning_type": step.reasoning_type.as_str(),
            "thought": step.thought,
            "next_actions": synthesis.next_actions,
            "insights": synthesis.insights,
            "confidence": confidence,
        });
        let message = format!(
            "{} step recorded; next: {}",
            step.reasoning_type.as_str(),
            synthesis.next_actions.first().map(String::as_str).unwrap_or("none")
        );

        self.journal.append(step);
        Ok(ToolResult::success(data, message).with_confidence(confidence))
    }
}

fn string_list(params: &Value, key: &str) -> Vec<String> {
    params
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use dealpilot_core::domain::thinking::ReasoningType;
    use dealpilot_core::domain::tool::{ExecutionContext, ToolErrorCode};
    use serde_json::json;

    use super::{ThinkTool, ThinkingJournal};
    use crate::tools::Tool;

    #[tokio::test]
    async fn empty_thought_fails_without_touching_the_journal() {
        let journal = Arc::new(ThinkingJournal::default());
        let tool = ThinkTool::new(Arc::clone(&journal));

        for params in [json!({}), json!({ "thought": "   " }), json!({ "thought": 7 })] {
            let result = tool.execute(params, &ExecutionContext::default()).await.unwrap();
            assert!(!result.success);
            assert_eq!(result.error.map(|error| error.code), Some(ToolErrorCode::InvalidParameters));
        }
        assert!(journal.is_empty());
    }

    #[tokio::test]
    async fn thought_is_journaled_with_synthesis() {
        let journal = Arc::new(ThinkingJournal::default());
        let tool = ThinkTool::new(Arc::clone(&journal));

        let result = tool
            .execute(
                json!({
                    "thought": "find the organization first, then create the deal worth $5000",
                    "focus_areas": ["organization"],
                    "confidence": 3.0
                }),
                &ExecutionContext::default(),
            )
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.data["reasoning_type"], "planning");
        assert!(!result.data["next_actions"].as_array().unwrap().is_empty());
        assert!(result.data["insights"]
            .as_array()
            .unwrap()
            .iter()
            .any(|insight| insight.as_str().unwrap_or_default().contains("monetary")));
        assert_eq!(result.metadata.confidence, Some(1.0));

        let recent = journal.recent(5);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].focus_areas, vec!["organization"]);
        assert_eq!(recent[0].reasoning_type, ReasoningType::Planning);
    }

    #[tokio::test]
    async fn explicit_reasoning_type_wins_and_recent_keeps_the_tail() {
        let journal = Arc::new(ThinkingJournal::default());
        let tool = ThinkTool::new(Arc::clone(&journal));
        for index in 0..4 {
            tool.execute(
                json!({ "thought": format!("note {index}"), "reasoning_type": "synthesis" }),
                &ExecutionContext::default(),
            )
            .await
            .unwrap();
        }

        let recent = journal.recent(2);
        assert_eq!(journal.len(), 4);
        assert_eq!(recent[0].thought, "note 2");
        assert_eq!(recent[1].reasoning_type, ReasoningType::Synthesis);
    }
}
