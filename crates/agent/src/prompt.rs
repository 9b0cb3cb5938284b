//! Renders a [`DecisionContext`] into provider prompt text.
//!
//! Output is a pure function of the inputs. Every operation type emits the same
//! sections in the same order; the mode only changes the emphasis lines.

use std::fmt::Write as _;

use dealpilot_core::domain::conversation::ConversationTurn;
use dealpilot_core::domain::decision::{DecisionAction, DecisionContext, OperationType};
use dealpilot_core::domain::rule::{BusinessRule, RulePriority};

pub const SECTION_HEADINGS: [&str; 9] = [
    "## Role",
    "## System state",
    "## Business rules",
    "## Available tools",
    "## Recent conversation",
    "## Examples",
    "## Operating constraints",
    "## Output format",
    "## Current request",
];

const DEFAULT_HISTORY_TURNS: usize = 5;
const MAX_TURN_CHARS: usize = 100;

#[derive(Clone, Debug)]
pub struct PromptComposer {
    history_turns: usize,
    max_turn_chars: usize,
}

impl Default for PromptComposer {
    fn default() -> Self {
        Self { history_turns: DEFAULT_HISTORY_TURNS, max_turn_chars: MAX_TURN_CHARS }
    }
}

impl PromptComposer {
    pub fn new(history_turns: usize) -> Self {
        Self { history_turns, ..Self::default() }
    }

    pub fn compose(&self, context: &DecisionContext, operation: OperationType) -> String {
        let mut prompt = String::new();

        section(&mut prompt, SECTION_HEADINGS[0], &role_lines(operation));
        section(&mut prompt, SECTION_HEADINGS[1], &state_lines(context));
        section(&mut prompt, SECTION_HEADINGS[2], &rule_lines(&context.rules, operation));
        section(&mut prompt, SECTION_HEADINGS[3], &tool_lines(context));
        section(&mut prompt, SECTION_HEADINGS[4], &self.history_lines(&context.history));
        section(&mut prompt, SECTION_HEADINGS[5], &example_lines(operation));
        section(&mut prompt, SECTION_HEADINGS[6], &constraint_lines(context));
        section(&mut prompt, SECTION_HEADINGS[7], &output_format_lines());
        section(
            &mut prompt,
            SECTION_HEADINGS[8],
            &[
                format!(
                    "Objective: {} ({})",
                    context.objective.as_str(),
                    context.objective.description()
                ),
                format!("User message: {}", context.user_message),
            ],
        );

        prompt
    }

    fn history_lines(&self, history: &[ConversationTurn]) -> Vec<String> {
        if history.is_empty() {
            return vec!["No previous messages in this session.".to_string()];
        }
        let skip = history.len().saturating_sub(self.history_turns);
        history
            .iter()
            .skip(skip)
            .map(|turn| {
                format!("{}: {}", turn.role.as_str(), truncate(&turn.content, self.max_turn_chars))
            })
            .collect()
    }
}

fn section(prompt: &mut String, heading: &str, lines: &[String]) {
    let _ = writeln!(prompt, "{heading}");
    for line in lines {
        let _ = writeln!(prompt, "{line}");
    }
    prompt.push('\n');
}

fn role_lines(operation: OperationType) -> Vec<String> {
    let mut lines = vec![
        "You are a business operations assistant for a sales pipeline.".to_string(),
        "You can search, create and update deals, organizations and people through tools, \
         and you decide the single next action for the current request."
            .to_string(),
    ];
    lines.push(
        match operation {
            OperationType::Complete => "Mode: complete. Use the full context below.",
            OperationType::Lightweight => {
                "Mode: lightweight. Answer quickly and prefer a direct response when no tool \
                 is needed."
            }
            OperationType::ErrorRecovery => {
                "Mode: error recovery. A previous step failed. Diagnose the cause from the \
                 conversation and choose a safe next action or ask the user for what is missing."
            }
            OperationType::Workflow => {
                "Mode: workflow. A multi-step workflow is in progress. Keep continuity with the \
                 completed steps and choose the action that advances it."
            }
        }
        .to_string(),
    );
    lines
}

fn state_lines(context: &DecisionContext) -> Vec<String> {
    match &context.snapshot {
        Some(snapshot) => {
            let mut lines = vec![format!("Captured at: {}", snapshot.captured_at.to_rfc3339())];
            lines.extend(snapshot.summary_lines());
            lines
        }
        None => vec!["No system snapshot is available for this request.".to_string()],
    }
}

fn rule_lines(rules: &[BusinessRule], operation: OperationType) -> Vec<String> {
    let lines = rules
        .iter()
        .filter(|rule| match operation {
            OperationType::Lightweight => rule.priority.is_mandatory(),
            _ => true,
        })
        .map(|rule| {
            let mut line = format!("[{}] ({}) {}", rule.priority.label(), rule.category, rule.rule);
            if rule.priority == RulePriority::Critical {
                line.push_str(" (must never be violated)");
            }
            if let Some(example) = rule.examples.first() {
                let _ = write!(line, " e.g. {example}");
            }
            line
        })
        .collect::<Vec<_>>();
    if lines.is_empty() {
        vec!["No business rules apply.".to_string()]
    } else {
        lines
    }
}

fn tool_lines(context: &DecisionContext) -> Vec<String> {
    if context.available_tools.is_empty() {
        return vec!["No tools are available to this user.".to_string()];
    }
    let mut tools = context.available_tools.iter().collect::<Vec<_>>();
    tools.sort_by(|left, right| {
        left.category.cmp(&right.category).then_with(|| left.name.cmp(&right.name))
    });
    tools
        .into_iter()
        .map(|tool| {
            let mut line = format!("- {} [{}]: {}", tool.name, tool.category, tool.description);
            if let Some(guidance) = &tool.usage_guidance {
                let _ = write!(line, " Usage: {guidance}");
            }
            if !tool.parameters_schema.is_null() {
                let _ = write!(line, " Parameters: {}", tool.parameters_schema);
            }
            line
        })
        .collect()
}

fn example_lines(operation: OperationType) -> Vec<String> {
    let mut lines = vec![
        r#"User: "find deals over 50000" -> {"action":"execute_tool","tool":"search_entities","parameters":{"entity_type":"deal","min_value":50000},"reasoning":"Direct search request","confidence":0.9}"#.to_string(),
        r#"User: "create a deal" -> {"action":"ask_clarification","reasoning":"Deal title and organization are missing","confidence":0.6}"#.to_string(),
    ];
    if operation == OperationType::Workflow {
        lines.push(
            r#"User: "set up a deal for Acme and find their contacts" -> {"action":"execute_tool","tool":"run_workflow","parameters":{"objective":"create a deal for Acme and find contacts"},"reasoning":"Several dependent steps","confidence":0.8}"#
                .to_string(),
        );
    }
    lines
}

fn constraint_lines(context: &DecisionContext) -> Vec<String> {
    let mut lines = vec![
        "Only use tools listed above.".to_string(),
        "Never invent record ids; search first when an id is unknown.".to_string(),
    ];
    lines.extend(context.constraints.iter().map(|constraint| format!("- {constraint}")));
    lines
}

fn output_format_lines() -> Vec<String> {
    let actions =
        DecisionAction::ALL.iter().map(|action| action.as_str()).collect::<Vec<_>>().join("|");
    vec![
        "Reply with exactly one JSON object in a ```json fenced block.".to_string(),
        format!("Required fields: \"action\" ({actions}) and \"reasoning\"."),
        "Optional fields: \"tool\", \"parameters\", \"confidence\" (0-1), \
         \"alternatives\" [{action, description, confidence}], \
         \"risks\" [{description, likelihood, impact, mitigation}]."
            .to_string(),
    ]
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut truncated = text.chars().take(keep).collect::<String>();
    truncated.push_str("...");
    truncated
}
