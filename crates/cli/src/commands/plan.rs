use std::sync::Arc;

use dealpilot_agent::workflow::WorkflowOrchestrator;
use dealpilot_core::classify::classify_workflow;
use dealpilot_core::config::{AppConfig, LoadOptions};
use dealpilot_core::rules::RuleStore;
use serde_json::json;

use super::{demo_toolset, CommandResult, EXIT_CONFIG, EXIT_RUNTIME};

const COMMAND: &str = "plan";

/// Previews the steps a workflow for `objective` would run. Nothing is executed.
pub fn run(objective: &str) -> CommandResult {
    if objective.trim().is_empty() {
        return CommandResult::failure(COMMAND, "invalid_input", "objective must not be empty", 1);
    }
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(COMMAND, "config_validation", error.to_string(), EXIT_CONFIG)
        }
    };
    let (dispatcher, _) = match demo_toolset() {
        Ok(toolset) => toolset,
        Err(error) => {
            return CommandResult::failure(COMMAND, "tool_registry", error.to_string(), EXIT_RUNTIME)
        }
    };

    let orchestrator = WorkflowOrchestrator::new(
        dispatcher,
        Arc::new(RuleStore::seeded()),
        config.execution_engine(),
    );
    let category = classify_workflow(objective);
    let steps = orchestrator.plan(objective);
    let message = format!(
        "{} step(s) planned from the `{}` pattern",
        steps.len(),
        category.pattern_name()
    );

    CommandResult::success_with(
        COMMAND,
        message,
        Some(json!({
            "objective": objective.trim(),
            "pattern": category.pattern_name(),
            "steps": steps,
        })),
    )
}
