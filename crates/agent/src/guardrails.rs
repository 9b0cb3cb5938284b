use std::collections::BTreeSet;

use dealpilot_core::domain::decision::{DecisionAction, DecisionResult, Objective};

use crate::tools::records::WRITE_PERMISSION;
use crate::workflow::RUN_WORKFLOW_TOOL;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String },
    Degrade { reason_code: &'static str, user_message: String, fallback_path: &'static str },
}

/// Operating constraints for the decision context and the last check applied to a
/// decision before anything is dispatched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub workflows_enabled: bool,
    pub write_permission: String,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { workflows_enabled: true, write_permission: WRITE_PERMISSION.to_string() }
    }
}

impl GuardrailPolicy {
    pub fn constraints(&self, objective: Objective, permissions: &BTreeSet<String>) -> Vec<String> {
        let mut constraints = match objective {
            Objective::CreateDeal => vec![
                "Resolve the organization before creating the deal.".to_string(),
                "Ask for the deal title when the request does not name one.".to_string(),
            ],
            Objective::SearchEntities => {
                vec!["Search with the narrowest filters the request supports.".to_string()]
            }
            Objective::UpdateEntity => vec![
                "Identify the exact record before changing it.".to_string(),
                "Only change the fields the user asked to change.".to_string(),
            ],
            Objective::GeneralInquiry => {
                vec!["Answer directly when no record lookup is needed.".to_string()]
            }
        };
        if !permissions.contains(&self.write_permission) {
            constraints.push(
                "The user has read-only access; do not propose create or update actions."
                    .to_string(),
            );
        }
        if !self.workflows_enabled {
            constraints.push(format!("Multi-step workflows are disabled; never use {RUN_WORKFLOW_TOOL}."));
        }
        constraints
    }

    pub fn evaluate(&self, decision: &DecisionResult) -> GuardrailDecision {
        if decision.action != DecisionAction::ExecuteTool {
            return GuardrailDecision::Allow;
        }
        match decision.tool.as_deref().map(str::trim) {
            None | Some("") => GuardrailDecision::Deny {
                reason_code: "missing_tool_name",
                user_message: "The planned action did not name a tool, so nothing was executed."
                    .to_string(),
            },
            Some(RUN_WORKFLOW_TOOL) if !self.workflows_enabled => GuardrailDecision::Degrade {
                reason_code: "workflows_disabled",
                user_message: "Multi-step workflows are turned off. Could you ask for one step at \
                               a time?"
                    .to_string(),
                fallback_path: "single_step",
            },
            Some(_) => GuardrailDecision::Allow,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use dealpilot_core::domain::decision::{DecisionAction, DecisionResult, Objective};

    use super::{GuardrailDecision, GuardrailPolicy};

    fn tool_decision(tool: Option<&str>) -> DecisionResult {
        DecisionResult {
            action: DecisionAction::ExecuteTool,
            tool: tool.map(str::to_string),
            ..DecisionResult::clarification("run it", 0.9)
        }
    }

    #[test]
    fn read_only_users_get_an_extra_constraint() {
        let policy = GuardrailPolicy::default();
        let writer: BTreeSet<String> = ["records:write".to_string()].into_iter().collect();

        let for_writer = policy.constraints(Objective::CreateDeal, &writer);
        let for_reader = policy.constraints(Objective::CreateDeal, &BTreeSet::new());
        assert_eq!(for_reader.len(), for_writer.len() + 1);
        assert!(for_reader.iter().any(|constraint| constraint.contains("read-only")));
    }

    #[test]
    fn tool_decision_without_a_name_is_denied() {
        let policy = GuardrailPolicy::default();
        assert!(matches!(
            policy.evaluate(&tool_decision(None)),
            GuardrailDecision::Deny { reason_code: "missing_tool_name", .. }
        ));
        assert_eq!(policy.evaluate(&tool_decision(Some("search_entities"))), GuardrailDecision::Allow);
        assert_eq!(policy.evaluate(&DecisionResult::clarification("?", 0.3)), GuardrailDecision::Allow);
    }

    #[test]
    fn disabled_workflows_degrade_run_workflow() {
        let policy = GuardrailPolicy { workflows_enabled: false, ..GuardrailPolicy::default() };
        let decision = policy.evaluate(&tool_decision(Some("run_workflow")));

        let (reason_code, fallback_path) = match decision {
            GuardrailDecision::Degrade { reason_code, fallback_path, .. } => {
                (reason_code, fallback_path)
            }
            _ => ("", ""),
        };
        assert_eq!(reason_code, "workflows_disabled");
        assert_eq!(fallback_path, "single_step");
        assert!(policy
            .constraints(Objective::GeneralInquiry, &BTreeSet::new())
            .iter()
            .any(|constraint| constraint.contains("run_workflow")));
    }
}
