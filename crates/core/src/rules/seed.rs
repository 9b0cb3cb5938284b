use serde_json::json;

use crate::domain::rule::{BusinessRule, RulePriority, WorkflowPattern, WorkflowStepTemplate};

pub fn default_rules() -> Vec<BusinessRule> {
    vec![
        BusinessRule::new(
            "perm-001",
            "permissions",
            RulePriority::Critical,
            "Never execute a tool the user lacks permission for; explain the restriction instead",
        ),
        BusinessRule::new(
            "perm-002",
            "permissions",
            RulePriority::Critical,
            "Do not reveal records belonging to other users unless the user holds read:all",
        ),
        BusinessRule::new(
            "dq-001",
            "data_quality",
            RulePriority::High,
            "Search for an existing organization before creating a deal or contact for it",
        )
        .with_example("Before creating a deal for Acme, search organizations for 'Acme'"),
        BusinessRule::new(
            "dq-002",
            "data_quality",
            RulePriority::Medium,
            "Deal values must be positive and carry a currency",
        )
        .with_example("'worth $5000' means value 5000 in USD"),
        BusinessRule::new(
            "deal-001",
            "deal_management",
            RulePriority::High,
            "Ask for clarification when a deal title or organization is ambiguous",
        ),
        BusinessRule::new(
            "deal-002",
            "deal_management",
            RulePriority::Medium,
            "New deals start in the first pipeline stage unless a stage is given",
        ),
        BusinessRule::new(
            "search-001",
            "search",
            RulePriority::Medium,
            "Prefer narrow filters and cap search results at 20 records",
        ),
        BusinessRule::new(
            "comm-001",
            "communication",
            RulePriority::Low,
            "Keep answers short and list records as bullet points",
        ),
        BusinessRule::new(
            "wf-001",
            "workflow",
            RulePriority::Medium,
            "Use run_workflow when a request needs more than one dependent tool call",
        ),
    ]
}

pub fn default_workflow_patterns() -> Vec<WorkflowPattern> {
    vec![
        WorkflowPattern {
            name: "deal_creation".to_string(),
            steps: vec![
                think_step("Plan the deal: organization, title, value and stage"),
                WorkflowStepTemplate::new(
                    "find_organization",
                    "search_entities",
                    "Look for an existing organization",
                    json!({ "query": "${objective}", "entity_type": "organization" }),
                )
                .after("think"),
                WorkflowStepTemplate::new(
                    "create_deal",
                    "create_deal",
                    "Create the deal linked to the organization",
                    json!({
                        "description": "${objective}",
                        "organization": "${find_organization}"
                    }),
                )
                .after("think")
                .after("find_organization"),
            ],
            conditions: vec!["objective creates a deal or opportunity".to_string()],
            fallback_strategies: vec![
                "Ask for the organization name when the search finds nothing".to_string(),
            ],
        },
        WorkflowPattern {
            name: "search".to_string(),
            steps: vec![
                think_step("Decide which filters the search needs"),
                WorkflowStepTemplate::new(
                    "search",
                    "search_entities",
                    "Search matching records",
                    json!({ "query": "${objective}" }),
                )
                .after("think"),
            ],
            conditions: vec!["objective asks to find or list records".to_string()],
            fallback_strategies: vec!["Broaden the filters when nothing matches".to_string()],
        },
        WorkflowPattern {
            name: "update".to_string(),
            steps: vec![
                think_step("Identify the record and the fields to change"),
                WorkflowStepTemplate::new(
                    "find_target",
                    "search_entities",
                    "Locate the record to update",
                    json!({ "query": "${objective}" }),
                )
                .after("think"),
                WorkflowStepTemplate::new(
                    "apply_update",
                    "update_entity",
                    "Apply the requested change",
                    json!({ "target": "${find_target}", "change": "${objective}" }),
                )
                .after("find_target"),
            ],
            conditions: vec!["objective modifies an existing record".to_string()],
            fallback_strategies: vec![
                "Ask the user to pick a record when several match".to_string(),
            ],
        },
        WorkflowPattern {
            name: "analysis".to_string(),
            steps: vec![
                think_step("Decide which pipeline figures answer the question"),
                WorkflowStepTemplate::new(
                    "analyze",
                    "analyze_pipeline",
                    "Collect pipeline figures",
                    json!({ "focus": "${objective}" }),
                )
                .after("think"),
                WorkflowStepTemplate::new(
                    "synthesize",
                    "think",
                    "Summarize the findings",
                    json!({
                        "thought": "Summarize the pipeline analysis: ${analyze.summary}",
                        "reasoning_type": "synthesis"
                    }),
                )
                .after("analyze"),
            ],
            conditions: vec!["objective asks for analysis, trends or reports".to_string()],
            fallback_strategies: vec!["Report raw entity counts from the snapshot".to_string()],
        },
        WorkflowPattern {
            name: "generic".to_string(),
            steps: vec![
                think_step("Work out what the user needs"),
                WorkflowStepTemplate::new(
                    "lookup",
                    "search_entities",
                    "Gather related records",
                    json!({ "query": "${objective}" }),
                )
                .after("think"),
            ],
            conditions: Vec::new(),
            fallback_strategies: vec!["Ask a clarifying question".to_string()],
        },
    ]
}

fn think_step(focus: &str) -> WorkflowStepTemplate {
    WorkflowStepTemplate::new(
        "think",
        "think",
        focus,
        json!({
            "thought": format!("{focus}. Objective: ${{objective}}"),
            "reasoning_type": "planning"
        }),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{default_rules, default_workflow_patterns};

    #[test]
    fn seeded_rule_ids_are_unique() {
        let rules = default_rules();
        let ids = rules.iter().map(|rule| rule.id.as_str()).collect::<BTreeSet<_>>();
        assert_eq!(ids.len(), rules.len());
    }

    #[test]
    fn pattern_dependencies_point_backwards() {
        for pattern in default_workflow_patterns() {
            let mut seen = BTreeSet::new();
            for step in &pattern.steps {
                for dependency in &step.depends_on {
                    assert!(
                        seen.contains(dependency.as_str()),
                        "{}: {} depends on later step {}",
                        pattern.name,
                        step.id,
                        dependency
                    );
                }
                assert!(seen.insert(step.id.as_str()), "duplicate step id {}", step.id);
            }
        }
    }
}
