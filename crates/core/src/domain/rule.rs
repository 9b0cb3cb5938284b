use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Retrieval order is declaration order: `Critical` sorts first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RulePriority {
    Critical,
    High,
    Medium,
    Low,
}

impl RulePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Upper-case tag used when rendering rules into prompts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        }
    }

    /// Critical and high rules are surfaced on every decision regardless of relevance.
    pub fn is_mandatory(&self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BusinessRule {
    pub id: String,
    pub category: String,
    pub priority: RulePriority,
    pub rule: String,
    pub examples: Vec<String>,
    pub source: String,
    pub last_updated: DateTime<Utc>,
}

impl BusinessRule {
    pub fn new(
        id: impl Into<String>,
        category: impl Into<String>,
        priority: RulePriority,
        rule: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            priority,
            rule: rule.into(),
            examples: Vec::new(),
            source: "seed".to_string(),
            last_updated: Utc::now(),
        }
    }

    pub fn with_example(mut self, example: impl Into<String>) -> Self {
        self.examples.push(example.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

/// One step of a canned plan. Parameters may carry `${...}` placeholders that are
/// resolved against earlier step results right before dispatch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStepTemplate {
    pub id: String,
    pub tool: String,
    pub description: String,
    pub parameters: Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl WorkflowStepTemplate {
    pub fn new(
        id: impl Into<String>,
        tool: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            id: id.into(),
            tool: tool.into(),
            description: description.into(),
            parameters,
            depends_on: Vec::new(),
        }
    }

    pub fn after(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.push(step_id.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPattern {
    pub name: String,
    pub steps: Vec<WorkflowStepTemplate>,
    pub conditions: Vec<String>,
    pub fallback_strategies: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::RulePriority;

    #[test]
    fn priority_orders_critical_first() {
        let mut priorities =
            vec![RulePriority::Low, RulePriority::Critical, RulePriority::Medium, RulePriority::High];
        priorities.sort();
        assert_eq!(
            priorities,
            vec![RulePriority::Critical, RulePriority::High, RulePriority::Medium, RulePriority::Low]
        );
    }

    #[test]
    fn critical_and_high_rules_are_mandatory() {
        assert!(RulePriority::Critical.is_mandatory());
        assert!(RulePriority::High.is_mandatory());
        assert!(!RulePriority::Medium.is_mandatory());
    }
}
