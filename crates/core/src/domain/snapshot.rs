use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineHealth {
    Healthy,
    AtRisk,
    Critical,
    Unknown,
}

impl PipelineHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::AtRisk => "at_risk",
            Self::Critical => "critical",
            Self::Unknown => "unknown",
        }
    }

    /// Stalled share of open deals: below 20% is healthy, below 50% at risk.
    pub fn classify(open_deals: u64, stalled_deals: u64) -> Self {
        if open_deals == 0 {
            return Self::Unknown;
        }
        let stalled_ratio = stalled_deals.min(open_deals) as f64 / open_deals as f64;
        if stalled_ratio < 0.2 {
            Self::Healthy
        } else if stalled_ratio < 0.5 {
            Self::AtRisk
        } else {
            Self::Critical
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub id: String,
    pub name: String,
    pub detail: Option<String>,
}

/// Point-in-time aggregate of business state. Produced by an external provider and
/// cached per session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub captured_at: DateTime<Utc>,
    pub entity_counts: BTreeMap<String, u64>,
    pub recent_entities: BTreeMap<String, Vec<EntitySummary>>,
    pub pipeline_health: PipelineHealth,
    pub suggestions: Vec<String>,
}

impl SystemSnapshot {
    pub fn empty(captured_at: DateTime<Utc>) -> Self {
        Self {
            captured_at,
            entity_counts: BTreeMap::new(),
            recent_entities: BTreeMap::new(),
            pipeline_health: PipelineHealth::Unknown,
            suggestions: Vec::new(),
        }
    }

    pub fn with_count(mut self, entity: impl Into<String>, count: u64) -> Self {
        self.entity_counts.insert(entity.into(), count);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if self.entity_counts.is_empty() {
            lines.push("No entity counts available.".to_string());
        } else {
            let counts = self
                .entity_counts
                .iter()
                .map(|(entity, count)| format!("{entity}: {count}"))
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!("Entity counts: {counts}"));
        }
        lines.push(format!("Pipeline health: {}", self.pipeline_health.as_str()));
        for (entity, items) in &self.recent_entities {
            if items.is_empty() {
                continue;
            }
            let names =
                items.iter().take(3).map(|item| item.name.as_str()).collect::<Vec<_>>().join(", ");
            lines.push(format!("Recent {entity}: {names}"));
        }
        for suggestion in &self.suggestions {
            lines.push(format!("Suggestion: {suggestion}"));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{PipelineHealth, SystemSnapshot};

    #[test]
    fn pipeline_health_thresholds() {
        assert_eq!(PipelineHealth::classify(0, 0), PipelineHealth::Unknown);
        assert_eq!(PipelineHealth::classify(10, 1), PipelineHealth::Healthy);
        assert_eq!(PipelineHealth::classify(10, 3), PipelineHealth::AtRisk);
        assert_eq!(PipelineHealth::classify(10, 7), PipelineHealth::Critical);
    }

    #[test]
    fn summary_lists_counts_in_stable_order() {
        let snapshot = SystemSnapshot::empty(Utc::now())
            .with_count("people", 4)
            .with_count("deals", 12)
            .with_suggestion("Follow up on stalled deals");

        let lines = snapshot.summary_lines();
        assert_eq!(lines[0], "Entity counts: deals: 12, people: 4");
        assert_eq!(lines[1], "Pipeline health: unknown");
        assert_eq!(lines[2], "Suggestion: Follow up on stalled deals");
    }
}
