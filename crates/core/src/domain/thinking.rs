use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningType {
    Planning,
    Analysis,
    Decision,
    Validation,
    Synthesis,
}

impl ReasoningType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Analysis => "analysis",
            Self::Decision => "decision",
            Self::Validation => "validation",
            Self::Synthesis => "synthesis",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "planning" => Some(Self::Planning),
            "analysis" => Some(Self::Analysis),
            "decision" => Some(Self::Decision),
            "validation" => Some(Self::Validation),
            "synthesis" => Some(Self::Synthesis),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThinkingStep {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub reasoning_type: ReasoningType,
    pub thought: String,
    pub confidence: f64,
    pub focus_areas: Vec<String>,
    pub constraints: Vec<String>,
}
