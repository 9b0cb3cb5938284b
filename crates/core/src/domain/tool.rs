use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::conversation::ConversationTurn;
use crate::domain::snapshot::SystemSnapshot;
use crate::errors::ErrorClass;

/// Static description of a tool as exposed to the decision engine and the dispatcher.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub category: String,
    pub parameters_schema: Value,
    pub required_permissions: BTreeSet<String>,
    /// Free-text hint rendered into the tool catalog section of the prompt.
    pub usage_guidance: Option<String>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category: category.into(),
            parameters_schema: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
            required_permissions: BTreeSet::new(),
            usage_guidance: None,
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.parameters_schema = schema;
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.required_permissions.insert(permission.into());
        self
    }

    pub fn with_guidance(mut self, guidance: impl Into<String>) -> Self {
        self.usage_guidance = Some(guidance.into());
        self
    }

    /// A tool is usable when it requires nothing or shares at least one permission
    /// with the caller.
    pub fn is_permitted(&self, permissions: &BTreeSet<String>) -> bool {
        self.required_permissions.is_empty()
            || self.required_permissions.iter().any(|permission| permissions.contains(permission))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolErrorCode {
    UnknownTool,
    InsufficientPermissions,
    ToolExecutionFailed,
    InvalidParameters,
    NotFound,
    ToolTimeout,
}

impl ToolErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownTool => "UNKNOWN_TOOL",
            Self::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            Self::ToolExecutionFailed => "TOOL_EXECUTION_FAILED",
            Self::InvalidParameters => "INVALID_PARAMETERS",
            Self::NotFound => "NOT_FOUND",
            Self::ToolTimeout => "TOOL_TIMEOUT",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::UnknownTool | Self::InvalidParameters => ErrorClass::Validation,
            Self::InsufficientPermissions => ErrorClass::Permission,
            Self::NotFound => ErrorClass::NotFound,
            Self::ToolExecutionFailed => ErrorClass::Execution,
            Self::ToolTimeout => ErrorClass::Timeout,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolError {
    pub code: ToolErrorCode,
    pub message: String,
    pub recoverable: bool,
    pub retryable: bool,
}

impl ToolError {
    /// Recoverability and retryability follow the error class of `code`.
    pub fn new(code: ToolErrorCode, message: impl Into<String>) -> Self {
        let class = code.class();
        Self {
            code,
            message: message.into(),
            recoverable: class.recoverable(),
            retryable: class.retryable(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub execution_time_ms: u64,
    pub data_sources: Vec<String>,
    pub confidence: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub data: Value,
    pub message: String,
    pub error: Option<ToolError>,
    pub metadata: ToolMetadata,
}

impl ToolResult {
    pub fn success(data: Value, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data,
            message: message.into(),
            error: None,
            metadata: ToolMetadata::default(),
        }
    }

    pub fn failure(code: ToolErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            data: Value::Null,
            message: message.clone(),
            error: Some(ToolError::new(code, message)),
            metadata: ToolMetadata::default(),
        }
    }

    pub fn with_sources(mut self, sources: &[&str]) -> Self {
        self.metadata.data_sources = sources.iter().map(|source| (*source).to_string()).collect();
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.metadata.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    pub fn is_retryable(&self) -> bool {
        match &self.error {
            Some(error) => error.retryable,
            // A plain `success: false` without detail is treated as a transient failure.
            None => !self.success,
        }
    }
}

/// Per-call context handed to a tool. Built fresh for every invocation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub session_id: String,
    pub user_id: String,
    pub permissions: BTreeSet<String>,
    pub request_id: String,
    pub tool_call_id: String,
    pub snapshot: Option<SystemSnapshot>,
    pub history: Vec<ConversationTurn>,
}

impl ExecutionContext {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self { session_id: session_id.into(), user_id: user_id.into(), ..Self::default() }
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::{ToolDefinition, ToolErrorCode, ToolResult};

    #[test]
    fn permission_gate_allows_open_tools_and_intersections() {
        let open = ToolDefinition::new("think", "scratchpad", "reasoning");
        let gated = ToolDefinition::new("create_deal", "creates a deal", "deals")
            .with_permission("deals:write")
            .with_permission("admin");

        let none = BTreeSet::new();
        let writer: BTreeSet<String> = ["deals:write".to_string()].into_iter().collect();
        let reader: BTreeSet<String> = ["deals:read".to_string()].into_iter().collect();

        assert!(open.is_permitted(&none));
        assert!(gated.is_permitted(&writer));
        assert!(!gated.is_permitted(&reader));
        assert!(!gated.is_permitted(&none));
    }

    #[test]
    fn permission_failures_are_neither_recoverable_nor_retryable() {
        let result = ToolResult::failure(ToolErrorCode::InsufficientPermissions, "denied");
        let error = result.error.clone().expect("error attached");
        assert!(!result.success);
        assert!(!error.recoverable);
        assert!(!error.retryable);
        assert!(!result.is_retryable());
    }

    #[test]
    fn execution_failures_are_retryable() {
        let result = ToolResult::failure(ToolErrorCode::ToolExecutionFailed, "boom");
        assert!(result.is_retryable());
        assert_eq!(ToolErrorCode::ToolExecutionFailed.as_str(), "TOOL_EXECUTION_FAILED");
    }
}
