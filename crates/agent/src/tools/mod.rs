//! Permission-gated tool registry.
//!
//! Tools register through their [`ToolDefinition`] and are looked up by unique name.
//! [`ToolDispatcher::execute`] never fails: unknown tools, permission mismatches,
//! tool errors and tool panics all come back as a failed [`ToolResult`] with a
//! stable error code, and every result carries its execution time.

pub mod records;
pub mod think;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dealpilot_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use dealpilot_core::domain::tool::{ExecutionContext, ToolDefinition, ToolErrorCode, ToolResult};
use dealpilot_core::store::{InMemoryStore, KeyValueStore};
use serde_json::Value;
use thiserror::Error;

pub use records::{register_record_tools, RecordBook};
pub use think::{ThinkTool, ThinkingJournal, THINK_TOOL};

#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn execute(&self, params: Value, context: &ExecutionContext)
        -> anyhow::Result<ToolResult>;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a tool named `{0}` is already registered")]
    DuplicateTool(String),
    #[error("tool name must not be empty")]
    EmptyName,
}

pub struct ToolDispatcher {
    registry: Arc<dyn KeyValueStore<String, Arc<dyn Tool>>>,
    audit: Arc<dyn AuditSink>,
}

impl Default for ToolDispatcher {
    fn default() -> Self {
        Self::new(Arc::new(InMemoryStore::new()), Arc::new(TracingAuditSink))
    }
}

impl ToolDispatcher {
    /// In-memory dispatcher with the built-in `think` tool registered.
    pub fn with_builtin_tools(journal: Arc<ThinkingJournal>) -> Self {
        let dispatcher = Self::default();
        // A fresh registry cannot already hold `think`.
        let _ = dispatcher.register(ThinkTool::new(journal));
        dispatcher
    }

    pub fn new(
        registry: Arc<dyn KeyValueStore<String, Arc<dyn Tool>>>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { registry, audit }
    }

    pub fn register<T>(&self, tool: T) -> Result<(), RegistryError>
    where
        T: Tool + 'static,
    {
        self.register_shared(Arc::new(tool))
    }

    pub fn register_shared(&self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.definition().name;
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        let mut inserted = false;
        let mut pending = Some(tool);
        self.registry.modify(name.clone(), &mut |current| match current {
            Some(existing) => Some(existing),
            None => {
                inserted = true;
                pending.take()
            }
        });
        if inserted {
            Ok(())
        } else {
            Err(RegistryError::DuplicateTool(name))
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.registry.delete(&name.to_string()).is_some()
    }

    pub fn definition(&self, name: &str) -> Option<ToolDefinition> {
        self.registry.get(&name.to_string()).map(|tool| tool.definition())
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Tools whose permission set is empty or intersects `permissions`, by name.
    pub fn available_tools(&self, permissions: &BTreeSet<String>) -> Vec<ToolDefinition> {
        let mut tools = self
            .registry
            .values()
            .into_iter()
            .map(|tool| tool.definition())
            .filter(|definition| definition.is_permitted(permissions))
            .collect::<Vec<_>>();
        tools.sort_by(|left, right| left.name.cmp(&right.name));
        tools
    }

    pub fn tools_by_category(&self) -> BTreeMap<String, Vec<String>> {
        let mut categories: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for tool in self.registry.values() {
            let definition = tool.definition();
            categories.entry(definition.category).or_default().push(definition.name);
        }
        for names in categories.values_mut() {
            names.sort();
        }
        categories
    }

    pub async fn execute(
        &self,
        name: &str,
        params: Value,
        context: &ExecutionContext,
    ) -> ToolResult {
        let started = Instant::now();
        let mut result = self.dispatch(name, params, context).await;
        result.metadata.execution_time_ms =
            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let outcome = match &result.error {
            None => AuditOutcome::Success,
            Some(error) if error.code == ToolErrorCode::InsufficientPermissions => {
                AuditOutcome::Rejected
            }
            Some(_) => AuditOutcome::Failed,
        };
        self.audit.emit(
            AuditEvent::new(
                Some(context.session_id.clone()),
                None,
                context.request_id.clone(),
                "tool.executed",
                AuditCategory::Tool,
                context.user_id.clone(),
                outcome,
            )
            .with_metadata("tool", name)
            .with_metadata("tool_call_id", context.tool_call_id.clone())
            .with_metadata("execution_time_ms", result.metadata.execution_time_ms.to_string())
            .with_metadata(
                "error_code",
                result.error.as_ref().map(|error| error.code.as_str()).unwrap_or("none"),
            ),
        );
        result
    }

    async fn dispatch(&self, name: &str, params: Value, context: &ExecutionContext) -> ToolResult {
        let Some(tool) = self.registry.get(&name.to_string()) else {
            return ToolResult::failure(
                ToolErrorCode::UnknownTool,
                format!("tool `{name}` is not registered"),
            );
        };

        let definition = tool.definition();
        if !definition.is_permitted(&context.permissions) {
            let required =
                definition.required_permissions.iter().cloned().collect::<Vec<_>>().join(", ");
            return ToolResult::failure(
                ToolErrorCode::InsufficientPermissions,
                format!("tool `{name}` requires one of: {required}"),
            );
        }

        let owned_context = context.clone();
        let handle = tokio::spawn(async move { tool.execute(params, &owned_context).await });
        match handle.await {
            Ok(Ok(result)) => result,
            Ok(Err(error)) => {
                tracing::warn!(
                    event_name = "tool.execution.failed",
                    tool = name,
                    request_id = %context.request_id,
                    error = %error,
                    "tool returned an error"
                );
                ToolResult::failure(ToolErrorCode::ToolExecutionFailed, error.to_string())
            }
            Err(join_error) => {
                tracing::error!(
                    event_name = "tool.execution.aborted",
                    tool = name,
                    request_id = %context.request_id,
                    panicked = join_error.is_panic(),
                    "tool task did not complete"
                );
                ToolResult::failure(
                    ToolErrorCode::ToolExecutionFailed,
                    format!("tool `{name}` terminated unexpectedly"),
                )
            }
        }
    }
}

/// String parameter helper shared by the built-in tools.
pub(crate) fn string_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str).map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use dealpilot_core::audit::{AuditOutcome, InMemoryAuditSink};
    use dealpilot_core::domain::tool::{
        ExecutionContext, ToolDefinition, ToolErrorCode, ToolResult,
    };
    use dealpilot_core::store::InMemoryStore;
    use serde_json::{json, Value};

    use super::{RegistryError, Tool, ToolDispatcher};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("echo", "Echo parameters back", "utility")
        }

        async fn execute(
            &self,
            params: Value,
            _context: &ExecutionContext,
        ) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::success(params, "echoed"))
        }
    }

    struct AdminTool;

    #[async_trait]
    impl Tool for AdminTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new("purge", "Delete everything", "admin").with_permission("admin")
        }

        async fn execute(
            &self,
            _params: Value,
            _context: &ExecutionContext,
        ) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::success(Value::Null, "purged"))
        }
    }

    struct BrokenTool {
        panic: bool,
    }

    #[async_trait]
    impl Tool for BrokenTool {
        fn definition(&self) -> ToolDefinition {
            let name = if self.panic { "panics" } else { "errors" };
            ToolDefinition::new(name, "Always fails", "utility")
        }

        async fn execute(
            &self,
            _params: Value,
            _context: &ExecutionContext,
        ) -> anyhow::Result<ToolResult> {
            if self.panic {
                panic!("boom");
            }
            Err(anyhow::anyhow!("upstream returned 503"))
        }
    }

    fn dispatcher() -> (ToolDispatcher, InMemoryAuditSink) {
        let sink = InMemoryAuditSink::default();
        let dispatcher = ToolDispatcher::new(Arc::new(InMemoryStore::new()), Arc::new(sink.clone()));
        dispatcher.register(EchoTool).unwrap();
        dispatcher.register(AdminTool).unwrap();
        dispatcher.register(BrokenTool { panic: false }).unwrap();
        dispatcher.register(BrokenTool { panic: true }).unwrap();
        (dispatcher, sink)
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let (dispatcher, _) = dispatcher();
        assert_eq!(
            dispatcher.register(EchoTool),
            Err(RegistryError::DuplicateTool("echo".to_string()))
        );
        assert!(dispatcher.unregister("echo"));
        assert!(dispatcher.register(EchoTool).is_ok());
    }

    #[test]
    fn availability_follows_permission_intersection() {
        let (dispatcher, _) = dispatcher();
        let context = ExecutionContext::new("s", "u");
        let names = dispatcher
            .available_tools(&context.permissions)
            .into_iter()
            .map(|tool| tool.name)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["echo", "errors", "panics"]);

        let admin = ExecutionContext::new("s", "u").with_permissions(["admin", "read"]);
        assert_eq!(dispatcher.available_tools(&admin.permissions).len(), 4);

        let categories = dispatcher.tools_by_category();
        assert_eq!(categories["utility"], vec!["echo", "errors", "panics"]);
        assert_eq!(dispatcher.definition("purge").map(|tool| tool.category).as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_recoverable() {
        let (dispatcher, _) = dispatcher();
        let result = dispatcher.execute("nope", json!({}), &ExecutionContext::new("s", "u")).await;

        let error = result.error.expect("error present");
        assert!(!result.success);
        assert_eq!(error.code, ToolErrorCode::UnknownTool);
        assert!(!error.recoverable);
    }

    #[tokio::test]
    async fn disjoint_permissions_fail_without_running_the_tool() {
        let (dispatcher, sink) = dispatcher();
        let context = ExecutionContext::new("s", "u").with_permissions(["read"]);
        let result = dispatcher.execute("purge", json!({}), &context).await;

        let error = result.error.clone().expect("error present");
        assert_eq!(error.code, ToolErrorCode::InsufficientPermissions);
        assert!(!error.recoverable);
        assert!(!error.retryable);
        assert!(!result.is_retryable());
        assert_eq!(sink.events()[0].outcome, AuditOutcome::Rejected);
    }

    #[tokio::test]
    async fn tool_errors_and_panics_become_retryable_failures() {
        let (dispatcher, _) = dispatcher();
        let context = ExecutionContext::new("s", "u");

        for name in ["errors", "panics"] {
            let result = dispatcher.execute(name, json!({}), &context).await;
            let error = result.error.expect("error present");
            assert_eq!(error.code, ToolErrorCode::ToolExecutionFailed, "{name}");
            assert!(error.recoverable && error.retryable, "{name}");
        }
    }

    #[tokio::test]
    async fn successful_results_are_stamped_and_audited() {
        let (dispatcher, sink) = dispatcher();
        let mut context = ExecutionContext::new("session-1", "user-1");
        context.request_id = "req-9".to_string();

        let result = dispatcher.execute("echo", json!({ "x": 1 }), &context).await;
        assert!(result.success);
        assert_eq!(result.data, json!({ "x": 1 }));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "req-9");
        assert_eq!(events[0].metadata.get("tool").map(String::as_str), Some("echo"));
        assert!(events[0].metadata.contains_key("execution_time_ms"));
    }
}
