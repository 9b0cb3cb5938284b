use std::collections::BTreeSet;
use std::sync::Arc;

use dealpilot_agent::llm::{HttpLlmClient, LlmClient};
use dealpilot_agent::snapshot::RecordSnapshotProvider;
use dealpilot_agent::tools::records::{READ_PERMISSION, WRITE_PERMISSION};
use dealpilot_agent::{AgentOrchestrator, AgentParts, AgentRequest, AgentResponse};
use dealpilot_core::config::{AppConfig, LoadOptions};
use dealpilot_core::rules::RuleStore;

use super::{demo_toolset, CommandResult, EXIT_CONFIG, EXIT_REQUEST_FAILED, EXIT_RUNTIME};

const COMMAND: &str = "ask";

#[derive(Clone, Debug)]
pub struct AskOptions {
    pub message: String,
    pub user_id: String,
    pub session_id: String,
    pub permissions: Vec<String>,
}

impl AskOptions {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            user_id: "operator".to_string(),
            session_id: "cli".to_string(),
            permissions: Vec::new(),
        }
    }

    /// Explicit permissions, or read and write on the demo records.
    fn effective_permissions(&self) -> BTreeSet<String> {
        if self.permissions.is_empty() {
            [READ_PERMISSION, WRITE_PERMISSION].into_iter().map(str::to_string).collect()
        } else {
            self.permissions.iter().cloned().collect()
        }
    }
}

/// Sends one request through the agent against the configured provider.
pub fn run(options: &AskOptions) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(COMMAND, "config_validation", error.to_string(), EXIT_CONFIG)
        }
    };
    let llm: Arc<dyn LlmClient> = match HttpLlmClient::from_config(&config.llm) {
        Ok(client) => Arc::new(client),
        Err(error) => {
            return CommandResult::failure(COMMAND, "provider", format!("{error:#}"), EXIT_RUNTIME)
        }
    };
    run_with_client(&config, llm, options)
}

pub fn run_with_client(
    config: &AppConfig,
    llm: Arc<dyn LlmClient>,
    options: &AskOptions,
) -> CommandResult {
    let (dispatcher, book) = match demo_toolset() {
        Ok(toolset) => toolset,
        Err(error) => {
            return CommandResult::failure(COMMAND, "tool_registry", error.to_string(), EXIT_RUNTIME)
        }
    };
    let agent = AgentOrchestrator::from_config(
        config,
        AgentParts {
            llm,
            snapshots: Arc::new(RecordSnapshotProvider::new(book)),
            dispatcher,
            rules: Arc::new(RuleStore::seeded()),
        },
    );

    let mut request =
        AgentRequest::new(&options.user_id, &options.session_id, options.message.clone());
    request.permissions = options.effective_permissions();

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "runtime",
                format!("failed to initialize async runtime: {error}"),
                EXIT_RUNTIME,
            )
        }
    };
    let response = runtime.block_on(agent.handle(request));
    render(response)
}

fn render(response: AgentResponse) -> CommandResult {
    let data = serde_json::to_value(&response).ok();
    if response.success {
        return CommandResult::success_with(COMMAND, response.message, data);
    }
    let error_class = response
        .error
        .as_ref()
        .map(|error| error.code.to_ascii_lowercase())
        .unwrap_or_else(|| "request_failed".to_string());
    CommandResult::failure_with(COMMAND, &error_class, response.message, EXIT_REQUEST_FAILED, data)
}
