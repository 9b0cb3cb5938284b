use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::execution_engine::ExecutionEngineConfig;

pub const ENV_PREFIX: &str = "DEALPILOT_";
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["dealpilot.toml", "config/dealpilot.toml"];

const MAX_SNAPSHOT_AGE_SECS: u64 = 24 * 60 * 60;
const MAX_RETENTION_MINUTES: i64 = 365 * 24 * 60;
const MAX_RULE_AGE_SECS: i64 = 365 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub workflow: WorkflowConfig,
    pub rules: RulesConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentConfig {
    pub real_time_context: bool,
    pub snapshot_max_age_secs: u64,
    pub history_limit: usize,
    pub prompt_history_turns: usize,
    pub rate_limit_per_minute: u32,
    pub snapshot_timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowConfig {
    pub step_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub retention_minutes: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RulesConfig {
    pub max_age_secs: i64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Ollama,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Ollama => "ollama",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::Ollama => "http://localhost:11434/v1",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub real_time_context: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some(LlmProvider::Ollama.default_base_url().to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 30,
                max_retries: 2,
                temperature: 0.1,
                max_tokens: 1024,
            },
            agent: AgentConfig {
                real_time_context: true,
                snapshot_max_age_secs: 300,
                history_limit: 20,
                prompt_history_turns: 5,
                rate_limit_per_minute: 30,
                snapshot_timeout_secs: 10,
            },
            workflow: WorkflowConfig {
                step_timeout_secs: 30,
                max_retries: 3,
                retry_backoff_ms: 1000,
                retention_minutes: 60,
            },
            rules: RulesConfig { max_age_secs: 3600 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl From<&WorkflowConfig> for ExecutionEngineConfig {
    fn from(workflow: &WorkflowConfig) -> Self {
        Self {
            step_timeout: Duration::from_secs(workflow.step_timeout_secs),
            max_retries: workflow.max_retries,
            retry_backoff_base: Duration::from_millis(workflow.retry_backoff_ms),
            retention: chrono::Duration::minutes(
                workflow.retention_minutes.clamp(0, MAX_RETENTION_MINUTES),
            ),
        }
    }
}

impl AgentConfig {
    pub fn snapshot_max_age(&self) -> chrono::Duration {
        let secs = self.snapshot_max_age_secs.min(MAX_SNAPSHOT_AGE_SECS);
        chrono::Duration::seconds(i64::try_from(secs).unwrap_or_default())
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_secs(self.snapshot_timeout_secs)
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATHS[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.set_provider(provider);
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(api_key.into());
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(max_tokens) = llm.max_tokens {
                self.llm.max_tokens = max_tokens;
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(value) = agent.real_time_context {
                self.agent.real_time_context = value;
            }
            if let Some(value) = agent.snapshot_max_age_secs {
                self.agent.snapshot_max_age_secs = value;
            }
            if let Some(value) = agent.history_limit {
                self.agent.history_limit = value;
            }
            if let Some(value) = agent.prompt_history_turns {
                self.agent.prompt_history_turns = value;
            }
            if let Some(value) = agent.rate_limit_per_minute {
                self.agent.rate_limit_per_minute = value;
            }
            if let Some(value) = agent.snapshot_timeout_secs {
                self.agent.snapshot_timeout_secs = value;
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(value) = workflow.step_timeout_secs {
                self.workflow.step_timeout_secs = value;
            }
            if let Some(value) = workflow.max_retries {
                self.workflow.max_retries = value;
            }
            if let Some(value) = workflow.retry_backoff_ms {
                self.workflow.retry_backoff_ms = value;
            }
            if let Some(value) = workflow.retention_minutes {
                self.workflow.retention_minutes = value;
            }
        }

        if let Some(max_age_secs) = patch.rules.and_then(|rules| rules.max_age_secs) {
            self.rules.max_age_secs = max_age_secs;
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("DEALPILOT_LLM_PROVIDER") {
            self.set_provider(value.parse()?);
        }
        if let Some(value) = read_env("DEALPILOT_LLM_API_KEY") {
            self.llm.api_key = Some(value.into());
        }
        if let Some(value) = read_env("DEALPILOT_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("DEALPILOT_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("DEALPILOT_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_env("DEALPILOT_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("DEALPILOT_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_env("DEALPILOT_LLM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("DEALPILOT_LLM_TEMPERATURE") {
            self.llm.temperature = parse_env("DEALPILOT_LLM_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("DEALPILOT_LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_env("DEALPILOT_LLM_MAX_TOKENS", &value)?;
        }

        if let Some(value) = read_env("DEALPILOT_AGENT_REAL_TIME_CONTEXT") {
            self.agent.real_time_context = parse_env("DEALPILOT_AGENT_REAL_TIME_CONTEXT", &value)?;
        }
        if let Some(value) = read_env("DEALPILOT_AGENT_SNAPSHOT_MAX_AGE_SECS") {
            self.agent.snapshot_max_age_secs =
                parse_env("DEALPILOT_AGENT_SNAPSHOT_MAX_AGE_SECS", &value)?;
        }
        if let Some(value) = read_env("DEALPILOT_AGENT_HISTORY_LIMIT") {
            self.agent.history_limit = parse_env("DEALPILOT_AGENT_HISTORY_LIMIT", &value)?;
        }
        if let Some(value) = read_env("DEALPILOT_AGENT_RATE_LIMIT_PER_MINUTE") {
            self.agent.rate_limit_per_minute =
                parse_env("DEALPILOT_AGENT_RATE_LIMIT_PER_MINUTE", &value)?;
        }

        if let Some(value) = read_env("DEALPILOT_WORKFLOW_STEP_TIMEOUT_SECS") {
            self.workflow.step_timeout_secs =
                parse_env("DEALPILOT_WORKFLOW_STEP_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("DEALPILOT_WORKFLOW_MAX_RETRIES") {
            self.workflow.max_retries = parse_env("DEALPILOT_WORKFLOW_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("DEALPILOT_WORKFLOW_RETRY_BACKOFF_MS") {
            self.workflow.retry_backoff_ms =
                parse_env("DEALPILOT_WORKFLOW_RETRY_BACKOFF_MS", &value)?;
        }
        if let Some(value) = read_env("DEALPILOT_WORKFLOW_RETENTION_MINUTES") {
            self.workflow.retention_minutes =
                parse_env("DEALPILOT_WORKFLOW_RETENTION_MINUTES", &value)?;
        }

        if let Some(value) = read_env("DEALPILOT_RULES_MAX_AGE_SECS") {
            self.rules.max_age_secs = parse_env("DEALPILOT_RULES_MAX_AGE_SECS", &value)?;
        }

        let log_level =
            read_env("DEALPILOT_LOGGING_LEVEL").or_else(|| read_env("DEALPILOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("DEALPILOT_LOGGING_FORMAT").or_else(|| read_env("DEALPILOT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(provider) = overrides.llm_provider {
            self.set_provider(provider);
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        if let Some(base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(base_url);
        }
        if let Some(api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(api_key.into());
        }
        if let Some(real_time_context) = overrides.real_time_context {
            self.agent.real_time_context = real_time_context;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
    }

    /// Switching provider also moves a still-default base URL to the new provider's.
    fn set_provider(&mut self, provider: LlmProvider) {
        let default_url = self.llm.provider.default_base_url();
        if self.llm.base_url.as_deref() == Some(default_url) {
            self.llm.base_url = Some(provider.default_base_url().to_string());
        }
        self.llm.provider = provider;
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_agent(&self.agent)?;
        validate_workflow(&self.workflow)?;
        if self.rules.max_age_secs <= 0 || self.rules.max_age_secs > MAX_RULE_AGE_SECS {
            return Err(ConfigError::Validation(format!(
                "rules.max_age_secs must be in range 1..={MAX_RULE_AGE_SECS}"
            )));
        }
        validate_logging(&self.logging)?;
        Ok(())
    }

    pub fn execution_engine(&self) -> ExecutionEngineConfig {
        ExecutionEngineConfig::from(&self.workflow)
    }

    pub fn rule_max_age(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.rules.max_age_secs.clamp(0, MAX_RULE_AGE_SECS))
    }
}

/// First existing config file: the explicit path if given, else the default locations.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    DEFAULT_CONFIG_PATHS.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' || !matches!(chars.peek(), Some('{')) {
            output.push(ch);
            continue;
        }
        chars.next();

        let mut key = String::new();
        loop {
            match chars.next() {
                Some('}') => break,
                Some(next) => key.push(next),
                None => return Err(ConfigError::UnterminatedInterpolation),
            }
        }
        let value =
            env::var(&key).map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
        output.push_str(&value);
    }

    Ok(output)
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation(
            "llm.temperature must be in range 0.0..=1.0 (use 0.1 for deterministic decisions)"
                .to_string(),
        ));
    }
    if llm.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "llm.max_tokens must be greater than zero".to_string(),
        ));
    }
    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(format!(
                    "llm.api_key is required for the {} provider (set DEALPILOT_LLM_API_KEY)",
                    llm.provider.as_str()
                )));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    if let Some(base_url) = &llm.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "llm.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if agent.history_limit == 0 {
        return Err(ConfigError::Validation(
            "agent.history_limit must be greater than zero".to_string(),
        ));
    }
    if agent.prompt_history_turns > agent.history_limit {
        return Err(ConfigError::Validation(
            "agent.prompt_history_turns cannot exceed agent.history_limit".to_string(),
        ));
    }
    if agent.snapshot_max_age_secs > MAX_SNAPSHOT_AGE_SECS {
        return Err(ConfigError::Validation(format!(
            "agent.snapshot_max_age_secs must be at most {MAX_SNAPSHOT_AGE_SECS}"
        )));
    }
    if agent.snapshot_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "agent.snapshot_timeout_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_workflow(workflow: &WorkflowConfig) -> Result<(), ConfigError> {
    if workflow.step_timeout_secs == 0 || workflow.step_timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "workflow.step_timeout_secs must be in range 1..=600".to_string(),
        ));
    }
    if workflow.max_retries > 10 {
        return Err(ConfigError::Validation(
            "workflow.max_retries must be at most 10".to_string(),
        ));
    }
    if workflow.retention_minutes <= 0 || workflow.retention_minutes > MAX_RETENTION_MINUTES {
        return Err(ConfigError::Validation(format!(
            "workflow.retention_minutes must be in range 1..={MAX_RETENTION_MINUTES}"
        )));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    agent: Option<AgentPatch>,
    workflow: Option<WorkflowPatch>,
    rules: Option<RulesPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    real_time_context: Option<bool>,
    snapshot_max_age_secs: Option<u64>,
    history_limit: Option<usize>,
    prompt_history_turns: Option<usize>,
    rate_limit_per_minute: Option<u32>,
    snapshot_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    step_timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
    retention_minutes: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct RulesPatch {
    max_age_secs: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_match_documented_bounds() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;
        let engine = config.execution_engine();

        ensure(config.llm.provider == LlmProvider::Ollama, "ollama is the default provider")?;
        ensure((config.llm.temperature - 0.1).abs() < f32::EPSILON, "default temperature is 0.1")?;
        ensure(config.agent.history_limit == 20, "history is capped at 20 turns")?;
        ensure(config.agent.snapshot_max_age_secs == 300, "snapshots are reused for 5 minutes")?;
        ensure(engine.step_timeout == Duration::from_secs(30), "steps time out after 30s")?;
        ensure(engine.max_retries == 3, "steps retry three times")?;
        ensure(
            engine.retry_backoff_base == Duration::from_millis(1000),
            "backoff base is one second",
        )?;
        ensure(config.rule_max_age() == chrono::Duration::hours(1), "rules refresh hourly")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_DEALPILOT_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("dealpilot.toml");
            fs::write(
                &path,
                r#"
[llm]
provider = "openai"
api_key = "${TEST_DEALPILOT_KEY}"
model = "gpt-4o-mini"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            let key = config.llm.api_key.as_ref().map(|key| key.expose_secret().to_string());
            ensure(key.as_deref() == Some("sk-from-env"), "api key should come from env")?;
            ensure(
                config.llm.base_url.as_deref() == Some("https://api.openai.com/v1"),
                "switching provider should move the default base url",
            )
        })();

        clear_vars(&["TEST_DEALPILOT_KEY"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("DEALPILOT_LLM_MODEL", "model-from-env");
        env::set_var("DEALPILOT_WORKFLOW_MAX_RETRIES", "5");
        env::set_var("DEALPILOT_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("dealpilot.toml");
            fs::write(
                &path,
                r#"
[llm]
model = "model-from-file"

[workflow]
max_retries = 1
retry_backoff_ms = 250

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    log_level: Some("debug".to_string()),
                    real_time_context: Some(false),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.llm.model == "model-from-env", "env model should win over file")?;
            ensure(config.workflow.max_retries == 5, "env retries should win over file")?;
            ensure(config.workflow.retry_backoff_ms == 250, "file backoff should win over default")?;
            ensure(config.logging.level == "debug", "override log level should win")?;
            ensure(matches!(config.logging.format, LogFormat::Json), "env format alias applies")?;
            ensure(!config.agent.real_time_context, "override disables real-time context")
        })();

        clear_vars(&[
            "DEALPILOT_LLM_MODEL",
            "DEALPILOT_WORKFLOW_MAX_RETRIES",
            "DEALPILOT_LOG_FORMAT",
        ]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("DEALPILOT_LLM_PROVIDER", "anthropic");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("llm.api_key")
            );
            ensure(has_message, "validation failure should mention llm.api_key")
        })();

        clear_vars(&["DEALPILOT_LLM_PROVIDER"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("DEALPILOT_WORKFLOW_STEP_TIMEOUT_SECS", "soon");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => ensure(
                key == "DEALPILOT_WORKFLOW_STEP_TIMEOUT_SECS",
                "error should name the offending variable",
            ),
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected invalid override error".to_string()),
        };

        clear_vars(&["DEALPILOT_WORKFLOW_STEP_TIMEOUT_SECS"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("DEALPILOT_LLM_PROVIDER", "openai");
        env::set_var("DEALPILOT_LLM_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")
        })();

        clear_vars(&["DEALPILOT_LLM_PROVIDER", "DEALPILOT_LLM_API_KEY"]);
        result
    }

    #[test]
    fn oversized_durations_fail_validation_instead_of_overflowing() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("dealpilot.toml");
        fs::write(&path, "[workflow]\nretention_minutes = 1000000000000000\n")
            .map_err(|err| err.to_string())?;
        let loaded =
            AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() });
        ensure(
            matches!(
                loaded,
                Err(ConfigError::Validation(ref message)) if message.contains("retention_minutes")
            ),
            "huge retention should be rejected",
        )?;

        let mut config = AppConfig::default();
        config.rules.max_age_secs = i64::MAX;
        ensure(config.validate().is_err(), "huge rule age should be rejected")?;
        ensure(
            config.rule_max_age() == chrono::Duration::days(365),
            "rule age conversion is capped",
        )?;

        let mut config = AppConfig::default();
        config.agent.snapshot_max_age_secs = u64::MAX;
        ensure(config.validate().is_err(), "huge snapshot age should be rejected")?;
        ensure(
            config.agent.snapshot_max_age() == chrono::Duration::days(1),
            "snapshot age conversion is capped",
        )?;

        let mut config = AppConfig::default();
        config.workflow.retention_minutes = i64::MAX;
        ensure(
            config.execution_engine().retention == chrono::Duration::days(365),
            "retention conversion is capped",
        )
    }

    #[test]
    fn missing_required_file_is_reported() {
        let error = AppConfig::load(LoadOptions {
            config_path: Some("/definitely/not/here/dealpilot.toml".into()),
            require_file: true,
            ..LoadOptions::default()
        });
        assert!(matches!(error, Err(ConfigError::MissingConfigFile(_))));
    }
}
