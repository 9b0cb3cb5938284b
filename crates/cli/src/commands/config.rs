use std::env;
use std::fs;
use std::path::Path;

use dealpilot_core::config::{resolve_config_path, AppConfig, LoadOptions, ENV_PREFIX};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_key(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());
    let fields = [
        ("llm.provider", config.llm.provider.as_str().to_string()),
        ("llm.model", config.llm.model.clone()),
        ("llm.base_url", config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string())),
        ("llm.api_key", api_key),
        ("llm.timeout_secs", config.llm.timeout_secs.to_string()),
        ("llm.max_retries", config.llm.max_retries.to_string()),
        ("llm.temperature", config.llm.temperature.to_string()),
        ("llm.max_tokens", config.llm.max_tokens.to_string()),
        ("agent.real_time_context", config.agent.real_time_context.to_string()),
        ("agent.snapshot_max_age_secs", config.agent.snapshot_max_age_secs.to_string()),
        ("agent.history_limit", config.agent.history_limit.to_string()),
        ("agent.prompt_history_turns", config.agent.prompt_history_turns.to_string()),
        ("agent.rate_limit_per_minute", config.agent.rate_limit_per_minute.to_string()),
        ("agent.snapshot_timeout_secs", config.agent.snapshot_timeout_secs.to_string()),
        ("workflow.step_timeout_secs", config.workflow.step_timeout_secs.to_string()),
        ("workflow.max_retries", config.workflow.max_retries.to_string()),
        ("workflow.retry_backoff_ms", config.workflow.retry_backoff_ms.to_string()),
        ("workflow.retention_minutes", config.workflow.retention_minutes.to_string()),
        ("rules.max_age_secs", config.rules.max_age_secs.to_string()),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", format!("{:?}", config.logging.format).to_ascii_lowercase()),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, value) in &fields {
        let source = field_source(key_path, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key_path, value, source));
    }
    lines.join("\n")
}

/// `llm.api_key` -> `DEALPILOT_LLM_API_KEY`.
pub fn env_key(key_path: &str) -> String {
    format!("{ENV_PREFIX}{}", key_path.replace('.', "_").to_ascii_uppercase())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    let env_key = env_key(key_path);
    if env::var_os(&env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_key(key: &str) -> String {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use super::{contains_path, env_key, redact_key};

    #[test]
    fn env_keys_follow_the_prefix_convention() {
        assert_eq!(env_key("llm.api_key"), "DEALPILOT_LLM_API_KEY");
        assert_eq!(env_key("agent.real_time_context"), "DEALPILOT_AGENT_REAL_TIME_CONTEXT");
    }

    #[test]
    fn keys_are_never_printed_in_full() {
        assert_eq!(redact_key("sk-live-abc123"), "sk-***");
        assert_eq!(redact_key("plainsecret"), "<redacted>");
        assert_eq!(redact_key("  "), "<empty>");
    }

    #[test]
    fn nested_paths_are_found_in_toml() {
        let doc: toml::Value = "[llm]\nmodel = \"gpt\"\n".parse().unwrap();
        assert!(contains_path(&doc, "llm.model"));
        assert!(!contains_path(&doc, "llm.api_key"));
    }
}
