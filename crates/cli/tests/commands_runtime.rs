use std::env;
use std::fs;
use std::sync::{Arc, Mutex, OnceLock};

use dealpilot_agent::llm::StaticLlmClient;
use dealpilot_cli::commands::ask::{run_with_client, AskOptions};
use dealpilot_cli::commands::{config, doctor, plan};
use dealpilot_core::config::AppConfig;
use serde_json::Value;

#[test]
fn plan_returns_steps_for_a_deal_objective() {
    with_env(&[], || {
        let result = plan::run("create a deal for Acme worth $5000");
        assert_eq!(result.exit_code, 0, "expected successful plan preview");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "plan");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["data"]["pattern"], "deal_creation");

        let steps = payload["data"]["steps"].as_array().cloned().unwrap_or_default();
        assert!(steps.len() >= 2);
        assert!(steps.iter().any(|step| step["tool"] == "create_deal"));
    });
}

#[test]
fn plan_rejects_blank_objectives() {
    with_env(&[], || {
        let result = plan::run("   ");
        assert_eq!(result.exit_code, 1);
        assert_eq!(parse_payload(&result.output)["error_class"], "invalid_input");
    });
}

#[test]
fn plan_returns_config_failure_for_hosted_provider_without_key() {
    with_env(&[("DEALPILOT_LLM_PROVIDER", "openai")], || {
        let result = plan::run("find deals over 50000");
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "plan");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn config_attributes_sources_and_redacts_keys() {
    with_env(
        &[
            ("DEALPILOT_LLM_PROVIDER", "openai"),
            ("DEALPILOT_LLM_API_KEY", "sk-live-very-secret"),
            ("DEALPILOT_LLM_MODEL", "gpt-4o-mini"),
        ],
        || {
            let output = config::run();
            assert!(output.contains("- llm.model = gpt-4o-mini (source: env (DEALPILOT_LLM_MODEL))"));
            assert!(output.contains("- llm.api_key = sk-*** (source: env (DEALPILOT_LLM_API_KEY))"));
            assert!(output.contains("- workflow.max_retries = 3 (source: default)"));
            assert!(!output.contains("very-secret"));
        },
    );
}

#[test]
fn config_reports_file_sources() {
    with_env(&[], || {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("dealpilot.toml"), "[workflow]\nmax_retries = 5\n")
            .expect("write config");
        let previous = env::current_dir().expect("cwd");
        env::set_current_dir(dir.path()).expect("enter tempdir");

        let output = config::run();

        env::set_current_dir(previous).expect("restore cwd");
        assert!(output.contains("- workflow.max_retries = 5 (source: file (dealpilot.toml))"));
    });
}

#[test]
fn doctor_json_reports_all_checks() {
    with_env(&[], || {
        let payload = parse_payload(&doctor::run(true));
        assert_eq!(payload["overall_status"], "pass");

        let names: Vec<&str> = payload["checks"]
            .as_array()
            .map(|checks| checks.iter().filter_map(|check| check["name"].as_str()).collect())
            .unwrap_or_default();
        assert_eq!(
            names,
            ["config_validation", "provider_readiness", "rule_catalogue", "tool_registry"]
        );
    });
}

#[test]
fn doctor_skips_provider_check_when_config_is_invalid() {
    with_env(&[("DEALPILOT_LLM_TEMPERATURE", "3.5")], || {
        let payload = parse_payload(&doctor::run(true));
        assert_eq!(payload["overall_status"], "fail");
        assert_eq!(payload["checks"][0]["status"], "fail");
        assert_eq!(payload["checks"][1]["status"], "skipped");
    });
}

#[test]
fn ask_runs_a_tool_through_the_agent() {
    let llm = Arc::new(StaticLlmClient::new(
        r#"{"action":"execute_tool","tool":"search_entities",
            "parameters":{"query":"globex"},"reasoning":"look it up"}"#,
    ));
    let result = run_with_client(&AppConfig::default(), llm, &AskOptions::new("find globex"));
    assert_eq!(result.exit_code, 0, "{}", result.output);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["command"], "ask");
    assert_eq!(payload["data"]["tool_result"]["data"]["count"], 2);
    assert_eq!(payload["data"]["metadata"]["snapshot"], "fresh");
}

#[test]
fn ask_reports_permission_failures_with_a_stable_code() {
    let llm = Arc::new(StaticLlmClient::new(
        r#"{"action":"execute_tool","tool":"create_deal",
            "parameters":{"title":"Blocked"},"reasoning":"create"}"#,
    ));
    let mut options = AskOptions::new("create a deal called Blocked");
    options.permissions = vec!["records:read".to_string()];

    let result = run_with_client(&AppConfig::default(), llm, &options);
    assert_eq!(result.exit_code, 4);

    let payload = parse_payload(&result.output);
    assert_eq!(payload["status"], "error");
    assert_eq!(payload["error_class"], "permission_denied");
    assert_eq!(payload["data"]["error"]["recoverable"], false);
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = match ENV_LOCK.get_or_init(|| Mutex::new(())).lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    let keys = [
        "DEALPILOT_LLM_PROVIDER",
        "DEALPILOT_LLM_API_KEY",
        "DEALPILOT_LLM_BASE_URL",
        "DEALPILOT_LLM_MODEL",
        "DEALPILOT_LLM_TIMEOUT_SECS",
        "DEALPILOT_LLM_MAX_RETRIES",
        "DEALPILOT_LLM_TEMPERATURE",
        "DEALPILOT_LLM_MAX_TOKENS",
        "DEALPILOT_AGENT_REAL_TIME_CONTEXT",
        "DEALPILOT_AGENT_SNAPSHOT_MAX_AGE_SECS",
        "DEALPILOT_AGENT_HISTORY_LIMIT",
        "DEALPILOT_AGENT_RATE_LIMIT_PER_MINUTE",
        "DEALPILOT_WORKFLOW_STEP_TIMEOUT_SECS",
        "DEALPILOT_WORKFLOW_MAX_RETRIES",
        "DEALPILOT_WORKFLOW_RETRY_BACKOFF_MS",
        "DEALPILOT_WORKFLOW_RETENTION_MINUTES",
        "DEALPILOT_RULES_MAX_AGE_SECS",
        "DEALPILOT_LOGGING_LEVEL",
        "DEALPILOT_LOGGING_FORMAT",
        "DEALPILOT_LOG_LEVEL",
        "DEALPILOT_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
