use dealpilot_agent::llm::HttpLlmClient;
use dealpilot_core::classify::WorkflowCategory;
use dealpilot_core::config::{AppConfig, LoadOptions};
use dealpilot_core::rules::RuleStore;
use serde::Serialize;

use super::demo_toolset;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_provider(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(DoctorCheck {
                name: "provider_readiness",
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            });
        }
    }
    checks.push(check_rule_catalogue());
    checks.push(check_tool_registry());

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_provider(config: &AppConfig) -> DoctorCheck {
    match HttpLlmClient::from_config(&config.llm) {
        Ok(client) => DoctorCheck {
            name: "provider_readiness",
            status: CheckStatus::Pass,
            details: format!(
                "{} client ready for model `{}` at {}",
                client.provider().as_str(),
                config.llm.model,
                config.llm.base_url.as_deref().unwrap_or(config.llm.provider.default_base_url())
            ),
        },
        Err(error) => DoctorCheck {
            name: "provider_readiness",
            status: CheckStatus::Fail,
            details: format!("{error:#}"),
        },
    }
}

fn check_rule_catalogue() -> DoctorCheck {
    let rules = RuleStore::seeded();
    let patterns = rules.list_workflow_patterns();
    let missing: Vec<&str> = WorkflowCategory::ALL
        .iter()
        .map(WorkflowCategory::pattern_name)
        .filter(|name| !patterns.iter().any(|pattern| pattern.as_str() == *name))
        .collect();

    if missing.is_empty() && rules.rule_count() > 0 {
        DoctorCheck {
            name: "rule_catalogue",
            status: CheckStatus::Pass,
            details: format!(
                "{} rules across {} categories, {} workflow patterns",
                rules.rule_count(),
                rules.list_categories().len(),
                patterns.len()
            ),
        }
    } else {
        DoctorCheck {
            name: "rule_catalogue",
            status: CheckStatus::Fail,
            details: format!("missing workflow patterns: {}", missing.join(", ")),
        }
    }
}

fn check_tool_registry() -> DoctorCheck {
    match demo_toolset() {
        Ok((dispatcher, _)) => {
            let categories = dispatcher.tools_by_category();
            let listing = categories
                .iter()
                .map(|(category, tools)| format!("{category}: {}", tools.join(", ")))
                .collect::<Vec<_>>()
                .join("; ");
            DoctorCheck {
                name: "tool_registry",
                status: CheckStatus::Pass,
                details: format!("{} tools registered ({listing})", dispatcher.len()),
            }
        }
        Err(error) => DoctorCheck {
            name: "tool_registry",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
