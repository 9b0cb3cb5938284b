pub mod commands;

use clap::{Parser, Subcommand};
use dealpilot_core::config::{AppConfig, LoadOptions, LogFormat};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use commands::ask::AskOptions;

#[derive(Debug, Parser)]
#[command(
    name = "dealpilot",
    about = "Dealpilot operator CLI",
    long_about = "Inspect configuration, check readiness, preview workflow plans, and send requests through the dealpilot agent.",
    after_help = "Examples:\n  dealpilot doctor --json\n  dealpilot plan \"create a deal for Acme worth $5000\"\n  dealpilot ask \"find deals over 50000\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, provider readiness, rule catalogue, and tool registry")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Preview the workflow steps planned for an objective without running them")]
    Plan { objective: String },
    #[command(about = "Send one message through the agent against the configured provider")]
    Ask {
        message: String,
        #[arg(long, default_value = "operator")]
        user: String,
        #[arg(long, default_value = "cli")]
        session: String,
        #[arg(long = "permission", help = "Grant a permission (repeatable)")]
        permissions: Vec<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Plan { objective } => commands::plan::run(&objective),
        Command::Ask { message, user, session, permissions } => {
            init_logging();
            let options =
                AskOptions { message, user_id: user, session_id: session, permissions };
            commands::ask::run(&options)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Structured logs go to stderr so stdout stays a single JSON payload.
fn init_logging() {
    let Ok(config) = AppConfig::load(LoadOptions::default()) else {
        return;
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
