use std::process::ExitCode;

fn main() -> ExitCode {
    dealpilot_cli::run()
}
