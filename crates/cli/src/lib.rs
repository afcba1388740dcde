pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "expensa",
    about = "Expensa operator CLI",
    long_about = "Operate the Expensa expense service: migrations, demo data, config inspection, and readiness checks.",
    after_help = "Examples:\n  expensa migrate\n  expensa seed --reset\n  expensa doctor --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo company with admin, manager, and employee accounts")]
    Seed {
        #[arg(long, help = "Remove the demo company and its data before loading")]
        reset: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, receipt storage, DB connectivity, and schema state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed { reset } => commands::seed::run(reset),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            let output = commands::doctor::run(json);
            commands::CommandResult { exit_code: commands::doctor::exit_code(&output), output }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
