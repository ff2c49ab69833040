pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "servyy",
    about = "Servyy operator CLI",
    long_about = "Operate the Servyy sales assistant: migrations, config inspection, readiness checks, interactive chat and Gmail authorization.",
    after_help = "Examples:\n  servyy doctor --json\n  servyy config\n  servyy chat --user-id alice\n  servyy gmail-authorize --port 8765"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, database, LLM, search and Gmail token readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Start an interactive sales-assistant session in the terminal")]
    Chat {
        #[arg(long, help = "Conversation history key; prompted for when omitted")]
        user_id: Option<String>,
    },
    #[command(about = "Authorize Gmail sending and write the token file used by the server")]
    GmailAuthorize {
        #[arg(long, default_value_t = 0, help = "Loopback port for the OAuth redirect (0 picks a free port)")]
        port: u16,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Chat { user_id } => commands::chat::run(user_id),
        Command::GmailAuthorize { port } => commands::gmail_authorize::run(port),
    };

    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    ExitCode::from(result.exit_code)
}
