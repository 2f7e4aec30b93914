pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "freightdesk",
    about = "Freightdesk operator CLI",
    long_about = "Operate the freight quote intake agent: migrations, config inspection, readiness checks, session inspection, and an interactive chat console.",
    after_help = "Examples:\n  freightdesk doctor --json\n  freightdesk config\n  freightdesk chat --thread-id demo-1\n  freightdesk inspect demo-1"
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
    #[command(about = "Validate config, database connectivity, and the pricing API schema")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
        #[arg(long, help = "Skip checks that call the pricing API")]
        offline: bool,
    },
    #[command(about = "Talk to the intake workflow from the terminal (/approve, /quit)")]
    Chat {
        #[arg(long, help = "Resume or name a session; generated when omitted")]
        thread_id: Option<String>,
        #[arg(long, help = "Quote key seeded into a new session")]
        quote_id: Option<String>,
    },
    #[command(about = "Print a stored session and its transition history as JSON")]
    Inspect {
        #[arg(help = "Session (thread) id")]
        thread_id: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json, offline } => commands::doctor::run(json, offline),
        Command::Chat { thread_id, quote_id } => commands::chat::run(thread_id, quote_id),
        Command::Inspect { thread_id } => commands::inspect::run(&thread_id),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
