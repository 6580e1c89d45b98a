pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use propbot_core::config::LoadOptions;

#[derive(Debug, Parser)]
#[command(
    name = "propbot",
    about = "Propbot operator CLI",
    long_about = "Operate the propbot chat engine: database migrations, readiness checks, and \
                  session housekeeping.",
    after_help = "Examples:\n  propbot doctor --json\n  propbot migrate\n  propbot sessions prune"
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        help = "Path to propbot.toml (defaults to ./propbot.toml or ./config/propbot.toml)"
    )]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Validate config, channel credentials, DB connectivity and schema version")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(subcommand)]
    Sessions(SessionsCommand),
}

#[derive(Debug, Subcommand)]
enum SessionsCommand {
    #[command(about = "Delete every session whose expiry has passed")]
    Prune,
}

impl Cli {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            ..LoadOptions::default()
        }
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = cli.load_options();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(options),
        Command::Doctor { json } => commands::doctor::run(options, json),
        Command::Sessions(SessionsCommand::Prune) => commands::sessions::prune(options),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
