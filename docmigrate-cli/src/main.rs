use clap::{Parser, Subcommand};
use std::process::ExitCode;

mod commands;
mod registry;

#[derive(Parser)]
#[command(name = "docmigrate")]
#[command(about = "Apply ordered, idempotent migrations to a document database environment")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Target environment (dev, staging, prod); there is no default
    #[arg(short, long)]
    env: String,

    /// Mirror the run log to the console
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show applied and pending migrations
    Status {
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Apply pending migrations in order
    Apply {
        /// Describe intended changes without performing them
        #[arg(long)]
        dry_run: bool,

        /// Stop after this migration id (inclusive)
        #[arg(long, value_name = "ID")]
        to: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let result = match cli.command {
        Commands::Status { json } => commands::status::run(&cli.env, cli.verbose, json).await,
        Commands::Apply { dry_run, to } => {
            commands::apply::run(&cli.env, cli.verbose, dry_run, to).await
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}
