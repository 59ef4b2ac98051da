use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod utils;

/// ndnd face system daemon
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Sets the level of verbosity
    #[clap(short, long, global = true)]
    verbose: bool,

    /// Subcommand to execute
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the face system
    Run {
        /// Path to the configuration file
        #[clap(short, long, default_value = "ndnd.conf.toml")]
        config: PathBuf,
    },

    /// Validate a configuration file without applying it
    CheckConfig {
        /// Path to the configuration file
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        Commands::Run { config } => commands::run::execute(&config).await,
        Commands::CheckConfig { config } => commands::check::execute(&config),
    }
}
