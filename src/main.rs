use anyhow::{Result, anyhow};
use clap::Parser;

use vigil::cli::commands;
use vigil::cli::{Cli, Commands};
use vigil::config::Settings;
use vigil::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .map_err(|e| anyhow!("Failed to load configuration: {e}"))?;

    if let Commands::Watch(args) = &cli.command {
        args.apply_overrides(&mut settings);
    }

    logging::init_with_config(&settings.logging);

    match cli.command {
        Commands::Init { force } => commands::init::run_init(force),
        Commands::Config => commands::init::run_config(&settings),
        Commands::Watch(args) => commands::watch::run(args, settings).await,
    }
}
