//! slitred - long-slit spectrograph reduction
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use slitred::cli::{Cli, Commands};
use slitred::config::{Config, ConfigManager};
use slitred::error::{SlitredError, SlitredResult};
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> SlitredResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    // Find local config unless --no-local is set
    let local_config_path = if cli.no_local {
        None
    } else {
        let cwd = std::env::current_dir()
            .map_err(|e| SlitredError::io("getting current directory", e))?;
        ConfigManager::find_local_config(&cwd)
    };

    let config = config_manager
        .load_merged(local_config_path.as_deref())
        .await?;

    init_logging(cli.verbose, &config);
    if let Some(ref path) = local_config_path {
        debug!("Using local config: {}", path.display());
    }

    match cli.command {
        Commands::Run(args) => slitred::cli::commands::run(args, &config).await,
        Commands::Keys(args) => slitred::cli::commands::keys(args, &config).await,
        Commands::Config(args) => {
            slitred::cli::commands::config(args, &config, &config_manager).await
        }
    }
}

/// 0 = warn, 1 = info, 2+ = debug; `general.verbose` raises the floor to info
fn init_logging(verbose: u8, config: &Config) {
    let level = match (verbose, config.general.verbose) {
        (0, false) => "warn",
        (0, true) | (1, _) => "info",
        _ => "debug",
    };
    let filter = EnvFilter::new(format!("slitred={}", level));

    if config.general.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .without_time()
            .init();
    }
}
