mod cli;
mod commands;
mod config;
mod error;
mod logging;
mod runner;
mod ui;

use crate::cli::Cli;
use crate::error::{CliError, Result};
use crate::ui::UiManager;
use clap::Parser;
use std::path::PathBuf;
use tokio::task;
use tracing::{debug, error, info, warn};

const DEFAULT_LOG_FILE: &str = "armc.log";

#[tokio::main]
async fn main() {
    if let Err(e) = run_app().await {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        eprintln!("\n❌ Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_app() -> Result<()> {
    let (ui_manager, ui_sender, shutdown_sender) = UiManager::new();
    let ui_handle = task::spawn(ui_manager.run());

    let cli = Cli::parse();
    let log_file = cli
        .log_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE));
    logging::setup_logging(cli.verbose, cli.quiet, Some(&log_file), ui_sender.clone())?;

    let (panic_hook, eyre_hook) = color_eyre::config::HookBuilder::default().into_hooks();
    eyre_hook.install().map_err(|e| CliError::Other(e.into()))?;
    std::panic::set_hook(Box::new(move |pi| {
        error!("{}", panic_hook.panic_report(pi));
    }));

    let command_result = async {
        info!("🚀 ARMC CLI v{} starting up.", env!("CARGO_PKG_VERSION"));
        debug!("Full CLI arguments parsed: {:?}", &cli);

        if let Some(num_threads) = cli.threads {
            info!(
                "Setting Rayon global thread pool to {} threads.",
                num_threads
            );
            rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build_global()
                .map_err(|e| {
                    CliError::Other(anyhow::anyhow!("Failed to build global thread pool: {}", e))
                })?;
        }

        commands::run::run(&cli, ui_sender).await
    }
    .await;

    match &command_result {
        Ok(_) => {
            info!("✅ ARMC run completed successfully.");
            println!("✅ ARMC run completed successfully.");
        }
        Err(e) => {
            error!("❌ ARMC run failed: {}", e);
            eprintln!("❌ ARMC run failed: {}", e);
        }
    }

    if shutdown_sender.send(true).is_err() {
        warn!("UI manager may have already exited before shutdown signal.");
    }

    ui_handle
        .await
        .map_err(|e| CliError::Other(anyhow::anyhow!("UI manager task failed: {}", e)))?;

    command_result
}
