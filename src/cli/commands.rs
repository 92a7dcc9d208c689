//! CLI command execution

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::config::{CoordinatorConfig, StoreConfig};
use crate::engine::Coordinator;
use crate::http_api::HttpServer;
use crate::recovery::{self, RecoveryScanner};

use super::args::Command;
use super::errors::CliError;

/// Dispatches a parsed command.
pub fn run_command(command: Command) -> Result<(), CliError> {
    match command {
        Command::Init { config } => init(config),
        Command::Serve {
            config,
            port,
            data_dir,
        } => serve(config, port, data_dir),
    }
}

fn init(path: PathBuf) -> Result<(), CliError> {
    if path.exists() {
        return Err(CliError::AlreadyInitialized(path));
    }
    let config = CoordinatorConfig::default();
    let contents =
        serde_json::to_vec_pretty(&config).map_err(crate::config::ConfigError::Parse)?;
    fs::write(&path, contents)?;
    println!(
        "{}",
        serde_json::json!({
            "status": "ok",
            "config": path.display().to_string(),
        })
    );
    Ok(())
}

fn serve(
    config_path: Option<PathBuf>,
    port: Option<u16>,
    data_dir: Option<PathBuf>,
) -> Result<(), CliError> {
    let mut config = match config_path {
        Some(path) => CoordinatorConfig::load(&path)?,
        None => CoordinatorConfig::default(),
    };
    if let Some(port) = port {
        config.http.port = port;
    }
    if let Some(dir) = data_dir {
        config.store = StoreConfig::File { dir };
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve_async(config))
}

async fn serve_async(config: CoordinatorConfig) -> Result<(), CliError> {
    let store = config.build_store()?;
    let coordinator = Arc::new(Coordinator::new(
        config.coordinator_base(),
        store,
        config.engine_settings(),
    )?);

    // Re-hydrate persisted state before accepting traffic, then keep
    // scanning in the background.
    let stats = recovery::run_pass(&coordinator).await;
    if stats.scanned > 0 {
        info!(
            scanned = stats.scanned,
            driven = stats.driven,
            "startup recovery pass"
        );
    }
    let scanner =
        RecoveryScanner::new(coordinator.clone(), config.recovery_interval()).start();

    let server = HttpServer::new(coordinator, config.http.clone());
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    };
    let served = server.start(shutdown).await;

    // Workers stop before the store goes away.
    scanner.shutdown().await;
    served?;
    Ok(())
}
