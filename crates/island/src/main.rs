//! The `island` binary.
//!
//! ```bash
//! island --config island.toml
//! QQ_REVERSE_WS=/onebot CONNECTION_MODE=reverse_websocket island
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use island::echo::EchoProcessor;
use island_core::TransportMode;
use island_runtime::config::{ConfigLoader, validate_config};
use island_runtime::{ConnectionManager, MessageBridge, logging, wait_for_shutdown};

#[derive(Parser, Debug)]
#[command(name = "island", version, about = "OneBot gateway bridge")]
struct Cli {
    /// Configuration file (defaults to island.toml in the search paths).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the connection mode: websocket, http or reverse_websocket.
    #[arg(short, long)]
    mode: Option<TransportMode>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = cli.config {
        loader = loader.file(path);
    }
    let mut config = loader.load()?;
    if let Some(mode) = cli.mode {
        config.connection.mode = mode;
    }

    logging::init_from_config(&config.logging);
    info!(mode = %config.connection.mode, "Starting island");

    let manager = Arc::new(ConnectionManager::new(config.to_transport_config()));
    match validate_config(&config) {
        Ok(()) => {
            if let Err(e) = manager.connect().await {
                error!(error = %e, "Initial connection failed, the message loop will retry");
            }
        }
        Err(e) => warn!(error = %e, "Configuration incomplete, waiting for a valid one"),
    }

    let processor = Arc::new(EchoProcessor::new(config.bridge.command_prefix.clone()));
    let bridge = Arc::new(MessageBridge::new(manager.clone(), processor, config.bridge));

    let shutdown = CancellationToken::new();
    let bridge_task = {
        let bridge = bridge.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { bridge.run(shutdown).await })
    };

    wait_for_shutdown().await;

    shutdown.cancel();
    manager.close().await;
    if let Err(e) = bridge_task.await {
        error!(error = %e, "Message loop panicked");
    }
    info!("Island stopped");
    Ok(())
}
