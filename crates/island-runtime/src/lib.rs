//! Island Runtime - the orchestration layer of the Island bridge.
//!
//! This crate provides:
//! - [`ConnectionManager`]: one facade over the three transport modes
//! - [`MessageBridge`]: the receive loop that turns chat commands into replies
//! - Layered configuration (`island.toml`, `ISLAND_*` and the legacy `QQ_*`
//!   environment variables)
//! - Logging configuration
//!
//! ```ignore
//! use std::sync::Arc;
//! use island_runtime::{ConnectionManager, MessageBridge, config::load_config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     island_runtime::logging::init_from_config(&config.logging);
//!
//!     let manager = Arc::new(ConnectionManager::new(config.to_transport_config()));
//!     manager.connect().await?;
//!
//!     let bridge = MessageBridge::new(manager, Arc::new(MyProcessor), config.bridge);
//!     bridge.run(shutdown_token).await;
//!     Ok(())
//! }
//! ```
//!
//! # Connection modes
//!
//! - `websocket`: dial the gateway, retrying with linear backoff
//! - `http`: POST actions to the gateway's HTTP API; nothing is received
//! - `reverse_websocket`: listen and let the gateway dial in

pub mod bridge;
pub mod config;
pub mod error;
pub mod logging;
pub mod manager;
pub mod signal;

// Re-exports
pub use bridge::{
    CommandContext, CommandProcessor, MessageBridge, MessageEvent, SessionKey, extract_text,
};
pub use config::{ConfigError, ConfigLoader, ConfigResult, IslandConfig, validate_config};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::LoggingBuilder;
pub use manager::ConnectionManager;
pub use signal::wait_for_shutdown;

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// Provides the logging macros (`trace!` through `error!`) along with
/// `span`, `event`, `instrument` and `Level`.
pub mod prelude {
    pub use tracing::{Level, debug, error, event, info, instrument, span, trace, warn};
}
