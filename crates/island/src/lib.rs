//! # Island
//!
//! A bridge between a QQ OneBot gateway and a chat-command engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   frames   ┌───────────────────┐   commands   ┌──────────────────┐
//! │ Gateway  │───────────▶│ ConnectionManager │─────────────▶│ MessageBridge    │
//! │ (OneBot) │◀───────────│  ws / http / rws  │◀─────────────│ CommandProcessor │
//! └──────────┘  actions   └───────────────────┘    replies   └──────────────────┘
//! ```
//!
//! - **Transports**: outbound WebSocket client, HTTP API client, or a reverse
//!   WebSocket listener the gateway dials into
//! - **ConnectionManager**: one handle for whichever transport is active,
//!   switchable at runtime
//! - **MessageBridge**: pulls events, hands prefixed commands to a
//!   [`CommandProcessor`](island_runtime::CommandProcessor), sends replies
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use island::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let manager = Arc::new(ConnectionManager::new(config.to_transport_config()));
//!     manager.connect().await?;
//!
//!     let bridge = MessageBridge::new(manager, Arc::new(EchoProcessor::new(".")), config.bridge);
//!     bridge.run(CancellationToken::new()).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` (default): read `island.toml`
//! - `yaml-config`: read `island.yaml`
//! - `json-log`: JSON log output

pub mod echo;

pub use island_core as core;
pub use island_runtime as runtime;
pub use island_transport as transport;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use island::prelude::*;
/// ```
pub mod prelude {
    pub use island_core::{ConnError, ConnResult, GroupInfo, TransportConfig, TransportMode};
    pub use island_runtime::config::{IslandConfig, load_config, load_config_from_file};
    pub use island_runtime::{
        CommandContext, CommandProcessor, ConnectionManager, MessageBridge, RuntimeError,
        SessionKey,
    };
    pub use tokio_util::sync::CancellationToken;

    pub use crate::echo::EchoProcessor;

    pub use island_runtime::prelude::*;
}
