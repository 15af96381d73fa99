//! # Island Core
//!
//! Leaf types shared by every layer of the Island bridge.
//!
//! - [`TransportMode`]: which of the three transport strategies is active
//! - [`OutboundEnvelope`]: the `{action, params}` request sent to the gateway
//! - [`GroupInfo`] and [`parse_group_list`]: group-list reply decoding
//! - [`ConnError`]: the transport-layer error taxonomy
//! - [`TransportConfig`]: per-strategy connection settings
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  island-runtime      │  (ConnectionManager, bridge, config, logging)
//! ├──────────────────────┤
//! │  island-transport    │  (ws client, ws server, http client)
//! ├──────────────────────┤
//! │  island-core         │  <- This crate (shared types)
//! └──────────────────────┘
//! ```

pub mod config;
pub mod envelope;
pub mod error;
pub mod group;
pub mod mode;

pub use config::{HttpClientConfig, TransportConfig, WsClientConfig, WsServerConfig};
pub use envelope::{MessageKind, OutboundEnvelope, actions};
pub use error::{ConnError, ConnResult};
pub use group::{GroupInfo, parse_group_list};
pub use mode::TransportMode;
