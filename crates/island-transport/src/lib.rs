//! # Island Transport
//!
//! The three transport strategies behind the Island connection manager.
//!
//! ## Features
//!
//! - `ws-client`: outbound WebSocket client ([`WsClient`])
//! - `ws-server`: inbound (reverse) WebSocket server ([`WsServer`])
//! - `http-client`: stateless HTTP API client ([`HttpApiClient`])
//! - `full`: all of the above
//!
//! ## Request/Response Strategies
//!
//! | Transport | Strategy |
//! |-----------|----------|
//! | `WsClient` | A read pump routes every frame through a [`FrameRouter`]; replies tagged with a pending `echo` resolve their request, everything else is queued for `receive`. |
//! | `WsServer` | Same routing, fed by the pump of the currently attached peer. |
//! | `HttpApiClient` | One POST per call; the HTTP response body is the reply. |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use island_core::WsServerConfig;
//! use island_transport::WsServer;
//! use tokio_util::sync::CancellationToken;
//!
//! let server = WsServer::bind(WsServerConfig::new("0.0.0.0:8088", "/onebot"), CancellationToken::new()).await?;
//! let frame = server.receive().await?;
//! ```

#[cfg(any(feature = "ws-client", feature = "ws-server"))]
pub mod frames;

#[cfg(feature = "http-client")]
pub mod http_client;

#[cfg(feature = "ws-client")]
pub mod ws_client;

#[cfg(feature = "ws-server")]
pub mod ws_server;

#[cfg(any(feature = "ws-client", feature = "ws-server"))]
pub use frames::{FrameRouter, PendingReply};

#[cfg(feature = "http-client")]
pub use http_client::HttpApiClient;

#[cfg(feature = "ws-client")]
pub use ws_client::{WsClient, backoff_delay};

#[cfg(feature = "ws-server")]
pub use ws_server::{ServerPhase, WsServer};
