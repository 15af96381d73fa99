//! Configuration types for the transport strategies.

use std::time::Duration;

use crate::mode::TransportMode;

// =============================================================================
// WebSocket Client Config
// =============================================================================

/// Configuration for the outbound WebSocket client.
#[derive(Debug, Clone)]
pub struct WsClientConfig {
    /// Gateway WebSocket URL.
    pub url: String,
    /// Optional access token, sent as a bearer token on the upgrade request.
    pub access_token: Option<String>,
    /// Number of dial attempts before giving up.
    pub max_retry: u32,
    /// Backoff unit; attempt `i` is followed by a wait of `(i + 1) * retry_unit`.
    pub retry_unit: Duration,
    /// How long a correlated request waits for its reply.
    pub request_timeout: Duration,
    /// Capacity of the inbound frame queue.
    pub queue_capacity: usize,
}

impl Default for WsClientConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            access_token: None,
            max_retry: 3,
            retry_unit: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
            queue_capacity: 100,
        }
    }
}

impl WsClientConfig {
    /// Creates a new WebSocket client config with the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Sets the access token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Sets the maximum number of dial attempts.
    pub fn with_max_retry(mut self, max: u32) -> Self {
        self.max_retry = max;
        self
    }

    /// Sets the backoff unit.
    pub fn with_retry_unit(mut self, unit: Duration) -> Self {
        self.retry_unit = unit;
        self
    }
}

// =============================================================================
// HTTP Client Config
// =============================================================================

/// Configuration for the HTTP API client.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Gateway HTTP API base URL.
    pub api_url: String,
    /// Optional access token (used as Bearer token).
    pub access_token: Option<String>,
    /// Request timeout duration.
    pub timeout: Duration,
}

impl HttpClientConfig {
    /// Creates a new HTTP client config with the given API URL.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            access_token: None,
            timeout: Duration::from_secs(10),
        }
    }

    /// Sets the access token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Sets the request timeout duration.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self::new("")
    }
}

// =============================================================================
// WebSocket Server Config
// =============================================================================

/// Configuration for the inbound (reverse) WebSocket server.
#[derive(Debug, Clone)]
pub struct WsServerConfig {
    /// Address the listener binds to.
    pub addr: String,
    /// Upgrade path; empty means "not configured".
    pub path: String,
    /// When set, upgrades must present this token.
    pub access_token: Option<String>,
    /// How long `receive` waits for a frame.
    pub receive_timeout: Duration,
    /// How long a correlated request waits for its reply.
    pub request_timeout: Duration,
    /// Capacity of the inbound frame queue.
    pub queue_capacity: usize,
}

impl Default for WsServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8088".to_string(),
            path: String::new(),
            access_token: None,
            receive_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
            queue_capacity: 100,
        }
    }
}

impl WsServerConfig {
    /// Creates a new server config listening on `addr` at `path`.
    pub fn new(addr: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Sets the access token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }
}

// =============================================================================
// Combined Config
// =============================================================================

/// Settings for all three strategies plus the active mode.
///
/// Only the section for `mode` is used at a time; the others are kept so a
/// runtime mode switch needs no new configuration.
#[derive(Debug, Clone, Default)]
pub struct TransportConfig {
    /// The active strategy.
    pub mode: TransportMode,
    /// Outbound WebSocket settings.
    pub ws_client: WsClientConfig,
    /// HTTP API settings.
    pub http_client: HttpClientConfig,
    /// Reverse WebSocket settings.
    pub ws_server: WsServerConfig,
}

impl TransportConfig {
    /// Returns a copy with a different active mode.
    pub fn with_mode(mut self, mode: TransportMode) -> Self {
        self.mode = mode;
        self
    }
}
