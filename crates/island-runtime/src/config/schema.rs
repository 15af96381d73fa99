//! Configuration schema definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use island_core::{
    HttpClientConfig, TransportConfig, TransportMode, WsClientConfig, WsServerConfig,
};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IslandConfig {
    /// Gateway connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Message bridge settings.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl IslandConfig {
    /// Converts the connection section to the transport layer's config.
    pub fn to_transport_config(&self) -> TransportConfig {
        self.connection.to_transport_config()
    }
}

// =============================================================================
// Connection
// =============================================================================

/// Gateway connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Active transport mode.
    #[serde(default)]
    pub mode: TransportMode,

    /// Gateway WebSocket URL (`websocket` mode).
    #[serde(default)]
    pub ws_url: String,

    /// Gateway HTTP API base URL (`http` mode).
    #[serde(default)]
    pub http_url: String,

    /// Upgrade path the gateway connects to (`reverse_websocket` mode).
    #[serde(default)]
    pub reverse_ws_path: String,

    /// Address the reverse WebSocket listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Access token shared with the gateway.
    #[serde(default)]
    pub access_token: Option<String>,

    /// Outbound dial attempts before giving up.
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,

    /// Backoff time unit in milliseconds.
    #[serde(default = "default_retry_unit_ms")]
    pub retry_unit_ms: u64,

    /// HTTP request timeout in milliseconds.
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    /// Bounded receive wait in reverse mode, in milliseconds.
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,

    /// Wait for a correlated reply, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Inbound frame queue capacity.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::default(),
            ws_url: String::new(),
            http_url: String::new(),
            reverse_ws_path: String::new(),
            listen_addr: default_listen_addr(),
            access_token: None,
            max_retry: default_max_retry(),
            retry_unit_ms: default_retry_unit_ms(),
            http_timeout_ms: default_http_timeout_ms(),
            receive_timeout_ms: default_receive_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl ConnectionConfig {
    /// Converts to the transport layer's config, trimming endpoints.
    pub fn to_transport_config(&self) -> TransportConfig {
        let access_token = self
            .access_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        let request_timeout = Duration::from_millis(self.request_timeout_ms);

        TransportConfig {
            mode: self.mode,
            ws_client: WsClientConfig {
                url: self.ws_url.trim().to_string(),
                access_token: access_token.clone(),
                max_retry: self.max_retry,
                retry_unit: Duration::from_millis(self.retry_unit_ms),
                request_timeout,
                queue_capacity: self.queue_capacity,
            },
            http_client: HttpClientConfig {
                api_url: self.http_url.trim().to_string(),
                access_token: access_token.clone(),
                timeout: Duration::from_millis(self.http_timeout_ms),
            },
            ws_server: WsServerConfig {
                addr: self.listen_addr.trim().to_string(),
                path: self.reverse_ws_path.trim().to_string(),
                access_token,
                receive_timeout: Duration::from_millis(self.receive_timeout_ms),
                request_timeout,
                queue_capacity: self.queue_capacity,
            },
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8088".to_string()
}

fn default_max_retry() -> u32 {
    3
}

fn default_retry_unit_ms() -> u64 {
    1000
}

fn default_http_timeout_ms() -> u64 {
    10_000
}

fn default_receive_timeout_ms() -> u64 {
    1000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_queue_capacity() -> usize {
    100
}

// =============================================================================
// Bridge
// =============================================================================

/// Message bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Groups the bridge answers in; empty means every group.
    #[serde(default)]
    pub group_ids: Vec<i64>,

    /// Prefix that marks a message as a command.
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,

    /// Pause after a receive failure before re-connecting, in seconds.
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            group_ids: Vec::new(),
            command_prefix: default_command_prefix(),
            retry_interval_secs: default_retry_interval_secs(),
        }
    }
}

impl BridgeConfig {
    /// The retry interval as a duration.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    /// Whether replies may be sent to `group_id`.
    pub fn allows_group(&self, group_id: i64) -> bool {
        self.group_ids.is_empty() || self.group_ids.contains(&group_id)
    }
}

fn default_command_prefix() -> String {
    ".".to_string()
}

fn default_retry_interval_secs() -> u64 {
    5
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Returns the lowercase level name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Converts to the `tracing` level.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line, abbreviated.
    #[default]
    Compact,
    /// Default `tracing-subscriber` format.
    Full,
    /// Multi-line, human oriented.
    Pretty,
    /// Newline-delimited JSON.
    #[cfg(feature = "json-log")]
    Json,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    /// Requires `file_path`.
    File,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Base level; `RUST_LOG` takes precedence when set.
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file, used when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Include thread ids.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line.
    #[serde(default)]
    pub file_location: bool,

    /// Per-module levels, e.g. `island_transport = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}
