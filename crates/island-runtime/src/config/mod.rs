//! Configuration for the Island runtime.
//!
//! Loaded in layers with figment (defaults, file, environment) and checked
//! with [`validate_config`] before a connection is attempted.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, load_config, load_config_from_file};
pub use schema::{
    BridgeConfig, ConnectionConfig, IslandConfig, LogFormat, LogLevel, LogOutput, LoggingConfig,
};
pub use validation::validate_config;
