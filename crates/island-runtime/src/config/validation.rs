//! Configuration validation utilities.

use std::net::SocketAddr;

use island_core::TransportMode;

use super::error::{ConfigError, ConfigResult};
use super::schema::{BridgeConfig, ConnectionConfig, IslandConfig};

/// Validates the entire configuration.
///
/// Only the endpoint of the active mode is required; the others may stay
/// empty until the mode is switched.
pub fn validate_config(config: &IslandConfig) -> ConfigResult<()> {
    validate_connection_config(&config.connection)?;
    validate_bridge_config(&config.bridge)?;
    Ok(())
}

/// Validates the connection section.
fn validate_connection_config(connection: &ConnectionConfig) -> ConfigResult<()> {
    match connection.mode {
        TransportMode::OutboundSocket => {
            validate_url(connection.ws_url.trim(), "connection.ws_url", &["ws://", "wss://"])?;
        }
        TransportMode::HttpPoll => {
            validate_url(
                connection.http_url.trim(),
                "connection.http_url",
                &["http://", "https://"],
            )?;
        }
        TransportMode::InboundSocket => {
            validate_path(connection.reverse_ws_path.trim())?;
            validate_listen_addr(connection.listen_addr.trim())?;
        }
    }

    if connection.max_retry == 0 {
        return Err(ConfigError::validation("max_retry must be greater than 0"));
    }
    if connection.queue_capacity == 0 {
        return Err(ConfigError::validation("queue_capacity must be greater than 0"));
    }

    let timeouts = [
        ("retry_unit_ms", connection.retry_unit_ms),
        ("http_timeout_ms", connection.http_timeout_ms),
        ("receive_timeout_ms", connection.receive_timeout_ms),
        ("request_timeout_ms", connection.request_timeout_ms),
    ];
    if let Some((name, _)) = timeouts.iter().find(|(_, value)| *value == 0) {
        return Err(ConfigError::validation(format!("{name} must be greater than 0")));
    }

    Ok(())
}

fn validate_bridge_config(bridge: &BridgeConfig) -> ConfigResult<()> {
    if bridge.command_prefix.is_empty() {
        return Err(ConfigError::missing_field("bridge.command_prefix"));
    }
    if bridge.retry_interval_secs == 0 {
        return Err(ConfigError::validation(
            "retry_interval_secs must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_url(url: &str, field: &str, schemes: &[&str]) -> ConfigResult<()> {
    if url.is_empty() {
        return Err(ConfigError::missing_field(field));
    }
    if !schemes.iter().any(|s| url.starts_with(s)) {
        return Err(ConfigError::invalid_url(
            url,
            format!("URL must start with one of: {schemes:?}"),
        ));
    }
    Ok(())
}

fn validate_path(path: &str) -> ConfigResult<()> {
    if path.is_empty() {
        return Err(ConfigError::missing_field("connection.reverse_ws_path"));
    }
    if !path.starts_with('/') {
        return Err(ConfigError::validation("Path must start with '/'"));
    }
    Ok(())
}

fn validate_listen_addr(addr: &str) -> ConfigResult<()> {
    addr.parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidAddress(format!("{addr}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_mode(mode: TransportMode) -> IslandConfig {
        let mut config = IslandConfig::default();
        config.connection.mode = mode;
        config
    }

    #[test]
    fn test_default_config_is_incomplete() {
        let err = validate_config(&IslandConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { ref field } if field == "connection.ws_url"));
    }

    #[test]
    fn test_only_active_endpoint_is_required() {
        let mut config = config_with_mode(TransportMode::HttpPoll);
        config.connection.http_url = "http://127.0.0.1:5700".to_string();
        assert!(validate_config(&config).is_ok());

        config.connection.http_url = "ftp://127.0.0.1".to_string();
        assert!(matches!(validate_config(&config), Err(ConfigError::InvalidUrl { .. })));
    }

    #[test]
    fn test_websocket_scheme() {
        let mut config = config_with_mode(TransportMode::OutboundSocket);
        config.connection.ws_url = "wss://gateway.example/ws".to_string();
        assert!(validate_config(&config).is_ok());

        config.connection.ws_url = "http://gateway.example/ws".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_reverse_mode_path_and_addr() {
        let mut config = config_with_mode(TransportMode::InboundSocket);
        assert!(validate_config(&config).is_err());

        config.connection.reverse_ws_path = "onebot".to_string();
        assert!(validate_config(&config).is_err());

        config.connection.reverse_ws_path = "/onebot".to_string();
        assert!(validate_config(&config).is_ok());

        config.connection.listen_addr = "localhost".to_string();
        assert!(matches!(validate_config(&config), Err(ConfigError::InvalidAddress(_))));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let mut config = config_with_mode(TransportMode::HttpPoll);
        config.connection.http_url = "http://127.0.0.1:5700".to_string();

        config.connection.max_retry = 0;
        assert!(validate_config(&config).is_err());
        config.connection.max_retry = 3;

        config.connection.request_timeout_ms = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("request_timeout_ms"));
        config.connection.request_timeout_ms = 10_000;

        config.bridge.command_prefix.clear();
        assert!(validate_config(&config).is_err());
    }
}
