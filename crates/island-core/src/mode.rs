//! The transport strategy selector.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which transport strategy is active. Exactly one is active at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransportMode {
    /// Dial the gateway's WebSocket endpoint.
    #[default]
    #[serde(rename = "websocket")]
    OutboundSocket,
    /// Stateless HTTP request/response.
    #[serde(rename = "http")]
    HttpPoll,
    /// Listen for the gateway to connect to us (reverse WebSocket).
    #[serde(rename = "reverse_websocket")]
    InboundSocket,
}

impl TransportMode {
    /// All modes, in declaration order.
    pub const ALL: [Self; 3] = [Self::OutboundSocket, Self::HttpPoll, Self::InboundSocket];

    /// Returns the configuration name of this mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OutboundSocket => "websocket",
            Self::HttpPoll => "http",
            Self::InboundSocket => "reverse_websocket",
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "websocket" | "ws" => Ok(Self::OutboundSocket),
            "http" => Ok(Self::HttpPoll),
            "reverse_websocket" | "reverse-websocket" | "reverse_ws" => Ok(Self::InboundSocket),
            other => {
                let known: Vec<&str> = Self::ALL.iter().map(|m| m.as_str()).collect();
                Err(format!(
                    "unsupported connection mode: {other} (expected one of {})",
                    known.join(", ")
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_names_round_trip_through_serde() {
        for mode in TransportMode::ALL {
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{}\"", mode.as_str()));
            let back: TransportMode = serde_json::from_str(&json).unwrap();
            assert_eq!(back, mode);
        }
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!(
            "reverse_websocket".parse::<TransportMode>(),
            Ok(TransportMode::InboundSocket)
        );
        assert_eq!(" HTTP ".parse::<TransportMode>(), Ok(TransportMode::HttpPoll));
        let err = "carrier-pigeon".parse::<TransportMode>().unwrap_err();
        assert!(err.contains("websocket, http, reverse_websocket"));
    }

    #[test]
    fn test_unknown_mode_rejected_by_serde() {
        assert!(serde_json::from_str::<TransportMode>("\"grpc\"").is_err());
    }
}
