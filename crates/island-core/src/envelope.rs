//! The request envelope sent to the gateway.
//!
//! Every transport puts the same JSON object on the wire:
//!
//! ```json
//! {"action": "send_group_msg", "params": {"group_id": 1, "message": "hi"}}
//! ```
//!
//! Requests whose reply must be picked out of unrelated inbound traffic
//! additionally carry an `echo` tag, which the gateway copies into its reply.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{ConnError, ConnResult};

/// OneBot action names used by the bridge.
pub mod actions {
    /// Send a message to a group.
    pub const SEND_GROUP_MSG: &str = "send_group_msg";
    /// Send a message to a single user.
    pub const SEND_PRIVATE_MSG: &str = "send_private_msg";
    /// Send a message, disambiguated by `message_type`.
    pub const SEND_MSG: &str = "send_msg";
    /// List the groups the bot is a member of.
    pub const GET_GROUP_LIST: &str = "get_group_list";
    /// Leave a group.
    pub const SET_GROUP_LEAVE: &str = "set_group_leave";
    /// Gateway status check.
    pub const GET_STATUS: &str = "get_status";
}

/// A request `{action, params}` with an optional correlation tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    /// Protocol action name.
    pub action: String,
    /// Action parameters (a JSON object).
    pub params: Value,
    /// Correlation tag echoed back by the gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo: Option<String>,
}

impl OutboundEnvelope {
    /// Creates an envelope without a correlation tag.
    ///
    /// A `null` params value is normalized to an empty object.
    pub fn new(action: impl Into<String>, params: Value) -> Self {
        let params = if params.is_null() {
            Value::Object(Map::new())
        } else {
            params
        };
        Self {
            action: action.into(),
            params,
            echo: None,
        }
    }

    /// Attaches a correlation tag.
    pub fn with_echo(mut self, echo: impl Into<String>) -> Self {
        self.echo = Some(echo.into());
        self
    }

    /// The `get_group_list` request.
    pub fn group_list() -> Self {
        Self::new(actions::GET_GROUP_LIST, json!({}))
    }

    /// The `set_group_leave` request for `group_id`.
    pub fn leave_group(group_id: i64) -> Self {
        Self::new(actions::SET_GROUP_LEAVE, json!({ "group_id": group_id }))
    }

    /// Serializes the envelope as the text of a WebSocket frame.
    pub fn to_text(&self) -> ConnResult<String> {
        serde_json::to_string(self)
            .map_err(|e| ConnError::SendFailed(format!("JSON serialization failed: {e}")))
    }
}

/// The kind of chat a message is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// A group chat.
    Group,
    /// A one-to-one chat.
    Private,
    /// Any other `message_type`; the gateway disambiguates.
    Other(String),
}

impl MessageKind {
    /// Returns the OneBot `message_type` string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Group => "group",
            Self::Private => "private",
            Self::Other(kind) => kind,
        }
    }

    /// Builds the action name and parameters for sending `text` to `target_id`.
    ///
    /// `Other` kinds populate both `user_id` and `group_id` with the same id
    /// and rely on `message_type` for disambiguation.
    pub fn to_request(&self, target_id: i64, text: &str) -> OutboundEnvelope {
        match self {
            Self::Group => OutboundEnvelope::new(
                actions::SEND_GROUP_MSG,
                json!({ "group_id": target_id, "message": text }),
            ),
            Self::Private => OutboundEnvelope::new(
                actions::SEND_PRIVATE_MSG,
                json!({ "user_id": target_id, "message": text }),
            ),
            Self::Other(kind) => OutboundEnvelope::new(
                actions::SEND_MSG,
                json!({
                    "message_type": kind,
                    "user_id": target_id,
                    "group_id": target_id,
                    "message": text,
                }),
            ),
        }
    }
}

impl From<&str> for MessageKind {
    fn from(s: &str) -> Self {
        match s {
            "group" => Self::Group,
            "private" => Self::Private,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
