//! Group-list reply decoding, shared by every transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{ConnError, ConnResult};

/// A group the bot is a member of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    /// Group number.
    #[serde(rename = "group_id")]
    pub id: i64,
    /// Display name.
    #[serde(rename = "group_name")]
    pub name: String,
    /// Always `true`; no liveness tracking is done.
    pub active: bool,
}

/// Decodes a group-list reply.
///
/// Two shapes are accepted, checked in this order:
///
/// 1. `{"status": "ok", "data": [...]}`
/// 2. `{"data": [...]}` with no `status` field at all
///
/// Anything else, including a status other than `"ok"`, is rejected with
/// [`ConnError::UnexpectedResponse`] carrying the raw reply.
pub fn parse_group_list(response: &Value) -> ConnResult<Vec<GroupInfo>> {
    let data = response.get("data").and_then(Value::as_array);
    let status = response.get("status");

    let items = match (status, data) {
        (Some(status), Some(items)) if status.as_str() == Some("ok") => items,
        (None, Some(items)) => items,
        _ => return Err(ConnError::UnexpectedResponse(response.clone())),
    };

    let groups: Vec<GroupInfo> = items
        .iter()
        .filter_map(Value::as_object)
        .map(|group| GroupInfo {
            id: group
                .get("group_id")
                .and_then(|id| id.as_i64().or_else(|| id.as_f64().map(|f| f as i64)))
                .unwrap_or_default(),
            name: group
                .get("group_name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            active: true,
        })
        .collect();

    debug!(count = groups.len(), "Parsed group list");
    Ok(groups)
}
