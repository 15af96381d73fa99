//! The message bridge: turns gateway events into commands and sends the
//! replies back.
//!
//! Command evaluation is delegated to a [`CommandProcessor`]. Each call gets
//! a [`CommandContext`] naming the chat it came from; processors that keep
//! state key it on [`SessionKey`] instead of sharing globals.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use island_core::{ConnError, actions};

use crate::config::BridgeConfig;
use crate::error::{RuntimeError, RuntimeResult};
use crate::manager::ConnectionManager;

/// Identifies one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKey {
    /// A group chat.
    Group(i64),
    /// A one-to-one chat with a user.
    Private(i64),
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group(id) => write!(f, "group:{id}"),
            Self::Private(id) => write!(f, "private:{id}"),
        }
    }
}

/// Where a command came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandContext {
    /// Sender.
    pub user_id: i64,
    /// Group, for group messages.
    pub group_id: Option<i64>,
    /// The conversation to keep state under.
    pub session: SessionKey,
}

/// Evaluates command text and produces a reply.
#[async_trait]
pub trait CommandProcessor: Send + Sync {
    /// Handles `command` (prefix included). `None` means no reply.
    async fn process(&self, command: &str, ctx: &CommandContext) -> Option<String>;
}

/// A OneBot event, reduced to the fields the bridge reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageEvent {
    #[serde(default)]
    pub post_type: String,
    #[serde(default)]
    pub message_type: String,
    #[serde(default)]
    pub message: Value,
    #[serde(default)]
    pub raw_message: String,
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub group_id: i64,
    #[serde(default)]
    pub self_id: i64,
}

impl MessageEvent {
    /// The text of the message: concatenated `text` segments, or the plain
    /// string form. Falls back to `raw_message` when `message` is absent.
    pub fn text(&self) -> Option<String> {
        extract_text(&self.message)
            .or_else(|| (!self.raw_message.is_empty()).then(|| self.raw_message.clone()))
    }

    /// Whether the bot itself sent this message.
    pub fn is_from_self(&self) -> bool {
        self.self_id != 0 && self.user_id == self.self_id
    }

    /// The command context, for group and private messages.
    pub fn context(&self) -> Option<CommandContext> {
        let (group_id, session) = match self.message_type.as_str() {
            "group" => (Some(self.group_id), SessionKey::Group(self.group_id)),
            "private" => (None, SessionKey::Private(self.user_id)),
            _ => return None,
        };
        Some(CommandContext {
            user_id: self.user_id,
            group_id,
            session,
        })
    }
}

/// Extracts the plain text of a OneBot message value.
pub fn extract_text(message: &Value) -> Option<String> {
    match message {
        Value::String(text) => Some(text.clone()),
        Value::Array(segments) => Some(
            segments
                .iter()
                .filter(|seg| seg.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|seg| seg.pointer("/data/text").and_then(Value::as_str))
                .collect(),
        ),
        _ => None,
    }
}

/// Pumps events from the connection manager to a command processor.
pub struct MessageBridge {
    manager: Arc<ConnectionManager>,
    processor: Arc<dyn CommandProcessor>,
    config: RwLock<BridgeConfig>,
}

impl MessageBridge {
    /// Creates a bridge.
    pub fn new(
        manager: Arc<ConnectionManager>,
        processor: Arc<dyn CommandProcessor>,
        config: BridgeConfig,
    ) -> Self {
        Self {
            manager,
            processor,
            config: RwLock::new(config),
        }
    }

    /// The connection manager this bridge drives.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// A copy of the current bridge settings.
    pub fn config(&self) -> BridgeConfig {
        self.config.read().clone()
    }

    /// Replaces the bridge settings; takes effect on the next event.
    pub fn update_config(&self, config: BridgeConfig) {
        *self.config.write() = config;
    }

    /// Runs the receive loop until `shutdown` fires.
    ///
    /// Receive timeouts are silent. Any other receive failure pauses for the
    /// retry interval and then calls `connect()`, which re-dials a dead
    /// outbound socket and is a no-op otherwise. HTTP mode has no receive
    /// primitive; the loop idles.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Message loop started");
        loop {
            let received = tokio::select! {
                () = shutdown.cancelled() => break,
                received = self.manager.receive() => received,
            };

            match received {
                Ok(frame) => {
                    if let Err(e) = self.handle_frame(&frame).await {
                        debug!(error = %e, "Skipping frame");
                    }
                }
                Err(ConnError::Timeout { .. }) => {}
                Err(ConnError::Unsupported { .. }) => {
                    if !self.pause(&shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    if e.is_closed() {
                        debug!("No live connection, retrying later");
                    } else {
                        warn!(error = %e, "Receive failed, retrying later");
                    }
                    if !self.pause(&shutdown).await {
                        break;
                    }
                    if let Err(e) = self.manager.connect().await {
                        warn!(error = %e, "Reconnect failed");
                    }
                }
            }
        }
        info!("Message loop stopped");
    }

    /// Sleeps for the retry interval. Returns `false` if `shutdown` fired.
    async fn pause(&self, shutdown: &CancellationToken) -> bool {
        let interval = self.config.read().retry_interval();
        tokio::select! {
            () = shutdown.cancelled() => false,
            () = tokio::time::sleep(interval) => true,
        }
    }

    /// Decodes one frame and handles it if it is a message event.
    pub async fn handle_frame(&self, frame: &[u8]) -> RuntimeResult<()> {
        let event: MessageEvent = serde_json::from_slice(frame)
            .map_err(|e| RuntimeError::InvalidEvent(e.to_string()))?;
        self.handle_event(&event).await
    }

    /// Runs a command carried by `event` and sends the reply.
    pub async fn handle_event(&self, event: &MessageEvent) -> RuntimeResult<()> {
        if event.post_type != "message" {
            trace!(post_type = %event.post_type, "Ignoring non-message event");
            return Ok(());
        }
        if event.is_from_self() {
            trace!(self_id = event.self_id, "Ignoring message sent by the bot");
            return Ok(());
        }
        let Some(ctx) = event.context() else {
            debug!(message_type = %event.message_type, "Ignoring message of unknown type");
            return Ok(());
        };
        let Some(text) = event.text() else {
            return Err(RuntimeError::InvalidEvent(
                "message carries no text".to_string(),
            ));
        };

        let (prefix, allowed) = {
            let config = self.config.read();
            let allowed = ctx.group_id.is_none_or(|id| config.allows_group(id));
            (config.command_prefix.clone(), allowed)
        };
        if !text.starts_with(&prefix) {
            return Ok(());
        }
        if !allowed {
            debug!(session = %ctx.session, "Group not in allow-list, ignoring command");
            return Ok(());
        }

        debug!(session = %ctx.session, user_id = ctx.user_id, "Processing command");
        let Some(reply) = self.processor.process(&text, &ctx).await else {
            return Ok(());
        };
        if reply.is_empty() {
            return Ok(());
        }
        self.reply(&ctx, &reply).await
    }

    async fn reply(&self, ctx: &CommandContext, text: &str) -> RuntimeResult<()> {
        let (action, params) = match ctx.session {
            SessionKey::Group(group_id) => (
                actions::SEND_GROUP_MSG,
                json!({ "group_id": group_id, "message": text }),
            ),
            SessionKey::Private(user_id) => (
                actions::SEND_PRIVATE_MSG,
                json!({ "user_id": user_id, "message": text }),
            ),
        };
        self.manager.send(action, params).await.map_err(|e| {
            warn!(session = %ctx.session, error = %e, "Failed to send reply");
            RuntimeError::from(e)
        })
    }

    /// Sends `text` to the first configured group.
    pub async fn send_to_default_group(&self, text: &str) -> RuntimeResult<()> {
        let group_id = self
            .config
            .read()
            .group_ids
            .first()
            .copied()
            .ok_or(RuntimeError::NoDefaultGroup)?;

        self.manager
            .send(
                actions::SEND_GROUP_MSG,
                json!({ "group_id": group_id, "message": text }),
            )
            .await?;
        Ok(())
    }
}
