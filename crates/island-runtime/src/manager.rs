//! The connection manager: one transport-agnostic front for the three modes.
//!
//! The active mode, its configuration and the live transport handle sit
//! behind a single async `RwLock`. Calls that write to the gateway (`send`,
//! `leave_group`) hold the read lock for their whole duration, so a mode
//! switch, which takes the write lock, never tears a transport down under
//! them. Every transport bounds a write by its request timeout, so the
//! switch waits at most that long. Blocking reads (`receive`, `group_list`) only hold the lock long
//! enough to clone the handle.
//!
//! The cancellation token lives outside that lock so `close()` can abort a
//! dial that is holding the write lock.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use island_core::{
    ConnError, ConnResult, GroupInfo, OutboundEnvelope, TransportConfig, TransportMode,
};
use island_transport::{HttpApiClient, ServerPhase, WsClient, WsServer};

/// The live resource for the active mode.
#[derive(Clone)]
enum ActiveTransport {
    Outbound(Arc<WsClient>),
    Http(Arc<HttpApiClient>),
    Inbound(Arc<WsServer>),
}

impl ActiveTransport {
    /// Whether the handle can no longer serve requests and must be replaced.
    fn is_dead(&self) -> bool {
        match self {
            Self::Outbound(client) => !client.is_connected(),
            Self::Http(_) => false,
            Self::Inbound(server) => server.phase() == ServerPhase::Closed,
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            Self::Outbound(client) => client.is_connected(),
            Self::Http(_) => true,
            Self::Inbound(server) => server.is_connected(),
        }
    }

    async fn close(&self) {
        match self {
            Self::Outbound(client) => client.close().await,
            Self::Http(_) => {}
            Self::Inbound(server) => server.close().await,
        }
    }
}

struct ManagerState {
    config: TransportConfig,
    /// Always matches `config.mode` when present.
    transport: Option<ActiveTransport>,
}

/// Owns the active transport and routes every call to it.
pub struct ConnectionManager {
    state: RwLock<ManagerState>,
    shutdown: Mutex<CancellationToken>,
}

impl ConnectionManager {
    /// Creates a manager for `config`. Nothing is connected yet.
    pub fn new(config: TransportConfig) -> Self {
        Self {
            state: RwLock::new(ManagerState {
                config,
                transport: None,
            }),
            shutdown: Mutex::new(CancellationToken::new()),
        }
    }

    /// Connects the transport for the current mode.
    ///
    /// A no-op while a live handle exists. A handle whose socket has died is
    /// dropped and replaced.
    pub async fn connect(&self) -> ConnResult<()> {
        let mut state = self.state.write().await;
        self.connect_locked(&mut state).await
    }

    async fn connect_locked(&self, state: &mut ManagerState) -> ConnResult<()> {
        if state.transport.as_ref().is_some_and(ActiveTransport::is_dead) {
            debug!(mode = %state.config.mode, "Replacing dead transport handle");
            state.transport = None;
        }
        if state.transport.is_some() {
            return Ok(());
        }

        let token = self.shutdown.lock().child_token();
        let mode = state.config.mode;
        let transport = match mode {
            TransportMode::OutboundSocket => {
                let client = WsClient::connect(state.config.ws_client.clone(), token).await?;
                ActiveTransport::Outbound(Arc::new(client))
            }
            TransportMode::HttpPoll => {
                ActiveTransport::Http(Arc::new(HttpApiClient::new(&state.config.http_client)?))
            }
            TransportMode::InboundSocket => {
                let server = WsServer::bind(state.config.ws_server.clone(), token).await?;
                ActiveTransport::Inbound(Arc::new(server))
            }
        };

        info!(mode = %mode, "Transport connected");
        state.transport = Some(transport);
        Ok(())
    }

    async fn active(&self) -> ConnResult<ActiveTransport> {
        self.state
            .read()
            .await
            .transport
            .clone()
            .ok_or(ConnError::ConnectionClosed)
    }

    /// Sends `action` with `params` through the active transport.
    ///
    /// In HTTP mode only the message-send actions are accepted.
    pub async fn send(&self, action: &str, params: Value) -> ConnResult<()> {
        let state = self.state.read().await;
        let envelope = OutboundEnvelope::new(action, params);
        match state.transport.as_ref().ok_or(ConnError::ConnectionClosed)? {
            ActiveTransport::Outbound(client) => client.send(&envelope).await,
            ActiveTransport::Http(client) => {
                client.send_action(&envelope.action, &envelope.params).await
            }
            ActiveTransport::Inbound(server) => server.send(&envelope).await,
        }
    }

    /// Returns the next inbound frame. Socket modes only.
    ///
    /// When the outbound socket fails, its handle is released; the next
    /// [`connect`](Self::connect) dials again.
    pub async fn receive(&self) -> ConnResult<Vec<u8>> {
        match self.active().await? {
            ActiveTransport::Outbound(client) => {
                let result = client.receive().await;
                if result.is_err() && !client.is_connected() {
                    self.release_outbound(&client).await;
                }
                result
            }
            ActiveTransport::Http(_) => {
                Err(ConnError::unsupported(TransportMode::HttpPoll, "receive"))
            }
            ActiveTransport::Inbound(server) => server.receive().await,
        }
    }

    /// Drops `client` if it is still the active handle.
    async fn release_outbound(&self, client: &Arc<WsClient>) {
        let mut state = self.state.write().await;
        let current = matches!(
            &state.transport,
            Some(ActiveTransport::Outbound(active)) if Arc::ptr_eq(active, client)
        );
        if current {
            state.transport = None;
            warn!(url = %client.url(), "Outbound connection lost, handle released");
        }
    }

    /// Fetches the groups the bot is in.
    pub async fn group_list(&self) -> ConnResult<Vec<GroupInfo>> {
        match self.active().await? {
            ActiveTransport::Outbound(client) => client.group_list().await,
            ActiveTransport::Http(client) => client.group_list().await,
            ActiveTransport::Inbound(server) => server.group_list().await,
        }
    }

    /// Asks the gateway to leave `group_id`.
    pub async fn leave_group(&self, group_id: i64) -> ConnResult<()> {
        let state = self.state.read().await;
        match state.transport.as_ref().ok_or(ConnError::ConnectionClosed)? {
            ActiveTransport::Outbound(client) => client.leave_group(group_id).await,
            ActiveTransport::Http(client) => client.leave_group(group_id).await,
            ActiveTransport::Inbound(server) => server.leave_group(group_id).await,
        }
    }

    /// Switches to `mode`, closing the current transport first.
    ///
    /// Switching to the current mode does nothing.
    pub async fn switch_mode(&self, mode: TransportMode) -> ConnResult<()> {
        let mut state = self.state.write().await;
        if state.config.mode == mode {
            debug!(mode = %mode, "Already in requested mode");
            return Ok(());
        }

        info!(from = %state.config.mode, to = %mode, "Switching transport mode");
        if let Some(old) = state.transport.take() {
            old.close().await;
        }
        state.config.mode = mode;
        self.connect_locked(&mut state).await
    }

    /// Tears everything down and connects again with `config`.
    pub async fn reinitialize(&self, config: TransportConfig) -> ConnResult<()> {
        self.fire_shutdown();

        let mut state = self.state.write().await;
        if let Some(old) = state.transport.take() {
            old.close().await;
        }
        info!(mode = %config.mode, "Reinitializing connection manager");
        state.config = config;
        self.connect_locked(&mut state).await
    }

    /// Cancels pending waits and releases the transport.
    ///
    /// Safe to call repeatedly; `connect` works again afterwards.
    pub async fn close(&self) {
        self.fire_shutdown();

        let mut state = self.state.write().await;
        if let Some(old) = state.transport.take() {
            old.close().await;
            info!(mode = %state.config.mode, "Connection manager closed");
        }
    }

    /// Cancels the current token and installs a fresh one.
    fn fire_shutdown(&self) {
        let old = std::mem::replace(&mut *self.shutdown.lock(), CancellationToken::new());
        old.cancel();
    }

    /// Whether the active mode has a live handle (and, in reverse mode, an
    /// attached peer).
    pub async fn is_connected(&self) -> bool {
        self.state
            .read()
            .await
            .transport
            .as_ref()
            .is_some_and(ActiveTransport::is_connected)
    }

    /// Probes the gateway. HTTP mode issues a status request; socket modes
    /// report whether they are connected.
    pub async fn test_connection(&self) -> ConnResult<()> {
        match self.active().await? {
            ActiveTransport::Http(client) => client.test_connection().await,
            socket if socket.is_connected() => Ok(()),
            _ => Err(ConnError::ConnectionClosed),
        }
    }

    /// The active mode.
    pub async fn mode(&self) -> TransportMode {
        self.state.read().await.config.mode
    }

    /// A copy of the current configuration.
    pub async fn config(&self) -> TransportConfig {
        self.state.read().await.config.clone()
    }

    /// The reverse WebSocket listener address, when listening.
    pub async fn listen_addr(&self) -> Option<SocketAddr> {
        match self.state.read().await.transport.as_ref()? {
            ActiveTransport::Inbound(server) => server.local_addr(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
    use axum::{Json, Router, routing::any, routing::post};
    use futures::{SinkExt, StreamExt};
    use island_core::{HttpClientConfig, WsClientConfig, WsServerConfig};
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message as PeerMessage;

    async fn serve(app: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        addr
    }

    /// An HTTP gateway that accepts every action.
    async fn http_gateway() -> SocketAddr {
        serve(Router::new().route(
            "/{action}",
            post(|| async { Json(json!({ "status": "ok", "data": [] })) }),
        ))
        .await
    }

    fn config_for(mode: TransportMode, http: Option<SocketAddr>) -> TransportConfig {
        TransportConfig {
            mode,
            ws_client: WsClientConfig::new("ws://127.0.0.1:1/ws")
                .with_max_retry(1)
                .with_retry_unit(Duration::from_millis(10)),
            http_client: HttpClientConfig::new(
                http.map_or_else(|| "http://127.0.0.1:1".to_string(), |a| format!("http://{a}")),
            ),
            ws_server: WsServerConfig::new("127.0.0.1:0", "/onebot"),
        }
    }

    /// A loopback address that was free a moment ago.
    async fn free_local_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    /// A WebSocket gateway that greets every client and then keeps reading.
    async fn greeting_gateway() -> SocketAddr {
        async fn greet_and_stay(ws: WebSocketUpgrade) -> axum::response::Response {
            ws.on_upgrade(|mut socket: WebSocket| async move {
                let _ = socket
                    .send(AxumMessage::Text(r#"{"post_type":"meta_event"}"#.into()))
                    .await;
                while let Some(Ok(_)) = socket.recv().await {}
            })
        }
        serve(Router::new().route("/ws", any(greet_and_stay))).await
    }

    async fn wait_for(manager: &ConnectionManager, connected: bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while manager.is_connected().await != connected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("connection state not reached in time");
    }

    async fn http_handle(manager: &ConnectionManager) -> Arc<HttpApiClient> {
        match manager.state.read().await.transport.clone() {
            Some(ActiveTransport::Http(client)) => client,
            _ => panic!("expected an HTTP transport"),
        }
    }

    #[tokio::test]
    async fn test_operations_before_connect() {
        let manager = ConnectionManager::new(config_for(TransportMode::HttpPoll, None));
        assert!(!manager.is_connected().await);
        assert!(manager.send("send_msg", json!({})).await.unwrap_err().is_closed());
        assert!(manager.receive().await.unwrap_err().is_closed());
        assert!(manager.group_list().await.unwrap_err().is_closed());
        assert!(manager.leave_group(1).await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_http_mode_has_no_receive() {
        let manager = ConnectionManager::new(config_for(TransportMode::HttpPoll, None));
        manager.connect().await.unwrap();
        assert!(manager.is_connected().await);

        assert!(matches!(
            manager.receive().await,
            Err(ConnError::Unsupported { mode: TransportMode::HttpPoll, .. })
        ));
        assert!(matches!(
            manager.send("get_login_info", json!({})).await,
            Err(ConnError::Unsupported { .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_is_idempotent_and_same_mode_switch_is_noop() {
        let manager = ConnectionManager::new(config_for(TransportMode::HttpPoll, None));
        manager.connect().await.unwrap();
        let before = http_handle(&manager).await;

        manager.connect().await.unwrap();
        manager.switch_mode(TransportMode::HttpPoll).await.unwrap();

        assert!(Arc::ptr_eq(&before, &http_handle(&manager).await));
        assert_eq!(manager.mode().await, TransportMode::HttpPoll);
    }

    #[tokio::test]
    async fn test_switch_mode_is_atomic_with_send() {
        let gateway = http_gateway().await;
        let manager = Arc::new(ConnectionManager::new(config_for(
            TransportMode::HttpPoll,
            Some(gateway),
        )));
        manager.connect().await.unwrap();

        let senders: Vec<_> = (0..20)
            .map(|i| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    manager
                        .send("send_group_msg", json!({ "group_id": i, "message": "hi" }))
                        .await
                })
            })
            .collect();
        manager.switch_mode(TransportMode::InboundSocket).await.unwrap();

        for sender in senders {
            match sender.await.unwrap() {
                Ok(()) | Err(ConnError::ConnectionClosed) => {}
                Err(other) => panic!("send observed a half-switched transport: {other:?}"),
            }
        }
        assert_eq!(manager.mode().await, TransportMode::InboundSocket);
        assert_eq!(manager.config().await.mode, TransportMode::InboundSocket);
        assert!(manager.listen_addr().await.is_some());
    }

    #[tokio::test]
    async fn test_inbound_receive_and_connection_state() {
        let manager = ConnectionManager::new(config_for(TransportMode::InboundSocket, None));
        manager.connect().await.unwrap();
        let addr = manager.listen_addr().await.unwrap();

        assert!(!manager.is_connected().await);
        let result = tokio::time::timeout(Duration::from_millis(100), manager.receive())
            .await
            .expect("receive must fail immediately without a peer");
        assert!(result.unwrap_err().is_closed());

        let (mut peer, _) = connect_async(format!("ws://{addr}/onebot")).await.unwrap();
        wait_for(&manager, true).await;
        assert!(manager.test_connection().await.is_ok());

        peer.send(PeerMessage::Text(r#"{"post_type":"meta_event"}"#.into()))
            .await
            .unwrap();
        let frame: Value = serde_json::from_slice(&manager.receive().await.unwrap()).unwrap();
        assert_eq!(frame["post_type"], "meta_event");

        peer.close(None).await.unwrap();
        wait_for(&manager, false).await;
        assert!(manager.test_connection().await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_inbound_group_list_correlation() {
        let manager = ConnectionManager::new(config_for(TransportMode::InboundSocket, None));
        manager.connect().await.unwrap();
        let addr = manager.listen_addr().await.unwrap();
        let (mut peer, _) = connect_async(format!("ws://{addr}/onebot")).await.unwrap();
        wait_for(&manager, true).await;

        tokio::spawn(async move {
            while let Some(Ok(PeerMessage::Text(text))) = peer.next().await {
                let request: Value = serde_json::from_str(text.as_str()).unwrap();
                let mismatched = json!({ "status": "ok", "data": [{ "group_id": 9 }], "echo": "other" });
                let matching = json!({
                    "status": "ok",
                    "data": [{ "group_id": 1, "group_name": "A" }],
                    "echo": request["echo"].clone(),
                });
                peer.send(PeerMessage::Text(mismatched.to_string().into())).await.unwrap();
                peer.send(PeerMessage::Text(matching.to_string().into())).await.unwrap();
            }
        });

        let groups = manager.group_list().await.unwrap();
        assert_eq!(
            groups,
            vec![GroupInfo {
                id: 1,
                name: "A".to_string(),
                active: true
            }]
        );
        let leftover: Value = serde_json::from_slice(&manager.receive().await.unwrap()).unwrap();
        assert_eq!(leftover["echo"], "other");
    }

    #[tokio::test]
    async fn test_outbound_read_failure_releases_handle_and_reconnects() {
        async fn greet_and_hang_up(ws: WebSocketUpgrade) -> axum::response::Response {
            ws.on_upgrade(|mut socket: WebSocket| async move {
                let _ = socket
                    .send(AxumMessage::Text(r#"{"post_type":"meta_event"}"#.into()))
                    .await;
                let _ = socket.send(AxumMessage::Close(None)).await;
            })
        }
        let gateway = serve(Router::new().route("/ws", any(greet_and_hang_up))).await;

        let mut config = config_for(TransportMode::OutboundSocket, None);
        config.ws_client.url = format!("ws://{gateway}/ws");
        let manager = ConnectionManager::new(config);
        manager.connect().await.unwrap();

        assert!(manager.receive().await.is_ok());
        assert!(manager.receive().await.is_err());
        assert!(manager.state.read().await.transport.is_none());
        assert!(!manager.is_connected().await);

        manager.connect().await.unwrap();
        assert!(manager.receive().await.is_ok());
    }

    #[tokio::test]
    async fn test_outbound_dial_failure_is_max_retries() {
        let manager = ConnectionManager::new(config_for(TransportMode::OutboundSocket, None));
        assert!(matches!(
            manager.connect().await,
            Err(ConnError::MaxRetries { attempts: 1, .. })
        ));
        assert!(!manager.is_connected().await);
    }

    #[tokio::test]
    async fn test_close_cancels_dial_in_progress() {
        let mut config = config_for(TransportMode::OutboundSocket, None);
        config.ws_client = config
            .ws_client
            .with_max_retry(10)
            .with_retry_unit(Duration::from_secs(60));
        let manager = Arc::new(ConnectionManager::new(config));

        let dial = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.connect().await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.close().await;

        let result = tokio::time::timeout(Duration::from_secs(5), dial)
            .await
            .expect("dial must abort on close")
            .unwrap();
        assert!(result.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_close_then_connect_again() {
        let manager = ConnectionManager::new(config_for(TransportMode::HttpPoll, None));
        manager.connect().await.unwrap();

        manager.close().await;
        manager.close().await;
        assert!(!manager.is_connected().await);

        manager.connect().await.unwrap();
        assert!(manager.is_connected().await);
    }

    #[tokio::test]
    async fn test_reinitialize_replaces_config() {
        let manager = ConnectionManager::new(config_for(TransportMode::HttpPoll, None));
        manager.connect().await.unwrap();

        let gateway = http_gateway().await;
        manager
            .reinitialize(config_for(TransportMode::HttpPoll, Some(gateway)))
            .await
            .unwrap();

        assert_eq!(
            manager.config().await.http_client.api_url,
            format!("http://{gateway}")
        );
        manager.test_connection().await.unwrap();
        manager
            .send("send_private_msg", json!({ "user_id": 1, "message": "hi" }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_inbound_reinitialize_and_reconnect_on_same_port() {
        let addr = free_local_addr().await;
        let mut config = config_for(TransportMode::InboundSocket, None);
        config.ws_server.addr = addr.to_string();
        let url = format!("ws://{addr}/onebot");

        let manager = ConnectionManager::new(config.clone());
        manager.connect().await.unwrap();
        let (_peer, _) = connect_async(url.as_str()).await.unwrap();
        wait_for(&manager, true).await;

        manager.reinitialize(config).await.unwrap();
        assert_eq!(manager.listen_addr().await, Some(addr));
        let (_peer, _) = connect_async(url.as_str()).await.unwrap();
        wait_for(&manager, true).await;

        manager.close().await;
        manager.connect().await.unwrap();
        assert_eq!(manager.listen_addr().await, Some(addr));
        let (_peer, _) = connect_async(url.as_str()).await.unwrap();
        wait_for(&manager, true).await;
    }

    #[tokio::test]
    async fn test_switch_between_socket_modes() {
        let gateway = greeting_gateway().await;
        let mut config = config_for(TransportMode::OutboundSocket, None);
        config.ws_client.url = format!("ws://{gateway}/ws");
        let manager = ConnectionManager::new(config);

        manager.connect().await.unwrap();
        assert!(manager.receive().await.is_ok());
        assert!(manager.listen_addr().await.is_none());

        manager.switch_mode(TransportMode::InboundSocket).await.unwrap();
        let addr = manager.listen_addr().await.unwrap();
        let (mut peer, _) = connect_async(format!("ws://{addr}/onebot")).await.unwrap();
        wait_for(&manager, true).await;

        manager.switch_mode(TransportMode::OutboundSocket).await.unwrap();
        assert_eq!(manager.mode().await, TransportMode::OutboundSocket);
        assert!(manager.listen_addr().await.is_none());

        // The reverse peer was sent away with the listener.
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match peer.next().await {
                    Some(Ok(PeerMessage::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await
        .expect("reverse peer was not closed");

        let greeting: Value = serde_json::from_slice(&manager.receive().await.unwrap()).unwrap();
        assert_eq!(greeting["post_type"], "meta_event");
        assert!(manager.is_connected().await);
    }

    #[tokio::test]
    async fn test_stalled_inbound_peer_does_not_block_switch() {
        let mut config = config_for(TransportMode::InboundSocket, None);
        config.ws_server.request_timeout = Duration::from_millis(200);
        let manager = Arc::new(ConnectionManager::new(config));
        manager.connect().await.unwrap();
        let addr = manager.listen_addr().await.unwrap();
        // Never read from this peer.
        let (_peer, _) = connect_async(format!("ws://{addr}/onebot")).await.unwrap();
        wait_for(&manager, true).await;

        let flood = {
            let manager = manager.clone();
            tokio::spawn(async move {
                let message = "x".repeat(256 * 1024);
                loop {
                    let params = json!({ "group_id": 1, "message": message });
                    if let Err(e) = manager.send("send_group_msg", params).await {
                        return e;
                    }
                }
            })
        };
        tokio::time::sleep(Duration::from_millis(300)).await;

        tokio::time::timeout(Duration::from_secs(30), manager.switch_mode(TransportMode::HttpPoll))
            .await
            .expect("mode switch blocked behind a stalled send")
            .unwrap();
        // The flood ends on its first failed send, whichever transport refused it.
        tokio::time::timeout(Duration::from_secs(30), flood)
            .await
            .expect("sender never returned")
            .unwrap();
    }
}
