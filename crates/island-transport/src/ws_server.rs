//! Inbound (reverse) WebSocket server.
//!
//! The gateway dials us. A single axum listener serves the upgrade route; at
//! most one peer is attached at a time and a newly accepted peer replaces the
//! previous one.
//!
//! ```text
//! Idle ──start()──▶ Listening ──peer upgrade──▶ Attached
//!                      ▲                           │
//!                      └──────peer disconnect──────┘
//! any ──close() / cancellation──▶ Closed
//! ```

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    Router,
    extract::{
        ConnectInfo, Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use island_core::{
    ConnError, ConnResult, GroupInfo, OutboundEnvelope, WsServerConfig, parse_group_list,
};

use crate::frames::FrameRouter;

/// Outgoing frames buffered per peer before `send` waits.
const PEER_SEND_BUFFER: usize = 64;

/// Lifecycle of the inbound server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    /// Listener not started yet.
    Idle,
    /// Upgrade route registered, no peer.
    Listening,
    /// A peer is connected and its read pump is running.
    Attached,
    /// Terminal; cancellation fired.
    Closed,
}

impl fmt::Display for ServerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Attached => "attached",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// The currently attached gateway connection.
struct Peer {
    id: u64,
    tx: mpsc::Sender<String>,
    token: CancellationToken,
    remote: SocketAddr,
}

/// State shared between the server handle and the axum handlers.
///
/// Lock order: `peer` before `phase`.
struct Shared {
    config: WsServerConfig,
    phase: Mutex<ServerPhase>,
    peer: Mutex<Option<Peer>>,
    next_peer_id: AtomicU64,
    local_addr: Mutex<Option<SocketAddr>>,
    frames: FrameRouter,
    shutdown: CancellationToken,
}

impl Shared {
    fn phase(&self) -> ServerPhase {
        *self.phase.lock()
    }

    /// Installs a new peer, evicting the previous one.
    fn attach(&self, tx: mpsc::Sender<String>, token: CancellationToken, remote: SocketAddr) -> u64 {
        let id = self.next_peer_id.fetch_add(1, Ordering::Relaxed) + 1;

        let previous = {
            let mut peer = self.peer.lock();
            let previous = peer.replace(Peer {
                id,
                tx,
                token,
                remote,
            });
            let mut phase = self.phase.lock();
            if *phase != ServerPhase::Closed {
                *phase = ServerPhase::Attached;
            }
            previous
        };

        if let Some(old) = previous {
            info!(old_peer = %old.remote, new_peer = %remote, "Replacing attached gateway peer");
            old.token.cancel();
        }
        info!(peer_id = id, remote_addr = %remote, "Gateway peer attached");
        id
    }

    /// Removes peer `id` if it is still the attached one.
    fn detach(&self, id: u64) {
        let detached = {
            let mut peer = self.peer.lock();
            if peer.as_ref().is_some_and(|p| p.id == id) {
                let old = peer.take();
                let mut phase = self.phase.lock();
                if *phase == ServerPhase::Attached {
                    *phase = ServerPhase::Listening;
                }
                old
            } else {
                None
            }
        };

        match detached {
            Some(old) => {
                self.frames.fail_pending();
                info!(peer_id = id, remote_addr = %old.remote, "Gateway peer detached");
            }
            None => debug!(peer_id = id, "Stale peer disconnected"),
        }
    }

    fn peer_sender(&self) -> Option<mpsc::Sender<String>> {
        self.peer.lock().as_ref().map(|p| p.tx.clone())
    }

    /// Moves to `Closed` and drops the attached peer.
    fn shut(&self) {
        let previous = {
            let mut peer = self.peer.lock();
            *self.phase.lock() = ServerPhase::Closed;
            peer.take()
        };
        if let Some(old) = previous {
            old.token.cancel();
        }
        self.frames.fail_pending();
    }
}

/// Reverse WebSocket server.
pub struct WsServer {
    shared: Arc<Shared>,
    /// The accept loop; owns the listener.
    serve_task: Mutex<Option<JoinHandle<()>>>,
}

impl WsServer {
    /// Creates a server in the [`ServerPhase::Idle`] phase.
    ///
    /// `shutdown` stops the listener and the attached peer when fired.
    pub fn new(config: WsServerConfig, shutdown: CancellationToken) -> Self {
        let frames = FrameRouter::new(config.queue_capacity);
        Self {
            shared: Arc::new(Shared {
                config,
                phase: Mutex::new(ServerPhase::Idle),
                peer: Mutex::new(None),
                next_peer_id: AtomicU64::new(0),
                local_addr: Mutex::new(None),
                frames,
                shutdown,
            }),
            serve_task: Mutex::new(None),
        }
    }

    /// Creates a server and starts it.
    pub async fn bind(config: WsServerConfig, shutdown: CancellationToken) -> ConnResult<Self> {
        let server = Self::new(config, shutdown);
        server.start().await?;
        Ok(server)
    }

    /// Binds the listener and registers the upgrade route.
    ///
    /// Fails with [`ConnError::InvalidConfig`] if no path is configured.
    /// Calling it again while listening returns the bound address.
    pub async fn start(&self) -> ConnResult<SocketAddr> {
        match self.shared.phase() {
            ServerPhase::Idle => {}
            ServerPhase::Closed => return Err(ConnError::ConnectionClosed),
            ServerPhase::Listening | ServerPhase::Attached => {
                return self.local_addr().ok_or(ConnError::ConnectionClosed);
            }
        }

        let path = normalize_path(&self.shared.config.path)?;

        let listener = TcpListener::bind(&self.shared.config.addr).await?;
        let actual_addr = listener.local_addr()?;

        let router = Router::new()
            .route(&path, get(upgrade_handler))
            .with_state(self.shared.clone());

        *self.shared.local_addr.lock() = Some(actual_addr);
        {
            let mut phase = self.shared.phase.lock();
            if *phase == ServerPhase::Idle {
                *phase = ServerPhase::Listening;
            }
        }

        info!(addr = %actual_addr, path = %path, "Reverse WebSocket server listening");

        let shared = self.shared.clone();
        let task = tokio::spawn(async move {
            let server = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            );
            tokio::select! {
                result = server => {
                    if let Err(e) = result {
                        error!(error = %e, "Reverse WebSocket server error");
                    }
                }
                () = shared.shutdown.cancelled() => {
                    info!(addr = %actual_addr, "Reverse WebSocket server shutting down");
                }
            }
            shared.shut();
        });
        *self.serve_task.lock() = Some(task);

        Ok(actual_addr)
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ServerPhase {
        self.shared.phase()
    }

    /// The bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.lock()
    }

    /// True only while a peer is attached.
    pub fn is_connected(&self) -> bool {
        self.phase() == ServerPhase::Attached
    }

    /// Number of inbound frames dropped on a full queue.
    pub fn dropped_frames(&self) -> u64 {
        self.shared.frames.dropped_frames()
    }

    /// Writes one envelope to the attached peer.
    ///
    /// Waits at most the request timeout for room in the peer's send buffer,
    /// then fails with [`ConnError::SendFailed`].
    pub async fn send(&self, envelope: &OutboundEnvelope) -> ConnResult<()> {
        let tx = self.shared.peer_sender().ok_or(ConnError::ConnectionClosed)?;
        let text = envelope.to_text()?;

        trace!(action = %envelope.action, len = text.len(), "Sending frame to peer");
        let after = self.shared.config.request_timeout;
        tx.send_timeout(text, after).await.map_err(|e| match e {
            SendTimeoutError::Timeout(_) => {
                warn!(action = %envelope.action, after = ?after, "Gateway peer is not reading, send abandoned");
                ConnError::SendFailed(format!("peer send buffer stayed full for {after:?}"))
            }
            SendTimeoutError::Closed(_) => ConnError::ConnectionClosed,
        })
    }

    /// Dequeues the next inbound frame, waiting at most the receive timeout.
    ///
    /// Fails immediately with [`ConnError::ConnectionClosed`] when no peer is
    /// attached.
    pub async fn receive(&self) -> ConnResult<Vec<u8>> {
        if !self.is_connected() {
            return Err(ConnError::ConnectionClosed);
        }
        self.shared
            .frames
            .next_frame(Some(self.shared.config.receive_timeout), &self.shared.shutdown)
            .await
    }

    /// Requests the group list and waits for the reply carrying our echo.
    pub async fn group_list(&self) -> ConnResult<Vec<GroupInfo>> {
        if !self.is_connected() {
            return Err(ConnError::ConnectionClosed);
        }

        let frames = &self.shared.frames;
        let pending = frames.register();
        let request = OutboundEnvelope::group_list().with_echo(pending.echo());
        if let Err(e) = self.send(&request).await {
            frames.forget(pending.echo());
            return Err(e);
        }

        let reply = frames
            .wait_reply(pending, self.shared.config.request_timeout, &self.shared.shutdown)
            .await?;
        parse_group_list(&reply)
    }

    /// Asks the gateway to leave a group. No reply is awaited.
    pub async fn leave_group(&self, group_id: i64) -> ConnResult<()> {
        self.send(&OutboundEnvelope::leave_group(group_id)).await
    }

    /// Stops the listener and detaches the peer. The server cannot be restarted.
    ///
    /// Returns once the listening socket has been released, so the same
    /// address can be bound again immediately.
    pub async fn close(&self) {
        self.shared.shutdown.cancel();
        let task = self.serve_task.lock().take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!(error = %e, "Reverse WebSocket server task failed");
        }
        self.shared.shut();
        info!("Reverse WebSocket server closed");
    }
}

fn normalize_path(path: &str) -> ConnResult<String> {
    let path = path.trim();
    if path.is_empty() {
        return Err(ConnError::InvalidConfig(
            "reverse WebSocket path is not configured".to_string(),
        ));
    }
    Ok(if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    })
}

/// Checks the bearer header or `access_token` query parameter.
fn authorized(headers: &HeaderMap, query: &HashMap<String, String>, expected: Option<&str>) -> bool {
    let Some(expected) = expected.filter(|t| !t.is_empty()) else {
        return true;
    };

    let from_header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("Token ")))
        .map(str::trim);

    from_header == Some(expected) || query.get("access_token").map(String::as_str) == Some(expected)
}

async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(shared): State<Arc<Shared>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !authorized(&headers, &query, shared.config.access_token.as_deref()) {
        warn!(remote_addr = %remote, "Rejected gateway upgrade with a bad access token");
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if shared.shutdown.is_cancelled() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    debug!(remote_addr = %remote, "Gateway upgrade request accepted");
    ws.on_upgrade(move |socket| handle_peer(shared, socket, remote))
}

/// Runs one peer connection until it closes or is replaced.
async fn handle_peer(shared: Arc<Shared>, socket: WebSocket, remote: SocketAddr) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(PEER_SEND_BUFFER);
    let token = shared.shutdown.child_token();
    let id = shared.attach(tx, token.clone(), remote);

    let send_token = token.clone();
    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = send_token.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
                text = rx.recv() => {
                    let Some(text) = text else { break };
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        warn!(peer_id = id, "Failed to write to gateway peer, connection closed");
                        break;
                    }
                }
            }
        }
    });

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    trace!(peer_id = id, len = text.len(), "Received text frame");
                    shared.frames.dispatch(text.as_str().as_bytes().to_vec());
                }
                Some(Ok(Message::Binary(data))) => {
                    trace!(peer_id = id, len = data.len(), "Received binary frame");
                    shared.frames.dispatch(data.to_vec());
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    info!(peer_id = id, "Gateway peer closed the connection");
                    break;
                }
                Some(Err(e)) => {
                    warn!(peer_id = id, error = %e, "Gateway peer read error");
                    break;
                }
            }
        }
    }

    token.cancel();
    let _ = send_task.await;
    shared.detach(id);
}
