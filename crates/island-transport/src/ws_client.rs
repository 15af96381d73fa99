//! Outbound WebSocket client.
//!
//! Dials the gateway with linear backoff, then runs a read pump that feeds a
//! [`FrameRouter`]. The client never re-dials on its own: when the read side
//! fails, the handle is marked disconnected and `receive` reports the failure
//! so the caller can decide when to connect again.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::AUTHORIZATION};
use tokio_tungstenite::tungstenite::{Error, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use island_core::{
    ConnError, ConnResult, GroupInfo, OutboundEnvelope, WsClientConfig, parse_group_list,
};

use crate::frames::FrameRouter;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Wait after failed attempt `attempt` (zero-based): `(attempt + 1) * unit`.
pub fn backoff_delay(attempt: u32, unit: Duration) -> Duration {
    unit.saturating_mul(attempt.saturating_add(1))
}

/// Runs `dial` up to `max_retry` times with linear backoff.
///
/// Each failed attempt is followed by a wait of [`backoff_delay`]. The wait
/// races `shutdown`; if it fires the loop aborts with
/// [`ConnError::ConnectionClosed`]. Exhausting all attempts yields
/// [`ConnError::MaxRetries`] carrying the last error.
pub(crate) async fn dial_with_backoff<T, E, F, Fut>(
    max_retry: u32,
    unit: Duration,
    shutdown: &CancellationToken,
    mut dial: F,
) -> ConnResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let mut last_error = String::from("no dial attempts were made");

    for attempt in 0..max_retry {
        if shutdown.is_cancelled() {
            return Err(ConnError::ConnectionClosed);
        }

        match dial(attempt).await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                last_error = e.to_string();
                let delay = backoff_delay(attempt, unit);
                warn!(
                    attempt = attempt + 1,
                    max_retry = max_retry,
                    delay = ?delay,
                    error = %last_error,
                    "WebSocket dial failed"
                );
                tokio::select! {
                    () = shutdown.cancelled() => return Err(ConnError::ConnectionClosed),
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    Err(ConnError::MaxRetries {
        attempts: max_retry,
        last_error,
    })
}

/// Builds the upgrade request, adding the bearer token if configured.
fn client_request(config: &WsClientConfig) -> ConnResult<Request> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| ConnError::InvalidConfig(format!("invalid WebSocket URL: {e}")))?;

    if let Some(token) = config.access_token.as_deref().filter(|t| !t.is_empty()) {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| ConnError::InvalidConfig(format!("invalid access token: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    Ok(request)
}

/// State shared between the client handle and its read pump.
struct PumpState {
    frames: FrameRouter,
    connected: AtomicBool,
    /// Why the read side stopped, if it failed.
    last_error: Mutex<Option<String>>,
    shutdown: CancellationToken,
}

impl PumpState {
    /// Marks the connection dead and wakes every waiter.
    fn tear_down(&self, reason: Option<String>) {
        if let Some(reason) = reason {
            *self.last_error.lock() = Some(reason);
        }
        self.connected.store(false, Ordering::SeqCst);
        self.frames.fail_pending();
        self.shutdown.cancel();
    }
}

/// A connected outbound WebSocket.
pub struct WsClient {
    config: WsClientConfig,
    sink: AsyncMutex<WsSink>,
    state: Arc<PumpState>,
}

impl WsClient {
    /// Dials `config.url`, retrying with linear backoff.
    ///
    /// `shutdown` aborts the dial between attempts and later stops the read
    /// pump; pass a child of the owner's cancellation token.
    pub async fn connect(config: WsClientConfig, shutdown: CancellationToken) -> ConnResult<Self> {
        // Reject malformed URLs up front instead of retrying them.
        client_request(&config)?;

        info!(url = %config.url, max_retry = config.max_retry, "Connecting to WebSocket gateway");

        let stream: WsStream =
            dial_with_backoff(config.max_retry, config.retry_unit, &shutdown, |_| {
                let request = client_request(&config);
                async move {
                    let request = request.map_err(|e| e.to_string())?;
                    connect_async(request)
                        .await
                        .map(|(stream, _response)| stream)
                        .map_err(|e| e.to_string())
                }
            })
            .await?;

        info!(url = %config.url, "WebSocket gateway connected");

        let (sink, source) = stream.split();
        let state = Arc::new(PumpState {
            frames: FrameRouter::new(config.queue_capacity),
            connected: AtomicBool::new(true),
            last_error: Mutex::new(None),
            shutdown,
        });

        tokio::spawn(run_read_pump(source, state.clone(), config.url.clone()));

        Ok(Self {
            config,
            sink: AsyncMutex::new(sink),
            state,
        })
    }

    /// The gateway URL.
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Whether the read pump is still running.
    pub fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    /// Number of inbound frames dropped on a full queue.
    pub fn dropped_frames(&self) -> u64 {
        self.state.frames.dropped_frames()
    }

    /// Writes one envelope as a text frame.
    ///
    /// The write, including waiting for the sink, is bounded by the request
    /// timeout so a gateway that stops reading cannot stall the caller.
    pub async fn send(&self, envelope: &OutboundEnvelope) -> ConnResult<()> {
        if !self.is_connected() {
            return Err(ConnError::ConnectionClosed);
        }
        let text = envelope.to_text()?;

        trace!(action = %envelope.action, len = text.len(), "Sending frame");
        let after = self.config.request_timeout;
        let write = async {
            self.sink
                .lock()
                .await
                .send(Message::Text(text.into()))
                .await
                .map_err(|e| ConnError::SendFailed(e.to_string()))
        };
        tokio::time::timeout(after, write).await.map_err(|_| {
            warn!(url = %self.config.url, after = ?after, "WebSocket write stalled, send abandoned");
            ConnError::SendFailed(format!("write did not complete within {after:?}"))
        })?
    }

    /// Returns the next inbound frame, blocking until one arrives.
    ///
    /// Once the read side has failed, queued frames are still returned; after
    /// that every call fails until the caller connects again.
    pub async fn receive(&self) -> ConnResult<Vec<u8>> {
        match self.state.frames.next_frame(None, &self.state.shutdown).await {
            Err(ConnError::ConnectionClosed) => match self.state.last_error.lock().clone() {
                Some(reason) => Err(ConnError::ReceiveFailed(reason)),
                None => Err(ConnError::ConnectionClosed),
            },
            other => other,
        }
    }

    /// Requests the group list and waits for the tagged reply.
    pub async fn group_list(&self) -> ConnResult<Vec<GroupInfo>> {
        let pending = self.state.frames.register();
        let request = OutboundEnvelope::group_list().with_echo(pending.echo());
        if let Err(e) = self.send(&request).await {
            self.state.frames.forget(pending.echo());
            return Err(e);
        }

        let reply = self
            .state
            .frames
            .wait_reply(pending, self.config.request_timeout, &self.state.shutdown)
            .await?;
        parse_group_list(&reply)
    }

    /// Asks the gateway to leave a group. No reply is awaited.
    pub async fn leave_group(&self, group_id: i64) -> ConnResult<()> {
        self.send(&OutboundEnvelope::leave_group(group_id)).await
    }

    /// Stops the read pump and closes the socket.
    pub async fn close(&self) {
        self.state.tear_down(None);
        if let Err(e) = self.sink.lock().await.close().await {
            debug!(error = %e, "Error while closing WebSocket");
        }
        info!(url = %self.config.url, "WebSocket client closed");
    }
}

/// Feeds inbound frames into the router until the socket or `shutdown` ends.
async fn run_read_pump(mut source: WsSource, state: Arc<PumpState>, url: String) {
    let reason = loop {
        tokio::select! {
            () = state.shutdown.cancelled() => break None,
            msg = source.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    trace!(len = text.len(), "Received text frame");
                    state.frames.dispatch(text.as_str().as_bytes().to_vec());
                }
                Some(Ok(Message::Binary(data))) => {
                    trace!(len = data.len(), "Received binary frame");
                    state.frames.dispatch(data.to_vec());
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    info!(url = %url, "Gateway closed the WebSocket connection");
                    break Some("connection closed by gateway".to_string());
                }
                Some(Err(e)) => {
                    warn!(url = %url, error = %e, "WebSocket read error");
                    break Some(read_error_reason(&e));
                }
            }
        }
    };

    state.tear_down(reason);
}

fn read_error_reason(error: &Error) -> String {
    match error {
        Error::ConnectionClosed | Error::AlreadyClosed => "connection closed".to_string(),
        other => other.to_string(),
    }
}
