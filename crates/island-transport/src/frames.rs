//! Inbound frame routing shared by the socket transports.
//!
//! A socket carries both unsolicited events and replies to our own requests.
//! The read pump hands every frame to [`FrameRouter::dispatch`]:
//!
//! 1. If the frame is JSON with an `echo` matching a pending request, it
//!    resolves that request.
//! 2. Otherwise it is pushed onto a bounded FIFO queue drained by
//!    `receive()`. When the queue is full the frame is dropped and counted;
//!    the pump never blocks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use island_core::{ConnError, ConnResult};

/// A request waiting for its tagged reply.
///
/// Obtained from [`FrameRouter::register`] and consumed by
/// [`FrameRouter::wait_reply`].
#[derive(Debug)]
pub struct PendingReply {
    echo: String,
    rx: oneshot::Receiver<Value>,
}

impl PendingReply {
    /// The correlation tag to put on the outgoing request.
    pub fn echo(&self) -> &str {
        &self.echo
    }
}

/// Bounded inbound queue plus echo correlation.
pub struct FrameRouter {
    queue_tx: mpsc::Sender<Vec<u8>>,
    queue_rx: AsyncMutex<mpsc::Receiver<Vec<u8>>>,
    /// Pending requests: echo -> sender half of the reply channel.
    pending: Mutex<HashMap<String, oneshot::Sender<Value>>>,
    dropped: AtomicU64,
    capacity: usize,
}

impl FrameRouter {
    /// Creates a router whose queue holds at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (queue_tx, queue_rx) = mpsc::channel(capacity);
        Self {
            queue_tx,
            queue_rx: AsyncMutex::new(queue_rx),
            pending: Mutex::new(HashMap::new()),
            dropped: AtomicU64::new(0),
            capacity,
        }
    }

    /// Number of frames dropped because the queue was full.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    /// Routes one inbound frame to its waiting request or onto the queue.
    pub fn dispatch(&self, frame: Vec<u8>) {
        if self.pending.lock().is_empty() {
            self.enqueue(frame);
            return;
        }

        if let Ok(value) = serde_json::from_slice::<Value>(&frame)
            && let Some(echo) = value.get("echo").and_then(Value::as_str)
        {
            let waiter = self.pending.lock().remove(echo);
            match waiter {
                Some(tx) => {
                    trace!(echo = %echo, "Routing tagged reply to waiting request");
                    let _ = tx.send(value);
                    return;
                }
                None => debug!(echo = %echo, "Reply for unknown echo, queueing as a normal frame"),
            }
        }
        self.enqueue(frame);
    }

    /// Pushes a frame onto the queue without blocking.
    ///
    /// Returns `false` if the frame was dropped.
    pub fn enqueue(&self, frame: Vec<u8>) -> bool {
        match self.queue_tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    capacity = self.capacity,
                    dropped = dropped,
                    "Inbound queue full, dropping frame"
                );
                false
            }
            // The receiver lives as long as the router does.
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Dequeues the next frame.
    ///
    /// Waits until a frame arrives, `wait` elapses (if given) or `shutdown`
    /// fires. Frames already queued are returned before a fired `shutdown` is
    /// reported.
    pub async fn next_frame(
        &self,
        wait: Option<Duration>,
        shutdown: &CancellationToken,
    ) -> ConnResult<Vec<u8>> {
        let mut rx = tokio::select! {
            biased;
            rx = self.queue_rx.lock() => rx,
            () = shutdown.cancelled() => return Err(ConnError::ConnectionClosed),
        };

        let deadline = async {
            match wait {
                Some(after) => sleep(after).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            frame = rx.recv() => frame.ok_or(ConnError::ConnectionClosed),
            () = shutdown.cancelled() => Err(ConnError::ConnectionClosed),
            () = deadline => Err(ConnError::Timeout {
                operation: "receive",
                after: wait.unwrap_or_default(),
            }),
        }
    }

    /// Dequeues a frame if one is immediately available.
    pub fn try_next(&self) -> Option<Vec<u8>> {
        self.queue_rx.try_lock().ok()?.try_recv().ok()
    }

    /// Registers a new pending request under a fresh echo tag.
    pub fn register(&self) -> PendingReply {
        let echo = format!("island-{}", Uuid::new_v4());
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(echo.clone(), tx);
        PendingReply { echo, rx }
    }

    /// Drops a pending request, e.g. after its send failed.
    pub fn forget(&self, echo: &str) {
        self.pending.lock().remove(echo);
    }

    /// Waits for the reply to `request`.
    ///
    /// Fails with [`ConnError::Timeout`] after `after`, or with
    /// [`ConnError::ConnectionClosed`] if `shutdown` fires or the pending
    /// requests are failed by a disconnect.
    pub async fn wait_reply(
        &self,
        request: PendingReply,
        after: Duration,
        shutdown: &CancellationToken,
    ) -> ConnResult<Value> {
        let PendingReply { echo, rx } = request;

        let result = tokio::select! {
            reply = rx => reply.map_err(|_| ConnError::ConnectionClosed),
            () = shutdown.cancelled() => Err(ConnError::ConnectionClosed),
            () = sleep(after) => Err(ConnError::Timeout {
                operation: "correlated request",
                after,
            }),
        };

        if result.is_err() {
            self.forget(&echo);
        }
        result
    }

    /// Fails every pending request with [`ConnError::ConnectionClosed`].
    pub fn fail_pending(&self) {
        let mut pending = self.pending.lock();
        if !pending.is_empty() {
            debug!(count = pending.len(), "Failing pending requests");
            pending.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_full_queue_drops_overflow() {
        let router = FrameRouter::new(100);
        for i in 0..101 {
            router.dispatch(frame(json!({ "seq": i })));
        }

        assert_eq!(router.dropped_frames(), 1);

        let mut seen = Vec::new();
        while let Some(bytes) = router.try_next() {
            let value: Value = serde_json::from_slice(&bytes).unwrap();
            seen.push(value["seq"].as_i64().unwrap());
        }
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_tagged_reply_resolves_request_and_other_frames_are_kept() {
        let router = FrameRouter::new(8);
        let shutdown = CancellationToken::new();
        let request = router.register();
        let echo = request.echo().to_string();

        router.dispatch(frame(json!({ "echo": "someone-else", "data": [] })));
        router.dispatch(frame(json!({ "echo": echo.clone(), "status": "ok", "data": [] })));

        let reply = router
            .wait_reply(request, Duration::from_secs(1), &shutdown)
            .await
            .unwrap();
        assert_eq!(reply["echo"], echo.as_str());
        assert_eq!(router.pending_requests(), 0);

        let kept: Value = serde_json::from_slice(&router.try_next().unwrap()).unwrap();
        assert_eq!(kept["echo"], "someone-else");
        assert!(router.try_next().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_reply_times_out_and_forgets() {
        let router = FrameRouter::new(8);
        let request = router.register();

        let err = router
            .wait_reply(request, Duration::from_secs(10), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(router.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_fail_pending_unblocks_waiter() {
        let router = std::sync::Arc::new(FrameRouter::new(8));
        let request = router.register();

        let waiter = {
            let router = router.clone();
            tokio::spawn(async move {
                router
                    .wait_reply(request, Duration::from_secs(30), &CancellationToken::new())
                    .await
            })
        };
        tokio::task::yield_now().await;
        router.fail_pending();

        assert!(waiter.await.unwrap().unwrap_err().is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_frame_timeout_and_shutdown() {
        let router = FrameRouter::new(8);
        let shutdown = CancellationToken::new();

        let err = router
            .next_frame(Some(Duration::from_secs(1)), &shutdown)
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        shutdown.cancel();
        let err = router.next_frame(None, &shutdown).await.unwrap_err();
        assert!(err.is_closed());
    }

    #[tokio::test]
    async fn test_queued_frames_drain_before_shutdown_is_reported() {
        let router = FrameRouter::new(8);
        let shutdown = CancellationToken::new();
        router.dispatch(b"first".to_vec());
        shutdown.cancel();

        assert_eq!(router.next_frame(None, &shutdown).await.unwrap(), b"first");
        assert!(router.next_frame(None, &shutdown).await.unwrap_err().is_closed());
    }
}
