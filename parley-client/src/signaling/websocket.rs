//! WebSocket signaling channel
//!
//! One supervisor task owns the WebSocket. It writes queued request frames,
//! routes responses to their waiting callers by request id, and broadcasts
//! notifications. When the link drops it reconnects with a fixed backoff
//! until the reconnect window closes, then re-sends every request that is
//! still waiting for a response.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parley_common::MAX_SIGNALING_FRAME_SIZE;
use parley_common::protocol::{Frame, ServerNotification};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use super::{SignalingChannel, SignalingError, SignalingEvent};
use crate::config::TimeoutSettings;
use crate::constants::{OUTGOING_FRAME_CAPACITY, SIGNALING_EVENT_CAPACITY};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A request still waiting for its response
struct PendingRequest {
    /// Encoded frame, kept for re-sending after a reconnect
    text: String,
    reply: oneshot::Sender<Result<Value, SignalingError>>,
}

/// How a single link ended
enum LinkEnd {
    /// The connection dropped; reconnection should be attempted
    Dropped(String),
    /// The owning handle went away
    Shutdown,
}

/// State shared between callers and the supervisor task
struct Shared {
    url: String,
    settings: TimeoutSettings,
    next_id: AtomicU64,
    pending: Mutex<BTreeMap<u64, PendingRequest>>,
    events: broadcast::Sender<SignalingEvent>,
    /// Set once the reconnect window has elapsed
    lost: Mutex<Option<String>>,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, BTreeMap<u64, PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lost_reason(&self) -> Option<String> {
        self.lost
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Frames of all outstanding requests, oldest first
    fn pending_frames(&self) -> Vec<String> {
        self.pending().values().map(|p| p.text.clone()).collect()
    }

    /// Give up on the link: fail every outstanding request and announce the loss
    fn fail_all(&self, reason: &str) {
        *self.lost.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.to_string());

        let pending = std::mem::take(&mut *self.pending());
        for (_, request) in pending {
            let _ = request
                .reply
                .send(Err(SignalingError::Connection(reason.to_string())));
        }

        let _ = self.events.send(SignalingEvent::Lost(reason.to_string()));
    }

    fn handle_text(&self, text: &str) {
        if text.len() > MAX_SIGNALING_FRAME_SIZE {
            warn!(
                len = text.len(),
                max = MAX_SIGNALING_FRAME_SIZE,
                "dropping oversized signaling frame"
            );
            return;
        }

        let frame = match serde_json::from_str::<Frame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "dropping malformed signaling frame");
                return;
            }
        };

        match frame {
            Frame::Response { id, data, error } => {
                let Some(request) = self.pending().remove(&id) else {
                    debug!(id, "response for unknown or expired request");
                    return;
                };
                let result = match error {
                    Some(reason) => Err(SignalingError::Rejected(reason)),
                    None => Ok(data),
                };
                let _ = request.reply.send(result);
            }
            Frame::Notification { event, data } => {
                match ServerNotification::from_parts(&event, data) {
                    Ok(notification) => {
                        debug!(%event, "signaling notification");
                        let _ = self.events.send(SignalingEvent::Notification(notification));
                    }
                    Err(e) => warn!(%event, error = %e, "dropping malformed notification"),
                }
            }
            Frame::Request { id, event, .. } => {
                warn!(id, %event, "server sent a request frame; ignoring");
            }
        }
    }
}

/// Signaling channel over a WebSocket with automatic reconnection
pub struct WebSocketSignaling {
    shared: Arc<Shared>,
    outgoing: mpsc::Sender<String>,
    supervisor: JoinHandle<()>,
}

impl WebSocketSignaling {
    /// Connect to the coordinator at `url`
    ///
    /// # Arguments
    /// * `url` - WebSocket URL (`ws://` or `wss://`)
    /// * `settings` - Connect, request, and reconnect bounds
    ///
    /// # Returns
    /// * `Ok(WebSocketSignaling)` - Connected channel with its supervisor running
    /// * `Err(SignalingError::Connection)` - Server unreachable within the connect timeout
    pub async fn connect(url: &str, settings: TimeoutSettings) -> Result<Self, SignalingError> {
        let stream = open(url, settings.connect()).await?;
        info!(%url, "signaling connected");

        let (events, _) = broadcast::channel(SIGNALING_EVENT_CAPACITY);
        let (outgoing, outgoing_rx) = mpsc::channel(OUTGOING_FRAME_CAPACITY);

        let shared = Arc::new(Shared {
            url: url.to_string(),
            settings,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(BTreeMap::new()),
            events,
            lost: Mutex::new(None),
        });

        let supervisor = tokio::spawn(supervise(Arc::clone(&shared), stream, outgoing_rx));

        Ok(Self {
            shared,
            outgoing,
            supervisor,
        })
    }

    /// URL this channel connects to
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    async fn exchange(
        &self,
        text: String,
        reply: oneshot::Receiver<Result<Value, SignalingError>>,
    ) -> Result<Value, SignalingError> {
        self.outgoing
            .send(text)
            .await
            .map_err(|_| SignalingError::Closed("signaling writer stopped".to_string()))?;
        match reply.await {
            Ok(result) => result,
            Err(_) => Err(SignalingError::Closed(
                "request dropped by signaling supervisor".to_string(),
            )),
        }
    }
}

impl Drop for WebSocketSignaling {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

#[async_trait]
impl SignalingChannel for WebSocketSignaling {
    async fn emit(&self, event: &str, payload: Value) -> Result<Value, SignalingError> {
        if let Some(reason) = self.shared.lost_reason() {
            return Err(SignalingError::Closed(reason));
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = Frame::Request {
            id,
            event: event.to_string(),
            data: payload,
        };
        let text =
            serde_json::to_string(&frame).map_err(|e| SignalingError::Protocol(e.to_string()))?;
        if text.len() > MAX_SIGNALING_FRAME_SIZE {
            return Err(SignalingError::Protocol(format!(
                "{event} request is {} bytes (max {MAX_SIGNALING_FRAME_SIZE})",
                text.len()
            )));
        }

        let (reply, reply_rx) = oneshot::channel();
        self.shared.pending().insert(
            id,
            PendingRequest {
                text: text.clone(),
                reply,
            },
        );
        debug!(id, %event, "signaling request");

        let timeout = self.shared.settings.request();
        let result = match tokio::time::timeout(timeout, self.exchange(text, reply_rx)).await {
            Ok(result) => result,
            Err(_) => Err(SignalingError::Timeout {
                event: event.to_string(),
                elapsed: timeout,
            }),
        };

        if result.is_err() {
            self.shared.pending().remove(&id);
        }
        result
    }

    fn subscribe(&self) -> broadcast::Receiver<SignalingEvent> {
        self.shared.events.subscribe()
    }
}

// =============================================================================
// Supervisor
// =============================================================================

async fn open(url: &str, timeout: Duration) -> Result<WsStream, SignalingError> {
    match tokio::time::timeout(timeout, connect_async(url)).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(SignalingError::Connection(e.to_string())),
        Err(_) => Err(SignalingError::Connection(format!(
            "connect timed out after {timeout:?}"
        ))),
    }
}

async fn supervise(
    shared: Arc<Shared>,
    mut stream: WsStream,
    mut outgoing: mpsc::Receiver<String>,
) {
    let mut resend = Vec::new();

    loop {
        let reason = match run_link(&shared, stream, &mut outgoing, resend).await {
            LinkEnd::Dropped(reason) => reason,
            LinkEnd::Shutdown => return,
        };

        warn!(%reason, "signaling link dropped, reconnecting");
        let _ = shared.events.send(SignalingEvent::Reconnecting);

        match reconnect(&shared).await {
            Some(next) => {
                // Anything queued while offline is still pending and goes out below
                while outgoing.try_recv().is_ok() {}
                resend = shared.pending_frames();
                info!(resent = resend.len(), "signaling link restored");
                stream = next;
                let _ = shared.events.send(SignalingEvent::Reconnected);
            }
            None => {
                let reason = format!("reconnect window elapsed after: {reason}");
                warn!(%reason, "signaling link lost");
                shared.fail_all(&reason);
                return;
            }
        }
    }
}

async fn run_link(
    shared: &Shared,
    stream: WsStream,
    outgoing: &mut mpsc::Receiver<String>,
    resend: Vec<String>,
) -> LinkEnd {
    let (mut write, mut read) = stream.split();

    for text in resend {
        if let Err(e) = write.send(Message::text(text)).await {
            return LinkEnd::Dropped(format!("resend failed: {e}"));
        }
    }

    loop {
        tokio::select! {
            queued = outgoing.recv() => {
                let Some(text) = queued else {
                    let _ = write.send(Message::Close(None)).await;
                    return LinkEnd::Shutdown;
                };
                if let Err(e) = write.send(Message::text(text)).await {
                    return LinkEnd::Dropped(format!("send failed: {e}"));
                }
            }
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => shared.handle_text(text.as_str()),
                Some(Ok(Message::Binary(data))) => {
                    warn!(len = data.len(), "ignoring binary signaling frame");
                }
                Some(Ok(Message::Close(_))) | None => {
                    return LinkEnd::Dropped("closed by server".to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return LinkEnd::Dropped(e.to_string()),
            }
        }
    }
}

async fn reconnect(shared: &Shared) -> Option<WsStream> {
    let deadline = Instant::now() + shared.settings.reconnect_window();
    let mut attempt = 0u32;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        tokio::time::sleep(shared.settings.reconnect_backoff().min(remaining)).await;

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }

        attempt += 1;
        match open(&shared.url, shared.settings.connect().min(remaining)).await {
            Ok(stream) => return Some(stream),
            Err(e) => debug!(attempt, error = %e, "reconnect attempt failed"),
        }
    }
}
