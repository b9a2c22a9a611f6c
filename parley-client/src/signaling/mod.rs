//! Signaling channel to the remote coordinator
//!
//! The session controller talks to the relay's coordinator through a
//! [`SignalingChannel`]: request/response exchanges via `emit`, and
//! server-pushed notifications via a broadcast subscription.

mod websocket;

use std::time::Duration;

use async_trait::async_trait;
use parley_common::protocol::{ClientRequest, ServerNotification};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

pub use websocket::WebSocketSignaling;

/// Errors raised by a signaling channel
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalingError {
    /// The coordinator could not be reached
    #[error("cannot reach signaling server: {0}")]
    Connection(String),

    /// The link was lost or closed while the request was outstanding
    #[error("signaling link closed: {0}")]
    Closed(String),

    /// No response arrived within the request timeout
    #[error("{event} timed out after {elapsed:?}")]
    Timeout { event: String, elapsed: Duration },

    /// The server answered with an error
    #[error("rejected by server: {0}")]
    Rejected(String),

    /// A frame could not be encoded or decoded
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Something that happened on the signaling link
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    /// A typed server notification
    Notification(ServerNotification),
    /// The link dropped and reconnection is in progress
    Reconnecting,
    /// The link recovered; outstanding requests were re-sent
    Reconnected,
    /// The link could not be recovered within the reconnect window
    Lost(String),
}

/// Bidirectional message connection to the coordinator
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Send a request and wait for the server's response payload
    async fn emit(&self, event: &str, payload: Value) -> Result<Value, SignalingError>;

    /// Subscribe to server notifications and link status changes
    fn subscribe(&self) -> broadcast::Receiver<SignalingEvent>;
}

/// Send a typed request and decode the typed response
///
/// # Errors
///
/// Any [`SignalingError`] from the channel, or `Protocol` when the request
/// cannot be encoded or the response has the wrong shape.
pub async fn send_request<T: DeserializeOwned>(
    channel: &dyn SignalingChannel,
    request: ClientRequest,
) -> Result<T, SignalingError> {
    let (event, payload) = request
        .into_parts()
        .map_err(|e| SignalingError::Protocol(e.to_string()))?;
    let response = channel.emit(event, payload).await?;
    serde_json::from_value(response)
        .map_err(|e| SignalingError::Protocol(format!("bad {event} response: {e}")))
}
