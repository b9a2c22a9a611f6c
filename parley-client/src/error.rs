//! Public error taxonomy of the voice session manager

use parley_common::validators::ChannelError;
use thiserror::Error;

use crate::media::MediaError;
use crate::session::SessionPhase;
use crate::signaling::SignalingError;

/// Negotiation step a [`VoiceError::TransportConnect`] belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStep {
    /// Waiting for the server's capability advertisement
    Capabilities,
    /// Waiting for the server to create the outbound transport
    OutboundParams,
    /// Forwarding DTLS parameters for the outbound transport
    ConnectOutbound,
    /// Publishing the local producer
    Publish,
    /// Registering channel membership
    JoinChannel,
    /// Waiting for the server to create an inbound transport
    InboundParams,
    /// Forwarding DTLS parameters for an inbound transport
    ConnectInbound,
    /// Swapping the producer track after a device switch
    ReplaceTrack,
}

impl std::fmt::Display for ConnectStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectStep::Capabilities => "capabilities advertisement",
            ConnectStep::OutboundParams => "outbound transport params",
            ConnectStep::ConnectOutbound => "outbound transport connect",
            ConnectStep::Publish => "publish",
            ConnectStep::JoinChannel => "join channel",
            ConnectStep::InboundParams => "inbound transport params",
            ConnectStep::ConnectInbound => "inbound transport connect",
            ConnectStep::ReplaceTrack => "replace track",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by [`crate::session::SessionController`]
#[derive(Debug, Clone, Error)]
pub enum VoiceError {
    /// Microphone permission denied or device unavailable
    #[error("media access failed: {0}")]
    MediaAccess(#[from] MediaError),

    /// Local runtime cannot satisfy the server's capabilities
    #[error("unsupported capabilities: {0}")]
    UnsupportedCapabilities(String),

    /// A signaling round-trip for a transport step was rejected or timed out
    #[error("transport connect failed during {step}: {reason}")]
    TransportConnect { step: ConnectStep, reason: String },

    /// One remote producer could not be consumed
    #[error("cannot consume producer {producer_id}: {reason}")]
    Consume { producer_id: String, reason: String },

    /// Signaling channel unreachable
    #[error("connection error: {0}")]
    Connection(String),

    /// Operation not valid in the current session phase
    #[error("{operation} is not valid while {phase}")]
    InvalidState {
        operation: &'static str,
        phase: SessionPhase,
    },

    /// Channel id failed validation
    #[error("invalid channel id: {0}")]
    InvalidChannel(#[from] ChannelError),

    /// Join attempt was superseded by a leave
    #[error("join cancelled")]
    Cancelled,
}

impl VoiceError {
    /// Map a signaling failure of a transport step into the taxonomy
    ///
    /// Link loss stays a connection error; rejections and timeouts belong to
    /// the step that issued the request.
    pub fn from_signaling(step: ConnectStep, err: SignalingError) -> Self {
        match err {
            SignalingError::Connection(reason) | SignalingError::Closed(reason) => {
                VoiceError::Connection(reason)
            }
            other => VoiceError::TransportConnect {
                step,
                reason: other.to_string(),
            },
        }
    }

    pub(crate) fn transport(step: ConnectStep, reason: impl Into<String>) -> Self {
        VoiceError::TransportConnect {
            step,
            reason: reason.into(),
        }
    }
}
