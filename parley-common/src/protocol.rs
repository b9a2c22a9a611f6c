//! Signaling protocol definitions for Parley voice channels
//!
//! Every WebSocket text frame carries one JSON object tagged by `type`:
//! a client `request`, the server's `response` to it, or a server-pushed
//! `notification`. Requests and notifications name their event with the
//! kebab-case identifiers below; payload fields are camelCase.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::media::{DtlsParameters, MediaKind, RtpCapabilities, RtpParameters, TransportParams};

// =============================================================================
// Event Names
// =============================================================================

/// Server advertises the relay router's capabilities
pub const EVENT_CAPABILITIES_ADVERTISED: &str = "capabilities-advertised";

/// Server created the outbound (send) transport for this client
pub const EVENT_OUTBOUND_TRANSPORT_PARAMS: &str = "outbound-transport-params";

/// Client forwards DTLS parameters for the outbound transport
pub const EVENT_CONNECT_OUTBOUND_TRANSPORT: &str = "connect-outbound-transport";

/// Client publishes its local audio; server replies with a producer id
pub const EVENT_PUBLISH: &str = "publish";

/// Server created an inbound (receive) transport for this client
pub const EVENT_INBOUND_TRANSPORT_PARAMS: &str = "inbound-transport-params";

/// Client forwards DTLS parameters for an inbound transport
pub const EVENT_CONNECT_INBOUND_TRANSPORT: &str = "connect-inbound-transport";

/// Server announces that a remote participant started publishing
pub const EVENT_REMOTE_PUBLICATION_ANNOUNCED: &str = "remote-publication-announced";

/// Server announces that a remote participant stopped publishing
pub const EVENT_REMOTE_PUBLICATION_CLOSED: &str = "remote-publication-closed";

/// Client asks to consume a remote producer
pub const EVENT_BEGIN_CONSUMING: &str = "begin-consuming";

/// Client registers membership in a voice channel
pub const EVENT_JOIN_CHANNEL: &str = "join-channel";

/// Client deregisters its voice channel membership
pub const EVENT_LEAVE_CHANNEL: &str = "leave-channel";

// =============================================================================
// Frames
// =============================================================================

/// One signaling frame as it travels over the WebSocket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Client-initiated request awaiting a response with the same id
    Request {
        id: u64,
        event: String,
        #[serde(default)]
        data: Value,
    },
    /// Server reply to a request; carries either `data` or `error`
    Response {
        id: u64,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Server-pushed message that expects no reply
    Notification {
        event: String,
        #[serde(default)]
        data: Value,
    },
}

// =============================================================================
// Server Notifications
// =============================================================================

/// Typed server-to-client notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerNotification {
    CapabilitiesAdvertised(RtpCapabilities),
    OutboundTransportParams(TransportParams),
    InboundTransportParams(TransportParams),
    RemotePublicationAnnounced(RemotePublication),
    RemotePublicationClosed(RemotePublication),
}

impl ServerNotification {
    /// Decode a notification from its event name and raw payload
    ///
    /// # Errors
    ///
    /// Returns the serde error when the event is unknown or the payload does
    /// not have the shape the event requires.
    pub fn from_parts(event: &str, data: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::json!({ "event": event, "data": data }))
    }

    /// Event name this notification travels under
    pub fn event(&self) -> &'static str {
        match self {
            ServerNotification::CapabilitiesAdvertised(_) => EVENT_CAPABILITIES_ADVERTISED,
            ServerNotification::OutboundTransportParams(_) => EVENT_OUTBOUND_TRANSPORT_PARAMS,
            ServerNotification::InboundTransportParams(_) => EVENT_INBOUND_TRANSPORT_PARAMS,
            ServerNotification::RemotePublicationAnnounced(_) => {
                EVENT_REMOTE_PUBLICATION_ANNOUNCED
            }
            ServerNotification::RemotePublicationClosed(_) => EVENT_REMOTE_PUBLICATION_CLOSED,
        }
    }

    /// Encode into a notification frame
    ///
    /// # Errors
    ///
    /// Returns the serde error if the payload cannot be represented as JSON.
    pub fn into_frame(self) -> Result<Frame, serde_json::Error> {
        let event = self.event().to_string();
        let mut value = serde_json::to_value(self)?;
        let data = value
            .get_mut("data")
            .map(Value::take)
            .unwrap_or(Value::Null);
        Ok(Frame::Notification { event, data })
    }
}

// =============================================================================
// Client Requests
// =============================================================================

/// Typed client-to-server request
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    ConnectOutboundTransport(ConnectTransport),
    Publish(PublishRequest),
    ConnectInboundTransport(ConnectTransport),
    BeginConsuming(BeginConsuming),
    JoinChannel(JoinChannel),
    LeaveChannel,
}

impl ClientRequest {
    /// Event name this request travels under
    pub fn event(&self) -> &'static str {
        match self {
            ClientRequest::ConnectOutboundTransport(_) => EVENT_CONNECT_OUTBOUND_TRANSPORT,
            ClientRequest::Publish(_) => EVENT_PUBLISH,
            ClientRequest::ConnectInboundTransport(_) => EVENT_CONNECT_INBOUND_TRANSPORT,
            ClientRequest::BeginConsuming(_) => EVENT_BEGIN_CONSUMING,
            ClientRequest::JoinChannel(_) => EVENT_JOIN_CHANNEL,
            ClientRequest::LeaveChannel => EVENT_LEAVE_CHANNEL,
        }
    }

    /// Split into the event name and JSON payload
    ///
    /// # Errors
    ///
    /// Returns the serde error if the payload cannot be represented as JSON.
    pub fn into_parts(self) -> Result<(&'static str, Value), serde_json::Error> {
        let event = self.event();
        let data = match self {
            ClientRequest::ConnectOutboundTransport(p) | ClientRequest::ConnectInboundTransport(p) => {
                serde_json::to_value(p)?
            }
            ClientRequest::Publish(p) => serde_json::to_value(p)?,
            ClientRequest::BeginConsuming(p) => serde_json::to_value(p)?,
            ClientRequest::JoinChannel(p) => serde_json::to_value(p)?,
            ClientRequest::LeaveChannel => Value::Null,
        };
        Ok((event, data))
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Network parameters forwarded when a transport asks to connect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectTransport {
    pub transport_id: String,
    pub dtls_parameters: DtlsParameters,
}

/// Publication of local media on the outbound transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRequest {
    pub transport_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

/// Server reply to `publish`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishResponse {
    /// Server-side producer identifier
    pub id: String,
}

/// Request to consume one remote producer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginConsuming {
    pub producer_id: String,
    pub rtp_capabilities: RtpCapabilities,
}

/// Server reply to `begin-consuming`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeParams {
    /// Server-side consumer identifier
    pub id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
    /// Inbound transport the consumer lives on, when the server pins one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_id: Option<String>,
}

/// Voice channel membership registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinChannel {
    pub channel_id: String,
}

/// Remote publication announced or withdrawn by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePublication {
    pub producer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
}

impl RemotePublication {
    /// Participant to report presence for (falls back to the producer id)
    pub fn participant(&self) -> &str {
        self.participant_id.as_deref().unwrap_or(&self.producer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_frame_wire_shape() {
        let frame = Frame::Request {
            id: 7,
            event: EVENT_JOIN_CHANNEL.to_string(),
            data: json!({"channelId": "voice-1"}),
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({"type": "request", "id": 7, "event": "join-channel", "data": {"channelId": "voice-1"}})
        );
    }

    #[test]
    fn test_response_frame_with_error() {
        let frame: Frame =
            serde_json::from_str(r#"{"type":"response","id":3,"error":"no such transport"}"#)
                .unwrap();
        assert_eq!(
            frame,
            Frame::Response {
                id: 3,
                data: Value::Null,
                error: Some("no such transport".to_string()),
            }
        );
    }

    #[test]
    fn test_unknown_frame_type_rejected() {
        assert!(serde_json::from_str::<Frame>(r#"{"type":"bogus","id":1}"#).is_err());
    }

    #[test]
    fn test_notification_from_parts() {
        let notification = ServerNotification::from_parts(
            EVENT_REMOTE_PUBLICATION_ANNOUNCED,
            json!({"producerId": "prod-7", "participantId": "alice"}),
        )
        .unwrap();
        match notification {
            ServerNotification::RemotePublicationAnnounced(p) => {
                assert_eq!(p.producer_id, "prod-7");
                assert_eq!(p.participant(), "alice");
            }
            other => panic!("unexpected notification: {other:?}"),
        }
    }

    #[test]
    fn test_notification_unknown_event() {
        assert!(ServerNotification::from_parts("something-else", json!({})).is_err());
    }

    #[test]
    fn test_notification_into_frame() {
        let frame = ServerNotification::RemotePublicationClosed(RemotePublication {
            producer_id: "prod-1".to_string(),
            participant_id: None,
        })
        .into_frame()
        .unwrap();
        assert_eq!(
            frame,
            Frame::Notification {
                event: EVENT_REMOTE_PUBLICATION_CLOSED.to_string(),
                data: json!({"producerId": "prod-1"}),
            }
        );
    }

    #[test]
    fn test_participant_falls_back_to_producer() {
        let publication = RemotePublication {
            producer_id: "prod-9".to_string(),
            participant_id: None,
        };
        assert_eq!(publication.participant(), "prod-9");
    }

    #[test]
    fn test_client_request_parts() {
        let (event, data) = ClientRequest::JoinChannel(JoinChannel {
            channel_id: "voice-1".to_string(),
        })
        .into_parts()
        .unwrap();
        assert_eq!(event, "join-channel");
        assert_eq!(data, json!({"channelId": "voice-1"}));

        let (event, data) = ClientRequest::LeaveChannel.into_parts().unwrap();
        assert_eq!(event, "leave-channel");
        assert!(data.is_null());
    }

    #[test]
    fn test_begin_consuming_field_names() {
        let (_, data) = ClientRequest::BeginConsuming(BeginConsuming {
            producer_id: "prod-7".to_string(),
            rtp_capabilities: RtpCapabilities::default(),
        })
        .into_parts()
        .unwrap();
        assert_eq!(data["producerId"], "prod-7");
        assert!(data["rtpCapabilities"]["codecs"].is_array());
    }
}
