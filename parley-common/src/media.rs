//! Media parameter descriptions exchanged during negotiation
//!
//! These types describe what a party can send or receive (capabilities),
//! how a concrete stream is encoded (RTP parameters), and how a transport
//! is reached and secured (ICE and DTLS parameters). Field names follow the
//! camelCase convention of the relay server's JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Constants
// =============================================================================

/// Sample rate for voice audio (48kHz, required by Opus)
pub const VOICE_SAMPLE_RATE: u32 = 48000;

/// Channel count Opus advertises in RTP capabilities
pub const OPUS_CHANNELS: u16 = 2;

/// MIME type of the Opus audio codec
pub const OPUS_MIME_TYPE: &str = "audio/opus";

/// Header extension URI carrying per-packet audio levels
pub const AUDIO_LEVEL_EXTENSION_URI: &str = "urn:ietf:params:rtp-hdrext:ssrc-audio-level";

/// Fingerprint algorithm used for DTLS certificates
pub const DTLS_FINGERPRINT_ALGORITHM: &str = "sha-256";

// =============================================================================
// Media Kind
// =============================================================================

/// Kind of media carried by a track, producer, or consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

// =============================================================================
// RTP Capabilities
// =============================================================================

/// One codec a party is able to send or receive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    /// MIME type such as `audio/opus`
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_payload_type: Option<u8>,
    pub clock_rate: u32,
    /// Channel count (absent means mono)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
    /// Codec-specific format parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

impl RtpCodecCapability {
    /// Channel count with the mono default applied
    pub fn channel_count(&self) -> u16 {
        self.channels.unwrap_or(1)
    }

    /// Whether two codec descriptions refer to the same codec configuration
    ///
    /// MIME types compare case-insensitively; clock rate and channel count
    /// must be equal.
    pub fn matches(&self, other: &RtpCodecCapability) -> bool {
        self.kind == other.kind
            && self.mime_type.eq_ignore_ascii_case(&other.mime_type)
            && self.clock_rate == other.clock_rate
            && self.channel_count() == other.channel_count()
    }
}

/// RTCP feedback mechanism supported by a codec
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RtcpFeedback {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parameter: String,
}

/// RTP header extension a party understands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpHeaderExtension {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MediaKind>,
    pub uri: String,
    pub preferred_id: u16,
}

/// Full capability description of a party
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCapabilities {
    #[serde(default)]
    pub codecs: Vec<RtpCodecCapability>,
    #[serde(default)]
    pub header_extensions: Vec<RtpHeaderExtension>,
}

impl RtpCapabilities {
    /// Capabilities of a client that can only do Opus audio
    pub fn opus_only() -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert("useinbandfec".to_string(), Value::from(1));

        Self {
            codecs: vec![RtpCodecCapability {
                kind: MediaKind::Audio,
                mime_type: OPUS_MIME_TYPE.to_string(),
                preferred_payload_type: Some(111),
                clock_rate: VOICE_SAMPLE_RATE,
                channels: Some(OPUS_CHANNELS),
                parameters,
                rtcp_feedback: vec![RtcpFeedback {
                    kind: "transport-cc".to_string(),
                    parameter: String::new(),
                }],
            }],
            header_extensions: vec![RtpHeaderExtension {
                kind: Some(MediaKind::Audio),
                uri: AUDIO_LEVEL_EXTENSION_URI.to_string(),
                preferred_id: 1,
            }],
        }
    }

    /// Whether any codec of the given kind is present
    pub fn has_kind(&self, kind: MediaKind) -> bool {
        self.codecs.iter().any(|c| c.kind == kind)
    }
}

// =============================================================================
// RTP Parameters
// =============================================================================

/// Codec entry of a concrete RTP stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecParameters {
    pub mime_type: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u16>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rtcp_feedback: Vec<RtcpFeedback>,
}

/// Header extension negotiated for a concrete RTP stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpHeaderExtensionParameters {
    pub uri: String,
    pub id: u16,
}

/// One encoding (SSRC) of a concrete RTP stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpEncodingParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssrc: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtx: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u32>,
}

/// RTCP settings of a concrete RTP stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcpParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cname: Option<String>,
    #[serde(default = "default_true")]
    pub reduced_size: bool,
}

fn default_true() -> bool {
    true
}

/// Encoding description of a concrete RTP stream (one producer or consumer)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    #[serde(default)]
    pub codecs: Vec<RtpCodecParameters>,
    #[serde(default)]
    pub header_extensions: Vec<RtpHeaderExtensionParameters>,
    #[serde(default)]
    pub encodings: Vec<RtpEncodingParameters>,
    #[serde(default)]
    pub rtcp: RtcpParameters,
}

// =============================================================================
// Transport Parameters
// =============================================================================

/// DTLS role a transport endpoint takes in the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtlsRole {
    #[default]
    Auto,
    Client,
    Server,
}

/// Certificate fingerprint advertised for DTLS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsFingerprint {
    pub algorithm: String,
    pub value: String,
}

/// Network security parameters of one transport endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtlsParameters {
    #[serde(default)]
    pub role: DtlsRole,
    pub fingerprints: Vec<DtlsFingerprint>,
}

/// ICE credentials of the relay's transport endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceParameters {
    pub username_fragment: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ice_lite: Option<bool>,
}

/// ICE candidate of the relay's transport endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub foundation: String,
    pub priority: u32,
    pub ip: String,
    pub port: u16,
    pub protocol: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Parameters the server sends when it has created a transport for us
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams {
    /// Server-assigned transport identifier
    pub id: String,
    pub ice_parameters: IceParameters,
    #[serde(default)]
    pub ice_candidates: Vec<IceCandidate>,
    pub dtls_parameters: DtlsParameters,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_matches_ignores_mime_case() {
        let ours = RtpCapabilities::opus_only().codecs.remove(0);
        let mut theirs = ours.clone();
        theirs.mime_type = "AUDIO/OPUS".to_string();
        theirs.preferred_payload_type = Some(100);
        assert!(ours.matches(&theirs));
    }

    #[test]
    fn test_codec_mismatch_on_channels() {
        let ours = RtpCapabilities::opus_only().codecs.remove(0);
        let mut theirs = ours.clone();
        theirs.channels = None;
        assert!(!ours.matches(&theirs));
        assert_eq!(theirs.channel_count(), 1);
    }

    #[test]
    fn test_capabilities_parse_server_json() {
        let json = r#"{
            "codecs": [
                {"kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2,
                 "preferredPayloadType": 100, "parameters": {"minptime": 10}}
            ],
            "headerExtensions": [
                {"kind": "audio", "uri": "urn:ietf:params:rtp-hdrext:ssrc-audio-level", "preferredId": 10}
            ]
        }"#;
        let caps: RtpCapabilities = serde_json::from_str(json).expect("parse");
        assert!(caps.has_kind(MediaKind::Audio));
        assert!(!caps.has_kind(MediaKind::Video));
        assert_eq!(caps.codecs[0].preferred_payload_type, Some(100));
        assert_eq!(caps.header_extensions[0].preferred_id, 10);
    }

    #[test]
    fn test_transport_params_wire_names() {
        let params = TransportParams {
            id: "t-1".to_string(),
            ice_parameters: IceParameters {
                username_fragment: "ufrag".to_string(),
                password: "pwd".to_string(),
                ice_lite: Some(true),
            },
            ice_candidates: vec![IceCandidate {
                foundation: "udpcandidate".to_string(),
                priority: 1076302079,
                ip: "10.0.0.1".to_string(),
                port: 40000,
                protocol: "udp".to_string(),
                kind: "host".to_string(),
            }],
            dtls_parameters: DtlsParameters {
                role: DtlsRole::Auto,
                fingerprints: vec![],
            },
        };

        let value = serde_json::to_value(&params).expect("serialize");
        assert_eq!(value["iceParameters"]["usernameFragment"], "ufrag");
        assert_eq!(value["iceCandidates"][0]["type"], "host");
        assert_eq!(value["dtlsParameters"]["role"], "auto");
    }

    #[test]
    fn test_rtcp_reduced_size_defaults_on() {
        let params: RtpParameters = serde_json::from_str(r#"{"codecs": []}"#).expect("parse");
        assert!(params.rtcp.reduced_size);
        assert!(params.encodings.is_empty());
    }
}
