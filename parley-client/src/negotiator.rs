//! Capability negotiation
//!
//! Reconciles what the local runtime can do with what the relay router
//! advertises. The result, [`LocalCapabilities`], is computed once per
//! session and is immutable afterwards; every transport, publication, and
//! consumption is checked against it.

use std::sync::Arc;

use parley_common::media::{
    MediaKind, RtcpParameters, RtpCapabilities, RtpCodecCapability, RtpCodecParameters,
    RtpEncodingParameters, RtpHeaderExtension, RtpHeaderExtensionParameters, RtpParameters,
};
use parley_common::protocol::ConsumeParams;
use parley_common::validators::validate_identifier;
use rand::RngExt;
use tracing::{debug, info};

use crate::error::VoiceError;
use crate::media::AudioTrack;

/// Payload type used when the server leaves a codec without one
const FALLBACK_PAYLOAD_TYPE: u8 = 111;

/// Media section id of the single outbound audio stream
const PUBLISH_MID: &str = "0";

// =============================================================================
// Local Capabilities
// =============================================================================

/// Negotiated capabilities of the local client
#[derive(Debug, Clone, PartialEq)]
pub struct LocalCapabilities {
    /// Intersection of local and server capabilities, in server terms
    pub rtp_capabilities: RtpCapabilities,
    /// Codec used for the local publication
    pub send_codec: RtpCodecCapability,
}

impl LocalCapabilities {
    /// Whether a codec of a remote stream can be received locally
    pub fn can_receive(&self, codec: &RtpCodecParameters) -> bool {
        self.rtp_capabilities.codecs.iter().any(|c| {
            c.mime_type.eq_ignore_ascii_case(&codec.mime_type)
                && c.clock_rate == codec.clock_rate
                && c.channel_count() == codec.channels.unwrap_or(1)
        })
    }

    /// Whether a capture track can feed the send codec
    ///
    /// The sample rate must equal the codec clock rate and the channel count
    /// may not exceed the codec's.
    pub fn supports_track(&self, track: &AudioTrack) -> bool {
        let format = track.format();
        format.sample_rate == self.send_codec.clock_rate
            && format.channels <= self.send_codec.channel_count()
    }

    /// RTP parameters for publishing the local audio
    ///
    /// Each call draws a fresh random SSRC.
    pub fn publish_parameters(&self, cname: &str) -> RtpParameters {
        let codec = &self.send_codec;
        let header_extensions = self
            .rtp_capabilities
            .header_extensions
            .iter()
            .filter(|ext| ext.kind.is_none_or(|k| k == MediaKind::Audio))
            .map(|ext| RtpHeaderExtensionParameters {
                uri: ext.uri.clone(),
                id: ext.preferred_id,
            })
            .collect();

        let ssrc: u32 = rand::rng().random();

        RtpParameters {
            mid: Some(PUBLISH_MID.to_string()),
            codecs: vec![RtpCodecParameters {
                mime_type: codec.mime_type.clone(),
                payload_type: codec.preferred_payload_type.unwrap_or(FALLBACK_PAYLOAD_TYPE),
                clock_rate: codec.clock_rate,
                channels: codec.channels,
                parameters: codec.parameters.clone(),
                rtcp_feedback: codec.rtcp_feedback.clone(),
            }],
            header_extensions,
            encodings: vec![RtpEncodingParameters {
                ssrc: Some(ssrc),
                dtx: Some(true),
                max_bitrate: None,
            }],
            rtcp: RtcpParameters {
                cname: Some(cname.to_string()),
                reduced_size: true,
            },
        }
    }

    /// Check consumption parameters before a consumer is built
    ///
    /// # Errors
    ///
    /// Returns a description of the first violation found.
    pub fn validate_consume(
        &self,
        producer_id: &str,
        params: &ConsumeParams,
    ) -> Result<(), String> {
        validate_identifier(&params.id).map_err(|e| format!("consumer id: {e}"))?;

        if params.producer_id != producer_id {
            return Err(format!(
                "parameters are for producer {}, expected {producer_id}",
                params.producer_id
            ));
        }

        if params.kind != MediaKind::Audio {
            return Err(format!("unsupported media kind {}", params.kind));
        }

        if params.rtp_parameters.codecs.is_empty() {
            return Err("no codecs in consumption parameters".to_string());
        }

        if let Some(codec) = params
            .rtp_parameters
            .codecs
            .iter()
            .find(|c| !self.can_receive(c))
        {
            return Err(format!(
                "codec {}/{} is not supported locally",
                codec.mime_type, codec.clock_rate
            ));
        }

        Ok(())
    }
}

// =============================================================================
// Negotiator
// =============================================================================

/// Loads [`LocalCapabilities`] exactly once from the server's advertisement
#[derive(Debug)]
pub struct CapabilityNegotiator {
    runtime: RtpCapabilities,
    loaded: Option<Arc<LocalCapabilities>>,
}

impl Default for CapabilityNegotiator {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityNegotiator {
    /// Negotiator for the default runtime (Opus audio only)
    pub fn new() -> Self {
        Self::with_runtime(RtpCapabilities::opus_only())
    }

    /// Negotiator for a custom runtime capability set
    pub fn with_runtime(runtime: RtpCapabilities) -> Self {
        Self {
            runtime,
            loaded: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn loaded(&self) -> Option<&Arc<LocalCapabilities>> {
        self.loaded.as_ref()
    }

    /// Reconcile the runtime capabilities with the server's
    ///
    /// # Errors
    ///
    /// `UnsupportedCapabilities` if no audio codec matches, or if this
    /// negotiator was already loaded.
    pub fn load(
        &mut self,
        server: &RtpCapabilities,
    ) -> Result<Arc<LocalCapabilities>, VoiceError> {
        if self.loaded.is_some() {
            return Err(VoiceError::UnsupportedCapabilities(
                "capabilities were already loaded for this session".to_string(),
            ));
        }

        if !server.has_kind(MediaKind::Audio) {
            return Err(VoiceError::UnsupportedCapabilities(
                "server offers no audio codec".to_string(),
            ));
        }

        let codecs: Vec<RtpCodecCapability> = server
            .codecs
            .iter()
            .filter_map(|remote| {
                let local = self.runtime.codecs.iter().find(|c| c.matches(remote))?;
                let mut codec = remote.clone();
                for (key, value) in &local.parameters {
                    codec
                        .parameters
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }
                if codec.preferred_payload_type.is_none() {
                    codec.preferred_payload_type = local.preferred_payload_type;
                }
                Some(codec)
            })
            .collect();

        let Some(send_codec) = codecs.iter().find(|c| c.kind == MediaKind::Audio).cloned() else {
            let offered: Vec<String> = server
                .codecs
                .iter()
                .filter(|c| c.kind == MediaKind::Audio)
                .map(|c| format!("{}/{}", c.mime_type, c.clock_rate))
                .collect();
            return Err(VoiceError::UnsupportedCapabilities(format!(
                "no matching audio codec (server offers {})",
                offered.join(", ")
            )));
        };

        let header_extensions: Vec<RtpHeaderExtension> = server
            .header_extensions
            .iter()
            .filter(|remote| {
                self.runtime.header_extensions.iter().any(|local| {
                    local.uri == remote.uri
                        && (local.kind.is_none() || remote.kind.is_none() || local.kind == remote.kind)
                })
            })
            .cloned()
            .collect();

        debug!(
            codecs = codecs.len(),
            header_extensions = header_extensions.len(),
            "capabilities intersected"
        );
        info!(codec = %send_codec.mime_type, "capabilities loaded");

        let caps = Arc::new(LocalCapabilities {
            rtp_capabilities: RtpCapabilities {
                codecs,
                header_extensions,
            },
            send_codec,
        });
        self.loaded = Some(Arc::clone(&caps));
        Ok(caps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::TrackFormat;
    use parley_common::media::AUDIO_LEVEL_EXTENSION_URI;
    use serde_json::Value;
    use std::collections::BTreeMap;

    fn server_caps() -> RtpCapabilities {
        serde_json::from_value(serde_json::json!({
            "codecs": [
                {"kind": "audio", "mimeType": "audio/PCMU", "clockRate": 8000, "preferredPayloadType": 0},
                {"kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2,
                 "preferredPayloadType": 100, "parameters": {"minptime": 10}},
                {"kind": "video", "mimeType": "video/VP8", "clockRate": 90000, "preferredPayloadType": 101}
            ],
            "headerExtensions": [
                {"kind": "audio", "uri": AUDIO_LEVEL_EXTENSION_URI, "preferredId": 10},
                {"kind": "video", "uri": "urn:3gpp:video-orientation", "preferredId": 11}
            ]
        }))
        .unwrap()
    }

    fn opus_params(payload_type: u8) -> RtpCodecParameters {
        RtpCodecParameters {
            mime_type: "audio/opus".to_string(),
            payload_type,
            clock_rate: 48000,
            channels: Some(2),
            parameters: BTreeMap::new(),
            rtcp_feedback: vec![],
        }
    }

    fn consume_params(producer_id: &str) -> ConsumeParams {
        ConsumeParams {
            id: "cons-1".to_string(),
            producer_id: producer_id.to_string(),
            kind: MediaKind::Audio,
            rtp_parameters: RtpParameters {
                codecs: vec![opus_params(100)],
                ..Default::default()
            },
            participant_id: None,
            transport_id: None,
        }
    }

    #[test]
    fn test_load_intersects_with_server_terms() {
        let mut negotiator = CapabilityNegotiator::new();
        let caps = negotiator.load(&server_caps()).unwrap();

        assert_eq!(caps.rtp_capabilities.codecs.len(), 1);
        assert_eq!(caps.send_codec.preferred_payload_type, Some(100));
        // server parameters kept, local ones merged in
        assert_eq!(caps.send_codec.parameters["minptime"], Value::from(10));
        assert_eq!(caps.send_codec.parameters["useinbandfec"], Value::from(1));

        assert_eq!(caps.rtp_capabilities.header_extensions.len(), 1);
        assert_eq!(caps.rtp_capabilities.header_extensions[0].preferred_id, 10);
        assert!(negotiator.is_loaded());
    }

    #[test]
    fn test_second_load_rejected() {
        let mut negotiator = CapabilityNegotiator::new();
        negotiator.load(&server_caps()).unwrap();
        assert!(matches!(
            negotiator.load(&server_caps()),
            Err(VoiceError::UnsupportedCapabilities(_))
        ));
    }

    #[test]
    fn test_no_matching_codec() {
        let server: RtpCapabilities = serde_json::from_value(serde_json::json!({
            "codecs": [{"kind": "audio", "mimeType": "audio/PCMU", "clockRate": 8000}]
        }))
        .unwrap();
        let mut negotiator = CapabilityNegotiator::new();
        match negotiator.load(&server) {
            Err(VoiceError::UnsupportedCapabilities(reason)) => {
                assert!(reason.contains("audio/PCMU"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!negotiator.is_loaded());
    }

    #[test]
    fn test_no_audio_at_all() {
        let mut negotiator = CapabilityNegotiator::new();
        assert!(negotiator.load(&RtpCapabilities::default()).is_err());
    }

    #[test]
    fn test_publish_parameters() {
        let mut negotiator = CapabilityNegotiator::new();
        let caps = negotiator.load(&server_caps()).unwrap();

        let params = caps.publish_parameters("alice");
        assert_eq!(params.mid.as_deref(), Some("0"));
        assert_eq!(params.codecs[0].payload_type, 100);
        assert_eq!(params.encodings.len(), 1);
        assert!(params.encodings[0].ssrc.is_some());
        assert_eq!(params.encodings[0].dtx, Some(true));
        assert_eq!(params.rtcp.cname.as_deref(), Some("alice"));
        assert_eq!(params.header_extensions[0].id, 10);
    }

    #[test]
    fn test_supports_track() {
        let mut negotiator = CapabilityNegotiator::new();
        let caps = negotiator.load(&server_caps()).unwrap();

        assert!(caps.supports_track(&AudioTrack::new("mic", TrackFormat::VOICE_MONO)));
        let narrowband = AudioTrack::new(
            "mic",
            TrackFormat {
                sample_rate: 8000,
                channels: 1,
            },
        );
        assert!(!caps.supports_track(&narrowband));
        let surround = AudioTrack::new(
            "mic",
            TrackFormat {
                sample_rate: 48000,
                channels: 6,
            },
        );
        assert!(!caps.supports_track(&surround));
    }

    #[test]
    fn test_validate_consume() {
        let mut negotiator = CapabilityNegotiator::new();
        let caps = negotiator.load(&server_caps()).unwrap();

        assert!(caps.validate_consume("prod-7", &consume_params("prod-7")).is_ok());

        let mismatched = consume_params("prod-8");
        assert!(caps.validate_consume("prod-7", &mismatched).is_err());

        let mut no_id = consume_params("prod-7");
        no_id.id.clear();
        assert!(caps.validate_consume("prod-7", &no_id).is_err());

        let mut video = consume_params("prod-7");
        video.kind = MediaKind::Video;
        assert!(caps.validate_consume("prod-7", &video).is_err());

        let mut empty = consume_params("prod-7");
        empty.rtp_parameters.codecs.clear();
        assert!(caps.validate_consume("prod-7", &empty).is_err());

        let mut foreign = consume_params("prod-7");
        foreign.rtp_parameters.codecs[0].mime_type = "audio/G722".to_string();
        assert!(caps.validate_consume("prod-7", &foreign).is_err());
    }
}
