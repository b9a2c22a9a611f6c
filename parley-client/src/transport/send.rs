//! Outbound transport and the local producer

use parley_common::media::{DtlsRole, MediaKind, RtpParameters, TransportParams};
use parley_common::protocol::{ConnectTransport, PublishRequest};
use tracing::debug;

use super::TransportState;
use crate::error::{ConnectStep, VoiceError};
use crate::media::{AudioTrack, DtlsIdentity};
use crate::negotiator::LocalCapabilities;

// =============================================================================
// Producer
// =============================================================================

/// The local audio publication
#[derive(Debug)]
pub struct Producer {
    id: String,
    track: AudioTrack,
    rtp_parameters: RtpParameters,
}

impl Producer {
    /// Server-assigned producer id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Capture track currently feeding the publication
    pub fn track(&self) -> &AudioTrack {
        &self.track
    }

    pub fn rtp_parameters(&self) -> &RtpParameters {
        &self.rtp_parameters
    }

    /// Swap the capture track without renegotiating
    ///
    /// The new track inherits the old track's enabled flag. Returns the old
    /// track, still live; the caller stops it.
    pub fn replace_track(&mut self, track: AudioTrack) -> AudioTrack {
        track.set_enabled(self.track.is_enabled());
        std::mem::replace(&mut self.track, track)
    }

    fn close(&self) {
        self.track.stop();
    }
}

// =============================================================================
// Outbound Transport
// =============================================================================

/// The single local-to-server media path
#[derive(Debug)]
pub struct OutboundTransport {
    params: TransportParams,
    state: TransportState,
    producer: Option<Producer>,
}

impl OutboundTransport {
    /// Instantiate from the server's transport parameters
    ///
    /// Taking the negotiated capabilities makes it impossible to create a
    /// transport before negotiation has completed.
    pub fn create(params: TransportParams, _capabilities: &LocalCapabilities) -> Self {
        debug!(transport = %params.id, "outbound transport created");
        Self {
            params,
            state: TransportState::Created,
            producer: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.params.id
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn params(&self) -> &TransportParams {
        &self.params
    }

    pub fn producer(&self) -> Option<&Producer> {
        self.producer.as_ref()
    }

    pub fn producer_mut(&mut self) -> Option<&mut Producer> {
        self.producer.as_mut()
    }

    /// Network parameters to forward on `connect-outbound-transport`
    pub fn connect_request(&self, identity: &DtlsIdentity) -> Result<ConnectTransport, VoiceError> {
        self.expect_state(TransportState::Created, ConnectStep::ConnectOutbound)?;
        Ok(ConnectTransport {
            transport_id: self.params.id.clone(),
            dtls_parameters: identity.dtls_parameters(DtlsRole::Client),
        })
    }

    /// Server acknowledged the connect request
    pub fn on_connected(&mut self) -> Result<(), VoiceError> {
        self.expect_state(TransportState::Created, ConnectStep::ConnectOutbound)?;
        self.state = TransportState::Connected;
        debug!(transport = %self.params.id, "outbound transport connected");
        Ok(())
    }

    /// Publication request for a capture track
    pub fn publish_request(
        &self,
        capabilities: &LocalCapabilities,
        cname: &str,
    ) -> Result<PublishRequest, VoiceError> {
        self.expect_state(TransportState::Connected, ConnectStep::Publish)?;
        Ok(PublishRequest {
            transport_id: self.params.id.clone(),
            kind: MediaKind::Audio,
            rtp_parameters: capabilities.publish_parameters(cname),
        })
    }

    /// Server returned a producer id; the local producer becomes active
    pub fn activate_producer(
        &mut self,
        producer_id: String,
        track: AudioTrack,
        rtp_parameters: RtpParameters,
    ) -> Result<&Producer, VoiceError> {
        if let Err(e) = self.expect_state(TransportState::Connected, ConnectStep::Publish) {
            track.stop();
            return Err(e);
        }
        self.state = TransportState::Producing;
        debug!(transport = %self.params.id, producer = %producer_id, "producer active");
        Ok(&*self.producer.insert(Producer {
            id: producer_id,
            track,
            rtp_parameters,
        }))
    }

    /// Tear down the transport and its producer
    ///
    /// Idempotent: closing a closed transport does nothing.
    pub fn close(&mut self) {
        if self.state == TransportState::Closed {
            return;
        }
        if let Some(producer) = self.producer.take() {
            producer.close();
        }
        self.state = TransportState::Closed;
        debug!(transport = %self.params.id, "outbound transport closed");
    }

    fn expect_state(&self, expected: TransportState, step: ConnectStep) -> Result<(), VoiceError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(VoiceError::transport(
                step,
                format!("outbound transport is {}, expected {expected}", self.state),
            ))
        }
    }
}
