//! Inbound transports and their consumers

use std::collections::BTreeMap;
use std::sync::Arc;

use parley_common::media::{DtlsRole, RtpParameters, TransportParams};
use parley_common::protocol::{ConnectTransport, ConsumeParams};
use tokio::sync::OnceCell;
use tracing::debug;

use super::TransportState;
use crate::error::{ConnectStep, VoiceError};
use crate::media::{AudioTrack, DtlsIdentity, TrackFormat};
use crate::negotiator::LocalCapabilities;

// =============================================================================
// Consumer
// =============================================================================

/// Local receiving endpoint for one remote publication
#[derive(Debug)]
pub struct Consumer {
    id: String,
    producer_id: String,
    participant_id: String,
    track: AudioTrack,
    rtp_parameters: RtpParameters,
}

impl Consumer {
    /// Build a consumer from validated consumption parameters
    pub fn new(params: ConsumeParams, participant_id: String) -> Self {
        let format = params
            .rtp_parameters
            .codecs
            .first()
            .map(|c| TrackFormat {
                sample_rate: c.clock_rate,
                channels: c.channels.unwrap_or(1),
            })
            .unwrap_or(TrackFormat::VOICE_MONO);

        Self {
            track: AudioTrack::new(params.producer_id.clone(), format),
            id: params.id,
            producer_id: params.producer_id,
            participant_id,
            rtp_parameters: params.rtp_parameters,
        }
    }

    /// Server-assigned consumer id
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn producer_id(&self) -> &str {
        &self.producer_id
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    /// Playback track handed to the UI layer
    pub fn track(&self) -> &AudioTrack {
        &self.track
    }

    pub fn rtp_parameters(&self) -> &RtpParameters {
        &self.rtp_parameters
    }

    pub fn close(&self) {
        self.track.stop();
    }
}

// =============================================================================
// Inbound Transport
// =============================================================================

/// A server-to-local media path hosting any number of consumers
#[derive(Debug)]
pub struct InboundTransport {
    params: TransportParams,
    state: TransportState,
    /// Keyed by remote producer id
    consumers: BTreeMap<String, Consumer>,
    /// Resolves once the connect round-trip has succeeded
    connect_gate: Arc<OnceCell<()>>,
}

impl InboundTransport {
    /// Instantiate from the server's transport parameters
    pub fn create(params: TransportParams, _capabilities: &LocalCapabilities) -> Self {
        debug!(transport = %params.id, "inbound transport created");
        Self {
            params,
            state: TransportState::Created,
            consumers: BTreeMap::new(),
            connect_gate: Arc::new(OnceCell::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.params.id
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == TransportState::Connected
    }

    pub(crate) fn connect_gate(&self) -> Arc<OnceCell<()>> {
        Arc::clone(&self.connect_gate)
    }

    /// Network parameters to forward on `connect-inbound-transport`
    pub fn connect_request(&self, identity: &DtlsIdentity) -> Result<ConnectTransport, VoiceError> {
        self.expect_state(TransportState::Created)?;
        Ok(ConnectTransport {
            transport_id: self.params.id.clone(),
            dtls_parameters: identity.dtls_parameters(DtlsRole::Client),
        })
    }

    /// Server acknowledged the connect request
    pub fn on_connected(&mut self) -> Result<(), VoiceError> {
        self.expect_state(TransportState::Created)?;
        self.state = TransportState::Connected;
        debug!(transport = %self.params.id, "inbound transport connected");
        Ok(())
    }

    /// Attach a consumer; the transport must be connected
    pub fn attach(&mut self, consumer: Consumer) -> Result<(), VoiceError> {
        if !self.is_connected() {
            let producer_id = consumer.producer_id.clone();
            consumer.close();
            return Err(VoiceError::Consume {
                producer_id,
                reason: format!("inbound transport {} is {}", self.params.id, self.state),
            });
        }
        if let Some(previous) = self.consumers.insert(consumer.producer_id.clone(), consumer) {
            previous.close();
        }
        Ok(())
    }

    /// Detach a consumer without closing it
    pub fn detach(&mut self, producer_id: &str) -> Option<Consumer> {
        self.consumers.remove(producer_id)
    }

    pub fn consumer(&self, producer_id: &str) -> Option<&Consumer> {
        self.consumers.get(producer_id)
    }

    pub fn consumers(&self) -> impl Iterator<Item = &Consumer> {
        self.consumers.values()
    }

    /// Close the transport and every consumer on it
    ///
    /// Returns the consumers that were closed. Idempotent.
    pub fn close(&mut self) -> Vec<Consumer> {
        if self.state == TransportState::Closed {
            return Vec::new();
        }
        self.state = TransportState::Closed;
        let consumers: Vec<Consumer> = std::mem::take(&mut self.consumers).into_values().collect();
        for consumer in &consumers {
            consumer.close();
        }
        debug!(transport = %self.params.id, closed = consumers.len(), "inbound transport closed");
        consumers
    }

    fn expect_state(&self, expected: TransportState) -> Result<(), VoiceError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(VoiceError::transport(
                ConnectStep::ConnectInbound,
                format!("inbound transport is {}, expected {expected}", self.state),
            ))
        }
    }
}
