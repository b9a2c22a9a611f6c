//! Session phases, the per-join session object, and status snapshots

use std::collections::HashMap;
use std::sync::Arc;

use parley_common::media::{RtpCapabilities, TransportParams};
use parley_common::protocol::RemotePublication;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::config::DeviceSelection;
use crate::error::VoiceError;
use crate::media::{AudioTrack, DtlsIdentity};
use crate::negotiator::{CapabilityNegotiator, LocalCapabilities};
use crate::registry::Registry;
use crate::transport::{InboundTransport, InboundTransportPool, OutboundTransport, TransportState};

// =============================================================================
// Phase
// =============================================================================

/// Lifecycle phase of the session controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    Joining,
    Joined,
    Leaving,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Joining => "joining",
            SessionPhase::Joined => "joined",
            SessionPhase::Leaving => "leaving",
        };
        f.write_str(name)
    }
}

/// Identifies one join attempt
///
/// Work started for an attempt only mutates the session while the session
/// still carries the same token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct AttemptToken(Uuid);

impl AttemptToken {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

// =============================================================================
// Events & Status
// =============================================================================

/// Something the UI layer may want to react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    PhaseChanged(SessionPhase),
    /// One remote producer could not be consumed; the session continues
    ConsumeFailed { producer_id: String, reason: String },
    /// The signaling link dropped and is reconnecting
    ConnectionDegraded,
    /// The signaling link recovered
    ConnectionRestored,
    /// The session was torn down without a call to `leave`
    ForcedLeave { reason: String },
}

/// Point-in-time view of the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub phase: SessionPhase,
    pub channel_id: Option<String>,
    pub muted: bool,
    pub deafened: bool,
    pub outbound_state: TransportState,
    pub producer_id: Option<String>,
    /// Remote producer ids with an active consumer, sorted
    pub consumers: Vec<String>,
    pub devices: DeviceSelection,
}

// =============================================================================
// Session
// =============================================================================

/// Everything owned by one channel membership
///
/// Created by `join`, dismantled by the release routine. Only the
/// controller touches it, always under its lock.
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) token: AttemptToken,
    pub(crate) channel_id: String,
    pub(crate) muted: bool,
    pub(crate) deafened: bool,
    /// Generated together with the outbound transport
    pub(crate) identity: Option<DtlsIdentity>,
    pub(crate) negotiator: CapabilityNegotiator,
    pub(crate) capabilities: Option<Arc<LocalCapabilities>>,
    /// Microphone track acquired but not yet handed to a producer
    pub(crate) capture: Option<AudioTrack>,
    pub(crate) outbound: Option<OutboundTransport>,
    pub(crate) pool: InboundTransportPool,
    pub(crate) registry: Registry,
    /// Announcements received while joining
    pub(crate) deferred: Vec<RemotePublication>,
    /// In-flight consumptions by producer id
    pub(crate) consuming: HashMap<String, AbortHandle>,
    /// Why the session was torn down, once it was
    cancel: watch::Sender<Option<VoiceError>>,
}

impl Session {
    pub(crate) fn new(channel_id: String) -> Self {
        Self {
            token: AttemptToken::new(),
            channel_id,
            muted: false,
            deafened: false,
            identity: None,
            negotiator: CapabilityNegotiator::new(),
            capabilities: None,
            capture: None,
            outbound: None,
            pool: InboundTransportPool::new(),
            registry: Registry::new(),
            deferred: Vec::new(),
            consuming: HashMap::new(),
            cancel: watch::Sender::new(None),
        }
    }

    /// Carries the teardown reason once the session is torn down
    pub(crate) fn cancelled(&self) -> watch::Receiver<Option<VoiceError>> {
        self.cancel.subscribe()
    }

    /// Whether `producer_id` is already consumed or being consumed
    pub(crate) fn tracks_producer(&self, producer_id: &str) -> bool {
        self.registry.contains(producer_id)
            || self.consuming.contains_key(producer_id)
            || self.deferred.iter().any(|p| p.producer_id == producer_id)
    }

    /// Load capabilities and adopt inbound params queued before them
    pub(crate) fn load_capabilities(
        &mut self,
        server: &RtpCapabilities,
        queued: Vec<TransportParams>,
    ) -> Result<Arc<LocalCapabilities>, VoiceError> {
        let caps = self.negotiator.load(server)?;
        for params in queued {
            self.pool.insert(InboundTransport::create(params, &caps));
        }
        self.capabilities = Some(Arc::clone(&caps));
        Ok(caps)
    }

    /// Adopt inbound transport params, handing them back while capabilities
    /// are not loaded yet
    pub(crate) fn adopt_inbound(&mut self, params: TransportParams) -> Result<(), TransportParams> {
        match &self.capabilities {
            Some(caps) => {
                self.pool.insert(InboundTransport::create(params, caps));
                Ok(())
            }
            None => Err(params),
        }
    }

    /// Fire the cancellation signal and abort in-flight consumptions
    ///
    /// The first reason sticks.
    pub(crate) fn cancel(&mut self, reason: VoiceError) {
        self.cancel.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        for (_, handle) in self.consuming.drain() {
            handle.abort();
        }
    }
}
