//! Session controller
//!
//! Orchestrates join, leave, mute, deafen, and device switching on top of
//! the signaling channel, the transports, and the registry.
//!
//! All session state sits behind one `std::sync::Mutex` that is never held
//! across an `.await`. Every asynchronous step re-acquires the lock and
//! checks the join attempt token first, so work belonging to a superseded
//! attempt can never mutate the current session.
//!
//! Server notifications are consumed by a pump task:
//! - capabilities and outbound transport params are latched in `watch`
//!   channels until a join consumes them
//! - inbound transport params join the session's pool (or wait for the
//!   capabilities to load)
//! - remote publications are consumed in their own tasks, deferred while
//!   a join is still in flight

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use parley_common::media::{RtpCapabilities, TransportParams};
use parley_common::protocol::{
    BeginConsuming, ClientRequest, ConsumeParams, JoinChannel, PublishResponse,
    RemotePublication, ServerNotification,
};
use parley_common::validators::{validate_channel, validate_device_id, validate_identifier};
use serde_json::Value;
use tokio::sync::{OnceCell, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::state::{AttemptToken, Session, SessionEvent, SessionPhase, SessionStatus};
use crate::config::{ClientConfig, DeviceSelection, TimeoutSettings};
use crate::constants::{QUEUED_INBOUND_LIMIT, SESSION_EVENT_CAPACITY};
use crate::error::{ConnectStep, VoiceError};
use crate::media::{AudioDevice, AudioTrack, DeviceDirection, DtlsIdentity, MediaDevices, MediaError};
use crate::presence::{PlaybackSink, PresenceStore};
use crate::registry::RegistryEntry;
use crate::signaling::{SignalingChannel, SignalingEvent, send_request};
use crate::transport::{Consumer, OutboundTransport, TransportState};

// =============================================================================
// Shared State
// =============================================================================

#[derive(Debug, Default)]
struct ControllerState {
    phase: SessionPhase,
    session: Option<Session>,
    devices: DeviceSelection,
    /// Inbound transport params received before capabilities loaded
    queued_inbound: Vec<TransportParams>,
}

impl ControllerState {
    /// The session belonging to `token`, if it is still current
    fn session_for(&mut self, token: AttemptToken) -> Result<&mut Session, VoiceError> {
        match self.session.as_mut() {
            Some(session) if session.token == token => Ok(session),
            _ => Err(VoiceError::Cancelled),
        }
    }

    /// The session, provided the controller is joined
    fn joined_session(&mut self, operation: &'static str) -> Result<&mut Session, VoiceError> {
        let phase = self.phase;
        match self.session.as_mut() {
            Some(session) if phase == SessionPhase::Joined => Ok(session),
            _ => Err(VoiceError::InvalidState { operation, phase }),
        }
    }
}

struct Inner {
    participant_id: String,
    signaling: Arc<dyn SignalingChannel>,
    devices: Arc<dyn MediaDevices>,
    presence: Arc<dyn PresenceStore>,
    playback: Arc<dyn PlaybackSink>,
    timeouts: TimeoutSettings,
    state: Mutex<ControllerState>,
    /// Latest server capability advertisement
    capabilities: watch::Sender<Option<RtpCapabilities>>,
    /// Outbound transport params not yet consumed by a join
    outbound_params: watch::Sender<Option<TransportParams>>,
    /// Bumped whenever an inbound transport joins the pool
    pool_changed: watch::Sender<u64>,
    events: broadcast::Sender<SessionEvent>,
    notifications: Mutex<Option<broadcast::Receiver<SignalingEvent>>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(pump) = self
            .pump
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pump.abort();
        }
    }
}

// =============================================================================
// Session Controller
// =============================================================================

/// Public API of the voice session manager
///
/// Cheap to clone; clones drive the same session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    /// Create an idle controller
    ///
    /// Subscribes to the signaling channel immediately so notifications
    /// sent before [`start`](Self::start) are not lost.
    pub fn new(
        config: &ClientConfig,
        signaling: Arc<dyn SignalingChannel>,
        devices: Arc<dyn MediaDevices>,
        presence: Arc<dyn PresenceStore>,
        playback: Arc<dyn PlaybackSink>,
    ) -> Self {
        let notifications = signaling.subscribe();
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                participant_id: config.participant_id.clone(),
                signaling,
                devices,
                presence,
                playback,
                timeouts: config.timeouts.clone(),
                state: Mutex::new(ControllerState {
                    devices: config.devices.clone(),
                    ..ControllerState::default()
                }),
                capabilities: watch::Sender::new(None),
                outbound_params: watch::Sender::new(None),
                pool_changed: watch::Sender::new(0),
                events,
                notifications: Mutex::new(Some(notifications)),
                pump: Mutex::new(None),
            }),
        }
    }

    /// Spawn the notification pump
    ///
    /// Must be called from within a Tokio runtime. Calling it again does
    /// nothing; `join` calls it implicitly.
    pub fn start(&self) {
        let mut pump = self
            .inner
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if pump.is_some() {
            return;
        }
        let Some(notifications) = self
            .inner
            .notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        *pump = Some(tokio::spawn(run_pump(
            Arc::downgrade(&self.inner),
            notifications,
        )));
    }

    pub fn participant_id(&self) -> &str {
        &self.inner.participant_id
    }

    /// Subscribe to session events
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.lock().phase
    }

    /// Snapshot of the controller's current state
    pub fn status(&self) -> SessionStatus {
        let state = self.inner.lock();
        let session = state.session.as_ref();
        SessionStatus {
            phase: state.phase,
            channel_id: session.map(|s| s.channel_id.clone()),
            muted: session.is_some_and(|s| s.muted),
            deafened: session.is_some_and(|s| s.deafened),
            outbound_state: session
                .and_then(|s| s.outbound.as_ref())
                .map_or(TransportState::Uninitialized, OutboundTransport::state),
            producer_id: session
                .and_then(|s| s.registry.local_producer())
                .map(str::to_string),
            consumers: session
                .map(|s| s.registry.consumer_producer_ids())
                .unwrap_or_default(),
            devices: state.devices.clone(),
        }
    }

    /// Capture track feeding the local producer, for input level meters
    pub fn local_track(&self) -> Option<AudioTrack> {
        let state = self.inner.lock();
        state
            .session
            .as_ref()
            .and_then(|s| s.outbound.as_ref())
            .and_then(OutboundTransport::producer)
            .map(|p| p.track().clone())
    }

    /// Join a voice channel
    ///
    /// Acquires the microphone, negotiates capabilities, connects the
    /// outbound transport, publishes, and registers membership, strictly in
    /// that order. Any failure releases everything acquired so far.
    ///
    /// # Errors
    ///
    /// - `InvalidChannel` if `channel_id` fails validation
    /// - `InvalidState` unless the controller is idle
    /// - `MediaAccess` if the microphone cannot be opened
    /// - `UnsupportedCapabilities` if no audio codec can be agreed on
    /// - `TransportConnect` if a negotiation round-trip is rejected or times out
    /// - `Connection` if the signaling link is lost, including while the
    ///   join is still in flight
    /// - `Cancelled` if `leave` was called before the join completed
    pub async fn join(&self, channel_id: &str) -> Result<(), VoiceError> {
        validate_channel(channel_id)?;
        self.start();

        let inner = &self.inner;
        let (token, cancelled) = {
            let mut state = inner.lock();
            if state.phase != SessionPhase::Idle {
                return Err(VoiceError::InvalidState {
                    operation: "join",
                    phase: state.phase,
                });
            }
            let session = Session::new(channel_id.to_string());
            let handles = (session.token, session.cancelled());
            state.session = Some(session);
            inner.set_phase(&mut state, SessionPhase::Joining);
            handles
        };

        info!(channel = %channel_id, "joining voice channel");

        let result = tokio::select! {
            result = inner.negotiate(token) => result,
            reason = until_cancelled(cancelled) => Err(reason),
        };

        match result.and_then(|()| inner.commit_join(token)) {
            Ok(()) => {
                info!(channel = %channel_id, "joined voice channel");
                Ok(())
            }
            Err(e) => {
                inner.abort_join(token, &e);
                Err(e)
            }
        }
    }

    /// Leave the current channel
    ///
    /// Valid while joining or joined; a no-op when idle. Releases every
    /// track, consumer, and transport, then tells the server on a
    /// best-effort basis.
    pub async fn leave(&self) {
        let inner = &self.inner;
        let channel_id = {
            let mut state = inner.lock();
            if matches!(state.phase, SessionPhase::Idle | SessionPhase::Leaving) {
                return;
            }
            inner.set_phase(&mut state, SessionPhase::Leaving);
            let session = state.session.take();
            state.queued_inbound.clear();
            session.map(|session| {
                let channel_id = session.channel_id.clone();
                inner.release(session, VoiceError::Cancelled);
                channel_id
            })
        };

        let notified = tokio::time::timeout(
            inner.timeouts.leave(),
            send_request::<Value>(inner.signaling.as_ref(), ClientRequest::LeaveChannel),
        )
        .await;
        match notified {
            Ok(Ok(_)) => debug!("server acknowledged leave"),
            Ok(Err(e)) => warn!(error = %e, "leave-channel was not acknowledged"),
            Err(_) => warn!(timeout = ?inner.timeouts.leave(), "leave-channel timed out"),
        }

        {
            let mut state = inner.lock();
            state.queued_inbound.clear();
            inner.set_phase(&mut state, SessionPhase::Idle);
        }
        info!(channel = ?channel_id, "left voice channel");
    }

    /// Flip the local microphone mute
    ///
    /// Returns the new muted state. The producer is untouched; only the
    /// capture track's enabled flag changes.
    pub fn toggle_mute(&self) -> Result<bool, VoiceError> {
        let mut state = self.inner.lock();
        let session = state.joined_session("toggle_mute")?;
        session.muted = !session.muted;
        if let Some(producer) = session.outbound.as_ref().and_then(OutboundTransport::producer) {
            producer.track().set_enabled(!session.muted);
        }
        info!(muted = session.muted, "microphone mute toggled");
        Ok(session.muted)
    }

    /// Flip local deafen
    ///
    /// Returns the new deafened state. Consumers stay open; only their
    /// playback tracks are disabled.
    pub fn toggle_deafen(&self) -> Result<bool, VoiceError> {
        let mut state = self.inner.lock();
        let session = state.joined_session("toggle_deafen")?;
        session.deafened = !session.deafened;
        for consumer in session.pool.consumers() {
            consumer.track().set_enabled(!session.deafened);
        }
        info!(deafened = session.deafened, "deafen toggled");
        Ok(session.deafened)
    }

    /// Switch the input or output device
    ///
    /// `None` or an empty id selects the system default. Switching the input
    /// while joined swaps the producer's track in place; the old track is
    /// stopped only once the new one is live. While idle the choice is
    /// remembered for the next join.
    ///
    /// # Errors
    ///
    /// - `MediaAccess` if the device cannot be opened (the old track stays live)
    /// - `TransportConnect` if the new track does not fit the negotiated codec
    /// - `InvalidState` for an input switch while joining or leaving
    pub async fn change_device(
        &self,
        device_id: Option<&str>,
        direction: DeviceDirection,
    ) -> Result<(), VoiceError> {
        let device_id = device_id.filter(|id| !id.is_empty());
        if let Some(id) = device_id {
            validate_device_id(id).map_err(|e| MediaError::NotFound(format!("{id}: {e}")))?;
        }

        match direction {
            DeviceDirection::Output => {
                self.inner.devices.set_output_device(device_id)?;
                self.inner.lock().devices.output_device = device_id.unwrap_or_default().to_string();
                info!(device = ?device_id, "output device switched");
                Ok(())
            }
            DeviceDirection::Input => self.inner.switch_input(device_id).await,
        }
    }

    pub fn input_devices(&self) -> Result<Vec<AudioDevice>, VoiceError> {
        Ok(self.inner.devices.input_devices()?)
    }

    pub fn output_devices(&self) -> Result<Vec<AudioDevice>, VoiceError> {
        Ok(self.inner.devices.output_devices()?)
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("participant_id", &self.inner.participant_id)
            .field("phase", &self.phase())
            .finish()
    }
}

/// Resolves with the teardown reason once a session's cancellation signal
/// fires, or with `Cancelled` if the session is gone
async fn until_cancelled(mut cancelled: watch::Receiver<Option<VoiceError>>) -> VoiceError {
    match cancelled.wait_for(Option::is_some).await {
        Ok(reason) => reason.clone().unwrap_or(VoiceError::Cancelled),
        Err(_) => VoiceError::Cancelled,
    }
}

// =============================================================================
// Notification Pump
// =============================================================================

async fn run_pump(inner: Weak<Inner>, mut notifications: broadcast::Receiver<SignalingEvent>) {
    loop {
        let event = match notifications.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "notification pump lagged behind");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("signaling channel closed, notification pump stopped");
                return;
            }
        };
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.handle_signaling(event);
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_phase(&self, state: &mut ControllerState, phase: SessionPhase) {
        if state.phase != phase {
            debug!(from = %state.phase, to = %phase, "session phase changed");
            state.phase = phase;
            self.emit(SessionEvent::PhaseChanged(phase));
        }
    }

    /// Run `f` against the session of `token`, if it is still current
    fn with_session<R>(
        &self,
        token: AttemptToken,
        f: impl FnOnce(&mut Session) -> Result<R, VoiceError>,
    ) -> Result<R, VoiceError> {
        f(self.lock().session_for(token)?)
    }

    fn handle_signaling(self: &Arc<Self>, event: SignalingEvent) {
        match event {
            SignalingEvent::Notification(notification) => self.handle_notification(notification),
            SignalingEvent::Reconnecting => {
                warn!("signaling link degraded, reconnecting");
                self.emit(SessionEvent::ConnectionDegraded);
            }
            SignalingEvent::Reconnected => {
                info!("signaling link restored");
                self.emit(SessionEvent::ConnectionRestored);
            }
            SignalingEvent::Lost(reason) => self.force_leave(reason),
        }
    }

    fn handle_notification(self: &Arc<Self>, notification: ServerNotification) {
        match notification {
            ServerNotification::CapabilitiesAdvertised(caps) => {
                debug!(codecs = caps.codecs.len(), "server capabilities advertised");
                self.capabilities.send_replace(Some(caps));
            }
            ServerNotification::OutboundTransportParams(params) => {
                debug!(transport = %params.id, "outbound transport params received");
                self.outbound_params.send_replace(Some(params));
            }
            ServerNotification::InboundTransportParams(params) => self.on_inbound_params(params),
            ServerNotification::RemotePublicationAnnounced(publication) => {
                self.on_announced(publication);
            }
            ServerNotification::RemotePublicationClosed(publication) => {
                self.on_publication_closed(&publication);
            }
        }
    }

    fn on_inbound_params(&self, params: TransportParams) {
        let mut state = self.lock();
        if state.phase == SessionPhase::Leaving {
            debug!(transport = %params.id, "inbound transport params dropped while leaving");
            return;
        }
        let params = match state.session.as_mut() {
            Some(session) => match session.adopt_inbound(params) {
                Ok(()) => {
                    self.pool_changed.send_modify(|n| *n += 1);
                    return;
                }
                Err(params) => params,
            },
            None => params,
        };

        let queue = &mut state.queued_inbound;
        queue.retain(|queued| queued.id != params.id);
        if queue.len() >= QUEUED_INBOUND_LIMIT {
            let dropped = queue.remove(0);
            warn!(transport = %dropped.id, "inbound transport queue full, dropping oldest params");
        }
        debug!(transport = %params.id, "inbound transport params queued until capabilities load");
        queue.push(params);
    }

    fn on_announced(self: &Arc<Self>, publication: RemotePublication) {
        let mut state = self.lock();
        let phase = state.phase;
        let producer_id = publication.producer_id.clone();

        let Some(session) = state.session.as_mut() else {
            debug!(producer = %producer_id, "remote publication ignored while idle");
            return;
        };
        if session.registry.local_producer() == Some(producer_id.as_str())
            || session.tracks_producer(&producer_id)
        {
            debug!(producer = %producer_id, "duplicate remote publication ignored");
            return;
        }

        match phase {
            SessionPhase::Joining => {
                debug!(producer = %producer_id, "remote publication deferred until joined");
                session.deferred.push(publication);
            }
            SessionPhase::Joined => self.spawn_consume(session, publication),
            SessionPhase::Idle | SessionPhase::Leaving => {
                debug!(producer = %producer_id, %phase, "remote publication ignored");
            }
        }
    }

    fn on_publication_closed(&self, publication: &RemotePublication) {
        let mut state = self.lock();
        let Some(session) = state.session.as_mut() else {
            return;
        };
        let producer_id = publication.producer_id.as_str();

        session.deferred.retain(|p| p.producer_id != producer_id);
        if let Some(task) = session.consuming.remove(producer_id) {
            task.abort();
            debug!(producer = %producer_id, "in-flight consumption cancelled");
        }

        if let Some(entry) = session
            .registry
            .remove_consumer(producer_id, self.presence.as_ref())
        {
            if let Some(consumer) = session
                .pool
                .get_mut(&entry.transport_id)
                .and_then(|t| t.detach(producer_id))
            {
                consumer.close();
            }
            self.playback.track_removed(producer_id);
            info!(producer = %producer_id, participant = %entry.participant_id, "remote publication closed");
        }
    }

    fn force_leave(&self, reason: String) {
        {
            let mut state = self.lock();
            if !matches!(state.phase, SessionPhase::Joining | SessionPhase::Joined) {
                debug!(reason = %reason, "signaling lost while idle");
                return;
            }
            error!(reason = %reason, "signaling lost, tearing down voice session");
            self.set_phase(&mut state, SessionPhase::Leaving);
            if let Some(session) = state.session.take() {
                self.release(session, VoiceError::Connection(reason.clone()));
            }
            state.queued_inbound.clear();
            self.set_phase(&mut state, SessionPhase::Idle);
        }
        self.emit(SessionEvent::ForcedLeave { reason });
    }

    /// Release every resource a session holds
    ///
    /// Shared by leave, failed joins, and forced teardown. `reason` is what
    /// a join still in flight for this session resolves to.
    fn release(&self, mut session: Session, reason: VoiceError) {
        session.cancel(reason);
        if let Some(track) = session.capture.take() {
            track.stop();
        }
        if let Some(mut outbound) = session.outbound.take() {
            outbound.close();
        }
        for consumer in session.pool.close_all() {
            self.playback.track_removed(consumer.producer_id());
        }
        session.registry.clear(self.presence.as_ref());
        debug!(channel = %session.channel_id, "session resources released");
    }

    // =========================================================================
    // Join
    // =========================================================================

    /// Wait for a latched server notification, bounded by the negotiation timeout
    async fn wait_latched<T: Clone>(
        &self,
        latch: &watch::Sender<Option<T>>,
        step: ConnectStep,
    ) -> Result<T, VoiceError> {
        let mut latched = latch.subscribe();
        let timeout = self.timeouts.negotiation();
        let waited = tokio::time::timeout(timeout, async {
            latched
                .wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|value| (*value).clone())
        })
        .await;

        match waited {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(VoiceError::Connection("notification pump stopped".to_string())),
            Err(_) => Err(VoiceError::transport(
                step,
                format!("nothing received within {timeout:?}"),
            )),
        }
    }

    async fn negotiate(&self, token: AttemptToken) -> Result<(), VoiceError> {
        // Microphone
        let input = self.lock().devices.input().map(str::to_string);
        let track = self.devices.acquire_capture(input.as_deref()).await?;
        if let Err(e) = self.with_session(token, |s| {
            s.capture = Some(track.clone());
            Ok(())
        }) {
            track.stop();
            return Err(e);
        }

        // Capabilities
        let server_caps = self
            .wait_latched(&self.capabilities, ConnectStep::Capabilities)
            .await?;
        let (caps, adopted) = {
            let mut state = self.lock();
            let queued = std::mem::take(&mut state.queued_inbound);
            let adopted = queued.len();
            let session = state.session_for(token)?;
            (session.load_capabilities(&server_caps, queued)?, adopted)
        };
        if adopted > 0 {
            self.pool_changed.send_modify(|n| *n += 1);
        }

        // Outbound transport
        let params = self
            .wait_latched(&self.outbound_params, ConnectStep::OutboundParams)
            .await?;
        self.outbound_params.send_if_modified(|latched| {
            let consumed = latched.as_ref().is_some_and(|p| p.id == params.id);
            if consumed {
                *latched = None;
            }
            consumed
        });
        let identity = DtlsIdentity::generate()
            .map_err(|reason| VoiceError::transport(ConnectStep::ConnectOutbound, reason))?;
        let connect = self.with_session(token, |s| {
            let transport = OutboundTransport::create(params, &caps);
            let request = transport.connect_request(&identity)?;
            s.identity = Some(identity);
            s.outbound = Some(transport);
            Ok(request)
        })?;
        send_request::<Value>(
            self.signaling.as_ref(),
            ClientRequest::ConnectOutboundTransport(connect),
        )
        .await
        .map_err(|e| VoiceError::from_signaling(ConnectStep::ConnectOutbound, e))?;

        // Publication
        let publish = self.with_session(token, |s| {
            let transport = s.outbound.as_mut().ok_or(VoiceError::Cancelled)?;
            transport.on_connected()?;
            transport.publish_request(&caps, &self.participant_id)
        })?;
        let rtp_parameters = publish.rtp_parameters.clone();
        let PublishResponse { id: producer_id } =
            send_request::<PublishResponse>(self.signaling.as_ref(), ClientRequest::Publish(publish))
                .await
                .map_err(|e| VoiceError::from_signaling(ConnectStep::Publish, e))?;
        validate_identifier(&producer_id).map_err(|e| {
            VoiceError::transport(ConnectStep::Publish, format!("producer id: {e}"))
        })?;

        let channel_id = self.with_session(token, |s| {
            let (Some(transport), Some(track)) = (s.outbound.as_mut(), s.capture.take()) else {
                return Err(VoiceError::Cancelled);
            };
            track.set_enabled(!s.muted);
            transport.activate_producer(producer_id.clone(), track, rtp_parameters)?;
            s.registry
                .register_producer(&producer_id, &self.participant_id, self.presence.as_ref());
            Ok(s.channel_id.clone())
        })?;
        info!(producer = %producer_id, "publishing local audio");

        // Membership
        send_request::<Value>(
            self.signaling.as_ref(),
            ClientRequest::JoinChannel(JoinChannel { channel_id }),
        )
        .await
        .map_err(|e| VoiceError::from_signaling(ConnectStep::JoinChannel, e))?;

        Ok(())
    }

    /// Mark the attempt joined and start consuming deferred announcements
    fn commit_join(self: &Arc<Self>, token: AttemptToken) -> Result<(), VoiceError> {
        let mut state = self.lock();
        let session = state.session_for(token)?;
        for publication in std::mem::take(&mut session.deferred) {
            self.spawn_consume(session, publication);
        }
        self.set_phase(&mut state, SessionPhase::Joined);
        Ok(())
    }

    /// Roll back a failed join, unless a leave already took the session
    fn abort_join(&self, token: AttemptToken, err: &VoiceError) {
        let mut state = self.lock();
        if state.session_for(token).is_err() {
            debug!(error = %err, "join attempt superseded");
            return;
        }
        warn!(error = %err, "join failed, rolling back");
        if let Some(session) = state.session.take() {
            self.release(session, err.clone());
        }
        state.queued_inbound.clear();
        self.set_phase(&mut state, SessionPhase::Idle);
    }

    // =========================================================================
    // Consume
    // =========================================================================

    fn spawn_consume(self: &Arc<Self>, session: &mut Session, publication: RemotePublication) {
        let producer_id = publication.producer_id.clone();
        let task = tokio::spawn(Arc::clone(self).consume(
            session.token,
            session.cancelled(),
            publication,
        ));
        session.consuming.insert(producer_id, task.abort_handle());
    }

    async fn consume(
        self: Arc<Self>,
        token: AttemptToken,
        cancelled: watch::Receiver<Option<VoiceError>>,
        publication: RemotePublication,
    ) {
        let producer_id = publication.producer_id.clone();
        let result = tokio::select! {
            result = self.try_consume(token, &publication) => result,
            _ = until_cancelled(cancelled) => Err(VoiceError::Cancelled),
        };

        let _ = self.with_session(token, |s| {
            s.consuming.remove(&producer_id);
            Ok(())
        });

        match result {
            Ok(()) => {}
            Err(VoiceError::Cancelled) => {
                debug!(producer = %producer_id, "consumption cancelled");
            }
            Err(e) => {
                warn!(producer = %producer_id, error = %e, "cannot consume remote publication");
                self.emit(SessionEvent::ConsumeFailed {
                    producer_id,
                    reason: e.to_string(),
                });
            }
        }
    }

    async fn try_consume(
        &self,
        token: AttemptToken,
        publication: &RemotePublication,
    ) -> Result<(), VoiceError> {
        let producer_id = publication.producer_id.as_str();
        let consume_error = |reason: String| VoiceError::Consume {
            producer_id: producer_id.to_string(),
            reason,
        };

        let (transport_id, gate) = self.inbound_candidate(token).await?;
        gate.get_or_try_init(|| self.connect_inbound(token, &transport_id))
            .await?;

        let rtp_capabilities = self.with_session(token, |s| {
            s.capabilities
                .as_ref()
                .map(|caps| caps.rtp_capabilities.clone())
                .ok_or(VoiceError::Cancelled)
        })?;
        let params: ConsumeParams = send_request(
            self.signaling.as_ref(),
            ClientRequest::BeginConsuming(BeginConsuming {
                producer_id: producer_id.to_string(),
                rtp_capabilities,
            }),
        )
        .await
        .map_err(|e| consume_error(e.to_string()))?;

        self.with_session(token, |s| {
            self.attach_consumer(s, &transport_id, publication, params)
        })
    }

    /// Inbound transport to consume on, waiting for the server to push one
    async fn inbound_candidate(
        &self,
        token: AttemptToken,
    ) -> Result<(String, Arc<OnceCell<()>>), VoiceError> {
        let mut changed = self.pool_changed.subscribe();
        let deadline = tokio::time::Instant::now() + self.timeouts.negotiation();
        loop {
            let candidate = self.with_session(token, |s| {
                Ok(s.pool
                    .candidate()
                    .map(|t| (t.id().to_string(), t.connect_gate())))
            })?;
            if let Some(candidate) = candidate {
                return Ok(candidate);
            }
            match tokio::time::timeout_at(deadline, changed.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return Err(VoiceError::Cancelled),
                Err(_) => {
                    return Err(VoiceError::transport(
                        ConnectStep::InboundParams,
                        "no inbound transport offered",
                    ));
                }
            }
        }
    }

    /// Connect one inbound transport; a rejected transport leaves the pool
    async fn connect_inbound(&self, token: AttemptToken, transport_id: &str) -> Result<(), VoiceError> {
        let gone = || {
            VoiceError::transport(
                ConnectStep::ConnectInbound,
                format!("inbound transport {transport_id} is gone"),
            )
        };

        let request = self.with_session(token, |s| {
            let identity = s.identity.as_ref().ok_or_else(|| {
                VoiceError::transport(ConnectStep::ConnectInbound, "no DTLS identity yet")
            })?;
            s.pool
                .get(transport_id)
                .ok_or_else(gone)?
                .connect_request(identity)
        })?;

        match send_request::<Value>(
            self.signaling.as_ref(),
            ClientRequest::ConnectInboundTransport(request),
        )
        .await
        {
            Ok(_) => self.with_session(token, |s| {
                s.pool.get_mut(transport_id).ok_or_else(gone)?.on_connected()
            }),
            Err(e) => {
                warn!(transport = %transport_id, error = %e, "inbound transport connect rejected");
                let _ = self.with_session(token, |s| {
                    s.pool.remove(transport_id);
                    Ok(())
                });
                Err(VoiceError::from_signaling(ConnectStep::ConnectInbound, e))
            }
        }
    }

    /// Validate consumption parameters and build the consumer
    ///
    /// Runs under the session lock: the transport attach, the registry
    /// entry, the presence update, and the playback hand-off happen together.
    fn attach_consumer(
        &self,
        session: &mut Session,
        transport_id: &str,
        publication: &RemotePublication,
        params: ConsumeParams,
    ) -> Result<(), VoiceError> {
        let producer_id = publication.producer_id.clone();

        // Closed while the consumption was in flight
        if !session.consuming.contains_key(&producer_id) {
            return Err(VoiceError::Cancelled);
        }

        let caps = session.capabilities.as_ref().ok_or(VoiceError::Cancelled)?;
        caps.validate_consume(&producer_id, &params)
            .map_err(|reason| VoiceError::Consume {
                producer_id: producer_id.clone(),
                reason,
            })?;

        let target = params
            .transport_id
            .clone()
            .filter(|id| session.pool.get(id).is_some_and(|t| t.is_connected()))
            .unwrap_or_else(|| transport_id.to_string());
        let participant_id = params
            .participant_id
            .clone()
            .unwrap_or_else(|| publication.participant().to_string());
        let consumer_id = params.id.clone();

        let consumer = Consumer::new(params, participant_id.clone());
        consumer.track().set_enabled(!session.deafened);
        let track = consumer.track().clone();

        let Some(transport) = session.pool.get_mut(&target) else {
            consumer.close();
            return Err(VoiceError::Consume {
                producer_id,
                reason: format!("inbound transport {target} is gone"),
            });
        };
        transport.attach(consumer)?;

        session.registry.insert_consumer(
            &producer_id,
            RegistryEntry {
                transport_id: target,
                consumer_id,
                participant_id: participant_id.clone(),
            },
            self.presence.as_ref(),
        );
        self.playback
            .track_added(&producer_id, &participant_id, track);
        info!(producer = %producer_id, participant = %participant_id, "consuming remote audio");
        Ok(())
    }

    // =========================================================================
    // Devices
    // =========================================================================

    async fn switch_input(&self, device_id: Option<&str>) -> Result<(), VoiceError> {
        let token = {
            let mut state = self.lock();
            match state.phase {
                SessionPhase::Idle => {
                    state.devices.input_device = device_id.unwrap_or_default().to_string();
                    info!(device = ?device_id, "input device selected for the next join");
                    return Ok(());
                }
                SessionPhase::Joined => state.joined_session("change_device")?.token,
                phase => {
                    return Err(VoiceError::InvalidState {
                        operation: "change_device",
                        phase,
                    });
                }
            }
        };

        let track = self.devices.acquire_capture(device_id).await?;

        let result = {
            let mut state = self.lock();
            let result = state
                .session_for(token)
                .and_then(|session| replace_capture(session, track.clone()));
            if result.is_ok() {
                state.devices.input_device = device_id.unwrap_or_default().to_string();
            }
            result
        };

        match &result {
            Ok(()) => info!(device = ?device_id, "input device switched"),
            Err(e) => {
                track.stop();
                warn!(device = ?device_id, error = %e, "input device switch failed");
            }
        }
        result
    }
}

/// Swap the producer's capture track for `track`, stopping the old one
fn replace_capture(session: &mut Session, track: AudioTrack) -> Result<(), VoiceError> {
    let caps = session
        .capabilities
        .as_ref()
        .ok_or_else(|| VoiceError::transport(ConnectStep::ReplaceTrack, "capabilities not loaded"))?;
    if !caps.supports_track(&track) {
        let format = track.format();
        return Err(VoiceError::transport(
            ConnectStep::ReplaceTrack,
            format!(
                "{} Hz / {} channel capture does not fit {} {} Hz / {} channels",
                format.sample_rate,
                format.channels,
                caps.send_codec.mime_type,
                caps.send_codec.clock_rate,
                caps.send_codec.channel_count()
            ),
        ));
    }

    let producer = session
        .outbound
        .as_mut()
        .and_then(OutboundTransport::producer_mut)
        .ok_or_else(|| VoiceError::transport(ConnectStep::ReplaceTrack, "no active producer"))?;
    producer.replace_track(track).stop();
    Ok(())
}
