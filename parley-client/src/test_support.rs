//! Fakes and fixtures shared by unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use parley_common::media::{
    DtlsFingerprint, DtlsParameters, DtlsRole, IceCandidate, IceParameters, MediaKind,
    RtpCapabilities, RtpCodecParameters, RtpParameters, TransportParams,
};
use parley_common::protocol::{
    ConsumeParams, EVENT_BEGIN_CONSUMING, EVENT_PUBLISH, ServerNotification,
};
use serde_json::{Value, json};
use tokio::sync::{Notify, broadcast, oneshot};

use crate::media::{
    AudioDevice, AudioTrack, DeviceDirection, MediaDevices, MediaError, TrackFormat,
};
use crate::presence::PlaybackSink;
use crate::signaling::{SignalingChannel, SignalingError, SignalingEvent};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Fixtures
// =============================================================================

pub(crate) fn transport_params(id: &str) -> TransportParams {
    TransportParams {
        id: id.to_string(),
        ice_parameters: IceParameters {
            username_fragment: format!("ufrag-{id}"),
            password: "secret".to_string(),
            ice_lite: Some(true),
        },
        ice_candidates: vec![IceCandidate {
            foundation: "udpcandidate".to_string(),
            priority: 1076302079,
            ip: "127.0.0.1".to_string(),
            port: 40000,
            protocol: "udp".to_string(),
            kind: "host".to_string(),
        }],
        dtls_parameters: DtlsParameters {
            role: DtlsRole::Auto,
            fingerprints: vec![DtlsFingerprint {
                algorithm: "sha-256".to_string(),
                value: "AB:CD".to_string(),
            }],
        },
    }
}

/// Well-formed consumption parameters for an Opus producer
pub(crate) fn consume_params(producer_id: &str) -> ConsumeParams {
    ConsumeParams {
        id: format!("cons-{producer_id}"),
        producer_id: producer_id.to_string(),
        kind: MediaKind::Audio,
        rtp_parameters: RtpParameters {
            codecs: vec![RtpCodecParameters {
                mime_type: "audio/opus".to_string(),
                payload_type: 100,
                clock_rate: 48000,
                channels: Some(2),
                parameters: Default::default(),
                rtcp_feedback: vec![],
            }],
            ..Default::default()
        },
        participant_id: None,
        transport_id: None,
    }
}

pub(crate) fn server_capabilities() -> RtpCapabilities {
    RtpCapabilities::opus_only()
}

/// Poll `check` until it holds, failing the test after two seconds
pub(crate) async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

// =============================================================================
// Fake Signaling
// =============================================================================

type Reply = Result<Value, SignalingError>;

enum Scripted {
    Now(Reply),
    Held(oneshot::Receiver<Reply>),
}

/// In-memory signaling channel with scripted replies
///
/// Unscripted requests succeed: `publish` answers `prod-42`,
/// `begin-consuming` answers [`consume_params`], everything else `null`.
pub(crate) struct FakeSignaling {
    events: broadcast::Sender<SignalingEvent>,
    requests: Mutex<Vec<(String, Value)>>,
    scripted: Mutex<HashMap<String, VecDeque<Scripted>>>,
    seen: Notify,
}

impl FakeSignaling {
    pub(crate) fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            events,
            requests: Mutex::new(Vec::new()),
            scripted: Mutex::new(HashMap::new()),
            seen: Notify::new(),
        })
    }

    pub(crate) fn notify(&self, notification: ServerNotification) {
        self.link(SignalingEvent::Notification(notification));
    }

    pub(crate) fn link(&self, event: SignalingEvent) {
        let _ = self.events.send(event);
    }

    /// Answer the next `event` request with `reply`
    pub(crate) fn reply(&self, event: &str, reply: Reply) {
        lock(&self.scripted)
            .entry(event.to_string())
            .or_default()
            .push_back(Scripted::Now(reply));
    }

    /// Hold the next `event` request until the returned sender fires
    pub(crate) fn hold(&self, event: &str) -> oneshot::Sender<Reply> {
        let (tx, rx) = oneshot::channel();
        lock(&self.scripted)
            .entry(event.to_string())
            .or_default()
            .push_back(Scripted::Held(rx));
        tx
    }

    /// Event names of every request, in order
    pub(crate) fn sent(&self) -> Vec<String> {
        lock(&self.requests).iter().map(|(e, _)| e.clone()).collect()
    }

    /// Payloads of every `event` request, in order
    pub(crate) fn requests(&self, event: &str) -> Vec<Value> {
        lock(&self.requests)
            .iter()
            .filter(|(e, _)| e == event)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Wait until at least `count` `event` requests were issued
    pub(crate) async fn wait_for_request(&self, event: &str, count: usize) {
        let wait = async {
            loop {
                let seen = self.seen.notified();
                if self.requests(event).len() >= count {
                    return;
                }
                seen.await;
            }
        };
        tokio::time::timeout(Duration::from_secs(2), wait)
            .await
            .unwrap_or_else(|_| panic!("{event} was never requested"));
    }

    fn default_reply(event: &str, payload: &Value) -> Reply {
        match event {
            EVENT_PUBLISH => Ok(json!({"id": "prod-42"})),
            EVENT_BEGIN_CONSUMING => {
                let producer_id = payload["producerId"].as_str().unwrap_or_default();
                Ok(serde_json::to_value(consume_params(producer_id)).unwrap())
            }
            _ => Ok(Value::Null),
        }
    }
}

#[async_trait]
impl SignalingChannel for FakeSignaling {
    async fn emit(&self, event: &str, payload: Value) -> Result<Value, SignalingError> {
        let scripted = lock(&self.scripted)
            .get_mut(event)
            .and_then(VecDeque::pop_front);
        lock(&self.requests).push((event.to_string(), payload.clone()));
        self.seen.notify_waiters();

        match scripted {
            Some(Scripted::Now(reply)) => reply,
            Some(Scripted::Held(rx)) => rx
                .await
                .unwrap_or_else(|_| Err(SignalingError::Closed("held reply dropped".to_string()))),
            None => Self::default_reply(event, &payload),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<SignalingEvent> {
        self.events.subscribe()
    }
}

// =============================================================================
// Fake Devices
// =============================================================================

/// Media devices that hand out hardware-free tracks
///
/// Known inputs: the default, `mic-a`, `mic-b`. Known output: `speakers`.
#[derive(Default)]
pub(crate) struct FakeDevices {
    formats: Mutex<HashMap<String, TrackFormat>>,
    failures: Mutex<HashMap<String, MediaError>>,
    acquired: Mutex<Vec<AudioTrack>>,
    output: Mutex<String>,
}

impl FakeDevices {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make capture from `device_id` (empty = default) fail
    pub(crate) fn fail(&self, device_id: &str, error: MediaError) {
        lock(&self.failures).insert(device_id.to_string(), error);
    }

    /// Deliver captures from `device_id` in `format`
    pub(crate) fn set_format(&self, device_id: &str, format: TrackFormat) {
        lock(&self.formats).insert(device_id.to_string(), format);
    }

    /// Every track handed out so far
    pub(crate) fn acquired(&self) -> Vec<AudioTrack> {
        lock(&self.acquired).clone()
    }

    pub(crate) fn live_tracks(&self) -> usize {
        lock(&self.acquired).iter().filter(|t| t.is_live()).count()
    }

    pub(crate) fn output(&self) -> String {
        lock(&self.output).clone()
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn acquire_capture(&self, device_id: Option<&str>) -> Result<AudioTrack, MediaError> {
        let id = device_id.unwrap_or_default();
        if let Some(error) = lock(&self.failures).get(id) {
            return Err(error.clone());
        }
        let format = lock(&self.formats)
            .get(id)
            .copied()
            .unwrap_or(TrackFormat::VOICE_MONO);
        let track = AudioTrack::new(id, format);
        lock(&self.acquired).push(track.clone());
        Ok(track)
    }

    fn input_devices(&self) -> Result<Vec<AudioDevice>, MediaError> {
        Ok(vec![
            AudioDevice::system_default(DeviceDirection::Input),
            AudioDevice::new("mic-a", DeviceDirection::Input),
            AudioDevice::new("mic-b", DeviceDirection::Input),
        ])
    }

    fn output_devices(&self) -> Result<Vec<AudioDevice>, MediaError> {
        Ok(vec![
            AudioDevice::system_default(DeviceDirection::Output),
            AudioDevice::new("speakers", DeviceDirection::Output),
        ])
    }

    fn set_output_device(&self, device_id: Option<&str>) -> Result<(), MediaError> {
        match device_id {
            None | Some("speakers") => {
                *lock(&self.output) = device_id.unwrap_or_default().to_string();
                Ok(())
            }
            Some(other) => Err(MediaError::NotFound(other.to_string())),
        }
    }
}

// =============================================================================
// Recording Playback
// =============================================================================

/// Playback sink that remembers what it was handed
#[derive(Default)]
pub(crate) struct RecordingPlayback {
    added: Mutex<Vec<(String, String, AudioTrack)>>,
    removed: Mutex<Vec<String>>,
}

impl RecordingPlayback {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Latest track handed over for `producer_id`
    pub(crate) fn track(&self, producer_id: &str) -> Option<AudioTrack> {
        lock(&self.added)
            .iter()
            .rev()
            .find(|(p, _, _)| p == producer_id)
            .map(|(_, _, track)| track.clone())
    }

    pub(crate) fn participant(&self, producer_id: &str) -> Option<String> {
        lock(&self.added)
            .iter()
            .rev()
            .find(|(p, _, _)| p == producer_id)
            .map(|(_, participant, _)| participant.clone())
    }

    pub(crate) fn removed(&self) -> Vec<String> {
        lock(&self.removed).clone()
    }
}

impl PlaybackSink for RecordingPlayback {
    fn track_added(&self, producer_id: &str, participant_id: &str, track: AudioTrack) {
        lock(&self.added).push((producer_id.to_string(), participant_id.to_string(), track));
    }

    fn track_removed(&self, producer_id: &str) {
        lock(&self.removed).push(producer_id.to_string());
    }
}
