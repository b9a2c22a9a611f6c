//! End-to-end session test against a scripted relay
//!
//! The relay speaks the real signaling wire format over a local WebSocket
//! and plays the server side of one join, one remote consumption, and one
//! leave.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parley_client::{
    AudioDevice, AudioTrack, ClientConfig, DeviceDirection, MediaDevices, MediaError,
    PlaybackSink, PresenceMap, SessionController, SessionPhase, TimeoutSettings, TransportState,
    WebSocketSignaling,
};
use parley_client::media::TrackFormat;
use parley_common::media::{
    DtlsFingerprint, DtlsParameters, DtlsRole, IceCandidate, IceParameters, MediaKind,
    RtpCapabilities, RtpCodecParameters, RtpParameters, TransportParams,
};
use parley_common::protocol::{ConsumeParams, Frame, RemotePublication, ServerNotification};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::Message;

type ServerWs = WebSocketStream<TcpStream>;

// ============================================================================
// Helper Functions
// ============================================================================

fn transport_params(id: &str) -> TransportParams {
    TransportParams {
        id: id.to_string(),
        ice_parameters: IceParameters {
            username_fragment: format!("ufrag-{id}"),
            password: "relay-secret".to_string(),
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
                value: "12:34".to_string(),
            }],
        },
    }
}

fn remote_consume_params(producer_id: &str) -> ConsumeParams {
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
        participant_id: Some("bob".to_string()),
        transport_id: Some("recv-1".to_string()),
    }
}

async fn send_frame(ws: &mut ServerWs, frame: Frame) {
    ws.send(Message::text(serde_json::to_string(&frame).unwrap()))
        .await
        .unwrap();
}

async fn notify(ws: &mut ServerWs, notification: ServerNotification) {
    send_frame(ws, notification.into_frame().unwrap()).await;
}

async fn respond(ws: &mut ServerWs, id: u64, data: Value) {
    send_frame(
        ws,
        Frame::Response {
            id,
            data,
            error: None,
        },
    )
    .await;
}

/// Play the relay side of one session; returns the request events seen
async fn run_relay(listener: TcpListener, ready: oneshot::Receiver<()>) -> Vec<String> {
    let (tcp, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
    let _ = ready.await;

    notify(
        &mut ws,
        ServerNotification::CapabilitiesAdvertised(RtpCapabilities::opus_only()),
    )
    .await;
    notify(
        &mut ws,
        ServerNotification::OutboundTransportParams(transport_params("send-1")),
    )
    .await;
    notify(
        &mut ws,
        ServerNotification::InboundTransportParams(transport_params("recv-1")),
    )
    .await;

    let mut seen = Vec::new();
    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Frame::Request { id, event, data } = serde_json::from_str(text.as_str()).unwrap()
        else {
            panic!("client sent a non-request frame");
        };
        seen.push(event.clone());

        match event.as_str() {
            "connect-outbound-transport" => {
                assert_eq!(data["transportId"], "send-1");
                respond(&mut ws, id, Value::Null).await;
            }
            "publish" => {
                assert_eq!(data["kind"], "audio");
                respond(&mut ws, id, json!({"id": "prod-alice"})).await;
            }
            "join-channel" => {
                assert_eq!(data["channelId"], "lobby");
                respond(&mut ws, id, Value::Null).await;
                notify(
                    &mut ws,
                    ServerNotification::RemotePublicationAnnounced(RemotePublication {
                        producer_id: "prod-bob".to_string(),
                        participant_id: Some("bob".to_string()),
                    }),
                )
                .await;
            }
            "connect-inbound-transport" => {
                assert_eq!(data["transportId"], "recv-1");
                respond(&mut ws, id, Value::Null).await;
            }
            "begin-consuming" => {
                assert_eq!(data["producerId"], "prod-bob");
                let params = remote_consume_params("prod-bob");
                respond(&mut ws, id, serde_json::to_value(params).unwrap()).await;
            }
            "leave-channel" => {
                respond(&mut ws, id, Value::Null).await;
                break;
            }
            other => panic!("unexpected request {other}"),
        }
    }
    seen
}

/// Microphones that need no hardware
struct SilentDevices;

#[async_trait]
impl MediaDevices for SilentDevices {
    async fn acquire_capture(&self, device_id: Option<&str>) -> Result<AudioTrack, MediaError> {
        Ok(AudioTrack::new(
            device_id.unwrap_or_default(),
            TrackFormat::VOICE_MONO,
        ))
    }

    fn input_devices(&self) -> Result<Vec<AudioDevice>, MediaError> {
        Ok(vec![AudioDevice::system_default(DeviceDirection::Input)])
    }

    fn output_devices(&self) -> Result<Vec<AudioDevice>, MediaError> {
        Ok(vec![AudioDevice::system_default(DeviceDirection::Output)])
    }

    fn set_output_device(&self, _device_id: Option<&str>) -> Result<(), MediaError> {
        Ok(())
    }
}

#[derive(Default)]
struct CollectingPlayback {
    tracks: Mutex<Vec<(String, String, AudioTrack)>>,
}

impl PlaybackSink for CollectingPlayback {
    fn track_added(&self, producer_id: &str, participant_id: &str, track: AudioTrack) {
        self.tracks.lock().unwrap().push((
            producer_id.to_string(),
            participant_id.to_string(),
            track,
        ));
    }

    fn track_removed(&self, producer_id: &str) {
        self.tracks.lock().unwrap().retain(|(p, _, _)| p != producer_id);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_join_consume_mute_leave() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (ready_tx, ready_rx) = oneshot::channel();
    let relay = tokio::spawn(run_relay(listener, ready_rx));

    let timeouts = TimeoutSettings {
        connect_ms: 1_000,
        request_ms: 2_000,
        negotiation_ms: 2_000,
        reconnect_window_ms: 1_000,
        reconnect_backoff_ms: 50,
        leave_ms: 1_000,
    };
    let config = ClientConfig {
        signaling_url: url.clone(),
        participant_id: "alice".to_string(),
        timeouts: timeouts.clone(),
        ..ClientConfig::default()
    };

    let signaling = Arc::new(WebSocketSignaling::connect(&url, timeouts).await.unwrap());
    let presence = Arc::new(PresenceMap::new());
    let playback = Arc::new(CollectingPlayback::default());
    let controller = SessionController::new(
        &config,
        signaling,
        Arc::new(SilentDevices),
        presence.clone(),
        playback.clone(),
    );
    controller.start();
    ready_tx.send(()).unwrap();

    controller.join("lobby").await.unwrap();
    let status = controller.status();
    assert_eq!(status.phase, SessionPhase::Joined);
    assert_eq!(status.producer_id.as_deref(), Some("prod-alice"));
    assert_eq!(status.outbound_state, TransportState::Producing);
    assert!(presence.status("alice").unwrap().online);

    let consumed = async {
        while controller.status().consumers != ["prod-bob"] {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(3), consumed)
        .await
        .expect("remote producer consumed");
    assert!(presence.status("bob").unwrap().online);
    let remote = {
        let tracks = playback.tracks.lock().unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].1, "bob");
        tracks[0].2.clone()
    };
    assert!(remote.is_enabled());

    assert!(controller.toggle_mute().unwrap());
    assert!(!controller.local_track().unwrap().is_enabled());

    controller.leave().await;
    assert_eq!(controller.phase(), SessionPhase::Idle);
    assert!(!remote.is_live());
    assert!(playback.tracks.lock().unwrap().is_empty());
    assert!(presence.online().is_empty());

    let seen = relay.await.unwrap();
    assert_eq!(
        seen,
        vec![
            "connect-outbound-transport",
            "publish",
            "join-channel",
            "connect-inbound-transport",
            "begin-consuming",
            "leave-channel",
        ]
    );
}
