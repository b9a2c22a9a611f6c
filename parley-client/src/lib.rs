//! Parley Client Library
//!
//! Client-side voice channel session manager: joins a channel on a Parley
//! media relay, publishes the local microphone, consumes every remote
//! participant's audio, and keeps presence in sync.
//!
//! The entry point is [`SessionController`]. It talks to the relay through a
//! [`SignalingChannel`] (normally [`WebSocketSignaling`]) and opens audio
//! through [`MediaDevices`] (normally [`CpalDevices`]).

pub mod config;
pub mod constants;
pub mod error;
pub mod media;
pub mod negotiator;
pub mod presence;
pub mod registry;
pub mod session;
pub mod signaling;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{ClientConfig, ConfigError, DeviceSelection, TimeoutSettings};
pub use error::{ConnectStep, VoiceError};
pub use media::{AudioDevice, AudioTrack, CpalDevices, DeviceDirection, MediaDevices, MediaError};
pub use presence::{LoggingPlayback, ParticipantStatus, PlaybackSink, PresenceMap, PresenceStore};
pub use session::{SessionController, SessionEvent, SessionPhase, SessionStatus};
pub use signaling::{SignalingChannel, SignalingError, SignalingEvent, WebSocketSignaling};
pub use transport::TransportState;
