//! Collaborators outside the session manager
//!
//! The session reports participant presence to a [`PresenceStore`] and hands
//! playable remote tracks to a [`PlaybackSink`]. Both are called while the
//! session lock is held, so implementations must return promptly and must
//! not call back into the controller.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use tracing::info;

use crate::media::AudioTrack;

// =============================================================================
// Presence
// =============================================================================

/// Shared application state holding participant presence
pub trait PresenceStore: Send + Sync {
    /// Record whether a participant is online and speaking-eligible
    fn set_participant_status(&self, participant_id: &str, online: bool, speaking: bool);
}

/// Presence of one participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParticipantStatus {
    pub online: bool,
    pub speaking: bool,
}

/// In-memory [`PresenceStore`]
#[derive(Debug, Default)]
pub struct PresenceMap {
    entries: Mutex<BTreeMap<String, ParticipantStatus>>,
}

impl PresenceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last reported status of a participant
    pub fn status(&self, participant_id: &str) -> Option<ParticipantStatus> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(participant_id)
            .copied()
    }

    /// Ids of every participant currently online
    pub fn online(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, status)| status.online)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

impl PresenceStore for PresenceMap {
    fn set_participant_status(&self, participant_id: &str, online: bool, speaking: bool) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(participant_id.to_string(), ParticipantStatus { online, speaking });
    }
}

// =============================================================================
// Playback
// =============================================================================

/// UI layer receiving one playable track per consumer
pub trait PlaybackSink: Send + Sync {
    fn track_added(&self, producer_id: &str, participant_id: &str, track: AudioTrack);

    fn track_removed(&self, producer_id: &str);
}

/// [`PlaybackSink`] that only logs, for headless use
#[derive(Debug, Default)]
pub struct LoggingPlayback;

impl PlaybackSink for LoggingPlayback {
    fn track_added(&self, producer_id: &str, participant_id: &str, track: AudioTrack) {
        info!(
            producer = %producer_id,
            participant = %participant_id,
            sample_rate = track.format().sample_rate,
            "remote audio available"
        );
    }

    fn track_removed(&self, producer_id: &str) {
        info!(producer = %producer_id, "remote audio removed");
    }
}
