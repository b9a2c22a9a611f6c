//! Audio track handles
//!
//! An [`AudioTrack`] is a cloneable handle to one live audio source: a local
//! capture stream or a remote consumer's playback stream. Clones share state,
//! so disabling one handle disables them all.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use parley_common::media::VOICE_SAMPLE_RATE;
use uuid::Uuid;

type Release = Box<dyn FnOnce() + Send>;

/// Sample format a track delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl TrackFormat {
    /// 48kHz mono, the format every capture is delivered in
    pub const VOICE_MONO: TrackFormat = TrackFormat {
        sample_rate: VOICE_SAMPLE_RATE,
        channels: 1,
    };
}

/// Enabled flag and input level, shared with the audio callback
#[derive(Debug)]
pub(crate) struct TrackMeter {
    enabled: AtomicBool,
    /// f32 bits of the most recent RMS level (0.0 - 1.0)
    level: AtomicU32,
}

impl TrackMeter {
    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub(crate) fn set_level(&self, level: f32) {
        self.level.store(level.to_bits(), Ordering::Relaxed);
    }

    fn level(&self) -> f32 {
        f32::from_bits(self.level.load(Ordering::Relaxed))
    }
}

struct TrackShared {
    id: Uuid,
    device_id: String,
    format: TrackFormat,
    meter: Arc<TrackMeter>,
    live: AtomicBool,
    release: Mutex<Option<Release>>,
}

impl TrackShared {
    fn take_release(&self) -> Option<Release> {
        self.release
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Drop for TrackShared {
    fn drop(&mut self) {
        if let Some(release) = self.take_release() {
            release();
        }
    }
}

/// Handle to one live audio track
#[derive(Clone)]
pub struct AudioTrack {
    shared: Arc<TrackShared>,
}

impl AudioTrack {
    /// Create a live, enabled track with no hardware attached
    pub fn new(device_id: impl Into<String>, format: TrackFormat) -> Self {
        Self {
            shared: Arc::new(TrackShared {
                id: Uuid::new_v4(),
                device_id: device_id.into(),
                format,
                meter: Arc::new(TrackMeter {
                    enabled: AtomicBool::new(true),
                    level: AtomicU32::new(0f32.to_bits()),
                }),
                live: AtomicBool::new(true),
                release: Mutex::new(None),
            }),
        }
    }

    /// Attach the hook that releases the underlying hardware
    ///
    /// The hook runs exactly once: on the first `stop()`, or when the last
    /// handle is dropped. Attaching to an already stopped track runs it
    /// immediately.
    pub fn set_release(&self, release: impl FnOnce() + Send + 'static) {
        if !self.is_live() {
            release();
            return;
        }
        *self
            .shared
            .release
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(release));
    }

    pub(crate) fn meter(&self) -> Arc<TrackMeter> {
        Arc::clone(&self.shared.meter)
    }

    /// Unique id of this track
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Device the track originates from (empty = system default, or the
    /// remote producer id for playback tracks)
    pub fn device_id(&self) -> &str {
        &self.shared.device_id
    }

    pub fn format(&self) -> TrackFormat {
        self.shared.format
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.meter.is_enabled()
    }

    /// Enable or disable the track; a stopped track stays disabled
    pub fn set_enabled(&self, enabled: bool) {
        let enabled = enabled && self.is_live();
        self.shared.meter.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.shared.meter.set_level(0.0);
        }
    }

    pub fn is_live(&self) -> bool {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Most recent input level (0.0 - 1.0) for UI meters
    pub fn level(&self) -> f32 {
        self.shared.meter.level()
    }

    /// Stop the track and release its hardware
    ///
    /// Idempotent: only the first call releases anything.
    pub fn stop(&self) {
        if !self.shared.live.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shared.meter.enabled.store(false, Ordering::SeqCst);
        self.shared.meter.set_level(0.0);
        if let Some(release) = self.shared.take_release() {
            release();
        }
    }

    /// Whether two handles refer to the same track
    pub fn same_track(&self, other: &AudioTrack) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl std::fmt::Debug for AudioTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioTrack")
            .field("id", &self.shared.id)
            .field("device_id", &self.shared.device_id)
            .field("format", &self.shared.format)
            .field("enabled", &self.is_enabled())
            .field("live", &self.is_live())
            .finish()
    }
}
