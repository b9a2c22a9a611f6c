//! Timeout and reconnect settings

use std::time::Duration;

use serde::{Deserialize, Serialize};

// =============================================================================
// Constants
// =============================================================================

/// Default time allowed to open the signaling connection
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default time allowed for one signaling request/response round-trip
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Default time to wait for a server-pushed negotiation message
pub const DEFAULT_NEGOTIATION_TIMEOUT_MS: u64 = 15_000;

/// Default window in which a lost signaling link may recover
pub const DEFAULT_RECONNECT_WINDOW_MS: u64 = 30_000;

/// Default delay between reconnect attempts
pub const DEFAULT_RECONNECT_BACKOFF_MS: u64 = 1_000;

/// Default time allowed for the best-effort `leave-channel` notice
pub const DEFAULT_LEAVE_TIMEOUT_MS: u64 = 2_000;

// =============================================================================
// Timeout Settings
// =============================================================================

/// Bounds on every wait the session manager performs
///
/// Values are stored in milliseconds so the JSON config stays readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,

    #[serde(default = "default_request_ms")]
    pub request_ms: u64,

    #[serde(default = "default_negotiation_ms")]
    pub negotiation_ms: u64,

    #[serde(default = "default_reconnect_window_ms")]
    pub reconnect_window_ms: u64,

    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,

    #[serde(default = "default_leave_ms")]
    pub leave_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            request_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            negotiation_ms: DEFAULT_NEGOTIATION_TIMEOUT_MS,
            reconnect_window_ms: DEFAULT_RECONNECT_WINDOW_MS,
            reconnect_backoff_ms: DEFAULT_RECONNECT_BACKOFF_MS,
            leave_ms: DEFAULT_LEAVE_TIMEOUT_MS,
        }
    }
}

impl TimeoutSettings {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn negotiation(&self) -> Duration {
        Duration::from_millis(self.negotiation_ms)
    }

    pub fn reconnect_window(&self) -> Duration {
        Duration::from_millis(self.reconnect_window_ms)
    }

    /// Delay between reconnect attempts (never zero)
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms.max(1))
    }

    pub fn leave(&self) -> Duration {
        Duration::from_millis(self.leave_ms)
    }
}

// =============================================================================
// Default Functions (for serde)
// =============================================================================

fn default_connect_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_request_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_negotiation_ms() -> u64 {
    DEFAULT_NEGOTIATION_TIMEOUT_MS
}

fn default_reconnect_window_ms() -> u64 {
    DEFAULT_RECONNECT_WINDOW_MS
}

fn default_reconnect_backoff_ms() -> u64 {
    DEFAULT_RECONNECT_BACKOFF_MS
}

fn default_leave_ms() -> u64 {
    DEFAULT_LEAVE_TIMEOUT_MS
}

// =============================================================================
// Tests
// =============================================================================
