//! Application-wide constants
//!
//! Shared constants used across multiple modules.

/// Application directory name (used in config directory path)
pub const APP_DIR_NAME: &str = "parley";

/// Config file name
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Capacity of the signaling notification broadcast channel
pub const SIGNALING_EVENT_CAPACITY: usize = 256;

/// Capacity of the session event broadcast channel
pub const SESSION_EVENT_CAPACITY: usize = 64;

/// Capacity of the outgoing signaling frame queue
pub const OUTGOING_FRAME_CAPACITY: usize = 128;

/// Common name placed in the per-session DTLS certificate
pub const DTLS_CERT_COMMON_NAME: &str = "parley-client";

/// Inbound transport params held while no capabilities are loaded
pub const QUEUED_INBOUND_LIMIT: usize = 16;
