//! Parley Common Library
//!
//! Shared types for the Parley voice-channel client and its paired
//! signaling/relay server: the signaling wire format, typed request and
//! notification payloads, RTP/DTLS/ICE parameter descriptions, and input
//! validators.

pub mod media;
pub mod protocol;
pub mod validators;

/// Version of the signaling protocol spoken by this crate
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Default signaling endpoint for local development
pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:3001";

/// Maximum size of a single signaling frame (1 MiB)
///
/// Capability advertisements are the largest legitimate frames and stay
/// well below this.
pub const MAX_SIGNALING_FRAME_SIZE: usize = 1024 * 1024;
