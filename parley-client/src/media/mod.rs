//! Local media: audio tracks, capture devices, and DTLS identity
//!
//! Encoding and playback mixing happen below this layer. The session
//! manager only owns track handles and their enabled/live state.

mod capture;
mod devices;
mod dtls;
mod track;

pub use capture::CpalDevices;
pub use devices::{AudioDevice, DeviceDirection, MediaDevices, MediaError};
pub use dtls::DtlsIdentity;
pub use track::{AudioTrack, TrackFormat};
