//! Media device access

use async_trait::async_trait;
use thiserror::Error;

use super::track::AudioTrack;

/// System default device display name
pub const SYSTEM_DEFAULT_DEVICE_NAME: &str = "System Default";

/// Errors raised while acquiring or selecting hardware
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    /// The platform refused access to the device
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// No device with the requested id exists
    #[error("device not found: {0}")]
    NotFound(String),

    /// The device cannot deliver a format we can use
    #[error("unsupported device format: {0}")]
    Unsupported(String),

    /// The device exists but could not be opened
    #[error("device unavailable: {0}")]
    Unavailable(String),
}

/// Direction of an audio device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceDirection {
    Input,
    Output,
}

impl std::fmt::Display for DeviceDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceDirection::Input => write!(f, "input"),
            DeviceDirection::Output => write!(f, "output"),
        }
    }
}

/// Represents an audio device (input or output)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDevice {
    /// Identifier passed back when selecting the device (empty = system default)
    pub id: String,
    /// Device name for display
    pub name: String,
    pub direction: DeviceDirection,
    /// Whether this represents the system default device
    pub is_default: bool,
}

impl AudioDevice {
    /// Create a new named device entry
    pub fn new(name: impl Into<String>, direction: DeviceDirection) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            direction,
            is_default: false,
        }
    }

    /// Create the system default device entry
    pub fn system_default(direction: DeviceDirection) -> Self {
        Self {
            id: String::new(),
            name: SYSTEM_DEFAULT_DEVICE_NAME.to_string(),
            direction,
            is_default: true,
        }
    }
}

impl std::fmt::Display for AudioDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Access to audio hardware
///
/// Explicit device ids are matched exactly; `None` selects the system
/// default. Implementations never fall back silently from an explicit id.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Open a capture stream and return its live track
    async fn acquire_capture(&self, device_id: Option<&str>) -> Result<AudioTrack, MediaError>;

    /// Enumerate capture devices, system default first
    fn input_devices(&self) -> Result<Vec<AudioDevice>, MediaError>;

    /// Enumerate playback devices, system default first
    fn output_devices(&self) -> Result<Vec<AudioDevice>, MediaError>;

    /// Route playback to another device
    fn set_output_device(&self, device_id: Option<&str>) -> Result<(), MediaError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_default_device() {
        let device = AudioDevice::system_default(DeviceDirection::Input);
        assert!(device.is_default);
        assert!(device.id.is_empty());
        assert_eq!(device.to_string(), SYSTEM_DEFAULT_DEVICE_NAME);
    }

    #[test]
    fn test_named_device_uses_name_as_id() {
        let device = AudioDevice::new("USB Microphone", DeviceDirection::Input);
        assert_eq!(device.id, "USB Microphone");
        assert!(!device.is_default);
    }
}
