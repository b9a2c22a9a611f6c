//! Audio device identifier validation
//!
//! Device ids are the names the platform audio host reports. An empty id
//! means "system default" and is always valid.

/// Maximum length for device ids in characters
pub const MAX_DEVICE_ID_LENGTH: usize = 256;

/// Validation error for device ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceIdError {
    /// Device id exceeds maximum length
    TooLong,
    /// Device id contains control characters
    ControlCharacters,
}

impl std::fmt::Display for DeviceIdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceIdError::TooLong => {
                write!(f, "device id exceeds {MAX_DEVICE_ID_LENGTH} characters")
            }
            DeviceIdError::ControlCharacters => write!(f, "device id contains control characters"),
        }
    }
}

impl std::error::Error for DeviceIdError {}

/// Validate an audio device id
///
/// # Errors
///
/// Returns a `DeviceIdError` variant describing the validation failure.
pub fn validate_device_id(device_id: &str) -> Result<(), DeviceIdError> {
    if device_id.chars().count() > MAX_DEVICE_ID_LENGTH {
        return Err(DeviceIdError::TooLong);
    }

    if device_id.chars().any(char::is_control) {
        return Err(DeviceIdError::ControlCharacters);
    }

    Ok(())
}
