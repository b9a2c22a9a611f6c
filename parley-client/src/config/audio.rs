//! Audio device selection
//!
//! Which capture and playback devices the session uses. Device ids are the
//! names the platform audio host reports.

use serde::{Deserialize, Serialize};

// =============================================================================
// Constants
// =============================================================================

/// System default device identifier
pub const SYSTEM_DEFAULT_DEVICE: &str = "";

// =============================================================================
// Device Selection
// =============================================================================

/// Selected input and output devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSelection {
    /// Input device name (empty string = system default)
    #[serde(default)]
    pub input_device: String,

    /// Output device name (empty string = system default)
    #[serde(default)]
    pub output_device: String,
}

impl Default for DeviceSelection {
    fn default() -> Self {
        Self {
            input_device: SYSTEM_DEFAULT_DEVICE.to_string(),
            output_device: SYSTEM_DEFAULT_DEVICE.to_string(),
        }
    }
}

impl DeviceSelection {
    /// Check if using system default input device
    pub fn is_default_input(&self) -> bool {
        self.input_device.is_empty()
    }

    /// Check if using system default output device
    pub fn is_default_output(&self) -> bool {
        self.output_device.is_empty()
    }

    /// Input device as an explicit id, `None` for the system default
    pub fn input(&self) -> Option<&str> {
        (!self.is_default_input()).then_some(self.input_device.as_str())
    }

    /// Output device as an explicit id, `None` for the system default
    pub fn output(&self) -> Option<&str> {
        (!self.is_default_output()).then_some(self.output_device.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================
