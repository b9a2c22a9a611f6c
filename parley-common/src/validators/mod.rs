//! Input validation functions
//!
//! Validators shared between the client and the paired relay server. The
//! client runs them before anything reaches the wire; the server enforces
//! the same limits.

mod channel;
mod device;
mod identifier;

pub use channel::{ChannelError, MAX_CHANNEL_LENGTH, validate_channel};
pub use device::{DeviceIdError, MAX_DEVICE_ID_LENGTH, validate_device_id};
pub use identifier::{IdentifierError, MAX_IDENTIFIER_LENGTH, validate_identifier};
