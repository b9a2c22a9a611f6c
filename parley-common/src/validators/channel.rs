//! Voice channel identifier validation
//!
//! Channel ids are opaque names like `voice-1` chosen by the server.

/// Maximum length for channel ids in characters
pub const MAX_CHANNEL_LENGTH: usize = 64;

/// Validation error for channel ids
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Channel id is empty
    Empty,
    /// Channel id exceeds maximum length
    TooLong,
    /// Channel id contains whitespace or control characters
    InvalidCharacters,
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelError::Empty => write!(f, "channel id is empty"),
            ChannelError::TooLong => {
                write!(f, "channel id exceeds {MAX_CHANNEL_LENGTH} characters")
            }
            ChannelError::InvalidCharacters => write!(f, "channel id contains invalid characters"),
        }
    }
}

impl std::error::Error for ChannelError {}

/// Validate a voice channel id
///
/// Checks:
/// - Not empty
/// - Does not exceed 64 characters
/// - Contains only Unicode letters or ASCII graphic characters (no whitespace)
///
/// # Errors
///
/// Returns a `ChannelError` variant describing the validation failure.
///
/// # Examples
///
/// ```
/// use parley_common::validators::{validate_channel, ChannelError};
///
/// assert!(validate_channel("voice-1").is_ok());
/// assert!(validate_channel("lounge_2").is_ok());
///
/// assert_eq!(validate_channel(""), Err(ChannelError::Empty));
/// assert_eq!(validate_channel("voice 1"), Err(ChannelError::InvalidCharacters));
/// ```
pub fn validate_channel(channel: &str) -> Result<(), ChannelError> {
    if channel.is_empty() {
        return Err(ChannelError::Empty);
    }

    if channel.chars().count() > MAX_CHANNEL_LENGTH {
        return Err(ChannelError::TooLong);
    }

    for ch in channel.chars() {
        if !ch.is_alphabetic() && !ch.is_ascii_graphic() {
            return Err(ChannelError::InvalidCharacters);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_channels() {
        assert!(validate_channel("voice-1").is_ok());
        assert!(validate_channel("#general").is_ok());
        assert!(validate_channel("a").is_ok());
        assert!(validate_channel("голос").is_ok());
    }

    #[test]
    fn test_channel_empty() {
        assert_eq!(validate_channel(""), Err(ChannelError::Empty));
    }

    #[test]
    fn test_channel_length_boundary() {
        assert!(validate_channel(&"a".repeat(MAX_CHANNEL_LENGTH)).is_ok());
        assert_eq!(
            validate_channel(&"a".repeat(MAX_CHANNEL_LENGTH + 1)),
            Err(ChannelError::TooLong)
        );
    }

    #[test]
    fn test_channel_whitespace_and_control() {
        assert_eq!(validate_channel("voice 1"), Err(ChannelError::InvalidCharacters));
        assert_eq!(validate_channel("voice\t1"), Err(ChannelError::InvalidCharacters));
        assert_eq!(validate_channel("voice\u{0}"), Err(ChannelError::InvalidCharacters));
    }
}
