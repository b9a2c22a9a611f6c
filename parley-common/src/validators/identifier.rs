//! Server-assigned identifier validation
//!
//! Transport, producer, and consumer ids are minted by the relay and echoed
//! back verbatim, so the client only checks they are sane tokens.

/// Maximum length for server-assigned identifiers
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validation error for server-assigned identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    /// Identifier is empty
    Empty,
    /// Identifier exceeds maximum length
    TooLong,
    /// Identifier contains characters outside printable ASCII
    InvalidCharacters,
}

impl std::fmt::Display for IdentifierError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentifierError::Empty => write!(f, "identifier is empty"),
            IdentifierError::TooLong => {
                write!(f, "identifier exceeds {MAX_IDENTIFIER_LENGTH} characters")
            }
            IdentifierError::InvalidCharacters => {
                write!(f, "identifier contains invalid characters")
            }
        }
    }
}

impl std::error::Error for IdentifierError {}

/// Validate a server-assigned identifier
///
/// # Errors
///
/// Returns an `IdentifierError` variant describing the validation failure.
pub fn validate_identifier(id: &str) -> Result<(), IdentifierError> {
    if id.is_empty() {
        return Err(IdentifierError::Empty);
    }

    if id.len() > MAX_IDENTIFIER_LENGTH {
        return Err(IdentifierError::TooLong);
    }

    if !id.chars().all(|ch| ch.is_ascii_graphic()) {
        return Err(IdentifierError::InvalidCharacters);
    }

    Ok(())
}
