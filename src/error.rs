//! # Error Types
//!
//! Custom error types for the field node using `thiserror`, plus the flat
//! [`ErrorKind`] reported back over the command protocol.

use std::fmt;

use thiserror::Error;

/// Main error type for the field node
#[derive(Debug, Error)]
pub enum NodeError {
    /// Host configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Retained state could not be encoded or decoded
    #[error("Retained state error: {0}")]
    Json(#[from] serde_json::Error),

    /// The persisted settings store could not be opened
    #[error("Settings store unavailable: {0}")]
    StoreBusy(String),

    /// A persisted setting no longer passes its validator
    #[error("Invalid persisted setting '{key}': {kind}")]
    InvalidSetting { key: String, kind: ErrorKind },

    /// Radio-level transmission failure
    #[error("Radio error: {0}")]
    Radio(String),

    /// Serial console errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// Command console errors
    #[error("Console error: {0}")]
    Console(String),
}

/// Result type alias for the field node
pub type Result<T> = std::result::Result<T, NodeError>;

/// Outcome of a setting mutation or console command.
///
/// This is a status code, not a Rust error: it is returned by value to the
/// caller of `set` and command dispatch, and rendered as a single line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoError,
    LengthError,
    FormatError,
    CommandError,
    KeyError,
    ValueError,
    BusyError,
}

impl ErrorKind {
    /// Human-readable line describing this kind.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorKind::NoError => "OK",
            ErrorKind::LengthError => "Exceeded the maximum length of the input",
            ErrorKind::FormatError => "The command was not formatted as expected",
            ErrorKind::CommandError => "The specified command was not recognized",
            ErrorKind::KeyError => "There was no setting matching the specified key",
            ErrorKind::ValueError => "The specified value was not formatted correctly",
            ErrorKind::BusyError => "Uplink in progress - could not configure; try again later",
        }
    }

    /// `true` for [`ErrorKind::NoError`].
    pub fn is_ok(&self) -> bool {
        matches!(self, ErrorKind::NoError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_distinct_line() {
        let kinds = [
            ErrorKind::NoError,
            ErrorKind::LengthError,
            ErrorKind::FormatError,
            ErrorKind::CommandError,
            ErrorKind::KeyError,
            ErrorKind::ValueError,
            ErrorKind::BusyError,
        ];
        let mut lines: Vec<&str> = kinds.iter().map(|k| k.description()).collect();
        lines.sort();
        lines.dedup();
        assert_eq!(lines.len(), kinds.len());
    }

    #[test]
    fn test_only_no_error_is_ok() {
        assert!(ErrorKind::NoError.is_ok());
        assert!(!ErrorKind::BusyError.is_ok());
        assert_eq!(ErrorKind::NoError.to_string(), "OK");
    }

    #[test]
    fn test_invalid_setting_message() {
        let err = NodeError::InvalidSetting {
            key: "dr".to_string(),
            kind: ErrorKind::ValueError,
        };
        let msg = err.to_string();
        assert!(msg.contains("dr"));
        assert!(msg.contains("not formatted correctly"));
    }
}
