//! Error types for IR daemon operations.

use thiserror::Error;

/// Primary error type for IR daemon operations.
#[derive(Error, Debug)]
pub enum IrdError {
    // Configuration errors
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    #[error("Configuration parse error at line {line}: {message}")]
    ConfigParse { line: usize, message: String },

    // Lookup errors
    #[error("Unknown remote: {name}")]
    UnknownRemote { name: String },

    #[error("Unknown button '{button}' on remote '{remote}'")]
    UnknownButton { remote: String, button: String },

    // Protocol errors
    #[error("Protocol error: {0}")]
    Protocol(String),

    // Hardware errors
    #[error("Hardware error: {0}")]
    Hardware(String),

    #[error("Hardware cannot transmit")]
    CannotSend,

    #[error("Hardware cannot receive")]
    CannotReceive,

    // State conflicts
    #[error("Transmission conflict: {0}")]
    StateConflict(String),

    // Encoding errors
    #[error("Signal for '{remote}' exceeds declared total length by {excess} us")]
    SignalTooLong { remote: String, excess: u64 },

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl IrdError {
    /// Returns true if the error is recoverable by the user.
    pub const fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound { .. }
                | Self::ConfigParse { .. }
                | Self::UnknownRemote { .. }
                | Self::UnknownButton { .. }
                | Self::StateConflict(_)
                | Self::CannotSend
        )
    }

    /// Returns a suggestion for how to fix the error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::ConfigNotFound { .. } => Some("Pass --config or set IRD_CONFIG"),
            Self::ConfigParse { .. } => Some("Run: ird check --config <file>"),
            Self::UnknownRemote { .. } => Some("Run: ird list"),
            Self::UnknownButton { .. } => Some("Run: ird list <remote>"),
            Self::StateConflict(_) => Some("Stop the active transmission with SEND_STOP first"),
            _ => None,
        }
    }
}

/// Convenience type alias for Results using IrdError.
pub type Result<T> = std::result::Result<T, IrdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parse_display() {
        let err = IrdError::ConfigParse {
            line: 12,
            message: "unknown key `bitz`".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Configuration parse error at line 12: unknown key `bitz`"
        );
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(
            IrdError::UnknownRemote {
                name: "tv".to_string()
            }
            .is_user_recoverable()
        );
        assert!(!IrdError::Hardware("device gone".to_string()).is_user_recoverable());
    }

    #[test]
    fn test_suggestions() {
        assert!(
            IrdError::ConfigParse {
                line: 1,
                message: String::new()
            }
            .suggestion()
            .is_some()
        );
        assert!(IrdError::CannotReceive.suggestion().is_none());
    }
}
