//! Error types for the checkpoint benchmark

use thiserror::Error;

/// Result type alias using the benchmark Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the checkpoint benchmark
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Argument error: {message}")]
    Parse { message: String },

    // Session errors
    #[error("Cannot {operation} a checkpoint session that is {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Buffer length mismatch: session registered {expected} data units, got {actual}")]
    BufferMismatch { expected: usize, actual: usize },

    // Storage errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    // Topology errors
    #[error("Topology error: {message}")]
    Topology { message: String },

    #[error("Stopped because another rank failed")]
    PeerFailed,

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Channel errors
    #[error("Channel closed: {channel}")]
    ChannelClosed { channel: String },

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Shorthand for an [`Error::InvalidConfig`]
    pub fn config(message: impl Into<String>) -> Self {
        Error::InvalidConfig {
            message: message.into(),
        }
    }

    /// Shorthand for an [`Error::Storage`]
    pub fn storage(message: impl Into<String>) -> Self {
        Error::Storage {
            message: message.into(),
        }
    }

    /// Returns true if every rank ends the run with this error.
    ///
    /// Such errors are reported by the root rank only so that the output
    /// is not duplicated once per process.
    pub fn is_collective(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfig { .. } | Error::Parse { .. } | Error::PeerFailed
        )
    }

    /// Returns true if this error is a session call made in the wrong state
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidState { .. } | Error::BufferMismatch { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
