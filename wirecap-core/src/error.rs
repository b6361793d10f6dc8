//! Error types for wirecap

use thiserror::Error;

/// Result type alias for wirecap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for wirecap
#[derive(Error, Debug)]
pub enum Error {
    /// Failure reported by the capture engine. The text is the engine's own message.
    #[error("Packet capture error: {0}")]
    Capture(String),

    /// The reader, writer or handle has already been released
    #[error("Cannot access a disposed {0}")]
    Disposed(&'static str),

    /// The operation conflicts with the current session state
    #[error("Invalid operation: {0}")]
    InvalidOperation(&'static str),

    /// Numeric argument outside its accepted range
    #[error("Argument '{name}' out of range: {reason}")]
    OutOfRange { name: &'static str, reason: String },

    /// Required argument was empty
    #[error("Argument '{0}' must not be empty")]
    EmptyArgument(&'static str),

    /// No capture device with the given name
    #[error("Device '{0}' not found")]
    DeviceNotFound(String),

    /// OS-level failure outside the capture engine (e.g. spawning the worker thread)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a capture error carrying an engine message
    pub fn capture<S: Into<String>>(msg: S) -> Self {
        Error::Capture(msg.into())
    }

    /// Create an out-of-range argument error
    pub fn out_of_range<S: Into<String>>(name: &'static str, reason: S) -> Self {
        Error::OutOfRange {
            name,
            reason: reason.into(),
        }
    }

    /// The engine message, if this is a capture error
    pub fn capture_message(&self) -> Option<&str> {
        match self {
            Error::Capture(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self, Error::Disposed(_))
    }

    pub fn is_invalid_operation(&self) -> bool {
        matches!(self, Error::InvalidOperation(_))
    }
}
