//! Transport-level error types.
//!
//! Kept separate from [`crate::error::LinkError`] so the session layer can
//! decide how each transport failure affects the link lifecycle.

use thiserror::Error;

/// Errors raised by serial devices, device choosers and the line stream.
#[derive(Debug, Error)]
pub enum PortError {
    /// The requested serial port is not present on the system.
    #[error("Serial port not found: {0}")]
    NotFound(String),

    /// An I/O error occurred while opening, reading or writing.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The port rejected its configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A serialport-specific error occurred.
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl PortError {
    /// Create a NotFound error from a port name.
    pub fn not_found(port_name: impl Into<String>) -> Self {
        Self::NotFound(port_name.into())
    }

    /// Create a Config error from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Map a `serialport` open error onto the variants callers match on.
    pub(crate) fn from_open(port_name: &str, err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::NoDevice => Self::not_found(port_name),
            serialport::ErrorKind::InvalidInput => Self::config(err.to_string()),
            _ => Self::Serial(err),
        }
    }
}
