use crate::port::PortError;
use thiserror::Error;

/// Session-level error taxonomy.
///
/// Every variant is surfaced to the operator through
/// [`crate::events::LinkEvents::failure`]; none of them terminate the
/// process. Open and read failures force the session back to `Closed`, send
/// failures leave it untouched.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The device chooser failed for a reason other than cancellation.
    #[error("Device selection failed: {0}")]
    Selection(#[source] PortError),

    #[error("No serial device has been selected")]
    NoDeviceSelected,

    #[error("Failed to open {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: PortError,
    },

    /// The opened device could not report an identity at all.
    #[error("Unable to connect to serial device {0}")]
    DeviceUnavailable(String),

    /// The opened device reported neither a vendor nor a product id.
    #[error("The serial device {0} is not from a valid vendor")]
    UnrecognizedVendor(String),

    #[error("Serial read failed: {0}")]
    Read(#[source] PortError),

    #[error("Serial stream ended")]
    StreamEnded,

    #[error("Operation requires an open serial link, but the link is closed")]
    NotOpen,

    #[error("Failed to send '{command}': {source}")]
    Write {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Speeds travel in a four character field.
    #[error("Speed {0} does not fit the 4 character speed field")]
    InvalidSpeed(u32),
}

/// Result type for link operations.
pub type LinkResult<T> = Result<T, LinkError>;
