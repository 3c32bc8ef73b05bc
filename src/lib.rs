//! Stepper Link Library
//!
//! Host side of the serial link to a stepper-motor tester: device selection,
//! session lifecycle, CRLF line framing, the command protocol and an operator
//! console.
//!
//! # Modules
//!
//! - `port`: Serial transport abstraction (native `tokio-serial` and mock)
//! - `framing`: Byte stream to CRLF-delimited lines
//! - `session`: Link session lifecycle, read loop and command writer
//! - `protocol`: Command encoding and inbound message recognition
//! - `controller`: Operator actions and inbound message handling
//! - `state`: Host-side mirror of the device
//! - `events`: Notifications to the front-end
//! - `config`: Configuration management with TOML support
//! - `logging`: `tracing` subscriber setup
//! - `console`: Line-oriented operator console

pub mod config;
pub mod console;
pub mod controller;
pub mod error;
pub mod events;
pub mod framing;
pub mod logging;
pub mod port;
pub mod protocol;
pub mod session;
pub mod state;

// Re-export commonly used types for convenience
pub use controller::StepperController;
pub use error::{LinkError, LinkResult};
pub use events::{Direction, EventRecorder, LinkEvents, LogEntry, RecordedEvent};
pub use framing::{read_lines, LineFramer};
pub use port::{
    DeviceChooser, DeviceIdentity, FixedPortChooser, MockSerialDevice, NativeSerialDevice,
    PortConfiguration, PortError, SerialDevice,
};
pub use protocol::{Command, DeviceMessage};
pub use session::{CommandLink, LinkSession, LinkState, MessageDispatcher};
pub use state::{DeviceState, MotionStatus};

// Re-export config types
pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
