//! Serial transport abstraction.
//!
//! Provides the device and chooser traits used by the link session, a native
//! backend built on `tokio-serial`, and an in-memory mock for tests.

pub mod error;
pub mod mock;
pub mod native;
pub mod traits;

pub use error::PortError;
pub use mock::{MockEndpoint, MockRemote, MockSerialDevice};
pub use native::{FixedPortChooser, NativeSerialDevice};
pub use traits::*;
