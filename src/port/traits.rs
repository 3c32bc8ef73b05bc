//! Core traits for the serial transport.
//!
//! A [`DeviceChooser`] yields a [`SerialDevice`]; opening the device yields
//! the [`PortStreams`] pair that the link session splits between its read
//! loop and its command writer. Real hardware and the in-memory mock both
//! implement these traits.

use super::error::PortError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

/// Default baud rate of the stepper tester firmware.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default read chunk size in bytes.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Transport settings applied when a device is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfiguration {
    /// Baud rate (bits per second).
    pub baud_rate: u32,

    /// Number of data bits (5, 6, 7, or 8).
    pub data_bits: DataBits,

    /// Flow control mode.
    pub flow_control: FlowControl,

    /// Parity checking mode.
    pub parity: Parity,

    /// Number of stop bits.
    pub stop_bits: StopBits,

    /// Maximum number of bytes pulled from the device per read.
    pub buffer_size: usize,
}

impl Default for PortConfiguration {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            flow_control: FlowControl::None,
            parity: Parity::None,
            stop_bits: StopBits::One,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

/// Flow control modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowControl {
    None,
    Software,
    Hardware,
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Software => serialport::FlowControl::Software,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

/// Parity checking modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    One,
    Two,
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// USB identity reported by a serial device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
}

impl DeviceIdentity {
    /// Identity with just a vendor/product pair.
    pub fn usb(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id: Some(vendor_id),
            product_id: Some(product_id),
            ..Default::default()
        }
    }

    /// A device is recognized when it reports at least one USB id.
    pub fn is_recognized(&self) -> bool {
        self.vendor_id.is_some() || self.product_id.is_some()
    }
}

/// Read half of an open port (device to host).
pub type PortReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of an open port (host to device).
pub type PortWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The two sub-streams of an opened serial device.
pub struct PortStreams {
    pub readable: PortReader,
    pub writable: PortWriter,
}

impl std::fmt::Debug for PortStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortStreams").finish_non_exhaustive()
    }
}

/// A serial device picked by the operator but not necessarily open.
#[async_trait]
pub trait SerialDevice: Send + Sync + std::fmt::Debug {
    /// Get the name/path of this serial device.
    fn name(&self) -> &str;

    /// USB identity of the device, or `None` if it cannot be queried.
    fn identity(&self) -> Option<DeviceIdentity>;

    /// Open the device with the given settings.
    async fn open(&self, config: &PortConfiguration) -> Result<PortStreams, PortError>;
}

/// Prompts the operator for a serial device.
///
/// `Ok(None)` means the operator cancelled the selection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceChooser: Send + Sync {
    async fn request_port(&self) -> Result<Option<Box<dyn SerialDevice>>, PortError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configuration() {
        let config = PortConfiguration::default();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.data_bits, DataBits::Eight);
        assert_eq!(config.flow_control, FlowControl::None);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.stop_bits, StopBits::One);
        assert_eq!(config.buffer_size, 1024);
    }

    #[test]
    fn test_serialport_conversions() {
        let bits: serialport::DataBits = DataBits::Seven.into();
        assert_eq!(bits, serialport::DataBits::Seven);

        let flow: serialport::FlowControl = FlowControl::Hardware.into();
        assert_eq!(flow, serialport::FlowControl::Hardware);

        let parity: serialport::Parity = Parity::Even.into();
        assert_eq!(parity, serialport::Parity::Even);

        let stop: serialport::StopBits = StopBits::Two.into();
        assert_eq!(stop, serialport::StopBits::Two);
    }

    #[test]
    fn test_identity_recognition() {
        assert!(DeviceIdentity::usb(0x2341, 0x0043).is_recognized());
        assert!(DeviceIdentity {
            product_id: Some(0x7523),
            ..Default::default()
        }
        .is_recognized());
        assert!(!DeviceIdentity::default().is_recognized());
    }
}
