//! Native serial devices backed by `tokio-serial`.
//!
//! Devices are discovered with `serialport::available_ports`, opened as a
//! `tokio_serial::SerialStream` and split into independent read and write
//! halves so the read loop and the command writer never contend.

use super::error::PortError;
use super::traits::{DeviceChooser, DeviceIdentity, PortConfiguration, PortStreams, SerialDevice};
use async_trait::async_trait;
use serialport::{SerialPortInfo, SerialPortType};
use tracing::{debug, info};

/// A serial port found on this machine.
#[derive(Debug, Clone)]
pub struct NativeSerialDevice {
    info: SerialPortInfo,
}

impl NativeSerialDevice {
    pub fn new(info: SerialPortInfo) -> Self {
        Self { info }
    }

    /// Enumerate the serial ports currently attached to the system.
    pub fn available() -> Result<Vec<Self>, PortError> {
        let ports = serialport::available_ports()?;
        debug!("Found {} serial port(s)", ports.len());
        Ok(ports.into_iter().map(Self::new).collect())
    }

    /// One-line human readable description, used by port listings.
    pub fn describe(&self) -> String {
        match &self.info.port_type {
            SerialPortType::UsbPort(usb) => {
                let product = usb
                    .product
                    .as_deref()
                    .or(usb.manufacturer.as_deref())
                    .unwrap_or("USB serial");
                format!(
                    "{} ({} {:04X}:{:04X})",
                    self.info.port_name, product, usb.vid, usb.pid
                )
            }
            SerialPortType::BluetoothPort => format!("{} (Bluetooth)", self.info.port_name),
            SerialPortType::PciPort => format!("{} (PCI)", self.info.port_name),
            SerialPortType::Unknown => format!("{} (unknown type)", self.info.port_name),
        }
    }
}

#[async_trait]
impl SerialDevice for NativeSerialDevice {
    fn name(&self) -> &str {
        &self.info.port_name
    }

    fn identity(&self) -> Option<DeviceIdentity> {
        // Non-USB ports expose no ids and are therefore not recognized.
        match &self.info.port_type {
            SerialPortType::UsbPort(usb) => Some(DeviceIdentity {
                vendor_id: Some(usb.vid),
                product_id: Some(usb.pid),
                manufacturer: usb.manufacturer.clone(),
                product: usb.product.clone(),
                serial_number: usb.serial_number.clone(),
            }),
            _ => Some(DeviceIdentity::default()),
        }
    }

    async fn open(&self, config: &PortConfiguration) -> Result<PortStreams, PortError> {
        let port_name = self.name();
        let builder = tokio_serial::new(port_name, config.baud_rate)
            .data_bits(config.data_bits.into())
            .flow_control(config.flow_control.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into());

        let stream = tokio_serial::SerialStream::open(&builder)
            .map_err(|e| PortError::from_open(port_name, e))?;

        info!("Opened {} at {} baud", port_name, config.baud_rate);

        let (readable, writable) = tokio::io::split(stream);
        Ok(PortStreams {
            readable: Box::new(readable),
            writable: Box::new(writable),
        })
    }
}

/// Chooser that always picks one named port.
#[derive(Debug, Clone)]
pub struct FixedPortChooser {
    port_name: String,
}

impl FixedPortChooser {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
        }
    }
}

#[async_trait]
impl DeviceChooser for FixedPortChooser {
    async fn request_port(&self) -> Result<Option<Box<dyn SerialDevice>>, PortError> {
        let device = NativeSerialDevice::available()?
            .into_iter()
            .find(|d| d.name() == self.port_name)
            .ok_or_else(|| PortError::not_found(&self.port_name))?;
        Ok(Some(Box::new(device)))
    }
}
