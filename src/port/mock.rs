//! In-memory serial device for testing.
//!
//! `MockSerialDevice` behaves like a real device without hardware: opening it
//! creates a `tokio::io::duplex` pipe, hands the host end to the caller and
//! delivers the device end to the paired [`MockRemote`]. Tests drive the
//! firmware side of the conversation through [`MockEndpoint`].
//!
//! Read, write and shutdown failures can be queued on the device; the host
//! halves return them from the next matching I/O call.
//!
//! # Example
//! ```
//! use stepper_link::port::{MockSerialDevice, PortConfiguration, SerialDevice};
//! use tokio::io::AsyncWriteExt;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (device, mut remote) = MockSerialDevice::new("MOCK0");
//! let mut streams = device.open(&PortConfiguration::default()).await?;
//!
//! let mut endpoint = remote.connected().await.expect("device opened");
//! streams.writable.write_all(b"EN\n").await?;
//! assert_eq!(endpoint.receive_line().await?, "EN");
//! # Ok(())
//! # }
//! ```

use super::error::PortError;
use super::traits::{DeviceIdentity, PortConfiguration, PortStreams, SerialDevice};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, ReadBuf,
};
use tokio::sync::mpsc;

/// Arduino Uno ids, used as the default mock identity.
const MOCK_VENDOR_ID: u16 = 0x2341;
const MOCK_PRODUCT_ID: u16 = 0x0043;

#[derive(Debug, Default)]
struct MockDeviceState {
    /// Error message returned by the next `open` call.
    fail_next_open: Option<String>,
    /// Error message returned by the next read on the host side.
    fail_next_read: Option<String>,
    /// Error message returned by the next write on the host side.
    fail_next_write: Option<String>,
    /// Error message returned by the next writer shutdown.
    fail_next_shutdown: Option<String>,
    /// Number of successful opens.
    open_count: usize,
    /// Settings passed to the most recent open.
    last_config: Option<PortConfiguration>,
}

/// Mock serial device implementing [`SerialDevice`].
#[derive(Debug, Clone)]
pub struct MockSerialDevice {
    name: String,
    identity: Option<DeviceIdentity>,
    state: Arc<Mutex<MockDeviceState>>,
    remote_tx: mpsc::UnboundedSender<MockEndpoint>,
}

impl MockSerialDevice {
    /// Create a recognized mock device and the handle for its firmware side.
    pub fn new(name: impl Into<String>) -> (Self, MockRemote) {
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        let device = Self {
            name: name.into(),
            identity: Some(DeviceIdentity::usb(MOCK_VENDOR_ID, MOCK_PRODUCT_ID)),
            state: Arc::new(Mutex::new(MockDeviceState::default())),
            remote_tx,
        };
        (device, MockRemote { remote_rx })
    }

    /// Replace the identity reported after opening.
    pub fn with_identity(mut self, identity: Option<DeviceIdentity>) -> Self {
        self.identity = identity;
        self
    }

    /// Make the next `open` call fail with the given message.
    pub fn fail_next_open(&self, message: impl Into<String>) {
        self.state.lock().fail_next_open = Some(message.into());
    }

    /// Make the next host read fail.
    ///
    /// A read already waiting for data fails once the endpoint sends more.
    pub fn fail_next_read(&self, message: impl Into<String>) {
        self.state.lock().fail_next_read = Some(message.into());
    }

    /// Make the next host write fail.
    pub fn fail_next_write(&self, message: impl Into<String>) {
        self.state.lock().fail_next_write = Some(message.into());
    }

    /// Make the next shutdown of the host writer fail.
    pub fn fail_next_shutdown(&self, message: impl Into<String>) {
        self.state.lock().fail_next_shutdown = Some(message.into());
    }

    /// Number of times the device has been opened successfully.
    pub fn open_count(&self) -> usize {
        self.state.lock().open_count
    }

    /// Settings used by the most recent successful open.
    pub fn last_config(&self) -> Option<PortConfiguration> {
        self.state.lock().last_config.clone()
    }
}

#[async_trait]
impl SerialDevice for MockSerialDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn identity(&self) -> Option<DeviceIdentity> {
        self.identity.clone()
    }

    async fn open(&self, config: &PortConfiguration) -> Result<PortStreams, PortError> {
        {
            let mut state = self.state.lock();
            if let Some(message) = state.fail_next_open.take() {
                return Err(PortError::Io(std::io::Error::other(message)));
            }
            state.open_count += 1;
            state.last_config = Some(config.clone());
        }

        let (host, device) = tokio::io::duplex(config.buffer_size.max(1));
        // The remote may already be gone; the host side then sees EOF.
        let _ = self.remote_tx.send(MockEndpoint {
            stream: BufReader::new(device),
        });

        let (readable, writable) = tokio::io::split(host);
        Ok(PortStreams {
            readable: Box::new(MockHalf::new(readable, &self.state)),
            writable: Box::new(MockHalf::new(writable, &self.state)),
        })
    }
}

/// Host half of a mock connection that fails on request.
struct MockHalf<T> {
    inner: T,
    state: Arc<Mutex<MockDeviceState>>,
}

impl<T> MockHalf<T> {
    fn new(inner: T, state: &Arc<Mutex<MockDeviceState>>) -> Self {
        Self {
            inner,
            state: Arc::clone(state),
        }
    }
}

fn injected(slot: &mut Option<String>) -> Option<io::Error> {
    slot.take().map(io::Error::other)
}

impl<T: AsyncRead + Unpin> AsyncRead for MockHalf<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Some(err) = injected(&mut self.state.lock().fail_next_read) {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for MockHalf<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if let Some(err) = injected(&mut self.state.lock().fail_next_write) {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if let Some(err) = injected(&mut self.state.lock().fail_next_shutdown) {
            return Poll::Ready(Err(err));
        }
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// Receives the firmware end of every connection opened on a mock device.
#[derive(Debug)]
pub struct MockRemote {
    remote_rx: mpsc::UnboundedReceiver<MockEndpoint>,
}

impl MockRemote {
    /// Wait for the next successful open of the paired device.
    pub async fn connected(&mut self) -> Option<MockEndpoint> {
        self.remote_rx.recv().await
    }
}

/// Firmware side of one open mock connection.
#[derive(Debug)]
pub struct MockEndpoint {
    stream: BufReader<DuplexStream>,
}

impl MockEndpoint {
    /// Send raw text to the host, exactly as given.
    pub async fn send(&mut self, text: &str) -> std::io::Result<()> {
        self.send_bytes(text.as_bytes()).await
    }

    /// Send raw bytes to the host.
    pub async fn send_bytes(&mut self, data: &[u8]) -> std::io::Result<()> {
        let stream = self.stream.get_mut();
        stream.write_all(data).await?;
        stream.flush().await
    }

    /// Send one CRLF-terminated line, the way the firmware reports status.
    pub async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        self.send(&format!("{line}\r\n")).await
    }

    /// Read one command line written by the host, without its `\n`.
    ///
    /// Fails with `UnexpectedEof` once the host has closed the port.
    pub async fn receive_line(&mut self) -> std::io::Result<String> {
        let mut line = String::new();
        let read = self.stream.read_line(&mut line).await?;
        if read == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "host closed the port",
            ));
        }
        if line.ends_with('\n') {
            line.pop();
        }
        Ok(line)
    }

    /// Drop the connection, which the host observes as end of stream.
    pub fn hang_up(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_open_delivers_endpoint() {
        let (device, mut remote) = MockSerialDevice::new("MOCK0");
        let mut streams = device.open(&PortConfiguration::default()).await.unwrap();
        let mut endpoint = remote.connected().await.unwrap();

        streams.writable.write_all(b"DI\n").await.unwrap();
        assert_eq!(endpoint.receive_line().await.unwrap(), "DI");

        endpoint.send_line("ok").await.unwrap();
        let mut buffer = [0u8; 4];
        streams.readable.read_exact(&mut buffer).await.unwrap();
        assert_eq!(&buffer, b"ok\r\n");

        assert_eq!(device.open_count(), 1);
        assert_eq!(device.last_config(), Some(PortConfiguration::default()));
    }

    #[tokio::test]
    async fn test_fail_next_open() {
        let (device, _remote) = MockSerialDevice::new("MOCK0");
        device.fail_next_open("access denied");

        let err = device.open(&PortConfiguration::default()).await.unwrap_err();
        assert!(err.to_string().contains("access denied"));
        assert_eq!(device.open_count(), 0);

        assert!(device.open(&PortConfiguration::default()).await.is_ok());
        assert_eq!(device.open_count(), 1);
    }

    #[tokio::test]
    async fn test_injected_io_failures_fire_once() {
        let (device, mut remote) = MockSerialDevice::new("MOCK0");
        let mut streams = device.open(&PortConfiguration::default()).await.unwrap();
        let mut endpoint = remote.connected().await.unwrap();

        device.fail_next_write("cable pulled");
        let err = streams.writable.write_all(b"EN\n").await.unwrap_err();
        assert_eq!(err.to_string(), "cable pulled");
        streams.writable.write_all(b"DI\n").await.unwrap();
        assert_eq!(endpoint.receive_line().await.unwrap(), "DI");

        device.fail_next_read("framing error");
        let mut buffer = [0u8; 4];
        let err = streams.readable.read(&mut buffer).await.unwrap_err();
        assert_eq!(err.to_string(), "framing error");

        device.fail_next_shutdown("flush timeout");
        assert!(streams.writable.shutdown().await.is_err());
        assert!(streams.writable.shutdown().await.is_ok());
    }

    #[tokio::test]
    async fn test_hang_up_is_end_of_stream() {
        let (device, mut remote) = MockSerialDevice::new("MOCK0");
        let mut streams = device.open(&PortConfiguration::default()).await.unwrap();
        remote.connected().await.unwrap().hang_up();

        let mut buffer = [0u8; 8];
        let read = streams.readable.read(&mut buffer).await.unwrap();
        assert_eq!(read, 0);
    }

    #[test]
    fn test_identity_override() {
        let (device, _remote) = MockSerialDevice::new("MOCK0");
        assert!(device.identity().unwrap().is_recognized());

        let device = device.with_identity(None);
        assert!(device.identity().is_none());
    }
}
