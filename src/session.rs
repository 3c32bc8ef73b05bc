//! Serial link session: lifecycle, read loop and command writer.
//!
//! # Lifecycle
//!
//! ```text
//! Closed ──select_device/open──> Opening ──> Open ──close──> Closing ──> Closed
//!                                   │          │
//!                                   └─ fault ──┴──> close() ──> Closed
//! ```
//!
//! One read-loop task runs per open session. It is the only reader of the
//! port; the [`CommandLink`] is the only writer. Closing the session cancels
//! the pending read and waits for the read loop to drop its half of the port,
//! so the transport is released by the time the session reports `Closed`.

use crate::error::{LinkError, LinkResult};
use crate::events::{LinkEvents, LogEntry};
use crate::framing::read_lines;
use crate::port::{DeviceChooser, PortConfiguration, PortError, PortWriter, SerialDevice};
use crate::protocol::Command;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::io::AsyncWriteExt;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a [`LinkSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LinkState {
    Closed,
    Opening,
    Open,
    Closing,
}

/// Receives every inbound line, in order, one at a time.
///
/// The read loop waits for `dispatch` to finish before reading the next
/// line.
#[async_trait]
pub trait MessageDispatcher: Send + Sync {
    async fn dispatch(&self, line: &str);
}

/// Write side of the link.
///
/// Cloned freely: the session, the operator front-end and the dispatcher all
/// send through the same writer. Each command is written as `text + "\n"`
/// with no reply correlation.
#[derive(Clone)]
pub struct CommandLink {
    writer: Arc<tokio::sync::Mutex<Option<PortWriter>>>,
    events: Arc<dyn LinkEvents>,
}

impl CommandLink {
    pub fn new(events: Arc<dyn LinkEvents>) -> Self {
        Self {
            writer: Arc::new(tokio::sync::Mutex::new(None)),
            events,
        }
    }

    /// Install the write half of a freshly opened port.
    pub async fn attach(&self, writer: PortWriter) {
        *self.writer.lock().await = Some(writer);
    }

    /// Remove and shut down the current writer, if any.
    pub async fn detach(&self) -> std::io::Result<()> {
        let writer = self.writer.lock().await.take();
        match writer {
            Some(mut writer) => writer.shutdown().await,
            None => Ok(()),
        }
    }

    pub async fn is_attached(&self) -> bool {
        self.writer.lock().await.is_some()
    }

    /// Write one command line and log it.
    ///
    /// Failures are reported to the event sink and returned; they never
    /// close the link.
    pub async fn send(&self, command: &str) -> LinkResult<()> {
        match self.write_line(command).await {
            Ok(()) => {
                debug!(command, "Sent command");
                self.events.line_logged(&LogEntry::outbound(command));
                Ok(())
            }
            Err(err) => {
                warn!("{err}");
                self.events.failure(&err);
                Err(err)
            }
        }
    }

    /// Encode and send a typed command.
    pub async fn send_command(&self, command: Command) -> LinkResult<()> {
        self.send(&command.to_string()).await
    }

    async fn write_line(&self, command: &str) -> LinkResult<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(LinkError::NotOpen)?;

        let mut line = String::with_capacity(command.len() + 1);
        line.push_str(command);
        line.push('\n');

        let write_error = |source: std::io::Error| LinkError::Write {
            command: command.to_string(),
            source,
        };
        writer.write_all(line.as_bytes()).await.map_err(write_error)?;
        writer.flush().await.map_err(write_error)
    }
}

impl std::fmt::Debug for CommandLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandLink").finish_non_exhaustive()
    }
}

struct SessionInner {
    chooser: Arc<dyn DeviceChooser>,
    settings: PortConfiguration,
    events: Arc<dyn LinkEvents>,
    link: CommandLink,
    dispatcher: Mutex<Option<Arc<dyn MessageDispatcher>>>,
    device: Mutex<Option<Arc<dyn SerialDevice>>>,
    state: watch::Sender<LinkState>,
    read_cancel: Mutex<Option<oneshot::Sender<()>>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
    /// Bumped on every successful open so a finished read loop can tell
    /// whether the session it belongs to is still the current one.
    generation: AtomicU64,
}

/// One serial connection to the stepper tester, from selection to close.
#[derive(Clone)]
pub struct LinkSession {
    inner: Arc<SessionInner>,
}

impl LinkSession {
    pub fn new(
        chooser: Arc<dyn DeviceChooser>,
        settings: PortConfiguration,
        events: Arc<dyn LinkEvents>,
    ) -> Self {
        let (state, _) = watch::channel(LinkState::Closed);
        Self {
            inner: Arc::new(SessionInner {
                chooser,
                settings,
                link: CommandLink::new(Arc::clone(&events)),
                events,
                dispatcher: Mutex::new(None),
                device: Mutex::new(None),
                state,
                read_cancel: Mutex::new(None),
                read_task: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LinkState {
        *self.inner.state.borrow()
    }

    /// Watch lifecycle changes.
    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.inner.state.subscribe()
    }

    /// The shared command writer.
    pub fn link(&self) -> CommandLink {
        self.inner.link.clone()
    }

    /// Name of the selected device, if any.
    pub fn device_name(&self) -> Option<String> {
        self.inner
            .device
            .lock()
            .as_ref()
            .map(|device| device.name().to_string())
    }

    /// Install the dispatcher used by subsequent opens.
    pub fn set_dispatcher(&self, dispatcher: Arc<dyn MessageDispatcher>) {
        *self.inner.dispatcher.lock() = Some(dispatcher);
    }

    /// Ask the chooser for a device and open it.
    ///
    /// Ignored unless the session is `Closed`. A cancelled selection is not
    /// an error and leaves the session `Closed`.
    pub async fn select_device(&self) -> LinkResult<()> {
        let state = self.state();
        if state != LinkState::Closed {
            debug!("Device selection ignored while link is {:?}", state);
            return Ok(());
        }

        let device = match self.inner.chooser.request_port().await {
            Ok(Some(device)) => device,
            Ok(None) => {
                debug!("Device selection cancelled");
                return Ok(());
            }
            Err(source) => return Err(self.report(LinkError::Selection(source))),
        };

        info!("Selected serial device {}", device.name());
        *self.inner.device.lock() = Some(Arc::from(device));
        self.open().await
    }

    /// Open the selected device and start the read loop.
    ///
    /// Open failures and devices without a usable identity are reported and
    /// force the session closed. Calling `open` on a session that is not
    /// `Closed` does nothing.
    pub async fn open(&self) -> LinkResult<()> {
        let Some(device) = self.inner.device.lock().clone() else {
            return Err(self.report(LinkError::NoDeviceSelected));
        };

        let claimed = self.inner.state.send_if_modified(|state| {
            if *state == LinkState::Closed {
                *state = LinkState::Opening;
                true
            } else {
                false
            }
        });
        if !claimed {
            debug!("Open ignored while link is {:?}", self.state());
            return Ok(());
        }

        let port = device.name().to_string();
        let streams = match device.open(&self.inner.settings).await {
            Ok(streams) => streams,
            Err(source) => return Err(self.fail_open(LinkError::Open { port, source }).await),
        };

        if let Err(err) = check_identity(device.as_ref()) {
            drop(streams);
            return Err(self.fail_open(err).await);
        }

        self.inner.link.attach(streams.writable).await;
        let lines = read_lines(streams.readable, self.inner.settings.buffer_size);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        *self.inner.read_cancel.lock() = Some(cancel_tx);

        let opened = self.inner.state.send_if_modified(|state| {
            if *state == LinkState::Opening {
                *state = LinkState::Open;
                true
            } else {
                false
            }
        });
        if !opened {
            // Closed while the port was opening.
            debug!("Link closed during open of {port}");
            self.inner.read_cancel.lock().take();
            if let Err(e) = self.inner.link.detach().await {
                debug!("Ignoring writer shutdown failure: {e}");
            }
            return Ok(());
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Port {port} opened");
        self.inner.events.link_ready(&port);

        let read_loop = ReadLoop {
            session: Arc::downgrade(&self.inner),
            events: Arc::clone(&self.inner.events),
            dispatcher: self.inner.dispatcher.lock().clone(),
            generation,
        };
        let task = tokio::spawn(read_loop.run(lines, cancel_rx));
        *self.inner.read_task.lock() = Some(task);
        Ok(())
    }

    /// Write `text` followed by `\n` to the device.
    pub async fn send_command(&self, text: &str) -> LinkResult<()> {
        self.inner.link.send(text).await
    }

    /// Tear the link down and return to `Closed`.
    ///
    /// Idempotent. Every step runs even if an earlier one fails. The read
    /// loop has released the port before this returns.
    pub async fn close(&self) {
        self.shutdown(true).await;
    }

    /// `join_reader` is false only when the read loop itself is closing.
    async fn shutdown(&self, join_reader: bool) {
        let mut previous = LinkState::Closed;
        self.inner.state.send_if_modified(|state| {
            previous = *state;
            if *state == LinkState::Closed {
                false
            } else {
                *state = LinkState::Closing;
                true
            }
        });

        if let Some(cancel) = self.inner.read_cancel.lock().take() {
            if cancel.send(()).is_err() {
                debug!("Read loop had already finished");
            }
        }

        // Joined before the writer is detached: a dispatch stuck on a write
        // holds the writer lock until the read loop drops it.
        let reader = if join_reader {
            self.inner.read_task.lock().take()
        } else {
            None
        };
        if let Some(task) = reader {
            if let Err(e) = task.await {
                debug!("Read loop did not finish cleanly: {e}");
            }
        }

        if let Err(e) = self.inner.link.detach().await {
            debug!("Ignoring writer shutdown failure: {e}");
        }

        match previous {
            LinkState::Open | LinkState::Opening => {
                self.inner.state.send_replace(LinkState::Closed);
                info!("Port closed");
                self.inner.events.link_closed();
            }
            // Another caller owns this close; wait for it to finish.
            LinkState::Closing if join_reader => {
                let mut state = self.subscribe();
                if state.wait_for(|s| *s != LinkState::Closing).await.is_err() {
                    debug!("Link state channel closed during close");
                }
            }
            LinkState::Closing | LinkState::Closed => {}
        }
    }

    fn report(&self, err: LinkError) -> LinkError {
        error!("{err}");
        self.inner.events.failure(&err);
        err
    }

    async fn fail_open(&self, err: LinkError) -> LinkError {
        let err = self.report(err);
        self.close().await;
        err
    }
}

impl std::fmt::Debug for LinkSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkSession")
            .field("state", &self.state())
            .field("device", &self.device_name())
            .field("settings", &self.inner.settings)
            .finish()
    }
}

fn check_identity(device: &dyn SerialDevice) -> LinkResult<()> {
    match device.identity() {
        None => Err(LinkError::DeviceUnavailable(device.name().to_string())),
        Some(identity) if !identity.is_recognized() => {
            Err(LinkError::UnrecognizedVendor(device.name().to_string()))
        }
        Some(identity) => {
            debug!(
                vendor_id = ?identity.vendor_id,
                product_id = ?identity.product_id,
                "Device identity accepted"
            );
            Ok(())
        }
    }
}

struct ReadLoop {
    session: Weak<SessionInner>,
    events: Arc<dyn LinkEvents>,
    dispatcher: Option<Arc<dyn MessageDispatcher>>,
    generation: u64,
}

impl ReadLoop {
    async fn run(
        self,
        mut lines: BoxStream<'static, Result<String, PortError>>,
        mut cancel: oneshot::Receiver<()>,
    ) {
        debug!(generation = self.generation, "Read loop started");

        let failure = loop {
            // Cancellation also interrupts a dispatch in progress.
            let step = async {
                match lines.next().await {
                    Some(Ok(line)) => {
                        self.events.line_logged(&LogEntry::inbound(line.as_str()));
                        if let Some(dispatcher) = &self.dispatcher {
                            dispatcher.dispatch(&line).await;
                        }
                        None
                    }
                    Some(Err(source)) => Some(LinkError::Read(source)),
                    None => Some(LinkError::StreamEnded),
                }
            };

            tokio::select! {
                biased;
                _ = &mut cancel => {
                    debug!(generation = self.generation, "Read loop cancelled");
                    return;
                }
                outcome = step => {
                    if let Some(failure) = outcome {
                        break failure;
                    }
                }
            }
        };
        drop(lines);

        let Some(inner) = self.session.upgrade() else {
            debug!("Read loop outlived its session: {failure}");
            return;
        };
        if inner.generation.load(Ordering::SeqCst) != self.generation {
            debug!("Stale read loop finished: {failure}");
            return;
        }

        let session = LinkSession { inner };
        if session.state() != LinkState::Open {
            debug!("Link already closing: {failure}");
            return;
        }
        session.report(failure);
        session.shutdown(false).await;
    }
}
