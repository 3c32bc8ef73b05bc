//! Shared test utilities for stepper-link integration tests.
//!
//! This module provides:
//! - A chooser that hands out one mock device
//! - A rig wiring session, controller and event recorder together
//! - Helpers for waiting on link state changes

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use stepper_link::config::MotionConfig;
use stepper_link::port::{MockEndpoint, MockRemote};
use stepper_link::{
    DeviceChooser, EventRecorder, LinkSession, LinkState, MockSerialDevice, PortConfiguration,
    PortError, SerialDevice, StepperController,
};

/// How long a test waits for the read loop to react.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(2);

/// Chooser that yields the queued device once, then behaves as cancelled.
#[derive(Default)]
pub struct QueuedChooser {
    next: Mutex<Option<MockSerialDevice>>,
}

impl QueuedChooser {
    pub fn new(device: MockSerialDevice) -> Self {
        Self {
            next: Mutex::new(Some(device)),
        }
    }

    pub fn queue(&self, device: MockSerialDevice) {
        *self.next.lock() = Some(device);
    }
}

#[async_trait]
impl DeviceChooser for QueuedChooser {
    async fn request_port(&self) -> Result<Option<Box<dyn SerialDevice>>, PortError> {
        Ok(self
            .next
            .lock()
            .take()
            .map(|device| Box::new(device) as Box<dyn SerialDevice>))
    }
}

/// Session, controller and recorder wired the way the binary wires them.
pub struct Rig {
    pub session: LinkSession,
    pub controller: Arc<StepperController>,
    pub events: Arc<EventRecorder>,
    pub chooser: Arc<QueuedChooser>,
    pub device: MockSerialDevice,
    pub remote: MockRemote,
}

impl Rig {
    pub fn new() -> Self {
        let (device, remote) = MockSerialDevice::new("MOCK0");
        let chooser = Arc::new(QueuedChooser::new(device.clone()));
        let events = Arc::new(EventRecorder::new());
        let session = LinkSession::new(
            chooser.clone(),
            PortConfiguration::default(),
            events.clone(),
        );
        let controller = Arc::new(StepperController::new(
            session.link(),
            MotionConfig::default(),
        ));
        session.set_dispatcher(controller.clone());

        Self {
            session,
            controller,
            events,
            chooser,
            device,
            remote,
        }
    }

    /// Select the mock device and return its firmware end.
    pub async fn connect(&mut self) -> MockEndpoint {
        self.session
            .select_device()
            .await
            .expect("mock device should open");
        self.remote.connected().await.expect("endpoint delivered")
    }
}

/// Wait until the session reaches `expected`.
pub async fn wait_for_state(session: &LinkSession, expected: LinkState) {
    let mut rx = session.subscribe();
    tokio::time::timeout(STEP_TIMEOUT, rx.wait_for(|state| *state == expected))
        .await
        .expect("timed out waiting for link state")
        .expect("state channel closed");
}

/// Poll `check` until it holds or the step timeout elapses.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
