//! Notifications from the link to whatever front-end drives it.

use crate::error::LinkError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Direction of a logged line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Device to host.
    Inbound,
    /// Host to device.
    Outbound,
}

impl Direction {
    /// Arrow used when the log is rendered as text.
    pub fn arrow(&self) -> &'static str {
        match self {
            Self::Inbound => "──▶",
            Self::Outbound => "◀──",
        }
    }
}

/// One line of traffic, as shown in the operator's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub text: String,
}

impl LogEntry {
    pub fn inbound(text: impl Into<String>) -> Self {
        Self::new(Direction::Inbound, text)
    }

    pub fn outbound(text: impl Into<String>) -> Self {
        Self::new(Direction::Outbound, text)
    }

    fn new(direction: Direction, text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            direction,
            text: text.into(),
        }
    }
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.direction.arrow(), self.text)
    }
}

/// Sink for link notifications: readiness, traffic log and failures.
///
/// Called from the read loop task as well as from operator actions, so
/// implementations must not block.
pub trait LinkEvents: Send + Sync {
    /// The port is open and the read loop is running.
    fn link_ready(&self, port_name: &str);

    /// A line was received or a command was written.
    fn line_logged(&self, entry: &LogEntry);

    /// A failure the operator should see.
    fn failure(&self, error: &LinkError);

    /// The session went back to `Closed`.
    fn link_closed(&self) {}
}

/// Event captured by [`EventRecorder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedEvent {
    Ready(String),
    Line(Direction, String),
    Failure(String),
    Closed,
}

/// [`LinkEvents`] implementation that keeps everything in memory.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Text of every logged line in the given direction, oldest first.
    pub fn lines(&self, direction: Direction) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                RecordedEvent::Line(d, text) if *d == direction => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                RecordedEvent::Failure(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl LinkEvents for EventRecorder {
    fn link_ready(&self, port_name: &str) {
        self.events
            .lock()
            .push(RecordedEvent::Ready(port_name.to_string()));
    }

    fn line_logged(&self, entry: &LogEntry) {
        self.events
            .lock()
            .push(RecordedEvent::Line(entry.direction, entry.text.clone()));
    }

    fn failure(&self, error: &LinkError) {
        self.events
            .lock()
            .push(RecordedEvent::Failure(error.to_string()));
    }

    fn link_closed(&self) {
        self.events.lock().push(RecordedEvent::Closed);
    }
}
