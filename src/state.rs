use serde::Serialize;

/// Default speed for `RA`/`RR` moves until the operator changes it.
pub const DEFAULT_SPEED: u32 = 1000;

/// What the host believes the motor is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionStatus {
    /// Stopped at the last reported position.
    #[default]
    Idle,
    /// A move command was sent and no position report has arrived yet.
    Running,
    /// The position cannot be trusted (driver disabled or stopped hard).
    Unknown,
}

/// Host-side mirror of the stepper tester.
///
/// Updated from operator actions and from the position reports the firmware
/// sends after each move. Nothing here is read back from the device, so it
/// can drift until the next report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    pub enabled: bool,
    pub homed: bool,
    pub lower_limit: Option<i64>,
    pub upper_limit: Option<i64>,
    /// Speed used for the next absolute or relative move.
    pub speed: u32,
    pub ramp: Option<u32>,
    pub position: i64,
    pub motion: MotionStatus,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            enabled: false,
            homed: false,
            lower_limit: None,
            upper_limit: None,
            speed: DEFAULT_SPEED,
            ramp: None,
            position: 0,
            motion: MotionStatus::Idle,
        }
    }
}

impl DeviceState {
    pub fn with_speed(speed: u32) -> Self {
        Self {
            speed,
            ..Default::default()
        }
    }

    /// Record a position reported by the firmware; the move is over.
    pub fn record_position(&mut self, position: i64) {
        self.position = position;
        self.motion = MotionStatus::Idle;
    }

    /// Record a move that was just sent.
    pub fn start_motion(&mut self) {
        self.motion = MotionStatus::Running;
    }

    /// Whether the position already sits on `limit`. An unknown limit never
    /// matches.
    pub fn at_limit(&self, limit: Option<i64>) -> bool {
        limit == Some(self.position)
    }

    /// Human-readable position label for status output.
    pub fn position_label(&self) -> String {
        match self.motion {
            MotionStatus::Idle => self.position.to_string(),
            MotionStatus::Running => format!("running to/from {}", self.position),
            MotionStatus::Unknown => "?".to_string(),
        }
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn limit(value: Option<i64>) -> String {
            value.map_or_else(|| "-".to_string(), |v| v.to_string())
        }

        write!(
            f,
            "{} {} | position {} | limits [{}, {}] | speed {} | ramp {}",
            if self.enabled { "enabled" } else { "disabled" },
            if self.homed { "homed" } else { "not homed" },
            self.position_label(),
            limit(self.lower_limit),
            limit(self.upper_limit),
            self.speed,
            self.ramp.map_or_else(|| "-".to_string(), |r| r.to_string()),
        )
    }
}
