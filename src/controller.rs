//! Operator actions and inbound message handling for the stepper tester.

use crate::config::MotionConfig;
use crate::error::{LinkError, LinkResult};
use crate::protocol::{Command, DeviceMessage, MAX_SPEED};
use crate::session::{CommandLink, MessageDispatcher};
use crate::state::{DeviceState, MotionStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

/// Drives the stepper tester through a [`CommandLink`] and mirrors what it
/// believes the device state to be.
///
/// Guards only skip moves that would go nowhere; they never reject a move the
/// firmware could refuse on its own.
#[derive(Debug)]
pub struct StepperController {
    link: CommandLink,
    motion: MotionConfig,
    state: Mutex<DeviceState>,
}

impl StepperController {
    pub fn new(link: CommandLink, motion: MotionConfig) -> Self {
        let state = DeviceState::with_speed(motion.default_speed);
        Self {
            link,
            motion,
            state: Mutex::new(state),
        }
    }

    /// Snapshot of the mirrored device state.
    pub fn state(&self) -> DeviceState {
        self.state.lock().clone()
    }

    pub async fn set_enabled(&self, enabled: bool) -> LinkResult<()> {
        let command = if enabled {
            Command::Enable
        } else {
            Command::Disable
        };
        self.link.send_command(command).await?;

        let mut state = self.state.lock();
        state.enabled = enabled;
        state.position = 0;
        state.motion = if enabled {
            MotionStatus::Idle
        } else {
            MotionStatus::Unknown
        };
        Ok(())
    }

    pub async fn set_home(&self) -> LinkResult<()> {
        self.link.send_command(Command::SetHome).await?;
        self.state.lock().homed = true;
        Ok(())
    }

    pub async fn set_lower_limit(&self, limit: i64) -> LinkResult<()> {
        self.link.send_command(Command::SetLowerLimit(limit)).await?;
        self.state.lock().lower_limit = Some(limit);
        Ok(())
    }

    pub async fn set_upper_limit(&self, limit: i64) -> LinkResult<()> {
        self.link.send_command(Command::SetUpperLimit(limit)).await?;
        self.state.lock().upper_limit = Some(limit);
        Ok(())
    }

    /// Change the speed used by later moves. Nothing is sent.
    pub fn set_speed(&self, speed: u32) -> LinkResult<()> {
        if speed > MAX_SPEED {
            return Err(LinkError::InvalidSpeed(speed));
        }
        self.state.lock().speed = speed;
        Ok(())
    }

    pub async fn set_ramp(&self, ramp: u32) -> LinkResult<()> {
        self.link.send_command(Command::SetRamp(ramp)).await?;
        self.state.lock().ramp = Some(ramp);
        Ok(())
    }

    /// Move to an absolute position. Returns `false` if already there.
    pub async fn go_to(&self, position: i64) -> LinkResult<bool> {
        let (current, speed) = {
            let state = self.state.lock();
            (state.position, state.speed)
        };
        if position == current {
            debug!(position, "Already at target position");
            return Ok(false);
        }
        self.run(Command::RunAbsolute { speed, position }).await
    }

    pub async fn go_home(&self) -> LinkResult<bool> {
        if self.state.lock().position == 0 {
            debug!("Already at home");
            return Ok(false);
        }
        self.run(Command::RunHome).await
    }

    pub async fn go_lower(&self) -> LinkResult<bool> {
        let at_limit = {
            let state = self.state.lock();
            state.at_limit(state.lower_limit)
        };
        if at_limit {
            debug!("Already at lower limit");
            return Ok(false);
        }
        self.run(Command::RunLower).await
    }

    pub async fn go_upper(&self) -> LinkResult<bool> {
        let at_limit = {
            let state = self.state.lock();
            state.at_limit(state.upper_limit)
        };
        if at_limit {
            debug!("Already at upper limit");
            return Ok(false);
        }
        self.run(Command::RunUpper).await
    }

    /// Move by `steps`; negative moves back.
    pub async fn go_relative(&self, steps: i64) -> LinkResult<bool> {
        if steps == 0 {
            return Ok(false);
        }
        let speed = self.state.lock().speed;
        self.run(Command::RunRelative { speed, steps }).await
    }

    pub async fn emergency_stop(&self) -> LinkResult<()> {
        self.link.send_command(Command::EmergencyStop).await?;
        let mut state = self.state.lock();
        state.enabled = false;
        state.motion = MotionStatus::Unknown;
        Ok(())
    }

    /// Send a free-form command line.
    pub async fn send_raw(&self, text: &str) -> LinkResult<()> {
        self.link.send(text).await
    }

    async fn run(&self, command: Command) -> LinkResult<bool> {
        self.link.send_command(command).await?;
        self.state.lock().start_motion();
        Ok(true)
    }

    async fn on_ready(&self) {
        info!("Stepper tester ready, sending travel limits");
        // Failures are already reported by the link.
        if let Err(e) = self.set_lower_limit(self.motion.ready_lower_limit).await {
            debug!("Lower limit not sent on ready: {e}");
        }
        if let Err(e) = self.set_upper_limit(self.motion.ready_upper_limit).await {
            debug!("Upper limit not sent on ready: {e}");
        }
    }
}

#[async_trait]
impl MessageDispatcher for StepperController {
    async fn dispatch(&self, line: &str) {
        let message = DeviceMessage::parse(line);
        if message.ready {
            self.on_ready().await;
        }
        if let Some(position) = message.position {
            debug!(position, "Position reported");
            self.state.lock().record_position(position);
        }
    }
}
