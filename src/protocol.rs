//! Stepper tester wire protocol.
//!
//! Outbound commands are two-letter mnemonics with optional decimal
//! arguments, terminated by `\n` when written. Inbound lines are free-form
//! status text; only two shapes carry meaning to the host (see
//! [`DeviceMessage`]).

use serde::Serialize;
use std::fmt;

/// Width of the speed field in `RA` and `RR` commands.
pub const SPEED_FIELD_WIDTH: usize = 4;

/// Largest speed that fits the speed field.
pub const MAX_SPEED: u32 = 9999;

/// Commands understood by the stepper tester firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Command {
    /// `EN`: enable the driver; the firmware also zeroes its position.
    Enable,
    /// `DI`
    Disable,
    /// `SH`: make the current position home.
    SetHome,
    /// `SL<int>`
    SetLowerLimit(i64),
    /// `SU<int>`
    SetUpperLimit(i64),
    /// `SR<int>`
    SetRamp(u32),
    /// `RA<speed:4><position>`
    RunAbsolute { speed: u32, position: i64 },
    /// `RH`
    RunHome,
    /// `RL`
    RunLower,
    /// `RU`
    RunUpper,
    /// `RR<speed:4><signed steps>`
    RunRelative { speed: u32, steps: i64 },
    /// `ES`
    EmergencyStop,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enable => f.write_str("EN"),
            Self::Disable => f.write_str("DI"),
            Self::SetHome => f.write_str("SH"),
            Self::SetLowerLimit(limit) => write!(f, "SL{limit}"),
            Self::SetUpperLimit(limit) => write!(f, "SU{limit}"),
            Self::SetRamp(ramp) => write!(f, "SR{ramp}"),
            Self::RunAbsolute { speed, position } => {
                write!(f, "RA{}{position}", SpeedField(*speed))
            }
            Self::RunHome => f.write_str("RH"),
            Self::RunLower => f.write_str("RL"),
            Self::RunUpper => f.write_str("RU"),
            Self::RunRelative { speed, steps } => write!(f, "RR{}{steps}", SpeedField(*speed)),
            Self::EmergencyStop => f.write_str("ES"),
        }
    }
}

/// Speed rendered left-aligned and space-padded to the field width.
struct SpeedField(u32);

impl fmt::Display for SpeedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<width$}", self.0, width = SPEED_FIELD_WIDTH)
    }
}

/// What the host recognizes in an inbound line.
///
/// The two checks are independent; a line may match both or neither.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceMessage {
    /// The line ends with `ready`: the firmware finished booting.
    pub ready: bool,
    /// The line reports an absolute position as `... = <int>`.
    pub position: Option<i64>,
}

impl DeviceMessage {
    pub fn parse(line: &str) -> Self {
        Self {
            ready: line.ends_with("ready"),
            position: parse_position(line),
        }
    }
}

/// `= ` must not open the line, and the value is the integer prefix of
/// what follows it.
fn parse_position(line: &str) -> Option<i64> {
    match line.find("= ") {
        Some(index) if index > 0 => leading_integer(&line[index + 2..]),
        _ => None,
    }
}

/// Parse an optionally signed decimal prefix, ignoring leading whitespace
/// and anything after the digits.
fn leading_integer(text: &str) -> Option<i64> {
    let text = text.trim_start();
    let sign_len = usize::from(text.starts_with(['+', '-']));
    let digits = text[sign_len..]
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    if digits == 0 {
        return None;
    }
    text[..sign_len + digits].parse().ok()
}
