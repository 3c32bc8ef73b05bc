//! Line-oriented operator console.
//!
//! Reads one command per line, drives the [`StepperController`] and prints
//! the traffic log. Output is human readable by default or one JSON object
//! per line with `--json`.

use crate::controller::StepperController;
use crate::error::{LinkError, LinkResult};
use crate::events::{LinkEvents, LogEntry};
use crate::port::{DeviceChooser, NativeSerialDevice, PortError, SerialDevice};
use crate::session::LinkSession;
use async_trait::async_trait;
use serde_json::json;
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::Mutex;
use tracing::debug;

const HELP: &str = "\
Commands:
  connect | disconnect          select a port and open it / close the link
  enable | disable              enable or disable the driver (zeroes position)
  sethome                       make the current position home
  lower <n> | upper <n>         set the travel limits
  speed <n>                     speed for goto/back/fwd (0-9999)
  ramp <n>                      set the acceleration ramp
  goto <n>                      move to an absolute position
  home | golower | goupper      move home or to a limit
  back <n> | fwd <n>            move relative to the current position
  stop                          emergency stop
  send <text>                   send a raw command line
  status | help | quit";

/// Shared line source for the console and the port prompt.
pub type InputLines = Arc<Mutex<Lines<Box<dyn AsyncBufRead + Send + Unpin>>>>;

/// Wrap an async reader as console input.
pub fn input_lines(reader: impl AsyncBufRead + Send + Unpin + 'static) -> InputLines {
    let reader: Box<dyn AsyncBufRead + Send + Unpin> = Box::new(reader);
    Arc::new(Mutex::new(reader.lines()))
}

/// Console input from the process stdin.
pub fn stdin_lines() -> InputLines {
    input_lines(BufReader::new(tokio::io::stdin()))
}

/// Why an input line is not a command.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandParseError {
    #[error("Unknown command '{0}'")]
    Unknown(String),

    #[error("'{0}' needs an argument")]
    MissingArgument(&'static str),

    #[error("'{value}' is not a valid number for '{command}'")]
    InvalidNumber {
        command: &'static str,
        value: String,
    },
}

/// One operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Connect,
    Disconnect,
    Enable,
    Disable,
    SetHome,
    Lower(i64),
    Upper(i64),
    Speed(u32),
    Ramp(u32),
    GoTo(i64),
    Home,
    GoLower,
    GoUpper,
    Back(u32),
    Forward(u32),
    Stop,
    Send(String),
    Status,
    Help,
    Quit,
}

fn number<T: FromStr>(command: &'static str, arg: &str) -> Result<T, CommandParseError> {
    if arg.is_empty() {
        return Err(CommandParseError::MissingArgument(command));
    }
    arg.parse().map_err(|_| CommandParseError::InvalidNumber {
        command,
        value: arg.to_string(),
    })
}

impl FromStr for OperatorCommand {
    type Err = CommandParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, arg) = match line.split_once(char::is_whitespace) {
            Some((word, arg)) => (word, arg.trim()),
            None => (line, ""),
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "connect" => Self::Connect,
            "disconnect" => Self::Disconnect,
            "enable" => Self::Enable,
            "disable" => Self::Disable,
            "sethome" => Self::SetHome,
            "lower" => Self::Lower(number("lower", arg)?),
            "upper" => Self::Upper(number("upper", arg)?),
            "speed" => Self::Speed(number("speed", arg)?),
            "ramp" => Self::Ramp(number("ramp", arg)?),
            "goto" => Self::GoTo(number("goto", arg)?),
            "home" => Self::Home,
            "golower" => Self::GoLower,
            "goupper" => Self::GoUpper,
            "back" => Self::Back(number("back", arg)?),
            "fwd" => Self::Forward(number("fwd", arg)?),
            "stop" => Self::Stop,
            "send" if arg.is_empty() => return Err(CommandParseError::MissingArgument("send")),
            "send" => Self::Send(arg.to_string()),
            "status" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            _ => return Err(CommandParseError::Unknown(word.to_string())),
        };
        Ok(command)
    }
}

/// What the console does after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Nothing to print; the link already reported what happened.
    Silent,
    Text(String),
    /// Already an event object; printed as is in JSON mode.
    Json(serde_json::Value),
    Quit,
}

/// Prints link events to the terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleEvents {
    json: bool,
}

impl ConsoleEvents {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    fn emit(&self, value: serde_json::Value) {
        println!("{value}");
    }
}

impl LinkEvents for ConsoleEvents {
    fn link_ready(&self, port_name: &str) {
        if self.json {
            self.emit(json!({ "event": "ready", "port": port_name }));
        } else {
            println!("Connected to {port_name}");
        }
    }

    fn line_logged(&self, entry: &LogEntry) {
        if self.json {
            self.emit(json!({ "event": "line", "entry": entry }));
        } else {
            println!("{entry}");
        }
    }

    fn failure(&self, error: &LinkError) {
        if self.json {
            self.emit(json!({ "event": "failure", "message": error.to_string() }));
        } else {
            eprintln!("error: {error}");
        }
    }

    fn link_closed(&self) {
        if self.json {
            self.emit(json!({ "event": "closed" }));
        } else {
            println!("Disconnected");
        }
    }
}

/// Lists devices for [`PromptChooser`].
pub type DeviceLister =
    Box<dyn Fn() -> Result<Vec<Box<dyn SerialDevice>>, PortError> + Send + Sync>;

/// Asks the operator to pick one of the attached serial ports.
///
/// Accepts a list index (1-based) or a port name. An empty answer or end of
/// input cancels.
pub struct PromptChooser {
    input: InputLines,
    lister: DeviceLister,
}

impl PromptChooser {
    /// Prompt among the ports attached to this machine.
    pub fn new(input: InputLines) -> Self {
        Self::with_lister(
            input,
            Box::new(|| {
                Ok(NativeSerialDevice::available()?
                    .into_iter()
                    .map(|device| Box::new(device) as Box<dyn SerialDevice>)
                    .collect())
            }),
        )
    }

    pub fn with_lister(input: InputLines, lister: DeviceLister) -> Self {
        Self { input, lister }
    }
}

/// `name (product vid:pid)` for prompts and listings.
pub fn describe_device(device: &dyn SerialDevice) -> String {
    let Some(identity) = device.identity() else {
        return device.name().to_string();
    };
    let label = identity
        .product
        .as_deref()
        .or(identity.manufacturer.as_deref())
        .unwrap_or("serial");
    match (identity.vendor_id, identity.product_id) {
        (Some(vid), Some(pid)) => format!("{} ({label} {vid:04X}:{pid:04X})", device.name()),
        _ => format!("{} ({label})", device.name()),
    }
}

#[async_trait]
impl DeviceChooser for PromptChooser {
    async fn request_port(&self) -> Result<Option<Box<dyn SerialDevice>>, PortError> {
        let mut devices = (self.lister)()?;
        if devices.is_empty() {
            println!("No serial ports found");
            return Ok(None);
        }

        println!("Available serial ports:");
        for (index, device) in devices.iter().enumerate() {
            println!("  [{}] {}", index + 1, describe_device(device.as_ref()));
        }
        print!("Select a port (number or name, empty to cancel): ");
        std::io::stdout().flush()?;

        let answer = self.input.lock().await.next_line().await?;
        let answer = answer.as_deref().map(str::trim).unwrap_or_default();
        if answer.is_empty() {
            return Ok(None);
        }

        let index = match answer.parse::<usize>() {
            Ok(n) if (1..=devices.len()).contains(&n) => n - 1,
            _ => devices
                .iter()
                .position(|device| device.name() == answer)
                .ok_or_else(|| PortError::not_found(answer))?,
        };
        Ok(Some(devices.swap_remove(index)))
    }
}

/// The interactive command loop.
pub struct Console {
    session: LinkSession,
    controller: Arc<StepperController>,
    json: bool,
}

impl Console {
    pub fn new(session: LinkSession, controller: Arc<StepperController>, json: bool) -> Self {
        Self {
            session,
            controller,
            json,
        }
    }

    /// Run commands until `quit` or end of input.
    pub async fn run(&self, input: InputLines) -> std::io::Result<()> {
        if !self.json {
            println!("stepper-link ready. Type 'help' for commands.");
        }

        loop {
            let line = input.lock().await.next_line().await?;
            let Some(line) = line else {
                debug!("Console input closed");
                break;
            };
            if line.trim().is_empty() {
                continue;
            }

            match line.parse::<OperatorCommand>() {
                Ok(command) => match self.execute(command).await {
                    Reply::Quit => break,
                    Reply::Text(text) => self.print(&text),
                    Reply::Json(value) => println!("{value}"),
                    Reply::Silent => {}
                },
                Err(err) => self.print(&format!("{err}. Type 'help' for commands.")),
            }
        }
        Ok(())
    }

    /// Carry out one command.
    ///
    /// Link failures are reported through the session's event sink, so they
    /// produce [`Reply::Silent`] here.
    pub async fn execute(&self, command: OperatorCommand) -> Reply {
        let controller = &self.controller;
        match command {
            OperatorCommand::Connect => done(self.session.select_device().await),
            OperatorCommand::Disconnect => {
                self.session.close().await;
                Reply::Silent
            }
            OperatorCommand::Enable => done(controller.set_enabled(true).await),
            OperatorCommand::Disable => done(controller.set_enabled(false).await),
            OperatorCommand::SetHome => done(controller.set_home().await),
            OperatorCommand::Lower(limit) => done(controller.set_lower_limit(limit).await),
            OperatorCommand::Upper(limit) => done(controller.set_upper_limit(limit).await),
            OperatorCommand::Speed(speed) => match controller.set_speed(speed) {
                Ok(()) => Reply::Text(format!("Speed set to {speed}")),
                Err(err) => Reply::Text(err.to_string()),
            },
            OperatorCommand::Ramp(ramp) => done(controller.set_ramp(ramp).await),
            OperatorCommand::GoTo(position) => moved(controller.go_to(position).await),
            OperatorCommand::Home => moved(controller.go_home().await),
            OperatorCommand::GoLower => moved(controller.go_lower().await),
            OperatorCommand::GoUpper => moved(controller.go_upper().await),
            OperatorCommand::Back(steps) => moved(controller.go_relative(-i64::from(steps)).await),
            OperatorCommand::Forward(steps) => moved(controller.go_relative(i64::from(steps)).await),
            OperatorCommand::Stop => done(controller.emergency_stop().await),
            OperatorCommand::Send(text) => done(controller.send_raw(&text).await),
            OperatorCommand::Status => self.status(),
            OperatorCommand::Help => Reply::Text(HELP.to_string()),
            OperatorCommand::Quit => Reply::Quit,
        }
    }

    fn status(&self) -> Reply {
        let device = self.session.device_name();
        let stepper = self.controller.state();
        if self.json {
            Reply::Json(json!({
                "event": "status",
                "link": self.session.state(),
                "device": device,
                "stepper": stepper,
            }))
        } else {
            Reply::Text(format!(
                "link {:?} ({}) | {stepper}",
                self.session.state(),
                device.as_deref().unwrap_or("no device"),
            ))
        }
    }

    fn print(&self, text: &str) {
        if self.json {
            println!("{}", json!({ "event": "message", "text": text }));
        } else {
            println!("{text}");
        }
    }
}

fn done(result: LinkResult<()>) -> Reply {
    if let Err(err) = result {
        debug!("Command failed: {err}");
    }
    Reply::Silent
}

fn moved(result: LinkResult<bool>) -> Reply {
    match result {
        Ok(true) => Reply::Silent,
        Ok(false) => Reply::Text("Already there, nothing sent".to_string()),
        Err(err) => {
            debug!("Move failed: {err}");
            Reply::Silent
        }
    }
}
