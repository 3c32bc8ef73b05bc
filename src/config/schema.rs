//! Configuration schema definitions.
//!
//! Every section is `#[serde(default)]`, so a file only needs the keys it
//! changes.

use super::error::{ConfigError, ConfigResult};
use crate::port::{
    DataBits, FlowControl, Parity, PortConfiguration, StopBits, DEFAULT_BAUD_RATE,
    DEFAULT_BUFFER_SIZE,
};
use crate::protocol::MAX_SPEED;
use crate::state::DEFAULT_SPEED;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial port configuration
    pub serial: SerialConfig,
    /// Motion defaults
    pub motion: MotionConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Check values that would otherwise fail later, at open or move time.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.serial.baud_rate == 0 {
            return Err(ConfigError::validation(
                "serial.baud_rate",
                "must be greater than zero",
            ));
        }
        if self.serial.buffer_size == 0 {
            return Err(ConfigError::validation(
                "serial.buffer_size",
                "must be greater than zero",
            ));
        }
        if self.motion.ready_lower_limit >= self.motion.ready_upper_limit {
            return Err(ConfigError::validation(
                "motion.ready_lower_limit",
                format!(
                    "{} is not below ready_upper_limit {}",
                    self.motion.ready_lower_limit, self.motion.ready_upper_limit
                ),
            ));
        }
        if self.motion.default_speed > MAX_SPEED {
            return Err(ConfigError::validation(
                "motion.default_speed",
                format!("must be at most {MAX_SPEED}"),
            ));
        }
        Ok(())
    }
}

/// Serial port configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port to connect to at startup; prompt when unset
    pub port: Option<String>,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    /// Read chunk size in bytes
    pub buffer_size: usize,
    /// Port aliases for convenience
    pub port_aliases: HashMap<String, String>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            port_aliases: HashMap::new(),
        }
    }
}

impl SerialConfig {
    /// Resolve a port name through aliases
    pub fn resolve_port(&self, name: &str) -> String {
        self.port_aliases
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Transport settings for opening a device.
    pub fn port_configuration(&self) -> PortConfiguration {
        PortConfiguration {
            baud_rate: self.baud_rate,
            data_bits: self.data_bits,
            flow_control: self.flow_control,
            parity: self.parity,
            stop_bits: self.stop_bits,
            buffer_size: self.buffer_size,
        }
    }
}

/// Motion defaults section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Speed for absolute and relative moves until changed
    pub default_speed: u32,
    /// Lower limit sent when the firmware reports ready
    pub ready_lower_limit: i64,
    /// Upper limit sent when the firmware reports ready
    pub ready_upper_limit: i64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            default_speed: DEFAULT_SPEED,
            ready_lower_limit: -20000,
            ready_upper_limit: 20000,
        }
    }
}

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Log format: "json", "pretty", "compact"
    pub format: LogFormat,
    /// Log file path; stderr when unset
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            file: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format
    Json,
    /// Pretty format with colors
    #[default]
    Pretty,
    /// Compact format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.serial.buffer_size, 1024);
        assert_eq!(config.motion.default_speed, 1000);
        assert_eq!(config.motion.ready_lower_limit, -20000);
        assert_eq!(config.motion.ready_upper_limit, 20000);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_port_alias_resolution() {
        let mut config = SerialConfig::default();
        config
            .port_aliases
            .insert("stepper".to_string(), "/dev/ttyACM0".to_string());

        assert_eq!(config.resolve_port("stepper"), "/dev/ttyACM0");
        assert_eq!(config.resolve_port("COM5"), "COM5");
    }

    #[test]
    fn test_port_configuration() {
        let serial = SerialConfig {
            baud_rate: 9600,
            parity: Parity::Even,
            buffer_size: 64,
            ..Default::default()
        };
        let port = serial.port_configuration();
        assert_eq!(port.baud_rate, 9600);
        assert_eq!(port.parity, Parity::Even);
        assert_eq!(port.buffer_size, 64);
        assert_eq!(port.data_bits, DataBits::Eight);
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [serial]
            port = "/dev/ttyUSB0"
            baud_rate = 57600
            stop_bits = "two"

            [motion]
            ready_upper_limit = 5000

            [logging]
            format = "json"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.serial.baud_rate, 57600);
        assert_eq!(config.serial.stop_bits, StopBits::Two);
        assert_eq!(config.motion.ready_upper_limit, 5000);
        assert_eq!(config.motion.ready_lower_limit, -20000);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_config_serialization() {
        let toml_str = toml::to_string_pretty(&Config::default()).unwrap();
        assert!(toml_str.contains("[serial]"));
        assert!(toml_str.contains("[motion]"));
        assert!(toml_str.contains("[logging]"));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = Config::default();
        config.serial.baud_rate = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.serial.buffer_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.motion.ready_lower_limit = 100;
        config.motion.ready_upper_limit = 100;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("motion.ready_lower_limit"));

        let mut config = Config::default();
        config.motion.default_speed = 10_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("compact".parse::<LogFormat>(), Ok(LogFormat::Compact));
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
