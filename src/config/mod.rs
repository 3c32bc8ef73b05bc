//! Configuration module for stepper-link.
//!
//! This module provides TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! Configuration is loaded from the following locations (in order of priority):
//!
//! 1. `STEPPER_LINK_CONFIG` environment variable (explicit path)
//! 2. `./stepper-link.toml` (current directory)
//! 3. `~/.config/stepper-link/config.toml` (XDG on Linux/macOS)
//! 4. `%APPDATA%\stepper-link\config.toml` (Windows)
//! 5. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! The pattern is: `STEPPER_LINK_<SECTION>_<KEY>`
//!
//! Examples:
//! - `STEPPER_LINK_SERIAL_PORT=/dev/ttyACM0`
//! - `STEPPER_LINK_SERIAL_BAUD_RATE=9600`
//! - `STEPPER_LINK_MOTION_READY_UPPER_LIMIT=5000`
//! - `STEPPER_LINK_LOGGING_LEVEL=debug`
//!
//! # Example
//!
//! ```rust,no_run
//! use stepper_link::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! let config = loader.config();
//!
//! println!("Baud rate: {}", config.serial.baud_rate);
//! println!("Ready limits: {}..{}", config.motion.ready_lower_limit, config.motion.ready_upper_limit);
//! # Ok::<(), stepper_link::config::ConfigError>(())
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{get_default_config_path, resolve_config_path, ConfigLoader};
pub use schema::{Config, LogFormat, LoggingConfig, MotionConfig, SerialConfig};
