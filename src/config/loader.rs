//! Configuration loader with file resolution and environment override support.

use super::error::{ConfigError, ConfigResult};
use super::schema::Config;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable prefix for overrides
const ENV_PREFIX: &str = "STEPPER_LINK";

/// Config file name inside the per-user config directory
const CONFIG_FILE_NAME: &str = "config.toml";

/// Config file name looked up in the current directory
const LOCAL_CONFIG_FILE_NAME: &str = "stepper-link.toml";

/// Per-user config directory name
const APP_DIR_NAME: &str = "stepper-link";

/// Environment variable for explicit config path
const CONFIG_PATH_ENV: &str = "STEPPER_LINK_CONFIG";

/// Configuration loader with resolution and override logic.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Resolved config file path (if any)
    pub config_path: Option<PathBuf>,
    /// The loaded configuration
    pub config: Config,
}

impl ConfigLoader {
    /// Load configuration using standard resolution order.
    ///
    /// Resolution priority (highest to lowest):
    /// 1. `STEPPER_LINK_CONFIG` environment variable (explicit path)
    /// 2. `./stepper-link.toml` (current directory)
    /// 3. `~/.config/stepper-link/config.toml` (XDG on Linux/macOS)
    /// 4. `%APPDATA%\stepper-link\config.toml` (Windows)
    /// 5. Built-in defaults (no file required)
    ///
    /// Environment variables override file values; the result is validated.
    pub fn load() -> ConfigResult<Self> {
        let config_path = resolve_config_path();

        let mut config = match config_path {
            Some(ref path) => load_from_file(path)?,
            None => Config::default(),
        };

        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound(path));
        }

        let mut config = load_from_file(&path)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(Self {
            config_path: Some(path),
            config,
        })
    }

    /// Create a loader with default configuration (no file).
    pub fn with_defaults() -> Self {
        let mut config = Config::default();
        // Still apply env overrides even with defaults
        if apply_env_overrides(&mut config).is_err() || config.validate().is_err() {
            config = Config::default();
        }

        Self {
            config_path: None,
            config,
        }
    }

    /// Get the loaded configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Consume the loader and return the configuration.
    pub fn into_config(self) -> Config {
        self.config
    }
}

/// Resolve the configuration file path using standard locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    // 1. Explicit environment variable
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. Current directory
    let cwd_config = PathBuf::from(LOCAL_CONFIG_FILE_NAME);
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    // 3. XDG config directory (Linux/macOS) or APPDATA (Windows)
    if let Some(app_config) = get_default_config_path() {
        if app_config.exists() {
            return Some(app_config);
        }
    }

    None
}

/// Get the platform-specific config directory.
fn get_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
    }
}

/// Get the per-user config file path.
pub fn get_default_config_path() -> Option<PathBuf> {
    get_config_dir().map(|d| d.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Load configuration from a file.
fn load_from_file(path: &Path) -> ConfigResult<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(ConfigError::ParseError)
}

/// Parse `STEPPER_LINK_<key>` into `target` if it is set.
fn override_from_env<T: FromStr>(key: &str, target: &mut T) -> ConfigResult<()> {
    let var = format!("{ENV_PREFIX}_{key}");
    if let Ok(val) = std::env::var(&var) {
        *target = val
            .trim()
            .parse()
            .map_err(|_| ConfigError::env_parse(&var, format!("Invalid value '{val}'")))?;
    }
    Ok(())
}

/// Apply environment variable overrides to the configuration.
///
/// Environment variables follow the pattern: `STEPPER_LINK_<SECTION>_<KEY>`
/// For example:
/// - `STEPPER_LINK_SERIAL_PORT=/dev/ttyACM0`
/// - `STEPPER_LINK_SERIAL_BAUD_RATE=9600`
/// - `STEPPER_LINK_MOTION_DEFAULT_SPEED=400`
fn apply_env_overrides(config: &mut Config) -> ConfigResult<()> {
    // Serial overrides
    if let Ok(val) = std::env::var(format!("{ENV_PREFIX}_SERIAL_PORT")) {
        config.serial.port = Some(val);
    }
    override_from_env("SERIAL_BAUD_RATE", &mut config.serial.baud_rate)?;
    override_from_env("SERIAL_BUFFER_SIZE", &mut config.serial.buffer_size)?;

    // Motion overrides
    override_from_env("MOTION_DEFAULT_SPEED", &mut config.motion.default_speed)?;
    override_from_env("MOTION_READY_LOWER_LIMIT", &mut config.motion.ready_lower_limit)?;
    override_from_env("MOTION_READY_UPPER_LIMIT", &mut config.motion.ready_upper_limit)?;

    // Logging overrides
    if let Ok(val) = std::env::var(format!("{ENV_PREFIX}_LOGGING_LEVEL")) {
        config.logging.level = val;
    }
    override_from_env("LOGGING_FORMAT", &mut config.logging.format)?;
    if let Ok(val) = std::env::var(format!("{ENV_PREFIX}_LOGGING_FILE")) {
        config.logging.file = Some(PathBuf::from(val));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogFormat;
    use serial_test::serial;
    use std::env;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn test_default_loader() {
        let loader = ConfigLoader::with_defaults();
        assert_eq!(loader.config().serial.baud_rate, 115200);
        assert!(loader.config_path.is_none());
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let file = write_config(
            r#"
            [serial]
            port = "/dev/ttyACM0"
            buffer_size = 256

            [motion]
            default_speed = 400
            "#,
        );

        let loader = ConfigLoader::load_from(file.path()).unwrap();
        let config = loader.config();
        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.serial.buffer_size, 256);
        assert_eq!(config.motion.default_speed, 400);
        assert_eq!(loader.config_path.as_deref(), Some(file.path()));
    }

    #[test]
    #[serial]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigLoader::load_from(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    #[serial]
    fn test_invalid_file_is_rejected() {
        let file = write_config("[motion]\nready_lower_limit = 10\nready_upper_limit = -10\n");
        let err = ConfigLoader::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));

        let file = write_config("[serial\nport = 1");
        let err = ConfigLoader::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    #[serial]
    fn test_env_override() {
        env::set_var("STEPPER_LINK_SERIAL_BAUD_RATE", "9600");
        env::set_var("STEPPER_LINK_SERIAL_PORT", "COM9");
        env::set_var("STEPPER_LINK_LOGGING_FORMAT", "json");

        let loader = ConfigLoader::with_defaults();
        assert_eq!(loader.config().serial.baud_rate, 9600);
        assert_eq!(loader.config().serial.port.as_deref(), Some("COM9"));
        assert_eq!(loader.config().logging.format, LogFormat::Json);

        env::remove_var("STEPPER_LINK_SERIAL_BAUD_RATE");
        env::remove_var("STEPPER_LINK_SERIAL_PORT");
        env::remove_var("STEPPER_LINK_LOGGING_FORMAT");
    }

    #[test]
    #[serial]
    fn test_env_parse_error() {
        let file = write_config("");
        env::set_var("STEPPER_LINK_MOTION_DEFAULT_SPEED", "fast");

        let err = ConfigLoader::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::EnvParseError { .. }));
        assert!(err.to_string().contains("STEPPER_LINK_MOTION_DEFAULT_SPEED"));

        // Defaults survive a bad override.
        let loader = ConfigLoader::with_defaults();
        assert_eq!(loader.config().motion.default_speed, 1000);

        env::remove_var("STEPPER_LINK_MOTION_DEFAULT_SPEED");
    }

    #[test]
    #[serial]
    fn test_explicit_config_path_env() {
        let file = write_config("[serial]\nbaud_rate = 19200\n");
        env::set_var(CONFIG_PATH_ENV, file.path());

        assert_eq!(resolve_config_path().as_deref(), Some(file.path()));
        let loader = ConfigLoader::load().unwrap();
        assert_eq!(loader.config().serial.baud_rate, 19200);

        env::remove_var(CONFIG_PATH_ENV);
    }
}
