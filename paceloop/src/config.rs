//! Configuration file handling for ~/.paceloop/config.ini.
//!
//! Loads and saves operator configuration with sensible defaults. Parsing
//! starts from [`ConfigFile::default`] and overlays any values found in the
//! INI, so a partial file is fine and a missing file means defaults.

use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;

use crate::daemon::{
    DaemonConfig, DEFAULT_CHECK_INTERVAL_SECS, DEFAULT_CPU_TARGET_PERCENT,
    DEFAULT_INITIAL_PAUSE_MICROS, DEFAULT_STEP_MICROS,
};
use crate::logging::{default_log_dir, default_log_file};

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Failed to write config file
    #[error("Failed to write config file: {0}")]
    WriteError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Failed to create config directory
    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

/// `[throttle]` section: the daemon's control-loop knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleSettings {
    /// Per-core load percentage to stay under.
    pub cpu_target_percent: i64,
    /// Pause adjustment per sampling event, in microseconds.
    pub step_micros: i64,
    /// Seconds between load-average samples.
    pub check_interval_secs: i64,
    /// Starting pause in microseconds.
    pub initial_pause_micros: i64,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            cpu_target_percent: DEFAULT_CPU_TARGET_PERCENT,
            step_micros: DEFAULT_STEP_MICROS,
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            initial_pause_micros: DEFAULT_INITIAL_PAUSE_MICROS,
        }
    }
}

impl From<&ThrottleSettings> for DaemonConfig {
    fn from(settings: &ThrottleSettings) -> Self {
        Self {
            initial_pause_micros: settings.initial_pause_micros,
            cpu_target_percent: settings.cpu_target_percent,
            step_micros: settings.step_micros,
            check_interval_secs: settings.check_interval_secs,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Log file path.
    pub file: PathBuf,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            file: Path::new(default_log_dir()).join(default_log_file()),
        }
    }
}

/// The full configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    /// Control-loop settings.
    pub throttle: ThrottleSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl ConfigFile {
    /// Load configuration from the default path (~/.paceloop/config.ini).
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        parse_ini(&ini)
    }

    /// Save configuration to the default path (~/.paceloop/config.ini).
    pub fn save(&self) -> Result<(), ConfigFileError> {
        self.save_to(&config_file_path())
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }

        std::fs::write(path, self.to_config_string())
            .map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }

    /// Create the default config file if it doesn't exist.
    ///
    /// Returns the path to the config file.
    pub fn ensure_exists() -> Result<PathBuf, ConfigFileError> {
        let path = config_file_path();
        if !path.exists() {
            Self::default().save_to(&path)?;
        }
        Ok(path)
    }

    fn to_config_string(&self) -> String {
        format!(
            "[throttle]\n\
             cpu_target = {}\n\
             step_micros = {}\n\
             check_interval = {}\n\
             initial_pause_micros = {}\n\
             \n\
             [logging]\n\
             file = {}\n",
            self.throttle.cpu_target_percent,
            self.throttle.step_micros,
            self.throttle.check_interval_secs,
            self.throttle.initial_pause_micros,
            self.logging.file.display(),
        )
    }
}

/// Parse an `Ini` object into a `ConfigFile`.
fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [throttle] section
    if let Some(section) = ini.section(Some("throttle")) {
        if let Some(v) = section.get("cpu_target") {
            config.throttle.cpu_target_percent = parse_integer("throttle", "cpu_target", v)?;
        }
        if let Some(v) = section.get("step_micros") {
            config.throttle.step_micros = parse_integer("throttle", "step_micros", v)?;
        }
        if let Some(v) = section.get("check_interval") {
            config.throttle.check_interval_secs = parse_integer("throttle", "check_interval", v)?;
        }
        if let Some(v) = section.get("initial_pause_micros") {
            config.throttle.initial_pause_micros =
                parse_integer("throttle", "initial_pause_micros", v)?;
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.file = PathBuf::from(v);
            }
        }
    }

    Ok(config)
}

fn parse_integer(section: &str, key: &str, value: &str) -> Result<i64, ConfigFileError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigFileError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: "must be an integer".to_string(),
        })
}

/// Get the path to the config directory (~/.paceloop).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".paceloop")
}

/// Get the path to the config file (~/.paceloop/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}
