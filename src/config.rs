//! Console configuration using Figment
//!
//! Configuration is loaded from (in order of precedence, highest first):
//! 1. Environment variables prefixed with `PLDCONTROL_`, `__` between key levels
//! 2. TOML configuration file (default: `config/pld_control.toml`, optional)
//! 3. Built-in defaults, which match the bench setup
//!
//! ```text
//! PLDCONTROL_APPLICATION__LOG_LEVEL=debug
//! PLDCONTROL_MOTION__PORT=/dev/ttyACM0
//! PLDCONTROL_LASER__PORT=/dev/ttyUSB0
//! PLDCONTROL_STATUS_QUERY__PACING_MS=250
//! ```
//!
//! # Example
//!
//! ```toml
//! [application]
//! log_level = "info"
//! log_file = "/var/log/pld/pldcontrol_log_file.aki"
//!
//! [motion]
//! port = "/dev/ttyACM0"
//! baud_rate = 9600
//!
//! [laser]
//! port = "/dev/ttyUSB0"
//! baud_rate = 19200
//!
//! [laser_timer]
//! auto_stop_secs = 120
//! ```

use crate::link::Link;
use crate::log_sink::LOG_FILE_NAME;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/pld_control.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "PLDCONTROL_";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Figment failed to load or deserialize
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    /// Values loaded but are not usable
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level console configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationSettings,
    /// Motion / gas-flow controller link
    #[serde(default = "LinkSettings::motion_defaults")]
    pub motion: LinkSettings,
    /// Laser power supply link
    #[serde(default = "LinkSettings::laser_defaults")]
    pub laser: LinkSettings,
    /// Status round pacing
    #[serde(default)]
    pub status_query: StatusQuerySettings,
    /// Laser auto-stop timer
    #[serde(default)]
    pub laser_timer: LaserTimerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            application: ApplicationSettings::default(),
            motion: LinkSettings::motion_defaults(),
            laser: LinkSettings::laser_defaults(),
            status_query: StatusQuerySettings::default(),
            laser_timer: LaserTimerSettings::default(),
        }
    }
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Diagnostic log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Operator log file; defaults to the documents directory
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

/// Parity setting of a serial link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// No parity bit
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

/// Serial settings of one link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSettings {
    /// Port name (e.g., "COM4", "/dev/ttyACM0")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5-8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Stop bits (1 or 2)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Parity
    #[serde(default = "default_parity")]
    pub parity: Parity,
    /// Assert DTR after opening
    #[serde(default)]
    pub dtr: bool,
    /// Assert RTS after opening
    #[serde(default)]
    pub rts: bool,
}

impl LinkSettings {
    /// Arduino Leonardo-class motion controller: 9600 baud, DTR on, RTS off.
    pub fn motion_defaults() -> Self {
        Self {
            port: default_motion_port(),
            baud_rate: 9600,
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::None,
            dtr: true,
            rts: false,
        }
    }

    /// Laser power supply: 19200 baud 8N1, DTR off.
    pub fn laser_defaults() -> Self {
        Self {
            port: default_laser_port(),
            baud_rate: 19200,
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::None,
            dtr: false,
            rts: false,
        }
    }
}

/// Status round configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusQuerySettings {
    /// Delay after each query, in milliseconds
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
}

impl Default for StatusQuerySettings {
    fn default() -> Self {
        Self {
            pacing_ms: default_pacing_ms(),
        }
    }
}

impl StatusQuerySettings {
    /// Pacing as a duration.
    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.pacing_ms)
    }
}

/// Laser auto-stop timer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaserTimerSettings {
    /// Stop the laser this many seconds after start; unset means run until stopped
    #[serde(default)]
    pub auto_stop_secs: Option<u64>,
}

impl LaserTimerSettings {
    /// Auto-stop delay, if enabled.
    pub fn auto_stop(&self) -> Option<Duration> {
        self.auto_stop_secs.map(Duration::from_secs)
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_name() -> String {
    "PLD Control".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_motion_port() -> String {
    "COM4".to_string()
}

fn default_laser_port() -> String {
    "COM1".to_string()
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_parity() -> Parity {
    Parity::None
}

fn default_pacing_ms() -> u64 {
    200
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl Settings {
    /// Load from a specific file path and environment, then validate.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    /// Defaults sit underneath both, so a file or variable may override a
    /// single key of a section.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ConfigError::LoadError(Box::new(e)))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Settings of one link.
    pub fn link(&self, link: Link) -> &LinkSettings {
        match link {
            Link::Motion => &self.motion,
            Link::Laser => &self.laser,
        }
    }

    /// Operator log location: configured path, or
    /// `<documents>/PLDControl/Data/pldcontrol_log_file.aki`.
    pub fn log_file(&self) -> PathBuf {
        if let Some(path) = &self.application.log_file {
            return path.clone();
        }
        dirs::document_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("PLDControl")
            .join("Data")
            .join(LOG_FILE_NAME)
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        for link in [Link::Motion, Link::Laser] {
            let settings = self.link(link);
            if settings.port.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "{link} link: 'port' cannot be empty"
                )));
            }
            if settings.baud_rate == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{link} link: 'baud_rate' must be greater than 0"
                )));
            }
            if !(5..=8).contains(&settings.data_bits) {
                return Err(ConfigError::ValidationError(format!(
                    "{link} link: invalid data_bits {}. Must be 5-8",
                    settings.data_bits
                )));
            }
            if !matches!(settings.stop_bits, 1 | 2) {
                return Err(ConfigError::ValidationError(format!(
                    "{link} link: invalid stop_bits {}. Must be 1 or 2",
                    settings.stop_bits
                )));
            }
        }

        if self.status_query.pacing_ms == 0 {
            return Err(ConfigError::ValidationError(
                "status_query.pacing_ms must be greater than 0".to_string(),
            ));
        }

        if self.laser_timer.auto_stop_secs == Some(0) {
            return Err(ConfigError::ValidationError(
                "laser_timer.auto_stop_secs must be greater than 0 when set".to_string(),
            ));
        }

        Ok(())
    }
}
