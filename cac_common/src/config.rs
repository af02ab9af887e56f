//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load TOML configuration files
//! across all CAC applications, plus the board description (`[board]`) and
//! runtime settings (`[runtime]`) of the coordination layer.
//!
//! # Usage
//!
//! ```rust,no_run
//! use cac_common::config::{CacConfig, ConfigError};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = CacConfig::load_validated(Path::new("cac.toml"))?;
//!     println!("Board: {}", config.board.name);
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::consts::{
    DEFAULT_GPIO_CHIP_PATH, DEFAULT_IIO_SYSFS_PATH, DEFAULT_LINE_LABEL, SEG_HANDSHAKE, SEG_SENSOR,
    SEG_VALVE,
};
use crate::device::{BoardLayout, ComponentKind, DeviceId, legacy_kind};
use crate::state::{FixedName, SensorDescriptor, ValveDescriptor};

/// Error type for configuration loading operations.
///
/// This enum represents all possible errors that can occur when loading
/// configuration files.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Represents the verbosity level of logging output.
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Common configuration fields shared across all CAC applications.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "cac-cacmo-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            service_name: "cac".to_string(),
        }
    }
}

/// Trait for loading configuration from TOML files.
///
/// This trait provides a default implementation that works with any type
/// implementing `serde::de::DeserializeOwned`.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

// ─── Board ──────────────────────────────────────────────────────────

fn default_iio_sysfs_path() -> String {
    DEFAULT_IIO_SYSFS_PATH.to_string()
}

fn default_gpio_chip_path() -> String {
    DEFAULT_GPIO_CHIP_PATH.to_string()
}

fn default_line_label() -> String {
    DEFAULT_LINE_LABEL.to_string()
}

/// One valve row of the board table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValveEntry {
    /// Device id.
    pub id: DeviceId,
    /// Valve name.
    pub name: String,
    /// GPIO line offset.
    pub pin: u16,
}

/// One sensor row of the board table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorEntry {
    /// Device id.
    pub id: DeviceId,
    /// Sensor name.
    pub name: String,
    /// ADC channel number.
    pub channel: u16,
}

/// Board description: identity, hardware paths and the device tables.
///
/// # TOML Example
///
/// ```toml
/// [board]
/// name = "CACMO"
/// id = 1
/// gpio_chip_path = "/dev/gpiochip0"
///
/// [[board.valves]]
/// id = 10
/// name = "VCE"
/// pin = 5
///
/// [[board.sensors]]
/// id = 15
/// name = "Sensor1"
/// channel = 0
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Board name.
    pub name: String,
    /// Board number.
    pub id: u16,
    /// Directory holding the `in_voltage<N>_raw` files (with trailing `/`).
    #[serde(default = "default_iio_sysfs_path")]
    pub iio_sysfs_path: String,
    /// GPIO character device path.
    #[serde(default = "default_gpio_chip_path")]
    pub gpio_chip_path: String,
    /// Consumer label for requested lines.
    #[serde(default = "default_line_label")]
    pub line_label: String,
    /// Valve table, in slot order.
    #[serde(default)]
    pub valves: Vec<ValveEntry>,
    /// Sensor table, in slot order.
    #[serde(default)]
    pub sensors: Vec<SensorEntry>,
}

impl BoardConfig {
    /// The CACMO board: four valves on pins 5/6/19/26 and four ADC channels.
    pub fn cacmo() -> Self {
        let valves = [("VCE", 5), ("VCO", 6), ("Vanne3", 19), ("Vanne4", 26)]
            .iter()
            .enumerate()
            .map(|(i, (name, pin))| ValveEntry {
                id: DeviceId(10 + i as u16),
                name: (*name).to_string(),
                pin: *pin,
            })
            .collect();
        let sensors = (0..4u16)
            .map(|ch| SensorEntry {
                id: DeviceId(15 + ch),
                name: format!("Sensor{}", ch + 1),
                channel: ch,
            })
            .collect();

        Self {
            name: "CACMO".to_string(),
            id: 1,
            iio_sysfs_path: default_iio_sysfs_path(),
            gpio_chip_path: default_gpio_chip_path(),
            line_label: default_line_label(),
            valves,
            sensors,
        }
    }

    /// Build the explicit slot table.
    pub fn layout(&self) -> Result<BoardLayout, ConfigError> {
        BoardLayout::new(
            self.valves.iter().map(|v| v.id),
            self.sensors.iter().map(|s| s.id),
        )
        .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Encoded board name.
    pub fn board_name(&self) -> Result<FixedName, ConfigError> {
        fixed_name(&self.name, "board name")
    }

    /// Static descriptor of a sensor row.
    pub fn sensor_descriptor(&self, entry: &SensorEntry) -> Result<SensorDescriptor, ConfigError> {
        Ok(SensorDescriptor {
            name: fixed_name(&entry.name, "sensor name")?,
            board: self.board_name()?,
            channel: entry.channel,
        })
    }

    /// Static descriptor of a valve row.
    pub fn valve_descriptor(&self, entry: &ValveEntry) -> Result<ValveDescriptor, ConfigError> {
        Ok(ValveDescriptor {
            name: fixed_name(&entry.name, "valve name")?,
            board: self.board_name()?,
            pin: entry.pin,
        })
    }

    /// Validate the board table.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - the board has no name or no device
    /// - a name does not fit the fixed descriptor width
    /// - an id, pin or channel is used twice, or a kind exceeds its capacity
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.board_name()?;
        if self.valves.is_empty() && self.sensors.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "board {} has no device",
                self.name
            )));
        }

        let layout = self.layout()?;

        let mut pins = HashSet::new();
        for v in &self.valves {
            self.valve_descriptor(v)?;
            if !pins.insert(v.pin) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate valve pin {} (id {})",
                    v.pin, v.id
                )));
            }
        }

        let mut channels = HashSet::new();
        for s in &self.sensors {
            self.sensor_descriptor(s)?;
            if !channels.insert(s.channel) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate sensor channel {} (id {})",
                    s.channel, s.id
                )));
            }
        }

        for kind in [ComponentKind::Valve, ComponentKind::Sensor] {
            for id in layout.ids(kind) {
                let legacy = legacy_kind(self.id, *id);
                if legacy != kind {
                    warn!(
                        "Board {}: id {} is listed as {} but the legacy numbering makes it a {}",
                        self.name, id, kind, legacy
                    );
                }
            }
        }

        Ok(())
    }
}

fn fixed_name(name: &str, what: &str) -> Result<FixedName, ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::ValidationError(format!("{what} cannot be empty")));
    }
    FixedName::new(name).ok_or_else(|| {
        ConfigError::ValidationError(format!("{what} {name:?} does not fit in a slot name"))
    })
}

// ─── Runtime ────────────────────────────────────────────────────────

fn default_sensor_segment() -> String {
    SEG_SENSOR.to_string()
}

fn default_valve_segment() -> String {
    SEG_VALVE.to_string()
}

fn default_handshake_segment() -> String {
    SEG_HANDSHAKE.to_string()
}

fn default_attach_retries() -> u32 {
    50
}

fn default_attach_retry_interval_ms() -> u64 {
    20
}

/// Segment names, wait policy and attach retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Sensor region name.
    #[serde(default = "default_sensor_segment")]
    pub sensor_segment: String,
    /// Valve region name.
    #[serde(default = "default_valve_segment")]
    pub valve_segment: String,
    /// Handshake region name.
    #[serde(default = "default_handshake_segment")]
    pub handshake_segment: String,
    /// Bound on the wait for `ready` [ms]. Absent or 0 = wait forever.
    #[serde(default)]
    pub poll_timeout_ms: Option<u64>,
    /// Attach attempts before giving up on a missing region.
    #[serde(default = "default_attach_retries")]
    pub attach_retries: u32,
    /// Pause between attach attempts [ms].
    #[serde(default = "default_attach_retry_interval_ms")]
    pub attach_retry_interval_ms: u64,
}

impl RuntimeConfig {
    /// Poll timeout as a duration, `None` for an unbounded wait.
    pub fn poll_timeout(&self) -> Option<Duration> {
        self.poll_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Pause between attach attempts.
    pub fn attach_retry_interval(&self) -> Duration {
        Duration::from_millis(self.attach_retry_interval_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let names = [
            &self.sensor_segment,
            &self.valve_segment,
            &self.handshake_segment,
        ];
        for name in names {
            if name.is_empty() || name.contains('/') {
                return Err(ConfigError::ValidationError(format!(
                    "invalid segment name {name:?}"
                )));
            }
        }
        let unique: HashSet<_> = names.iter().collect();
        if unique.len() != names.len() {
            return Err(ConfigError::ValidationError(
                "segment names must be distinct".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            sensor_segment: default_sensor_segment(),
            valve_segment: default_valve_segment(),
            handshake_segment: default_handshake_segment(),
            poll_timeout_ms: None,
            attach_retries: default_attach_retries(),
            attach_retry_interval_ms: default_attach_retry_interval_ms(),
        }
    }
}

// ─── CacConfig ──────────────────────────────────────────────────────

/// Complete `cac.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacConfig {
    /// Common fields.
    #[serde(default)]
    pub shared: SharedConfig,
    /// Board description.
    pub board: BoardConfig,
    /// Runtime settings.
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl CacConfig {
    /// Load and validate a configuration file.
    pub fn load_validated(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.board.validate()?;
        self.runtime.validate()
    }
}

impl Default for CacConfig {
    fn default() -> Self {
        Self {
            shared: SharedConfig::default(),
            board: BoardConfig::cacmo(),
            runtime: RuntimeConfig::default(),
        }
    }
}
