//! Configuration management for telemeter.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default configuration directory name.
const CONFIG_DIR_NAME: &str = "telemeter";

/// Environment variable prefix.
const ENV_PREFIX: &str = "TELEMETER_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `TELEMETER_`, sections separated by `__`)
/// 2. TOML config file at `~/.config/telemeter/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Access point and HTTP configuration.
    pub network: NetworkConfig,
    /// Peripheral configuration.
    pub board: BoardConfig,
    /// Main loop configuration.
    pub runtime: RuntimeConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Mount point of the removable card.
    pub root: PathBuf,
    /// Sensor data file name, relative to the root.
    pub data_file: String,
    /// Run log file name (Info and Warn records).
    pub run_log: String,
    /// Error log file name (Error records).
    pub error_log: String,
    /// How often to re-check the presence signal while waiting to mount.
    pub mount_poll_ms: u64,
}

/// Access point and HTTP configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Access point SSID.
    pub ssid: String,
    /// Access point passphrase.
    pub password: String,
    /// Maximum number of associated stations.
    pub max_connections: u8,
    /// Address the access point hands out for the device itself.
    pub address: IpAddr,
    /// HTTP listener port.
    pub port: u16,
    /// URL prefix under which stored files are downloadable.
    pub files_prefix: String,
    /// Download chunk size in bytes.
    pub chunk_size: usize,
    /// Socket read/write timeout in milliseconds.
    pub io_timeout_ms: u64,
    /// Largest request head accepted, in bytes.
    pub max_request_bytes: usize,
}

/// Which peripheral backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardKind {
    /// Synthetic sensors and file-driven inputs, for development hosts.
    #[default]
    Simulated,
    /// Linux sysfs GPIO and IIO devices.
    Sysfs,
}

/// How the bulk-delete input is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteTrigger {
    /// Delete once per low-to-high transition.
    #[default]
    Edge,
    /// Delete on every tick while the input is high.
    Level,
}

impl std::fmt::Display for DeleteTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Edge => write!(f, "edge"),
            Self::Level => write!(f, "level"),
        }
    }
}

/// Peripheral configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// Backend selection.
    pub kind: BoardKind,
    /// Kernel GPIO number of the card-detect input.
    pub presence_gpio: u32,
    /// Kernel GPIO number of the bulk-delete input.
    pub delete_gpio: u32,
    /// I2C bus the sensors share.
    pub i2c_bus: u32,
    /// IIO device directory of the accelerometer.
    pub accelerometer_device: PathBuf,
    /// IIO device directory of the pressure/temperature sensor.
    pub barometer_device: PathBuf,
    /// Serial device mirroring every log line.
    pub serial_path: Option<PathBuf>,
    /// Simulated card detect: present while this file exists.
    /// Unset means the card is always present.
    pub presence_file: Option<PathBuf>,
    /// Simulated delete input: asserted while this file exists.
    /// Unset means the input is never asserted.
    pub delete_file: Option<PathBuf>,
    /// Edge or level triggering of the delete input.
    pub delete_trigger: DeleteTrigger,
}

/// Main loop configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Pause after each tick in milliseconds. 0 runs ticks back to back.
    pub tick_pause_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/sd"),
            data_file: "data.txt".to_string(),
            run_log: "run.log".to_string(),
            error_log: "error.log".to_string(),
            mount_poll_ms: 50,
        }
    }
}

impl StorageConfig {
    /// Get the mount poll interval as a Duration.
    #[must_use]
    pub fn mount_poll_interval(&self) -> Duration {
        Duration::from_millis(self.mount_poll_ms)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ssid: "AUXSPACE".to_string(),
            password: "wifipassword".to_string(),
            max_connections: 2,
            address: IpAddr::from([192, 168, 4, 1]),
            port: 80,
            files_prefix: "/sd".to_string(),
            chunk_size: 512,
            io_timeout_ms: 2_000,
            max_request_bytes: 8 * 1024,
        }
    }
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            kind: BoardKind::default(),
            presence_gpio: 15,
            delete_gpio: 14,
            i2c_bus: 1,
            accelerometer_device: PathBuf::from("/sys/bus/iio/devices/iio:device0"),
            barometer_device: PathBuf::from("/sys/bus/iio/devices/iio:device1"),
            serial_path: None,
            presence_file: None,
            delete_file: None,
            delete_trigger: DeleteTrigger::default(),
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `TELEMETER_`)
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);
        tracing::debug!("Loading configuration from {}", config_file.display());

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let names = [
            ("data_file", &self.storage.data_file),
            ("run_log", &self.storage.run_log),
            ("error_log", &self.storage.error_log),
        ];
        for (key, name) in names {
            if crate::storage::validate_file_name(name).is_err() {
                return Err(invalid(format!("storage.{key} {name:?} is not a plain file name")));
            }
        }
        if names[0].1 == names[1].1 || names[0].1 == names[2].1 || names[1].1 == names[2].1 {
            return Err(invalid("storage file names must be distinct"));
        }

        if self.network.chunk_size == 0 {
            return Err(invalid("network.chunk_size must be greater than 0"));
        }
        if self.network.io_timeout_ms == 0 {
            return Err(invalid("network.io_timeout_ms must be greater than 0"));
        }
        if self.network.max_request_bytes < 64 {
            return Err(invalid("network.max_request_bytes must be at least 64"));
        }

        let prefix = &self.network.files_prefix;
        let segment = prefix.strip_prefix('/').unwrap_or_default();
        if segment.is_empty() || segment.contains('/') || segment == "delete" {
            return Err(invalid(format!(
                "network.files_prefix {prefix:?} must be a single path segment like \"/sd\""
            )));
        }

        Ok(())
    }

    /// Get the socket I/O timeout as a Duration.
    #[must_use]
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.network.io_timeout_ms)
    }

    /// Get the pause between ticks as a Duration.
    #[must_use]
    pub fn tick_pause(&self) -> Duration {
        Duration::from_millis(self.runtime.tick_pause_ms)
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}
