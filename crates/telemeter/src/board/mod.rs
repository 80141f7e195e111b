//! Hardware contracts and their backends.
//!
//! The runtime only ever talks to the traits defined here. Which concrete
//! peripherals sit behind them is decided once, at startup, by
//! [`Peripherals::from_config`].

#[cfg(target_os = "linux")]
pub mod linux;
pub mod sim;

use std::fmt;
use std::fs::{File, OpenOptions};
use std::net::IpAddr;
use std::path::Path;
use std::rc::Rc;

use crate::config::{BoardKind, Config};
use crate::error::{Error, Result};
use crate::sensor::{Accelerometer, Barometer};

/// A digital input polled by the main loop.
pub trait InputPin: fmt::Debug {
    /// Name used in log lines.
    fn name(&self) -> &str;

    /// Whether the input currently reads high.
    ///
    /// # Errors
    ///
    /// Returns an error if the line cannot be read.
    fn is_high(&self) -> Result<bool>;
}

/// The shared sensor bus, as far as startup diagnostics are concerned.
pub trait BusScanner: fmt::Debug {
    /// Addresses of every device answering on the bus.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus cannot be enumerated.
    fn scan(&mut self) -> Result<Vec<u16>>;
}

/// Settings for the self-hosted wireless network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPointSettings {
    /// Network name.
    pub ssid: String,
    /// Passphrase.
    pub password: String,
    /// Maximum number of associated stations.
    pub max_connections: u8,
    /// Address the device takes on the network.
    pub address: IpAddr,
}

/// The self-hosted wireless access point.
pub trait AccessPoint: fmt::Debug {
    /// Bring the network up and return the device's address on it.
    ///
    /// # Errors
    ///
    /// Returns an error if the radio cannot start the network.
    fn start(&mut self, settings: &AccessPointSettings) -> Result<IpAddr>;
}

/// Every peripheral the runtime drives.
#[derive(Debug)]
pub struct Peripherals {
    /// Card-detect input, shared with the mounted storage handle.
    pub presence: Rc<dyn InputPin>,
    /// Bulk-delete input.
    pub delete: Box<dyn InputPin>,
    /// The I2C bus both sensors sit on.
    pub bus: Box<dyn BusScanner>,
    /// Inertial sensor driver.
    pub accelerometer: Box<dyn Accelerometer>,
    /// Pressure/temperature sensor driver.
    pub barometer: Box<dyn Barometer>,
    /// Wireless access point.
    pub access_point: Box<dyn AccessPoint>,
}

impl Peripherals {
    /// Assemble the peripherals selected by the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the selected backend is unavailable on this
    /// platform or a GPIO line cannot be exported.
    pub fn from_config(config: &Config) -> Result<Self> {
        match config.board.kind {
            BoardKind::Simulated => Ok(sim::peripherals(config)),
            #[cfg(target_os = "linux")]
            BoardKind::Sysfs => linux::peripherals(config),
            #[cfg(not(target_os = "linux"))]
            BoardKind::Sysfs => Err(Error::ConfigValidation {
                message: "board.kind = \"sysfs\" is only available on Linux".to_string(),
            }),
        }
    }
}

/// Name of the platform this binary was built for.
#[must_use]
pub fn platform_name() -> &'static str {
    #[cfg(target_os = "linux")]
    {
        telemeter_linux::platform_name()
    }
    #[cfg(not(target_os = "linux"))]
    {
        std::env::consts::OS
    }
}

/// Open the serial device that mirrors log lines.
///
/// # Errors
///
/// Returns an error if the device cannot be opened for writing.
pub fn open_serial(path: &Path) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .append(true)
        .open(path)
        .map_err(|source| Error::file("open serial port", path, source))
}
