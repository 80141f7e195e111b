//! Simulated peripherals for development hosts and tests.

use std::cell::Cell;
use std::net::IpAddr;
use std::path::PathBuf;
use std::rc::Rc;

use super::{AccessPoint, AccessPointSettings, BusScanner, InputPin, Peripherals};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::sensor::{Accelerometer, Barometer};

/// I2C addresses the simulated bus reports (BNO08x, DPS310).
pub const SIMULATED_ADDRESSES: [u16; 2] = [0x4a, 0x77];

/// Build the simulated peripheral set.
#[must_use]
pub fn peripherals(config: &Config) -> Peripherals {
    let presence: Rc<dyn InputPin> = match &config.board.presence_file {
        Some(path) => Rc::new(FilePin::new("card detect", path.clone())),
        None => Rc::new(SimulatedPin::new("card detect", true)),
    };
    let delete: Box<dyn InputPin> = match &config.board.delete_file {
        Some(path) => Box::new(FilePin::new("delete", path.clone())),
        None => Box::new(SimulatedPin::new("delete", false)),
    };

    Peripherals {
        presence,
        delete,
        bus: Box::new(SimulatedBus::new(SIMULATED_ADDRESSES.to_vec())),
        accelerometer: Box::new(SimulatedAccelerometer::default()),
        barometer: Box::new(SimulatedBarometer::default()),
        access_point: Box::new(StaticAccessPoint),
    }
}

/// An input whose level is set in software. Clones share the level.
#[derive(Debug, Clone)]
pub struct SimulatedPin {
    name: String,
    level: Rc<Cell<bool>>,
}

impl SimulatedPin {
    /// A pin starting at `level`.
    #[must_use]
    pub fn new(name: impl Into<String>, level: bool) -> Self {
        Self {
            name: name.into(),
            level: Rc::new(Cell::new(level)),
        }
    }

    /// Drive the pin.
    pub fn set(&self, level: bool) {
        self.level.set(level);
    }
}

impl InputPin for SimulatedPin {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_high(&self) -> Result<bool> {
        Ok(self.level.get())
    }
}

/// An input that reads high while a file exists.
#[derive(Debug, Clone)]
pub struct FilePin {
    name: String,
    path: PathBuf,
}

impl FilePin {
    /// A pin tracking the existence of `path`.
    #[must_use]
    pub fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
        }
    }
}

impl InputPin for FilePin {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_high(&self) -> Result<bool> {
        self.path
            .try_exists()
            .map_err(|e| Error::pin(&self.name, e.to_string()))
    }
}

/// A bus that reports a fixed set of addresses.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBus {
    addresses: Vec<u16>,
}

impl SimulatedBus {
    /// A bus with the given devices.
    #[must_use]
    pub fn new(addresses: Vec<u16>) -> Self {
        Self { addresses }
    }
}

impl BusScanner for SimulatedBus {
    fn scan(&mut self) -> Result<Vec<u16>> {
        Ok(self.addresses.clone())
    }
}

/// An access point that is already up at the configured address.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticAccessPoint;

impl AccessPoint for StaticAccessPoint {
    fn start(&mut self, settings: &AccessPointSettings) -> Result<IpAddr> {
        Ok(settings.address)
    }
}

/// Earth gravity in m/s².
const GRAVITY: f64 = 9.806_65;

/// Accelerometer at rest with a slow deterministic wobble.
#[derive(Debug, Clone, Default)]
pub struct SimulatedAccelerometer {
    step: u32,
}

impl Accelerometer for SimulatedAccelerometer {
    fn acceleration(&mut self) -> Result<Option<[f64; 3]>> {
        let phase = f64::from(self.step) / 16.0;
        self.step = self.step.wrapping_add(1);
        Ok(Some([
            0.05 * phase.sin(),
            0.05 * phase.cos(),
            GRAVITY + 0.02 * (phase / 3.0).sin(),
        ]))
    }
}

/// Sea-level barometer with slow deterministic drift.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBarometer {
    step: u32,
}

impl Barometer for SimulatedBarometer {
    fn pressure(&mut self) -> Result<f64> {
        let phase = f64::from(self.step) / 64.0;
        self.step = self.step.wrapping_add(1);
        Ok(1013.25 + 0.5 * phase.sin())
    }

    fn temperature(&mut self) -> Result<f64> {
        let phase = f64::from(self.step) / 64.0;
        Ok(21.5 + 0.25 * phase.cos())
    }
}
