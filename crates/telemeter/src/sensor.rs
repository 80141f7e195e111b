//! Sensor abstraction.
//!
//! A [`Sensor`] is one of a closed set of variants, each producing a named
//! mapping of floats for exactly one [`Measurement`]. Reading a sensor never
//! fails: driver errors are logged and replaced by the documented fallback
//! values, so a bad bus transaction costs one line of data, not a tick.

use std::fmt;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::clock::Clock;
use crate::error::Result;
use crate::logger::Logger;

/// What a reading measures. Doubles as the line-protocol measurement name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Measurement {
    /// Three-axis acceleration from the BNO08x IMU.
    Accelerometer,
    /// Barometric pressure and temperature from the DPS310.
    PressureTemp,
}

impl Measurement {
    /// Order in which the runtime polls sensors within a tick.
    pub const POLL_ORDER: [Measurement; 2] = [Self::PressureTemp, Self::Accelerometer];

    /// The line-protocol measurement name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Accelerometer => "bno08x",
            Self::PressureTemp => "dps310",
        }
    }

    /// Field names in emission order.
    #[must_use]
    pub const fn field_names(self) -> &'static [&'static str] {
        match self {
            Self::Accelerometer => &["accel_x", "accel_y", "accel_z"],
            Self::PressureTemp => &["pressure", "temp"],
        }
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An insertion-ordered mapping of field name to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields {
    entries: Vec<(String, f64)>,
}

impl Fields {
    /// An empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every declared field of `measurement` set to zero.
    #[must_use]
    pub fn zeros(measurement: Measurement) -> Self {
        measurement
            .field_names()
            .iter()
            .map(|name| (*name, 0.0))
            .collect()
    }

    /// Set a field. An existing field keeps its position.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Value of a field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for Fields {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut fields = Self::new();
        for (name, value) in iter {
            fields.insert(name, value);
        }
        fields
    }
}

impl Serialize for Fields {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// One timestamped sample of one sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    measurement: Measurement,
    fields: Fields,
    timestamp_ms: u64,
}

impl SensorReading {
    /// Capture a reading.
    #[must_use]
    pub fn new(measurement: Measurement, fields: Fields, timestamp_ms: u64) -> Self {
        Self {
            measurement,
            fields,
            timestamp_ms,
        }
    }

    /// What was measured.
    #[must_use]
    pub fn measurement(&self) -> Measurement {
        self.measurement
    }

    /// The sampled values.
    #[must_use]
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Milliseconds since runtime start.
    #[must_use]
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }
}

/// Driver contract for a three-axis accelerometer.
pub trait Accelerometer: fmt::Debug {
    /// Enable acceleration reports.
    ///
    /// # Errors
    ///
    /// Returns an error if the device rejects the configuration.
    fn enable(&mut self) -> Result<()> {
        Ok(())
    }

    /// Latest acceleration in m/s², or `None` if no report is available yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus transaction fails.
    fn acceleration(&mut self) -> Result<Option<[f64; 3]>>;
}

/// Driver contract for a pressure/temperature sensor.
pub trait Barometer: fmt::Debug {
    /// Prepare the device for measurements.
    ///
    /// # Errors
    ///
    /// Returns an error if the device does not respond.
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Pressure in hPa.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus transaction fails.
    fn pressure(&mut self) -> Result<f64>;

    /// Temperature in °C.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus transaction fails.
    fn temperature(&mut self) -> Result<f64>;
}

/// A sensor the runtime polls.
#[derive(Debug)]
pub enum Sensor {
    /// Inertial sensor. Fallback: all axes zero.
    Accelerometer(Box<dyn Accelerometer>),
    /// Atmospheric sensor. Fallback: each unreadable field zero.
    PressureTemp(Box<dyn Barometer>),
}

impl Sensor {
    /// The measurement this sensor produces.
    #[must_use]
    pub fn measurement(&self) -> Measurement {
        match self {
            Self::Accelerometer(_) => Measurement::Accelerometer,
            Self::PressureTemp(_) => Measurement::PressureTemp,
        }
    }

    /// Initialize the driver. Returns whether it came up.
    ///
    /// A sensor that fails to initialize stays in the poll set and produces
    /// fallback readings.
    pub fn init(&mut self, logger: &Logger) -> bool {
        let name = self.measurement().name();
        logger.info(format!("Initializing {name} sensor ..."));
        let result = match self {
            Self::Accelerometer(driver) => driver.enable(),
            Self::PressureTemp(driver) => driver.init(),
        };
        match result {
            Ok(()) => {
                logger.info("Done.");
                true
            }
            Err(err) => {
                logger.report(&format!("Could not initialize {name}"), &err);
                false
            }
        }
    }

    /// Read the current values. Never fails.
    pub fn read(&mut self, logger: &Logger) -> Fields {
        let measurement = self.measurement();
        match self {
            Self::Accelerometer(driver) => match driver.acceleration() {
                Ok(Some([x, y, z])) => [("accel_x", x), ("accel_y", y), ("accel_z", z)]
                    .into_iter()
                    .collect(),
                Ok(None) => {
                    logger.error(format!(
                        "Could not get acceleration data from {}.",
                        measurement.name()
                    ));
                    Fields::zeros(measurement)
                }
                Err(err) => {
                    logger.report(&format!("Could not read {}", measurement.name()), &err);
                    Fields::zeros(measurement)
                }
            },
            Self::PressureTemp(driver) => {
                let pressure = driver.pressure().unwrap_or_else(|err| {
                    logger.report("Could not read pressure", &err);
                    0.0
                });
                let temp = driver.temperature().unwrap_or_else(|err| {
                    logger.report("Could not read temperature", &err);
                    0.0
                });
                [("pressure", pressure), ("temp", temp)].into_iter().collect()
            }
        }
    }

    /// Read and timestamp.
    pub fn sample(&mut self, logger: &Logger, clock: &dyn Clock) -> SensorReading {
        let fields = self.read(logger);
        SensorReading::new(self.measurement(), fields, clock.now_ms())
    }
}
