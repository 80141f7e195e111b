//! Linux sysfs peripherals: GPIO inputs, IIO sensors and the I2C device list.

use std::rc::Rc;

use telemeter_linux::{Gpio, IioDevice};
use tracing::{debug, trace};

use super::sim::StaticAccessPoint;
use super::{BusScanner, InputPin, Peripherals};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::sensor::{Accelerometer, Barometer, Measurement};

/// Build the sysfs peripheral set.
///
/// # Errors
///
/// Returns an error if sysfs is not mounted or a GPIO line cannot be
/// exported as an input.
pub fn peripherals(config: &Config) -> Result<Peripherals> {
    telemeter_linux::init()
        .map_err(|source| Error::file("open", telemeter_linux::SYSFS_ROOT, source))?;
    let board = &config.board;
    Ok(Peripherals {
        presence: Rc::new(SysfsPin::export("card detect", Gpio::new(board.presence_gpio))?),
        delete: Box::new(SysfsPin::export("delete", Gpio::new(board.delete_gpio))?),
        bus: Box::new(SysfsI2cBus { bus: board.i2c_bus }),
        accelerometer: Box::new(IioAccelerometer::new(IioDevice::new(
            &board.accelerometer_device,
        ))),
        barometer: Box::new(IioBarometer::new(IioDevice::new(&board.barometer_device))),
        // Network bring-up is owned by the OS (hostapd); the address is configured.
        access_point: Box::new(StaticAccessPoint),
    })
}

/// A sysfs GPIO configured as an input.
#[derive(Debug)]
pub struct SysfsPin {
    name: String,
    gpio: Gpio,
}

impl SysfsPin {
    /// Export `gpio` as an input.
    ///
    /// # Errors
    ///
    /// Returns an error if the line cannot be exported.
    pub fn export(name: impl Into<String>, gpio: Gpio) -> Result<Self> {
        let name = name.into();
        gpio.export_input()
            .map_err(|e| Error::pin(&name, format!("export gpio{}: {e}", gpio.number())))?;
        debug!("Exported gpio{} as {name}", gpio.number());
        Ok(Self { name, gpio })
    }
}

impl InputPin for SysfsPin {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_high(&self) -> Result<bool> {
        self.gpio
            .read()
            .map_err(|e| Error::pin(&self.name, e.to_string()))
    }
}

/// The kernel's view of an I2C bus.
#[derive(Debug, Clone, Copy)]
pub struct SysfsI2cBus {
    bus: u32,
}

impl BusScanner for SysfsI2cBus {
    fn scan(&mut self) -> Result<Vec<u16>> {
        telemeter_linux::i2c_addresses(self.bus)
            .map_err(|e| Error::Bus(format!("i2c-{}: {e}", self.bus)))
    }
}

/// Accelerometer exposed through IIO (`in_accel_{x,y,z}`, m/s²).
#[derive(Debug)]
pub struct IioAccelerometer {
    device: IioDevice,
}

impl IioAccelerometer {
    /// Wrap an IIO device.
    #[must_use]
    pub fn new(device: IioDevice) -> Self {
        Self { device }
    }

    fn channel(&self, channel: &str) -> Result<f64> {
        self.device
            .read_channel(channel)
            .map_err(|e| Error::sensor(Measurement::Accelerometer.name(), e.to_string()))
    }
}

impl Accelerometer for IioAccelerometer {
    fn enable(&mut self) -> Result<()> {
        let name = self
            .device
            .name()
            .map_err(|e| Error::sensor(Measurement::Accelerometer.name(), e.to_string()))?;
        debug!("Accelerometer driver {name} at {}", self.device.dir().display());
        Ok(())
    }

    fn acceleration(&mut self) -> Result<Option<[f64; 3]>> {
        let x = self.channel("accel_x")?;
        let y = self.channel("accel_y")?;
        let z = self.channel("accel_z")?;
        trace!(x, y, z, "accelerometer sample");
        Ok(Some([x, y, z]))
    }
}

/// Pressure/temperature sensor exposed through IIO.
///
/// IIO reports pressure in kPa and temperature in m°C; this converts to hPa
/// and °C.
#[derive(Debug)]
pub struct IioBarometer {
    device: IioDevice,
}

impl IioBarometer {
    /// Wrap an IIO device.
    #[must_use]
    pub fn new(device: IioDevice) -> Self {
        Self { device }
    }

    fn channel(&self, channel: &str) -> Result<f64> {
        self.device
            .read_channel(channel)
            .map_err(|e| Error::sensor(Measurement::PressureTemp.name(), e.to_string()))
    }
}

impl Barometer for IioBarometer {
    fn init(&mut self) -> Result<()> {
        let name = self
            .device
            .name()
            .map_err(|e| Error::sensor(Measurement::PressureTemp.name(), e.to_string()))?;
        debug!("Barometer driver {name} at {}", self.device.dir().display());
        Ok(())
    }

    fn pressure(&mut self) -> Result<f64> {
        Ok(self.channel("pressure")? * 10.0)
    }

    fn temperature(&mut self) -> Result<f64> {
        Ok(self.channel("temp")? / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[test]
    fn test_iio_barometer_units() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "name", "dps310\n");
        write(dir.path(), "in_pressure_input", "101.325\n");
        write(dir.path(), "in_temp_input", "21500\n");

        let mut baro = IioBarometer::new(IioDevice::new(dir.path()));
        baro.init().unwrap();
        assert!((baro.pressure().unwrap() - 1013.25).abs() < 1e-9);
        assert!((baro.temperature().unwrap() - 21.5).abs() < 1e-9);
    }

    #[test]
    fn test_iio_accelerometer_reads_axes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "in_accel_x_raw", "0");
        write(dir.path(), "in_accel_y_raw", "10");
        write(dir.path(), "in_accel_z_raw", "1000");
        write(dir.path(), "in_accel_scale", "0.01");

        let mut accel = IioAccelerometer::new(IioDevice::new(dir.path()));
        let [x, y, z] = accel.acceleration().unwrap().unwrap();
        assert!(x.abs() < 1e-9);
        assert!((y - 0.1).abs() < 1e-9);
        assert!((z - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_iio_accelerometer_missing_device() {
        let mut accel = IioAccelerometer::new(IioDevice::new("/nonexistent/iio:device9"));
        let err = accel.acceleration().unwrap_err();
        assert!(err.to_string().contains("bno08x"));
        assert!(accel.enable().is_err());
    }
}
