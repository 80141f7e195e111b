//! Linux-specific implementation for telemeter
//!
//! This crate provides the sysfs plumbing telemeter uses on Linux boards:
//! GPIO input values, IIO sensor channels and the list of devices bound on an
//! I2C bus. Everything is plain file I/O, so the functions also work against a
//! fake sysfs tree rooted anywhere on disk.

#![cfg(target_os = "linux")]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default sysfs mount point.
pub const SYSFS_ROOT: &str = "/sys";

/// Initialize Linux-specific components
///
/// Verifies that sysfs is mounted, since every peripheral goes through it.
///
/// # Errors
///
/// Returns an error if `/sys` is not available.
pub fn init() -> io::Result<()> {
    init_at(SYSFS_ROOT)
}

/// Like [`init`], against a sysfs tree mounted at `root`.
///
/// # Errors
///
/// Returns [`io::ErrorKind::NotFound`] if `root` has no `class` directory.
pub fn init_at(root: impl AsRef<Path>) -> io::Result<()> {
    let root = root.as_ref();
    if root.join("class").is_dir() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("sysfs is not mounted at {}", root.display()),
        ))
    }
}

/// Get platform name
#[must_use]
pub fn platform_name() -> &'static str {
    "Linux"
}

/// A GPIO line exported through the legacy sysfs interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gpio {
    number: u32,
    class_dir: PathBuf,
}

impl Gpio {
    /// A GPIO under the default `/sys/class/gpio`.
    #[must_use]
    pub fn new(number: u32) -> Self {
        Self::with_root(SYSFS_ROOT, number)
    }

    /// A GPIO under an alternative sysfs root.
    #[must_use]
    pub fn with_root(root: impl AsRef<Path>, number: u32) -> Self {
        Self {
            number,
            class_dir: root.as_ref().join("class").join("gpio"),
        }
    }

    /// The kernel GPIO number.
    #[must_use]
    pub fn number(&self) -> u32 {
        self.number
    }

    fn line_dir(&self) -> PathBuf {
        self.class_dir.join(format!("gpio{}", self.number))
    }

    /// Export the line (if needed) and configure it as an input.
    ///
    /// # Errors
    ///
    /// Returns an error if the export or direction files cannot be written.
    pub fn export_input(&self) -> io::Result<()> {
        if !self.line_dir().is_dir() {
            fs::write(self.class_dir.join("export"), self.number.to_string())?;
        }
        fs::write(self.line_dir().join("direction"), "in")
    }

    /// Read the current logic level.
    ///
    /// # Errors
    ///
    /// Returns an error if the value file is missing or holds something other
    /// than `0` or `1`.
    pub fn read(&self) -> io::Result<bool> {
        let raw = fs::read_to_string(self.line_dir().join("value"))?;
        match raw.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected gpio{} value {other:?}", self.number),
            )),
        }
    }
}

/// An industrial I/O device directory such as `/sys/bus/iio/devices/iio:device0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IioDevice {
    dir: PathBuf,
}

impl IioDevice {
    /// Wrap an IIO device directory.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The device directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The driver-reported device name.
    ///
    /// # Errors
    ///
    /// Returns an error if the `name` attribute cannot be read.
    pub fn name(&self) -> io::Result<String> {
        Ok(fs::read_to_string(self.dir.join("name"))?.trim().to_string())
    }

    /// Read a channel in the driver's processed unit.
    ///
    /// Uses `in_<channel>_input` when the driver provides it, otherwise
    /// `(in_<channel>_raw + offset) * scale`. Offset and scale are looked up
    /// per channel first and then per channel type (`in_accel_scale` for
    /// `accel_x`).
    ///
    /// # Errors
    ///
    /// Returns an error if neither a processed nor a raw value is readable,
    /// or if an attribute does not parse as a number.
    pub fn read_channel(&self, channel: &str) -> io::Result<f64> {
        let processed = self.dir.join(format!("in_{channel}_input"));
        if processed.is_file() {
            return read_number(&processed);
        }

        let raw = read_number(&self.dir.join(format!("in_{channel}_raw")))?;
        let offset = self.channel_attribute(channel, "offset")?.unwrap_or(0.0);
        let scale = self.channel_attribute(channel, "scale")?.unwrap_or(1.0);
        Ok((raw + offset) * scale)
    }

    fn channel_attribute(&self, channel: &str, attribute: &str) -> io::Result<Option<f64>> {
        let own = self.dir.join(format!("in_{channel}_{attribute}"));
        if own.is_file() {
            return read_number(&own).map(Some);
        }
        let Some((kind, _)) = channel.split_once('_') else {
            return Ok(None);
        };
        let shared = self.dir.join(format!("in_{kind}_{attribute}"));
        if shared.is_file() {
            read_number(&shared).map(Some)
        } else {
            Ok(None)
        }
    }
}

fn read_number(path: &Path) -> io::Result<f64> {
    let text = fs::read_to_string(path)?;
    text.trim().parse::<f64>().map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{}: {e}", path.display()),
        )
    })
}

/// Addresses of the devices the kernel has bound on an I2C bus.
///
/// # Errors
///
/// Returns an error if the sysfs device directory cannot be listed.
pub fn i2c_addresses(bus: u32) -> io::Result<Vec<u16>> {
    i2c_addresses_in(SYSFS_ROOT, bus)
}

/// Like [`i2c_addresses`], under an alternative sysfs root.
///
/// # Errors
///
/// Returns an error if the sysfs device directory cannot be listed.
pub fn i2c_addresses_in(root: impl AsRef<Path>, bus: u32) -> io::Result<Vec<u16>> {
    let prefix = format!("{bus}-");
    let mut addresses = Vec::new();
    for entry in fs::read_dir(root.as_ref().join("bus").join("i2c").join("devices"))? {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(hex) = name.strip_prefix(&prefix) {
            if let Ok(address) = u16::from_str_radix(hex, 16) {
                addresses.push(address);
            }
        }
    }
    addresses.sort_unstable();
    Ok(addresses)
}
