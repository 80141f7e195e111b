//! `telemeter` - An unattended embedded telemetry logger
//!
//! This library samples sensors on a cooperative single-threaded loop,
//! appends line-protocol records to a removable storage card, keeps leveled
//! run and error logs, and serves the stored files over a minimal HTTP
//! interface. Any single failure is logged and contained to one tick.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod board;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod logger;
pub mod logging;
pub mod protocol;
pub mod runtime;
pub mod sensor;
pub mod storage;

#[cfg(test)]
mod testing;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use logger::{Level, LogRecord, Logger};
pub use logging::init_logging;
pub use runtime::{halt, Runtime, State, TickOutcome, TickReport};
pub use sensor::{Fields, Measurement, Sensor, SensorReading};
pub use storage::{AppendTarget, StorageHandle, StorageManager};
