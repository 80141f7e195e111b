//! Shared fakes for unit tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io::{self, Write};
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use crate::board::sim::SimulatedPin;
use crate::board::InputPin;
use crate::clock::{Clock, ManualClock};
use crate::error::{Error, Result};
use crate::logger::Logger;
use crate::sensor::{Accelerometer, Barometer};
use crate::storage::{StorageLayout, StorageManager};

/// An in-memory sink. Clones share the buffer.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    bytes: Rc<RefCell<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.borrow()).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }

    pub fn lines_with(&self, pattern: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|line| line.contains(pattern))
            .collect()
    }

    pub fn clear(&self) {
        self.bytes.borrow_mut().clear();
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A logger whose console is captured, with the clock frozen at zero.
pub fn console_logger() -> (Logger, SharedBuffer) {
    let console = SharedBuffer::default();
    let clock: Rc<dyn Clock> = Rc::new(ManualClock::default());
    (Logger::new(clock, Box::new(console.clone())), console)
}

/// Storage rooted at `dir`, mounted, not yet attached to the logger.
pub fn mounted_storage_detached(dir: &Path, logger: &Logger) -> (StorageManager, SimulatedPin) {
    let pin = SimulatedPin::new("card detect", true);
    let mut storage = StorageManager::new(
        StorageLayout::new(dir, "data.txt", "run.log", "error.log"),
        Rc::new(pin.clone()),
        Duration::ZERO,
    );
    storage.mount(logger).unwrap();
    (storage, pin)
}

/// Storage rooted at `dir`, mounted and attached to the logger.
pub fn mounted_storage(dir: &Path, logger: &Logger) -> (StorageManager, SimulatedPin) {
    let (storage, pin) = mounted_storage_detached(dir, logger);
    logger.attach(storage.handle().unwrap().clone());
    (storage, pin)
}

/// A pin that replays a sequence of levels, then holds the last one.
#[derive(Debug, Clone)]
pub struct SequencePin {
    levels: Rc<RefCell<VecDeque<bool>>>,
    reads: Rc<Cell<usize>>,
}

impl SequencePin {
    pub fn new(levels: impl IntoIterator<Item = bool>) -> Self {
        Self {
            levels: Rc::new(RefCell::new(levels.into_iter().collect())),
            reads: Rc::new(Cell::new(0)),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.get()
    }
}

impl InputPin for SequencePin {
    fn name(&self) -> &str {
        "sequence"
    }

    fn is_high(&self) -> Result<bool> {
        self.reads.set(self.reads.get() + 1);
        let mut levels = self.levels.borrow_mut();
        let level = if levels.len() > 1 {
            levels.pop_front()
        } else {
            levels.front().copied()
        };
        Ok(level.unwrap_or(false))
    }
}

#[derive(Debug, Default)]
struct AccelScript {
    fail_next: Cell<bool>,
    no_data_next: Cell<bool>,
    fail_enable: Cell<bool>,
    panic_next: Cell<bool>,
    reads: Cell<usize>,
}

/// An accelerometer returning a fixed vector, with one-shot faults.
/// Clones share the script, so a test can keep a handle after boxing.
#[derive(Debug, Clone)]
pub struct ScriptedAccelerometer {
    value: [f64; 3],
    script: Rc<AccelScript>,
}

impl ScriptedAccelerometer {
    pub fn steady(value: [f64; 3]) -> Self {
        Self {
            value,
            script: Rc::default(),
        }
    }

    pub fn fail_next(&self) {
        self.script.fail_next.set(true);
    }

    pub fn no_data_next(&self) {
        self.script.no_data_next.set(true);
    }

    pub fn fail_enable(&self) {
        self.script.fail_enable.set(true);
    }

    pub fn panic_next(&self) {
        self.script.panic_next.set(true);
    }

    pub fn reads(&self) -> usize {
        self.script.reads.get()
    }
}

impl Accelerometer for ScriptedAccelerometer {
    fn enable(&mut self) -> Result<()> {
        if self.script.fail_enable.get() {
            return Err(Error::sensor("bno08x", "report enable rejected"));
        }
        Ok(())
    }

    fn acceleration(&mut self) -> Result<Option<[f64; 3]>> {
        self.script.reads.set(self.script.reads.get() + 1);
        if self.script.panic_next.replace(false) {
            panic!("scripted accelerometer panic");
        }
        if self.script.fail_next.replace(false) {
            return Err(Error::sensor("bno08x", "i2c nack"));
        }
        if self.script.no_data_next.replace(false) {
            return Ok(None);
        }
        Ok(Some(self.value))
    }
}

#[derive(Debug, Default)]
struct BaroScript {
    fail_pressure_next: Cell<bool>,
    fail_temperature_next: Cell<bool>,
    reads: Cell<usize>,
}

/// A barometer returning fixed values, with one-shot per-field faults.
#[derive(Debug, Clone)]
pub struct ScriptedBarometer {
    pressure: f64,
    temperature: f64,
    script: Rc<BaroScript>,
}

impl ScriptedBarometer {
    pub fn steady(pressure: f64, temperature: f64) -> Self {
        Self {
            pressure,
            temperature,
            script: Rc::default(),
        }
    }

    pub fn fail_pressure_next(&self) {
        self.script.fail_pressure_next.set(true);
    }

    pub fn fail_temperature_next(&self) {
        self.script.fail_temperature_next.set(true);
    }

    pub fn reads(&self) -> usize {
        self.script.reads.get()
    }
}

impl Barometer for ScriptedBarometer {
    fn pressure(&mut self) -> Result<f64> {
        self.script.reads.set(self.script.reads.get() + 1);
        if self.script.fail_pressure_next.replace(false) {
            return Err(Error::sensor("dps310", "pressure not ready"));
        }
        Ok(self.pressure)
    }

    fn temperature(&mut self) -> Result<f64> {
        if self.script.fail_temperature_next.replace(false) {
            return Err(Error::sensor("dps310", "temperature not ready"));
        }
        Ok(self.temperature)
    }
}
