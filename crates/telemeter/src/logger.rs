//! Leveled logger with console, serial and file sinks.
//!
//! Every record is rendered as `[LEVEL] - [timestamp_ms]: text` and written
//! to the console and, when configured, the serial port. Info and Warn
//! records are also appended to the run log and Error records to the error
//! log, once storage is attached. Debug records never reach a file.
//!
//! Logging never fails: sink errors are swallowed, and file errors are
//! reported on the console only.

use std::cell::RefCell;
use std::fmt;
use std::io::{self, Write};
use std::rc::Rc;

use crate::clock::Clock;
use crate::error::{Error, ErrorKind};
use crate::storage::{AppendTarget, StorageHandle};

/// Severity of a log record. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Console and serial only.
    Debug,
    /// Routine events, persisted to the run log.
    Info,
    /// Recoverable problems, persisted to the run log.
    Warn,
    /// Failures, persisted to the error log.
    Error,
}

impl Level {
    /// Upper-case name as rendered in log lines.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single log event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Severity.
    pub level: Level,
    /// Message text.
    pub text: String,
    /// Milliseconds since runtime start.
    pub timestamp_ms: u64,
}

impl LogRecord {
    /// Create a record.
    #[must_use]
    pub fn new(level: Level, text: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            level,
            text: text.into(),
            timestamp_ms,
        }
    }

    /// Render as a log line, without terminator.
    #[must_use]
    pub fn render(&self) -> String {
        format!("[{}] - [{}]: {}", self.level, self.timestamp_ms, self.text)
    }
}

/// The process-wide logger.
///
/// Constructed once at startup and passed by reference. Single-threaded:
/// sinks sit behind `RefCell`s.
pub struct Logger {
    clock: Rc<dyn Clock>,
    console: RefCell<Box<dyn Write>>,
    serial: RefCell<Option<Box<dyn Write>>>,
    storage: RefCell<Option<StorageHandle>>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("clock", &self.clock)
            .field("serial", &self.serial.borrow().is_some())
            .field("storage", &*self.storage.borrow())
            .finish_non_exhaustive()
    }
}

impl Logger {
    /// A logger writing to `console`.
    #[must_use]
    pub fn new(clock: Rc<dyn Clock>, console: Box<dyn Write>) -> Self {
        Self {
            clock,
            console: RefCell::new(console),
            serial: RefCell::new(None),
            storage: RefCell::new(None),
        }
    }

    /// A logger writing to standard output.
    #[must_use]
    pub fn stdout(clock: Rc<dyn Clock>) -> Self {
        Self::new(clock, Box::new(io::stdout()))
    }

    /// Mirror every line to a serial port, CRLF-terminated.
    #[must_use]
    pub fn with_serial(self, serial: Box<dyn Write>) -> Self {
        *self.serial.borrow_mut() = Some(serial);
        self
    }

    /// Start persisting records to the run and error logs on `storage`.
    pub fn attach(&self, storage: StorageHandle) {
        *self.storage.borrow_mut() = Some(storage);
    }

    /// Whether file sinks are attached.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.storage.borrow().is_some()
    }

    /// Log `text` at `level`.
    pub fn log(&self, level: Level, text: impl AsRef<str>) {
        let record = LogRecord::new(level, text.as_ref(), self.clock.now_ms());
        let line = record.render();

        self.console(&line);
        if let Some(serial) = self.serial.borrow_mut().as_mut() {
            let _ = write!(serial, "{line}\r\n");
            let _ = serial.flush();
        }

        let Some(target) = AppendTarget::for_level(level) else {
            return;
        };
        let storage = self.storage.borrow();
        let Some(storage) = storage.as_ref() else {
            return;
        };
        if let Err(err) = storage.append(target, &line) {
            let path = storage.layout().path(target);
            if err.is_not_found() {
                self.console(&format!(
                    "Could not open file {}: File not found.",
                    path.display()
                ));
            } else {
                self.console(&format!("Could not write to {}: {err}", path.display()));
            }
        }
    }

    /// Log at Debug.
    pub fn debug(&self, text: impl AsRef<str>) {
        self.log(Level::Debug, text);
    }

    /// Log at Info.
    pub fn info(&self, text: impl AsRef<str>) {
        self.log(Level::Info, text);
    }

    /// Log at Warn.
    pub fn warn(&self, text: impl AsRef<str>) {
        self.log(Level::Warn, text);
    }

    /// Log at Error.
    pub fn error(&self, text: impl AsRef<str>) {
        self.log(Level::Error, text);
    }

    /// Log a failure with its classification.
    ///
    /// Protocol errors are a client's problem and go out at Warn; everything
    /// else is an Error.
    pub fn report(&self, context: &str, err: &Error) {
        let kind = err.kind();
        let level = match kind {
            ErrorKind::Protocol => Level::Warn,
            ErrorKind::TransientIo | ErrorKind::ResourceAbsent | ErrorKind::FatalInit => {
                Level::Error
            }
        };
        self.log(level, format!("{context}: {err} ({kind})"));
    }

    /// Write an unformatted line to the console only.
    pub fn console(&self, line: &str) {
        let mut console = self.console.borrow_mut();
        let _ = writeln!(console, "{line}");
        let _ = console.flush();
    }
}
