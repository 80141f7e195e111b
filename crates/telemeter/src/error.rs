//! Error types for telemeter.
//!
//! Every error carries enough context for a log line, and every variant maps
//! onto one [`ErrorKind`] so callers can decide whether to retry next tick,
//! skip the operation, answer a client, or stop starting up.

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of failures, used to route log levels and HTTP
/// status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A file or bus read/write failed. Retried implicitly on the next tick.
    TransientIo,
    /// Storage is not present or not mounted. The operation is skipped.
    ResourceAbsent,
    /// A client sent something we do not understand.
    Protocol,
    /// Startup cannot complete; continuing would defeat the purpose.
    FatalInit,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TransientIo => write!(f, "TransientIO"),
            Self::ResourceAbsent => write!(f, "ResourceAbsent"),
            Self::Protocol => write!(f, "ProtocolError"),
            Self::FatalInit => write!(f, "FatalInit"),
        }
    }
}

/// The main error type for telemeter operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// The card-presence signal is deasserted.
    #[error("storage card not present")]
    StorageAbsent,

    /// Storage has not been mounted yet.
    #[error("storage not mounted")]
    NotMounted,

    /// A file operation on the storage volume failed.
    #[error("{operation} {path} failed: {source}")]
    File {
        /// What was being done (`append to`, `remove`, ...).
        operation: &'static str,
        /// The file involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A file name supplied by a client is not a plain file name.
    #[error("invalid file name {name:?}")]
    InvalidFileName {
        /// The rejected name.
        name: String,
    },

    // === Peripheral Errors ===
    /// A sensor driver failed.
    #[error("sensor {sensor} failed: {message}")]
    Sensor {
        /// Measurement name of the sensor.
        sensor: &'static str,
        /// Description of what went wrong.
        message: String,
    },

    /// A digital input could not be read.
    #[error("input pin {pin} unreadable: {message}")]
    Pin {
        /// Name of the pin.
        pin: String,
        /// Description of what went wrong.
        message: String,
    },

    /// The sensor bus failed.
    #[error("bus error: {0}")]
    Bus(String),

    // === Network Errors ===
    /// The HTTP request could not be parsed.
    #[error("malformed request: {0}")]
    BadRequest(String),

    /// The client did not finish its request head in time.
    #[error("request head not received within {timeout_ms} ms")]
    RequestTimeout {
        /// The deadline that passed.
        timeout_ms: u64,
    },

    /// No route matches the requested path.
    #[error("no route for {path}")]
    RouteNotFound {
        /// The requested path.
        path: String,
    },

    /// The route exists but not for this method.
    #[error("method {method} not allowed")]
    MethodNotAllowed {
        /// The rejected method.
        method: String,
    },

    // === Startup Errors ===
    /// The HTTP listener could not bind.
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        /// Address we tried to bind.
        addr: SocketAddr,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The access point could not be started.
    #[error("failed to start access point: {0}")]
    AccessPoint(String),

    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// Socket or other I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for telemeter operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a file operation error.
    #[must_use]
    pub fn file(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::File {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Create a sensor error.
    #[must_use]
    pub fn sensor(sensor: &'static str, message: impl Into<String>) -> Self {
        Self::Sensor {
            sensor,
            message: message.into(),
        }
    }

    /// Create a pin error.
    #[must_use]
    pub fn pin(pin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Pin {
            pin: pin.into(),
            message: message.into(),
        }
    }

    /// Create a bad request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::StorageAbsent | Self::NotMounted => ErrorKind::ResourceAbsent,
            Self::File { .. }
            | Self::Sensor { .. }
            | Self::Pin { .. }
            | Self::Bus(_)
            | Self::Io(_) => ErrorKind::TransientIo,
            Self::InvalidFileName { .. }
            | Self::BadRequest(_)
            | Self::RequestTimeout { .. }
            | Self::RouteNotFound { .. }
            | Self::MethodNotAllowed { .. } => ErrorKind::Protocol,
            Self::Bind { .. }
            | Self::AccessPoint(_)
            | Self::ConfigLoad(_)
            | Self::ConfigValidation { .. } => ErrorKind::FatalInit,
        }
    }

    /// Check if this error means the storage card is unavailable.
    #[must_use]
    pub fn is_absent(&self) -> bool {
        self.kind() == ErrorKind::ResourceAbsent
    }

    /// Check if this error is a missing file.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::File { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }

    /// Check if this error must stop startup.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::FatalInit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_display() {
        assert_eq!(Error::StorageAbsent.to_string(), "storage card not present");

        let err = Error::sensor("dps310", "bus timeout");
        assert_eq!(err.to_string(), "sensor dps310 failed: bus timeout");
    }

    #[test]
    fn test_file_error_display_names_path() {
        let err = Error::file(
            "remove",
            "/sd/data.txt",
            io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/sd/data.txt"));
        assert!(msg.contains("No such file or directory"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_not_found_only_for_missing_files() {
        let err = Error::file(
            "append to",
            "/sd/run.log",
            io::Error::new(io::ErrorKind::PermissionDenied, "read-only"),
        );
        assert!(!err.is_not_found());
        assert!(!Error::StorageAbsent.is_not_found());
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(Error::StorageAbsent.kind(), ErrorKind::ResourceAbsent);
        assert_eq!(Error::NotMounted.kind(), ErrorKind::ResourceAbsent);
        assert_eq!(Error::Bus("nack".into()).kind(), ErrorKind::TransientIo);
        assert_eq!(Error::bad_request("empty").kind(), ErrorKind::Protocol);
        assert_eq!(
            Error::RouteNotFound {
                path: "/nope".into()
            }
            .kind(),
            ErrorKind::Protocol
        );
        assert_eq!(Error::RequestTimeout { timeout_ms: 300 }.kind(), ErrorKind::Protocol);
        assert_eq!(Error::AccessPoint("radio off".into()).kind(), ErrorKind::FatalInit);
    }

    #[test]
    fn test_is_absent_and_is_fatal() {
        assert!(Error::StorageAbsent.is_absent());
        assert!(!Error::StorageAbsent.is_fatal());

        let bind = Error::Bind {
            addr: "127.0.0.1:80".parse().unwrap(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(bind.is_fatal());
        assert!(bind.to_string().contains("127.0.0.1:80"));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::TransientIo.to_string(), "TransientIO");
        assert_eq!(ErrorKind::ResourceAbsent.to_string(), "ResourceAbsent");
        assert_eq!(ErrorKind::Protocol.to_string(), "ProtocolError");
        assert_eq!(ErrorKind::FatalInit.to_string(), "FatalInit");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("pipe closed"));
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::ConfigValidation {
            message: "chunk_size must be greater than 0".to_string(),
        };
        assert!(err.to_string().contains("chunk_size"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_pin_error_display() {
        let err = Error::pin("presence", "gpio15 unexported");
        let msg = err.to_string();
        assert!(msg.contains("presence"));
        assert!(msg.contains("gpio15"));
    }
}
