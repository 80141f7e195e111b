//! Minimal HTTP surface for retrieving and deleting stored files.
//!
//! The listener is non-blocking: [`HttpServer::poll`] accepts at most one
//! connection per call and returns immediately when none is waiting. An
//! accepted connection is switched to blocking mode, answered, and closed
//! before `poll` returns. Reading the request shares a single deadline of
//! one I/O timeout, however the client paces its bytes; each write is
//! bounded by the same timeout.

pub mod handlers;
mod page;
pub mod request;
pub mod response;
pub mod routes;

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::logger::Logger;
use crate::storage::StorageManager;

pub use handlers::{serve, HttpContext};
pub use response::Status;
pub use routes::Route;

/// Listener behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    /// Download route prefix, e.g. `/sd`.
    pub files_prefix: String,
    /// Download chunk size in bytes.
    pub chunk_size: usize,
    /// Deadline for the whole request head, and for each response write.
    pub io_timeout: Duration,
    /// Largest accepted request head.
    pub max_request_bytes: usize,
}

impl HttpSettings {
    /// Settings from the network configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            files_prefix: config.network.files_prefix.clone(),
            chunk_size: config.network.chunk_size,
            io_timeout: config.io_timeout(),
            max_request_bytes: config.network.max_request_bytes,
        }
    }
}

/// A single-threaded, one-request-per-poll HTTP server.
#[derive(Debug)]
pub struct HttpServer {
    listener: TcpListener,
    settings: HttpSettings,
}

impl HttpServer {
    /// Bind a non-blocking listener on `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Bind`] if the address is unavailable.
    pub fn bind(addr: SocketAddr, settings: HttpSettings) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|source| Error::Bind { addr, source })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| Error::Bind { addr, source })?;
        debug!("HTTP listener bound on {addr}");
        Ok(Self { listener, settings })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot report its address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Answer at most one pending request.
    ///
    /// Returns `Ok(None)` when no client is waiting.
    ///
    /// # Errors
    ///
    /// Returns an error if accepting fails or the client's socket fails
    /// mid-request. The connection is closed either way.
    pub fn poll(&self, storage: &StorageManager, logger: &Logger) -> Result<Option<Status>> {
        let (stream, peer) = match self.listener.accept() {
            Ok(accepted) => accepted,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };
        trace!("Accepted connection from {peer}");

        stream.set_nonblocking(false)?;
        stream.set_write_timeout(Some(self.settings.io_timeout))?;
        let _ = stream.set_nodelay(true);

        let ctx = HttpContext {
            storage,
            logger,
            settings: &self.settings,
        };
        let mut conn = DeadlineStream {
            stream: &stream,
            deadline: Instant::now() + self.settings.io_timeout,
        };
        let result = serve(&mut conn, &peer.to_string(), &ctx);
        let _ = stream.shutdown(Shutdown::Both);

        if let Ok(status) = &result {
            debug!("Answered {peer} with {status}");
        }
        result.map(Some)
    }
}

/// A client connection whose reads all count against one deadline.
struct DeadlineStream<'a> {
    stream: &'a TcpStream,
    deadline: Instant,
}

impl Read for DeadlineStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::new(ErrorKind::TimedOut, "request deadline passed"));
        }
        self.stream.set_read_timeout(Some(remaining))?;
        let mut stream = self.stream;
        stream.read(buf)
    }
}

impl Write for DeadlineStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut stream = self.stream;
        stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut stream = self.stream;
        stream.flush()
    }
}
