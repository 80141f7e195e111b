//! Request-head parsing.
//!
//! Only the request line and headers are read; the server has no routes
//! that take a body.

use std::io::{ErrorKind, Read};

use tracing::trace;

use crate::error::{Error, Result};

/// A parsed request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Method, as sent.
    pub method: String,
    /// Path with any query string removed.
    pub path: String,
    /// Protocol version, e.g. `HTTP/1.1`.
    pub version: String,
    /// Headers in the order received.
    pub headers: Vec<(String, String)>,
}

/// Read a request head from `reader`, up to `max_bytes`.
///
/// # Errors
///
/// Returns [`Error::BadRequest`] if the head is empty, too large, truncated
/// or malformed, and [`Error::Io`] if the stream fails.
pub fn read_request<R: Read + ?Sized>(reader: &mut R, max_bytes: usize) -> Result<Request> {
    let head = read_head(reader, max_bytes)?;
    parse_head(&head)
}

fn read_head<R: Read + ?Sized>(reader: &mut R, max_bytes: usize) -> Result<String> {
    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 256];

    loop {
        let n = match reader.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        };
        if n == 0 {
            if buf.is_empty() {
                return Err(Error::bad_request("empty request"));
            }
            return Err(Error::bad_request("connection closed before end of headers"));
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = find_head_end(&buf) {
            if end > max_bytes {
                return Err(too_large(max_bytes));
            }
            buf.truncate(end);
            break;
        }
        if buf.len() > max_bytes {
            return Err(too_large(max_bytes));
        }
    }

    trace!("Read {} byte request head", buf.len());
    String::from_utf8(buf).map_err(|_| Error::bad_request("request head is not UTF-8"))
}

fn too_large(max_bytes: usize) -> Error {
    Error::bad_request(format!("request head exceeds {max_bytes} bytes"))
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_head(head: &str) -> Result<Request> {
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();

    let mut parts = request_line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Error::bad_request(format!(
            "invalid request line {request_line:?}"
        )));
    };

    if method.is_empty() || !method.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(Error::bad_request(format!("invalid method {method:?}")));
    }
    if !target.starts_with('/') {
        return Err(Error::bad_request(format!("invalid target {target:?}")));
    }
    if !version.starts_with("HTTP/1.") {
        return Err(Error::bad_request(format!("unsupported version {version:?}")));
    }

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| Error::bad_request(format!("invalid header {line:?}")))?;
        if name.is_empty() || name.contains(' ') {
            return Err(Error::bad_request(format!("invalid header name {name:?}")));
        }
        headers.push((name.to_string(), value.trim().to_string()));
    }

    let path = target.split_once('?').map_or(target, |(path, _)| path);

    Ok(Request {
        method: method.to_string(),
        path: path.to_string(),
        version: version.to_string(),
        headers,
    })
}
