//! Status codes and response framing.

use std::fmt;
use std::io::Write;

use crate::error::Error;

/// The status codes the server answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// 200
    Ok,
    /// 400
    BadRequest,
    /// 404
    NotFound,
    /// 405
    MethodNotAllowed,
    /// 408
    RequestTimeout,
    /// 500
    InternalServerError,
}

impl Status {
    /// Numeric code.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::MethodNotAllowed => 405,
            Self::RequestTimeout => 408,
            Self::InternalServerError => 500,
        }
    }

    /// Reason phrase.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::BadRequest => "Bad Request",
            Self::NotFound => "Not Found",
            Self::MethodNotAllowed => "Method Not Allowed",
            Self::RequestTimeout => "Request Timeout",
            Self::InternalServerError => "Internal Server Error",
        }
    }

    /// The status a failed request is answered with.
    #[must_use]
    pub fn for_error(err: &Error) -> Self {
        match err {
            Error::BadRequest(_) | Error::InvalidFileName { .. } => Self::BadRequest,
            Error::RouteNotFound { .. } => Self::NotFound,
            Error::MethodNotAllowed { .. } => Self::MethodNotAllowed,
            Error::RequestTimeout { .. } => Self::RequestTimeout,
            _ => Self::InternalServerError,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}

/// Content type of plain-text bodies.
pub const TEXT_PLAIN: &str = "text/plain";
/// Content type of the index page.
pub const TEXT_HTML: &str = "text/html; charset=utf-8";
/// Content type of downloads.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Write a status line and headers. Every response closes the connection.
///
/// # Errors
///
/// Returns an error if the client stream fails.
pub fn write_head<W: Write + ?Sized>(
    out: &mut W,
    status: Status,
    content_type: &str,
    extra: &[(&str, String)],
) -> std::io::Result<()> {
    let mut head = format!("HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\n");
    for (name, value) in extra {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("Connection: close\r\n\r\n");
    out.write_all(head.as_bytes())
}

/// Write a complete response with a body.
///
/// # Errors
///
/// Returns an error if the client stream fails.
pub fn write_body<W: Write + ?Sized>(
    out: &mut W,
    status: Status,
    content_type: &str,
    body: &str,
) -> std::io::Result<()> {
    write_head(
        out,
        status,
        content_type,
        &[("Content-Length", body.len().to_string())],
    )?;
    out.write_all(body.as_bytes())?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line() {
        assert_eq!(Status::Ok.to_string(), "200 OK");
        assert_eq!(
            Status::InternalServerError.to_string(),
            "500 Internal Server Error"
        );
    }

    #[test]
    fn test_status_for_error() {
        assert_eq!(Status::for_error(&Error::bad_request("x")), Status::BadRequest);
        assert_eq!(
            Status::for_error(&Error::InvalidFileName { name: "..".into() }),
            Status::BadRequest
        );
        assert_eq!(
            Status::for_error(&Error::RouteNotFound { path: "/x".into() }),
            Status::NotFound
        );
        assert_eq!(
            Status::for_error(&Error::MethodNotAllowed { method: "POST".into() }),
            Status::MethodNotAllowed
        );
        let timeout = Status::for_error(&Error::RequestTimeout { timeout_ms: 2000 });
        assert_eq!(timeout, Status::RequestTimeout);
        assert_eq!(timeout.to_string(), "408 Request Timeout");
        assert_eq!(
            Status::for_error(&Error::StorageAbsent),
            Status::InternalServerError
        );
    }

    #[test]
    fn test_write_body() {
        let mut out = Vec::new();
        write_body(&mut out, Status::NotFound, TEXT_PLAIN, "nope").unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nContent-Length: 4\r\nConnection: close\r\n\r\nnope"
        );
    }

    #[test]
    fn test_write_head_extra_headers() {
        let mut out = Vec::new();
        write_head(
            &mut out,
            Status::Ok,
            OCTET_STREAM,
            &[("Content-Disposition", "attachment; filename=\"data.txt\"".into())],
        )
        .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Content-Disposition: attachment; filename=\"data.txt\"\r\n"));
        assert!(text.ends_with("Connection: close\r\n\r\n"));
    }
}
