//! Request handlers.
//!
//! [`serve`] answers exactly one request on a connected stream. Protocol
//! problems are answered with a 4xx and logged at Warn; storage failures
//! become a 500 naming the cause. A client that stalls before finishing its
//! request is answered with a 408. Only a failing client stream is returned
//! as an error.

use std::io::{ErrorKind, Read, Write};

use super::page::render_index;
use super::request::read_request;
use super::response::{write_body, write_head, Status, OCTET_STREAM, TEXT_HTML, TEXT_PLAIN};
use super::routes::{resolve, Route};
use super::HttpSettings;
use crate::error::{Error, Result};
use crate::logger::Logger;
use crate::storage::{AppendTarget, StorageManager};

/// Everything a handler needs besides the stream.
#[derive(Debug, Clone, Copy)]
pub struct HttpContext<'a> {
    /// Files are served from and deleted on this storage.
    pub storage: &'a StorageManager,
    /// Runtime logger.
    pub logger: &'a Logger,
    /// Listener settings.
    pub settings: &'a HttpSettings,
}

/// Read one request from `stream` and answer it.
///
/// # Errors
///
/// Returns an error if reading the request or writing the response fails at
/// the socket level.
pub fn serve<S: Read + Write + ?Sized>(
    stream: &mut S,
    peer: &str,
    ctx: &HttpContext<'_>,
) -> Result<Status> {
    let request = match read_request(stream, ctx.settings.max_request_bytes) {
        Ok(request) => request,
        Err(Error::Io(e)) if is_timeout(&e) => {
            let err = Error::RequestTimeout {
                timeout_ms: u64::try_from(ctx.settings.io_timeout.as_millis()).unwrap_or(u64::MAX),
            };
            return reject(stream, peer, ctx, &err);
        }
        Err(Error::Io(e)) => return Err(Error::Io(e)),
        Err(err) => return reject(stream, peer, ctx, &err),
    };
    ctx.logger
        .debug(format!("{peer} requested {} {}", request.method, request.path));

    if request.method != "GET" {
        let err = Error::MethodNotAllowed {
            method: request.method,
        };
        return reject(stream, peer, ctx, &err);
    }

    match resolve(&request.path, &ctx.settings.files_prefix) {
        Ok(Route::Index) => index(stream, peer, ctx),
        Ok(Route::Download(name)) => download(stream, &name, ctx),
        Ok(Route::Delete(name)) => delete(stream, &name, ctx),
        Ok(Route::DeleteAll) => delete_all(stream, ctx),
        Err(err) => reject(stream, peer, ctx, &err),
    }
}

/// Socket read timeouts surface as `WouldBlock` on Unix and `TimedOut`
/// on Windows.
fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

fn reject<S: Write + ?Sized>(
    stream: &mut S,
    peer: &str,
    ctx: &HttpContext<'_>,
    err: &Error,
) -> Result<Status> {
    let status = Status::for_error(err);
    ctx.logger.report(&format!("Rejected request from {peer}"), err);
    write_body(stream, status, TEXT_PLAIN, &format!("{status}: {err}"))?;
    Ok(status)
}

fn index<S: Write + ?Sized>(stream: &mut S, peer: &str, ctx: &HttpContext<'_>) -> Result<Status> {
    ctx.logger.debug(format!("Serving main page to {peer}"));
    match ctx.storage.list("") {
        Ok(entries) => {
            let page = render_index(&ctx.settings.files_prefix, &entries);
            write_body(stream, Status::Ok, TEXT_HTML, &page)?;
            Ok(Status::Ok)
        }
        Err(err) => {
            ctx.logger.report("Could not list files", &err);
            write_body(
                stream,
                Status::InternalServerError,
                TEXT_PLAIN,
                &format!("Error: {err}"),
            )?;
            Ok(Status::InternalServerError)
        }
    }
}

fn download<S: Write + ?Sized>(stream: &mut S, name: &str, ctx: &HttpContext<'_>) -> Result<Status> {
    ctx.logger.debug(format!("Requesting {name} for download"));

    let (path, mut file) = match ctx.storage.open_file(name) {
        Ok(opened) => opened,
        Err(err) => {
            ctx.logger.report(&format!("Could not serve {name}"), &err);
            write_body(
                stream,
                Status::InternalServerError,
                TEXT_PLAIN,
                &format!("Error: {err}"),
            )?;
            return Ok(Status::InternalServerError);
        }
    };

    write_head(
        stream,
        Status::Ok,
        OCTET_STREAM,
        &[("Content-Disposition", format!("attachment; filename=\"{name}\""))],
    )?;

    let mut chunk = vec![0u8; ctx.settings.chunk_size];
    let mut sent = 0usize;
    loop {
        match file.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                stream.write_all(&chunk[..n])?;
                sent += n;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                let err = Error::file("read", &path, e);
                ctx.logger
                    .report(&format!("Download of {name} aborted after {sent} bytes"), &err);
                write_body(
                    stream,
                    Status::InternalServerError,
                    TEXT_PLAIN,
                    &format!("Error: {err}"),
                )?;
                return Ok(Status::InternalServerError);
            }
        }
    }
    stream.flush()?;
    ctx.logger.debug(format!("Sent {sent} bytes of {name}"));
    Ok(Status::Ok)
}

fn delete<S: Write + ?Sized>(stream: &mut S, name: &str, ctx: &HttpContext<'_>) -> Result<Status> {
    match ctx.storage.delete_file(name) {
        Ok(path) => {
            ctx.logger.info(format!("File {} deleted.", path.display()));
            write_body(
                stream,
                Status::Ok,
                TEXT_PLAIN,
                &format!("File '{name}' deleted successfully."),
            )?;
            Ok(Status::Ok)
        }
        Err(err) => {
            ctx.logger.report(&format!("Could not delete {name}"), &err);
            write_body(
                stream,
                Status::InternalServerError,
                TEXT_PLAIN,
                &format!("Error deleting file '{name}': {err}"),
            )?;
            Ok(Status::InternalServerError)
        }
    }
}

fn delete_all<S: Write + ?Sized>(stream: &mut S, ctx: &HttpContext<'_>) -> Result<Status> {
    let report = ctx.storage.delete_all(ctx.logger);
    let names = |targets: &[AppendTarget]| {
        targets
            .iter()
            .map(|t| ctx.storage.layout().file_name(*t).to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };

    if report.is_success() {
        write_body(
            stream,
            Status::Ok,
            TEXT_PLAIN,
            &format!(
                "All files deleted. Removed: [{}]. Not found: [{}].",
                names(&report.removed),
                names(&report.missing)
            ),
        )?;
        Ok(Status::Ok)
    } else {
        write_body(
            stream,
            Status::InternalServerError,
            TEXT_PLAIN,
            &format!("Error deleting files: [{}]", names(&report.failed)),
        )?;
        Ok(Status::InternalServerError)
    }
}
