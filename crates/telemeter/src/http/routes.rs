//! Path routing.

use crate::error::{Error, Result};
use crate::storage::validate_file_name;

/// Path prefix of the single-file delete route.
pub const DELETE_PREFIX: &str = "/delete";

/// Path of the bulk delete route.
pub const DELETE_ALL_PATH: &str = "/delete-all";

/// What a request path asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// The file index page.
    Index,
    /// Stream one file.
    Download(String),
    /// Delete one file.
    Delete(String),
    /// Delete the data file and both logs.
    DeleteAll,
}

/// Map a request path to a route.
///
/// `files_prefix` is the download prefix, e.g. `/sd`.
///
/// # Errors
///
/// Returns [`Error::RouteNotFound`] for unknown paths and
/// [`Error::InvalidFileName`] when a file route names anything other than a
/// plain file directly under the storage root.
pub fn resolve(path: &str, files_prefix: &str) -> Result<Route> {
    if path == "/" {
        return Ok(Route::Index);
    }
    if path == DELETE_ALL_PATH {
        return Ok(Route::DeleteAll);
    }
    if let Some(name) = file_segment(path, DELETE_PREFIX) {
        return Ok(Route::Delete(validate_file_name(name)?.to_string()));
    }
    if let Some(name) = file_segment(path, files_prefix) {
        return Ok(Route::Download(validate_file_name(name)?.to_string()));
    }
    Err(Error::RouteNotFound {
        path: path.to_string(),
    })
}

/// Everything after `<prefix>/`, if `path` starts with it.
fn file_segment<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    path.strip_prefix(prefix)?.strip_prefix('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_routes() {
        assert_eq!(resolve("/", "/sd").unwrap(), Route::Index);
        assert_eq!(
            resolve("/sd/data.txt", "/sd").unwrap(),
            Route::Download("data.txt".into())
        );
        assert_eq!(
            resolve("/delete/run.log", "/sd").unwrap(),
            Route::Delete("run.log".into())
        );
        assert_eq!(resolve("/delete-all", "/sd").unwrap(), Route::DeleteAll);
    }

    #[test]
    fn test_resolve_custom_prefix() {
        assert_eq!(
            resolve("/files/data.txt", "/files").unwrap(),
            Route::Download("data.txt".into())
        );
        assert!(matches!(
            resolve("/sd/data.txt", "/files"),
            Err(Error::RouteNotFound { .. })
        ));
    }

    #[test]
    fn test_unknown_paths() {
        for path in ["/favicon.ico", "/sd", "/delete", "/delete-all/x", "/sdcard/data.txt", "//"] {
            assert!(
                matches!(resolve(path, "/sd"), Err(Error::RouteNotFound { .. })),
                "{path} resolved"
            );
        }
    }

    #[test]
    fn test_traversal_rejected() {
        for path in ["/sd/../etc/passwd", "/sd/a/b", "/delete/..", "/delete/", "/sd/.hidden"] {
            assert!(
                matches!(resolve(path, "/sd"), Err(Error::InvalidFileName { .. })),
                "{path} accepted"
            );
        }
    }
}
