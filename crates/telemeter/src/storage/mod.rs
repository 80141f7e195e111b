//! Storage layer for telemeter.
//!
//! This module owns the removable card: waiting for it at startup, checking
//! its presence every tick, appending records to the three well-known files,
//! and deleting or listing files for the HTTP surface.
//!
//! Every write goes through a [`StorageHandle`], which refuses to touch the
//! filesystem while the card-presence signal is deasserted.

pub mod listing;

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, trace};

use crate::board::InputPin;
use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::logger::{Level, Logger};

pub use listing::{dump_tree, human_size, list_dir, DirEntry};

/// Record terminator for every append-only file.
pub const LINE_TERMINATOR: &str = "\r\n";

/// The three well-known append-only files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppendTarget {
    /// Sensor lines.
    Data,
    /// Info and Warn records.
    RunLog,
    /// Error records.
    ErrorLog,
}

impl AppendTarget {
    /// Order in which a bulk deletion removes the files.
    pub const DELETION_ORDER: [AppendTarget; 3] = [Self::RunLog, Self::ErrorLog, Self::Data];

    /// Which log file a record of `level` belongs in, if any.
    #[must_use]
    pub fn for_level(level: Level) -> Option<Self> {
        match level {
            Level::Debug => None,
            Level::Info | Level::Warn => Some(Self::RunLog),
            Level::Error => Some(Self::ErrorLog),
        }
    }
}

impl std::fmt::Display for AppendTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Data => write!(f, "data log"),
            Self::RunLog => write!(f, "run log"),
            Self::ErrorLog => write!(f, "error log"),
        }
    }
}

/// Where the well-known files live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
    data_file: String,
    run_log: String,
    error_log: String,
}

impl StorageLayout {
    /// A layout with explicit file names.
    #[must_use]
    pub fn new(
        root: impl Into<PathBuf>,
        data_file: impl Into<String>,
        run_log: impl Into<String>,
        error_log: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            data_file: data_file.into(),
            run_log: run_log.into(),
            error_log: error_log.into(),
        }
    }

    /// The layout described by the configuration.
    #[must_use]
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(
            &config.root,
            &config.data_file,
            &config.run_log,
            &config.error_log,
        )
    }

    /// The mount point.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File name of a target.
    #[must_use]
    pub fn file_name(&self, target: AppendTarget) -> &str {
        match target {
            AppendTarget::Data => &self.data_file,
            AppendTarget::RunLog => &self.run_log,
            AppendTarget::ErrorLog => &self.error_log,
        }
    }

    /// Full path of a target.
    #[must_use]
    pub fn path(&self, target: AppendTarget) -> PathBuf {
        self.root.join(self.file_name(target))
    }
}

/// Check that `name` is a plain file name directly under the root.
///
/// # Errors
///
/// Returns [`Error::InvalidFileName`] for empty names, path separators,
/// leading dots (which covers `.` and `..`) and anything outside
/// `[A-Za-z0-9._-]`.
pub fn validate_file_name(name: &str) -> Result<&str> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_-][A-Za-z0-9._-]{0,254}$").expect("file name pattern is valid")
    });
    if pattern.is_match(name) {
        Ok(name)
    } else {
        Err(Error::InvalidFileName {
            name: name.to_string(),
        })
    }
}

#[derive(Debug)]
struct Volume {
    layout: StorageLayout,
    presence: Rc<dyn InputPin>,
}

/// The mounted card. Cheap to clone; every clone refers to the same mount.
#[derive(Debug, Clone)]
pub struct StorageHandle {
    volume: Rc<Volume>,
}

impl StorageHandle {
    /// File locations on this volume.
    #[must_use]
    pub fn layout(&self) -> &StorageLayout {
        &self.volume.layout
    }

    /// Whether the card is currently inserted. An unreadable signal counts as
    /// absent.
    #[must_use]
    pub fn is_present(&self) -> bool {
        match self.volume.presence.is_high() {
            Ok(present) => present,
            Err(err) => {
                trace!("Presence read failed: {err}");
                false
            }
        }
    }

    fn ensure_present(&self) -> Result<()> {
        if self.is_present() {
            Ok(())
        } else {
            Err(Error::StorageAbsent)
        }
    }

    /// Append `line` plus CRLF to a target, creating the file if needed.
    ///
    /// The file is opened and closed on every call so an abrupt power loss
    /// loses at most the line being written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageAbsent`] without touching the filesystem when
    /// the card is out, or a file error if the write fails.
    pub fn append(&self, target: AppendTarget, line: &str) -> Result<()> {
        self.ensure_present()?;
        let path = self.layout().path(target);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| Error::file("append to", &path, source))?;
        file.write_all(format!("{line}{LINE_TERMINATOR}").as_bytes())
            .map_err(|source| Error::file("append to", &path, source))
    }

    /// Resolve a client-supplied name to a path under the root.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not a plain file name.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        Ok(self.layout().root().join(validate_file_name(name)?))
    }

    /// Remove a file under the root.
    ///
    /// # Errors
    ///
    /// Returns an error if the card is out, the name is invalid, or the
    /// removal fails (including when the file does not exist).
    pub fn remove(&self, name: &str) -> Result<PathBuf> {
        let path = self.resolve(name)?;
        self.ensure_present()?;
        fs::remove_file(&path).map_err(|source| Error::file("remove", &path, source))?;
        Ok(path)
    }

    /// Open a file under the root for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the card is out, the name is invalid, or the file
    /// cannot be opened.
    pub fn open(&self, name: &str) -> Result<(PathBuf, File)> {
        let path = self.resolve(name)?;
        self.ensure_present()?;
        let file = File::open(&path).map_err(|source| Error::file("open", &path, source))?;
        Ok((path, file))
    }

    /// List a directory relative to the root.
    ///
    /// # Errors
    ///
    /// Returns an error if the card is out or the directory is unreadable.
    pub fn list(&self, relative: impl AsRef<Path>) -> Result<Vec<DirEntry>> {
        self.ensure_present()?;
        list_dir(&self.layout().root().join(relative))
    }
}

/// Outcome of a bulk deletion, per file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionReport {
    /// Files that were removed.
    pub removed: Vec<AppendTarget>,
    /// Files that did not exist.
    pub missing: Vec<AppendTarget>,
    /// Files that could not be removed.
    pub failed: Vec<AppendTarget>,
}

impl DeletionReport {
    /// Whether no file failed to delete.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Mount lifecycle and file operations for the removable card.
#[derive(Debug)]
pub struct StorageManager {
    layout: StorageLayout,
    presence: Rc<dyn InputPin>,
    poll_interval: Duration,
    handle: Option<StorageHandle>,
}

impl StorageManager {
    /// A manager for `layout`, watching `presence`.
    #[must_use]
    pub fn new(layout: StorageLayout, presence: Rc<dyn InputPin>, poll_interval: Duration) -> Self {
        Self {
            layout,
            presence,
            poll_interval,
            handle: None,
        }
    }

    /// A manager built from the storage configuration.
    #[must_use]
    pub fn from_config(config: &StorageConfig, presence: Rc<dyn InputPin>) -> Self {
        Self::new(
            StorageLayout::from_config(config),
            presence,
            config.mount_poll_interval(),
        )
    }

    /// File locations.
    #[must_use]
    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    fn presence_asserted(&self) -> bool {
        self.presence.is_high().unwrap_or(false)
    }

    /// Wait for the card, then mount it.
    ///
    /// Blocks for as long as the card is missing; there is nothing useful to
    /// do without durable storage. Mounting twice returns the existing handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount point cannot be prepared.
    pub fn mount(&mut self, logger: &Logger) -> Result<StorageHandle> {
        if let Some(handle) = &self.handle {
            return Ok(handle.clone());
        }

        logger.info("Initializing storage card ...");
        if !self.presence_asserted() {
            logger.info("Make sure to insert a storage card! Trying again ...");
            while !self.presence_asserted() {
                thread::sleep(self.poll_interval);
            }
        }
        logger.info("Card is connected. Mounting ...");

        let root = self.layout.root();
        fs::create_dir_all(root).map_err(|source| Error::file("mount", root, source))?;
        if !root.is_dir() {
            return Err(Error::file(
                "mount",
                root,
                std::io::Error::new(std::io::ErrorKind::Other, "not a directory"),
            ));
        }
        debug!("Mounted storage at {}", root.display());
        logger.info(format!("Mounted storage at {}", root.display()));

        let handle = StorageHandle {
            volume: Rc::new(Volume {
                layout: self.layout.clone(),
                presence: Rc::clone(&self.presence),
            }),
        };
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    /// Whether [`mount`](Self::mount) has completed.
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.handle.is_some()
    }

    /// The mounted volume.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotMounted`] before the first successful mount.
    pub fn handle(&self) -> Result<&StorageHandle> {
        self.handle.as_ref().ok_or(Error::NotMounted)
    }

    /// Non-blocking read of the presence signal.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.presence_asserted()
    }

    /// Append a line to a target.
    ///
    /// # Errors
    ///
    /// Returns an error if storage is not mounted, absent, or the write fails.
    pub fn append(&self, target: AppendTarget, line: &str) -> Result<()> {
        self.handle()?.append(target, line)
    }

    /// Delete the three well-known files, logging each outcome.
    ///
    /// A missing file is reported as a warning, not a failure, so repeated
    /// deletions are harmless.
    pub fn delete_all(&self, logger: &Logger) -> DeletionReport {
        logger.info("Deletion requested. Deleting all files.");
        let mut report = DeletionReport::default();

        for target in AppendTarget::DELETION_ORDER {
            let path = self.layout.path(target);
            logger.debug(format!("Removing file {}.", path.display()));

            let result = self
                .handle()
                .and_then(|handle| handle.remove(self.layout.file_name(target)));
            match result {
                Ok(_) => {
                    report.removed.push(target);
                    logger.info(format!("File {} removed.", path.display()));
                }
                Err(err) if err.is_not_found() => {
                    report.missing.push(target);
                    logger.warn(format!("File {} does not exist.", path.display()));
                }
                Err(err) => {
                    report.failed.push(target);
                    logger.report(&format!("Could not remove {}", path.display()), &err);
                }
            }
        }

        logger.info("File deletion completed.");
        report
    }

    /// Delete one file under the root.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid, storage is unavailable, or
    /// the file cannot be removed.
    pub fn delete_file(&self, name: &str) -> Result<PathBuf> {
        self.handle()?.remove(name)
    }

    /// Open one file under the root for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid, storage is unavailable, or
    /// the file cannot be opened.
    pub fn open_file(&self, name: &str) -> Result<(PathBuf, File)> {
        self.handle()?.open(name)
    }

    /// List a directory relative to the root.
    ///
    /// # Errors
    ///
    /// Returns an error if storage is unavailable or the directory is
    /// unreadable.
    pub fn list(&self, relative: impl AsRef<Path>) -> Result<Vec<DirEntry>> {
        self.handle()?.list(relative)
    }

    /// Human-readable recursive listing of the whole card.
    ///
    /// # Errors
    ///
    /// Returns an error if storage is unavailable or a directory is
    /// unreadable.
    pub fn dump_tree(&self) -> Result<Vec<String>> {
        self.handle()?.ensure_present()?;
        dump_tree(self.layout.root())
    }
}
