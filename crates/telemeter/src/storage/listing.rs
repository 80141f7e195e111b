//! Directory listings for the index page and the startup dump.

use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::trace;

use crate::error::{Error, Result};

/// Placeholder entry some FAT drivers report; never a real file.
const PHANTOM_ENTRY: &str = "?";

/// Width of the name column in the tree dump.
const NAME_WIDTH: usize = 40;

/// One entry of a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    /// File name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// List `dir`, sorted by name. Entries that cannot be stat'ed, such as
/// dangling links, are left out.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn list_dir(dir: &Path) -> Result<Vec<DirEntry>> {
    let read = fs::read_dir(dir).map_err(|source| Error::file("list", dir, source))?;
    let mut entries = Vec::new();
    for entry in read {
        let entry = entry.map_err(|source| Error::file("list", dir, source))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == PHANTOM_ENTRY {
            continue;
        }
        let path = entry.path();
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) => {
                trace!("Skipping {}: {e}", path.display());
                continue;
            }
        };
        entries.push(DirEntry {
            name,
            size: metadata.len(),
            is_dir: metadata.is_dir(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Recursive listing of `root`, one formatted line per entry.
///
/// Nested entries are indented three spaces per level and directories carry
/// a trailing `/`.
///
/// # Errors
///
/// Returns an error if any directory in the tree cannot be read.
pub fn dump_tree(root: &Path) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    dump_into(root, 0, &mut lines)?;
    Ok(lines)
}

fn dump_into(dir: &Path, depth: usize, lines: &mut Vec<String>) -> Result<()> {
    for entry in list_dir(dir)? {
        let mut label = format!("{}{}", "   ".repeat(depth), entry.name);
        if entry.is_dir {
            label.push('/');
        }
        lines.push(format!(
            "{label:<width$} Size: {:>10}",
            human_size(entry.size),
            width = NAME_WIDTH
        ));
        if entry.is_dir {
            dump_into(&dir.join(&entry.name), depth + 1, lines)?;
        }
    }
    Ok(())
}

/// Format a byte count: `N by` below 1000, then KB and MB in decimal units
/// with up to two decimals.
#[must_use]
pub fn human_size(bytes: u64) -> String {
    #[allow(clippy::cast_precision_loss)]
    let value = bytes as f64;
    if bytes < 1_000 {
        format!("{bytes} by")
    } else if bytes < 1_000_000 {
        format!("{} KB", short_decimal(value / 1_000.0))
    } else {
        format!("{} MB", short_decimal(value / 1_000_000.0))
    }
}

/// Two decimals, trailing zeros dropped, but always at least one decimal.
fn short_decimal(value: f64) -> String {
    let mut text = format!("{value:.2}");
    while text.ends_with('0') && !text.ends_with(".0") {
        text.pop();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(0), "0 by");
        assert_eq!(human_size(999), "999 by");
        assert_eq!(human_size(1_000), "1.0 KB");
        assert_eq!(human_size(1_500), "1.5 KB");
        assert_eq!(human_size(12_346), "12.35 KB");
        assert_eq!(human_size(2_000_000), "2.0 MB");
        assert_eq!(human_size(3_210_000), "3.21 MB");
    }

    #[test]
    fn test_list_dir_sorted_with_sizes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("run.log"), "abc").unwrap();
        fs::write(dir.path().join("data.txt"), "abcdef").unwrap();
        fs::create_dir(dir.path().join("archive")).unwrap();

        let entries = list_dir(dir.path()).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["archive", "data.txt", "run.log"]);
        assert!(entries[0].is_dir);
        assert_eq!(entries[1].size, 6);
    }

    #[test]
    fn test_list_dir_skips_phantom_entry() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("?"), "").unwrap();
        fs::write(dir.path().join("data.txt"), "").unwrap();

        let entries = list_dir(dir.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "data.txt");
    }

    #[test]
    fn test_list_missing_dir() {
        let err = list_dir(Path::new("/nonexistent/telemeter")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_dump_tree_indents_nested_entries() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("old")).unwrap();
        fs::write(dir.path().join("old").join("data.txt"), vec![b'x'; 1_500]).unwrap();

        let lines = dump_tree(dir.path()).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("old/ "));
        assert!(lines[1].starts_with("   data.txt "));
        assert!(lines[1].ends_with("    1.5 KB"));
        assert_eq!(lines[1].find("Size:"), Some(NAME_WIDTH + 1));
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_link_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("data.txt"), "abc").unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone"), dir.path().join("stale")).unwrap();

        let entries = list_dir(dir.path()).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["data.txt"]);
        assert_eq!(dump_tree(dir.path()).unwrap().len(), 1);
    }
}
