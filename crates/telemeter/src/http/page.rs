//! The index page.

use std::fmt::Write;

use super::routes::{DELETE_ALL_PATH, DELETE_PREFIX};
use crate::storage::{validate_file_name, DirEntry};

const TITLE: &str = "Auxspace Telemetry Interface";

/// Render the file index.
///
/// Only entries the download and delete routes accept are listed, so every
/// link works; directories and oddly named files are left out.
pub(crate) fn render_index(files_prefix: &str, entries: &[DirEntry]) -> String {
    let files: Vec<&DirEntry> = entries
        .iter()
        .filter(|e| !e.is_dir && validate_file_name(&e.name).is_ok())
        .collect();

    let mut listing = String::new();
    if files.is_empty() {
        let _ = write!(
            listing,
            "<p> No files to list in {}.</p>",
            escape(files_prefix)
        );
    } else {
        listing.push_str("<ul>\n");
        for file in files {
            let name = escape(&file.name);
            let _ = writeln!(
                listing,
                "<li>{name} - <a href=\"{prefix}/{name}\">Download</a> - \
                 <a href=\"{DELETE_PREFIX}/{name}\">Delete</a></li>",
                prefix = escape(files_prefix),
            );
        }
        listing.push_str("</ul>\n");
        let _ = write!(listing, "<p><a href=\"{DELETE_ALL_PATH}\">Delete all</a></p>");
    }

    format!(
        "<!DOCTYPE html>
<html>
    <head>
        <meta http-equiv=\"Content-type\" content=\"text/html;charset=utf-8\">
        <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">
        <title>{TITLE}</title>
    </head>
    <body>
        <h1>{TITLE}</h1>
        <p>Download and delete files on the telemetry device's storage card.</p>
        {listing}
    </body>
</html>
"
    )
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
