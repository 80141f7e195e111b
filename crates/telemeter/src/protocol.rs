//! Line-protocol encoding of sensor readings.
//!
//! One reading is one line:
//!
//! ```text
//! <measurement> <field>=<value>[,<field>=<value>...] <timestamp_ms>
//! ```
//!
//! There are no tags and no terminator; storage adds CRLF on append.

use serde::Serialize;
use thiserror::Error;

use crate::sensor::{Fields, SensorReading};

/// Render a reading as a single line.
///
/// Declared fields come first in their declared order; anything else follows
/// in insertion order. Values use the shortest representation that
/// round-trips. An empty field set still yields both separators.
#[must_use]
pub fn encode(reading: &SensorReading) -> String {
    let declared = reading.measurement().field_names();
    let fields = reading.fields();

    let ordered = declared
        .iter()
        .filter_map(|name| fields.get(name).map(|value| (*name, value)))
        .chain(fields.iter().filter(|(name, _)| !declared.contains(name)));

    let rendered: Vec<String> = ordered
        .map(|(name, value)| format!("{name}={value}"))
        .collect();

    format!(
        "{} {} {}",
        reading.measurement().name(),
        rendered.join(","),
        reading.timestamp_ms()
    )
}

/// Why a stored line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineError {
    /// Blank line.
    #[error("empty line")]
    Empty,

    /// Fewer than three space-separated parts.
    #[error("missing {part}")]
    Missing {
        /// What was missing.
        part: &'static str,
    },

    /// A field without `=`.
    #[error("malformed field {field:?}")]
    Field {
        /// The offending text.
        field: String,
    },

    /// A field value that is not a number.
    #[error("field {field} has non-numeric value {value:?}")]
    Value {
        /// Field name.
        field: String,
        /// The offending text.
        value: String,
    },

    /// A timestamp that is not an unsigned integer.
    #[error("invalid timestamp {value:?}")]
    Timestamp {
        /// The offending text.
        value: String,
    },
}

/// A data-file line parsed back into its parts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineRecord {
    /// Measurement name.
    pub measurement: String,
    /// Fields in stored order.
    pub fields: Fields,
    /// Milliseconds since runtime start.
    pub timestamp_ms: u64,
}

impl LineRecord {
    /// Parse one line. A trailing CR or CRLF is ignored.
    ///
    /// # Errors
    ///
    /// Returns a [`LineError`] describing the first problem found.
    pub fn parse(line: &str) -> Result<Self, LineError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Err(LineError::Empty);
        }

        let mut parts = line.splitn(3, ' ');
        let measurement = parts.next().unwrap_or_default();
        let fields = parts.next().ok_or(LineError::Missing { part: "fields" })?;
        let timestamp = parts.next().ok_or(LineError::Missing { part: "timestamp" })?;

        let timestamp_ms = timestamp.parse().map_err(|_| LineError::Timestamp {
            value: timestamp.to_string(),
        })?;

        Ok(Self {
            measurement: measurement.to_string(),
            fields: parse_fields(fields)?,
            timestamp_ms,
        })
    }

    /// Render back to line protocol, keeping the stored field order.
    #[must_use]
    pub fn to_line(&self) -> String {
        let rendered: Vec<String> = self
            .fields
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        format!("{} {} {}", self.measurement, rendered.join(","), self.timestamp_ms)
    }
}

fn parse_fields(text: &str) -> Result<Fields, LineError> {
    if text.is_empty() {
        return Ok(Fields::new());
    }
    text.split(',')
        .map(|pair| {
            let (name, value) = pair.split_once('=').ok_or_else(|| LineError::Field {
                field: pair.to_string(),
            })?;
            let parsed = value.parse::<f64>().map_err(|_| LineError::Value {
                field: name.to_string(),
                value: value.to_string(),
            })?;
            Ok((name.to_string(), parsed))
        })
        .collect()
}
