//! Error records and the diagnostics queue
//!
//! Operations never raise past their own boundary. A failure is appended
//! to the caller's `DiagnosticsQueue` as an `ErrorRecord` and the operation
//! returns an error value; the caller decides what the user sees.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("Error"),
            Severity::Warning => f.write_str("Warning"),
        }
    }
}

/// Source context of the statement an operation came from
///
/// `Location::internal()` stands in when no caller-supplied context exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub source: Option<String>,
    pub line: u32,
    pub first_column: u32,
    pub last_column: u32,
}

impl Location {
    pub fn new(source: impl Into<String>, line: u32, first_column: u32, last_column: u32) -> Self {
        Self {
            source: Some(source.into()),
            line,
            first_column,
            last_column,
        }
    }

    pub fn internal() -> Self {
        Self::default()
    }

    pub fn is_internal(&self) -> bool {
        self.source.is_none()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(
                f,
                "{}:{}:{}-{}",
                source, self.line, self.first_column, self.last_column
            ),
            None => f.write_str("<internal>:0:0-0"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub severity: Severity,
    pub location: Location,
    pub message: String,
}

impl ErrorRecord {
    pub fn error(location: Option<&Location>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            location: location.cloned().unwrap_or_else(Location::internal),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.location, self.severity, self.message)
    }
}

/// Ordered, append-only collection of error records
///
/// Owned by the caller; this crate only appends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsQueue {
    records: Vec<ErrorRecord>,
}

impl DiagnosticsQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ErrorRecord) {
        debug!(%record, "queued error record");
        self.records.push(record);
    }

    /// Queue an I/O error at `location`, or the internal location if none
    pub fn io_error(&mut self, location: Option<&Location>, message: impl Into<String>) {
        self.push(ErrorRecord::error(location, message));
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.records.iter()
    }

    pub fn last(&self) -> Option<&ErrorRecord> {
        self.records.last()
    }

    /// Hand all queued records to the caller, leaving the queue empty
    pub fn drain(&mut self) -> Vec<ErrorRecord> {
        std::mem::take(&mut self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_location_defaults_to_internal() {
        let rec = ErrorRecord::error(None, "Could not delete rule: No such file or directory");
        assert!(rec.location.is_internal());
        assert_eq!(
            rec.to_string(),
            "<internal>:0:0-0: Error: Could not delete rule: No such file or directory"
        );
    }

    #[test]
    fn test_queue_preserves_order_and_drains() {
        let mut queue = DiagnosticsQueue::new();
        let loc = Location::new("ruleset.nft", 3, 1, 20);
        queue.io_error(Some(&loc), "first");
        queue.io_error(None, "second");

        assert_eq!(queue.len(), 2);
        let messages: Vec<&str> = queue.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);
        assert_eq!(queue.iter().next().map(|r| r.location.line), Some(3));

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());
    }
}
