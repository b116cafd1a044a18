//! Sync report and its log trail.

use std::fmt;

/// Severity of one [`LogEntry`] in a [`Report`]'s trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// One entry in a [`Report`]'s log trail, mirroring what was emitted via
/// `tracing` during the run. `context` carries the same structured
/// key/value fields (phase, table, ...) that accompanied the matching
/// `tracing` event, so a caller inspecting `Report.log` alone (without a
/// `tracing` subscriber installed) doesn't lose them to free-text
/// interpolation.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub context: Vec<(String, String)>,
}

impl LogEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self { level: LogLevel::Info, message: message.into(), context: Vec::new() }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self { level: LogLevel::Warn, message: message.into(), context: Vec::new() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { level: LogLevel::Error, message: message.into(), context: Vec::new() }
    }

    /// Attach a structured `key = value` context pair. Chainable:
    /// `LogEntry::info("...").with_context("phase", "load").with_context("table", table)`.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.push((key.into(), value.into()));
        self
    }
}

/// Outcome of one [`crate::sync`] invocation.
#[derive(Debug, Clone, Default)]
pub struct Report {
    /// Rows loaded into the temp table by the Loader.
    pub loaded_count: u64,
    /// Rows inserted via the empty-live fast path (Phase A). Zero unless
    /// that path was taken.
    pub initial_insert_count: u64,
    /// Rows inserted via Phase D. Zero if the fast path was taken.
    pub inserted_count: u64,
    /// Rows updated via Phase B.
    pub updated_count: u64,
    /// Rows deleted via Phase C.
    pub deleted_count: u64,
    pub log: Vec<LogEntry>,
}

impl Report {
    pub fn push(&mut self, entry: LogEntry) {
        self.log.push(entry);
    }

    /// Total rows the live table ended up with touched in some way this run.
    pub fn total_changed(&self) -> u64 {
        self.initial_insert_count + self.inserted_count + self.updated_count + self.deleted_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_changed_sums_all_phases() {
        let report = Report { loaded_count: 10, initial_insert_count: 0, inserted_count: 2, updated_count: 3, deleted_count: 1, log: vec![] };
        assert_eq!(report.total_changed(), 6);
    }

    #[test]
    fn fresh_report_has_no_changes() {
        let report = Report::default();
        assert_eq!(report.total_changed(), 0);
    }

    #[test]
    fn with_context_accumulates_pairs_in_order() {
        let entry = LogEntry::info("temp table prepared").with_context("phase", "prepare_temp").with_context("table", "live_temp");
        assert_eq!(
            entry.context,
            vec![("phase".to_string(), "prepare_temp".to_string()), ("table".to_string(), "live_temp".to_string())]
        );
    }
}
