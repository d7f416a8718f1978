//! User-facing results log: what each mutation did, name diversions,
//! load diagnostics and formula errors.

use chrono::{DateTime, Utc};
use serde::Serialize;

const MAX_ENTRIES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: EntryLevel,
    pub message: String,
}

/// Bounded, oldest-first list of entries.
#[derive(Debug, Clone, Default)]
pub struct ResultsLog {
    entries: Vec<LogEntry>,
}

impl ResultsLog {
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(EntryLevel::Info, message.into());
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.push(EntryLevel::Warning, message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(EntryLevel::Error, message.into());
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn push(&mut self, level: EntryLevel, message: String) {
        if self.entries.len() == MAX_ENTRIES {
            self.entries.remove(0);
        }
        self.entries.push(LogEntry {
            timestamp: Utc::now(),
            level,
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::{EntryLevel, ResultsLog, MAX_ENTRIES};

    #[test]
    fn keeps_newest_entries_in_order() {
        let mut log = ResultsLog::default();
        for index in 0..=MAX_ENTRIES {
            log.info(format!("entry {index}"));
        }
        log.warning("last");
        assert_eq!(log.entries().len(), MAX_ENTRIES);
        assert_eq!(log.entries()[0].message, "entry 2");
        let last = log.last().expect("entry");
        assert_eq!((last.level, last.message.as_str()), (EntryLevel::Warning, "last"));
    }

    #[test]
    fn entries_serialize_with_snake_case_level() {
        let mut log = ResultsLog::default();
        log.error("boom");
        let json = serde_json::to_value(&log.entries()[0]).expect("serializes");
        assert_eq!(json["level"], "error");
        assert_eq!(json["message"], "boom");
    }
}
