use chrono::{DateTime, Duration, FixedOffset};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Entries older than this are dropped
const RETENTION_HOURS: i64 = 24;
const MAX_ENTRIES: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<FixedOffset>,
    pub message: String,
}

/// Human-readable record of what the controller decided, newest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionLog {
    entries: VecDeque<LogEntry>,
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<LogEntry>, now: DateTime<FixedOffset>) -> Self {
        let mut log = Self {
            entries: entries.into(),
        };
        log.prune(now);
        log
    }

    pub fn push(&mut self, at: DateTime<FixedOffset>, message: impl Into<String>) {
        self.entries.push_front(LogEntry {
            at,
            message: message.into(),
        });
        self.prune(at);
    }

    pub fn prune(&mut self, now: DateTime<FixedOffset>) {
        let cutoff = now - Duration::hours(RETENTION_HOURS);
        self.entries.retain(|e| e.at >= cutoff);
        self.entries.truncate(MAX_ENTRIES);
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
