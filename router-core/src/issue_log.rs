//! IssueLog: bounded in-memory ring of recent diagnostic entries,
//! surfaced by the admin `/v1/router/log` endpoint (§4 Data Model, §10.1).
//!
//! Populated alongside the same call sites that emit `tracing` events
//! (dual emission: the process-wide structured log and this
//! queryable-over-HTTP ring), plus from framed `log` messages sent by
//! services (§4.4 step 4). This is a
//! much simpler in-process structure than the teacher's shared-memory
//! `memory_log` ring — there is one process here, not a proxy/control
//! split, so a `Mutex<VecDeque<_>>` suffices.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;

pub const MAX_ISSUE_LOG_ENTRIES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
    Fatal,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssueEntry {
    pub ts: i64,
    pub severity: Severity,
    pub message: String,
}

pub struct IssueLog {
    entries: Mutex<VecDeque<IssueEntry>>,
}

impl Default for IssueLog {
    fn default() -> Self {
        Self::new()
    }
}

impl IssueLog {
    pub fn new() -> Self {
        IssueLog { entries: Mutex::new(VecDeque::with_capacity(MAX_ISSUE_LOG_ENTRIES)) }
    }

    pub fn push(&self, severity: Severity, message: impl Into<String>) {
        let mut entries = self.entries.lock().expect("issue log lock poisoned");
        entries.push_back(IssueEntry { ts: chrono::Utc::now().timestamp(), severity, message: message.into() });
        while entries.len() > MAX_ISSUE_LOG_ENTRIES {
            entries.pop_front();
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(Severity::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.push(Severity::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(Severity::Error, message);
    }

    pub fn fatal(&self, message: impl Into<String>) {
        self.push(Severity::Fatal, message);
    }

    pub fn snapshot(&self) -> Vec<IssueEntry> {
        self.entries.lock().expect("issue log lock poisoned").iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_to_max_entries() {
        let log = IssueLog::new();
        for i in 0..(MAX_ISSUE_LOG_ENTRIES + 10) {
            log.info(format!("entry {i}"));
        }
        assert_eq!(log.snapshot().len(), MAX_ISSUE_LOG_ENTRIES);
    }

    #[test]
    fn keeps_most_recent_entries() {
        let log = IssueLog::new();
        for i in 0..(MAX_ISSUE_LOG_ENTRIES + 1) {
            log.info(format!("entry {i}"));
        }
        let snap = log.snapshot();
        assert_eq!(snap.first().unwrap().message, "entry 1");
        assert_eq!(snap.last().unwrap().message, format!("entry {}", MAX_ISSUE_LOG_ENTRIES));
    }
}
