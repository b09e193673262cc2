use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;

pub const DEFAULT_HISTORY_LIMIT: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub at: DateTime<Local>,
    pub actor: String,
    pub message: String,
}

/// Most recent activity, oldest first. Older entries are dropped once the
/// limit is reached.
#[derive(Debug)]
pub struct ActivityLog {
    entries: Mutex<VecDeque<HistoryEntry>>,
    limit: usize,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl ActivityLog {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(limit.min(64))),
            limit: limit.max(1),
        }
    }

    pub fn record(&self, actor: impl Into<String>, message: impl Into<String>) {
        let entry = HistoryEntry {
            at: Local::now(),
            actor: actor.into(),
            message: message.into(),
        };
        let mut entries = match self.entries.lock() {
            Ok(e) => e,
            Err(poisoned) => poisoned.into_inner(),
        };
        while entries.len() >= self.limit {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        match self.entries.lock() {
            Ok(e) => e.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
