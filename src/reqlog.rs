//! Bounded, append-only log of served requests.
//!
//! A single writer lock guards `append`; everything else reads a cloned
//! snapshot so listing and filtering never block an in-flight request from
//! being recorded (§5).

use crate::matcher::MatchTree;
use crate::model::RequestMessage;
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

/// Outcome recorded for one served request.
#[derive(Debug, Clone)]
pub enum LogOutcome {
    Matched { mapping_id: Uuid },
    Unmatched { top_candidates: Vec<(Uuid, Option<String>, f64)> },
    Canceled,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub id: Uuid,
    pub request: RequestMessage,
    pub outcome: LogOutcome,
    pub status: u16,
}

/// Default ring capacity (§4.8). `None` means unbounded.
pub const DEFAULT_CAPACITY: usize = 1000;

pub struct RequestLog {
    capacity: Option<usize>,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl RequestLog {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn append(&self, entry: LogEntry) {
        let mut guard = self.entries.lock().unwrap();
        guard.push_back(entry);
        if let Some(capacity) = self.capacity {
            while guard.len() > capacity {
                guard.pop_front();
            }
        }
    }

    pub fn count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn list(&self, filter: Option<&MatchTree>) -> Vec<LogEntry> {
        let guard = self.entries.lock().unwrap();
        match filter {
            None => guard.iter().cloned().collect(),
            Some(tree) => guard
                .iter()
                .filter(|entry| tree.score(&entry.request) >= 1.0)
                .cloned()
                .collect(),
        }
    }

    pub fn find_by_mapping(&self, mapping_id: Uuid) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| matches!(entry.outcome, LogOutcome::Matched { mapping_id: id } if id == mapping_id))
            .cloned()
            .collect()
    }

    pub fn reset(&self) {
        self.entries.lock().unwrap().clear();
    }
}

impl Default for RequestLog {
    fn default() -> Self {
        Self::new(Some(DEFAULT_CAPACITY))
    }
}
