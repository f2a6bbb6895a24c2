//! Interaction history.
//!
//! Bounded record of executed actions, owned by the provider that performs
//! them. Nothing else holds a mutable handle.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub seq: u64,
    pub tool: String,
    pub summary: String,
    pub pid: Option<u32>,
    pub succeeded: bool,
    pub at: DateTime<Utc>,
}

pub struct InteractionHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
    next_seq: u64,
}

impl InteractionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            next_seq: 1,
        }
    }

    /// Append an entry, dropping the oldest when full. Returns its sequence number.
    pub fn record(&mut self, tool: &str, summary: impl Into<String>, pid: Option<u32>, succeeded: bool) -> u64 {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push_back(HistoryEntry {
            seq,
            tool: tool.to_string(),
            summary: summary.into(),
            pid,
            succeeded,
            at: Utc::now(),
        });
        seq
    }

    /// The `n` most recent entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<HistoryEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_drops_oldest() {
        let mut history = InteractionHistory::new(2);
        history.record("click", "a", Some(1), true);
        history.record("click", "b", Some(1), true);
        let seq = history.record("scroll", "c", None, false);
        assert_eq!(seq, 3);
        assert_eq!(history.len(), 2);
        let recent = history.recent(10);
        assert_eq!(recent[0].summary, "b");
        assert_eq!(recent[1].summary, "c");
        assert!(!recent[1].succeeded);
    }

    #[test]
    fn test_recent_limits() {
        let mut history = InteractionHistory::new(8);
        for i in 0..5 {
            history.record("type_text", format!("{i}"), None, true);
        }
        let recent = history.recent(2);
        assert_eq!(recent.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![4, 5]);
        assert!(InteractionHistory::new(0).is_empty());
    }
}
