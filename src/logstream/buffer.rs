//! Bounded per-container ring buffer

use std::collections::VecDeque;

use parking_lot::RwLock;

use super::LogEntry;

/// Ring buffer of console entries for one container.
///
/// The tail writer pushes with a blocking write lock; splice writers go
/// through [`LogBuffer::push_yielding`] so they never stall the tail.
pub struct LogBuffer {
    container_id: String,
    entries: RwLock<VecDeque<LogEntry>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(container_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            container_id: container_id.into(),
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    pub fn container_id(&self) -> &str {
        &self.container_id
    }

    /// Append an entry, discarding the oldest on overflow.
    pub fn push(&self, entry: LogEntry) {
        let mut entries = self.entries.write();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Append from a splice writer: back off while the lock is contended
    /// instead of queueing behind the tail.
    pub async fn push_yielding(&self, entry: LogEntry) {
        loop {
            {
                if let Some(mut entries) = self.entries.try_write() {
                    if entries.len() >= self.capacity {
                        entries.pop_front();
                    }
                    entries.push_back(entry);
                    return;
                }
            }
            tokio::task::yield_now().await;
        }
    }

    /// The most recent `limit` entries in stored order.
    pub fn read(&self, limit: usize) -> Vec<LogEntry> {
        let entries = self.entries.read();
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logstream::LogType;
    use chrono::Utc;

    fn entry(content: &str) -> LogEntry {
        LogEntry::new(Utc::now(), LogType::Stdout, content)
    }

    #[test]
    fn test_capacity_bound_discards_oldest() {
        let buffer = LogBuffer::new("c1", 3);
        for i in 0..5 {
            buffer.push(entry(&format!("line {}", i)));
        }

        assert_eq!(buffer.len(), 3);
        let entries = buffer.read(10);
        let contents: Vec<&str> = entries.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn test_read_limit_returns_most_recent() {
        let buffer = LogBuffer::new("c1", 100);
        for i in 0..10 {
            buffer.push(entry(&format!("line {}", i)));
        }

        let last_two = buffer.read(2);
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].content, "line 8");
        assert_eq!(last_two[1].content, "line 9");
    }

    #[test]
    fn test_tail_timestamps_monotonic() {
        let buffer = LogBuffer::new("c1", 100);
        for i in 0..50 {
            buffer.push(entry(&format!("line {}", i)));
        }

        let entries = buffer.read(50);
        for pair in entries.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[tokio::test]
    async fn test_push_yielding_appends() {
        let buffer = LogBuffer::new("c1", 10);
        buffer.push_yielding(entry("spliced")).await;
        assert_eq!(buffer.read(1)[0].content, "spliced");
    }

    #[test]
    fn test_clear() {
        let buffer = LogBuffer::new("c1", 10);
        buffer.push(entry("a"));
        buffer.clear();
        assert!(buffer.is_empty());
    }
}
