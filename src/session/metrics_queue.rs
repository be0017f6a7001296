//! Pending scalar metrics between uploads.
//!
//! Uploads follow snapshot → send → confirm: `snapshot` copies the queue without
//! clearing it, and `clear` drops only the entries the hub confirmed and that
//! were not overwritten in the meantime. Every write gets a sequence number so
//! "overwritten" is exact even when the new value equals the old one.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Entry {
    value: f64,
    seq: u64,
}

#[derive(Debug, Default)]
pub struct MetricsQueue {
    entries: HashMap<String, Entry>,
    next_seq: u64,
}

/// Queue contents captured at send time
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    entries: HashMap<String, Entry>,
}

impl MetricsSnapshot {
    /// Metric values, as sent to the hub
    pub fn values(&self) -> HashMap<String, f64> {
        self.entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.value))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl MetricsQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` for `name`; the last write before a flush wins.
    pub fn enqueue(&mut self, name: impl Into<String>, value: f64) {
        self.next_seq += 1;
        self.entries.insert(
            name.into(),
            Entry {
                value,
                seq: self.next_seq,
            },
        );
    }

    pub fn extend<I, K>(&mut self, values: I)
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        for (name, value) in values {
            self.enqueue(name, value);
        }
    }

    /// Copy the current contents for upload. The queue is left untouched.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            entries: self.entries.clone(),
        }
    }

    /// Drop the entries confirmed by a successful upload of `uploaded`.
    ///
    /// Entries written after the snapshot was taken survive.
    pub fn clear(&mut self, uploaded: &MetricsSnapshot) {
        for (name, sent) in &uploaded.entries {
            if self.entries.get(name).map(|e| e.seq) == Some(sent.seq) {
                self.entries.remove(name);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries.get(name).map(|e| e.value)
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
    fn test_last_write_wins() {
        let mut q = MetricsQueue::new();
        q.enqueue("loss", 0.9);
        q.enqueue("loss", 0.7);
        assert_eq!(q.len(), 1);
        assert_eq!(q.get("loss"), Some(0.7));
    }

    #[test]
    fn test_snapshot_does_not_clear() {
        let mut q = MetricsQueue::new();
        q.extend([("loss", 0.5), ("map50", 0.31)]);

        let snap = q.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(q.len(), 2);

        q.clear(&snap);
        assert!(q.is_empty());
    }

    #[test]
    fn test_newer_value_survives_clear() {
        let mut q = MetricsQueue::new();
        q.enqueue("A", 1.0);
        let snap = q.snapshot();
        q.enqueue("A", 2.0);

        q.clear(&snap);
        assert_eq!(q.get("A"), Some(2.0));
        assert_eq!(snap.values().get("A"), Some(&1.0));
    }

    #[test]
    fn test_rewrite_with_same_value_survives_clear() {
        let mut q = MetricsQueue::new();
        q.enqueue("A", 1.0);
        let snap = q.snapshot();
        q.enqueue("A", 1.0);

        q.clear(&snap);
        assert_eq!(q.get("A"), Some(1.0));
    }

    #[test]
    fn test_keys_added_after_snapshot_survive() {
        let mut q = MetricsQueue::new();
        q.enqueue("loss", 0.4);
        let snap = q.snapshot();
        q.enqueue("lr", 0.01);

        q.clear(&snap);
        assert_eq!(q.len(), 1);
        assert_eq!(q.get("lr"), Some(0.01));
    }

    #[test]
    fn test_failed_upload_keeps_everything() {
        let mut q = MetricsQueue::new();
        q.enqueue("loss", 0.4);
        let _unconfirmed = q.snapshot();
        q.enqueue("loss", 0.3);
        // No clear: the next snapshot carries the newest value.
        assert_eq!(q.snapshot().values().get("loss"), Some(&0.3));
    }
}
