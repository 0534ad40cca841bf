//! # Deduplication Filter
//!
//! The broker delivers at least once, and overlapping topic subscriptions can
//! hand us the same transfer twice. The filter keeps a ledger of admitted
//! identity keys so each event reaches the cache exactly once.
//!
//! The ledger is bounded two ways: a fixed capacity (oldest admission evicted
//! first) and an optional time-to-live. A duplicate sighting does not refresh an
//! entry; admission order alone decides eviction.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

/// Bounded ledger of admitted event keys.
#[derive(Debug)]
pub struct DedupFilter {
    seen: HashSet<String>,
    order: VecDeque<(String, Instant)>,
    capacity: usize,
    ttl: Option<Duration>,
}

impl DedupFilter {
    /// Creates a filter remembering at most `capacity` keys, each for at most `ttl`.
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        let capacity = capacity.max(1);
        Self {
            seen: HashSet::with_capacity(capacity.min(4096)),
            order: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            ttl,
        }
    }

    /// Returns `true` and records `key` the first time it is seen. Repeated keys
    /// return `false` and change nothing.
    pub fn admit(&mut self, key: &str, now: Instant) -> bool {
        self.expire(now);
        if self.seen.contains(key) {
            return false;
        }
        while self.order.len() >= self.capacity {
            if let Some((oldest, _)) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(key.to_string());
        self.order.push_back((key.to_string(), now));
        true
    }

    /// Whether `key` is currently in the ledger.
    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    /// Number of remembered keys.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when nothing is remembered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn expire(&mut self, now: Instant) {
        let Some(ttl) = self.ttl else {
            return;
        };
        while self
            .order
            .front()
            .is_some_and(|(_, admitted_at)| now.saturating_duration_since(*admitted_at) >= ttl)
        {
            if let Some((key, _)) = self.order.pop_front() {
                self.seen.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_id_admitted_once() {
        let now = Instant::now();
        let mut filter = DedupFilter::new(100, None);
        assert!(filter.admit("evt-1", now));
        assert!(!filter.admit("evt-1", now));
        assert!(!filter.admit("evt-1", now + Duration::from_secs(3600)));
        assert_eq!(filter.len(), 1);
    }

    #[test]
    fn test_distinct_ids_all_admitted() {
        let now = Instant::now();
        let mut filter = DedupFilter::new(100, None);
        let admitted = (0..50)
            .filter(|i| filter.admit(&format!("evt-{}", i), now))
            .count();
        assert_eq!(admitted, 50);
    }

    #[test]
    fn test_capacity_evicts_oldest_admission() {
        let now = Instant::now();
        let mut filter = DedupFilter::new(2, None);
        assert!(filter.admit("a", now));
        assert!(filter.admit("b", now));
        // A duplicate does not refresh "a".
        assert!(!filter.admit("a", now));
        assert!(filter.admit("c", now));
        assert!(!filter.contains("a"));
        assert!(filter.contains("b"));
        assert_eq!(filter.len(), 2);
        assert!(filter.admit("a", now));
    }

    #[test]
    fn test_ttl_forgets_old_keys() {
        let start = Instant::now();
        let mut filter = DedupFilter::new(10, Some(Duration::from_secs(60)));
        assert!(filter.admit("evt-1", start));
        assert!(!filter.admit("evt-1", start + Duration::from_secs(59)));
        assert!(filter.admit("evt-1", start + Duration::from_secs(61)));
    }
}
