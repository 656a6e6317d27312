use crate::messages::{RunId, ThreadId};
use std::collections::{HashSet, VecDeque};

/// Identifies one remote run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunKey {
    pub thread_id: ThreadId,
    pub run_id: RunId,
}

impl RunKey {
    pub fn new(thread_id: ThreadId, run_id: RunId) -> Self {
        Self { thread_id, run_id }
    }
}

/// Runs whose terminal result has already been applied.
///
/// Bounded: once `capacity` keys are held, the oldest is forgotten.
#[derive(Debug)]
pub struct DedupLedger {
    seen: HashSet<RunKey>,
    order: VecDeque<RunKey>,
    capacity: usize,
}

impl DedupLedger {
    pub const DEFAULT_CAPACITY: usize = 256;

    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record `key`. Returns `false` if it was already recorded.
    pub fn record(&mut self, key: RunKey) -> bool {
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        true
    }

    pub fn contains(&self, key: &RunKey) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl Default for DedupLedger {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(thread: &str, run: &str) -> RunKey {
        RunKey::new(thread.into(), run.into())
    }

    #[test]
    fn second_record_is_rejected() {
        let mut ledger = DedupLedger::default();
        assert!(ledger.record(key("t", "r1")));
        assert!(!ledger.record(key("t", "r1")));
        assert!(ledger.record(key("t", "r2")));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn same_run_id_on_other_thread_is_distinct() {
        let mut ledger = DedupLedger::default();
        assert!(ledger.record(key("t1", "r")));
        assert!(ledger.record(key("t2", "r")));
    }

    #[test]
    fn oldest_key_is_evicted_at_capacity() {
        let mut ledger = DedupLedger::new(2);
        ledger.record(key("t", "1"));
        ledger.record(key("t", "2"));
        ledger.record(key("t", "3"));
        assert!(!ledger.contains(&key("t", "1")));
        assert!(ledger.contains(&key("t", "3")));
        assert_eq!(ledger.len(), 2);
    }
}
