//! Seen Table: query deduplication and best-metric aggregation
//!
//! Every distinct `(origin, target, sequence)` flood gets exactly one
//! record. While the record waits for its flush deadline, better copies of
//! the same query replace the stored hop list; once it has been flushed the
//! record is frozen and later copies are only counted.
//!
//! Eviction is strict FIFO by insertion: when a new triple arrives at
//! capacity, the oldest inserted record goes, however recently it was
//! updated.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use srcr_core::{Hop, Metric, NodeAddr};

/// Identity of one query flood
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeenKey {
    pub src: NodeAddr,
    pub dst: NodeAddr,
    pub seq: u32,
}

impl SeenKey {
    pub fn new(src: NodeAddr, dst: NodeAddr, seq: u32) -> Self {
        Self { src, dst, seq }
    }
}

/// Aggregated state of one query flood at this node
#[derive(Debug, Clone)]
pub struct SeenRecord {
    pub key: SeenKey,
    /// Total forward metric of the stored hop list
    pub forward_metric: Metric,
    /// Total reverse metric of the stored hop list
    pub reverse_metric: Metric,
    /// Copies received, including the first
    pub arrivals: u32,
    pub first_seen: Instant,
    /// When the record is flushed
    pub forward_at: Instant,
    /// Set once the record has been flooded on, or answered on arrival
    pub forwarded: bool,
    /// Best hop list so far, ending with this node
    pub hops: Vec<Hop>,
}

impl SeenRecord {
    /// Links traversed by the stored hop list
    pub fn hop_count(&self) -> usize {
        self.hops.len().saturating_sub(1)
    }

    /// The neighbor the stored copy was received from
    pub fn last_sender(&self) -> Option<NodeAddr> {
        self.hops.iter().rev().nth(1).map(|h| h.addr)
    }
}

/// Result of feeding a query copy into the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeenUpdate {
    /// First copy of this flood
    Inserted,
    /// Better copy replaced the stored one
    Improved,
    /// Copy was not better than the stored one
    Duplicate,
    /// Record was already flushed
    AlreadyForwarded,
}

/// Bounded, insertion-ordered query record store
#[derive(Debug)]
pub struct SeenTable {
    records: HashMap<SeenKey, SeenRecord>,
    order: VecDeque<SeenKey>,
    max_seen: usize,
}

impl SeenTable {
    /// Create a table holding at most `max_seen` records
    pub fn new(max_seen: usize) -> Self {
        Self {
            records: HashMap::new(),
            order: VecDeque::new(),
            max_seen: max_seen.max(1),
        }
    }

    /// Record a copy of a query
    ///
    /// `hops` already ends with this node. A new record is flushed at
    /// `now + wait`; an improving copy keeps the existing deadline.
    pub fn observe(
        &mut self,
        key: SeenKey,
        hops: Vec<Hop>,
        forward_metric: Metric,
        reverse_metric: Metric,
        now: Instant,
        wait: Duration,
    ) -> SeenUpdate {
        if let Some(record) = self.records.get_mut(&key) {
            record.arrivals = record.arrivals.saturating_add(1);
            if record.forwarded {
                return SeenUpdate::AlreadyForwarded;
            }
            if forward_metric < record.forward_metric {
                record.hops = hops;
                record.forward_metric = forward_metric;
                record.reverse_metric = reverse_metric;
                return SeenUpdate::Improved;
            }
            return SeenUpdate::Duplicate;
        }

        while self.records.len() >= self.max_seen {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.records.remove(&oldest);
        }

        self.records.insert(
            key,
            SeenRecord {
                key,
                forward_metric,
                reverse_metric,
                arrivals: 1,
                first_seen: now,
                forward_at: now + wait,
                forwarded: false,
                hops,
            },
        );
        self.order.push_back(key);
        SeenUpdate::Inserted
    }

    /// Keys of unflushed records whose deadline has passed, oldest first
    pub fn due(&self, now: Instant) -> Vec<SeenKey> {
        self.order
            .iter()
            .filter(|key| {
                self.records
                    .get(key)
                    .is_some_and(|r| !r.forwarded && r.forward_at <= now)
            })
            .copied()
            .collect()
    }

    /// Freeze a record and return its final state
    pub fn mark_forwarded(&mut self, key: &SeenKey) -> Option<&SeenRecord> {
        let record = self.records.get_mut(key)?;
        record.forwarded = true;
        Some(record)
    }

    pub fn get(&self, key: &SeenKey) -> Option<&SeenRecord> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &SeenKey) -> bool {
        self.records.contains_key(key)
    }

    /// Records in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &SeenRecord> {
        self.order.iter().filter_map(|key| self.records.get(key))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_seen
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_millis(100);

    fn make_id(c: char) -> NodeAddr {
        NodeAddr::from_letter(c).unwrap()
    }

    fn key(seq: u32) -> SeenKey {
        SeenKey::new(make_id('A'), make_id('D'), seq)
    }

    fn hops_via(relay: char) -> Vec<Hop> {
        vec![
            Hop::origin(make_id('A')),
            Hop::new(make_id(relay), 1, 1),
            Hop::new(make_id('X'), 1, 1),
        ]
    }

    #[test]
    fn test_single_record_per_triple() {
        let mut table = SeenTable::new(10);
        let now = Instant::now();

        assert_eq!(
            table.observe(key(1), hops_via('B'), 5, 5, now, WAIT),
            SeenUpdate::Inserted
        );
        for _ in 0..20 {
            table.observe(key(1), hops_via('C'), 9, 9, now, WAIT);
        }
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&key(1)).unwrap().arrivals, 21);
    }

    #[test]
    fn test_better_copy_replaces_and_keeps_deadline() {
        let mut table = SeenTable::new(10);
        let now = Instant::now();
        table.observe(key(1), hops_via('C'), 5, 5, now, WAIT);

        let later = now + Duration::from_millis(60);
        assert_eq!(
            table.observe(key(1), hops_via('B'), 3, 4, later, WAIT),
            SeenUpdate::Improved
        );

        let record = table.get(&key(1)).unwrap();
        assert_eq!(record.forward_metric, 3);
        assert_eq!(record.reverse_metric, 4);
        assert_eq!(record.hops[1].addr, make_id('B'));
        assert_eq!(record.forward_at, now + WAIT);
    }

    #[test]
    fn test_equal_copy_is_duplicate() {
        let mut table = SeenTable::new(10);
        let now = Instant::now();
        table.observe(key(1), hops_via('B'), 3, 3, now, WAIT);
        assert_eq!(
            table.observe(key(1), hops_via('C'), 3, 3, now, WAIT),
            SeenUpdate::Duplicate
        );
        assert_eq!(table.get(&key(1)).unwrap().hops[1].addr, make_id('B'));
    }

    #[test]
    fn test_forwarded_record_is_frozen() {
        let mut table = SeenTable::new(10);
        let now = Instant::now();
        table.observe(key(1), hops_via('C'), 5, 5, now, WAIT);
        assert!(table.mark_forwarded(&key(1)).unwrap().forwarded);

        assert_eq!(
            table.observe(key(1), hops_via('B'), 1, 1, now, WAIT),
            SeenUpdate::AlreadyForwarded
        );
        let record = table.get(&key(1)).unwrap();
        assert_eq!(record.forward_metric, 5);
        assert_eq!(record.arrivals, 2);
    }

    #[test]
    fn test_due_respects_deadline() {
        let mut table = SeenTable::new(10);
        let now = Instant::now();
        table.observe(key(1), hops_via('B'), 3, 3, now, WAIT);
        table.observe(key(2), hops_via('B'), 3, 3, now + Duration::from_millis(50), WAIT);

        assert!(table.due(now).is_empty());
        assert_eq!(table.due(now + WAIT), vec![key(1)]);
        assert_eq!(table.due(now + Duration::from_millis(150)), vec![key(1), key(2)]);

        table.mark_forwarded(&key(1));
        assert_eq!(table.due(now + Duration::from_secs(1)), vec![key(2)]);
    }

    #[test]
    fn test_fifo_eviction_ignores_updates() {
        let mut table = SeenTable::new(3);
        let now = Instant::now();
        for seq in 1..=3 {
            table.observe(key(seq), hops_via('C'), 5, 5, now, WAIT);
        }
        // Touch the oldest record; it must still be the one evicted
        table.observe(key(1), hops_via('B'), 2, 2, now, WAIT);

        table.observe(key(4), hops_via('B'), 2, 2, now, WAIT);
        assert_eq!(table.len(), 3);
        assert!(!table.contains(&key(1)));
        assert!(table.contains(&key(2)));
        assert!(table.contains(&key(4)));

        let seqs: Vec<u32> = table.iter().map(|r| r.key.seq).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
    }

    #[test]
    fn test_last_sender() {
        let mut table = SeenTable::new(10);
        table.observe(key(1), hops_via('B'), 3, 3, Instant::now(), WAIT);
        let record = table.get(&key(1)).unwrap();
        assert_eq!(record.last_sender(), Some(make_id('B')));
        assert_eq!(record.hop_count(), 2);
    }
}
