//! Query Tracker: discovery attempts this node originated
//!
//! One record per destination. The tracker gates how often discovery for
//! the same destination may be restarted and owns the node's query
//! sequence counter, which starts at 1 and only moves when a query is
//! actually originated.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use srcr_core::{Metric, NodeAddr};

/// Discovery state for one destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRecord {
    pub target: NodeAddr,
    /// Sequence number of the latest attempt
    pub seq: u32,
    /// Best path metric learned from replies (0 until one arrives)
    pub metric: Metric,
    pub attempts: u32,
    pub last_attempt: Instant,
}

/// Per-destination discovery bookkeeping
#[derive(Debug)]
pub struct QueryTracker {
    records: HashMap<NodeAddr, QueryRecord>,
    next_seq: u32,
}

impl QueryTracker {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            next_seq: 1,
        }
    }

    /// Whether discovery for `target` may start now
    pub fn may_start(&self, target: &NodeAddr, now: Instant, retry_interval: Duration) -> bool {
        match self.records.get(target) {
            Some(record) => now.saturating_duration_since(record.last_attempt) >= retry_interval,
            None => true,
        }
    }

    /// Register a new attempt and return its sequence number
    pub fn begin(&mut self, target: NodeAddr, now: Instant) -> u32 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1).max(1);

        let record = self.records.entry(target).or_insert(QueryRecord {
            target,
            seq,
            metric: 0,
            attempts: 0,
            last_attempt: now,
        });
        record.seq = seq;
        record.attempts = record.attempts.saturating_add(1);
        record.last_attempt = now;
        seq
    }

    /// Note the metric of a path learned for `target`
    ///
    /// Keeps the best (lowest non-zero) value seen.
    pub fn record_metric(&mut self, target: &NodeAddr, metric: Metric) {
        if let Some(record) = self.records.get_mut(target)
            && metric != 0
            && (record.metric == 0 || metric < record.metric)
        {
            record.metric = metric;
        }
    }

    pub fn get(&self, target: &NodeAddr) -> Option<&QueryRecord> {
        self.records.get(target)
    }

    /// Sequence number the next query will carry
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Forget all records
    ///
    /// The sequence counter keeps running so that floods from before the
    /// reset are not mistaken for new ones by other nodes.
    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl Default for QueryTracker {
    fn default() -> Self {
        Self::new()
    }
}
