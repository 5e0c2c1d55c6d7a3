//! Black List: neighbors whose link is believed broken
//!
//! An entry is "still bad" while `now < marked_at + timeout`. Besides
//! gating inbound queries and outbound forwarding, each entry counts the
//! link-error notifications sent per destination so that at most one goes
//! out per `(neighbor, destination)` while the entry is active.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use srcr_core::NodeAddr;
use tracing::debug;

/// Suppression record for one neighbor
#[derive(Debug, Clone)]
pub struct BlackListEntry {
    pub neighbor: NodeAddr,
    pub marked_at: Instant,
    pub timeout: Duration,
    /// Link errors sent per unreachable destination
    pub errors_sent: HashMap<NodeAddr, u32>,
}

impl BlackListEntry {
    /// Whether the entry is still active at `now`
    pub fn is_active(&self, now: Instant) -> bool {
        now < self.marked_at + self.timeout
    }

    /// Time left before the entry expires
    pub fn remaining(&self, now: Instant) -> Duration {
        (self.marked_at + self.timeout).saturating_duration_since(now)
    }
}

/// Bounded per-neighbor suppression table
#[derive(Debug)]
pub struct BlackList {
    entries: HashMap<NodeAddr, BlackListEntry>,
    timeout: Duration,
    max_entries: usize,
}

impl BlackList {
    pub fn new(timeout: Duration, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            timeout,
            max_entries: max_entries.max(1),
        }
    }

    /// Mark `neighbor` as failed
    ///
    /// An active entry keeps its notification counters; an expired one
    /// starts over.
    pub fn mark(&mut self, neighbor: NodeAddr, now: Instant) {
        if let Some(entry) = self.entries.get_mut(&neighbor) {
            if !entry.is_active(now) {
                entry.errors_sent.clear();
            }
            entry.marked_at = now;
            entry.timeout = self.timeout;
            return;
        }

        if self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }
        self.entries.insert(
            neighbor,
            BlackListEntry {
                neighbor,
                marked_at: now,
                timeout: self.timeout,
                errors_sent: HashMap::new(),
            },
        );
    }

    /// Whether `neighbor` is still bad at `now`
    pub fn is_bad(&self, neighbor: &NodeAddr, now: Instant) -> bool {
        self.entries
            .get(neighbor)
            .is_some_and(|entry| entry.is_active(now))
    }

    /// Count a failed delivery towards `destination` and decide whether to
    /// notify the source
    ///
    /// Returns `true` only for the first failure per destination while the
    /// neighbor's entry is active.
    pub fn should_notify(&mut self, neighbor: &NodeAddr, destination: NodeAddr, now: Instant) -> bool {
        let Some(entry) = self.entries.get_mut(neighbor) else {
            return false;
        };
        if !entry.is_active(now) {
            return false;
        }
        let sent = entry.errors_sent.entry(destination).or_insert(0);
        *sent = sent.saturating_add(1);
        *sent == 1
    }

    /// Remove expired entries, returning how many were dropped
    pub fn prune(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_active(now));
        before - self.entries.len()
    }

    pub fn get(&self, neighbor: &NodeAddr) -> Option<&BlackListEntry> {
        self.entries.get(neighbor)
    }

    /// Neighbors currently bad
    pub fn active(&self, now: Instant) -> Vec<NodeAddr> {
        let mut bad: Vec<NodeAddr> = self
            .entries
            .values()
            .filter(|e| e.is_active(now))
            .map(|e| e.neighbor)
            .collect();
        bad.sort();
        bad
    }

    /// Forget `neighbor`
    pub fn remove(&mut self, neighbor: &NodeAddr) -> bool {
        self.entries.remove(neighbor).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .values()
            .min_by_key(|e| e.marked_at)
            .map(|e| e.neighbor);
        if let Some(neighbor) = oldest {
            debug!(neighbor = %neighbor, "Black List full, evicting oldest entry");
            self.entries.remove(&neighbor);
        }
    }
}
