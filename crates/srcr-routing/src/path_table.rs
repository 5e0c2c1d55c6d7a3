//! Path Table: every distinct path ever learned
//!
//! Usage statistics accumulate here whether or not a path is the one
//! currently selected for its destination. Entries keep the per-hop metrics
//! from the reply that taught them, so data packets can be stamped with the
//! last known link costs.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use srcr_core::{Hop, Metric, NodeAddr, Path};

/// Bookkeeping for one learned path
#[derive(Debug, Clone)]
pub struct PathInfo {
    pub path: Path,
    /// Hop list of the most recent reply for this path
    pub hops: Vec<Hop>,
    /// Total forward metric from that reply
    pub metric: Metric,
    pub learned_at: Instant,
    pub last_used: Instant,
    pub use_count: u64,
}

/// Bounded store of learned paths, keyed by path value
#[derive(Debug)]
pub struct PathTable {
    paths: HashMap<Path, PathInfo>,
    /// Learning order, oldest first
    order: VecDeque<Path>,
    max_paths: usize,
}

impl PathTable {
    pub fn new(max_paths: usize) -> Self {
        Self {
            paths: HashMap::new(),
            order: VecDeque::new(),
            max_paths: max_paths.max(1),
        }
    }

    /// Insert a newly learned path or refresh an existing one
    ///
    /// At capacity, the path learned first is evicted, however recently
    /// it was used or refreshed.
    pub fn learn(&mut self, hops: Vec<Hop>, metric: Metric, now: Instant) -> &PathInfo {
        let path = Path::from_hops(&hops);
        if !self.paths.contains_key(&path) {
            while self.paths.len() >= self.max_paths {
                let Some(oldest) = self.order.pop_front() else {
                    break;
                };
                self.paths.remove(&oldest);
            }
            self.order.push_back(path.clone());
        }

        let info = self.paths.entry(path.clone()).or_insert_with(|| PathInfo {
            path,
            hops: Vec::new(),
            metric,
            learned_at: now,
            last_used: now,
            use_count: 0,
        });
        info.hops = hops;
        info.metric = metric;
        info
    }

    /// Count one data packet sent along `path`
    pub fn record_use(&mut self, path: &Path, now: Instant) {
        if let Some(info) = self.paths.get_mut(path) {
            info.last_used = now;
            info.use_count = info.use_count.saturating_add(1);
        }
    }

    pub fn get(&self, path: &Path) -> Option<&PathInfo> {
        self.paths.get(path)
    }

    /// All learned paths ending at `destination`, best metric first
    pub fn paths_to(&self, destination: &NodeAddr) -> Vec<&PathInfo> {
        let mut found: Vec<&PathInfo> = self
            .paths
            .values()
            .filter(|info| info.path.destination() == Some(*destination))
            .collect();
        found.sort_by(|a, b| a.metric.cmp(&b.metric).then_with(|| a.path.cmp(&b.path)));
        found
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn clear(&mut self) {
        self.paths.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn make_id(c: char) -> NodeAddr {
        NodeAddr::from_letter(c).unwrap()
    }

    fn make_hops(chars: &str, metric: Metric) -> Vec<Hop> {
        chars
            .chars()
            .enumerate()
            .map(|(i, c)| {
                if i == 0 {
                    Hop::origin(make_id(c))
                } else {
                    Hop::new(make_id(c), metric, metric)
                }
            })
            .collect()
    }

    #[test]
    fn test_learn_and_refresh() {
        let mut table = PathTable::new(8);
        let now = Instant::now();

        let info = table.learn(make_hops("ABD", 2), 4, now);
        assert_eq!(info.metric, 4);
        assert_eq!(info.use_count, 0);

        table.learn(make_hops("ABD", 3), 6, now + Duration::from_secs(1));
        assert_eq!(table.len(), 1);
        let path = Path::from_hops(&make_hops("ABD", 0));
        let info = table.get(&path).unwrap();
        assert_eq!(info.metric, 6);
        assert_eq!(info.learned_at, now);
        assert_eq!(info.hops[1].fwd_metric, 3);
    }

    #[test]
    fn test_record_use() {
        let mut table = PathTable::new(8);
        let now = Instant::now();
        table.learn(make_hops("ABD", 1), 2, now);
        let path = Path::from_hops(&make_hops("ABD", 1));

        table.record_use(&path, now + Duration::from_secs(2));
        table.record_use(&path, now + Duration::from_secs(3));
        let info = table.get(&path).unwrap();
        assert_eq!(info.use_count, 2);
        assert_eq!(info.last_used, now + Duration::from_secs(3));
    }

    #[test]
    fn test_paths_to_sorted_by_metric() {
        let mut table = PathTable::new(8);
        let now = Instant::now();
        table.learn(make_hops("ACD", 5), 10, now);
        table.learn(make_hops("ABD", 1), 2, now);
        table.learn(make_hops("ABE", 1), 2, now);

        let paths: Vec<String> = table
            .paths_to(&make_id('D'))
            .iter()
            .map(|info| info.path.to_string())
            .collect();
        assert_eq!(paths, vec!["A -> B -> D", "A -> C -> D"]);
    }

    #[test]
    fn test_capacity_evicts_oldest_learned() {
        let mut table = PathTable::new(2);
        let now = Instant::now();
        let abd = Path::from_hops(&make_hops("ABD", 1));
        table.learn(make_hops("ABD", 1), 2, now);
        table.learn(make_hops("ACD", 1), 2, now + Duration::from_secs(1));

        // Use and relearning do not change the eviction order
        table.record_use(&abd, now + Duration::from_secs(2));
        table.learn(make_hops("ABD", 2), 4, now + Duration::from_secs(2));

        table.learn(make_hops("AED", 1), 2, now + Duration::from_secs(3));
        assert_eq!(table.len(), 2);
        assert!(table.get(&abd).is_none());
        assert!(table.get(&Path::from_hops(&make_hops("ACD", 1))).is_some());
        assert!(table.get(&Path::from_hops(&make_hops("AED", 1))).is_some());

        table.clear();
        assert!(table.is_empty());
        table.learn(make_hops("ABD", 1), 2, now);
        table.learn(make_hops("ACD", 1), 2, now);
        assert_eq!(table.len(), 2);
    }
}
