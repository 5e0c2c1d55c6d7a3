//! Path Cache: the path currently selected per destination
//!
//! Data forwarding only ever consults this cache. [`PathCache::consider`]
//! implements route selection with switch hysteresis (route dampening):
//!
//! - A candidate with an unusable link is never selected.
//! - With no current entry the candidate is selected unconditionally.
//! - A candidate that is not strictly cheaper is rejected; ties never switch.
//! - A strictly cheaper candidate replaces the incumbent immediately when
//!   dampening is off. With dampening on, only once the incumbent has been
//!   selected for at least `time_before_switch`.
//!
//! Learning the incumbent path again refreshes its metric without touching
//! its selection time.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use srcr_core::{Metric, NodeAddr, Path};

/// Switch policy applied by [`PathCache::consider`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchPolicy {
    pub route_dampening: bool,
    pub time_before_switch: Duration,
}

/// Selected path for one destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentPath {
    pub path: Path,
    pub metric: Metric,
    /// When this path last replaced another (or was first selected)
    pub last_switch: Instant,
    /// When this path was selected; reset only by a switch
    pub first_selected: Instant,
}

/// Why a candidate path was not selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    /// Candidate crosses a link with metric 0
    Unusable,
    /// Candidate is not strictly cheaper than the incumbent
    NotBetter { current: Metric, candidate: Metric },
    /// Candidate is cheaper but the incumbent is still within its hold time
    Dampened { remaining: Duration },
}

/// Outcome of route selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// No previous entry; candidate selected
    Selected,
    /// Candidate replaced a worse incumbent
    Switched { previous: Path },
    /// Candidate is the incumbent; metric refreshed
    Refreshed,
    /// Incumbent kept
    Rejected(RejectReason),
}

impl Selection {
    /// Whether the cache now holds the candidate
    pub fn is_selected(&self) -> bool {
        !matches!(self, Selection::Rejected(_))
    }
}

/// Per-destination selected paths
#[derive(Debug, Default)]
pub struct PathCache {
    entries: HashMap<NodeAddr, CurrentPath>,
}

impl PathCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether `path` (total metric `metric`, `None` if unusable)
    /// becomes the selected path for `destination`
    pub fn consider(
        &mut self,
        destination: NodeAddr,
        path: Path,
        metric: Option<Metric>,
        now: Instant,
        policy: SwitchPolicy,
    ) -> Selection {
        let Some(metric) = metric.filter(|m| *m != 0 || path.hop_count() == 0) else {
            return Selection::Rejected(RejectReason::Unusable);
        };

        let Some(current) = self.entries.get_mut(&destination) else {
            self.entries.insert(
                destination,
                CurrentPath {
                    path,
                    metric,
                    last_switch: now,
                    first_selected: now,
                },
            );
            return Selection::Selected;
        };

        if current.path == path {
            current.metric = metric;
            return Selection::Refreshed;
        }

        if metric >= current.metric {
            return Selection::Rejected(RejectReason::NotBetter {
                current: current.metric,
                candidate: metric,
            });
        }

        if policy.route_dampening {
            let held = now.saturating_duration_since(current.first_selected);
            if held < policy.time_before_switch {
                return Selection::Rejected(RejectReason::Dampened {
                    remaining: policy.time_before_switch - held,
                });
            }
        }

        let previous = std::mem::replace(&mut current.path, path);
        current.metric = metric;
        current.last_switch = now;
        current.first_selected = now;
        Selection::Switched { previous }
    }

    pub fn get(&self, destination: &NodeAddr) -> Option<&CurrentPath> {
        self.entries.get(destination)
    }

    pub fn remove(&mut self, destination: &NodeAddr) -> Option<CurrentPath> {
        self.entries.remove(destination)
    }

    /// Remove every entry whose path passes through `node`
    ///
    /// Returns the destinations that lost their route.
    pub fn invalidate_node(&mut self, node: &NodeAddr) -> Vec<NodeAddr> {
        self.invalidate_where(|path| path.contains(node))
    }

    /// Remove every entry whose path crosses the directed link `from -> to`
    pub fn invalidate_link(&mut self, from: NodeAddr, to: NodeAddr) -> Vec<NodeAddr> {
        self.invalidate_where(|path| path.traverses(from, to))
    }

    /// Entries sorted by destination
    pub fn entries(&self) -> Vec<(NodeAddr, &CurrentPath)> {
        let mut all: Vec<_> = self.entries.iter().map(|(d, c)| (*d, c)).collect();
        all.sort_by_key(|(d, _)| *d);
        all
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

    fn invalidate_where(&mut self, pred: impl Fn(&Path) -> bool) -> Vec<NodeAddr> {
        let mut removed: Vec<NodeAddr> = self
            .entries
            .iter()
            .filter(|(_, current)| pred(&current.path))
            .map(|(dest, _)| *dest)
            .collect();
        removed.sort();
        for dest in &removed {
            self.entries.remove(dest);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOLD: Duration = Duration::from_secs(10);

    fn make_id(c: char) -> NodeAddr {
        NodeAddr::from_letter(c).unwrap()
    }

    fn make_path(chars: &str) -> Path {
        Path::new(chars.chars().map(make_id).collect())
    }

    fn dampened() -> SwitchPolicy {
        SwitchPolicy {
            route_dampening: true,
            time_before_switch: HOLD,
        }
    }

    fn undampened() -> SwitchPolicy {
        SwitchPolicy {
            route_dampening: false,
            time_before_switch: HOLD,
        }
    }

    #[test]
    fn test_first_path_selected() {
        let mut cache = PathCache::new();
        let now = Instant::now();
        let d = make_id('D');

        let selection = cache.consider(d, make_path("ACD"), Some(5), now, dampened());
        assert_eq!(selection, Selection::Selected);
        let current = cache.get(&d).unwrap();
        assert_eq!(current.first_selected, now);
        assert_eq!(current.last_switch, now);
    }

    #[test]
    fn test_unusable_never_selected() {
        let mut cache = PathCache::new();
        let now = Instant::now();
        let selection = cache.consider(make_id('D'), make_path("ABD"), None, now, dampened());
        assert_eq!(selection, Selection::Rejected(RejectReason::Unusable));
        assert!(cache.is_empty());

        let selection = cache.consider(make_id('D'), make_path("ABD"), Some(0), now, dampened());
        assert!(!selection.is_selected());
    }

    #[test]
    fn test_tie_never_switches() {
        let mut cache = PathCache::new();
        let now = Instant::now();
        let d = make_id('D');
        cache.consider(d, make_path("ACD"), Some(5), now, undampened());

        let selection = cache.consider(d, make_path("ABD"), Some(5), now, undampened());
        assert_eq!(
            selection,
            Selection::Rejected(RejectReason::NotBetter {
                current: 5,
                candidate: 5
            })
        );
        assert_eq!(cache.get(&d).unwrap().path, make_path("ACD"));
    }

    #[test]
    fn test_undampened_switches_immediately() {
        let mut cache = PathCache::new();
        let now = Instant::now();
        let d = make_id('D');
        cache.consider(d, make_path("ACD"), Some(5), now, undampened());

        let later = now + Duration::from_secs(1);
        let selection = cache.consider(d, make_path("ABD"), Some(3), later, undampened());
        assert_eq!(
            selection,
            Selection::Switched {
                previous: make_path("ACD")
            }
        );
        let current = cache.get(&d).unwrap();
        assert_eq!(current.first_selected, later);
        assert_eq!(current.last_switch, later);
    }

    #[test]
    fn test_dampening_holds_then_switches() {
        let mut cache = PathCache::new();
        let now = Instant::now();
        let d = make_id('D');
        cache.consider(d, make_path("ACD"), Some(5), now, dampened());

        let early = now + Duration::from_secs(4);
        let selection = cache.consider(d, make_path("ABD"), Some(3), early, dampened());
        assert_eq!(
            selection,
            Selection::Rejected(RejectReason::Dampened {
                remaining: Duration::from_secs(6)
            })
        );
        assert_eq!(cache.get(&d).unwrap().path, make_path("ACD"));

        let late = now + HOLD;
        let selection = cache.consider(d, make_path("ABD"), Some(3), late, dampened());
        assert!(matches!(selection, Selection::Switched { .. }));
        assert_eq!(cache.get(&d).unwrap().first_selected, late);
    }

    #[test]
    fn test_relearning_incumbent_keeps_selection_time() {
        let mut cache = PathCache::new();
        let now = Instant::now();
        let d = make_id('D');
        cache.consider(d, make_path("ACD"), Some(5), now, dampened());

        let later = now + Duration::from_secs(3);
        let selection = cache.consider(d, make_path("ACD"), Some(7), later, dampened());
        assert_eq!(selection, Selection::Refreshed);
        let current = cache.get(&d).unwrap();
        assert_eq!(current.metric, 7);
        assert_eq!(current.first_selected, now);
    }

    #[test]
    fn test_invalidate_node_and_link() {
        let mut cache = PathCache::new();
        let now = Instant::now();
        cache.consider(make_id('D'), make_path("ABD"), Some(2), now, dampened());
        cache.consider(make_id('E'), make_path("ABCE"), Some(3), now, dampened());
        cache.consider(make_id('F'), make_path("ACF"), Some(2), now, dampened());

        assert_eq!(cache.invalidate_link(make_id('B'), make_id('C')), vec![make_id('E')]);
        assert_eq!(cache.invalidate_node(&make_id('B')), vec![make_id('D')]);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&make_id('F')).is_some());
    }
}
