//! Source routes and per-hop link metrics

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::addr::NodeAddr;

/// Link metric: additive cost, lower is better, 0 means unusable
pub type Metric = u32;

/// One entry of a hop list
///
/// The metrics describe the link *leading to* this hop from the previous
/// one. The first hop of a list (the originator) carries zero metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hop {
    /// Node at this position of the route
    pub addr: NodeAddr,
    /// Cost of the previous hop -> this hop direction
    pub fwd_metric: Metric,
    /// Cost of the this hop -> previous hop direction
    pub rev_metric: Metric,
}

impl Hop {
    /// Create a hop with its incoming link metrics
    pub fn new(addr: NodeAddr, fwd_metric: Metric, rev_metric: Metric) -> Self {
        Self {
            addr,
            fwd_metric,
            rev_metric,
        }
    }

    /// The first hop of a route (no incoming link)
    pub fn origin(addr: NodeAddr) -> Self {
        Self::new(addr, 0, 0)
    }
}

/// Sum of forward link metrics along a hop list
///
/// Returns `None` if any link is unusable (metric 0). A single-hop list has
/// no links and a total of `Some(0)`.
pub fn forward_metric(hops: &[Hop]) -> Option<Metric> {
    hops.iter().skip(1).try_fold(0u32, |acc, hop| {
        if hop.fwd_metric == 0 {
            None
        } else {
            Some(acc.saturating_add(hop.fwd_metric))
        }
    })
}

/// Sum of reverse link metrics along a hop list, `None` if any link is unusable
pub fn reverse_metric(hops: &[Hop]) -> Option<Metric> {
    hops.iter().skip(1).try_fold(0u32, |acc, hop| {
        if hop.rev_metric == 0 {
            None
        } else {
            Some(acc.saturating_add(hop.rev_metric))
        }
    })
}

/// An ordered source route from an origin to a destination
///
/// Identity is the sequence of node addresses only, so the same route
/// learned twice with different metrics is the same `Path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Path(Vec<NodeAddr>);

impl Path {
    /// Create a path from its nodes, origin first
    pub fn new(nodes: Vec<NodeAddr>) -> Self {
        Self(nodes)
    }

    /// Build the path described by a hop list
    pub fn from_hops(hops: &[Hop]) -> Self {
        Self(hops.iter().map(|h| h.addr).collect())
    }

    /// Nodes along the path, origin first
    pub fn nodes(&self) -> &[NodeAddr] {
        &self.0
    }

    /// Number of nodes on the path
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the path has no nodes
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of links traversed
    pub fn hop_count(&self) -> usize {
        self.0.len().saturating_sub(1)
    }

    /// First node
    pub fn origin(&self) -> Option<NodeAddr> {
        self.0.first().copied()
    }

    /// Last node
    pub fn destination(&self) -> Option<NodeAddr> {
        self.0.last().copied()
    }

    /// The node following `node` on the path
    pub fn next_after(&self, node: NodeAddr) -> Option<NodeAddr> {
        let idx = self.0.iter().position(|n| *n == node)?;
        self.0.get(idx + 1).copied()
    }

    /// Whether the path passes through `node`
    pub fn contains(&self, node: &NodeAddr) -> bool {
        self.0.contains(node)
    }

    /// Whether the path traverses the directed link `from -> to`
    pub fn traverses(&self, from: NodeAddr, to: NodeAddr) -> bool {
        self.0.windows(2).any(|w| w[0] == from && w[1] == to)
    }

    /// The same path walked from the destination back to the origin
    pub fn reversed(&self) -> Self {
        let mut nodes = self.0.clone();
        nodes.reverse();
        Self(nodes)
    }
}

impl Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|n| n.short_id()).collect();
        write!(f, "{}", parts.join(" -> "))
    }
}
