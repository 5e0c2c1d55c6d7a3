//! Core collaborator traits for SRCR
//!
//! The routing engine owns no knowledge of radios, link-quality estimation,
//! or wall-clock time. It asks these traits instead, which lets tests and
//! the simulator drive it deterministically.
//!
//! ## Key Traits
//!
//! - [`MetricOracle`]: Link cost towards a neighbor
//! - [`TopologySink`]: Informational sink for observed link costs
//! - [`NeighborSource`]: Random neighbor for exploration probes
//! - [`Clock`]: Time abstraction for testability

use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::addr::NodeAddr;
use crate::path::Metric;

/// Per-link quality estimator
///
/// Metrics are additive costs where lower is better. A metric of `0` means
/// the link is unusable and must never be selected.
pub trait MetricOracle: Send + Sync {
    /// Cost of sending from this node to `neighbor`
    fn forward_metric(&self, neighbor: &NodeAddr) -> Metric;

    /// Cost of `neighbor` sending to this node
    fn reverse_metric(&self, neighbor: &NodeAddr) -> Metric;
}

/// Sink for observed link costs
///
/// The engine reports every link it learns a metric for. The sink is never
/// queried back by the engine.
pub trait TopologySink: Send + Sync {
    /// Record the cost of the directed link `from -> to`
    ///
    /// Returns `true` if the stored value changed.
    fn record_link(&self, from: NodeAddr, to: NodeAddr, metric: Metric) -> bool;
}

/// Source of neighbors for opportunistic exploration
pub trait NeighborSource: Send + Sync {
    /// A random one-hop neighbor, if any is known
    fn random_neighbor(&self) -> Option<NodeAddr>;
}

/// Time abstraction for testability
///
/// This trait allows tests to control time, enabling deterministic
/// testing of aggregation windows, hysteresis and blacklist expiry.
pub trait Clock: Send + Sync {
    /// Get the current instant (monotonic time)
    fn now(&self) -> Instant;

    /// Get the current UTC datetime
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Real clock implementation using system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Metric oracle that rates every neighbor the same
///
/// Reduces the protocol to minimum hop count routing.
#[derive(Debug, Clone, Copy)]
pub struct HopCountMetric;

impl MetricOracle for HopCountMetric {
    fn forward_metric(&self, _neighbor: &NodeAddr) -> Metric {
        1
    }

    fn reverse_metric(&self, _neighbor: &NodeAddr) -> Metric {
        1
    }
}

/// Topology sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTopology;

impl TopologySink for NullTopology {
    fn record_link(&self, _from: NodeAddr, _to: NodeAddr, _metric: Metric) -> bool {
        false
    }
}

impl NeighborSource for NullTopology {
    fn random_neighbor(&self) -> Option<NodeAddr> {
        None
    }
}
