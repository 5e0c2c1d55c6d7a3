//! In-memory collaborators for testing
//!
//! Provides deterministic stand-ins for every external collaborator the
//! engine consumes, so routing logic can be exercised without radios or
//! real time.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use srcr_core::mock::{ManualClock, RecordingTransport, StaticMetric};
//!
//! let clock = Arc::new(ManualClock::new());
//! let transport = Arc::new(RecordingTransport::new());
//! let metric = Arc::new(StaticMetric::new());
//! metric.set(neighbor, 2, 2);
//!
//! // ... drive the engine ...
//! clock.advance(Duration::from_millis(150));
//! let frames = transport.take();
//! ```

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::addr::{LinkAddr, NodeAddr};
use crate::error::{TransportError, WireError};
use crate::path::Metric;
use crate::traits::{Clock, MetricOracle, NeighborSource, TopologySink};
use crate::transport::{AddressResolver, Transport};
use crate::wire::Packet;

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    base_utc: DateTime<Utc>,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            base_utc: Utc::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    /// Time elapsed since the clock was created
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        let offset = chrono::Duration::from_std(*self.offset.lock()).unwrap_or(chrono::Duration::MAX);
        self.base_utc + offset
    }
}

/// Which transport call produced a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Protocol,
    Data,
}

/// A frame captured by [`RecordingTransport`]
#[derive(Debug, Clone)]
pub struct SentFrame {
    pub dst: LinkAddr,
    pub kind: FrameKind,
    pub frame: Bytes,
}

impl SentFrame {
    /// Decode the captured frame
    pub fn decode(&self) -> Result<Packet, WireError> {
        Packet::decode(&self.frame)
    }
}

/// Transport that records every frame instead of sending it
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentFrame>>,
    fail_sends: Mutex<bool>,
}

impl RecordingTransport {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail (for error path tests)
    pub fn set_failing(&self, failing: bool) {
        *self.fail_sends.lock() = failing;
    }

    /// Drain all captured frames
    pub fn take(&self) -> Vec<SentFrame> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Drain and decode all captured frames, skipping any that fail to decode
    pub fn take_packets(&self) -> Vec<(LinkAddr, Packet)> {
        self.take()
            .into_iter()
            .filter_map(|f| f.decode().ok().map(|p| (f.dst, p)))
            .collect()
    }

    /// Number of frames captured and not yet drained
    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    /// Whether no frames are waiting
    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }

    fn record(&self, dst: LinkAddr, kind: FrameKind, frame: Bytes) -> Result<(), TransportError> {
        if *self.fail_sends.lock() {
            return Err(TransportError::SendFailed("recording transport set to fail".into()));
        }
        self.sent.lock().push(SentFrame { dst, kind, frame });
        Ok(())
    }
}

impl Transport for RecordingTransport {
    fn send_protocol_frame(&self, dst: LinkAddr, frame: Bytes) -> Result<(), TransportError> {
        self.record(dst, FrameKind::Protocol, frame)
    }

    fn send_data_frame(&self, dst: LinkAddr, frame: Bytes) -> Result<(), TransportError> {
        self.record(dst, FrameKind::Data, frame)
    }
}

/// Metric oracle backed by a table of per-neighbor costs
///
/// Unknown neighbors get the default metric (0, unusable, unless changed).
#[derive(Debug, Default)]
pub struct StaticMetric {
    metrics: RwLock<HashMap<NodeAddr, (Metric, Metric)>>,
    default: Metric,
}

impl StaticMetric {
    /// Create an oracle that rates unknown neighbors as unusable
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an oracle that rates unknown neighbors with `metric`
    pub fn with_default(metric: Metric) -> Self {
        Self {
            metrics: RwLock::new(HashMap::new()),
            default: metric,
        }
    }

    /// Set forward and reverse costs towards `neighbor`
    pub fn set(&self, neighbor: NodeAddr, fwd: Metric, rev: Metric) {
        self.metrics.write().insert(neighbor, (fwd, rev));
    }

    fn lookup(&self, neighbor: &NodeAddr) -> (Metric, Metric) {
        self.metrics
            .read()
            .get(neighbor)
            .copied()
            .unwrap_or((self.default, self.default))
    }
}

impl MetricOracle for StaticMetric {
    fn forward_metric(&self, neighbor: &NodeAddr) -> Metric {
        self.lookup(neighbor).0
    }

    fn reverse_metric(&self, neighbor: &NodeAddr) -> Metric {
        self.lookup(neighbor).1
    }
}

/// Link table that keeps every recorded link in memory
#[derive(Debug, Default)]
pub struct MemoryLinkTable {
    links: Mutex<HashMap<(NodeAddr, NodeAddr), Metric>>,
    neighbors: RwLock<Vec<NodeAddr>>,
}

impl MemoryLinkTable {
    /// Create an empty link table
    pub fn new() -> Self {
        Self::default()
    }

    /// Neighbors handed out by [`NeighborSource::random_neighbor`], in order
    pub fn set_neighbors(&self, neighbors: Vec<NodeAddr>) {
        *self.neighbors.write() = neighbors;
    }

    /// Stored cost of the directed link `from -> to`
    pub fn link(&self, from: NodeAddr, to: NodeAddr) -> Option<Metric> {
        self.links.lock().get(&(from, to)).copied()
    }

    /// Number of distinct links recorded
    pub fn link_count(&self) -> usize {
        self.links.lock().len()
    }
}

impl TopologySink for MemoryLinkTable {
    fn record_link(&self, from: NodeAddr, to: NodeAddr, metric: Metric) -> bool {
        self.links.lock().insert((from, to), metric) != Some(metric)
    }
}

impl NeighborSource for MemoryLinkTable {
    fn random_neighbor(&self) -> Option<NodeAddr> {
        // Deterministic: always the first configured neighbor
        self.neighbors.read().first().copied()
    }
}

/// Resolver with an explicit table and a set of addresses still pending
#[derive(Debug, Default)]
pub struct StaticResolver {
    pending: RwLock<HashSet<NodeAddr>>,
    overrides: RwLock<HashMap<NodeAddr, LinkAddr>>,
}

impl StaticResolver {
    /// Create a resolver that derives every address with [`LinkAddr::for_node`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `addr` as not yet resolvable
    pub fn set_pending(&self, addr: NodeAddr) {
        self.pending.write().insert(addr);
    }

    /// Resolve `addr` to a specific link address
    pub fn set(&self, addr: NodeAddr, link: LinkAddr) {
        self.pending.write().remove(&addr);
        self.overrides.write().insert(addr, link);
    }
}

impl AddressResolver for StaticResolver {
    fn resolve(&self, addr: &NodeAddr) -> Option<LinkAddr> {
        if self.pending.read().contains(addr) {
            return None;
        }
        Some(
            self.overrides
                .read()
                .get(addr)
                .copied()
                .unwrap_or_else(|| LinkAddr::for_node(*addr)),
        )
    }
}
