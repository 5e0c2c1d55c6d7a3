//! The SRCR protocol engine
//!
//! [`SrcrEngine`] is a plain `&mut self` state machine owning every routing
//! table of one node. The host feeds it inbound frames with
//! [`handle_frame`](SrcrEngine::handle_frame), application payloads with
//! [`start_data`](SrcrEngine::start_data), delivery failures with
//! [`link_failure`](SrcrEngine::link_failure), and calls
//! [`forward_query_hook`](SrcrEngine::forward_query_hook) periodically
//! (see [`QueryFlushTimer`](crate::QueryFlushTimer)). Every outbound frame
//! leaves through the [`Transport`] collaborator.
//!
//! Hosts that deliver frames from several threads wrap the engine in a
//! single `Arc<parking_lot::Mutex<_>>` per node.

mod data;
mod query;
mod reply;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::{debug, instrument, trace, warn};

use srcr_core::{
    AddressResolver, Clock, Hop, LinkAddr, Metric, MetricOracle, NeighborSource, NodeAddr,
    NullTopology, Packet, PacketType, Path, SystemClock, TopologySink, Transport,
};

use crate::blacklist::BlackList;
use crate::cache::{PathCache, Selection, SwitchPolicy};
use crate::config::SrcrConfig;
use crate::error::{ConfigError, RoutingError, RoutingResult};
use crate::path_table::PathTable;
use crate::query::QueryTracker;
use crate::seen::SeenTable;
use crate::stats::EngineStats;

/// Why an inbound packet was not acted on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Frame failed to decode or names no sender
    Malformed,
    /// Immediate sender is blacklisted
    Blacklisted { neighbor: NodeAddr },
    /// Query already crossed this node, or originated here
    Loop,
    /// Link from the sender has metric 0
    UnusableMetric,
    /// Query crossed more than `max_hops` links
    HopLimit,
    /// Query copy no better than the one already held
    Duplicate,
    /// Query copy arrived after its flood was committed
    AlreadyForwarded,
    /// Frame is addressed to a different hop
    NotAddressed,
    /// Hop list does not end where the packet says it does
    InvalidRoute,
    /// Next hop is blacklisted; the route was invalidated
    NextHopBlacklisted { next_hop: NodeAddr },
    /// Link address of the next hop is not known yet
    NextHopUnresolved { next_hop: NodeAddr },
    /// Transport refused the frame
    SendFailed,
}

/// What the engine did with an inbound packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketOutcome {
    /// Query copy recorded, waiting for the flush
    QueryQueued {
        origin: NodeAddr,
        target: NodeAddr,
        seq: u32,
        /// A better copy replaced the stored one
        improved: bool,
    },
    /// First copy of a query addressed to this node, answered on arrival
    QueryAnswered {
        origin: NodeAddr,
        seq: u32,
        /// Whether the reply made it onto the link
        replied: bool,
    },
    /// Packet passed on along its source route
    Forwarded { kind: PacketType, next_hop: NodeAddr },
    /// Data reached its destination (this node)
    Delivered { source: NodeAddr, payload: Bytes },
    /// A reply for one of our queries arrived
    RouteLearned {
        destination: NodeAddr,
        metric: Option<Metric>,
        selection: Selection,
    },
    /// A link error for data we sent arrived
    LinkErrorReceived {
        destination: NodeAddr,
        failed: NodeAddr,
        /// Destinations whose cached path was removed
        invalidated: Vec<NodeAddr>,
    },
    Dropped(DropReason),
}

/// Summary of one [`SrcrEngine::forward_query_hook`] run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Queries flooded onward
    pub queries_forwarded: usize,
    /// Due records committed without sending (hop limit, blacklisted sender)
    pub suppressed: usize,
    /// Neighbor probed by exploration, if a probe went out
    pub explored: Option<NodeAddr>,
}

/// Read-only view of one Path Cache entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteSnapshot {
    pub destination: NodeAddr,
    pub path: Path,
    pub metric: Metric,
    pub use_count: u64,
    /// Time since the path was selected
    pub held_for: Duration,
    /// Wall-clock time the path was selected
    pub selected_at: DateTime<Utc>,
}

/// Builder for [`SrcrEngine`]
///
/// The metric oracle, transport and address resolver are required. The
/// topology sink and neighbor source default to [`NullTopology`], the
/// clock to [`SystemClock`].
pub struct SrcrEngineBuilder {
    local: NodeAddr,
    config: SrcrConfig,
    metric: Option<Arc<dyn MetricOracle>>,
    topology: Option<Arc<dyn TopologySink>>,
    neighbor_source: Option<Arc<dyn NeighborSource>>,
    transport: Option<Arc<dyn Transport>>,
    resolver: Option<Arc<dyn AddressResolver>>,
    clock: Option<Arc<dyn Clock>>,
    rng_seed: Option<u64>,
}

impl SrcrEngineBuilder {
    pub fn new(local: NodeAddr) -> Self {
        Self {
            local,
            config: SrcrConfig::default(),
            metric: None,
            topology: None,
            neighbor_source: None,
            transport: None,
            resolver: None,
            clock: None,
            rng_seed: None,
        }
    }

    pub fn config(mut self, config: SrcrConfig) -> Self {
        self.config = config;
        self
    }

    pub fn metric(mut self, metric: Arc<dyn MetricOracle>) -> Self {
        self.metric = Some(metric);
        self
    }

    pub fn topology(mut self, topology: Arc<dyn TopologySink>) -> Self {
        self.topology = Some(topology);
        self
    }

    pub fn neighbor_source(mut self, source: Arc<dyn NeighborSource>) -> Self {
        self.neighbor_source = Some(source);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn AddressResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Seed exploration's neighbor choice (for reproducible simulations)
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<SrcrEngine, ConfigError> {
        self.config.check()?;
        for warning in self.config.validate() {
            warn!(node = %self.local, %warning, "Questionable SRCR configuration");
        }

        let metric = self.metric.ok_or(ConfigError::MissingCollaborator("metric"))?;
        let transport = self
            .transport
            .ok_or(ConfigError::MissingCollaborator("transport"))?;
        let resolver = self
            .resolver
            .ok_or(ConfigError::MissingCollaborator("resolver"))?;
        let topology: Arc<dyn TopologySink> = match self.topology {
            Some(topology) => topology,
            None => Arc::new(NullTopology),
        };
        let neighbor_source: Arc<dyn NeighborSource> = match self.neighbor_source {
            Some(source) => source,
            None => Arc::new(NullTopology),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let rng = match self.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let config = self.config;
        Ok(SrcrEngine {
            local: self.local,
            seen: SeenTable::new(config.max_seen),
            queries: QueryTracker::new(),
            black_list: BlackList::new(config.black_list_timeout, config.max_black_list),
            paths: PathTable::new(config.max_paths),
            cache: PathCache::new(),
            neighbors: BTreeSet::new(),
            link_addrs: HashMap::new(),
            stats: EngineStats::default(),
            last_explore: None,
            config,
            metric,
            topology,
            neighbor_source,
            transport,
            resolver,
            clock,
            rng,
        })
    }
}

/// Routing engine for one mesh node
pub struct SrcrEngine {
    local: NodeAddr,
    config: SrcrConfig,

    metric: Arc<dyn MetricOracle>,
    topology: Arc<dyn TopologySink>,
    neighbor_source: Arc<dyn NeighborSource>,
    transport: Arc<dyn Transport>,
    resolver: Arc<dyn AddressResolver>,
    clock: Arc<dyn Clock>,

    seen: SeenTable,
    queries: QueryTracker,
    black_list: BlackList,
    paths: PathTable,
    cache: PathCache,
    /// One-hop neighbors heard directly
    neighbors: BTreeSet<NodeAddr>,
    link_addrs: HashMap<NodeAddr, LinkAddr>,

    stats: EngineStats,
    rng: StdRng,
    last_explore: Option<Instant>,
}

impl SrcrEngine {
    /// Start building an engine for the node at `local`
    pub fn builder(local: NodeAddr) -> SrcrEngineBuilder {
        SrcrEngineBuilder::new(local)
    }

    /// Decode and process one inbound frame
    ///
    /// `from` is the link-layer source of the frame. Malformed frames are
    /// counted and dropped.
    #[instrument(skip(self, frame), fields(node = %self.local, len = frame.len()))]
    pub fn handle_frame(&mut self, from: LinkAddr, frame: &[u8]) -> PacketOutcome {
        match Packet::decode(frame) {
            Ok(packet) => self.handle_packet(from, packet),
            Err(e) => {
                self.stats.malformed += 1;
                debug!(error = %e, "Dropping malformed frame");
                PacketOutcome::Dropped(DropReason::Malformed)
            }
        }
    }

    /// Process one already decoded packet
    pub fn handle_packet(&mut self, from: LinkAddr, packet: Packet) -> PacketOutcome {
        let Some(sender) = immediate_sender(&packet) else {
            self.stats.malformed += 1;
            debug!(kind = %packet.packet_type(), "Packet names no sender");
            return PacketOutcome::Dropped(DropReason::Malformed);
        };
        self.learn_neighbor(sender, from);

        let len = packet.encoded_len() as u64;
        let outcome = match packet {
            Packet::Query(query) => {
                self.stats.queries_received += 1;
                self.stats.query_bytes_received += len;
                self.process_query(query, sender)
            }
            Packet::Reply(reply) => {
                self.stats.replies_received += 1;
                self.stats.reply_bytes_received += len;
                self.process_reply(reply)
            }
            Packet::Data(data) => self.process_data(data, sender),
            Packet::LinkError(error) => {
                self.stats.link_errors_received += 1;
                self.process_link_error(error)
            }
        };

        if let PacketOutcome::Dropped(reason) = &outcome {
            self.stats.dropped += 1;
            trace!(sender = %sender, ?reason, "Packet dropped");
        }
        outcome
    }

    /// Address of this node
    pub fn local_addr(&self) -> NodeAddr {
        self.local
    }

    pub fn config(&self) -> &SrcrConfig {
        &self.config
    }

    /// Snapshot of the protocol counters
    pub fn stats(&self) -> EngineStats {
        self.stats.clone()
    }

    /// Currently selected path towards `destination`
    pub fn current_path(&self, destination: &NodeAddr) -> Option<&Path> {
        self.cache.get(destination).map(|c| &c.path)
    }

    /// Every Path Cache entry, sorted by destination
    pub fn path_cache_snapshot(&self) -> Vec<RouteSnapshot> {
        let now = self.clock.now();
        let now_utc = self.clock.now_utc();
        self.cache
            .entries()
            .into_iter()
            .map(|(destination, current)| {
                let held_for = now.saturating_duration_since(current.first_selected);
                let held = chrono::Duration::from_std(held_for).unwrap_or(chrono::Duration::zero());
                RouteSnapshot {
                    destination,
                    path: current.path.clone(),
                    metric: current.metric,
                    use_count: self.paths.get(&current.path).map_or(0, |p| p.use_count),
                    held_for,
                    selected_at: now_utc - held,
                }
            })
            .collect()
    }

    pub fn path_table(&self) -> &PathTable {
        &self.paths
    }

    pub fn seen_table(&self) -> &SeenTable {
        &self.seen
    }

    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }

    pub fn query_tracker(&self) -> &QueryTracker {
        &self.queries
    }

    pub fn black_list(&self) -> &BlackList {
        &self.black_list
    }

    /// Whether `neighbor` is currently blacklisted
    pub fn is_blacklisted(&self, neighbor: &NodeAddr) -> bool {
        self.black_list.is_bad(neighbor, self.clock.now())
    }

    /// One-hop neighbors heard so far
    pub fn neighbors(&self) -> Vec<NodeAddr> {
        self.neighbors.iter().copied().collect()
    }

    pub fn route_dampening(&self) -> bool {
        self.config.route_dampening
    }

    /// Toggle route dampening at runtime
    pub fn set_route_dampening(&mut self, enabled: bool) {
        debug!(node = %self.local, enabled, "Route dampening changed");
        self.config.route_dampening = enabled;
    }

    /// Drop all routing state
    ///
    /// Counters and the query sequence survive.
    pub fn clear(&mut self) {
        debug!(node = %self.local, "Clearing routing tables");
        self.seen.clear();
        self.queries.clear();
        self.black_list.clear();
        self.paths.clear();
        self.cache.clear();
        self.neighbors.clear();
        self.link_addrs.clear();
    }

    fn switch_policy(&self) -> SwitchPolicy {
        SwitchPolicy {
            route_dampening: self.config.route_dampening,
            time_before_switch: self.config.time_before_switch,
        }
    }

    fn learn_neighbor(&mut self, sender: NodeAddr, from: LinkAddr) {
        if sender == self.local {
            return;
        }
        if self.neighbors.insert(sender) {
            trace!(node = %self.local, neighbor = %sender, "New neighbor");
        }
        if !from.is_broadcast() {
            self.link_addrs.insert(sender, from);
        }
    }

    /// Metrics of the link `sender -> self`, as (forward, reverse)
    fn incoming_link_metrics(&self, sender: &NodeAddr) -> (Metric, Metric) {
        (
            self.metric.reverse_metric(sender),
            self.metric.forward_metric(sender),
        )
    }

    /// Report every link cost carried by a hop list
    fn record_links(&self, hops: &[Hop]) {
        for pair in hops.windows(2) {
            let (prev, hop) = (pair[0], pair[1]);
            if hop.fwd_metric != 0 {
                self.topology.record_link(prev.addr, hop.addr, hop.fwd_metric);
            }
            if hop.rev_metric != 0 {
                self.topology.record_link(hop.addr, prev.addr, hop.rev_metric);
            }
        }
    }

    fn link_addr_of(&mut self, node: NodeAddr) -> Option<LinkAddr> {
        if let Some(link) = self.link_addrs.get(&node) {
            return Some(*link);
        }
        let link = self.resolver.resolve(&node)?;
        self.link_addrs.insert(node, link);
        Some(link)
    }

    fn broadcast(&self, packet: &Packet) -> RoutingResult<u64> {
        let frame = packet.encode()?;
        let len = frame.len() as u64;
        self.transport.send_protocol_frame(LinkAddr::BROADCAST, frame)?;
        Ok(len)
    }

    fn unicast(&mut self, next_hop: NodeAddr, packet: &Packet) -> RoutingResult<u64> {
        let link = self
            .link_addr_of(next_hop)
            .ok_or(RoutingError::NextHopUnresolved { next_hop })?;
        let frame = packet.encode()?;
        let len = frame.len() as u64;
        match packet {
            Packet::Data(_) => self.transport.send_data_frame(link, frame)?,
            _ => self.transport.send_protocol_frame(link, frame)?,
        }
        Ok(len)
    }

    /// Turn the result of passing a packet on into an outcome
    fn forward_outcome(
        &mut self,
        result: RoutingResult<u64>,
        kind: PacketType,
        next_hop: NodeAddr,
    ) -> PacketOutcome {
        match result {
            Ok(len) => {
                match kind {
                    PacketType::Query => {
                        self.stats.queries_sent += 1;
                        self.stats.query_bytes_sent += len;
                    }
                    PacketType::Reply => {
                        self.stats.replies_sent += 1;
                        self.stats.reply_bytes_sent += len;
                    }
                    PacketType::Data => self.stats.data_forwarded += 1,
                    PacketType::LinkError => self.stats.link_errors_sent += 1,
                }
                trace!(node = %self.local, %kind, next_hop = %next_hop, "Forwarded");
                PacketOutcome::Forwarded { kind, next_hop }
            }
            Err(RoutingError::NextHopUnresolved { next_hop }) => {
                debug!(node = %self.local, %kind, next_hop = %next_hop, "Next hop unresolved");
                PacketOutcome::Dropped(DropReason::NextHopUnresolved { next_hop })
            }
            Err(e) => {
                warn!(node = %self.local, %kind, error = %e, "Forwarding failed");
                PacketOutcome::Dropped(DropReason::SendFailed)
            }
        }
    }
}

/// The neighbor a packet was received from, read off its hop list
fn immediate_sender(packet: &Packet) -> Option<NodeAddr> {
    match packet {
        Packet::Query(q) => q.last_hop(),
        Packet::Reply(r) => r.hops.get(r.cursor as usize + 1).map(|h| h.addr),
        Packet::LinkError(e) => e.hops.get(e.cursor as usize + 1).map(|h| h.addr),
        Packet::Data(d) => (d.cursor as usize)
            .checked_sub(1)
            .and_then(|i| d.hops.get(i))
            .map(|h| h.addr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use srcr_core::mock::{ManualClock, RecordingTransport, StaticMetric, StaticResolver};
    use srcr_core::{DataPacket, QueryPacket, ReplyPacket};

    fn make_id(c: char) -> NodeAddr {
        NodeAddr::from_letter(c).unwrap()
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let result = SrcrEngine::builder(make_id('A')).build();
        assert!(matches!(
            result,
            Err(ConfigError::MissingCollaborator("metric"))
        ));

        let result = SrcrEngine::builder(make_id('A'))
            .metric(Arc::new(StaticMetric::with_default(1)))
            .resolver(Arc::new(StaticResolver::new()))
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::MissingCollaborator("transport"))
        ));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = SrcrEngine::builder(make_id('A'))
            .config(SrcrConfig {
                max_paths: 0,
                ..Default::default()
            })
            .metric(Arc::new(StaticMetric::with_default(1)))
            .transport(Arc::new(RecordingTransport::new()))
            .resolver(Arc::new(StaticResolver::new()))
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue {
                field: "max_paths",
                ..
            })
        ));
    }

    #[test]
    fn test_immediate_sender() {
        let hops = vec![
            Hop::origin(make_id('A')),
            Hop::new(make_id('B'), 1, 1),
            Hop::new(make_id('C'), 1, 1),
        ];
        let query = Packet::Query(QueryPacket {
            seq: 1,
            origin: make_id('A'),
            target: make_id('D'),
            hops: hops.clone(),
        });
        assert_eq!(immediate_sender(&query), Some(make_id('C')));

        let reply = Packet::Reply(ReplyPacket {
            seq: 1,
            origin: make_id('A'),
            target: make_id('C'),
            hops: hops.clone(),
            cursor: 1,
        });
        assert_eq!(immediate_sender(&reply), Some(make_id('C')));

        let data = Packet::Data(DataPacket {
            source: make_id('A'),
            destination: make_id('C'),
            hops: hops.clone(),
            cursor: 0,
            payload: Bytes::new(),
        });
        assert_eq!(immediate_sender(&data), None);
    }

    #[test]
    fn test_malformed_frame_counted() {
        let clock = Arc::new(ManualClock::new());
        let mut engine = SrcrEngine::builder(make_id('A'))
            .metric(Arc::new(StaticMetric::with_default(1)))
            .transport(Arc::new(RecordingTransport::new()))
            .resolver(Arc::new(StaticResolver::new()))
            .clock(clock)
            .build()
            .unwrap();

        let outcome = engine.handle_frame(LinkAddr::BROADCAST, &[1, 2, 3]);
        assert_eq!(outcome, PacketOutcome::Dropped(DropReason::Malformed));
        assert_eq!(engine.stats().malformed, 1);
    }
}
