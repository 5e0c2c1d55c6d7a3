//! Discrete-time simulation of an SRCR mesh
//!
//! Every node runs a real [`SrcrEngine`] wired to the shared [`Air`], a
//! [`MeshMetric`] oracle and one [`ManualClock`]. A step:
//! 1. Advances the clock by one tick
//! 2. Takes every frame and transmit failure produced by the previous step
//! 3. Feeds them to each node's engine, then runs its query flush
//!
//! Frames sent during a step are only heard in the next one, so a packet
//! moves one hop per tick and runs are fully reproducible.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use srcr_core::mock::{ManualClock, MemoryLinkTable};
use srcr_core::{DerivedResolver, Metric, NodeAddr, Path};
use srcr_logging::NodeContextGuard;
use srcr_routing::{EngineStats, PacketOutcome, RouteSnapshot, SrcrConfig, SrcrEngine};

use crate::air::{Air, AirStats, AirTransport, DEFAULT_MTU};
use crate::error::{SimError, SimResult};
use crate::topology::{Mesh, MeshMetric, SharedMesh};

/// Configuration for the simulation
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Engine configuration shared by every node
    pub srcr: SrcrConfig,
    /// Simulated time per step
    pub tick: Duration,
    /// Seed for the engines' exploration choices
    pub seed: u64,
    /// Largest frame the air carries
    pub mtu: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            srcr: SrcrConfig::default(),
            tick: Duration::from_millis(10),
            seed: 0,
            mtu: DEFAULT_MTU,
        }
    }
}

/// Something a node's engine reported during a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SimEvent {
    Delivered {
        tick: u64,
        at: NodeAddr,
        source: NodeAddr,
        len: usize,
    },
    RouteLearned {
        tick: u64,
        at: NodeAddr,
        destination: NodeAddr,
        path: Option<Path>,
        metric: Option<Metric>,
    },
    LinkError {
        tick: u64,
        at: NodeAddr,
        destination: NodeAddr,
        failed: NodeAddr,
        invalidated: usize,
    },
    DeliveryFailed {
        tick: u64,
        at: NodeAddr,
        neighbor: NodeAddr,
    },
}

/// Simulation statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimStats {
    pub ticks: u64,
    pub frames_processed: u64,
    pub payloads_sent: u64,
    pub payloads_delivered: u64,
    pub send_retries: u64,
    pub queries_flushed: u64,
    pub replies_sent: u64,
}

/// Per-node part of a [`SimReport`]
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub stats: EngineStats,
    pub routes: Vec<RouteSnapshot>,
    /// Directed links this node learned a cost for
    pub learned_links: usize,
    pub blacklisted: Vec<NodeAddr>,
}

/// Summary of a simulation run
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub ticks: u64,
    pub elapsed: Duration,
    pub sim: SimStats,
    pub air: AirStats,
    pub nodes: BTreeMap<String, NodeReport>,
}

struct SimNode {
    engine: SrcrEngine,
    links: Arc<MemoryLinkTable>,
    instance_id: Uuid,
}

/// The simulation state
pub struct Simulation {
    mesh: SharedMesh,
    air: Arc<Air>,
    clock: Arc<ManualClock>,
    nodes: BTreeMap<NodeAddr, SimNode>,
    config: SimConfig,
    tick: u64,
    events: Vec<SimEvent>,
    stats: SimStats,
}

impl Simulation {
    /// Create a simulation with one engine per mesh node
    pub fn new(mesh: Mesh, config: SimConfig) -> SimResult<Self> {
        let mesh = mesh.into_shared();
        let air = Arc::new(Air::new(mesh.clone(), config.mtu));
        let clock = Arc::new(ManualClock::new());

        let mut nodes = BTreeMap::new();
        let ids = mesh.read().node_ids();
        for (i, node) in ids.into_iter().enumerate() {
            let links = Arc::new(MemoryLinkTable::new());
            links.set_neighbors(mesh.read().reachable_neighbors(node));
            let engine = SrcrEngine::builder(node)
                .config(config.srcr.clone())
                .metric(Arc::new(MeshMetric::new(node, mesh.clone())))
                .topology(links.clone())
                .neighbor_source(links.clone())
                .transport(Arc::new(AirTransport::new(node, air.clone())))
                .resolver(Arc::new(DerivedResolver))
                .clock(clock.clone())
                .rng_seed(config.seed.wrapping_add(i as u64))
                .build()?;
            nodes.insert(
                node,
                SimNode {
                    engine,
                    links,
                    instance_id: Uuid::new_v4(),
                },
            );
        }

        info!(
            nodes = nodes.len(),
            tick_ms = config.tick.as_millis() as u64,
            "Simulation created"
        );
        Ok(Self {
            mesh,
            air,
            clock,
            nodes,
            config,
            tick: 0,
            events: Vec::new(),
            stats: SimStats::default(),
        })
    }

    /// Run a single simulation tick
    pub fn step(&mut self) {
        self.tick += 1;
        self.stats.ticks += 1;
        self.clock.advance(self.config.tick);
        trace!(tick = self.tick, "Step");

        // Everything queued by the previous step, before anyone transmits again
        let inbound: Vec<_> = self
            .nodes
            .keys()
            .map(|n| (*n, self.air.drain_failures(n), self.air.drain_inbox(n)))
            .collect();

        for (addr, failures, frames) in inbound {
            let Some(node) = self.nodes.get_mut(&addr) else {
                continue;
            };
            let _ctx = NodeContextGuard::with_instance_id(addr, node.instance_id);

            for frame in failures {
                match node.engine.delivery_failed(&frame) {
                    Ok(Some(neighbor)) => self.events.push(SimEvent::DeliveryFailed {
                        tick: self.tick,
                        at: addr,
                        neighbor,
                    }),
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Undecodable transmit failure"),
                }
            }

            for inbound in frames {
                self.stats.frames_processed += 1;
                let outcome = node.engine.handle_frame(inbound.from, &inbound.frame);
                if matches!(outcome, PacketOutcome::QueryAnswered { replied: true, .. }) {
                    self.stats.replies_sent += 1;
                }
                if let Some(event) = event_for(self.tick, &node.engine, outcome) {
                    if matches!(event, SimEvent::Delivered { .. }) {
                        self.stats.payloads_delivered += 1;
                    }
                    self.events.push(event);
                }
            }

            let report = node.engine.forward_query_hook();
            self.stats.queries_flushed += report.queries_forwarded as u64;
        }
    }

    /// Run for a specific number of ticks
    pub fn run_ticks(&mut self, ticks: u64) {
        for _ in 0..ticks {
            self.step();
        }
    }

    /// Step until the air is quiet, at most `max_ticks` times
    ///
    /// Returns the number of steps taken.
    pub fn run_until_idle(&mut self, max_ticks: u64) -> u64 {
        for taken in 0..max_ticks {
            let waiting = self
                .nodes
                .values()
                .any(|n| n.engine.seen_table().iter().any(|r| !r.forwarded));
            if self.air.pending() == 0 && !waiting {
                return taken;
            }
            self.step();
        }
        max_ticks
    }

    /// Hand `payload` to the engine at `from` once, without retrying
    pub fn send(&mut self, from: NodeAddr, to: NodeAddr, payload: Bytes) -> SimResult<NodeAddr> {
        let tick = self.tick;
        let node = self.nodes.get_mut(&from).ok_or(SimError::UnknownNode(from))?;
        if !self.mesh.read().contains(&to) {
            return Err(SimError::UnknownNode(to));
        }
        let _ctx = NodeContextGuard::with_instance_id(from, node.instance_id);
        let next_hop = node.engine.start_data(to, payload)?;
        self.stats.payloads_sent += 1;
        debug!(tick, from = %from, to = %to, next_hop = %next_hop, "Payload sent");
        Ok(next_hop)
    }

    /// Deliver `payload` from `from` to `to`, retrying like an application would
    ///
    /// The payload is (re)sent whenever the source has no copy in flight:
    /// before the first route is known, and again after the route it went
    /// out on is invalidated. Returns the ticks until delivery, or `None`
    /// if it did not arrive within `max_ticks`.
    pub fn deliver(
        &mut self,
        from: NodeAddr,
        to: NodeAddr,
        payload: Bytes,
        max_ticks: u64,
    ) -> SimResult<Option<u64>> {
        let start_tick = self.tick;
        let mut checked = self.events.len();
        let mut in_flight = false;

        for _ in 0..max_ticks {
            let route_lost = in_flight && self.current_path(from, to).is_none();
            if !in_flight || route_lost {
                if route_lost {
                    self.stats.send_retries += 1;
                    debug!(from = %from, to = %to, "Route lost, resending");
                }
                match self.send(from, to, payload.clone()) {
                    Ok(_) => in_flight = true,
                    Err(SimError::Routing(e)) if e.is_retryable() => in_flight = false,
                    Err(e) => return Err(e),
                }
            }

            self.step();

            let arrived = self.events[checked..].iter().any(|e| {
                matches!(e, SimEvent::Delivered { at, source, .. } if *at == to && *source == from)
            });
            checked = self.events.len();
            if arrived {
                let ticks = self.tick - start_tick;
                info!(from = %from, to = %to, ticks, "Payload delivered");
                return Ok(Some(ticks));
            }
        }

        warn!(from = %from, to = %to, max_ticks, "Payload not delivered");
        Ok(None)
    }

    /// Take the link between `a` and `b` down
    pub fn fail_link(&mut self, a: NodeAddr, b: NodeAddr) -> bool {
        let changed = self.mesh.write().set_link_up(a, b, false);
        self.refresh_neighbors();
        changed
    }

    /// Bring the link between `a` and `b` back up
    pub fn restore_link(&mut self, a: NodeAddr, b: NodeAddr) -> bool {
        let changed = self.mesh.write().set_link_up(a, b, true);
        self.refresh_neighbors();
        changed
    }

    fn refresh_neighbors(&self) {
        let mesh = self.mesh.read();
        for (addr, node) in &self.nodes {
            node.links.set_neighbors(mesh.reachable_neighbors(*addr));
        }
    }

    pub fn engine(&self, node: &NodeAddr) -> Option<&SrcrEngine> {
        self.nodes.get(node).map(|n| &n.engine)
    }

    pub fn engine_mut(&mut self, node: &NodeAddr) -> Option<&mut SrcrEngine> {
        self.nodes.get_mut(node).map(|n| &mut n.engine)
    }

    /// Path `from` currently uses towards `to`
    pub fn current_path(&self, from: NodeAddr, to: NodeAddr) -> Option<Path> {
        self.engine(&from)?.current_path(&to).cloned()
    }

    pub fn mesh(&self) -> &SharedMesh {
        &self.mesh
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Simulated time since the start
    pub fn elapsed(&self) -> Duration {
        self.clock.elapsed()
    }

    pub fn events(&self) -> &[SimEvent] {
        &self.events
    }

    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    pub fn air_stats(&self) -> AirStats {
        self.air.stats()
    }

    /// Snapshot of every node's counters and routes
    pub fn report(&self) -> SimReport {
        let now = self.clock.elapsed();
        let nodes = self
            .nodes
            .iter()
            .map(|(addr, node)| {
                let blacklisted = node
                    .engine
                    .neighbors()
                    .into_iter()
                    .filter(|n| node.engine.is_blacklisted(n))
                    .collect();
                let report = NodeReport {
                    stats: node.engine.stats(),
                    routes: node.engine.path_cache_snapshot(),
                    learned_links: node.links.link_count(),
                    blacklisted,
                };
                (addr.short_id(), report)
            })
            .collect();

        SimReport {
            ticks: self.tick,
            elapsed: now,
            sim: self.stats.clone(),
            air: self.air.stats(),
            nodes,
        }
    }

    /// One line per node: neighbors, routes and blacklist size
    pub fn state_summary(&self) -> String {
        let now = srcr_core::Clock::now(self.clock.as_ref());
        let mut out = format!("Tick {} ({:?})\n", self.tick, self.clock.elapsed());
        for (addr, node) in &self.nodes {
            let routes: Vec<String> = node
                .engine
                .path_cache_snapshot()
                .into_iter()
                .map(|r| format!("{}:[{}] m={}", r.destination.short_id(), r.path, r.metric))
                .collect();
            out.push_str(&format!(
                "  {} neighbors={} routes={{{}}} blacklisted={}\n",
                addr.short_id(),
                node.engine.neighbors().len(),
                routes.join(", "),
                node.engine.black_list().active(now).len(),
            ));
        }
        out
    }
}

/// The event worth recording for a packet outcome, if any
fn event_for(tick: u64, engine: &SrcrEngine, outcome: PacketOutcome) -> Option<SimEvent> {
    let at = engine.local_addr();
    match outcome {
        PacketOutcome::Delivered { source, payload } => Some(SimEvent::Delivered {
            tick,
            at,
            source,
            len: payload.len(),
        }),
        PacketOutcome::RouteLearned {
            destination,
            metric,
            selection,
        } if selection.is_selected() => Some(SimEvent::RouteLearned {
            tick,
            at,
            destination,
            path: engine.current_path(&destination).cloned(),
            metric,
        }),
        PacketOutcome::LinkErrorReceived {
            destination,
            failed,
            invalidated,
        } => Some(SimEvent::LinkError {
            tick,
            at,
            destination,
            failed,
            invalidated: invalidated.len(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::MeshBuilder;

    fn make_id(c: char) -> NodeAddr {
        NodeAddr::from_letter(c).unwrap()
    }

    #[test]
    fn test_step_moves_one_hop() {
        let mesh = MeshBuilder::new(3).unwrap().line();
        let mut sim = Simulation::new(mesh, SimConfig::default()).unwrap();

        // Discovery goes out immediately, nobody has processed it yet
        assert!(sim.send(make_id('A'), make_id('C'), Bytes::from_static(b"x")).is_err());
        assert_eq!(sim.air_stats().broadcasts, 1);

        sim.step();
        assert_eq!(sim.engine(&make_id('B')).unwrap().seen_len(), 1);
        assert_eq!(sim.engine(&make_id('C')).unwrap().seen_len(), 0);
        assert_eq!(sim.elapsed(), Duration::from_millis(10));
    }

    #[test]
    fn test_deliver_on_line() {
        let mesh = MeshBuilder::new(4).unwrap().line();
        let mut sim = Simulation::new(mesh, SimConfig::default()).unwrap();

        let ticks = sim
            .deliver(make_id('A'), make_id('D'), Bytes::from_static(b"hi"), 300)
            .unwrap();
        assert!(ticks.is_some());

        let path = sim.current_path(make_id('A'), make_id('D')).unwrap();
        assert_eq!(path.to_string(), "A -> B -> C -> D");
        assert_eq!(sim.stats().payloads_delivered, 1);
        assert!(sim.events().iter().any(|e| matches!(
            e,
            SimEvent::RouteLearned { at, metric: Some(3), .. } if *at == make_id('A')
        )));
    }

    #[test]
    fn test_unknown_node_rejected() {
        let mesh = MeshBuilder::new(2).unwrap().line();
        let mut sim = Simulation::new(mesh, SimConfig::default()).unwrap();
        let result = sim.send(make_id('Z'), make_id('A'), Bytes::new());
        assert!(matches!(result, Err(SimError::UnknownNode(_))));
        let result = sim.send(make_id('A'), make_id('Y'), Bytes::new());
        assert!(matches!(result, Err(SimError::UnknownNode(_))));
    }

    #[test]
    fn test_invalid_engine_config_rejected() {
        let config = SimConfig {
            srcr: SrcrConfig {
                max_seen: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let result = Simulation::new(MeshBuilder::diamond(), config);
        assert!(matches!(result, Err(SimError::Config(_))));
    }

    #[test]
    fn test_report_serializes() {
        let mut sim = Simulation::new(MeshBuilder::diamond(), SimConfig::default()).unwrap();
        sim.deliver(make_id('A'), make_id('D'), Bytes::from_static(b"r"), 200)
            .unwrap();

        let report = sim.report();
        assert_eq!(report.nodes.len(), 4);
        assert_eq!(report.nodes["A"].routes.len(), 1);
        assert!(report.nodes["D"].stats.data_delivered >= 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["nodes"]["A"]["routes"][0]["metric"], 3);
        assert!(json["air"]["frames_sent"].as_u64().unwrap() > 0);
    }
}
