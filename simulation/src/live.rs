//! Timer-driven mesh on the tokio runtime
//!
//! Where [`Simulation`](crate::Simulation) steps every engine by hand,
//! [`LiveMesh`] runs them the way a host would: each engine sits behind an
//! `Arc<Mutex<_>>`, a [`QueryFlushTimer`] flushes its queries in the
//! background, and a pump loop moves frames off the air on a fixed period.
//! Time comes from tokio, so tests can run it under a paused clock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use srcr_core::{Clock, DerivedResolver, NodeAddr, Path};
use srcr_logging::NodeContextGuard;
use srcr_routing::{EngineStats, PacketOutcome, QueryFlushTimer, SrcrConfig, SrcrEngine};

use crate::air::{Air, AirStats, AirTransport, DEFAULT_MTU};
use crate::error::{SimError, SimResult};
use crate::topology::{Mesh, MeshMetric, SharedMesh};

/// Clock backed by tokio's (pausable) time source
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct LiveNode {
    engine: Arc<Mutex<SrcrEngine>>,
    timer: QueryFlushTimer,
}

/// A delivered payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub source: NodeAddr,
    pub destination: NodeAddr,
    pub payload: Bytes,
}

/// Mesh of engines driven by tokio timers
pub struct LiveMesh {
    mesh: SharedMesh,
    air: Arc<Air>,
    nodes: BTreeMap<NodeAddr, LiveNode>,
    pump_period: Duration,
    delivered: Vec<Delivery>,
}

impl LiveMesh {
    /// Build one engine per node and start their flush timers
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(mesh: Mesh, config: SrcrConfig, pump_period: Duration) -> SimResult<Self> {
        let mesh = mesh.into_shared();
        let air = Arc::new(Air::new(mesh.clone(), DEFAULT_MTU));

        let mut nodes = BTreeMap::new();
        let ids = mesh.read().node_ids();
        for node in ids {
            let engine = SrcrEngine::builder(node)
                .config(config.clone())
                .metric(Arc::new(MeshMetric::new(node, mesh.clone())))
                .transport(Arc::new(AirTransport::new(node, air.clone())))
                .resolver(Arc::new(DerivedResolver))
                .clock(Arc::new(TokioClock))
                .build()?;
            let engine = Arc::new(Mutex::new(engine));
            let timer = QueryFlushTimer::spawn(engine.clone());
            nodes.insert(node, LiveNode { engine, timer });
        }
        info!(nodes = nodes.len(), "Live mesh started");

        Ok(Self {
            mesh,
            air,
            nodes,
            pump_period,
            delivered: Vec::new(),
        })
    }

    /// Hand every frame on the air to its receiver
    ///
    /// Returns the number of frames processed.
    pub fn pump(&mut self) -> usize {
        let mut processed = 0;
        for (addr, node) in &self.nodes {
            let failures = self.air.drain_failures(addr);
            let frames = self.air.drain_inbox(addr);
            if failures.is_empty() && frames.is_empty() {
                continue;
            }
            let _ctx = NodeContextGuard::new(*addr);
            let mut engine = node.engine.lock();

            for frame in failures {
                if let Err(e) = engine.delivery_failed(&frame) {
                    warn!(error = %e, "Undecodable transmit failure");
                }
            }
            for inbound in frames {
                processed += 1;
                if let PacketOutcome::Delivered { source, payload } =
                    engine.handle_frame(inbound.from, &inbound.frame)
                {
                    self.delivered.push(Delivery {
                        source,
                        destination: *addr,
                        payload,
                    });
                }
            }
        }
        processed
    }

    /// Deliver `payload`, resending while no copy is in flight
    ///
    /// Returns the time until delivery, or `None` after `timeout`.
    pub async fn deliver(
        &mut self,
        from: NodeAddr,
        to: NodeAddr,
        payload: Bytes,
        timeout: Duration,
    ) -> SimResult<Option<Duration>> {
        let engine = self
            .nodes
            .get(&from)
            .map(|n| n.engine.clone())
            .ok_or(SimError::UnknownNode(from))?;
        if !self.nodes.contains_key(&to) {
            return Err(SimError::UnknownNode(to));
        }

        let started = tokio::time::Instant::now();
        let mut checked = self.delivered.len();
        let mut in_flight = false;
        let mut interval = tokio::time::interval(self.pump_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while started.elapsed() < timeout {
            interval.tick().await;

            {
                let mut engine = engine.lock();
                let route_lost = in_flight && engine.current_path(&to).is_none();
                if !in_flight || route_lost {
                    match engine.start_data(to, payload.clone()) {
                        Ok(next_hop) => {
                            debug!(from = %from, to = %to, next_hop = %next_hop, "Payload sent");
                            in_flight = true;
                        }
                        Err(e) if e.is_retryable() => in_flight = false,
                        Err(e) => return Err(e.into()),
                    }
                }
            }

            self.pump();
            let arrived = self.delivered[checked..]
                .iter()
                .any(|d| d.source == from && d.destination == to);
            checked = self.delivered.len();
            if arrived {
                return Ok(Some(started.elapsed()));
            }
        }
        Ok(None)
    }

    /// Take the link between `a` and `b` down
    pub fn fail_link(&self, a: NodeAddr, b: NodeAddr) -> bool {
        self.mesh.write().set_link_up(a, b, false)
    }

    pub fn current_path(&self, from: NodeAddr, to: NodeAddr) -> Option<Path> {
        self.nodes.get(&from)?.engine.lock().current_path(&to).cloned()
    }

    pub fn delivered(&self) -> &[Delivery] {
        &self.delivered
    }

    pub fn stats(&self) -> BTreeMap<String, EngineStats> {
        self.nodes
            .iter()
            .map(|(addr, node)| (addr.short_id(), node.engine.lock().stats()))
            .collect()
    }

    pub fn air_stats(&self) -> AirStats {
        self.air.stats()
    }

    /// Stop every flush timer
    pub async fn shutdown(self) {
        for (_, node) in self.nodes {
            node.timer.shutdown().await;
        }
        debug!("Live mesh stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::MeshBuilder;

    fn make_id(c: char) -> NodeAddr {
        NodeAddr::from_letter(c).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_diamond_delivers_over_two_hops() {
        let mut live = LiveMesh::start(
            MeshBuilder::diamond(),
            SrcrConfig::default(),
            Duration::from_millis(10),
        )
        .unwrap();

        let took = live
            .deliver(make_id('A'), make_id('D'), Bytes::from_static(b"live"), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(took.is_some());

        // Either branch may answer first, depending on which flush task runs first
        let path = live.current_path(make_id('A'), make_id('D')).unwrap();
        assert_eq!(path.hop_count(), 2);
        assert_eq!(live.stats()["D"].replies_sent, 1);
        assert_eq!(live.delivered()[0].payload, Bytes::from_static(b"live"));
        assert_eq!(live.stats()["D"].data_delivered, 1);

        live.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_unreachable_times_out() {
        let mut mesh = MeshBuilder::new(2).unwrap().line();
        mesh.add_node(make_id('C'));
        let mut live =
            LiveMesh::start(mesh, SrcrConfig::default(), Duration::from_millis(10)).unwrap();

        let took = live
            .deliver(make_id('A'), make_id('C'), Bytes::new(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(took.is_none());
        assert!(live.delivered().is_empty());

        live.shutdown().await;
    }

    #[test]
    fn test_tokio_clock_follows_paused_time() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        runtime.block_on(async {
            let before = TokioClock.now();
            tokio::time::advance(Duration::from_millis(250)).await;
            assert_eq!(TokioClock.now() - before, Duration::from_millis(250));
        });
    }
}
