//! Shared radio medium for simulated nodes
//!
//! [`Air`] stands in for the link layer of every node at once. A broadcast
//! lands in the inbox of each node with a working link from the sender; a
//! unicast lands in the addressee's inbox, or, when the link is down, is
//! handed back to the sender as a transmit failure, the way a real MAC
//! reports a missing ACK. Nothing is delivered until the simulator drains
//! the inboxes, so a frame sent during one step arrives in the next.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use srcr_core::{LinkAddr, NodeAddr, Transport, TransportError};

use crate::topology::SharedMesh;

/// Default maximum frame size (802.11 MSDU)
pub const DEFAULT_MTU: usize = 2304;

/// A frame waiting in a node's inbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// Link address of the transmitting node
    pub from: LinkAddr,
    pub frame: Bytes,
}

/// Counters for everything put on the air
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirStats {
    pub frames_sent: u64,
    pub broadcasts: u64,
    pub unicasts: u64,
    /// Frame copies placed in inboxes (a broadcast counts once per receiver)
    pub frames_delivered: u64,
    pub bytes_sent: u64,
    /// Unicasts over a missing or broken link
    pub tx_failures: u64,
}

/// In-memory medium connecting every node of a mesh
pub struct Air {
    mesh: SharedMesh,
    mtu: usize,
    by_link: HashMap<LinkAddr, NodeAddr>,
    inboxes: DashMap<NodeAddr, VecDeque<InboundFrame>>,
    tx_failures: DashMap<NodeAddr, Vec<Bytes>>,
    stats: Mutex<AirStats>,
}

impl Air {
    /// Create the medium for the nodes currently in `mesh`
    pub fn new(mesh: SharedMesh, mtu: usize) -> Self {
        let by_link = mesh
            .read()
            .node_ids()
            .into_iter()
            .map(|n| (LinkAddr::for_node(n), n))
            .collect();
        Self {
            mesh,
            mtu,
            by_link,
            inboxes: DashMap::new(),
            tx_failures: DashMap::new(),
            stats: Mutex::new(AirStats::default()),
        }
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Transmit `frame` from `sender` to `dst`
    pub fn transmit(&self, sender: NodeAddr, dst: LinkAddr, frame: Bytes) -> Result<(), TransportError> {
        if frame.len() > self.mtu {
            return Err(TransportError::FrameTooLarge {
                size: frame.len(),
                mtu: self.mtu,
            });
        }
        let from = LinkAddr::for_node(sender);
        let mut stats = self.stats.lock();
        stats.frames_sent += 1;
        stats.bytes_sent += frame.len() as u64;

        if dst.is_broadcast() {
            stats.broadcasts += 1;
            let receivers = self.mesh.read().reachable_neighbors(sender);
            for receiver in receivers {
                self.enqueue(receiver, from, frame.clone());
                stats.frames_delivered += 1;
            }
            trace!(sender = %sender, len = frame.len(), "Broadcast");
            return Ok(());
        }

        stats.unicasts += 1;
        let receiver = self
            .by_link
            .get(&dst)
            .copied()
            .filter(|r| self.mesh.read().is_up(sender, *r));
        match receiver {
            Some(receiver) => {
                self.enqueue(receiver, from, frame);
                stats.frames_delivered += 1;
            }
            None => {
                stats.tx_failures += 1;
                trace!(sender = %sender, dst = %dst, "Unicast not acknowledged");
                self.tx_failures.entry(sender).or_default().push(frame);
            }
        }
        Ok(())
    }

    fn enqueue(&self, receiver: NodeAddr, from: LinkAddr, frame: Bytes) {
        self.inboxes
            .entry(receiver)
            .or_default()
            .push_back(InboundFrame { from, frame });
    }

    /// Take every frame waiting for `node`, oldest first
    pub fn drain_inbox(&self, node: &NodeAddr) -> Vec<InboundFrame> {
        self.inboxes
            .get_mut(node)
            .map(|mut inbox| inbox.drain(..).collect())
            .unwrap_or_default()
    }

    /// Take every unicast `node` failed to deliver
    pub fn drain_failures(&self, node: &NodeAddr) -> Vec<Bytes> {
        self.tx_failures
            .get_mut(node)
            .map(|mut failures| std::mem::take(&mut *failures))
            .unwrap_or_default()
    }

    /// Frames not yet drained, across all nodes
    pub fn pending(&self) -> usize {
        let inbound: usize = self.inboxes.iter().map(|e| e.value().len()).sum();
        let failed: usize = self.tx_failures.iter().map(|e| e.value().len()).sum();
        inbound + failed
    }

    pub fn stats(&self) -> AirStats {
        self.stats.lock().clone()
    }
}

/// One node's view of the [`Air`]
pub struct AirTransport {
    node: NodeAddr,
    air: Arc<Air>,
}

impl AirTransport {
    pub fn new(node: NodeAddr, air: Arc<Air>) -> Self {
        Self { node, air }
    }
}

impl Transport for AirTransport {
    fn send_protocol_frame(&self, dst: LinkAddr, frame: Bytes) -> Result<(), TransportError> {
        self.air.transmit(self.node, dst, frame)
    }

    fn send_data_frame(&self, dst: LinkAddr, frame: Bytes) -> Result<(), TransportError> {
        if dst.is_broadcast() {
            return Err(TransportError::SendFailed(
                "data frames must be unicast".to_string(),
            ));
        }
        self.air.transmit(self.node, dst, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::MeshBuilder;

    fn make_id(c: char) -> NodeAddr {
        NodeAddr::from_letter(c).unwrap()
    }

    fn diamond_air() -> (SharedMesh, Arc<Air>) {
        let mesh = MeshBuilder::diamond().into_shared();
        let air = Arc::new(Air::new(mesh.clone(), DEFAULT_MTU));
        (mesh, air)
    }

    #[test]
    fn test_broadcast_reaches_neighbors_only() {
        let (_mesh, air) = diamond_air();
        let transport = AirTransport::new(make_id('A'), air.clone());
        transport
            .send_protocol_frame(LinkAddr::BROADCAST, Bytes::from_static(b"q"))
            .unwrap();

        assert_eq!(air.drain_inbox(&make_id('B')).len(), 1);
        let at_c = air.drain_inbox(&make_id('C'));
        assert_eq!(at_c[0].from, LinkAddr::for_node(make_id('A')));
        assert!(air.drain_inbox(&make_id('D')).is_empty());
        assert!(air.drain_inbox(&make_id('A')).is_empty());

        let stats = air.stats();
        assert_eq!(stats.broadcasts, 1);
        assert_eq!(stats.frames_delivered, 2);
    }

    #[test]
    fn test_unicast_over_down_link_fails_back_to_sender() {
        let (mesh, air) = diamond_air();
        mesh.write().set_link_up(make_id('B'), make_id('D'), false);

        let transport = AirTransport::new(make_id('B'), air.clone());
        let dst = LinkAddr::for_node(make_id('D'));
        assert!(transport.send_data_frame(dst, Bytes::from_static(b"data")).is_ok());

        assert!(air.drain_inbox(&make_id('D')).is_empty());
        let failed = air.drain_failures(&make_id('B'));
        assert_eq!(failed, vec![Bytes::from_static(b"data")]);
        assert!(air.drain_failures(&make_id('B')).is_empty());
        assert_eq!(air.stats().tx_failures, 1);
    }

    #[test]
    fn test_unicast_to_non_neighbor_fails() {
        let (_mesh, air) = diamond_air();
        air.transmit(make_id('A'), LinkAddr::for_node(make_id('D')), Bytes::from_static(b"x"))
            .unwrap();
        assert_eq!(air.drain_failures(&make_id('A')).len(), 1);
        assert_eq!(air.pending(), 0);
    }

    #[test]
    fn test_frame_over_mtu_rejected() {
        let mesh = MeshBuilder::diamond().into_shared();
        let air = Air::new(mesh, 8);
        let result = air.transmit(
            make_id('A'),
            LinkAddr::BROADCAST,
            Bytes::from_static(b"far too long"),
        );
        assert!(matches!(
            result,
            Err(TransportError::FrameTooLarge { size: 12, mtu: 8 })
        ));
        assert_eq!(air.stats().frames_sent, 0);
    }

    #[test]
    fn test_data_broadcast_refused() {
        let (_mesh, air) = diamond_air();
        let transport = AirTransport::new(make_id('A'), air);
        assert!(matches!(
            transport.send_data_frame(LinkAddr::BROADCAST, Bytes::new()),
            Err(TransportError::SendFailed(_))
        ));
    }
}
