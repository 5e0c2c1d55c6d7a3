//! Data forwarding, link failures and link error notifications

use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info, instrument, trace, warn};

use srcr_core::{DataPacket, Hop, LinkErrorPacket, NodeAddr, Packet, PacketType};

use super::{DropReason, PacketOutcome, SrcrEngine};
use crate::error::{RoutingError, RoutingResult};

impl SrcrEngine {
    /// Send `payload` to `destination` along the cached path
    ///
    /// Returns the first hop the frame went to. Nothing is buffered: on a
    /// cache miss discovery is started and [`RoutingError::NoRoute`] tells
    /// the caller to retry later.
    #[instrument(
        skip(self, destination, payload),
        fields(node = %self.local, destination = %destination, len = payload.len())
    )]
    pub fn start_data(&mut self, destination: NodeAddr, payload: Bytes) -> RoutingResult<NodeAddr> {
        if destination == self.local {
            return Err(RoutingError::LocalDestination(destination));
        }
        let now = self.clock.now();

        let Some(path) = self.cache.get(&destination).map(|c| c.path.clone()) else {
            let discovery_started = self.start_query(destination);
            debug!(discovery_started, "No cached route");
            return Err(RoutingError::NoRoute {
                destination,
                discovery_started,
            });
        };
        let Some(next_hop) = path.nodes().get(1).copied() else {
            self.cache.remove(&destination);
            let discovery_started = self.start_query(destination);
            return Err(RoutingError::NoRoute {
                destination,
                discovery_started,
            });
        };

        if self.black_list.is_bad(&next_hop, now) {
            self.black_list.mark(next_hop, now);
            let lost = self.invalidate_routes_via(next_hop);
            debug!(next_hop = %next_hop, invalidated = lost.len(), "First hop blacklisted");
            return Err(RoutingError::NextHopBlacklisted {
                destination,
                next_hop,
            });
        }

        let hops = match self.paths.get(&path) {
            Some(info) => info.hops.clone(),
            None => path.nodes().iter().map(|n| Hop::new(*n, 0, 0)).collect(),
        };
        let packet = Packet::Data(DataPacket {
            source: self.local,
            destination,
            hops,
            cursor: 1,
            payload,
        });
        self.unicast(next_hop, &packet)?;

        self.paths.record_use(&path, now);
        self.stats.data_sent += 1;
        trace!(next_hop = %next_hop, path = %path, "Data sent");
        Ok(next_hop)
    }

    /// Handle a data packet heard from `sender`
    pub(super) fn process_data(&mut self, mut data: DataPacket, sender: NodeAddr) -> PacketOutcome {
        let idx = data.cursor as usize;
        if data.hops.get(idx).map(|h| h.addr) != Some(self.local) {
            return PacketOutcome::Dropped(DropReason::NotAddressed);
        }
        let now = self.clock.now();

        let (fwd, rev) = self.incoming_link_metrics(&sender);
        data.hops[idx].fwd_metric = fwd;
        data.hops[idx].rev_metric = rev;
        self.record_links(&data.hops[idx - 1..=idx]);

        if idx + 1 == data.hops.len() {
            if data.destination != self.local {
                return PacketOutcome::Dropped(DropReason::InvalidRoute);
            }
            self.stats.data_delivered += 1;
            trace!(node = %self.local, source = %data.source, len = data.payload.len(), "Data delivered");
            return PacketOutcome::Delivered {
                source: data.source,
                payload: data.payload,
            };
        }

        let next_hop = data.hops[idx + 1].addr;
        if self.black_list.is_bad(&next_hop, now) {
            // Another failure against the neighbor: the entry's deadline moves
            // on, its notification counters stay
            self.black_list.mark(next_hop, now);
            let lost = self.invalidate_routes_via(next_hop);
            debug!(
                node = %self.local,
                next_hop = %next_hop,
                destination = %data.destination,
                invalidated = lost.len(),
                "Next hop blacklisted, not forwarding"
            );
            self.notify_link_error(&data, next_hop, now);
            return PacketOutcome::Dropped(DropReason::NextHopBlacklisted { next_hop });
        }

        data.cursor += 1;
        let result = self.unicast(next_hop, &Packet::Data(data));
        self.forward_outcome(result, PacketType::Data, next_hop)
    }

    /// Declare the link to `neighbor` broken
    ///
    /// Blacklists the neighbor and removes every cached path through it.
    /// Returns the destinations that lost their route.
    #[instrument(skip(self, neighbor), fields(node = %self.local, neighbor = %neighbor))]
    pub fn link_failure(&mut self, neighbor: NodeAddr) -> Vec<NodeAddr> {
        let now = self.clock.now();
        self.black_list.mark(neighbor, now);
        let lost = self.invalidate_routes_via(neighbor);
        info!(invalidated = lost.len(), "Link failure");
        lost
    }

    /// Report a unicast frame the link layer could not deliver
    ///
    /// The hop the frame was addressed to is treated as a link failure. For
    /// data frames relayed through this node, the data's source is sent a
    /// (rate-limited) link error. Returns the failed neighbor, or `None` for
    /// broadcast frames.
    pub fn delivery_failed(&mut self, frame: &[u8]) -> RoutingResult<Option<NodeAddr>> {
        let packet = Packet::decode(frame)?;
        let failed = match &packet {
            Packet::Query(_) => return Ok(None),
            Packet::Reply(r) => r.hops[r.cursor as usize].addr,
            Packet::Data(d) => d.hops[d.cursor as usize].addr,
            Packet::LinkError(e) => e.hops[e.cursor as usize].addr,
        };
        if failed == self.local {
            return Ok(None);
        }

        self.link_failure(failed);
        if let Packet::Data(data) = &packet {
            let now = self.clock.now();
            self.notify_link_error(data, failed, now);
        }
        Ok(Some(failed))
    }

    /// Handle a link error addressed to this node
    pub(super) fn process_link_error(&mut self, mut error: LinkErrorPacket) -> PacketOutcome {
        let idx = error.cursor as usize;
        if error.hops[idx].addr != self.local {
            return PacketOutcome::Dropped(DropReason::NotAddressed);
        }

        if idx > 0 {
            let next_hop = error.hops[idx - 1].addr;
            error.cursor -= 1;
            let result = self.unicast(next_hop, &Packet::LinkError(error));
            return self.forward_outcome(result, PacketType::LinkError, next_hop);
        }

        if error.source != self.local {
            return PacketOutcome::Dropped(DropReason::NotAddressed);
        }
        let Some(reporter) = error.reporter() else {
            return PacketOutcome::Dropped(DropReason::InvalidRoute);
        };
        let invalidated = self.cache.invalidate_link(reporter, error.failed);
        self.stats.routes_invalidated += invalidated.len() as u64;
        info!(
            node = %self.local,
            destination = %error.destination,
            reporter = %reporter,
            failed = %error.failed,
            invalidated = invalidated.len(),
            "Link error received"
        );
        PacketOutcome::LinkErrorReceived {
            destination: error.destination,
            failed: error.failed,
            invalidated,
        }
    }

    /// Tell the source of `data` that `failed` is unreachable from here
    ///
    /// At most one notification per `(failed, destination)` while the
    /// neighbor stays blacklisted. Nothing is sent when this node is the
    /// source.
    fn notify_link_error(&mut self, data: &DataPacket, failed: NodeAddr, now: Instant) -> bool {
        let Some(idx) = data.hops.iter().position(|h| h.addr == self.local) else {
            return false;
        };
        if idx == 0 {
            return false;
        }
        if !self
            .black_list
            .should_notify(&failed, data.destination, now)
        {
            trace!(node = %self.local, failed = %failed, destination = %data.destination, "Link error suppressed");
            return false;
        }

        let next_hop = data.hops[idx - 1].addr;
        let packet = Packet::LinkError(LinkErrorPacket {
            source: data.source,
            destination: data.destination,
            failed,
            hops: data.hops.clone(),
            cursor: (idx - 1) as u8,
        });
        match self.unicast(next_hop, &packet) {
            Ok(_) => {
                self.stats.link_errors_sent += 1;
                debug!(
                    node = %self.local,
                    source = %data.source,
                    destination = %data.destination,
                    failed = %failed,
                    "Link error sent"
                );
                true
            }
            Err(e) => {
                warn!(node = %self.local, source = %data.source, error = %e, "Failed to send link error");
                false
            }
        }
    }

    fn invalidate_routes_via(&mut self, neighbor: NodeAddr) -> Vec<NodeAddr> {
        let lost = self.cache.invalidate_node(&neighbor);
        self.stats.routes_invalidated += lost.len() as u64;
        lost
    }
}
