//! Reply origination, source-routed forwarding and route learning

use tracing::{debug, info, trace, warn};

use srcr_core::{Packet, PacketType, Path, ReplyPacket, forward_metric};

use super::{DropReason, PacketOutcome, SrcrEngine};
use crate::cache::{RejectReason, Selection};
use crate::seen::SeenRecord;

impl SrcrEngine {
    /// Answer a query addressed to this node
    ///
    /// The reply carries the hop list of `record` unchanged and
    /// walks it backwards, starting with the hop before this node.
    pub(super) fn start_reply(&mut self, record: &SeenRecord) -> bool {
        let Some(cursor) = record.hops.len().checked_sub(2) else {
            return false;
        };
        let next_hop = record.hops[cursor].addr;
        let now = self.clock.now();
        if self.black_list.is_bad(&next_hop, now) {
            debug!(
                node = %self.local,
                origin = %record.key.src,
                next_hop = %next_hop,
                "Reply path starts at a blacklisted neighbor"
            );
            return false;
        }

        let packet = Packet::Reply(ReplyPacket {
            seq: record.key.seq,
            origin: record.key.src,
            target: self.local,
            hops: record.hops.clone(),
            cursor: cursor as u8,
        });
        match self.unicast(next_hop, &packet) {
            Ok(len) => {
                self.stats.replies_sent += 1;
                self.stats.reply_bytes_sent += len;
                debug!(
                    node = %self.local,
                    origin = %record.key.src,
                    seq = record.key.seq,
                    metric = record.forward_metric,
                    arrivals = record.arrivals,
                    next_hop = %next_hop,
                    "Reply sent"
                );
                true
            }
            Err(e) => {
                warn!(node = %self.local, origin = %record.key.src, error = %e, "Failed to send reply");
                false
            }
        }
    }

    /// Handle a reply addressed to this node
    pub(super) fn process_reply(&mut self, reply: ReplyPacket) -> PacketOutcome {
        let idx = reply.cursor as usize;
        if reply.hops[idx].addr != self.local {
            return PacketOutcome::Dropped(DropReason::NotAddressed);
        }
        self.record_links(&reply.hops);

        if idx == 0 {
            if reply.origin != self.local {
                return PacketOutcome::Dropped(DropReason::NotAddressed);
            }
            return self.got_reply(reply);
        }
        self.forward_reply(reply)
    }

    /// Pass a reply one hop closer to the query origin
    fn forward_reply(&mut self, mut reply: ReplyPacket) -> PacketOutcome {
        let next_idx = reply.cursor as usize - 1;
        let next_hop = reply.hops[next_idx].addr;
        if self.black_list.is_bad(&next_hop, self.clock.now()) {
            return PacketOutcome::Dropped(DropReason::NextHopBlacklisted { next_hop });
        }
        reply.cursor -= 1;
        let result = self.unicast(next_hop, &Packet::Reply(reply));
        self.forward_outcome(result, PacketType::Reply, next_hop)
    }

    /// A reply for a query this node originated: learn the path and run
    /// route selection
    fn got_reply(&mut self, reply: ReplyPacket) -> PacketOutcome {
        let destination = reply.target;
        if reply.hops.last().map(|h| h.addr) != Some(destination) {
            return PacketOutcome::Dropped(DropReason::InvalidRoute);
        }
        let now = self.clock.now();
        let metric = forward_metric(&reply.hops);
        let path = Path::from_hops(&reply.hops);

        if let Some(m) = metric {
            self.queries.record_metric(&destination, m);
            self.paths.learn(reply.hops, m, now);
        }

        let policy = self.switch_policy();
        let selection = self.cache.consider(destination, path.clone(), metric, now, policy);
        match &selection {
            Selection::Selected => {
                self.stats.routes_selected += 1;
                info!(node = %self.local, destination = %destination, path = %path, metric = ?metric, "Route selected");
            }
            Selection::Switched { previous } => {
                self.stats.routes_selected += 1;
                info!(
                    node = %self.local,
                    destination = %destination,
                    path = %path,
                    previous = %previous,
                    metric = ?metric,
                    "Route switched"
                );
            }
            Selection::Refreshed => {
                trace!(node = %self.local, destination = %destination, metric = ?metric, "Route refreshed");
            }
            Selection::Rejected(RejectReason::Dampened { remaining }) => {
                self.stats.switches_dampened += 1;
                debug!(
                    node = %self.local,
                    destination = %destination,
                    path = %path,
                    remaining_ms = remaining.as_millis() as u64,
                    "Better route held back by dampening"
                );
            }
            Selection::Rejected(reason) => {
                trace!(node = %self.local, destination = %destination, ?reason, "Route not selected");
            }
        }

        PacketOutcome::RouteLearned {
            destination,
            metric,
            selection,
        }
    }
}
