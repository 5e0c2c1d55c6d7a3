//! Query origination, aggregation and the timer-driven flood

use std::time::Instant;

use rand::seq::IteratorRandom;
use tracing::{debug, instrument, trace, warn};

use srcr_core::{Hop, NodeAddr, Packet, QueryPacket, forward_metric, reverse_metric};

use super::{DropReason, FlushReport, PacketOutcome, SrcrEngine};
use crate::seen::{SeenKey, SeenUpdate};

impl SrcrEngine {
    /// Start route discovery towards `destination`
    ///
    /// Does nothing while an earlier attempt for the same destination is
    /// younger than `query_retry_interval`. Returns `true` if a query went out.
    #[instrument(skip(self, destination), fields(node = %self.local, destination = %destination))]
    pub fn start_query(&mut self, destination: NodeAddr) -> bool {
        if destination == self.local {
            return false;
        }
        let now = self.clock.now();
        if !self
            .queries
            .may_start(&destination, now, self.config.query_retry_interval)
        {
            trace!("Discovery already in flight");
            return false;
        }

        let seq = self.queries.begin(destination, now);
        let packet = Packet::Query(QueryPacket {
            seq,
            origin: self.local,
            target: destination,
            hops: vec![Hop::origin(self.local)],
        });
        match self.broadcast(&packet) {
            Ok(len) => {
                self.stats.queries_originated += 1;
                self.stats.queries_sent += 1;
                self.stats.query_bytes_sent += len;
                debug!(seq, "Query originated");
                true
            }
            Err(e) => {
                warn!(seq, error = %e, "Failed to broadcast query");
                false
            }
        }
    }

    /// Handle a query copy heard from `sender`
    pub(super) fn process_query(&mut self, mut query: QueryPacket, sender: NodeAddr) -> PacketOutcome {
        let now = self.clock.now();

        if self.black_list.is_bad(&sender, now) {
            return PacketOutcome::Dropped(DropReason::Blacklisted { neighbor: sender });
        }
        if query.origin == self.local || query.hops.iter().any(|h| h.addr == self.local) {
            return PacketOutcome::Dropped(DropReason::Loop);
        }

        let (fwd, rev) = self.incoming_link_metrics(&sender);
        if fwd == 0 || rev == 0 {
            trace!(node = %self.local, sender = %sender, "Unusable link, ignoring query copy");
            return PacketOutcome::Dropped(DropReason::UnusableMetric);
        }
        query.hops.push(Hop::new(self.local, fwd, rev));

        if query.hops.len() - 1 > self.config.max_hops {
            return PacketOutcome::Dropped(DropReason::HopLimit);
        }
        let (Some(total_fwd), Some(total_rev)) =
            (forward_metric(&query.hops), reverse_metric(&query.hops))
        else {
            return PacketOutcome::Dropped(DropReason::UnusableMetric);
        };
        self.record_links(&query.hops);

        let key = SeenKey::new(query.origin, query.target, query.seq);
        let update = self.seen.observe(
            key,
            query.hops,
            total_fwd,
            total_rev,
            now,
            self.config.query_wait,
        );
        match update {
            SeenUpdate::Inserted if key.dst == self.local => {
                // Destination records are committed on arrival; later copies
                // find them forwarded and get no second reply
                let replied = match self.seen.mark_forwarded(&key).cloned() {
                    Some(record) => self.start_reply(&record),
                    None => false,
                };
                debug!(
                    node = %self.local,
                    origin = %key.src,
                    seq = key.seq,
                    metric = total_fwd,
                    replied,
                    "Query answered"
                );
                PacketOutcome::QueryAnswered {
                    origin: key.src,
                    seq: key.seq,
                    replied,
                }
            }
            SeenUpdate::Inserted | SeenUpdate::Improved => {
                let improved = update == SeenUpdate::Improved;
                debug!(
                    node = %self.local,
                    origin = %key.src,
                    target = %key.dst,
                    seq = key.seq,
                    metric = total_fwd,
                    improved,
                    "Query recorded"
                );
                PacketOutcome::QueryQueued {
                    origin: key.src,
                    target: key.dst,
                    seq: key.seq,
                    improved,
                }
            }
            SeenUpdate::Duplicate => PacketOutcome::Dropped(DropReason::Duplicate),
            SeenUpdate::AlreadyForwarded => PacketOutcome::Dropped(DropReason::AlreadyForwarded),
        }
    }

    /// Commit every query whose aggregation window has closed
    ///
    /// Each due record is flooded with the best hop list seen during its
    /// window. Also expires Black List entries and runs the exploration
    /// probe.
    #[instrument(skip(self), fields(node = %self.local))]
    pub fn forward_query_hook(&mut self) -> FlushReport {
        let now = self.clock.now();
        let mut report = FlushReport::default();

        for key in self.seen.due(now) {
            let Some(record) = self.seen.mark_forwarded(&key).cloned() else {
                continue;
            };

            if record.hop_count() >= self.config.max_hops {
                trace!(origin = %key.src, seq = key.seq, "Hop limit reached, not flooding");
                report.suppressed += 1;
                continue;
            }
            if let Some(last) = record.last_sender()
                && self.black_list.is_bad(&last, now)
            {
                debug!(origin = %key.src, seq = key.seq, sender = %last, "Sender blacklisted, not flooding");
                report.suppressed += 1;
                continue;
            }

            let packet = Packet::Query(QueryPacket {
                seq: key.seq,
                origin: key.src,
                target: key.dst,
                hops: record.hops,
            });
            match self.broadcast(&packet) {
                Ok(len) => {
                    self.stats.queries_sent += 1;
                    self.stats.query_bytes_sent += len;
                    report.queries_forwarded += 1;
                    debug!(
                        origin = %key.src,
                        target = %key.dst,
                        seq = key.seq,
                        metric = record.forward_metric,
                        arrivals = record.arrivals,
                        "Query flooded"
                    );
                }
                Err(e) => warn!(origin = %key.src, seq = key.seq, error = %e, "Failed to flood query"),
            }
        }

        let expired = self.black_list.prune(now);
        if expired > 0 {
            debug!(expired, "Black List entries expired");
        }
        report.explored = self.explore(now);
        report
    }

    /// Probe a random neighbor once per `explore_interval`
    fn explore(&mut self, now: Instant) -> Option<NodeAddr> {
        let interval = self.config.explore_interval?;
        if let Some(last) = self.last_explore
            && now.saturating_duration_since(last) < interval
        {
            return None;
        }
        self.last_explore = Some(now);

        let target = self
            .neighbors
            .iter()
            .copied()
            .choose(&mut self.rng)
            .or_else(|| self.neighbor_source.random_neighbor())?;
        debug!(neighbor = %target, "Exploring neighbor");
        self.start_query(target).then_some(target)
    }
}
