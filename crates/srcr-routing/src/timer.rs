//! Background task driving the query flush
//!
//! [`QueryFlushTimer`] re-runs [`SrcrEngine::forward_query_hook`] on a
//! fixed period for as long as it lives. It must be cancelled (or dropped)
//! before the engine's owner goes away; dropping the timer aborts the task.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use crate::engine::SrcrEngine;

/// Periodic flush of aggregated queries for one engine
pub struct QueryFlushTimer {
    shutdown_tx: broadcast::Sender<()>,
    handle: Option<JoinHandle<()>>,
    period: Duration,
}

impl QueryFlushTimer {
    /// Spawn the timer using the engine's configured `flush_interval`
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(engine: Arc<Mutex<SrcrEngine>>) -> Self {
        let period = engine.lock().config().flush_interval;
        Self::spawn_with_period(engine, period)
    }

    /// Spawn the timer with an explicit period
    pub fn spawn_with_period(engine: Arc<Mutex<SrcrEngine>>, period: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(run(engine, period, shutdown_rx));
        Self {
            shutdown_tx,
            handle: Some(handle),
            period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Ask the task to stop after its current tick
    pub fn cancel(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Cancel and wait for the task to finish
    pub async fn shutdown(mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    /// Whether the task has stopped
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }
}

impl Drop for QueryFlushTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn run(
    engine: Arc<Mutex<SrcrEngine>>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let node = engine.lock().local_addr();
    info!(node = %node, period_ms = period.as_millis() as u64, "Query flush timer started");

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!(node = %node, "Query flush timer shutting down");
                break;
            }
            _ = interval.tick() => {
                let report = engine.lock().forward_query_hook();
                if report.queries_forwarded + report.suppressed > 0 {
                    trace!(
                        node = %node,
                        forwarded = report.queries_forwarded,
                        suppressed = report.suppressed,
                        "Flush tick"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use srcr_core::mock::{ManualClock, RecordingTransport, StaticMetric, StaticResolver};
    use srcr_core::{Hop, NodeAddr, Packet, QueryPacket};

    fn make_id(c: char) -> NodeAddr {
        NodeAddr::from_letter(c).unwrap()
    }

    fn setup() -> (Arc<Mutex<SrcrEngine>>, Arc<ManualClock>, Arc<RecordingTransport>) {
        let clock = Arc::new(ManualClock::new());
        let transport = Arc::new(RecordingTransport::new());
        let engine = SrcrEngine::builder(make_id('B'))
            .metric(Arc::new(StaticMetric::with_default(1)))
            .transport(transport.clone())
            .resolver(Arc::new(StaticResolver::new()))
            .clock(clock.clone())
            .build()
            .unwrap();
        (Arc::new(Mutex::new(engine)), clock, transport)
    }

    fn query_from_a() -> Vec<u8> {
        Packet::Query(QueryPacket {
            seq: 1,
            origin: make_id('A'),
            target: make_id('D'),
            hops: vec![Hop::origin(make_id('A'))],
        })
        .encode()
        .unwrap()
        .to_vec()
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_due_queries() {
        let (engine, clock, transport) = setup();
        let timer = QueryFlushTimer::spawn(engine.clone());
        assert_eq!(timer.period(), Duration::from_millis(50));

        engine
            .lock()
            .handle_frame(srcr_core::LinkAddr::for_node(make_id('A')), &query_from_a());

        // Window still open: ticks must not flood
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(transport.is_empty());

        clock.advance(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(120)).await;
        let sent = transport.take_packets();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].0.is_broadcast());

        timer.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_task() {
        let (engine, _clock, _transport) = setup();
        let timer = QueryFlushTimer::spawn_with_period(engine, Duration::from_millis(10));
        assert!(!timer.is_finished());

        timer.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(timer.is_finished());
    }

    #[tokio::test]
    async fn test_drop_aborts_task() {
        let (engine, _clock, _transport) = setup();
        let timer = QueryFlushTimer::spawn(engine.clone());
        drop(timer);
        tokio::task::yield_now().await;
        // The engine is still usable once the task is gone
        assert_eq!(engine.lock().seen_len(), 0);
    }
}
