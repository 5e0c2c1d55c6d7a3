//! Stress tests for srcr-logging node context and event counting

use std::sync::{Arc, Barrier};
use std::thread;

use srcr_core::NodeAddr;
use srcr_logging::{EventCounter, LogBuffer, NodeContextGuard, SrcrSubscriberBuilder};
use tracing::Dispatch;

fn make_id(c: char) -> NodeAddr {
    NodeAddr::from_letter(c).unwrap()
}

/// Many threads switching node contexts never see each other's context
#[test]
fn test_concurrent_node_contexts() {
    const NUM_THREADS: usize = 26;
    const ITERATIONS: usize = 200;

    let barrier = Arc::new(Barrier::new(NUM_THREADS));
    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let letter = (b'A' + i as u8) as char;
                let node = make_id(letter);
                barrier.wait();

                for _ in 0..ITERATIONS {
                    let _guard = NodeContextGuard::new(node);
                    assert_eq!(NodeContextGuard::current_node_id(), Some(letter.to_string()));
                }
                assert!(NodeContextGuard::current().is_none());
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

/// Deeply nested guards unwind in order
#[test]
fn test_deep_nesting_restores_each_level() {
    fn nest(depth: u8) {
        let node = NodeAddr::new(10, 1, 0, depth);
        let _guard = NodeContextGuard::new(node);
        if depth < 100 {
            nest(depth + 1);
        }
        assert_eq!(NodeContextGuard::current_node(), Some(node));
    }

    nest(1);
    assert!(NodeContextGuard::current().is_none());
}

/// One shared subscriber counting events from many threads
#[test]
fn test_counter_under_concurrency() {
    const NUM_THREADS: usize = 8;
    const EVENTS: u64 = 500;

    let counter = EventCounter::new();
    let buffer = LogBuffer::new();
    let (subscriber, _guard) = SrcrSubscriberBuilder::new()
        .with_console(false)
        .with_level("info")
        .with_event_counter(counter.clone())
        .with_buffer(buffer.clone())
        .build()
        .unwrap();
    let dispatch = Dispatch::new(subscriber);

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|i| {
            let dispatch = dispatch.clone();
            thread::spawn(move || {
                tracing::dispatcher::with_default(&dispatch, || {
                    let _guard = NodeContextGuard::new(make_id((b'A' + i as u8) as char));
                    for seq in 0..EVENTS {
                        tracing::info!(seq, "Query recorded");
                    }
                });
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let snapshot = counter.snapshot();
    assert_eq!(snapshot.len(), NUM_THREADS);
    assert!(snapshot.values().all(|c| c.info == EVENTS));
    assert_eq!(buffer.json_lines().len(), NUM_THREADS * EVENTS as usize);
}

#[tokio::test]
async fn test_context_does_not_leak_into_blocking_tasks() {
    let _guard = NodeContextGuard::new(make_id('A'));
    let seen = tokio::task::spawn_blocking(NodeContextGuard::current_node)
        .await
        .unwrap();
    assert!(seen.is_none());
    assert_eq!(NodeContextGuard::current_node(), Some(make_id('A')));
}
