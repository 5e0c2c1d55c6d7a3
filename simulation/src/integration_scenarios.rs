//! End-to-end scenarios running full engines over the simulated air
//!
//! These cover behavior that only shows up with several engines talking:
//! - Delayed flooding and the destination's single reply
//! - Link failure detection, link errors and rediscovery
//! - Hysteresis against route flapping
//! - Exploration keeping link costs fresh

use std::time::Duration;

use bytes::Bytes;

use srcr_core::NodeAddr;
use srcr_routing::SrcrConfig;

use crate::scenarios;
use crate::simulation::{SimConfig, SimEvent, Simulation};
use crate::topology::{MeshBuilder, from_edges};

fn make_id(c: char) -> NodeAddr {
    NodeAddr::from_letter(c).unwrap()
}

#[test]
fn test_diamond_scenario_routes_through_b() {
    let sim = scenarios::run_diamond().unwrap();
    let path = sim.current_path(make_id('A'), make_id('D')).unwrap();
    assert_eq!(path.to_string(), "A -> B -> D");
    assert_eq!(sim.stats().payloads_delivered, 2);

    // One reply per flood, and nothing ever went through C
    let d = sim.engine(&make_id('D')).unwrap().stats();
    assert_eq!(d.replies_sent, 1);
    assert_eq!(d.data_delivered, 2);
    let c = sim.engine(&make_id('C')).unwrap().stats();
    assert_eq!(c.data_forwarded, 0);
}

#[test]
fn test_failover_rediscovers_through_other_branch() {
    let sim = scenarios::run_failover().unwrap();
    let path = sim.current_path(make_id('A'), make_id('D')).unwrap();
    assert_eq!(path.to_string(), "A -> C -> D");
    assert_eq!(sim.stats().payloads_delivered, 2);

    let events = sim.events();
    assert!(events.iter().any(|e| matches!(
        e,
        SimEvent::DeliveryFailed { at, neighbor, .. } if *at == make_id('B') && *neighbor == make_id('D')
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        SimEvent::LinkError { at, failed, invalidated: 1, .. } if *at == make_id('A') && *failed == make_id('D')
    )));
    assert!(sim.engine(&make_id('B')).unwrap().is_blacklisted(&make_id('D')));
    assert!(!sim.engine(&make_id('A')).unwrap().is_blacklisted(&make_id('B')));
}

#[test]
fn test_line_scenario_spans_every_hop() {
    let sim = scenarios::run_line(8).unwrap();
    let path = sim.current_path(make_id('A'), make_id('H')).unwrap();
    assert_eq!(path.hop_count(), 7);
    assert_eq!(sim.engine(&make_id('H')).unwrap().stats().data_delivered, 1);
}

#[test]
fn test_random_scenario_is_reproducible() {
    let a = scenarios::run_random(10, 0.4, 7, 4).unwrap();
    let b = scenarios::run_random(10, 0.4, 7, 4).unwrap();
    assert_eq!(a.stats(), b.stats());
    assert_eq!(a.air_stats(), b.air_stats());
}

#[test]
fn test_hop_limit_cuts_long_lines() {
    let config = SimConfig {
        srcr: SrcrConfig {
            max_hops: 3,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut sim = Simulation::new(MeshBuilder::new(6).unwrap().line(), config).unwrap();

    let reached = sim
        .deliver(make_id('A'), make_id('D'), Bytes::from_static(b"ok"), 300)
        .unwrap();
    assert!(reached.is_some());

    let too_far = sim
        .deliver(make_id('A'), make_id('F'), Bytes::from_static(b"no"), 300)
        .unwrap();
    assert!(too_far.is_none());
    assert!(sim.engine(&make_id('F')).unwrap().seen_len() == 0);
}

#[test]
fn test_dampening_holds_worse_incumbent() {
    // A-B-E-D costs 3, A-C-D costs 2 but its C-D link starts down
    let mesh = from_edges(&[
        ('A', 'B', 1),
        ('B', 'E', 1),
        ('E', 'D', 1),
        ('A', 'C', 1),
        ('C', 'D', 1),
    ])
    .unwrap();
    let config = SimConfig {
        srcr: SrcrConfig {
            query_retry_interval: Duration::from_millis(300),
            time_before_switch: Duration::from_secs(10),
            ..Default::default()
        },
        ..Default::default()
    };
    let mut sim = Simulation::new(mesh, config).unwrap();
    let (a, c, d) = (make_id('A'), make_id('C'), make_id('D'));
    sim.fail_link(c, d);

    sim.deliver(a, d, Bytes::from_static(b"1"), 300).unwrap();
    assert_eq!(sim.current_path(a, d).unwrap().to_string(), "A -> B -> E -> D");

    // The shorter branch comes back and answers the next discovery first
    assert!(sim.restore_link(c, d));
    sim.run_ticks(30);
    assert!(sim.engine_mut(&a).unwrap().start_query(d));
    sim.run_ticks(60);

    let a_stats = sim.engine(&a).unwrap().stats();
    assert_eq!(a_stats.switches_dampened, 1);
    assert_eq!(sim.current_path(a, d).unwrap().to_string(), "A -> B -> E -> D");

    // Without dampening the next discovery switches straight away
    sim.engine_mut(&a).unwrap().set_route_dampening(false);
    sim.run_ticks(30);
    assert!(sim.engine_mut(&a).unwrap().start_query(d));
    sim.run_ticks(60);
    assert_eq!(sim.current_path(a, d).unwrap().to_string(), "A -> C -> D");
}

#[test]
fn test_destination_answers_first_arrival() {
    let mut sim = Simulation::new(MeshBuilder::diamond(), SimConfig::default()).unwrap();
    let (a, d) = (make_id('A'), make_id('D'));

    assert!(sim.engine_mut(&a).unwrap().start_query(d));
    sim.run_ticks(60);

    // Both branches reach D, only the first copy is answered
    assert_eq!(sim.stats().replies_sent, 1);
    assert_eq!(sim.engine(&d).unwrap().stats().replies_sent, 1);
    assert_eq!(sim.engine(&d).unwrap().stats().queries_received, 2);
    assert!(sim.current_path(a, d).is_some());
}

#[test]
fn test_restored_link_is_usable_again() {
    let mut sim = Simulation::new(MeshBuilder::new(3).unwrap().line(), SimConfig::default()).unwrap();
    let (a, b, c) = (make_id('A'), make_id('B'), make_id('C'));

    sim.fail_link(b, c);
    let lost = sim.deliver(a, c, Bytes::from_static(b"x"), 100).unwrap();
    assert!(lost.is_none());

    assert!(sim.restore_link(b, c));
    // Next retry interval opens the way for a new flood
    let found = sim.deliver(a, c, Bytes::from_static(b"y"), 700).unwrap();
    assert!(found.is_some());
}

#[test]
fn test_exploration_learns_neighbor_links() {
    let config = SimConfig {
        srcr: SrcrConfig {
            explore_interval: Some(Duration::from_millis(500)),
            query_retry_interval: Duration::from_millis(200),
            ..Default::default()
        },
        seed: 3,
        ..Default::default()
    };
    let mut sim = Simulation::new(MeshBuilder::new(4).unwrap().ring(), config).unwrap();
    sim.run_ticks(150);

    let report = sim.report();
    let explored: u64 = report.nodes.values().map(|n| n.stats.queries_originated).sum();
    assert!(explored > 0);
    assert!(report.nodes.values().any(|n| !n.routes.is_empty()));
    assert!(report.nodes.values().any(|n| n.learned_links > 0));
}

#[test]
fn test_run_until_idle_settles() {
    let mut sim = Simulation::new(MeshBuilder::diamond(), SimConfig::default()).unwrap();
    assert_eq!(sim.run_until_idle(10), 0);

    assert!(sim.engine_mut(&make_id('A')).unwrap().start_query(make_id('D')));
    let taken = sim.run_until_idle(200);
    assert!(taken > 0 && taken < 200);
    assert!(sim.current_path(make_id('A'), make_id('D')).is_some());
}
