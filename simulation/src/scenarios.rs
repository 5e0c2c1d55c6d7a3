//! Pre-defined simulation scenarios
//!
//! Each scenario prints its progress step by step and returns the finished
//! [`Simulation`] so callers can inspect or report on it.

use std::time::Duration;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use srcr_core::NodeAddr;
use srcr_routing::SrcrConfig;

use crate::error::SimResult;
use crate::simulation::{SimConfig, Simulation};
use crate::topology::{MeshBuilder, letter, node_addr};

/// Ticks allowed for one payload before giving up
const DELIVERY_BUDGET: u64 = 500;

fn print_route(sim: &Simulation, from: NodeAddr, to: NodeAddr) {
    match sim.engine(&from).and_then(|e| {
        e.path_cache_snapshot()
            .into_iter()
            .find(|r| r.destination == to)
    }) {
        Some(route) => println!("  Route {} -> {}: [{}] metric {}", from.short_id(), to.short_id(), route.path, route.metric),
        None => println!("  Route {} -> {}: none", from.short_id(), to.short_id()),
    }
}

fn print_delivery(ticks: Option<u64>) {
    match ticks {
        Some(ticks) => println!("  Delivered after {ticks} ticks"),
        None => println!("  Not delivered"),
    }
}

/// Run the diamond scenario
///
/// ```text
///     B
///  1 / \ 2
///   A   D
///  2 \ / 3
///     C
/// ```
///
/// A sends to D. B and C flood in the same tick and B's copy reaches D
/// first; D answers it on arrival and drops C's, so A settles on
/// A -> B -> D (cost 3) and never sees A -> C -> D (cost 5).
pub fn run_diamond() -> SimResult<Simulation> {
    info!("=== Running Diamond Scenario ===");
    let mesh = MeshBuilder::diamond();
    println!("{}", mesh.visualize());

    let mut sim = Simulation::new(mesh, SimConfig::default())?;
    let (a, d) = (letter('A')?, letter('D')?);

    println!("\n--- Step 1: A sends to D (no route yet) ---");
    let ticks = sim.deliver(a, d, Bytes::from_static(b"Hello from A to D!"), DELIVERY_BUDGET)?;
    print_delivery(ticks);
    print_route(&sim, a, d);

    println!("\n--- Step 2: A sends again over the cached route ---");
    let ticks = sim.deliver(a, d, Bytes::from_static(b"Second message"), DELIVERY_BUDGET)?;
    print_delivery(ticks);

    println!("\n--- Final State ---");
    print!("{}", sim.state_summary());
    Ok(sim)
}

/// Run a multi-hop line: the first node sends to the last
pub fn run_line(nodes: usize) -> SimResult<Simulation> {
    info!(nodes, "=== Running Line Scenario ===");
    let mesh = MeshBuilder::new(nodes)?.line();
    println!("{}", mesh.visualize());

    let config = SimConfig {
        srcr: SrcrConfig {
            max_hops: nodes.clamp(10, 254),
            ..Default::default()
        },
        ..Default::default()
    };
    let mut sim = Simulation::new(mesh, config)?;
    let (first, last) = (node_addr(0), node_addr(nodes - 1));

    println!("\n--- {} sends to {} across {} hops ---", first.short_id(), last.short_id(), nodes - 1);
    let budget = DELIVERY_BUDGET + 25 * nodes as u64;
    let ticks = sim.deliver(first, last, Bytes::from_static(b"end to end"), budget)?;
    print_delivery(ticks);
    print_route(&sim, first, last);
    Ok(sim)
}

/// Run the failover scenario
///
/// After A has learned A -> B -> D over the diamond, the B-D link breaks.
/// B's next forward fails at the link layer, B blacklists D and sends A a
/// link error, A drops the route and rediscovers D through C.
pub fn run_failover() -> SimResult<Simulation> {
    info!("=== Running Failover Scenario ===");
    let mesh = MeshBuilder::diamond();
    println!("{}", mesh.visualize());

    let config = SimConfig {
        srcr: SrcrConfig {
            query_retry_interval: Duration::from_millis(200),
            ..Default::default()
        },
        ..Default::default()
    };
    let mut sim = Simulation::new(mesh, config)?;
    let (a, b, d) = (letter('A')?, letter('B')?, letter('D')?);

    println!("\n--- Step 1: A sends to D ---");
    let ticks = sim.deliver(a, d, Bytes::from_static(b"before"), DELIVERY_BUDGET)?;
    print_delivery(ticks);
    print_route(&sim, a, d);

    println!("\n--- Step 2: link B-D goes down ---");
    sim.fail_link(b, d);
    println!("{}", sim.mesh().read().visualize());

    println!("\n--- Step 3: A sends to D again ---");
    let ticks = sim.deliver(a, d, Bytes::from_static(b"after"), DELIVERY_BUDGET)?;
    print_delivery(ticks);
    print_route(&sim, a, d);

    println!("\n--- Final State ---");
    print!("{}", sim.state_summary());
    Ok(sim)
}

/// Run random traffic over a random mesh
///
/// `pairs` source/destination pairs are drawn from `seed`; pairs in
/// different partitions are simply not delivered.
pub fn run_random(nodes: usize, connection_prob: f64, seed: u64, pairs: usize) -> SimResult<Simulation> {
    info!(nodes, connection_prob, seed, pairs, "=== Running Random Scenario ===");
    let mesh = MeshBuilder::new(nodes)?.random(connection_prob, 5, seed);
    println!("{}", mesh.visualize());

    let config = SimConfig {
        srcr: SrcrConfig::dense_mesh(),
        seed,
        ..Default::default()
    };
    let mut sim = Simulation::new(mesh, config)?;
    let mut rng = StdRng::seed_from_u64(seed);

    let mut delivered = 0;
    for round in 0..pairs {
        if nodes < 2 {
            break;
        }
        let from = rng.random_range(0..nodes);
        let to = (from + rng.random_range(1..nodes)) % nodes;
        let (from, to) = (node_addr(from), node_addr(to));

        println!("\n--- Pair {}: {} -> {} ---", round + 1, from.short_id(), to.short_id());
        let ticks = sim.deliver(from, to, Bytes::from(format!("payload {round}")), DELIVERY_BUDGET)?;
        print_delivery(ticks);
        if ticks.is_some() {
            delivered += 1;
            print_route(&sim, from, to);
        }
    }

    println!("\n--- {delivered}/{pairs} pairs delivered ---");
    Ok(sim)
}
