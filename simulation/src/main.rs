//! SRCR mesh simulator
//!
//! Runs the routing engine over simulated topologies and prints a JSON
//! report of what every node did.

use std::time::Duration;

use anyhow::{Context, bail};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use serde_json::json;

use srcr_logging::{EventCounter, LogConfig, SrcrSubscriberBuilder};
use srcr_routing::SrcrConfig;
use srcr_simulation::{LiveMesh, MeshBuilder, Simulation, node_addr, scenarios};

#[derive(Parser)]
#[command(
    name = "srcr-sim",
    about = "Mesh simulation for SRCR source routing",
    version
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print a JSON report after the run
    #[arg(short, long, global = true)]
    report: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the four-node diamond: discovery and delivery
    Diamond,

    /// Run a multi-hop line relay scenario
    Line {
        /// Number of nodes
        #[arg(short, long, default_value = "6")]
        nodes: usize,
    },

    /// Break the selected path and watch the route fail over
    Failover,

    /// Run random traffic over a random mesh
    Random {
        /// Number of nodes
        #[arg(short, long, default_value = "12")]
        nodes: usize,

        /// Connection probability
        #[arg(short, long, default_value = "0.3")]
        connection_prob: f64,

        /// Number of source/destination pairs
        #[arg(short, long, default_value = "5")]
        pairs: usize,

        /// Random seed
        #[arg(short, long, default_value = "1")]
        seed: u64,
    },

    /// Run the diamond on the tokio runtime with real flush timers
    Live {
        /// Give up after this many milliseconds
        #[arg(short, long, default_value = "5000")]
        timeout_ms: u64,
    },

    /// Create and visualize a topology
    Topology {
        /// Type of topology: line, ring, star, full, grid, random, diamond
        #[arg(short, long, default_value = "ring")]
        topology: String,

        /// Number of nodes
        #[arg(short, long, default_value = "6")]
        nodes: usize,

        /// Connection probability for random topology
        #[arg(short, long, default_value = "0.4")]
        connection_prob: f64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if cli.verbose {
        LogConfig::development()
    } else {
        LogConfig::simulation()
    };
    let counter = EventCounter::new();
    let _guard = SrcrSubscriberBuilder::new()
        .with_config(config)
        .with_event_counter(counter.clone())
        .init();

    let sim = match cli.command {
        Commands::Diamond => scenarios::run_diamond()?,
        Commands::Line { nodes } => {
            if nodes < 2 {
                bail!("a line needs at least 2 nodes");
            }
            scenarios::run_line(nodes)?
        }
        Commands::Failover => scenarios::run_failover()?,
        Commands::Random {
            nodes,
            connection_prob,
            pairs,
            seed,
        } => scenarios::run_random(nodes, connection_prob, seed, pairs)?,
        Commands::Live { timeout_ms } => {
            return run_live(Duration::from_millis(timeout_ms), cli.report);
        }
        Commands::Topology {
            topology,
            nodes,
            connection_prob,
        } => {
            let builder = MeshBuilder::new(nodes)?;
            let mesh = match topology.as_str() {
                "line" => builder.line(),
                "ring" => builder.ring(),
                "star" => builder.star(),
                "full" => builder.full_mesh(),
                "grid" => builder.grid((nodes as f64).sqrt().ceil() as usize),
                "random" => builder.random(connection_prob, 5, rand::random()),
                "diamond" => MeshBuilder::diamond(),
                other => bail!("unknown topology: {other}"),
            };
            println!("{}", mesh.visualize());
            return Ok(());
        }
    };

    if cli.report {
        print_report(&sim, &counter)?;
    }
    Ok(())
}

fn print_report(sim: &Simulation, counter: &EventCounter) -> anyhow::Result<()> {
    let report = json!({
        "run": sim.report(),
        "log_events": counter.snapshot(),
    });
    let text = serde_json::to_string_pretty(&report).context("serializing report")?;
    println!("{text}");
    Ok(())
}

fn run_live(timeout: Duration, report: bool) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    runtime.block_on(async {
        let mut live = LiveMesh::start(
            MeshBuilder::diamond(),
            SrcrConfig::default(),
            Duration::from_millis(10),
        )?;
        let (a, d) = (node_addr(0), node_addr(3));

        println!("--- A sends to D over the live mesh ---");
        match live
            .deliver(a, d, Bytes::from_static(b"live hello"), timeout)
            .await?
        {
            Some(took) => println!("  Delivered after {took:?}"),
            None => println!("  Not delivered within {timeout:?}"),
        }
        if let Some(path) = live.current_path(a, d) {
            println!("  Route A -> D: [{path}]");
        }

        if report {
            let text = serde_json::to_string_pretty(&json!({
                "air": live.air_stats(),
                "nodes": live.stats(),
            }))?;
            println!("{text}");
        }
        live.shutdown().await;
        Ok::<(), anyhow::Error>(())
    })
}
