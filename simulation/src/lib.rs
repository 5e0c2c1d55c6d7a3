//! # SRCR Simulation
//!
//! A discrete-time mesh simulator running real SRCR engines.
//!
//! ## Overview
//!
//! Every node of a [`Mesh`] gets its own [`SrcrEngine`](srcr_routing::SrcrEngine).
//! The engines share one simulated radio medium ([`Air`]) and one manual
//! clock, so floods, replies, data and link errors move exactly one hop per
//! tick and every run is reproducible.
//!
//! - **Nodes** are IPv4 addresses `10.0.0.1`, `10.0.0.2`, ...; the first
//!   26 print as `A`..`Z`
//! - **Links** are directed with their own cost, and can be taken down
//!   and restored while the simulation runs
//! - **Link failures** surface as unacknowledged unicasts, which the
//!   sending engine turns into blacklisting and link errors
//!
//! ## Architecture
//!
//! - **Topology** (`topology.rs`): Mesh construction (line, ring, grid, random, diamond, ...)
//! - **Air** (`air.rs`): Shared medium implementing the engine's transport
//! - **Simulation** (`simulation.rs`): Discrete-time stepping and reports
//! - **Live** (`live.rs`): The same mesh driven by tokio timers
//! - **Scenarios** (`scenarios.rs`): Pre-built runs used by the CLI
//!
//! ## Example: Diamond
//!
//! ```rust,ignore
//! use srcr_simulation::*;
//!
//! //     B
//! //  1 / \ 2
//! //   A   D
//! //  2 \ / 3
//! //     C
//! let mut sim = Simulation::new(MeshBuilder::diamond(), SimConfig::default())?;
//!
//! let a = letter('A')?;
//! let d = letter('D')?;
//! let ticks = sim.deliver(a, d, Bytes::from_static(b"hello"), 200)?;
//!
//! assert!(ticks.is_some());
//! assert_eq!(sim.current_path(a, d).unwrap().to_string(), "A -> B -> D");
//! ```

pub mod air;
pub mod error;
pub mod live;
pub mod scenarios;
pub mod simulation;
pub mod topology;

#[cfg(test)]
mod integration_scenarios;

// Re-export main types
pub use air::{Air, AirStats, AirTransport, InboundFrame};
pub use error::{SimError, SimResult};
pub use live::{Delivery, LiveMesh, TokioClock};
pub use simulation::{NodeReport, SimConfig, SimEvent, SimReport, SimStats, Simulation};
pub use topology::{
    LinkState, Mesh, MeshBuilder, MeshMetric, SharedMesh, from_edges, letter, node_addr,
};
