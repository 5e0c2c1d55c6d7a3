//! # SRCR Core
//!
//! Core types, traits, and errors for the SRCR source-routed mesh protocol.
//!
//! This crate holds everything the routing engine shares with its host:
//! addresses, the on-air packet format, and the collaborator traits the
//! engine calls out to. Keeping these here lets the same engine run against
//! a real radio driver or the in-memory mocks used by tests and the
//! simulator.
//!
//! ## Key Traits
//!
//! - [`MetricOracle`]: Per-neighbor link cost estimator (0 = unusable)
//! - [`TopologySink`]: Receives observed link costs
//! - [`NeighborSource`]: Supplies a random neighbor for exploration
//! - [`Transport`]: Puts encoded frames on the link layer
//! - [`AddressResolver`]: Maps network addresses to link addresses
//! - [`Clock`]: Time abstraction for testability
//!
//! ## Key Types
//!
//! - [`NodeAddr`] / [`LinkAddr`]: Network and link-layer addresses
//! - [`Packet`]: Decoded protocol message (query, reply, data, link error)
//! - [`Path`] / [`Hop`]: Source routes with per-hop link metrics

pub mod addr;
pub mod error;
pub mod mock;
pub mod path;
pub mod traits;
pub mod transport;
pub mod wire;

// Re-export main types
pub use addr::*;
pub use error::*;
pub use path::*;
pub use traits::*;
pub use transport::*;
pub use wire::*;
