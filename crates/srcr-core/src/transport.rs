//! Transport abstraction for putting frames on the air
//!
//! The [`Transport`] trait is the only way the engine emits traffic. It
//! hands over fully encoded protocol frames; framing, ethertype and
//! anything below the logical packet are the transport's concern.
//!
//! ## Implementations
//!
//! - [`RecordingTransport`](crate::mock::RecordingTransport): Captures frames for tests
//! - `AirTransport`: Shared in-memory medium (in the simulation crate)

use bytes::Bytes;

use crate::addr::{LinkAddr, NodeAddr};
use crate::error::TransportError;

/// Link-layer output for encoded protocol frames
///
/// Both calls must return promptly. The engine never waits on delivery;
/// a unicast the link layer later fails to deliver is handed back through
/// the engine's `delivery_failed` entry point (or `link_failure` when only
/// the neighbor is known).
pub trait Transport: Send + Sync {
    /// Send a routing control frame (query, reply, link error)
    ///
    /// `dst` may be [`LinkAddr::BROADCAST`].
    fn send_protocol_frame(&self, dst: LinkAddr, frame: Bytes) -> Result<(), TransportError>;

    /// Send a data frame to a single neighbor
    fn send_data_frame(&self, dst: LinkAddr, frame: Bytes) -> Result<(), TransportError>;
}

/// Network to link-layer address resolution (ARP-style)
pub trait AddressResolver: Send + Sync {
    /// Link address of `addr`, or `None` while resolution is pending
    fn resolve(&self, addr: &NodeAddr) -> Option<LinkAddr>;
}

/// Resolver that derives link addresses from node addresses
///
/// Matches [`LinkAddr::for_node`], the addressing scheme used by the
/// simulator.
#[derive(Debug, Clone, Copy, Default)]
pub struct DerivedResolver;

impl AddressResolver for DerivedResolver {
    fn resolve(&self, addr: &NodeAddr) -> Option<LinkAddr> {
        Some(LinkAddr::for_node(*addr))
    }
}
