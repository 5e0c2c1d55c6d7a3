//! Error types for SRCR

use thiserror::Error;

/// Top-level error type for SRCR
#[derive(Debug, Error)]
pub enum SrcrError {
    #[error("Address error: {0}")]
    Address(#[from] AddressError),

    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Errors related to node and link addresses
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("Invalid address format: {0}")]
    InvalidFormat(String),

    #[error("Invalid address length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Errors raised while decoding a frame
///
/// The engine never surfaces these to its host; a frame that fails to
/// decode is counted and dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("Frame truncated: needed {needed} bytes, had {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Unsupported wire version: {0}")]
    UnsupportedVersion(u8),

    #[error("Unknown packet type: {0}")]
    UnknownType(u8),

    #[error("Packet carries no hops")]
    EmptyHopList,

    #[error("Too many hops: {0}")]
    TooManyHops(usize),

    #[error("Cursor {cursor} out of range for {hops} hops")]
    CursorOutOfRange { cursor: u8, hops: usize },

    #[error("Body too large: {size} bytes (max {max})")]
    BodyTooLarge { size: usize, max: usize },

    #[error("Invalid body length for {kind}: {len}")]
    InvalidBody { kind: &'static str, len: usize },

    #[error("{0} trailing bytes after packet")]
    TrailingBytes(usize),
}

/// Errors related to transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Link down: {0}")]
    LinkDown(String),

    #[error("Frame too large: {size} bytes (mtu {mtu})")]
    FrameTooLarge { size: usize, mtu: usize },
}

/// Result type alias for SRCR core operations
pub type SrcrResult<T> = Result<T, SrcrError>;
