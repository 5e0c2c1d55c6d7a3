//! Routing error types
//!
//! Nothing the engine does is fatal. These errors are the explicit result
//! states handed back to the caller of `start_data` and the builder; inbound
//! packet problems are reported as [`DropReason`](crate::DropReason) instead.

use thiserror::Error;

use srcr_core::{NodeAddr, TransportError, WireError};

/// Errors returned by engine operations
#[derive(Debug, Error)]
pub enum RoutingError {
    /// No cached path to the destination
    ///
    /// Recoverable: the caller retries once discovery completes.
    #[error("No route to {destination} (discovery started: {discovery_started})")]
    NoRoute {
        destination: NodeAddr,
        discovery_started: bool,
    },

    /// The first hop of the cached path is blacklisted
    ///
    /// The path has been invalidated; the next send starts discovery.
    #[error("Next hop {next_hop} towards {destination} is blacklisted")]
    NextHopBlacklisted {
        destination: NodeAddr,
        next_hop: NodeAddr,
    },

    /// Link-layer address of the next hop is still being resolved
    #[error("Link address of next hop {next_hop} is not resolved")]
    NextHopUnresolved { next_hop: NodeAddr },

    /// Data addressed to this node itself
    #[error("Destination {0} is the local node")]
    LocalDestination(NodeAddr),

    /// Packet could not be encoded or decoded
    #[error("Wire error: {0}")]
    Wire(#[from] WireError),

    /// Transport refused the frame
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl RoutingError {
    /// Whether the caller can retry the same send later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RoutingError::NoRoute { .. }
                | RoutingError::NextHopBlacklisted { .. }
                | RoutingError::NextHopUnresolved { .. }
                | RoutingError::Transport(_)
        )
    }
}

/// Errors raised while assembling an engine
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required collaborator was not supplied to the builder
    #[error("Missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// A configuration value makes the engine unusable
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Result type for routing operations
pub type RoutingResult<T> = Result<T, RoutingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_route_is_retryable() {
        let err = RoutingError::NoRoute {
            destination: NodeAddr::from_letter('D').unwrap(),
            discovery_started: true,
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("10.0.0.4"));

        let err = RoutingError::LocalDestination(NodeAddr::from_letter('A').unwrap());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_wire_error_converts() {
        let err: RoutingError = WireError::EmptyHopList.into();
        assert!(matches!(err, RoutingError::Wire(WireError::EmptyHopList)));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingCollaborator("transport");
        assert_eq!(err.to_string(), "Missing collaborator: transport");

        let err = ConfigError::InvalidValue {
            field: "max_seen",
            reason: "must be at least 1".into(),
        };
        assert!(err.to_string().contains("max_seen"));
    }
}
