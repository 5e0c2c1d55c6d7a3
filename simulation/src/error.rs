//! Simulation errors

use srcr_core::NodeAddr;
use srcr_routing::{ConfigError, RoutingError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Unknown node: {0}")]
    UnknownNode(NodeAddr),

    #[error("Invalid node name: {0:?}")]
    InvalidName(char),

    #[error("Mesh size {0} out of range (1..=254)")]
    InvalidSize(usize),

    #[error("Engine configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),
}

pub type SimResult<T> = Result<T, SimError>;
