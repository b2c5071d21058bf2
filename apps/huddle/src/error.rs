use thiserror::Error;

use crate::negotiation::NegotiationError;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("invalid relay url {url:?}: {reason}")]
    InvalidRelayUrl { url: String, reason: String },
    #[error("could not connect to relay at {url}: {reason}")]
    RelayConnect { url: String, reason: String },
    #[error("relay connection closed")]
    RelayClosed,
    #[error("mesh is already running")]
    AlreadyRunning,
    #[error("failed to set up media stack: {0}")]
    Negotiation(#[from] NegotiationError),
}
