//! Seam between a peer session and the media stack.
//!
//! A [`Negotiator`] is one peer connection: it produces and consumes session
//! descriptions and candidates, and reports everything it learns
//! asynchronously through the [`EventSink`] it was created with. The session
//! that owns it is the only caller, so implementations never see concurrent
//! operations.

pub mod mock;
pub mod webrtc;

use async_trait::async_trait;
use huddle_protocol::{IceCandidate, ParticipantId, SessionDescription};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::capture::{LocalStream, TrackKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityStatus {
    New,
    Checking,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectivityStatus {
    /// Disconnected, failed and closed sessions are evicted immediately.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectivityStatus::Disconnected
                | ConnectivityStatus::Failed
                | ConnectivityStatus::Closed
        )
    }
}

impl fmt::Display for ConnectivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectivityStatus::New => "new",
            ConnectivityStatus::Checking => "checking",
            ConnectivityStatus::Connected => "connected",
            ConnectivityStatus::Disconnected => "disconnected",
            ConnectivityStatus::Failed => "failed",
            ConnectivityStatus::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// A track the remote side started sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMedia {
    pub stream_id: String,
    pub track_id: String,
    pub kind: TrackKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationEvent {
    /// A local candidate was gathered and must be sent to the remote.
    Candidate(IceCandidate),
    Status(ConnectivityStatus),
    RemoteTrack(RemoteMedia),
}

pub type EventSink = mpsc::UnboundedSender<NegotiationEvent>;

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("operation not valid in signaling state {0}")]
    InvalidState(String),
    #[error("negotiator is closed")]
    Closed,
    #[error("media stack error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait Negotiator: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError>;
    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;
    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;
    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError>;
    async fn close(&self) -> Result<(), NegotiationError>;
}

/// Builds one negotiator per remote participant, with the local stream (if
/// any) already attached.
#[async_trait]
pub trait NegotiatorFactory: Send + Sync {
    async fn create(
        &self,
        remote: &ParticipantId,
        local_media: Option<&LocalStream>,
        events: EventSink,
    ) -> Result<Arc<dyn Negotiator>, NegotiationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(ConnectivityStatus::Failed.is_terminal());
        assert!(ConnectivityStatus::Disconnected.is_terminal());
        assert!(ConnectivityStatus::Closed.is_terminal());
        assert!(!ConnectivityStatus::Checking.is_terminal());
        assert!(!ConnectivityStatus::Connected.is_terminal());
        assert_eq!(ConnectivityStatus::Failed.to_string(), "failed");
    }
}
