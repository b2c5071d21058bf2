use huddle_protocol::ParticipantId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::capture::CaptureError;
use crate::negotiation::RemoteMedia;

/// Where remote participants show up and disappear. Calls arrive from the
/// orchestrator and session tasks; implementations must not block.
pub trait Presenter: Send + Sync {
    /// First remote track of `id` arrived.
    fn peer_connected(&self, id: &ParticipantId, display_name: &str, media: &RemoteMedia);
    fn peer_removed(&self, id: &ParticipantId);
    fn capture_failed(&self, error: &CaptureError) {
        let _ = error;
    }
}

/// Headless presenter: every change becomes a log line.
#[derive(Debug, Default)]
pub struct LogPresenter;

impl Presenter for LogPresenter {
    fn peer_connected(&self, id: &ParticipantId, display_name: &str, media: &RemoteMedia) {
        info!(
            peer = %id,
            name = display_name,
            track = %media.track_id,
            kind = media.kind.as_str(),
            "participant joined the call"
        );
    }

    fn peer_removed(&self, id: &ParticipantId) {
        info!(peer = %id, "participant left the call");
    }

    fn capture_failed(&self, error: &CaptureError) {
        warn!("local capture unavailable, joining receive-only: {}", error);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenterEvent {
    PeerConnected {
        id: ParticipantId,
        display_name: String,
        media: RemoteMedia,
    },
    PeerRemoved {
        id: ParticipantId,
    },
    CaptureFailed(CaptureError),
}

/// Forwards presentation changes into a channel, for a UI loop that lives
/// elsewhere.
#[derive(Debug)]
pub struct ChannelPresenter {
    tx: mpsc::UnboundedSender<PresenterEvent>,
}

impl ChannelPresenter {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<PresenterEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn emit(&self, event: PresenterEvent) {
        let _ = self.tx.send(event);
    }
}

impl Presenter for ChannelPresenter {
    fn peer_connected(&self, id: &ParticipantId, display_name: &str, media: &RemoteMedia) {
        self.emit(PresenterEvent::PeerConnected {
            id: id.clone(),
            display_name: display_name.to_owned(),
            media: media.clone(),
        });
    }

    fn peer_removed(&self, id: &ParticipantId) {
        self.emit(PresenterEvent::PeerRemoved { id: id.clone() });
    }

    fn capture_failed(&self, error: &CaptureError) {
        self.emit(PresenterEvent::CaptureFailed(error.clone()));
    }
}
