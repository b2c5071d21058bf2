//! In-process negotiator that follows the offer/answer signaling state
//! machine without any media stack. Two mocks wired through the relay
//! reach `Connected` once both descriptions are applied.

use async_trait::async_trait;
use huddle_protocol::{IceCandidate, ParticipantId, SdpKind, SessionDescription};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use super::{
    ConnectivityStatus, EventSink, NegotiationError, NegotiationEvent, Negotiator,
    NegotiatorFactory, RemoteMedia,
};
use crate::capture::{LocalStream, TrackKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

#[derive(Debug)]
struct MockState {
    signaling: SignalingState,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    remote_candidates: Vec<IceCandidate>,
    status: ConnectivityStatus,
}

pub struct MockNegotiator {
    label: String,
    remote: ParticipantId,
    auto_connect: bool,
    attached_tracks: usize,
    events: EventSink,
    state: Mutex<MockState>,
    sequence: AtomicU32,
}

impl MockNegotiator {
    pub fn new(label: impl Into<String>, remote: ParticipantId, events: EventSink) -> Self {
        Self {
            label: label.into(),
            remote,
            auto_connect: true,
            attached_tracks: 0,
            events,
            state: Mutex::new(MockState {
                signaling: SignalingState::Stable,
                local: None,
                remote: None,
                remote_candidates: Vec::new(),
                status: ConnectivityStatus::New,
            }),
            sequence: AtomicU32::new(0),
        }
    }

    pub fn remote(&self) -> &ParticipantId {
        &self.remote
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.state.lock().signaling
    }

    pub fn status(&self) -> ConnectivityStatus {
        self.state.lock().status
    }

    /// Local tracks the factory attached at creation.
    pub fn attached_tracks(&self) -> usize {
        self.attached_tracks
    }

    pub fn is_closed(&self) -> bool {
        self.signaling_state() == SignalingState::Closed
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().remote_candidates.clone()
    }

    /// Force a connectivity transition, as a network change would.
    pub fn emit_status(&self, status: ConnectivityStatus) {
        self.state.lock().status = status;
        let _ = self.events.send(NegotiationEvent::Status(status));
    }

    /// Announce an extra local candidate, as late gathering would.
    pub fn emit_candidate(&self) -> IceCandidate {
        let candidate = self.next_candidate();
        let _ = self.events.send(NegotiationEvent::Candidate(candidate.clone()));
        candidate
    }

    fn next_candidate(&self) -> IceCandidate {
        let n = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        IceCandidate {
            candidate: format!(
                "candidate:{n} 1 udp 2122260223 10.0.0.{n} {} typ host",
                50000 + n
            ),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: Some(self.label.clone()),
        }
    }

    fn fake_sdp(&self, kind: SdpKind) -> String {
        let n = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let kind = match kind {
            SdpKind::Offer => "offer",
            SdpKind::Answer => "answer",
        };
        format!(
            "v=0\r\no=mock-{} {n} 1 IN IP4 127.0.0.1\r\ns={kind} for {}\r\nt=0 0\r\n",
            self.label, self.remote
        )
    }

    fn ensure_open(state: &MockState) -> Result<(), NegotiationError> {
        if state.signaling == SignalingState::Closed {
            Err(NegotiationError::Closed)
        } else {
            Ok(())
        }
    }

    fn invalid(state: &MockState, op: &str) -> NegotiationError {
        NegotiationError::InvalidState(format!("{:?} cannot {op}", state.signaling))
    }

    // Called with the lock released; events may be consumed synchronously.
    fn after_transition(&self, gathered: bool, completed: bool) {
        if gathered {
            let candidate = self.next_candidate();
            let _ = self.events.send(NegotiationEvent::Candidate(candidate));
        }
        if completed && self.auto_connect {
            self.emit_status(ConnectivityStatus::Checking);
            self.emit_status(ConnectivityStatus::Connected);
            let _ = self.events.send(NegotiationEvent::RemoteTrack(RemoteMedia {
                stream_id: format!("stream-{}", self.remote),
                track_id: format!("video-{}", self.remote),
                kind: TrackKind::Video,
            }));
        }
    }
}

#[async_trait]
impl Negotiator for MockNegotiator {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let state = self.state.lock();
        Self::ensure_open(&state)?;
        if state.signaling != SignalingState::Stable || state.remote.is_some() {
            return Err(Self::invalid(&state, "create an offer"));
        }
        drop(state);
        Ok(SessionDescription::offer(self.fake_sdp(SdpKind::Offer)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let state = self.state.lock();
        Self::ensure_open(&state)?;
        if state.signaling != SignalingState::HaveRemoteOffer {
            return Err(Self::invalid(&state, "create an answer"));
        }
        drop(state);
        Ok(SessionDescription::answer(self.fake_sdp(SdpKind::Answer)))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let completed = {
            let mut state = self.state.lock();
            Self::ensure_open(&state)?;
            let next = match (description.kind, state.signaling) {
                (SdpKind::Offer, SignalingState::Stable) => SignalingState::HaveLocalOffer,
                (SdpKind::Answer, SignalingState::HaveRemoteOffer) => SignalingState::Stable,
                _ => return Err(Self::invalid(&state, "apply a local description")),
            };
            state.signaling = next;
            state.local = Some(description);
            next == SignalingState::Stable
        };
        self.after_transition(true, completed);
        Ok(())
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let completed = {
            let mut state = self.state.lock();
            Self::ensure_open(&state)?;
            let next = match (description.kind, state.signaling) {
                (SdpKind::Offer, SignalingState::Stable) if state.local.is_none() => {
                    SignalingState::HaveRemoteOffer
                }
                (SdpKind::Answer, SignalingState::HaveLocalOffer) => SignalingState::Stable,
                _ => return Err(Self::invalid(&state, "apply a remote description")),
            };
            state.signaling = next;
            state.remote = Some(description);
            next == SignalingState::Stable
        };
        self.after_transition(false, completed);
        Ok(())
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        let mut state = self.state.lock();
        Self::ensure_open(&state)?;
        if state.remote.is_none() {
            return Err(NegotiationError::InvalidState(
                "remote description not set".into(),
            ));
        }
        state.remote_candidates.push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        {
            let mut state = self.state.lock();
            if state.signaling == SignalingState::Closed {
                return Ok(());
            }
            state.signaling = SignalingState::Closed;
        }
        self.emit_status(ConnectivityStatus::Closed);
        Ok(())
    }
}

/// Hands out [`MockNegotiator`]s and keeps them reachable by remote id so
/// tests can inspect or poke them.
pub struct MockFactory {
    label: String,
    auto_connect: bool,
    created: Mutex<HashMap<ParticipantId, Arc<MockNegotiator>>>,
    fail_next: Mutex<bool>,
}

impl MockFactory {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            auto_connect: true,
            created: Mutex::new(HashMap::new()),
            fail_next: Mutex::new(false),
        })
    }

    /// Negotiators stay in `New` until a test drives them with
    /// [`MockNegotiator::emit_status`].
    pub fn manual(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            auto_connect: false,
            created: Mutex::new(HashMap::new()),
            fail_next: Mutex::new(false),
        })
    }

    pub fn negotiator(&self, remote: &ParticipantId) -> Option<Arc<MockNegotiator>> {
        self.created.lock().get(remote).cloned()
    }

    pub fn created(&self) -> usize {
        self.created.lock().len()
    }

    pub fn fail_next_create(&self) {
        *self.fail_next.lock() = true;
    }
}

#[async_trait]
impl NegotiatorFactory for MockFactory {
    async fn create(
        &self,
        remote: &ParticipantId,
        local_media: Option<&LocalStream>,
        events: EventSink,
    ) -> Result<Arc<dyn Negotiator>, NegotiationError> {
        if std::mem::take(&mut *self.fail_next.lock()) {
            return Err(NegotiationError::Backend("injected factory failure".into()));
        }
        let mut negotiator = MockNegotiator::new(self.label.clone(), remote.clone(), events);
        negotiator.auto_connect = self.auto_connect;
        negotiator.attached_tracks = local_media.map_or(0, |stream| stream.tracks.len());
        let negotiator = Arc::new(negotiator);
        self.created
            .lock()
            .insert(remote.clone(), Arc::clone(&negotiator));
        Ok(negotiator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn pair() -> (
        MockNegotiator,
        mpsc::UnboundedReceiver<NegotiationEvent>,
        MockNegotiator,
        mpsc::UnboundedReceiver<NegotiationEvent>,
    ) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        (
            MockNegotiator::new("a", "b".into(), tx_a),
            rx_a,
            MockNegotiator::new("b", "a".into(), tx_b),
            rx_b,
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<NegotiationEvent>) -> Vec<NegotiationEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn offer_answer_reaches_connected_on_both_sides() {
        let (a, mut rx_a, b, mut rx_b) = pair();

        let offer = a.create_offer().await.unwrap();
        a.set_local_description(offer.clone()).await.unwrap();
        assert_eq!(a.signaling_state(), SignalingState::HaveLocalOffer);

        b.set_remote_description(offer).await.unwrap();
        let answer = b.create_answer().await.unwrap();
        b.set_local_description(answer.clone()).await.unwrap();
        a.set_remote_description(answer).await.unwrap();

        assert_eq!(a.signaling_state(), SignalingState::Stable);
        assert_eq!(b.status(), ConnectivityStatus::Connected);

        let events_a = drain(&mut rx_a);
        assert!(matches!(events_a[0], NegotiationEvent::Candidate(_)));
        assert!(events_a.contains(&NegotiationEvent::Status(ConnectivityStatus::Connected)));
        assert!(drain(&mut rx_b)
            .iter()
            .any(|event| matches!(event, NegotiationEvent::RemoteTrack(_))));
    }

    #[tokio::test]
    async fn rejects_out_of_order_operations() {
        let (a, _rx_a, b, _rx_b) = pair();
        assert!(matches!(
            a.create_answer().await,
            Err(NegotiationError::InvalidState(_))
        ));
        assert!(b
            .set_remote_description(SessionDescription::answer("v=0"))
            .await
            .is_err());
        assert!(a
            .add_candidate(IceCandidate::new("candidate:1"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn close_is_final() {
        let (a, mut rx_a, _b, _rx_b) = pair();
        a.close().await.unwrap();
        a.close().await.unwrap();
        assert!(a.is_closed());
        assert!(matches!(a.create_offer().await, Err(NegotiationError::Closed)));
        assert_eq!(
            drain(&mut rx_a),
            vec![NegotiationEvent::Status(ConnectivityStatus::Closed)]
        );
    }

    #[tokio::test]
    async fn factory_tracks_negotiators_and_can_fail() {
        let factory = MockFactory::manual("a");
        let (tx, _rx) = mpsc::unbounded_channel();
        factory.create(&"b".into(), None, tx.clone()).await.unwrap();
        assert_eq!(factory.created(), 1);
        assert!(factory.negotiator(&"b".into()).is_some());

        factory.fail_next_create();
        assert!(factory.create(&"c".into(), None, tx.clone()).await.is_err());
        assert!(factory.create(&"c".into(), None, tx).await.is_ok());
    }
}
