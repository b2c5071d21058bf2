//! The mesh: one participant's view of the call.
//!
//! Joining broadcasts an announce. Every participant already in the call
//! answers the broadcast by opening an answering session and sending a
//! directed announce back; the newcomer opens an offering session for each
//! directed announce it receives. Each pair therefore negotiates exactly
//! once, with the roles decided before any description is exchanged. Two
//! participants that join at the same moment both answer; the directed
//! replies then hand the offer to the smaller id.

use huddle_protocol::{Destination, ParticipantId, Payload, SignalMessage};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use crate::capture::{CaptureDevice, LocalStream, MediaConstraints};
use crate::error::MeshError;
use crate::negotiation::NegotiatorFactory;
use crate::presentation::Presenter;
use crate::registry::SessionRegistry;
use crate::relay_link::RelayLink;
use crate::session::{self, Role, SessionEnded, SessionHandle, SessionParams, SessionSnapshot};

/// Acquire the local stream once, before joining. On failure the presenter
/// is told and the participant continues receive-only.
pub async fn acquire_local_media(
    device: &dyn CaptureDevice,
    constraints: &MediaConstraints,
    presenter: &dyn Presenter,
) -> Option<LocalStream> {
    match device.acquire(constraints).await {
        Ok(stream) => {
            info!(
                stream = %stream.id,
                tracks = stream.tracks.len(),
                "local media acquired"
            );
            Some(stream)
        }
        Err(err) => {
            warn!("local media capture failed: {}", err);
            presenter.capture_failed(&err);
            None
        }
    }
}

pub struct MeshBuilder {
    display_name: String,
    local_id: Option<ParticipantId>,
    local_media: Option<LocalStream>,
}

impl MeshBuilder {
    /// Use a fixed id instead of a generated one.
    pub fn local_id(mut self, id: ParticipantId) -> Self {
        self.local_id = Some(id);
        self
    }

    pub fn local_media(mut self, media: Option<LocalStream>) -> Self {
        self.local_media = media;
        self
    }

    pub fn build(
        self,
        factory: Arc<dyn NegotiatorFactory>,
        presenter: Arc<dyn Presenter>,
        outbox: mpsc::UnboundedSender<SignalMessage>,
    ) -> Mesh {
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        Mesh {
            local_id: self.local_id.unwrap_or_else(ParticipantId::generate),
            display_name: self.display_name,
            local_media: self.local_media,
            factory,
            presenter,
            outbox,
            registry: SessionRegistry::default(),
            ended_tx,
            ended_rx: Mutex::new(Some(ended_rx)),
        }
    }
}

pub struct Mesh {
    local_id: ParticipantId,
    display_name: String,
    local_media: Option<LocalStream>,
    factory: Arc<dyn NegotiatorFactory>,
    presenter: Arc<dyn Presenter>,
    outbox: mpsc::UnboundedSender<SignalMessage>,
    registry: SessionRegistry<SessionHandle>,
    ended_tx: mpsc::UnboundedSender<SessionEnded>,
    ended_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionEnded>>>,
}

impl Mesh {
    pub fn builder(display_name: impl Into<String>) -> MeshBuilder {
        MeshBuilder {
            display_name: display_name.into(),
            local_id: None,
            local_media: None,
        }
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn local_media(&self) -> Option<&LocalStream> {
        self.local_media.as_ref()
    }

    /// Current state of every live session, ordered by remote id.
    pub fn sessions(&self) -> Vec<SessionSnapshot> {
        let mut sessions = self.registry.map_all(|_, handle| handle.snapshot());
        sessions.sort_by(|a, b| a.remote.cmp(&b.remote));
        sessions
    }

    pub fn session(&self, remote: &ParticipantId) -> Option<SessionSnapshot> {
        self.registry.with(remote, SessionHandle::snapshot)
    }

    /// Follow one session's state as it changes.
    pub fn watch_session(
        &self,
        remote: &ParticipantId,
    ) -> Option<watch::Receiver<SessionSnapshot>> {
        self.registry.with(remote, SessionHandle::subscribe)
    }

    /// Broadcast our presence to everyone on the relay.
    pub fn announce(&self) -> Result<(), MeshError> {
        info!(id = %self.local_id, name = %self.display_name, "announcing to the call");
        self.send(SignalMessage::announce(
            self.local_id.clone(),
            Destination::All,
            self.display_name.clone(),
        ))
    }

    /// Announce, then route relay traffic until `shutdown` resolves or the
    /// relay goes away. Every session is closed before returning.
    pub async fn run<F>(&self, link: &mut RelayLink, shutdown: F) -> Result<(), MeshError>
    where
        F: Future<Output = ()>,
    {
        let mut ended = self.ended_rx.lock().take().ok_or(MeshError::AlreadyRunning)?;
        let outcome = match self.announce() {
            Ok(()) => self.route(link, &mut ended, shutdown).await,
            Err(err) => Err(err),
        };
        if matches!(outcome, Err(MeshError::RelayClosed)) {
            error!("lost the relay; tearing down every peer session");
        }
        self.shutdown().await;
        outcome
    }

    async fn route<F>(
        &self,
        link: &mut RelayLink,
        ended: &mut mpsc::UnboundedReceiver<SessionEnded>,
        shutdown: F,
    ) -> Result<(), MeshError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                message = link.recv() => match message {
                    Some(message) => self.handle_message(message).await,
                    None => return Err(MeshError::RelayClosed),
                },
                Some(report) = ended.recv() => self.handle_session_ended(report),
                _ = &mut shutdown => {
                    info!("leaving the call");
                    return Ok(());
                }
            }
        }
    }

    /// Act on one relayed message. Messages not addressed to us, including
    /// our own echoes, are ignored.
    pub async fn handle_message(&self, message: SignalMessage) {
        if !message.is_for(&self.local_id) {
            trace!(from = %message.from, dest = %message.dest, "ignoring message not for us");
            return;
        }
        let SignalMessage {
            from,
            dest,
            payload,
        } = message;

        match payload {
            Payload::Announce { display_name } if dest.is_all() => {
                // A newcomer: answer it, then tell it we exist so it offers.
                if self
                    .open_session(from.clone(), display_name, Role::Answerer)
                    .await
                {
                    let reply = SignalMessage::announce(
                        self.local_id.clone(),
                        Destination::Participant(from),
                        self.display_name.clone(),
                    );
                    if self.send(reply).is_err() {
                        warn!("relay link closed before announce reply");
                    }
                }
            }
            Payload::Announce { display_name } => {
                if !self
                    .open_session(from.clone(), display_name, Role::Offerer)
                    .await
                {
                    self.break_tie(&from);
                }
            }
            payload => {
                let kind = payload.kind();
                match self.registry.with(&from, |handle| handle.deliver(payload)) {
                    Some(true) => {}
                    Some(false) => debug!(peer = %from, kind, "session already closing"),
                    None => warn!(peer = %from, kind, "no session for sender; dropping message"),
                }
            }
        }
    }

    async fn open_session(&self, remote: ParticipantId, display_name: String, role: Role) -> bool {
        if self.registry.contains(&remote) {
            debug!(peer = %remote, "already in session; ignoring announce");
            return false;
        }

        let generation = self.registry.next_generation();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let negotiator = match self
            .factory
            .create(&remote, self.local_media.as_ref(), events_tx)
            .await
        {
            Ok(negotiator) => negotiator,
            Err(err) => {
                error!(peer = %remote, "failed to create peer connection: {}", err);
                return false;
            }
        };

        let handle = session::spawn(SessionParams {
            local: self.local_id.clone(),
            remote: remote.clone(),
            display_name: display_name.clone(),
            role,
            generation,
            negotiator,
            events: events_rx,
            outbox: self.outbox.clone(),
            presenter: Arc::clone(&self.presenter),
            ended: self.ended_tx.clone(),
        });

        match self.registry.insert(remote.clone(), generation, handle) {
            Ok(()) => {
                info!(
                    peer = %remote,
                    name = %display_name,
                    role = ?role,
                    sessions = self.registry.len(),
                    "opened peer session"
                );
                true
            }
            Err(duplicate) => {
                debug!(peer = %remote, "lost a race to open the session");
                duplicate.close().await;
                false
            }
        }
    }

    /// A directed announce for a remote we already answer means both sides
    /// answered each other's broadcast. The smaller id offers; the session
    /// ignores the switch once negotiation has started.
    fn break_tie(&self, remote: &ParticipantId) {
        if self.local_id >= *remote {
            return;
        }
        if let Some(true) = self.registry.with(remote, SessionHandle::take_offer) {
            debug!(peer = %remote, "simultaneous join; offering to the larger id");
        }
    }

    /// A session reached a terminal status: evict it and tell the presenter.
    pub(crate) fn handle_session_ended(&self, report: SessionEnded) {
        match self
            .registry
            .remove(&report.remote, Some(report.generation))
        {
            Some(_) => {
                info!(peer = %report.remote, status = %report.status, "peer evicted");
                self.presenter.peer_removed(&report.remote);
            }
            None => debug!(
                peer = %report.remote,
                generation = report.generation,
                "ignoring end of a session that is no longer registered"
            ),
        }
    }

    /// Close every session and clear the registry.
    pub async fn shutdown(&self) {
        let sessions = self.registry.drain();
        if !sessions.is_empty() {
            info!(count = sessions.len(), "closing peer sessions");
        }
        for (remote, handle) in sessions {
            handle.close().await;
            self.presenter.peer_removed(&remote);
        }
    }

    fn send(&self, message: SignalMessage) -> Result<(), MeshError> {
        self.outbox
            .send(message)
            .map_err(|_| MeshError::RelayClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::SyntheticCapture;
    use crate::negotiation::mock::MockFactory;
    use crate::negotiation::ConnectivityStatus;
    use crate::presentation::{ChannelPresenter, PresenterEvent};
    use crate::session::NegotiationState;
    use huddle_protocol::{IceCandidate, SdpKind};
    use std::time::Duration;
    use tokio::time::{sleep, timeout, Instant};

    struct Peer {
        mesh: Mesh,
        factory: Arc<MockFactory>,
        outbox: mpsc::UnboundedReceiver<SignalMessage>,
        presented: mpsc::UnboundedReceiver<PresenterEvent>,
    }

    fn peer(id: &str, name: &str) -> Peer {
        let factory = MockFactory::new(id);
        let (presenter, presented) = ChannelPresenter::new();
        let (outbox_tx, outbox) = mpsc::unbounded_channel();
        let mesh = Mesh::builder(name)
            .local_id(id.into())
            .build(factory.clone(), presenter, outbox_tx);
        Peer {
            mesh,
            factory,
            outbox,
            presented,
        }
    }

    async fn next_out(peer: &mut Peer) -> SignalMessage {
        timeout(Duration::from_secs(2), peer.outbox.recv())
            .await
            .expect("timed out waiting for outbound message")
            .expect("outbox closed")
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !check() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            sleep(Duration::from_millis(5)).await;
        }
    }

    fn connected(mesh: &Mesh) -> bool {
        mesh.sessions()
            .first()
            .is_some_and(|s| s.media_connected && s.status == ConnectivityStatus::Connected)
    }

    /// Deliver each side's outbound traffic to the other until both report media.
    async fn shuttle_until_connected(a: &mut Peer, b: &mut Peer) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !(connected(&a.mesh) && connected(&b.mesh)) {
            assert!(Instant::now() < deadline, "pair never connected");
            while let Ok(message) = a.outbox.try_recv() {
                b.mesh.handle_message(message).await;
            }
            while let Ok(message) = b.outbox.try_recv() {
                a.mesh.handle_message(message).await;
            }
            sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn broadcast_announce_opens_answerer_and_replies_directly() {
        let mut b = peer("b", "Bo");
        b.mesh
            .handle_message(SignalMessage::announce("a".into(), Destination::All, "Ana"))
            .await;

        let reply = next_out(&mut b).await;
        assert_eq!(reply.from, ParticipantId::from("b"));
        assert_eq!(reply.dest, Destination::Participant("a".into()));
        assert_eq!(
            reply.payload,
            Payload::Announce {
                display_name: "Bo".into()
            }
        );

        let session = b.mesh.session(&"a".into()).unwrap();
        assert_eq!(session.role, Role::Answerer);
        assert_eq!(session.display_name, "Ana");
        assert_eq!(session.negotiation, NegotiationState::New);
    }

    #[tokio::test]
    async fn directed_announce_opens_offerer_that_sends_offer() {
        let mut a = peer("a", "Ana");
        a.mesh
            .handle_message(SignalMessage::announce(
                "b".into(),
                Destination::Participant("a".into()),
                "Bo",
            ))
            .await;

        let offer = next_out(&mut a).await;
        assert_eq!(offer.dest, Destination::Participant("b".into()));
        assert_eq!(offer.payload.description().map(|d| d.kind), Some(SdpKind::Offer));
        assert_eq!(a.mesh.session(&"b".into()).unwrap().role, Role::Offerer);
    }

    #[tokio::test]
    async fn echoes_foreign_messages_and_repeat_announces_are_ignored() {
        let mut b = peer("b", "Bo");
        b.mesh
            .handle_message(SignalMessage::announce("b".into(), Destination::All, "Bo"))
            .await;
        b.mesh
            .handle_message(SignalMessage::announce(
                "a".into(),
                Destination::Participant("c".into()),
                "Ana",
            ))
            .await;
        assert!(b.mesh.sessions().is_empty());
        assert!(b.outbox.try_recv().is_err());

        let announce = SignalMessage::announce("a".into(), Destination::All, "Ana");
        b.mesh.handle_message(announce.clone()).await;
        let _reply = next_out(&mut b).await;
        b.mesh.handle_message(announce).await;
        assert_eq!(b.mesh.sessions().len(), 1);
        assert_eq!(b.factory.created(), 1);
        sleep(Duration::from_millis(20)).await;
        assert!(b.outbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn signaling_for_unknown_sender_is_dropped() {
        let b = peer("b", "Bo");
        b.mesh
            .handle_message(SignalMessage::candidate(
                "z".into(),
                "b".into(),
                IceCandidate::new("candidate:1"),
            ))
            .await;
        assert!(b.mesh.sessions().is_empty());
        assert_eq!(b.factory.created(), 0);
    }

    #[tokio::test]
    async fn two_meshes_negotiate_one_connection() {
        let mut a = peer("a", "Ana");
        let mut b = peer("b", "Bo");

        // a joins; b is already in the call.
        a.mesh.announce().unwrap();
        let join = next_out(&mut a).await;
        b.mesh.handle_message(join).await;
        let reply = next_out(&mut b).await;
        a.mesh.handle_message(reply).await;

        shuttle_until_connected(&mut a, &mut b).await;

        assert_eq!(a.mesh.session(&"b".into()).unwrap().role, Role::Offerer);
        assert_eq!(b.mesh.session(&"a".into()).unwrap().role, Role::Answerer);
        assert!(matches!(
            a.presented.try_recv(),
            Ok(PresenterEvent::PeerConnected { display_name, .. }) if display_name == "Bo"
        ));
        assert!(matches!(
            b.presented.try_recv(),
            Ok(PresenterEvent::PeerConnected { display_name, .. }) if display_name == "Ana"
        ));
    }

    #[tokio::test]
    async fn simultaneous_joins_hand_the_offer_to_the_smaller_id() {
        let mut a = peer("a", "Ana");
        let mut b = peer("b", "Bo");

        // Both broadcast before either hears the other.
        a.mesh.announce().unwrap();
        b.mesh.announce().unwrap();
        let a_join = next_out(&mut a).await;
        let b_join = next_out(&mut b).await;
        a.mesh.handle_message(b_join).await;
        b.mesh.handle_message(a_join).await;
        assert_eq!(a.mesh.session(&"b".into()).unwrap().role, Role::Answerer);
        assert_eq!(b.mesh.session(&"a".into()).unwrap().role, Role::Answerer);

        // The directed replies cross.
        let a_reply = next_out(&mut a).await;
        let b_reply = next_out(&mut b).await;
        let mut b_side = b.mesh.watch_session(&"a".into()).unwrap();
        a.mesh.handle_message(b_reply).await;
        b.mesh.handle_message(a_reply).await;

        shuttle_until_connected(&mut a, &mut b).await;
        assert_eq!(a.mesh.session(&"b".into()).unwrap().role, Role::Offerer);
        assert_eq!(b.mesh.session(&"a".into()).unwrap().role, Role::Answerer);
        assert_eq!(a.factory.created(), 1);
        assert_eq!(b.factory.created(), 1);

        let snapshot = b_side.borrow_and_update().clone();
        assert_eq!(snapshot.negotiation, NegotiationState::Stable);
        assert!(snapshot.media_connected);
    }

    #[tokio::test]
    async fn failed_peer_connection_only_affects_its_remote() {
        let (presenter, _presented) = ChannelPresenter::new();
        let media = acquire_local_media(
            &SyntheticCapture::default(),
            &MediaConstraints {
                audio: true,
                ..MediaConstraints::default()
            },
            presenter.as_ref(),
        )
        .await
        .unwrap();
        let factory = MockFactory::new("b");
        let (outbox_tx, mut outbox) = mpsc::unbounded_channel();
        let mesh = Mesh::builder("Bo")
            .local_id("b".into())
            .local_media(Some(media.clone()))
            .build(factory.clone(), presenter, outbox_tx);

        factory.fail_next_create();
        mesh.handle_message(SignalMessage::announce("a".into(), Destination::All, "Ana"))
            .await;
        assert!(mesh.session(&"a".into()).is_none());
        assert!(outbox.try_recv().is_err());

        mesh.handle_message(SignalMessage::announce("c".into(), Destination::All, "Cy"))
            .await;
        let reply = timeout(Duration::from_secs(2), outbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.dest, Destination::Participant("c".into()));
        assert_eq!(mesh.sessions().len(), 1);

        let to_c = factory.negotiator(&"c".into()).unwrap();
        assert_eq!(to_c.remote(), &ParticipantId::from("c"));
        assert_eq!(media.tracks.len(), 2);
        assert_eq!(to_c.attached_tracks(), media.tracks.len());

        // The failed remote can still join on a later announce.
        mesh.handle_message(SignalMessage::announce("a".into(), Destination::All, "Ana"))
            .await;
        assert!(mesh.session(&"a".into()).is_some());
        assert_eq!(factory.negotiator(&"a".into()).unwrap().attached_tracks(), 2);
    }

    #[tokio::test]
    async fn terminal_status_evicts_and_notifies() {
        let Peer {
            mesh,
            factory,
            mut presented,
            outbox: _outbox,
        } = peer("b", "Bo");
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let mut link = RelayLink::from_channels(mpsc::unbounded_channel().0, link_rx);
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let mesh = Arc::new(mesh);
        let runner = tokio::spawn({
            let mesh = Arc::clone(&mesh);
            async move {
                mesh.run(&mut link, async {
                    let _ = stop_rx.await;
                })
                .await
            }
        });

        link_tx
            .send(SignalMessage::announce("a".into(), Destination::All, "Ana"))
            .unwrap();
        wait_until(|| factory.negotiator(&"a".into()).is_some()).await;
        let negotiator = factory.negotiator(&"a".into()).unwrap();
        wait_until(|| mesh.session(&"a".into()).is_some()).await;

        negotiator.emit_status(ConnectivityStatus::Disconnected);
        wait_until(|| mesh.sessions().is_empty()).await;
        assert!(negotiator.is_closed());
        assert_eq!(
            timeout(Duration::from_secs(2), presented.recv()).await.unwrap(),
            Some(PresenterEvent::PeerRemoved { id: "a".into() })
        );

        stop_tx.send(()).unwrap();
        assert!(runner.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn relay_loss_tears_down_every_session() {
        let Peer {
            mesh,
            factory,
            mut outbox,
            ..
        } = peer("b", "Bo");
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let mut link = RelayLink::from_channels(mpsc::unbounded_channel().0, link_rx);

        for remote in ["a", "c"] {
            link_tx
                .send(SignalMessage::announce(remote.into(), Destination::All, remote))
                .unwrap();
        }
        let mesh = Arc::new(mesh);
        let runner = tokio::spawn({
            let mesh = Arc::clone(&mesh);
            async move { mesh.run(&mut link, std::future::pending()).await }
        });
        wait_until(|| mesh.sessions().len() == 2).await;
        drop(link_tx);

        let outcome = timeout(Duration::from_secs(2), runner).await.unwrap().unwrap();
        assert!(matches!(outcome, Err(MeshError::RelayClosed)));
        assert!(mesh.sessions().is_empty());
        assert!(factory.negotiator(&"a".into()).unwrap().is_closed());
        assert!(factory.negotiator(&"c".into()).unwrap().is_closed());
        // The first outbound message is our own broadcast announce.
        assert!(outbox.try_recv().unwrap().dest.is_all());
    }

    #[tokio::test]
    async fn run_twice_is_rejected() {
        let b = peer("b", "Bo");
        let (_link_tx, link_rx) = mpsc::unbounded_channel();
        let mut link = RelayLink::from_channels(mpsc::unbounded_channel().0, link_rx);
        b.mesh.run(&mut link, async {}).await.unwrap();
        assert!(matches!(
            b.mesh.run(&mut link, async {}).await,
            Err(MeshError::AlreadyRunning)
        ));
    }

    #[tokio::test]
    async fn capture_failure_joins_receive_only() {
        let (presenter, mut presented) = ChannelPresenter::new();
        let device = SyntheticCapture {
            permitted: false,
            ..SyntheticCapture::default()
        };
        let media =
            acquire_local_media(&device, &MediaConstraints::default(), presenter.as_ref()).await;
        assert!(media.is_none());
        assert!(matches!(
            presented.try_recv(),
            Ok(PresenterEvent::CaptureFailed(_))
        ));

        let media = acquire_local_media(
            &SyntheticCapture::default(),
            &MediaConstraints::default(),
            presenter.as_ref(),
        )
        .await;
        assert_eq!(media.map(|m| m.tracks.len()), Some(1));
    }
}
