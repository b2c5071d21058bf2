//! One peer session per remote participant.
//!
//! Each session is a task that owns its negotiator and consumes two queues:
//! signaling payloads routed to it by the orchestrator, and events reported
//! by the negotiator. Because a single loop handles both, negotiator calls
//! for a given remote never interleave.

use huddle_protocol::{IceCandidate, ParticipantId, Payload, SessionDescription, SignalMessage};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::negotiation::{ConnectivityStatus, NegotiationEvent, Negotiator};
use crate::presentation::Presenter;

/// Which side creates the offer. The participant that receives a directed
/// announce offers, the one that receives a broadcast announce answers.
/// When both sides answered each other's broadcast, the smaller id switches
/// to offering before anything is negotiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Offerer,
    Answerer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    New,
    HaveLocalOffer,
    HaveRemoteOffer,
    Stable,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub remote: ParticipantId,
    pub display_name: String,
    pub role: Role,
    pub negotiation: NegotiationState,
    pub status: ConnectivityStatus,
    pub applied_candidates: usize,
    pub pending_candidates: usize,
    pub media_connected: bool,
}

pub(crate) enum SessionInput {
    Signal(Payload),
    TakeOffer,
    Close,
}

/// Sent when a session ends on its own (terminal connectivity status).
#[derive(Debug, Clone)]
pub(crate) struct SessionEnded {
    pub remote: ParticipantId,
    pub generation: u64,
    pub status: ConnectivityStatus,
}

pub(crate) struct SessionParams {
    pub local: ParticipantId,
    pub remote: ParticipantId,
    pub display_name: String,
    pub role: Role,
    pub generation: u64,
    pub negotiator: Arc<dyn Negotiator>,
    pub events: mpsc::UnboundedReceiver<NegotiationEvent>,
    pub outbox: mpsc::UnboundedSender<SignalMessage>,
    pub presenter: Arc<dyn Presenter>,
    pub ended: mpsc::UnboundedSender<SessionEnded>,
}

pub(crate) struct SessionHandle {
    inbox: mpsc::UnboundedSender<SessionInput>,
    snapshot: watch::Receiver<SessionSnapshot>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Queue a payload for the session. False once the session task is gone.
    pub fn deliver(&self, payload: Payload) -> bool {
        self.inbox.send(SessionInput::Signal(payload)).is_ok()
    }

    /// Switch an untouched answering session to offering.
    pub fn take_offer(&self) -> bool {
        self.inbox.send(SessionInput::TakeOffer).is_ok()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Ask the session to close its negotiator and wait for it to finish.
    pub async fn close(self) {
        let _ = self.inbox.send(SessionInput::Close);
        if let Err(err) = self.task.await {
            warn!("peer session task failed: {}", err);
        }
    }
}

pub(crate) fn spawn(params: SessionParams) -> SessionHandle {
    let SessionParams {
        local,
        remote,
        display_name,
        role,
        generation,
        negotiator,
        events,
        outbox,
        presenter,
        ended,
    } = params;

    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot {
        remote: remote.clone(),
        display_name: display_name.clone(),
        role,
        negotiation: NegotiationState::New,
        status: ConnectivityStatus::New,
        applied_candidates: 0,
        pending_candidates: 0,
        media_connected: false,
    });
    let session = PeerSession {
        local,
        remote,
        display_name,
        role,
        generation,
        negotiator,
        outbox,
        presenter,
        ended,
        negotiation: NegotiationState::New,
        status: ConnectivityStatus::New,
        remote_description_set: false,
        pending: Vec::new(),
        applied: HashSet::new(),
        media_connected: false,
        snapshot: snapshot_tx,
    };
    let task = tokio::spawn(session.run(inbox_rx, events));

    SessionHandle {
        inbox: inbox_tx,
        snapshot: snapshot_rx,
        task,
    }
}

struct PeerSession {
    local: ParticipantId,
    remote: ParticipantId,
    display_name: String,
    role: Role,
    generation: u64,
    negotiator: Arc<dyn Negotiator>,
    outbox: mpsc::UnboundedSender<SignalMessage>,
    presenter: Arc<dyn Presenter>,
    ended: mpsc::UnboundedSender<SessionEnded>,
    negotiation: NegotiationState,
    status: ConnectivityStatus,
    remote_description_set: bool,
    // Candidates that arrived before the remote description.
    pending: Vec<IceCandidate>,
    applied: HashSet<IceCandidate>,
    media_connected: bool,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl PeerSession {
    async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<SessionInput>,
        mut events: mpsc::UnboundedReceiver<NegotiationEvent>,
    ) {
        info!(peer = %self.remote, role = ?self.role, "peer session started");
        if self.role == Role::Offerer {
            self.start_offer().await;
        }

        let mut events_open = true;
        let terminal = loop {
            tokio::select! {
                input = inbox.recv() => match input {
                    Some(SessionInput::Signal(payload)) => self.handle_signal(payload).await,
                    Some(SessionInput::TakeOffer) => self.take_offer().await,
                    Some(SessionInput::Close) | None => break None,
                },
                event = events.recv(), if events_open => match event {
                    Some(event) => {
                        if let Some(status) = self.handle_event(event) {
                            break Some(status);
                        }
                    }
                    None => events_open = false,
                },
            }
        };

        self.teardown(terminal).await;
        if let Some(status) = terminal {
            let _ = self.ended.send(SessionEnded {
                remote: self.remote.clone(),
                generation: self.generation,
                status,
            });
        }
    }

    async fn start_offer(&mut self) {
        let offer = match self.negotiator.create_offer().await {
            Ok(offer) => offer,
            Err(err) => {
                warn!(peer = %self.remote, "failed to create offer: {}", err);
                return;
            }
        };
        if let Err(err) = self.negotiator.set_local_description(offer.clone()).await {
            warn!(peer = %self.remote, "failed to apply local offer: {}", err);
            return;
        }
        self.negotiation = NegotiationState::HaveLocalOffer;
        self.send(SignalMessage::description(
            self.local.clone(),
            self.remote.clone(),
            offer,
        ));
        self.publish();
    }

    async fn take_offer(&mut self) {
        if self.role == Role::Offerer || self.negotiation != NegotiationState::New {
            debug!(peer = %self.remote, state = ?self.negotiation, "keeping current role");
            return;
        }
        info!(peer = %self.remote, "both sides answered; taking the offerer role");
        self.role = Role::Offerer;
        self.start_offer().await;
        self.publish();
    }

    async fn handle_signal(&mut self, payload: Payload) {
        match payload {
            Payload::Offer(sdp) => self.accept_offer(sdp).await,
            Payload::Answer(sdp) => self.accept_answer(sdp).await,
            Payload::Candidate(candidate) => self.accept_candidate(candidate).await,
            Payload::Announce { .. } => {
                debug!(peer = %self.remote, "ignoring announce for an existing session")
            }
        }
        self.publish();
    }

    async fn accept_offer(&mut self, sdp: String) {
        if self.role == Role::Offerer {
            warn!(peer = %self.remote, "dropping offer: this side is the offerer for the pair");
            return;
        }
        if self.negotiation != NegotiationState::New {
            warn!(peer = %self.remote, state = ?self.negotiation, "dropping duplicate offer");
            return;
        }
        if let Err(err) = self
            .negotiator
            .set_remote_description(SessionDescription::offer(sdp))
            .await
        {
            warn!(peer = %self.remote, "failed to apply remote offer: {}", err);
            return;
        }
        self.negotiation = NegotiationState::HaveRemoteOffer;
        self.remote_description_set = true;

        let answer = match self.negotiator.create_answer().await {
            Ok(answer) => answer,
            Err(err) => {
                warn!(peer = %self.remote, "failed to create answer: {}", err);
                return;
            }
        };
        if let Err(err) = self.negotiator.set_local_description(answer.clone()).await {
            warn!(peer = %self.remote, "failed to apply local answer: {}", err);
            return;
        }
        self.negotiation = NegotiationState::Stable;
        self.send(SignalMessage::description(
            self.local.clone(),
            self.remote.clone(),
            answer,
        ));
        self.flush_pending().await;
    }

    async fn accept_answer(&mut self, sdp: String) {
        if self.negotiation != NegotiationState::HaveLocalOffer {
            warn!(peer = %self.remote, state = ?self.negotiation, "dropping unsolicited answer");
            return;
        }
        if let Err(err) = self
            .negotiator
            .set_remote_description(SessionDescription::answer(sdp))
            .await
        {
            warn!(peer = %self.remote, "failed to apply remote answer: {}", err);
            return;
        }
        self.negotiation = NegotiationState::Stable;
        self.remote_description_set = true;
        self.flush_pending().await;
    }

    async fn accept_candidate(&mut self, candidate: IceCandidate) {
        if self.applied.contains(&candidate) || self.pending.contains(&candidate) {
            debug!(peer = %self.remote, "ignoring repeated candidate");
            return;
        }
        if !self.remote_description_set {
            debug!(peer = %self.remote, "buffering candidate until remote description");
            self.pending.push(candidate);
            return;
        }
        self.apply_candidate(candidate).await;
    }

    async fn apply_candidate(&mut self, candidate: IceCandidate) {
        match self.negotiator.add_candidate(candidate.clone()).await {
            Ok(()) => {
                self.applied.insert(candidate);
            }
            Err(err) => warn!(peer = %self.remote, "failed to add remote candidate: {}", err),
        }
    }

    async fn flush_pending(&mut self) {
        for candidate in std::mem::take(&mut self.pending) {
            self.apply_candidate(candidate).await;
        }
    }

    /// Returns the status that ends the session, if any.
    fn handle_event(&mut self, event: NegotiationEvent) -> Option<ConnectivityStatus> {
        match event {
            NegotiationEvent::Candidate(candidate) => {
                self.send(SignalMessage::candidate(
                    self.local.clone(),
                    self.remote.clone(),
                    candidate,
                ));
                None
            }
            NegotiationEvent::Status(status) => {
                if status == self.status {
                    return None;
                }
                info!(
                    peer = %self.remote,
                    from = %self.status,
                    to = %status,
                    "connectivity changed"
                );
                self.status = status;
                self.publish();
                status.is_terminal().then_some(status)
            }
            NegotiationEvent::RemoteTrack(media) => {
                if self.media_connected {
                    debug!(peer = %self.remote, track = %media.track_id, "additional remote track");
                } else {
                    self.media_connected = true;
                    self.presenter
                        .peer_connected(&self.remote, &self.display_name, &media);
                    self.publish();
                }
                None
            }
        }
    }

    async fn teardown(&mut self, terminal: Option<ConnectivityStatus>) {
        if let Err(err) = self.negotiator.close().await {
            debug!(peer = %self.remote, "negotiator close failed: {}", err);
        }
        self.negotiation = NegotiationState::Closed;
        self.status = terminal.unwrap_or(ConnectivityStatus::Closed);
        self.publish();
        info!(peer = %self.remote, status = %self.status, "peer session closed");
    }

    fn send(&self, message: SignalMessage) {
        if self.outbox.send(message).is_err() {
            debug!(peer = %self.remote, "relay link gone; dropping outbound message");
        }
    }

    fn current(&self) -> SessionSnapshot {
        SessionSnapshot {
            remote: self.remote.clone(),
            display_name: self.display_name.clone(),
            role: self.role,
            negotiation: self.negotiation,
            status: self.status,
            applied_candidates: self.applied.len(),
            pending_candidates: self.pending.len(),
            media_connected: self.media_connected,
        }
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.current());
    }
}
