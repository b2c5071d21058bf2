use serde::{Deserialize, Serialize};

use crate::ids::{Destination, ParticipantId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Session description as browsers serialize `RTCSessionDescription`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// One discovered network path, in the `RTCIceCandidateInit` shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Announce { display_name: String },
    Offer(String),
    Answer(String),
    Candidate(IceCandidate),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Announce { .. } => "announce",
            Payload::Offer(_) => "offer",
            Payload::Answer(_) => "answer",
            Payload::Candidate(_) => "candidate",
        }
    }

    pub fn description(&self) -> Option<SessionDescription> {
        match self {
            Payload::Offer(sdp) => Some(SessionDescription::offer(sdp.clone())),
            Payload::Answer(sdp) => Some(SessionDescription::answer(sdp.clone())),
            _ => None,
        }
    }
}

impl From<SessionDescription> for Payload {
    fn from(value: SessionDescription) -> Self {
        match value.kind {
            SdpKind::Offer => Payload::Offer(value.sdp),
            SdpKind::Answer => Payload::Answer(value.sdp),
        }
    }
}

/// A decoded relay message. Construct through the helpers so the
/// "broadcast only for announce" rule holds by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalMessage {
    pub from: ParticipantId,
    pub dest: Destination,
    pub payload: Payload,
}

impl SignalMessage {
    pub fn announce(
        from: ParticipantId,
        dest: Destination,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            from,
            dest,
            payload: Payload::Announce {
                display_name: display_name.into(),
            },
        }
    }

    pub fn description(
        from: ParticipantId,
        dest: ParticipantId,
        description: SessionDescription,
    ) -> Self {
        Self {
            from,
            dest: Destination::Participant(dest),
            payload: description.into(),
        }
    }

    pub fn candidate(from: ParticipantId, dest: ParticipantId, candidate: IceCandidate) -> Self {
        Self {
            from,
            dest: Destination::Participant(dest),
            payload: Payload::Candidate(candidate),
        }
    }

    /// Sent by `local` itself and echoed back by the relay.
    pub fn is_self_echo(&self, local: &ParticipantId) -> bool {
        &self.from == local
    }

    /// Should a participant with id `local` act on this message at all.
    pub fn is_for(&self, local: &ParticipantId) -> bool {
        !self.is_self_echo(local) && self.dest.includes(local)
    }
}
