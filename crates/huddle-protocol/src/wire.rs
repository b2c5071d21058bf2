//! JSON wire form: `{"from", "dest", and one of "displayName" | "sdp" | "ice"}`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{Destination, ParticipantId, BROADCAST};
use crate::message::{IceCandidate, Payload, SessionDescription, SignalMessage};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed signaling message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("signaling message carries no payload")]
    EmptyPayload,
    #[error("signaling message carries more than one payload: {0}")]
    AmbiguousPayload(String),
    #[error("only announce messages may be addressed to all participants")]
    BroadcastNotAnnounce,
    #[error("invalid sender identifier {0:?}")]
    InvalidSender(String),
}

/// Envelope exactly as it travels over the relay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireEnvelope {
    /// Older clients name the sender `uuid`.
    #[serde(alias = "uuid", default)]
    pub from: String,
    pub dest: String,
    #[serde(
        rename = "displayName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ice: Option<IceCandidate>,
}

impl TryFrom<WireEnvelope> for SignalMessage {
    type Error = ProtocolError;

    fn try_from(envelope: WireEnvelope) -> Result<Self, Self::Error> {
        if envelope.from.is_empty() || envelope.from == BROADCAST {
            return Err(ProtocolError::InvalidSender(envelope.from));
        }

        let WireEnvelope {
            from,
            dest,
            display_name,
            sdp,
            ice,
        } = envelope;

        let mut present = Vec::new();
        if display_name.is_some() {
            present.push("displayName");
        }
        if sdp.is_some() {
            present.push("sdp");
        }
        if ice.is_some() {
            present.push("ice");
        }
        if present.len() > 1 {
            return Err(ProtocolError::AmbiguousPayload(present.join(", ")));
        }

        let payload = match (display_name, sdp, ice) {
            (Some(display_name), None, None) => Payload::Announce { display_name },
            (None, Some(description), None) => Payload::from(description),
            (None, None, Some(candidate)) => Payload::Candidate(candidate),
            _ => return Err(ProtocolError::EmptyPayload),
        };

        let dest = Destination::from(dest);
        if dest.is_all() && !matches!(payload, Payload::Announce { .. }) {
            return Err(ProtocolError::BroadcastNotAnnounce);
        }

        Ok(SignalMessage {
            from: ParticipantId::new(from),
            dest,
            payload,
        })
    }
}

impl From<&SignalMessage> for WireEnvelope {
    fn from(message: &SignalMessage) -> Self {
        let mut envelope = WireEnvelope {
            from: message.from.as_str().to_string(),
            dest: message.dest.to_string(),
            ..Default::default()
        };
        match &message.payload {
            Payload::Announce { display_name } => {
                envelope.display_name = Some(display_name.clone())
            }
            Payload::Offer(_) | Payload::Answer(_) => envelope.sdp = message.payload.description(),
            Payload::Candidate(candidate) => envelope.ice = Some(candidate.clone()),
        }
        envelope
    }
}

/// Parse and validate one relay message.
pub fn decode(text: &str) -> Result<SignalMessage, ProtocolError> {
    let envelope: WireEnvelope = serde_json::from_str(text)?;
    SignalMessage::try_from(envelope)
}

pub fn encode(message: &SignalMessage) -> Result<String, ProtocolError> {
    if message.dest.is_all() && !matches!(message.payload, Payload::Announce { .. }) {
        return Err(ProtocolError::BroadcastNotAnnounce);
    }
    Ok(serde_json::to_string(&WireEnvelope::from(message))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SdpKind;
    use serde_json::json;

    #[test]
    fn decodes_announce_broadcast() {
        let message = decode(r#"{"from":"a1","dest":"all","displayName":"Ana"}"#).unwrap();
        assert_eq!(message.from, ParticipantId::from("a1"));
        assert_eq!(message.dest, Destination::All);
        assert_eq!(
            message.payload,
            Payload::Announce {
                display_name: "Ana".into()
            }
        );
    }

    #[test]
    fn accepts_legacy_uuid_sender_key() {
        let message = decode(r#"{"uuid":"b2","dest":"a1","displayName":"Bo"}"#).unwrap();
        assert_eq!(message.from.as_str(), "b2");
        assert_eq!(message.dest, Destination::Participant("a1".into()));
    }

    #[test]
    fn decodes_offer_and_candidate() {
        let offer = decode(
            &json!({"from": "a", "dest": "b", "sdp": {"type": "offer", "sdp": "v=0"}}).to_string(),
        )
        .unwrap();
        assert_eq!(offer.payload, Payload::Offer("v=0".into()));

        let ice = decode(
            &json!({
                "from": "a",
                "dest": "b",
                "ice": {
                    "candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host",
                    "sdpMid": "0",
                    "sdpMLineIndex": 0
                }
            })
            .to_string(),
        )
        .unwrap();
        match ice.payload {
            Payload::Candidate(candidate) => {
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_mline_index, Some(0));
            }
            other => panic!("expected candidate, got {other:?}"),
        }
    }

    #[test]
    fn rejects_invalid_envelopes() {
        assert!(matches!(
            decode(r#"{"from":"a","dest":"b"}"#),
            Err(ProtocolError::EmptyPayload)
        ));
        assert!(matches!(
            decode(r#"{"from":"a","dest":"b","displayName":"x","ice":{"candidate":"c"}}"#),
            Err(ProtocolError::AmbiguousPayload(_))
        ));
        assert!(matches!(
            decode(r#"{"from":"a","dest":"all","ice":{"candidate":"c"}}"#),
            Err(ProtocolError::BroadcastNotAnnounce)
        ));
        assert!(matches!(
            decode(r#"{"dest":"all","displayName":"x"}"#),
            Err(ProtocolError::InvalidSender(_))
        ));
        assert!(matches!(
            decode(r#"{"from":"all","dest":"all","displayName":"x"}"#),
            Err(ProtocolError::InvalidSender(sender)) if sender == "all"
        ));
        assert!(matches!(
            decode("not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            decode(r#"{"from":"a","dest":"b","sdp":{"type":"rollback","sdp":""}}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn encodes_with_browser_field_names() {
        let message = SignalMessage::description(
            "a".into(),
            "b".into(),
            SessionDescription::answer("v=0"),
        );
        let value: serde_json::Value = serde_json::from_str(&encode(&message).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"from": "a", "dest": "b", "sdp": {"type": "answer", "sdp": "v=0"}})
        );
        let decoded = decode(&value.to_string()).unwrap();
        assert_eq!(decoded.payload.description().unwrap().kind, SdpKind::Answer);
    }

    #[test]
    fn refuses_to_encode_broadcast_offer() {
        let message = SignalMessage {
            from: "a".into(),
            dest: Destination::All,
            payload: Payload::Offer("v=0".into()),
        };
        assert!(matches!(encode(&message), Err(ProtocolError::BroadcastNotAnnounce)));
    }
}
