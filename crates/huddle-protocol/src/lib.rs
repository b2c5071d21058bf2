//! Signaling envelope exchanged between huddle participants through the relay.
//!
//! The relay never looks past the envelope: every message names its sender,
//! its destination (one participant or everybody) and carries exactly one
//! payload. Payload kinds are decoded once here into [`Payload`] so callers
//! never sniff JSON field presence themselves.

mod ids;
mod message;
pub mod wire;

pub use ids::{Destination, ParticipantId, BROADCAST};
pub use message::{IceCandidate, Payload, SdpKind, SessionDescription, SignalMessage};
pub use wire::{decode, encode, ProtocolError};
