use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Wire sentinel addressing every connected participant.
pub const BROADCAST: &str = "all";

/// Opaque identifier a participant generates for itself when it joins.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh identifier (UUIDv4, never the broadcast sentinel).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Where a signaling message should be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Destination {
    All,
    Participant(ParticipantId),
}

impl Destination {
    pub fn is_all(&self) -> bool {
        matches!(self, Destination::All)
    }

    /// True when a participant with id `local` should act on this message.
    pub fn includes(&self, local: &ParticipantId) -> bool {
        match self {
            Destination::All => true,
            Destination::Participant(id) => id == local,
        }
    }
}

impl From<String> for Destination {
    fn from(value: String) -> Self {
        if value == BROADCAST {
            Destination::All
        } else {
            Destination::Participant(ParticipantId(value))
        }
    }
}

impl From<Destination> for String {
    fn from(value: Destination) -> Self {
        match value {
            Destination::All => BROADCAST.to_string(),
            Destination::Participant(id) => id.0,
        }
    }
}

impl From<ParticipantId> for Destination {
    fn from(value: ParticipantId) -> Self {
        Destination::Participant(value)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::All => f.write_str(BROADCAST),
            Destination::Participant(id) => f.write_str(id.as_str()),
        }
    }
}
