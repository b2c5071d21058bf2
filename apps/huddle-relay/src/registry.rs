use dashmap::DashMap;
use huddle_protocol::ParticipantId;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Relay-local handle for one open socket. Carries no protocol meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Outbound side of one channel. The writer task owns the socket sink and
/// drains this queue, so delivery never waits on a slow peer.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    pub tx: mpsc::UnboundedSender<String>,
    pub remote_addr: Option<SocketAddr>,
    /// First sender id seen on this channel; used for log lines only.
    pub participant: Option<ParticipantId>,
}

/// Set of currently open channels.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: DashMap<ChannelId, ChannelHandle>,
    next_id: AtomicU64,
}

impl ChannelRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, handle: ChannelHandle) -> ChannelId {
        let id = ChannelId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.channels.insert(id, handle);
        id
    }

    pub fn lookup(&self, id: ChannelId) -> Option<ChannelHandle> {
        self.channels.get(&id).map(|entry| entry.value().clone())
    }

    /// Returns the handle if it was still registered; a second removal is a no-op.
    pub fn remove(&self, id: ChannelId) -> Option<ChannelHandle> {
        self.channels.remove(&id).map(|(_, handle)| handle)
    }

    pub fn bind_participant(&self, id: ChannelId, participant: &ParticipantId) {
        if let Some(mut entry) = self.channels.get_mut(&id) {
            if entry.participant.is_none() {
                entry.participant = Some(participant.clone());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Copy of the current channel set. Callers iterate the snapshot so no
    /// shard lock is held while sending.
    pub fn snapshot(&self) -> Vec<(ChannelId, ChannelHandle)> {
        self.channels
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }
}
