use huddle_protocol::ParticipantId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live sessions keyed by remote participant, at most one per remote.
///
/// Every insertion carries a generation so that a late "session ended"
/// report from a replaced session cannot evict its successor.
#[derive(Debug)]
pub(crate) struct SessionRegistry<H> {
    entries: Mutex<HashMap<ParticipantId, Entry<H>>>,
    next_generation: AtomicU64,
}

#[derive(Debug)]
struct Entry<H> {
    generation: u64,
    handle: H,
}

impl<H> Default for SessionRegistry<H> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }
}

impl<H> SessionRegistry<H> {
    pub fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    pub fn contains(&self, remote: &ParticipantId) -> bool {
        self.entries.lock().contains_key(remote)
    }

    /// Hands the handle back if `remote` already has a session.
    pub fn insert(&self, remote: ParticipantId, generation: u64, handle: H) -> Result<(), H> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&remote) {
            return Err(handle);
        }
        entries.insert(remote, Entry { generation, handle });
        Ok(())
    }

    pub fn with<R>(&self, remote: &ParticipantId, f: impl FnOnce(&H) -> R) -> Option<R> {
        self.entries.lock().get(remote).map(|entry| f(&entry.handle))
    }

    /// Removes the entry for `remote`. With `generation` set, only an entry
    /// of that exact generation is removed.
    pub fn remove(&self, remote: &ParticipantId, generation: Option<u64>) -> Option<H> {
        let mut entries = self.entries.lock();
        match (entries.get(remote), generation) {
            (None, _) => None,
            (Some(entry), Some(expected)) if entry.generation != expected => None,
            _ => entries.remove(remote).map(|entry| entry.handle),
        }
    }

    pub fn drain(&self) -> Vec<(ParticipantId, H)> {
        self.entries
            .lock()
            .drain()
            .map(|(remote, entry)| (remote, entry.handle))
            .collect()
    }

    pub fn map_all<R>(&self, mut f: impl FnMut(&ParticipantId, &H) -> R) -> Vec<R> {
        self.entries
            .lock()
            .iter()
            .map(|(remote, entry)| f(remote, &entry.handle))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
