//! Authoritative participant registry
//!
//! The registry holds one [`Participant`] per live connection and is the single
//! source of truth for presence state. It is owned by the server's event loop,
//! which serializes every access, so no operation can observe a half-applied
//! update.
//!
//! Ids arrive in increasing order and are never reused, so the registry only
//! remembers the highest id it has seen. Any id at or below that mark with no
//! entry is retired: late updates carrying it are rejected instead of
//! recreating the entry.

use log::debug;
use presence_shared::{ClientId, Participant, ParticipantUpdate};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct Registry {
    participants: HashMap<ClientId, Participant>,
    /// Highest id ever registered or removed; 0 before the first one
    high_water: ClientId,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty entry for a freshly accepted connection.
    ///
    /// Returns false if `id` is not above every id seen so far, which covers
    /// both live and retired ids.
    pub fn register(&mut self, id: ClientId) -> bool {
        if id <= self.high_water {
            return false;
        }
        self.high_water = id;
        self.participants.insert(id, Participant::default());
        true
    }

    /// Merges `update` into the entry for `id`, creating it if absent.
    ///
    /// Returns the merged record, or None when `id` belongs to a connection
    /// that has already been removed.
    pub fn upsert(&mut self, id: ClientId, update: ParticipantUpdate) -> Option<&Participant> {
        if self.is_retired(id) {
            debug!("Ignoring update for retired participant {}", id);
            return None;
        }
        if update.is_empty() {
            return self.participants.get(&id);
        }

        self.high_water = self.high_water.max(id);
        let participant = self.participants.entry(id).or_default();
        participant.apply(update);
        Some(&*participant)
    }

    /// Deletes the entry for `id` and retires the id.
    pub fn remove(&mut self, id: ClientId) -> Option<Participant> {
        self.high_water = self.high_water.max(id);
        self.participants.remove(&id)
    }

    pub fn get(&self, id: ClientId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.participants.contains_key(&id)
    }

    pub fn is_retired(&self, id: ClientId) -> bool {
        id <= self.high_water && !self.participants.contains_key(&id)
    }

    /// Owned copy of every live participant.
    pub fn snapshot(&self) -> HashMap<ClientId, Participant> {
        self.participants.clone()
    }

    /// Owned copy of every live participant except `id`.
    pub fn snapshot_excluding(&self, id: ClientId) -> HashMap<ClientId, Participant> {
        self.participants
            .iter()
            .filter(|(other, _)| **other != id)
            .map(|(other, participant)| (*other, participant.clone()))
            .collect()
    }

    /// Number of live participants.
    pub fn active_count(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
