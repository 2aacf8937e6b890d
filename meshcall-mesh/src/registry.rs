//! Connection registry - the authoritative view of who is connected
//!
//! At most one entry exists per participant. Reservation happens through
//! `DashMap::entry`, so the existence check and the insert are one atomic step
//! even when several discovery or connect attempts race for the same id.

use crate::error::{MeshError, Result};
use crate::transport::PeerTransport;
use crate::types::{ConnectionState, ParticipantId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One participant's connection
#[derive(Clone)]
pub struct ConnectionEntry {
    pub participant: ParticipantId,
    /// Distinguishes successive connections to the same participant
    pub connection_id: u64,
    pub state: ConnectionState,
    /// Absent while the connection is still being constructed
    pub handle: Option<Arc<dyn PeerTransport>>,
    /// Cancels the in-flight negotiation for this entry
    pub cancel: CancellationToken,
}

impl ConnectionEntry {
    /// An entry reserved before negotiation starts
    #[must_use]
    pub fn reserve(participant: ParticipantId, connection_id: u64, cancel: CancellationToken) -> Self {
        Self {
            participant,
            connection_id,
            state: ConnectionState::Creating,
            handle: None,
            cancel,
        }
    }
}

impl fmt::Debug for ConnectionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionEntry")
            .field("participant", &self.participant)
            .field("connection_id", &self.connection_id)
            .field("state", &self.state)
            .field("has_handle", &self.handle.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct ConnectionRegistry {
    entries: DashMap<ParticipantId, ConnectionEntry>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn has(&self, participant: &ParticipantId) -> bool {
        self.entries.contains_key(participant)
    }

    /// Insert an entry, failing with `AlreadyExists` if the participant is present
    pub fn put(&self, entry: ConnectionEntry) -> Result<()> {
        match self.entries.entry(entry.participant.clone()) {
            Entry::Occupied(occupied) => Err(MeshError::AlreadyExists(occupied.key().clone())),
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(())
            }
        }
    }

    /// Snapshot of the participant's entry
    #[must_use]
    pub fn get(&self, participant: &ParticipantId) -> Option<ConnectionEntry> {
        self.entries.get(participant).map(|e| e.value().clone())
    }

    /// Remove the participant's entry regardless of which connection it holds
    pub fn remove(&self, participant: &ParticipantId) -> Option<ConnectionEntry> {
        self.remove_with(participant, None, |_| ())
    }

    /// Remove the entry only if it still belongs to `connection_id`
    pub fn remove_connection(
        &self,
        participant: &ParticipantId,
        connection_id: u64,
    ) -> Option<ConnectionEntry> {
        self.remove_with(participant, Some(connection_id), |_| ())
    }

    /// Remove the entry (only if it belongs to `connection_id` when one is
    /// given), running `on_remove` while the entry is still locked. Anything
    /// done in `on_remove` is atomic with respect to [`with_current`](Self::with_current).
    ///
    /// `on_remove` must not call back into the registry.
    pub fn remove_with<F>(
        &self,
        participant: &ParticipantId,
        connection_id: Option<u64>,
        on_remove: F,
    ) -> Option<ConnectionEntry>
    where
        F: FnOnce(&ConnectionEntry),
    {
        match self.entries.entry(participant.clone()) {
            Entry::Occupied(occupied)
                if connection_id.is_none_or(|id| occupied.get().connection_id == id) =>
            {
                on_remove(occupied.get());
                Some(occupied.remove())
            }
            _ => None,
        }
    }

    /// Run `f` on the entry if it still belongs to `connection_id`, holding
    /// the entry lock for the duration so it cannot be removed meanwhile.
    ///
    /// `f` must not call back into the registry.
    pub fn with_current<F, R>(&self, participant: &ParticipantId, connection_id: u64, f: F) -> Option<R>
    where
        F: FnOnce(&mut ConnectionEntry) -> R,
    {
        let mut entry = self.entries.get_mut(participant)?;
        if entry.connection_id != connection_id {
            return None;
        }
        Some(f(entry.value_mut()))
    }

    /// Whether the participant's entry belongs to `connection_id`
    #[must_use]
    pub fn is_current(&self, participant: &ParticipantId, connection_id: u64) -> bool {
        self.entries
            .get(participant)
            .is_some_and(|e| e.connection_id == connection_id)
    }

    /// Hand the constructed connection to its entry. Returns false when the
    /// entry was torn down in the meantime; the caller then still owns `handle`.
    pub fn attach_handle(
        &self,
        participant: &ParticipantId,
        connection_id: u64,
        handle: Arc<dyn PeerTransport>,
    ) -> bool {
        match self.entries.get_mut(participant) {
            Some(mut entry) if entry.connection_id == connection_id => {
                entry.handle = Some(handle);
                true
            }
            _ => false,
        }
    }

    /// Move the entry to `state` if it still belongs to `connection_id`.
    /// Returns the previous state on success.
    pub fn set_state(
        &self,
        participant: &ParticipantId,
        connection_id: u64,
        state: ConnectionState,
    ) -> Option<ConnectionState> {
        let mut entry = self.entries.get_mut(participant)?;
        if entry.connection_id != connection_id {
            return None;
        }
        let previous = entry.state;
        entry.state = state;
        Some(previous)
    }

    /// Number of entries whose participant is not in `excluded`
    #[must_use]
    pub fn count_excluding(&self, excluded: &[ParticipantId]) -> usize {
        self.entries
            .iter()
            .filter(|e| !excluded.contains(e.key()))
            .count()
    }

    #[must_use]
    pub fn ids(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<_> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
