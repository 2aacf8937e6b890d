//! Session notifications for the presentation layer

use crate::types::{ParticipantId, TrackKind};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Capacity of the session event channel. Slow subscribers observe `Lagged`.
pub const SESSION_EVENT_CAPACITY: usize = 256;

/// Why a participant left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// Transport reported failed or disconnected
    Failed,
    /// Explicit teardown or session leave
    Closed,
    /// Negotiation never completed and was rolled back
    Aborted,
}

/// What attaching an inbound track did to the participant's sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachOutcome {
    /// First track for this participant, sink created
    Created,
    /// Sink existed without a track of this kind
    Added,
    /// Sink already held a track of this kind
    Replaced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Joined {
        participant: ParticipantId,
        peers: Vec<ParticipantId>,
    },
    ParticipantConnected {
        participant: ParticipantId,
    },
    ParticipantRemoved {
        participant: ParticipantId,
        reason: RemovalReason,
    },
    ConnectFailed {
        participant: ParticipantId,
        error: String,
    },
    TrackAttached {
        participant: ParticipantId,
        kind: TrackKind,
        outcome: AttachOutcome,
    },
    DiscoveryStarted,
    DiscoveryStopped,
    Left,
}

/// Cloneable publisher for session events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Self { tx }
    }

    /// Publish an event; having no subscribers is not an error
    pub fn publish(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
