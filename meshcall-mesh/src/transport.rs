//! Boundary to the media transport provided by the platform
//!
//! The orchestrator never touches codecs, ICE agents or capture devices directly.
//! It drives connections through [`TransportFactory`] / [`PeerTransport`] and obtains
//! local media from [`MediaDevices`]. Transports report asynchronous happenings
//! (inbound tracks, gathered candidates, connectivity changes) through an
//! [`EventSink`] that tags each event with the participant it belongs to.

use crate::error::{MediaError, TransportError};
use crate::types::{ConnectivityState, IceCandidate, ParticipantId, SessionDescription, TrackKind};
use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Backend-specific media object carried by a track handle
pub type MediaSource = Arc<dyn Any + Send + Sync>;

/// A locally captured track.
///
/// Shared read-only by every outbound connection; only the enabled flag changes
/// after creation.
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    ended: AtomicBool,
    source: MediaSource,
}

impl LocalTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind, source: MediaSource) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: AtomicBool::new(true),
            ended: AtomicBool::new(false),
            source,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn kind(&self) -> TrackKind {
        self.kind
    }

    #[must_use]
    pub fn source(&self) -> &MediaSource {
        &self.source
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Flip the enabled flag, returning the new value
    pub fn toggle(&self) -> bool {
        !self.enabled.fetch_xor(true, Ordering::AcqRel)
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }

    fn stop(&self) {
        self.enabled.store(false, Ordering::Release);
        self.ended.store(true, Ordering::Release);
    }
}

impl fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.is_enabled())
            .field("ended", &self.is_ended())
            .finish_non_exhaustive()
    }
}

/// The local audio/video capture owned by a session.
#[derive(Debug)]
pub struct LocalMediaSet {
    tracks: Vec<Arc<LocalTrack>>,
    released: AtomicBool,
}

impl LocalMediaSet {
    #[must_use]
    pub fn new(tracks: Vec<Arc<LocalTrack>>) -> Self {
        Self {
            tracks,
            released: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn tracks(&self) -> &[Arc<LocalTrack>] {
        &self.tracks
    }

    /// First track of the given kind
    #[must_use]
    pub fn track(&self, kind: TrackKind) -> Option<&Arc<LocalTrack>> {
        self.tracks.iter().find(|t| t.kind() == kind)
    }

    /// Stop every track. Only the first call has any effect; returns whether
    /// this call performed the release.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        for track in &self.tracks {
            track.stop();
        }
        debug!(tracks = self.tracks.len(), "Local media released");
        true
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

/// An inbound track delivered by a connection.
#[derive(Clone)]
pub struct RemoteTrack {
    id: String,
    kind: TrackKind,
    source: MediaSource,
    detached: CancellationToken,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind, source: MediaSource) -> Self {
        Self {
            id: id.into(),
            kind,
            source,
            detached: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn kind(&self) -> TrackKind {
        self.kind
    }

    #[must_use]
    pub fn source(&self) -> &MediaSource {
        &self.source
    }

    /// Token cancelled once the track is detached from its sink; readers of the
    /// underlying media should stop when it fires.
    #[must_use]
    pub fn detached(&self) -> CancellationToken {
        self.detached.clone()
    }

    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.detached.is_cancelled()
    }

    pub(crate) fn detach(&self) {
        self.detached.cancel();
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("detached", &self.is_detached())
            .finish_non_exhaustive()
    }
}

/// Asynchronous notification raised by a connection
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Track(RemoteTrack),
    IceCandidate(IceCandidate),
    StateChanged(ConnectivityState),
}

/// A transport event tagged with its participant and connection
#[derive(Debug, Clone)]
pub struct PeerEvent {
    pub participant: ParticipantId,
    pub connection_id: u64,
    pub event: TransportEvent,
}

/// Per-connection handle through which a transport reports events.
///
/// The transport itself only knows about tracks and states; the sink supplies
/// the participant tag out of band.
#[derive(Debug, Clone)]
pub struct EventSink {
    participant: ParticipantId,
    connection_id: u64,
    tx: mpsc::UnboundedSender<PeerEvent>,
}

impl EventSink {
    #[must_use]
    pub const fn new(
        participant: ParticipantId,
        connection_id: u64,
        tx: mpsc::UnboundedSender<PeerEvent>,
    ) -> Self {
        Self {
            participant,
            connection_id,
            tx,
        }
    }

    #[must_use]
    pub const fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    #[must_use]
    pub const fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Post an event. Returns false once the session stopped listening.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(PeerEvent {
                participant: self.participant.clone(),
                connection_id: self.connection_id,
                event,
            })
            .is_ok()
    }
}

/// One negotiated connection
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn add_local_track(&self, track: &LocalTrack) -> Result<(), TransportError>;

    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    /// Release the connection. Must tolerate being called on a connection that
    /// never finished negotiating.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Creates connections configured to send and receive both audio and video
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        participant: &ParticipantId,
        events: EventSink,
    ) -> Result<Arc<dyn PeerTransport>, TransportError>;
}

/// Which local media to capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Access to local capture devices
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalMediaSet, MediaError>;
}
