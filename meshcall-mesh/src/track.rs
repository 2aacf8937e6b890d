//! Media track routing
//!
//! Inbound tracks arrive one notification at a time, tagged with the participant
//! they belong to. The router keeps one [`TrackSink`] per participant:
//! - the sink is created lazily on the first track
//! - later tracks merge into the same sink, one slot per kind
//! - a second track of the same kind replaces (and detaches) the first
//!
//! No arrival order is assumed, so audio-then-video and video-then-audio end in
//! the same sink contents.

use crate::event::{AttachOutcome, EventBus, SessionEvent};
use crate::transport::RemoteTrack;
use crate::types::{ParticipantId, TrackKind};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

/// Presentation target for one participant's media
#[derive(Debug, Clone)]
pub struct TrackSink {
    pub participant: ParticipantId,
    audio: Option<RemoteTrack>,
    video: Option<RemoteTrack>,
}

impl TrackSink {
    #[must_use]
    pub const fn new(participant: ParticipantId) -> Self {
        Self {
            participant,
            audio: None,
            video: None,
        }
    }

    #[must_use]
    pub const fn track(&self, kind: TrackKind) -> Option<&RemoteTrack> {
        match kind {
            TrackKind::Audio => self.audio.as_ref(),
            TrackKind::Video => self.video.as_ref(),
        }
    }

    #[must_use]
    pub const fn audio(&self) -> Option<&RemoteTrack> {
        self.audio.as_ref()
    }

    #[must_use]
    pub const fn video(&self) -> Option<&RemoteTrack> {
        self.video.as_ref()
    }

    /// Kinds currently held, audio first
    #[must_use]
    pub fn kinds(&self) -> Vec<TrackKind> {
        [TrackKind::Audio, TrackKind::Video]
            .into_iter()
            .filter(|k| self.track(*k).is_some())
            .collect()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }

    /// Put a track into its slot, returning the track it displaced
    fn insert(&mut self, track: RemoteTrack) -> Option<RemoteTrack> {
        let slot = match track.kind() {
            TrackKind::Audio => &mut self.audio,
            TrackKind::Video => &mut self.video,
        };
        slot.replace(track)
    }

    fn detach_all(&self) {
        for track in [&self.audio, &self.video].into_iter().flatten() {
            track.detach();
        }
    }
}

pub struct MediaTrackRouter {
    sinks: DashMap<ParticipantId, TrackSink>,
    events: EventBus,
}

impl MediaTrackRouter {
    #[must_use]
    pub fn new(events: EventBus) -> Self {
        Self {
            sinks: DashMap::new(),
            events,
        }
    }

    /// Route an inbound track to its participant's sink
    pub fn attach(&self, participant: &ParticipantId, track: RemoteTrack) -> AttachOutcome {
        let kind = track.kind();
        let track_id = track.id().to_string();

        let outcome = match self.sinks.entry(participant.clone()) {
            Entry::Vacant(vacant) => {
                let mut sink = TrackSink::new(participant.clone());
                sink.insert(track);
                vacant.insert(sink);
                AttachOutcome::Created
            }
            Entry::Occupied(mut occupied) => match occupied.get_mut().insert(track) {
                Some(previous) => {
                    previous.detach();
                    AttachOutcome::Replaced
                }
                None => AttachOutcome::Added,
            },
        };

        match outcome {
            AttachOutcome::Created => info!(
                participant = %participant,
                kind = %kind,
                track_id = %track_id,
                "Created track sink"
            ),
            _ => debug!(
                participant = %participant,
                kind = %kind,
                track_id = %track_id,
                outcome = ?outcome,
                "Merged track into sink"
            ),
        }

        self.events.publish(SessionEvent::TrackAttached {
            participant: participant.clone(),
            kind,
            outcome,
        });
        outcome
    }

    /// Snapshot of a participant's sink
    #[must_use]
    pub fn sink(&self, participant: &ParticipantId) -> Option<TrackSink> {
        self.sinks.get(participant).map(|s| s.value().clone())
    }

    #[must_use]
    pub fn has_sink(&self, participant: &ParticipantId) -> bool {
        self.sinks.contains_key(participant)
    }

    /// Dispose of a participant's sink, detaching its media
    pub fn remove(&self, participant: &ParticipantId) -> Option<TrackSink> {
        let (_, sink) = self.sinks.remove(participant)?;
        sink.detach_all();
        debug!(participant = %participant, kinds = ?sink.kinds(), "Removed track sink");
        Some(sink)
    }

    /// Dispose of every sink
    pub fn clear(&self) {
        let participants: Vec<_> = self.sinks.iter().map(|e| e.key().clone()).collect();
        for participant in participants {
            self.remove(&participant);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn bob() -> ParticipantId {
        ParticipantId::new("bob").unwrap()
    }

    fn remote(id: &str, kind: TrackKind) -> RemoteTrack {
        RemoteTrack::new(id, kind, Arc::new(()))
    }

    fn contents(sink: &TrackSink) -> Vec<(TrackKind, String)> {
        sink.kinds()
            .into_iter()
            .map(|k| (k, sink.track(k).unwrap().id().to_string()))
            .collect()
    }

    #[test]
    fn test_arrival_order_does_not_matter() {
        let audio_first = MediaTrackRouter::new(EventBus::new());
        assert_eq!(audio_first.attach(&bob(), remote("a1", TrackKind::Audio)), AttachOutcome::Created);
        assert_eq!(audio_first.attach(&bob(), remote("v1", TrackKind::Video)), AttachOutcome::Added);

        let video_first = MediaTrackRouter::new(EventBus::new());
        assert_eq!(video_first.attach(&bob(), remote("v1", TrackKind::Video)), AttachOutcome::Created);
        assert_eq!(video_first.attach(&bob(), remote("a1", TrackKind::Audio)), AttachOutcome::Added);

        let a = audio_first.sink(&bob()).unwrap();
        let b = video_first.sink(&bob()).unwrap();
        assert_eq!(contents(&a), contents(&b));
        assert_eq!(a.kinds(), vec![TrackKind::Audio, TrackKind::Video]);
    }

    #[test]
    fn test_same_kind_replaces_and_detaches() {
        let router = MediaTrackRouter::new(EventBus::new());
        let first = remote("v1", TrackKind::Video);
        let watcher = first.detached();
        router.attach(&bob(), first);

        assert_eq!(router.attach(&bob(), remote("v2", TrackKind::Video)), AttachOutcome::Replaced);
        assert!(watcher.is_cancelled());

        let sink = router.sink(&bob()).unwrap();
        assert_eq!(sink.video().unwrap().id(), "v2");
        assert!(sink.audio().is_none());
    }

    #[test]
    fn test_remove_detaches_media() {
        let router = MediaTrackRouter::new(EventBus::new());
        let audio = remote("a1", TrackKind::Audio);
        let video = remote("v1", TrackKind::Video);
        let (audio_watch, video_watch) = (audio.detached(), video.detached());
        router.attach(&bob(), audio);
        router.attach(&bob(), video);

        let removed = router.remove(&bob()).unwrap();
        assert_eq!(removed.kinds().len(), 2);
        assert!(audio_watch.is_cancelled() && video_watch.is_cancelled());
        assert!(!router.has_sink(&bob()));
        assert!(router.remove(&bob()).is_none());
    }

    #[tokio::test]
    async fn test_attach_publishes_event() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let router = MediaTrackRouter::new(events);
        router.attach(&bob(), remote("a1", TrackKind::Audio));

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            SessionEvent::TrackAttached {
                participant: bob(),
                kind: TrackKind::Audio,
                outcome: AttachOutcome::Created,
            }
        );
    }
}
