//! Shared fakes for session tests

#![allow(dead_code)]

use async_trait::async_trait;
use meshcall_mesh::{
    CandidateRequest, ConnectPeerRequest, EventSink, IceCandidate, LocalMediaSet, LocalTrack,
    MediaConstraints, MediaDevices, MediaError, MeshConfig, MessageKind, OfferAnswer,
    OfferRequest, ParticipantId, PeerTransport, RemoteTrack, SessionDescription, SessionEvent,
    Session, SignalingApi, SignalingError, SignalingMessage, TrackKind, TransportError,
    TransportEvent, TransportFactory,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

pub fn id(s: &str) -> ParticipantId {
    ParticipantId::new(s).unwrap()
}

/// Scripted relay
#[derive(Default)]
pub struct MockSignaling {
    pub offer_peers: Mutex<Vec<ParticipantId>>,
    pub poll_result: Mutex<Vec<ParticipantId>>,
    pub fail_offer: AtomicBool,
    pub fail_connect: Mutex<HashSet<ParticipantId>>,
    /// When set, `connect_peer` waits for a notification before answering
    pub connect_gate: Mutex<Option<Arc<Notify>>>,
    pub messages: Mutex<Vec<SignalingMessage>>,
    pub polls: AtomicUsize,
}

impl MockSignaling {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_offer_peers(&self, peers: &[&str]) {
        *self.offer_peers.lock() = peers.iter().map(|p| id(p)).collect();
    }

    pub fn set_poll_result(&self, peers: &[&str]) {
        *self.poll_result.lock() = peers.iter().map(|p| id(p)).collect();
    }

    pub fn gate_connects(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.connect_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    /// Number of connect-peer offers sent to `target`
    pub fn connects_to(&self, target: &str) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.kind == MessageKind::Offer && m.to.as_ref().map(ParticipantId::as_str) == Some(target))
            .count()
    }

    pub fn relay_offers(&self) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.kind == MessageKind::Offer && m.to.is_none())
            .count()
    }

    /// Candidate payloads relayed to `target` (`None` for the relay), in order
    pub fn candidates_to(&self, target: Option<&str>) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.kind == MessageKind::Candidate && m.to.as_ref().map(ParticipantId::as_str) == target)
            .map(|m| m.payload.clone())
            .collect()
    }
}

#[async_trait]
impl SignalingApi for MockSignaling {
    async fn submit_offer(&self, request: OfferRequest) -> Result<OfferAnswer, SignalingError> {
        self.messages.lock().push(request.message());
        if self.fail_offer.load(Ordering::SeqCst) {
            return Err(SignalingError::Status {
                status: 500,
                body: "relay unavailable".to_string(),
            });
        }
        Ok(OfferAnswer {
            answer: SessionDescription::answer("v=0 relay-answer"),
            other_peers: self.offer_peers.lock().clone(),
        })
    }

    async fn connect_peer(
        &self,
        request: ConnectPeerRequest,
    ) -> Result<SessionDescription, SignalingError> {
        self.messages.lock().push(request.message());
        let gate = self.connect_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_connect.lock().contains(&request.to) {
            return Err(SignalingError::Network("connection refused".to_string()));
        }
        Ok(SessionDescription::answer(format!("v=0 answer-from-{}", request.to)))
    }

    async fn relay_candidate(&self, request: CandidateRequest) -> Result<(), SignalingError> {
        self.messages.lock().push(request.message());
        Ok(())
    }

    async fn poll_peers(
        &self,
        _participant: &ParticipantId,
    ) -> Result<Vec<ParticipantId>, SignalingError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(self.poll_result.lock().clone())
    }
}

/// Connection handle that records what was done to it
#[derive(Default)]
pub struct MockPeer {
    pub local_tracks: Mutex<Vec<String>>,
    pub local_description: Mutex<Option<SessionDescription>>,
    pub remote_description: Mutex<Option<SessionDescription>>,
    pub remote_candidates: Mutex<Vec<IceCandidate>>,
    pub closes: AtomicUsize,
}

impl MockPeer {
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerTransport for MockPeer {
    async fn add_local_track(&self, track: &LocalTrack) -> Result<(), TransportError> {
        self.local_tracks.lock().push(track.id().to_string());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        Ok(SessionDescription::offer("v=0 offer"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        *self.local_description.lock() = Some(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        *self.remote_description.lock() = Some(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.remote_candidates.lock().push(candidate);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct CreatedPeer {
    pub participant: ParticipantId,
    pub sink: EventSink,
    pub peer: Arc<MockPeer>,
}

#[derive(Default)]
pub struct MockTransportFactory {
    pub created: Mutex<Vec<CreatedPeer>>,
    pub fail_create: AtomicBool,
}

impl MockTransportFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn create_count(&self, participant: &str) -> usize {
        self.created
            .lock()
            .iter()
            .filter(|c| c.participant.as_str() == participant)
            .count()
    }

    /// Event sink of the most recent connection to `participant`
    pub fn sink(&self, participant: &str) -> EventSink {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|c| c.participant.as_str() == participant)
            .map(|c| c.sink.clone())
            .unwrap()
    }

    /// Most recent connection to `participant`
    pub fn peer(&self, participant: &str) -> Arc<MockPeer> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|c| c.participant.as_str() == participant)
            .map(|c| Arc::clone(&c.peer))
            .unwrap()
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create(
        &self,
        participant: &ParticipantId,
        events: EventSink,
    ) -> Result<Arc<dyn PeerTransport>, TransportError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(TransportError::Backend("no ICE agent".to_string()));
        }
        let peer = Arc::new(MockPeer::default());
        self.created.lock().push(CreatedPeer {
            participant: participant.clone(),
            sink: events,
            peer: Arc::clone(&peer),
        });
        Ok(peer)
    }
}

#[derive(Default)]
pub struct MockMediaDevices {
    pub failure: Mutex<Option<MediaError>>,
    pub acquisitions: AtomicUsize,
    /// When set, `acquire` waits for a notification before returning
    pub acquire_gate: Mutex<Option<Arc<Notify>>>,
    /// Every track handed out, across all acquisitions
    pub issued: Mutex<Vec<Arc<LocalTrack>>>,
}

impl MockMediaDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gate_acquire(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.acquire_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Whether every track ever handed out has been stopped
    pub fn all_released(&self) -> bool {
        self.issued.lock().iter().all(|t| t.is_ended())
    }
}

#[async_trait]
impl MediaDevices for MockMediaDevices {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalMediaSet, MediaError> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        let gate = self.acquire_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(err) = self.failure.lock().clone() {
            return Err(err);
        }
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(Arc::new(LocalTrack::new("mic", TrackKind::Audio, Arc::new(()))));
        }
        if constraints.video {
            tracks.push(Arc::new(LocalTrack::new("camera", TrackKind::Video, Arc::new(()))));
        }
        self.issued.lock().extend(tracks.iter().cloned());
        Ok(LocalMediaSet::new(tracks))
    }
}

pub struct Harness {
    pub session: Arc<Session>,
    pub signaling: Arc<MockSignaling>,
    pub factory: Arc<MockTransportFactory>,
    pub devices: Arc<MockMediaDevices>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(MeshConfig::default())
    }

    pub fn with_config(config: MeshConfig) -> Self {
        let signaling = MockSignaling::new();
        let factory = MockTransportFactory::new();
        let devices = MockMediaDevices::new();
        let session = Arc::new(Session::new(
            config,
            signaling.clone(),
            factory.clone(),
            devices.clone(),
        ));
        Self {
            session,
            signaling,
            factory,
            devices,
        }
    }

    pub fn emit(&self, participant: &str, event: TransportEvent) {
        assert!(self.factory.sink(participant).emit(event));
    }
}

pub fn remote_track(id: &str, kind: TrackKind) -> RemoteTrack {
    RemoteTrack::new(id, kind, Arc::new(()))
}

pub fn candidate(n: u16) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 udp 2122260223 192.168.1.{n} 5000{n} typ host"),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
    }
}

/// Let spawned tasks (event pump, candidate relay) drain their queues
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Wait for the first event matching `pred`
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<SessionEvent>, pred: F) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}
