//! Connection lifecycle management
//!
//! This module handles:
//! - Idempotent connection setup to the relay and to other participants
//! - Offer/answer negotiation with cancellation and a bounded duration
//! - Rollback of partially negotiated connections
//! - Transport event dispatch (inbound tracks, candidates, connectivity)
//! - Teardown on failure, explicit removal and session leave

use crate::config::MeshConfig;
use crate::discovery::DiscoveryLoop;
use crate::error::{MeshError, Result};
use crate::event::{EventBus, RemovalReason, SessionEvent};
use crate::registry::{ConnectionEntry, ConnectionRegistry};
use crate::signaling::{CandidateRequest, ConnectPeerRequest, OfferRequest, SignalingApi};
use crate::track::MediaTrackRouter;
use crate::transport::{EventSink, LocalMediaSet, PeerEvent, TransportEvent, TransportFactory};
use crate::types::{ConnectionState, ConnectivityState, IceCandidate, ParticipantId};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Result of asking for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new connection was negotiated
    Initiated,
    /// The participant already had an entry; nothing was done
    AlreadyRegistered,
}

/// State that only exists while the session is joined
struct ActiveSession {
    local_id: ParticipantId,
    media: Arc<LocalMediaSet>,
    peer_events: mpsc::UnboundedSender<PeerEvent>,
    candidates: mpsc::UnboundedSender<CandidateRequest>,
    shutdown: CancellationToken,
}

/// Drives every connection of one session
pub struct ConnectionController {
    config: Arc<MeshConfig>,
    registry: Arc<ConnectionRegistry>,
    router: Arc<MediaTrackRouter>,
    signaling: Arc<dyn SignalingApi>,
    factory: Arc<dyn TransportFactory>,
    events: EventBus,
    discovery: DiscoveryLoop,
    active: Mutex<Option<Arc<ActiveSession>>>,
    next_connection_id: AtomicU64,
}

impl ConnectionController {
    pub fn new(
        config: Arc<MeshConfig>,
        signaling: Arc<dyn SignalingApi>,
        factory: Arc<dyn TransportFactory>,
        events: EventBus,
    ) -> Arc<Self> {
        let discovery = DiscoveryLoop::new(config.poll_interval());
        Arc::new(Self {
            config,
            registry: Arc::new(ConnectionRegistry::new()),
            router: Arc::new(MediaTrackRouter::new(events.clone())),
            signaling,
            factory,
            events,
            discovery,
            active: Mutex::new(None),
            next_connection_id: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    #[must_use]
    pub const fn router(&self) -> &Arc<MediaTrackRouter> {
        &self.router
    }

    #[must_use]
    pub const fn discovery(&self) -> &DiscoveryLoop {
        &self.discovery
    }

    #[must_use]
    pub fn local_id(&self) -> Option<ParticipantId> {
        self.active.lock().as_ref().map(|a| a.local_id.clone())
    }

    #[must_use]
    pub fn local_media(&self) -> Option<Arc<LocalMediaSet>> {
        self.active.lock().as_ref().map(|a| Arc::clone(&a.media))
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    fn active(&self) -> Result<Arc<ActiveSession>> {
        self.active.lock().clone().ok_or(MeshError::NotJoined)
    }

    /// Start accepting transport events for a joined session
    pub fn activate(self: &Arc<Self>, local_id: ParticipantId, media: Arc<LocalMediaSet>) -> Result<()> {
        let mut slot = self.active.lock();
        if slot.is_some() {
            return Err(MeshError::AlreadyJoined);
        }

        let shutdown = CancellationToken::new();
        let (peer_events, peer_rx) = mpsc::unbounded_channel();
        let (candidates, candidate_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_event_pump(Arc::downgrade(self), peer_rx, shutdown.clone()));
        tokio::spawn(run_candidate_relay(
            Arc::clone(&self.signaling),
            candidate_rx,
            shutdown.clone(),
        ));

        debug!(participant = %local_id, tracks = media.tracks().len(), "Session activated");
        *slot = Some(Arc::new(ActiveSession {
            local_id,
            media,
            peer_events,
            candidates,
            shutdown,
        }));
        Ok(())
    }

    /// Stop everything started by [`activate`](Self::activate): cancel in-flight
    /// negotiations, stop discovery, close every connection and dispose of every
    /// sink. Returns the local media so the caller can release it.
    pub async fn deactivate(&self) -> Option<Arc<LocalMediaSet>> {
        let active = self.active.lock().take()?;
        active.shutdown.cancel();

        if self.discovery.stop() {
            self.events.publish(SessionEvent::DiscoveryStopped);
        }

        for participant in self.registry.ids() {
            self.remove_connection(&participant, None, RemovalReason::Closed)
                .await;
        }
        self.router.clear();

        info!(participant = %active.local_id, "Session deactivated");
        Some(Arc::clone(&active.media))
    }

    /// Connect to the relay and return the participants it already knows about
    pub async fn connect_relay(self: &Arc<Self>) -> Result<Vec<ParticipantId>> {
        let peers = self
            .establish(&ParticipantId::server())
            .await?
            .unwrap_or_default();
        info!(other_peers = peers.len(), "Relay connection negotiated");
        Ok(peers)
    }

    /// Connect to another participant.
    ///
    /// Idempotent: a participant that already has an entry (connected or still
    /// negotiating) is left alone.
    pub async fn connect(self: &Arc<Self>, participant: ParticipantId) -> Result<ConnectOutcome> {
        let active = self.active()?;
        if participant.is_sentinel() || participant == active.local_id {
            return Err(MeshError::InvalidParticipantId(format!(
                "cannot open a peer connection to {participant}"
            )));
        }

        match self.establish(&participant).await? {
            None => Ok(ConnectOutcome::AlreadyRegistered),
            Some(_) => {
                info!(participant = %participant, "Peer negotiation complete");
                self.ensure_discovery();
                Ok(ConnectOutcome::Initiated)
            }
        }
    }

    /// Reserve, negotiate, and roll back on failure.
    /// `Ok(None)` means the participant was already registered.
    async fn establish(
        self: &Arc<Self>,
        participant: &ParticipantId,
    ) -> Result<Option<Vec<ParticipantId>>> {
        let active = self.active()?;
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = active.shutdown.child_token();

        // Reservation happens before the first suspension point
        match self.registry.put(ConnectionEntry::reserve(
            participant.clone(),
            connection_id,
            cancel.clone(),
        )) {
            Ok(()) => {}
            Err(MeshError::AlreadyExists(_)) => {
                debug!(participant = %participant, "Already registered, skipping connect");
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        info!(participant = %participant, connection_id, "Creating connection");

        let timeout = self.config.negotiation_timeout();
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(MeshError::Cancelled(participant.clone())),
            r = tokio::time::timeout(timeout, self.negotiate(&active, participant, connection_id)) => {
                r.unwrap_or_else(|_| Err(MeshError::NegotiationTimeout(participant.clone())))
            }
        };

        match result {
            Ok(peers) => Ok(Some(peers)),
            Err(e) => {
                warn!(
                    participant = %participant,
                    connection_id,
                    error = %e,
                    "Negotiation failed, rolling back"
                );
                self.remove_connection(participant, Some(connection_id), RemovalReason::Aborted)
                    .await;
                self.events.publish(SessionEvent::ConnectFailed {
                    participant: participant.clone(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn negotiate(
        &self,
        active: &ActiveSession,
        participant: &ParticipantId,
        connection_id: u64,
    ) -> Result<Vec<ParticipantId>> {
        let sink = EventSink::new(participant.clone(), connection_id, active.peer_events.clone());
        let transport = self.factory.create(participant, sink).await?;

        if !self
            .registry
            .attach_handle(participant, connection_id, Arc::clone(&transport))
        {
            // Torn down while the handle was being built; nobody else will close it
            if let Err(e) = transport.close().await {
                error!(participant = %participant, error = %e, "Failed to close orphaned connection");
            }
            return Err(MeshError::Cancelled(participant.clone()));
        }

        for track in active.media.tracks() {
            transport.add_local_track(track).await?;
        }

        let offer = transport.create_offer().await?;
        transport.set_local_description(offer.clone()).await?;
        self.registry
            .set_state(participant, connection_id, ConnectionState::Negotiating);
        debug!(participant = %participant, connection_id, "Local offer set");

        let (answer, peers) = if participant.is_server() {
            let request = OfferRequest {
                participant: active.local_id.clone(),
                offer,
            };
            let resp = self.signaling.submit_offer(request).await?;
            (resp.answer, resp.other_peers)
        } else {
            let request = ConnectPeerRequest {
                from: active.local_id.clone(),
                to: participant.clone(),
                offer,
            };
            (self.signaling.connect_peer(request).await?, Vec::new())
        };

        transport.set_remote_description(answer).await?;
        debug!(participant = %participant, connection_id, "Remote description accepted");
        Ok(peers)
    }

    /// Ask the relay for current membership
    pub async fn poll_peers(&self) -> Result<Vec<ParticipantId>> {
        let active = self.active()?;
        Ok(self.signaling.poll_peers(&active.local_id).await?)
    }

    /// Connect to every listed participant that has no entry yet.
    /// Returns how many new connections were negotiated.
    pub async fn connect_discovered(self: &Arc<Self>, peers: Vec<ParticipantId>) -> usize {
        let Some(local_id) = self.local_id() else {
            return 0;
        };

        let mut seen = HashSet::new();
        let fresh: Vec<_> = peers
            .into_iter()
            .filter(|p| !p.is_sentinel() && *p != local_id && !self.registry.has(p))
            .filter(|p| seen.insert(p.clone()))
            .collect();
        if fresh.is_empty() {
            return 0;
        }

        info!(peers = ?fresh, "Found new peers");
        let mut initiated = 0;
        for peer in fresh {
            match self.connect(peer.clone()).await {
                Ok(ConnectOutcome::Initiated) => initiated += 1,
                Ok(ConnectOutcome::AlreadyRegistered) => {}
                Err(e) => warn!(participant = %peer, error = %e, "Failed to connect to discovered peer"),
            }
        }
        initiated
    }

    /// One discovery round: poll, then connect to newcomers
    pub async fn discover_once(self: &Arc<Self>) -> Result<usize> {
        let peers = self.poll_peers().await?;
        Ok(self.connect_discovered(peers).await)
    }

    /// Start the discovery loop unless it is already running
    pub fn ensure_discovery(self: &Arc<Self>) -> bool {
        let Ok(active) = self.active() else {
            return false;
        };
        if active.shutdown.is_cancelled() {
            return false;
        }

        let started = self
            .discovery
            .start(Arc::downgrade(self), active.shutdown.child_token());
        if started {
            info!(
                interval_ms = self.config.poll_interval_ms,
                "Started discovery"
            );
            self.events.publish(SessionEvent::DiscoveryStarted);
        }
        started
    }

    /// Tear down a participant's connection, whatever its state
    pub async fn remove_participant(&self, participant: &ParticipantId) -> bool {
        self.remove_connection(participant, None, RemovalReason::Closed)
            .await
    }

    /// Hand a candidate received out of band to the participant's connection
    pub async fn add_remote_candidate(
        &self,
        participant: &ParticipantId,
        candidate: IceCandidate,
    ) -> Result<()> {
        let handle = self
            .registry
            .get(participant)
            .and_then(|e| e.handle)
            .ok_or_else(|| MeshError::Connectivity(participant.clone()))?;
        handle.add_ice_candidate(candidate).await?;
        Ok(())
    }

    /// Remove the participant's entry (only if it still belongs to
    /// `connection_id` when one is given) and release everything it owns.
    async fn remove_connection(
        &self,
        participant: &ParticipantId,
        connection_id: Option<u64>,
        reason: RemovalReason,
    ) -> bool {
        // The sink goes in the same critical section as the entry, so a
        // concurrently dispatched track cannot recreate it afterwards
        let Some(entry) = self.registry.remove_with(participant, connection_id, |_| {
            self.router.remove(participant);
        }) else {
            return false;
        };

        entry.cancel.cancel();
        if let Some(handle) = &entry.handle {
            if let Err(e) = handle.close().await {
                error!(participant = %participant, error = %e, "Failed to close connection");
            }
        }

        info!(
            participant = %participant,
            connection_id = entry.connection_id,
            state = ?entry.state,
            reason = ?reason,
            "Removed participant"
        );

        if reason == RemovalReason::Aborted {
            return true;
        }
        self.events.publish(SessionEvent::ParticipantRemoved {
            participant: participant.clone(),
            reason,
        });

        let remaining = self
            .registry
            .count_excluding(&[ParticipantId::server(), ParticipantId::local()]);
        if remaining == 0 && self.discovery.stop() {
            info!("Stopped discovery: no remote participants left");
            self.events.publish(SessionEvent::DiscoveryStopped);
        }
        true
    }

    async fn handle_event(&self, event: PeerEvent) {
        let PeerEvent {
            participant,
            connection_id,
            event,
        } = event;

        if !self.registry.is_current(&participant, connection_id) {
            debug!(
                participant = %participant,
                connection_id,
                "Ignoring event from stale connection"
            );
            return;
        }

        match event {
            TransportEvent::Track(track) => {
                let attached = self.registry.with_current(&participant, connection_id, |_| {
                    self.router.attach(&participant, track)
                });
                if attached.is_none() {
                    debug!(participant = %participant, connection_id, "Connection removed, dropping track");
                }
            }
            TransportEvent::IceCandidate(candidate) => {
                let Ok(active) = self.active() else {
                    return;
                };
                let to = (!participant.is_server()).then(|| participant.clone());
                let request = CandidateRequest {
                    from: active.local_id.clone(),
                    to,
                    candidate,
                };
                if active.candidates.send(request).is_err() {
                    debug!(participant = %participant, "Candidate relay stopped, dropping candidate");
                }
            }
            TransportEvent::StateChanged(state) => {
                self.on_connectivity(&participant, connection_id, state)
                    .await;
            }
        }
    }

    async fn on_connectivity(
        &self,
        participant: &ParticipantId,
        connection_id: u64,
        state: ConnectivityState,
    ) {
        debug!(participant = %participant, state = ?state, "Connectivity changed");

        match state {
            ConnectivityState::Connected => {
                let negotiating = self
                    .registry
                    .get(participant)
                    .is_some_and(|e| e.state == ConnectionState::Negotiating);
                if negotiating
                    && self
                        .registry
                        .set_state(participant, connection_id, ConnectionState::Connected)
                        .is_some()
                {
                    info!(participant = %participant, "Connected");
                    self.events.publish(SessionEvent::ParticipantConnected {
                        participant: participant.clone(),
                    });
                }
            }
            s if s.is_failure() => {
                warn!(participant = %participant, state = ?s, "Connection lost");
                self.registry
                    .set_state(participant, connection_id, ConnectionState::Failed);
                self.remove_connection(participant, Some(connection_id), RemovalReason::Failed)
                    .await;
            }
            _ => {}
        }
    }
}

/// Dispatch transport events one at a time, in arrival order
async fn run_event_pump(
    controller: Weak<ConnectionController>,
    mut rx: mpsc::UnboundedReceiver<PeerEvent>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let Some(controller) = controller.upgrade() else {
            break;
        };
        controller.handle_event(event).await;
    }
    debug!("Event pump stopped");
}

/// Relay gathered candidates in the order they were gathered
async fn run_candidate_relay(
    signaling: Arc<dyn SignalingApi>,
    mut rx: mpsc::UnboundedReceiver<CandidateRequest>,
    shutdown: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            () = shutdown.cancelled() => break,
            request = rx.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let target = request
            .to
            .as_ref()
            .map_or_else(|| ParticipantId::server().to_string(), ToString::to_string);
        let result = tokio::select! {
            () = shutdown.cancelled() => break,
            r = signaling.relay_candidate(request) => r,
        };
        if let Err(e) = result {
            warn!(target = %target, error = %e, "Failed to relay candidate");
        }
    }
    debug!("Candidate relay stopped");
}
