//! Session facade
//!
//! A [`Session`] is what an application holds: join with a participant id, toggle
//! local tracks, observe [`SessionEvent`]s, and leave. Everything else (the
//! registry, routing, discovery) is reached through it.

use crate::config::MeshConfig;
use crate::error::{MeshError, Result};
use crate::event::{EventBus, SessionEvent};
use crate::peer::{ConnectOutcome, ConnectionController};
use crate::signaling::SignalingApi;
use crate::track::TrackSink;
use crate::transport::{LocalMediaSet, MediaConstraints, MediaDevices, TransportFactory};
use crate::types::{ConnectionState, IceCandidate, ParticipantId, TrackKind};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Lifecycle phase of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Joining,
    Joined,
    Leaving,
}

/// What a successful join produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSummary {
    pub participant: ParticipantId,
    /// Whether the relay connection was negotiated
    pub relay_connected: bool,
    /// Participants that were already in the session and were connected to
    pub peers: Vec<ParticipantId>,
}

pub struct Session {
    config: Arc<MeshConfig>,
    devices: Arc<dyn MediaDevices>,
    controller: Arc<ConnectionController>,
    events: EventBus,
    phase: Mutex<SessionPhase>,
}

impl Session {
    pub fn new(
        config: MeshConfig,
        signaling: Arc<dyn SignalingApi>,
        factory: Arc<dyn TransportFactory>,
        devices: Arc<dyn MediaDevices>,
    ) -> Self {
        let config = Arc::new(config);
        let events = EventBus::new();
        let controller =
            ConnectionController::new(Arc::clone(&config), signaling, factory, events.clone());

        Self {
            config,
            devices,
            controller,
            events,
            phase: Mutex::new(SessionPhase::Idle),
        }
    }

    /// Join the session as `local_id`.
    ///
    /// Acquires local media, negotiates with the relay, connects to every
    /// participant the relay reports, and starts discovery. Media failure aborts
    /// the join and leaves the session idle. A failed relay negotiation is logged
    /// and the join continues with an empty peer list; discovery keeps retrying.
    pub async fn join(&self, local_id: ParticipantId) -> Result<JoinSummary> {
        if local_id.is_sentinel() {
            return Err(MeshError::InvalidParticipantId(format!(
                "{local_id} is reserved"
            )));
        }

        {
            let mut phase = self.phase.lock();
            if *phase != SessionPhase::Idle {
                return Err(MeshError::AlreadyJoined);
            }
            *phase = SessionPhase::Joining;
        }

        info!(participant = %local_id, "Joining session");

        let constraints = MediaConstraints {
            audio: self.config.audio,
            video: self.config.video,
        };
        let media = match self.devices.acquire(constraints).await {
            Ok(media) => Arc::new(media),
            Err(e) => {
                error!(participant = %local_id, error = %e, "Failed to acquire local media");
                *self.phase.lock() = SessionPhase::Idle;
                return Err(e.into());
            }
        };

        {
            // Phase check and activation are one step with respect to leave
            let mut phase = self.phase.lock();
            if *phase != SessionPhase::Joining {
                drop(phase);
                info!(participant = %local_id, "Left while acquiring media, join cancelled");
                media.release();
                return Err(MeshError::Cancelled(local_id));
            }
            if let Err(e) = self.controller.activate(local_id.clone(), Arc::clone(&media)) {
                media.release();
                *phase = SessionPhase::Idle;
                return Err(e);
            }
        }

        let (relay_connected, other_peers) = match self.controller.connect_relay().await {
            Ok(peers) => (true, peers),
            Err(e) => {
                warn!(error = %e, "Relay negotiation failed, continuing without relay connection");
                (false, Vec::new())
            }
        };

        let mut peers = Vec::new();
        for peer in other_peers {
            if peer.is_sentinel() || peer == local_id {
                continue;
            }
            match self.controller.connect(peer.clone()).await {
                Ok(ConnectOutcome::Initiated) => peers.push(peer),
                Ok(ConnectOutcome::AlreadyRegistered) => {}
                Err(e) => warn!(participant = %peer, error = %e, "Failed to connect to existing peer"),
            }
        }

        self.controller.ensure_discovery();

        {
            let mut phase = self.phase.lock();
            if *phase != SessionPhase::Joining {
                // Left while negotiating; leave already tore the session down
                return Err(MeshError::Cancelled(local_id));
            }
            *phase = SessionPhase::Joined;
        }

        info!(
            participant = %local_id,
            relay_connected,
            peers = peers.len(),
            "Joined session"
        );
        self.events.publish(SessionEvent::Joined {
            participant: local_id.clone(),
            peers: peers.clone(),
        });

        Ok(JoinSummary {
            participant: local_id,
            relay_connected,
            peers,
        })
    }

    /// Leave the session: cancel in-flight negotiations, stop discovery, close
    /// every connection, dispose of every sink and release local media.
    ///
    /// Also valid while a join is still in progress.
    pub async fn leave(&self) -> Result<()> {
        {
            let mut phase = self.phase.lock();
            match *phase {
                SessionPhase::Joining | SessionPhase::Joined => *phase = SessionPhase::Leaving,
                SessionPhase::Idle | SessionPhase::Leaving => return Err(MeshError::NotJoined),
            }
        }

        if let Some(media) = self.controller.deactivate().await {
            media.release();
        }

        *self.phase.lock() = SessionPhase::Idle;
        info!("Left session");
        self.events.publish(SessionEvent::Left);
        Ok(())
    }

    /// Connect to a participant by id; see [`ConnectionController::connect`]
    pub async fn connect(&self, participant: ParticipantId) -> Result<ConnectOutcome> {
        self.controller.connect(participant).await
    }

    /// Tear down one participant's connection and sink
    pub async fn remove_participant(&self, participant: &ParticipantId) -> bool {
        self.controller.remove_participant(participant).await
    }

    /// Deliver a remote candidate to the participant's connection
    pub async fn add_remote_candidate(
        &self,
        participant: &ParticipantId,
        candidate: IceCandidate,
    ) -> Result<()> {
        self.controller
            .add_remote_candidate(participant, candidate)
            .await
    }

    /// Flip the local audio track. Returns the new enabled state, or `None` when
    /// there is no audio track.
    pub fn toggle_audio(&self) -> Option<bool> {
        self.toggle(TrackKind::Audio)
    }

    /// Flip the local video track. Returns the new enabled state, or `None` when
    /// there is no video track.
    pub fn toggle_video(&self) -> Option<bool> {
        self.toggle(TrackKind::Video)
    }

    fn toggle(&self, kind: TrackKind) -> Option<bool> {
        let Some(media) = self.controller.local_media() else {
            warn!(kind = %kind, "No local media, toggle ignored");
            return None;
        };
        let Some(track) = media.track(kind) else {
            warn!(kind = %kind, "No local track of this kind, toggle ignored");
            return None;
        };

        let enabled = track.toggle();
        info!(kind = %kind, enabled, "Toggled local track");
        Some(enabled)
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock()
    }

    #[must_use]
    pub fn local_id(&self) -> Option<ParticipantId> {
        self.controller.local_id()
    }

    /// Local capture, for the self-preview
    #[must_use]
    pub fn local_media(&self) -> Option<Arc<LocalMediaSet>> {
        self.controller.local_media()
    }

    /// Every registered participant, relay included
    #[must_use]
    pub fn participants(&self) -> Vec<ParticipantId> {
        self.controller.registry().ids()
    }

    /// Registered participants other than the relay
    #[must_use]
    pub fn remote_participants(&self) -> Vec<ParticipantId> {
        self.participants()
            .into_iter()
            .filter(|p| !p.is_sentinel())
            .collect()
    }

    #[must_use]
    pub fn connection_state(&self, participant: &ParticipantId) -> Option<ConnectionState> {
        self.controller.registry().get(participant).map(|e| e.state)
    }

    #[must_use]
    pub fn sink(&self, participant: &ParticipantId) -> Option<TrackSink> {
        self.controller.router().sink(participant)
    }

    #[must_use]
    pub fn is_discovery_running(&self) -> bool {
        self.controller.discovery().is_running()
    }

    /// Run one discovery round right away
    pub async fn discover_now(&self) -> Result<usize> {
        self.controller.discover_once().await
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn config(&self) -> &MeshConfig {
        &self.config
    }
}
