//! Meshcall full-mesh call session
//!
//! Every participant opens a direct media connection to every other participant,
//! plus one connection to a signaling relay that also brokers membership.
//!
//! ## Architecture
//!
//! - **`Session`**: Join/leave facade; owns local media and the controller
//! - **`ConnectionController`**: Reserves, negotiates, rolls back and tears down connections
//! - **`ConnectionRegistry`**: At most one entry per participant
//! - **`MediaTrackRouter`**: Routes inbound tracks into per-participant sinks
//! - **`DiscoveryLoop`**: Periodic membership poll while remote participants exist
//! - **`HttpSignalingClient`**: JSON-over-HTTP relay client
//! - **`WebRtcBackend`**: `webrtc`-based transport and sample-fed local media
//!
//! ## Features
//!
//! - Idempotent connect under concurrent discovery
//! - Order-independent audio/video track routing
//! - Bounded, cancellable negotiation with rollback
//! - Stale-event fencing across reconnects
//! - Discovery that stops once nobody is left and restarts on the next connect
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meshcall_mesh::{HttpSignalingClient, MeshConfig, ParticipantId, Session, WebRtcBackend};
//! use std::sync::Arc;
//!
//! let config = MeshConfig::default();
//! let signaling = Arc::new(HttpSignalingClient::new(&config.signaling)?);
//! let backend = Arc::new(WebRtcBackend::new(&config)?);
//!
//! let session = Session::new(config, signaling, backend.clone(), backend);
//! let joined = session.join(ParticipantId::new("alice")?).await?;
//! session.toggle_audio();
//! session.leave().await?;
//! ```

mod config;
mod discovery;
mod error;
mod event;
mod peer;
mod registry;
mod session;
mod signaling;
mod track;
mod transport;
mod types;
mod webrtc_transport;

pub use config::{MeshConfig, SignalingConfig};
pub use discovery::DiscoveryLoop;
pub use error::{MediaError, MeshError, Result, SignalingError, TransportError};
pub use event::{AttachOutcome, EventBus, RemovalReason, SessionEvent, SESSION_EVENT_CAPACITY};
pub use peer::{ConnectOutcome, ConnectionController};
pub use registry::{ConnectionEntry, ConnectionRegistry};
pub use session::{JoinSummary, Session, SessionPhase};
pub use signaling::{
    CandidateRequest, ConnectPeerRequest, HttpSignalingClient, MessageKind, OfferAnswer,
    OfferRequest, SignalingApi, SignalingMessage,
};
pub use track::{MediaTrackRouter, TrackSink};
pub use transport::{
    EventSink, LocalMediaSet, LocalTrack, MediaConstraints, MediaDevices, MediaSource, PeerEvent,
    PeerTransport, RemoteTrack, TransportEvent, TransportFactory,
};
pub use types::{
    ConnectionState, ConnectivityState, IceCandidate, ParticipantId, SdpType, SessionDescription,
    TrackKind, LOCAL_PARTICIPANT, SERVER_PARTICIPANT,
};
pub use webrtc_transport::WebRtcBackend;
pub use webrtc::media::Sample;
