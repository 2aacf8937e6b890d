//! WebRTC-backed transport and media devices
//!
//! [`WebRtcBackend`] builds one `RTCPeerConnection` per participant with a
//! send/receive video and audio transceiver (video first), and forwards the
//! connection's callbacks to the session through its [`EventSink`].
//!
//! Local media are sample-fed tracks (VP8 video, Opus audio). The application
//! pushes encoded frames with [`WebRtcBackend::write_sample`]; samples written
//! while a track is disabled are dropped, which is how mute works.

use crate::config::MeshConfig;
use crate::error::{MediaError, TransportError};
use crate::transport::{
    EventSink, LocalMediaSet, LocalTrack, MediaConstraints, MediaDevices, PeerTransport,
    RemoteTrack, TransportEvent, TransportFactory,
};
use crate::types::{ConnectivityState, IceCandidate, ParticipantId, SdpType, SessionDescription, TrackKind};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

const LOCAL_STREAM_ID: &str = "meshcall-local";

fn backend_err(e: webrtc::Error) -> TransportError {
    TransportError::Backend(e.to_string())
}

const fn kind_of(codec: RTPCodecType) -> Option<TrackKind> {
    match codec {
        RTPCodecType::Audio => Some(TrackKind::Audio),
        RTPCodecType::Video => Some(TrackKind::Video),
        RTPCodecType::Unspecified => None,
    }
}

const fn connectivity_of(state: RTCPeerConnectionState) -> Option<ConnectivityState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectivityState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectivityState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectivityState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectivityState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectivityState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectivityState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, TransportError> {
    let converted = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp),
        SdpType::Rollback => {
            return Err(TransportError::InvalidDescription(
                "rollback descriptions are not supported".to_string(),
            ))
        }
    };
    converted.map_err(|e| TransportError::InvalidDescription(e.to_string()))
}

fn from_rtc_description(desc: RTCSessionDescription) -> Result<SessionDescription, TransportError> {
    let sdp_type = match desc.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => {
            return Err(TransportError::InvalidDescription(
                "unspecified description type".to_string(),
            ))
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: desc.sdp,
    })
}

/// Shared WebRTC API plus the ICE servers every connection uses
pub struct WebRtcBackend {
    api: API,
    ice_servers: Vec<String>,
}

impl WebRtcBackend {
    pub fn new(config: &MeshConfig) -> Result<Self, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(backend_err)?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(backend_err)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api,
            ice_servers: config.ice_servers.clone(),
        })
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = self
            .ice_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }

    /// Push one encoded frame into a local track.
    ///
    /// Returns `Ok(false)` without writing when the track is disabled or ended.
    pub async fn write_sample(track: &LocalTrack, sample: &Sample) -> Result<bool, TransportError> {
        if !track.is_enabled() || track.is_ended() {
            return Ok(false);
        }
        let sample_track = sample_track(track)?;
        sample_track.write_sample(sample).await.map_err(backend_err)?;
        Ok(true)
    }
}

fn sample_track(track: &LocalTrack) -> Result<Arc<TrackLocalStaticSample>, TransportError> {
    Arc::clone(track.source())
        .downcast::<TrackLocalStaticSample>()
        .map_err(|_| TransportError::UnsupportedTrack(track.id().to_string()))
}

#[async_trait]
impl TransportFactory for WebRtcBackend {
    async fn create(
        &self,
        participant: &ParticipantId,
        events: EventSink,
    ) -> Result<Arc<dyn PeerTransport>, TransportError> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(self.rtc_configuration())
                .await
                .map_err(backend_err)?,
        );

        for kind in [RTPCodecType::Video, RTPCodecType::Audio] {
            pc.add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendrecv,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(backend_err)?;
        }

        let track_events = events.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = track_events.clone();
            Box::pin(async move {
                let Some(kind) = kind_of(track.kind()) else {
                    debug!(track_id = %track.id(), "Ignoring track of unspecified kind");
                    return;
                };
                let id = track.id();
                events.emit(TransportEvent::Track(RemoteTrack::new(id, kind, track)));
            })
        }));

        let candidate_events = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = candidate_events.clone();
            Box::pin(async move {
                // None marks the end of gathering
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        events.emit(TransportEvent::IceCandidate(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                        }));
                    }
                    Err(e) => debug!(error = %e, "Failed to serialize local candidate"),
                }
            })
        }));

        let state_events = events;
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            if let Some(state) = connectivity_of(state) {
                state_events.emit(TransportEvent::StateChanged(state));
            }
            Box::pin(async {})
        }));

        debug!(participant = %participant, "Created peer connection");
        Ok(Arc::new(WebRtcPeer {
            pc,
            closed: CancellationToken::new(),
        }))
    }
}

#[async_trait]
impl MediaDevices for WebRtcBackend {
    async fn acquire(&self, constraints: MediaConstraints) -> Result<LocalMediaSet, MediaError> {
        if !constraints.audio && !constraints.video {
            return Err(MediaError::Unavailable(
                "neither audio nor video requested".to_string(),
            ));
        }

        let mut tracks = Vec::new();
        if constraints.video {
            let video = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_string(),
                    clock_rate: 90000,
                    ..Default::default()
                },
                "video".to_string(),
                LOCAL_STREAM_ID.to_string(),
            ));
            tracks.push(Arc::new(LocalTrack::new("video", TrackKind::Video, video)));
        }
        if constraints.audio {
            let audio = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_string(),
                    clock_rate: 48000,
                    channels: 2,
                    ..Default::default()
                },
                "audio".to_string(),
                LOCAL_STREAM_ID.to_string(),
            ));
            tracks.push(Arc::new(LocalTrack::new("audio", TrackKind::Audio, audio)));
        }

        info!(
            audio = constraints.audio,
            video = constraints.video,
            "Local media tracks created"
        );
        Ok(LocalMediaSet::new(tracks))
    }
}

struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    /// Stops the per-sender RTCP readers
    closed: CancellationToken,
}

/// Read and discard RTCP arriving for a sender. Reading is what feeds receiver
/// reports, NACKs and PLIs through the interceptor chain.
async fn drain_rtcp(sender: Arc<RTCRtpSender>, closed: CancellationToken) {
    let mut rtcp_buf = vec![0u8; 1500];
    loop {
        tokio::select! {
            () = closed.cancelled() => break,
            r = sender.read(&mut rtcp_buf) => if r.is_err() { break },
        }
    }
    debug!("RTCP reader stopped");
}

#[async_trait]
impl PeerTransport for WebRtcPeer {
    async fn add_local_track(&self, track: &LocalTrack) -> Result<(), TransportError> {
        let sample_track: Arc<dyn TrackLocal + Send + Sync> = sample_track(track)?;
        let sender = self.pc.add_track(sample_track).await.map_err(backend_err)?;
        tokio::spawn(drain_rtcp(sender, self.closed.child_token()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self.pc.create_offer(None).await.map_err(backend_err)?;
        from_rtc_description(offer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        let desc = to_rtc_description(desc)?;
        self.pc
            .set_local_description(desc)
            .await
            .map_err(backend_err)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        let desc = to_rtc_description(desc)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(backend_err)
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                ..Default::default()
            })
            .await
            .map_err(backend_err)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.cancel();
        self.pc.close().await.map_err(backend_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connectivity_mapping() {
        assert_eq!(
            connectivity_of(RTCPeerConnectionState::Failed),
            Some(ConnectivityState::Failed)
        );
        assert_eq!(
            connectivity_of(RTCPeerConnectionState::Disconnected),
            Some(ConnectivityState::Disconnected)
        );
        assert_eq!(connectivity_of(RTCPeerConnectionState::Unspecified), None);
    }

    #[test]
    fn test_rollback_description_rejected() {
        let desc = SessionDescription {
            sdp_type: SdpType::Rollback,
            sdp: String::new(),
        };
        assert!(matches!(
            to_rtc_description(desc),
            Err(TransportError::InvalidDescription(_))
        ));
    }

    #[tokio::test]
    async fn test_acquire_builds_requested_tracks() {
        let backend = WebRtcBackend::new(&MeshConfig::default()).unwrap();
        let media = backend
            .acquire(MediaConstraints {
                audio: true,
                video: false,
            })
            .await
            .unwrap();
        assert_eq!(media.tracks().len(), 1);
        assert!(media.track(TrackKind::Audio).is_some());

        let none = backend
            .acquire(MediaConstraints {
                audio: false,
                video: false,
            })
            .await;
        assert!(matches!(none, Err(MediaError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_disabled_track_drops_samples() {
        let backend = WebRtcBackend::new(&MeshConfig::default()).unwrap();
        let media = backend.acquire(MediaConstraints::default()).await.unwrap();
        let video = media.track(TrackKind::Video).unwrap();
        video.set_enabled(false);

        let written = WebRtcBackend::write_sample(video, &Sample::default())
            .await
            .unwrap();
        assert!(!written);
    }

    #[tokio::test]
    async fn test_offer_from_new_connection() {
        let backend = WebRtcBackend::new(&MeshConfig::default()).unwrap();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let participant = ParticipantId::new("bob").unwrap();
        let sink = EventSink::new(participant.clone(), 1, tx);

        let peer = backend.create(&participant, sink).await.unwrap();
        let offer = peer.create_offer().await.unwrap();
        assert_eq!(offer.sdp_type, SdpType::Offer);
        assert!(offer.sdp.contains("m=video"));
        assert!(offer.sdp.contains("m=audio"));
        peer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_stops_rtcp_readers() {
        let backend = WebRtcBackend::new(&MeshConfig::default()).unwrap();
        let media = backend.acquire(MediaConstraints::default()).await.unwrap();
        let pc = backend
            .api
            .new_peer_connection(backend.rtc_configuration())
            .await
            .unwrap();
        let peer = WebRtcPeer {
            pc: Arc::new(pc),
            closed: CancellationToken::new(),
        };
        let reader = peer.closed.child_token();

        for track in media.tracks() {
            peer.add_local_track(track).await.unwrap();
        }
        assert_eq!(peer.pc.get_senders().await.len(), 2);
        assert!(!reader.is_cancelled());

        peer.close().await.unwrap();
        assert!(reader.is_cancelled());
    }
}
