//! Signaling relay client
//!
//! Stateless request/response wrapper around the relay server. The relay stores
//! session membership and forwards negotiation messages between participants.

use crate::config::SignalingConfig;
use crate::error::SignalingError;
use crate::types::{IceCandidate, ParticipantId, SdpType, SessionDescription};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

const OFFER_PATH: &str = "/offer";
const CONNECT_PEER_PATH: &str = "/connect-peer";
const ICE_CANDIDATE_PATH: &str = "/ice-candidate";
const POLL_PEERS_PATH: &str = "/notify-new-peer";

/// Kind of a relayed negotiation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Offer,
    Answer,
    Candidate,
}

/// A negotiation message exchanged through the relay; never persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalingMessage {
    pub from: ParticipantId,
    /// Absent when addressed to the relay itself
    pub to: Option<ParticipantId>,
    pub kind: MessageKind,
    pub payload: String,
}

/// Initial offer to the relay
#[derive(Debug, Clone)]
pub struct OfferRequest {
    pub participant: ParticipantId,
    pub offer: SessionDescription,
}

/// Relay answer plus the participants already in the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferAnswer {
    pub answer: SessionDescription,
    pub other_peers: Vec<ParticipantId>,
}

/// Direct peer negotiation, relayed by the server
#[derive(Debug, Clone)]
pub struct ConnectPeerRequest {
    pub from: ParticipantId,
    pub to: ParticipantId,
    pub offer: SessionDescription,
}

/// Connectivity candidate delivery
#[derive(Debug, Clone)]
pub struct CandidateRequest {
    pub from: ParticipantId,
    /// Absent for candidates gathered on the relay connection
    pub to: Option<ParticipantId>,
    pub candidate: IceCandidate,
}

impl OfferRequest {
    #[must_use]
    pub fn message(&self) -> SignalingMessage {
        SignalingMessage {
            from: self.participant.clone(),
            to: None,
            kind: MessageKind::Offer,
            payload: self.offer.sdp.clone(),
        }
    }
}

impl ConnectPeerRequest {
    #[must_use]
    pub fn message(&self) -> SignalingMessage {
        SignalingMessage {
            from: self.from.clone(),
            to: Some(self.to.clone()),
            kind: MessageKind::Offer,
            payload: self.offer.sdp.clone(),
        }
    }
}

impl CandidateRequest {
    #[must_use]
    pub fn message(&self) -> SignalingMessage {
        SignalingMessage {
            from: self.from.clone(),
            to: self.to.clone(),
            kind: MessageKind::Candidate,
            payload: self.candidate.candidate.clone(),
        }
    }
}

/// The relay contract consumed by the session
#[async_trait]
pub trait SignalingApi: Send + Sync {
    /// Exchange the initial offer/answer with the relay and learn current membership
    async fn submit_offer(&self, request: OfferRequest) -> Result<OfferAnswer, SignalingError>;

    /// Negotiate a direct connection with another participant
    async fn connect_peer(
        &self,
        request: ConnectPeerRequest,
    ) -> Result<SessionDescription, SignalingError>;

    /// Deliver a connectivity candidate
    async fn relay_candidate(&self, request: CandidateRequest) -> Result<(), SignalingError>;

    /// Current membership snapshot, excluding the caller
    async fn poll_peers(
        &self,
        participant: &ParticipantId,
    ) -> Result<Vec<ParticipantId>, SignalingError>;
}

#[derive(Serialize)]
struct OfferBody<'a> {
    username: &'a str,
    #[serde(rename = "type")]
    sdp_type: SdpType,
    sdp: &'a str,
}

#[derive(Serialize)]
struct ConnectPeerBody<'a> {
    username: &'a str,
    target: &'a str,
    #[serde(rename = "type")]
    sdp_type: SdpType,
    sdp: &'a str,
}

#[derive(Serialize)]
struct CandidateBody<'a> {
    username: &'a str,
    target: &'a str,
    candidate: &'a IceCandidate,
}

#[derive(Serialize)]
struct PollBody<'a> {
    username: &'a str,
}

#[derive(Deserialize)]
struct DescriptionResp {
    #[serde(rename = "type")]
    sdp_type: Option<SdpType>,
    sdp: Option<String>,
}

impl DescriptionResp {
    fn into_description(self) -> Result<SessionDescription, SignalingError> {
        let sdp_type = self
            .sdp_type
            .ok_or_else(|| SignalingError::Malformed("missing description type".to_string()))?;
        let sdp = self
            .sdp
            .filter(|sdp| !sdp.is_empty())
            .ok_or_else(|| SignalingError::Malformed("missing sdp".to_string()))?;
        Ok(SessionDescription { sdp_type, sdp })
    }
}

#[derive(Deserialize)]
struct OfferResp {
    #[serde(flatten)]
    description: DescriptionResp,
    #[serde(rename = "otherPeers", default)]
    other_peers: Vec<ParticipantId>,
}

#[derive(Deserialize)]
struct PeersResp {
    peers: Vec<ParticipantId>,
}

/// HTTP client for the relay
///
/// All operations are JSON `POST`s:
/// - `/offer`, `/connect-peer` (offer/answer)
/// - `/ice-candidate` (candidate relay)
/// - `/notify-new-peer` (membership poll)
pub struct HttpSignalingClient {
    base_url: String,
    client: Client,
}

impl HttpSignalingClient {
    /// Create a client from configuration
    pub fn new(config: &SignalingConfig) -> Result<Self, SignalingError> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(SignalingError::InvalidConfig(
                "base_url must not be empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .map_err(|e| SignalingError::InvalidConfig(e.to_string()))?;

        Ok(Self { base_url, client })
    }

    /// Get the relay base URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<String, SignalingError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(body).send().await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(SignalingError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        debug!(path, status = status.as_u16(), "Relay request completed");
        Ok(text)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, SignalingError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let text = self.post(path, body).await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl SignalingApi for HttpSignalingClient {
    async fn submit_offer(&self, request: OfferRequest) -> Result<OfferAnswer, SignalingError> {
        let body = OfferBody {
            username: request.participant.as_str(),
            sdp_type: request.offer.sdp_type,
            sdp: &request.offer.sdp,
        };

        let resp: OfferResp = self.post_json(OFFER_PATH, &body).await?;
        Ok(OfferAnswer {
            answer: resp.description.into_description()?,
            other_peers: resp.other_peers,
        })
    }

    async fn connect_peer(
        &self,
        request: ConnectPeerRequest,
    ) -> Result<SessionDescription, SignalingError> {
        let body = ConnectPeerBody {
            username: request.from.as_str(),
            target: request.to.as_str(),
            sdp_type: request.offer.sdp_type,
            sdp: &request.offer.sdp,
        };

        let resp: DescriptionResp = self.post_json(CONNECT_PEER_PATH, &body).await?;
        resp.into_description()
    }

    async fn relay_candidate(&self, request: CandidateRequest) -> Result<(), SignalingError> {
        let server = ParticipantId::server();
        let target = request.to.as_ref().unwrap_or(&server);
        let body = CandidateBody {
            username: request.from.as_str(),
            target: target.as_str(),
            candidate: &request.candidate,
        };

        self.post(ICE_CANDIDATE_PATH, &body).await?;
        Ok(())
    }

    async fn poll_peers(
        &self,
        participant: &ParticipantId,
    ) -> Result<Vec<ParticipantId>, SignalingError> {
        let body = PollBody {
            username: participant.as_str(),
        };

        let resp: PeersResp = self.post_json(POLL_PEERS_PATH, &body).await?;
        Ok(resp.peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_base_url_rejected() {
        let config = SignalingConfig {
            base_url: "  ".to_string(),
            ..SignalingConfig::default()
        };
        assert!(matches!(
            HttpSignalingClient::new(&config),
            Err(SignalingError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let config = SignalingConfig {
            base_url: "http://relay.local:8443/".to_string(),
            ..SignalingConfig::default()
        };
        let client = HttpSignalingClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "http://relay.local:8443");
    }

    #[test]
    fn test_description_requires_type_and_sdp() {
        let missing_type = DescriptionResp {
            sdp_type: None,
            sdp: Some("v=0".to_string()),
        };
        assert!(matches!(missing_type.into_description(), Err(SignalingError::Malformed(_))));

        let empty_sdp = DescriptionResp {
            sdp_type: Some(SdpType::Answer),
            sdp: Some(String::new()),
        };
        assert!(matches!(empty_sdp.into_description(), Err(SignalingError::Malformed(_))));
    }

    #[test]
    fn test_offer_response_defaults_missing_peer_list() {
        let resp: OfferResp = serde_json::from_str(r#"{"type": "answer", "sdp": "v=0"}"#).unwrap();
        assert!(resp.other_peers.is_empty());
        assert_eq!(resp.description.into_description().unwrap(), SessionDescription::answer("v=0"));
    }

    #[test]
    fn test_candidate_message_addresses_relay_when_untargeted() {
        let request = CandidateRequest {
            from: ParticipantId::new("alice").unwrap(),
            to: None,
            candidate: IceCandidate {
                candidate: "candidate:0".to_string(),
                sdp_mid: None,
                sdp_mline_index: None,
            },
        };
        let message = request.message();
        assert_eq!(message.kind, MessageKind::Candidate);
        assert!(message.to.is_none());
    }
}
