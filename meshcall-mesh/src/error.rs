use crate::types::ParticipantId;
use thiserror::Error;

/// Failure to obtain local capture devices
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Capture device unavailable: {0}")]
    Unavailable(String),

    #[error("Capture permission denied: {0}")]
    PermissionDenied(String),
}

/// Failure of a request to the signaling relay
#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Relay returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed relay response: {0}")]
    Malformed(String),

    #[error("Relay request timed out")]
    Timeout,

    #[error("Invalid signaling configuration: {0}")]
    InvalidConfig(String),
}

impl From<reqwest::Error> for SignalingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SignalingError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Failure reported by the media transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport error: {0}")]
    Backend(String),

    #[error("Unsupported local track: {0}")]
    UnsupportedTrack(String),

    #[error("Invalid session description: {0}")]
    InvalidDescription(String),

    #[error("Connection closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Media acquisition failed: {0}")]
    MediaAcquisition(#[from] MediaError),

    #[error("Signaling failed: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Transport failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Connectivity to {0} failed")]
    Connectivity(ParticipantId),

    #[error("Already exists: {0}")]
    AlreadyExists(ParticipantId),

    #[error("Invalid participant id: {0}")]
    InvalidParticipantId(String),

    #[error("Negotiation with {0} was cancelled")]
    Cancelled(ParticipantId),

    #[error("Negotiation with {0} timed out")]
    NegotiationTimeout(ParticipantId),

    #[error("Session has not joined")]
    NotJoined,

    #[error("Session has already joined")]
    AlreadyJoined,
}

pub type Result<T> = std::result::Result<T, MeshError>;
