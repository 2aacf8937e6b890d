//! Common types used throughout the mesh session

use crate::error::MeshError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier reserved for the connection to the relay server
pub const SERVER_PARTICIPANT: &str = "server";

/// Identifier reserved for the local participant's own preview
pub const LOCAL_PARTICIPANT: &str = "local";

/// Unique identifier for a participant in the session.
///
/// Case-sensitive and never empty. Two sentinel values exist: [`SERVER_PARTICIPANT`]
/// names the relay connection and [`LOCAL_PARTICIPANT`] names the local preview.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Create a participant id, rejecting the empty string
    pub fn new(id: impl Into<String>) -> Result<Self, MeshError> {
        let id = id.into();
        if id.is_empty() {
            return Err(MeshError::InvalidParticipantId(
                "participant id must not be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// The relay server sentinel
    #[must_use]
    pub fn server() -> Self {
        Self(SERVER_PARTICIPANT.to_string())
    }

    /// The local participant sentinel
    #[must_use]
    pub fn local() -> Self {
        Self(LOCAL_PARTICIPANT.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_server(&self) -> bool {
        self.0 == SERVER_PARTICIPANT
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        self.0 == LOCAL_PARTICIPANT
    }

    /// True for either sentinel value
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.is_server() || self.is_local()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ParticipantId {
    type Error = MeshError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl TryFrom<&str> for ParticipantId {
    type Error = MeshError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl FromStr for ParticipantId {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl From<ParticipantId> for String {
    fn from(id: ParticipantId) -> Self {
        id.0
    }
}

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a connection entry
///
/// `Creating -> Negotiating -> Connected -> {Failed, Closed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Entry reserved, connection handle not yet ready
    Creating,
    /// Local offer set, waiting for the answer and live connectivity
    Negotiating,
    /// Remote description accepted and transport reports connectivity
    Connected,
    /// Transport reported failed or disconnected
    Failed,
    /// Explicit teardown
    Closed,
}

impl ConnectionState {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed | Self::Closed)
    }
}

/// Connectivity state reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectivityState {
    /// States that trigger participant removal
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Disconnected)
    }
}

/// Session description type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Pranswer => "pranswer",
            Self::Rollback => "rollback",
        };
        f.write_str(s)
    }
}

/// Offer/answer session description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Connectivity candidate as relayed through signaling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}
