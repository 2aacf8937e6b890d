//! Mesh session configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Mesh session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Interval between discovery polls (milliseconds)
    pub poll_interval_ms: u64,
    /// Upper bound for one connection negotiation (seconds)
    pub negotiation_timeout_seconds: u64,
    /// STUN/TURN server URLs handed to the transport
    pub ice_servers: Vec<String>,
    /// Capture and send audio
    pub audio: bool,
    /// Capture and send video
    pub video: bool,
    /// Relay server access
    pub signaling: SignalingConfig,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5000,
            negotiation_timeout_seconds: 30,
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            audio: true,
            video: true,
            signaling: SignalingConfig::default(),
        }
    }
}

impl MeshConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation_timeout_seconds)
    }

    /// Collect configuration problems; empty when valid
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.poll_interval_ms == 0 {
            errors.push("poll_interval_ms must be greater than zero".to_string());
        }
        if self.negotiation_timeout_seconds == 0 {
            errors.push("negotiation_timeout_seconds must be greater than zero".to_string());
        }
        if !self.audio && !self.video {
            errors.push("at least one of audio or video must be enabled".to_string());
        }
        errors.extend(self.signaling.validate());
        errors
    }
}

/// Signaling relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    /// Base URL of the relay, e.g. `https://relay.example.com:8443`
    pub base_url: String,
    /// Per-request timeout (seconds)
    pub request_timeout_seconds: u64,
    /// Accept self-signed relay certificates (development relays)
    pub accept_invalid_certs: bool,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://localhost:8443".to_string(),
            request_timeout_seconds: 10,
            accept_invalid_certs: false,
        }
    }
}

impl SignalingConfig {
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.base_url.trim().is_empty() {
            errors.push("signaling.base_url must not be empty".to_string());
        }
        if self.request_timeout_seconds == 0 {
            errors.push("signaling.request_timeout_seconds must be greater than zero".to_string());
        }
        errors
    }
}
