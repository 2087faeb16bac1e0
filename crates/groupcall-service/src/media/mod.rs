//! Media engine abstraction.
//!
//! The service never touches media bytes. It creates, connects and releases
//! relay endpoints inside an external media engine and relays the SDP and
//! ICE negotiation that establishes them.
//!
//! ```text
//! MediaEngine
//! └── MediaPipeline (one per room, shared by all its participants)
//!     └── MediaEndpoint (one per participant/direction/peer/kind)
//! ```
//!
//! Candidate discovery is delivered as a channel: `create_endpoint` returns
//! the endpoint together with a [`CandidateReceiver`] that the engine feeds
//! from its own execution context. The channel closes once the endpoint is
//! released.
//!
//! # Modules
//!
//! - [`kurento`] - Kurento Media Server JSON-RPC client

pub mod kurento;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

pub use kurento::KurentoClient;

/// Receiving side of an endpoint's candidate-found events.
pub type CandidateReceiver = mpsc::UnboundedReceiver<IceCandidate>;

/// Sending side of an endpoint's candidate-found events (engine-owned).
pub type CandidateSender = mpsc::UnboundedSender<IceCandidate>;

/// A freshly created endpoint and its candidate event stream.
pub type EndpointBundle = (Arc<dyn MediaEndpoint>, CandidateReceiver);

/// Media engine failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    /// The engine rejected an SDP offer (malformed offer, unsupported codec).
    #[error("negotiation error: {0}")]
    Negotiation(String),

    /// Any other engine-side failure.
    #[error("engine error: {0}")]
    Engine(String),

    /// The engine connection is gone.
    #[error("engine connection closed")]
    Closed,
}

/// Which of a participant's two media streams a relationship is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Camera and microphone.
    Camera,
    /// Screen share.
    Screen,
}

impl MediaKind {
    /// Returns the kind as a string for metric labels and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Camera => "camera",
            MediaKind::Screen => "screen",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A network-reachability option for one media path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    /// Browsers send `null` when the candidate is not tied to a media section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_m_line_index: u32,
}

/// Entry point into the media engine.
#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    /// Allocate a new shared media-processing context.
    async fn create_pipeline(&self) -> Result<Arc<dyn MediaPipeline>, MediaError>;
}

/// Shared media-processing context owned by one room.
#[async_trait]
pub trait MediaPipeline: Send + Sync + 'static {
    /// Engine-assigned identifier.
    fn id(&self) -> &str;

    /// Create a relay endpoint bound to this pipeline.
    ///
    /// The candidate listener is registered before this returns, so no
    /// candidate discovered after `gather_candidates` can be missed.
    async fn create_endpoint(&self) -> Result<EndpointBundle, MediaError>;

    /// Release the pipeline and everything still bound to it.
    async fn release(&self) -> Result<(), MediaError>;
}

/// One directional media relay endpoint.
#[async_trait]
pub trait MediaEndpoint: Send + Sync + 'static {
    /// Engine-assigned identifier.
    fn id(&self) -> &str;

    /// Process an SDP offer and return the SDP answer.
    async fn process_offer(&self, sdp_offer: &str) -> Result<String, MediaError>;

    /// Start asynchronous candidate discovery.
    async fn gather_candidates(&self) -> Result<(), MediaError>;

    /// Apply a candidate received from the remote client.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError>;

    /// Connect this endpoint's media output to `sink`.
    async fn connect(&self, sink: &dyn MediaEndpoint) -> Result<(), MediaError>;

    /// Release the endpoint.
    async fn release(&self) -> Result<(), MediaError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ice_candidate_wire_names() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 UDP 2013266431 10.0.0.5 40000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: 0,
        };
        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["sdpMid"], "0");
        assert_eq!(json["sdpMLineIndex"], 0);
        assert!(json["candidate"].as_str().unwrap().starts_with("candidate:1"));

        let parsed: IceCandidate = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, candidate);
    }

    #[test]
    fn test_ice_candidate_null_mid() {
        let parsed: IceCandidate = serde_json::from_str(
            r#"{"candidate":"candidate:1 1 UDP 1 10.0.0.5 40000 typ host","sdpMid":null,"sdpMLineIndex":0}"#,
        )
        .unwrap();
        assert_eq!(parsed.sdp_mid, None);

        let json = serde_json::to_value(&parsed).unwrap();
        assert!(json.get("sdpMid").is_none());
    }

    #[test]
    fn test_media_kind_labels() {
        assert_eq!(MediaKind::Camera.as_str(), "camera");
        assert_eq!(MediaKind::Screen.to_string(), "screen");
        assert_ne!(MediaKind::Camera, MediaKind::Screen);
    }
}
