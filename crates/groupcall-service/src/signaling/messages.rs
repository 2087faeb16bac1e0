//! Signaling wire messages.
//!
//! Every message is a JSON object discriminated by its `id` field, e.g.
//! `{"id":"joinRoom","name":"alice","room":"R1"}`.

use crate::errors::GroupCallError;
use crate::media::{IceCandidate, MediaKind};
use serde::{Deserialize, Serialize};

/// Client → server messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "id", rename_all = "camelCase")]
pub enum InboundMessage {
    /// Join (or create) a room under a display name.
    JoinRoom { name: String, room: String },

    /// Request the camera stream of `sender`.
    ReceiveVideoFrom {
        sender: String,
        #[serde(rename = "sdpOffer")]
        sdp_offer: String,
    },

    /// Request the screen-share stream of `sender`.
    ReceiveScreenFrom {
        sender: String,
        #[serde(rename = "sdpOffer")]
        sdp_offer: String,
    },

    /// Candidate for the camera path identified by `name`.
    OnIceCandidate { candidate: IceCandidate, name: String },

    /// Candidate for the screen path identified by `name`.
    OnIceCandidateScreen { candidate: IceCandidate, name: String },

    /// Leave the current room.
    LeaveRoom,

    /// Stop publishing; peers drop their subscriptions to this participant.
    Stop,
}

impl InboundMessage {
    /// Returns the message id as a string for metric labels and logs.
    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            InboundMessage::JoinRoom { .. } => "joinRoom",
            InboundMessage::ReceiveVideoFrom { .. } => "receiveVideoFrom",
            InboundMessage::ReceiveScreenFrom { .. } => "receiveScreenFrom",
            InboundMessage::OnIceCandidate { .. } => "onIceCandidate",
            InboundMessage::OnIceCandidateScreen { .. } => "onIceCandidateScreen",
            InboundMessage::LeaveRoom => "leaveRoom",
            InboundMessage::Stop => "stop",
        }
    }
}

/// Server → client messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "id", rename_all = "camelCase")]
pub enum OutboundMessage {
    /// Names of everyone already in the room when the recipient joined.
    ExistingParticipants { data: Vec<String> },

    /// Someone joined after the recipient.
    NewParticipantArrived { name: String },

    /// Someone left the room.
    ParticipantLeft { name: String },

    /// SDP answer for a camera subscription to `name`.
    ReceiveVideoAnswer {
        name: String,
        #[serde(rename = "sdpAnswer")]
        sdp_answer: String,
    },

    /// SDP answer for a screen subscription to `name`.
    ReceiveScreenAnswer {
        name: String,
        #[serde(rename = "sdpAnswer")]
        sdp_answer: String,
    },

    /// Server-side candidate for the camera path identified by `name`.
    IceCandidate { name: String, candidate: IceCandidate },

    /// Server-side candidate for the screen path identified by `name`.
    IceCandidateScreen { name: String, candidate: IceCandidate },

    /// `name` stopped publishing.
    StopCommunication { name: String },

    /// Best-effort error notification.
    Error { code: i32, message: String },
}

impl OutboundMessage {
    /// Answer message for the given media kind.
    #[must_use]
    pub fn answer(kind: MediaKind, name: String, sdp_answer: String) -> Self {
        match kind {
            MediaKind::Camera => OutboundMessage::ReceiveVideoAnswer { name, sdp_answer },
            MediaKind::Screen => OutboundMessage::ReceiveScreenAnswer { name, sdp_answer },
        }
    }

    /// Candidate message for the given media kind.
    #[must_use]
    pub fn ice_candidate(kind: MediaKind, name: String, candidate: IceCandidate) -> Self {
        match kind {
            MediaKind::Camera => OutboundMessage::IceCandidate { name, candidate },
            MediaKind::Screen => OutboundMessage::IceCandidateScreen { name, candidate },
        }
    }

    /// Client-safe error notification.
    #[must_use]
    pub fn error(err: &GroupCallError) -> Self {
        OutboundMessage::Error {
            code: err.error_code(),
            message: err.client_message(),
        }
    }

    /// Returns the message id as a string for logs.
    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            OutboundMessage::ExistingParticipants { .. } => "existingParticipants",
            OutboundMessage::NewParticipantArrived { .. } => "newParticipantArrived",
            OutboundMessage::ParticipantLeft { .. } => "participantLeft",
            OutboundMessage::ReceiveVideoAnswer { .. } => "receiveVideoAnswer",
            OutboundMessage::ReceiveScreenAnswer { .. } => "receiveScreenAnswer",
            OutboundMessage::IceCandidate { .. } => "iceCandidate",
            OutboundMessage::IceCandidateScreen { .. } => "iceCandidateScreen",
            OutboundMessage::StopCommunication { .. } => "stopCommunication",
            OutboundMessage::Error { .. } => "error",
        }
    }
}
