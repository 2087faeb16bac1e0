//! Group call error types.
//!
//! Error types map to numeric `error` codes sent to clients in the
//! `error{code,message}` signaling message. Internal details are logged
//! server-side but not exposed to clients.

use crate::media::MediaError;
use thiserror::Error;

/// Group call service error type.
///
/// Maps to signaling error codes:
/// - `NotJoined`, `AlreadyJoined`, `InvalidMessage`: `BAD_REQUEST` (1)
/// - `RoomNotFound`, `ParticipantNotFound`: `NOT_FOUND` (4)
/// - `DuplicateName`, `RoomClosed`: `CONFLICT` (5)
/// - `Media`, `Transport`, `Config`, `Internal`: `INTERNAL_ERROR` (6)
/// - `Negotiation`: `NEGOTIATION_FAILED` (8)
#[derive(Debug, Error)]
pub enum GroupCallError {
    /// Participant name already taken in the room.
    #[error("Duplicate participant name: {0}")]
    DuplicateName(String),

    /// Room stopped accepting joins (its last participant left).
    #[error("Room is closed: {0}")]
    RoomClosed(String),

    /// Room not found.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Participant not found.
    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    /// The session has not joined a room yet.
    #[error("Session has not joined a room")]
    NotJoined,

    /// The session already joined a room.
    #[error("Session already joined room: {0}")]
    AlreadyJoined(String),

    /// Inbound message could not be parsed.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// SDP offer was rejected by the media engine.
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// Any other media engine failure.
    #[error("Media engine error: {0}")]
    Media(String),

    /// Transport write failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (actor channel failures and similar).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GroupCallError {
    /// Returns the signaling error code for this error.
    pub fn error_code(&self) -> i32 {
        match self {
            GroupCallError::NotJoined
            | GroupCallError::AlreadyJoined(_)
            | GroupCallError::InvalidMessage(_) => 1, // BAD_REQUEST
            GroupCallError::RoomNotFound(_) | GroupCallError::ParticipantNotFound(_) => 4, // NOT_FOUND
            GroupCallError::DuplicateName(_) | GroupCallError::RoomClosed(_) => 5, // CONFLICT
            GroupCallError::Media(_)
            | GroupCallError::Transport(_)
            | GroupCallError::Config(_)
            | GroupCallError::Internal(_) => 6, // INTERNAL_ERROR
            GroupCallError::Negotiation(_) => 8, // NEGOTIATION_FAILED
        }
    }

    /// Returns a client-safe error message (no internal details).
    pub fn client_message(&self) -> String {
        match self {
            GroupCallError::Media(_)
            | GroupCallError::Transport(_)
            | GroupCallError::Config(_)
            | GroupCallError::Internal(_) => "An internal error occurred".to_string(),
            GroupCallError::DuplicateName(_) => "Name already taken in this room".to_string(),
            GroupCallError::RoomClosed(_) => "Room is closing, please retry".to_string(),
            GroupCallError::RoomNotFound(_) => "Room not found".to_string(),
            GroupCallError::ParticipantNotFound(_) => "Participant not found".to_string(),
            GroupCallError::NotJoined => "Join a room first".to_string(),
            GroupCallError::AlreadyJoined(_) => "Already joined a room".to_string(),
            GroupCallError::InvalidMessage(_) => "Invalid message".to_string(),
            GroupCallError::Negotiation(_) => "Could not negotiate media session".to_string(),
        }
    }
}

impl From<MediaError> for GroupCallError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::Negotiation(msg) => GroupCallError::Negotiation(msg),
            other => GroupCallError::Media(other.to_string()),
        }
    }
}
