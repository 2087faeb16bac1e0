//! Message types for actor communication.
//!
//! All messages use `tokio::sync::oneshot` for request-response patterns.

use super::connection::ConnectionActorHandle;
use super::room::RoomActorHandle;
use crate::errors::GroupCallError;
use crate::participant::{Participant, ReleaseCompletion};
use crate::signaling::OutboundMessage;

use std::sync::Arc;
use tokio::sync::oneshot;

// ============================================================================
// RoomRegistryActor Messages
// ============================================================================

/// Messages sent to the `RoomRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Return the open room with this name, creating it if needed.
    GetOrCreateRoom {
        room: String,
        respond_to: oneshot::Sender<Result<RoomActorHandle, GroupCallError>>,
    },

    /// Look up an existing open room.
    GetRoom {
        room: String,
        respond_to: oneshot::Sender<Result<RoomActorHandle, GroupCallError>>,
    },

    /// Drop the room entry if the room has closed itself.
    ///
    /// Responds with whether an entry was removed.
    RemoveIfEmpty {
        room: String,
        respond_to: oneshot::Sender<bool>,
    },

    /// Get current registry status.
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Stop accepting rooms and cancel every room actor.
    Shutdown {
        respond_to: oneshot::Sender<Result<(), GroupCallError>>,
    },
}

/// Registry status information.
#[derive(Debug, Clone)]
pub struct RegistryStatus {
    /// Rooms currently registered.
    pub room_count: usize,
    /// Participants across all rooms.
    pub participant_count: usize,
    /// Open client connections.
    pub connection_count: usize,
    /// Whether shutdown has started.
    pub is_shutting_down: bool,
    /// Current mailbox depth.
    pub mailbox_depth: usize,
}

// ============================================================================
// RoomActor Messages
// ============================================================================

/// Messages sent to a `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// Register a new participant.
    Join {
        name: String,
        connection: ConnectionActorHandle,
        respond_to: oneshot::Sender<Result<JoinResult, GroupCallError>>,
    },

    /// Deregister a participant and release its endpoints.
    Leave {
        name: String,
        respond_to: oneshot::Sender<Result<LeaveOutcome, GroupCallError>>,
    },

    /// Look up a participant by name.
    GetParticipant {
        name: String,
        respond_to: oneshot::Sender<Result<Arc<Participant>, GroupCallError>>,
    },

    /// Tell everyone else that `name` stopped publishing.
    ///
    /// Responds with the number of incoming endpoints cancelled.
    StopCommunication {
        name: String,
        respond_to: oneshot::Sender<Result<usize, GroupCallError>>,
    },

    /// Get current room state.
    GetState {
        respond_to: oneshot::Sender<RoomState>,
    },
}

/// Result of a successful join.
#[derive(Debug)]
pub struct JoinResult {
    /// The newly created participant.
    pub participant: Arc<Participant>,
    /// Names of the participants present before this join.
    pub existing: Vec<String>,
}

/// Result of a successful leave.
#[derive(Debug)]
pub struct LeaveOutcome {
    /// Releases issued for the departed participant.
    pub completion: ReleaseCompletion,
    /// Participants still in the room.
    pub remaining: usize,
}

/// Room state snapshot.
#[derive(Debug, Clone)]
pub struct RoomState {
    /// Room name.
    pub room: String,
    /// Participant names, sorted.
    pub participants: Vec<String>,
    /// Shared pipeline id, once created.
    pub pipeline_id: Option<String>,
    /// Whether the room has stopped accepting joins.
    pub is_closed: bool,
}

// ============================================================================
// ConnectionActor Messages
// ============================================================================

/// Messages sent to a `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Write a message to the client.
    Send { message: OutboundMessage },

    /// Close the transport.
    Close { reason: String },

    /// Liveness check.
    Ping { respond_to: oneshot::Sender<()> },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_status_debug() {
        let status = RegistryStatus {
            room_count: 2,
            participant_count: 5,
            connection_count: 6,
            is_shutting_down: false,
            mailbox_depth: 0,
        };
        let debug_str = format!("{status:?}");
        assert!(debug_str.contains("room_count: 2"));
        assert!(debug_str.contains("participant_count: 5"));
    }

    #[test]
    fn test_room_state_clone() {
        let state = RoomState {
            room: "R1".to_string(),
            participants: vec!["alice".to_string(), "bob".to_string()],
            pipeline_id: Some("pipe-1".to_string()),
            is_closed: false,
        };
        let cloned = state.clone();
        assert_eq!(cloned.participants.len(), 2);
        assert_eq!(cloned.pipeline_id.as_deref(), Some("pipe-1"));
    }

    #[tokio::test]
    async fn test_connection_ping_roundtrip() {
        let (tx, rx) = oneshot::channel();
        let message = ConnectionMessage::Ping { respond_to: tx };
        if let ConnectionMessage::Ping { respond_to } = message {
            respond_to.send(()).unwrap();
        }
        assert!(rx.await.is_ok());
    }
}
