//! Signaling router - maps inbound client messages onto room operations.
//!
//! Messages from one client are handled sequentially in arrival order; many
//! clients are handled concurrently. Every failure is answered with a
//! best-effort `error{code,message}` carrying only the client-safe message.

use crate::actors::{ConnectionActorHandle, RoomActorHandle, RoomRegistryHandle};
use crate::errors::GroupCallError;
use crate::media::{IceCandidate, MediaKind};
use crate::observability::metrics;
use crate::participant::Participant;

use super::messages::{InboundMessage, OutboundMessage};

use std::sync::Arc;
use tracing::{debug, info, warn};

/// The room membership a session holds after a successful join.
#[derive(Debug, Clone)]
struct Joined {
    room: RoomActorHandle,
    participant: Arc<Participant>,
}

/// Per-transport session state.
#[derive(Debug)]
pub struct ClientSession {
    session_id: String,
    connection: ConnectionActorHandle,
    joined: Option<Joined>,
}

impl ClientSession {
    #[must_use]
    pub fn new(session_id: String, connection: ConnectionActorHandle) -> Self {
        Self {
            session_id,
            connection,
            joined: None,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionActorHandle {
        &self.connection
    }

    /// The participant this session joined as, if any.
    #[must_use]
    pub fn participant(&self) -> Option<&Arc<Participant>> {
        self.joined.as_ref().map(|joined| &joined.participant)
    }

    fn require_joined(&self) -> Result<&Joined, GroupCallError> {
        self.joined.as_ref().ok_or(GroupCallError::NotJoined)
    }
}

/// Dispatches inbound messages for every session.
#[derive(Clone)]
pub struct SignalingRouter {
    registry: RoomRegistryHandle,
}

impl SignalingRouter {
    #[must_use]
    pub fn new(registry: RoomRegistryHandle) -> Self {
        Self { registry }
    }

    /// Parse and handle one raw text frame.
    ///
    /// Failures are reported to the client and logged, never returned.
    pub async fn handle_text(&self, session: &mut ClientSession, text: &str) {
        let message = match serde_json::from_str::<InboundMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                metrics::record_signaling_message("invalid");
                self.report_error(session, &GroupCallError::InvalidMessage(e.to_string()))
                    .await;
                return;
            }
        };

        let message_type = message.message_type();
        if let Err(e) = self.handle_message(session, message).await {
            debug!(
                target: "groupcall.signaling",
                session_id = %session.session_id,
                message_type,
                error = %e,
                "Message handling failed"
            );
            self.report_error(session, &e).await;
        }
    }

    /// Handle one parsed message.
    pub async fn handle_message(
        &self,
        session: &mut ClientSession,
        message: InboundMessage,
    ) -> Result<(), GroupCallError> {
        metrics::record_signaling_message(message.message_type());

        debug!(
            target: "groupcall.signaling",
            session_id = %session.session_id,
            message_type = message.message_type(),
            "Incoming message"
        );

        match message {
            InboundMessage::JoinRoom { name, room } => self.join_room(session, name, room).await,
            InboundMessage::ReceiveVideoFrom { sender, sdp_offer } => {
                self.receive_from(session, &sender, &sdp_offer, MediaKind::Camera)
                    .await
            }
            InboundMessage::ReceiveScreenFrom { sender, sdp_offer } => {
                self.receive_from(session, &sender, &sdp_offer, MediaKind::Screen)
                    .await
            }
            InboundMessage::OnIceCandidate { candidate, name } => {
                self.add_candidate(session, candidate, &name, MediaKind::Camera)
                    .await
            }
            InboundMessage::OnIceCandidateScreen { candidate, name } => {
                self.add_candidate(session, candidate, &name, MediaKind::Screen)
                    .await
            }
            InboundMessage::LeaveRoom => self.leave_room(session).await,
            InboundMessage::Stop => self.stop(session).await,
        }
    }

    /// Transport closed: leave the room if joined, then close the connection.
    pub async fn handle_disconnect(&self, session: &mut ClientSession) {
        if session.joined.is_some() {
            if let Err(e) = self.leave_room(session).await {
                warn!(
                    target: "groupcall.signaling",
                    session_id = %session.session_id,
                    error = %e,
                    "Implicit leave on disconnect failed"
                );
            }
        }

        let _ = session.connection.close("transport closed".to_string()).await;

        debug!(
            target: "groupcall.signaling",
            session_id = %session.session_id,
            "Session ended"
        );
    }

    async fn join_room(
        &self,
        session: &mut ClientSession,
        name: String,
        room: String,
    ) -> Result<(), GroupCallError> {
        if let Some(joined) = &session.joined {
            return Err(GroupCallError::AlreadyJoined(joined.room.room().to_string()));
        }

        let (room_handle, result) = self
            .registry
            .join(room.clone(), name.clone(), session.connection.clone())
            .await?;

        info!(
            target: "groupcall.signaling",
            session_id = %session.session_id,
            room = %room,
            participant = %name,
            "Session joined room"
        );

        session.joined = Some(Joined {
            room: room_handle,
            participant: result.participant,
        });
        Ok(())
    }

    async fn receive_from(
        &self,
        session: &ClientSession,
        sender: &str,
        sdp_offer: &str,
        kind: MediaKind,
    ) -> Result<(), GroupCallError> {
        let joined = session.require_joined()?;
        let sender = if sender == joined.participant.name() {
            Arc::clone(&joined.participant)
        } else {
            joined.room.get_participant(sender.to_string()).await?
        };

        joined
            .participant
            .receive_from(&sender, sdp_offer, kind)
            .await
            .map(|_| ())
    }

    async fn add_candidate(
        &self,
        session: &ClientSession,
        candidate: IceCandidate,
        origin: &str,
        kind: MediaKind,
    ) -> Result<(), GroupCallError> {
        let joined = session.require_joined()?;
        joined.participant.add_candidate(candidate, origin, kind).await
    }

    async fn leave_room(&self, session: &mut ClientSession) -> Result<(), GroupCallError> {
        let joined = session.joined.take().ok_or(GroupCallError::NotJoined)?;
        let room = joined.room.room().to_string();
        let name = joined.participant.name().to_string();

        let outcome = self.registry.leave(room.clone(), name.clone()).await?;

        info!(
            target: "groupcall.signaling",
            session_id = %session.session_id,
            room = %room,
            participant = %name,
            remaining = outcome.remaining,
            "Session left room"
        );

        // Releases proceed in the background and log their own outcome.
        drop(outcome.completion);
        Ok(())
    }

    async fn stop(&self, session: &ClientSession) -> Result<(), GroupCallError> {
        let joined = session.require_joined()?;
        joined
            .room
            .stop_communication(joined.participant.name().to_string())
            .await
            .map(|_| ())
    }

    async fn report_error(&self, session: &ClientSession, err: &GroupCallError) {
        if let Err(e) = session.connection.send(OutboundMessage::error(err)).await {
            debug!(
                target: "groupcall.signaling",
                session_id = %session.session_id,
                error = %e,
                "Could not deliver error notification"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::test_support::{drain, stub_connection, StubEngine};
    use crate::actors::{ActorMetrics, RegistrySettings};

    fn router() -> (SignalingRouter, RoomRegistryHandle) {
        let registry = RoomRegistryHandle::new(
            "router-test".to_string(),
            Arc::new(StubEngine::default()),
            RegistrySettings::default(),
            ActorMetrics::new(),
        );
        (SignalingRouter::new(registry.clone()), registry)
    }

    #[tokio::test]
    async fn test_invalid_json_reports_bad_request() {
        let (router, registry) = router();
        let (conn, outbox) = stub_connection("s-1");
        let mut session = ClientSession::new("s-1".to_string(), conn.clone());

        router.handle_text(&mut session, "{not json").await;

        let sent = drain(&conn, &outbox).await;
        assert_eq!(
            sent,
            vec![OutboundMessage::Error {
                code: 1,
                message: "Invalid message".to_string()
            }]
        );
        registry.cancel();
    }

    #[tokio::test]
    async fn test_requires_join_before_media() {
        let (router, registry) = router();
        let (conn, _) = stub_connection("s-2");
        let mut session = ClientSession::new("s-2".to_string(), conn);

        let result = router
            .handle_message(
                &mut session,
                InboundMessage::ReceiveVideoFrom {
                    sender: "bob".to_string(),
                    sdp_offer: "offer".to_string(),
                },
            )
            .await;
        assert!(matches!(result, Err(GroupCallError::NotJoined)));

        let result = router.handle_message(&mut session, InboundMessage::LeaveRoom).await;
        assert!(matches!(result, Err(GroupCallError::NotJoined)));
        registry.cancel();
    }

    #[tokio::test]
    async fn test_second_join_rejected() {
        let (router, registry) = router();
        let (conn, _) = stub_connection("s-3");
        let mut session = ClientSession::new("s-3".to_string(), conn);

        router
            .handle_message(
                &mut session,
                InboundMessage::JoinRoom {
                    name: "alice".to_string(),
                    room: "R1".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(session.participant().unwrap().name(), "alice");

        let result = router
            .handle_message(
                &mut session,
                InboundMessage::JoinRoom {
                    name: "alice2".to_string(),
                    room: "R2".to_string(),
                },
            )
            .await;
        assert!(matches!(result, Err(GroupCallError::AlreadyJoined(_))));
        registry.cancel();
    }

    #[tokio::test]
    async fn test_loopback_answer_tagged_with_own_name() {
        let (router, registry) = router();
        let (conn, outbox) = stub_connection("s-4");
        let mut session = ClientSession::new("s-4".to_string(), conn.clone());

        router
            .handle_text(&mut session, r#"{"id":"joinRoom","name":"alice","room":"R1"}"#)
            .await;
        router
            .handle_text(
                &mut session,
                r#"{"id":"receiveVideoFrom","sender":"alice","sdpOffer":"o1"}"#,
            )
            .await;

        let sent = drain(&conn, &outbox).await;
        assert!(sent.contains(&OutboundMessage::ReceiveVideoAnswer {
            name: "alice".to_string(),
            sdp_answer: "answer:o1".to_string()
        }));
        assert_eq!(
            session
                .participant()
                .unwrap()
                .incoming_count(MediaKind::Camera)
                .await,
            0
        );
        registry.cancel();
    }

    #[tokio::test]
    async fn test_disconnect_leaves_room() {
        let (router, registry) = router();
        let (conn, _) = stub_connection("s-5");
        let mut session = ClientSession::new("s-5".to_string(), conn);

        router
            .handle_message(
                &mut session,
                InboundMessage::JoinRoom {
                    name: "alice".to_string(),
                    room: "R1".to_string(),
                },
            )
            .await
            .unwrap();

        router.handle_disconnect(&mut session).await;

        assert!(session.participant().is_none());
        let result = registry.get_room("R1".to_string()).await;
        assert!(matches!(result, Err(GroupCallError::RoomNotFound(_))));
        registry.cancel();
    }
}
