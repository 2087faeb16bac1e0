//! Test fixtures for group call testing.
//!
//! Provides:
//! - Builders for inbound and outbound signaling messages
//! - A registry/router pair wired to a [`MockMediaEngine`]
//! - [`TestClient`], a scripted signaling session with a recorded outbox

use crate::mock_media::MockMediaEngine;
use crate::mock_transport::{spawn_recording_connection, TransportRecorder};
use groupcall_service::actors::{ActorMetrics, RegistrySettings, RoomRegistryHandle};
use groupcall_service::media::IceCandidate;
use groupcall_service::participant::Participant;
use groupcall_service::signaling::{ClientSession, InboundMessage, OutboundMessage, SignalingRouter};
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// Message builders
// ============================================================================

/// `joinRoom{name,room}`.
#[must_use]
pub fn join(name: &str, room: &str) -> InboundMessage {
    InboundMessage::JoinRoom {
        name: name.to_string(),
        room: room.to_string(),
    }
}

/// `receiveVideoFrom{sender,sdpOffer}`.
#[must_use]
pub fn receive_video(sender: &str, offer: &str) -> InboundMessage {
    InboundMessage::ReceiveVideoFrom {
        sender: sender.to_string(),
        sdp_offer: offer.to_string(),
    }
}

/// `receiveScreenFrom{sender,sdpOffer}`.
#[must_use]
pub fn receive_screen(sender: &str, offer: &str) -> InboundMessage {
    InboundMessage::ReceiveScreenFrom {
        sender: sender.to_string(),
        sdp_offer: offer.to_string(),
    }
}

/// `onIceCandidate{candidate,name}`.
#[must_use]
pub fn on_ice_candidate(name: &str, candidate: IceCandidate) -> InboundMessage {
    InboundMessage::OnIceCandidate {
        candidate,
        name: name.to_string(),
    }
}

/// `onIceCandidateScreen{candidate,name}`.
#[must_use]
pub fn on_ice_candidate_screen(name: &str, candidate: IceCandidate) -> InboundMessage {
    InboundMessage::OnIceCandidateScreen {
        candidate,
        name: name.to_string(),
    }
}

/// A client-side host candidate distinguishable by `n`.
#[must_use]
pub fn client_candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{n} 1 UDP 2122260223 192.168.1.20 {} typ host", 50000 + n),
        sdp_mid: Some("0".to_string()),
        sdp_m_line_index: 0,
    }
}

/// `existingParticipants{data}`.
#[must_use]
pub fn existing(names: &[&str]) -> OutboundMessage {
    OutboundMessage::ExistingParticipants {
        data: names.iter().map(|n| (*n).to_string()).collect(),
    }
}

/// `newParticipantArrived{name}`.
#[must_use]
pub fn arrived(name: &str) -> OutboundMessage {
    OutboundMessage::NewParticipantArrived {
        name: name.to_string(),
    }
}

/// `participantLeft{name}`.
#[must_use]
pub fn left(name: &str) -> OutboundMessage {
    OutboundMessage::ParticipantLeft {
        name: name.to_string(),
    }
}

// ============================================================================
// Service wiring
// ============================================================================

/// A registry and router over `engine` with default settings.
#[must_use]
pub fn test_router(engine: &MockMediaEngine) -> (SignalingRouter, RoomRegistryHandle) {
    test_router_with(engine, RegistrySettings::default())
}

/// A registry and router over `engine` with explicit settings.
#[must_use]
pub fn test_router_with(
    engine: &MockMediaEngine,
    settings: RegistrySettings,
) -> (SignalingRouter, RoomRegistryHandle) {
    let registry = RoomRegistryHandle::new(
        format!("groupcall-test-{}", Uuid::new_v4()),
        engine.as_engine(),
        settings,
        ActorMetrics::new(),
    );
    (SignalingRouter::new(registry.clone()), registry)
}

/// One scripted signaling session.
pub struct TestClient {
    router: SignalingRouter,
    session: ClientSession,
    recorder: TransportRecorder,
}

impl TestClient {
    /// Open a session on `router` with a recording transport.
    #[must_use]
    pub fn connect(router: &SignalingRouter, session_id: &str) -> Self {
        let (connection, recorder) = spawn_recording_connection(session_id, ActorMetrics::new());
        Self {
            router: router.clone(),
            session: ClientSession::new(session_id.to_string(), connection),
            recorder,
        }
    }

    /// Send a parsed message the way the WebSocket loop would.
    pub async fn send(&mut self, message: InboundMessage) {
        let text = serde_json::to_string(&message).unwrap();
        self.router.handle_text(&mut self.session, &text).await;
    }

    /// Send a raw text frame.
    pub async fn send_text(&mut self, text: &str) {
        self.router.handle_text(&mut self.session, text).await;
    }

    /// Close the transport side, performing the implicit leave.
    pub async fn disconnect(&mut self) {
        self.router.handle_disconnect(&mut self.session).await;
    }

    /// Everything delivered to this client so far.
    ///
    /// Waits until the connection has written all queued messages.
    pub async fn messages(&self) -> Vec<OutboundMessage> {
        let _ = self.session.connection().ping().await;
        self.recorder.sent()
    }

    /// Like [`messages`](Self::messages) but clears the outbox.
    pub async fn take_messages(&self) -> Vec<OutboundMessage> {
        let _ = self.session.connection().ping().await;
        self.recorder.take()
    }

    /// The participant this client joined as.
    #[must_use]
    pub fn participant(&self) -> Arc<Participant> {
        Arc::clone(self.session.participant().expect("client has not joined"))
    }

    /// Whether this client is currently joined.
    #[must_use]
    pub fn is_joined(&self) -> bool {
        self.session.participant().is_some()
    }

    #[must_use]
    pub fn recorder(&self) -> &TransportRecorder {
        &self.recorder
    }
}
