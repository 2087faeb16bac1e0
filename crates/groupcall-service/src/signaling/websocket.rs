//! WebSocket signaling endpoint.
//!
//! `GET /groupcall` upgrades to a WebSocket. The socket is split: the sink
//! becomes the [`SignalingTransport`] owned by a `ConnectionActor`, and the
//! stream is read here and fed to the router one frame at a time.

use crate::actors::{ActorMetrics, ConnectionActor, SignalingTransport};
use crate::errors::GroupCallError;

use super::messages::OutboundMessage;
use super::router::{ClientSession, SignalingRouter};

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Shared state for the signaling route.
#[derive(Clone)]
pub struct SignalingState {
    pub router: SignalingRouter,
    pub metrics: Arc<ActorMetrics>,
    /// Parent token for every connection actor.
    pub cancel_token: CancellationToken,
}

/// Outbound half of an upgraded WebSocket.
pub struct WebSocketTransport {
    sink: SplitSink<WebSocket, Message>,
}

impl WebSocketTransport {
    #[must_use]
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl SignalingTransport for WebSocketTransport {
    async fn send(&mut self, message: &OutboundMessage) -> Result<(), GroupCallError> {
        let json = serde_json::to_string(message)
            .map_err(|e| GroupCallError::Internal(format!("serialize failed: {e}")))?;
        self.sink
            .send(Message::Text(json))
            .await
            .map_err(|e| GroupCallError::Transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), GroupCallError> {
        self.sink
            .close()
            .await
            .map_err(|e| GroupCallError::Transport(e.to_string()))
    }
}

/// Create the signaling router.
pub fn signaling_router(state: SignalingState) -> Router {
    Router::new()
        .route("/groupcall", get(ws_upgrade))
        .with_state(state)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<SignalingState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SignalingState) {
    let session_id = uuid::Uuid::new_v4().to_string();
    let (sink, mut stream) = socket.split();

    let (connection, _task) = ConnectionActor::spawn(
        session_id.clone(),
        Box::new(WebSocketTransport::new(sink)),
        state.cancel_token.child_token(),
        Arc::clone(&state.metrics),
    );

    info!(
        target: "groupcall.signaling",
        session_id = %session_id,
        "Signaling session opened"
    );

    let mut session = ClientSession::new(session_id.clone(), connection);

    loop {
        tokio::select! {
            () = state.cancel_token.cancelled() => break,

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        state.router.handle_text(&mut session, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(
                            target: "groupcall.signaling",
                            session_id = %session_id,
                            error = %e,
                            "WebSocket read failed"
                        );
                        break;
                    }
                }
            }
        }
    }

    state.router.handle_disconnect(&mut session).await;

    info!(
        target: "groupcall.signaling",
        session_id = %session_id,
        "Signaling session closed"
    );
}
