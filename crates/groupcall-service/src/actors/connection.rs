//! `ConnectionActor` - per-client outbound writer.
//!
//! Each `ConnectionActor`:
//! - Exclusively owns one [`SignalingTransport`]
//! - Is the single consumer of that client's outbound queue, so broadcasts,
//!   direct replies and candidate events never interleave on the wire
//! - Logs and swallows write failures; nothing upstream retries
//!
//! # Lifecycle
//!
//! 1. Spawned when the transport session opens
//! 2. Runs until `Close`, cancellation, or every handle is dropped
//! 3. Cancellation via child token propagates from the registry

use crate::errors::GroupCallError;
use crate::signaling::OutboundMessage;

use super::messages::ConnectionMessage;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace};

/// Default channel buffer size for the connection mailbox.
const CONNECTION_CHANNEL_BUFFER: usize = 500;

/// Write side of one client's signaling channel.
#[async_trait]
pub trait SignalingTransport: Send + 'static {
    /// Write one message.
    async fn send(&mut self, message: &OutboundMessage) -> Result<(), GroupCallError>;

    /// Close the channel.
    async fn close(&mut self) -> Result<(), GroupCallError>;
}

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: String,
}

impl ConnectionActorHandle {
    /// Get the connection ID.
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Queue a message for the client.
    pub async fn send(&self, message: OutboundMessage) -> Result<(), GroupCallError> {
        self.sender
            .send(ConnectionMessage::Send { message })
            .await
            .map_err(|e| GroupCallError::Internal(format!("channel send failed: {e}")))
    }

    /// Close the connection after already queued messages are written.
    pub async fn close(&self, reason: String) -> Result<(), GroupCallError> {
        self.sender
            .send(ConnectionMessage::Close { reason })
            .await
            .map_err(|e| GroupCallError::Internal(format!("channel send failed: {e}")))
    }

    /// Ping the connection actor to check liveness.
    pub async fn ping(&self) -> Result<(), GroupCallError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ConnectionMessage::Ping { respond_to: tx })
            .await
            .map_err(|e| GroupCallError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| GroupCallError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the connection actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    connection_id: String,
    transport: Box<dyn SignalingTransport>,
    receiver: mpsc::Receiver<ConnectionMessage>,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
    is_closing: bool,
}

impl ConnectionActor {
    /// Spawn a new connection actor owning `transport`.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        connection_id: String,
        transport: Box<dyn SignalingTransport>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONNECTION_CHANNEL_BUFFER);

        metrics.connection_opened();

        let actor = Self {
            connection_id: connection_id.clone(),
            transport,
            receiver,
            cancel_token: cancel_token.clone(),
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Connection, &connection_id),
            is_closing: false,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            connection_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "groupcall.actor.connection",
        fields(connection_id = %self.connection_id)
    )]
    async fn run(mut self) {
        debug!(
            target: "groupcall.actor.connection",
            connection_id = %self.connection_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "groupcall.actor.connection",
                        connection_id = %self.connection_id,
                        "ConnectionActor received cancellation signal"
                    );
                    self.graceful_close("cancelled").await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_received(self.receiver.len());
                            let should_exit = self.handle_message(message).await;
                            self.metrics.record_message_processed();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "groupcall.actor.connection",
                                connection_id = %self.connection_id,
                                "ConnectionActor channel closed, exiting"
                            );
                            self.graceful_close("all handles dropped").await;
                            break;
                        }
                    }
                }
            }
        }

        self.metrics.connection_closed();

        info!(
            target: "groupcall.actor.connection",
            connection_id = %self.connection_id,
            messages_processed = self.mailbox.messages_processed(),
            peak_depth = self.mailbox.peak_depth(),
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Send { message } => {
                self.handle_send(&message).await;
                false
            }

            ConnectionMessage::Close { reason } => {
                self.graceful_close(&reason).await;
                true
            }

            ConnectionMessage::Ping { respond_to } => {
                let _ = respond_to.send(());
                false
            }
        }
    }

    async fn handle_send(&mut self, message: &OutboundMessage) {
        if self.is_closing {
            debug!(
                target: "groupcall.actor.connection",
                connection_id = %self.connection_id,
                message_type = message.message_type(),
                "Dropping message, connection closing"
            );
            return;
        }

        match self.transport.send(message).await {
            Ok(()) => {
                trace!(
                    target: "groupcall.actor.connection",
                    connection_id = %self.connection_id,
                    message_type = message.message_type(),
                    "Message sent"
                );
            }
            Err(e) => {
                debug!(
                    target: "groupcall.actor.connection",
                    connection_id = %self.connection_id,
                    message_type = message.message_type(),
                    error = %e,
                    "Transport write failed"
                );
            }
        }
    }

    async fn graceful_close(&mut self, reason: &str) {
        if self.is_closing {
            return;
        }

        self.is_closing = true;

        debug!(
            target: "groupcall.actor.connection",
            connection_id = %self.connection_id,
            reason = %reason,
            "Closing connection"
        );

        if let Err(e) = self.transport.close().await {
            debug!(
                target: "groupcall.actor.connection",
                connection_id = %self.connection_id,
                error = %e,
                "Transport close failed"
            );
        }
    }
}
