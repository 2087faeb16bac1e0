//! `RoomActor` - per-room actor that owns room membership.
//!
//! Each `RoomActor`:
//! - Owns the name → participant map for one room
//! - Owns the room's shared media pipeline, created by the first join
//! - Serializes join, leave and stop so every broadcast sees a consistent
//!   membership snapshot
//!
//! # Closing
//!
//! When a leave empties the room, the actor cancels its own token in the
//! same step, releases the pipeline once the leaver's endpoints are released,
//! and exits. A join that reaches a closed room fails with `RoomClosed`; the
//! registry then replaces the entry with a fresh room.

use crate::errors::GroupCallError;
use crate::media::{MediaEngine, MediaPipeline};
use crate::participant::{CancelPolicy, Participant, ParticipantKey, ReleaseCompletion};
use crate::signaling::OutboundMessage;

use super::connection::ConnectionActorHandle;
use super::messages::{JoinResult, LeaveOutcome, RoomMessage, RoomState};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 1000;

/// How long shutdown waits for endpoint releases before releasing the pipeline.
const SHUTDOWN_RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room: String,
}

impl RoomActorHandle {
    /// Get the room name.
    #[must_use]
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Channel failures on a closed room surface as `RoomClosed`.
    fn channel_error(&self, detail: String) -> GroupCallError {
        if self.is_cancelled() {
            GroupCallError::RoomClosed(self.room.clone())
        } else {
            GroupCallError::Internal(detail)
        }
    }

    /// Register `name` in this room.
    ///
    /// The new participant receives `existingParticipants` and everyone
    /// already present receives `newParticipantArrived` in the same step.
    pub async fn join(
        &self,
        name: String,
        connection: ConnectionActorHandle,
    ) -> Result<JoinResult, GroupCallError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::Join {
                name,
                connection,
                respond_to: tx,
            })
            .await
            .map_err(|e| self.channel_error(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| self.channel_error(format!("response receive failed: {e}")))?
    }

    /// Deregister `name` and issue the release of its endpoints.
    pub async fn leave(&self, name: String) -> Result<LeaveOutcome, GroupCallError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::Leave {
                name,
                respond_to: tx,
            })
            .await
            .map_err(|e| self.channel_error(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| self.channel_error(format!("response receive failed: {e}")))?
    }

    /// Look up a participant by name.
    pub async fn get_participant(&self, name: String) -> Result<Arc<Participant>, GroupCallError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::GetParticipant {
                name,
                respond_to: tx,
            })
            .await
            .map_err(|e| self.channel_error(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| self.channel_error(format!("response receive failed: {e}")))?
    }

    /// Broadcast `stopCommunication` for `name` and cancel subscriptions to it.
    pub async fn stop_communication(&self, name: String) -> Result<usize, GroupCallError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::StopCommunication {
                name,
                respond_to: tx,
            })
            .await
            .map_err(|e| self.channel_error(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| self.channel_error(format!("response receive failed: {e}")))?
    }

    /// Get the current room state.
    pub async fn get_state(&self) -> Result<RoomState, GroupCallError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::GetState { respond_to: tx })
            .await
            .map_err(|e| self.channel_error(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| self.channel_error(format!("response receive failed: {e}")))
    }

    /// Cancel the room actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the room is closed or cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    room: String,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    participants: HashMap<String, Arc<Participant>>,
    engine: Arc<dyn MediaEngine>,
    pipeline: Option<Arc<dyn MediaPipeline>>,
    cancel_policy: CancelPolicy,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// The pipeline is not created until the first join.
    pub fn spawn(
        room: String,
        engine: Arc<dyn MediaEngine>,
        cancel_policy: CancelPolicy,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let actor = Self {
            room: room.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            participants: HashMap::new(),
            engine,
            pipeline: None,
            cancel_policy,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Room, &room),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "groupcall.actor.room", fields(room = %self.room))]
    async fn run(mut self) {
        info!(
            target: "groupcall.actor.room",
            room = %self.room,
            "RoomActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "groupcall.actor.room",
                        room = %self.room,
                        "RoomActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_received(self.receiver.len());
                            self.handle_message(message).await;
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "groupcall.actor.room",
                                room = %self.room,
                                "RoomActor channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "groupcall.actor.room",
            room = %self.room,
            participants = self.participants.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                name,
                connection,
                respond_to,
            } => {
                let result = self.handle_join(name, connection).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::Leave { name, respond_to } => {
                let result = self.handle_leave(&name).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::GetParticipant { name, respond_to } => {
                let result = self
                    .participants
                    .get(&name)
                    .cloned()
                    .ok_or(GroupCallError::ParticipantNotFound(name));
                let _ = respond_to.send(result);
            }

            RoomMessage::StopCommunication { name, respond_to } => {
                let result = self.handle_stop(&name).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.get_state());
            }
        }
    }

    /// Lazily create the room's shared pipeline.
    async fn pipeline(&mut self) -> Result<Arc<dyn MediaPipeline>, GroupCallError> {
        if let Some(pipeline) = &self.pipeline {
            return Ok(Arc::clone(pipeline));
        }

        let pipeline = self.engine.create_pipeline().await?;
        debug!(
            target: "groupcall.actor.room",
            room = %self.room,
            pipeline_id = %pipeline.id(),
            "Room pipeline created"
        );
        self.pipeline = Some(Arc::clone(&pipeline));
        Ok(pipeline)
    }

    async fn handle_join(
        &mut self,
        name: String,
        connection: ConnectionActorHandle,
    ) -> Result<JoinResult, GroupCallError> {
        if self.cancel_token.is_cancelled() {
            return Err(GroupCallError::RoomClosed(self.room.clone()));
        }

        if self.participants.contains_key(&name) {
            return Err(GroupCallError::DuplicateName(name));
        }

        let created = match self.pipeline().await {
            Ok(pipeline) => {
                Participant::create(
                    ParticipantKey::new(name.clone(), self.room.clone()),
                    connection,
                    pipeline,
                    self.cancel_policy,
                )
                .await
            }
            Err(e) => Err(e),
        };

        let participant = match created {
            Ok(participant) => participant,
            Err(e) => {
                warn!(
                    target: "groupcall.actor.room",
                    room = %self.room,
                    participant = %name,
                    error = %e,
                    "Join failed"
                );
                if self.participants.is_empty() {
                    drop(self.close_room(ReleaseCompletion::default()));
                }
                return Err(e);
            }
        };

        let mut existing: Vec<String> = self.participants.keys().cloned().collect();
        existing.sort();

        participant
            .send(OutboundMessage::ExistingParticipants {
                data: existing.clone(),
            })
            .await;
        for other in self.participants.values() {
            other
                .send(OutboundMessage::NewParticipantArrived { name: name.clone() })
                .await;
        }

        self.participants.insert(name.clone(), Arc::clone(&participant));
        self.metrics.participant_joined();

        info!(
            target: "groupcall.actor.room",
            room = %self.room,
            participant = %name,
            existing = existing.len(),
            "Participant joined"
        );

        Ok(JoinResult {
            participant,
            existing,
        })
    }

    async fn handle_leave(&mut self, name: &str) -> Result<LeaveOutcome, GroupCallError> {
        let participant = self
            .participants
            .remove(name)
            .ok_or_else(|| GroupCallError::ParticipantNotFound(name.to_string()))?;
        self.metrics.participant_left();

        for other in self.participants.values() {
            other
                .send(OutboundMessage::ParticipantLeft {
                    name: name.to_string(),
                })
                .await;
            other.cancel(name).await;
        }

        let mut completion = participant.close().await;
        let remaining = self.participants.len();

        info!(
            target: "groupcall.actor.room",
            room = %self.room,
            participant = %name,
            remaining,
            "Participant left"
        );

        if remaining == 0 {
            completion = self.close_room(completion);
        }

        Ok(LeaveOutcome {
            completion,
            remaining,
        })
    }

    async fn handle_stop(&mut self, name: &str) -> Result<usize, GroupCallError> {
        if !self.participants.contains_key(name) {
            return Err(GroupCallError::ParticipantNotFound(name.to_string()));
        }

        let mut cancelled = 0;
        for (other_name, other) in &self.participants {
            if other_name == name {
                continue;
            }
            other
                .send(OutboundMessage::StopCommunication {
                    name: name.to_string(),
                })
                .await;
            cancelled += other.cancel(name).await;
        }

        debug!(
            target: "groupcall.actor.room",
            room = %self.room,
            participant = %name,
            cancelled,
            "Participant stopped publishing"
        );

        Ok(cancelled)
    }

    /// Stop accepting joins and chain the pipeline release after `pending`.
    fn close_room(&mut self, pending: ReleaseCompletion) -> ReleaseCompletion {
        self.cancel_token.cancel();

        info!(
            target: "groupcall.actor.room",
            room = %self.room,
            "Room empty, closing"
        );

        match self.pipeline.take() {
            Some(pipeline) => {
                let room = self.room.clone();
                ReleaseCompletion::from_task(tokio::spawn(async move {
                    let report = pending.wait().await;
                    release_pipeline(&room, pipeline.as_ref()).await;
                    report
                }))
            }
            None => pending,
        }
    }

    fn get_state(&self) -> RoomState {
        let mut participants: Vec<String> = self.participants.keys().cloned().collect();
        participants.sort();
        RoomState {
            room: self.room.clone(),
            participants,
            pipeline_id: self.pipeline.as_ref().map(|p| p.id().to_string()),
            is_closed: self.cancel_token.is_cancelled(),
        }
    }

    /// Close every participant, then release the pipeline.
    async fn graceful_shutdown(&mut self) {
        if self.participants.is_empty() && self.pipeline.is_none() {
            return;
        }

        info!(
            target: "groupcall.actor.room",
            room = %self.room,
            participants = self.participants.len(),
            "Performing graceful shutdown"
        );

        let mut completion = ReleaseCompletion::default();
        for (_, participant) in self.participants.drain() {
            completion.merge(participant.close().await);
            self.metrics.participant_left();
        }

        match tokio::time::timeout(SHUTDOWN_RELEASE_TIMEOUT, completion.wait()).await {
            Ok(report) => {
                debug!(
                    target: "groupcall.actor.room",
                    room = %self.room,
                    released = report.released,
                    failed = report.failed,
                    "Participant endpoints released"
                );
            }
            Err(_) => {
                warn!(
                    target: "groupcall.actor.room",
                    room = %self.room,
                    "Endpoint release timed out during shutdown"
                );
            }
        }

        if let Some(pipeline) = self.pipeline.take() {
            release_pipeline(&self.room, pipeline.as_ref()).await;
        }
    }
}

async fn release_pipeline(room: &str, pipeline: &dyn MediaPipeline) {
    match pipeline.release().await {
        Ok(()) => {
            debug!(
                target: "groupcall.actor.room",
                room = %room,
                pipeline_id = %pipeline.id(),
                "Room pipeline released"
            );
        }
        Err(e) => {
            warn!(
                target: "groupcall.actor.room",
                room = %room,
                pipeline_id = %pipeline.id(),
                error = %e,
                "Room pipeline release failed"
            );
        }
    }
}
