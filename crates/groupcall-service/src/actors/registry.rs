//! `RoomRegistryActor` - singleton supervisor for room actors.
//!
//! The `RoomRegistryActor` is the top-level actor in the hierarchy:
//!
//! - Singleton per service instance
//! - Owns the room name → `RoomActorHandle` map
//! - Never awaits the media engine; pipelines are created inside each room
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Monitors child actor health (panic detection via `JoinHandle`)
//!
//! # Join vs. destroy
//!
//! A room closes itself when its last participant leaves. A closed entry is
//! replaced on the next `GetOrCreateRoom` and removed by `RemoveIfEmpty`
//! only while it is still closed, so a room that was replaced by a
//! concurrent join is never dropped by the leaver's cleanup.

use crate::errors::GroupCallError;
use crate::media::MediaEngine;
use crate::participant::CancelPolicy;

use super::connection::ConnectionActorHandle;
use super::messages::{JoinResult, LeaveOutcome, RegistryMessage, RegistryStatus};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomActorHandle};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// How long shutdown waits for each room actor to finish.
const ROOM_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Room behaviour settings derived from configuration.
#[derive(Debug, Clone, Copy)]
pub struct RegistrySettings {
    /// What participants do with endpoints removed by `cancel`.
    pub cancel_policy: CancelPolicy,
    /// Attempts a join makes when it keeps hitting closing rooms.
    pub join_retry_limit: u32,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            cancel_policy: CancelPolicy::KeepAlive,
            join_retry_limit: 3,
        }
    }
}

/// Handle to the `RoomRegistryActor`.
#[derive(Clone)]
pub struct RoomRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
    join_retry_limit: u32,
}

impl RoomRegistryHandle {
    /// Create a new `RoomRegistryActor` and return a handle to it.
    #[must_use]
    pub fn new(
        instance_id: String,
        engine: Arc<dyn MediaEngine>,
        settings: RegistrySettings,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let (handle, _task) = RoomRegistryActor::spawn(instance_id, engine, settings, metrics);
        handle
    }

    /// Return the open room named `room`, creating it if needed.
    pub async fn get_or_create_room(&self, room: String) -> Result<RoomActorHandle, GroupCallError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RegistryMessage::GetOrCreateRoom {
                room,
                respond_to: tx,
            })
            .await
            .map_err(|e| GroupCallError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| GroupCallError::Internal(format!("response receive failed: {e}")))?
    }

    /// Look up an existing open room.
    pub async fn get_room(&self, room: String) -> Result<RoomActorHandle, GroupCallError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RegistryMessage::GetRoom {
                room,
                respond_to: tx,
            })
            .await
            .map_err(|e| GroupCallError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| GroupCallError::Internal(format!("response receive failed: {e}")))?
    }

    /// Drop the entry for `room` if that room has closed.
    pub async fn remove_if_empty(&self, room: String) -> Result<bool, GroupCallError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RegistryMessage::RemoveIfEmpty {
                room,
                respond_to: tx,
            })
            .await
            .map_err(|e| GroupCallError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| GroupCallError::Internal(format!("response receive failed: {e}")))
    }

    /// Get the current registry status.
    pub async fn get_status(&self) -> Result<RegistryStatus, GroupCallError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RegistryMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| GroupCallError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| GroupCallError::Internal(format!("response receive failed: {e}")))
    }

    /// Shut down every room and wait until their resources are released.
    pub async fn shutdown(&self) -> Result<(), GroupCallError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RegistryMessage::Shutdown { respond_to: tx })
            .await
            .map_err(|e| GroupCallError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| GroupCallError::Internal(format!("response receive failed: {e}")))?
    }

    /// Join `name` to `room`, creating the room if needed.
    ///
    /// Retries on a fresh room when the one found closes underneath the join.
    /// Returns the room the participant ended up in.
    pub async fn join(
        &self,
        room: String,
        name: String,
        connection: ConnectionActorHandle,
    ) -> Result<(RoomActorHandle, JoinResult), GroupCallError> {
        let mut attempt = 1;
        loop {
            let handle = self.get_or_create_room(room.clone()).await?;
            match handle.join(name.clone(), connection.clone()).await {
                Err(GroupCallError::RoomClosed(_)) if attempt < self.join_retry_limit => {
                    debug!(
                        target: "groupcall.actor.registry",
                        room = %room,
                        participant = %name,
                        attempt,
                        "Room closed during join, retrying"
                    );
                    attempt += 1;
                }
                Err(e) => {
                    if handle.is_cancelled() {
                        let _ = self.remove_if_empty(room).await;
                    }
                    return Err(e);
                }
                Ok(result) => return Ok((handle, result)),
            }
        }
    }

    /// Remove `name` from `room`; drops the room entry once it is empty.
    pub async fn leave(&self, room: String, name: String) -> Result<LeaveOutcome, GroupCallError> {
        let handle = self.get_room(room.clone()).await?;
        let outcome = handle.leave(name).await?;
        if outcome.remaining == 0 {
            self.remove_if_empty(room).await?;
        }
        Ok(outcome)
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for spawning child actors.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Internal state for a managed room.
struct ManagedRoom {
    handle: RoomActorHandle,
    task_handle: JoinHandle<()>,
    created_at: i64,
}

/// The `RoomRegistryActor` implementation.
pub struct RoomRegistryActor {
    instance_id: String,
    receiver: mpsc::Receiver<RegistryMessage>,
    cancel_token: CancellationToken,
    rooms: HashMap<String, ManagedRoom>,
    engine: Arc<dyn MediaEngine>,
    settings: RegistrySettings,
    accepting_new: bool,
    shutdown_waiters: Vec<oneshot::Sender<Result<(), GroupCallError>>>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomRegistryActor {
    /// Spawn the registry actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        instance_id: String,
        engine: Arc<dyn MediaEngine>,
        settings: RegistrySettings,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomRegistryHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = Self {
            mailbox: MailboxMonitor::new(ActorType::Registry, &instance_id),
            instance_id,
            receiver,
            cancel_token: cancel_token.clone(),
            rooms: HashMap::new(),
            engine,
            settings,
            accepting_new: true,
            shutdown_waiters: Vec::new(),
            metrics,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomRegistryHandle {
            sender,
            cancel_token,
            join_retry_limit: settings.join_retry_limit.max(1),
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "groupcall.actor.registry", fields(instance_id = %self.instance_id))]
    async fn run(mut self) {
        info!(
            target: "groupcall.actor.registry",
            instance_id = %self.instance_id,
            "RoomRegistryActor started"
        );

        loop {
            self.check_room_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "groupcall.actor.registry",
                        instance_id = %self.instance_id,
                        "RoomRegistryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_received(self.receiver.len());
                            self.handle_message(message);
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "groupcall.actor.registry",
                                instance_id = %self.instance_id,
                                "RoomRegistryActor channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }

        info!(
            target: "groupcall.actor.registry",
            instance_id = %self.instance_id,
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomRegistryActor stopped"
        );
    }

    /// Handle a single message. Never awaits a room or the media engine.
    fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::GetOrCreateRoom { room, respond_to } => {
                let result = self.get_or_create_room(room);
                let _ = respond_to.send(result);
            }

            RegistryMessage::GetRoom { room, respond_to } => {
                let result = self.get_room(&room);
                let _ = respond_to.send(result);
            }

            RegistryMessage::RemoveIfEmpty { room, respond_to } => {
                let removed = self.remove_if_empty(&room);
                let _ = respond_to.send(removed);
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            RegistryMessage::Shutdown { respond_to } => {
                self.initiate_shutdown();
                self.shutdown_waiters.push(respond_to);
            }
        }
    }

    fn get_or_create_room(&mut self, room: String) -> Result<RoomActorHandle, GroupCallError> {
        if !self.accepting_new {
            return Err(GroupCallError::Internal(
                "registry is shutting down".to_string(),
            ));
        }

        if let Some(managed) = self.rooms.get(&room) {
            if !managed.handle.is_cancelled() && !managed.task_handle.is_finished() {
                return Ok(managed.handle.clone());
            }
        }

        if self.rooms.remove(&room).is_some() {
            debug!(
                target: "groupcall.actor.registry",
                instance_id = %self.instance_id,
                room = %room,
                "Replacing closed room"
            );
            self.metrics.room_removed();
        }

        let (handle, task_handle) = RoomActor::spawn(
            room.clone(),
            Arc::clone(&self.engine),
            self.settings.cancel_policy,
            self.cancel_token.child_token(),
            Arc::clone(&self.metrics),
        );

        self.rooms.insert(
            room.clone(),
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
                created_at: chrono::Utc::now().timestamp(),
            },
        );
        self.metrics.room_created();

        info!(
            target: "groupcall.actor.registry",
            instance_id = %self.instance_id,
            room = %room,
            total_rooms = self.rooms.len(),
            "Room created"
        );

        Ok(handle)
    }

    fn get_room(&self, room: &str) -> Result<RoomActorHandle, GroupCallError> {
        match self.rooms.get(room) {
            Some(managed) if !managed.handle.is_cancelled() => Ok(managed.handle.clone()),
            _ => Err(GroupCallError::RoomNotFound(room.to_string())),
        }
    }

    fn remove_if_empty(&mut self, room: &str) -> bool {
        let closed = self
            .rooms
            .get(room)
            .is_some_and(|managed| managed.handle.is_cancelled());
        if !closed {
            return false;
        }

        if let Some(managed) = self.rooms.remove(room) {
            self.metrics.room_removed();
            info!(
                target: "groupcall.actor.registry",
                instance_id = %self.instance_id,
                room = %room,
                lifetime_secs = chrono::Utc::now().timestamp() - managed.created_at,
                total_rooms = self.rooms.len(),
                "Room removed"
            );
        }
        true
    }

    fn get_status(&self) -> RegistryStatus {
        RegistryStatus {
            room_count: self.rooms.len(),
            participant_count: self.metrics.participant_count(),
            connection_count: self.metrics.connection_count(),
            is_shutting_down: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    fn initiate_shutdown(&mut self) {
        info!(
            target: "groupcall.actor.registry",
            instance_id = %self.instance_id,
            room_count = self.rooms.len(),
            "Initiating graceful shutdown"
        );

        self.accepting_new = false;
        self.cancel_token.cancel();
    }

    async fn graceful_shutdown(&mut self) {
        self.accepting_new = false;

        for managed in self.rooms.values() {
            managed.handle.cancel();
        }

        for (room, managed) in self.rooms.drain() {
            match tokio::time::timeout(ROOM_SHUTDOWN_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "groupcall.actor.registry",
                        instance_id = %self.instance_id,
                        room = %room,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "groupcall.actor.registry",
                        instance_id = %self.instance_id,
                        room = %room,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "groupcall.actor.registry",
                        instance_id = %self.instance_id,
                        room = %room,
                        "Room actor shutdown timed out"
                    );
                }
            }
            self.metrics.room_removed();
        }

        info!(
            target: "groupcall.actor.registry",
            instance_id = %self.instance_id,
            "Graceful shutdown complete"
        );
    }

    /// Drop entries whose room actor finished without a `RemoveIfEmpty`.
    async fn check_room_health(&mut self) {
        let finished: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(room, _)| room.clone())
            .collect();

        for room in finished {
            let Some(managed) = self.rooms.remove(&room) else {
                continue;
            };
            match managed.task_handle.await {
                Ok(()) => {
                    debug!(
                        target: "groupcall.actor.registry",
                        instance_id = %self.instance_id,
                        room = %room,
                        "Room actor exited"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "groupcall.actor.registry",
                            instance_id = %self.instance_id,
                            room = %room,
                            error = ?join_error,
                            "Room actor panicked"
                        );
                        self.metrics.record_panic(ActorType::Room);
                    }
                }
            }
            self.metrics.room_removed();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::test_support::{stub_connection, StubEngine};

    fn registry(id: &str) -> (RoomRegistryHandle, JoinHandle<()>) {
        RoomRegistryActor::spawn(
            id.to_string(),
            Arc::new(StubEngine::default()),
            RegistrySettings::default(),
            ActorMetrics::new(),
        )
    }

    #[tokio::test]
    async fn test_registry_get_or_create_is_idempotent() {
        let (handle, _task) = registry("reg-001");

        let first = handle.get_or_create_room("R1".to_string()).await.unwrap();
        let second = handle.get_or_create_room("R1".to_string()).await.unwrap();
        assert_eq!(first.room(), "R1");
        assert_eq!(second.room(), "R1");

        let status = handle.get_status().await.unwrap();
        assert_eq!(status.room_count, 1);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_registry_get_nonexistent_room() {
        let (handle, _task) = registry("reg-002");
        let result = handle.get_room("nope".to_string()).await;
        assert!(matches!(result, Err(GroupCallError::RoomNotFound(_))));
        handle.cancel();
    }

    #[tokio::test]
    async fn test_registry_remove_if_empty_keeps_open_room() {
        let (handle, _task) = registry("reg-003");
        let (conn, _) = stub_connection("c-1");

        handle
            .join("R1".to_string(), "alice".to_string(), conn)
            .await
            .unwrap();

        assert!(!handle.remove_if_empty("R1".to_string()).await.unwrap());
        assert!(handle.get_room("R1".to_string()).await.is_ok());

        handle.cancel();
    }

    #[tokio::test]
    async fn test_registry_leave_last_removes_room() {
        let (handle, _task) = registry("reg-004");
        let (conn, _) = stub_connection("c-1");

        handle
            .join("R1".to_string(), "alice".to_string(), conn)
            .await
            .unwrap();
        let outcome = handle
            .leave("R1".to_string(), "alice".to_string())
            .await
            .unwrap();
        assert_eq!(outcome.remaining, 0);

        let result = handle.get_room("R1".to_string()).await;
        assert!(matches!(result, Err(GroupCallError::RoomNotFound(_))));
        assert_eq!(handle.get_status().await.unwrap().room_count, 0);

        handle.cancel();
    }

    #[tokio::test]
    async fn test_registry_replaces_closed_room() {
        let (handle, _task) = registry("reg-005");

        let stale = handle.get_or_create_room("R1".to_string()).await.unwrap();
        stale.cancel();

        let fresh = handle.get_or_create_room("R1".to_string()).await.unwrap();
        assert!(!fresh.is_cancelled());

        let (conn, _) = stub_connection("c-1");
        let (room, joined) = handle
            .join("R1".to_string(), "alice".to_string(), conn)
            .await
            .unwrap();
        assert!(joined.existing.is_empty());
        assert!(!room.is_cancelled());

        handle.cancel();
    }

    #[tokio::test]
    async fn test_registry_shutdown_rejects_new_rooms() {
        let (handle, task) = registry("reg-006");
        handle.get_or_create_room("R1".to_string()).await.unwrap();

        handle.shutdown().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(result.is_ok());
        assert!(handle.is_cancelled());

        let result = handle.get_or_create_room("R2".to_string()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_registry_cancellation_token() {
        let (handle, _task) = registry("reg-007");

        let child = handle.child_token();
        assert!(!child.is_cancelled());

        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(child.is_cancelled());
    }
}
