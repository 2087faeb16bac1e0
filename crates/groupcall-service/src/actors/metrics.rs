//! Actor metrics and mailbox monitoring.
//!
//! Each actor samples its channel backlog every time it takes a message off
//! the mailbox. The backlog is classified per actor type:
//!
//! | Actor Type | Normal | Warning | Critical |
//! |------------|--------|---------|----------|
//! | Room       | < 100  | 100-500 | > 500    |
//! | Connection | < 50   | 50-200  | > 200    |
//!
//! The registry uses the room thresholds. Level changes are logged once per
//! transition, not once per message.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Backlog limits for one actor type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxThresholds {
    /// Backlogs above this are `Warning`.
    pub normal: usize,
    /// Backlogs above this are `Critical`.
    pub warning: usize,
}

const ROOM_THRESHOLDS: MailboxThresholds = MailboxThresholds {
    normal: 100,
    warning: 500,
};

const CONNECTION_THRESHOLDS: MailboxThresholds = MailboxThresholds {
    normal: 50,
    warning: 200,
};

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// RoomRegistryActor (singleton).
    Registry,
    /// RoomActor (one per room).
    Room,
    /// ConnectionActor (one per client transport session).
    Connection,
}

impl ActorType {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Registry => "registry",
            ActorType::Room => "room",
            ActorType::Connection => "connection",
        }
    }

    #[must_use]
    pub const fn thresholds(&self) -> MailboxThresholds {
        match self {
            ActorType::Registry | ActorType::Room => ROOM_THRESHOLDS,
            ActorType::Connection => CONNECTION_THRESHOLDS,
        }
    }
}

/// Mailbox backlog classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

impl MailboxLevel {
    fn classify(backlog: usize, thresholds: MailboxThresholds) -> Self {
        if backlog > thresholds.warning {
            MailboxLevel::Critical
        } else if backlog > thresholds.normal {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Backlog tracking for one actor's mailbox.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    /// Room name, connection id, or registry instance id.
    actor_id: String,
    backlog: AtomicUsize,
    peak_backlog: AtomicUsize,
    received: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            backlog: AtomicUsize::new(0),
            peak_backlog: AtomicUsize::new(0),
            received: AtomicU64::new(0),
        }
    }

    /// Record that one message was taken off the mailbox with `waiting`
    /// messages still queued behind it.
    pub fn record_received(&self, waiting: usize) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.peak_backlog.fetch_max(waiting, Ordering::Relaxed);
        let previous = self.backlog.swap(waiting, Ordering::Relaxed);

        let thresholds = self.actor_type.thresholds();
        let before = MailboxLevel::classify(previous, thresholds);
        let after = MailboxLevel::classify(waiting, thresholds);
        if before == after {
            return;
        }

        match after {
            MailboxLevel::Critical => warn!(
                target: "groupcall.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                backlog = waiting,
                threshold = thresholds.warning,
                "Mailbox backlog critical"
            ),
            MailboxLevel::Warning if after > before => debug!(
                target: "groupcall.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                backlog = waiting,
                "Mailbox backlog elevated"
            ),
            _ => info!(
                target: "groupcall.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                actor_id = %self.actor_id,
                backlog = waiting,
                level = ?after,
                "Mailbox backlog easing"
            ),
        }
    }

    /// Backlog seen at the most recent receive.
    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.backlog.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_backlog.load(Ordering::Relaxed)
    }

    /// Messages taken off the mailbox so far.
    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        MailboxLevel::classify(self.current_depth(), self.actor_type.thresholds())
    }
}

/// Aggregated metrics for the actor system.
///
/// Every gauge change is mirrored into the Prometheus recorder.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    /// Rooms currently active.
    pub active_rooms: AtomicUsize,
    /// Participants currently joined across all rooms.
    pub active_participants: AtomicUsize,
    /// Client connections currently open.
    pub active_connections: AtomicUsize,
    /// Total actor panics (indicates bugs).
    pub actor_panics: AtomicU64,
    /// Total messages processed across all actors.
    pub total_messages_processed: AtomicU64,
}

impl ActorMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn room_created(&self) {
        let count = self.active_rooms.fetch_add(1, Ordering::Relaxed) + 1;
        crate::observability::metrics::set_rooms_active(count);
    }

    pub fn room_removed(&self) {
        let count = self.active_rooms.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        crate::observability::metrics::set_rooms_active(count);
    }

    pub fn participant_joined(&self) {
        let count = self.active_participants.fetch_add(1, Ordering::Relaxed) + 1;
        crate::observability::metrics::set_participants_active(count);
    }

    pub fn participant_left(&self) {
        let count = self.active_participants.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        crate::observability::metrics::set_participants_active(count);
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record an actor panic.
    pub fn record_panic(&self, actor_type: ActorType) {
        self.actor_panics.fetch_add(1, Ordering::Relaxed);
        crate::observability::metrics::record_actor_panic(actor_type.as_str());
        tracing::error!(
            target: "groupcall.actor.panic",
            actor_type = actor_type.as_str(),
            total_panics = self.actor_panics.load(Ordering::Relaxed),
            "Actor panic detected - indicates bug, investigation required"
        );
    }

    /// Record a message being processed.
    pub fn record_message_processed(&self) {
        self.total_messages_processed
            .fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.active_rooms.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.active_participants.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }
}
