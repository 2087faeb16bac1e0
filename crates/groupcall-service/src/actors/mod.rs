//! Actor model implementation for the group call service.
//!
//! ```text
//! RoomRegistryActor (singleton per instance)
//! └── supervises N RoomActors
//!     └── RoomActor (one per open room)
//!         ├── owns membership and the room's media pipeline
//!         └── holds Participants, each writing through a ConnectionActor
//!
//! ConnectionActor (one per client transport session)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Per-room serialization**: join, leave and stop for one room run on its
//!   actor; rooms never contend with each other
//! - **Registry never awaits the engine**: a slow pipeline creation only
//!   stalls its own room
//! - **CancellationToken propagation**: registry → room, registry → connection
//! - **Mailbox monitoring**: backlog sampled on every receive, with
//!   thresholds (Room: 100/500, Connection: 50/200)
//!
//! # Modules
//!
//! - [`registry`] - `RoomRegistryActor` singleton that supervises rooms
//! - [`room`] - `RoomActor` per open room
//! - [`connection`] - `ConnectionActor` per client transport
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod connection;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod room;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export primary types
pub use connection::{ConnectionActor, ConnectionActorHandle, SignalingTransport};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor, MailboxThresholds};
pub use registry::{RegistrySettings, RoomRegistryActor, RoomRegistryHandle};
pub use room::{RoomActor, RoomActorHandle};
