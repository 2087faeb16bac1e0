//! Group Call Service Library
//!
//! Signaling server for multi-party video calls. Clients exchange JSON
//! messages over a WebSocket; all media flows through a media server
//! (Kurento) that this service drives. The library provides:
//!
//! - Room membership with join/leave notifications
//! - Per-participant outgoing (camera, screen) and lazily created incoming
//!   media endpoints, one per (sender, kind)
//! - SDP offer/answer relay and trickle ICE candidate routing
//! - Best-effort release of media resources when participants leave
//!
//! # Architecture
//!
//! ```text
//! RoomRegistryActor (singleton per instance)
//! └── supervises N RoomActors
//!     └── RoomActor (one per active room)
//!         ├── owns the media pipeline and participant map
//!         └── Participant (shared, per-endpoint-map locking)
//!             └── ConnectionActor (one per WebSocket, serialises writes)
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Registry, room and connection actors
//! - [`participant`] - Participant state and media endpoint lifecycle
//! - [`media`] - Media engine abstraction and the Kurento client
//! - [`signaling`] - Wire messages, router and WebSocket endpoint
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with client-facing error codes
//! - [`observability`] - Metrics and health endpoints

pub mod actors;
pub mod config;
pub mod errors;
pub mod media;
pub mod observability;
pub mod participant;
pub mod signaling;
