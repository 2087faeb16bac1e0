//! Observability for the group call service.
//!
//! # Privacy by Default
//!
//! Instrumentation uses `#[instrument(skip_all)]` with explicit fields. SDP
//! bodies and ICE candidates are never logged or used as labels.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `groupcall_rooms_active` | Gauge | none | Current rooms |
//! | `groupcall_participants_active` | Gauge | none | Current joined participants |
//! | `groupcall_negotiations_total` | Counter | `kind`, `status` | SDP negotiations |
//! | `groupcall_negotiation_duration_seconds` | Histogram | `kind` | Negotiation latency |
//! | `groupcall_ice_candidates_dropped_total` | Counter | `kind` | Candidates with no matching endpoint |
//! | `groupcall_endpoint_releases_total` | Counter | `status` | Endpoint release outcomes |
//! | `groupcall_signaling_messages_total` | Counter | `message_type` | Inbound signaling traffic |
//! | `groupcall_actor_panics_total` | Counter | `actor_type` | Actor task panics |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
