//! Metrics definitions for the group call service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `groupcall_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `kind`: 2 values (camera, screen)
//! - `status`: 2 values (success, failure)
//! - `message_type`: bounded by inbound message ids (~8 values)
//! - `actor_type`: 3 values (registry, room, connection)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // SDP negotiation round trips through the media engine
        .set_buckets_for_metric(
            Matcher::Prefix("groupcall_negotiation".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set negotiation buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Room & Participant Metrics (Gauges)
// ============================================================================

/// Set the number of active rooms.
///
/// Metric: `groupcall_rooms_active`
/// Labels: none
pub fn set_rooms_active(count: usize) {
    // usize to f64 conversion is safe for realistic room counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("groupcall_rooms_active").set(count as f64);
}

/// Set the number of joined participants across all rooms.
///
/// Metric: `groupcall_participants_active`
/// Labels: none
pub fn set_participants_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("groupcall_participants_active").set(count as f64);
}

// ============================================================================
// Media Metrics
// ============================================================================

/// Record one SDP negotiation and its duration.
///
/// Metric: `groupcall_negotiations_total`, `groupcall_negotiation_duration_seconds`
/// Labels: `kind` (camera, screen), `status` (success, failure)
///
/// Cardinality: 4 for the counter, 2 for the histogram
pub fn record_negotiation(kind: &str, status: &str, duration: Duration) {
    counter!("groupcall_negotiations_total",
        "kind" => kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!("groupcall_negotiation_duration_seconds", "kind" => kind.to_string())
        .record(duration.as_secs_f64());
}

/// Record an ICE candidate dropped because no endpoint matched.
///
/// Metric: `groupcall_ice_candidates_dropped_total`
/// Labels: `kind` (camera, screen)
///
/// A steady non-zero rate usually means clients trickle candidates before
/// they request the subscription.
pub fn record_candidate_dropped(kind: &str) {
    counter!("groupcall_ice_candidates_dropped_total", "kind" => kind.to_string()).increment(1);
}

/// Record the outcome of a media endpoint release.
///
/// Metric: `groupcall_endpoint_releases_total`
/// Labels: `status` (success, failure)
pub fn record_endpoint_release(status: &str) {
    counter!("groupcall_endpoint_releases_total", "status" => status.to_string()).increment(1);
}

// ============================================================================
// Signaling & Actor Metrics (Counters)
// ============================================================================

/// Record an inbound signaling message.
///
/// Metric: `groupcall_signaling_messages_total`
/// Labels: `message_type`
///
/// Unparseable frames are recorded as `invalid`.
pub fn record_signaling_message(message_type: &str) {
    counter!("groupcall_signaling_messages_total", "message_type" => message_type.to_string())
        .increment(1);
}

/// Record an actor panic event.
///
/// Metric: `groupcall_actor_panics_total`
/// Labels: `actor_type`
///
/// ALERT: Any non-zero value indicates a bug and should trigger investigation.
pub fn record_actor_panic(actor_type: &str) {
    counter!("groupcall_actor_panics_total", "actor_type" => actor_type.to_string()).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    // Without a recorder the macros hit the global no-op recorder; these only
    // need to not panic.

    #[test]
    fn test_gauges_without_recorder() {
        set_rooms_active(0);
        set_rooms_active(25);
        set_participants_active(0);
        set_participants_active(400);
    }

    #[test]
    fn test_media_metrics_without_recorder() {
        record_negotiation("camera", "success", Duration::from_millis(40));
        record_negotiation("screen", "failure", Duration::from_millis(5));
        record_candidate_dropped("camera");
        record_endpoint_release("success");
        record_endpoint_release("failure");
        record_actor_panic("room");
    }

    #[test]
    fn test_metrics_recorded_with_expected_names() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            set_rooms_active(3);
            set_participants_active(7);
            record_negotiation("camera", "success", Duration::from_millis(30));
            record_candidate_dropped("screen");
            record_candidate_dropped("screen");
            record_endpoint_release("failure");
            record_signaling_message("joinRoom");
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let value_of = |name: &str| {
            snapshot
                .iter()
                .find(|(key, _, _, _)| key.key().name() == name)
                .map(|(_, _, _, value)| value.clone())
        };

        assert!(matches!(
            value_of("groupcall_rooms_active"),
            Some(DebugValue::Gauge(v)) if v.into_inner() == 3.0
        ));
        assert!(matches!(
            value_of("groupcall_participants_active"),
            Some(DebugValue::Gauge(v)) if v.into_inner() == 7.0
        ));
        assert!(matches!(
            value_of("groupcall_negotiations_total"),
            Some(DebugValue::Counter(1))
        ));
        assert!(matches!(
            value_of("groupcall_negotiation_duration_seconds"),
            Some(DebugValue::Histogram(ref samples)) if samples.len() == 1
        ));
        assert!(matches!(
            value_of("groupcall_ice_candidates_dropped_total"),
            Some(DebugValue::Counter(2))
        ));
        assert!(matches!(
            value_of("groupcall_endpoint_releases_total"),
            Some(DebugValue::Counter(1))
        ));
        assert!(matches!(
            value_of("groupcall_signaling_messages_total"),
            Some(DebugValue::Counter(1))
        ));
    }
}
