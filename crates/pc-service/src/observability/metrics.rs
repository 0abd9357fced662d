//! Metrics definitions for the Player Controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `pc_` prefix for Player Controller
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `node_index`: bounded by the configured node list
//! - `class`: 2 values (privileged, standard)
//! - `outcome`: 3 values (selected, denied, no_capacity)
//! - `command`: 7 values (six commands plus unknown)
//! - `status`: bounded by error variants (~8 values)
//! - `method`: 5 notification methods
//! - `event`: 4 engine event kinds

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded. Command latency buckets
/// cover fast acks (play, pause) through full WebRTC negotiation on `start`.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("pc_command".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set command latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Session & Node Metrics (Gauges)
// ============================================================================

/// Set the number of live sessions.
///
/// Metric: `pc_sessions_active`
pub fn set_sessions_active(count: usize) {
    // usize to f64 conversion is safe for realistic session counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("pc_sessions_active").set(count as f64);
}

/// Set the load counter of one node.
///
/// Metric: `pc_node_load`
/// Labels: `node_index`
pub fn set_node_load(node_index: usize, load: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("pc_node_load", "node_index" => node_index.to_string()).set(load as f64);
}

// ============================================================================
// Scheduling & Command Metrics (Counters, Histograms)
// ============================================================================

/// Record a node selection attempt.
///
/// Metric: `pc_node_selections_total`
/// Labels: `class`, `outcome`
pub fn record_node_selection(class: &'static str, outcome: &'static str) {
    counter!("pc_node_selections_total", "class" => class, "outcome" => outcome).increment(1);
}

/// Record a dispatched command and its latency.
///
/// Metrics: `pc_commands_total`, `pc_command_duration_seconds`
/// Labels: `command`, `status`
pub fn record_command(command: &'static str, status: &'static str, duration: Duration) {
    counter!("pc_commands_total", "command" => command, "status" => status).increment(1);
    histogram!("pc_command_duration_seconds", "command" => command)
        .record(duration.as_secs_f64());
}

/// Record a notification that could not be delivered.
///
/// Metric: `pc_notifications_dropped_total`
/// Labels: `method`
pub fn record_notification_dropped(method: &'static str) {
    counter!("pc_notifications_dropped_total", "method" => method).increment(1);
}

/// Record an engine event handled by a session.
///
/// Metric: `pc_engine_events_total`
/// Labels: `event`
pub fn record_engine_event(event: &'static str) {
    counter!("pc_engine_events_total", "event" => event).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_recording_without_recorder_is_noop() {
        set_sessions_active(0);
        set_node_load(0, 3);
        record_node_selection("standard", "selected");
        record_command("play", "success", Duration::from_millis(2));
        record_notification_dropped("iceCandidate");
        record_engine_event("EndOfStream");
    }

    #[test]
    fn test_metric_names_and_labels() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            set_sessions_active(2);
            set_node_load(1, 4);
            record_node_selection("privileged", "selected");
            record_node_selection("standard", "no_capacity");
            record_command("start", "success", Duration::from_millis(120));
            record_notification_dropped("videoInfo");
            record_engine_event("MediaStateChanged");
        });

        let metrics = snapshotter.snapshot().into_vec();
        let names: Vec<String> = metrics
            .iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();

        for expected in [
            "pc_sessions_active",
            "pc_node_load",
            "pc_node_selections_total",
            "pc_commands_total",
            "pc_command_duration_seconds",
            "pc_notifications_dropped_total",
            "pc_engine_events_total",
        ] {
            assert!(
                names.iter().any(|n| n == expected),
                "missing metric {expected}, got {names:?}"
            );
        }

        let node_load = metrics
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "pc_node_load")
            .unwrap();
        assert!(node_load
            .0
            .key()
            .labels()
            .any(|l| l.key() == "node_index" && l.value() == "1"));
        assert_eq!(node_load.3, DebugValue::Gauge(4.0.into()));

        let selections = metrics
            .iter()
            .filter(|(key, _, _, _)| key.key().name() == "pc_node_selections_total")
            .count();
        assert_eq!(selections, 2, "each class/outcome pair is its own series");
    }
}
