//! Metrics collection for `Testudo`.
//!
//! Prometheus-compatible counters and histograms. Labels are drawn only
//! from closed sets (phase ids, outcome statuses, error kinds), so label
//! cardinality is bounded without sanitizing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::TestudoError;
use crate::phase::Phase;
use crate::record::OutcomeStatus;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initializes the global metrics recorder.
///
/// With `Some(port)` a Prometheus listener is started on
/// `127.0.0.1:<port>`; with `None` the recorder is installed without an
/// HTTP endpoint.
///
/// # Errors
///
/// Returns `TestudoError::Io` if the recorder or listener cannot be
/// installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), TestudoError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| TestudoError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "testudo_phase_attempts_total",
        "Phase service requests sent, including retries"
    );
    describe_counter!(
        "testudo_phase_outcomes_total",
        "Terminal phase outcomes by status"
    );
    describe_counter!(
        "testudo_phase_errors_total",
        "Failed phase attempts by error kind"
    );
    describe_histogram!(
        "testudo_dispatch_duration_ms",
        "Wall time to reach a phase outcome in milliseconds"
    );
    describe_counter!(
        "testudo_advisory_total",
        "Advisory calls by result"
    );
    describe_counter!("testudo_runs_total", "Finished assessment runs by final state");
}

/// Records one request sent to a phase service.
pub fn record_phase_attempt(phase: Phase) {
    counter!("testudo_phase_attempts_total", "phase" => phase.id()).increment(1);
}

/// Records a failed attempt by error kind.
pub fn record_phase_error(phase: Phase, kind: &'static str) {
    counter!("testudo_phase_errors_total", "phase" => phase.id(), "kind" => kind).increment(1);
}

/// Records a terminal phase outcome.
pub fn record_phase_outcome(phase: Phase, status: OutcomeStatus) {
    counter!(
        "testudo_phase_outcomes_total",
        "phase" => phase.id(),
        "status" => status.as_str(),
    )
    .increment(1);
}

/// Records how long a phase took to reach its outcome.
pub fn record_dispatch_duration(phase: Phase, duration: Duration) {
    histogram!("testudo_dispatch_duration_ms", "phase" => phase.id())
        .record(duration.as_secs_f64() * 1000.0);
}

/// Records an advisory call result (`attached`, `failed`, `timeout`, `skipped`).
pub fn record_advisory(result: &'static str) {
    counter!("testudo_advisory_total", "result" => result).increment(1);
}

/// Records a finished run by final state label.
pub fn record_run(state: &'static str) {
    counter!("testudo_runs_total", "state" => state).increment(1);
}
