//! Structured event stream for `Testudo`.
//!
//! Discrete, typed events emitted while an assessment runs. Events are
//! serialized as newline-delimited JSON (JSONL) with a monotonically
//! increasing sequence number. Findings never appear in events; only
//! counts do.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::phase::Phase;
use crate::record::OutcomeStatus;

// ---------------------------------------------------------------------------
// Event variants
// ---------------------------------------------------------------------------

/// A discrete event emitted during an assessment run.
///
/// Tagged with `"type"` when serialized so consumers can dispatch on it.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A run has been created for a validated target.
    AssessmentStarted {
        /// When the run started.
        timestamp: DateTime<Utc>,
        /// Run identifier.
        run_id: Uuid,
        /// The validated target.
        target: String,
        /// Phases selected for this run, in order.
        phases: Vec<Phase>,
    },

    /// The orchestrator moved to a new state.
    StateChanged {
        /// When the transition occurred.
        timestamp: DateTime<Utc>,
        /// Previous state label.
        from: String,
        /// New state label.
        to: String,
    },

    /// A phase request is about to be sent.
    PhaseDispatched {
        /// When the attempt started.
        timestamp: DateTime<Utc>,
        /// Phase being attempted.
        phase: Phase,
        /// 1-based attempt number.
        attempt: u32,
    },

    /// One attempt failed.
    PhaseAttemptFailed {
        /// When the attempt failed.
        timestamp: DateTime<Utc>,
        /// Phase that failed.
        phase: Phase,
        /// 1-based attempt number.
        attempt: u32,
        /// Error kind (`transport`, `protocol`, `remote`).
        kind: String,
        /// Whether another attempt will follow.
        will_retry: bool,
    },

    /// A phase reached its terminal outcome.
    PhaseFinished {
        /// When the outcome was recorded.
        timestamp: DateTime<Utc>,
        /// Phase that finished.
        phase: Phase,
        /// Terminal status.
        status: OutcomeStatus,
        /// Attempts made.
        attempts: u32,
        /// Number of findings (never the findings themselves).
        findings: usize,
        /// Wall time across all attempts in milliseconds.
        duration_ms: u64,
    },

    /// Advisory text was attached to a phase.
    AdvisoryAttached {
        /// When the text was attached.
        timestamp: DateTime<Utc>,
        /// Phase enriched.
        phase: Phase,
        /// Number of recommendation lines.
        recommendations: usize,
    },

    /// Advisory enrichment was skipped or failed for a phase.
    AdvisorySkipped {
        /// When the skip was decided.
        timestamp: DateTime<Utc>,
        /// Phase concerned.
        phase: Phase,
        /// Why no text was attached.
        reason: String,
    },

    /// A report or playbook was written.
    ArtifactWritten {
        /// When the file was written.
        timestamp: DateTime<Utc>,
        /// `report` or `playbook`.
        kind: String,
        /// Destination path.
        path: PathBuf,
    },

    /// The run is over.
    AssessmentFinished {
        /// When the run finished.
        timestamp: DateTime<Utc>,
        /// Run identifier.
        run_id: Uuid,
        /// Final state label.
        state: String,
        /// Phases that succeeded.
        succeeded: usize,
        /// Phases that failed.
        failed: usize,
        /// Phases that were skipped.
        skipped: usize,
    },
}

// ---------------------------------------------------------------------------
// Envelope (adds sequence number via serde flatten)
// ---------------------------------------------------------------------------

/// Wraps an [`Event`] with a monotonically increasing sequence number.
#[derive(Debug, Serialize)]
struct EventEnvelope {
    sequence: u64,
    #[serde(flatten)]
    event: Event,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Thread-safe, buffered JSONL event writer.
///
/// Serialization or I/O failures are dropped; a broken event sink never
/// fails an assessment.
pub struct EventEmitter {
    writer: Mutex<BufWriter<Box<dyn Write + Send>>>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Creates an emitter that writes to the given writer.
    #[must_use]
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            sequence: AtomicU64::new(0),
        }
    }

    /// Creates an emitter that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    /// Creates an emitter that discards all events.
    #[must_use]
    pub fn noop() -> Self {
        Self::new(Box::new(std::io::sink()))
    }

    /// Creates an emitter that writes to a file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be created.
    pub fn from_file(path: &Path) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::new(Box::new(file)))
    }

    /// Emits an event as a single JSONL line.
    pub fn emit(&self, event: Event) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let envelope = EventEnvelope {
            sequence: seq,
            event,
        };

        if let Ok(mut w) = self.writer.lock() {
            if let Ok(line) = serde_json::to_string(&envelope) {
                let _ = writeln!(w, "{line}");
                let _ = w.flush();
            }
        }
    }

    /// Returns the number of events emitted so far.
    #[must_use]
    pub fn event_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex as StdMutex};

    use super::*;

    #[derive(Clone)]
    struct TestWriter(Arc<StdMutex<Vec<u8>>>);

    impl TestWriter {
        fn new() -> Self {
            Self(Arc::new(StdMutex::new(Vec::new())))
        }

        fn contents(&self) -> String {
            let buf = self.0.lock().unwrap();
            String::from_utf8_lossy(&buf).into_owned()
        }
    }

    impl Write for TestWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn fixed_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-02-04T10:15:30Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn sample_event() -> Event {
        Event::PhaseDispatched {
            timestamp: fixed_time(),
            phase: Phase::PostExploit,
            attempt: 1,
        }
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let parsed = serde_json::to_value(sample_event()).unwrap();
        assert_eq!(parsed["type"], "PhaseDispatched");
        assert_eq!(parsed["phase"], "post_exploit");
    }

    #[test]
    fn emitter_writes_valid_jsonl() {
        let tw = TestWriter::new();
        let emitter = EventEmitter::new(Box::new(tw.clone()));
        emitter.emit(sample_event());

        let parsed: serde_json::Value = serde_json::from_str(tw.contents().trim()).unwrap();
        assert_eq!(parsed["type"], "PhaseDispatched");
        assert_eq!(parsed["attempt"], 1);
        assert_eq!(parsed["sequence"], 0);
    }

    #[test]
    fn emitter_increments_sequence() {
        let tw = TestWriter::new();
        let emitter = EventEmitter::new(Box::new(tw.clone()));
        emitter.emit(sample_event());
        emitter.emit(Event::StateChanged {
            timestamp: Utc::now(),
            from: "pending".to_owned(),
            to: "running(0)".to_owned(),
        });

        assert_eq!(emitter.event_count(), 2);

        let lines: Vec<serde_json::Value> = tw
            .contents()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines[0]["sequence"], 0);
        assert_eq!(lines[1]["sequence"], 1);
    }

    #[test]
    fn phase_finished_carries_counts_only() {
        let event = Event::PhaseFinished {
            timestamp: fixed_time(),
            phase: Phase::Recon,
            status: OutcomeStatus::Succeeded,
            attempts: 2,
            findings: 3,
            duration_ms: 120,
        };
        let parsed = serde_json::to_value(event).unwrap();
        assert_eq!(parsed["findings"], 3);
        assert_eq!(parsed["status"], "Succeeded");
    }

    #[test]
    fn envelope_flattens_event_fields() {
        let envelope = EventEnvelope {
            sequence: 7,
            event: sample_event(),
        };
        let parsed = serde_json::to_value(&envelope).unwrap();
        assert_eq!(parsed["sequence"], 7);
        assert_eq!(parsed["type"], "PhaseDispatched");
        assert!(parsed.get("event").is_none());
    }

    #[test]
    fn noop_emitter_still_counts() {
        let emitter = EventEmitter::noop();
        emitter.emit(sample_event());
        assert_eq!(emitter.event_count(), 1);
    }
}
