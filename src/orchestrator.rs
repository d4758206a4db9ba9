//! Top-level assessment state machine.
//!
//! ```text
//! Pending ──▶ Running(0) ──▶ Running(1) ──▶ … ──▶ Completed
//!    │            │               │
//!    └────────────┴───────────────┴──────────────▶ Aborted
//! ```
//!
//! Phases are grouped into batches. In sequential mode every batch holds
//! one phase. In concurrent mode a phase marked `independent` joins the
//! batch of its predecessor. Slots for a batch are handed out before the
//! batch is dispatched, so concurrent writers never share a slot.
//! Cancellation and the abort policy are evaluated between batches only.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::advisory::AdvisoryEnricher;
use crate::aggregate::ResultAggregator;
use crate::config::{AssessmentConfig, ExecutionMode, FailurePolicy};
use crate::dispatch::ServiceDispatcher;
use crate::error::{AggregateError, ConfigError, TestudoError};
use crate::observability::events::{Event, EventEmitter};
use crate::observability::metrics;
use crate::phase::Phase;
use crate::record::{Assessment, AssessmentRecord, OutcomeStatus, PhaseOutcome};
use crate::target::{HostValidator, Target, TargetValidator};

// ============================================================================
// Run state
// ============================================================================

/// Orchestrator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Created, nothing dispatched yet.
    Pending,
    /// Dispatching the batch that starts at this slot index.
    Running(usize),
    /// Stopped early; remaining phases were recorded as skipped.
    Aborted,
    /// Every selected phase was attempted.
    Completed,
}

impl RunState {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Aborted | Self::Completed)
    }

    /// Label without the index, used for metrics.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running(_) => "running",
            Self::Aborted => "aborted",
            Self::Completed => "completed",
        }
    }

    /// Whether `self → next` is a legal transition.
    ///
    /// Running indices only move forward, so no slot is entered twice.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running(0) | Self::Aborted) => true,
            (Self::Running(i), Self::Running(j)) => j > i,
            (Self::Running(_), Self::Aborted | Self::Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running(i) => write!(f, "running({i})"),
            other => f.write_str(other.label()),
        }
    }
}

// ============================================================================
// Run report
// ============================================================================

/// What a finished run hands back to the caller.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Terminal state.
    pub state: RunState,
    /// The frozen record.
    pub assessment: Assessment,
}

impl RunReport {
    /// Whether the run ended in [`RunState::Aborted`].
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.state == RunState::Aborted
    }

    /// Number of succeeded phases.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.assessment.count(OutcomeStatus::Succeeded)
    }

    /// Number of failed phases.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.assessment.count(OutcomeStatus::Failed)
    }

    /// Number of skipped phases.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.assessment.count(OutcomeStatus::Skipped)
    }
}

// ============================================================================
// Batching
// ============================================================================

/// Groups slot indices into dispatch batches.
///
/// `independent(phase)` says whether a phase may share a batch with the
/// one before it. The first phase always opens a batch.
#[must_use]
pub fn plan_batches(
    phases: &[Phase],
    mode: ExecutionMode,
    independent: impl Fn(Phase) -> bool,
) -> Vec<Vec<usize>> {
    let mut batches: Vec<Vec<usize>> = Vec::new();
    for (idx, &phase) in phases.iter().enumerate() {
        let joins = mode == ExecutionMode::Concurrent && independent(phase);
        match batches.last_mut() {
            Some(batch) if joins => batch.push(idx),
            _ => batches.push(vec![idx]),
        }
    }
    batches
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Runs one assessment per call to [`run`](Self::run).
pub struct PhaseOrchestrator {
    config: Arc<AssessmentConfig>,
    dispatcher: ServiceDispatcher,
    enricher: Option<AdvisoryEnricher>,
    validator: Arc<dyn TargetValidator>,
    aggregator: ResultAggregator,
    events: Arc<EventEmitter>,
    cancel: CancellationToken,
}

impl fmt::Debug for PhaseOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseOrchestrator")
            .field("dispatcher", &self.dispatcher)
            .field("advisory", &self.enricher.is_some())
            .finish_non_exhaustive()
    }
}

impl PhaseOrchestrator {
    /// Creates an orchestrator with the default host validator, no
    /// advisory, a no-op event sink and a fresh cancellation token.
    #[must_use]
    pub fn new(config: Arc<AssessmentConfig>, dispatcher: ServiceDispatcher) -> Self {
        Self {
            config,
            dispatcher,
            enricher: None,
            validator: Arc::new(HostValidator),
            aggregator: ResultAggregator::new(),
            events: Arc::new(EventEmitter::noop()),
            cancel: CancellationToken::new(),
        }
    }

    /// Enables advisory enrichment.
    #[must_use]
    pub fn with_enricher(mut self, enricher: Option<AdvisoryEnricher>) -> Self {
        self.enricher = enricher;
        self
    }

    /// Replaces the target validator.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn TargetValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<EventEmitter>) -> Self {
        self.events = events;
        self
    }

    /// Uses an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that aborts the run at the next phase boundary.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs `phases` against `raw_target`.
    ///
    /// Per-phase failures never surface here; they are recorded in the
    /// assessment.
    ///
    /// # Errors
    ///
    /// - [`TestudoError::Target`] when the validator refuses the target
    /// - [`TestudoError::Config`] when `phases` is empty or a phase has no
    ///   endpoint
    /// - [`TestudoError::Aggregate`] on a broken slot invariant
    pub async fn run(&self, raw_target: &str, phases: &[Phase]) -> Result<RunReport, TestudoError> {
        let target = Target::new(raw_target, self.validator.as_ref())?;
        if phases.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "phases".to_string(),
                value: String::new(),
                expected: "at least one phase".to_string(),
            }
            .into());
        }
        self.dispatcher.ensure_covers(phases)?;

        let mut record = AssessmentRecord::new(target, phases.to_vec(), Utc::now());
        info!(
            run_id = %record.run_id(),
            target = %record.target(),
            phases = phases.len(),
            "assessment started"
        );
        self.events.emit(Event::AssessmentStarted {
            timestamp: record.started_at(),
            run_id: record.run_id(),
            target: record.target().to_string(),
            phases: phases.to_vec(),
        });

        let batches = plan_batches(phases, self.config.execution.mode, |phase| {
            self.config.phase(phase).is_some_and(|p| p.independent)
        });

        let mut state = RunState::Pending;
        let mut abort_reason = None;

        for batch in &batches {
            if self.cancel.is_cancelled() {
                abort_reason = Some("cancelled by operator".to_string());
                break;
            }
            let first = batch.first().copied().unwrap_or_default();
            self.transition(&mut state, RunState::Running(first))?;

            self.run_batch(&mut record, batch).await?;

            if self.config.execution.on_failure == FailurePolicy::Abort {
                if let Some(failed) = batch
                    .iter()
                    .filter_map(|&i| record.outcome(i))
                    .find(|o| o.status() == OutcomeStatus::Failed)
                {
                    abort_reason = Some(format!("phase '{}' failed", failed.phase()));
                    break;
                }
            }
        }

        if let Some(reason) = &abort_reason {
            warn!(reason = %reason, "assessment aborted; remaining phases skipped");
            self.transition(&mut state, RunState::Aborted)?;
            self.skip_remaining(&mut record)?;
        } else {
            self.transition(&mut state, RunState::Completed)?;
        }

        if let Some(enricher) = &self.enricher {
            enricher.enrich(&mut record).await;
        }

        let assessment = record.freeze(abort_reason, Utc::now())?;
        let report = RunReport { state, assessment };

        metrics::record_run(state.label());
        self.events.emit(Event::AssessmentFinished {
            timestamp: report.assessment.finished_at(),
            run_id: report.assessment.run_id(),
            state: state.to_string(),
            succeeded: report.succeeded(),
            failed: report.failed(),
            skipped: report.skipped(),
        });
        info!(
            state = %state,
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped(),
            "assessment finished"
        );
        Ok(report)
    }

    async fn run_batch(
        &self,
        record: &mut AssessmentRecord,
        batch: &[usize],
    ) -> Result<(), AggregateError> {
        let target = record.target().clone();
        let target = &target;
        let dispatcher = &self.dispatcher;
        let aggregator = &self.aggregator;

        let slots = record.slots_for(batch);
        if slots.len() != batch.len() {
            return Err(AggregateError::InvariantViolation(format!(
                "batch {batch:?} addresses filled or missing slots"
            )));
        }

        let pending = slots.into_iter().map(|slot| async move {
            let outcome = dispatcher.dispatch(slot.phase(), target).await;
            aggregator.record_slot(slot, outcome)
        });

        join_all(pending).await.into_iter().collect()
    }

    fn skip_remaining(&self, record: &mut AssessmentRecord) -> Result<(), AggregateError> {
        for idx in record.unfilled() {
            let phase = record.phases()[idx];
            let outcome = PhaseOutcome::skipped(phase, Utc::now());
            metrics::record_phase_outcome(phase, OutcomeStatus::Skipped);
            self.events.emit(Event::PhaseFinished {
                timestamp: outcome.timestamp(),
                phase,
                status: OutcomeStatus::Skipped,
                attempts: 0,
                findings: 0,
                duration_ms: 0,
            });
            self.aggregator.record(record, idx, outcome)?;
        }
        Ok(())
    }

    fn transition(&self, state: &mut RunState, next: RunState) -> Result<(), AggregateError> {
        if !state.can_transition_to(next) {
            return Err(AggregateError::InvariantViolation(format!(
                "illegal state transition {state} -> {next}"
            )));
        }
        debug!(from = %state, to = %next, "state transition");
        self.events.emit(Event::StateChanged {
            timestamp: Utc::now(),
            from: state.to_string(),
            to: next.to_string(),
        });
        *state = next;
        Ok(())
    }
}
