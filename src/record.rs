//! Assessment data model.
//!
//! An [`AssessmentRecord`] reserves one outcome slot per configured phase
//! at creation. Slots are written exactly once (through the aggregator),
//! recommendations may be attached afterwards, and [`AssessmentRecord::freeze`]
//! turns the record into an immutable [`Assessment`] for artifact
//! generation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AggregateError, ClientError};
use crate::phase::Phase;
use crate::target::Target;

// ============================================================================
// Phase outcomes
// ============================================================================

/// Terminal status of one phase attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutcomeStatus {
    /// The service accepted and completed the phase.
    Succeeded,
    /// Every attempt failed; see the error detail.
    Failed,
    /// Never dispatched (abort policy or cancellation).
    Skipped,
}

impl OutcomeStatus {
    /// Lowercase label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One executed command and whatever the service returned for it.
///
/// Both fields are opaque here; nothing in the coordinator interprets them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// The command as sent or as reported by the service.
    pub command: String,
    /// Raw per-step result, `null` when the service reported none.
    #[serde(rename = "result", default)]
    pub raw_result: Value,
}

/// Why a phase failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// `transport`, `protocol` or `remote`.
    pub kind: String,
    /// Human-readable description of the last failure.
    pub message: String,
}

impl ErrorDetail {
    /// Creates a detail from a kind and a message.
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<&ClientError> for ErrorDetail {
    fn from(err: &ClientError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Result of attempting one phase against one target.
///
/// Created once per attempt through one of the constructors and never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseOutcome {
    phase: Phase,
    status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    remote_status: Option<String>,
    steps: Vec<StepResult>,
    findings: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorDetail>,
    attempts: u32,
    timestamp: DateTime<Utc>,
}

impl PhaseOutcome {
    /// A completed phase.
    #[must_use]
    pub const fn succeeded(
        phase: Phase,
        remote_status: String,
        steps: Vec<StepResult>,
        findings: Vec<Value>,
        attempts: u32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            phase,
            status: OutcomeStatus::Succeeded,
            remote_status: Some(remote_status),
            steps,
            findings,
            error: None,
            attempts,
            timestamp,
        }
    }

    /// A phase whose last attempt failed with `error`.
    #[must_use]
    pub fn failed(
        phase: Phase,
        error: impl Into<ErrorDetail>,
        attempts: u32,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            phase,
            status: OutcomeStatus::Failed,
            remote_status: None,
            steps: Vec::new(),
            findings: Vec::new(),
            error: Some(error.into()),
            attempts,
            timestamp,
        }
    }

    /// A phase that was never dispatched.
    #[must_use]
    pub const fn skipped(phase: Phase, timestamp: DateTime<Utc>) -> Self {
        Self {
            phase,
            status: OutcomeStatus::Skipped,
            remote_status: None,
            steps: Vec::new(),
            findings: Vec::new(),
            error: None,
            attempts: 0,
            timestamp,
        }
    }

    /// Which phase this outcome belongs to.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Terminal status.
    #[must_use]
    pub const fn status(&self) -> OutcomeStatus {
        self.status
    }

    /// Status string the service reported, when it answered.
    #[must_use]
    pub fn remote_status(&self) -> Option<&str> {
        self.remote_status.as_deref()
    }

    /// Executed steps in service order.
    #[must_use]
    pub fn steps(&self) -> &[StepResult] {
        &self.steps
    }

    /// Findings as returned by the service.
    #[must_use]
    pub fn findings(&self) -> &[Value] {
        &self.findings
    }

    /// Failure detail, present only for `Failed`.
    #[must_use]
    pub const fn error(&self) -> Option<&ErrorDetail> {
        self.error.as_ref()
    }

    /// Number of attempts made (0 when skipped).
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// When the outcome was created.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

// ============================================================================
// Assessment record (mutable, during a run)
// ============================================================================

/// The state of one assessment run while phases are being attempted.
#[derive(Debug)]
pub struct AssessmentRecord {
    run_id: Uuid,
    target: Target,
    started_at: DateTime<Utc>,
    phases: Vec<Phase>,
    slots: Vec<Option<PhaseOutcome>>,
    recommendations: BTreeMap<Phase, Vec<String>>,
}

impl AssessmentRecord {
    /// Creates a record with one empty slot per phase, in the given order.
    #[must_use]
    pub fn new(target: Target, phases: Vec<Phase>, started_at: DateTime<Utc>) -> Self {
        Self::with_run_id(Uuid::new_v4(), target, phases, started_at)
    }

    /// Like [`new`](Self::new) with a caller-chosen run id.
    #[must_use]
    pub fn with_run_id(
        run_id: Uuid,
        target: Target,
        phases: Vec<Phase>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let slots = vec![None; phases.len()];
        Self {
            run_id,
            target,
            started_at,
            phases,
            slots,
            recommendations: BTreeMap::new(),
        }
    }

    /// Unique id of this run.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The validated target.
    #[must_use]
    pub const fn target(&self) -> &Target {
        &self.target
    }

    /// When the run started.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Configured phases, one per slot.
    #[must_use]
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Number of reserved slots.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Outcome in slot `idx`, if filled.
    #[must_use]
    pub fn outcome(&self, idx: usize) -> Option<&PhaseOutcome> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    /// Filled outcomes in slot order.
    pub fn outcomes(&self) -> impl Iterator<Item = &PhaseOutcome> {
        self.slots.iter().flatten()
    }

    /// Indices of slots not yet written.
    #[must_use]
    pub fn unfilled(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    /// Hands out one writer per unfilled slot in `indices`.
    ///
    /// Each [`OutcomeSlot`] borrows a distinct slot, so concurrent writers
    /// cannot race by construction. Indices that are out of range or
    /// already filled are skipped.
    pub fn slots_for(&mut self, indices: &[usize]) -> Vec<OutcomeSlot<'_>> {
        let phases = &self.phases;
        self.slots
            .iter_mut()
            .enumerate()
            .filter(|(i, s)| indices.contains(i) && s.is_none())
            .map(|(index, slot)| OutcomeSlot {
                index,
                phase: phases[index],
                slot,
            })
            .collect()
    }

    /// Attaches advisory text to a phase, replacing any earlier text.
    pub fn attach_recommendations(&mut self, phase: Phase, recommendations: Vec<String>) {
        self.recommendations.insert(phase, recommendations);
    }

    /// Recommendations attached so far.
    #[must_use]
    pub const fn recommendations(&self) -> &BTreeMap<Phase, Vec<String>> {
        &self.recommendations
    }

    pub(crate) fn slot_mut(&mut self, idx: usize) -> Option<&mut Option<PhaseOutcome>> {
        self.slots.get_mut(idx)
    }

    /// Freezes the record.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError::InvariantViolation`] if any slot is empty.
    pub fn freeze(
        self,
        aborted: Option<String>,
        finished_at: DateTime<Utc>,
    ) -> Result<Assessment, AggregateError> {
        let missing = self.unfilled();
        if !missing.is_empty() {
            return Err(AggregateError::InvariantViolation(format!(
                "cannot freeze assessment with unfilled slots {missing:?}"
            )));
        }
        Ok(Assessment {
            run_id: self.run_id,
            target: self.target,
            started_at: self.started_at,
            finished_at,
            aborted,
            outcomes: self.slots.into_iter().flatten().collect(),
            recommendations: self.recommendations,
        })
    }
}

/// Exclusive write access to one reserved slot.
#[derive(Debug)]
pub struct OutcomeSlot<'a> {
    index: usize,
    phase: Phase,
    slot: &'a mut Option<PhaseOutcome>,
}

impl OutcomeSlot<'_> {
    /// Slot index within the record.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Phase this slot is reserved for.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Writes the outcome, consuming the writer.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError::InvariantViolation`] when the outcome
    /// belongs to another phase or the slot is somehow already filled.
    pub fn fill(self, outcome: PhaseOutcome) -> Result<(), AggregateError> {
        fill(self.slot, self.index, self.phase, outcome)
    }
}

/// Shared write-once check for slots.
pub(crate) fn fill(
    slot: &mut Option<PhaseOutcome>,
    index: usize,
    expected: Phase,
    outcome: PhaseOutcome,
) -> Result<(), AggregateError> {
    if outcome.phase() != expected {
        return Err(AggregateError::InvariantViolation(format!(
            "slot {index} is reserved for '{expected}', got an outcome for '{}'",
            outcome.phase()
        )));
    }
    if slot.is_some() {
        return Err(AggregateError::InvariantViolation(format!(
            "slot {index} ('{expected}') is already filled"
        )));
    }
    *slot = Some(outcome);
    Ok(())
}

// ============================================================================
// Frozen assessment
// ============================================================================

/// An immutable, fully attempted assessment.
#[derive(Debug, Clone, Serialize)]
pub struct Assessment {
    run_id: Uuid,
    target: Target,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    aborted: Option<String>,
    outcomes: Vec<PhaseOutcome>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    recommendations: BTreeMap<Phase, Vec<String>>,
}

impl Assessment {
    /// Unique id of the run.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The assessed target.
    #[must_use]
    pub const fn target(&self) -> &Target {
        &self.target
    }

    /// When the run started.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the last phase was attempted.
    #[must_use]
    pub const fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    /// Abort reason, if the run ended in the aborted state.
    #[must_use]
    pub fn aborted(&self) -> Option<&str> {
        self.aborted.as_deref()
    }

    /// One outcome per configured phase, in configured order.
    #[must_use]
    pub fn outcomes(&self) -> &[PhaseOutcome] {
        &self.outcomes
    }

    /// Outcome for `phase`, if it was configured.
    #[must_use]
    pub fn outcome(&self, phase: Phase) -> Option<&PhaseOutcome> {
        self.outcomes.iter().find(|o| o.phase() == phase)
    }

    /// Advisory text for `phase`, if any was attached.
    #[must_use]
    pub fn recommendations(&self, phase: Phase) -> Option<&[String]> {
        self.recommendations.get(&phase).map(Vec::as_slice)
    }

    /// All attached recommendations.
    #[must_use]
    pub const fn all_recommendations(&self) -> &BTreeMap<Phase, Vec<String>> {
        &self.recommendations
    }

    /// Number of outcomes with the given status.
    #[must_use]
    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status() == status).count()
    }
}
