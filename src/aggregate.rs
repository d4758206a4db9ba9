//! Write-once aggregation of phase outcomes.
//!
//! Kept apart from the orchestrator so different scheduling strategies
//! (sequential, batched) share one aggregation contract.

use crate::error::AggregateError;
use crate::record::{AssessmentRecord, OutcomeSlot, PhaseOutcome, fill};

/// Writes outcomes into the reserved slots of an [`AssessmentRecord`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAggregator;

impl ResultAggregator {
    /// Creates an aggregator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Writes `outcome` into slot `idx`.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError::InvariantViolation`] when `idx` is out of
    /// range, the slot is already filled, or the outcome belongs to a
    /// different phase than the one the slot was reserved for.
    pub fn record(
        &self,
        record: &mut AssessmentRecord,
        idx: usize,
        outcome: PhaseOutcome,
    ) -> Result<(), AggregateError> {
        let len = record.slot_count();
        let Some(expected) = record.phases().get(idx).copied() else {
            return Err(AggregateError::InvariantViolation(format!(
                "slot {idx} out of range (record has {len} slots)"
            )));
        };
        let slot = record.slot_mut(idx).ok_or_else(|| {
            AggregateError::InvariantViolation(format!("slot {idx} out of range"))
        })?;
        fill(slot, idx, expected, outcome)
    }

    /// Writes through a pre-assigned slot writer.
    ///
    /// # Errors
    ///
    /// Same as [`OutcomeSlot::fill`].
    pub fn record_slot(
        &self,
        slot: OutcomeSlot<'_>,
        outcome: PhaseOutcome,
    ) -> Result<(), AggregateError> {
        slot.fill(outcome)
    }
}
