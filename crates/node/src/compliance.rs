//! # Consensus Compliance Tracker
//!
//! Records obligation outcomes (missed/produced slots) and answers
//! streak and per-era queries. Pure record/query component: thresholds
//! are evaluated and alerted on by the caller, never here.
//!
//! ## Streak semantics
//!
//! When a miss event arrives without an explicit `consecutive_count`,
//! the tracker computes it from the validator's most recently recorded
//! event:
//!
//! - previous event was a miss at the immediately preceding height →
//!   previous streak + 1 (contiguous misses accumulate),
//! - anything else (height gap, produced slot, no history) → 1.
//!
//! Era boundaries do NOT reset a streak: eras are reporting windows,
//! adjacency is decided purely on heights. Duplicate (validator,
//! height) events are ignored by the store and leave all statistics
//! unchanged.

use std::sync::Arc;
use tracing::debug;

use vp_common::{ComplianceEvent, ComplianceEventType};

use crate::claims_store::{ComplianceStore, StoreError};

/// Input for [`ComplianceTracker::record_compliance_event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplianceEventInput {
    pub validator_id: String,
    pub event_type: ComplianceEventType,
    pub block_height: u64,
    pub era_id: u64,
    /// Streak override. `None` lets the tracker compute it.
    pub consecutive_count: Option<u32>,
}

/// Record/query facade over the compliance store.
pub struct ComplianceTracker {
    store: Arc<dyn ComplianceStore>,
}

impl ComplianceTracker {
    #[must_use]
    pub fn new(store: Arc<dyn ComplianceStore>) -> Self {
        Self { store }
    }

    /// Appends one obligation outcome.
    ///
    /// Computes the consecutive-miss streak when the input does not
    /// carry one. Returns the event as recorded (duplicates return the
    /// would-be event without modifying the store).
    pub fn record_compliance_event(
        &self,
        input: ComplianceEventInput,
        now: u64,
    ) -> Result<ComplianceEvent, StoreError> {
        let consecutive_count = match input.consecutive_count {
            Some(count) => count,
            None => self.compute_streak(&input)?,
        };

        let event = ComplianceEvent {
            validator_id: input.validator_id,
            event_type: input.event_type,
            block_height: input.block_height,
            era_id: input.era_id,
            recorded_at: now,
            consecutive_count,
        };

        let inserted = self.store.append_event(&event)?;
        if !inserted {
            debug!(
                event = "compliance_duplicate_ignored",
                validator = %event.validator_id,
                height = event.block_height,
            );
        }
        Ok(event)
    }

    fn compute_streak(&self, input: &ComplianceEventInput) -> Result<u32, StoreError> {
        if input.event_type != ComplianceEventType::MissedSlot {
            return Ok(0);
        }
        let previous = self.store.last_event_for(&input.validator_id)?;
        Ok(match previous {
            Some(prev)
                if prev.event_type == ComplianceEventType::MissedSlot
                    && prev.block_height + 1 == input.block_height =>
            {
                prev.consecutive_count.saturating_add(1)
            }
            _ => 1,
        })
    }

    /// Number of matching events for one validator in one era.
    pub fn get_missed_slot_count_by_era(
        &self,
        validator_id: &str,
        era_id: u64,
        event_type: ComplianceEventType,
    ) -> Result<u64, StoreError> {
        self.store.count_by_era(validator_id, era_id, event_type)
    }

    /// Maximum streak ever recorded for the validator, across all eras.
    /// The long-term compliance risk signal.
    pub fn get_highest_consecutive_misses(&self, validator_id: &str) -> Result<u32, StoreError> {
        self.store.max_consecutive(validator_id)
    }
}

impl std::fmt::Debug for ComplianceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComplianceTracker").finish_non_exhaustive()
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
