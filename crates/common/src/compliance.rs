//! # Consensus Compliance Records
//!
//! Append-only events describing the outcome of each assigned production
//! slot. One event per (validator, height); events are never mutated or
//! deleted once recorded.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome class of an observed obligation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplianceEventType {
    /// The validator failed to produce in its assigned slot.
    MissedSlot,
    /// The validator produced, but outside the slot window.
    LateBlock,
    /// A produced block was later reverted.
    RevertedBlock,
    /// The validator produced successfully. Resets the miss streak.
    ProducedSlot,
}

impl ComplianceEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissedSlot => "MISSED_SLOT",
            Self::LateBlock => "LATE_BLOCK",
            Self::RevertedBlock => "REVERTED_BLOCK",
            Self::ProducedSlot => "PRODUCED_SLOT",
        }
    }
}

impl fmt::Display for ComplianceEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded obligation outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceEvent {
    /// Validator the obligation belonged to.
    pub validator_id: String,
    /// Outcome class.
    pub event_type: ComplianceEventType,
    /// Slot height the obligation was assigned at.
    pub block_height: u64,
    /// Era (reporting window) the slot falls in.
    pub era_id: u64,
    /// Unix seconds when the event was recorded.
    pub recorded_at: u64,
    /// Consecutive-miss streak length at the time of recording.
    /// Zero for non-miss events.
    pub consecutive_count: u32,
}
