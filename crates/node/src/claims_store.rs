//! # Durable Store Contracts
//!
//! Trait contracts for the keyed record store holding [`RewardClaim`]s
//! and [`ComplianceEvent`]s, plus in-memory implementations used by
//! tests and test mode. The LMDB-backed implementation lives in
//! [`crate::lmdb_store`].
//!
//! ## Per-claim atomicity
//!
//! `mark_submitted` and `mark_failed` are conditional updates: the
//! read-status / decide / write-status sequence for one claim executes
//! atomically inside the store (one lock here, one write transaction in
//! LMDB). Two racing submitters cannot both observe `Pending` and both
//! win; the loser gets [`StoreError::AlreadySubmitted`]. This is the
//! property the requeue worker and the settlement pipeline rely on to
//! never double-settle a claim.
//!
//! Claims are never deleted: `Submitted` records stay for audit.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

use vp_common::{ClaimStatus, ComplianceEvent, ComplianceEventType, RewardClaim};

/// Store operation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("claim not found: {0}")]
    NotFound(String),

    /// Conditional update refused: the claim is already settled.
    #[error("claim already submitted: {0}")]
    AlreadySubmitted(String),

    /// Backend-level failure (I/O, serialization, transaction).
    #[error("store backend error: {0}")]
    Backend(String),
}

// ════════════════════════════════════════════════════════════════════════════════
// TRAITS
// ════════════════════════════════════════════════════════════════════════════════

/// Keyed store for reward claims.
pub trait ClaimsStore: Send + Sync {
    /// Inserts the claim if no record with its id exists. Re-inserting
    /// an existing id is a no-op (idempotent persistence).
    fn persist_claim(&self, claim: &RewardClaim) -> Result<(), StoreError>;

    /// Point lookup by claim id.
    fn get_claim(&self, claim_id: &str) -> Result<Option<RewardClaim>, StoreError>;

    /// All claims with status `Pending` or `Failed`, in stable
    /// (claim-id) order. The requeue worker's scan.
    fn list_unsettled(&self) -> Result<Vec<RewardClaim>, StoreError>;

    /// Marks the claim `Submitted` with its settlement reference.
    /// Conditional: fails with [`StoreError::AlreadySubmitted`] when the
    /// claim is already settled. Terminal — no later call mutates the
    /// record again.
    fn mark_submitted(
        &self,
        claim_id: &str,
        tx_ref: Option<&str>,
        now: u64,
    ) -> Result<(), StoreError>;

    /// Marks the claim `Failed`: increments the attempt count, stamps
    /// the last-attempt time, records the failure reason. Refused once
    /// the claim is `Submitted`.
    fn mark_failed(&self, claim_id: &str, error: &str, now: u64) -> Result<(), StoreError>;
}

/// Append-only store for compliance events.
pub trait ComplianceStore: Send + Sync {
    /// Appends an event. Returns `false` when an event for the same
    /// (validator, height) already exists (duplicate, ignored).
    fn append_event(&self, event: &ComplianceEvent) -> Result<bool, StoreError>;

    /// Number of events of `event_type` for the validator in one era.
    fn count_by_era(
        &self,
        validator_id: &str,
        era_id: u64,
        event_type: ComplianceEventType,
    ) -> Result<u64, StoreError>;

    /// Highest `consecutive_count` ever recorded for the validator.
    fn max_consecutive(&self, validator_id: &str) -> Result<u32, StoreError>;

    /// The most recently appended event for the validator (insertion
    /// order, not height order).
    fn last_event_for(&self, validator_id: &str) -> Result<Option<ComplianceEvent>, StoreError>;
}

// ════════════════════════════════════════════════════════════════════════════════
// IN-MEMORY CLAIMS STORE
// ════════════════════════════════════════════════════════════════════════════════

/// In-memory claims store. One mutex over the whole map gives the
/// per-claim read-modify-write atomicity for free.
#[derive(Debug, Default)]
pub struct InMemoryClaimsStore {
    claims: Mutex<BTreeMap<String, RewardClaim>>,
}

impl InMemoryClaimsStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClaimsStore for InMemoryClaimsStore {
    fn persist_claim(&self, claim: &RewardClaim) -> Result<(), StoreError> {
        let mut claims = self.claims.lock();
        claims
            .entry(claim.claim_id.clone())
            .or_insert_with(|| claim.clone());
        Ok(())
    }

    fn get_claim(&self, claim_id: &str) -> Result<Option<RewardClaim>, StoreError> {
        Ok(self.claims.lock().get(claim_id).cloned())
    }

    fn list_unsettled(&self) -> Result<Vec<RewardClaim>, StoreError> {
        Ok(self
            .claims
            .lock()
            .values()
            .filter(|c| c.status.is_unsettled())
            .cloned()
            .collect())
    }

    fn mark_submitted(
        &self,
        claim_id: &str,
        tx_ref: Option<&str>,
        now: u64,
    ) -> Result<(), StoreError> {
        let mut claims = self.claims.lock();
        let claim = claims
            .get_mut(claim_id)
            .ok_or_else(|| StoreError::NotFound(claim_id.to_string()))?;
        if claim.status == ClaimStatus::Submitted {
            return Err(StoreError::AlreadySubmitted(claim_id.to_string()));
        }
        claim.status = ClaimStatus::Submitted;
        claim.settlement_tx_ref = tx_ref.map(str::to_string);
        claim.last_attempt_at = Some(now);
        claim.updated_at = now;
        Ok(())
    }

    fn mark_failed(&self, claim_id: &str, error: &str, now: u64) -> Result<(), StoreError> {
        let mut claims = self.claims.lock();
        let claim = claims
            .get_mut(claim_id)
            .ok_or_else(|| StoreError::NotFound(claim_id.to_string()))?;
        if claim.status == ClaimStatus::Submitted {
            return Err(StoreError::AlreadySubmitted(claim_id.to_string()));
        }
        claim.status = ClaimStatus::Failed;
        claim.last_error = Some(error.to_string());
        claim.attempts = claim.attempts.saturating_add(1);
        claim.last_attempt_at = Some(now);
        claim.updated_at = now;
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// IN-MEMORY COMPLIANCE STORE
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct ComplianceInner {
    /// Insertion-ordered event log.
    events: Vec<ComplianceEvent>,
    /// Dedup set over (validator, height).
    seen: HashSet<(String, u64)>,
}

/// In-memory compliance store.
#[derive(Debug, Default)]
pub struct InMemoryComplianceStore {
    inner: Mutex<ComplianceInner>,
}

impl InMemoryComplianceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ComplianceStore for InMemoryComplianceStore {
    fn append_event(&self, event: &ComplianceEvent) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let key = (event.validator_id.clone(), event.block_height);
        if inner.seen.contains(&key) {
            return Ok(false);
        }
        inner.seen.insert(key);
        inner.events.push(event.clone());
        Ok(true)
    }

    fn count_by_era(
        &self,
        validator_id: &str,
        era_id: u64,
        event_type: ComplianceEventType,
    ) -> Result<u64, StoreError> {
        Ok(self
            .inner
            .lock()
            .events
            .iter()
            .filter(|e| {
                e.validator_id == validator_id && e.era_id == era_id && e.event_type == event_type
            })
            .count() as u64)
    }

    fn max_consecutive(&self, validator_id: &str) -> Result<u32, StoreError> {
        Ok(self
            .inner
            .lock()
            .events
            .iter()
            .filter(|e| e.validator_id == validator_id)
            .map(|e| e.consecutive_count)
            .max()
            .unwrap_or(0))
    }

    fn last_event_for(&self, validator_id: &str) -> Result<Option<ComplianceEvent>, StoreError> {
        Ok(self
            .inner
            .lock()
            .events
            .iter()
            .rev()
            .find(|e| e.validator_id == validator_id)
            .cloned())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use vp_common::FeeAllocation;

    const TS: u64 = 1_700_000_000;

    fn claim(id: &str) -> RewardClaim {
        RewardClaim::new(
            id.to_string(),
            FeeAllocation {
                producer_id: "V-PROD-1".to_string(),
                producer_reward: 6.0,
                stake_pool_reward: 3.0,
                network_fund_share: 1.0,
                total_amount: 10.0,
            },
            TS,
        )
    }

    #[test]
    fn persist_then_list_unsettled() {
        let store = InMemoryClaimsStore::new();
        store.persist_claim(&claim("CLAIM-1")).expect("persist");

        let pending = store.list_unsettled().expect("list");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].claim_id, "CLAIM-1");
        assert_eq!(pending[0].status, ClaimStatus::Pending);
    }

    #[test]
    fn persist_is_idempotent_by_claim_id() {
        let store = InMemoryClaimsStore::new();
        store.persist_claim(&claim("CLAIM-1")).expect("persist");

        let mut altered = claim("CLAIM-1");
        altered.attempts = 99;
        store.persist_claim(&altered).expect("persist again");

        let stored = store.get_claim("CLAIM-1").expect("get").expect("some");
        assert_eq!(stored.attempts, 0, "second insert must not overwrite");
    }

    #[test]
    fn mark_submitted_removes_from_unsettled() {
        let store = InMemoryClaimsStore::new();
        store.persist_claim(&claim("CLAIM-1")).expect("persist");
        store
            .mark_submitted("CLAIM-1", Some("TX-1"), TS + 5)
            .expect("submit");

        assert!(store.list_unsettled().expect("list").is_empty());
        let stored = store.get_claim("CLAIM-1").expect("get").expect("some");
        assert_eq!(stored.status, ClaimStatus::Submitted);
        assert_eq!(stored.settlement_tx_ref.as_deref(), Some("TX-1"));
        assert_eq!(stored.last_attempt_at, Some(TS + 5));
    }

    #[test]
    fn submitted_is_terminal_for_both_marks() {
        let store = InMemoryClaimsStore::new();
        store.persist_claim(&claim("CLAIM-1")).expect("persist");
        store
            .mark_submitted("CLAIM-1", Some("TX-1"), TS)
            .expect("submit");

        assert_eq!(
            store.mark_submitted("CLAIM-1", Some("TX-2"), TS + 1),
            Err(StoreError::AlreadySubmitted("CLAIM-1".to_string()))
        );
        assert_eq!(
            store.mark_failed("CLAIM-1", "late failure", TS + 1),
            Err(StoreError::AlreadySubmitted("CLAIM-1".to_string()))
        );

        // record unchanged
        let stored = store.get_claim("CLAIM-1").expect("get").expect("some");
        assert_eq!(stored.settlement_tx_ref.as_deref(), Some("TX-1"));
        assert_eq!(stored.attempts, 0);
    }

    #[test]
    fn mark_failed_increments_attempts_and_keeps_claim_listed() {
        let store = InMemoryClaimsStore::new();
        store.persist_claim(&claim("CLAIM-1")).expect("persist");

        store.mark_failed("CLAIM-1", "timeout", TS + 1).expect("fail");
        store.mark_failed("CLAIM-1", "refused", TS + 2).expect("fail");

        let stored = store.get_claim("CLAIM-1").expect("get").expect("some");
        assert_eq!(stored.status, ClaimStatus::Failed);
        assert_eq!(stored.attempts, 2);
        assert_eq!(stored.last_error.as_deref(), Some("refused"));
        assert_eq!(stored.last_attempt_at, Some(TS + 2));
        assert_eq!(store.list_unsettled().expect("list").len(), 1);
    }

    #[test]
    fn marks_on_unknown_claim_are_not_found() {
        let store = InMemoryClaimsStore::new();
        assert_eq!(
            store.mark_submitted("CLAIM-?", None, TS),
            Err(StoreError::NotFound("CLAIM-?".to_string()))
        );
        assert_eq!(
            store.mark_failed("CLAIM-?", "x", TS),
            Err(StoreError::NotFound("CLAIM-?".to_string()))
        );
    }

    #[test]
    fn unsettled_listing_is_stable_by_claim_id() {
        let store = InMemoryClaimsStore::new();
        store.persist_claim(&claim("CLAIM-B")).expect("persist");
        store.persist_claim(&claim("CLAIM-A")).expect("persist");
        let ids: Vec<String> = store
            .list_unsettled()
            .expect("list")
            .into_iter()
            .map(|c| c.claim_id)
            .collect();
        assert_eq!(ids, vec!["CLAIM-A", "CLAIM-B"]);
    }

    // ── compliance store ────────────────────────────────────────────────

    fn miss(validator: &str, height: u64, era: u64, streak: u32) -> ComplianceEvent {
        ComplianceEvent {
            validator_id: validator.to_string(),
            event_type: ComplianceEventType::MissedSlot,
            block_height: height,
            era_id: era,
            recorded_at: TS,
            consecutive_count: streak,
        }
    }

    #[test]
    fn append_dedups_by_validator_and_height() {
        let store = InMemoryComplianceStore::new();
        assert!(store.append_event(&miss("V-1", 100, 0, 1)).expect("append"));
        assert!(!store.append_event(&miss("V-1", 100, 0, 2)).expect("append"));
        // different validator, same height: distinct
        assert!(store.append_event(&miss("V-2", 100, 0, 1)).expect("append"));
        assert_eq!(
            store
                .count_by_era("V-1", 0, ComplianceEventType::MissedSlot)
                .expect("count"),
            1
        );
    }

    #[test]
    fn count_filters_by_era_and_type() {
        let store = InMemoryComplianceStore::new();
        store.append_event(&miss("V-1", 100, 1, 1)).expect("append");
        store.append_event(&miss("V-1", 101, 1, 2)).expect("append");
        store.append_event(&miss("V-1", 900, 2, 1)).expect("append");
        store
            .append_event(&ComplianceEvent {
                event_type: ComplianceEventType::ProducedSlot,
                consecutive_count: 0,
                ..miss("V-1", 102, 1, 0)
            })
            .expect("append");

        assert_eq!(
            store
                .count_by_era("V-1", 1, ComplianceEventType::MissedSlot)
                .expect("count"),
            2
        );
        assert_eq!(
            store
                .count_by_era("V-1", 1, ComplianceEventType::ProducedSlot)
                .expect("count"),
            1
        );
    }

    #[test]
    fn max_consecutive_spans_eras() {
        let store = InMemoryComplianceStore::new();
        store.append_event(&miss("V-1", 100, 1, 1)).expect("append");
        store.append_event(&miss("V-1", 101, 1, 2)).expect("append");
        store.append_event(&miss("V-1", 900, 2, 1)).expect("append");
        assert_eq!(store.max_consecutive("V-1").expect("max"), 2);
        assert_eq!(store.max_consecutive("V-9").expect("max"), 0);
    }

    #[test]
    fn last_event_follows_insertion_order() {
        let store = InMemoryComplianceStore::new();
        store.append_event(&miss("V-1", 200, 0, 1)).expect("append");
        store.append_event(&miss("V-1", 150, 0, 1)).expect("append");
        let last = store.last_event_for("V-1").expect("last").expect("some");
        assert_eq!(last.block_height, 150);
    }
}
