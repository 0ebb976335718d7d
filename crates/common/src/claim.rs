//! # Reward Claim Records
//!
//! Data shapes shared between the fee settlement pipeline, the claim
//! requeue worker, and the durable claim store.
//!
//! ## Lifecycle
//!
//! ```text
//! (job completed)
//!      │ calculate_fee_split
//!      ▼
//! FeeAllocation ──persist──▶ RewardClaim { Pending }
//!                                 │ submit ok          │ submit err
//!                                 ▼                    ▼
//!                            { Submitted }        { Failed, attempts+1 }
//!                             (terminal)               │ requeue worker
//!                                 ▲────────────────────┘
//! ```
//!
//! `Submitted` is terminal: once a settlement transaction reference has been
//! recorded the claim is never mutated or resubmitted again. Claims are
//! never deleted (audit retention).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A completed production job handed to the fee settlement pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Validator that produced the block / completed the job.
    pub producer_id: String,
    /// Total fee paid by the user for this job.
    pub job_fee_amount: f64,
    /// Chain height at which the job completed.
    pub job_completion_height: u64,
}

/// Deterministic split of one job fee across the three reward destinations.
///
/// Invariant: `producer_reward + stake_pool_reward + network_fund_share ==
/// total_amount` exactly, with `total_amount` equal to the job fee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeAllocation {
    /// Validator the producer share belongs to.
    pub producer_id: String,
    /// Direct reward to the producing validator (60%, absorbs rounding).
    pub producer_reward: f64,
    /// Reward distributed to delegators/stakers in the pool (30%).
    pub stake_pool_reward: f64,
    /// Share sent to the governance/network development fund (10%).
    pub network_fund_share: f64,
    /// Equals the original job fee.
    pub total_amount: f64,
}

/// Settlement status of a reward claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimStatus {
    /// Persisted, no successful submission yet.
    Pending,
    /// Settled against the external ledger. Terminal.
    Submitted,
    /// Last submission attempt failed; eligible for requeue.
    Failed,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Submitted => "SUBMITTED",
            Self::Failed => "FAILED",
        }
    }

    /// `true` while the claim still needs requeue-worker attention.
    #[inline]
    pub fn is_unsettled(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pending or resolved fee settlement against the external ledger.
///
/// Owned by the durable claim store. Created by the fee settlement
/// pipeline, mutated by the pipeline (first attempt) and the requeue
/// worker (retries). Immutable once `Submitted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardClaim {
    /// Unique claim identifier, generated at creation (`CLAIM-<hex>`).
    pub claim_id: String,
    /// Producer the claim settles fees for.
    pub producer_id: String,
    /// The fee split being claimed.
    pub allocation: FeeAllocation,
    /// Current settlement status.
    pub status: ClaimStatus,
    /// Number of submission attempts made so far.
    pub attempts: u32,
    /// Unix seconds of the last submission attempt, if any.
    pub last_attempt_at: Option<u64>,
    /// Settlement transaction reference returned by the ledger on success.
    pub settlement_tx_ref: Option<String>,
    /// Failure reason from the last failed attempt.
    pub last_error: Option<String>,
    /// Unix seconds when the claim was created.
    pub created_at: u64,
    /// Unix seconds of the last mutation.
    pub updated_at: u64,
}

impl RewardClaim {
    /// Creates a fresh `Pending` claim for the given allocation.
    #[must_use]
    pub fn new(claim_id: String, allocation: FeeAllocation, now: u64) -> Self {
        Self {
            claim_id,
            producer_id: allocation.producer_id.clone(),
            allocation,
            status: ClaimStatus::Pending,
            attempts: 0,
            last_attempt_at: None,
            settlement_tx_ref: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocation() -> FeeAllocation {
        FeeAllocation {
            producer_id: "V-PROD-1".to_string(),
            producer_reward: 60.0,
            stake_pool_reward: 30.0,
            network_fund_share: 10.0,
            total_amount: 100.0,
        }
    }

    #[test]
    fn new_claim_starts_pending() {
        let claim = RewardClaim::new("CLAIM-1".to_string(), allocation(), 1_700_000_000);
        assert_eq!(claim.status, ClaimStatus::Pending);
        assert_eq!(claim.attempts, 0);
        assert_eq!(claim.producer_id, "V-PROD-1");
        assert!(claim.last_attempt_at.is_none());
        assert!(claim.settlement_tx_ref.is_none());
        assert_eq!(claim.created_at, claim.updated_at);
    }

    #[test]
    fn status_strings_match_ledger_contract() {
        assert_eq!(ClaimStatus::Pending.as_str(), "PENDING");
        assert_eq!(ClaimStatus::Submitted.as_str(), "SUBMITTED");
        assert_eq!(ClaimStatus::Failed.as_str(), "FAILED");
    }

    #[test]
    fn unsettled_excludes_submitted() {
        assert!(ClaimStatus::Pending.is_unsettled());
        assert!(ClaimStatus::Failed.is_unsettled());
        assert!(!ClaimStatus::Submitted.is_unsettled());
    }
}
