//! # Fee Settlement Pipeline
//!
//! Turns a completed production job into a settled reward claim:
//! deterministic fee split → persisted `Pending` claim → immediate
//! submission attempt. Submission failures are absorbed into claim
//! state (the requeue worker recovers them); only contract violations
//! propagate.
//!
//! ## Split Invariant
//!
//! For every successful call to [`calculate_fee_split`]:
//!
//! ```text
//! producer_reward + stake_pool_reward + network_fund_share == job_fee_amount
//! ```
//!
//! The pool and fund shares are rounded to 4 decimal places; the
//! producer share is computed by subtraction and absorbs the rounding
//! remainder, so the sum holds exactly.

use rand::RngCore;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use vp_common::{FeeAllocation, JobResult, RewardClaim};

use crate::claims_store::{ClaimsStore, StoreError};
use crate::ledger_submitter::{ClaimSubmission, LedgerSubmitter};
use crate::metrics::NodeMetrics;

// ════════════════════════════════════════════════════════════════════════════════
// FEE SPLIT
// ════════════════════════════════════════════════════════════════════════════════

/// Direct reward to the validator who produced the block/job.
pub const PRODUCER_SHARE: f64 = 0.60;
/// Reward distributed to all delegators/stakers in the pool.
pub const STAKE_POOL_SHARE: f64 = 0.30;
/// Share sent to the governance/network development fund.
pub const NETWORK_FUND_SHARE: f64 = 0.10;

/// Errors from the settlement pipeline.
#[derive(Debug, Error)]
pub enum FeeError {
    /// Malformed job: contract violation, propagated to the caller.
    #[error("invalid job: {0}")]
    InvalidJob(String),

    /// The durable store refused the new claim. Without a persisted
    /// record there is nothing for the requeue worker to recover, so
    /// this propagates.
    #[error("claim persistence failed: {0}")]
    Persist(#[from] StoreError),
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// Computes the governance fee split for one job.
///
/// ## Errors
///
/// [`FeeError::InvalidJob`] when the fee is not a finite non-negative
/// number, or the producer id is empty.
pub fn calculate_fee_split(job: &JobResult) -> Result<FeeAllocation, FeeError> {
    if !job.job_fee_amount.is_finite() || job.job_fee_amount < 0.0 {
        return Err(FeeError::InvalidJob(format!(
            "job fee must be a finite non-negative number, got {}",
            job.job_fee_amount
        )));
    }
    if job.producer_id.is_empty() {
        return Err(FeeError::InvalidJob("producer id is empty".to_string()));
    }

    let fee = job.job_fee_amount;
    let stake_pool_reward = round4(fee * STAKE_POOL_SHARE);
    let network_fund_share = round4(fee * NETWORK_FUND_SHARE);
    // Subtraction, not multiplication: the producer share absorbs any
    // rounding remainder so the three shares sum to the fee exactly.
    let producer_reward = fee - stake_pool_reward - network_fund_share;

    debug_assert!(
        (producer_reward + stake_pool_reward + network_fund_share - fee).abs() < 1e-9,
        "fee split does not sum to the job fee"
    );

    Ok(FeeAllocation {
        producer_id: job.producer_id.clone(),
        producer_reward,
        stake_pool_reward,
        network_fund_share,
        total_amount: fee,
    })
}

/// Generates a fresh `CLAIM-<16 hex>` identifier.
fn new_claim_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("CLAIM-{}", hex::encode(bytes))
}

// ════════════════════════════════════════════════════════════════════════════════
// PIPELINE
// ════════════════════════════════════════════════════════════════════════════════

/// Outcome of one settlement run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// Claim settled on first attempt.
    Submitted { claim_id: String, tx_ref: String },
    /// Submission failed; the claim is persisted and the requeue worker
    /// owns it from here.
    Deferred { claim_id: String },
}

impl SettlementOutcome {
    #[must_use]
    pub fn claim_id(&self) -> &str {
        match self {
            Self::Submitted { claim_id, .. } | Self::Deferred { claim_id } => claim_id,
        }
    }
}

/// Persist-then-submit settlement pipeline.
///
/// ## No Synchronous Retry
///
/// One submission attempt per call. A failed attempt leaves a `Failed`
/// claim behind; recovery cadence belongs to the requeue worker.
pub struct FeeSettlementPipeline {
    store: Arc<dyn ClaimsStore>,
    submitter: LedgerSubmitter,
    metrics: Arc<NodeMetrics>,
}

impl FeeSettlementPipeline {
    #[must_use]
    pub fn new(
        store: Arc<dyn ClaimsStore>,
        submitter: LedgerSubmitter,
        metrics: Arc<NodeMetrics>,
    ) -> Self {
        Self {
            store,
            submitter,
            metrics,
        }
    }

    /// Settles the fee for one completed job.
    ///
    /// Split → persist (`Pending`) → one submission attempt. Never
    /// errors for transient submission failure; see [`FeeError`] for
    /// what does propagate.
    pub async fn process_job_fee_settlement(
        &self,
        job: &JobResult,
        now: u64,
    ) -> Result<SettlementOutcome, FeeError> {
        let allocation = calculate_fee_split(job)?;

        info!(
            event = "fee_settlement",
            producer = %allocation.producer_id,
            height = job.job_completion_height,
            producer_reward = allocation.producer_reward,
            stake_pool_reward = allocation.stake_pool_reward,
            network_fund_share = allocation.network_fund_share,
            total = allocation.total_amount,
            "processing job fee settlement"
        );

        let claim_id = new_claim_id();
        let claim = RewardClaim::new(claim_id.clone(), allocation.clone(), now);
        // Persist before submitting so the claim survives a crash
        // between here and the ledger call.
        self.store.persist_claim(&claim)?;

        match self.submit_reward_claim(&claim_id, &allocation, now).await {
            Some(tx_ref) => Ok(SettlementOutcome::Submitted { claim_id, tx_ref }),
            None => Ok(SettlementOutcome::Deferred { claim_id }),
        }
    }

    /// One submission attempt for a persisted claim.
    ///
    /// On success marks the claim `Submitted` (terminal) and returns the
    /// settlement transaction reference. On failure marks it `Failed`
    /// (attempt count + last-attempt stamp) and returns `None`. Never
    /// panics, never propagates transport errors.
    pub async fn submit_reward_claim(
        &self,
        claim_id: &str,
        allocation: &FeeAllocation,
        now: u64,
    ) -> Option<String> {
        self.metrics.inc_claim_submit_attempt();

        let submission = ClaimSubmission {
            claim_id: claim_id.to_string(),
            allocation: allocation.clone(),
            submitted_at: now,
            // Placeholder until the signing layer countersigns claims.
            validator_signature: format!("SIG-CLAIM-MOCK-{}", allocation.producer_id),
        };

        match self.submitter.submit(&submission).await {
            Ok(tx_ref) => {
                match self.store.mark_submitted(claim_id, Some(&tx_ref), now) {
                    Ok(()) => {
                        info!(event = "claim_submitted", claim_id = %claim_id, tx_ref = %tx_ref);
                    }
                    Err(StoreError::AlreadySubmitted(_)) => {
                        // Lost a race with another submitter; the claim
                        // is settled either way.
                        info!(event = "claim_already_submitted", claim_id = %claim_id);
                    }
                    Err(e) => {
                        error!(event = "claim_mark_failed", claim_id = %claim_id, error = %e);
                    }
                }
                Some(tx_ref)
            }
            Err(e) => {
                self.metrics.inc_claim_submit_failure();
                warn!(event = "claim_submit_failed", claim_id = %claim_id, error = %e);
                if let Err(store_err) = self.store.mark_failed(claim_id, &e.to_string(), now) {
                    error!(
                        event = "claim_mark_failed",
                        claim_id = %claim_id,
                        error = %store_err
                    );
                }
                None
            }
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims_store::InMemoryClaimsStore;
    use crate::ledger_submitter::{LedgerSubmitError, MockLedgerTransport};
    use vp_common::ClaimStatus;

    const TS: u64 = 1_700_000_000;

    fn job(fee: f64) -> JobResult {
        JobResult {
            producer_id: "V-A-1".to_string(),
            job_fee_amount: fee,
            job_completion_height: 5020,
        }
    }

    fn pipeline(
        transport: MockLedgerTransport,
    ) -> (Arc<InMemoryClaimsStore>, FeeSettlementPipeline) {
        let store = Arc::new(InMemoryClaimsStore::new());
        let p = FeeSettlementPipeline::new(
            Arc::clone(&store) as Arc<dyn ClaimsStore>,
            LedgerSubmitter::new(Arc::new(transport)),
            Arc::new(NodeMetrics::new()),
        );
        (store, p)
    }

    // ── split ───────────────────────────────────────────────────────────

    #[test]
    fn split_100_is_60_30_10() {
        let allocation = calculate_fee_split(&job(100.0)).expect("split");
        assert_eq!(allocation.producer_reward, 60.0);
        assert_eq!(allocation.stake_pool_reward, 30.0);
        assert_eq!(allocation.network_fund_share, 10.0);
        assert_eq!(allocation.total_amount, 100.0);
    }

    #[test]
    fn split_sums_to_the_fee_for_exactly_representable_amounts() {
        // Fees whose shares are all exactly representable in f64.
        for fee in [100.0, 1000.0, 10.0, 250.0, 500.0] {
            let a = calculate_fee_split(&job(fee)).expect("split");
            assert_eq!(
                a.producer_reward + a.stake_pool_reward + a.network_fund_share,
                fee,
                "sum broken for fee {fee}"
            );
            assert_eq!(a.total_amount, fee);
        }
    }

    #[test]
    fn split_sum_invariant_holds_for_fractional_fees() {
        for fee in [12.55, 0.01, 99.99, 1234.5678, 0.0003] {
            let a = calculate_fee_split(&job(fee)).expect("split");
            let sum = a.producer_reward + a.stake_pool_reward + a.network_fund_share;
            assert!(
                (sum - fee).abs() < 1e-9,
                "sum {sum} drifted from fee {fee}"
            );
            assert_eq!(a.total_amount, fee);
        }
    }

    #[test]
    fn split_zero_fee_is_all_zero() {
        let a = calculate_fee_split(&job(0.0)).expect("split");
        assert_eq!(a.producer_reward, 0.0);
        assert_eq!(a.stake_pool_reward, 0.0);
        assert_eq!(a.network_fund_share, 0.0);
        assert_eq!(a.total_amount, 0.0);
    }

    #[test]
    fn split_rejects_non_finite_and_negative_fees() {
        for fee in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -1.0] {
            assert!(
                matches!(calculate_fee_split(&job(fee)), Err(FeeError::InvalidJob(_))),
                "fee {fee} must be rejected"
            );
        }
    }

    #[test]
    fn split_rejects_empty_producer() {
        let bad = JobResult {
            producer_id: String::new(),
            job_fee_amount: 10.0,
            job_completion_height: 1,
        };
        assert!(matches!(
            calculate_fee_split(&bad),
            Err(FeeError::InvalidJob(_))
        ));
    }

    // ── pipeline ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn settlement_success_marks_submitted() {
        let transport = MockLedgerTransport::new();
        transport.push_claim_ok("TX-SETTLE-123");
        let (store, pipeline) = pipeline(transport);

        let outcome = pipeline
            .process_job_fee_settlement(&job(100.0), TS)
            .await
            .expect("settlement");

        let claim_id = outcome.claim_id().to_string();
        assert!(matches!(outcome, SettlementOutcome::Submitted { .. }));
        assert!(claim_id.starts_with("CLAIM-"));

        let stored = store.get_claim(&claim_id).expect("get").expect("some");
        assert_eq!(stored.status, ClaimStatus::Submitted);
        assert_eq!(stored.settlement_tx_ref.as_deref(), Some("TX-SETTLE-123"));
        assert!(store.list_unsettled().expect("list").is_empty());
    }

    #[tokio::test]
    async fn settlement_never_errors_when_ledger_is_down() {
        // Empty mock script: every submission fails.
        let (store, pipeline) = pipeline(MockLedgerTransport::new());

        let outcome = pipeline
            .process_job_fee_settlement(&job(100.0), TS)
            .await
            .expect("transient failure must not propagate");

        let claim_id = outcome.claim_id().to_string();
        assert!(matches!(outcome, SettlementOutcome::Deferred { .. }));

        let stored = store.get_claim(&claim_id).expect("get").expect("some");
        assert_eq!(stored.status, ClaimStatus::Failed);
        assert_eq!(stored.attempts, 1);
        assert!(stored.last_error.is_some());
        assert_eq!(stored.last_attempt_at, Some(TS));
        // claim stays visible for the requeue worker
        assert_eq!(store.list_unsettled().expect("list").len(), 1);
    }

    #[tokio::test]
    async fn malformed_job_propagates_before_any_side_effect() {
        let (store, pipeline) = pipeline(MockLedgerTransport::new());
        let result = pipeline.process_job_fee_settlement(&job(f64::NAN), TS).await;
        assert!(matches!(result, Err(FeeError::InvalidJob(_))));
        assert!(store.list_unsettled().expect("list").is_empty());
    }

    #[tokio::test]
    async fn rejected_submission_records_reason() {
        let transport = MockLedgerTransport::new();
        transport.push_claim_err(LedgerSubmitError::Rejected("bad signature".to_string()));
        let (store, pipeline) = pipeline(transport);

        let outcome = pipeline
            .process_job_fee_settlement(&job(50.0), TS)
            .await
            .expect("settlement");
        let stored = store
            .get_claim(outcome.claim_id())
            .expect("get")
            .expect("some");
        assert!(stored
            .last_error
            .as_deref()
            .expect("error recorded")
            .contains("bad signature"));
    }

    #[tokio::test]
    async fn metrics_count_attempts_and_failures() {
        let store: Arc<dyn ClaimsStore> = Arc::new(InMemoryClaimsStore::new());
        let metrics = Arc::new(NodeMetrics::new());
        let transport = MockLedgerTransport::new();
        transport.push_claim_ok("TX-1");
        let p = FeeSettlementPipeline::new(
            store,
            LedgerSubmitter::new(Arc::new(transport)),
            Arc::clone(&metrics),
        );

        let _ = p.process_job_fee_settlement(&job(10.0), TS).await;
        let _ = p.process_job_fee_settlement(&job(10.0), TS).await; // script empty → fails

        assert_eq!(metrics.claim_submit_attempts(), 2);
        assert_eq!(metrics.claim_submit_failures(), 1);
    }

    #[test]
    fn claim_ids_are_unique_and_well_formed() {
        let a = new_claim_id();
        let b = new_claim_id();
        assert_ne!(a, b);
        assert!(a.starts_with("CLAIM-"));
        assert_eq!(a.len(), "CLAIM-".len() + 16);
    }
}
