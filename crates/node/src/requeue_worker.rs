//! # Claim Requeue Worker
//!
//! Periodic background process that drives persisted claims toward
//! terminal `Submitted`, with exponential backoff and escalation.
//!
//! ## Cycle
//!
//! Each tick scans every `Pending`/`Failed` claim and, per claim:
//!
//! 1. **Backoff gate** — a `Failed` claim inside its backoff window is
//!    skipped with no side effect. This is the circuit breaker that
//!    stops the node from hammering a down ledger.
//! 2. **Escalation gate** — a claim at or beyond the attempt ceiling
//!    gets a CRITICAL alert naming it and is not attempted. The record
//!    stays in the store and in every future scan: escalation is the
//!    dead-letter behavior, nothing is discarded.
//! 3. **Submission** — otherwise the claim is re-submitted exactly as
//!    the settlement pipeline does on first attempt.
//!
//! One claim's failure never aborts the rest of the cycle, and a claim
//! that reached `Submitted` is never attempted again (status gate plus
//! the store's conditional update).
//!
//! Eligibility is a pure comparison against an explicit `now`, so the
//! policy is unit-testable without waiting in real time.

use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use vp_common::{ClaimStatus, OperatorAlert, RewardClaim};

use crate::alerting::AlertDispatcher;
use crate::claims_store::ClaimsStore;
use crate::fee_settlement::FeeSettlementPipeline;
use crate::unix_now;

/// Backoff never exceeds one hour.
const MAX_BACKOFF_SECS: u64 = 3_600;

/// Alert source tag for this worker.
const ALERT_SOURCE: &str = "VP-Node:ClaimRequeue";

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct RequeueConfig {
    /// Seconds between cycles.
    pub interval_secs: u64,
    /// Attempt ceiling before escalation.
    pub max_attempts: u32,
    /// First retry delay; doubles per attempt, capped at one hour.
    pub initial_backoff_secs: u64,
}

impl Default for RequeueConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            max_attempts: 10,
            initial_backoff_secs: 5,
        }
    }
}

/// Required delay before the next attempt of a claim with `attempts`
/// recorded failures.
///
/// Monotonically increasing: zero until the first failure, then
/// `initial * 2^(attempts-2)`, capped at [`MAX_BACKOFF_SECS`].
#[must_use]
pub fn backoff_delay_secs(attempts: u32, initial_backoff_secs: u64) -> u64 {
    if attempts <= 1 {
        return 0;
    }
    // Clamp the exponent so the shift cannot overflow; anything past
    // 2^30 is beyond the cap anyway.
    let exponent = (attempts - 2).min(30);
    initial_backoff_secs
        .saturating_mul(1u64 << exponent)
        .min(MAX_BACKOFF_SECS)
}

/// What [`RequeueWorker::process_claim`] decided for one claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessDecision {
    /// Inside its backoff window, or already settled. No side effect.
    Skipped,
    /// At/over the attempt ceiling; CRITICAL alert dispatched, no
    /// attempt made.
    Escalated,
    /// Re-submitted and settled.
    Submitted,
    /// Re-submitted and failed again (attempt count incremented).
    FailedAgain,
}

/// The requeue worker. Stateless between ticks: every cycle re-reads
/// the store.
pub struct RequeueWorker {
    store: Arc<dyn ClaimsStore>,
    pipeline: Arc<FeeSettlementPipeline>,
    alerts: Arc<AlertDispatcher>,
    config: RequeueConfig,
}

impl RequeueWorker {
    #[must_use]
    pub fn new(
        store: Arc<dyn ClaimsStore>,
        pipeline: Arc<FeeSettlementPipeline>,
        alerts: Arc<AlertDispatcher>,
        config: RequeueConfig,
    ) -> Self {
        Self {
            store,
            pipeline,
            alerts,
            config,
        }
    }

    /// Applies the backoff/escalation policy to one claim and, when
    /// eligible, re-submits it.
    pub async fn process_claim(&self, claim: &RewardClaim, now: u64) -> ProcessDecision {
        // Submitted is terminal; scans should not return such claims,
        // but the gate costs nothing and the guarantee matters.
        if claim.status == ClaimStatus::Submitted {
            return ProcessDecision::Skipped;
        }

        if claim.status == ClaimStatus::Failed {
            let required = backoff_delay_secs(claim.attempts, self.config.initial_backoff_secs);
            let waited = now.saturating_sub(claim.last_attempt_at.unwrap_or(0));
            if waited < required {
                debug!(
                    event = "requeue_skip",
                    claim_id = %claim.claim_id,
                    required_secs = required,
                    waited_secs = waited,
                    "claim inside backoff window"
                );
                return ProcessDecision::Skipped;
            }
        }

        if claim.attempts >= self.config.max_attempts {
            error!(
                event = "requeue_escalate",
                claim_id = %claim.claim_id,
                attempts = claim.attempts,
                max_attempts = self.config.max_attempts,
                "claim exceeded max submission attempts"
            );
            let alert = OperatorAlert::critical(
                ALERT_SOURCE,
                "Claim exceeded max retry attempts",
                format!(
                    "Claim {} has exceeded {} attempts and requires manual review.",
                    claim.claim_id, self.config.max_attempts
                ),
                now,
            )
            .with_detail("claimId", claim.claim_id.clone())
            .with_detail("attempts", claim.attempts)
            .with_detail("producerId", claim.producer_id.clone());
            self.alerts.dispatch_alert(&alert).await;
            return ProcessDecision::Escalated;
        }

        info!(
            event = "requeue_attempt",
            claim_id = %claim.claim_id,
            attempt = claim.attempts + 1,
        );
        match self
            .pipeline
            .submit_reward_claim(&claim.claim_id, &claim.allocation, now)
            .await
        {
            Some(_) => ProcessDecision::Submitted,
            None => ProcessDecision::FailedAgain,
        }
    }

    /// Runs one scan-and-process cycle.
    pub async fn run_cycle(&self, now: u64) {
        let claims = match self.store.list_unsettled() {
            Ok(claims) => claims,
            Err(e) => {
                error!(event = "requeue_cycle_failed", error = %e);
                let alert = OperatorAlert::critical(
                    ALERT_SOURCE,
                    "Requeue worker error",
                    "Claim requeue worker failed to scan the claim store",
                    now,
                )
                .with_detail("error", e.to_string());
                self.alerts.dispatch_alert(&alert).await;
                return;
            }
        };

        if claims.is_empty() {
            debug!(event = "requeue_cycle", claims = 0, "no claims to process");
            return;
        }

        debug!(event = "requeue_cycle", claims = claims.len());
        for claim in &claims {
            // process_claim absorbs all failures into claim state; one
            // claim can never abort the rest of the cycle.
            let _ = self.process_claim(claim, now).await;
        }
    }

    /// Spawns the interval loop. Runs one cycle immediately, then every
    /// `interval_secs` until `shutdown` fires.
    pub fn spawn(self: Arc<Self>, shutdown: Arc<Notify>) -> JoinHandle<()> {
        let interval = std::time::Duration::from_secs(self.config.interval_secs.max(1));
        tokio::spawn(async move {
            info!(event = "requeue_worker_started", interval_secs = interval.as_secs());
            loop {
                self.run_cycle(unix_now()).await;
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.notified() => {
                        info!(event = "requeue_worker_stopped");
                        break;
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for RequeueWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequeueWorker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::RecordingAlertSink;
    use crate::claims_store::InMemoryClaimsStore;
    use crate::ledger_submitter::{LedgerSubmitter, MockLedgerTransport};
    use crate::metrics::NodeMetrics;
    use vp_common::FeeAllocation;

    const TS: u64 = 1_700_000_000;

    fn allocation() -> FeeAllocation {
        FeeAllocation {
            producer_id: "V-PROD-1".to_string(),
            producer_reward: 6.0,
            stake_pool_reward: 3.0,
            network_fund_share: 1.0,
            total_amount: 10.0,
        }
    }

    struct Harness {
        store: Arc<InMemoryClaimsStore>,
        sink: Arc<RecordingAlertSink>,
        worker: RequeueWorker,
    }

    fn harness(transport: MockLedgerTransport, config: RequeueConfig) -> Harness {
        let store = Arc::new(InMemoryClaimsStore::new());
        let metrics = Arc::new(NodeMetrics::new());
        let pipeline = Arc::new(FeeSettlementPipeline::new(
            Arc::clone(&store) as Arc<dyn ClaimsStore>,
            LedgerSubmitter::new(Arc::new(transport)),
            metrics,
        ));
        let sink = Arc::new(RecordingAlertSink::new());
        let alerts = Arc::new(AlertDispatcher::new(
            Arc::clone(&sink) as Arc<dyn crate::alerting::AlertSink>,
            "val-test".to_string(),
        ));
        let worker = RequeueWorker::new(
            Arc::clone(&store) as Arc<dyn ClaimsStore>,
            pipeline,
            alerts,
            config,
        );
        Harness { store, sink, worker }
    }

    fn seed_claim(store: &InMemoryClaimsStore, id: &str) -> RewardClaim {
        let claim = RewardClaim::new(id.to_string(), allocation(), TS);
        store.persist_claim(&claim).expect("persist");
        claim
    }

    // ── backoff policy ──────────────────────────────────────────────────

    #[test]
    fn backoff_is_zero_until_first_failure() {
        assert_eq!(backoff_delay_secs(0, 5), 0);
        assert_eq!(backoff_delay_secs(1, 5), 0);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(backoff_delay_secs(2, 5), 5);
        assert_eq!(backoff_delay_secs(3, 5), 10);
        assert_eq!(backoff_delay_secs(4, 5), 20);
        assert_eq!(backoff_delay_secs(5, 5), 40);
    }

    #[test]
    fn backoff_is_monotonic_and_capped() {
        let mut previous = 0;
        for attempts in 0..64 {
            let delay = backoff_delay_secs(attempts, 5);
            assert!(delay >= previous, "not monotonic at {attempts}");
            assert!(delay <= MAX_BACKOFF_SECS);
            previous = delay;
        }
        assert_eq!(backoff_delay_secs(63, 5), MAX_BACKOFF_SECS);
    }

    // ── process_claim ───────────────────────────────────────────────────

    #[tokio::test]
    async fn fresh_failed_claim_is_skipped_by_backoff() {
        let h = harness(MockLedgerTransport::new(), RequeueConfig::default());
        seed_claim(&h.store, "CLAIM-1");
        // 3 failed attempts, last attempt right now
        for _ in 0..3 {
            h.store.mark_failed("CLAIM-1", "down", TS).expect("fail");
        }
        let claim = h.store.get_claim("CLAIM-1").expect("get").expect("some");

        let decision = h.worker.process_claim(&claim, TS).await;
        assert_eq!(decision, ProcessDecision::Skipped);
        // no attempt: count unchanged
        let after = h.store.get_claim("CLAIM-1").expect("get").expect("some");
        assert_eq!(after.attempts, 3);
    }

    #[tokio::test]
    async fn stale_failed_claim_is_attempted() {
        let transport = MockLedgerTransport::new();
        transport.push_claim_ok("TX-RETRY-1");
        let h = harness(transport, RequeueConfig::default());
        seed_claim(&h.store, "CLAIM-1");
        h.store.mark_failed("CLAIM-1", "down", TS).expect("fail");
        let claim = h.store.get_claim("CLAIM-1").expect("get").expect("some");

        // far past the backoff window
        let decision = h.worker.process_claim(&claim, TS + 10_000).await;
        assert_eq!(decision, ProcessDecision::Submitted);
        let after = h.store.get_claim("CLAIM-1").expect("get").expect("some");
        assert_eq!(after.status, ClaimStatus::Submitted);
        assert_eq!(after.settlement_tx_ref.as_deref(), Some("TX-RETRY-1"));
    }

    #[tokio::test]
    async fn pending_claim_is_attempted_without_backoff() {
        let transport = MockLedgerTransport::new();
        transport.push_claim_ok("TX-1");
        let h = harness(transport, RequeueConfig::default());
        let claim = seed_claim(&h.store, "CLAIM-1");

        let decision = h.worker.process_claim(&claim, TS).await;
        assert_eq!(decision, ProcessDecision::Submitted);
    }

    #[tokio::test]
    async fn claim_at_ceiling_escalates_with_critical_alert() {
        let config = RequeueConfig {
            max_attempts: 3,
            ..RequeueConfig::default()
        };
        let h = harness(MockLedgerTransport::new(), config);
        seed_claim(&h.store, "CLAIM-STUCK");
        for _ in 0..3 {
            h.store.mark_failed("CLAIM-STUCK", "down", TS).expect("fail");
        }
        let claim = h.store.get_claim("CLAIM-STUCK").expect("get").expect("some");

        let decision = h.worker.process_claim(&claim, TS + 100_000).await;
        assert_eq!(decision, ProcessDecision::Escalated);

        let alerts = h.sink.delivered();
        assert_eq!(alerts.len(), 1);
        let embed = &alerts[0]["embeds"][0];
        assert!(embed["description"]
            .as_str()
            .expect("description")
            .contains("CLAIM-STUCK"));
        // attempt count unchanged: escalation makes no submission
        let after = h.store.get_claim("CLAIM-STUCK").expect("get").expect("some");
        assert_eq!(after.attempts, 3);
        // record is still retryable (kept in the scan set)
        assert_eq!(h.store.list_unsettled().expect("list").len(), 1);
    }

    #[tokio::test]
    async fn submitted_claim_is_never_reattempted() {
        let transport = MockLedgerTransport::new();
        transport.push_claim_ok("TX-1");
        let h = harness(transport, RequeueConfig::default());
        let claim = seed_claim(&h.store, "CLAIM-1");

        assert_eq!(
            h.worker.process_claim(&claim, TS).await,
            ProcessDecision::Submitted
        );
        // stale snapshot still says Pending, current record says Submitted
        let settled = h.store.get_claim("CLAIM-1").expect("get").expect("some");
        assert_eq!(
            h.worker.process_claim(&settled, TS + 10_000).await,
            ProcessDecision::Skipped
        );
    }

    // ── run_cycle ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn cycle_against_healthy_ledger_settles_everything() {
        let h = harness(MockLedgerTransport::always_succeeding(), RequeueConfig::default());
        seed_claim(&h.store, "CLAIM-A");
        seed_claim(&h.store, "CLAIM-B");

        h.worker.run_cycle(TS).await;

        assert!(h.store.list_unsettled().expect("list").is_empty());
        for id in ["CLAIM-A", "CLAIM-B"] {
            let stored = h.store.get_claim(id).expect("get").expect("some");
            assert_eq!(stored.status, ClaimStatus::Submitted);
        }
    }

    #[tokio::test]
    async fn one_bad_claim_does_not_abort_the_cycle() {
        let transport = MockLedgerTransport::new();
        // first claim fails, second succeeds
        transport.push_claim_err(crate::ledger_submitter::LedgerSubmitError::Timeout);
        transport.push_claim_ok("TX-B");
        let h = harness(transport, RequeueConfig::default());
        seed_claim(&h.store, "CLAIM-A");
        seed_claim(&h.store, "CLAIM-B");

        h.worker.run_cycle(TS).await;

        let a = h.store.get_claim("CLAIM-A").expect("get").expect("some");
        let b = h.store.get_claim("CLAIM-B").expect("get").expect("some");
        assert_eq!(a.status, ClaimStatus::Failed);
        assert_eq!(b.status, ClaimStatus::Submitted);
    }
}
