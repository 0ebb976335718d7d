//! # Node Metrics Registry
//!
//! Process-wide counters and gauges for the validator node, exposed in
//! Prometheus text exposition format via the HTTP surface.
//!
//! ## Design
//!
//! - All counters/gauges are `AtomicU64`; no locks on the hot path.
//!   The one exception is the current-state label, which is a short
//!   string behind a `parking_lot::RwLock` (updated only on state
//!   transitions).
//! - Metric updates never fail and never panic; a metrics problem must
//!   not destabilize the node.
//! - `to_prometheus()` produces a valid exposition snapshot.
//!
//! ## Metrics
//!
//! | Metric | Kind | Meaning |
//! |--------|------|---------|
//! | `vp_current_state` | gauge (labelled) | current lifecycle state |
//! | `vp_state_transitions_total` | counter | state transitions |
//! | `vp_review_queue_size` | gauge | queued review requests |
//! | `vp_produce_attempts_total` | counter | produce-cycle attempts |
//! | `vp_produce_failures_total` | counter | failed productions in own slots |
//! | `vp_claim_submit_attempts_total` | counter | claim submission attempts |
//! | `vp_claim_submit_failures_total` | counter | claim submission failures |
//! | `vp_ns_sync_lag_seconds` | gauge | seconds since last confirmed sync |

use parking_lot::RwLock;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

// ════════════════════════════════════════════════════════════════════════════════
// PRIMITIVES
// ════════════════════════════════════════════════════════════════════════════════

/// Monotonic counter backed by an atomic.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}

/// Settable gauge backed by an atomic.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    #[must_use]
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::Relaxed);
    }

    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// NODE METRICS
// ════════════════════════════════════════════════════════════════════════════════

/// Registry of all VP-Node metrics. One instance per process, shared by
/// `Arc` across every component that publishes.
#[derive(Debug)]
pub struct NodeMetrics {
    /// Name of the current lifecycle state (exposition label).
    current_state: RwLock<&'static str>,
    state_transitions: Counter,
    review_queue_size: Gauge,
    produce_attempts: Counter,
    produce_failures: Counter,
    claim_submit_attempts: Counter,
    claim_submit_failures: Counter,
    ns_sync_lag_seconds: Gauge,
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current_state: RwLock::new("INITIALIZING"),
            state_transitions: Counter::new(),
            review_queue_size: Gauge::new(),
            produce_attempts: Counter::new(),
            produce_failures: Counter::new(),
            claim_submit_attempts: Counter::new(),
            claim_submit_failures: Counter::new(),
            ns_sync_lag_seconds: Gauge::new(),
        }
    }

    /// Records a state transition: bumps the counter and swaps the
    /// current-state label.
    pub fn record_state_transition(&self, to: &'static str) {
        self.state_transitions.inc();
        *self.current_state.write() = to;
    }

    #[must_use]
    pub fn current_state(&self) -> &'static str {
        *self.current_state.read()
    }

    #[must_use]
    pub fn state_transitions(&self) -> u64 {
        self.state_transitions.get()
    }

    pub fn set_review_queue_size(&self, n: u64) {
        self.review_queue_size.set(n);
    }

    #[must_use]
    pub fn review_queue_size(&self) -> u64 {
        self.review_queue_size.get()
    }

    pub fn inc_produce_attempt(&self) {
        self.produce_attempts.inc();
    }

    pub fn inc_produce_failure(&self) {
        self.produce_failures.inc();
    }

    #[must_use]
    pub fn produce_failures(&self) -> u64 {
        self.produce_failures.get()
    }

    pub fn inc_claim_submit_attempt(&self) {
        self.claim_submit_attempts.inc();
    }

    pub fn inc_claim_submit_failure(&self) {
        self.claim_submit_failures.inc();
    }

    #[must_use]
    pub fn claim_submit_attempts(&self) -> u64 {
        self.claim_submit_attempts.get()
    }

    #[must_use]
    pub fn claim_submit_failures(&self) -> u64 {
        self.claim_submit_failures.get()
    }

    pub fn set_sync_lag_seconds(&self, secs: u64) {
        self.ns_sync_lag_seconds.set(secs);
    }

    /// Renders the registry in Prometheus text exposition format.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let mut out = String::with_capacity(1024);
        let state = *self.current_state.read();

        let _ = writeln!(out, "# HELP vp_current_state Current VP state (value 1; label=state)");
        let _ = writeln!(out, "# TYPE vp_current_state gauge");
        let _ = writeln!(out, "vp_current_state{{state=\"{}\"}} 1", state);

        let _ = writeln!(out, "# HELP vp_state_transitions_total Number of VP state transitions");
        let _ = writeln!(out, "# TYPE vp_state_transitions_total counter");
        let _ = writeln!(out, "vp_state_transitions_total {}", self.state_transitions.get());

        let _ = writeln!(out, "# HELP vp_review_queue_size Number of review requests queued");
        let _ = writeln!(out, "# TYPE vp_review_queue_size gauge");
        let _ = writeln!(out, "vp_review_queue_size {}", self.review_queue_size.get());

        let _ = writeln!(out, "# HELP vp_produce_attempts_total Total produce attempts");
        let _ = writeln!(out, "# TYPE vp_produce_attempts_total counter");
        let _ = writeln!(out, "vp_produce_attempts_total {}", self.produce_attempts.get());

        let _ = writeln!(out, "# HELP vp_produce_failures_total Productions that failed in an assigned slot");
        let _ = writeln!(out, "# TYPE vp_produce_failures_total counter");
        let _ = writeln!(out, "vp_produce_failures_total {}", self.produce_failures.get());

        let _ = writeln!(out, "# HELP vp_claim_submit_attempts_total Reward claim submission attempts");
        let _ = writeln!(out, "# TYPE vp_claim_submit_attempts_total counter");
        let _ = writeln!(out, "vp_claim_submit_attempts_total {}", self.claim_submit_attempts.get());

        let _ = writeln!(out, "# HELP vp_claim_submit_failures_total Reward claim submission failures");
        let _ = writeln!(out, "# TYPE vp_claim_submit_failures_total counter");
        let _ = writeln!(out, "vp_claim_submit_failures_total {}", self.claim_submit_failures.get());

        let _ = writeln!(out, "# HELP vp_ns_sync_lag_seconds Seconds since last confirmed ledger sync");
        let _ = writeln!(out, "# TYPE vp_ns_sync_lag_seconds gauge");
        let _ = writeln!(out, "vp_ns_sync_lag_seconds {}", self.ns_sync_lag_seconds.get());

        out
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
