//! # VP-Node Crate
//!
//! Operational core of the validator participant node.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           VP-Node                                │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │   POST /reviews ──────▶ ReviewQueue (TTL, dedup by key)          │
//! │                              │ drain on producing transition     │
//! │                              ▼                                   │
//! │   ValidatorStateMachine ◀── ProduceCycle ──▶ SyncVerifier ───▶ ledger
//! │     INITIALIZING             │                 (height/tip)      │
//! │     SYNCING_LEDGER           │ completed job                     │
//! │     LISTENING_FOR_REVIEWS    ▼                                   │
//! │     PRODUCING_BLOCK     FeeSettlementPipeline ──▶ ClaimsStore    │
//! │     FATAL                    │ submit             (LMDB)         │
//! │                              ▼                                   │
//! │                         LedgerSubmitter ──▶ ledger service       │
//! │                              │ failures                          │
//! │                              ▼                                   │
//! │                         RequeueWorker (backoff, escalation)      │
//! │                              │ stuck claims                      │
//! │                              ▼                                   │
//! │   ComplianceTracker     AlertDispatcher ──▶ alert sink webhook   │
//! │     (miss streaks)                                               │
//! │                                                                  │
//! │   NodeMetrics ──▶ GET /metrics (Prometheus exposition)           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All remote collaborators (ledger lookup, ledger submission, alert
//! delivery, durable store) sit behind traits with deterministic mock
//! implementations, selected once at bootstrap. Business logic never
//! branches on a test-mode flag.

pub mod alerting;
pub mod claims_store;
pub mod compliance;
pub mod fee_settlement;
pub mod ledger_submitter;
pub mod lmdb_store;
pub mod metrics;
pub mod orchestrator;
pub mod requeue_worker;
pub mod review_queue;
pub mod state_machine;
pub mod sync_verifier;

pub use alerting::{
    AlertDeliveryError, AlertDispatcher, AlertSink, RecordingAlertSink, WebhookAlertSink,
};
pub use claims_store::{
    ClaimsStore, ComplianceStore, InMemoryClaimsStore, InMemoryComplianceStore, StoreError,
};
pub use compliance::{ComplianceEventInput, ComplianceTracker};
pub use fee_settlement::{
    calculate_fee_split, FeeError, FeeSettlementPipeline, SettlementOutcome,
};
pub use ledger_submitter::{
    BlockSummary, ClaimSubmission, HttpLedgerTransport, LedgerSubmitError, LedgerSubmitter,
    LedgerTransport, MockLedgerTransport,
};
pub use lmdb_store::LmdbStore;
pub use metrics::{Counter, Gauge, NodeMetrics};
pub use orchestrator::{CycleOutcome, ProduceCycle, ProduceCycleConfig};
pub use requeue_worker::{backoff_delay_secs, ProcessDecision, RequeueConfig, RequeueWorker};
pub use review_queue::{QueuedReview, ReviewQueue, ReviewRequest};
pub use state_machine::{
    ObserverHandle, StateTransition, ValidatorState, ValidatorStateMachine,
};
pub use sync_verifier::{
    ChainTip, HttpLedgerLookup, LedgerLookup, LookupError, MockLedgerLookup, SyncStatus,
    SyncVerifier,
};

/// Current Unix time in seconds. Clock failures collapse to 0 rather
/// than panicking.
#[must_use]
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
