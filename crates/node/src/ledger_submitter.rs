//! # Ledger Submission Client
//!
//! Submits reward claims (and produced block summaries) to the external
//! ledger service through a trait-abstracted transport.
//!
//! ## Transport Abstraction
//!
//! [`LedgerTransport`] decouples submission logic from the wire:
//!
//! - [`MockLedgerTransport`] — scripted FIFO responses for tests and
//!   test mode, no network.
//! - [`HttpLedgerTransport`] — JSON over HTTP against the ledger
//!   service.
//!
//! ## No Implicit Retry
//!
//! One call, one attempt. Retry with backoff belongs to the requeue
//! worker; the transport only reports success (a settlement transaction
//! reference) or failure. A 2xx response without a transaction
//! reference is a failure — the reference is the proof of settlement.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use vp_common::FeeAllocation;

/// Timeout for a single submission call.
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(10);

// ════════════════════════════════════════════════════════════════════════════════
// PAYLOADS
// ════════════════════════════════════════════════════════════════════════════════

/// Reward-claim payload sent to the ledger for settlement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimSubmission {
    /// Stable claim identifier (idempotency key on the ledger side).
    #[serde(rename = "claimId")]
    pub claim_id: String,
    /// The fee split being settled.
    pub allocation: FeeAllocation,
    /// Unix seconds of this submission attempt.
    pub submitted_at: u64,
    /// Claim signature. Filled in by the signing layer; carried opaquely
    /// here.
    #[serde(rename = "validatorSignature")]
    pub validator_signature: String,
}

/// Summary of a produced block, submitted for inclusion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockSummary {
    /// Height the block was produced for.
    pub height: u64,
    /// Producing validator.
    #[serde(rename = "producerId")]
    pub producer_id: String,
    /// SHA3-256 over the drained review keys (hex).
    #[serde(rename = "payloadHash")]
    pub payload_hash: String,
    /// Number of review entries included.
    #[serde(rename = "txCount")]
    pub tx_count: usize,
}

// ════════════════════════════════════════════════════════════════════════════════
// ERROR
// ════════════════════════════════════════════════════════════════════════════════

/// Transport-level submission failures. All of these are transient from
/// the pipeline's point of view: they mark the claim FAILED, they never
/// propagate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerSubmitError {
    /// Network-level failure reaching the ledger.
    NetworkError(String),
    /// The ledger answered non-2xx.
    Rejected(String),
    /// 2xx response without a settlement transaction reference.
    MissingTxRef,
    /// The call exceeded its timeout.
    Timeout,
}

impl fmt::Display for LedgerSubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkError(msg) => write!(f, "ledger network error: {}", msg),
            Self::Rejected(msg) => write!(f, "ledger rejected submission: {}", msg),
            Self::MissingTxRef => write!(f, "ledger response carried no settlement tx reference"),
            Self::Timeout => write!(f, "ledger submission timed out"),
        }
    }
}

impl std::error::Error for LedgerSubmitError {}

// ════════════════════════════════════════════════════════════════════════════════
// TRANSPORT TRAIT
// ════════════════════════════════════════════════════════════════════════════════

/// Async transport to the ledger service.
///
/// ## Contract
///
/// - Implementations MUST NOT retry internally.
/// - Implementations MUST bound each call with a timeout.
/// - A successful claim submission returns the settlement transaction
///   reference; there is no success without one.
#[async_trait]
pub trait LedgerTransport: Send + Sync {
    /// Submits a reward claim; returns the settlement tx reference.
    async fn submit_reward_claim(
        &self,
        submission: &ClaimSubmission,
    ) -> Result<String, LedgerSubmitError>;

    /// Submits a produced block summary.
    async fn submit_block(&self, block: &BlockSummary) -> Result<(), LedgerSubmitError>;
}

// ════════════════════════════════════════════════════════════════════════════════
// SUBMITTER
// ════════════════════════════════════════════════════════════════════════════════

/// Thin delegation wrapper around a shared transport.
///
/// Cloneable so the settlement pipeline and the requeue worker can share
/// one transport without coordinating ownership.
#[derive(Clone)]
pub struct LedgerSubmitter {
    transport: std::sync::Arc<dyn LedgerTransport>,
}

impl LedgerSubmitter {
    #[must_use]
    pub fn new(transport: std::sync::Arc<dyn LedgerTransport>) -> Self {
        Self { transport }
    }

    /// Submits a reward claim. Single attempt, errors unmodified.
    pub async fn submit(
        &self,
        submission: &ClaimSubmission,
    ) -> Result<String, LedgerSubmitError> {
        self.transport.submit_reward_claim(submission).await
    }

    /// Submits a produced block summary. Single attempt.
    pub async fn submit_block(&self, block: &BlockSummary) -> Result<(), LedgerSubmitError> {
        self.transport.submit_block(block).await
    }
}

impl fmt::Debug for LedgerSubmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedgerSubmitter").finish_non_exhaustive()
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// HTTP TRANSPORT
// ════════════════════════════════════════════════════════════════════════════════

/// JSON-over-HTTP transport against the ledger service.
#[derive(Debug, Clone)]
pub struct HttpLedgerTransport {
    base: String,
    client: reqwest::Client,
}

impl HttpLedgerTransport {
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            client: reqwest::Client::new(),
        }
    }

    fn map_reqwest_err(e: reqwest::Error) -> LedgerSubmitError {
        if e.is_timeout() {
            LedgerSubmitError::Timeout
        } else {
            LedgerSubmitError::NetworkError(e.to_string())
        }
    }
}

#[async_trait]
impl LedgerTransport for HttpLedgerTransport {
    async fn submit_reward_claim(
        &self,
        submission: &ClaimSubmission,
    ) -> Result<String, LedgerSubmitError> {
        let url = format!("{}/transactions", self.base);
        let body = json!({ "type": "reward-claim", "payload": submission });

        let response = self
            .client
            .post(&url)
            .timeout(SUBMIT_TIMEOUT)
            .json(&body)
            .send()
            .await
            .map_err(Self::map_reqwest_err)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LedgerSubmitError::Rejected(format!("{} {}", status, text)));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LedgerSubmitError::NetworkError(e.to_string()))?;

        parsed
            .get("txHash")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or(LedgerSubmitError::MissingTxRef)
    }

    async fn submit_block(&self, block: &BlockSummary) -> Result<(), LedgerSubmitError> {
        let url = format!("{}/blocks/produce", self.base);

        let response = self
            .client
            .post(&url)
            .timeout(SUBMIT_TIMEOUT)
            .json(block)
            .send()
            .await
            .map_err(Self::map_reqwest_err)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LedgerSubmitError::Rejected(format!("{} {}", status, text)));
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// MOCK TRANSPORT
// ════════════════════════════════════════════════════════════════════════════════

/// Scripted transport for tests and test mode.
///
/// Claim responses are consumed FIFO. When the script is empty the mock
/// either fails (`new()`, for tests that exercise failure paths) or
/// succeeds with a deterministic `TX-MOCK-<claim_id>` reference
/// (`always_succeeding()`, for test mode). Block submissions succeed
/// unless a failure is scripted.
///
/// Uses `std::sync::Mutex`; a poisoned lock is reported as a network
/// error instead of panicking.
pub struct MockLedgerTransport {
    claim_responses: Mutex<Vec<Result<String, LedgerSubmitError>>>,
    block_responses: Mutex<Vec<Result<(), LedgerSubmitError>>>,
    default_success: bool,
}

impl MockLedgerTransport {
    /// Empty script; unscripted claim submissions fail.
    #[must_use]
    pub fn new() -> Self {
        Self {
            claim_responses: Mutex::new(Vec::new()),
            block_responses: Mutex::new(Vec::new()),
            default_success: false,
        }
    }

    /// Unscripted claim submissions succeed deterministically.
    #[must_use]
    pub fn always_succeeding() -> Self {
        Self {
            claim_responses: Mutex::new(Vec::new()),
            block_responses: Mutex::new(Vec::new()),
            default_success: true,
        }
    }

    /// Scripts a successful claim submission (FIFO).
    pub fn push_claim_ok(&self, tx_ref: impl Into<String>) {
        if let Ok(mut queue) = self.claim_responses.lock() {
            queue.push(Ok(tx_ref.into()));
        }
    }

    /// Scripts a failed claim submission (FIFO).
    pub fn push_claim_err(&self, err: LedgerSubmitError) {
        if let Ok(mut queue) = self.claim_responses.lock() {
            queue.push(Err(err));
        }
    }

    /// Scripts a failed block submission (FIFO).
    pub fn push_block_err(&self, err: LedgerSubmitError) {
        if let Ok(mut queue) = self.block_responses.lock() {
            queue.push(Err(err));
        }
    }
}

impl Default for MockLedgerTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerTransport for MockLedgerTransport {
    async fn submit_reward_claim(
        &self,
        submission: &ClaimSubmission,
    ) -> Result<String, LedgerSubmitError> {
        let mut queue = self.claim_responses.lock().map_err(|e| {
            LedgerSubmitError::NetworkError(format!("mutex poisoned: {}", e))
        })?;

        if queue.is_empty() {
            if self.default_success {
                return Ok(format!("TX-MOCK-{}", submission.claim_id));
            }
            return Err(LedgerSubmitError::NetworkError(
                "no mock response".to_string(),
            ));
        }
        queue.remove(0)
    }

    async fn submit_block(&self, _block: &BlockSummary) -> Result<(), LedgerSubmitError> {
        let mut queue = self.block_responses.lock().map_err(|e| {
            LedgerSubmitError::NetworkError(format!("mutex poisoned: {}", e))
        })?;

        if queue.is_empty() {
            return Ok(());
        }
        queue.remove(0)
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
