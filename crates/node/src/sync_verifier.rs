//! # Ledger Sync Verifier
//!
//! Compares local assumptions against the external ledger's current
//! height/tip. Stateless apart from the sync-lag bookkeeping it feeds to
//! metrics: the verdict is a pure function of one remote call pair.
//!
//! The lookup collaborator is trait-abstracted so the verifier can run
//! against the HTTP ledger service in production and a deterministic
//! mock in tests and test mode. Absence of a response or a non-2xx
//! status is "not synced", never an error that propagates.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::metrics::NodeMetrics;

/// Timeout for a single ledger lookup call.
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Current chain tip as reported by the ledger service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTip {
    /// Current chain height.
    pub height: u64,
    /// Identifier of the tip block.
    pub tip_hash: String,
}

/// Errors from the ledger lookup collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("ledger network error: {0}")]
    Network(String),
    #[error("ledger responded with status {0}")]
    Status(u16),
    #[error("malformed ledger response: {0}")]
    Malformed(String),
}

/// Read-only ledger queries.
///
/// ## Contract
///
/// - Implementations must bound every call with a timeout and must not
///   retry internally.
/// - `designated_producer` returns `Ok(None)` when the ledger has no
///   producer for the height (or answers non-2xx); transport failures
///   are `Err`.
#[async_trait]
pub trait LedgerLookup: Send + Sync {
    /// Returns the current chain height and tip identifier.
    async fn chain_tip(&self) -> Result<ChainTip, LookupError>;

    /// Returns the validator designated to produce at `height`.
    async fn designated_producer(&self, height: u64) -> Result<Option<String>, LookupError>;
}

// ════════════════════════════════════════════════════════════════════════════════
// HTTP IMPLEMENTATION
// ════════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct HeightResponse {
    height: u64,
}

#[derive(Debug, Deserialize)]
struct TipResponse {
    #[serde(rename = "tipHash")]
    tip_hash: String,
}

#[derive(Debug, Deserialize)]
struct ProducerResponse {
    #[serde(rename = "producerId")]
    producer_id: Option<String>,
}

/// Ledger lookup over the ledger service's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpLedgerLookup {
    base: String,
    client: reqwest::Client,
}

impl HttpLedgerLookup {
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, LookupError> {
        let url = format!("{}{}", self.base, path);
        let response = self
            .client
            .get(&url)
            .timeout(LOOKUP_TIMEOUT)
            .send()
            .await
            .map_err(|e| LookupError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Status(status.as_u16()));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| LookupError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl LedgerLookup for HttpLedgerLookup {
    async fn chain_tip(&self) -> Result<ChainTip, LookupError> {
        let height: HeightResponse = self.get_json("/chain/height").await?;
        let tip: TipResponse = self.get_json("/headers/tip").await?;
        Ok(ChainTip {
            height: height.height,
            tip_hash: tip.tip_hash,
        })
    }

    async fn designated_producer(&self, height: u64) -> Result<Option<String>, LookupError> {
        match self
            .get_json::<ProducerResponse>(&format!("/chain/producer/{height}"))
            .await
        {
            Ok(body) => Ok(body.producer_id),
            // No producer assigned (or endpoint unhappy): conservative None.
            Err(LookupError::Status(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// MOCK IMPLEMENTATION
// ════════════════════════════════════════════════════════════════════════════════

/// Deterministic lookup for tests and test mode.
///
/// With no tip configured the mock reports a network error, which the
/// verifier reads as "not synced" — the same observable behavior as an
/// unreachable ledger.
#[derive(Debug, Default)]
pub struct MockLedgerLookup {
    tip: Mutex<Option<ChainTip>>,
    producer: Mutex<Option<String>>,
}

impl MockLedgerLookup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tip(&self, height: u64, tip_hash: impl Into<String>) {
        *self.tip.lock() = Some(ChainTip {
            height,
            tip_hash: tip_hash.into(),
        });
    }

    /// Simulates the ledger becoming unreachable.
    pub fn clear_tip(&self) {
        *self.tip.lock() = None;
    }

    pub fn set_designated_producer(&self, producer: impl Into<String>) {
        *self.producer.lock() = Some(producer.into());
    }

    pub fn clear_designated_producer(&self) {
        *self.producer.lock() = None;
    }
}

#[async_trait]
impl LedgerLookup for MockLedgerLookup {
    async fn chain_tip(&self) -> Result<ChainTip, LookupError> {
        self.tip
            .lock()
            .clone()
            .ok_or_else(|| LookupError::Network("no tip configured".to_string()))
    }

    async fn designated_producer(&self, _height: u64) -> Result<Option<String>, LookupError> {
        Ok(self.producer.lock().clone())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// SYNC VERIFIER
// ════════════════════════════════════════════════════════════════════════════════

/// Sync verdict for one check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Synced { height: u64, tip_hash: String },
    NotSynced { reason: String },
}

impl SyncStatus {
    #[inline]
    #[must_use]
    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced { .. })
    }
}

/// Decides whether the node may leave `SYNCING_LEDGER`.
pub struct SyncVerifier {
    lookup: Arc<dyn LedgerLookup>,
    metrics: Arc<NodeMetrics>,
    /// Unix seconds of the last successful check; 0 = never synced.
    last_synced_at: AtomicU64,
}

impl SyncVerifier {
    #[must_use]
    pub fn new(lookup: Arc<dyn LedgerLookup>, metrics: Arc<NodeMetrics>) -> Self {
        Self {
            lookup,
            metrics,
            last_synced_at: AtomicU64::new(0),
        }
    }

    /// Performs one sync check and publishes the lag to metrics.
    pub async fn check(&self, now: u64) -> SyncStatus {
        match self.lookup.chain_tip().await {
            Ok(tip) => {
                self.last_synced_at.store(now, Ordering::SeqCst);
                self.metrics.set_sync_lag_seconds(0);
                debug!(event = "sync_check", height = tip.height, synced = true);
                SyncStatus::Synced {
                    height: tip.height,
                    tip_hash: tip.tip_hash,
                }
            }
            Err(e) => {
                let last = self.last_synced_at.load(Ordering::SeqCst);
                if last > 0 {
                    self.metrics.set_sync_lag_seconds(now.saturating_sub(last));
                }
                debug!(event = "sync_check", synced = false, reason = %e);
                SyncStatus::NotSynced {
                    reason: e.to_string(),
                }
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

    const TS: u64 = 1_700_000_000;

    #[tokio::test]
    async fn synced_when_tip_available() {
        let lookup = Arc::new(MockLedgerLookup::new());
        lookup.set_tip(42, "0xabc");
        let verifier = SyncVerifier::new(lookup, Arc::new(NodeMetrics::new()));

        let status = verifier.check(TS).await;
        assert_eq!(
            status,
            SyncStatus::Synced {
                height: 42,
                tip_hash: "0xabc".to_string()
            }
        );
        assert!(status.is_synced());
    }

    #[tokio::test]
    async fn not_synced_when_lookup_fails() {
        let lookup = Arc::new(MockLedgerLookup::new());
        let verifier = SyncVerifier::new(lookup, Arc::new(NodeMetrics::new()));

        let status = verifier.check(TS).await;
        assert!(!status.is_synced());
        match status {
            SyncStatus::NotSynced { reason } => assert!(reason.contains("no tip configured")),
            other => panic!("expected NotSynced, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn lag_published_after_losing_sync() {
        let lookup = Arc::new(MockLedgerLookup::new());
        lookup.set_tip(10, "0x1");
        let metrics = Arc::new(NodeMetrics::new());
        let verifier = SyncVerifier::new(Arc::clone(&lookup) as Arc<dyn LedgerLookup>, Arc::clone(&metrics));

        assert!(verifier.check(TS).await.is_synced());
        lookup.clear_tip();
        assert!(!verifier.check(TS + 30).await.is_synced());
        // metrics carry the 30s lag
        assert!(metrics.to_prometheus().contains("vp_ns_sync_lag_seconds 30"));
    }

    #[tokio::test]
    async fn mock_designated_producer_round_trip() {
        let lookup = MockLedgerLookup::new();
        assert_eq!(lookup.designated_producer(7).await.expect("ok"), None);
        lookup.set_designated_producer("val-1");
        assert_eq!(
            lookup.designated_producer(7).await.expect("ok"),
            Some("val-1".to_string())
        );
    }
}
