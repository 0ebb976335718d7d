//! # Review Queue
//!
//! In-process buffer for inbound review requests while the node is not
//! ready to act on them (syncing, or waiting for its slot).
//!
//! ## Invariants
//!
//! - At most one live entry per dedup key. Re-enqueue with the same key
//!   overwrites the entry and resets its insertion time.
//! - `drain_all` atomically empties the queue before returning, so no
//!   entry can be handed out twice and a concurrent `sweep_expired`
//!   cannot touch an already-drained entry.
//! - `enqueue`, `drain_all`, and `sweep_expired` are serialized by a
//!   single mutex over the internal map.
//! - Queue depth is published to the metrics registry on every mutation.
//!
//! `sweep_expired` is a pure state transition keyed on an explicit `now`
//! so any scheduler (real timer, test harness, cooperative loop) can
//! drive it.

use parking_lot::Mutex;
use serde_json::Value;
use sha3::{Digest, Sha3_256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::metrics::NodeMetrics;

/// One inbound review request.
///
/// The payload is carried opaquely; only the identifier matters to the
/// queue. Requests without an identifier are deduplicated by a
/// structural hash of the whole payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewRequest {
    /// Identifier of the artifact under review, when the request has one.
    pub artifact_id: Option<String>,
    /// Full request body as received.
    pub payload: Value,
}

impl ReviewRequest {
    /// Builds a request from a raw JSON body, lifting `artifact_id` out
    /// of the payload when present.
    #[must_use]
    pub fn from_json(payload: Value) -> Self {
        let artifact_id = payload
            .get("artifact_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        Self {
            artifact_id,
            payload,
        }
    }

    /// Dedup key: the artifact identifier, or a SHA3-256 of the
    /// serialized payload when no identifier is present.
    ///
    /// `serde_json` keeps object keys in a `BTreeMap`, so serialization
    /// is already canonical (sorted keys) and the hash is structural.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        match &self.artifact_id {
            Some(id) => id.clone(),
            None => {
                let canonical = self.payload.to_string();
                let digest = Sha3_256::digest(canonical.as_bytes());
                format!("sha3:{}", hex::encode(digest))
            }
        }
    }
}

/// One queued entry.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedReview {
    /// Dedup key the entry lives under.
    pub key: String,
    /// The buffered request.
    pub request: ReviewRequest,
    /// Unix seconds when the entry was (last) enqueued.
    pub enqueued_at: u64,
}

/// Keyed, TTL-bounded review buffer.
pub struct ReviewQueue {
    /// BTreeMap gives the arbitrary-but-stable (key-sorted) drain order.
    entries: Mutex<BTreeMap<String, QueuedReview>>,
    ttl_secs: u64,
    metrics: Arc<NodeMetrics>,
}

impl ReviewQueue {
    #[must_use]
    pub fn new(ttl_secs: u64, metrics: Arc<NodeMetrics>) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            ttl_secs,
            metrics,
        }
    }

    /// Inserts (or refreshes) a request; returns its dedup key.
    pub fn enqueue(&self, request: ReviewRequest, now: u64) -> String {
        let key = request.dedup_key();
        let mut entries = self.entries.lock();
        entries.insert(
            key.clone(),
            QueuedReview {
                key: key.clone(),
                request,
                enqueued_at: now,
            },
        );
        self.metrics.set_review_queue_size(entries.len() as u64);
        debug!(event = "review_enqueued", key = %key, depth = entries.len());
        key
    }

    /// Number of live entries.
    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }

    /// Non-destructive snapshot, in key order. Diagnostics only.
    #[must_use]
    pub fn peek_all(&self) -> Vec<QueuedReview> {
        self.entries.lock().values().cloned().collect()
    }

    /// Atomically empties the queue and returns every entry, in key
    /// order. Used on the transition into a producing state.
    #[must_use]
    pub fn drain_all(&self) -> Vec<QueuedReview> {
        let mut entries = self.entries.lock();
        let drained: Vec<QueuedReview> = std::mem::take(&mut *entries).into_values().collect();
        self.metrics.set_review_queue_size(0);
        if !drained.is_empty() {
            debug!(event = "review_queue_drained", count = drained.len());
        }
        drained
    }

    /// Removes entries older than the TTL. Returns the number removed.
    pub fn sweep_expired(&self, now: u64) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        let ttl = self.ttl_secs;
        entries.retain(|_, e| now.saturating_sub(e.enqueued_at) < ttl);
        let removed = before - entries.len();
        self.metrics.set_review_queue_size(entries.len() as u64);
        if removed > 0 {
            debug!(event = "review_queue_swept", removed, remaining = entries.len());
        }
        removed
    }
}
