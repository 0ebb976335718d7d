//! # Alert Dispatch
//!
//! Delivers formatted operator alerts to the external alert sink
//! (a webhook that forwards to Discord).
//!
//! ## Contract
//!
//! - Dispatch always completes. Delivery failure is logged, never
//!   propagated — alerting must never destabilize the node.
//! - Delivery is bounded by a timeout and holds no locks across the
//!   call.
//! - Payload formatting is pure and lives in `vp_common::alert`; this
//!   module only moves bytes.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

use vp_common::{create_discord_payload, OperatorAlert};

/// Timeout for one delivery attempt.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivery failures. Internal to the dispatcher; callers never see
/// these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AlertDeliveryError {
    #[error("alert sink network error: {0}")]
    Network(String),
    #[error("alert sink responded with status {0}")]
    Status(u16),
}

/// Outbound alert delivery collaborator.
///
/// ## Contract
///
/// - Must not panic.
/// - Must not retry internally; one call, one attempt.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, payload: &Value) -> Result<(), AlertDeliveryError>;
}

// ════════════════════════════════════════════════════════════════════════════════
// WEBHOOK SINK
// ════════════════════════════════════════════════════════════════════════════════

/// HTTP webhook sink.
#[derive(Debug, Clone)]
pub struct WebhookAlertSink {
    endpoint: String,
    client: reqwest::Client,
}

impl WebhookAlertSink {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn deliver(&self, payload: &Value) -> Result<(), AlertDeliveryError> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(DELIVERY_TIMEOUT)
            .json(payload)
            .send()
            .await
            .map_err(|e| AlertDeliveryError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AlertDeliveryError::Status(status.as_u16()));
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// RECORDING SINK
// ════════════════════════════════════════════════════════════════════════════════

/// Records delivered payloads for tests and test mode.
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    delivered: Mutex<Vec<Value>>,
}

impl RecordingAlertSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything delivered so far.
    #[must_use]
    pub fn delivered(&self) -> Vec<Value> {
        self.delivered.lock().clone()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.delivered.lock().len()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn deliver(&self, payload: &Value) -> Result<(), AlertDeliveryError> {
        self.delivered.lock().push(payload.clone());
        Ok(())
    }
}

/// Sink that always fails. Exercises the never-propagate contract.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct FailingAlertSink;

#[cfg(test)]
#[async_trait]
impl AlertSink for FailingAlertSink {
    async fn deliver(&self, _payload: &Value) -> Result<(), AlertDeliveryError> {
        Err(AlertDeliveryError::Network("sink unreachable".to_string()))
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// DISPATCHER
// ════════════════════════════════════════════════════════════════════════════════

/// Formats and sends operator alerts, best effort.
pub struct AlertDispatcher {
    sink: Arc<dyn AlertSink>,
    node_id: String,
}

impl AlertDispatcher {
    #[must_use]
    pub fn new(sink: Arc<dyn AlertSink>, node_id: String) -> Self {
        Self { sink, node_id }
    }

    /// Formats `alert` and hands it to the sink. Always completes;
    /// failures are logged and swallowed.
    pub async fn dispatch_alert(&self, alert: &OperatorAlert) {
        let payload = create_discord_payload(alert, &self.node_id);
        match self.sink.deliver(&payload).await {
            Ok(()) => {
                info!(
                    event = "alert_dispatched",
                    level = %alert.level,
                    title = %alert.title,
                );
            }
            Err(e) => {
                error!(
                    event = "alert_delivery_failed",
                    level = %alert.level,
                    title = %alert.title,
                    error = %e,
                );
            }
        }
    }
}

impl std::fmt::Debug for AlertDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertDispatcher")
            .field("node_id", &self.node_id)
            .finish_non_exhaustive()
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
