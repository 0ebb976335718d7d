//! # Operator Alerts
//!
//! Canonical alert records and their Discord-compatible webhook payload.
//!
//! Formatting is a pure function: the same alert always produces the same
//! payload. Delivery (and delivery failure handling) belongs to the alert
//! dispatcher in the node crate.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Discord embed color per alert level.
const COLOR_CRITICAL: u32 = 15_158_332; // red
const COLOR_WARNING: u32 = 16_776_960; // yellow
const COLOR_INFO: u32 = 3_447_003; // blue

/// Maximum number of detail fields a single embed may carry.
const MAX_EMBED_FIELDS: usize = 25;

/// Severity of an operator alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Critical,
    Warning,
    Info,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::Warning => "WARNING",
            Self::Info => "INFO",
        }
    }

    fn color(&self) -> u32 {
        match self {
            Self::Critical => COLOR_CRITICAL,
            Self::Warning => COLOR_WARNING,
            Self::Info => COLOR_INFO,
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One alert handed to the dispatcher. Ephemeral: no identity beyond the
/// single delivery attempt, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorAlert {
    /// Emitting subsystem, e.g. `VP-Node:ClaimRequeue`.
    pub source: String,
    /// Severity level.
    pub level: AlertLevel,
    /// Short headline.
    pub title: String,
    /// Human-readable description.
    pub description: String,
    /// Structured detail map (sorted for deterministic formatting).
    pub details: BTreeMap<String, Value>,
    /// Unix seconds when the alert was raised.
    pub timestamp: u64,
}

impl OperatorAlert {
    /// Creates a CRITICAL alert.
    #[must_use]
    pub fn critical(
        source: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Self::new(source, AlertLevel::Critical, title, description, timestamp)
    }

    /// Creates a WARNING alert.
    #[must_use]
    pub fn warning(
        source: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Self::new(source, AlertLevel::Warning, title, description, timestamp)
    }

    fn new(
        source: impl Into<String>,
        level: AlertLevel,
        title: impl Into<String>,
        description: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            source: source.into(),
            level,
            title: title.into(),
            description: description.into(),
            details: BTreeMap::new(),
            timestamp,
        }
    }

    /// Attaches a detail field (builder style).
    #[must_use]
    pub fn with_detail(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(name.into(), value.into());
        self
    }
}

/// Builds a Discord-compatible webhook payload from an operator alert.
///
/// Exactly one embed block: title, description, level color, timestamp,
/// a `Source: ... | VP-Node: ...` footer, and up to 25 inline detail
/// fields with uppercased names. Deterministic: detail fields are emitted
/// in sorted key order.
#[must_use]
pub fn create_discord_payload(alert: &OperatorAlert, node_id: &str) -> Value {
    let fields: Vec<Value> = alert
        .details
        .iter()
        .take(MAX_EMBED_FIELDS)
        .map(|(name, value)| {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            json!({
                "name": name.to_uppercase(),
                "value": rendered,
                "inline": true,
            })
        })
        .collect();

    json!({
        "username": "VP-Node Alert Bot",
        "content": format!("@here **{} ALERT:** {}", alert.level, alert.title),
        "embeds": [{
            "title": alert.title,
            "description": alert.description,
            "color": alert.level.color(),
            "timestamp": alert.timestamp,
            "footer": { "text": format!("Source: {} | VP-Node: {}", alert.source, node_id) },
            "fields": fields,
        }],
    })
}
