//! # Node Configuration
//!
//! Environment-driven configuration with an optional TOML file override.
//! Env vars are the production interface; the TOML loader exists for local
//! multi-node setups where exporting a dozen variables per process is
//! unwieldy.
//!
//! ## Identity
//!
//! A validator identity is mandatory. `resolve_validator_id` prefers
//! `VALIDATOR_ID`, falls back to a fingerprint of `VALIDATOR_PUBLIC_KEY`,
//! and otherwise fails with [`ConfigError::MissingIdentity`] — the caller
//! is expected to terminate the process with exit code 1 (unless
//! `VP_AUTO_IDENTITY` was set, which the bootstrap handles itself).

use serde::Deserialize;
use sha3::{Digest, Sha3_256};
use std::env;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither `VALIDATOR_ID` nor `VALIDATOR_PUBLIC_KEY` is configured.
    #[error("no validator identity configured: set VALIDATOR_ID or VALIDATOR_PUBLIC_KEY")]
    MissingIdentity,

    /// An env var or file field held a value that does not parse.
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },

    /// Config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Full node configuration.
///
/// Every field has a usable default so a bare `VALIDATOR_ID=... vp-node`
/// invocation works against a local ledger service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Explicit validator identifier.
    pub validator_id: Option<String>,
    /// Validator public key (PEM or hex); used to derive an identity when
    /// no explicit id is set.
    pub validator_public_key: Option<String>,
    /// Permit an auto-generated identity instead of failing at startup.
    pub auto_identity: bool,
    /// Base URL of the ledger service (NS-Node).
    pub ledger_url: String,
    /// Port for the node's own HTTP surface (health, metrics, reviews).
    pub http_port: u16,
    /// Review queue TTL in seconds.
    pub review_ttl_secs: u64,
    /// Fee credited per drained review when building a production job.
    pub review_fee: f64,
    /// Produce-cycle tick interval in milliseconds.
    pub produce_interval_ms: u64,
    /// Claim requeue worker tick interval in seconds.
    pub requeue_interval_secs: u64,
    /// Submission attempt ceiling before a claim escalates to an alert.
    pub claim_max_attempts: u32,
    /// First retry backoff in seconds (doubles per attempt, capped).
    pub claim_initial_backoff_secs: u64,
    /// Consecutive-miss streak at which the node raises a CRITICAL alert.
    pub consecutive_miss_threshold: u32,
    /// Directory for the durable store.
    pub data_dir: String,
    /// Alert sink webhook endpoint.
    pub alert_sink_url: String,
    /// Substitute deterministic mock collaborators at bootstrap.
    pub test_mode: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            validator_id: None,
            validator_public_key: None,
            auto_identity: false,
            ledger_url: "http://localhost:3000".to_string(),
            http_port: 4000,
            review_ttl_secs: 3_600,
            review_fee: 10.0,
            produce_interval_ms: 3_000,
            requeue_interval_secs: 60,
            claim_max_attempts: 10,
            claim_initial_backoff_secs: 5,
            consecutive_miss_threshold: 3,
            data_dir: "./data".to_string(),
            alert_sink_url: "http://alert-sink:3010/api/v1/alerts".to_string(),
            test_mode: false,
        }
    }
}

impl NodeConfig {
    /// Builds configuration from the process environment.
    ///
    /// Unset variables keep their defaults; set-but-unparsable variables
    /// are an error rather than a silent fallback.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Ok(v) = env::var("VALIDATOR_ID") {
            if !v.trim().is_empty() {
                cfg.validator_id = Some(v.trim().to_string());
            }
        }
        if let Ok(v) = env::var("VALIDATOR_PUBLIC_KEY") {
            if !v.trim().is_empty() {
                cfg.validator_public_key = Some(v.trim().to_string());
            }
        }
        cfg.auto_identity = env_flag("VP_AUTO_IDENTITY");
        if let Ok(v) = env::var("NS_NODE_URL") {
            cfg.ledger_url = v.trim().trim_end_matches('/').to_string();
        }
        if let Some(v) = parse_env("VP_HTTP_PORT")? {
            cfg.http_port = v;
        }
        if let Some(v) = parse_env("VP_REVIEW_TTL_SECS")? {
            cfg.review_ttl_secs = v;
        }
        if let Some(v) = parse_env("VP_REVIEW_FEE")? {
            cfg.review_fee = v;
        }
        if let Some(v) = parse_env("VP_PRODUCE_INTERVAL_MS")? {
            cfg.produce_interval_ms = v;
        }
        if let Some(v) = parse_env("VP_CLAIM_REQUEUE_INTERVAL_SECS")? {
            cfg.requeue_interval_secs = v;
        }
        if let Some(v) = parse_env("VP_CLAIM_MAX_ATTEMPTS")? {
            cfg.claim_max_attempts = v;
        }
        if let Some(v) = parse_env("VP_CLAIM_INITIAL_BACKOFF_SECS")? {
            cfg.claim_initial_backoff_secs = v;
        }
        if let Some(v) = parse_env("VP_CONSECUTIVE_MISS_THRESHOLD")? {
            cfg.consecutive_miss_threshold = v;
        }
        if let Ok(v) = env::var("VP_DATA_DIR") {
            cfg.data_dir = v;
        }
        if let Ok(v) = env::var("ALERT_SINK_API_URL") {
            cfg.alert_sink_url = v;
        }
        cfg.test_mode = env_flag("VP_NODE_TEST_MODE");

        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads configuration from a TOML file. Missing fields take defaults.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let s = fs::read_to_string(path.as_ref())?;
        let cfg: NodeConfig = toml::from_str(&s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Sanity checks independent of where the values came from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http_port == 0 {
            return Err(ConfigError::InvalidValue {
                name: "http_port".to_string(),
                value: "0".to_string(),
            });
        }
        if self.claim_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "claim_max_attempts".to_string(),
                value: "0".to_string(),
            });
        }
        if !self.review_fee.is_finite() || self.review_fee < 0.0 {
            return Err(ConfigError::InvalidValue {
                name: "review_fee".to_string(),
                value: format!("{}", self.review_fee),
            });
        }
        Ok(())
    }

    /// Resolves the mandatory validator identity.
    ///
    /// Preference order: explicit `validator_id`, then a `val-<sha3/8>`
    /// fingerprint of the public key. Auto-generation is the bootstrap's
    /// decision, not this method's.
    pub fn resolve_validator_id(&self) -> Result<String, ConfigError> {
        if let Some(id) = &self.validator_id {
            return Ok(id.clone());
        }
        if let Some(pk) = &self.validator_public_key {
            let digest = Sha3_256::digest(pk.as_bytes());
            return Ok(format!("val-{}", hex::encode(&digest[..8])));
        }
        Err(ConfigError::MissingIdentity)
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                name: name.to_string(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}
