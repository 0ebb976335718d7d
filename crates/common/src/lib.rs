//! # VP-Node Common Crate
//!
//! Shared domain records and configuration for the validator participant
//! node ("VP-Node").
//!
//! ## Modules
//! - `config`: environment / TOML configuration loading
//! - `claim`: reward-claim records and fee allocations
//! - `compliance`: consensus-compliance event records
//! - `alert`: operator alerts and webhook payload formatting
//!
//! Everything in this crate is plain data plus pure functions. All I/O
//! (stores, HTTP, timers) lives in the `vp-node` crate.

pub mod alert;
pub mod claim;
pub mod compliance;
pub mod config;

pub use alert::{create_discord_payload, AlertLevel, OperatorAlert};
pub use claim::{ClaimStatus, FeeAllocation, JobResult, RewardClaim};
pub use compliance::{ComplianceEvent, ComplianceEventType};
pub use config::{ConfigError, NodeConfig};

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
