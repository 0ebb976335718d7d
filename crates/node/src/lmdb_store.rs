//! # LMDB-Backed Durable Store
//!
//! One LMDB environment with named databases:
//!
//! - `reward_claims` — claim id → bincode [`RewardClaim`]
//! - `compliance_events` — `<validator>\x1f<height>` → bincode
//!   [`ComplianceEvent`]
//! - `compliance_last` — validator id → bincode of the most recently
//!   appended event (streak computation reads this instead of scanning)
//!
//! Write transactions give the per-claim read-modify-write atomicity the
//! concurrency model requires: a conditional status update reads, checks
//! and writes inside one `RwTransaction`, so two racing submitters
//! serialize at the store.
//!
//! Claims are never deleted; `Submitted` records are retained for audit.

use lmdb::{Cursor, Database, DatabaseFlags, Environment, Transaction, WriteFlags};
use std::fs;
use std::path::Path;

use vp_common::{ClaimStatus, ComplianceEvent, ComplianceEventType, RewardClaim};

use crate::claims_store::{ClaimsStore, ComplianceStore, StoreError};

/// Separator between validator id and height in compliance keys. Must
/// not occur in validator ids (they are printable identifiers).
const KEY_SEP: char = '\x1f';

/// Map size: 512 MiB is far beyond what claim/compliance records need.
const MAP_SIZE: usize = 512 * 1024 * 1024;

fn backend_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn event_key(validator_id: &str, height: u64) -> Vec<u8> {
    format!("{validator_id}{KEY_SEP}{height:020}").into_bytes()
}

/// Durable store over one LMDB environment.
pub struct LmdbStore {
    env: Environment,
    db_claims: Database,
    db_events: Database,
    db_last: Database,
}

impl LmdbStore {
    /// Opens (or creates) the store under `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(path).map_err(backend_err)?;

        let env = Environment::new()
            .set_max_dbs(4)
            .set_map_size(MAP_SIZE)
            .open(path)
            .map_err(backend_err)?;

        let db_claims = env
            .create_db(Some("reward_claims"), DatabaseFlags::empty())
            .map_err(backend_err)?;
        let db_events = env
            .create_db(Some("compliance_events"), DatabaseFlags::empty())
            .map_err(backend_err)?;
        let db_last = env
            .create_db(Some("compliance_last"), DatabaseFlags::empty())
            .map_err(backend_err)?;

        Ok(Self {
            env,
            db_claims,
            db_events,
            db_last,
        })
    }

    /// Reads and decodes a claim inside an existing transaction.
    fn read_claim<T: Transaction>(
        &self,
        txn: &T,
        claim_id: &str,
    ) -> Result<Option<RewardClaim>, StoreError> {
        match txn.get(self.db_claims, &claim_id.as_bytes()) {
            Ok(bytes) => bincode::deserialize(bytes).map(Some).map_err(backend_err),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(backend_err(e)),
        }
    }
}

impl ClaimsStore for LmdbStore {
    fn persist_claim(&self, claim: &RewardClaim) -> Result<(), StoreError> {
        let mut txn = self.env.begin_rw_txn().map_err(backend_err)?;
        // Insert-if-absent: an existing record wins.
        if self.read_claim(&txn, &claim.claim_id)?.is_some() {
            return Ok(());
        }
        let blob = bincode::serialize(claim).map_err(backend_err)?;
        txn.put(
            self.db_claims,
            &claim.claim_id.as_bytes(),
            &blob,
            WriteFlags::empty(),
        )
        .map_err(backend_err)?;
        txn.commit().map_err(backend_err)
    }

    fn get_claim(&self, claim_id: &str) -> Result<Option<RewardClaim>, StoreError> {
        let txn = self.env.begin_ro_txn().map_err(backend_err)?;
        self.read_claim(&txn, claim_id)
    }

    fn list_unsettled(&self) -> Result<Vec<RewardClaim>, StoreError> {
        let txn = self.env.begin_ro_txn().map_err(backend_err)?;
        let mut cursor = txn.open_ro_cursor(self.db_claims).map_err(backend_err)?;
        let mut claims = Vec::new();
        for (_key, val) in cursor.iter() {
            let claim: RewardClaim = bincode::deserialize(val).map_err(backend_err)?;
            if claim.status.is_unsettled() {
                claims.push(claim);
            }
        }
        Ok(claims)
    }

    fn mark_submitted(
        &self,
        claim_id: &str,
        tx_ref: Option<&str>,
        now: u64,
    ) -> Result<(), StoreError> {
        let mut txn = self.env.begin_rw_txn().map_err(backend_err)?;
        let mut claim = self
            .read_claim(&txn, claim_id)?
            .ok_or_else(|| StoreError::NotFound(claim_id.to_string()))?;
        if claim.status == ClaimStatus::Submitted {
            return Err(StoreError::AlreadySubmitted(claim_id.to_string()));
        }
        claim.status = ClaimStatus::Submitted;
        claim.settlement_tx_ref = tx_ref.map(str::to_string);
        claim.last_attempt_at = Some(now);
        claim.updated_at = now;

        let blob = bincode::serialize(&claim).map_err(backend_err)?;
        txn.put(self.db_claims, &claim_id.as_bytes(), &blob, WriteFlags::empty())
            .map_err(backend_err)?;
        txn.commit().map_err(backend_err)
    }

    fn mark_failed(&self, claim_id: &str, error: &str, now: u64) -> Result<(), StoreError> {
        let mut txn = self.env.begin_rw_txn().map_err(backend_err)?;
        let mut claim = self
            .read_claim(&txn, claim_id)?
            .ok_or_else(|| StoreError::NotFound(claim_id.to_string()))?;
        if claim.status == ClaimStatus::Submitted {
            return Err(StoreError::AlreadySubmitted(claim_id.to_string()));
        }
        claim.status = ClaimStatus::Failed;
        claim.last_error = Some(error.to_string());
        claim.attempts = claim.attempts.saturating_add(1);
        claim.last_attempt_at = Some(now);
        claim.updated_at = now;

        let blob = bincode::serialize(&claim).map_err(backend_err)?;
        txn.put(self.db_claims, &claim_id.as_bytes(), &blob, WriteFlags::empty())
            .map_err(backend_err)?;
        txn.commit().map_err(backend_err)
    }
}

impl ComplianceStore for LmdbStore {
    fn append_event(&self, event: &ComplianceEvent) -> Result<bool, StoreError> {
        let key = event_key(&event.validator_id, event.block_height);
        let mut txn = self.env.begin_rw_txn().map_err(backend_err)?;

        match txn.get(self.db_events, &key) {
            Ok(_) => return Ok(false), // duplicate (validator, height)
            Err(lmdb::Error::NotFound) => {}
            Err(e) => return Err(backend_err(e)),
        }

        let blob = bincode::serialize(event).map_err(backend_err)?;
        txn.put(self.db_events, &key, &blob, WriteFlags::empty())
            .map_err(backend_err)?;
        txn.put(
            self.db_last,
            &event.validator_id.as_bytes(),
            &blob,
            WriteFlags::empty(),
        )
        .map_err(backend_err)?;
        txn.commit().map_err(backend_err)?;
        Ok(true)
    }

    fn count_by_era(
        &self,
        validator_id: &str,
        era_id: u64,
        event_type: ComplianceEventType,
    ) -> Result<u64, StoreError> {
        let prefix = format!("{validator_id}{KEY_SEP}").into_bytes();
        let txn = self.env.begin_ro_txn().map_err(backend_err)?;
        let mut cursor = txn.open_ro_cursor(self.db_events).map_err(backend_err)?;
        let mut count = 0u64;
        for (key, val) in cursor.iter() {
            if !key.starts_with(&prefix) {
                continue;
            }
            let event: ComplianceEvent = bincode::deserialize(val).map_err(backend_err)?;
            if event.era_id == era_id && event.event_type == event_type {
                count += 1;
            }
        }
        Ok(count)
    }

    fn max_consecutive(&self, validator_id: &str) -> Result<u32, StoreError> {
        let prefix = format!("{validator_id}{KEY_SEP}").into_bytes();
        let txn = self.env.begin_ro_txn().map_err(backend_err)?;
        let mut cursor = txn.open_ro_cursor(self.db_events).map_err(backend_err)?;
        let mut max = 0u32;
        for (key, val) in cursor.iter() {
            if !key.starts_with(&prefix) {
                continue;
            }
            let event: ComplianceEvent = bincode::deserialize(val).map_err(backend_err)?;
            if event.consecutive_count > max {
                max = event.consecutive_count;
            }
        }
        Ok(max)
    }

    fn last_event_for(&self, validator_id: &str) -> Result<Option<ComplianceEvent>, StoreError> {
        let txn = self.env.begin_ro_txn().map_err(backend_err)?;
        match txn.get(self.db_last, &validator_id.as_bytes()) {
            Ok(bytes) => bincode::deserialize(bytes).map(Some).map_err(backend_err),
            Err(lmdb::Error::NotFound) => Ok(None),
            Err(e) => Err(backend_err(e)),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════════
