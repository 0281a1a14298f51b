//! Durable period and bet rows in RocksDB.
//!
//! Rows are JSON, keyed by prefix so one period's bets come back with a single
//! prefix scan. A settlement is one `WriteBatch`: the resolved period row and
//! every settled bet row commit together or not at all.

use crate::{
    clock::PeriodKey,
    errors::{EngineError, EngineResult, StorageError},
    games::{Outcome, Predicate, VrfBundle},
    selector::ResultSource,
    storage::OptimizedStorage,
};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

const PERIOD_PREFIX: &str = "period:";
const BET_PREFIX: &str = "bet:";
const VRF_SEED_KEY: &[u8] = b"vrf:mini_secret_seed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeriodStatus {
    Locked,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub outcome: Outcome,
    pub admin_id: String,
    pub set_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub outcome: Outcome,
    pub source: ResultSource,
    pub vrf: Option<VrfBundle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRecord {
    pub key: PeriodKey,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: PeriodStatus,
    #[serde(default)]
    pub override_outcome: Option<OverrideRecord>,
    #[serde(default)]
    pub resolution: Option<Resolution>,
    pub total_bet_amount: u64,
    pub total_payout_amount: u64,
    pub unique_bettor_count: u64,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl PeriodRecord {
    pub fn locked(key: PeriodKey, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            key,
            start,
            end,
            status: PeriodStatus::Locked,
            override_outcome: None,
            resolution: None,
            total_bet_amount: 0,
            total_payout_amount: 0,
            unique_bettor_count: 0,
            resolved_at: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status == PeriodStatus::Resolved
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetSettlement {
    pub won: bool,
    pub payout: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetRecord {
    pub bet_id: Uuid,
    pub user: String,
    pub key: PeriodKey,
    pub predicate: Predicate,
    pub amount: u64,
    /// Best-case multiplier quoted at placement; display only
    pub multiplier_bps: u32,
    pub placed_at: DateTime<Utc>,
    #[serde(default)]
    pub settlement: Option<BetSettlement>,
}

fn period_row_key(key: &PeriodKey) -> Vec<u8> {
    format!("{}{}", PERIOD_PREFIX, key).into_bytes()
}

fn bet_prefix(key: &PeriodKey) -> String {
    format!("{}{}:", BET_PREFIX, key)
}

fn bet_row_key(key: &PeriodKey, bet_id: &Uuid) -> Vec<u8> {
    format!("{}{}", bet_prefix(key), bet_id).into_bytes()
}

fn encode<T: Serialize>(what: &str, value: &T) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec(value)
        .map_err(|e| StorageError::WriteFailed(format!("Failed to encode {}: {}", what, e)))
}

fn decode<T: DeserializeOwned>(what: &str, bytes: &[u8]) -> Result<T, StorageError> {
    serde_json::from_slice(bytes)
        .map_err(|e| StorageError::CorruptedData(format!("Failed to decode {}: {}", what, e)))
}

pub struct PeriodStore {
    storage: OptimizedStorage,
    /// Serializes read-check-write on period rows inside this process
    commit_lock: Mutex<()>,
    #[cfg(test)]
    failing_commits: std::sync::atomic::AtomicU32,
}

impl PeriodStore {
    pub fn new(storage: OptimizedStorage) -> Self {
        Self {
            storage,
            commit_lock: Mutex::new(()),
            #[cfg(test)]
            failing_commits: std::sync::atomic::AtomicU32::new(0),
        }
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>, StorageError> {
        self.commit_lock
            .lock()
            .map_err(|_| StorageError::WriteFailed("commit lock poisoned".to_string()))
    }

    pub fn load_period(&self, key: &PeriodKey) -> Result<Option<PeriodRecord>, StorageError> {
        match self.storage.get(&period_row_key(key))? {
            Some(bytes) => Ok(Some(decode(&format!("period {}", key), &bytes)?)),
            None => Ok(None),
        }
    }

    /// Store (or replace) the override for an unresolved period
    pub fn store_override(
        &self,
        key: PeriodKey,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        record: OverrideRecord,
    ) -> Result<PeriodRecord, StorageError> {
        let _guard = self.guard()?;
        let mut row = self
            .load_period(&key)?
            .unwrap_or_else(|| PeriodRecord::locked(key, start, end));
        if row.is_resolved() {
            return Err(StorageError::AlreadyResolved(key.to_string()));
        }
        row.override_outcome = Some(record);
        self.storage
            .put(&period_row_key(&key), &encode("period", &row)?)?;
        Ok(row)
    }

    pub fn store_bet(&self, bet: &BetRecord) -> Result<(), StorageError> {
        self.storage
            .put(&bet_row_key(&bet.key, &bet.bet_id), &encode("bet", bet)?)
    }

    pub fn load_bets(&self, key: &PeriodKey) -> Result<Vec<BetRecord>, StorageError> {
        self.storage
            .scan_prefix(bet_prefix(key).as_bytes())?
            .into_iter()
            .map(|(_, value)| decode("bet", &value))
            .collect()
    }

    /// Atomically persist a resolved period with its settled bets.
    ///
    /// Refuses to overwrite a row that is already `Resolved`.
    pub fn commit_settlement(&self, period: &PeriodRecord, bets: &[BetRecord]) -> Result<(), StorageError> {
        let _guard = self.guard()?;
        if let Some(existing) = self.load_period(&period.key)? {
            if existing.is_resolved() {
                return Err(StorageError::AlreadyResolved(period.key.to_string()));
            }
        }

        #[cfg(test)]
        {
            use std::sync::atomic::Ordering;
            if self
                .failing_commits
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StorageError::WriteFailed("injected commit failure".to_string()));
            }
        }

        let mut items: Vec<(Vec<u8>, Vec<u8>)> = Vec::with_capacity(bets.len() + 1);
        items.push((period_row_key(&period.key), encode("period", period)?));
        for bet in bets {
            items.push((bet_row_key(&bet.key, &bet.bet_id), encode("bet", bet)?));
        }
        self.storage.batch_write(&items)
    }

    /// Make the next `n` commits fail before anything is written
    #[cfg(test)]
    pub(crate) fn fail_next_commits(&self, n: u32) {
        self.failing_commits
            .store(n, std::sync::atomic::Ordering::SeqCst);
    }

    /// Operator VRF seed, generated once and kept alongside the data
    pub fn load_or_create_vrf_seed(&self) -> EngineResult<[u8; 32]> {
        if let Some(existing) = self.storage.get(VRF_SEED_KEY)? {
            return existing.try_into().map_err(|_| {
                EngineError::Storage(StorageError::CorruptedData(
                    "VRF seed must be 32 bytes".to_string(),
                ))
            });
        }

        use rand_core::{OsRng, RngCore};
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        self.storage.put(VRF_SEED_KEY, &seed)?;
        Ok(seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::PeriodId;
    use crate::games::GameKind;
    use tempfile::TempDir;

    fn store() -> (TempDir, PeriodStore) {
        let dir = TempDir::new().unwrap();
        let storage = OptimizedStorage::new(dir.path()).unwrap();
        (dir, PeriodStore::new(storage))
    }

    fn key(seq: u64) -> PeriodKey {
        PeriodKey::new(GameKind::Wingo, 60, PeriodId::from_raw(2026101700000 + seq))
    }

    fn bet(key: PeriodKey, user: &str, amount: u64) -> BetRecord {
        BetRecord {
            bet_id: Uuid::new_v4(),
            user: user.to_string(),
            key,
            predicate: Predicate::Number { value: 1 },
            amount,
            multiplier_bps: 90_000,
            placed_at: Utc::now(),
            settlement: None,
        }
    }

    #[test]
    fn test_bets_are_scoped_to_their_period() {
        let (_dir, store) = store();
        store.store_bet(&bet(key(1), "a", 10)).unwrap();
        store.store_bet(&bet(key(1), "b", 20)).unwrap();
        store.store_bet(&bet(key(10), "c", 30)).unwrap();

        let bets = store.load_bets(&key(1)).unwrap();
        assert_eq!(bets.len(), 2);
        assert_eq!(bets.iter().map(|b| b.amount).sum::<u64>(), 30);
    }

    #[test]
    fn test_commit_refuses_second_resolution() {
        let (_dir, store) = store();
        let now = Utc::now();
        let mut row = PeriodRecord::locked(key(2), now, now);
        row.status = PeriodStatus::Resolved;
        row.resolution = Some(Resolution {
            outcome: Outcome::Number(4),
            source: ResultSource::Vrf,
            vrf: None,
        });

        store.commit_settlement(&row, &[]).unwrap();
        assert!(matches!(
            store.commit_settlement(&row, &[]),
            Err(StorageError::AlreadyResolved(_))
        ));
        assert!(store.load_period(&key(2)).unwrap().unwrap().is_resolved());
    }

    #[test]
    fn test_failed_commit_writes_nothing() {
        let (_dir, store) = store();
        let now = Utc::now();
        let mut settled = bet(key(3), "a", 10);
        store.store_bet(&settled).unwrap();
        settled.settlement = Some(BetSettlement { won: true, payout: 90 });

        let mut row = PeriodRecord::locked(key(3), now, now);
        row.status = PeriodStatus::Resolved;
        store.fail_next_commits(1);
        assert!(store.commit_settlement(&row, &[settled.clone()]).is_err());
        assert!(store.load_period(&key(3)).unwrap().is_none());
        assert_eq!(store.load_bets(&key(3)).unwrap()[0].settlement, None);

        store.commit_settlement(&row, &[settled]).unwrap();
        assert!(store.load_bets(&key(3)).unwrap()[0].settlement.is_some());
    }

    #[test]
    fn test_override_rejected_after_resolution() {
        let (_dir, store) = store();
        let now = Utc::now();
        let record = OverrideRecord {
            outcome: Outcome::Number(9),
            admin_id: "ops".to_string(),
            set_at: now,
        };
        let row = store.store_override(key(4), now, now, record.clone()).unwrap();
        assert_eq!(row.override_outcome.as_ref(), Some(&record));

        let mut resolved = row;
        resolved.status = PeriodStatus::Resolved;
        store.commit_settlement(&resolved, &[]).unwrap();
        assert!(matches!(
            store.store_override(key(4), now, now, record),
            Err(StorageError::AlreadyResolved(_))
        ));
    }

    #[test]
    fn test_vrf_seed_is_stable() {
        let (_dir, store) = store();
        let a = store.load_or_create_vrf_seed().unwrap();
        let b = store.load_or_create_vrf_seed().unwrap();
        assert_eq!(a, b);
    }
}
