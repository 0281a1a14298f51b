//! Expiring per-period leases.
//!
//! A lease is a TTL lock with a holder token. Whoever holds it may resolve the
//! period; a crashed holder's lease simply lapses. Multi-process deployments
//! plug a shared backend in behind [`LeaseStore`].

use crate::errors::LeaseError;
use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use std::time::{Duration, Instant};

#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Take the lease if it is free or expired
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool, LeaseError>;

    /// Drop the lease if `holder` still owns it
    async fn release(&self, key: &str, holder: &str) -> Result<(), LeaseError>;

    async fn is_held_by(&self, key: &str, holder: &str) -> Result<bool, LeaseError>;

    /// Whether anyone holds an unexpired lease on `key`
    async fn is_held(&self, key: &str) -> Result<bool, LeaseError>;

    /// Push the expiry out; fails if the lease was lost
    async fn renew(&self, key: &str, holder: &str, ttl: Duration) -> Result<(), LeaseError>;
}

#[derive(Debug, Clone)]
struct Lease {
    holder: String,
    expires_at: Instant,
}

impl Lease {
    fn live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Default)]
pub struct MemoryLeaseStore {
    leases: DashMap<String, Lease>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> Result<bool, LeaseError> {
        let now = Instant::now();
        let fresh = Lease {
            holder: holder.to_string(),
            expires_at: now + ttl,
        };
        match self.leases.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(fresh);
                Ok(true)
            }
            Entry::Occupied(mut slot) => {
                if slot.get().live(now) {
                    return Ok(false);
                }
                tracing::debug!(key, previous = %slot.get().holder, "taking over expired lease");
                slot.insert(fresh);
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str, holder: &str) -> Result<(), LeaseError> {
        self.leases.remove_if(key, |_, lease| lease.holder == holder);
        Ok(())
    }

    async fn is_held_by(&self, key: &str, holder: &str) -> Result<bool, LeaseError> {
        let now = Instant::now();
        Ok(self
            .leases
            .get(key)
            .map(|lease| lease.holder == holder && lease.live(now))
            .unwrap_or(false))
    }

    async fn is_held(&self, key: &str) -> Result<bool, LeaseError> {
        let now = Instant::now();
        Ok(self.leases.get(key).map(|l| l.live(now)).unwrap_or(false))
    }

    async fn renew(&self, key: &str, holder: &str, ttl: Duration) -> Result<(), LeaseError> {
        let now = Instant::now();
        match self.leases.get_mut(key) {
            Some(mut lease) if lease.holder == holder && lease.live(now) => {
                lease.expires_at = now + ttl;
                Ok(())
            }
            _ => Err(LeaseError::Lost {
                key: key.to_string(),
                holder: holder.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_only_one_holder() {
        let store = Arc::new(MemoryLeaseStore::new());
        let ttl = Duration::from_secs(5);
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .try_acquire("wingo:60:2026101700001", &format!("w{}", i), ttl)
                    .await
                    .unwrap()
            }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_expired_lease_is_taken_over() {
        let store = MemoryLeaseStore::new();
        assert!(store.try_acquire("k", "a", Duration::from_millis(20)).await.unwrap());
        assert!(!store.try_acquire("k", "b", Duration::from_secs(5)).await.unwrap());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!store.is_held_by("k", "a").await.unwrap());
        assert!(store.try_acquire("k", "b", Duration::from_secs(5)).await.unwrap());
        assert!(store.renew("k", "a", Duration::from_secs(5)).await.is_err());

        // A stale holder cannot release someone else's lease
        store.release("k", "a").await.unwrap();
        assert!(store.is_held_by("k", "b").await.unwrap());
        store.release("k", "b").await.unwrap();
        assert!(!store.is_held("k").await.unwrap());
    }
}
