//! Balance ledger collaborator.
//!
//! Every movement carries a caller-chosen reference id. Replaying a reference
//! with the same parameters is a no-op, which is what makes settlement retries
//! safe after a crash between paying and committing.

use crate::errors::LedgerError;
use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use std::sync::atomic::{AtomicU64, Ordering};

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Add funds; idempotent by `reference_id`
    async fn credit(&self, user: &str, amount: u64, reference_id: &str) -> Result<(), LedgerError>;

    /// Remove funds; idempotent by `reference_id`
    async fn debit(&self, user: &str, amount: u64, reference_id: &str) -> Result<(), LedgerError>;

    async fn balance(&self, user: &str) -> Result<u64, LedgerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Movement {
    Credit,
    Debit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Applied {
    movement: Movement,
    user: String,
    amount: u64,
}

/// DashMap-backed ledger for tests and dev runs
#[derive(Default)]
pub struct InMemoryLedger {
    balances: DashMap<String, u64>,
    references: DashMap<String, Applied>,
    credits_applied: AtomicU64,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a balance outside the reference scheme
    pub fn deposit(&self, user: &str, amount: u64) {
        let mut balance = self.balances.entry(user.to_string()).or_insert(0);
        *balance = balance.saturating_add(amount);
    }

    /// Number of credits that actually moved money
    pub fn credits_applied(&self) -> u64 {
        self.credits_applied.load(Ordering::SeqCst)
    }

    fn apply(&self, applied: Applied, reference_id: &str) -> Result<(), LedgerError> {
        // The reference entry stays locked until the balance change lands
        match self.references.entry(reference_id.to_string()) {
            Entry::Occupied(existing) => {
                if existing.get() == &applied {
                    Ok(())
                } else {
                    Err(LedgerError::ReferenceConflict(reference_id.to_string()))
                }
            }
            Entry::Vacant(slot) => {
                let mut balance = self.balances.entry(applied.user.clone()).or_insert(0);
                match applied.movement {
                    Movement::Credit => {
                        *balance = balance.saturating_add(applied.amount);
                        self.credits_applied.fetch_add(1, Ordering::SeqCst);
                    }
                    Movement::Debit => {
                        if *balance < applied.amount {
                            return Err(LedgerError::InsufficientFunds {
                                user: applied.user.clone(),
                                balance: *balance,
                                requested: applied.amount,
                            });
                        }
                        *balance -= applied.amount;
                    }
                }
                drop(balance);
                slot.insert(applied);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn credit(&self, user: &str, amount: u64, reference_id: &str) -> Result<(), LedgerError> {
        self.apply(
            Applied {
                movement: Movement::Credit,
                user: user.to_string(),
                amount,
            },
            reference_id,
        )
    }

    async fn debit(&self, user: &str, amount: u64, reference_id: &str) -> Result<(), LedgerError> {
        self.apply(
            Applied {
                movement: Movement::Debit,
                user: user.to_string(),
                amount,
            },
            reference_id,
        )
    }

    async fn balance(&self, user: &str) -> Result<u64, LedgerError> {
        Ok(self.balances.get(user).map(|b| *b).unwrap_or(0))
    }
}
