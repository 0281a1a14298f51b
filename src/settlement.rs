//! Period settlement.
//!
//! One worker resolves a period: it takes the period lease, re-checks the
//! durable row, selects the result, pays winners through the ledger with
//! per-bet reference ids, and commits the resolved row with every settled
//! bet in one batch. Any failure leaves the period Locked; because the draw
//! is deterministic and credits are idempotent, the next attempt repeats the
//! same work without paying twice.

use crate::{
    broadcast::Broadcaster,
    clock::{self, PeriodInfo, PeriodKey},
    config::EngineConfig,
    errors::{ConfigurationError, EngineResult, LeaseError, SelectionError, StorageError},
    exposure::{ExposureBook, ExposureLedger},
    games::{Outcome, VrfBundle},
    lease::LeaseStore,
    ledger::Ledger,
    metrics::EngineMetrics,
    period_store::{BetSettlement, PeriodRecord, PeriodStatus, PeriodStore, Resolution},
    selector::{ResultSelector, ResultSource},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementSummary {
    pub key: PeriodKey,
    pub outcome: Outcome,
    pub source: ResultSource,
    pub vrf: Option<VrfBundle>,
    pub bet_count: usize,
    pub winning_bets: usize,
    pub unique_bettors: u64,
    pub total_bet: u64,
    pub total_payout: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    Settled(SettlementSummary),
    AlreadyResolved,
    /// Another worker holds the lease
    Contended,
    NotEnded,
}

pub struct SettlementCoordinator {
    worker_id: String,
    config: Arc<EngineConfig>,
    store: Arc<PeriodStore>,
    exposure: Arc<ExposureLedger>,
    selector: Arc<ResultSelector>,
    ledger: Arc<dyn Ledger>,
    leases: Arc<dyn LeaseStore>,
    broadcaster: Arc<Broadcaster>,
    metrics: EngineMetrics,
}

impl SettlementCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_id: impl Into<String>,
        config: Arc<EngineConfig>,
        store: Arc<PeriodStore>,
        exposure: Arc<ExposureLedger>,
        selector: Arc<ResultSelector>,
        ledger: Arc<dyn Ledger>,
        leases: Arc<dyn LeaseStore>,
        broadcaster: Arc<Broadcaster>,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            config,
            store,
            exposure,
            selector,
            ledger,
            leases,
            broadcaster,
            metrics,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub async fn settle(&self, key: PeriodKey, now: DateTime<Utc>) -> EngineResult<SettleOutcome> {
        let game = self.config.game(key.game).ok_or_else(|| {
            ConfigurationError::ValidationFailed(format!("game {} is not configured", key.game))
        })?;
        let info = clock::period_info(game, key, now)?;
        if !info.has_ended(now) {
            return Ok(SettleOutcome::NotEnded);
        }

        let lease_key = key.to_string();
        let token = format!("{}:{}", self.worker_id, Uuid::new_v4());
        if !self
            .leases
            .try_acquire(&lease_key, &token, self.config.lease_ttl())
            .await?
        {
            self.metrics.lock_contention.inc();
            debug!(period = %key, worker = %self.worker_id, "lease held elsewhere");
            return Ok(SettleOutcome::Contended);
        }

        let result = self.settle_locked(key, &info, &lease_key, &token).await;

        if let Err(e) = self.leases.release(&lease_key, &token).await {
            warn!(period = %key, error = %e, "lease release failed; it will expire");
        }

        match result {
            Ok(SettleOutcome::Settled(summary)) => {
                self.metrics.settlements.inc();
                self.broadcaster.period_result(
                    key,
                    summary.outcome,
                    summary.source.clone(),
                    summary.vrf.clone(),
                );
                self.exposure.evict(&key);
                Ok(SettleOutcome::Settled(summary))
            }
            Ok(other) => {
                if other == SettleOutcome::AlreadyResolved {
                    self.exposure.evict(&key);
                }
                Ok(other)
            }
            Err(e) => {
                error!(
                    period = %key,
                    worker = %self.worker_id,
                    kind = e.kind(),
                    error = %e,
                    "❌ Settlement failed; period stays locked"
                );
                self.metrics
                    .settlement_failures
                    .with_label_values(&[e.kind()])
                    .inc();
                Err(e)
            }
        }
    }

    async fn settle_locked(
        &self,
        key: PeriodKey,
        info: &PeriodInfo,
        lease_key: &str,
        token: &str,
    ) -> EngineResult<SettleOutcome> {
        let existing = self.store.load_period(&key)?;
        if existing.as_ref().map_or(false, PeriodRecord::is_resolved) {
            return Ok(SettleOutcome::AlreadyResolved);
        }

        let bets = self.store.load_bets(&key)?;
        let replayed = ExposureBook::replay(
            key.game,
            bets.iter().map(|b| (b.user.as_str(), &b.predicate, b.amount)),
        )
        .snapshot(key);

        let live = self.exposure.snapshot(key);
        if live.bet_count > 0 && live.liabilities != replayed.liabilities {
            warn!(
                period = %key,
                live_bets = live.bet_count,
                persisted_bets = replayed.bet_count,
                "live exposure differs from persisted bets; settling from persisted"
            );
        }

        let override_record = existing.as_ref().and_then(|r| r.override_outcome.as_ref());
        let selection =
            self.selector
                .select_result(key, override_record, &replayed, replayed.unique_bettors)?;

        let mut settled = Vec::with_capacity(bets.len());
        let mut total_payout = 0u64;
        let mut winning_bets = 0usize;
        for mut bet in bets {
            let payout = key
                .game
                .evaluate(&bet.predicate, &selection.outcome)
                .map(|m| m.payout(bet.amount));
            if let Some(p) = payout {
                total_payout = total_payout.saturating_add(p);
                winning_bets += 1;
            }
            bet.settlement = Some(BetSettlement {
                won: payout.is_some(),
                payout: payout.unwrap_or(0),
            });
            settled.push(bet);
        }

        let expected = replayed.liability_of(&selection.outcome).ok_or_else(|| {
            SelectionError::IndexCorrupted(format!("no bucket for {}", selection.outcome))
        })?;
        if expected != total_payout {
            return Err(SelectionError::ExposureMismatch {
                period: key.to_string(),
                payout: total_payout,
                exposure: expected,
            }
            .into());
        }

        for bet in &settled {
            let Some(BetSettlement { won: true, payout }) = bet.settlement else {
                continue;
            };
            if payout == 0 {
                continue;
            }
            let reference = format!("{}:{}:payout", key, bet.bet_id);
            self.ledger.credit(&bet.user, payout, &reference).await?;
        }

        if !self.leases.is_held_by(lease_key, token).await? {
            return Err(LeaseError::Lost {
                key: lease_key.to_string(),
                holder: token.to_string(),
            }
            .into());
        }

        let mut row = existing.unwrap_or_else(|| PeriodRecord::locked(key, info.start, info.end));
        row.status = PeriodStatus::Resolved;
        row.resolution = Some(Resolution {
            outcome: selection.outcome,
            source: selection.source.clone(),
            vrf: selection.vrf.clone(),
        });
        row.total_bet_amount = replayed.total_bet;
        row.total_payout_amount = total_payout;
        row.unique_bettor_count = replayed.unique_bettors;
        row.resolved_at = Some(Utc::now());

        match self.store.commit_settlement(&row, &settled) {
            Ok(()) => {}
            Err(StorageError::AlreadyResolved(_)) => return Ok(SettleOutcome::AlreadyResolved),
            Err(e) => return Err(e.into()),
        }

        info!(
            period = %key,
            outcome = %selection.outcome,
            bets = settled.len(),
            winners = winning_bets,
            total_bet = replayed.total_bet,
            total_payout,
            worker = %self.worker_id,
            "✅ Period settled"
        );

        Ok(SettleOutcome::Settled(SettlementSummary {
            key,
            outcome: selection.outcome,
            source: selection.source,
            vrf: selection.vrf,
            bet_count: settled.len(),
            winning_bets,
            unique_bettors: replayed.unique_bettors,
            total_bet: replayed.total_bet,
            total_payout,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EngineError;
    use crate::factory::{Engine, EngineFactory};
    use crate::games::{GameKind, Predicate};
    use crate::intake::BetRequest;
    use crate::ledger::InMemoryLedger;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    async fn engine() -> (TempDir, Engine, Arc<InMemoryLedger>) {
        let dir = TempDir::new().unwrap();
        let mut config = EngineConfig::testing();
        config.storage.data_directory = dir.path().join("db").display().to_string();
        config.vrf.seed_hex = Some(hex::encode([9u8; 32]));
        let ledger = Arc::new(InMemoryLedger::new());
        let engine = EngineFactory::create_in_memory(config, ledger.clone()).unwrap();
        (dir, engine, ledger)
    }

    async fn place_everything(engine: &Engine, ledger: &InMemoryLedger, now: DateTime<Utc>) -> PeriodKey {
        let game = engine.config.game(GameKind::Wingo).unwrap();
        let info = clock::current_period(game, 60, now).unwrap();
        let intake = engine.intake();
        for n in 0..10u8 {
            let user = format!("user-{}", n);
            ledger.deposit(&user, 1_000);
            intake
                .place_bet(
                    BetRequest {
                        user,
                        game: GameKind::Wingo,
                        duration: 60,
                        period_id: info.key.period_id,
                        predicate: Predicate::Number { value: n },
                        amount: 100,
                    },
                    now,
                )
                .await
                .unwrap();
        }
        info.key
    }

    fn placed_at() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-17T10:15:10Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn after_end(key: PeriodKey, engine: &Engine) -> DateTime<Utc> {
        let game = engine.config.game(key.game).unwrap();
        clock::period_info(game, key, Utc::now()).unwrap().end + ChronoDuration::seconds(1)
    }

    #[tokio::test]
    async fn test_not_ended_period_is_left_alone() {
        let (_dir, engine, ledger) = engine().await;
        let now = placed_at();
        let key = place_everything(&engine, &ledger, now).await;
        let outcome = engine.coordinator("w1").settle(key, now).await.unwrap();
        assert_eq!(outcome, SettleOutcome::NotEnded);
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_period_locked_and_retries() {
        let (_dir, engine, ledger) = engine().await;
        let key = place_everything(&engine, &ledger, placed_at()).await;
        let later = after_end(key, &engine);
        let coordinator = engine.coordinator("w1");

        engine.store.fail_next_commits(1);
        let err = coordinator.settle(key, later).await.unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));
        assert!(engine.store.load_period(&key).unwrap().is_none());
        assert_eq!(ledger.credits_applied(), 1);

        // Same draw, same references: nobody is paid twice
        let SettleOutcome::Settled(summary) = coordinator.settle(key, later).await.unwrap() else {
            panic!("expected settlement on retry");
        };
        assert_eq!(ledger.credits_applied(), 1);
        assert_eq!(summary.total_payout, 900);
        assert_eq!(summary.winning_bets, 1);
        assert!(engine.store.load_period(&key).unwrap().unwrap().is_resolved());
    }

    #[tokio::test]
    async fn test_held_lease_reports_contention() {
        let (_dir, engine, ledger) = engine().await;
        let key = place_everything(&engine, &ledger, placed_at()).await;
        let later = after_end(key, &engine);

        assert!(engine
            .leases
            .try_acquire(&key.to_string(), "other", std::time::Duration::from_secs(30))
            .await
            .unwrap());
        let outcome = engine.coordinator("w1").settle(key, later).await.unwrap();
        assert_eq!(outcome, SettleOutcome::Contended);
        assert_eq!(engine.metrics.lock_contention.get(), 1);
    }
}
