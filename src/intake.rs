//! Bet intake and admin overrides.
//!
//! A bet is validated against the clock and the game rules, its stake is
//! debited, the row is persisted and only then does it reach the exposure
//! ledger. If the row cannot be written the stake is credited back under a
//! refund reference.

use crate::{
    broadcast::Broadcaster,
    clock::{self, PeriodId, PeriodKey},
    config::EngineConfig,
    errors::{BetRejection, EngineError, EngineResult, LedgerError, StorageError},
    exposure::ExposureLedger,
    games::{GameKind, Outcome, Predicate},
    lease::LeaseStore,
    ledger::Ledger,
    metrics::EngineMetrics,
    period_store::{BetRecord, OverrideRecord, PeriodRecord, PeriodStore},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetRequest {
    pub user: String,
    pub game: GameKind,
    pub duration: u32,
    pub period_id: PeriodId,
    pub predicate: Predicate,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetReceipt {
    pub bet_id: Uuid,
    pub key: PeriodKey,
    pub amount: u64,
    pub multiplier_bps: u32,
    pub placed_at: DateTime<Utc>,
}

fn rejection_label(rejection: &BetRejection) -> &'static str {
    match rejection {
        BetRejection::UnknownGame(_) => "unknown_game",
        BetRejection::UnknownDuration(_) => "unknown_duration",
        BetRejection::WrongPeriod { .. } => "wrong_period",
        BetRejection::BettingClosed(_) => "betting_closed",
        BetRejection::MalformedPredicate(_) => "malformed_predicate",
        BetRejection::InvalidOutcome { .. } => "invalid_outcome",
        BetRejection::AmountOutOfRange { .. } => "amount_out_of_range",
        BetRejection::LiabilityLimit => "liability_limit",
        BetRejection::InsufficientFunds => "insufficient_funds",
        BetRejection::AlreadyResolved(_) => "already_resolved",
        BetRejection::PeriodBusy(_) => "period_busy",
    }
}

pub struct BetIntake {
    config: Arc<EngineConfig>,
    store: Arc<PeriodStore>,
    exposure: Arc<ExposureLedger>,
    ledger: Arc<dyn Ledger>,
    broadcaster: Arc<Broadcaster>,
    metrics: EngineMetrics,
}

impl BetIntake {
    pub fn new(
        config: Arc<EngineConfig>,
        store: Arc<PeriodStore>,
        exposure: Arc<ExposureLedger>,
        ledger: Arc<dyn Ledger>,
        broadcaster: Arc<Broadcaster>,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            config,
            store,
            exposure,
            ledger,
            broadcaster,
            metrics,
        }
    }

    pub async fn place_bet(&self, request: BetRequest, now: DateTime<Utc>) -> EngineResult<BetReceipt> {
        let result = self.accept(request, now).await;
        match &result {
            Ok(_) => self.metrics.bets_accepted.inc(),
            Err(EngineError::Rejected(rejection)) => {
                debug!(reason = %rejection, "bet rejected");
                self.metrics
                    .bets_rejected
                    .with_label_values(&[rejection_label(rejection)])
                    .inc();
            }
            Err(e) => error!(error = %e, "bet intake failed"),
        }
        result
    }

    async fn accept(&self, request: BetRequest, now: DateTime<Utc>) -> EngineResult<BetReceipt> {
        let game = self
            .config
            .game(request.game)
            .ok_or(BetRejection::UnknownGame(request.game))?;
        if !game.offers(request.duration) {
            return Err(BetRejection::UnknownDuration(request.duration).into());
        }

        let info = clock::current_period(game, request.duration, now)?;
        let key = info.key;
        if key.period_id != request.period_id {
            return Err(BetRejection::WrongPeriod {
                requested: request.period_id.to_string(),
                current: key.period_id.to_string(),
            }
            .into());
        }
        if !info.betting_open {
            return Err(BetRejection::BettingClosed(key.to_string()).into());
        }

        request
            .game
            .validate_predicate(&request.predicate)
            .map_err(BetRejection::MalformedPredicate)?;
        if request.amount < game.min_bet || request.amount > game.max_bet {
            return Err(BetRejection::AmountOutOfRange {
                amount: request.amount,
                min: game.min_bet,
                max: game.max_bet,
            }
            .into());
        }
        if let Some(cap) = game.max_period_liability {
            let projected = self
                .exposure
                .projected_worst_case(key, &request.predicate, request.amount);
            if projected > cap {
                return Err(BetRejection::LiabilityLimit.into());
            }
        }

        let bet = BetRecord {
            bet_id: Uuid::new_v4(),
            user: request.user,
            key,
            predicate: request.predicate,
            amount: request.amount,
            multiplier_bps: request.game.max_multiplier(&request.predicate).0,
            placed_at: now,
            settlement: None,
        };

        let stake_ref = format!("{}:stake", bet.bet_id);
        match self.ledger.debit(&bet.user, bet.amount, &stake_ref).await {
            Ok(()) => {}
            Err(LedgerError::InsufficientFunds { .. }) => {
                return Err(BetRejection::InsufficientFunds.into())
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.store.store_bet(&bet) {
            let refund_ref = format!("{}:refund", bet.bet_id);
            if let Err(refund_err) = self.ledger.credit(&bet.user, bet.amount, &refund_ref).await {
                error!(
                    bet_id = %bet.bet_id,
                    user = %bet.user,
                    error = %refund_err,
                    "stake refund failed after persistence error"
                );
            }
            return Err(e.into());
        }

        self.exposure
            .record_bet(key, &bet.user, &bet.predicate, bet.amount);
        self.broadcaster
            .exposure_summary(&self.exposure.snapshot(key));

        Ok(BetReceipt {
            bet_id: bet.bet_id,
            key,
            amount: bet.amount,
            multiplier_bps: bet.multiplier_bps,
            placed_at: now,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminOverrideRequest {
    pub game: GameKind,
    pub duration: u32,
    pub period_id: PeriodId,
    pub outcome: Outcome,
    pub admin_id: String,
}

/// Operator-forced results, accepted only while a period is still running
pub struct AdminOverrides {
    config: Arc<EngineConfig>,
    store: Arc<PeriodStore>,
    leases: Arc<dyn LeaseStore>,
    metrics: EngineMetrics,
}

impl AdminOverrides {
    pub fn new(
        config: Arc<EngineConfig>,
        store: Arc<PeriodStore>,
        leases: Arc<dyn LeaseStore>,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            config,
            store,
            leases,
            metrics,
        }
    }

    pub async fn set_override(
        &self,
        request: AdminOverrideRequest,
        now: DateTime<Utc>,
    ) -> EngineResult<PeriodRecord> {
        let game = self
            .config
            .game(request.game)
            .ok_or(BetRejection::UnknownGame(request.game))?;
        if !game.offers(request.duration) {
            return Err(BetRejection::UnknownDuration(request.duration).into());
        }
        let key = PeriodKey::new(request.game, request.duration, request.period_id);
        let info = clock::period_info(game, key, now)?;

        request
            .game
            .validate_outcome(&request.outcome)
            .map_err(|reason| BetRejection::InvalidOutcome {
                game: request.game,
                reason,
            })?;

        if self
            .store
            .load_period(&key)?
            .map_or(false, |row| row.is_resolved())
        {
            return Err(BetRejection::AlreadyResolved(key.to_string()).into());
        }
        // Settlement may already be paying winners once the period is over
        if info.has_ended(now) {
            return Err(BetRejection::PeriodBusy(key.to_string()).into());
        }

        let lease_key = key.to_string();
        let token = format!("admin:{}:{}", request.admin_id, Uuid::new_v4());
        if !self
            .leases
            .try_acquire(&lease_key, &token, self.config.lease_ttl())
            .await?
        {
            return Err(BetRejection::PeriodBusy(key.to_string()).into());
        }

        let record = OverrideRecord {
            outcome: request.outcome,
            admin_id: request.admin_id.clone(),
            set_at: now,
        };
        let stored = self.store.store_override(key, info.start, info.end, record);

        if let Err(e) = self.leases.release(&lease_key, &token).await {
            warn!(period = %key, error = %e, "lease release failed; it will expire");
        }

        let row = match stored {
            Ok(row) => row,
            Err(StorageError::AlreadyResolved(k)) => return Err(BetRejection::AlreadyResolved(k).into()),
            Err(e) => return Err(e.into()),
        };

        self.metrics.overrides.inc();
        warn!(
            period = %key,
            admin_id = %request.admin_id,
            outcome = %request.outcome,
            "📝 Admin override stored"
        );
        Ok(row)
    }
}
