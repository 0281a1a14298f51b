//! Background settlement worker.
//!
//! Each tick looks at the last few ended periods of every game and duration
//! and tries to settle them. Any number of workers may run side by side; the
//! period lease makes sure only one of them resolves a given period.

use crate::{
    broadcast::Broadcaster,
    clock::{self, PeriodKey},
    config::EngineConfig,
    settlement::{SettleOutcome, SettlementCoordinator},
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub settled: usize,
    pub contended: usize,
    pub failed: usize,
}

pub struct SettlementWorker {
    config: Arc<EngineConfig>,
    coordinator: Arc<SettlementCoordinator>,
    broadcaster: Arc<Broadcaster>,
    countdown: bool,
    running: Arc<AtomicBool>,
}

impl SettlementWorker {
    pub fn new(
        config: Arc<EngineConfig>,
        coordinator: Arc<SettlementCoordinator>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            config,
            coordinator,
            broadcaster,
            countdown: false,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Also publish room countdowns each tick (one worker per deployment)
    pub fn with_countdown(mut self, enabled: bool) -> Self {
        self.countdown = enabled;
        self
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(worker = %self.coordinator.worker_id(), "🚀 Settlement worker started");
            let mut tick = tokio::time::interval(self.config.poll_interval());
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            while self.running.load(Ordering::SeqCst) {
                tick.tick().await;
                let report = self.tick_once(Utc::now()).await;
                if report != TickReport::default() {
                    debug!(
                        worker = %self.coordinator.worker_id(),
                        settled = report.settled,
                        contended = report.contended,
                        failed = report.failed,
                        "settlement tick"
                    );
                }
            }
            info!(worker = %self.coordinator.worker_id(), "Settlement worker stopped");
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Ended periods this tick should look at, newest first
    fn due_periods(&self, now: DateTime<Utc>) -> Vec<PeriodKey> {
        let mut due = Vec::new();
        for game in &self.config.games {
            for &duration in &game.durations {
                let current = match clock::current_period(game, duration, now) {
                    Ok(info) => info,
                    Err(e) => {
                        warn!(game = %game.kind, duration, error = %e, "period lookup failed");
                        continue;
                    }
                };
                if self.countdown && self.config.broadcast.countdown_enabled {
                    self.broadcaster.countdown(&current);
                }

                let mut key = current.key;
                for _ in 0..self.config.settlement.lookback_periods {
                    match clock::previous_period(game, key) {
                        Ok(previous) => {
                            due.push(previous);
                            key = previous;
                        }
                        Err(e) => {
                            warn!(period = %key, error = %e, "previous period lookup failed");
                            break;
                        }
                    }
                }
            }
        }
        due
    }

    pub async fn tick_once(&self, now: DateTime<Utc>) -> TickReport {
        let due = self.due_periods(now);
        let outcomes = join_all(due.iter().map(|&key| self.coordinator.settle(key, now))).await;

        let mut report = TickReport::default();
        for outcome in outcomes {
            match outcome {
                Ok(SettleOutcome::Settled(_)) => report.settled += 1,
                Ok(SettleOutcome::Contended) => report.contended += 1,
                Ok(SettleOutcome::AlreadyResolved) | Ok(SettleOutcome::NotEnded) => {}
                // Already logged and counted by the coordinator
                Err(_) => report.failed += 1,
            }
        }
        report
    }
}
