//! Real-time room and admin notifications.
//!
//! Publishing is fire-and-forget: [`Broadcaster`] spawns each delivery and
//! logs failures, so a slow or broken notifier never holds up settlement.

use crate::clock::{PeriodInfo, PeriodKey};
use crate::errors::BroadcastError;
use crate::exposure::ExposureSnapshot;
use crate::games::{GameKind, Outcome, VrfBundle};
use crate::selector::ResultSource;
use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Topic {
    Room { game: GameKind, duration: u32 },
    AdminMonitor,
}

impl Topic {
    pub fn room(key: &PeriodKey) -> Self {
        Topic::Room {
            game: key.game,
            duration: key.duration,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BroadcastMessage {
    #[serde(rename = "countdown")]
    Countdown {
        period: PeriodKey,
        remaining_secs: u64,
        betting_open: bool,
    },

    /// Coarse totals only; per-bucket liabilities stay internal
    #[serde(rename = "exposure_summary")]
    ExposureSummary {
        period: PeriodKey,
        total_bet: u64,
        bet_count: u64,
        unique_bettors: u64,
        worst_case_liability: u64,
    },

    #[serde(rename = "period_result")]
    PeriodResult {
        period: PeriodKey,
        outcome: Outcome,
        source: ResultSource,
        vrf: Option<VrfBundle>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: Topic,
    pub message: BroadcastMessage,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, topic: Topic, message: BroadcastMessage) -> Result<(), BroadcastError>;
}

/// In-process fan-out over a tokio broadcast channel
pub struct ChannelNotifier {
    sender: broadcast::Sender<Envelope>,
}

impl ChannelNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every envelope; callers filter by topic
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn publish(&self, topic: Topic, message: BroadcastMessage) -> Result<(), BroadcastError> {
        self.sender
            .send(Envelope { topic, message })
            .map(|_| ())
            .map_err(|_| BroadcastError::NoSubscribers(format!("{:?}", topic)))
    }
}

pub struct Broadcaster {
    notifier: Arc<dyn Notifier>,
    min_exposure_interval: Duration,
    last_exposure: DashMap<Topic, Instant>,
}

impl Broadcaster {
    pub fn new(notifier: Arc<dyn Notifier>, min_exposure_interval: Duration) -> Self {
        Self {
            notifier,
            min_exposure_interval,
            last_exposure: DashMap::new(),
        }
    }

    fn spawn_publish(&self, topic: Topic, message: BroadcastMessage) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            match notifier.publish(topic, message).await {
                Ok(()) => {}
                Err(BroadcastError::NoSubscribers(t)) => debug!(topic = %t, "no subscribers"),
                Err(e) => warn!(?topic, error = %e, "⚠️ Broadcast failed"),
            }
        });
    }

    pub fn countdown(&self, info: &PeriodInfo) {
        self.spawn_publish(
            Topic::room(&info.key),
            BroadcastMessage::Countdown {
                period: info.key,
                remaining_secs: info.time_remaining.as_secs(),
                betting_open: info.betting_open,
            },
        );
    }

    /// Returns false when the room was updated too recently
    pub fn exposure_summary(&self, snapshot: &ExposureSnapshot) -> bool {
        let topic = Topic::room(&snapshot.key);
        let now = Instant::now();
        match self.last_exposure.entry(topic) {
            Entry::Occupied(mut last) => {
                if now.duration_since(*last.get()) < self.min_exposure_interval {
                    return false;
                }
                last.insert(now);
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
            }
        }

        let message = BroadcastMessage::ExposureSummary {
            period: snapshot.key,
            total_bet: snapshot.total_bet,
            bet_count: snapshot.bet_count,
            unique_bettors: snapshot.unique_bettors,
            worst_case_liability: snapshot.worst_case_liability(),
        };
        self.spawn_publish(Topic::AdminMonitor, message.clone());
        self.spawn_publish(topic, message);
        true
    }

    pub fn period_result(
        &self,
        key: PeriodKey,
        outcome: Outcome,
        source: ResultSource,
        vrf: Option<VrfBundle>,
    ) {
        let message = BroadcastMessage::PeriodResult {
            period: key,
            outcome,
            source,
            vrf,
        };
        self.spawn_publish(Topic::AdminMonitor, message.clone());
        self.spawn_publish(Topic::room(&key), message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::PeriodId;

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn publish(&self, _: Topic, _: BroadcastMessage) -> Result<(), BroadcastError> {
            Err(BroadcastError::DeliveryFailed("socket closed".to_string()))
        }
    }

    fn key() -> PeriodKey {
        PeriodKey::new(GameKind::Wingo, 30, PeriodId::from_raw(2026101700003))
    }

    #[tokio::test]
    async fn test_result_reaches_room_and_admin() {
        let notifier = Arc::new(ChannelNotifier::new(16));
        let mut rx = notifier.subscribe();
        let broadcaster = Broadcaster::new(notifier.clone(), Duration::ZERO);

        broadcaster.period_result(key(), Outcome::Number(2), ResultSource::Vrf, None);

        let mut topics = Vec::new();
        for _ in 0..2 {
            let envelope = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(envelope.message, BroadcastMessage::PeriodResult { .. }));
            topics.push(envelope.topic);
        }
        assert!(topics.contains(&Topic::AdminMonitor));
        assert!(topics.contains(&Topic::Room {
            game: GameKind::Wingo,
            duration: 30
        }));
    }

    #[tokio::test]
    async fn test_exposure_summary_is_throttled() {
        let notifier = Arc::new(ChannelNotifier::new(16));
        let broadcaster = Broadcaster::new(notifier, Duration::from_secs(60));
        let snapshot = ExposureSnapshot::empty(key());

        assert!(broadcaster.exposure_summary(&snapshot));
        assert!(!broadcaster.exposure_summary(&snapshot));
    }

    #[tokio::test]
    async fn test_failures_do_not_propagate() {
        let broadcaster = Broadcaster::new(Arc::new(FailingNotifier), Duration::ZERO);
        broadcaster.period_result(key(), Outcome::Number(1), ResultSource::Vrf, None);
        tokio::task::yield_now().await;
    }

    #[test]
    fn test_message_wire_format() {
        let msg = BroadcastMessage::Countdown {
            period: key(),
            remaining_secs: 12,
            betting_open: true,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"countdown\""));
        assert!(json.contains("\"period_id\":2026101700003"));
    }
}
