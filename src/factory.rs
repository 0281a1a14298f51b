//! Engine wiring
//!
//! Centralizes start-up so the CLI, workers and tests build the same object graph.

use crate::{
    broadcast::{Broadcaster, ChannelNotifier, Notifier},
    config::EngineConfig,
    errors::{ConfigurationError, EngineResult, SelectionError},
    exposure::ExposureLedger,
    games::VrfEngine,
    intake::{AdminOverrides, BetIntake},
    lease::{LeaseStore, MemoryLeaseStore},
    ledger::Ledger,
    metrics::EngineMetrics,
    period_store::PeriodStore,
    selector::ResultSelector,
    settlement::SettlementCoordinator,
    storage::OptimizedStorage,
    worker::SettlementWorker,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Shared components of one engine process
pub struct Engine {
    pub config: Arc<EngineConfig>,
    pub store: Arc<PeriodStore>,
    pub exposure: Arc<ExposureLedger>,
    pub selector: Arc<ResultSelector>,
    pub ledger: Arc<dyn Ledger>,
    pub leases: Arc<dyn LeaseStore>,
    pub notifier: Arc<ChannelNotifier>,
    pub broadcaster: Arc<Broadcaster>,
    pub metrics: EngineMetrics,
}

impl Engine {
    pub fn coordinator(&self, worker_id: impl Into<String>) -> SettlementCoordinator {
        SettlementCoordinator::new(
            worker_id,
            self.config.clone(),
            self.store.clone(),
            self.exposure.clone(),
            self.selector.clone(),
            self.ledger.clone(),
            self.leases.clone(),
            self.broadcaster.clone(),
            self.metrics.clone(),
        )
    }

    pub fn intake(&self) -> BetIntake {
        BetIntake::new(
            self.config.clone(),
            self.store.clone(),
            self.exposure.clone(),
            self.ledger.clone(),
            self.broadcaster.clone(),
            self.metrics.clone(),
        )
    }

    pub fn admin(&self) -> AdminOverrides {
        AdminOverrides::new(
            self.config.clone(),
            self.store.clone(),
            self.leases.clone(),
            self.metrics.clone(),
        )
    }

    pub fn worker(&self, worker_id: impl Into<String>) -> SettlementWorker {
        SettlementWorker::new(
            self.config.clone(),
            Arc::new(self.coordinator(worker_id)),
            self.broadcaster.clone(),
        )
    }
}

pub struct EngineFactory;

impl EngineFactory {
    /// Open storage, load the operator key and wire every component
    pub fn create(
        config: EngineConfig,
        ledger: Arc<dyn Ledger>,
        leases: Arc<dyn LeaseStore>,
    ) -> EngineResult<Engine> {
        config.validate()?;

        let storage = OptimizedStorage::open_with_clear(
            &config.storage.data_directory,
            config.storage.clear_on_start,
        )?;
        let store = Arc::new(PeriodStore::new(storage));

        let seed: [u8; 32] = match &config.vrf.seed_hex {
            Some(seed_hex) => hex::decode(seed_hex)
                .ok()
                .and_then(|bytes| bytes.try_into().ok())
                .ok_or_else(|| ConfigurationError::InvalidValue {
                    field: "vrf.seed_hex".to_string(),
                    value: "<redacted>".to_string(),
                    reason: "must be 64 hex characters".to_string(),
                })?,
            None => store.load_or_create_vrf_seed()?,
        };
        let vrf = Arc::new(VrfEngine::from_seed(&seed).map_err(SelectionError::Vrf)?);
        info!(public_key = %vrf.public_key_hex(), "🔑 VRF operator key loaded");

        let metrics = EngineMetrics::new().map_err(|e| {
            ConfigurationError::ValidationFailed(format!("metrics registry: {}", e))
        })?;
        let notifier = Arc::new(ChannelNotifier::new(config.broadcast.channel_capacity));
        let broadcaster = Arc::new(Broadcaster::new(
            notifier.clone() as Arc<dyn Notifier>,
            Duration::from_millis(config.broadcast.min_exposure_interval_ms),
        ));

        Ok(Engine {
            config: Arc::new(config),
            store,
            exposure: Arc::new(ExposureLedger::new()),
            selector: Arc::new(ResultSelector::new(vrf)),
            ledger,
            leases,
            notifier,
            broadcaster,
            metrics,
        })
    }

    /// Single-process engine with an in-memory lease store
    pub fn create_in_memory(config: EngineConfig, ledger: Arc<dyn Ledger>) -> EngineResult<Engine> {
        Self::create(config, ledger, Arc::new(MemoryLeaseStore::new()))
    }
}
