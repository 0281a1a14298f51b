//! periodiq - period-based result engine for Wingo, K3 and 5D rooms
//!
//! Time is cut into fixed-duration periods per game. Bets placed while a
//! period is open are debited, persisted and accumulated into an exposure
//! book. When the period ends one worker takes the period lease and resolves
//! it: an audited admin override if one is stored, otherwise a uniform VRF
//! draw that anyone can verify against the operator public key. Winners are
//! paid with idempotent ledger credits and the period commits atomically.

pub mod broadcast;
pub mod clock;
pub mod config;
pub mod errors;
pub mod exposure;
pub mod factory;
pub mod games;
pub mod intake;
pub mod lease;
pub mod ledger;
pub mod metrics;
pub mod period_store;
pub mod selector;
pub mod settlement;
pub mod storage;
pub mod worker;

pub use clock::{current_period, PeriodId, PeriodInfo, PeriodKey};
pub use config::{EngineConfig, GameConfig};
pub use errors::{EngineError, EngineResult};
pub use factory::{Engine, EngineFactory};
pub use games::{GameKind, Outcome, Predicate};
pub use intake::{AdminOverrideRequest, BetReceipt, BetRequest};
pub use settlement::{SettleOutcome, SettlementSummary};
