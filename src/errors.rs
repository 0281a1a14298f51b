//! Error types for the period engine
//!
//! One root error with a sub-enum per concern. Validation rejections are
//! returned to bettors verbatim, so their messages are user-facing.

use crate::games::GameKind;

/// Root error type for all engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Clock error: {0}")]
    Clock(#[from] ClockError),

    #[error("Bet rejected: {0}")]
    Rejected(#[from] BetRejection),

    #[error("Result selection failed: {0}")]
    Selection(#[from] SelectionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Lease error: {0}")]
    Lease(#[from] LeaseError),
}

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),
}

/// Period arithmetic errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    #[error("Duration {duration}s is not offered for {game}")]
    DurationNotOffered { game: GameKind, duration: u32 },

    #[error("Duration {0}s does not divide a 24h session")]
    UnevenDuration(u32),

    #[error("Period sequence {sequence} out of range (1..={max})")]
    SequenceOutOfRange { sequence: u32, max: u32 },

    #[error("Malformed period id: {0}")]
    MalformedPeriodId(u64),
}

/// Reasons a bet or an override is refused at intake
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BetRejection {
    #[error("Game {0} is not enabled")]
    UnknownGame(GameKind),

    #[error("Duration {0}s is not offered for this game")]
    UnknownDuration(u32),

    #[error("Period {requested} is not the current period ({current})")]
    WrongPeriod { requested: String, current: String },

    #[error("Betting is closed for period {0}")]
    BettingClosed(String),

    #[error("Malformed predicate: {0}")]
    MalformedPredicate(String),

    #[error("Invalid outcome for {game}: {reason}")]
    InvalidOutcome { game: GameKind, reason: String },

    #[error("Amount {amount} outside allowed range {min}..={max}")]
    AmountOutOfRange { amount: u64, min: u64, max: u64 },

    #[error("Period liability limit reached")]
    LiabilityLimit,

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Period {0} is already resolved")]
    AlreadyResolved(String),

    #[error("Period {0} is being settled")]
    PeriodBusy(String),
}

/// Selector integrity failures; the period stays locked for manual recovery
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("Outcome space for {0} is empty")]
    EmptyOutcomeSpace(GameKind),

    #[error("Outcome index inconsistent: {0}")]
    IndexCorrupted(String),

    #[error("Override outcome invalid for {game}: {reason}")]
    InvalidOverride { game: GameKind, reason: String },

    #[error("VRF evaluation failed: {0}")]
    Vrf(String),

    #[error("Payout {payout} does not match replayed exposure {exposure} for period {period}")]
    ExposureMismatch {
        period: String,
        payout: u64,
        exposure: u64,
    },
}

/// Persistence errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database open failed: {0}")]
    DatabaseOpenFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    #[error("Period {0} already resolved")]
    AlreadyResolved(String),
}

/// Ledger collaborator errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient funds for {user}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        user: String,
        balance: u64,
        requested: u64,
    },

    #[error("Reference {0} reused with different parameters")]
    ReferenceConflict(String),

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

/// Lease store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeaseError {
    #[error("Lease {key} no longer held by {holder}")]
    Lost { key: String, holder: String },

    #[error("Lease backend unavailable: {0}")]
    Unavailable(String),
}

/// Notifier delivery errors; logged, never propagated into settlement
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BroadcastError {
    #[error("No subscribers for {0}")]
    NoSubscribers(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::WriteFailed(e.to_string())
    }
}

impl From<rocksdb::Error> for EngineError {
    fn from(e: rocksdb::Error) -> Self {
        EngineError::Storage(e.into())
    }
}

// Convenience type alias for Results
pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Short label used for the failure metric
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Configuration(_) => "configuration",
            EngineError::Clock(_) => "clock",
            EngineError::Rejected(_) => "rejected",
            EngineError::Selection(_) => "integrity",
            EngineError::Storage(_) => "persistence",
            EngineError::Ledger(_) => "ledger",
            EngineError::Lease(_) => "lease",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_rejection_display() {
        let err = BetRejection::AmountOutOfRange {
            amount: 5,
            min: 10,
            max: 100,
        };
        assert!(err.to_string().contains("5"));
        assert!(err.to_string().contains("10..=100"));
    }

    #[test]
    fn test_error_conversion() {
        let err: EngineError = SelectionError::EmptyOutcomeSpace(GameKind::Wingo).into();
        match err {
            EngineError::Selection(_) => {}
            _ => panic!("Expected selection error"),
        }
        assert_eq!(err.kind(), "integrity");
    }

    #[test]
    fn test_error_source() {
        let err: EngineError = StorageError::ReadFailed("disk".to_string()).into();
        assert!(err.source().is_some());
        assert!(err.to_string().contains("Storage error"));
    }
}
