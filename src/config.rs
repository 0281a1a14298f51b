//! Configuration management with validation and defaults
//!
//! Loaded once at startup from TOML, then overridden from `PERIODIQ_*`
//! environment variables. Game configs are immutable after load.

use crate::errors::{ConfigurationError, EngineResult};
use crate::games::GameKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const SECONDS_PER_DAY: u32 = 86_400;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    pub games: Vec<GameConfig>,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub vrf: VrfConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            games: vec![
                GameConfig::new(GameKind::Wingo, vec![30, 60, 180, 300]),
                GameConfig::new(GameKind::K3, vec![60, 180, 300, 600]),
                GameConfig::new(GameKind::FiveD, vec![60, 180, 300, 600]),
            ],
            settlement: SettlementConfig::default(),
            broadcast: BroadcastConfig::default(),
            storage: StorageConfig::default(),
            vrf: VrfConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

/// Static per-game configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameConfig {
    pub kind: GameKind,
    /// Period lengths in seconds; each must divide a 24h session
    pub durations: Vec<u32>,
    /// Local hour at which the session day (and period numbering) restarts
    #[serde(default = "default_anchor_hour")]
    pub anchor_hour: u32,
    /// Fixed offset that defines "local" for the anchor
    #[serde(default)]
    pub utc_offset_minutes: i32,
    /// Betting closes this many seconds before period end
    #[serde(default = "default_bet_close_margin")]
    pub bet_close_margin_secs: u32,
    #[serde(default = "default_min_bet")]
    pub min_bet: u64,
    #[serde(default = "default_max_bet")]
    pub max_bet: u64,
    /// Reject bets once the worst-case payout of a period would exceed this
    #[serde(default)]
    pub max_period_liability: Option<u64>,
}

fn default_anchor_hour() -> u32 {
    2
}

fn default_bet_close_margin() -> u32 {
    5
}

fn default_min_bet() -> u64 {
    10
}

fn default_max_bet() -> u64 {
    1_000_000
}

impl GameConfig {
    pub fn new(kind: GameKind, durations: Vec<u32>) -> Self {
        Self {
            kind,
            durations,
            anchor_hour: default_anchor_hour(),
            utc_offset_minutes: 0,
            bet_close_margin_secs: default_bet_close_margin(),
            min_bet: default_min_bet(),
            max_bet: default_max_bet(),
            max_period_liability: None,
        }
    }

    pub fn offers(&self, duration: u32) -> bool {
        self.durations.contains(&duration)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        let game = self.kind.to_string();
        if self.durations.is_empty() {
            return Err(ConfigurationError::ValidationFailed(format!(
                "{} offers no durations",
                game
            )));
        }
        for &d in &self.durations {
            if d == 0 || SECONDS_PER_DAY % d != 0 {
                return Err(ConfigurationError::InvalidValue {
                    field: format!("{}.durations", game),
                    value: d.to_string(),
                    reason: "must be > 0 and divide 86400".to_string(),
                });
            }
            if self.bet_close_margin_secs >= d {
                return Err(ConfigurationError::InvalidValue {
                    field: format!("{}.bet_close_margin_secs", game),
                    value: self.bet_close_margin_secs.to_string(),
                    reason: format!("must be shorter than the {}s period", d),
                });
            }
        }
        if self.anchor_hour >= 24 {
            return Err(ConfigurationError::InvalidValue {
                field: format!("{}.anchor_hour", game),
                value: self.anchor_hour.to_string(),
                reason: "must be 0..=23".to_string(),
            });
        }
        if self.utc_offset_minutes.abs() > 14 * 60 {
            return Err(ConfigurationError::InvalidValue {
                field: format!("{}.utc_offset_minutes", game),
                value: self.utc_offset_minutes.to_string(),
                reason: "must be within +/-14h".to_string(),
            });
        }
        if self.min_bet == 0 || self.min_bet > self.max_bet {
            return Err(ConfigurationError::ValidationFailed(format!(
                "{} bet range {}..={} is empty",
                game, self.min_bet, self.max_bet
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SettlementConfig {
    pub poll_interval_ms: u64,
    /// Lease time-to-live; a crashed worker's lease lapses after this
    pub lease_ttl_ms: u64,
    /// How many ended periods behind the current one each poll inspects
    pub lookback_periods: u32,
    /// Worker tasks started by `periodiq run`
    pub workers: usize,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            lease_ttl_ms: 10_000,
            lookback_periods: 3,
            workers: 2,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BroadcastConfig {
    pub countdown_enabled: bool,
    /// Minimum gap between exposure summaries for one room
    pub min_exposure_interval_ms: u64,
    pub channel_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            countdown_enabled: true,
            min_exposure_interval_ms: 2_000,
            channel_capacity: 1024,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: String,
    /// Whether to clear database on startup (testing only!)
    pub clear_on_start: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_directory: "./DB/periodiq_data".to_string(),
            clear_on_start: false,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VrfConfig {
    /// Hex mini-secret; when absent a seed is generated once and kept in RocksDB
    pub seed_hex: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub log_filter: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_filter: "periodiq=info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Production profile: persistent data, liability caps on
    pub fn production() -> Self {
        let mut config = Self::default();
        for game in &mut config.games {
            game.max_period_liability = Some(50_000_000);
        }
        config.settlement.workers = 4;
        config
    }

    /// Fast timings and a throwaway database
    pub fn testing() -> Self {
        let mut config = Self::default();
        config.settlement.poll_interval_ms = 20;
        config.settlement.lease_ttl_ms = 2_000;
        config.broadcast.min_exposure_interval_ms = 0;
        config.storage.clear_on_start = true;
        config
    }

    pub fn game(&self, kind: GameKind) -> Option<&GameConfig> {
        self.games.iter().find(|g| g.kind == kind)
    }

    /// Load from an optional TOML file, apply env overrides, validate
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self, ConfigurationError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)))
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigurationError> {
        if let Ok(dir) = std::env::var("PERIODIQ_DATA_DIR") {
            self.storage.data_directory = dir;
        }
        if let Ok(seed) = std::env::var("PERIODIQ_VRF_SEED") {
            self.vrf.seed_hex = Some(seed);
        }
        if let Ok(ttl) = std::env::var("PERIODIQ_LEASE_TTL_MS") {
            self.settlement.lease_ttl_ms = parse_env("PERIODIQ_LEASE_TTL_MS", ttl)?;
        }
        if let Ok(poll) = std::env::var("PERIODIQ_POLL_INTERVAL_MS") {
            self.settlement.poll_interval_ms = parse_env("PERIODIQ_POLL_INTERVAL_MS", poll)?;
        }
        Ok(())
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.games.is_empty() {
            return Err(ConfigurationError::ValidationFailed(
                "at least one game must be enabled".to_string(),
            ));
        }
        for (i, game) in self.games.iter().enumerate() {
            if self.games[..i].iter().any(|g| g.kind == game.kind) {
                return Err(ConfigurationError::ValidationFailed(format!(
                    "{} configured twice",
                    game.kind
                )));
            }
            game.validate()?;
        }
        if self.settlement.lease_ttl_ms == 0 || self.settlement.poll_interval_ms == 0 {
            return Err(ConfigurationError::ValidationFailed(
                "lease_ttl_ms and poll_interval_ms must be > 0".to_string(),
            ));
        }
        if self.settlement.lookback_periods == 0 || self.settlement.workers == 0 {
            return Err(ConfigurationError::ValidationFailed(
                "lookback_periods and workers must be > 0".to_string(),
            ));
        }
        if self.broadcast.channel_capacity == 0 {
            return Err(ConfigurationError::ValidationFailed(
                "channel_capacity must be > 0".to_string(),
            ));
        }
        if let Some(seed) = &self.vrf.seed_hex {
            let valid = hex::decode(seed).map(|b| b.len() == 32).unwrap_or(false);
            if !valid {
                return Err(ConfigurationError::InvalidValue {
                    field: "vrf.seed_hex".to_string(),
                    value: "<redacted>".to_string(),
                    reason: "must be 64 hex characters".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.settlement.lease_ttl_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.settlement.poll_interval_ms)
    }
}

fn parse_env<T: std::str::FromStr>(field: &str, value: String) -> Result<T, ConfigurationError> {
    value.parse().map_err(|_| ConfigurationError::InvalidValue {
        field: field.to_string(),
        value,
        reason: "not a number".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
        assert!(EngineConfig::production().validate().is_ok());
        assert!(EngineConfig::testing().validate().is_ok());
    }

    #[test]
    fn test_duration_must_divide_day() {
        let mut config = EngineConfig::default();
        config.games[0].durations.push(7);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_margin_shorter_than_period() {
        let mut config = EngineConfig::default();
        config.games[0].bet_close_margin_secs = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_game_rejected() {
        let mut config = EngineConfig::default();
        config.games.push(GameConfig::new(GameKind::Wingo, vec![60]));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(
            &path,
            r#"
[[games]]
kind = "5d"
durations = [60, 180]
anchor_hour = 2
utc_offset_minutes = 330

[settlement]
poll_interval_ms = 250
lease_ttl_ms = 5000
lookback_periods = 2
workers = 3
"#,
        )
        .unwrap();

        let config = EngineConfig::load(Some(&path)).unwrap();
        let five_d = config.game(GameKind::FiveD).unwrap();
        assert_eq!(five_d.durations, vec![60, 180]);
        assert_eq!(five_d.utc_offset_minutes, 330);
        assert_eq!(five_d.bet_close_margin_secs, 5);
        assert_eq!(config.settlement.workers, 3);
        assert!(config.game(GameKind::Wingo).is_none());
    }
}
