//! Period calculator.
//!
//! Pure calendar arithmetic: the same game config, duration and instant give
//! the same period on every process without coordination. Sessions start at
//! a fixed local hour, and because durations divide the session length no
//! period ever straddles the anchor.

use crate::config::{GameConfig, SECONDS_PER_DAY};
use crate::errors::ClockError;
use crate::games::GameKind;
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const SEQUENCE_RADIX: u64 = 100_000;
/// `num_days_from_ce` of 1970-01-01
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;

/// `YYYYMMDD` of the session day followed by a five-digit sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeriodId(u64);

impl PeriodId {
    pub fn new(day: NaiveDate, sequence: u32) -> Self {
        let ymd = day.year() as u64 * 10_000 + day.month() as u64 * 100 + day.day() as u64;
        Self(ymd * SEQUENCE_RADIX + sequence as u64)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn sequence(&self) -> u32 {
        (self.0 % SEQUENCE_RADIX) as u32
    }

    pub fn day(&self) -> Result<NaiveDate, ClockError> {
        let ymd = self.0 / SEQUENCE_RADIX;
        NaiveDate::from_ymd_opt(
            (ymd / 10_000) as i32,
            (ymd / 100 % 100) as u32,
            (ymd % 100) as u32,
        )
        .ok_or(ClockError::MalformedPeriodId(self.0))
    }
}

impl fmt::Display for PeriodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PeriodId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .map(PeriodId)
            .map_err(|e| format!("invalid period id '{}': {}", s, e))
    }
}

/// Identity of one betting round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeriodKey {
    pub game: GameKind,
    pub duration: u32,
    pub period_id: PeriodId,
}

impl PeriodKey {
    pub fn new(game: GameKind, duration: u32, period_id: PeriodId) -> Self {
        Self {
            game,
            duration,
            period_id,
        }
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.game, self.duration, self.period_id)
    }
}

impl std::str::FromStr for PeriodKey {
    type Err = String;

    /// Parses the `game:duration:id` form used for lease keys and VRF messages
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let (Some(game), Some(duration), Some(id), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("expected game:duration:period_id, got '{}'", s));
        };
        let duration = duration
            .parse::<u32>()
            .map_err(|e| format!("invalid duration '{}': {}", duration, e))?;
        Ok(Self::new(game.parse()?, duration, id.parse()?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodInfo {
    pub key: PeriodKey,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub time_remaining: Duration,
    pub betting_open: bool,
}

impl PeriodInfo {
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now >= self.end
    }
}

fn check_duration(game: &GameConfig, duration: u32) -> Result<(), ClockError> {
    if !game.offers(duration) {
        return Err(ClockError::DurationNotOffered {
            game: game.kind,
            duration,
        });
    }
    if duration == 0 || SECONDS_PER_DAY % duration != 0 {
        return Err(ClockError::UnevenDuration(duration));
    }
    Ok(())
}

fn offset_secs(game: &GameConfig) -> i64 {
    game.utc_offset_minutes as i64 * 60
}

fn anchor_secs(game: &GameConfig) -> i64 {
    game.anchor_hour as i64 * 3_600
}

fn utc_from_secs(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

fn describe(game: &GameConfig, key: PeriodKey, start_secs: i64, now: DateTime<Utc>) -> PeriodInfo {
    let start = utc_from_secs(start_secs);
    let end = utc_from_secs(start_secs + key.duration as i64);
    let remaining_ms = (end.timestamp_millis() - now.timestamp_millis()).max(0) as u64;
    let margin_ms = game.bet_close_margin_secs as u64 * 1_000;
    PeriodInfo {
        key,
        start,
        end,
        time_remaining: Duration::from_millis(remaining_ms),
        betting_open: now >= start && remaining_ms > margin_ms,
    }
}

/// The period containing `now`
pub fn current_period(
    game: &GameConfig,
    duration: u32,
    now: DateTime<Utc>,
) -> Result<PeriodInfo, ClockError> {
    check_duration(game, duration)?;

    let shifted = now.timestamp() + offset_secs(game) - anchor_secs(game);
    let day_index = shifted.div_euclid(SECONDS_PER_DAY as i64);
    let elapsed = shifted.rem_euclid(SECONDS_PER_DAY as i64);
    let sequence = (elapsed / duration as i64) as u32 + 1;

    let day = NaiveDate::from_num_days_from_ce_opt((UNIX_EPOCH_DAYS_FROM_CE + day_index) as i32)
        .ok_or(ClockError::MalformedPeriodId(0))?;
    let key = PeriodKey::new(game.kind, duration, PeriodId::new(day, sequence));

    let session_start = day_index * SECONDS_PER_DAY as i64 + anchor_secs(game) - offset_secs(game);
    let start_secs = session_start + (sequence as i64 - 1) * duration as i64;
    Ok(describe(game, key, start_secs, now))
}

/// Bounds of an arbitrary period, evaluated at `now`
pub fn period_info(
    game: &GameConfig,
    key: PeriodKey,
    now: DateTime<Utc>,
) -> Result<PeriodInfo, ClockError> {
    check_duration(game, key.duration)?;
    let max = SECONDS_PER_DAY / key.duration;
    let sequence = key.period_id.sequence();
    if sequence == 0 || sequence > max {
        return Err(ClockError::SequenceOutOfRange { sequence, max });
    }

    let day = key.period_id.day()?;
    let day_index = day.num_days_from_ce() as i64 - UNIX_EPOCH_DAYS_FROM_CE;
    let session_start = day_index * SECONDS_PER_DAY as i64 + anchor_secs(game) - offset_secs(game);
    let start_secs = session_start + (sequence as i64 - 1) * key.duration as i64;
    Ok(describe(game, key, start_secs, now))
}

/// The period immediately before `key`, crossing the session boundary if needed
pub fn previous_period(game: &GameConfig, key: PeriodKey) -> Result<PeriodKey, ClockError> {
    let info = period_info(game, key, Utc::now())?;
    let before = info.start - chrono::Duration::seconds(1);
    Ok(current_period(game, key.duration, before)?.key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wingo() -> GameConfig {
        GameConfig::new(GameKind::Wingo, vec![30, 60, 180])
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_period_is_deterministic() {
        let game = wingo();
        let now = at("2026-10-17T10:15:42Z");
        let a = current_period(&game, 60, now).unwrap();
        let b = current_period(&game.clone(), 60, now).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.start, at("2026-10-17T10:15:00Z"));
        assert_eq!(a.end, at("2026-10-17T10:16:00Z"));
        // 8h15m after the 02:00 anchor, 60s periods
        assert_eq!(a.key.period_id.sequence(), 8 * 60 + 15 + 1);
        assert_eq!(a.key.period_id.to_string(), "2026101700496");
    }

    #[test]
    fn test_anchor_boundary() {
        let game = wingo();
        let before = current_period(&game, 60, at("2026-10-17T01:59:59Z")).unwrap();
        assert_eq!(before.key.period_id.day().unwrap(), NaiveDate::from_ymd_opt(2026, 10, 16).unwrap());
        assert_eq!(before.key.period_id.sequence(), 1_440);
        assert_eq!(before.end, at("2026-10-17T02:00:00Z"));

        let after = current_period(&game, 60, at("2026-10-17T02:00:00Z")).unwrap();
        assert_eq!(after.key.period_id.day().unwrap(), NaiveDate::from_ymd_opt(2026, 10, 17).unwrap());
        assert_eq!(after.key.period_id.sequence(), 1);
        assert_eq!(previous_period(&game, after.key).unwrap(), before.key);
    }

    #[test]
    fn test_local_offset_moves_anchor() {
        let mut game = wingo();
        game.utc_offset_minutes = 330;
        // 02:00 at +05:30 is 20:30 UTC the previous day
        let first = current_period(&game, 180, at("2026-10-16T20:30:00Z")).unwrap();
        assert_eq!(first.key.period_id.to_string(), "2026101700001");
    }

    #[test]
    fn test_betting_closes_inside_margin() {
        let game = wingo();
        let open = current_period(&game, 60, at("2026-10-17T10:15:54Z")).unwrap();
        assert!(open.betting_open);
        assert_eq!(open.time_remaining, Duration::from_secs(6));

        let closed = current_period(&game, 60, at("2026-10-17T10:15:55Z")).unwrap();
        assert!(!closed.betting_open);
        assert_eq!(closed.key, open.key);
    }

    #[test]
    fn test_period_info_round_trip() {
        let game = wingo();
        let now = at("2026-10-17T23:59:31Z");
        let current = current_period(&game, 30, now).unwrap();
        let again = period_info(&game, current.key, now).unwrap();
        assert_eq!(current, again);

        let bad = PeriodKey::new(GameKind::Wingo, 30, PeriodId::new(NaiveDate::from_ymd_opt(2026, 10, 17).unwrap(), 2_881));
        assert!(matches!(period_info(&game, bad, now), Err(ClockError::SequenceOutOfRange { .. })));
        assert!(current_period(&game, 300, now).is_err());
    }

    #[test]
    fn test_period_key_parses_display_form() {
        let key = PeriodKey::new(GameKind::FiveD, 180, PeriodId::from_raw(2026101700042));
        assert_eq!(key.to_string().parse::<PeriodKey>().unwrap(), key);
        assert!("5d:180".parse::<PeriodKey>().is_err());
        assert!("dice:60:2026101700001".parse::<PeriodKey>().is_err());
    }
}
