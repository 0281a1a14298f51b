//! Exposure ledger: what the platform owes per outcome bucket if it wins.
//!
//! Counters only ever grow through `fetch_add`, so concurrent bets commute
//! and the final book is independent of arrival order. Books are keyed by
//! [`PeriodKey`], which keeps game types and durations fully separate.
//!
//! The five-digit game is not stored per combination. Every 5D predicate
//! reads either one position or the sum, so a book keeps 5x10 position cells
//! and 46 sum cells, and a combination's liability is its five position
//! cells plus its sum cell.

use crate::clock::PeriodKey;
use crate::games::outcome_index::{five_d_index, DIGITS, MAX_SUM, POSITIONS};
use crate::games::{GameKind, Outcome, Predicate, Scope};
use dashmap::{DashMap, DashSet};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

const POSITION_CELLS: usize = POSITIONS * DIGITS as usize;
const SUM_CELLS: usize = MAX_SUM as usize + 1;

enum Cells {
    Direct(Vec<AtomicU64>),
    Decomposed {
        positions: Vec<AtomicU64>,
        sums: Vec<AtomicU64>,
    },
}

fn counters(n: usize) -> Vec<AtomicU64> {
    (0..n).map(|_| AtomicU64::new(0)).collect()
}

fn load_all(cells: &[AtomicU64]) -> Vec<u64> {
    cells.iter().map(|c| c.load(Ordering::SeqCst)).collect()
}

/// Exposure for one period
pub struct ExposureBook {
    game: GameKind,
    cells: Cells,
    total_bet: AtomicU64,
    bet_count: AtomicU64,
    bettors: DashSet<String>,
}

impl ExposureBook {
    pub fn new(game: GameKind) -> Self {
        let cells = match game {
            GameKind::FiveD => Cells::Decomposed {
                positions: counters(POSITION_CELLS),
                sums: counters(SUM_CELLS),
            },
            _ => Cells::Direct(counters(game.outcome_space_size() as usize)),
        };
        Self {
            game,
            cells,
            total_bet: AtomicU64::new(0),
            bet_count: AtomicU64::new(0),
            bettors: DashSet::new(),
        }
    }

    /// Rebuild a book from persisted bets
    pub fn replay<'a, I>(game: GameKind, bets: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a Predicate, u64)>,
    {
        let book = Self::new(game);
        for (user, predicate, amount) in bets {
            book.record(user, predicate, amount);
        }
        book
    }

    /// Attribute one bet to every bucket it would win on
    pub fn record(&self, user: &str, predicate: &Predicate, amount: u64) {
        let game = self.game;
        match &self.cells {
            Cells::Direct(buckets) => {
                for (i, cell) in buckets.iter().enumerate() {
                    let Some(outcome) = game.outcome_at(i as u32) else {
                        continue;
                    };
                    if let Some(m) = game.evaluate(predicate, &outcome) {
                        cell.fetch_add(m.payout(amount), Ordering::SeqCst);
                    }
                }
            }
            Cells::Decomposed { positions, sums } => match game.scope(predicate) {
                Scope::Position(position) if (position as usize) < POSITIONS => {
                    let p = position as usize;
                    for d in 0..DIGITS {
                        let mut digits = [0u8; POSITIONS];
                        digits[p] = d;
                        if let Some(m) = game.evaluate(predicate, &Outcome::FiveDigits(digits)) {
                            positions[p * DIGITS as usize + d as usize]
                                .fetch_add(m.payout(amount), Ordering::SeqCst);
                        }
                    }
                }
                Scope::Sum => {
                    let index = five_d_index();
                    for sum in 0..=MAX_SUM {
                        let Some(digits) = index.representative(sum) else {
                            continue;
                        };
                        if let Some(m) = game.evaluate(predicate, &Outcome::FiveDigits(digits)) {
                            sums[sum as usize].fetch_add(m.payout(amount), Ordering::SeqCst);
                        }
                    }
                }
                Scope::Position(_) | Scope::Whole => {
                    tracing::error!(game = %game, ?predicate, "predicate has no 5D scope; not attributed");
                }
            },
        }

        self.total_bet.fetch_add(amount, Ordering::SeqCst);
        self.bet_count.fetch_add(1, Ordering::SeqCst);
        self.bettors.insert(user.to_string());
    }

    pub fn snapshot(&self, key: PeriodKey) -> ExposureSnapshot {
        let liabilities = match &self.cells {
            Cells::Direct(buckets) => Liabilities::Direct(load_all(buckets)),
            Cells::Decomposed { positions, sums } => Liabilities::Decomposed {
                positions: load_all(positions),
                sums: load_all(sums),
            },
        };
        ExposureSnapshot {
            key,
            total_bet: self.total_bet.load(Ordering::SeqCst),
            bet_count: self.bet_count.load(Ordering::SeqCst),
            unique_bettors: self.bettors.len() as u64,
            liabilities,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Liabilities {
    Direct(Vec<u64>),
    Decomposed { positions: Vec<u64>, sums: Vec<u64> },
}

/// Point-in-time copy of a book
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposureSnapshot {
    pub key: PeriodKey,
    pub total_bet: u64,
    pub bet_count: u64,
    pub unique_bettors: u64,
    pub liabilities: Liabilities,
}

impl ExposureSnapshot {
    pub fn empty(key: PeriodKey) -> Self {
        ExposureBook::new(key.game).snapshot(key)
    }

    /// Amount owed if `outcome` wins
    pub fn liability_of(&self, outcome: &Outcome) -> Option<u64> {
        match (&self.liabilities, outcome) {
            (Liabilities::Direct(buckets), _) => {
                let index = self.key.game.index_of(outcome)?;
                buckets.get(index as usize).copied()
            }
            (Liabilities::Decomposed { positions, sums }, Outcome::FiveDigits(digits)) => {
                if digits.iter().any(|&d| d >= DIGITS) {
                    return None;
                }
                let mut total = 0u64;
                for (p, &d) in digits.iter().enumerate() {
                    total = total.saturating_add(*positions.get(p * DIGITS as usize + d as usize)?);
                }
                let sum: u8 = digits.iter().sum();
                Some(total.saturating_add(*sums.get(sum as usize)?))
            }
            _ => None,
        }
    }

    /// Largest amount any single outcome could cost
    pub fn worst_case_liability(&self) -> u64 {
        match &self.liabilities {
            Liabilities::Direct(buckets) => buckets.iter().copied().max().unwrap_or(0),
            Liabilities::Decomposed { positions, sums } => {
                // best[s]: largest position total over digit prefixes summing to s
                let mut best: Vec<Option<u64>> = vec![None; SUM_CELLS];
                best[0] = Some(0);
                for p in 0..POSITIONS {
                    let mut next: Vec<Option<u64>> = vec![None; SUM_CELLS];
                    for (s, value) in best.iter().enumerate() {
                        let Some(value) = value else { continue };
                        for d in 0..DIGITS as usize {
                            if s + d >= SUM_CELLS {
                                break;
                            }
                            let candidate = value.saturating_add(positions[p * DIGITS as usize + d]);
                            if next[s + d].map_or(true, |current| candidate > current) {
                                next[s + d] = Some(candidate);
                            }
                        }
                    }
                    best = next;
                }
                best.iter()
                    .zip(sums.iter())
                    .filter_map(|(b, sum)| b.map(|b| b.saturating_add(*sum)))
                    .max()
                    .unwrap_or(0)
            }
        }
    }
}

/// Shared handle to every live exposure book
#[derive(Default)]
pub struct ExposureLedger {
    books: DashMap<PeriodKey, Arc<ExposureBook>>,
}

impl ExposureLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn book(&self, key: PeriodKey) -> Arc<ExposureBook> {
        self.books
            .entry(key)
            .or_insert_with(|| Arc::new(ExposureBook::new(key.game)))
            .clone()
    }

    pub fn record_bet(&self, key: PeriodKey, user: &str, predicate: &Predicate, amount: u64) {
        self.book(key).record(user, predicate, amount);
    }

    /// Read-only copy; may be stale by the time it is used
    pub fn snapshot(&self, key: PeriodKey) -> ExposureSnapshot {
        match self.books.get(&key) {
            Some(book) => book.snapshot(key),
            None => ExposureSnapshot::empty(key),
        }
    }

    /// Worst case for the period if this bet were accepted
    pub fn projected_worst_case(&self, key: PeriodKey, predicate: &Predicate, amount: u64) -> u64 {
        let current = self.snapshot(key).worst_case_liability();
        current.saturating_add(key.game.max_multiplier(predicate).payout(amount))
    }

    pub fn evict(&self, key: &PeriodKey) {
        self.books.remove(key);
    }

    pub fn live_books(&self) -> usize {
        self.books.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::PeriodId;
    use crate::games::{Color, Parity, SizeClass};
    use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

    fn key(game: GameKind, duration: u32) -> PeriodKey {
        PeriodKey::new(game, duration, PeriodId::from_raw(2026101700001))
    }

    fn five_d_bets() -> Vec<(String, Predicate, u64)> {
        vec![
            ("alice".into(), Predicate::Digit { position: 0, value: 3 }, 100),
            ("bob".into(), Predicate::PositionSize { position: 2, size: SizeClass::Big }, 250),
            ("carol".into(), Predicate::PositionParity { position: 4, parity: Parity::Odd }, 40),
            ("dave".into(), Predicate::SumSize { size: SizeClass::Big }, 500),
            ("erin".into(), Predicate::SumParity { parity: Parity::Even }, 75),
            ("alice".into(), Predicate::Digit { position: 3, value: 9 }, 60),
        ]
    }

    #[test]
    fn test_direct_book_matches_evaluate() {
        let k = key(GameKind::Wingo, 60);
        let ledger = ExposureLedger::new();
        ledger.record_bet(k, "u1", &Predicate::Color { color: Color::Green }, 100);
        ledger.record_bet(k, "u2", &Predicate::Number { value: 5 }, 10);

        let snap = ledger.snapshot(k);
        assert_eq!(snap.liability_of(&Outcome::Number(3)), Some(200));
        assert_eq!(snap.liability_of(&Outcome::Number(5)), Some(150 + 90));
        assert_eq!(snap.liability_of(&Outcome::Number(4)), Some(0));
        assert_eq!(snap.worst_case_liability(), 240);
        assert_eq!(snap.unique_bettors, 2);
        assert_eq!(snap.total_bet, 110);
    }

    #[test]
    fn test_five_d_attribution_matches_brute_force() {
        let k = key(GameKind::FiveD, 60);
        let bets = five_d_bets();
        let book = ExposureBook::replay(
            GameKind::FiveD,
            bets.iter().map(|(u, p, a)| (u.as_str(), p, *a)),
        );
        let snap = book.snapshot(k);

        let mut rng = StdRng::seed_from_u64(17);
        let mut worst = 0;
        for _ in 0..2_000 {
            let id = rng.gen_range(0..100_000u32);
            let outcome = GameKind::FiveD.outcome_at(id).unwrap();
            let expected: u64 = bets
                .iter()
                .filter_map(|(_, p, a)| GameKind::FiveD.evaluate(p, &outcome).map(|m| m.payout(*a)))
                .sum();
            assert_eq!(snap.liability_of(&outcome), Some(expected), "outcome {}", outcome);
            worst = worst.max(expected);
        }
        assert!(snap.worst_case_liability() >= worst);
    }

    #[test]
    fn test_five_d_worst_case_is_exact() {
        let k = key(GameKind::FiveD, 60);
        let bets = five_d_bets();
        let book = ExposureBook::replay(
            GameKind::FiveD,
            bets.iter().map(|(u, p, a)| (u.as_str(), p, *a)),
        );
        let snap = book.snapshot(k);
        let brute = (0..100_000u32)
            .filter_map(|id| GameKind::FiveD.outcome_at(id))
            .filter_map(|o| snap.liability_of(&o))
            .max()
            .unwrap();
        assert_eq!(snap.worst_case_liability(), brute);
    }

    #[test]
    fn test_order_independence() {
        let k = key(GameKind::FiveD, 180);
        let mut bets = five_d_bets();
        let forward = ExposureBook::replay(
            GameKind::FiveD,
            bets.iter().map(|(u, p, a)| (u.as_str(), p, *a)),
        )
        .snapshot(k);

        let mut rng = StdRng::seed_from_u64(99);
        for _ in 0..10 {
            bets.shuffle(&mut rng);
            let shuffled = ExposureBook::replay(
                GameKind::FiveD,
                bets.iter().map(|(u, p, a)| (u.as_str(), p, *a)),
            )
            .snapshot(k);
            assert_eq!(shuffled, forward);
        }
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let k = key(GameKind::K3, 60);
        let ledger = Arc::new(ExposureLedger::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        ledger.record_bet(k, &format!("user-{}", t), &Predicate::AnyTriple, 10);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snap = ledger.snapshot(k);
        assert_eq!(snap.bet_count, 2_000);
        assert_eq!(snap.unique_bettors, 8);
        assert_eq!(snap.liability_of(&Outcome::Dice([2, 2, 2])), Some(2_000 * 324));
        assert_eq!(snap.liability_of(&Outcome::Dice([1, 2, 2])), Some(0));
    }

    #[test]
    fn test_durations_are_isolated() {
        let short = key(GameKind::Wingo, 60);
        let long = key(GameKind::Wingo, 180);
        let ledger = ExposureLedger::new();
        ledger.record_bet(short, "u1", &Predicate::Number { value: 7 }, 1_000);

        assert_eq!(ledger.snapshot(long), ExposureSnapshot::empty(long));
        assert_eq!(ledger.snapshot(short).liability_of(&Outcome::Number(7)), Some(9_000));
        ledger.evict(&short);
        assert_eq!(ledger.live_books(), 0);
    }
}
