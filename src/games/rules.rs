//! Game rules written once against [`GameKind`].
//!
//! [`GameKind::evaluate`] is the only place that decides whether a predicate
//! wins against an outcome. Exposure attribution and settlement both go
//! through it.

use crate::games::outcome_index::{self, digit_size, sum_size, DIGITS, POSITIONS};
use crate::games::types::{
    Classification, Color, GameKind, Multiplier, Outcome, Parity, Predicate, SizeClass,
};

const WINGO_NUMBERS: u32 = 10;
const WINGO_BIG_FROM: u8 = 5;
const K3_FACES: u32 = 6;
const K3_BIG_FROM: u8 = 11;

const X_NUMBER: u32 = 90_000;
const X_EVEN_MONEY: u32 = 20_000;
const X_SPLIT_COLOR: u32 = 15_000;
const X_VIOLET: u32 = 45_000;
const X_DICE_EVEN_MONEY: u32 = 19_600;
const X_ANY_TRIPLE: u32 = 324_000;
const X_TRIPLE: u32 = 1_940_000;
const X_PAIR: u32 = 121_500;

/// K3 exact-sum odds for sums 3..=10; 11..=18 mirror them
const K3_SUM_TABLE: [u32; 8] = [
    1_940_000, 648_000, 324_000, 194_400, 129_600, 92_500, 77_700, 72_000,
];

/// Which part of a 5D combination a predicate depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Small games: the predicate is evaluated per bucket
    Whole,
    /// Depends only on the digit at one position
    Position(u8),
    /// Depends only on the sum of all five digits
    Sum,
}

impl GameKind {
    pub fn outcome_space_size(&self) -> u32 {
        match self {
            GameKind::Wingo => WINGO_NUMBERS,
            GameKind::K3 => K3_FACES.pow(3),
            GameKind::FiveD => outcome_index::five_d_index().len() as u32,
        }
    }

    pub fn outcome_at(&self, index: u32) -> Option<Outcome> {
        if index >= self.outcome_space_size() {
            return None;
        }
        Some(match self {
            GameKind::Wingo => Outcome::Number(index as u8),
            GameKind::K3 => Outcome::Dice([
                (index / 36) as u8 + 1,
                (index / 6 % 6) as u8 + 1,
                (index % 6) as u8 + 1,
            ]),
            GameKind::FiveD => Outcome::FiveDigits(outcome_index::digits_of(index)),
        })
    }

    pub fn index_of(&self, outcome: &Outcome) -> Option<u32> {
        self.validate_outcome(outcome).ok()?;
        match (self, outcome) {
            (GameKind::Wingo, Outcome::Number(n)) => Some(*n as u32),
            (GameKind::K3, Outcome::Dice([a, b, c])) => {
                Some((*a as u32 - 1) * 36 + (*b as u32 - 1) * 6 + (*c as u32 - 1))
            }
            (GameKind::FiveD, Outcome::FiveDigits(d)) => outcome_index::id_of(d),
            _ => None,
        }
    }

    pub fn validate_outcome(&self, outcome: &Outcome) -> Result<(), String> {
        match (self, outcome) {
            (GameKind::Wingo, Outcome::Number(n)) if (*n as u32) < WINGO_NUMBERS => Ok(()),
            (GameKind::K3, Outcome::Dice(dice)) if dice.iter().all(|d| (1..=6).contains(d)) => {
                Ok(())
            }
            (GameKind::FiveD, Outcome::FiveDigits(d)) if d.iter().all(|&x| x < DIGITS) => Ok(()),
            _ => Err(format!("{:?} is not a {} outcome", outcome, self)),
        }
    }

    pub fn validate_predicate(&self, predicate: &Predicate) -> Result<(), String> {
        let ok = match (self, predicate) {
            (GameKind::Wingo, Predicate::Number { value }) => (*value as u32) < WINGO_NUMBERS,
            (GameKind::Wingo, Predicate::Color { .. }) => true,
            (GameKind::Wingo, Predicate::Size { .. }) => true,
            (GameKind::K3, Predicate::Sum { value }) => (3..=18).contains(value),
            (GameKind::K3, Predicate::SumSize { .. }) => true,
            (GameKind::K3, Predicate::SumParity { .. }) => true,
            (GameKind::K3, Predicate::AnyTriple) => true,
            (GameKind::K3, Predicate::Triple { value }) => (1..=6).contains(value),
            (GameKind::K3, Predicate::Pair { value }) => (1..=6).contains(value),
            (GameKind::FiveD, Predicate::Digit { position, value }) => {
                (*position as usize) < POSITIONS && *value < DIGITS
            }
            (GameKind::FiveD, Predicate::PositionSize { position, .. }) => {
                (*position as usize) < POSITIONS
            }
            (GameKind::FiveD, Predicate::PositionParity { position, .. }) => {
                (*position as usize) < POSITIONS
            }
            (GameKind::FiveD, Predicate::SumSize { .. }) => true,
            (GameKind::FiveD, Predicate::SumParity { .. }) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(format!("{:?} is not a valid {} bet", predicate, self))
        }
    }

    pub fn classify(&self, outcome: &Outcome) -> Option<Classification> {
        match (self, outcome) {
            (GameKind::Wingo, Outcome::Number(n)) => Some(Classification {
                sum: *n,
                size: if *n >= WINGO_BIG_FROM { SizeClass::Big } else { SizeClass::Small },
                parity: Parity::of(*n as u32),
            }),
            (GameKind::K3, Outcome::Dice(dice)) => {
                let sum: u8 = dice.iter().sum();
                Some(Classification {
                    sum,
                    size: if sum >= K3_BIG_FROM { SizeClass::Big } else { SizeClass::Small },
                    parity: Parity::of(sum as u32),
                })
            }
            (GameKind::FiveD, Outcome::FiveDigits(d)) => {
                let sum: u8 = d.iter().sum();
                Some(Classification {
                    sum,
                    size: sum_size(sum),
                    parity: Parity::of(sum as u32),
                })
            }
            _ => None,
        }
    }

    /// Winning multiplier of `predicate` against `outcome`, `None` if it loses
    pub fn evaluate(&self, predicate: &Predicate, outcome: &Outcome) -> Option<Multiplier> {
        let class = self.classify(outcome)?;
        let x = match (predicate, outcome) {
            (Predicate::Number { value }, Outcome::Number(n)) => (value == n).then_some(X_NUMBER),
            (Predicate::Color { color }, Outcome::Number(n)) => wingo_color(*color, *n),
            (Predicate::Size { size }, Outcome::Number(_)) => {
                (class.size == *size).then_some(X_EVEN_MONEY)
            }

            (Predicate::Sum { value }, Outcome::Dice(_)) => {
                (class.sum == *value).then(|| k3_sum_multiplier(*value))
            }
            (Predicate::SumSize { size }, Outcome::Dice(_) | Outcome::FiveDigits(_)) => {
                (class.size == *size).then_some(X_DICE_EVEN_MONEY)
            }
            (Predicate::SumParity { parity }, Outcome::Dice(_) | Outcome::FiveDigits(_)) => {
                (class.parity == *parity).then_some(X_DICE_EVEN_MONEY)
            }
            (Predicate::AnyTriple, Outcome::Dice([a, b, c])) => {
                (a == b && b == c).then_some(X_ANY_TRIPLE)
            }
            (Predicate::Triple { value }, Outcome::Dice(dice)) => {
                dice.iter().all(|d| d == value).then_some(X_TRIPLE)
            }
            (Predicate::Pair { value }, Outcome::Dice(dice)) => {
                (dice.iter().filter(|d| *d == value).count() >= 2).then_some(X_PAIR)
            }

            (Predicate::Digit { position, value }, Outcome::FiveDigits(d)) => d
                .get(*position as usize)
                .and_then(|digit| (digit == value).then_some(X_NUMBER)),
            (Predicate::PositionSize { position, size }, Outcome::FiveDigits(d)) => d
                .get(*position as usize)
                .and_then(|&digit| (digit_size(digit) == *size).then_some(X_DICE_EVEN_MONEY)),
            (Predicate::PositionParity { position, parity }, Outcome::FiveDigits(d)) => d
                .get(*position as usize)
                .and_then(|&digit| {
                    (Parity::of(digit as u32) == *parity).then_some(X_DICE_EVEN_MONEY)
                }),
            _ => None,
        };
        x.map(Multiplier)
    }

    /// Which slice of the outcome a predicate reads
    pub fn scope(&self, predicate: &Predicate) -> Scope {
        match (self, predicate) {
            (GameKind::FiveD, Predicate::Digit { position, .. })
            | (GameKind::FiveD, Predicate::PositionSize { position, .. })
            | (GameKind::FiveD, Predicate::PositionParity { position, .. }) => {
                Scope::Position(*position)
            }
            (GameKind::FiveD, _) => Scope::Sum,
            _ => Scope::Whole,
        }
    }

    /// Largest multiplier the predicate can pay, for risk limits and display
    pub fn max_multiplier(&self, predicate: &Predicate) -> Multiplier {
        let best = match self.scope(predicate) {
            Scope::Whole => (0..self.outcome_space_size())
                .filter_map(|i| self.outcome_at(i))
                .filter_map(|o| self.evaluate(predicate, &o))
                .max(),
            Scope::Position(position) => (0..DIGITS)
                .filter_map(|d| {
                    let mut digits = [0u8; POSITIONS];
                    digits[position as usize % POSITIONS] = d;
                    self.evaluate(predicate, &Outcome::FiveDigits(digits))
                })
                .max(),
            Scope::Sum => (0..=outcome_index::MAX_SUM)
                .filter_map(|s| outcome_index::five_d_index().representative(s))
                .filter_map(|d| self.evaluate(predicate, &Outcome::FiveDigits(d)))
                .max(),
        };
        best.unwrap_or(Multiplier(0))
    }
}

fn wingo_color(color: Color, n: u8) -> Option<u32> {
    match color {
        Color::Green if n % 2 == 1 => Some(if n == 5 { X_SPLIT_COLOR } else { X_EVEN_MONEY }),
        Color::Red if n % 2 == 0 => Some(if n == 0 { X_SPLIT_COLOR } else { X_EVEN_MONEY }),
        Color::Violet if n == 0 || n == 5 => Some(X_VIOLET),
        _ => None,
    }
}

fn k3_sum_multiplier(sum: u8) -> u32 {
    let folded = if sum > 10 { 21 - sum } else { sum };
    K3_SUM_TABLE[(folded.clamp(3, 10) - 3) as usize]
}
