use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported game types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GameKind {
    /// Single number 0-9 with colour and size side bets
    #[serde(rename = "wingo")]
    Wingo,
    /// Three dice, 1-6 each
    #[serde(rename = "k3")]
    K3,
    /// Five positions A-E, digit 0-9 each
    #[serde(rename = "5d")]
    FiveD,
}

impl GameKind {
    pub fn all() -> [GameKind; 3] {
        [GameKind::Wingo, GameKind::K3, GameKind::FiveD]
    }

    /// Stable short code used in storage keys and VRF messages
    pub fn code(&self) -> &'static str {
        match self {
            GameKind::Wingo => "wingo",
            GameKind::K3 => "k3",
            GameKind::FiveD => "5d",
        }
    }
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::str::FromStr for GameKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wingo" => Ok(GameKind::Wingo),
            "k3" => Ok(GameKind::K3),
            "5d" | "fived" => Ok(GameKind::FiveD),
            other => Err(format!("unknown game '{}'", other)),
        }
    }
}

/// Big/small classification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    Big,
    Small,
}

/// Odd/even classification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    Odd,
    Even,
}

impl Parity {
    pub fn of(value: u32) -> Self {
        if value % 2 == 0 {
            Parity::Even
        } else {
            Parity::Odd
        }
    }
}

/// Wingo colours
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Green,
    Red,
    Violet,
}

/// A concrete period result
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Outcome {
    Number(u8),
    Dice([u8; 3]),
    FiveDigits([u8; 5]),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Number(n) => write!(f, "{}", n),
            Outcome::Dice([a, b, c]) => write!(f, "{}-{}-{}", a, b, c),
            Outcome::FiveDigits(d) => {
                for digit in d {
                    write!(f, "{}", digit)?;
                }
                Ok(())
            }
        }
    }
}

/// The condition a bet wins under
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    /// Wingo: exact number
    Number { value: u8 },
    /// Wingo: colour of the number
    Color { color: Color },
    /// Wingo: number size (5-9 big)
    Size { size: SizeClass },
    /// K3: exact dice sum
    Sum { value: u8 },
    /// K3 and 5D: size of the sum
    SumSize { size: SizeClass },
    /// K3 and 5D: parity of the sum
    SumParity { parity: Parity },
    /// K3: all three dice equal
    AnyTriple,
    /// K3: all three dice show `value`
    Triple { value: u8 },
    /// K3: at least two dice show `value`
    Pair { value: u8 },
    /// 5D: exact digit at a position (0 = A .. 4 = E)
    Digit { position: u8, value: u8 },
    /// 5D: size of one position's digit (5-9 big)
    PositionSize { position: u8, size: SizeClass },
    /// 5D: parity of one position's digit
    PositionParity { position: u8, parity: Parity },
}

/// Payout multiplier in basis points (10_000 = 1x stake returned)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Multiplier(pub u32);

impl Multiplier {
    pub const ONE: u32 = 10_000;

    /// Amount paid to a winning bet of `amount`, floored to the minor unit
    pub fn payout(&self, amount: u64) -> u64 {
        ((amount as u128 * self.0 as u128) / Self::ONE as u128) as u64
    }
}

impl fmt::Display for Multiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:04}x", self.0 / Self::ONE, self.0 % Self::ONE)
    }
}

/// Derived properties of an outcome
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Classification {
    pub sum: u8,
    pub size: SizeClass,
    pub parity: Parity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiplier_payout_floors() {
        assert_eq!(Multiplier(90_000).payout(100), 900);
        assert_eq!(Multiplier(19_600).payout(3), 5);
        assert_eq!(Multiplier(20_000).payout(u64::MAX / 2), u64::MAX - 1);
    }

    #[test]
    fn test_predicate_wire_format() {
        let p = Predicate::Digit { position: 2, value: 7 };
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"{"kind":"digit","position":2,"value":7}"#);

        let parsed: Predicate = serde_json::from_str(r#"{"kind":"color","color":"green"}"#).unwrap();
        assert_eq!(parsed, Predicate::Color { color: Color::Green });
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(Outcome::FiveDigits([0, 1, 2, 3, 4]).to_string(), "01234");
        assert_eq!(Outcome::Dice([1, 3, 6]).to_string(), "1-3-6");
        assert_eq!("5D".parse::<GameKind>().unwrap(), GameKind::FiveD);
    }
}
