//! Precomputed outcome space for the five-digit game.
//!
//! All 100,000 combinations are enumerated once per process and never
//! mutated afterwards, so the index is shared across threads without locks.
//! Settlement and exposure code look properties up here instead of
//! re-deriving them per round.

use crate::errors::SelectionError;
use crate::games::types::{Parity, SizeClass};
use once_cell::sync::Lazy;

pub const POSITIONS: usize = 5;
pub const DIGITS: u8 = 10;
pub const COMBINATIONS: u32 = 100_000;
pub const MAX_SUM: u8 = 45;

/// Sums at or above this are "big". Every sum classification goes through
/// [`sum_size`].
pub const SIZE_THRESHOLD: u8 = 22;

/// Digit at a single position is "big" from this value up
pub const DIGIT_SIZE_THRESHOLD: u8 = 5;

static FIVE_D_INDEX: Lazy<OutcomeIndex> = Lazy::new(OutcomeIndex::build);

/// Shared read-only index
pub fn five_d_index() -> &'static OutcomeIndex {
    &FIVE_D_INDEX
}

pub fn sum_size(sum: u8) -> SizeClass {
    if sum >= SIZE_THRESHOLD {
        SizeClass::Big
    } else {
        SizeClass::Small
    }
}

pub fn digit_size(digit: u8) -> SizeClass {
    if digit >= DIGIT_SIZE_THRESHOLD {
        SizeClass::Big
    } else {
        SizeClass::Small
    }
}

/// Position A is the most significant digit of the id
pub fn digits_of(id: u32) -> [u8; POSITIONS] {
    let mut digits = [0u8; POSITIONS];
    let mut rest = id;
    for slot in digits.iter_mut().rev() {
        *slot = (rest % 10) as u8;
        rest /= 10;
    }
    digits
}

pub fn id_of(digits: &[u8; POSITIONS]) -> Option<u32> {
    let mut id = 0u32;
    for &d in digits {
        if d >= DIGITS {
            return None;
        }
        id = id * 10 + d as u32;
    }
    Some(id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombinationProps {
    pub id: u32,
    pub digits: [u8; POSITIONS],
    pub sum: u8,
    pub size: SizeClass,
    pub parity: Parity,
}

/// Lookup key for [`OutcomeIndex::combinations_with_property`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    Sum(u8),
    SumSize(SizeClass),
    SumParity(Parity),
    Digit { position: u8, value: u8 },
}

/// All combinations sharing one sum
#[derive(Debug, Clone)]
pub struct SumGroup {
    pub sum: u8,
    pub ids: Vec<u32>,
    /// Combination with the smallest digit spread for this sum
    pub representative: u32,
    /// Most frequent digit per position among the group
    pub modal_digits: [u8; POSITIONS],
}

impl SumGroup {
    pub fn count(&self) -> usize {
        self.ids.len()
    }
}

pub struct OutcomeIndex {
    combos: Vec<CombinationProps>,
    by_sum: Vec<SumGroup>,
    big: Vec<u32>,
    small: Vec<u32>,
    odd: Vec<u32>,
    even: Vec<u32>,
    by_digit: Vec<Vec<u32>>,
}

impl OutcomeIndex {
    fn build() -> Self {
        let mut combos = Vec::with_capacity(COMBINATIONS as usize);
        let mut sum_ids: Vec<Vec<u32>> = vec![Vec::new(); MAX_SUM as usize + 1];
        let mut big = Vec::new();
        let mut small = Vec::new();
        let mut odd = Vec::new();
        let mut even = Vec::new();
        let mut by_digit: Vec<Vec<u32>> = vec![Vec::new(); POSITIONS * DIGITS as usize];

        for id in 0..COMBINATIONS {
            let digits = digits_of(id);
            let sum: u8 = digits.iter().sum();
            let size = sum_size(sum);
            let parity = Parity::of(sum as u32);

            sum_ids[sum as usize].push(id);
            match size {
                SizeClass::Big => big.push(id),
                SizeClass::Small => small.push(id),
            }
            match parity {
                Parity::Odd => odd.push(id),
                Parity::Even => even.push(id),
            }
            for (position, &d) in digits.iter().enumerate() {
                by_digit[position * DIGITS as usize + d as usize].push(id);
            }

            combos.push(CombinationProps {
                id,
                digits,
                sum,
                size,
                parity,
            });
        }

        let by_sum = sum_ids
            .into_iter()
            .enumerate()
            .map(|(sum, ids)| Self::group(&combos, sum as u8, ids))
            .collect();

        Self {
            combos,
            by_sum,
            big,
            small,
            odd,
            even,
            by_digit,
        }
    }

    fn group(combos: &[CombinationProps], sum: u8, ids: Vec<u32>) -> SumGroup {
        let mut counts = [[0u32; DIGITS as usize]; POSITIONS];
        let mut representative = ids[0];
        let mut best_spread = u8::MAX;

        for &id in &ids {
            let digits = combos[id as usize].digits;
            for (position, &d) in digits.iter().enumerate() {
                counts[position][d as usize] += 1;
            }
            let max = digits.iter().copied().max().unwrap_or(0);
            let min = digits.iter().copied().min().unwrap_or(0);
            if max - min < best_spread {
                best_spread = max - min;
                representative = id;
            }
        }

        let mut modal_digits = [0u8; POSITIONS];
        for (position, row) in counts.iter().enumerate() {
            let mut best = 0usize;
            for d in 1..row.len() {
                if row[d] > row[best] {
                    best = d;
                }
            }
            modal_digits[position] = best as u8;
        }

        SumGroup {
            sum,
            ids,
            representative,
            modal_digits,
        }
    }

    pub fn len(&self) -> usize {
        self.combos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combos.is_empty()
    }

    pub fn properties_of(&self, id: u32) -> Option<&CombinationProps> {
        self.combos.get(id as usize)
    }

    pub fn combinations_with_property(&self, property: Property) -> &[u32] {
        match property {
            Property::Sum(sum) => self
                .by_sum
                .get(sum as usize)
                .map(|g| g.ids.as_slice())
                .unwrap_or(&[]),
            Property::SumSize(SizeClass::Big) => &self.big,
            Property::SumSize(SizeClass::Small) => &self.small,
            Property::SumParity(Parity::Odd) => &self.odd,
            Property::SumParity(Parity::Even) => &self.even,
            Property::Digit { position, value } => {
                if position as usize >= POSITIONS || value >= DIGITS {
                    return &[];
                }
                &self.by_digit[position as usize * DIGITS as usize + value as usize]
            }
        }
    }

    pub fn sum_group(&self, sum: u8) -> Option<&SumGroup> {
        self.by_sum.get(sum as usize)
    }

    pub fn sum_groups(&self) -> &[SumGroup] {
        &self.by_sum
    }

    /// A concrete combination with the given sum
    pub fn representative(&self, sum: u8) -> Option<[u8; POSITIONS]> {
        self.sum_group(sum)
            .and_then(|g| self.properties_of(g.representative))
            .map(|p| p.digits)
    }

    /// Cross-check a stored row against its id before it is used as a result
    pub fn check(&self, id: u32) -> Result<&CombinationProps, SelectionError> {
        let props = self.properties_of(id).ok_or_else(|| {
            SelectionError::IndexCorrupted(format!("no combination with id {}", id))
        })?;
        let sum: u8 = props.digits.iter().sum();
        if props.id != id
            || id_of(&props.digits) != Some(id)
            || props.sum != sum
            || props.size != sum_size(sum)
            || props.parity != Parity::of(sum as u32)
        {
            return Err(SelectionError::IndexCorrupted(format!(
                "row {} disagrees with its digits {:?}",
                id, props.digits
            )));
        }
        Ok(props)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_covers_whole_space() {
        let index = five_d_index();
        assert_eq!(index.len(), COMBINATIONS as usize);

        let total: usize = index.sum_groups().iter().map(|g| g.count()).sum();
        assert_eq!(total, COMBINATIONS as usize);

        let big = index.combinations_with_property(Property::SumSize(SizeClass::Big)).len();
        let small = index.combinations_with_property(Property::SumSize(SizeClass::Small)).len();
        assert_eq!(big + small, COMBINATIONS as usize);
    }

    #[test]
    fn test_size_threshold_is_inclusive_on_big_side() {
        assert_eq!(sum_size(22), SizeClass::Big);
        assert_eq!(sum_size(21), SizeClass::Small);

        let index = five_d_index();
        let with_22 = index.properties_of(id_of(&[9, 9, 4, 0, 0]).unwrap()).unwrap();
        assert_eq!(with_22.sum, 22);
        assert_eq!(with_22.size, SizeClass::Big);
        let with_21 = index.properties_of(id_of(&[9, 9, 3, 0, 0]).unwrap()).unwrap();
        assert_eq!(with_21.size, SizeClass::Small);
    }

    #[test]
    fn test_sum_groups() {
        let index = five_d_index();
        assert_eq!(index.sum_group(0).unwrap().count(), 1);
        assert_eq!(index.sum_group(45).unwrap().count(), 1);
        assert_eq!(index.representative(45), Some([9, 9, 9, 9, 9]));
        // Number of ways five digits sum to one: one position holds the 1
        assert_eq!(index.sum_group(1).unwrap().count(), 5);

        for group in index.sum_groups() {
            let rep = index.representative(group.sum).unwrap();
            assert_eq!(rep.iter().sum::<u8>(), group.sum);
            for &id in &group.ids {
                assert_eq!(index.properties_of(id).unwrap().sum, group.sum);
            }
        }
        assert!(index.sum_group(46).is_none());
    }

    #[test]
    fn test_digit_lookup_and_round_trip() {
        let index = five_d_index();
        let ids = index.combinations_with_property(Property::Digit { position: 4, value: 7 });
        assert_eq!(ids.len(), 10_000);
        assert!(ids.iter().all(|&id| digits_of(id)[4] == 7));
        assert!(index
            .combinations_with_property(Property::Digit { position: 5, value: 0 })
            .is_empty());

        assert_eq!(digits_of(12_345), [1, 2, 3, 4, 5]);
        assert_eq!(id_of(&[1, 2, 3, 4, 5]), Some(12_345));
        assert_eq!(id_of(&[1, 2, 3, 4, 10]), None);
        assert!(index.check(99_999).is_ok());
        assert!(index.check(COMBINATIONS).is_err());
    }
}
