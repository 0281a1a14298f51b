//! Result selection for a locked period.
//!
//! A stored admin override wins. Otherwise the outcome is a uniform VRF draw
//! over the whole outcome space, keyed only by the period identity, so it is
//! the same on every worker and every retry and anyone holding the public key
//! can check it. Exposure is read for the audit trail, never for the choice.

use crate::clock::PeriodKey;
use crate::errors::SelectionError;
use crate::exposure::ExposureSnapshot;
use crate::games::{five_d_index, vrf_engine::uniform_index, GameKind, Outcome, VrfBundle, VrfEngine};
use crate::period_store::OverrideRecord;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResultSource {
    Override { admin_id: String },
    Vrf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub outcome: Outcome,
    pub source: ResultSource,
    pub vrf: Option<VrfBundle>,
    /// What the winning bucket costs according to the snapshot
    pub winning_liability: u64,
}

pub struct ResultSelector {
    vrf: Arc<VrfEngine>,
}

impl ResultSelector {
    pub fn new(vrf: Arc<VrfEngine>) -> Self {
        Self { vrf }
    }

    pub fn public_key_hex(&self) -> String {
        self.vrf.public_key_hex()
    }

    pub fn select_result(
        &self,
        key: PeriodKey,
        override_record: Option<&OverrideRecord>,
        snapshot: &ExposureSnapshot,
        unique_bettors: u64,
    ) -> Result<Selection, SelectionError> {
        let game = key.game;

        if let Some(record) = override_record {
            game.validate_outcome(&record.outcome)
                .map_err(|reason| SelectionError::InvalidOverride { game, reason })?;
            warn!(
                period = %key,
                admin_id = %record.admin_id,
                outcome = %record.outcome,
                unique_bettors,
                total_bet = snapshot.total_bet,
                "📝 Admin override applied"
            );
            return Ok(Selection {
                outcome: record.outcome,
                source: ResultSource::Override {
                    admin_id: record.admin_id.clone(),
                },
                vrf: None,
                winning_liability: snapshot.liability_of(&record.outcome).unwrap_or(0),
            });
        }

        let space = game.outcome_space_size();
        if space == 0 {
            return Err(SelectionError::EmptyOutcomeSpace(game));
        }

        let bundle = self.vrf.draw(&key.to_string());
        let output = bundle.output_bytes().map_err(SelectionError::Vrf)?;
        let index = uniform_index(&output, space)?;
        let outcome = outcome_for_index(game, index)?;

        debug!(
            period = %key,
            index,
            outcome = %outcome,
            unique_bettors,
            "VRF draw"
        );

        Ok(Selection {
            outcome,
            source: ResultSource::Vrf,
            winning_liability: snapshot.liability_of(&outcome).unwrap_or(0),
            vrf: Some(bundle),
        })
    }
}

fn outcome_for_index(game: GameKind, index: u32) -> Result<Outcome, SelectionError> {
    let outcome = game.outcome_at(index).ok_or_else(|| {
        SelectionError::IndexCorrupted(format!("{} has no outcome at {}", game, index))
    })?;

    if let (GameKind::FiveD, Outcome::FiveDigits(digits)) = (game, &outcome) {
        let props = five_d_index().check(index)?;
        if &props.digits != digits {
            return Err(SelectionError::IndexCorrupted(format!(
                "index row {} holds {:?}, expected {:?}",
                index, props.digits, digits
            )));
        }
    }
    Ok(outcome)
}

/// Public check of a VRF-sourced result: proof valid, message bound to the
/// period, and the outcome really is the one the output maps to.
pub fn verify_selection(key: PeriodKey, outcome: &Outcome, bundle: &VrfBundle) -> Result<bool, String> {
    let message = key.to_string();
    if !VrfEngine::verify(bundle, &message)? {
        return Ok(false);
    }
    let output = bundle.output_bytes()?;
    let index = uniform_index(&output, key.game.outcome_space_size()).map_err(|e| e.to_string())?;
    Ok(key.game.outcome_at(index).as_ref() == Some(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::PeriodId;
    use crate::exposure::ExposureBook;
    use crate::games::Predicate;
    use chrono::Utc;

    fn selector() -> ResultSelector {
        ResultSelector::new(Arc::new(VrfEngine::from_seed(&[42u8; 32]).unwrap()))
    }

    fn key(game: GameKind, seq: u64) -> PeriodKey {
        PeriodKey::new(game, 60, PeriodId::from_raw(2026101700000 + seq))
    }

    #[test]
    fn test_draw_is_deterministic_and_verifiable() {
        let selector = selector();
        let k = key(GameKind::K3, 12);
        let empty = ExposureSnapshot::empty(k);
        let a = selector.select_result(k, None, &empty, 0).unwrap();
        let b = selector.select_result(k, None, &empty, 0).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.source, ResultSource::Vrf);

        let bundle = a.vrf.as_ref().unwrap();
        assert!(verify_selection(k, &a.outcome, bundle).unwrap());
        assert!(!verify_selection(key(GameKind::K3, 13), &a.outcome, bundle).unwrap());
    }

    #[test]
    fn test_bets_do_not_influence_draw() {
        let selector = selector();
        let k = key(GameKind::Wingo, 7);
        let empty = ExposureSnapshot::empty(k);
        let unbiased = selector.select_result(k, None, &empty, 0).unwrap();

        // A heavy bet on exactly the drawn number changes nothing
        let target = unbiased.outcome;
        let Outcome::Number(n) = target else { panic!("wingo outcome") };
        let book = ExposureBook::new(GameKind::Wingo);
        book.record("whale", &Predicate::Number { value: n }, 1_000_000);
        let loaded = selector.select_result(k, None, &book.snapshot(k), 1).unwrap();

        assert_eq!(loaded.outcome, target);
        assert_eq!(loaded.winning_liability, 9_000_000);
    }

    #[test]
    fn test_wingo_draw_is_uniform() {
        let selector = selector();
        let mut counts = [0u32; 10];
        for seq in 1..=10_000u64 {
            let k = key(GameKind::Wingo, seq);
            let selection = selector
                .select_result(k, None, &ExposureSnapshot::empty(k), 0)
                .unwrap();
            let Outcome::Number(n) = selection.outcome else { panic!("wingo outcome") };
            counts[n as usize] += 1;
        }
        // Expected 1000 per bucket; 150 is roughly five standard deviations
        for (n, &c) in counts.iter().enumerate() {
            assert!((850..=1150).contains(&c), "number {} drawn {} times", n, c);
        }
    }

    #[test]
    fn test_five_d_draw_in_range_and_consistent() {
        let selector = selector();
        for seq in 1..=50u64 {
            let k = key(GameKind::FiveD, seq);
            let selection = selector
                .select_result(k, None, &ExposureSnapshot::empty(k), 0)
                .unwrap();
            let Outcome::FiveDigits(d) = selection.outcome else { panic!("5d outcome") };
            assert!(d.iter().all(|&x| x <= 9));
        }
    }

    #[test]
    fn test_override_takes_precedence() {
        let selector = selector();
        let k = key(GameKind::K3, 3);
        let record = OverrideRecord {
            outcome: Outcome::Dice([6, 6, 6]),
            admin_id: "ops-1".to_string(),
            set_at: Utc::now(),
        };
        let selection = selector
            .select_result(k, Some(&record), &ExposureSnapshot::empty(k), 4)
            .unwrap();
        assert_eq!(selection.outcome, Outcome::Dice([6, 6, 6]));
        assert_eq!(
            selection.source,
            ResultSource::Override {
                admin_id: "ops-1".to_string()
            }
        );
        assert!(selection.vrf.is_none());
    }

    #[test]
    fn test_invalid_override_fails_loudly() {
        let selector = selector();
        let k = key(GameKind::K3, 3);
        let record = OverrideRecord {
            outcome: Outcome::Number(3),
            admin_id: "ops-1".to_string(),
            set_at: Utc::now(),
        };
        let err = selector
            .select_result(k, Some(&record), &ExposureSnapshot::empty(k), 0)
            .unwrap_err();
        assert!(matches!(err, SelectionError::InvalidOverride { .. }));
    }
}
