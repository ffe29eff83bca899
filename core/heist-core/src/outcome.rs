//! Rolls the fate of every crew member against a target.
//!
//! Resolution is pure: it reads the target and theme and returns what should
//! happen. Applying penalties, payouts and vault withdrawals is left to the
//! caller so it can bail out if the session was reset in the meantime.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::target::Target;
use crate::theme::{FailureResult, Theme};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Escaped,
    Apprehended,
    Dead,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberOutcome {
    pub member_id: String,
    pub outcome: Outcome,
    /// Theme message with the member placeholder still in place.
    pub message: String,
    pub stolen: i64,
    pub bonus: i64,
}

impl MemberOutcome {
    pub fn total(&self) -> i64 {
        self.stolen.saturating_add(self.bonus)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeistResult {
    pub target_id: String,
    pub members: Vec<MemberOutcome>,
    /// Credits taken out of the vault, split evenly between escapees.
    pub haul: i64,
}

impl HeistResult {
    pub fn escaped(&self) -> impl Iterator<Item = &MemberOutcome> {
        self.members
            .iter()
            .filter(|member| member.outcome == Outcome::Escaped)
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.members
            .iter()
            .filter(|member| member.outcome == outcome)
            .count()
    }
}

const FALLBACK_ESCAPE: &str = "{member} got away clean.";
const FALLBACK_CAPTURE: &str = "{member} was caught by the police.";

pub fn resolve<R: Rng>(
    rng: &mut R,
    crew: &[String],
    target: &Target,
    theme: &Theme,
    haul_range: (f64, f64),
) -> HeistResult {
    let mut members: Vec<MemberOutcome> = crew
        .iter()
        .map(|member_id| {
            if rng.gen::<f64>() < target.success {
                let (message, bonus) = match theme.good.choose(&mut *rng) {
                    Some(good) => (good.message.clone(), good.amount.max(0)),
                    None => (FALLBACK_ESCAPE.to_string(), 0),
                };
                MemberOutcome {
                    member_id: member_id.clone(),
                    outcome: Outcome::Escaped,
                    message,
                    stolen: 0,
                    bonus,
                }
            } else {
                let (message, result) = match theme.bad.choose(&mut *rng) {
                    Some(bad) => (bad.message.clone(), bad.result),
                    None => (FALLBACK_CAPTURE.to_string(), FailureResult::Apprehended),
                };
                MemberOutcome {
                    member_id: member_id.clone(),
                    outcome: match result {
                        FailureResult::Apprehended => Outcome::Apprehended,
                        FailureResult::Dead => Outcome::Dead,
                    },
                    message,
                    stolen: 0,
                    bonus: 0,
                }
            }
        })
        .collect();

    let escapees = members
        .iter()
        .filter(|member| member.outcome == Outcome::Escaped)
        .count() as i64;
    let mut haul = 0;
    if escapees > 0 && target.vault > 0 {
        let (min, max) = haul_range;
        let fraction = if max > min {
            rng.gen_range(min..=max)
        } else {
            min
        };
        let share = (target.vault as f64 * fraction).floor() as i64 / escapees;
        for member in members
            .iter_mut()
            .filter(|member| member.outcome == Outcome::Escaped)
        {
            member.stolen = share;
        }
        haul = share * escapees;
    }

    HeistResult {
        target_id: target.target_id.clone(),
        members,
        haul,
    }
}
