//! Criminal status of a community member.
//!
//! One [`MemberRecord`] exists per community and member once they first take
//! part in a heist. Records are never deleted; the admin clear resets them.
//!
//! ## Timers
//!
//! Exactly one timer is meaningful at a time, chosen by `status`:
//!
//! | status        | meaningful timer   |
//! |---------------|--------------------|
//! | `Apprehended` | `jail_release_at`  |
//! | `OutOnBail`   | `jail_release_at`  |
//! | `Dead`        | `death_revive_at`  |
//! | `Free`        | none               |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::{offset_by, Config};
use crate::error::{HeistError, Result};
use crate::render::format_duration;
use crate::theme::Theme;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Free,
    Apprehended,
    Dead,
    OutOnBail,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Free => "free",
            MemberStatus::Apprehended => "apprehended",
            MemberStatus::Dead => "dead",
            MemberStatus::OutOnBail => "out_on_bail",
        }
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MemberStatus::Free => "Free",
            MemberStatus::Apprehended => "Apprehended",
            MemberStatus::Dead => "Dead",
            MemberStatus::OutOnBail => "Out on Bail",
        };
        f.write_str(label)
    }
}

/// Named tier for a criminal level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriminalTier {
    Greenhorn,
    Renegade,
    Veteran,
    Commander,
    WarChief,
    Legend,
    Immortal,
}

impl CriminalTier {
    pub fn for_level(level: u32) -> Self {
        match level {
            100.. => CriminalTier::Immortal,
            75.. => CriminalTier::Legend,
            50.. => CriminalTier::WarChief,
            25.. => CriminalTier::Commander,
            10.. => CriminalTier::Veteran,
            1.. => CriminalTier::Renegade,
            0 => CriminalTier::Greenhorn,
        }
    }
}

impl fmt::Display for CriminalTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CriminalTier::Greenhorn => "Greenhorn",
            CriminalTier::Renegade => "Renegade",
            CriminalTier::Veteran => "Veteran",
            CriminalTier::Commander => "Commander",
            CriminalTier::WarChief => "WarChief",
            CriminalTier::Legend => "Legend",
            CriminalTier::Immortal => "Immortal",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub community_id: String,
    pub member_id: String,
    pub status: MemberStatus,
    pub criminal_level: u32,
    pub spree: u32,
    pub jail_counter: u32,
    pub total_jail: u32,
    pub deaths: u32,
    pub bail_cost: i64,
    pub sentence: Duration,
    #[serde(default)]
    pub jail_release_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub death_revive_at: Option<DateTime<Utc>>,
}

/// Result of a successful eligibility check.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Eligibility {
    /// One-time notice when a timer expired and the member was released.
    pub notice: Option<String>,
    /// True when the record changed and should be persisted.
    pub changed: bool,
}

impl MemberRecord {
    pub fn new(community_id: impl Into<String>, member_id: impl Into<String>) -> Self {
        Self {
            community_id: community_id.into(),
            member_id: member_id.into(),
            status: MemberStatus::Free,
            criminal_level: 0,
            spree: 0,
            jail_counter: 0,
            total_jail: 0,
            deaths: 0,
            bail_cost: 0,
            sentence: Duration::ZERO,
            jail_release_at: None,
            death_revive_at: None,
        }
    }

    pub fn tier(&self) -> CriminalTier {
        CriminalTier::for_level(self.criminal_level)
    }

    pub fn remaining_sentence(&self, now: DateTime<Utc>) -> Option<Duration> {
        remaining_until(self.jail_release_at, now)
    }

    pub fn remaining_death(&self, now: DateTime<Utc>) -> Option<Duration> {
        remaining_until(self.death_revive_at, now)
    }

    /// Applies the apprehension penalty. Sentence scales with the jail counter;
    /// bail triples only when the member was already out on bail.
    pub fn apprehend(&mut self, config: &Config, now: DateTime<Utc>) {
        let multiplier = self.jail_counter.saturating_add(1);
        let sentence = config.sentence_base.saturating_mul(multiplier);
        let bail = if self.status == MemberStatus::OutOnBail {
            config.bail_base.saturating_mul(3)
        } else {
            config.bail_base
        };

        self.bail_cost = bail;
        self.sentence = sentence;
        self.jail_counter = multiplier;
        self.total_jail = self.total_jail.saturating_add(1);
        self.criminal_level = self.criminal_level.saturating_add(1);
        self.spree = 0;
        self.status = MemberStatus::Apprehended;
        self.jail_release_at = Some(offset_by(now, sentence));
        self.death_revive_at = None;
    }

    /// Clears jail and bail state. `jail_counter` and `criminal_level` are
    /// kept so both only grow until an admin clear.
    pub fn kill(&mut self, config: &Config, now: DateTime<Utc>) {
        self.bail_cost = 0;
        self.sentence = Duration::ZERO;
        self.jail_release_at = None;
        self.deaths = self.deaths.saturating_add(1);
        self.spree = 0;
        self.status = MemberStatus::Dead;
        self.death_revive_at = Some(offset_by(now, config.death_duration));
    }

    pub fn escape(&mut self) {
        self.spree = self.spree.saturating_add(1);
    }

    /// Frees the member and drops every timer. Counters are untouched.
    pub fn release(&mut self) {
        self.status = MemberStatus::Free;
        self.bail_cost = 0;
        self.sentence = Duration::ZERO;
        self.jail_release_at = None;
        self.death_revive_at = None;
    }

    /// Admin reset: level and jail counter go back to zero, then release.
    pub fn clear(&mut self) {
        self.criminal_level = 0;
        self.jail_counter = 0;
        self.release();
    }

    /// Moves an apprehended member onto bail. Payment is the caller's job.
    pub fn bail_out(&mut self, now: DateTime<Utc>) -> Result<i64> {
        match self.status {
            MemberStatus::Apprehended => {}
            _ => return Err(HeistError::NotJailed(self.member_id.clone())),
        }
        if self.remaining_sentence(now).is_none() {
            self.release();
            return Err(HeistError::SentenceServed);
        }
        self.status = MemberStatus::OutOnBail;
        Ok(self.bail_cost)
    }

    /// Brings a dead member back once their timer has expired.
    pub fn revive(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != MemberStatus::Dead {
            return Ok(());
        }
        if let Some(remaining) = self.remaining_death(now) {
            return Err(HeistError::MemberIneligible {
                reason: format!(
                    "You are dead. You will revive in {}",
                    format_duration(remaining)
                ),
                remaining,
            });
        }
        self.release();
        Ok(())
    }

    /// Decides whether the member may join a heist now, auto-releasing
    /// members whose timers have run out.
    pub fn check_eligibility(&mut self, theme: &Theme, now: DateTime<Utc>) -> Result<Eligibility> {
        match self.status {
            MemberStatus::Free => Ok(Eligibility::default()),
            MemberStatus::OutOnBail => {
                if self.remaining_sentence(now).is_some() {
                    return Ok(Eligibility::default());
                }
                self.release();
                Ok(Eligibility {
                    notice: Some(format!(
                        "Your {} is over, and you are no longer on probation! 3x penalty removed.",
                        theme.sentence
                    )),
                    changed: true,
                })
            }
            MemberStatus::Apprehended => match self.remaining_sentence(now) {
                Some(remaining) => Err(HeistError::MemberIneligible {
                    reason: format!(
                        "You are in {}. You are serving a {} of {}.\nYou can wait out your remaining {} of {}, or pay {} credits to be released on {}.",
                        theme.jail,
                        theme.sentence,
                        format_duration(self.sentence),
                        theme.sentence,
                        format_duration(remaining),
                        self.bail_cost,
                        theme.bail
                    ),
                    remaining,
                }),
                None => {
                    self.release();
                    Ok(Eligibility {
                        notice: Some(
                            "You served your time. Enjoy the fresh air of freedom while you can."
                                .to_string(),
                        ),
                        changed: true,
                    })
                }
            },
            MemberStatus::Dead => match self.remaining_death(now) {
                Some(remaining) => Err(HeistError::MemberIneligible {
                    reason: format!(
                        "You are dead. You will revive in {}",
                        format_duration(remaining)
                    ),
                    remaining,
                }),
                None => {
                    self.release();
                    Ok(Eligibility {
                        notice: Some("You have risen from the dead!".to_string()),
                        changed: true,
                    })
                }
            },
        }
    }

    pub fn stats(&self, now: DateTime<Utc>) -> MemberStats {
        MemberStats {
            member_id: self.member_id.clone(),
            status: self.status,
            tier: self.tier(),
            criminal_level: self.criminal_level,
            spree: self.spree,
            jail_counter: self.jail_counter,
            total_jail: self.total_jail,
            deaths: self.deaths,
            bail_cost: self.bail_cost,
            sentence_secs: self.sentence.as_secs(),
            sentence_remaining_secs: match self.status {
                MemberStatus::Apprehended | MemberStatus::OutOnBail => {
                    self.remaining_sentence(now).map(|value| value.as_secs())
                }
                _ => None,
            },
            revive_remaining_secs: match self.status {
                MemberStatus::Dead => self.remaining_death(now).map(|value| value.as_secs()),
                _ => None,
            },
        }
    }
}

/// Read-only view returned by member stats lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberStats {
    pub member_id: String,
    pub status: MemberStatus,
    pub tier: CriminalTier,
    pub criminal_level: u32,
    pub spree: u32,
    pub jail_counter: u32,
    pub total_jail: u32,
    pub deaths: u32,
    pub bail_cost: i64,
    pub sentence_secs: u64,
    pub sentence_remaining_secs: Option<u64>,
    pub revive_remaining_secs: Option<u64>,
}

fn remaining_until(deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<Duration> {
    let deadline = deadline?;
    if deadline <= now {
        return None;
    }
    (deadline - now).to_std().ok()
}
