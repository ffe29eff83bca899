//! Community configuration and process-wide engine settings.
//!
//! [`Config`] is the persisted per-community record read at the start of every
//! heist. [`EngineSettings`] are the daemon's tunables, deserialized from TOML
//! with every field defaulted so a partial file is always valid.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{HeistError, Result};

pub const DEFAULT_HEIST_COST: i64 = 1500;
pub const DEFAULT_BAIL_BASE: i64 = 250;
pub const DEFAULT_SENTENCE_BASE: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_DEATH_DURATION: Duration = Duration::from_secs(45 * 60);
pub const DEFAULT_POLICE_ALERT: Duration = Duration::from_secs(60);
pub const DEFAULT_WAIT_TIME: Duration = Duration::from_secs(60);
pub const DEFAULT_THEME: &str = "heist";
/// Upper bound for every admin-configurable duration.
pub const MAX_CONFIG_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub community_id: String,
    pub heist_cost: i64,
    pub bail_base: i64,
    pub sentence_base: Duration,
    pub death_duration: Duration,
    pub police_alert: Duration,
    pub wait_time: Duration,
    pub theme: String,
    /// New heists are refused until this instant passes.
    #[serde(default)]
    pub alert_until: Option<DateTime<Utc>>,
}

impl Config {
    pub fn new(community_id: impl Into<String>, theme: impl Into<String>) -> Self {
        Self {
            community_id: community_id.into(),
            heist_cost: DEFAULT_HEIST_COST,
            bail_base: DEFAULT_BAIL_BASE,
            sentence_base: DEFAULT_SENTENCE_BASE,
            death_duration: DEFAULT_DEATH_DURATION,
            police_alert: DEFAULT_POLICE_ALERT,
            wait_time: DEFAULT_WAIT_TIME,
            theme: theme.into(),
            alert_until: None,
        }
    }

    pub fn alert_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let until = self.alert_until?;
        if until <= now {
            return None;
        }
        (until - now).to_std().ok()
    }

    pub fn raise_alert(&mut self, now: DateTime<Utc>) {
        self.alert_until = Some(offset_by(now, self.police_alert));
    }

    pub fn apply_update(&mut self, update: &ConfigUpdate) -> Result<()> {
        if let Some(cost) = update.heist_cost {
            if cost < 0 {
                return Err(HeistError::InvalidConfig(
                    "cost must not be negative".to_string(),
                ));
            }
        }
        if let Some(bail) = update.bail_base {
            if bail < 0 {
                return Err(HeistError::InvalidConfig(
                    "bail must not be negative".to_string(),
                ));
            }
        }
        if update.wait_time == Some(Duration::ZERO) {
            return Err(HeistError::InvalidConfig(
                "wait time must be at least one second".to_string(),
            ));
        }
        for (name, value) in [
            ("sentence", update.sentence_base),
            ("patrol", update.police_alert),
            ("death", update.death_duration),
            ("wait", update.wait_time),
        ] {
            if value.is_some_and(|value| value > MAX_CONFIG_DURATION) {
                return Err(HeistError::InvalidConfig(format!(
                    "{name} duration must not exceed {} days",
                    MAX_CONFIG_DURATION.as_secs() / 86_400
                )));
            }
        }

        if let Some(cost) = update.heist_cost {
            self.heist_cost = cost;
        }
        if let Some(bail) = update.bail_base {
            self.bail_base = bail;
        }
        if let Some(sentence) = update.sentence_base {
            self.sentence_base = sentence;
        }
        if let Some(patrol) = update.police_alert {
            self.police_alert = patrol;
        }
        if let Some(death) = update.death_duration {
            self.death_duration = death;
        }
        if let Some(wait) = update.wait_time {
            self.wait_time = wait;
        }
        Ok(())
    }
}

/// Administrative change to a community's [`Config`]. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigUpdate {
    pub heist_cost: Option<i64>,
    pub bail_base: Option<i64>,
    pub sentence_base: Option<Duration>,
    pub police_alert: Option<Duration>,
    pub death_duration: Option<Duration>,
    pub wait_time: Option<Duration>,
}

/// `now + duration`, saturating at the latest representable instant.
pub(crate) fn offset_by(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Engine settings
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct EngineSettings {
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub vault: VaultSettings,
    #[serde(default)]
    pub outcome: OutcomeSettings,
    #[serde(default)]
    pub defaults: DefaultSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SessionSettings {
    /// Upper bound between status refreshes while a crew is being assembled.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl SessionSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct VaultSettings {
    #[serde(default = "default_vault_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_recovery_factor")]
    pub recovery_factor: f64,
    #[serde(default = "default_floor_percent")]
    pub floor_percent: i64,
}

impl VaultSettings {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs.max(1))
    }
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            tick_secs: default_vault_tick_secs(),
            recovery_factor: default_recovery_factor(),
            floor_percent: default_floor_percent(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct OutcomeSettings {
    #[serde(default = "default_haul_min_fraction")]
    pub haul_min_fraction: f64,
    #[serde(default = "default_haul_max_fraction")]
    pub haul_max_fraction: f64,
    #[serde(default)]
    pub rng_seed: Option<u64>,
}

impl OutcomeSettings {
    /// Haul bounds clamped into `0.0..=1.0` with `min <= max`.
    pub fn haul_range(&self) -> (f64, f64) {
        let clamp = |value: f64| {
            if value.is_finite() {
                value.clamp(0.0, 1.0)
            } else {
                0.0
            }
        };
        let min = clamp(self.haul_min_fraction);
        let max = clamp(self.haul_max_fraction);
        if min <= max {
            (min, max)
        } else {
            (max, min)
        }
    }
}

impl Default for OutcomeSettings {
    fn default() -> Self {
        Self {
            haul_min_fraction: default_haul_min_fraction(),
            haul_max_fraction: default_haul_max_fraction(),
            rng_seed: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DefaultSettings {
    #[serde(default = "default_theme")]
    pub theme: String,
    /// Balance given to ledger accounts on first use (daemon ledger only).
    #[serde(default)]
    pub opening_balance: i64,
}

impl Default for DefaultSettings {
    fn default() -> Self {
        Self {
            theme: default_theme(),
            opening_balance: 0,
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_vault_tick_secs() -> u64 {
    60
}

fn default_recovery_factor() -> f64 {
    1.04
}

fn default_floor_percent() -> i64 {
    4
}

fn default_haul_min_fraction() -> f64 {
    0.25
}

fn default_haul_max_fraction() -> f64 {
    0.60
}

fn default_theme() -> String {
    DEFAULT_THEME.to_string()
}
