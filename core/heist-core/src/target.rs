//! Heist targets and their vaults.

use serde::{Deserialize, Serialize};

use crate::error::{HeistError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub community_id: String,
    pub target_id: String,
    /// Largest crew this target can be hit by.
    pub crew_size: u32,
    /// Chance in `0.0..=1.0` that a single crew member escapes.
    pub success: f64,
    pub vault: i64,
    pub vault_max: i64,
}

impl Target {
    pub fn validate(&self) -> Result<()> {
        if self.target_id.trim().is_empty() {
            return Err(HeistError::InvalidConfig(
                "target id is required".to_string(),
            ));
        }
        if self.crew_size == 0 {
            return Err(HeistError::InvalidConfig(
                "crew size must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.success) {
            return Err(HeistError::InvalidConfig(
                "success rate must be between 0 and 1".to_string(),
            ));
        }
        if self.vault_max < 0 || self.vault < 0 || self.vault > self.vault_max {
            return Err(HeistError::InvalidConfig(
                "vault must be between 0 and the vault maximum".to_string(),
            ));
        }
        Ok(())
    }

    pub fn vault_floor(&self, floor_percent: i64) -> i64 {
        self.vault_max.saturating_mul(floor_percent) / 100
    }

    /// Takes `amount` out of the vault, never leaving less than the floor.
    pub fn withdraw(&mut self, amount: i64, floor_percent: i64) {
        let remaining = self.vault.saturating_sub(amount.max(0));
        self.vault = remaining
            .max(self.vault_floor(floor_percent))
            .min(self.vault_max);
    }

    /// One recovery step. Returns true when the balance changed.
    pub fn recover(&mut self, factor: f64) -> bool {
        let grown = (self.vault as f64 * factor).floor();
        let next = if grown.is_finite() {
            (grown as i64).clamp(0, self.vault_max)
        } else {
            self.vault_max
        };
        if next == self.vault {
            return false;
        }
        self.vault = next;
        true
    }
}

/// Picks the target with the smallest crew threshold that still fits the crew.
/// Equal thresholds resolve to the lowest target id.
pub fn select_target(targets: &[Target], crew_size: usize) -> Option<&Target> {
    targets
        .iter()
        .filter(|target| target.crew_size as usize >= crew_size)
        .min_by(|left, right| {
            left.crew_size
                .cmp(&right.crew_size)
                .then_with(|| left.target_id.cmp(&right.target_id))
        })
}

pub fn sort_targets(targets: &mut [Target]) {
    targets.sort_by(|left, right| {
        left.crew_size
            .cmp(&right.crew_size)
            .then_with(|| left.target_id.cmp(&right.target_id))
    });
}
