//! Wire views for responses whose core types are not client-shaped.

use heist_core::{Config, MemberStats};
use serde::Serialize;

/// Durations go out as whole seconds, matching `update_config` params.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigView {
    pub community_id: String,
    pub cost: i64,
    pub bail: i64,
    pub sentence_secs: u64,
    pub patrol_secs: u64,
    pub death_secs: u64,
    pub wait_secs: u64,
    pub theme: String,
    pub alert_remaining_secs: Option<u64>,
}

impl ConfigView {
    pub fn new(config: &Config) -> Self {
        Self {
            community_id: config.community_id.clone(),
            cost: config.heist_cost,
            bail: config.bail_base,
            sentence_secs: config.sentence_base.as_secs(),
            patrol_secs: config.police_alert.as_secs(),
            death_secs: config.death_duration.as_secs(),
            wait_secs: config.wait_time.as_secs(),
            theme: config.theme.clone(),
            alert_remaining_secs: config
                .alert_remaining(chrono::Utc::now())
                .map(|remaining| remaining.as_secs()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberView {
    pub display_name: String,
    pub balance: i64,
    pub stats: MemberStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn config_view_reports_whole_seconds() {
        let mut config = Config::new("guild-1", "heist");
        config.wait_time = Duration::from_millis(1_500);
        let view = ConfigView::new(&config);
        assert_eq!(view.wait_secs, 1);
        assert_eq!(view.cost, config.heist_cost);
        assert_eq!(view.alert_remaining_secs, None);
    }
}
