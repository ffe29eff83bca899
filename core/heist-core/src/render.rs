//! Text rendering for durations, the live status message and the final table.

use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use std::time::Duration;

use crate::config::Config;
use crate::outcome::HeistResult;
use crate::theme::Theme;

/// Formats a duration as `1h 2m 3s`, dropping zero units. Zero is `0s`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    if total == 0 {
        return "0s".to_string();
    }
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;

    let parts: Vec<String> = [(days, "d"), (hours, "h"), (minutes, "m"), (seconds, "s")]
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| format!("{value}{unit}"))
        .collect();
    parts.join(" ")
}

/// What happened to the session since the status message was last shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    Plan,
    Join,
    Update,
    Start,
    Cancel,
    End,
}

impl StatusAction {
    fn status_text(&self, deadline: DateTime<Utc>, now: DateTime<Utc>) -> String {
        match self {
            StatusAction::Plan | StatusAction::Join | StatusAction::Update => {
                let remaining = (deadline - now).to_std().unwrap_or(Duration::ZERO);
                format!("Starts in {}", format_duration(round_up_secs(remaining)))
            }
            StatusAction::Start => "Started".to_string(),
            StatusAction::Cancel => "Canceled".to_string(),
            StatusAction::End => "Ended".to_string(),
        }
    }
}

fn round_up_secs(duration: Duration) -> Duration {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    Duration::from_secs(secs)
}

pub struct StatusView<'a> {
    pub theme: &'a Theme,
    pub config: &'a Config,
    pub initiator: &'a str,
    pub crew: &'a [String],
    pub deadline: DateTime<Utc>,
}

pub fn render_status(view: &StatusView<'_>, action: StatusAction, now: DateTime<Utc>) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "**{}**", capitalize(&view.theme.heist));
    let _ = writeln!(
        text,
        "A new {heist} is being planned by {initiator}. You can join the {heist} for a cost of {cost} credits at any time prior to the {heist} starting.",
        heist = view.theme.heist,
        initiator = view.initiator,
        cost = view.config.heist_cost,
    );
    let _ = writeln!(text, "Status: {}", action.status_text(view.deadline, now));
    let noun = if view.crew.len() == 1 { "member" } else { "members" };
    let _ = write!(
        text,
        "{} ({} {}): {}",
        capitalize(&view.theme.crew),
        view.crew.len(),
        noun,
        view.crew.join(", ")
    );
    text
}

/// Results table for the members who escaped. `name` maps member ids to
/// display names.
pub fn render_results<F>(result: &HeistResult, name: F) -> String
where
    F: Fn(&str) -> String,
{
    let rows: Vec<[String; 4]> = result
        .escaped()
        .map(|member| {
            [
                name(&member.member_id),
                member.stolen.to_string(),
                member.bonus.to_string(),
                member.total().to_string(),
            ]
        })
        .collect();
    if rows.is_empty() {
        return "No one made it out safe.".to_string();
    }

    let header = ["Player", "Loot", "Bonus", "Total"].map(String::from);
    let mut widths = header.clone().map(|cell| cell.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut table = String::new();
    for row in std::iter::once(&header).chain(rows.iter()) {
        let line: Vec<String> = row
            .iter()
            .zip(widths.iter())
            .map(|(cell, width)| format!("{cell:<width$}", width = *width))
            .collect();
        let _ = writeln!(table, "{}", line.join("  ").trim_end());
    }
    table.trim_end().to_string()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{MemberOutcome, Outcome};
    use crate::theme::builtin;

    #[test]
    fn durations_drop_zero_units() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3_723)), "1h 2m 3s");
        assert_eq!(format_duration(Duration::from_secs(3_600)), "1h");
    }

    #[test]
    fn status_shows_countdown_and_crew() {
        let now = Utc::now();
        let config = Config::new("guild-1", "heist");
        let crew = vec!["Boss".to_string(), "Rook".to_string()];
        let view = StatusView {
            theme: builtin(),
            config: &config,
            initiator: "Boss",
            crew: &crew,
            deadline: now + chrono::Duration::seconds(45),
        };

        let text = render_status(&view, StatusAction::Join, now);
        assert!(text.contains("planned by Boss"));
        assert!(text.contains("cost of 1500 credits"));
        assert!(text.contains("Status: Starts in 45s"));
        assert!(text.ends_with("Crew (2 members): Boss, Rook"));

        let text = render_status(&view, StatusAction::Cancel, now);
        assert!(text.contains("Status: Canceled"));
    }

    #[test]
    fn results_table_lists_escapees_only() {
        let result = HeistResult {
            target_id: "bank".to_string(),
            haul: 2_000,
            members: vec![
                MemberOutcome {
                    member_id: "u1".to_string(),
                    outcome: Outcome::Escaped,
                    message: String::new(),
                    stolen: 1_000,
                    bonus: 25,
                },
                MemberOutcome {
                    member_id: "u2".to_string(),
                    outcome: Outcome::Dead,
                    message: String::new(),
                    stolen: 0,
                    bonus: 0,
                },
            ],
        };
        let table = render_results(&result, |id| format!("name-{id}"));
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Player"));
        assert!(lines[1].starts_with("name-u1"));
        assert!(lines[1].ends_with("1025"));
    }

    #[test]
    fn results_without_escapees() {
        let result = HeistResult {
            target_id: "bank".to_string(),
            haul: 0,
            members: Vec::new(),
        };
        assert_eq!(render_results(&result, |id| id.to_string()), "No one made it out safe.");
    }
}
