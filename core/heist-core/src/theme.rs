//! Themes give a heist its vocabulary and its narrated outcomes.
//!
//! Good messages carry the flat bonus paid to a member who escapes; bad
//! messages carry the failure result, so the message drawn for a failing
//! member also decides whether they are apprehended or killed.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub const MEMBER_PLACEHOLDER: &str = "{member}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureResult {
    Apprehended,
    Dead,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodMessage {
    pub message: String,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadMessage {
    pub message: String,
    pub result: FailureResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    pub id: String,
    pub heist: String,
    pub crew: String,
    pub police: String,
    pub jail: String,
    pub bail: String,
    pub sentence: String,
    pub vault: String,
    pub oob: String,
    #[serde(default)]
    pub good: Vec<GoodMessage>,
    #[serde(default)]
    pub bad: Vec<BadMessage>,
}

impl Theme {
    /// Substitutes the member's display name into an outcome message.
    pub fn narrate(message: &str, member_name: &str) -> String {
        message.replace(MEMBER_PLACEHOLDER, &format!("**{}**", member_name))
    }
}

static BUILTIN: Lazy<Theme> = Lazy::new(|| Theme {
    id: "heist".to_string(),
    heist: "heist".to_string(),
    crew: "crew".to_string(),
    police: "police".to_string(),
    jail: "jail".to_string(),
    bail: "bail".to_string(),
    sentence: "sentence".to_string(),
    vault: "vault".to_string(),
    oob: "out on bail".to_string(),
    good: vec![
        good("{member} slipped out the service entrance with a bag of cash.", 25),
        good("{member} cracked the safe with seconds to spare.", 50),
        good("{member} drove the getaway car like a professional.", 40),
        good("{member} bribed the night guard and strolled out the front door.", 10),
        good("{member} hid in a laundry cart until the coast was clear.", 30),
    ],
    bad: vec![
        bad("{member} tripped the silent alarm and was cuffed at the door.", FailureResult::Apprehended),
        bad("{member} was recognised on camera and picked up the next morning.", FailureResult::Apprehended),
        bad("{member} got lost in the vents and surrendered.", FailureResult::Apprehended),
        bad("{member} exchanged fire with the guards and did not make it.", FailureResult::Dead),
        bad("{member} fell down an elevator shaft.", FailureResult::Dead),
    ],
});

/// The theme every community can fall back to.
pub fn builtin() -> &'static Theme {
    &BUILTIN
}

fn good(message: &str, amount: i64) -> GoodMessage {
    GoodMessage {
        message: message.to_string(),
        amount,
    }
}

fn bad(message: &str, result: FailureResult) -> BadMessage {
    BadMessage {
        message: message.to_string(),
        result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_has_both_failure_results() {
        let theme = builtin();
        assert!(theme
            .bad
            .iter()
            .any(|msg| msg.result == FailureResult::Apprehended));
        assert!(theme.bad.iter().any(|msg| msg.result == FailureResult::Dead));
        assert!(!theme.good.is_empty());
    }

    #[test]
    fn narrate_bolds_member_name() {
        let line = Theme::narrate("{member} ran.", "Rook");
        assert_eq!(line, "**Rook** ran.");
    }
}
