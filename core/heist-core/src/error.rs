//! Error types for heist-core operations.
//!
//! Domain rule violations are expected outcomes shown to the member who
//! triggered them; they are never logged as failures. Infrastructure failures
//! live in [`StoreError`] and are recovered locally by the callers.

use std::time::Duration;

use crate::render::format_duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Domain Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HeistError {
    // ─────────────────────────────────────────────────────────────────────
    // Session lifecycle
    // ─────────────────────────────────────────────────────────────────────
    #[error("A heist is already in progress")]
    AlreadyInProgress,

    #[error("No heist is being planned")]
    NoActiveEvent,

    #[error("You are already a member of the crew")]
    AlreadyMember,

    #[error("The heist has already been started")]
    EventAlreadyStarted,

    // ─────────────────────────────────────────────────────────────────────
    // Member eligibility
    // ─────────────────────────────────────────────────────────────────────
    #[error("You need {required} credits to participate, but only have {available}")]
    InsufficientFunds { required: i64, available: i64 },

    #[error("{reason}")]
    MemberIneligible { reason: String, remaining: Duration },

    #[error("The police are on high alert. Time remaining: {}", format_remaining(.remaining))]
    PoliceAlert { remaining: Duration },

    #[error("{0} is not in jail")]
    NotJailed(String),

    #[error("The sentence has already been served")]
    SentenceServed,

    // ─────────────────────────────────────────────────────────────────────
    // Catalog and configuration
    // ─────────────────────────────────────────────────────────────────────
    #[error("There is no target that can hold a crew of {crew_size}")]
    NoEligibleTarget { crew_size: usize },

    #[error("Target not found: {0}")]
    TargetNotFound(String),

    #[error("Theme not found: {0}")]
    ThemeNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("The heist service is unavailable: {0}")]
    Unavailable(String),
}

impl HeistError {
    /// Stable code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            HeistError::AlreadyInProgress => "already_in_progress",
            HeistError::NoActiveEvent => "no_active_event",
            HeistError::AlreadyMember => "already_member",
            HeistError::EventAlreadyStarted => "event_already_started",
            HeistError::InsufficientFunds { .. } => "insufficient_funds",
            HeistError::MemberIneligible { .. } => "member_ineligible",
            HeistError::PoliceAlert { .. } => "police_alert",
            HeistError::NotJailed(_) => "not_jailed",
            HeistError::SentenceServed => "sentence_served",
            HeistError::NoEligibleTarget { .. } => "no_eligible_target",
            HeistError::TargetNotFound(_) => "target_not_found",
            HeistError::ThemeNotFound(_) => "theme_not_found",
            HeistError::InvalidConfig(_) => "invalid_config",
            HeistError::Unavailable(_) => "unavailable",
        }
    }
}

fn format_remaining(remaining: &Duration) -> String {
    format_duration(*remaining)
}

/// Convenience type alias for Results using HeistError.
pub type Result<T> = std::result::Result<T, HeistError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Infrastructure Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend failure: {0}")]
    Backend(String),

    #[error("record could not be encoded: {0}")]
    Encoding(String),
}

impl From<String> for StoreError {
    fn from(message: String) -> Self {
        StoreError::Backend(message)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Encoding(err.to_string())
    }
}

/// Ledger failures that are not a domain rejection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    Insufficient { balance: i64, requested: i64 },

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

impl From<String> for LedgerError {
    fn from(message: String) -> Self {
        LedgerError::Unavailable(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(HeistError::AlreadyInProgress.code(), "already_in_progress");
        assert_eq!(
            HeistError::InsufficientFunds {
                required: 1500,
                available: 100
            }
            .code(),
            "insufficient_funds"
        );
    }

    #[test]
    fn police_alert_message_names_remaining_time() {
        let err = HeistError::PoliceAlert {
            remaining: Duration::from_secs(90),
        };
        assert_eq!(
            err.to_string(),
            "The police are on high alert. Time remaining: 1m 30s"
        );
    }
}
