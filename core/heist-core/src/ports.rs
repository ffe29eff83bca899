//! Collaborators the engine calls out to: the economy ledger, the member
//! directory and the notification sink.
//!
//! In-memory implementations live alongside the traits. The daemon wires the
//! SQLite ledger and its feed in their place.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::LedgerError;
use crate::lock;
use crate::session::SessionHandle;

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

pub trait Ledger: Send + Sync {
    fn balance(&self, community_id: &str, member_id: &str) -> LedgerResult<i64>;
    /// Returns the balance after the deposit.
    fn deposit(&self, community_id: &str, member_id: &str, amount: i64) -> LedgerResult<i64>;
    /// Returns the balance after the withdrawal. Never overdraws.
    fn withdraw(&self, community_id: &str, member_id: &str, amount: i64) -> LedgerResult<i64>;
}

pub trait MemberDirectory: Send + Sync {
    /// Name shown in narration. Falls back to the member id.
    fn display_name(&self, community_id: &str, member_id: &str) -> String;
}

/// Where session status and narration go. Failures are reported back but the
/// engine only logs them.
pub trait NotificationSink: Send + Sync {
    fn post_status(&self, session: &SessionHandle, text: &str) -> Result<(), String>;
    fn post_message(&self, session: &SessionHandle, text: &str) -> Result<(), String>;
    fn post_final(&self, session: &SessionHandle, text: &str) -> Result<(), String>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-memory implementations
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct MemoryLedger {
    opening_balance: i64,
    accounts: Mutex<HashMap<(String, String), i64>>,
}

impl MemoryLedger {
    pub fn new(opening_balance: i64) -> Self {
        Self {
            opening_balance,
            accounts: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_balance(&self, community_id: &str, member_id: &str, balance: i64) {
        lock(&self.accounts).insert(key(community_id, member_id), balance);
    }
}

impl Ledger for MemoryLedger {
    fn balance(&self, community_id: &str, member_id: &str) -> LedgerResult<i64> {
        Ok(*lock(&self.accounts)
            .get(&key(community_id, member_id))
            .unwrap_or(&self.opening_balance))
    }

    fn deposit(&self, community_id: &str, member_id: &str, amount: i64) -> LedgerResult<i64> {
        let mut accounts = lock(&self.accounts);
        let balance = accounts
            .entry(key(community_id, member_id))
            .or_insert(self.opening_balance);
        *balance = balance.saturating_add(amount);
        Ok(*balance)
    }

    fn withdraw(&self, community_id: &str, member_id: &str, amount: i64) -> LedgerResult<i64> {
        let mut accounts = lock(&self.accounts);
        let balance = accounts
            .entry(key(community_id, member_id))
            .or_insert(self.opening_balance);
        if *balance < amount {
            return Err(LedgerError::Insufficient {
                balance: *balance,
                requested: amount,
            });
        }
        *balance -= amount;
        Ok(*balance)
    }
}

fn key(community_id: &str, member_id: &str) -> (String, String) {
    (community_id.to_string(), member_id.to_string())
}

/// Directory backed by a fixed map of display names.
#[derive(Default)]
pub struct StaticDirectory {
    names: Mutex<HashMap<(String, String), String>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, community_id: &str, member_id: &str, name: &str) {
        lock(&self.names).insert(key(community_id, member_id), name.to_string());
    }
}

impl MemberDirectory for StaticDirectory {
    fn display_name(&self, community_id: &str, member_id: &str) -> String {
        lock(&self.names)
            .get(&key(community_id, member_id))
            .cloned()
            .unwrap_or_else(|| member_id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostKind {
    Status,
    Message,
    Final,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub community_id: String,
    pub session_id: u64,
    pub kind: PostKind,
    pub text: String,
}

/// Sink that keeps every post, for assertions and replay.
#[derive(Default)]
pub struct RecordingSink {
    posts: Mutex<Vec<Post>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn posts(&self) -> Vec<Post> {
        lock(&self.posts).clone()
    }

    pub fn posts_for(&self, community_id: &str) -> Vec<Post> {
        lock(&self.posts)
            .iter()
            .filter(|post| post.community_id == community_id)
            .cloned()
            .collect()
    }

    fn record(&self, session: &SessionHandle, kind: PostKind, text: &str) {
        lock(&self.posts).push(Post {
            community_id: session.community_id.clone(),
            session_id: session.session_id,
            kind,
            text: text.to_string(),
        });
    }
}

impl NotificationSink for RecordingSink {
    fn post_status(&self, session: &SessionHandle, text: &str) -> Result<(), String> {
        self.record(session, PostKind::Status, text);
        Ok(())
    }

    fn post_message(&self, session: &SessionHandle, text: &str) -> Result<(), String> {
        self.record(session, PostKind::Message, text);
        Ok(())
    }

    fn post_final(&self, session: &SessionHandle, text: &str) -> Result<(), String> {
        self.record(session, PostKind::Final, text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_ledger_never_overdraws() {
        let ledger = MemoryLedger::new(100);
        let err = ledger.withdraw("guild-1", "rook", 1500).unwrap_err();
        assert_eq!(
            err,
            LedgerError::Insufficient {
                balance: 100,
                requested: 1500
            }
        );
        assert_eq!(ledger.balance("guild-1", "rook").unwrap(), 100);

        assert_eq!(ledger.deposit("guild-1", "rook", 1450).unwrap(), 1550);
        assert_eq!(ledger.withdraw("guild-1", "rook", 1500).unwrap(), 50);
    }

    #[test]
    fn directory_falls_back_to_member_id() {
        let directory = StaticDirectory::new();
        directory.insert("guild-1", "u1", "Rook");
        assert_eq!(directory.display_name("guild-1", "u1"), "Rook");
        assert_eq!(directory.display_name("guild-1", "u2"), "u2");
    }
}
