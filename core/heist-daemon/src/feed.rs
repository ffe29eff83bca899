//! In-memory notification feed.
//!
//! The daemon has no chat surface of its own; posts are kept per community in
//! a bounded ring so clients can poll them with `get_feed`.

use chrono::{DateTime, Utc};
use heist_core::{NotificationSink, SessionHandle};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    Status,
    Message,
    Final,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedEntry {
    pub session_id: u64,
    pub kind: FeedKind,
    pub text: String,
    pub posted_at: DateTime<Utc>,
}

pub struct Feed {
    capacity: usize,
    entries: Mutex<HashMap<String, VecDeque<FeedEntry>>>,
}

impl Feed {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Most recent `limit` entries for a community, oldest first.
    pub fn recent(&self, community_id: &str, limit: usize) -> Vec<FeedEntry> {
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match entries.get(community_id) {
            Some(queue) => {
                let skip = queue.len().saturating_sub(limit);
                queue.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    fn push(&self, session: &SessionHandle, kind: FeedKind, text: &str) -> Result<(), String> {
        tracing::debug!(
            community = %session.community_id,
            session_id = session.session_id,
            kind = ?kind,
            "Feed post"
        );
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| "feed lock poisoned".to_string())?;
        let queue = entries.entry(session.community_id.clone()).or_default();
        if queue.len() == self.capacity {
            queue.pop_front();
        }
        queue.push_back(FeedEntry {
            session_id: session.session_id,
            kind,
            text: text.to_string(),
            posted_at: Utc::now(),
        });
        Ok(())
    }
}

impl NotificationSink for Feed {
    fn post_status(&self, session: &SessionHandle, text: &str) -> Result<(), String> {
        self.push(session, FeedKind::Status, text)
    }

    fn post_message(&self, session: &SessionHandle, text: &str) -> Result<(), String> {
        self.push(session, FeedKind::Message, text)
    }

    fn post_final(&self, session: &SessionHandle, text: &str) -> Result<(), String> {
        self.push(session, FeedKind::Final, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(community: &str) -> SessionHandle {
        SessionHandle {
            community_id: community.to_string(),
            session_id: 1,
        }
    }

    #[test]
    fn feed_drops_oldest_past_capacity() {
        let feed = Feed::new(3);
        for idx in 0..5 {
            feed.post_message(&handle("guild-1"), &format!("line {idx}"))
                .unwrap();
        }
        let texts: Vec<String> = feed
            .recent("guild-1", 10)
            .into_iter()
            .map(|entry| entry.text)
            .collect();
        assert_eq!(texts, vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn recent_limits_and_scopes_by_community() {
        let feed = Feed::new(10);
        feed.post_status(&handle("guild-1"), "a").unwrap();
        feed.post_final(&handle("guild-1"), "b").unwrap();
        feed.post_message(&handle("guild-2"), "c").unwrap();

        let recent = feed.recent("guild-1", 1);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].kind, FeedKind::Final);
        assert!(feed.recent("guild-3", 5).is_empty());
    }
}
