//! Persistence port.
//!
//! The engine talks to storage through typed record kinds instead of query
//! strings. A [`TargetQuery`] carries the only filter shape the engine needs
//! (community equality, crew-size ordering, an optional limit) and applies it
//! the same way for every backend, so adapters only have to narrow the rows
//! they fetch by community.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::config::Config;
use crate::error::StoreError;
use crate::lock;
use crate::member::MemberRecord;
use crate::target::{sort_targets, Target};
use crate::theme::Theme;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Backing store for every persisted record kind.
pub trait Store: Send + Sync {
    fn load_config(&self, community_id: &str) -> StoreResult<Option<Config>>;
    fn save_config(&self, config: &Config) -> StoreResult<()>;

    fn load_member(&self, community_id: &str, member_id: &str)
        -> StoreResult<Option<MemberRecord>>;
    fn save_member(&self, record: &MemberRecord) -> StoreResult<()>;

    fn query_targets(&self, query: &TargetQuery) -> StoreResult<Vec<Target>>;
    fn save_target(&self, target: &Target) -> StoreResult<()>;

    fn load_themes(&self, community_id: &str) -> StoreResult<Vec<Theme>>;
    fn save_theme(&self, community_id: &str, theme: &Theme) -> StoreResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetSort {
    #[default]
    CrewSize,
    Id,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TargetQuery {
    pub community_id: Option<String>,
    pub sort: TargetSort,
    pub limit: Option<usize>,
}

impl TargetQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn community(community_id: impl Into<String>) -> Self {
        Self {
            community_id: Some(community_id.into()),
            ..Self::default()
        }
    }

    pub fn sorted_by(mut self, sort: TargetSort) -> Self {
        self.sort = sort;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, target: &Target) -> bool {
        match &self.community_id {
            Some(community_id) => &target.community_id == community_id,
            None => true,
        }
    }

    /// Filters, orders and truncates `targets` according to the query.
    pub fn apply(&self, targets: Vec<Target>) -> Vec<Target> {
        let mut selected: Vec<Target> = targets
            .into_iter()
            .filter(|target| self.matches(target))
            .collect();
        match self.sort {
            TargetSort::CrewSize => sort_targets(&mut selected),
            TargetSort::Id => selected.sort_by(|left, right| {
                left.community_id
                    .cmp(&right.community_id)
                    .then_with(|| left.target_id.cmp(&right.target_id))
            }),
        }
        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-memory store
// ═══════════════════════════════════════════════════════════════════════════════

type MemberKey = (String, String);

#[derive(Default)]
struct Tables {
    configs: HashMap<String, Config>,
    members: HashMap<MemberKey, MemberRecord>,
    targets: HashMap<MemberKey, Target>,
    themes: HashMap<MemberKey, Theme>,
}

/// Store kept entirely in process memory. Writes can be made to fail so
/// callers' recovery paths can be exercised.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("writes disabled".to_string()));
        }
        Ok(())
    }
}

impl Store for MemoryStore {
    fn load_config(&self, community_id: &str) -> StoreResult<Option<Config>> {
        Ok(lock(&self.tables).configs.get(community_id).cloned())
    }

    fn save_config(&self, config: &Config) -> StoreResult<()> {
        self.check_writable()?;
        lock(&self.tables)
            .configs
            .insert(config.community_id.clone(), config.clone());
        Ok(())
    }

    fn load_member(
        &self,
        community_id: &str,
        member_id: &str,
    ) -> StoreResult<Option<MemberRecord>> {
        let key = (community_id.to_string(), member_id.to_string());
        Ok(lock(&self.tables).members.get(&key).cloned())
    }

    fn save_member(&self, record: &MemberRecord) -> StoreResult<()> {
        self.check_writable()?;
        let key = (record.community_id.clone(), record.member_id.clone());
        lock(&self.tables).members.insert(key, record.clone());
        Ok(())
    }

    fn query_targets(&self, query: &TargetQuery) -> StoreResult<Vec<Target>> {
        let targets: Vec<Target> = lock(&self.tables).targets.values().cloned().collect();
        Ok(query.apply(targets))
    }

    fn save_target(&self, target: &Target) -> StoreResult<()> {
        self.check_writable()?;
        let key = (target.community_id.clone(), target.target_id.clone());
        lock(&self.tables).targets.insert(key, target.clone());
        Ok(())
    }

    fn load_themes(&self, community_id: &str) -> StoreResult<Vec<Theme>> {
        let tables = lock(&self.tables);
        let mut themes: Vec<Theme> = tables
            .themes
            .iter()
            .filter(|((community, _), _)| community == community_id)
            .map(|(_, theme)| theme.clone())
            .collect();
        themes.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(themes)
    }

    fn save_theme(&self, community_id: &str, theme: &Theme) -> StoreResult<()> {
        self.check_writable()?;
        let key = (community_id.to_string(), theme.id.clone());
        lock(&self.tables).themes.insert(key, theme.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(community: &str, id: &str, crew_size: u32) -> Target {
        Target {
            community_id: community.to_string(),
            target_id: id.to_string(),
            crew_size,
            success: 0.5,
            vault: 100,
            vault_max: 100,
        }
    }

    #[test]
    fn target_query_filters_sorts_and_limits() {
        let store = MemoryStore::new();
        store.save_target(&target("guild-1", "bank", 8)).unwrap();
        store.save_target(&target("guild-1", "deli", 2)).unwrap();
        store.save_target(&target("guild-1", "casino", 5)).unwrap();
        store.save_target(&target("guild-2", "arcade", 1)).unwrap();

        let found = store
            .query_targets(&TargetQuery::community("guild-1").limit(2))
            .unwrap();
        let ids: Vec<&str> = found.iter().map(|t| t.target_id.as_str()).collect();
        assert_eq!(ids, vec!["deli", "casino"]);

        let everything = store
            .query_targets(&TargetQuery::all().sorted_by(TargetSort::Id))
            .unwrap();
        assert_eq!(everything.len(), 4);
        assert_eq!(everything[0].target_id, "bank");
        assert_eq!(everything[3].community_id, "guild-2");
    }

    #[test]
    fn failing_writes_surface_backend_errors() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        let err = store
            .save_member(&MemberRecord::new("guild-1", "rook"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(store.load_member("guild-1", "rook").unwrap().is_none());
    }

    #[test]
    fn themes_are_scoped_per_community() {
        let store = MemoryStore::new();
        let mut theme = crate::theme::builtin().clone();
        theme.id = "pirate".to_string();
        store.save_theme("guild-1", &theme).unwrap();

        assert_eq!(store.load_themes("guild-1").unwrap().len(), 1);
        assert!(store.load_themes("guild-2").unwrap().is_empty());
    }
}
