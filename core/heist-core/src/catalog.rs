//! Per-community target lists shared by the resolver and the vault recovery
//! loop.
//!
//! Each community's targets sit behind one mutex. Theft and recovery both take
//! it and write the changed target through before releasing it, so the stored
//! balance always matches the last in-memory change.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::error::{HeistError, Result};
use crate::lock;
use crate::storage::{Store, TargetQuery};
use crate::target::{select_target, sort_targets, Target};

type TargetList = Arc<Mutex<Vec<Target>>>;

pub struct TargetCatalog {
    store: Arc<dyn Store>,
    communities: RwLock<HashMap<String, TargetList>>,
}

impl TargetCatalog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            communities: RwLock::new(HashMap::new()),
        }
    }

    /// Loads every stored target so recovery covers communities that have not
    /// been touched since startup.
    pub fn load_all(&self) -> usize {
        let targets = match self.store.query_targets(&TargetQuery::all()) {
            Ok(targets) => targets,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to load targets");
                return 0;
            }
        };
        let count = targets.len();
        let mut grouped: HashMap<String, Vec<Target>> = HashMap::new();
        for target in targets {
            grouped
                .entry(target.community_id.clone())
                .or_default()
                .push(target);
        }

        let mut communities = self
            .communities
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for (community_id, mut targets) in grouped {
            sort_targets(&mut targets);
            communities.insert(community_id, Arc::new(Mutex::new(targets)));
        }
        count
    }

    pub fn list(&self, community_id: &str) -> Vec<Target> {
        let list = self.community(community_id);
        let targets = lock(&list).clone();
        targets
    }

    pub fn get(&self, community_id: &str, target_id: &str) -> Result<Target> {
        let list = self.community(community_id);
        let targets = lock(&list);
        targets
            .iter()
            .find(|target| target.target_id == target_id)
            .cloned()
            .ok_or_else(|| HeistError::TargetNotFound(target_id.to_string()))
    }

    /// Target for a crew of `crew_size`, if any can hold it.
    pub fn select(&self, community_id: &str, crew_size: usize) -> Option<Target> {
        let list = self.community(community_id);
        let targets = lock(&list);
        select_target(&targets, crew_size).cloned()
    }

    pub fn upsert(&self, target: Target) -> Result<()> {
        target.validate()?;
        let list = self.community(&target.community_id);
        let mut targets = lock(&list);
        match targets
            .iter_mut()
            .find(|existing| existing.target_id == target.target_id)
        {
            Some(existing) => *existing = target.clone(),
            None => {
                targets.push(target.clone());
                sort_targets(&mut targets);
            }
        }
        self.persist(&target);
        Ok(())
    }

    /// Takes `amount` from a target's vault. Returns the updated target.
    pub fn apply_theft(
        &self,
        community_id: &str,
        target_id: &str,
        amount: i64,
        floor_percent: i64,
    ) -> Result<Target> {
        let list = self.community(community_id);
        let mut targets = lock(&list);
        let target = targets
            .iter_mut()
            .find(|target| target.target_id == target_id)
            .ok_or_else(|| HeistError::TargetNotFound(target_id.to_string()))?;
        target.withdraw(amount, floor_percent);
        let updated = target.clone();
        self.persist(&updated);
        Ok(updated)
    }

    /// One recovery step over every known target. Returns how many changed.
    pub fn recover_all(&self, factor: f64) -> usize {
        let lists: Vec<TargetList> = self
            .communities
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();

        let mut changed = 0;
        for list in lists {
            let mut targets = lock(&list);
            for target in targets.iter_mut() {
                if target.recover(factor) {
                    self.persist(target);
                    changed += 1;
                }
            }
        }
        changed
    }

    fn community(&self, community_id: &str) -> TargetList {
        if let Some(list) = self
            .communities
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(community_id)
        {
            return Arc::clone(list);
        }

        let loaded = match self
            .store
            .query_targets(&TargetQuery::community(community_id))
        {
            Ok(targets) => targets,
            Err(err) => {
                tracing::warn!(
                    community_id = %community_id,
                    error = %err,
                    "Failed to load targets; treating catalog as empty"
                );
                Vec::new()
            }
        };

        let mut communities = self
            .communities
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            communities
                .entry(community_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(loaded))),
        )
    }

    fn persist(&self, target: &Target) {
        if let Err(err) = self.store.save_target(target) {
            tracing::warn!(
                community_id = %target.community_id,
                target_id = %target.target_id,
                error = %err,
                "Failed to persist target"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use std::thread;

    fn target(id: &str, crew_size: u32, vault: i64, vault_max: i64) -> Target {
        Target {
            community_id: "guild-1".to_string(),
            target_id: id.to_string(),
            crew_size,
            success: 0.5,
            vault,
            vault_max,
        }
    }

    #[test]
    fn upsert_replaces_and_lists_sorted() {
        let store = Arc::new(MemoryStore::new());
        let catalog = TargetCatalog::new(store.clone());
        catalog.upsert(target("bank", 8, 500, 1_000)).unwrap();
        catalog.upsert(target("deli", 2, 50, 100)).unwrap();
        catalog.upsert(target("bank", 6, 900, 1_000)).unwrap();

        let listed = catalog.list("guild-1");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].target_id, "deli");
        assert_eq!(catalog.get("guild-1", "bank").unwrap().vault, 900);
        assert_eq!(
            store
                .query_targets(&TargetQuery::community("guild-1"))
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn upsert_rejects_invalid_target() {
        let catalog = TargetCatalog::new(Arc::new(MemoryStore::new()));
        let err = catalog.upsert(target("bank", 0, 10, 10)).unwrap_err();
        assert!(matches!(err, HeistError::InvalidConfig(_)));
        assert!(catalog.list("guild-1").is_empty());
    }

    #[test]
    fn load_all_picks_up_stored_targets() {
        let store = Arc::new(MemoryStore::new());
        store.save_target(&target("bank", 4, 100, 200)).unwrap();
        let catalog = TargetCatalog::new(store);
        assert_eq!(catalog.load_all(), 1);
        assert_eq!(catalog.recover_all(1.5), 1);
        assert_eq!(catalog.get("guild-1", "bank").unwrap().vault, 150);
    }

    #[test]
    fn concurrent_theft_and_recovery_stay_in_bounds() {
        let catalog = Arc::new(TargetCatalog::new(Arc::new(MemoryStore::new())));
        catalog.upsert(target("bank", 4, 10_000, 10_000)).unwrap();

        let thief = {
            let catalog = Arc::clone(&catalog);
            thread::spawn(move || {
                for _ in 0..200 {
                    catalog.apply_theft("guild-1", "bank", 700, 4).unwrap();
                }
            })
        };
        let recovery = {
            let catalog = Arc::clone(&catalog);
            thread::spawn(move || {
                for _ in 0..200 {
                    catalog.recover_all(1.04);
                }
            })
        };
        thief.join().unwrap();
        recovery.join().unwrap();

        let bank = catalog.get("guild-1", "bank").unwrap();
        assert!(bank.vault >= 400);
        assert!(bank.vault <= 10_000);
    }
}
