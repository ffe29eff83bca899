//! Per-community caches for configuration and themes, written through to the
//! store. A failed read falls back to defaults; a failed write is logged.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::error::{HeistError, Result};
use crate::lock;
use crate::storage::Store;
use crate::theme::{self, Theme};

pub struct ConfigBook {
    store: Arc<dyn Store>,
    default_theme: String,
    configs: Mutex<HashMap<String, Arc<Mutex<Config>>>>,
}

impl ConfigBook {
    pub fn new(store: Arc<dyn Store>, default_theme: impl Into<String>) -> Self {
        Self {
            store,
            default_theme: default_theme.into(),
            configs: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, community_id: &str) -> Config {
        let entry = self.entry(community_id);
        let config = lock(&entry).clone();
        config
    }

    /// Applies `f` to the community's config and writes it through on
    /// success. Only this community's entry is held during the write.
    pub fn modify<T, F>(&self, community_id: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Config) -> Result<T>,
    {
        let entry = self.entry(community_id);
        let mut current = lock(&entry);
        let mut config = current.clone();
        let out = f(&mut config)?;
        self.persist(&config);
        *current = config;
        Ok(out)
    }

    fn entry(&self, community_id: &str) -> Arc<Mutex<Config>> {
        if let Some(entry) = lock(&self.configs).get(community_id) {
            return Arc::clone(entry);
        }

        let (config, created) = match self.store.load_config(community_id) {
            Ok(Some(config)) => (config, false),
            Ok(None) => (Config::new(community_id, self.default_theme.clone()), true),
            Err(err) => {
                tracing::warn!(
                    community_id = %community_id,
                    error = %err,
                    "Failed to load config; using defaults"
                );
                (Config::new(community_id, self.default_theme.clone()), true)
            }
        };
        if created {
            self.persist(&config);
        }
        Arc::clone(
            lock(&self.configs)
                .entry(community_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(config))),
        )
    }

    fn persist(&self, config: &Config) {
        if let Err(err) = self.store.save_config(config) {
            tracing::warn!(
                community_id = %config.community_id,
                error = %err,
                "Failed to persist config"
            );
        }
    }
}

pub struct ThemeBook {
    store: Arc<dyn Store>,
    themes: Mutex<HashMap<String, BTreeMap<String, Theme>>>,
}

impl ThemeBook {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            themes: Mutex::new(HashMap::new()),
        }
    }

    /// Looks a theme up by id. The built-in theme is always available.
    pub fn resolve(&self, community_id: &str, theme_id: &str) -> Result<Theme> {
        self.with_community(community_id, |themes| {
            themes
                .get(theme_id)
                .cloned()
                .ok_or_else(|| HeistError::ThemeNotFound(theme_id.to_string()))
        })
    }

    pub fn names(&self, community_id: &str) -> Vec<String> {
        self.with_community(community_id, |themes| themes.keys().cloned().collect())
    }

    pub fn add(&self, community_id: &str, theme: Theme) -> Result<()> {
        if theme.id.trim().is_empty() {
            return Err(HeistError::InvalidConfig("theme id is required".to_string()));
        }
        if let Err(err) = self.store.save_theme(community_id, &theme) {
            tracing::warn!(
                community_id = %community_id,
                theme_id = %theme.id,
                error = %err,
                "Failed to persist theme"
            );
        }
        self.with_community(community_id, |themes| {
            themes.insert(theme.id.clone(), theme);
        });
        Ok(())
    }

    fn with_community<T>(
        &self,
        community_id: &str,
        f: impl FnOnce(&mut BTreeMap<String, Theme>) -> T,
    ) -> T {
        let cached = lock(&self.themes).contains_key(community_id);
        if !cached {
            let stored = self.store.load_themes(community_id).unwrap_or_else(|err| {
                tracing::warn!(
                    community_id = %community_id,
                    error = %err,
                    "Failed to load themes; only the built-in theme is available"
                );
                Vec::new()
            });
            let mut loaded = BTreeMap::new();
            let builtin = theme::builtin();
            loaded.insert(builtin.id.clone(), builtin.clone());
            for theme in stored {
                loaded.insert(theme.id.clone(), theme);
            }
            lock(&self.themes)
                .entry(community_id.to_string())
                .or_insert(loaded);
        }

        let mut themes = lock(&self.themes);
        let community = themes.entry(community_id.to_string()).or_default();
        f(community)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn config_defaults_are_persisted_once() {
        let store = Arc::new(MemoryStore::new());
        let book = ConfigBook::new(store.clone(), "heist");
        let config = book.get("guild-1");
        assert_eq!(config.heist_cost, 1500);
        assert_eq!(store.load_config("guild-1").unwrap(), Some(config));
    }

    #[test]
    fn failed_modify_leaves_config_untouched() {
        let book = ConfigBook::new(Arc::new(MemoryStore::new()), "heist");
        let result: Result<()> = book.modify("guild-1", |config| {
            config.heist_cost = 1;
            Err(HeistError::InvalidConfig("nope".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(book.get("guild-1").heist_cost, 1500);
    }

    #[test]
    fn modify_holds_only_its_own_community() {
        let store = Arc::new(MemoryStore::new());
        let book = ConfigBook::new(store.clone(), "heist");
        book.get("guild-2");

        let other_cost = book
            .modify("guild-1", |config| {
                config.bail_base = 900;
                Ok(book.get("guild-2").heist_cost)
            })
            .unwrap();
        assert_eq!(other_cost, 1500);
        assert_eq!(store.load_config("guild-1").unwrap().unwrap().bail_base, 900);
    }

    #[test]
    fn themes_include_builtin_and_stored() {
        let store = Arc::new(MemoryStore::new());
        let mut pirate = theme::builtin().clone();
        pirate.id = "pirate".to_string();
        pirate.heist = "raid".to_string();
        store.save_theme("guild-1", &pirate).unwrap();

        let book = ThemeBook::new(store);
        assert_eq!(book.names("guild-1"), vec!["heist", "pirate"]);
        assert_eq!(book.resolve("guild-1", "pirate").unwrap().heist, "raid");
        assert_eq!(
            book.resolve("guild-1", "space"),
            Err(HeistError::ThemeNotFound("space".to_string()))
        );
        assert_eq!(book.names("guild-2"), vec!["heist"]);
    }
}
