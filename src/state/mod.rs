//! Persistent enablement state, stored as diffs from default state only.
//!
//! The store holds a flat `key -> bool` map where keys are either a bare
//! plugin key or `pluginKey:moduleKey`. An absent entry means "use the
//! default"; the computed/derived boolean is never stored. Setting an
//! override back to the default removes the entry, keeping the persisted
//! file minimal and round-trippable.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::plugin::{Module, Plugin};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read state file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write state file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state file {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },
}

/// Backing storage for the override map. Implementations must round-trip
/// the map exactly.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<BTreeMap<String, bool>, StoreError>;
    fn save(&self, overrides: &BTreeMap<String, bool>) -> Result<(), StoreError>;
}

/// JSON-file-backed store. A missing file loads as the empty map.
pub struct JsonFileStateStore {
    path: PathBuf,
}

impl JsonFileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StateStore for JsonFileStateStore {
    fn load(&self) -> Result<BTreeMap<String, bool>, StoreError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(&self.path).map_err(|source| StoreError::Read {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    fn save(&self, overrides: &BTreeMap<String, bool>) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|source| StoreError::Write {
                path: self.path.clone(),
                source,
            })?;
        }
        let raw = serde_json::to_string_pretty(overrides).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        fs::write(&self.path, raw).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// In-memory store for tests and hosts that don't persist state.
#[derive(Default)]
pub struct MemoryStateStore {
    map: Mutex<BTreeMap<String, bool>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<BTreeMap<String, bool>, StoreError> {
        Ok(self.map.lock().clone())
    }

    fn save(&self, overrides: &BTreeMap<String, bool>) -> Result<(), StoreError> {
        *self.map.lock() = overrides.clone();
        Ok(())
    }
}

/// Working copy of the override map with the derived-state rules.
#[derive(Debug, Default, Clone)]
pub struct EnablementState {
    overrides: BTreeMap<String, bool>,
}

impl EnablementState {
    pub fn new(overrides: BTreeMap<String, bool>) -> Self {
        Self { overrides }
    }

    pub fn overrides(&self) -> &BTreeMap<String, bool> {
        &self.overrides
    }

    /// `override ?? plugin.enabled_by_default`.
    pub fn plugin_enabled(&self, plugin: &Plugin) -> bool {
        self.overrides
            .get(plugin.key())
            .copied()
            .unwrap_or_else(|| plugin.enabled_by_default())
    }

    /// `override ?? (plugin enabled && module.enabled_by_default)`.
    pub fn module_enabled(&self, plugin: &Plugin, module: &Module) -> bool {
        self.overrides
            .get(&module.complete_key())
            .copied()
            .unwrap_or_else(|| self.plugin_enabled(plugin) && module.enabled_by_default())
    }

    /// Record a plugin override. Diff-only: an override equal to the
    /// plugin's default removes the entry instead of storing it.
    pub fn set_plugin(&mut self, plugin: &Plugin, enabled: bool) {
        set_diff(
            &mut self.overrides,
            plugin.key().to_owned(),
            enabled,
            plugin.enabled_by_default(),
        );
    }

    /// Record a module override against its derived default.
    pub fn set_module(&mut self, plugin: &Plugin, module: &Module, enabled: bool) {
        let derived_default = self.plugin_enabled(plugin) && module.enabled_by_default();
        set_diff(
            &mut self.overrides,
            module.complete_key(),
            enabled,
            derived_default,
        );
    }

    /// Drop every override belonging to a plugin, including its modules'.
    pub fn forget_plugin(&mut self, plugin_key: &str) {
        let module_prefix = format!("{plugin_key}:");
        self.overrides
            .retain(|k, _| k != plugin_key && !k.starts_with(&module_prefix));
    }
}

fn set_diff(map: &mut BTreeMap<String, bool>, key: String, value: bool, default: bool) {
    if value == default {
        if map.remove(&key).is_some() {
            debug!(key = %key, "override removed, back to default");
        }
    } else {
        debug!(key = %key, value, "override recorded");
        map.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Artifact;
    use crate::namespace::ModuleNamespace;
    use std::sync::Arc;

    fn plugin(key: &str, enabled_by_default: bool, tmp: &std::path::Path) -> Plugin {
        let dir = tmp.join(key);
        fs::create_dir_all(&dir).unwrap();
        let ns = Arc::new(ModuleNamespace::build(Artifact::open(&dir).unwrap(), None).unwrap());
        Plugin::new(key, ns, &dir)
            .with_enabled_by_default(enabled_by_default)
            .with_modules(vec![
                Module::new(key, "on", "kind", true),
                Module::new(key, "off", "kind", false),
            ])
    }

    #[test]
    fn enabling_an_already_default_enabled_plugin_stores_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let p = plugin("p", true, tmp.path());
        let mut state = EnablementState::default();

        state.set_plugin(&p, true);
        assert!(state.overrides().is_empty());

        state.set_plugin(&p, false);
        assert_eq!(state.overrides().len(), 1);
        assert_eq!(state.overrides().get("p"), Some(&false));

        state.set_plugin(&p, true);
        assert!(state.overrides().is_empty());
    }

    #[test]
    fn module_state_derives_from_plugin_and_default() {
        let tmp = tempfile::tempdir().unwrap();
        let p = plugin("p", true, tmp.path());
        let on = p.module("on").unwrap().clone();
        let off = p.module("off").unwrap().clone();
        let mut state = EnablementState::default();

        assert!(state.module_enabled(&p, &on));
        assert!(!state.module_enabled(&p, &off));

        // Disabling the plugin flips the derived module state.
        state.set_plugin(&p, false);
        assert!(!state.module_enabled(&p, &on));

        // An explicit module override wins over the derivation.
        state.set_module(&p, &on, true);
        assert!(state.module_enabled(&p, &on));
        assert_eq!(state.overrides().get("p:on"), Some(&true));
    }

    #[test]
    fn forget_plugin_drops_its_overrides_only() {
        let tmp = tempfile::tempdir().unwrap();
        let p = plugin("p", true, tmp.path());
        let q = plugin("p2", true, tmp.path());
        let mut state = EnablementState::default();

        state.set_plugin(&p, false);
        state.set_module(&p, p.module("on").unwrap(), true);
        state.set_plugin(&q, false);

        state.forget_plugin("p");
        assert_eq!(state.overrides().len(), 1);
        assert_eq!(state.overrides().get("p2"), Some(&false));
    }

    #[test]
    fn json_store_round_trips_exactly() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStateStore::new(tmp.path().join("state/overrides.json"));

        let mut map = BTreeMap::new();
        map.insert("p".to_owned(), false);
        map.insert("p:module".to_owned(), true);
        store.save(&map).unwrap();

        assert_eq!(store.load().unwrap(), map);
    }

    #[test]
    fn json_store_missing_file_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStateStore::new(tmp.path().join("never-written.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn json_store_corrupt_file_is_a_typed_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("overrides.json");
        fs::write(&path, b"{ not json").unwrap();

        let store = JsonFileStateStore::new(&path);
        assert!(matches!(store.load(), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryStateStore::new();
        let mut map = BTreeMap::new();
        map.insert("a".to_owned(), true);
        store.save(&map).unwrap();
        assert_eq!(store.load().unwrap(), map);
    }
}
