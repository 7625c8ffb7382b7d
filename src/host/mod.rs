//! Plugin host: the supervising engine that wires the scanner, loader
//! chain, registry, state store, enabler, and event bus together.
//!
//! One [`PluginHost::refresh`] call performs a full deployment cycle:
//! scan the plugin directory, materialize what appeared, tear down what
//! vanished (new namespace installed before the old one is closed for
//! changed artifacts), and apply persisted enablement. Explicit
//! [`PluginHost::enable`] / [`PluginHost::disable`] calls drive the
//! dependency-aware state machine in `enabler.rs`.

mod enabler;
mod runtime;

pub use runtime::{ModuleRuntime, NoopRuntime, RuntimeHandle};

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::artifact::Artifact;
use crate::events::{EventBus, LifecycleEvent};
use crate::loader::{LoadOutcome, LoaderChain, DESCRIPTOR_ENTRY};
use crate::plugin::{BrokenPlugin, Module, Plugin};
use crate::scanner::{ScanError, Scanner};
use crate::state::{
    EnablementState, JsonFileStateStore, MemoryStateStore, StateStore, StoreError,
};
use crate::tracker::{Customizer, ModuleTracker};

/// Host configuration. Loadable from TOML; every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Directory scanned for plugin artifacts.
    pub plugin_dir: PathBuf,
    /// File suffixes recognized as artifacts. Directories are recognized
    /// by the presence of the plugin descriptor instead.
    pub suffixes: Vec<String>,
    /// Path of the persisted override map; `None` keeps state in memory.
    pub state_file: Option<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            plugin_dir: PathBuf::from("plugins"),
            suffixes: vec![".zip".to_owned()],
            state_file: None,
        }
    }
}

/// Registry slot: a healthy plugin or the broken marker holding its key.
enum Slot {
    Loaded {
        plugin: Arc<Plugin>,
        enabled: bool,
        handle: Option<RuntimeHandle>,
    },
    Broken(BrokenPlugin),
}

/// Lifecycle state a host surface can show per plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginState {
    Enabled,
    Disabled,
    Broken,
}

/// Snapshot row for host status surfaces.
#[derive(Debug, Clone)]
pub struct PluginSummary {
    pub key: String,
    pub version: Option<String>,
    pub source: PathBuf,
    pub state: PluginState,
    pub error: Option<String>,
}

/// Result of one [`PluginHost::refresh`] cycle.
#[derive(Debug, Default)]
pub struct RefreshReport {
    /// Keys of plugins materialized this cycle.
    pub installed: Vec<String>,
    /// Keys now occupied by a broken-plugin marker.
    pub broken: Vec<String>,
    /// Keys unloaded because their artifact disappeared.
    pub removed: Vec<String>,
    /// Non-fatal scan problems.
    pub errors: Vec<ScanError>,
}

type CapabilityMap = HashMap<String, HashMap<String, Arc<dyn Any + Send + Sync>>>;

/// The discovery-and-lifecycle engine. Construct one per watched plugin
/// directory and pass the reference down; there is no global instance.
pub struct PluginHost {
    scanner: Mutex<Scanner>,
    chain: LoaderChain,
    store: Box<dyn StateStore>,
    state: Mutex<EnablementState>,
    slots: RwLock<HashMap<String, Slot>>,
    by_path: RwLock<HashMap<PathBuf, String>>,
    bus: Arc<EventBus>,
    runtime: Box<dyn ModuleRuntime>,
    capabilities: RwLock<CapabilityMap>,
}

impl PluginHost {
    /// Build a host from `config`. Fails fast if the persisted state cannot
    /// be loaded; a corrupt state file is a startup error, not something to
    /// discover mid-scan.
    pub fn new(config: &HostConfig) -> Result<Self, StoreError> {
        let store: Box<dyn StateStore> = match &config.state_file {
            Some(path) => Box::new(JsonFileStateStore::new(path)),
            None => Box::new(MemoryStateStore::new()),
        };
        let state = EnablementState::new(store.load()?);

        let scanner = Scanner::new(&config.plugin_dir, config.suffixes.clone())
            .with_dir_probe(DESCRIPTOR_ENTRY);

        Ok(Self {
            scanner: Mutex::new(scanner),
            chain: LoaderChain::standard(),
            store,
            state: Mutex::new(state),
            slots: RwLock::new(HashMap::new()),
            by_path: RwLock::new(HashMap::new()),
            bus: Arc::new(EventBus::new()),
            runtime: Box::new(NoopRuntime),
            capabilities: RwLock::new(HashMap::new()),
        })
    }

    /// Replace the loader chain (before the first refresh).
    pub fn with_chain(mut self, chain: LoaderChain) -> Self {
        self.chain = chain;
        self
    }

    /// Plug in the external dynamic-container runtime.
    pub fn with_runtime(mut self, runtime: impl ModuleRuntime + 'static) -> Self {
        self.runtime = Box::new(runtime);
        self
    }

    /// Replace the state store (before the first refresh). The override map
    /// is reloaded from the new store.
    pub fn with_store(mut self, store: Box<dyn StateStore>) -> Result<Self, StoreError> {
        self.state = Mutex::new(EnablementState::new(store.load()?));
        self.store = store;
        Ok(self)
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// One deployment cycle: scan, materialize, unload, apply enablement.
    ///
    /// Callers drive the cadence and must serialize refresh calls, matching
    /// the scanner's contract.
    pub fn refresh(&self) -> RefreshReport {
        let scan = self.scanner.lock().scan();
        let mut report = RefreshReport {
            errors: scan.errors,
            ..RefreshReport::default()
        };

        let previous_owner: HashMap<PathBuf, String> = self.by_path.read().clone();
        let mut superseded: Vec<Slot> = Vec::new();

        // Install replacements before tearing anything down so a changed
        // artifact's old namespace outlives the gap.
        for artifact in scan.added {
            self.install(&artifact, &mut report, &mut superseded);
        }

        let refreshed: HashSet<String> = report
            .installed
            .iter()
            .chain(report.broken.iter())
            .cloned()
            .collect();

        for path in &scan.removed {
            let Some(old_key) = previous_owner.get(path) else {
                continue;
            };
            if refreshed.contains(old_key) {
                // Superseded by this cycle's install; old slot is already
                // queued for teardown.
                continue;
            }
            // A rekeyed redeploy rebinds the path to its new owner during
            // install; drop the binding only if it still names the old key,
            // otherwise a later removal could never find the new owner.
            {
                let mut by_path = self.by_path.write();
                if by_path.get(path) == Some(old_key) {
                    by_path.remove(path);
                }
            }
            if self.unload(old_key) {
                report.removed.push(old_key.clone());
            }
        }

        for slot in superseded {
            self.teardown(slot);
        }

        self.apply_default_enablement(&report.installed);

        info!(
            installed = report.installed.len(),
            broken = report.broken.len(),
            removed = report.removed.len(),
            "refresh cycle complete"
        );
        report
    }

    fn install(&self, artifact: &Artifact, report: &mut RefreshReport, superseded: &mut Vec<Slot>) {
        match self.chain.materialize(artifact) {
            LoadOutcome::Loaded(plugin) => {
                let plugin = Arc::new(plugin);
                let key = plugin.key().to_owned();

                let handle = match self.runtime.install(artifact) {
                    Ok(mut handle) => {
                        if let Err(e) = self.runtime.activate(&mut handle) {
                            warn!(key = %key, error = %e, "runtime activation failed");
                        }
                        Some(handle)
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "runtime install failed, marking broken");
                        plugin.namespace().close();
                        let broken = BrokenPlugin {
                            key: key.clone(),
                            source: artifact.path().to_path_buf(),
                            error: format!("runtime install failed: {e:#}"),
                        };
                        if let Some(old) = self.slots.write().insert(key.clone(), Slot::Broken(broken)) {
                            superseded.push(old);
                        }
                        self.by_path
                            .write()
                            .insert(artifact.path().to_path_buf(), key.clone());
                        report.broken.push(key);
                        return;
                    }
                };

                let slot = Slot::Loaded {
                    plugin,
                    enabled: false,
                    handle,
                };
                if let Some(old) = self.slots.write().insert(key.clone(), slot) {
                    superseded.push(old);
                }
                self.by_path
                    .write()
                    .insert(artifact.path().to_path_buf(), key.clone());
                report.installed.push(key);
            }
            LoadOutcome::Broken(broken) => {
                let key = broken.key.clone();
                warn!(key = %key, error = %broken.error, "artifact is broken");
                if let Some(old) = self.slots.write().insert(key.clone(), Slot::Broken(broken)) {
                    superseded.push(old);
                }
                self.by_path
                    .write()
                    .insert(artifact.path().to_path_buf(), key.clone());
                report.broken.push(key);
            }
            LoadOutcome::Skipped => {
                debug!(artifact = %artifact.path().display(), "no recognizer matched");
            }
        }
    }

    /// Remove a key's slot entirely: unregister, broadcast the disable if it
    /// was enabled, then release the namespace. Returns false if the key was
    /// not registered.
    fn unload(&self, key: &str) -> bool {
        let Some(slot) = self.slots.write().remove(key) else {
            return false;
        };
        self.capabilities.write().remove(key);
        self.teardown(slot);
        true
    }

    /// Ordering contract: broadcast first so trackers drop the modules while
    /// the namespace is still alive, then close it.
    fn teardown(&self, slot: Slot) {
        match slot {
            Slot::Loaded {
                plugin,
                enabled,
                handle,
            } => {
                if enabled {
                    self.bus
                        .broadcast(&LifecycleEvent::PluginDisabled(plugin.clone()));
                }
                if let Some(mut handle) = handle {
                    if let Err(e) = self.runtime.deactivate(&mut handle) {
                        warn!(key = %plugin.key(), error = %e, "runtime deactivation failed");
                    }
                }
                plugin.namespace().close();
            }
            Slot::Broken(_) => {}
        }
    }

    /// Newly installed plugins come up in their persisted/default state.
    fn apply_default_enablement(&self, installed: &[String]) {
        let state = self.state.lock().clone();
        let mut events = Vec::new();
        {
            let mut slots = self.slots.write();
            for key in installed {
                let Some(Slot::Loaded {
                    plugin, enabled, ..
                }) = slots.get_mut(key)
                else {
                    continue;
                };
                if state.plugin_enabled(plugin) {
                    *enabled = true;
                    for module in plugin.modules() {
                        if state.module_enabled(plugin, module) {
                            events.push(LifecycleEvent::ModuleEnabled(module.clone()));
                        }
                    }
                } else {
                    debug!(key = %key, "plugin registered disabled");
                }
            }
        }
        for event in events {
            self.bus.broadcast(&event);
        }
    }

    // ── Registry views ──────────────────────────────────────────

    pub fn plugin(&self, key: &str) -> Option<Arc<Plugin>> {
        match self.slots.read().get(key) {
            Some(Slot::Loaded { plugin, .. }) => Some(plugin.clone()),
            _ => None,
        }
    }

    pub fn is_plugin_enabled(&self, key: &str) -> bool {
        matches!(
            self.slots.read().get(key),
            Some(Slot::Loaded { enabled: true, .. })
        )
    }

    /// Snapshot of every registered plugin for status surfaces.
    pub fn plugins(&self) -> Vec<PluginSummary> {
        let slots = self.slots.read();
        let mut rows: Vec<PluginSummary> = slots
            .iter()
            .map(|(key, slot)| match slot {
                Slot::Loaded {
                    plugin, enabled, ..
                } => PluginSummary {
                    key: key.clone(),
                    version: plugin.version().map(str::to_owned),
                    source: plugin.source().to_path_buf(),
                    state: if *enabled {
                        PluginState::Enabled
                    } else {
                        PluginState::Disabled
                    },
                    error: None,
                },
                Slot::Broken(broken) => PluginSummary {
                    key: key.clone(),
                    version: None,
                    source: broken.source.clone(),
                    state: PluginState::Broken,
                    error: Some(broken.error.clone()),
                },
            })
            .collect();
        rows.sort_by(|a, b| a.key.cmp(&b.key));
        rows
    }

    /// Currently-enabled modules of `kind` across all enabled plugins.
    pub fn enabled_modules(&self, kind: &str) -> Vec<Arc<Module>> {
        let state = self.state.lock().clone();
        let slots = self.slots.read();
        let mut modules = Vec::new();
        for slot in slots.values() {
            let Slot::Loaded {
                plugin,
                enabled: true,
                ..
            } = slot
            else {
                continue;
            };
            for module in plugin.modules() {
                if module.kind() == kind && state.module_enabled(plugin, module) {
                    modules.push(module.clone());
                }
            }
        }
        modules
    }

    /// Build a tracker seeded from the currently-enabled modules of `kind`.
    /// The caller owns the tracker and must `close()` it.
    pub fn track_modules(
        &self,
        kind: &str,
        customizer: Option<Arc<dyn Customizer>>,
    ) -> ModuleTracker {
        ModuleTracker::new(
            self.bus.clone(),
            kind,
            || self.enabled_modules(kind),
            customizer,
        )
    }

    // ── Capability registration (dependency-injection bridge) ───

    /// Record an object the host wants visible for `plugin_key`. The host
    /// does not perform any wiring; collaborators look entries up by key.
    pub fn register_capability(
        &self,
        plugin_key: &str,
        name: &str,
        value: Arc<dyn Any + Send + Sync>,
    ) {
        self.capabilities
            .write()
            .entry(plugin_key.to_owned())
            .or_default()
            .insert(name.to_owned(), value);
    }

    /// Resolve a registered capability by key and type.
    pub fn capability<T: Any + Send + Sync>(&self, plugin_key: &str, name: &str) -> Option<Arc<T>> {
        self.capabilities
            .read()
            .get(plugin_key)?
            .get(name)
            .cloned()
            .and_then(|v| v.downcast::<T>().ok())
    }

    // ── Uninstall ───────────────────────────────────────────────

    /// Remove a plugin from the running system and forget its overrides.
    /// Refuses for plugins declared non-uninstallable; deletes the artifact
    /// from disk only when the plugin is deletable.
    pub fn uninstall(&self, key: &str) -> anyhow::Result<()> {
        let (source, deletable) = match self.slots.read().get(key) {
            Some(Slot::Loaded { plugin, .. }) => {
                if !plugin.uninstallable() {
                    anyhow::bail!("plugin `{key}` is not uninstallable");
                }
                (plugin.source().to_path_buf(), plugin.deletable())
            }
            // Broken markers are always removable; that is how a host clears
            // a failed deployment.
            Some(Slot::Broken(broken)) => (broken.source.clone(), true),
            None => anyhow::bail!("plugin `{key}` is not registered"),
        };

        self.unload(key);
        self.by_path.write().remove(&source);
        {
            let mut state = self.state.lock();
            state.forget_plugin(key);
        }
        self.persist()?;

        if deletable && source.exists() {
            let result = if source.is_dir() {
                std::fs::remove_dir_all(&source)
            } else {
                std::fs::remove_file(&source)
            };
            if let Err(e) = result {
                warn!(key = %key, path = %source.display(), error = %e, "artifact deletion failed");
            }
        } else if !deletable {
            debug!(key = %key, "plugin not deletable, artifact left on disk");
        }

        info!(key = %key, "plugin uninstalled");
        Ok(())
    }

    pub(crate) fn persist(&self) -> Result<(), StoreError> {
        let overrides = self.state.lock().overrides().clone();
        self.store.save(&overrides)
    }
}
