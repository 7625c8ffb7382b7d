//! Enable/disable state machine.
//!
//! Enabling is recursive over declared required plugins, with a per-call
//! in-progress guard set keyed by plugin key: a key already in the set is
//! treated as satisfied rather than re-entered, which breaks dependency
//! cycles without error. Disabling is deliberately NOT transitive to
//! dependents; they keep their own state and the host logs who is still
//! standing on the disabled plugin.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::{PluginHost, Slot};
use crate::events::LifecycleEvent;
use crate::plugin::Plugin;
use crate::state::StoreError;

impl PluginHost {
    /// Enable the named plugins and, recursively, everything they require.
    /// Overrides are persisted as diffs and every transition is broadcast
    /// before this call returns.
    pub fn enable(&self, keys: &[&str]) -> Result<(), StoreError> {
        let mut in_progress = HashSet::new();
        let mut events = Vec::new();
        for key in keys {
            self.enable_recursive(key, &mut in_progress, &mut events);
        }
        // The registry flags are already flipped; trackers must see the same
        // picture even when the store fails, so the transitions go out first
        // and the store error surfaces after.
        let persisted = self.persist();
        for event in events {
            self.bus.broadcast(&event);
        }
        persisted
    }

    fn enable_recursive(
        &self,
        key: &str,
        in_progress: &mut HashSet<String>,
        events: &mut Vec<LifecycleEvent>,
    ) {
        if !in_progress.insert(key.to_owned()) {
            // Already being enabled further up this call: treat as satisfied.
            trace!(key = %key, "dependency cycle short-circuited");
            return;
        }

        let plugin: Arc<Plugin> = match self.slots.read().get(key) {
            Some(Slot::Loaded {
                plugin,
                enabled: false,
                ..
            }) => plugin.clone(),
            Some(Slot::Loaded { enabled: true, .. }) => return,
            Some(Slot::Broken(broken)) => {
                warn!(key = %key, error = %broken.error, "cannot enable broken plugin");
                return;
            }
            None => {
                warn!(key = %key, "cannot enable unknown plugin");
                return;
            }
        };

        for dep in plugin.requires() {
            self.enable_recursive(dep, in_progress, events);
        }

        {
            let mut slots = self.slots.write();
            if let Some(Slot::Loaded { enabled, .. }) = slots.get_mut(key) {
                *enabled = true;
            }
        }

        let state = {
            let mut state = self.state.lock();
            state.set_plugin(&plugin, true);
            state.clone()
        };

        debug!(key = %key, "plugin enabled");
        for module in plugin.modules() {
            if state.module_enabled(&plugin, module) {
                events.push(LifecycleEvent::ModuleEnabled(module.clone()));
            }
        }
    }

    /// Disable one plugin. Dependents are not touched; the override diff is
    /// persisted and a `PluginDisabled` event is broadcast before returning.
    /// Returns false when the plugin was not enabled to begin with.
    pub fn disable(&self, key: &str) -> Result<bool, StoreError> {
        let plugin: Arc<Plugin> = {
            let mut slots = self.slots.write();
            match slots.get_mut(key) {
                Some(Slot::Loaded {
                    plugin, enabled, ..
                }) if *enabled => {
                    *enabled = false;
                    plugin.clone()
                }
                _ => return Ok(false),
            }
        };

        {
            let mut state = self.state.lock();
            state.set_plugin(&plugin, false);
        }
        let persisted = self.persist();

        // Non-transitive by design: surface who still requires this plugin
        // so an embedding application can apply its own policy.
        for dependent in self.enabled_dependents(key) {
            debug!(
                disabled = %key,
                dependent = %dependent,
                "dependent remains enabled after its requirement was disabled"
            );
        }

        // Broadcast even when persistence failed; the slot is already off
        // and trackers must not keep the plugin's modules.
        self.bus
            .broadcast(&LifecycleEvent::PluginDisabled(plugin));
        debug!(key = %key, "plugin disabled");
        persisted.map(|()| true)
    }

    /// Override one module on. Broadcasts `ModuleEnabled` when this actually
    /// turns the module on.
    pub fn enable_module(&self, plugin_key: &str, module_key: &str) -> Result<bool, StoreError> {
        let Some(plugin) = self.plugin(plugin_key) else {
            warn!(plugin = %plugin_key, "cannot enable module of unknown plugin");
            return Ok(false);
        };
        let Some(module) = plugin.module(module_key).cloned() else {
            warn!(plugin = %plugin_key, module = %module_key, "unknown module");
            return Ok(false);
        };

        let was_enabled = {
            let mut state = self.state.lock();
            let before = state.module_enabled(&plugin, &module);
            state.set_module(&plugin, &module, true);
            before
        };
        let persisted = self.persist();

        let turned_on = !was_enabled && self.is_plugin_enabled(plugin_key);
        if turned_on {
            self.bus
                .broadcast(&LifecycleEvent::ModuleEnabled(module));
        }
        persisted?;
        Ok(turned_on)
    }

    /// Override one module off. Broadcasts `ModuleDisabled` when this
    /// actually turns the module off.
    pub fn disable_module(&self, plugin_key: &str, module_key: &str) -> Result<bool, StoreError> {
        let Some(plugin) = self.plugin(plugin_key) else {
            return Ok(false);
        };
        let Some(module) = plugin.module(module_key).cloned() else {
            return Ok(false);
        };

        let was_enabled = {
            let mut state = self.state.lock();
            let before = state.module_enabled(&plugin, &module);
            state.set_module(&plugin, &module, false);
            before
        };
        let persisted = self.persist();

        if was_enabled {
            self.bus
                .broadcast(&LifecycleEvent::ModuleDisabled(module));
        }
        persisted?;
        Ok(was_enabled)
    }

    /// Keys of enabled plugins that declare `key` as a requirement.
    fn enabled_dependents(&self, key: &str) -> Vec<String> {
        let slots = self.slots.read();
        slots
            .values()
            .filter_map(|slot| match slot {
                Slot::Loaded {
                    plugin,
                    enabled: true,
                    ..
                } if plugin.requires().iter().any(|r| r == key) => {
                    Some(plugin.key().to_owned())
                }
                _ => None,
            })
            .collect()
    }
}
