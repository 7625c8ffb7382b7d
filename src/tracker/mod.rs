//! Module tracker: a live, event-maintained view of the enabled modules of
//! one kind.
//!
//! The tracked set is a copy-on-write snapshot: readers clone an `Arc` and
//! iterate without holding any lock, while the (rare) event-driven writers
//! swap in a rebuilt vector. Because the bus broadcast is synchronous, the
//! tracker reflects an enable before `enable()` returns to its caller.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::events::{EventBus, LifecycleEvent};
use crate::plugin::Module;

/// Hooks invoked as entries join and leave the tracked set.
pub trait Customizer: Send + Sync {
    /// Called before a matching module is added. Return a substitute to
    /// track instead, or `None` to veto the entry.
    fn adding(&self, module: &Arc<Module>) -> Option<Arc<Module>> {
        Some(module.clone())
    }

    /// Called once per entry removed from the set.
    fn removed(&self, _module: &Arc<Module>) {}
}

/// Default customizer: track everything, no removal hook.
struct PassThrough;

impl Customizer for PassThrough {}

type Snapshot = Arc<Vec<Arc<Module>>>;

struct Tracked {
    kind: String,
    customizer: Arc<dyn Customizer>,
    snapshot: RwLock<Snapshot>,
}

impl Tracked {
    fn apply(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::ModuleEnabled(module) => {
                if module.kind() != self.kind {
                    return;
                }
                let Some(entry) = self.customizer.adding(module) else {
                    debug!(module = %module.complete_key(), "tracker entry vetoed");
                    return;
                };
                let mut snapshot = self.snapshot.write();
                let mut next: Vec<Arc<Module>> = snapshot
                    .iter()
                    .filter(|m| m.complete_key() != entry.complete_key())
                    .cloned()
                    .collect();
                next.push(entry);
                *snapshot = Arc::new(next);
            }
            LifecycleEvent::ModuleDisabled(module) => {
                self.remove_where(|m| m.complete_key() == module.complete_key());
            }
            LifecycleEvent::PluginDisabled(plugin) => {
                self.remove_where(|m| m.plugin_key() == plugin.key());
            }
        }
    }

    fn remove_where(&self, gone: impl Fn(&Arc<Module>) -> bool) {
        let mut snapshot = self.snapshot.write();
        let (removed, kept): (Vec<_>, Vec<_>) =
            snapshot.iter().cloned().partition(|m| gone(m));
        if removed.is_empty() {
            return;
        }
        *snapshot = Arc::new(kept);
        drop(snapshot);
        for module in removed {
            self.customizer.removed(&module);
        }
    }
}

/// Concurrency-safe auto-updating collection of the enabled modules of one
/// kind. Owns its registration on the bus; call [`ModuleTracker::close`]
/// when done or the bus keeps a live listener reference for its lifetime.
pub struct ModuleTracker {
    bus: Arc<EventBus>,
    tracked: Arc<Tracked>,
    listener_id: Mutex<Option<u64>>,
}

impl ModuleTracker {
    /// Build a tracker for `kind`, seeding it from the modules currently
    /// enabled (the caller supplies that view, typically the host registry).
    ///
    /// The tracker subscribes to the bus before `seed` is read, so a
    /// transition broadcast while the tracker is being built lands in the
    /// snapshot instead of falling into a gap; entries present in both are
    /// deduplicated by complete key.
    pub fn new(
        bus: Arc<EventBus>,
        kind: impl Into<String>,
        seed: impl FnOnce() -> Vec<Arc<Module>>,
        customizer: Option<Arc<dyn Customizer>>,
    ) -> Self {
        let tracked = Arc::new(Tracked {
            kind: kind.into(),
            customizer: customizer.unwrap_or_else(|| Arc::new(PassThrough)),
            snapshot: RwLock::new(Arc::new(Vec::new())),
        });

        let apply_to = tracked.clone();
        let listener_id = bus.subscribe(move |event| apply_to.apply(event));

        // Seed through the same path events take: kind filter, customizer,
        // dedupe against anything that arrived since subscribing.
        for module in seed() {
            tracked.apply(&LifecycleEvent::ModuleEnabled(module));
        }

        Self {
            bus,
            tracked,
            listener_id: Mutex::new(Some(listener_id)),
        }
    }

    pub fn kind(&self) -> &str {
        &self.tracked.kind
    }

    /// Lock-free-for-readers snapshot of the tracked modules.
    pub fn modules(&self) -> Snapshot {
        self.tracked.snapshot.read().clone()
    }

    pub fn len(&self) -> usize {
        self.tracked.snapshot.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unregister from the bus. Idempotent.
    pub fn close(&self) {
        if let Some(id) = self.listener_id.lock().take() {
            self.bus.unsubscribe(id);
        }
    }
}

impl Drop for ModuleTracker {
    fn drop(&mut self) {
        self.close();
    }
}
