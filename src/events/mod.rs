//! Lifecycle event bus: synchronous in-process publish/subscribe.
//!
//! Broadcast delivers to every currently registered listener before it
//! returns, which is what gives trackers their "visible everywhere by the
//! time enable() returns" guarantee. A panicking listener is caught and
//! logged per listener; delivery always continues to the rest.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::plugin::{Module, Plugin};

/// Immutable record of one lifecycle transition.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    ModuleEnabled(Arc<Module>),
    ModuleDisabled(Arc<Module>),
    /// Carries the plugin so listeners can iterate its own modules.
    PluginDisabled(Arc<Plugin>),
}

type ListenerFn = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// Synchronous lifecycle event bus. Thread-safe; listeners may subscribe
/// and unsubscribe concurrently with broadcasts.
pub struct EventBus {
    listeners: RwLock<Vec<(u64, ListenerFn)>>,
    next_listener_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    /// Register a listener. Returns a handle id for [`EventBus::unsubscribe`];
    /// holders must unsubscribe or the listener lives as long as the bus.
    pub fn subscribe(&self, listener: impl Fn(&LifecycleEvent) + Send + Sync + 'static) -> u64 {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.listeners.write().retain(|(lid, _)| *lid != id);
    }

    /// Deliver `event` to all current listeners, synchronously.
    pub fn broadcast(&self, event: &LifecycleEvent) {
        // Snapshot outside the lock so listeners can (un)subscribe from
        // inside their callback without deadlocking.
        let snapshot: Vec<(u64, ListenerFn)> = self.listeners.read().clone();
        for (id, listener) in snapshot {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| listener(event)));
            if outcome.is_err() {
                warn!(listener = id, "lifecycle listener panicked; delivery continues");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Artifact;
    use crate::namespace::ModuleNamespace;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn module(key: &str) -> Arc<Module> {
        Arc::new(Module::new("p", key, "kind", true))
    }

    fn plugin(tmp: &std::path::Path) -> Arc<Plugin> {
        let dir = tmp.join("p");
        std::fs::create_dir_all(&dir).unwrap();
        let ns = Arc::new(ModuleNamespace::build(Artifact::open(&dir).unwrap(), None).unwrap());
        Arc::new(Plugin::new("p", ns, &dir))
    }

    #[test]
    fn broadcast_is_synchronous_and_in_registration_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = seen.clone();
            bus.subscribe(move |_| seen.lock().push(tag));
        }

        bus.broadcast(&LifecycleEvent::ModuleEnabled(module("m")));
        assert_eq!(*seen.lock(), vec!["first", "second"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let id = bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });
        bus.unsubscribe(id);

        bus.broadcast(&LifecycleEvent::ModuleEnabled(module("m")));
        assert_eq!(count.load(Ordering::Relaxed), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn panicking_listener_does_not_stop_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        bus.subscribe(|_| panic!("listener bug"));
        let c = count.clone();
        bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });

        bus.broadcast(&LifecycleEvent::ModuleEnabled(module("m")));
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn listener_can_unsubscribe_itself_during_broadcast() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));

        let bus2 = bus.clone();
        let c = count.clone();
        let id = Arc::new(AtomicU64::new(0));
        let id2 = id.clone();
        let registered = bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
            bus2.unsubscribe(id2.load(Ordering::Relaxed));
        });
        id.store(registered, Ordering::Relaxed);

        bus.broadcast(&LifecycleEvent::ModuleEnabled(module("m")));
        bus.broadcast(&LifecycleEvent::ModuleEnabled(module("m")));
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn plugin_disabled_carries_the_plugin() {
        let tmp = tempfile::tempdir().unwrap();
        let bus = EventBus::new();
        let keys = Arc::new(Mutex::new(Vec::new()));

        let k = keys.clone();
        bus.subscribe(move |event| {
            if let LifecycleEvent::PluginDisabled(plugin) = event {
                k.lock().push(plugin.key().to_owned());
            }
        });

        bus.broadcast(&LifecycleEvent::PluginDisabled(plugin(tmp.path())));
        assert_eq!(*keys.lock(), vec!["p".to_string()]);
    }
}
