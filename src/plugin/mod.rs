//! Plugin and module types: the live, materialized representation of one
//! artifact and the named extension points it declares.

use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::namespace::ModuleNamespace;

/// A named, typed extension point declared inside a plugin.
pub struct Module {
    plugin_key: String,
    key: String,
    kind: String,
    enabled_by_default: bool,
    payload: Option<Arc<dyn Any + Send + Sync>>,
}

impl Module {
    pub fn new(
        plugin_key: impl Into<String>,
        key: impl Into<String>,
        kind: impl Into<String>,
        enabled_by_default: bool,
    ) -> Self {
        Self {
            plugin_key: plugin_key.into(),
            key: key.into(),
            kind: kind.into(),
            enabled_by_default,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Arc<dyn Any + Send + Sync>) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn plugin_key(&self) -> &str {
        &self.plugin_key
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Globally unique `pluginKey:moduleKey` identity, the form used by the
    /// persistent state store.
    pub fn complete_key(&self) -> String {
        format!("{}:{}", self.plugin_key, self.key)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn enabled_by_default(&self) -> bool {
        self.enabled_by_default
    }

    /// Downcast the typed payload, if one was attached.
    pub fn payload<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.payload.clone().and_then(|p| p.downcast::<T>().ok())
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("complete_key", &self.complete_key())
            .field("kind", &self.kind)
            .field("enabled_by_default", &self.enabled_by_default)
            .finish_non_exhaustive()
    }
}

/// The live representation of one materialized artifact.
#[derive(Debug)]
pub struct Plugin {
    key: String,
    version: Option<String>,
    requires: Vec<String>,
    modules: Vec<Arc<Module>>,
    namespace: Arc<ModuleNamespace>,
    enabled_by_default: bool,
    uninstallable: bool,
    deletable: bool,
    source: PathBuf,
}

impl Plugin {
    pub fn new(
        key: impl Into<String>,
        namespace: Arc<ModuleNamespace>,
        source: impl Into<PathBuf>,
    ) -> Self {
        Self {
            key: key.into(),
            version: None,
            requires: Vec::new(),
            modules: Vec::new(),
            namespace,
            enabled_by_default: true,
            uninstallable: true,
            deletable: true,
            source: source.into(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_requires(mut self, requires: Vec<String>) -> Self {
        self.requires = requires;
        self
    }

    pub fn with_modules(mut self, modules: Vec<Module>) -> Self {
        self.modules = modules.into_iter().map(Arc::new).collect();
        self
    }

    pub fn with_enabled_by_default(mut self, enabled: bool) -> Self {
        self.enabled_by_default = enabled;
        self
    }

    pub fn with_uninstallable(mut self, uninstallable: bool) -> Self {
        self.uninstallable = uninstallable;
        self
    }

    pub fn with_deletable(mut self, deletable: bool) -> Self {
        self.deletable = deletable;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Declared required-plugin keys, in declaration order.
    pub fn requires(&self) -> &[String] {
        &self.requires
    }

    pub fn modules(&self) -> &[Arc<Module>] {
        &self.modules
    }

    pub fn module(&self, key: &str) -> Option<&Arc<Module>> {
        self.modules.iter().find(|m| m.key() == key)
    }

    pub fn namespace(&self) -> &Arc<ModuleNamespace> {
        &self.namespace
    }

    pub fn enabled_by_default(&self) -> bool {
        self.enabled_by_default
    }

    pub fn uninstallable(&self) -> bool {
        self.uninstallable
    }

    pub fn deletable(&self) -> bool {
        self.deletable
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

/// Placeholder for an artifact whose materialization failed.
///
/// It occupies the plugin key's registry slot so a host can show "failed to
/// load" with the diagnostic text instead of the plugin silently vanishing.
#[derive(Debug, Clone)]
pub struct BrokenPlugin {
    pub key: String,
    pub source: PathBuf,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Artifact;
    use std::fs;

    fn namespace(tmp: &Path) -> Arc<ModuleNamespace> {
        let dir = tmp.join("ns");
        fs::create_dir_all(&dir).unwrap();
        let artifact = Artifact::open(&dir).unwrap();
        Arc::new(ModuleNamespace::build(artifact, None).unwrap())
    }

    #[test]
    fn complete_key_joins_plugin_and_module() {
        let module = Module::new("com.example.core", "servlet", "servlet", true);
        assert_eq!(module.complete_key(), "com.example.core:servlet");
    }

    #[test]
    fn payload_downcasts_by_type() {
        let module = Module::new("p", "m", "label", true)
            .with_payload(Arc::new("hello".to_string()) as Arc<dyn Any + Send + Sync>);
        assert_eq!(module.payload::<String>().unwrap().as_str(), "hello");
        assert!(module.payload::<u32>().is_none());
    }

    #[test]
    fn plugin_builder_carries_declared_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let plugin = Plugin::new("p1", namespace(tmp.path()), tmp.path().join("p1"))
            .with_version("2.0.1")
            .with_requires(vec!["p0".into()])
            .with_modules(vec![Module::new("p1", "a", "web-item", true)])
            .with_uninstallable(false);

        assert_eq!(plugin.key(), "p1");
        assert_eq!(plugin.version(), Some("2.0.1"));
        assert_eq!(plugin.requires(), ["p0".to_string()]);
        assert_eq!(plugin.modules().len(), 1);
        assert!(plugin.module("a").is_some());
        assert!(plugin.module("zzz").is_none());
        assert!(!plugin.uninstallable());
        assert!(plugin.deletable());
    }
}
