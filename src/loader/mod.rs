//! Loader chain: ordered recognizer/materializer pairs that turn scanned
//! artifacts into live plugins.
//!
//! Each pair is asked in order whether it can identify the artifact; the
//! first match materializes it. A materializer failure (error or panic) is
//! converted into a [`BrokenPlugin`] carrying the diagnostic text so one bad
//! artifact never aborts the rest of the batch. Order matters: specific or
//! legacy recognizers must be registered before generic fallbacks, since a
//! single artifact can satisfy several weak heuristics.

mod descriptor;

pub use descriptor::{DescriptorError, ModuleDescriptor, PluginDescriptor, DESCRIPTOR_ENTRY};

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::artifact::Artifact;
use crate::namespace::ModuleNamespace;
use crate::plugin::{BrokenPlugin, Module, Plugin};

/// Identifies artifacts a paired [`Materializer`] can build.
pub trait Recognizer: Send + Sync {
    /// Return the plugin key if this artifact is recognized, `None` to let
    /// the next pair in the chain try. Not matching is not an error.
    fn identify(&self, artifact: &Artifact) -> Option<String>;
}

/// Builds a live [`Plugin`] from a recognized artifact.
pub trait Materializer: Send + Sync {
    fn materialize(
        &self,
        artifact: &Artifact,
        key: &str,
        parent: Option<Arc<ModuleNamespace>>,
    ) -> anyhow::Result<Plugin>;
}

/// Outcome of running one artifact through the chain.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(Plugin),
    Broken(BrokenPlugin),
    /// No recognizer matched; the artifact is silently skipped.
    Skipped,
}

/// Ordered chain of recognizer/materializer pairs.
pub struct LoaderChain {
    pairs: Vec<(Box<dyn Recognizer>, Box<dyn Materializer>)>,
    parent: Option<Arc<ModuleNamespace>>,
}

impl LoaderChain {
    pub fn new() -> Self {
        Self {
            pairs: Vec::new(),
            parent: None,
        }
    }

    /// Chain with the standard descriptor-based pair already registered.
    pub fn standard() -> Self {
        let mut chain = Self::new();
        chain.push(DescriptorRecognizer, DescriptorMaterializer);
        chain
    }

    /// Parent namespace handed to every materialized plugin, typically the
    /// host application's own resolution scope.
    pub fn with_parent_namespace(mut self, parent: Arc<ModuleNamespace>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Append a pair; earlier pairs win on overlapping recognition.
    pub fn push(
        &mut self,
        recognizer: impl Recognizer + 'static,
        materializer: impl Materializer + 'static,
    ) {
        self.pairs.push((Box::new(recognizer), Box::new(materializer)));
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Run `artifact` through the chain.
    pub fn materialize(&self, artifact: &Artifact) -> LoadOutcome {
        for (recognizer, materializer) in &self.pairs {
            let Some(key) = recognizer.identify(artifact) else {
                continue;
            };
            debug!(
                key = %key,
                artifact = %artifact.path().display(),
                "artifact recognized"
            );

            // Panic isolation: a misbehaving materializer damages only its
            // own artifact's slot.
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                materializer.materialize(artifact, &key, self.parent.clone())
            }));

            return match result {
                Ok(Ok(plugin)) => LoadOutcome::Loaded(plugin),
                Ok(Err(e)) => {
                    warn!(key = %key, error = %e, "materialization failed");
                    LoadOutcome::Broken(BrokenPlugin {
                        key,
                        source: artifact.path().to_path_buf(),
                        error: format!("{e:#}"),
                    })
                }
                Err(panic) => {
                    let message = panic_message(&*panic);
                    warn!(key = %key, error = %message, "materializer panicked");
                    LoadOutcome::Broken(BrokenPlugin {
                        key,
                        source: artifact.path().to_path_buf(),
                        error: format!("materializer panicked: {message}"),
                    })
                }
            };
        }
        LoadOutcome::Skipped
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

/// Recognizes artifacts carrying a `plugdock.plugin.toml` descriptor.
pub struct DescriptorRecognizer;

impl Recognizer for DescriptorRecognizer {
    fn identify(&self, artifact: &Artifact) -> Option<String> {
        match PluginDescriptor::from_artifact(artifact) {
            Ok(descriptor) => Some(descriptor.key),
            // A descriptor that exists but won't parse still identifies the
            // artifact; the materializer then reports the real error as a
            // broken plugin instead of the artifact vanishing.
            Err(DescriptorError::Missing) => None,
            Err(_) => Some(fallback_key(artifact)),
        }
    }
}

/// Materializes a plugin from its descriptor: builds the isolated namespace
/// and the declared modules.
pub struct DescriptorMaterializer;

impl Materializer for DescriptorMaterializer {
    fn materialize(
        &self,
        artifact: &Artifact,
        key: &str,
        parent: Option<Arc<ModuleNamespace>>,
    ) -> anyhow::Result<Plugin> {
        let descriptor = PluginDescriptor::from_artifact(artifact)?;
        let namespace = Arc::new(ModuleNamespace::build(artifact.clone(), parent)?);

        let modules = descriptor
            .modules
            .iter()
            .map(|m| Module::new(key, &m.key, &m.kind, m.enabled_by_default))
            .collect();

        let mut plugin = Plugin::new(key, namespace, artifact.path())
            .with_requires(descriptor.requires)
            .with_modules(modules)
            .with_enabled_by_default(descriptor.enabled_by_default)
            .with_uninstallable(descriptor.uninstallable)
            .with_deletable(descriptor.deletable);
        if let Some(version) = descriptor.version {
            plugin = plugin.with_version(version);
        }
        Ok(plugin)
    }
}

/// Last-resort key for artifacts identified by presence but unparsable.
fn fallback_key(artifact: &Artifact) -> String {
    artifact
        .path()
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| artifact.path().display().to_string())
}
