//! Module namespace: the isolated code/resource resolution scope owned by
//! one plugin.
//!
//! Resolution is strict child-first: the resolved cache, then entries found
//! in this namespace's own artifact, then the parent namespace. A plugin
//! therefore shadows an identically named parent symbol. Nested archives
//! bundled under the artifact's `lib/` sub-path are extracted once into a
//! private temp directory and merged in without overriding outer entries:
//! outer beats inner, both beat parent.

use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, warn};

use crate::artifact::Artifact;

/// Fixed sub-path holding embedded library archives.
pub const NESTED_LIB_DIR: &str = "lib/";

#[derive(Debug, Error)]
pub enum NamespaceError {
    #[error("failed to read artifact entry {entry}: {message}")]
    Entry { entry: String, message: String },
    #[error("failed to extract nested archive {entry}: {message}")]
    Extract { entry: String, message: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
enum EntrySource {
    /// Read from the owning artifact by entry name.
    Outer,
    /// Absolute path inside the private extraction directory.
    Extracted(PathBuf),
}

/// Isolated, child-first resolution scope for one plugin's code and
/// resources. Extracted temp files are owned exclusively by the namespace
/// and deleted on [`ModuleNamespace::close`].
pub struct ModuleNamespace {
    artifact: Artifact,
    parent: Option<Arc<ModuleNamespace>>,
    entries: HashMap<String, EntrySource>,
    cache: Mutex<HashMap<String, Arc<[u8]>>>,
    extraction: Mutex<Option<TempDir>>,
    closed: AtomicBool,
}

impl ModuleNamespace {
    /// Build the namespace for `artifact`, discovering its entries and
    /// extracting any nested archives under [`NESTED_LIB_DIR`].
    pub fn build(
        artifact: Artifact,
        parent: Option<Arc<ModuleNamespace>>,
    ) -> Result<Self, NamespaceError> {
        let mut entries: HashMap<String, EntrySource> = HashMap::new();
        let names = artifact.entries().map_err(|e| NamespaceError::Entry {
            entry: artifact.path().display().to_string(),
            message: e.to_string(),
        })?;

        // Outer entries register first and always win.
        for name in &names {
            entries.insert(name.clone(), EntrySource::Outer);
        }

        let nested: Vec<&String> = names
            .iter()
            .filter(|n| n.starts_with(NESTED_LIB_DIR) && n.ends_with(".zip"))
            .collect();

        let extraction = if nested.is_empty() {
            None
        } else {
            let dir = TempDir::with_prefix("plugdock-ns-")?;
            for name in nested {
                extract_nested(&artifact, name, dir.path(), &mut entries)?;
            }
            Some(dir)
        };

        debug!(
            artifact = %artifact.path().display(),
            entries = entries.len(),
            "namespace built"
        );

        Ok(Self {
            artifact,
            parent,
            entries,
            cache: Mutex::new(HashMap::new()),
            extraction: Mutex::new(extraction),
            closed: AtomicBool::new(false),
        })
    }

    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    /// Resolve a symbol or resource by name.
    ///
    /// Order: resolved cache, own entries, parent. Misses are the expected
    /// common case and return `None`, never an error.
    pub fn resolve(&self, name: &str) -> Option<Arc<[u8]>> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }

        if let Some(bytes) = self.cache.lock().get(name) {
            return Some(bytes.clone());
        }

        if let Some(source) = self.entries.get(name) {
            match self.load(name, source) {
                Some(bytes) => {
                    let bytes: Arc<[u8]> = bytes.into();
                    self.cache.lock().insert(name.to_owned(), bytes.clone());
                    return Some(bytes);
                }
                // Entry listed but unreadable: fall through to the parent
                // rather than fail, matching not-found semantics.
                None => {}
            }
        }

        self.parent.as_ref().and_then(|p| p.resolve(name))
    }

    fn load(&self, name: &str, source: &EntrySource) -> Option<Vec<u8>> {
        match source {
            EntrySource::Outer => match self.artifact.read(name) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(entry = name, error = %e, "entry read failed");
                    None
                }
            },
            EntrySource::Extracted(path) => match fs::read(path) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(entry = name, error = %e, "extracted entry read failed");
                    None
                }
            },
        }
    }

    /// Tear the namespace down: drop the extraction directory (deleting the
    /// temp files) and stop resolving. Idempotent; safe to call repeatedly.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cache.lock().clear();
        if let Some(dir) = self.extraction.lock().take() {
            let path = dir.path().to_path_buf();
            drop(dir);
            debug!(dir = %path.display(), "namespace extraction dir removed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ModuleNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleNamespace")
            .field("artifact", &self.artifact.path())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for ModuleNamespace {
    fn drop(&mut self) {
        self.close();
    }
}

/// Extract one `lib/*.zip` into `root/<archive-stem>/` and merge its files
/// into the entry table. Outer entries are never overridden.
fn extract_nested(
    artifact: &Artifact,
    entry_name: &str,
    root: &std::path::Path,
    entries: &mut HashMap<String, EntrySource>,
) -> Result<(), NamespaceError> {
    let bytes = artifact
        .read(entry_name)
        .map_err(|e| NamespaceError::Entry {
            entry: entry_name.to_owned(),
            message: e.to_string(),
        })?
        .ok_or_else(|| NamespaceError::Entry {
            entry: entry_name.to_owned(),
            message: "listed but unreadable".to_owned(),
        })?;

    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| NamespaceError::Extract {
            entry: entry_name.to_owned(),
            message: e.to_string(),
        })?;

    let stem = std::path::Path::new(entry_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "nested".to_owned());
    let target = root.join(&stem);
    archive
        .extract(&target)
        .map_err(|e| NamespaceError::Extract {
            entry: entry_name.to_owned(),
            message: e.to_string(),
        })?;

    for inner in walkdir::WalkDir::new(&target)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        let Ok(rel) = inner.path().strip_prefix(&target) else {
            continue;
        };
        let name = rel.to_string_lossy().replace('\\', "/");
        // Inner entries never shadow what the outer artifact already has.
        entries
            .entry(name)
            .or_insert_with(|| EntrySource::Extracted(inner.path().to_path_buf()));
    }

    Ok(())
}
