//! Deployment scanner: polls the plugin directory and diffs it against the
//! previously seen artifacts by path and modification time.
//!
//! The scanner owns no thread. Callers invoke [`Scanner::scan`] on their own
//! cadence and must serialize calls; the scanner itself is not reentrant.
//! Unreadable entries become [`ScanError`]s in the report, never a failed
//! scan: one corrupt artifact must not hide the rest of the directory.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use tracing::{debug, warn};

use crate::artifact::Artifact;

#[derive(Debug, Error)]
#[error("scan error at {path}: {message}")]
pub struct ScanError {
    pub path: PathBuf,
    pub message: String,
}

/// Result of one scan pass.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Newly appeared artifacts, including the replacement half of a change.
    pub added: Vec<Artifact>,
    /// Paths whose previous deployment unit is gone: deleted files, files
    /// that became unreadable, and the superseded half of a change.
    pub removed: Vec<PathBuf>,
    /// Per-entry failures; the scan itself always completes.
    pub errors: Vec<ScanError>,
}

impl ScanReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Polling directory scanner with change detection.
pub struct Scanner {
    root: PathBuf,
    suffixes: Vec<String>,
    /// A directory only counts as an artifact when it contains this file,
    /// so unrelated folders in the watch root are ignored.
    dir_probe: Option<String>,
    seen: HashMap<PathBuf, SystemTime>,
}

impl Scanner {
    pub fn new(root: impl Into<PathBuf>, suffixes: Vec<String>) -> Self {
        Self {
            root: root.into(),
            suffixes,
            dir_probe: None,
            seen: HashMap::new(),
        }
    }

    /// Recognize directories containing `probe_file` as artifacts.
    pub fn with_dir_probe(mut self, probe_file: impl Into<String>) -> Self {
        self.dir_probe = Some(probe_file.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// One scan pass over the watch root.
    ///
    /// For every candidate entry: unseen paths are added; seen paths whose
    /// modification time increased are reported as removed (the old unit)
    /// and added (the new one); seen paths that vanished or turned
    /// unreadable are removed. A second pass with no filesystem change
    /// yields an empty report.
    pub fn scan(&mut self) -> ScanReport {
        let mut report = ScanReport::default();

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                // The whole watch root is unreadable: every known artifact
                // is now unreachable, which callers see as removals.
                warn!(root = %self.root.display(), error = %e, "plugin directory unreadable");
                report.errors.push(ScanError {
                    path: self.root.clone(),
                    message: e.to_string(),
                });
                report.removed.extend(self.seen.drain().map(|(p, _)| p));
                return report;
            }
        };

        let mut present: HashMap<PathBuf, SystemTime> = HashMap::new();

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    report.errors.push(ScanError {
                        path: self.root.clone(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            let path = entry.path();
            if !self.is_candidate(&path) {
                continue;
            }

            match Artifact::open(&path) {
                Ok(artifact) => {
                    present.insert(path.clone(), artifact.modified());
                    match self.seen.get(&path) {
                        None => {
                            debug!(path = %path.display(), "artifact discovered");
                            report.added.push(artifact);
                        }
                        Some(&old) if artifact.modified() > old => {
                            debug!(path = %path.display(), "artifact changed, superseding");
                            report.removed.push(path);
                            report.added.push(artifact);
                        }
                        Some(_) => {}
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable artifact");
                    report.errors.push(ScanError {
                        path: path.clone(),
                        message: e.to_string(),
                    });
                    // Previously healthy and now unreadable counts as gone.
                    if self.seen.contains_key(&path) {
                        report.removed.push(path);
                    }
                }
            }
        }

        for path in self.seen.keys() {
            if !present.contains_key(path) && !report.removed.contains(path) {
                debug!(path = %path.display(), "artifact removed");
                report.removed.push(path.clone());
            }
        }

        self.seen = present;
        report
    }

    fn is_candidate(&self, path: &Path) -> bool {
        if path.is_dir() {
            return match &self.dir_probe {
                Some(probe) => path.join(probe).is_file(),
                None => false,
            };
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.starts_with('.') {
            return false;
        }
        self.suffixes.is_empty() || self.suffixes.iter().any(|s| name.ends_with(s.as_str()))
    }
}
