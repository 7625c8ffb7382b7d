//! Artifact access: a uniform content view over one discovered package.
//!
//! An artifact is a plain file, a directory, or a zip archive sitting in the
//! watched plugin directory. Callers never see the container format: they get
//! entry names and bytes. Identity is the absolute path plus the last-modified
//! timestamp; the same path with a newer timestamp is a different deployment
//! unit and must fully replace the old one.

use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to open archive {path}: {message}")]
    Archive { path: PathBuf, message: String },
}

/// How the package is laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    File,
    Directory,
    Archive,
}

/// One discovered deployment unit.
///
/// Cheap to clone; archive contents are re-opened per read rather than held
/// open, so an `Artifact` stays `Send + Sync` and never pins a file handle.
#[derive(Debug, Clone)]
pub struct Artifact {
    path: PathBuf,
    modified: SystemTime,
    kind: ArtifactKind,
}

impl Artifact {
    /// Open the package at `path`, classifying it and capturing its
    /// last-modified timestamp. For directories the timestamp is the maximum
    /// over the directory and every descendant file, so a change anywhere in
    /// the tree counts as a change to the artifact.
    pub fn open(path: &Path) -> Result<Self, ArtifactError> {
        let meta = fs::metadata(path).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        if meta.is_dir() {
            return Ok(Self {
                path: path.to_path_buf(),
                modified: deep_modified(path, &meta),
                kind: ArtifactKind::Directory,
            });
        }

        let modified = meta.modified().map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        // Sniff rather than trust the suffix: a renamed archive still loads,
        // and a truncated one is reported up front instead of at first read.
        let kind = match fs::File::open(path) {
            Ok(file) => match zip::ZipArchive::new(file) {
                Ok(_) => ArtifactKind::Archive,
                Err(_) => ArtifactKind::File,
            },
            Err(source) => {
                return Err(ArtifactError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            modified,
            kind,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn modified(&self) -> SystemTime {
        self.modified
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// Equal path and equal timestamp means the same deployment unit.
    pub fn same_deployment(&self, other: &Artifact) -> bool {
        self.path == other.path && self.modified == other.modified
    }

    /// List entry names. Directory entries are `/`-separated paths relative
    /// to the artifact root; archive entries are the archive's own names;
    /// a plain file exposes its single file name.
    pub fn entries(&self) -> Result<Vec<String>, ArtifactError> {
        match self.kind {
            ArtifactKind::File => Ok(self
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .into_iter()
                .collect()),
            ArtifactKind::Directory => {
                let mut names = Vec::new();
                for entry in walkdir::WalkDir::new(&self.path)
                    .follow_links(false)
                    .into_iter()
                    .filter_map(Result::ok)
                    .filter(|e| e.file_type().is_file())
                {
                    if let Ok(rel) = entry.path().strip_prefix(&self.path) {
                        names.push(rel.to_string_lossy().replace('\\', "/"));
                    }
                }
                names.sort();
                Ok(names)
            }
            ArtifactKind::Archive => {
                let archive = self.open_archive()?;
                let mut names: Vec<String> = archive
                    .file_names()
                    .filter(|n| !n.ends_with('/'))
                    .map(str::to_owned)
                    .collect();
                names.sort();
                Ok(names)
            }
        }
    }

    /// Read one entry by name. `Ok(None)` means the entry does not exist;
    /// probing for absent entries is the common case and not an error.
    pub fn read(&self, name: &str) -> Result<Option<Vec<u8>>, ArtifactError> {
        match self.kind {
            ArtifactKind::File => {
                let matches = self
                    .path
                    .file_name()
                    .is_some_and(|n| n.to_string_lossy() == name);
                if !matches {
                    return Ok(None);
                }
                fs::read(&self.path).map(Some).map_err(|source| {
                    ArtifactError::Io {
                        path: self.path.clone(),
                        source,
                    }
                })
            }
            ArtifactKind::Directory => {
                let candidate = self.path.join(name);
                if !candidate.is_file() {
                    return Ok(None);
                }
                fs::read(&candidate).map(Some).map_err(|source| {
                    ArtifactError::Io {
                        path: candidate,
                        source,
                    }
                })
            }
            ArtifactKind::Archive => {
                let mut archive = self.open_archive()?;
                let mut file = match archive.by_name(name) {
                    Ok(f) => f,
                    Err(zip::result::ZipError::FileNotFound) => return Ok(None),
                    Err(e) => {
                        return Err(ArtifactError::Archive {
                            path: self.path.clone(),
                            message: e.to_string(),
                        })
                    }
                };
                let mut buf = Vec::with_capacity(usize::try_from(file.size()).unwrap_or(0));
                file.read_to_end(&mut buf).map_err(|source| ArtifactError::Io {
                    path: self.path.clone(),
                    source,
                })?;
                Ok(Some(buf))
            }
        }
    }

    fn open_archive(&self) -> Result<zip::ZipArchive<Cursor<Vec<u8>>>, ArtifactError> {
        let bytes = fs::read(&self.path).map_err(|source| ArtifactError::Io {
            path: self.path.clone(),
            source,
        })?;
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| ArtifactError::Archive {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }
}

/// Max mtime over the directory and all descendants. Unreadable descendants
/// are skipped with a warning; the directory's own mtime is the floor.
fn deep_modified(path: &Path, meta: &fs::Metadata) -> SystemTime {
    let mut newest = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    for entry in walkdir::WalkDir::new(path)
        .follow_links(false)
        .into_iter()
    {
        match entry {
            Ok(entry) => {
                if let Ok(m) = entry.metadata() {
                    if let Ok(t) = m.modified() {
                        if t > newest {
                            newest = t;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(dir = %path.display(), error = %e, "skipping unreadable entry during timestamp walk");
            }
        }
    }
    newest
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, bytes) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn directory_artifact_lists_and_reads() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("my-plugin");
        fs::create_dir_all(root.join("assets")).unwrap();
        fs::write(root.join("descriptor.toml"), b"hello").unwrap();
        fs::write(root.join("assets/icon.svg"), b"<svg/>").unwrap();

        let artifact = Artifact::open(&root).unwrap();
        assert_eq!(artifact.kind(), ArtifactKind::Directory);
        assert_eq!(
            artifact.entries().unwrap(),
            vec!["assets/icon.svg".to_string(), "descriptor.toml".to_string()]
        );
        assert_eq!(artifact.read("assets/icon.svg").unwrap().unwrap(), b"<svg/>");
        assert!(artifact.read("missing.txt").unwrap().is_none());
    }

    #[test]
    fn archive_artifact_lists_and_reads() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bundle.zip");
        write_zip(&path, &[("a.txt", b"alpha"), ("sub/b.txt", b"beta")]);

        let artifact = Artifact::open(&path).unwrap();
        assert_eq!(artifact.kind(), ArtifactKind::Archive);
        assert_eq!(
            artifact.entries().unwrap(),
            vec!["a.txt".to_string(), "sub/b.txt".to_string()]
        );
        assert_eq!(artifact.read("sub/b.txt").unwrap().unwrap(), b"beta");
        assert!(artifact.read("nope").unwrap().is_none());
    }

    #[test]
    fn plain_file_artifact_reads_itself() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("notes.txt");
        fs::write(&path, b"just text").unwrap();

        let artifact = Artifact::open(&path).unwrap();
        assert_eq!(artifact.kind(), ArtifactKind::File);
        assert_eq!(artifact.read("notes.txt").unwrap().unwrap(), b"just text");
        assert!(artifact.read("other.txt").unwrap().is_none());
    }

    #[test]
    fn descendant_change_bumps_directory_timestamp() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("plugin");
        fs::create_dir_all(root.join("deep")).unwrap();
        let inner = root.join("deep/data.txt");
        fs::write(&inner, b"v1").unwrap();

        let before = Artifact::open(&root).unwrap();

        let future = SystemTime::now() + Duration::from_secs(5);
        let file = fs::File::options().write(true).open(&inner).unwrap();
        file.set_modified(future).unwrap();

        let after = Artifact::open(&root).unwrap();
        assert!(after.modified() > before.modified());
        assert!(!after.same_deployment(&before));
    }

    #[test]
    fn same_path_same_mtime_is_same_deployment() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("p.txt");
        fs::write(&path, b"x").unwrap();

        let a = Artifact::open(&path).unwrap();
        let b = Artifact::open(&path).unwrap();
        assert!(a.same_deployment(&b));
    }
}
