//! Plugin descriptor: the `plugdock.plugin.toml` manifest an artifact
//! supplies to identify and version itself.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::Artifact;

/// Entry name artifacts must use for their descriptor.
pub const DESCRIPTOR_ENTRY: &str = "plugdock.plugin.toml";

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("descriptor entry `{DESCRIPTOR_ENTRY}` not found")]
    Missing,
    #[error("descriptor is not valid UTF-8")]
    Encoding,
    #[error("failed to parse descriptor: {0}")]
    Parse(String),
    #[error("descriptor requires a non-empty `key`")]
    EmptyKey,
    #[error("failed to read descriptor: {0}")]
    Read(String),
}

/// Parsed plugin descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Unique plugin key (e.g. `"com.example.dashboard"`).
    pub key: String,
    /// SemVer version string.
    pub version: Option<String>,
    /// Human-readable name.
    pub name: Option<String>,
    /// Keys of plugins that must be enabled before this one.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Whether the plugin starts enabled when no override is stored.
    #[serde(default = "default_true")]
    pub enabled_by_default: bool,
    #[serde(default = "default_true")]
    pub uninstallable: bool,
    #[serde(default = "default_true")]
    pub deletable: bool,
    /// Declared modules, in declaration order.
    #[serde(default)]
    pub modules: Vec<ModuleDescriptor>,
}

/// One declared extension point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub key: String,
    /// Module kind, the axis trackers filter on (e.g. `"servlet"`).
    pub kind: String,
    #[serde(default = "default_true")]
    pub enabled_by_default: bool,
}

fn default_true() -> bool {
    true
}

impl PluginDescriptor {
    /// Parse a descriptor from raw TOML bytes, validating the key.
    pub fn parse(bytes: &[u8]) -> Result<Self, DescriptorError> {
        let text = std::str::from_utf8(bytes).map_err(|_| DescriptorError::Encoding)?;
        let descriptor: PluginDescriptor =
            toml::from_str(text).map_err(|e| DescriptorError::Parse(e.to_string()))?;
        if descriptor.key.trim().is_empty() {
            return Err(DescriptorError::EmptyKey);
        }
        Ok(descriptor)
    }

    /// Read and parse the descriptor entry out of an artifact.
    pub fn from_artifact(artifact: &Artifact) -> Result<Self, DescriptorError> {
        let bytes = artifact
            .read(DESCRIPTOR_ENTRY)
            .map_err(|e| DescriptorError::Read(e.to_string()))?
            .ok_or(DescriptorError::Missing)?;
        Self::parse(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn parse_full_descriptor() {
        let descriptor = PluginDescriptor::parse(
            br#"
key = "com.example.dashboard"
version = "1.4.0"
name = "Dashboard"
requires = ["com.example.core"]

[[modules]]
key = "summary"
kind = "web-panel"

[[modules]]
key = "export"
kind = "servlet"
enabled_by_default = false
"#,
        )
        .unwrap();

        assert_eq!(descriptor.key, "com.example.dashboard");
        assert_eq!(descriptor.version.as_deref(), Some("1.4.0"));
        assert_eq!(descriptor.requires, ["com.example.core".to_string()]);
        assert!(descriptor.enabled_by_default);
        assert_eq!(descriptor.modules.len(), 2);
        assert!(descriptor.modules[0].enabled_by_default);
        assert!(!descriptor.modules[1].enabled_by_default);
    }

    #[test]
    fn empty_key_is_rejected() {
        let err = PluginDescriptor::parse(b"key = \"  \"\n").unwrap_err();
        assert!(matches!(err, DescriptorError::EmptyKey));
    }

    #[test]
    fn missing_key_is_a_parse_error() {
        let err = PluginDescriptor::parse(b"version = \"1.0\"\n").unwrap_err();
        assert!(matches!(err, DescriptorError::Parse(_)));
    }

    #[test]
    fn from_artifact_reads_the_descriptor_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("plug");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(DESCRIPTOR_ENTRY), b"key = \"p\"\n").unwrap();

        let artifact = Artifact::open(&dir).unwrap();
        let descriptor = PluginDescriptor::from_artifact(&artifact).unwrap();
        assert_eq!(descriptor.key, "p");
    }

    #[test]
    fn from_artifact_without_descriptor_is_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("bare");
        fs::create_dir_all(&dir).unwrap();

        let artifact = Artifact::open(&dir).unwrap();
        let err = PluginDescriptor::from_artifact(&artifact).unwrap_err();
        assert!(matches!(err, DescriptorError::Missing));
    }
}
