//! The staging index: which component versions are extracted where.
//!
//! Stored as `staging.json` in the SDK directory. Each entry records the
//! binary and the manifest generated for it.

use ledgerbridge_types::EngineVersion;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

use crate::config::Bitness;
use crate::error::AcquireResult;

pub const INDEX_FILE: &str = "staging.json";

/// How a component was obtained by the call that returned it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StagingOrigin {
    /// Reused from the staging index.
    #[default]
    Cached,
    /// Downloaded and extracted by this call.
    Fresh,
}

/// A fully extracted component for one version and bitness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedComponent {
    pub version: EngineVersion,
    /// Version of the archive actually downloaded (nearest-minor fallback).
    pub source_version: EngineVersion,
    pub bitness: Bitness,
    pub archive_path: PathBuf,
    pub extract_dir: PathBuf,
    pub binary_path: PathBuf,
    #[serde(default)]
    pub typelib_path: Option<PathBuf>,
    pub manifest_path: PathBuf,
    pub source_url: String,
    pub staged_at_ms: u64,
    #[serde(skip)]
    pub origin: StagingOrigin,
}

impl StagedComponent {
    /// Directory holding the binary and its dependencies.
    #[must_use]
    pub fn directory(&self) -> &Path {
        self.binary_path.parent().unwrap_or(&self.extract_dir)
    }

    #[must_use]
    pub fn binary_present(&self) -> bool {
        self.binary_path.is_file()
    }

    #[must_use]
    pub fn manifest_present(&self) -> bool {
        self.manifest_path.is_file()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagingIndex {
    #[serde(default)]
    pub components: Vec<StagedComponent>,
}

impl StagingIndex {
    /// Reads the index, treating a missing or unreadable file as empty.
    #[must_use]
    pub fn load(sdk_dir: &Path) -> Self {
        let path = sdk_dir.join(INDEX_FILE);
        match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!(path = %path.display(), "Ignoring corrupt staging index: {}", e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, sdk_dir: &Path) -> AcquireResult<()> {
        fs::create_dir_all(sdk_dir)?;
        let path = sdk_dir.join(INDEX_FILE);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(tmp, path)?;
        Ok(())
    }

    #[must_use]
    pub fn find(&self, version: EngineVersion, bitness: Bitness) -> Option<&StagedComponent> {
        self.components
            .iter()
            .find(|c| c.version == version && c.bitness == bitness)
    }

    /// Replaces any entry for the same version and bitness.
    pub fn upsert(&mut self, component: StagedComponent) {
        self.components
            .retain(|c| !(c.version == component.version && c.bitness == component.bitness));
        self.components.push(component);
    }

    /// The most recently staged component whose binary still exists.
    #[must_use]
    pub fn active(&self) -> Option<&StagedComponent> {
        self.components
            .iter()
            .filter(|c| c.binary_present())
            .max_by_key(|c| c.staged_at_ms)
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(dir: &Path, minor: u16, staged_at_ms: u64) -> StagedComponent {
        let binary_path = dir.join(format!("engine{minor}.dll"));
        fs::write(&binary_path, b"MZ").unwrap();
        StagedComponent {
            version: EngineVersion::new(32, minor),
            source_version: EngineVersion::new(32, minor),
            bitness: Bitness::X64,
            archive_path: dir.join("a.zip"),
            extract_dir: dir.to_path_buf(),
            binary_path,
            typelib_path: None,
            manifest_path: dir.join("engine.sxs.manifest"),
            source_url: "https://example.invalid/a.zip".to_string(),
            staged_at_ms,
            origin: StagingOrigin::Cached,
        }
    }

    #[test]
    fn index_round_trips_with_camel_case_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = StagingIndex::default();
        index.upsert(component(dir.path(), 0, 10));
        index.save(dir.path()).unwrap();

        let raw = fs::read_to_string(dir.path().join(INDEX_FILE)).unwrap();
        assert!(raw.contains("\"manifestPath\""));

        let loaded = StagingIndex::load(dir.path());
        assert_eq!(loaded.components, index.components);
    }

    #[test]
    fn upsert_replaces_same_version_and_bitness() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = StagingIndex::default();
        index.upsert(component(dir.path(), 0, 10));
        index.upsert(component(dir.path(), 0, 20));
        assert_eq!(index.components.len(), 1);
        assert_eq!(index.components[0].staged_at_ms, 20);
    }

    #[test]
    fn active_is_most_recent_with_binary() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = StagingIndex::default();
        index.upsert(component(dir.path(), 0, 10));
        let newest = component(dir.path(), 1, 30);
        fs::remove_file(&newest.binary_path).unwrap();
        index.upsert(newest);
        index.upsert(component(dir.path(), 2, 20));

        assert_eq!(index.active().map(|c| c.version), Some(EngineVersion::new(32, 2)));
    }

    #[test]
    fn corrupt_index_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(INDEX_FILE), b"{not json").unwrap();
        assert!(StagingIndex::load(dir.path()).components.is_empty());
    }
}
