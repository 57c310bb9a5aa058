//! `[acquire]` configuration: cache location, HTTP settings and the
//! version → download table.
//!
//! No download locations are built in. Engine archives are licensed per
//! site, so until `[[acquire.downloads]]` lists them `ensure` can only
//! succeed for a registered or already staged engine.

use ledgerbridge_types::{ClassId, EngineVersion};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Processor bitness of a component build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bitness {
    X64,
    X86,
}

impl Bitness {
    /// Bitness of the running process.
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(target_pointer_width = "64") {
            Self::X64
        } else {
            Self::X86
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::X64 => "x64",
            Self::X86 => "x86",
        }
    }
}

impl fmt::Display for Bitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Download locations for one engine version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadEntry {
    pub version: EngineVersion,
    #[serde(default)]
    pub x64: Option<String>,
    #[serde(default)]
    pub x86: Option<String>,
}

impl DownloadEntry {
    /// The URL for `bitness`, falling back to the other build.
    #[must_use]
    pub fn url_for(&self, bitness: Bitness) -> Option<&str> {
        let (preferred, other) = match bitness {
            Bitness::X64 => (&self.x64, &self.x86),
            Bitness::X86 => (&self.x86, &self.x64),
        };
        preferred.as_deref().or(other.as_deref())
    }
}

/// A download URL picked for a requested version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDownload {
    pub requested: EngineVersion,
    /// The table entry used; differs from `requested` on a nearest-minor match.
    pub source: EngineVersion,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireConfig {
    /// Root of the component cache. Defaults to the per-user local data dir.
    #[serde(default)]
    pub cache_root: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub downloads: Vec<DownloadEntry>,
    /// File-name prefix of the primary engine binary.
    #[serde(default = "default_binary_prefix")]
    pub binary_prefix: String,
    #[serde(default = "default_binary_extension")]
    pub binary_extension: String,
    #[serde(default = "default_typelib_extension")]
    pub typelib_extension: String,
    #[serde(default = "default_installer_extension")]
    pub installer_extension: String,
    /// Root class id written to manifests when the type library is unreadable.
    #[serde(default)]
    pub class_id: Option<ClassId>,
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_user_agent() -> String {
    format!("LedgerBridge/{}", env!("CARGO_PKG_VERSION"))
}

fn default_binary_prefix() -> String {
    "sg50SdoEngine".to_string()
}

fn default_binary_extension() -> String {
    "dll".to_string()
}

fn default_typelib_extension() -> String {
    "tlb".to_string()
}

fn default_installer_extension() -> String {
    "msi".to_string()
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            cache_root: None,
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            downloads: Vec::new(),
            binary_prefix: default_binary_prefix(),
            binary_extension: default_binary_extension(),
            typelib_extension: default_typelib_extension(),
            installer_extension: default_installer_extension(),
            class_id: None,
        }
    }
}

impl AcquireConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// `{cache_root}/SDK`, where `cache_root` defaults to
    /// `{data_local_dir}/LedgerBridge`.
    #[must_use]
    pub fn sdk_dir(&self) -> Option<PathBuf> {
        self.cache_root
            .clone()
            .or_else(|| dirs::data_local_dir().map(|d| d.join("LedgerBridge")))
            .map(|root| root.join("SDK"))
    }

    /// Adds or replaces the table entry for `version`.
    pub fn insert_download(&mut self, entry: DownloadEntry) {
        self.downloads.retain(|e| e.version != entry.version);
        self.downloads.push(entry);
    }

    /// Picks a download URL: the exact version first, else the nearest minor
    /// of the same major (ties go to the higher minor).
    #[must_use]
    pub fn resolve_download(
        &self,
        version: EngineVersion,
        bitness: Bitness,
    ) -> Option<ResolvedDownload> {
        let exact = self
            .downloads
            .iter()
            .find(|e| e.version == version)
            .and_then(|e| e.url_for(bitness).map(|url| (e.version, url)));

        let (source, url) = exact.or_else(|| {
            self.downloads
                .iter()
                .filter(|e| e.version.same_major(&version))
                .filter_map(|e| e.url_for(bitness).map(|url| (e.version, url)))
                .min_by_key(|(v, _)| {
                    let distance = v.minor().abs_diff(version.minor());
                    (distance, std::cmp::Reverse(v.minor()))
                })
        })?;

        Some(ResolvedDownload {
            requested: version,
            source,
            url: url.to_string(),
        })
    }

    pub(crate) fn is_binary_name(&self, name: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        lower.starts_with(&self.binary_prefix.to_ascii_lowercase())
            && has_extension(&lower, &self.binary_extension)
    }

    pub(crate) fn is_typelib_name(&self, name: &str) -> bool {
        has_extension(&name.to_ascii_lowercase(), &self.typelib_extension)
    }

    pub(crate) fn is_installer_name(&self, name: &str) -> bool {
        has_extension(&name.to_ascii_lowercase(), &self.installer_extension)
    }
}

fn has_extension(lower_name: &str, extension: &str) -> bool {
    lower_name
        .rsplit_once('.')
        .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case(extension))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(major: u16, minor: u16, x64: Option<&str>, x86: Option<&str>) -> DownloadEntry {
        DownloadEntry {
            version: EngineVersion::new(major, minor),
            x64: x64.map(str::to_string),
            x86: x86.map(str::to_string),
        }
    }

    fn config() -> AcquireConfig {
        let mut config = AcquireConfig::default();
        config.insert_download(entry(
            31,
            0,
            Some("https://dl/31.0-64.zip"),
            Some("https://dl/31.0-32.zip"),
        ));
        config.insert_download(entry(32, 0, None, Some("https://dl/32.0-32.zip")));
        config.insert_download(entry(32, 2, Some("https://dl/32.2-64.zip"), None));
        config.insert_download(entry(32, 4, Some("https://dl/32.4-64.zip"), None));
        config
    }

    #[test]
    fn exact_match_wins() {
        let resolved = config().resolve_download(EngineVersion::new(31, 0), Bitness::X86).unwrap();
        assert_eq!(resolved.url, "https://dl/31.0-32.zip");
        assert_eq!(resolved.source, EngineVersion::new(31, 0));
    }

    #[test]
    fn bitness_falls_back_to_other_build() {
        let resolved = config().resolve_download(EngineVersion::new(32, 0), Bitness::X64).unwrap();
        assert_eq!(resolved.url, "https://dl/32.0-32.zip");
    }

    #[test]
    fn nearest_minor_prefers_higher_on_tie() {
        let resolved = config().resolve_download(EngineVersion::new(32, 3), Bitness::X64).unwrap();
        assert_eq!(resolved.source, EngineVersion::new(32, 4));
        assert_eq!(resolved.requested, EngineVersion::new(32, 3));
    }

    #[test]
    fn nearest_minor_picks_smallest_distance() {
        let resolved = config().resolve_download(EngineVersion::new(32, 7), Bitness::X64).unwrap();
        assert_eq!(resolved.source, EngineVersion::new(32, 4));
        assert_eq!(resolved.url, "https://dl/32.4-64.zip");
    }

    #[test]
    fn other_major_never_matches() {
        assert!(config().resolve_download(EngineVersion::new(33, 0), Bitness::X64).is_none());
    }

    #[test]
    fn default_config_has_no_downloads() {
        let config = AcquireConfig::default();
        assert!(config.downloads.is_empty());
        assert!(config.resolve_download(EngineVersion::new(32, 0), Bitness::X64).is_none());
    }

    #[test]
    fn binary_name_matching_ignores_case() {
        let config = AcquireConfig::default();
        assert!(config.is_binary_name("SG50SDOENGINE320.DLL"));
        assert!(!config.is_binary_name("sg50SdoEngine320.pdb"));
        assert!(config.is_typelib_name("Engine.TLB"));
        assert!(config.is_installer_name("SDOEngine32.msi"));
    }
}
