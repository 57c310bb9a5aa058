//! Static lookup tables and artifact locations for version detection.
//!
//! Every table here is extensible from `config.toml`; the built-in entries
//! only cover versions that have been observed in the field. The
//! format-integer table ships empty: format numbers are site data, so the
//! format method only matches once `[[fingerprint.format_versions]]` entries
//! are configured.

use ledgerbridge_types::EngineVersion;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Schema GUID embedded in the status artifact of engine 32.0 data.
pub const GUID_V32: &str = "5D3EB135-3317-413B-99DE-47C6B044134D";

/// Maps a binary format-version integer to an engine version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatVersion {
    pub format: u32,
    pub version: EngineVersion,
}

/// Linear year → major version mapping used for year-coded install paths.
///
/// `major = year - base_year + base_major`, accepted only inside
/// `min_year..=max_year`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearMapping {
    pub base_year: u16,
    pub base_major: u16,
    pub min_year: u16,
    pub max_year: u16,
}

impl Default for YearMapping {
    fn default() -> Self {
        Self {
            base_year: 2026,
            base_major: 32,
            min_year: 2015,
            max_year: 2099,
        }
    }
}

impl YearMapping {
    /// Maps a calendar year to `major.0`, or `None` outside the accepted range.
    #[must_use]
    pub fn version_for(&self, year: u16) -> Option<EngineVersion> {
        if year < self.min_year || year > self.max_year {
            return None;
        }
        let major = i32::from(year) - i32::from(self.base_year) + i32::from(self.base_major);
        u16::try_from(major)
            .ok()
            .filter(|m| *m > 0)
            .map(|m| EngineVersion::new(m, 0))
    }
}

/// Where the fingerprint artifacts live and how to read them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintConfig {
    /// Status artifact whose leading bytes carry a schema GUID.
    #[serde(default = "default_status_artifact")]
    pub status_artifact: String,
    /// Metadata artifact holding a format-version integer.
    #[serde(default = "default_metadata_artifact")]
    pub metadata_artifact: String,
    /// Byte offset of the little-endian `u32` format version.
    #[serde(default = "default_format_offset")]
    pub format_offset: u64,
    /// Configuration artifact that may mention the install path.
    #[serde(default = "default_config_artifact")]
    pub config_artifact: String,
    /// Small header/settings artifact scanned for version literals.
    #[serde(default = "default_header_artifact")]
    pub header_artifact: String,
    /// Number of leading bytes inspected for GUID tokens.
    #[serde(default = "default_guid_window")]
    pub guid_window: usize,
    #[serde(default = "default_guid_versions")]
    pub guid_versions: BTreeMap<String, EngineVersion>,
    #[serde(default)]
    pub format_versions: Vec<FormatVersion>,
    #[serde(default)]
    pub year_mapping: YearMapping,
    /// Extra versions recognised by the literal marker scan.
    #[serde(default = "default_marker_versions")]
    pub marker_versions: Vec<EngineVersion>,
}

fn default_status_artifact() -> String {
    "ACCSTAT.DTA".to_string()
}

fn default_metadata_artifact() -> String {
    "SETUP.DTA".to_string()
}

fn default_format_offset() -> u64 {
    4
}

fn default_config_artifact() -> String {
    "COMPANY".to_string()
}

fn default_header_artifact() -> String {
    "HEADER.DTA".to_string()
}

fn default_guid_window() -> usize {
    4096
}

fn default_guid_versions() -> BTreeMap<String, EngineVersion> {
    BTreeMap::from([(GUID_V32.to_string(), EngineVersion::new(32, 0))])
}

fn default_marker_versions() -> Vec<EngineVersion> {
    (26..=32).map(|major| EngineVersion::new(major, 0)).collect()
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            status_artifact: default_status_artifact(),
            metadata_artifact: default_metadata_artifact(),
            format_offset: default_format_offset(),
            config_artifact: default_config_artifact(),
            header_artifact: default_header_artifact(),
            guid_window: default_guid_window(),
            guid_versions: default_guid_versions(),
            format_versions: Vec::new(),
            year_mapping: YearMapping::default(),
            marker_versions: default_marker_versions(),
        }
    }
}

impl FingerprintConfig {
    /// Looks up a GUID token, ignoring case and surrounding braces.
    #[must_use]
    pub fn version_for_guid(&self, token: &str) -> Option<EngineVersion> {
        let normalized = token
            .trim_matches(|c| c == '{' || c == '}')
            .to_ascii_uppercase();
        self.guid_versions
            .iter()
            .find(|(guid, _)| {
                guid.trim_matches(|c| c == '{' || c == '}')
                    .eq_ignore_ascii_case(&normalized)
            })
            .map(|(_, version)| *version)
    }

    #[must_use]
    pub fn version_for_format(&self, format: u32) -> Option<EngineVersion> {
        self.format_versions
            .iter()
            .find(|entry| entry.format == format)
            .map(|entry| entry.version)
    }

    /// Adds or replaces a GUID mapping.
    pub fn insert_guid(&mut self, guid: &str, version: EngineVersion) {
        let key = guid.trim_matches(|c| c == '{' || c == '}').to_ascii_uppercase();
        self.guid_versions.insert(key, version);
    }

    /// Adds or replaces a format-integer mapping.
    pub fn insert_format(&mut self, format: u32, version: EngineVersion) {
        self.format_versions.retain(|entry| entry.format != format);
        self.format_versions.push(FormatVersion { format, version });
    }

    /// Every version any table can produce, highest first.
    #[must_use]
    pub fn known_versions(&self) -> Vec<EngineVersion> {
        let mut known: BTreeSet<EngineVersion> = self.guid_versions.values().copied().collect();
        known.extend(self.format_versions.iter().map(|entry| entry.version));
        known.extend(self.marker_versions.iter().copied());
        known.into_iter().rev().collect()
    }
}
