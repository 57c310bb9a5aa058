//! Engine version detection for LedgerBridge.
//!
//! Inspects the binary artifacts of an engine data directory and returns the
//! engine version most likely required to open it. Four independent methods
//! are tried in order, each best-effort:
//!
//! 1. **Status GUID**: a schema GUID in the leading bytes of the status file
//! 2. **Format integer**: a `u32` at a fixed offset of the metadata file
//! 3. **Install-path year**: a year-coded path in the configuration file
//! 4. **Version marker**: a literal `major.minor` in the header file
//!
//! A missing artifact or unreadable token is never an error for the caller;
//! the method simply falls through to the next one.

mod error;
mod scan;
mod tables;

pub use error::{FingerprintError, FingerprintResult};
pub use tables::{FingerprintConfig, FormatVersion, YearMapping, GUID_V32};

use ledgerbridge_types::EngineVersion;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Sub-directory of a data directory that usually holds the artifacts.
pub const DATA_SUBDIR: &str = "ACCDATA";

// Text artifacts are small; anything past this is not a settings file.
const TEXT_SCAN_LIMIT: u64 = 64 * 1024;

/// The method that produced a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    StatusGuid,
    FormatVersion,
    InstallPathYear,
    VersionMarker,
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StatusGuid => "status GUID",
            Self::FormatVersion => "format version",
            Self::InstallPathYear => "install-path year",
            Self::VersionMarker => "version marker",
        })
    }
}

/// A successful detection and the evidence behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    pub version: EngineVersion,
    pub method: DetectionMethod,
    /// The raw token that was mapped (GUID, integer, year or literal).
    pub raw_token: String,
    pub artifact: PathBuf,
}

/// Detects the engine version a data directory was written by.
#[derive(Debug, Clone, Default)]
pub struct VersionFingerprinter {
    config: FingerprintConfig,
}

impl VersionFingerprinter {
    #[must_use]
    pub fn new(config: FingerprintConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &FingerprintConfig {
        &self.config
    }

    /// Returns the most likely engine version, or `None` when unknown.
    #[must_use]
    pub fn detect(&self, data_dir: &Path) -> Option<EngineVersion> {
        self.detect_detailed(data_dir).map(|d| d.version)
    }

    /// Like [`detect`](Self::detect) but keeps the method and raw token.
    #[must_use]
    pub fn detect_detailed(&self, data_dir: &Path) -> Option<Detection> {
        let methods: [(DetectionMethod, fn(&Self, &Path) -> FingerprintResult<Detection>); 4] = [
            (DetectionMethod::StatusGuid, Self::from_status_guid),
            (DetectionMethod::FormatVersion, Self::from_format_version),
            (DetectionMethod::InstallPathYear, Self::from_install_path),
            (DetectionMethod::VersionMarker, Self::from_version_marker),
        ];

        for (method, run) in methods {
            match run(self, data_dir) {
                Ok(detection) => {
                    info!(
                        method = %method,
                        token = %detection.raw_token,
                        version = %detection.version,
                        "Detected engine version"
                    );
                    return Some(detection);
                }
                Err(e) => debug!(method = %method, "Fingerprint method fell through: {}", e),
            }
        }

        info!(path = %data_dir.display(), "Engine version unknown");
        None
    }

    /// Method 1: schema GUID in the leading bytes of the status artifact.
    pub fn from_status_guid(&self, data_dir: &Path) -> FingerprintResult<Detection> {
        let artifact = self.locate(data_dir, &self.config.status_artifact)?;

        let mut head = Vec::with_capacity(self.config.guid_window);
        File::open(&artifact)?
            .take(self.config.guid_window as u64)
            .read_to_end(&mut head)?;

        let tokens: Vec<String> = scan::text_views(&head)
            .iter()
            .flat_map(|view| scan::guid_tokens(view))
            .collect();

        let first = tokens.first().cloned().ok_or_else(|| FingerprintError::NoToken {
            kind: "GUID",
            artifact: artifact.display().to_string(),
        })?;

        tokens
            .into_iter()
            .find_map(|token| {
                self.config
                    .version_for_guid(&token)
                    .map(|version| (token, version))
            })
            .map(|(raw_token, version)| Detection {
                version,
                method: DetectionMethod::StatusGuid,
                raw_token,
                artifact: artifact.clone(),
            })
            .ok_or(FingerprintError::Unmapped {
                kind: "GUID",
                token: first,
            })
    }

    /// Method 2: little-endian `u32` at a fixed offset of the metadata artifact.
    pub fn from_format_version(&self, data_dir: &Path) -> FingerprintResult<Detection> {
        let artifact = self.locate(data_dir, &self.config.metadata_artifact)?;

        let mut file = File::open(&artifact)?;
        file.seek(SeekFrom::Start(self.config.format_offset))?;
        let mut word = [0u8; 4];
        file.read_exact(&mut word).map_err(|_| FingerprintError::NoToken {
            kind: "format version",
            artifact: artifact.display().to_string(),
        })?;
        let format = u32::from_le_bytes(word);

        let version = self
            .config
            .version_for_format(format)
            .ok_or(FingerprintError::Unmapped {
                kind: "format version",
                token: format.to_string(),
            })?;

        Ok(Detection {
            version,
            method: DetectionMethod::FormatVersion,
            raw_token: format.to_string(),
            artifact,
        })
    }

    /// Method 3: year segment of an install path in the configuration artifact.
    pub fn from_install_path(&self, data_dir: &Path) -> FingerprintResult<Detection> {
        let artifact = self.locate(data_dir, &self.config.config_artifact)?;
        let bytes = read_prefix(&artifact, TEXT_SCAN_LIMIT)?;

        let years: Vec<u16> = scan::text_views(&bytes)
            .iter()
            .flat_map(|view| scan::year_segments(view))
            .collect();

        let first = *years.first().ok_or_else(|| FingerprintError::NoToken {
            kind: "install-path year",
            artifact: artifact.display().to_string(),
        })?;

        years
            .into_iter()
            .find_map(|year| {
                self.config
                    .year_mapping
                    .version_for(year)
                    .map(|version| (year, version))
            })
            .map(|(year, version)| Detection {
                version,
                method: DetectionMethod::InstallPathYear,
                raw_token: year.to_string(),
                artifact: artifact.clone(),
            })
            .ok_or(FingerprintError::Unmapped {
                kind: "install-path year",
                token: first.to_string(),
            })
    }

    /// Method 4: literal `major.minor` of a known version in the header artifact.
    pub fn from_version_marker(&self, data_dir: &Path) -> FingerprintResult<Detection> {
        let artifact = self.locate(data_dir, &self.config.header_artifact)?;
        let bytes = read_prefix(&artifact, TEXT_SCAN_LIMIT)?;
        let views = scan::text_views(&bytes);

        self.config
            .known_versions()
            .into_iter()
            .find(|version| {
                views
                    .iter()
                    .any(|view| scan::contains_version_literal(view, version))
            })
            .map(|version| Detection {
                version,
                method: DetectionMethod::VersionMarker,
                raw_token: version.to_string(),
                artifact: artifact.clone(),
            })
            .ok_or_else(|| FingerprintError::NoToken {
                kind: "version marker",
                artifact: artifact.display().to_string(),
            })
    }

    /// Finds `name` in the data directory or its `ACCDATA` sub-directory,
    /// matching the file name case-insensitively.
    fn locate(&self, data_dir: &Path, name: &str) -> FingerprintResult<PathBuf> {
        [data_dir.to_path_buf(), data_dir.join(DATA_SUBDIR)]
            .iter()
            .find_map(|dir| find_case_insensitive(dir, name))
            .ok_or_else(|| FingerprintError::ArtifactMissing(name.to_string()))
    }
}

fn find_case_insensitive(dir: &Path, name: &str) -> Option<PathBuf> {
    let exact = dir.join(name);
    if exact.is_file() {
        return Some(exact);
    }
    fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|entry| entry.path())
        .find(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.eq_ignore_ascii_case(name))
        })
}

fn read_prefix(path: &Path, limit: u64) -> FingerprintResult<Vec<u8>> {
    let mut bytes = Vec::new();
    File::open(path)?.take(limit).read_to_end(&mut bytes)?;
    Ok(bytes)
}
