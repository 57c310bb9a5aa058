//! Bridge configuration loaded from `~/.ledgerbridge/config.toml`.
//!
//! Every section is optional. A missing file runs on defaults; an unreadable
//! or malformed one is reported and also falls back to defaults.

use ledgerbridge_acquire::AcquireConfig;
use ledgerbridge_fingerprint::FingerprintConfig;
use ledgerbridge_types::EngineIdentity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const CONFIG_DIR: &str = ".ledgerbridge";
const CONFIG_FILE: &str = "config.toml";

/// The `[engine]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Root object identity. When absent it follows the detected version.
    #[serde(default)]
    pub identity: Option<EngineIdentity>,
    /// Substrings of an engine error (case-insensitive) that mean another
    /// holder already has the connection.
    #[serde(default = "default_busy_markers")]
    pub busy_markers: Vec<String>,
    /// Process names that host the engine, matched case-insensitively with
    /// or without an `.exe` suffix.
    #[serde(default = "default_host_processes")]
    pub host_processes: Vec<String>,
    /// Programmatic ids of standalone session objects tried when the
    /// workspace connect fails.
    #[serde(default = "default_secondary_prog_ids")]
    pub secondary_prog_ids: Vec<String>,
}

fn default_busy_markers() -> Vec<String> {
    ["already logged in", "already in use", "exclusive access", "locked by"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_host_processes() -> Vec<String> {
    ["sage", "sg50svc", "sdoengine"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_secondary_prog_ids() -> Vec<String> {
    vec!["SDOEngine.SDOSession".to_string()]
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            identity: None,
            busy_markers: default_busy_markers(),
            host_processes: default_host_processes(),
            secondary_prog_ids: default_secondary_prog_ids(),
        }
    }
}

impl EngineSettings {
    /// True if `message` contains one of the busy markers.
    #[must_use]
    pub fn is_busy_message(&self, message: &str) -> bool {
        let message = message.to_ascii_lowercase();
        self.busy_markers
            .iter()
            .any(|marker| !marker.is_empty() && message.contains(&marker.to_ascii_lowercase()))
    }

    /// True if a process called `name` hosts the engine.
    #[must_use]
    pub fn is_host_process(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        let stem = name.strip_suffix(".exe").unwrap_or(&name);
        self.host_processes.iter().any(|host| {
            let host = host.to_ascii_lowercase();
            stem == host.strip_suffix(".exe").unwrap_or(&host)
        })
    }
}

/// All configuration sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub fingerprint: FingerprintConfig,
    #[serde(default)]
    pub acquire: AcquireConfig,
    #[serde(default)]
    pub engine: EngineSettings,
}

impl BridgeConfig {
    /// Loads `~/.ledgerbridge/config.toml`.
    #[must_use]
    pub fn load() -> Self {
        Self::load_from(config_dir().join(CONFIG_FILE))
    }

    /// Loads configuration from an explicit path.
    #[must_use]
    pub fn load_from(config_path: PathBuf) -> Self {
        if !config_path.exists() {
            info!("No config file found at {:?}, using defaults", config_path);
            return Self::default();
        }

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(config) => {
                    info!("Loaded bridge config from {:?}", config_path);
                    config
                }
                Err(e) => {
                    warn!(
                        "Failed to parse config file {:?}: {}. Falling back to defaults.",
                        config_path, e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read config file {:?}: {}", config_path, e);
                Self::default()
            }
        }
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(CONFIG_DIR))
        .unwrap_or_else(|| Path::new(CONFIG_DIR).to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_markers_match_case_insensitively() {
        let settings = EngineSettings::default();
        assert!(settings.is_busy_message("User 'MANAGER' is Already Logged In"));
        assert!(!settings.is_busy_message("Invalid username or password"));
    }

    #[test]
    fn empty_marker_never_matches() {
        let settings = EngineSettings {
            busy_markers: vec![String::new()],
            ..EngineSettings::default()
        };
        assert!(!settings.is_busy_message("anything"));
    }

    #[test]
    fn host_process_ignores_exe_suffix() {
        let settings = EngineSettings::default();
        assert!(settings.is_host_process("Sage.exe"));
        assert!(settings.is_host_process("SG50SVC"));
        assert!(!settings.is_host_process("sagecloud.exe"));
    }
}
