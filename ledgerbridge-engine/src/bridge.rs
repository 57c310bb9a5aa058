//! End-to-end flow: detect the version a data store needs, make that engine
//! available, then connect.

use ledgerbridge_acquire::{Acquisition, ComponentAcquirer, EnsureOptions};
use ledgerbridge_fingerprint::{Detection, VersionFingerprinter};
use ledgerbridge_isolation::{IsolationActivator, SharedActivator};
use ledgerbridge_types::EngineIdentity;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::BridgeConfig;
use crate::error::{EngineError, EngineResult};
use crate::session::{EngineProvider, EngineSession, IsolatedProvider, SessionConfig};

/// An engine made ready for one data store.
#[derive(Debug, Clone)]
pub struct PreparedEngine {
    pub data_path: PathBuf,
    pub detection: Detection,
    pub identity: EngineIdentity,
    pub acquisition: Acquisition,
}

pub struct LedgerBridge {
    config: BridgeConfig,
    fingerprinter: VersionFingerprinter,
    acquirer: ComponentAcquirer,
    activator: SharedActivator,
}

impl LedgerBridge {
    /// Builds a bridge on the process-wide isolation activator.
    pub fn new(config: BridgeConfig) -> EngineResult<Self> {
        let acquirer = ComponentAcquirer::new(config.acquire.clone())?;
        Ok(Self {
            fingerprinter: VersionFingerprinter::new(config.fingerprint.clone()),
            acquirer,
            activator: IsolationActivator::shared(),
            config,
        })
    }

    /// Replaces the acquirer, e.g. to inject a registration check.
    #[must_use]
    pub fn with_acquirer(mut self, acquirer: ComponentAcquirer) -> Self {
        self.acquirer = acquirer;
        self
    }

    #[must_use]
    pub fn with_activator(mut self, activator: SharedActivator) -> Self {
        self.activator = activator;
        self
    }

    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    #[must_use]
    pub fn acquirer(&self) -> &ComponentAcquirer {
        &self.acquirer
    }

    #[must_use]
    pub fn activator(&self) -> &SharedActivator {
        &self.activator
    }

    /// Detects the engine version `data_path` needs.
    pub fn detect(&self, data_path: &Path) -> EngineResult<Detection> {
        self.fingerprinter
            .detect_detailed(data_path)
            .ok_or_else(|| EngineError::VersionUnknown(data_path.to_path_buf()))
    }

    /// Detects the version and makes that engine available.
    ///
    /// One identity drives both the manifest and the session: the one in
    /// `options`, else the configured `[engine]` identity, else the
    /// acquirer's identity for the detected version.
    pub async fn prepare(
        &self,
        data_path: &Path,
        mut options: EnsureOptions,
    ) -> EngineResult<PreparedEngine> {
        let detection = self.detect(data_path)?;
        let identity = self.identity_for(&detection, options.identity.take());
        options.identity = Some(identity.clone());

        let acquisition = self.acquirer.ensure_with(detection.version, options).await?;
        info!(
            path = %data_path.display(),
            version = %detection.version,
            staged = acquisition.staged().is_some(),
            "Engine prepared"
        );

        Ok(PreparedEngine {
            data_path: data_path.to_path_buf(),
            detection,
            identity,
            acquisition,
        })
    }

    fn identity_for(
        &self,
        detection: &Detection,
        requested: Option<EngineIdentity>,
    ) -> EngineIdentity {
        requested
            .or_else(|| self.config.engine.identity.clone())
            .unwrap_or_else(|| self.acquirer.identity_for(detection.version))
    }

    /// Session settings for a prepared engine.
    #[must_use]
    pub fn session_config(&self, prepared: &PreparedEngine) -> SessionConfig {
        SessionConfig::new(prepared.identity.clone())
            .with_expected_version(prepared.detection.version)
            .with_settings(self.config.engine.clone())
    }

    /// The native provider for a prepared engine.
    #[must_use]
    pub fn provider(&self, prepared: &PreparedEngine) -> IsolatedProvider {
        IsolatedProvider::for_acquisition(&prepared.acquisition, self.activator.clone())
    }

    /// Connects to the prepared data store through the native engine.
    pub fn connect(
        &self,
        prepared: &PreparedEngine,
        user: &str,
        secret: &str,
    ) -> EngineResult<EngineSession> {
        self.connect_with(&self.provider(prepared), prepared, user, secret)
    }

    /// Connects through an explicit provider.
    pub fn connect_with(
        &self,
        provider: &dyn EngineProvider,
        prepared: &PreparedEngine,
        user: &str,
        secret: &str,
    ) -> EngineResult<EngineSession> {
        EngineSession::connect(
            provider,
            &self.session_config(prepared),
            &prepared.data_path,
            user,
            secret,
        )
    }
}
