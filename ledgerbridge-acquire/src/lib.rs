//! Acquisition of the engine component for a given version.
//!
//! [`ComponentAcquirer::ensure`] either confirms a system-registered engine or
//! produces a [`StagedComponent`]: a private, fully extracted copy of the
//! engine binary with an isolation manifest beside it.
//!
//! Pipeline: registration check → staging index → URL resolution → download
//! → archive extraction → installer extraction → binary search → manifest.

mod config;
mod download;
mod error;
mod extract;
mod staging;

pub use config::{AcquireConfig, Bitness, DownloadEntry, ResolvedDownload};
pub use download::{DownloadProgress, Downloader, ProgressCallback};
pub use error::{AcquireError, AcquireResult};
pub use extract::{extract_archive, find_file, InstallerRunner, MsiExec, INSTALLED_SUBDIR};
pub use staging::{StagedComponent, StagingIndex, StagingOrigin, INDEX_FILE};

use ledgerbridge_isolation::{manifest, platform, TypeLibReader};
use ledgerbridge_types::{EngineIdentity, EngineVersion};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Answers whether the engine is usable without staging.
pub trait RegistrationCheck: Send + Sync {
    fn is_registered(&self, identity: &EngineIdentity) -> bool;
}

/// Looks the programmatic id up in the system registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRegistration;

impl RegistrationCheck for SystemRegistration {
    fn is_registered(&self, identity: &EngineIdentity) -> bool {
        platform::prog_id_registered(&identity.prog_id)
    }
}

/// Result of [`ComponentAcquirer::ensure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition {
    /// A system-registered engine is available; nothing was staged.
    Registered,
    Staged(StagedComponent),
}

impl Acquisition {
    #[must_use]
    pub fn staged(&self) -> Option<&StagedComponent> {
        match self {
            Self::Registered => None,
            Self::Staged(component) => Some(component),
        }
    }
}

/// Per-call options for [`ComponentAcquirer::ensure_with`].
#[derive(Clone, Default)]
pub struct EnsureOptions {
    pub force_refresh: bool,
    /// Identity checked for and written into the manifest. Defaults to
    /// [`ComponentAcquirer::identity_for`].
    pub identity: Option<EngineIdentity>,
    pub progress: Option<ProgressCallback>,
    pub cancel: CancellationToken,
}

pub struct ComponentAcquirer {
    config: AcquireConfig,
    sdk_dir: PathBuf,
    bitness: Bitness,
    downloader: Downloader,
    installer: Box<dyn InstallerRunner>,
    registration: Box<dyn RegistrationCheck>,
    typelib: Box<dyn TypeLibReader + Send + Sync>,
}

impl ComponentAcquirer {
    pub fn new(config: AcquireConfig) -> AcquireResult<Self> {
        let sdk_dir = config.sdk_dir().ok_or(AcquireError::NoCacheDir)?;
        let downloader = Downloader::new(&config.user_agent, config.timeout())?;
        Ok(Self {
            config,
            sdk_dir,
            bitness: Bitness::current(),
            downloader,
            installer: Box::new(MsiExec),
            registration: Box::new(SystemRegistration),
            typelib: platform::native_typelib_reader(),
        })
    }

    #[must_use]
    pub fn with_installer(mut self, installer: impl InstallerRunner + 'static) -> Self {
        self.installer = Box::new(installer);
        self
    }

    #[must_use]
    pub fn with_registration_check(mut self, check: impl RegistrationCheck + 'static) -> Self {
        self.registration = Box::new(check);
        self
    }

    #[must_use]
    pub fn with_typelib_reader(
        mut self,
        reader: impl TypeLibReader + Send + Sync + 'static,
    ) -> Self {
        self.typelib = Box::new(reader);
        self
    }

    #[must_use]
    pub fn with_bitness(mut self, bitness: Bitness) -> Self {
        self.bitness = bitness;
        self
    }

    #[must_use]
    pub fn config(&self) -> &AcquireConfig {
        &self.config
    }

    #[must_use]
    pub fn sdk_dir(&self) -> &Path {
        &self.sdk_dir
    }

    /// Identity used for manifests of `version`.
    #[must_use]
    pub fn identity_for(&self, version: EngineVersion) -> EngineIdentity {
        let identity = EngineIdentity::for_version(&version);
        match self.config.class_id {
            Some(class_id) => identity.with_class_id(class_id),
            None => identity,
        }
    }

    /// Ensures the engine for `version` is usable.
    pub async fn ensure(
        &self,
        version: EngineVersion,
        force_refresh: bool,
    ) -> AcquireResult<Acquisition> {
        self.ensure_with(
            version,
            EnsureOptions {
                force_refresh,
                ..Default::default()
            },
        )
        .await
    }

    pub async fn ensure_with(
        &self,
        version: EngineVersion,
        options: EnsureOptions,
    ) -> AcquireResult<Acquisition> {
        let identity = match options.identity {
            Some(identity) => identity,
            None => self.identity_for(version),
        };

        if !options.force_refresh {
            if self.registration.is_registered(&identity) {
                info!(
                    version = %version,
                    prog_id = %identity.prog_id,
                    "Engine registered on this system"
                );
                return Ok(Acquisition::Registered);
            }
            if let Some(component) = self.cached(version, &identity)? {
                return Ok(Acquisition::Staged(component));
            }
        }

        let resolved = self
            .config
            .resolve_download(version, self.bitness)
            .ok_or(AcquireError::NoDownloadUrl {
                version,
                major: version.major(),
            })?;
        if resolved.source != version {
            info!(
                requested = %version,
                using = %resolved.source,
                "No exact download; using nearest minor"
            );
        }

        let archive_path = self.sdk_dir.join(archive_name(version, self.bitness, &resolved.url));
        if options.force_refresh && archive_path.exists() {
            std::fs::remove_file(&archive_path)?;
        }
        self.downloader
            .fetch(&resolved.url, &archive_path, options.progress.as_ref(), &options.cancel)
            .await?;

        let extract_dir = extraction_dir(&archive_path);
        let archive = archive_path.clone();
        let dest = extract_dir.clone();
        tokio::task::spawn_blocking(move || extract_archive(&archive, &dest))
            .await
            .map_err(|e| AcquireError::Extraction(format!("extraction task failed: {e}")))??;

        let (binary_path, typelib_path) = self.locate_binary(&extract_dir)?;
        let manifest_path =
            manifest::create_manifest(&binary_path, &identity, self.typelib.as_ref())?;

        let component = StagedComponent {
            version,
            source_version: resolved.source,
            bitness: self.bitness,
            archive_path,
            extract_dir,
            binary_path,
            typelib_path,
            manifest_path,
            source_url: resolved.url,
            staged_at_ms: staging::now_ms(),
            origin: StagingOrigin::Fresh,
        };

        let mut index = StagingIndex::load(&self.sdk_dir);
        index.upsert(component.clone());
        index.save(&self.sdk_dir)?;

        info!(
            version = %version,
            bitness = %self.bitness,
            path = %component.binary_path.display(),
            "Staged engine component"
        );
        Ok(Acquisition::Staged(component))
    }

    /// The most recently staged component that is still on disk.
    pub fn active(&self) -> Option<StagedComponent> {
        StagingIndex::load(&self.sdk_dir).active().cloned()
    }

    fn cached(
        &self,
        version: EngineVersion,
        identity: &EngineIdentity,
    ) -> AcquireResult<Option<StagedComponent>> {
        let index = StagingIndex::load(&self.sdk_dir);
        let Some(component) = index.find(version, self.bitness) else {
            return Ok(None);
        };
        if !component.binary_present() {
            warn!(path = %component.binary_path.display(), "Staged binary missing; re-staging");
            return Ok(None);
        }

        let mut component = component.clone();
        if !manifest::declares(&component.manifest_path, identity) {
            debug!(
                path = %component.manifest_path.display(),
                "Manifest missing or stale; regenerating"
            );
            component.manifest_path =
                manifest::create_manifest(&component.binary_path, identity, self.typelib.as_ref())?;
            let mut index = index;
            index.upsert(component.clone());
            index.save(&self.sdk_dir)?;
        }
        info!(
            version = %version,
            path = %component.binary_path.display(),
            "Using staged engine component"
        );
        Ok(Some(component))
    }

    /// Finds the primary binary in an extracted archive, running any bundled
    /// installer package first.
    fn locate_binary(&self, extract_dir: &Path) -> AcquireResult<(PathBuf, Option<PathBuf>)> {
        let config = &self.config;

        if let Some(package) = find_file(extract_dir, |name| config.is_installer_name(name)) {
            let target = extract_dir.join(INSTALLED_SUBDIR);
            std::fs::create_dir_all(&target)?;
            self.installer.extract(&package, &target)?;

            let binary = find_file(&target, |name| config.is_binary_name(name))
                .ok_or_else(|| AcquireError::BinaryNotFound(target.clone()))?;
            let typelib = find_file(&target, |name| config.is_typelib_name(name));
            return Ok((binary, typelib));
        }

        let typelib = find_file(extract_dir, |name| config.is_typelib_name(name));
        if let Some(binary) = find_file(extract_dir, |name| config.is_binary_name(name)) {
            return Ok((binary, typelib));
        }
        match typelib {
            Some(typelib) => {
                warn!(
                    path = %typelib.display(),
                    "No engine binary in archive; staging type library"
                );
                Ok((typelib.clone(), Some(typelib)))
            }
            None => Err(AcquireError::BinaryNotFound(extract_dir.to_path_buf())),
        }
    }
}

/// Archive file name for a version and bitness, keeping the URL's extension.
fn archive_name(version: EngineVersion, bitness: Bitness, url: &str) -> String {
    let extension = url
        .rsplit('/')
        .next()
        .and_then(|file| file.split(['?', '#']).next())
        .and_then(|file| file.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "zip".to_string());
    format!("sdo-{version}-{bitness}.{extension}")
}

/// Sibling directory an archive is extracted into.
fn extraction_dir(archive: &Path) -> PathBuf {
    let stem = archive
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "extract".to_string());
    archive.with_file_name(stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_name_keeps_extension_and_keys_on_version() {
        let v = EngineVersion::new(32, 0);
        assert_eq!(
            archive_name(v, Bitness::X64, "https://dl.example.com/sdo/SDOEngine32.zip?sig=abc"),
            "sdo-32.0-x64.zip"
        );
        assert_eq!(archive_name(v, Bitness::X86, "https://dl.example.com/get"), "sdo-32.0-x86.zip");
    }

    #[test]
    fn extraction_dir_is_archive_stem() {
        assert_eq!(
            extraction_dir(Path::new("/c/SDK/sdo-32.0-x64.zip")),
            Path::new("/c/SDK/sdo-32.0-x64")
        );
    }
}
