//! The process-wide activation context.
//!
//! Only one staged component can own the context at a time. Sessions hold an
//! [`ActivationLease`]; the context is torn down when the last lease drops or
//! when [`IsolationActivator::deactivate`] is called explicitly.

use ledgerbridge_types::{ClassId, EngineIdentity};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use tracing::{debug, info, warn};

use crate::error::{IsolationError, IsolationResult};
use crate::manifest;
use crate::platform;
use crate::strategy::{InstantiationChain, InstantiationOutcome, InstantiationRequest};

/// Opaque OS activation-context handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextHandle(pub usize);

/// Cookie returned by a successful activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationCookie(pub usize);

/// The OS operations behind activation.
pub trait ActivationBackend: Send {
    /// Adds `dir` to the native library search path, or clears it with `None`.
    fn set_search_path(&mut self, dir: Option<&Path>) -> IsolationResult<()>;
    fn create_context(&mut self, manifest: &Path) -> IsolationResult<ContextHandle>;
    fn activate(&mut self, context: ContextHandle) -> IsolationResult<ActivationCookie>;
    fn deactivate(&mut self, cookie: ActivationCookie) -> IsolationResult<()>;
    fn release(&mut self, context: ContextHandle);
}

#[derive(Debug)]
struct ActiveContext {
    manifest: PathBuf,
    binary: Option<PathBuf>,
    context: ContextHandle,
    cookie: ActivationCookie,
}

pub type SharedActivator = Arc<Mutex<IsolationActivator>>;

static SHARED: OnceLock<SharedActivator> = OnceLock::new();

/// Locks a shared activator, recovering from a poisoned mutex.
pub fn lock_activator(activator: &SharedActivator) -> MutexGuard<'_, IsolationActivator> {
    activator.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct IsolationActivator {
    backend: Box<dyn ActivationBackend>,
    active: Option<ActiveContext>,
    leases: usize,
    /// Bumped on every new activation. Leases taken on an earlier context
    /// never release a later one.
    generation: u64,
}

impl IsolationActivator {
    #[must_use]
    pub fn with_backend(backend: Box<dyn ActivationBackend>) -> Self {
        Self {
            backend,
            active: None,
            leases: 0,
            generation: 0,
        }
    }

    /// The process-wide activator over the native backend.
    pub fn shared() -> SharedActivator {
        SHARED
            .get_or_init(|| {
                Arc::new(Mutex::new(Self::with_backend(platform::native_backend())))
            })
            .clone()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    #[must_use]
    pub fn active_manifest(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.manifest.as_path())
    }

    #[must_use]
    pub fn active_binary(&self) -> Option<&Path> {
        self.active.as_ref().and_then(|a| a.binary.as_deref())
    }

    #[must_use]
    pub fn lease_count(&self) -> usize {
        self.leases
    }

    /// Writes the isolation manifest for `binary` using the native type
    /// library reader.
    pub fn create_manifest(
        &self,
        binary: &Path,
        identity: &EngineIdentity,
    ) -> IsolationResult<PathBuf> {
        let reader = platform::native_typelib_reader();
        manifest::create_manifest(binary, identity, reader.as_ref())
    }

    /// Activates the context described by `manifest`.
    ///
    /// Returns `true` when a context was created and `false` when the same
    /// manifest was already active. A different active manifest is a
    /// [`IsolationError::Conflict`].
    pub fn activate(&mut self, manifest_path: &Path) -> IsolationResult<bool> {
        if let Some(active) = &self.active {
            if same_path(&active.manifest, manifest_path) {
                debug!(manifest = %manifest_path.display(), "Isolation context already active");
                return Ok(false);
            }
            return Err(IsolationError::Conflict {
                active: active.manifest.clone(),
                requested: manifest_path.to_path_buf(),
            });
        }

        if !manifest_path.is_file() {
            return Err(IsolationError::Manifest(format!(
                "manifest not found: {}",
                manifest_path.display()
            )));
        }

        let binary = manifest::binary_for_manifest(manifest_path).ok();
        let directory = manifest_path.parent().map(Path::to_path_buf);

        self.backend.set_search_path(directory.as_deref())?;

        let context = match self.backend.create_context(manifest_path) {
            Ok(context) => context,
            Err(e) => {
                self.clear_search_path();
                return Err(e);
            }
        };

        let cookie = match self.backend.activate(context) {
            Ok(cookie) => cookie,
            Err(e) => {
                self.backend.release(context);
                self.clear_search_path();
                return Err(e);
            }
        };

        info!(manifest = %manifest_path.display(), "Activated isolation context");
        self.generation += 1;
        self.active = Some(ActiveContext {
            manifest: manifest_path.to_path_buf(),
            binary,
            context,
            cookie,
        });
        Ok(true)
    }

    /// Tears down the active context. Safe to call when nothing is active.
    pub fn deactivate(&mut self) {
        self.leases = 0;
        let Some(active) = self.active.take() else {
            return;
        };

        if let Err(e) = self.backend.deactivate(active.cookie) {
            warn!(manifest = %active.manifest.display(), "Failed to deactivate context: {}", e);
        }
        self.backend.release(active.context);
        self.clear_search_path();
        info!(manifest = %active.manifest.display(), "Released isolation context");
    }

    /// Runs `chain` for `identity` against the active context.
    pub fn instantiate<H>(
        &self,
        chain: &InstantiationChain<H>,
        identity: &EngineIdentity,
        class_id: Option<ClassId>,
    ) -> InstantiationOutcome<H> {
        let request = InstantiationRequest {
            class_id: class_id.or(identity.class_id),
            prog_id: identity.prog_id.clone(),
            binary: self.active_binary().map(Path::to_path_buf),
            context_active: self.is_active(),
        };
        chain.run(&request)
    }

    fn clear_search_path(&mut self) {
        if let Err(e) = self.backend.set_search_path(None) {
            warn!("Failed to clear library search path: {}", e);
        }
    }

    fn retain(&mut self) -> u64 {
        self.leases += 1;
        self.generation
    }

    fn release_lease(&mut self, generation: u64) {
        if !self.is_active() || generation != self.generation {
            debug!(generation, current = self.generation, "Ignoring lease on a released context");
            return;
        }
        self.leases = self.leases.saturating_sub(1);
        if self.leases == 0 {
            self.deactivate();
        }
    }
}

impl Drop for IsolationActivator {
    fn drop(&mut self) {
        self.deactivate();
    }
}

impl std::fmt::Debug for IsolationActivator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolationActivator")
            .field("active", &self.active)
            .field("leases", &self.leases)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Holds the shared context active for as long as it lives.
#[derive(Debug)]
pub struct ActivationLease {
    activator: SharedActivator,
    manifest: PathBuf,
    generation: u64,
}

impl ActivationLease {
    /// Activates `manifest` (or joins it if already active) and takes a lease.
    pub fn acquire(activator: SharedActivator, manifest: &Path) -> IsolationResult<Self> {
        let generation = {
            let mut guard = lock_activator(&activator);
            guard.activate(manifest)?;
            guard.retain()
        };
        Ok(Self {
            activator,
            manifest: manifest.to_path_buf(),
            generation,
        })
    }

    #[must_use]
    pub fn activator(&self) -> &SharedActivator {
        &self.activator
    }

    #[must_use]
    pub fn manifest(&self) -> &Path {
        &self.manifest
    }
}

impl Drop for ActivationLease {
    fn drop(&mut self) {
        lock_activator(&self.activator).release_lease(self.generation);
    }
}

fn same_path(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        created: AtomicUsize,
        released: AtomicUsize,
        cleared: AtomicUsize,
    }

    struct CountingBackend(Arc<Counters>);

    impl ActivationBackend for CountingBackend {
        fn set_search_path(&mut self, dir: Option<&Path>) -> IsolationResult<()> {
            if dir.is_none() {
                self.0.cleared.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }
        fn create_context(&mut self, _manifest: &Path) -> IsolationResult<ContextHandle> {
            Ok(ContextHandle(self.0.created.fetch_add(1, Ordering::SeqCst) + 1))
        }
        fn activate(&mut self, context: ContextHandle) -> IsolationResult<ActivationCookie> {
            Ok(ActivationCookie(context.0 * 10))
        }
        fn deactivate(&mut self, _cookie: ActivationCookie) -> IsolationResult<()> {
            Ok(())
        }
        fn release(&mut self, _context: ContextHandle) {
            self.0.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn drop_releases_active_context() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("e.sxs.manifest");
        std::fs::write(&manifest, "<assembly/>").unwrap();

        let counters = Arc::new(Counters::default());
        {
            let mut activator =
                IsolationActivator::with_backend(Box::new(CountingBackend(counters.clone())));
            assert!(activator.activate(&manifest).unwrap());
        }
        assert_eq!(counters.created.load(Ordering::SeqCst), 1);
        assert_eq!(counters.released.load(Ordering::SeqCst), 1);
        assert_eq!(counters.cleared.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_manifest_is_rejected_before_backend_calls() {
        let counters = Arc::new(Counters::default());
        let mut activator =
            IsolationActivator::with_backend(Box::new(CountingBackend(counters.clone())));
        let err = activator
            .activate(Path::new("/nowhere/e.sxs.manifest"))
            .unwrap_err();
        assert!(matches!(err, IsolationError::Manifest(_)));
        assert_eq!(counters.created.load(Ordering::SeqCst), 0);
    }
}
