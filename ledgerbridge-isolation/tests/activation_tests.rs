use ledgerbridge_isolation::{
    lock_activator, manifest, ActivationBackend, ActivationCookie, ActivationLease,
    ContextHandle, IsolationActivator, IsolationError, IsolationResult, NoTypeLib,
    SharedActivator,
};
use ledgerbridge_types::{ClassId, EngineIdentity, EngineVersion};
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    SearchPath(Option<PathBuf>),
    Create(PathBuf),
    Activate(usize),
    Deactivate(usize),
    Release(usize),
}

#[derive(Clone, Default)]
struct RecordingBackend {
    calls: Arc<Mutex<Vec<Call>>>,
    fail_activate: bool,
}

impl RecordingBackend {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl ActivationBackend for RecordingBackend {
    fn set_search_path(&mut self, dir: Option<&Path>) -> IsolationResult<()> {
        self.push(Call::SearchPath(dir.map(Path::to_path_buf)));
        Ok(())
    }

    fn create_context(&mut self, manifest: &Path) -> IsolationResult<ContextHandle> {
        self.push(Call::Create(manifest.to_path_buf()));
        Ok(ContextHandle(7))
    }

    fn activate(&mut self, context: ContextHandle) -> IsolationResult<ActivationCookie> {
        if self.fail_activate {
            return Err(IsolationError::Os {
                operation: "ActivateActCtx",
                code: 0x8007_0005_u32 as i32,
                message: "Access is denied.".to_string(),
            });
        }
        self.push(Call::Activate(context.0));
        Ok(ActivationCookie(42))
    }

    fn deactivate(&mut self, cookie: ActivationCookie) -> IsolationResult<()> {
        self.push(Call::Deactivate(cookie.0));
        Ok(())
    }

    fn release(&mut self, context: ContextHandle) {
        self.push(Call::Release(context.0));
    }
}

fn staged_manifest(dir: &Path, binary: &str) -> PathBuf {
    let binary_path = dir.join(binary);
    std::fs::write(&binary_path, b"MZ").unwrap();
    let identity = EngineIdentity::for_version(&EngineVersion::new(32, 0))
        .with_class_id(ClassId::from_u128(0x0123_4567_89AB_CDEF_0123_4567_89AB_CDEF));
    manifest::create_manifest(&binary_path, &identity, &NoTypeLib).unwrap()
}

fn shared(backend: &RecordingBackend) -> SharedActivator {
    Arc::new(Mutex::new(IsolationActivator::with_backend(Box::new(
        backend.clone(),
    ))))
}

// ── Activate / deactivate ─────────────────────────────────────────

#[test]
fn activation_sets_search_path_then_creates_and_activates() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = staged_manifest(dir.path(), "Engine.dll");
    let backend = RecordingBackend::default();
    let mut activator = IsolationActivator::with_backend(Box::new(backend.clone()));

    assert!(activator.activate(&manifest).unwrap());
    assert!(activator.is_active());
    assert_eq!(activator.active_binary(), Some(dir.path().join("Engine.dll").as_path()));
    assert_eq!(
        backend.calls(),
        vec![
            Call::SearchPath(Some(dir.path().to_path_buf())),
            Call::Create(manifest.clone()),
            Call::Activate(7),
        ]
    );

    activator.deactivate();
    assert!(!activator.is_active());
    assert_eq!(
        backend.calls()[3..],
        [Call::Deactivate(42), Call::Release(7), Call::SearchPath(None)]
    );
}

#[test]
fn reactivating_same_manifest_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = staged_manifest(dir.path(), "Engine.dll");
    let backend = RecordingBackend::default();
    let mut activator = IsolationActivator::with_backend(Box::new(backend.clone()));

    assert!(activator.activate(&manifest).unwrap());
    assert!(!activator.activate(&manifest).unwrap());
    assert_eq!(backend.calls().len(), 3);
}

#[test]
fn different_manifest_conflicts() {
    let first_dir = tempfile::tempdir().unwrap();
    let second_dir = tempfile::tempdir().unwrap();
    let first = staged_manifest(first_dir.path(), "Engine.dll");
    let second = staged_manifest(second_dir.path(), "Engine.dll");
    let mut activator =
        IsolationActivator::with_backend(Box::new(RecordingBackend::default()));

    activator.activate(&first).unwrap();
    let err = activator.activate(&second).unwrap_err();
    assert!(matches!(err, IsolationError::Conflict { .. }));
    assert_eq!(activator.active_manifest(), Some(first.as_path()));
}

#[test]
fn deactivate_is_idempotent() {
    let backend = RecordingBackend::default();
    let mut activator = IsolationActivator::with_backend(Box::new(backend.clone()));
    activator.deactivate();
    activator.deactivate();
    assert!(backend.calls().is_empty());
}

#[test]
fn failed_activation_releases_context_and_clears_path() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = staged_manifest(dir.path(), "Engine.dll");
    let backend = RecordingBackend {
        fail_activate: true,
        ..Default::default()
    };
    let mut activator = IsolationActivator::with_backend(Box::new(backend.clone()));

    let err = activator.activate(&manifest).unwrap_err();
    assert!(err.to_string().contains("0x80070005"));
    assert!(!activator.is_active());
    assert_eq!(
        backend.calls()[2..],
        [Call::Release(7), Call::SearchPath(None)]
    );
}

// ── Leases ────────────────────────────────────────────────────────

#[test]
fn last_lease_drop_deactivates() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = staged_manifest(dir.path(), "Engine.dll");
    let backend = RecordingBackend::default();
    let activator = shared(&backend);

    let first = ActivationLease::acquire(activator.clone(), &manifest).unwrap();
    let second = ActivationLease::acquire(activator.clone(), &manifest).unwrap();
    assert_eq!(lock_activator(&activator).lease_count(), 2);

    drop(first);
    assert!(lock_activator(&activator).is_active());

    drop(second);
    assert!(!lock_activator(&activator).is_active());
    assert!(backend.calls().contains(&Call::Release(7)));
}

#[test]
fn lease_on_conflicting_manifest_fails_without_disturbing_holder() {
    let first_dir = tempfile::tempdir().unwrap();
    let second_dir = tempfile::tempdir().unwrap();
    let first = staged_manifest(first_dir.path(), "Engine.dll");
    let second = staged_manifest(second_dir.path(), "Other.dll");
    let activator = shared(&RecordingBackend::default());

    let _held = ActivationLease::acquire(activator.clone(), &first).unwrap();
    assert!(ActivationLease::acquire(activator.clone(), &second).is_err());
    assert_eq!(lock_activator(&activator).lease_count(), 1);
    assert_eq!(lock_activator(&activator).active_manifest(), Some(first.as_path()));
}

#[test]
fn stale_lease_does_not_release_a_newer_context() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = staged_manifest(dir.path(), "Engine.dll");
    let backend = RecordingBackend::default();
    let activator = shared(&backend);

    let stale = ActivationLease::acquire(activator.clone(), &manifest).unwrap();
    lock_activator(&activator).deactivate();
    let current = ActivationLease::acquire(activator.clone(), &manifest).unwrap();
    let calls_before = backend.calls().len();

    drop(stale);
    assert!(lock_activator(&activator).is_active());
    assert_eq!(lock_activator(&activator).lease_count(), 1);
    assert_eq!(backend.calls().len(), calls_before);

    drop(current);
    assert!(!lock_activator(&activator).is_active());
}

// ── Process-wide singleton ────────────────────────────────────────

#[test]
#[serial]
fn shared_activator_is_a_singleton() {
    let a = IsolationActivator::shared();
    let b = IsolationActivator::shared();
    assert!(Arc::ptr_eq(&a, &b));
}

#[cfg(not(windows))]
#[test]
#[serial]
fn native_backend_reports_unsupported_off_windows() {
    let dir = tempfile::tempdir().unwrap();
    let manifest = staged_manifest(dir.path(), "Engine.dll");
    let activator = IsolationActivator::shared();

    let err = lock_activator(&activator).activate(&manifest).unwrap_err();
    assert!(matches!(err, IsolationError::Unsupported(_)));
    assert!(!lock_activator(&activator).is_active());
}
