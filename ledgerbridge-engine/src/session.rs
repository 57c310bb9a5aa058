//! Engine sessions: obtaining the root object and holding one connection.

use ledgerbridge_acquire::Acquisition;
use ledgerbridge_isolation::{
    lock_activator, ActivationLease, InstantiationChain, InstantiationRequest, SharedActivator,
};
use ledgerbridge_types::{ConnectionToken, EngineIdentity, EngineVersion};
use std::fmt;
use std::path::{Path, PathBuf};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use crate::config::EngineSettings;
use crate::cursor::RecordCursor;
use crate::dispatch::{get_object, invoke_object, last_error_text, DispatchRef, Variant};
use crate::error::{EngineError, EngineResult};
use crate::posting::PostingDocument;

/// How the root object was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationPath {
    /// Through the system registration.
    Registered,
    /// Inside the isolation context of a staged component.
    Isolated,
}

impl fmt::Display for ActivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Registered => "registered",
            Self::Isolated => "isolated",
        })
    }
}

/// The engine root object and the isolation lease it was created under.
pub struct RootObject {
    pub object: DispatchRef,
    pub lease: Option<ActivationLease>,
    /// Version of the engine that produced the object, when known.
    pub version: Option<EngineVersion>,
    pub path: ActivationPath,
}

/// Source of engine objects.
pub trait EngineProvider {
    /// Creates the engine root object named by `identity`.
    fn root(&self, identity: &EngineIdentity) -> EngineResult<RootObject>;

    /// Creates a standalone object by programmatic id.
    fn create(&self, prog_id: &str) -> EngineResult<DispatchRef>;
}

/// Provider that tries the system registration first and then the
/// isolation context of a staged component.
pub struct IsolatedProvider {
    registered: InstantiationChain<DispatchRef>,
    isolated: InstantiationChain<DispatchRef>,
    activator: SharedActivator,
    manifest: Option<PathBuf>,
    staged_version: Option<EngineVersion>,
}

impl IsolatedProvider {
    #[must_use]
    pub fn new(activator: SharedActivator) -> Self {
        Self {
            registered: InstantiationChain::new(),
            isolated: InstantiationChain::new(),
            activator,
            manifest: None,
            staged_version: None,
        }
    }

    /// The native strategies: registered lookup for the registered path and
    /// the full fallback chain inside the isolation context.
    #[cfg(windows)]
    #[must_use]
    pub fn native(activator: SharedActivator) -> Self {
        Self::new(activator)
            .with_registered(crate::com::registered_chain())
            .with_isolated(crate::com::isolated_chain())
    }

    /// Without the native engine no strategy can succeed.
    #[cfg(not(windows))]
    #[must_use]
    pub fn native(activator: SharedActivator) -> Self {
        Self::new(activator)
    }

    /// Native provider for the outcome of an acquisition.
    #[must_use]
    pub fn for_acquisition(acquisition: &Acquisition, activator: SharedActivator) -> Self {
        let provider = Self::native(activator);
        match acquisition.staged() {
            Some(component) => provider.with_staged(&component.manifest_path, component.version),
            None => provider,
        }
    }

    #[must_use]
    pub fn with_registered(mut self, chain: InstantiationChain<DispatchRef>) -> Self {
        self.registered = chain;
        self
    }

    #[must_use]
    pub fn with_isolated(mut self, chain: InstantiationChain<DispatchRef>) -> Self {
        self.isolated = chain;
        self
    }

    #[must_use]
    pub fn with_staged(mut self, manifest: &Path, version: EngineVersion) -> Self {
        self.manifest = Some(manifest.to_path_buf());
        self.staged_version = Some(version);
        self
    }

    fn isolated_root(
        &self,
        manifest: &Path,
        identity: &EngineIdentity,
        registered_summary: &str,
    ) -> EngineResult<RootObject> {
        let lease = ActivationLease::acquire(self.activator.clone(), manifest)?;
        let outcome = lock_activator(&self.activator).instantiate(&self.isolated, identity, None);
        let summary = outcome.summary();

        match outcome.handle {
            Some(object) => {
                info!(
                    prog_id = %identity.prog_id,
                    manifest = %manifest.display(),
                    "Engine root created in isolation context"
                );
                Ok(RootObject {
                    object,
                    lease: Some(lease),
                    version: self.staged_version,
                    path: ActivationPath::Isolated,
                })
            }
            None => {
                let mut summary = summary;
                if summary.is_empty() {
                    summary = "no instantiation strategies".to_string();
                }
                if !registered_summary.is_empty() {
                    summary = format!("{registered_summary}; {summary}");
                }
                Err(EngineError::IsolationFailed(summary))
            }
        }
    }
}

impl EngineProvider for IsolatedProvider {
    fn root(&self, identity: &EngineIdentity) -> EngineResult<RootObject> {
        let request = InstantiationRequest {
            class_id: identity.class_id,
            prog_id: identity.prog_id.clone(),
            binary: None,
            context_active: false,
        };
        let outcome = self.registered.run(&request);
        if let Some(object) = outcome.handle {
            info!(prog_id = %identity.prog_id, "Engine root created from registration");
            return Ok(RootObject {
                object,
                lease: None,
                version: None,
                path: ActivationPath::Registered,
            });
        }

        match &self.manifest {
            Some(manifest) => self.isolated_root(manifest, identity, &outcome.summary()),
            None => Err(EngineError::EngineNotPresent(format!(
                "{} is not registered and no staged component is available",
                identity.prog_id
            ))),
        }
    }

    fn create(&self, prog_id: &str) -> EngineResult<DispatchRef> {
        let mut request = InstantiationRequest {
            class_id: None,
            prog_id: prog_id.to_string(),
            binary: None,
            context_active: false,
        };
        let outcome = self.registered.run(&request);
        if let Some(object) = outcome.handle {
            return Ok(object);
        }

        // Session objects live in the same binary as the root, so an active
        // context can create them too.
        let outcome = {
            let activator = lock_activator(&self.activator);
            if !activator.is_active() {
                return Err(EngineError::EngineNotPresent(format!("{prog_id} is not registered")));
            }
            request.binary = activator.active_binary().map(Path::to_path_buf);
            request.context_active = true;
            self.isolated.run(&request)
        };
        let summary = outcome.summary();
        outcome.handle.ok_or(EngineError::IsolationFailed(summary))
    }
}

/// What a session connects to.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub identity: EngineIdentity,
    /// Version the data needs. A staged engine of another major version is
    /// refused.
    pub expected_version: Option<EngineVersion>,
    pub settings: EngineSettings,
}

impl SessionConfig {
    #[must_use]
    pub fn new(identity: EngineIdentity) -> Self {
        Self {
            identity,
            expected_version: None,
            settings: EngineSettings::default(),
        }
    }

    #[must_use]
    pub fn with_expected_version(mut self, version: EngineVersion) -> Self {
        self.expected_version = Some(version);
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// One authenticated connection to an engine data store.
///
/// Owns the root object, the connected workspace (or secondary session
/// object) and the isolation lease. [`dispose`](Self::dispose) runs on drop.
pub struct EngineSession {
    root: Option<DispatchRef>,
    connection: Option<DispatchRef>,
    lease: Option<ActivationLease>,
    token: ConnectionToken,
    data_path: PathBuf,
    user: String,
    path: ActivationPath,
    /// Programmatic id of the secondary session object, if one connected.
    secondary: Option<String>,
    disposed: bool,
}

impl EngineSession {
    /// Connects `user` to the data store at `data_path`.
    pub fn connect(
        provider: &dyn EngineProvider,
        config: &SessionConfig,
        data_path: &Path,
        user: &str,
        secret: &str,
    ) -> EngineResult<Self> {
        let root = provider.root(&config.identity)?;

        if let (Some(expected), Some(staged)) = (config.expected_version, root.version) {
            if !expected.same_major(&staged) {
                return Err(EngineError::WrongVersion { expected, staged });
            }
        }

        let token = ConnectionToken::new();
        let args = connect_args(data_path, user, secret, &token);
        let settings = &config.settings;

        let primary = match connect_workspace(&root.object, &token, &args) {
            Ok(workspace) => {
                info!(
                    path = %data_path.display(),
                    user,
                    via = %root.path,
                    "Engine session connected"
                );
                return Ok(Self::new(root, workspace, token, data_path, user, None));
            }
            Err(diagnostic) => diagnostic,
        };
        check_busy(settings, &primary)?;
        warn!(path = %data_path.display(), user, "Workspace connect failed: {}", primary);

        let mut failures = vec![format!("workspace: {primary}")];
        for prog_id in &settings.secondary_prog_ids {
            let object = match provider.create(prog_id) {
                Ok(object) => object,
                Err(e) => {
                    debug!(prog_id = %prog_id, "Secondary session object unavailable: {}", e);
                    failures.push(format!("{prog_id}: {e}"));
                    continue;
                }
            };

            match connect_object(&object, &args) {
                Ok(()) => {
                    info!(
                        path = %data_path.display(),
                        user,
                        prog_id = %prog_id,
                        "Engine session connected through secondary object"
                    );
                    let secondary = Some(prog_id.clone());
                    return Ok(Self::new(root, object, token, data_path, user, secondary));
                }
                Err(raised) => {
                    let diagnostic = last_error_text(object.as_ref())
                        .or_else(|| last_error_text(root.object.as_ref()))
                        .unwrap_or(raised);
                    check_busy(settings, &diagnostic)?;
                    warn!(prog_id = %prog_id, "Secondary connect failed: {}", diagnostic);
                    failures.push(format!("{prog_id}: {diagnostic}"));
                }
            }
        }

        Err(EngineError::ConnectFailed(failures.join("; ")))
    }

    fn new(
        root: RootObject,
        connection: DispatchRef,
        token: ConnectionToken,
        data_path: &Path,
        user: &str,
        secondary: Option<String>,
    ) -> Self {
        Self {
            root: Some(root.object),
            connection: Some(connection),
            lease: root.lease,
            token,
            data_path: data_path.to_path_buf(),
            user: user.to_string(),
            path: root.path,
            secondary,
            disposed: false,
        }
    }

    #[must_use]
    pub fn token(&self) -> &ConnectionToken {
        &self.token
    }

    #[must_use]
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    #[must_use]
    pub fn activation_path(&self) -> ActivationPath {
        self.path
    }

    /// The secondary programmatic id used, when the workspace connect failed.
    #[must_use]
    pub fn secondary(&self) -> Option<&str> {
        self.secondary.as_deref()
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn connection(&self) -> EngineResult<&DispatchRef> {
        self.connection.as_ref().ok_or(EngineError::Disposed)
    }

    /// Creates an engine object by type name, e.g. `SalesRecord`.
    pub fn create_object(&self, type_name: &str) -> EngineResult<DispatchRef> {
        invoke_object(self.connection()?.as_ref(), "CreateObject", &[Variant::from(type_name)])
    }

    /// Opens a forward-only cursor over `type_name`.
    pub fn open_cursor(&self, type_name: &str) -> EngineResult<RecordCursor> {
        Ok(RecordCursor::new(self.create_object(type_name)?))
    }

    /// Starts a posting document of `type_name`.
    pub fn posting(&self, type_name: &str) -> EngineResult<PostingDocument> {
        let object = self.create_object(type_name)?;
        Ok(PostingDocument::new(object, self.root.clone()))
    }

    /// The engine's last-error text, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.root
            .as_deref()
            .and_then(last_error_text)
            .or_else(|| self.connection.as_deref().and_then(last_error_text))
    }

    /// Disconnects and releases the engine. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        if let Some(connection) = self.connection.take() {
            match connection.invoke("Disconnect", &[]) {
                Ok(_) => debug!(path = %self.data_path.display(), "Disconnected"),
                Err(e) => warn!(path = %self.data_path.display(), "Failed to disconnect: {}", e),
            }
        }
        self.root = None;
        if self.lease.take().is_some() {
            debug!("Released isolation lease");
        }
        info!(path = %self.data_path.display(), user = %self.user, "Engine session disposed");
    }
}

impl Drop for EngineSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for EngineSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSession")
            .field("token", &self.token)
            .field("data_path", &self.data_path)
            .field("user", &self.user)
            .field("path", &self.path)
            .field("secondary", &self.secondary)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

fn connect_args(
    data_path: &Path,
    user: &str,
    secret: &str,
    token: &ConnectionToken,
) -> [Variant; 4] {
    [
        Variant::from(data_path.display().to_string()),
        Variant::from(user),
        Variant::from(secret),
        Variant::from(token.to_string()),
    ]
}

/// `Workspaces.Add(token)` then `Connect`. Errors carry the engine diagnostic.
fn connect_workspace(
    root: &DispatchRef,
    token: &ConnectionToken,
    args: &[Variant],
) -> Result<DispatchRef, String> {
    let workspace = get_object(root.as_ref(), "Workspaces", &[])
        .and_then(|workspaces| {
            invoke_object(workspaces.as_ref(), "Add", &[Variant::from(token.to_string())])
        })
        .map_err(|e| e.to_string())?;

    match connect_object(&workspace, args) {
        Ok(()) => Ok(workspace),
        Err(raised) => Err(last_error_text(root.as_ref())
            .or_else(|| last_error_text(workspace.as_ref()))
            .unwrap_or(raised)),
    }
}

fn connect_object(object: &DispatchRef, args: &[Variant]) -> Result<(), String> {
    match object.invoke("Connect", args) {
        Ok(result) if result.is_truthy() => Ok(()),
        Ok(_) => Err("engine returned false".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

fn check_busy(settings: &EngineSettings, diagnostic: &str) -> EngineResult<()> {
    if !settings.is_busy_message(diagnostic) {
        return Ok(());
    }
    let local_processes = local_host_processes(settings);
    warn!(processes = ?local_processes, "Engine session busy: {}", diagnostic);
    Err(EngineError::Busy {
        diagnostic: diagnostic.to_string(),
        local_processes,
    })
}

/// Engine host processes on this machine, as `name (pid)`.
fn local_host_processes(settings: &EngineSettings) -> Vec<String> {
    let mut system = System::new();
    system.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::nothing());

    let mut found: Vec<String> = system
        .processes()
        .values()
        .filter_map(|process| {
            let name = process.name().to_string_lossy();
            settings
                .is_host_process(&name)
                .then(|| format!("{name} ({})", process.pid().as_u32()))
        })
        .collect();
    found.sort();
    found
}
