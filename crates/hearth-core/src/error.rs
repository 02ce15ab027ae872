//! ---
//! hearth_section: "01-core-functionality"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Error taxonomy of lifecycle operations."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
use hearth_cluster::{GateError, ResourceKey, Role};
use hearth_common::validation::ValidationError;
use hearth_runtime::RuntimeError;
use hearth_services::ServiceError;
use hearth_store::StoreError;

pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Failure of a lifecycle operation.
///
/// `Locked`, `NotLeader`, `Validation`, `NotFound`, `PreviousManifestNotFound`
/// and `AlreadyExists` are returned before any side effect.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("node is locked")]
    Locked,
    #[error("not leader for {resource} (role {role})")]
    NotLeader { resource: ResourceKey, role: Role },
    #[error("invalid app definition: {0}")]
    Validation(#[from] ValidationError),
    #[error("app '{0}' not found")]
    NotFound(String),
    #[error("no previous manifest recorded for app '{0}'")]
    PreviousManifestNotFound(String),
    #[error("app '{0}' already exists")]
    AlreadyExists(String),
    #[error("container {op} failed for app '{app}': {source}")]
    Runtime {
        app: String,
        op: &'static str,
        #[source]
        source: RuntimeError,
    },
    #[error("state store error: {0}")]
    Storage(StoreError),
    #[error("service allocation error: {0}")]
    Services(#[from] ServiceError),
}

impl LifecycleError {
    pub(crate) fn runtime(app: &str, op: &'static str) -> impl FnOnce(RuntimeError) -> Self {
        let app = app.to_owned();
        move |source| LifecycleError::Runtime { app, op, source }
    }

    /// Refused by the lock or leadership gate.
    pub fn is_gate(&self) -> bool {
        matches!(self, LifecycleError::Locked | LifecycleError::NotLeader { .. })
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleError::Locked => "locked",
            LifecycleError::NotLeader { .. } => "not_leader",
            LifecycleError::Validation(_) => "validation",
            LifecycleError::NotFound(_) => "not_found",
            LifecycleError::PreviousManifestNotFound(_) => "previous_manifest_not_found",
            LifecycleError::AlreadyExists(_) => "already_exists",
            LifecycleError::Runtime { .. } => "runtime",
            LifecycleError::Storage(_) => "storage",
            LifecycleError::Services(_) => "services",
        }
    }
}

impl From<GateError> for LifecycleError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Locked => LifecycleError::Locked,
            GateError::NotLeader { resource, role } => LifecycleError::NotLeader { resource, role },
        }
    }
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(name) => LifecycleError::NotFound(name),
            StoreError::AlreadyExists(name) => LifecycleError::AlreadyExists(name),
            other => LifecycleError::Storage(other),
        }
    }
}

impl From<std::io::Error> for LifecycleError {
    fn from(err: std::io::Error) -> Self {
        LifecycleError::Storage(StoreError::Io(err))
    }
}
