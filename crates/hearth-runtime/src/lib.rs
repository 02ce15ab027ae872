//! ---
//! hearth_section: "04-container-runtime"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Container runtime capability consumed by the orchestrator."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
//! Container runtime capability.
//!
//! The orchestrator only ever talks to [`ContainerRuntime`]; it never assumes a
//! specific runtime binary. Every call runs to completion or error, there is no
//! cancellation at this layer.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use hearth_common::app::{NetworkMode, PortBinding, ResourceLimits};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

mod memory;
mod podman;

pub use memory::{MemoryContainer, MemoryRuntime, RuntimeOp};
pub use podman::{parse_port_bindings, PodmanRuntime};

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("container {0} not found")]
    NotFound(String),
    #[error("`{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("failed to invoke container runtime: {0}")]
    Io(#[from] std::io::Error),
    #[error("unexpected runtime output: {0}")]
    Parse(String),
    #[error("port overlay file {path}: {message}")]
    Overlay { path: PathBuf, message: String },
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound(_))
    }
}

/// Opaque identifier the runtime hands back for a created container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerHandle(String);

impl ContainerHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Host directory bind-mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
}

/// Everything the runtime needs to create a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: IndexMap<String, String>,
    pub ports: Vec<PortBinding>,
    pub resources: ResourceLimits,
    pub network_mode: NetworkMode,
    pub restart_policy: String,
    pub privileged: bool,
    pub capabilities: Vec<String>,
    pub mounts: Vec<VolumeMount>,
    pub labels: IndexMap<String, String>,
}

/// Operation set the orchestrator requires from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle>;

    async fn start_container(&self, handle: &ContainerHandle) -> Result<()>;

    /// Stopping an already stopped container succeeds.
    async fn stop_container(&self, handle: &ContainerHandle) -> Result<()>;

    async fn remove_container(&self, handle: &ContainerHandle) -> Result<()>;

    async fn pull_image(&self, reference: &str) -> Result<()>;

    /// Last `max_lines` log lines, oldest first.
    async fn logs(&self, handle: &ContainerHandle, max_lines: usize) -> Result<Vec<String>>;

    /// Ports the container actually publishes right now.
    async fn published_ports(&self, handle: &ContainerHandle) -> Result<Vec<PortBinding>>;

    /// Publish one more port on an existing container.
    async fn publish_port(&self, handle: &ContainerHandle, binding: &PortBinding) -> Result<()>;

    /// Withdraw a published port from an existing container.
    async fn unpublish_port(&self, handle: &ContainerHandle, binding: &PortBinding)
        -> Result<()>;
}
