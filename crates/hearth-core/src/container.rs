//! ---
//! hearth_section: "04-container-runtime"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Projection of app definitions onto runtime container specs."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use hearth_common::app::{AppDefinition, NetworkMode, ServiceEndpoint, StorageKind, StorageMount};
use hearth_common::config::{AppConfig, RuntimeConfig};
use hearth_runtime::{ContainerSpec, VolumeMount};
use indexmap::IndexMap;

pub const LABEL_APP: &str = "io.hearth.app";
pub const LABEL_TYPE: &str = "io.hearth.type";

/// Node-wide inputs to container creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub container_prefix: String,
    pub restart_policy: String,
    /// Network used for apps that ask for the default bridge.
    pub network_mode: NetworkMode,
    pub volumes_dir: PathBuf,
    pub scratch_dir: PathBuf,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            container_prefix: config.runtime.container_prefix.clone(),
            restart_policy: config.runtime.restart_policy.clone(),
            network_mode: config.runtime.network_mode,
            volumes_dir: config.volumes_dir(),
            scratch_dir: config.scratch_dir(),
        }
    }

    /// Runtime defaults with storage roots under `state_dir`.
    pub fn for_state_dir(state_dir: &Path) -> Self {
        let runtime = RuntimeConfig::default();
        Self {
            container_prefix: runtime.container_prefix,
            restart_policy: runtime.restart_policy,
            network_mode: runtime.network_mode,
            volumes_dir: state_dir.join("volumes"),
            scratch_dir: state_dir.join("scratch"),
        }
    }

    pub fn container_name(&self, app: &str) -> String {
        format!("{}{}", self.container_prefix, app)
    }

    /// Per-app directories removed by a purge.
    pub fn storage_roots(&self, app: &str) -> [PathBuf; 2] {
        [self.volumes_dir.join(app), self.scratch_dir.join(app)]
    }

    /// Host directory backing `mount`.
    pub fn host_path(&self, app: &str, mount: &StorageMount) -> PathBuf {
        if let Some(explicit) = &mount.host_path {
            return explicit.clone();
        }
        let root = match mount.kind {
            StorageKind::Persistent => &self.volumes_dir,
            StorageKind::Temporary => &self.scratch_dir,
        };
        let relative = mount
            .container_path
            .strip_prefix("/")
            .unwrap_or(&mount.container_path);
        root.join(app).join(relative)
    }

    /// Explicit host paths a purge leaves alone.
    pub fn retained_host_paths(&self, def: &AppDefinition) -> Vec<PathBuf> {
        let roots = self.storage_roots(&def.name);
        def.storage
            .iter()
            .filter_map(|mount| mount.host_path.as_ref())
            .filter(|path| !roots.iter().any(|root| path.starts_with(root)))
            .cloned()
            .collect()
    }

    pub fn container_spec(&self, def: &AppDefinition, endpoints: &[ServiceEndpoint]) -> ContainerSpec {
        let mut labels = IndexMap::new();
        labels.insert(LABEL_APP.to_string(), def.name.clone());
        labels.insert(LABEL_TYPE.to_string(), def.app_type().to_string());

        let network_mode = match def.permissions.network {
            NetworkMode::Bridge => self.network_mode,
            explicit => explicit,
        };

        ContainerSpec {
            name: self.container_name(&def.name),
            image: def.effective_image(),
            env: def.env.clone(),
            ports: endpoints.iter().map(ServiceEndpoint::binding).collect(),
            resources: def.resources.clone(),
            network_mode,
            restart_policy: self.restart_policy.clone(),
            privileged: def.permissions.privileged,
            capabilities: def.permissions.capabilities.clone(),
            mounts: def
                .storage
                .iter()
                .map(|mount| VolumeMount {
                    host_path: self.host_path(&def.name, mount),
                    container_path: mount.container_path.clone(),
                })
                .collect(),
            labels,
        }
    }
}
