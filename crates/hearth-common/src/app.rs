//! ---
//! hearth_section: "01-core-functionality"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Declarative application manifests and their runtime projection."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Declarative, user-authored application manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSource>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub app_type: Option<AppType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listeners: Vec<Listener>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub env: IndexMap<String, String>,
    #[serde(default)]
    pub resources: ResourceLimits,
    #[serde(default)]
    pub permissions: Permissions,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub storage: Vec<StorageMount>,
}

impl AppDefinition {
    /// Minimal image-based definition; callers add listeners and limits as needed.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: Some(image.into()),
            build: None,
            app_type: None,
            listeners: Vec::new(),
            env: IndexMap::new(),
            resources: ResourceLimits::default(),
            permissions: Permissions::default(),
            storage: Vec::new(),
        }
    }

    pub fn with_listener(mut self, listener: Listener) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    pub fn to_yaml_string(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Fill in fields the author may omit.
    pub fn apply_defaults(&mut self) {
        if self.app_type.is_none() {
            self.app_type = Some(AppType::User);
        }
    }

    pub fn app_type(&self) -> AppType {
        self.app_type.unwrap_or_default()
    }

    /// Image the runtime should run. Source builds resolve to the local tag the
    /// builder publishes.
    pub fn effective_image(&self) -> String {
        match &self.image {
            Some(image) => image.clone(),
            None => format!("localhost/hearth-{}:latest", self.name),
        }
    }

    pub fn listener(&self, name: &str) -> Option<&Listener> {
        self.listeners.iter().find(|listener| listener.name == name)
    }
}

/// Source build parameters, mutually exclusive with an image reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSource {
    pub context: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub containerfile: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppType {
    #[default]
    User,
    System,
}

impl fmt::Display for AppType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppType::User => f.write_str("user"),
            AppType::System => f.write_str("system"),
        }
    }
}

/// Logical network endpoint declared by an app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub name: String,
    /// Port the app listens on inside the container.
    pub port: u16,
    #[serde(default)]
    pub flow: Flow,
    #[serde(default)]
    pub protocol: AppProtocol,
}

impl Listener {
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
            flow: Flow::Tcp,
            protocol: AppProtocol::Http,
        }
    }

    pub fn with_flow(mut self, flow: Flow) -> Self {
        self.flow = flow;
        self
    }

    pub fn with_protocol(mut self, protocol: AppProtocol) -> Self {
        self.protocol = protocol;
        self
    }
}

/// Transport flow of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Flow {
    #[default]
    Tcp,
    Udp,
}

impl Flow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flow::Tcp => "tcp",
            Flow::Udp => "udp",
        }
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Flow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Flow::Tcp),
            "udp" => Ok(Flow::Udp),
            other => Err(format!("unknown transport flow: {}", other)),
        }
    }
}

/// Application protocol spoken on a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppProtocol {
    #[default]
    Http,
    Https,
    Raw,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_shares: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pids: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub network: NetworkMode,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    #[default]
    Bridge,
    Host,
    None,
}

impl NetworkMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkMode::Bridge => "bridge",
            NetworkMode::Host => "host",
            NetworkMode::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageMount {
    #[serde(rename = "type")]
    pub kind: StorageKind,
    pub container_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_limit_mb: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Persistent,
    Temporary,
}

/// Lifecycle status of an installed app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    #[default]
    Created,
    Running,
    Stopped,
    Error,
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AppStatus::Created => "created",
            AppStatus::Running => "running",
            AppStatus::Stopped => "stopped",
            AppStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// Concrete host binding allocated for one listener on this node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub app: String,
    pub listener: String,
    pub host_address: IpAddr,
    pub host_port: u16,
    pub guest_port: u16,
    #[serde(default)]
    pub flow: Flow,
    #[serde(default)]
    pub protocol: AppProtocol,
}

impl ServiceEndpoint {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host_address, self.host_port)
    }

    /// Host-to-guest port binding the runtime publishes for this endpoint.
    pub fn binding(&self) -> PortBinding {
        PortBinding {
            host_address: self.host_address,
            host_port: self.host_port,
            guest_port: self.guest_port,
            flow: self.flow,
        }
    }
}

/// A published host port as the container runtime sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    pub host_address: IpAddr,
    pub host_port: u16,
    pub guest_port: u16,
    pub flow: Flow,
}

impl fmt::Display for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}->{}/{}",
            self.host_address, self.host_port, self.guest_port, self.flow
        )
    }
}

/// Runtime projection of an installed app. Owned by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppInstance {
    pub name: String,
    pub image: String,
    #[serde(rename = "type")]
    pub app_type: AppType,
    pub status: AppStatus,
    pub container_id: String,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    #[serde(default)]
    pub endpoints: Vec<ServiceEndpoint>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AppInstance {
    pub fn new(
        definition: &AppDefinition,
        container_id: impl Into<String>,
        endpoints: Vec<ServiceEndpoint>,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: definition.name.clone(),
            image: definition.effective_image(),
            app_type: definition.app_type(),
            status: AppStatus::Created,
            container_id: container_id.into(),
            env: definition.env.clone(),
            endpoints,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_yaml_uses_type_key_and_defaults() {
        let yaml = r#"
name: demoapp
image: alpine:3.18
listeners:
  - name: web
    port: 80
storage:
  - type: persistent
    container_path: /data
"#;
        let mut def = AppDefinition::from_yaml_str(yaml).expect("parse manifest");
        assert_eq!(def.app_type, None);
        def.apply_defaults();
        assert_eq!(def.app_type, Some(AppType::User));
        assert_eq!(def.listeners[0].flow, Flow::Tcp);
        assert_eq!(def.listeners[0].protocol, AppProtocol::Http);
        assert_eq!(def.storage[0].kind, StorageKind::Persistent);
        assert_eq!(def.permissions.network, NetworkMode::Bridge);

        let rendered = def.to_yaml_string().unwrap();
        assert!(rendered.contains("type: user"));
    }

    #[test]
    fn build_source_resolves_to_local_image() {
        let def = AppDefinition {
            image: None,
            build: Some(BuildSource {
                context: PathBuf::from("/srv/src/notes"),
                containerfile: None,
            }),
            ..AppDefinition::new("notes", "unused")
        };
        assert_eq!(def.effective_image(), "localhost/hearth-notes:latest");
    }
}
