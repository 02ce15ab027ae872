//! ---
//! hearth_section: "01-core-functionality"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Shared primitives and utilities for the control plane."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::app::NetworkMode;
use crate::logging::LogFormat;

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/hearth")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("/var/log/hearth")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_runtime_binary() -> String {
    "podman".to_owned()
}

fn default_restart_policy() -> String {
    "on-failure".to_owned()
}

fn default_container_prefix() -> String {
    "hearth-".to_owned()
}

fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port_range_start() -> u16 {
    20_000
}

fn default_port_range_end() -> u16 {
    29_999
}

fn default_node_id() -> String {
    "node-local".to_owned()
}

fn default_event_capacity() -> usize {
    64
}

fn default_history_depth() -> usize {
    5
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9_464)
}

/// Primary configuration object for the Hearth daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "HEARTH_CONFIG";

    /// Load configuration from disk, respecting the `HEARTH_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path. Falls back to
    /// built-in defaults when no candidate exists, since a single-node install
    /// ships without a config file.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found; using defaults"
        );
        let config = AppConfig::default();
        config.validate()?;
        Ok(LoadedAppConfig {
            config,
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        if self.state_dir.as_os_str().is_empty() {
            return Err(anyhow!("state_dir must not be empty"));
        }
        self.services.validate()?;
        self.runtime.validate()?;
        if self.cluster.event_capacity == 0 {
            return Err(anyhow!("cluster.event_capacity must be at least 1"));
        }
        if self.store.history_depth == 0 {
            return Err(anyhow!("store.history_depth must be at least 1"));
        }
        Ok(())
    }

    /// Root under which persistent app volumes are created by default.
    pub fn volumes_dir(&self) -> PathBuf {
        self.state_dir.join("volumes")
    }

    /// Root under which temporary app scratch space is created by default.
    pub fn scratch_dir(&self) -> PathBuf {
        self.state_dir.join("scratch")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            logging: LoggingConfig::default(),
            runtime: RuntimeConfig::default(),
            services: ServicesConfig::default(),
            cluster: ClusterConfig::default(),
            store: StoreConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

/// Which container runtime backend drives apps.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeBackend {
    #[default]
    Podman,
    /// In-process backend; nothing is actually executed.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub backend: RuntimeBackend,
    #[serde(default = "default_runtime_binary")]
    pub binary: String,
    #[serde(default)]
    pub network_mode: NetworkMode,
    #[serde(default = "default_restart_policy")]
    pub restart_policy: String,
    #[serde(default = "default_container_prefix")]
    pub container_prefix: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backend: RuntimeBackend::default(),
            binary: default_runtime_binary(),
            network_mode: NetworkMode::default(),
            restart_policy: default_restart_policy(),
            container_prefix: default_container_prefix(),
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.binary.trim().is_empty() {
            return Err(anyhow!("runtime.binary must not be empty"));
        }
        match self.restart_policy.as_str() {
            "no" | "always" | "on-failure" | "unless-stopped" => Ok(()),
            other => Err(anyhow!("unsupported runtime.restart_policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    #[serde(default = "default_port_range_start")]
    pub port_range_start: u16,
    #[serde(default = "default_port_range_end")]
    pub port_range_end: u16,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port_range_start: default_port_range_start(),
            port_range_end: default_port_range_end(),
        }
    }
}

impl ServicesConfig {
    pub fn validate(&self) -> Result<()> {
        if self.port_range_start == 0 || self.port_range_start > self.port_range_end {
            return Err(anyhow!(
                "services port range {}..={} is empty or starts at 0",
                self.port_range_start,
                self.port_range_end
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    /// Seed the node unlocked and leader of the control plane, for single-node fleets.
    #[serde(default)]
    pub standalone: bool,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            standalone: false,
            event_capacity: default_event_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_history_depth")]
    pub history_depth: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_depth: default_history_depth(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config: AppConfig = r#"
state_dir = "/tmp/hearth"

[services]
port_range_start = 31000
port_range_end = 31010

[cluster]
standalone = true
"#
        .parse()
        .expect("valid config");
        assert_eq!(config.state_dir, PathBuf::from("/tmp/hearth"));
        assert_eq!(config.services.port_range_start, 31_000);
        assert_eq!(config.services.bind_address, default_bind_address());
        assert!(config.cluster.standalone);
        assert_eq!(config.runtime.binary, "podman");
        assert_eq!(config.store.history_depth, 5);
        assert_eq!(config.volumes_dir(), PathBuf::from("/tmp/hearth/volumes"));
    }

    #[test]
    fn rejects_inverted_port_range() {
        let err = r#"
[services]
port_range_start = 2000
port_range_end = 1000
"#
        .parse::<AppConfig>()
        .unwrap_err();
        assert!(err.to_string().contains("port range"));
    }

    #[test]
    fn rejects_unknown_restart_policy() {
        let result = "[runtime]\nrestart_policy = \"sometimes\"\n".parse::<AppConfig>();
        assert!(result.is_err());
    }

    #[test]
    fn loads_from_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hearth.toml");
        fs::write(&path, "state_dir = \"/srv/hearth\"\n").unwrap();
        let missing = dir.path().join("missing.toml");
        let loaded = AppConfig::load_with_source(&[missing, path.clone()]).unwrap();
        assert_eq!(loaded.source, Some(path));
        assert_eq!(loaded.config.state_dir, PathBuf::from("/srv/hearth"));
    }
}
