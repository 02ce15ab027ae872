//! ---
//! hearth_section: "04-container-runtime"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Podman CLI backend for the container runtime capability."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use hearth_common::app::{Flow, NetworkMode, PortBinding};
use hearth_common::config::RuntimeConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::{ContainerHandle, ContainerRuntime, ContainerSpec, Result, RuntimeError};

/// Ports published or withdrawn after creation. Podman cannot change the
/// publish set of a live container, so these are forwarded by the node proxy
/// and merged into what `inspect` reports.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PortOverlay {
    #[serde(default)]
    added: Vec<PortBinding>,
    #[serde(default)]
    withdrawn: Vec<PortBinding>,
}

impl PortOverlay {
    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.withdrawn.is_empty()
    }
}

type Overlays = BTreeMap<String, PortOverlay>;

/// Drives the `podman` CLI.
#[derive(Debug)]
pub struct PodmanRuntime {
    binary: String,
    overlays: Mutex<Overlays>,
    overlay_file: Option<PathBuf>,
}

impl PodmanRuntime {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            overlays: Mutex::new(Overlays::new()),
            overlay_file: None,
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.binary.clone())
    }

    /// Keep in-place port changes in `path` so they outlive the daemon.
    /// Existing content is loaded; a missing file starts empty.
    pub fn with_overlay_file(mut self, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let overlays = load_overlays(&path)?;
        if !overlays.is_empty() {
            info!(path = %path.display(), containers = overlays.len(), "port overlays loaded");
        }
        self.overlays = Mutex::new(overlays);
        self.overlay_file = Some(path);
        Ok(self)
    }

    /// Change the overlay of one container, writing the result through to
    /// the overlay file before it becomes visible.
    fn update_overlay<F>(&self, handle: &ContainerHandle, change: F) -> Result<()>
    where
        F: FnOnce(&mut PortOverlay),
    {
        let mut overlays = self.overlays.lock();
        let mut next = overlays.clone();
        let overlay = next.entry(handle.to_string()).or_default();
        change(overlay);
        if overlay.is_empty() {
            next.remove(handle.as_str());
        }
        if next == *overlays {
            return Ok(());
        }
        if let Some(path) = &self.overlay_file {
            save_overlays(path, &next)?;
        }
        *overlays = next;
        Ok(())
    }

    async fn run(&self, args: Vec<String>) -> Result<String> {
        debug!(binary = %self.binary, ?args, "invoking container runtime");
        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let lowered = stderr.to_ascii_lowercase();
        if lowered.contains("no such container") || lowered.contains("no container with name or id")
        {
            let target = args.last().cloned().unwrap_or_default();
            return Err(RuntimeError::NotFound(target));
        }
        Err(RuntimeError::CommandFailed {
            command: format!("{} {}", self.binary, args.join(" ")),
            status: output.status.to_string(),
            stderr,
        })
    }
}

fn overlay_error(path: &Path, message: impl ToString) -> RuntimeError {
    RuntimeError::Overlay {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

fn load_overlays(path: &Path) -> Result<Overlays> {
    match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw).map_err(|err| overlay_error(path, err)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Overlays::new()),
        Err(err) => Err(overlay_error(path, err)),
    }
}

fn save_overlays(path: &Path, overlays: &Overlays) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| overlay_error(path, err))?;
    }
    let body = serde_json::to_vec_pretty(overlays).map_err(|err| overlay_error(path, err))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, body).map_err(|err| overlay_error(&tmp, err))?;
    fs::rename(&tmp, path).map_err(|err| overlay_error(path, err))
}

/// Argument vector for `podman create`.
pub(crate) fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec!["create".to_string(), "--name".to_string(), spec.name.clone()];

    for (key, value) in &spec.labels {
        args.push("--label".into());
        args.push(format!("{key}={value}"));
    }
    for (key, value) in &spec.env {
        args.push("--env".into());
        args.push(format!("{key}={value}"));
    }
    if spec.network_mode != NetworkMode::Host {
        for binding in &spec.ports {
            args.push("--publish".into());
            args.push(format!(
                "{}:{}:{}/{}",
                binding.host_address, binding.host_port, binding.guest_port, binding.flow
            ));
        }
    }
    args.push("--network".into());
    args.push(spec.network_mode.as_str().to_string());
    if !spec.restart_policy.is_empty() {
        args.push("--restart".into());
        args.push(spec.restart_policy.clone());
    }
    if let Some(memory) = spec.resources.memory_mb {
        args.push("--memory".into());
        args.push(format!("{memory}m"));
    }
    if let Some(shares) = spec.resources.cpu_shares {
        args.push("--cpu-shares".into());
        args.push(shares.to_string());
    }
    if let Some(pids) = spec.resources.pids {
        args.push("--pids-limit".into());
        args.push(pids.to_string());
    }
    if spec.privileged {
        args.push("--privileged".into());
    }
    for cap in &spec.capabilities {
        args.push("--cap-add".into());
        args.push(cap.clone());
    }
    for mount in &spec.mounts {
        args.push("--volume".into());
        args.push(format!(
            "{}:{}",
            mount.host_path.display(),
            mount.container_path.display()
        ));
    }
    args.push(spec.image.clone());
    args
}

#[derive(Debug, Deserialize)]
struct RawHostBinding {
    #[serde(rename = "HostIp", default)]
    host_ip: String,
    #[serde(rename = "HostPort", default)]
    host_port: String,
}

/// Parse the JSON rendering of `.HostConfig.PortBindings`.
///
/// Keys look like `80/tcp`; a missing or empty host address means all
/// interfaces.
pub fn parse_port_bindings(raw: &str) -> Result<Vec<PortBinding>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "null" {
        return Ok(Vec::new());
    }
    let parsed: HashMap<String, Option<Vec<RawHostBinding>>> =
        serde_json::from_str(trimmed).map_err(|err| RuntimeError::Parse(err.to_string()))?;

    let mut bindings = Vec::new();
    for (key, hosts) in parsed {
        let (guest, proto) = key.split_once('/').unwrap_or((key.as_str(), "tcp"));
        let guest_port: u16 = guest
            .parse()
            .map_err(|_| RuntimeError::Parse(format!("invalid container port `{key}`")))?;
        let flow: Flow = proto.parse().map_err(RuntimeError::Parse)?;

        for host in hosts.unwrap_or_default() {
            if host.host_port.is_empty() {
                continue;
            }
            let host_port: u16 = host.host_port.parse().map_err(|_| {
                RuntimeError::Parse(format!("invalid host port `{}`", host.host_port))
            })?;
            let host_address = if host.host_ip.is_empty() {
                IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            } else {
                host.host_ip
                    .parse()
                    .map_err(|_| RuntimeError::Parse(format!("invalid host ip `{}`", host.host_ip)))?
            };
            bindings.push(PortBinding {
                host_address,
                host_port,
                guest_port,
                flow,
            });
        }
    }
    bindings.sort_by_key(|b| (b.host_port, b.guest_port));
    Ok(bindings)
}

#[async_trait]
impl ContainerRuntime for PodmanRuntime {
    fn name(&self) -> &'static str {
        "podman"
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        debug!(container = %spec.name, image = %spec.image, "creating container");
        let stdout = self.run(create_args(spec)).await?;
        let id = stdout.lines().last().unwrap_or_default().trim().to_string();
        if id.is_empty() {
            return Err(RuntimeError::Parse("podman create printed no container id".into()));
        }
        Ok(ContainerHandle::new(id))
    }

    async fn start_container(&self, handle: &ContainerHandle) -> Result<()> {
        self.run(vec!["start".into(), handle.to_string()]).await.map(|_| ())
    }

    async fn stop_container(&self, handle: &ContainerHandle) -> Result<()> {
        self.run(vec!["stop".into(), handle.to_string()]).await.map(|_| ())
    }

    async fn remove_container(&self, handle: &ContainerHandle) -> Result<()> {
        self.run(vec!["rm".into(), "--force".into(), handle.to_string()])
            .await?;
        self.update_overlay(handle, |overlay| *overlay = PortOverlay::default())
    }

    async fn pull_image(&self, reference: &str) -> Result<()> {
        self.run(vec!["pull".into(), "--quiet".into(), reference.to_string()])
            .await
            .map(|_| ())
    }

    async fn logs(&self, handle: &ContainerHandle, max_lines: usize) -> Result<Vec<String>> {
        let stdout = self
            .run(vec![
                "logs".into(),
                "--tail".into(),
                max_lines.to_string(),
                handle.to_string(),
            ])
            .await?;
        let lines: Vec<String> = stdout.lines().map(str::to_string).collect();
        let skip = lines.len().saturating_sub(max_lines);
        Ok(lines.into_iter().skip(skip).collect())
    }

    async fn published_ports(&self, handle: &ContainerHandle) -> Result<Vec<PortBinding>> {
        let raw = self
            .run(vec![
                "inspect".into(),
                "--type".into(),
                "container".into(),
                "--format".into(),
                "{{json .HostConfig.PortBindings}}".into(),
                handle.to_string(),
            ])
            .await?;
        let mut bindings = parse_port_bindings(&raw)?;

        let overlays = self.overlays.lock();
        if let Some(overlay) = overlays.get(handle.as_str()) {
            bindings.retain(|b| !overlay.withdrawn.contains(b));
            for added in &overlay.added {
                if !bindings.contains(added) {
                    bindings.push(*added);
                }
            }
            bindings.sort_by_key(|b| (b.host_port, b.guest_port));
        }
        Ok(bindings)
    }

    async fn publish_port(&self, handle: &ContainerHandle, binding: &PortBinding) -> Result<()> {
        debug!(container = %handle, %binding, "publishing port through node proxy");
        self.update_overlay(handle, |overlay| {
            let before = overlay.withdrawn.len();
            overlay.withdrawn.retain(|b| b != binding);
            if overlay.withdrawn.len() == before && !overlay.added.contains(binding) {
                overlay.added.push(*binding);
            }
        })
    }

    async fn unpublish_port(
        &self,
        handle: &ContainerHandle,
        binding: &PortBinding,
    ) -> Result<()> {
        debug!(container = %handle, %binding, "withdrawing published port");
        self.update_overlay(handle, |overlay| {
            let before = overlay.added.len();
            overlay.added.retain(|b| b != binding);
            if overlay.added.len() == before && !overlay.withdrawn.contains(binding) {
                overlay.withdrawn.push(*binding);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use hearth_common::app::ResourceLimits;
    use indexmap::IndexMap;

    use super::*;
    use crate::VolumeMount;

    fn spec() -> ContainerSpec {
        let mut env = IndexMap::new();
        env.insert("MODE".to_string(), "prod".to_string());
        let mut labels = IndexMap::new();
        labels.insert("io.hearth.app".to_string(), "demoapp".to_string());
        ContainerSpec {
            name: "hearth-demoapp".into(),
            image: "alpine:3.18".into(),
            env,
            ports: vec![PortBinding {
                host_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
                host_port: 20000,
                guest_port: 80,
                flow: Flow::Tcp,
            }],
            resources: ResourceLimits {
                memory_mb: Some(256),
                cpu_shares: None,
                pids: Some(128),
            },
            network_mode: NetworkMode::Bridge,
            restart_policy: "on-failure".into(),
            privileged: false,
            capabilities: vec!["NET_ADMIN".into()],
            mounts: vec![VolumeMount {
                host_path: PathBuf::from("/var/lib/hearth/volumes/demoapp/data"),
                container_path: PathBuf::from("/data"),
            }],
            labels,
        }
    }

    #[test]
    fn create_args_carry_ports_limits_and_mounts() {
        let args = create_args(&spec());
        let joined = args.join(" ");
        assert!(joined.starts_with("create --name hearth-demoapp"));
        assert!(joined.contains("--publish 127.0.0.1:20000:80/tcp"));
        assert!(joined.contains("--memory 256m"));
        assert!(joined.contains("--pids-limit 128"));
        assert!(!joined.contains("--cpu-shares"));
        assert!(joined.contains("--cap-add NET_ADMIN"));
        assert!(joined.contains("--volume /var/lib/hearth/volumes/demoapp/data:/data"));
        assert_eq!(args.last().map(String::as_str), Some("alpine:3.18"));
    }

    #[test]
    fn host_network_skips_publish() {
        let mut spec = spec();
        spec.network_mode = NetworkMode::Host;
        let args = create_args(&spec);
        assert!(!args.iter().any(|a| a == "--publish"));
        assert!(args.windows(2).any(|w| w[0] == "--network" && w[1] == "host"));
    }

    #[test]
    fn parses_inspect_port_bindings() {
        let raw = r#"{"80/tcp":[{"HostIp":"127.0.0.1","HostPort":"20001"}],"53/udp":[{"HostIp":"","HostPort":"20000"}],"9000/tcp":null}"#;
        let bindings = parse_port_bindings(raw).unwrap();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].host_port, 20000);
        assert_eq!(bindings[0].flow, Flow::Udp);
        assert_eq!(bindings[0].host_address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(bindings[1].guest_port, 80);
    }

    #[test]
    fn null_bindings_are_empty() {
        assert!(parse_port_bindings("null\n").unwrap().is_empty());
        assert!(matches!(
            parse_port_bindings("{\"x/tcp\":[]}"),
            Err(RuntimeError::Parse(_))
        ));
    }

    fn extra() -> PortBinding {
        PortBinding {
            host_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            host_port: 20001,
            guest_port: 8443,
            flow: Flow::Tcp,
        }
    }

    #[tokio::test]
    async fn publish_then_unpublish_cancels_out() {
        let runtime = PodmanRuntime::new("podman");
        let handle = ContainerHandle::new("abc");
        let binding = spec().ports[0];
        runtime.unpublish_port(&handle, &binding).await.unwrap();
        assert_eq!(runtime.overlays.lock()["abc"].withdrawn, vec![binding]);

        runtime.publish_port(&handle, &binding).await.unwrap();
        assert!(runtime.overlays.lock().is_empty());

        runtime.publish_port(&handle, &extra()).await.unwrap();
        runtime.unpublish_port(&handle, &extra()).await.unwrap();
        assert!(runtime.overlays.lock().is_empty());
    }

    #[tokio::test]
    async fn overlay_file_survives_a_new_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runtime/podman-ports.json");
        let handle = ContainerHandle::new("abc");

        let runtime = PodmanRuntime::new("podman").with_overlay_file(&path).unwrap();
        runtime.publish_port(&handle, &extra()).await.unwrap();
        runtime.unpublish_port(&handle, &spec().ports[0]).await.unwrap();
        assert!(path.is_file());
        drop(runtime);

        let reloaded = PodmanRuntime::new("podman").with_overlay_file(&path).unwrap();
        let overlays = reloaded.overlays.lock();
        let overlay = &overlays["abc"];
        assert_eq!(overlay.added, vec![extra()]);
        assert_eq!(overlay.withdrawn, vec![spec().ports[0]]);
    }

    #[test]
    fn corrupt_overlay_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("podman-ports.json");
        fs::write(&path, "{not json").unwrap();
        let err = PodmanRuntime::new("podman").with_overlay_file(&path).unwrap_err();
        assert!(matches!(err, RuntimeError::Overlay { .. }));
        assert!(PodmanRuntime::new("podman")
            .with_overlay_file(dir.path().join("absent.json"))
            .is_ok());
    }
}
