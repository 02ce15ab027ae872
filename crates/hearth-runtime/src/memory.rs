//! ---
//! hearth_section: "04-container-runtime"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "In-process container runtime for tests and dry runs."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use hearth_common::app::PortBinding;
use parking_lot::Mutex;
use tracing::debug;

use crate::{ContainerHandle, ContainerRuntime, ContainerSpec, Result, RuntimeError};

/// Runtime operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeOp {
    Create,
    Start,
    Stop,
    Remove,
    Pull,
    Logs,
    Inspect,
    Publish,
    Unpublish,
}

/// Snapshot of a container held by [`MemoryRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryContainer {
    pub handle: ContainerHandle,
    pub spec: ContainerSpec,
    pub running: bool,
    pub ports: Vec<PortBinding>,
    pub logs: Vec<String>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    next_id: u64,
    containers: BTreeMap<ContainerHandle, MemoryContainer>,
    pulled: Vec<String>,
    failures: HashMap<RuntimeOp, usize>,
}

impl MemoryInner {
    fn take_failure(&mut self, op: RuntimeOp) -> Result<()> {
        if let Some(remaining) = self.failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RuntimeError::CommandFailed {
                    command: format!("{op:?}").to_lowercase(),
                    status: "injected".into(),
                    stderr: "injected failure".into(),
                });
            }
        }
        Ok(())
    }

    fn container_mut(&mut self, handle: &ContainerHandle) -> Result<&mut MemoryContainer> {
        self.containers
            .get_mut(handle)
            .ok_or_else(|| RuntimeError::NotFound(handle.to_string()))
    }
}

/// Container runtime that keeps every container in memory.
#[derive(Debug, Default)]
pub struct MemoryRuntime {
    inner: Mutex<MemoryInner>,
}

impl MemoryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls of `op` fail.
    pub fn fail_next(&self, op: RuntimeOp, times: usize) {
        *self.inner.lock().failures.entry(op).or_default() += times;
    }

    pub fn container(&self, handle: &ContainerHandle) -> Option<MemoryContainer> {
        self.inner.lock().containers.get(handle).cloned()
    }

    pub fn container_by_id(&self, id: &str) -> Option<MemoryContainer> {
        self.container(&ContainerHandle::new(id))
    }

    /// Containers whose name is exactly `name`.
    pub fn containers_named(&self, name: &str) -> Vec<MemoryContainer> {
        self.inner
            .lock()
            .containers
            .values()
            .filter(|c| c.spec.name == name)
            .cloned()
            .collect()
    }

    pub fn container_count(&self) -> usize {
        self.inner.lock().containers.len()
    }

    pub fn pulled_images(&self) -> Vec<String> {
        self.inner.lock().pulled.clone()
    }

    pub fn push_log(&self, handle: &ContainerHandle, line: impl Into<String>) {
        if let Some(container) = self.inner.lock().containers.get_mut(handle) {
            container.logs.push(line.into());
        }
    }

    /// Drop in-place port changes, leaving the bindings the container was
    /// created with, as a backend that forgets them across restarts would.
    pub fn reset_ports(&self, handle: &ContainerHandle) {
        if let Some(container) = self.inner.lock().containers.get_mut(handle) {
            container.ports = container.spec.ports.clone();
        }
    }
}

#[async_trait]
impl ContainerRuntime for MemoryRuntime {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        let mut inner = self.inner.lock();
        inner.take_failure(RuntimeOp::Create)?;
        if inner.containers.values().any(|c| c.spec.name == spec.name) {
            return Err(RuntimeError::CommandFailed {
                command: format!("create {}", spec.name),
                status: "exit status: 125".into(),
                stderr: format!("the container name \"{}\" is already in use", spec.name),
            });
        }
        inner.next_id += 1;
        let handle = ContainerHandle::new(format!("mem-{:06}", inner.next_id));
        debug!(container = %handle, name = %spec.name, "created in-memory container");
        inner.containers.insert(
            handle.clone(),
            MemoryContainer {
                handle: handle.clone(),
                spec: spec.clone(),
                running: false,
                ports: spec.ports.clone(),
                logs: Vec::new(),
            },
        );
        Ok(handle)
    }

    async fn start_container(&self, handle: &ContainerHandle) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.take_failure(RuntimeOp::Start)?;
        let container = inner.container_mut(handle)?;
        container.running = true;
        container.logs.push(format!("{} started", container.spec.name));
        Ok(())
    }

    async fn stop_container(&self, handle: &ContainerHandle) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.take_failure(RuntimeOp::Stop)?;
        let container = inner.container_mut(handle)?;
        if container.running {
            container.running = false;
            container.logs.push(format!("{} stopped", container.spec.name));
        }
        Ok(())
    }

    async fn remove_container(&self, handle: &ContainerHandle) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.take_failure(RuntimeOp::Remove)?;
        inner
            .containers
            .remove(handle)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound(handle.to_string()))
    }

    async fn pull_image(&self, reference: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.take_failure(RuntimeOp::Pull)?;
        inner.pulled.push(reference.to_string());
        Ok(())
    }

    async fn logs(&self, handle: &ContainerHandle, max_lines: usize) -> Result<Vec<String>> {
        let mut inner = self.inner.lock();
        inner.take_failure(RuntimeOp::Logs)?;
        let container = inner.container_mut(handle)?;
        let skip = container.logs.len().saturating_sub(max_lines);
        Ok(container.logs.iter().skip(skip).cloned().collect())
    }

    async fn published_ports(&self, handle: &ContainerHandle) -> Result<Vec<PortBinding>> {
        let mut inner = self.inner.lock();
        inner.take_failure(RuntimeOp::Inspect)?;
        Ok(inner.container_mut(handle)?.ports.clone())
    }

    async fn publish_port(&self, handle: &ContainerHandle, binding: &PortBinding) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.take_failure(RuntimeOp::Publish)?;
        let container = inner.container_mut(handle)?;
        if !container.ports.contains(binding) {
            container.ports.push(*binding);
        }
        Ok(())
    }

    async fn unpublish_port(
        &self,
        handle: &ContainerHandle,
        binding: &PortBinding,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.take_failure(RuntimeOp::Unpublish)?;
        inner.container_mut(handle)?.ports.retain(|b| b != binding);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use hearth_common::app::{Flow, NetworkMode, ResourceLimits};
    use indexmap::IndexMap;

    use super::*;

    fn spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.into(),
            image: "alpine:3.18".into(),
            env: IndexMap::new(),
            ports: vec![PortBinding {
                host_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
                host_port: 20000,
                guest_port: 80,
                flow: Flow::Tcp,
            }],
            resources: ResourceLimits::default(),
            network_mode: NetworkMode::Bridge,
            restart_policy: "on-failure".into(),
            privileged: false,
            capabilities: Vec::new(),
            mounts: Vec::new(),
            labels: IndexMap::new(),
        }
    }

    #[tokio::test]
    async fn container_lifecycle() {
        let runtime = MemoryRuntime::new();
        let handle = runtime.create_container(&spec("hearth-web")).await.unwrap();
        runtime.start_container(&handle).await.unwrap();
        assert!(runtime.container(&handle).unwrap().running);

        runtime.stop_container(&handle).await.unwrap();
        runtime.stop_container(&handle).await.unwrap();
        assert!(!runtime.container(&handle).unwrap().running);

        let logs = runtime.logs(&handle, 1).await.unwrap();
        assert_eq!(logs, vec!["hearth-web stopped".to_string()]);

        runtime.remove_container(&handle).await.unwrap();
        assert!(runtime
            .remove_container(&handle)
            .await
            .unwrap_err()
            .is_not_found());
        assert!(runtime.containers_named("hearth-web").is_empty());
    }

    #[tokio::test]
    async fn duplicate_names_rejected() {
        let runtime = MemoryRuntime::new();
        runtime.create_container(&spec("hearth-web")).await.unwrap();
        assert!(runtime.create_container(&spec("hearth-web")).await.is_err());
        assert_eq!(runtime.container_count(), 1);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let runtime = MemoryRuntime::new();
        runtime.fail_next(RuntimeOp::Pull, 1);
        assert!(runtime.pull_image("alpine:3.18").await.is_err());
        runtime.pull_image("alpine:3.18").await.unwrap();
        assert_eq!(runtime.pulled_images(), vec!["alpine:3.18".to_string()]);
    }

    #[tokio::test]
    async fn in_place_port_changes() {
        let runtime = MemoryRuntime::new();
        let handle = runtime.create_container(&spec("hearth-web")).await.unwrap();
        let extra = PortBinding {
            host_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            host_port: 20001,
            guest_port: 443,
            flow: Flow::Tcp,
        };
        runtime.publish_port(&handle, &extra).await.unwrap();
        let original = spec("x").ports[0];
        runtime.unpublish_port(&handle, &original).await.unwrap();
        assert_eq!(runtime.published_ports(&handle).await.unwrap(), vec![extra]);

        runtime.reset_ports(&handle);
        assert_eq!(runtime.published_ports(&handle).await.unwrap(), vec![original]);
    }
}
