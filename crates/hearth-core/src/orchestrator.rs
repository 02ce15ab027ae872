//! ---
//! hearth_section: "01-core-functionality"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Primary orchestration and app lifecycle management."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use hearth_cluster::{ClusterState, ResourceKey};
use hearth_common::app::{AppDefinition, AppInstance, AppStatus, PortBinding, ServiceEndpoint};
use hearth_common::validation::ValidationError;
use hearth_metrics::{LifecycleMetrics, Outcome};
use hearth_runtime::{ContainerHandle, ContainerRuntime};
use hearth_services::{AppliedChanges, ServiceAllocator};
use hearth_store::{AppRecord, StateStore};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::container::OrchestratorSettings;
use crate::error::{LifecycleError, Result};
use crate::image::{retag, DEFAULT_TAG};

/// Lines returned by [`Orchestrator::logs`] when the caller asks for none.
pub const DEFAULT_LOG_LINES: usize = 200;

/// Result of starting enabled apps at boot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AutostartSummary {
    pub started: Vec<String>,
    /// Refused by the lock or leadership gate.
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

/// Turns app manifests into containers and keeps store, allocator and runtime
/// consistent. One instance per process, shared behind an `Arc`.
pub struct Orchestrator {
    store: Arc<StateStore>,
    services: Arc<ServiceAllocator>,
    runtime: Arc<dyn ContainerRuntime>,
    cluster: Arc<ClusterState>,
    settings: OrchestratorSettings,
    metrics: Option<LifecycleMetrics>,
    installing: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("runtime", &self.runtime.name())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Claim on an app name for the duration of an install.
struct InstallClaim<'a> {
    names: &'a Mutex<HashSet<String>>,
    name: String,
}

impl Drop for InstallClaim<'_> {
    fn drop(&mut self) {
        self.names.lock().remove(&self.name);
    }
}

impl Orchestrator {
    /// Build an orchestrator over existing components. Host ports recorded in
    /// the store are reserved so new allocations never collide with them.
    pub fn new(
        store: Arc<StateStore>,
        services: Arc<ServiceAllocator>,
        runtime: Arc<dyn ContainerRuntime>,
        cluster: Arc<ClusterState>,
        settings: OrchestratorSettings,
    ) -> Self {
        for record in store.list() {
            if let Err(err) = services.reserve(&record.definition.name, &record.instance.endpoints)
            {
                warn!(app = %record.definition.name, error = %err, "persisted service ports conflict");
            }
        }
        info!(
            apps = store.list().len(),
            runtime = runtime.name(),
            "orchestrator initialised"
        );
        Self {
            store,
            services,
            runtime,
            cluster,
            settings,
            metrics: None,
            installing: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: LifecycleMetrics) -> Self {
        metrics.set_installed_apps(self.store.list().len());
        self.metrics = Some(metrics);
        self
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn services(&self) -> &Arc<ServiceAllocator> {
        &self.services
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    pub fn cluster(&self) -> &Arc<ClusterState> {
        &self.cluster
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn metrics(&self) -> Option<&LifecycleMetrics> {
        self.metrics.as_ref()
    }

    /// Validate and create a new app. The container is left in `created`.
    pub async fn install(&self, definition: AppDefinition) -> Result<AppInstance> {
        self.observe("install", self.install_inner(definition)).await
    }

    /// Install, or reconcile listeners of an existing app in place.
    pub async fn upsert(&self, definition: AppDefinition) -> Result<AppInstance> {
        self.observe("upsert", self.upsert_inner(definition)).await
    }

    pub fn list(&self) -> Vec<AppInstance> {
        self.store.list().into_iter().map(|r| r.instance).collect()
    }

    pub fn get(&self, name: &str) -> Result<AppInstance> {
        self.store
            .instance(name)
            .ok_or_else(|| LifecycleError::NotFound(name.to_owned()))
    }

    /// Manifest as currently stored.
    pub fn manifest(&self, name: &str) -> Result<AppDefinition> {
        self.store
            .definition(name)
            .ok_or_else(|| LifecycleError::NotFound(name.to_owned()))
    }

    pub async fn start(&self, name: &str) -> Result<AppInstance> {
        self.observe("start", async {
            self.cluster.check_app(name)?;
            self.start_inner(name).await
        })
        .await
    }

    pub async fn stop(&self, name: &str) -> Result<AppInstance> {
        self.observe("stop", async {
            self.cluster.check_app(name)?;
            self.stop_inner(name).await
        })
        .await
    }

    /// Stop without consulting the gate. Used when this node loses leadership
    /// of the app.
    pub async fn stop_local(&self, name: &str) -> Result<AppInstance> {
        self.observe("stop_local", self.stop_inner(name)).await
    }

    pub async fn uninstall(&self, name: &str, purge: bool) -> Result<()> {
        self.observe("uninstall", self.uninstall_inner(name, purge))
            .await
    }

    pub async fn enable(&self, name: &str) -> Result<()> {
        self.observe("enable", async {
            self.cluster.check_app(name)?;
            self.store.enable(name)?;
            info!(app = name, "app enabled at boot");
            Ok::<_, LifecycleError>(())
        })
        .await
    }

    pub async fn disable(&self, name: &str) -> Result<()> {
        self.observe("disable", async {
            self.cluster.check_app(name)?;
            self.store.disable(name)?;
            info!(app = name, "app disabled at boot");
            Ok::<_, LifecycleError>(())
        })
        .await
    }

    pub fn is_enabled(&self, name: &str) -> Result<bool> {
        Ok(self.store.is_enabled(name)?)
    }

    pub fn list_enabled(&self) -> Vec<String> {
        self.store.list_enabled()
    }

    /// Move the app to another tag of its image. `None` means `latest`.
    pub async fn update_image(&self, name: &str, tag: Option<&str>) -> Result<AppInstance> {
        self.observe("update_image", self.update_image_inner(name, tag))
            .await
    }

    /// Recreate the app from its most recent manifest backup.
    pub async fn revert(&self, name: &str) -> Result<AppInstance> {
        self.observe("revert", self.revert_inner(name)).await
    }

    /// Tail of the container log. `lines <= 0` returns the default amount.
    pub async fn logs(&self, name: &str, lines: i64) -> Result<Vec<String>> {
        let instance = self.get(name)?;
        let max_lines = usize::try_from(lines)
            .ok()
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_LOG_LINES);
        self.runtime
            .logs(&ContainerHandle::new(instance.container_id), max_lines)
            .await
            .map_err(LifecycleError::runtime(name, "logs"))
    }

    /// Start every app marked enabled. Failures are logged and reported,
    /// never propagated.
    pub async fn autostart_enabled(&self) -> AutostartSummary {
        let mut summary = AutostartSummary::default();
        for name in self.store.list_enabled() {
            match self.start(&name).await {
                Ok(_) => summary.started.push(name),
                Err(err) if err.is_gate() => {
                    info!(app = %name, reason = %err, "autostart deferred by gate");
                    summary.skipped.push(name);
                }
                Err(err) => {
                    warn!(app = %name, error = %err, "autostart failed");
                    summary.failed.push(name);
                }
            }
        }
        info!(
            started = summary.started.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            "autostart complete"
        );
        summary
    }

    /// `host:port` of the app's first endpoint, or empty when it has none.
    pub fn local_route_target(&self, name: &str) -> String {
        self.services
            .endpoints(name)
            .or_else(|| self.store.instance(name).map(|i| i.endpoints))
            .and_then(|endpoints| endpoints.first().map(ServiceEndpoint::socket_addr))
            .map(|addr| addr.to_string())
            .unwrap_or_default()
    }

    async fn observe<T, F>(&self, op: &'static str, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = operation.await;
        if let Some(metrics) = &self.metrics {
            let outcome = match &result {
                Ok(_) => Outcome::Ok,
                Err(err) if err.is_gate() => {
                    metrics.record_gate_rejection(err.kind());
                    Outcome::Rejected
                }
                Err(_) => Outcome::Failed,
            };
            metrics.record_operation(op, outcome, started.elapsed().as_secs_f64());
            metrics.set_installed_apps(self.store.list().len());
        }
        if let Err(err) = &result {
            debug!(op, error = %err, "lifecycle operation failed");
        }
        result
    }

    fn record(&self, name: &str) -> Result<AppRecord> {
        self.store
            .get(name)
            .ok_or_else(|| LifecycleError::NotFound(name.to_owned()))
    }

    fn claim(&self, name: &str) -> Result<InstallClaim<'_>> {
        let mut names = self.installing.lock();
        if !names.insert(name.to_owned()) {
            return Err(LifecycleError::AlreadyExists(name.to_owned()));
        }
        Ok(InstallClaim {
            names: &self.installing,
            name: name.to_owned(),
        })
    }

    async fn install_inner(&self, mut definition: AppDefinition) -> Result<AppInstance> {
        self.cluster.check(&ResourceKey::ControlPlane)?;
        definition.apply_defaults();
        definition.validate()?;

        let name = definition.name.clone();
        let _claim = self.claim(&name)?;
        if self.store.contains(&name) {
            return Err(LifecycleError::AlreadyExists(name));
        }

        let endpoints = self.services.allocate(&name, &definition.listeners)?;
        let handle = match self.create_container(&definition, &endpoints).await {
            Ok(handle) => handle,
            Err(err) => {
                self.services.release(&name);
                return Err(err);
            }
        };

        let instance = AppInstance::new(&definition, handle.as_str(), endpoints);
        if let Err(err) = self.store.insert(&definition, &instance) {
            warn!(app = %name, error = %err, "persisting new app failed; removing container");
            if let Err(cleanup) = self.runtime.remove_container(&handle).await {
                warn!(app = %name, container = %handle, error = %cleanup, "cleanup after failed install incomplete");
            }
            self.services.release(&name);
            return Err(err.into());
        }

        info!(
            app = %name,
            image = %instance.image,
            container = %handle,
            endpoints = instance.endpoints.len(),
            "app installed"
        );
        Ok(instance)
    }

    async fn upsert_inner(&self, mut definition: AppDefinition) -> Result<AppInstance> {
        if !self.store.contains(&definition.name) {
            return self.install_inner(definition).await;
        }
        let name = definition.name.clone();
        self.cluster.check_app(&name)?;
        definition.apply_defaults();
        definition.validate()?;
        let record = self.record(&name)?;

        let was_tracked = self.services.is_tracked(&name);
        if !was_tracked {
            self.services.track(&name, record.instance.endpoints.clone());
        }
        let outcome = self.reconcile_in_place(&name, record, &definition).await;
        if !was_tracked {
            self.services.teardown(&name);
        }
        let (instance, changes) = outcome?;

        info!(
            app = %name,
            published = changes.published.len(),
            unpublished = changes.unpublished.len(),
            remapped = changes.remapped.len(),
            "app manifest updated in place"
        );
        Ok(instance)
    }

    /// Apply the listener delta to the allocator, the container and the
    /// store. Any failure leaves all three as they were.
    async fn reconcile_in_place(
        &self,
        name: &str,
        record: AppRecord,
        definition: &AppDefinition,
    ) -> Result<(AppInstance, AppliedChanges)> {
        let previous = self.services.endpoints(name).unwrap_or_default();
        let plan = self.services.reconcile(name, &definition.listeners)?;
        if plan.requires_recreate {
            warn!(app = name, "listener flow changed; takes effect on next recreation");
        }
        let changes = self.services.apply(name, &plan)?;

        let handle = ContainerHandle::new(record.instance.container_id.clone());
        let steps = PortStep::for_changes(&changes);
        if let Err(err) = self.run_port_steps(name, &handle, &steps).await {
            self.services.rollback(name, previous, &changes);
            return Err(err);
        }

        let mut instance = record.instance;
        instance.endpoints = self.services.endpoints(name).unwrap_or_default();
        instance.touch();
        if let Err(err) = self.store.put(definition, &instance) {
            warn!(app = name, error = %err, "persisting manifest failed; reverting port changes");
            self.undo_port_steps(name, &handle, &steps).await;
            self.services.rollback(name, previous, &changes);
            return Err(err.into());
        }
        Ok((instance, changes))
    }

    /// Run `steps` in order. On failure the steps already applied are
    /// undone before the error is returned.
    async fn run_port_steps(
        &self,
        name: &str,
        handle: &ContainerHandle,
        steps: &[PortStep],
    ) -> Result<()> {
        for (done, step) in steps.iter().enumerate() {
            if let Err(err) = step.run(self.runtime.as_ref(), handle).await {
                self.undo_port_steps(name, handle, &steps[..done]).await;
                return Err(LifecycleError::runtime(name, step.op())(err));
            }
        }
        Ok(())
    }

    async fn undo_port_steps(&self, name: &str, handle: &ContainerHandle, steps: &[PortStep]) {
        for step in steps.iter().rev() {
            let inverse = step.inverse();
            if let Err(err) = inverse.run(self.runtime.as_ref(), handle).await {
                warn!(
                    app = name,
                    op = inverse.op(),
                    binding = %inverse.binding(),
                    error = %err,
                    "port change could not be undone"
                );
            }
        }
    }

    async fn start_inner(&self, name: &str) -> Result<AppInstance> {
        let record = self.record(name)?;
        let handle = ContainerHandle::new(record.instance.container_id.clone());

        if let Err(err) = self.runtime.start_container(&handle).await {
            self.mark_error(name);
            return Err(LifecycleError::runtime(name, "start")(err));
        }

        if !self.services.is_tracked(name) {
            self.rehydrate_ports(name, &handle, &record).await;
        }

        let tracked = self.services.endpoints(name);
        let instance = self.store.update_instance(name, |instance| {
            instance.status = AppStatus::Running;
            if let Some(endpoints) = tracked {
                instance.endpoints = endpoints;
            }
        })?;
        info!(app = name, container = %handle, "app started");
        Ok(instance)
    }

    /// Rebuild service bookkeeping from what the runtime publishes, first
    /// bringing the container back in line with the persisted endpoints.
    async fn rehydrate_ports(&self, name: &str, handle: &ContainerHandle, record: &AppRecord) {
        let published = match self.runtime.published_ports(handle).await {
            Ok(published) => published,
            Err(err) => {
                warn!(app = name, error = %err, "could not inspect published ports");
                return;
            }
        };
        let persisted: Vec<PortBinding> = record
            .instance
            .endpoints
            .iter()
            .map(ServiceEndpoint::binding)
            .collect();

        let steps = PortStep::converge(&published, &persisted);
        let published = if steps.is_empty() {
            published
        } else {
            match self.run_port_steps(name, handle, &steps).await {
                Ok(()) => {
                    info!(app = name, changes = steps.len(), "runtime ports realigned with metadata");
                    persisted
                }
                Err(err) => {
                    warn!(app = name, error = %err, "runtime ports differ from metadata; keeping runtime view");
                    published
                }
            }
        };
        self.services
            .restore_from_published(name, &published, &record.definition.listeners);
    }

    async fn stop_inner(&self, name: &str) -> Result<AppInstance> {
        let record = self.record(name)?;
        let handle = ContainerHandle::new(record.instance.container_id.clone());

        if let Err(err) = self.runtime.stop_container(&handle).await {
            self.mark_error(name);
            return Err(LifecycleError::runtime(name, "stop")(err));
        }
        self.services.teardown(name);
        let instance = self.store.update_status(name, AppStatus::Stopped)?;
        info!(app = name, container = %handle, "app stopped");
        Ok(instance)
    }

    async fn uninstall_inner(&self, name: &str, purge: bool) -> Result<()> {
        self.cluster.check_app(name)?;
        let record = self.record(name)?;
        let handle = ContainerHandle::new(record.instance.container_id.clone());

        if let Err(err) = self.runtime.stop_container(&handle).await {
            debug!(app = name, error = %err, "stop before uninstall failed; continuing");
        }
        match self.runtime.remove_container(&handle).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                debug!(app = name, container = %handle, "container already gone");
            }
            Err(err) => return Err(LifecycleError::runtime(name, "remove")(err)),
        }
        self.services.release(name);

        if purge {
            self.purge_storage(&record.definition).await?;
        }
        self.store.remove(name)?;
        info!(app = name, purge, "app uninstalled");
        Ok(())
    }

    async fn update_image_inner(&self, name: &str, tag: Option<&str>) -> Result<AppInstance> {
        self.cluster.check_app(name)?;
        let record = self.record(name)?;
        let current = record
            .definition
            .image
            .clone()
            .ok_or_else(|| ValidationError::MissingImage(name.to_owned()))?;

        let mut next = record.definition.clone();
        let image = retag(&current, tag.unwrap_or(DEFAULT_TAG));
        next.image = Some(image.clone());
        next.validate()?;

        self.store.backup_manifest(name)?;
        if let Err(err) = self.runtime.pull_image(&image).await {
            warn!(app = name, image = %image, error = %err, "image pull failed; using local copy if present");
        }
        let instance = self.recreate(record, next).await?;
        info!(app = name, from = %current, to = %image, "app image updated");
        Ok(instance)
    }

    async fn revert_inner(&self, name: &str) -> Result<AppInstance> {
        self.cluster.check_app(name)?;
        let record = self.record(name)?;
        let mut previous = self
            .store
            .previous_manifest(name)?
            .ok_or_else(|| LifecycleError::PreviousManifestNotFound(name.to_owned()))?;
        if previous.name != name {
            return Err(ValidationError::NameMismatch {
                expected: name.to_owned(),
                found: previous.name,
            }
            .into());
        }
        previous.apply_defaults();
        previous.validate()?;

        self.store.backup_manifest(name)?;
        let instance = self.recreate(record, previous).await?;
        info!(app = name, image = %instance.image, "app reverted to previous manifest");
        Ok(instance)
    }

    /// Replace the app's container with one built from `definition`, keeping
    /// its service endpoints. A running app is started again.
    async fn recreate(&self, record: AppRecord, definition: AppDefinition) -> Result<AppInstance> {
        let name = record.definition.name.clone();
        let old = ContainerHandle::new(record.instance.container_id.clone());
        let was_running = record.instance.status == AppStatus::Running;

        match self.runtime.stop_container(&old).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(LifecycleError::runtime(&name, "stop")(err)),
        }
        match self.runtime.remove_container(&old).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(LifecycleError::runtime(&name, "remove")(err)),
        }

        let endpoints = record.instance.endpoints.clone();
        let handle = match self.create_container(&definition, &endpoints).await {
            Ok(handle) => handle,
            Err(err) => {
                self.mark_error(&name);
                return Err(err);
            }
        };

        let mut instance = record.instance;
        instance.image = definition.effective_image();
        instance.app_type = definition.app_type();
        instance.env = definition.env.clone();
        instance.container_id = handle.to_string();
        instance.status = AppStatus::Created;
        instance.touch();

        let mut failure = None;
        if was_running {
            match self.runtime.start_container(&handle).await {
                Ok(()) => {
                    instance.status = AppStatus::Running;
                    self.services.track(&name, endpoints);
                }
                Err(err) => {
                    instance.status = AppStatus::Error;
                    failure = Some(LifecycleError::runtime(&name, "start")(err));
                }
            }
        }

        self.store.put(&definition, &instance)?;
        debug!(app = %name, old = %old, new = %handle, status = %instance.status, "container recreated");
        match failure {
            Some(err) => Err(err),
            None => Ok(instance),
        }
    }

    async fn create_container(
        &self,
        definition: &AppDefinition,
        endpoints: &[ServiceEndpoint],
    ) -> Result<ContainerHandle> {
        let spec = self.settings.container_spec(definition, endpoints);
        for mount in &spec.mounts {
            tokio::fs::create_dir_all(&mount.host_path).await?;
        }
        self.runtime
            .create_container(&spec)
            .await
            .map_err(LifecycleError::runtime(&definition.name, "create"))
    }

    async fn purge_storage(&self, definition: &AppDefinition) -> Result<()> {
        for root in self.settings.storage_roots(&definition.name) {
            match tokio::fs::remove_dir_all(&root).await {
                Ok(()) => info!(app = %definition.name, path = %root.display(), "storage purged"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        for path in self.settings.retained_host_paths(definition) {
            info!(app = %definition.name, path = %path.display(), "host path outside app storage left in place");
        }
        Ok(())
    }

    fn mark_error(&self, name: &str) {
        if let Err(err) = self.store.update_status(name, AppStatus::Error) {
            warn!(app = name, error = %err, "failed to record error status");
        }
    }
}

/// One in-place port change against a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortStep {
    Publish(PortBinding),
    Unpublish(PortBinding),
}

impl PortStep {
    /// Withdrawals come before publications so a host port freed by one
    /// listener can be taken by another.
    fn for_changes(changes: &AppliedChanges) -> Vec<PortStep> {
        let mut steps: Vec<PortStep> = changes
            .unpublished
            .iter()
            .map(|ep| PortStep::Unpublish(ep.binding()))
            .collect();
        for (previous, current) in &changes.remapped {
            steps.push(PortStep::Unpublish(previous.binding()));
            steps.push(PortStep::Publish(current.binding()));
        }
        steps.extend(changes.published.iter().map(|ep| PortStep::Publish(ep.binding())));
        steps
    }

    fn converge(actual: &[PortBinding], desired: &[PortBinding]) -> Vec<PortStep> {
        let mut steps: Vec<PortStep> = actual
            .iter()
            .filter(|binding| !desired.contains(binding))
            .map(|binding| PortStep::Unpublish(*binding))
            .collect();
        steps.extend(
            desired
                .iter()
                .filter(|binding| !actual.contains(binding))
                .map(|binding| PortStep::Publish(*binding)),
        );
        steps
    }

    fn inverse(&self) -> PortStep {
        match *self {
            PortStep::Publish(binding) => PortStep::Unpublish(binding),
            PortStep::Unpublish(binding) => PortStep::Publish(binding),
        }
    }

    fn binding(&self) -> PortBinding {
        match *self {
            PortStep::Publish(binding) | PortStep::Unpublish(binding) => binding,
        }
    }

    fn op(&self) -> &'static str {
        match self {
            PortStep::Publish(_) => "publish",
            PortStep::Unpublish(_) => "unpublish",
        }
    }

    async fn run(
        &self,
        runtime: &dyn ContainerRuntime,
        handle: &ContainerHandle,
    ) -> hearth_runtime::Result<()> {
        match self {
            PortStep::Publish(binding) => runtime.publish_port(handle, binding).await,
            PortStep::Unpublish(binding) => runtime.unpublish_port(handle, binding).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use hearth_common::app::Flow;

    use super::*;

    fn binding(host_port: u16, guest_port: u16) -> PortBinding {
        PortBinding {
            host_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            host_port,
            guest_port,
            flow: Flow::Tcp,
        }
    }

    #[test]
    fn converge_withdraws_before_publishing() {
        let actual = [binding(20000, 80), binding(20001, 9100)];
        let desired = [binding(20000, 8080), binding(20001, 9100), binding(20002, 443)];
        assert_eq!(
            PortStep::converge(&actual, &desired),
            vec![
                PortStep::Unpublish(binding(20000, 80)),
                PortStep::Publish(binding(20000, 8080)),
                PortStep::Publish(binding(20002, 443)),
            ]
        );
        assert!(PortStep::converge(&desired, &desired).is_empty());
    }

    #[test]
    fn inverse_swaps_direction() {
        let step = PortStep::Publish(binding(20000, 80));
        assert_eq!(step.inverse(), PortStep::Unpublish(binding(20000, 80)));
        assert_eq!(step.inverse().inverse(), step);
        assert_eq!(step.inverse().op(), "unpublish");
    }
}
