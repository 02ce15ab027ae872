//! ---
//! hearth_section: "05-networking"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Service endpoint allocation and listener reconciliation."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::ops::RangeInclusive;

use hearth_common::app::{Listener, PortBinding, ServiceEndpoint};
use hearth_common::config::ServicesConfig;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::reconcile::{diff, ReconcilePlan};
use crate::{Result, ServiceError};

#[derive(Debug, Default)]
struct AllocatorInner {
    /// host port -> owning app
    reserved: BTreeMap<u16, String>,
    live: HashMap<String, Vec<ServiceEndpoint>>,
}

impl AllocatorInner {
    fn next_free(&self, range: &RangeInclusive<u16>) -> Option<u16> {
        range.clone().find(|port| !self.reserved.contains_key(port))
    }

    fn unreserve(&mut self, app: &str, port: u16) {
        if self.reserved.get(&port).map(String::as_str) == Some(app) {
            self.reserved.remove(&port);
        }
    }
}

/// Concrete runtime changes produced by [`ServiceAllocator::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedChanges {
    pub published: Vec<ServiceEndpoint>,
    pub unpublished: Vec<ServiceEndpoint>,
    /// (previous, replacement) pairs sharing a host port.
    pub remapped: Vec<(ServiceEndpoint, ServiceEndpoint)>,
}

impl AppliedChanges {
    pub fn is_empty(&self) -> bool {
        self.published.is_empty() && self.unpublished.is_empty() && self.remapped.is_empty()
    }
}

/// Allocates node-unique host ports for app listeners.
#[derive(Debug)]
pub struct ServiceAllocator {
    bind_address: IpAddr,
    range: RangeInclusive<u16>,
    inner: Mutex<AllocatorInner>,
}

impl ServiceAllocator {
    pub fn new(bind_address: IpAddr, range: RangeInclusive<u16>) -> Self {
        Self {
            bind_address,
            range,
            inner: Mutex::new(AllocatorInner::default()),
        }
    }

    pub fn from_config(config: &ServicesConfig) -> Self {
        Self::new(
            config.bind_address,
            config.port_range_start..=config.port_range_end,
        )
    }

    pub fn bind_address(&self) -> IpAddr {
        self.bind_address
    }

    fn exhausted(&self, app: &str) -> ServiceError {
        ServiceError::Exhausted {
            app: app.to_owned(),
            start: *self.range.start(),
            end: *self.range.end(),
        }
    }

    fn endpoint_for(&self, app: &str, listener: &Listener, host_port: u16) -> ServiceEndpoint {
        ServiceEndpoint {
            app: app.to_owned(),
            listener: listener.name.clone(),
            host_address: self.bind_address,
            host_port,
            guest_port: listener.port,
            flow: listener.flow,
            protocol: listener.protocol,
        }
    }

    /// Seed reservations from persisted endpoints without tracking them live.
    pub fn reserve(&self, app: &str, endpoints: &[ServiceEndpoint]) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some((port, owner)) = endpoints.iter().find_map(|ep| {
            inner
                .reserved
                .get(&ep.host_port)
                .filter(|owner| owner.as_str() != app)
                .map(|owner| (ep.host_port, owner.clone()))
        }) {
            return Err(ServiceError::PortConflict { port, owner });
        }
        for ep in endpoints {
            inner.reserved.insert(ep.host_port, app.to_owned());
        }
        debug!(app, ports = endpoints.len(), "service ports reserved");
        Ok(())
    }

    /// Allocate a host port for every listener and start tracking them.
    pub fn allocate(&self, app: &str, listeners: &[Listener]) -> Result<Vec<ServiceEndpoint>> {
        let mut inner = self.inner.lock();
        let mut endpoints: Vec<ServiceEndpoint> = Vec::with_capacity(listeners.len());
        for listener in listeners {
            let Some(port) = inner.next_free(&self.range) else {
                for ep in &endpoints {
                    inner.reserved.remove(&ep.host_port);
                }
                warn!(app, listener = %listener.name, "service port range exhausted");
                return Err(self.exhausted(app));
            };
            inner.reserved.insert(port, app.to_owned());
            endpoints.push(self.endpoint_for(app, listener, port));
        }
        inner.live.insert(app.to_owned(), endpoints.clone());
        info!(app, endpoints = endpoints.len(), "service endpoints allocated");
        Ok(endpoints)
    }

    /// Start tracking `endpoints` for `app`, reserving their host ports.
    pub fn track(&self, app: &str, endpoints: Vec<ServiceEndpoint>) {
        let mut inner = self.inner.lock();
        for ep in &endpoints {
            if let Some(owner) = inner.reserved.insert(ep.host_port, app.to_owned()) {
                if owner != app {
                    warn!(app, port = ep.host_port, previous_owner = %owner, "host port reassigned");
                }
            }
        }
        inner.live.insert(app.to_owned(), endpoints);
    }

    pub fn is_tracked(&self, app: &str) -> bool {
        self.inner.lock().live.contains_key(app)
    }

    pub fn endpoints(&self, app: &str) -> Option<Vec<ServiceEndpoint>> {
        self.inner.lock().live.get(app).cloned()
    }

    /// Drop live bookkeeping; host ports stay reserved for the next start.
    pub fn teardown(&self, app: &str) -> Option<Vec<ServiceEndpoint>> {
        let removed = self.inner.lock().live.remove(app);
        if removed.is_some() {
            debug!(app, "service bookkeeping torn down");
        }
        removed
    }

    /// Drop live bookkeeping and every reservation owned by `app`.
    pub fn release(&self, app: &str) {
        let mut inner = self.inner.lock();
        inner.live.remove(app);
        inner.reserved.retain(|_, owner| owner != app);
        debug!(app, "service ports released");
    }

    /// Diff the tracked endpoints of `app` against `listeners`.
    pub fn reconcile(&self, app: &str, listeners: &[Listener]) -> Result<ReconcilePlan> {
        let inner = self.inner.lock();
        let current = inner
            .live
            .get(app)
            .ok_or_else(|| ServiceError::NotTracked(app.to_owned()))?;
        Ok(diff(current, listeners))
    }

    /// Apply `plan` to the bookkeeping of `app`. Host ports for added listeners
    /// are allocated first so an exhausted range leaves everything untouched.
    pub fn apply(&self, app: &str, plan: &ReconcilePlan) -> Result<AppliedChanges> {
        let mut inner = self.inner.lock();
        if !inner.live.contains_key(app) {
            return Err(ServiceError::NotTracked(app.to_owned()));
        }

        let mut changes = AppliedChanges::default();
        for listener in &plan.added {
            let Some(port) = inner.next_free(&self.range) else {
                for ep in &changes.published {
                    inner.reserved.remove(&ep.host_port);
                }
                return Err(self.exhausted(app));
            };
            inner.reserved.insert(port, app.to_owned());
            changes.published.push(self.endpoint_for(app, listener, port));
        }

        for ep in &plan.removed {
            inner.unreserve(app, ep.host_port);
        }

        let mut current = inner.live.remove(app).unwrap_or_default();
        current.retain(|ep| {
            let gone = plan.removed.iter().any(|r| r.listener == ep.listener);
            if gone {
                changes.unpublished.push(ep.clone());
            }
            !gone
        });
        for change in &plan.guest_port_changed {
            if let Some(ep) = current
                .iter_mut()
                .find(|ep| ep.listener == change.previous.listener)
            {
                let previous = ep.clone();
                ep.guest_port = change.listener.port;
                ep.flow = change.listener.flow;
                ep.protocol = change.listener.protocol;
                changes.remapped.push((previous, ep.clone()));
            }
        }
        current.extend(changes.published.iter().cloned());
        inner.live.insert(app.to_owned(), current);

        info!(
            app,
            published = changes.published.len(),
            unpublished = changes.unpublished.len(),
            remapped = changes.remapped.len(),
            "service endpoints reconciled"
        );
        Ok(changes)
    }

    /// Undo an [`apply`](Self::apply) whose runtime side failed: live
    /// bookkeeping returns to `previous` and reservations follow it.
    pub fn rollback(&self, app: &str, previous: Vec<ServiceEndpoint>, changes: &AppliedChanges) {
        let mut inner = self.inner.lock();
        for ep in &changes.published {
            inner.unreserve(app, ep.host_port);
        }
        for ep in &changes.unpublished {
            if let Some(owner) = inner.reserved.insert(ep.host_port, app.to_owned()) {
                if owner != app {
                    warn!(app, port = ep.host_port, previous_owner = %owner, "host port reclaimed on rollback");
                }
            }
        }
        inner.live.insert(app.to_owned(), previous);
        info!(
            app,
            published = changes.published.len(),
            unpublished = changes.unpublished.len(),
            remapped = changes.remapped.len(),
            "service reconciliation rolled back"
        );
    }

    /// Rebuild bookkeeping for `app` from the ports the runtime actually
    /// publishes. Listener names are recovered by guest port and flow.
    /// Returns the number of endpoints now tracked; zero tears bookkeeping down.
    pub fn restore_from_published(
        &self,
        app: &str,
        published: &[PortBinding],
        listeners: &[Listener],
    ) -> usize {
        if published.is_empty() {
            self.teardown(app);
            info!(app, "no published ports; service bookkeeping cleared");
            return 0;
        }
        let endpoints: Vec<ServiceEndpoint> = published
            .iter()
            .map(|binding| {
                let listener = listeners
                    .iter()
                    .find(|l| l.port == binding.guest_port && l.flow == binding.flow);
                ServiceEndpoint {
                    app: app.to_owned(),
                    listener: listener
                        .map(|l| l.name.clone())
                        .unwrap_or_else(|| format!("port-{}", binding.guest_port)),
                    host_address: binding.host_address,
                    host_port: binding.host_port,
                    guest_port: binding.guest_port,
                    flow: binding.flow,
                    protocol: listener.map(|l| l.protocol).unwrap_or_default(),
                }
            })
            .collect();
        let count = endpoints.len();
        self.track(app, endpoints);
        info!(app, endpoints = count, "service bookkeeping restored from runtime");
        count
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use hearth_common::app::Flow;

    use super::*;

    fn allocator(range: RangeInclusive<u16>) -> ServiceAllocator {
        ServiceAllocator::new(IpAddr::V4(Ipv4Addr::LOCALHOST), range)
    }

    #[test]
    fn host_ports_are_unique_across_apps() {
        let alloc = allocator(20000..=20010);
        let a = alloc
            .allocate("alpha", &[Listener::new("web", 80), Listener::new("api", 8080)])
            .unwrap();
        let b = alloc.allocate("beta", &[Listener::new("web", 80)]).unwrap();
        let mut ports: Vec<u16> = a.iter().chain(b.iter()).map(|ep| ep.host_port).collect();
        ports.sort_unstable();
        ports.dedup();
        assert_eq!(ports, vec![20000, 20001, 20002]);
    }

    #[test]
    fn exhaustion_rolls_back_partial_allocation() {
        let alloc = allocator(20000..=20001);
        let err = alloc
            .allocate(
                "alpha",
                &[
                    Listener::new("a", 1),
                    Listener::new("b", 2),
                    Listener::new("c", 3),
                ],
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::Exhausted { .. }));
        assert!(!alloc.is_tracked("alpha"));
        assert_eq!(alloc.allocate("beta", &[Listener::new("web", 80)]).unwrap()[0].host_port, 20000);
    }

    #[test]
    fn teardown_keeps_reservation_release_frees_it() {
        let alloc = allocator(20000..=20000);
        alloc.allocate("alpha", &[Listener::new("web", 80)]).unwrap();
        alloc.teardown("alpha");
        assert!(!alloc.is_tracked("alpha"));
        assert!(alloc.allocate("beta", &[Listener::new("web", 80)]).is_err());

        alloc.release("alpha");
        assert!(alloc.allocate("beta", &[Listener::new("web", 80)]).is_ok());
    }

    #[test]
    fn reserve_detects_conflicts() {
        let alloc = allocator(20000..=20010);
        let eps = alloc.allocate("alpha", &[Listener::new("web", 80)]).unwrap();
        let err = alloc.reserve("beta", &eps).unwrap_err();
        assert_eq!(
            err,
            ServiceError::PortConflict {
                port: 20000,
                owner: "alpha".into()
            }
        );
        alloc.reserve("alpha", &eps).expect("same owner may re-reserve");
    }

    #[test]
    fn apply_publishes_added_and_unpublishes_removed() {
        let alloc = allocator(20000..=20010);
        alloc
            .allocate("alpha", &[Listener::new("web", 80), Listener::new("metrics", 9100)])
            .unwrap();

        let desired = [Listener::new("web", 8080), Listener::new("admin", 8443)];
        let plan = alloc.reconcile("alpha", &desired).unwrap();
        let changes = alloc.apply("alpha", &plan).unwrap();

        assert_eq!(changes.published.len(), 1);
        assert_eq!(changes.published[0].listener, "admin");
        assert_eq!(changes.published[0].host_port, 20002);
        assert_eq!(changes.unpublished.len(), 1);
        assert_eq!(changes.unpublished[0].listener, "metrics");
        assert_eq!(changes.remapped.len(), 1);
        assert_eq!(changes.remapped[0].0.guest_port, 80);
        assert_eq!(changes.remapped[0].1.guest_port, 8080);
        assert_eq!(changes.remapped[0].1.host_port, 20000);

        let tracked = alloc.endpoints("alpha").unwrap();
        assert_eq!(tracked.len(), 2);
        assert!(alloc.reconcile("alpha", &desired).unwrap().is_empty());

        // the removed listener's host port is free again
        let other = alloc.allocate("beta", &[Listener::new("web", 80)]).unwrap();
        assert_eq!(other[0].host_port, 20001);
    }

    #[test]
    fn rollback_restores_endpoints_and_reservations() {
        let alloc = allocator(20000..=20010);
        let before = alloc
            .allocate("alpha", &[Listener::new("web", 80), Listener::new("metrics", 9100)])
            .unwrap();

        let desired = [Listener::new("web", 8080), Listener::new("admin", 8443)];
        let plan = alloc.reconcile("alpha", &desired).unwrap();
        let changes = alloc.apply("alpha", &plan).unwrap();
        alloc.rollback("alpha", before.clone(), &changes);

        assert_eq!(alloc.endpoints("alpha").unwrap(), before);
        let again = alloc.reconcile("alpha", &desired).unwrap();
        assert_eq!(again.added.len(), 1);
        assert_eq!(again.removed.len(), 1);

        // metrics keeps 20001; admin's 20002 is free again
        let other = alloc.allocate("beta", &[Listener::new("web", 80)]).unwrap();
        assert_eq!(other[0].host_port, 20002);
    }

    #[test]
    fn reconcile_requires_tracking() {
        let alloc = allocator(20000..=20010);
        assert_eq!(
            alloc.reconcile("ghost", &[]).unwrap_err(),
            ServiceError::NotTracked("ghost".into())
        );
    }

    #[test]
    fn restore_recovers_listener_names_from_published_ports() {
        let alloc = allocator(20000..=20010);
        let listeners = [Listener::new("web", 80), Listener::new("dns", 53).with_flow(Flow::Udp)];
        let published = [
            PortBinding {
                host_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
                host_port: 20005,
                guest_port: 80,
                flow: Flow::Tcp,
            },
            PortBinding {
                host_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
                host_port: 20006,
                guest_port: 9000,
                flow: Flow::Tcp,
            },
        ];
        assert_eq!(alloc.restore_from_published("alpha", &published, &listeners), 2);
        let tracked = alloc.endpoints("alpha").unwrap();
        assert_eq!(tracked[0].listener, "web");
        assert_eq!(tracked[1].listener, "port-9000");

        assert_eq!(alloc.restore_from_published("alpha", &[], &listeners), 0);
        assert!(!alloc.is_tracked("alpha"));
    }
}
