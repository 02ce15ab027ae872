//! ---
//! hearth_section: "07-cluster-coordination"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Background task applying leadership and lock events."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
use std::sync::Arc;

use hearth_cluster::{EventBus, LeadershipRoleChanged, LockStateChanged, ResourceKey, Role};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::orchestrator::Orchestrator;
use crate::routes::{RouteMode, RouteRegistrar};

/// Single consumer of the leadership and lock topics. It is the only writer
/// of the cluster state the orchestrator gates on.
pub struct LeadershipObserver {
    orchestrator: Arc<Orchestrator>,
    routes: Arc<dyn RouteRegistrar>,
}

impl LeadershipObserver {
    pub fn new(orchestrator: Arc<Orchestrator>, routes: Arc<dyn RouteRegistrar>) -> Self {
        Self {
            orchestrator,
            routes,
        }
    }

    /// Subscribe to `bus` and start consuming. Events published after this
    /// returns are guaranteed to be observed.
    pub fn spawn(self, bus: &EventBus) -> ObserverHandle {
        let subscriptions = bus.subscribe();
        let mut leadership = subscriptions.leadership;
        let mut lock = subscriptions.lock;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut leadership_open = true;
            let mut lock_open = true;
            while leadership_open || lock_open {
                tokio::select! {
                    biased;

                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!("leadership observer shutdown signal received");
                            break;
                        }
                    }
                    event = lock.recv(), if lock_open => match event {
                        Ok(event) => self.on_lock(event),
                        Err(RecvError::Lagged(missed)) => {
                            warn!(missed, "lock subscriber lagged; continuing with newest events");
                        }
                        Err(RecvError::Closed) => {
                            debug!("lock topic closed");
                            lock_open = false;
                        }
                    },
                    event = leadership.recv(), if leadership_open => match event {
                        Ok(event) => self.on_leadership(event).await,
                        Err(RecvError::Lagged(missed)) => {
                            warn!(missed, "leadership subscriber lagged; continuing with newest events");
                        }
                        Err(RecvError::Closed) => {
                            debug!("leadership topic closed");
                            leadership_open = false;
                        }
                    },
                }
            }
            debug!("leadership observer exited");
        });

        ObserverHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    fn on_lock(&self, event: LockStateChanged) {
        let previous = self.orchestrator.cluster().set_locked(event.locked);
        if previous != event.locked {
            info!(locked = event.locked, "node lock applied");
        }
    }

    async fn on_leadership(&self, event: LeadershipRoleChanged) {
        let previous = self
            .orchestrator
            .cluster()
            .set_role(event.resource.clone(), event.role);
        if let Some(metrics) = self.orchestrator.metrics() {
            let scope = match event.resource {
                ResourceKey::ControlPlane => "control-plane",
                ResourceKey::App(_) => "app",
            };
            metrics.record_role_change(scope, event.role.as_str());
        }
        info!(resource = %event.resource, from = %previous, to = %event.role, "leadership changed");

        let app = match &event.resource {
            ResourceKey::App(app) => app.as_str(),
            ResourceKey::ControlPlane => {
                // Per-app events alone decide which apps stop.
                debug!(role = %event.role, "control-plane role change leaves apps untouched");
                return;
            }
        };

        match event.role {
            Role::Follower => {
                if let Err(err) = self.orchestrator.stop_local(app).await {
                    warn!(app, error = %err, "failed to stop app after losing leadership");
                }
                let target = event.leader.clone().unwrap_or_default();
                self.register(app, RouteMode::Tunnel, &target).await;
            }
            Role::Leader if !self.orchestrator.store().contains(app) => {
                info!(app, "leading an app that is not installed here; no local route");
            }
            Role::Leader => {
                let target = self.orchestrator.local_route_target(app);
                self.register(app, RouteMode::Local, &target).await;
            }
            Role::Unknown => {}
        }
    }

    async fn register(&self, app: &str, mode: RouteMode, target: &str) {
        if let Err(err) = self.routes.register_app_route(app, mode, target).await {
            error!(app, %mode, error = %err, "route registration failed");
        }
    }
}

/// Handle to the running observer task.
#[derive(Debug)]
pub struct ObserverHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ObserverHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the task and wait until it has fully exited.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            error!(error = %err, "leadership observer join error");
        }
    }
}
