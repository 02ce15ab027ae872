//! ---
//! hearth_section: "15-testing-qa-runbook"
//! hearth_subsection: "integration-tests"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Leadership observer reactions to bus events."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{demoapp, Harness};
use hearth_cluster::{EventBus, LeadershipRoleChanged, LockStateChanged, ResourceKey, Role};
use hearth_common::app::AppStatus;
use hearth_core::{LeadershipObserver, LifecycleError, ObserverHandle, RouteMode, RouteTable};
use hearth_runtime::ContainerHandle;

struct Fixture {
    harness: Harness,
    bus: EventBus,
    routes: Arc<RouteTable>,
    observer: ObserverHandle,
}

fn fixture() -> Fixture {
    let harness = Harness::new();
    let bus = EventBus::new(16);
    let routes = Arc::new(RouteTable::new());
    let observer =
        LeadershipObserver::new(harness.orchestrator.clone(), routes.clone()).spawn(&bus);
    Fixture {
        harness,
        bus,
        routes,
        observer,
    }
}

async fn eventually<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn losing_app_leadership_stops_and_tunnels() {
    let f = fixture();
    let orch = &f.harness.orchestrator;
    let installed = orch.install(demoapp()).await.unwrap();
    orch.start("demoapp").await.unwrap();

    f.bus.publish_leadership(
        LeadershipRoleChanged::new(ResourceKey::app("demoapp"), Role::Follower)
            .with_leader("10.0.0.2"),
    );
    eventually(|| f.routes.route("demoapp").is_some()).await;

    let route = f.routes.route("demoapp").unwrap();
    assert_eq!(route.mode, RouteMode::Tunnel);
    assert_eq!(route.target, "10.0.0.2");
    assert_eq!(orch.get("demoapp").unwrap().status, AppStatus::Stopped);
    let container = f
        .harness
        .runtime
        .container(&ContainerHandle::new(installed.container_id))
        .unwrap();
    assert!(!container.running);

    assert!(matches!(
        orch.start("demoapp").await,
        Err(LifecycleError::NotLeader { role: Role::Follower, .. })
    ));
    f.observer.shutdown().await;
}

#[tokio::test]
async fn gaining_app_leadership_registers_local_route() {
    let f = fixture();
    f.harness.orchestrator.install(demoapp()).await.unwrap();

    f.bus
        .publish_leadership(LeadershipRoleChanged::new(ResourceKey::app("demoapp"), Role::Leader));
    eventually(|| f.routes.route("demoapp").is_some()).await;

    let route = f.routes.route("demoapp").unwrap();
    assert_eq!(route.mode, RouteMode::Local);
    assert_eq!(route.target, "127.0.0.1:20000");
    f.observer.shutdown().await;
}

#[tokio::test]
async fn follower_without_known_leader_gets_empty_target() {
    let f = fixture();
    f.harness.orchestrator.install(demoapp()).await.unwrap();

    f.bus
        .publish_leadership(LeadershipRoleChanged::new(ResourceKey::app("demoapp"), Role::Follower));
    eventually(|| f.routes.route("demoapp").is_some()).await;
    assert_eq!(f.routes.route("demoapp").unwrap().target, "");
    f.observer.shutdown().await;
}

#[tokio::test]
async fn lock_events_gate_mutations() {
    let f = fixture();
    f.bus.publish_lock(LockStateChanged { locked: true });
    eventually(|| f.harness.cluster.is_locked()).await;

    assert!(matches!(
        f.harness.orchestrator.install(demoapp()).await,
        Err(LifecycleError::Locked)
    ));

    f.bus.publish_lock(LockStateChanged { locked: false });
    eventually(|| !f.harness.cluster.is_locked()).await;
    f.harness.orchestrator.install(demoapp()).await.unwrap();
    f.observer.shutdown().await;
}

#[tokio::test]
async fn control_plane_follower_leaves_apps_running() {
    let f = fixture();
    let orch = &f.harness.orchestrator;
    orch.install(demoapp()).await.unwrap();
    orch.start("demoapp").await.unwrap();

    f.bus.publish_leadership(
        LeadershipRoleChanged::new(ResourceKey::ControlPlane, Role::Follower).with_leader("node-b"),
    );
    eventually(|| f.harness.cluster.role(&ResourceKey::ControlPlane) == Role::Follower).await;

    assert_eq!(orch.get("demoapp").unwrap().status, AppStatus::Running);
    assert!(f.routes.routes().is_empty());
    f.observer.shutdown().await;
}

#[tokio::test]
async fn stop_failure_on_demotion_still_registers_tunnel() {
    let f = fixture();
    f.bus
        .publish_leadership(LeadershipRoleChanged::new(ResourceKey::app("ghost"), Role::Follower).with_leader("node-b"));
    eventually(|| f.routes.route("ghost").is_some()).await;
    assert_eq!(f.routes.route("ghost").unwrap().mode, RouteMode::Tunnel);
    f.observer.shutdown().await;
}

#[tokio::test]
async fn leading_an_uninstalled_app_registers_no_route() {
    let f = fixture();
    f.harness.orchestrator.install(demoapp()).await.unwrap();

    f.bus
        .publish_leadership(LeadershipRoleChanged::new(ResourceKey::app("ghost"), Role::Leader));
    f.bus
        .publish_leadership(LeadershipRoleChanged::new(ResourceKey::app("demoapp"), Role::Leader));
    eventually(|| f.routes.route("demoapp").is_some()).await;

    assert!(f.routes.route("ghost").is_none());
    assert_eq!(f.harness.cluster.role(&ResourceKey::app("ghost")), Role::Leader);
    assert_eq!(f.routes.history().len(), 1);
    f.observer.shutdown().await;
}

#[tokio::test]
async fn observer_exits_on_shutdown_and_on_bus_drop() {
    let f = fixture();
    f.observer.shutdown().await;

    let harness = Harness::new();
    let bus = EventBus::new(4);
    let handle = LeadershipObserver::new(harness.orchestrator.clone(), Arc::new(RouteTable::new()))
        .spawn(&bus);
    drop(bus);
    eventually(|| handle.is_finished()).await;
}
