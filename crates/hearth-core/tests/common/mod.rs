//! ---
//! hearth_section: "15-testing-qa-runbook"
//! hearth_subsection: "integration-tests"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Shared fixtures for orchestrator integration tests."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use hearth_cluster::ClusterState;
use hearth_common::app::{AppDefinition, Listener};
use hearth_core::{Orchestrator, OrchestratorSettings};
use hearth_runtime::MemoryRuntime;
use hearth_services::ServiceAllocator;
use hearth_store::StateStore;
use tempfile::TempDir;

pub const PORT_RANGE_START: u16 = 20_000;

pub struct Harness {
    pub dir: TempDir,
    pub runtime: Arc<MemoryRuntime>,
    pub cluster: Arc<ClusterState>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    /// Unlocked node leading its control plane.
    pub fn new() -> Self {
        Self::with_cluster(ClusterState::standalone("node-test"))
    }

    pub fn with_cluster(cluster: ClusterState) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let runtime = Arc::new(MemoryRuntime::new());
        let cluster = Arc::new(cluster);
        let orchestrator = build(&dir, runtime.clone(), cluster.clone());
        Self {
            dir,
            runtime,
            cluster,
            orchestrator,
        }
    }

    /// Fresh store and allocator over the same directory and runtime, as after
    /// a daemon restart.
    pub fn reopen(&self) -> Arc<Orchestrator> {
        build(&self.dir, self.runtime.clone(), self.cluster.clone())
    }
}

fn build(dir: &TempDir, runtime: Arc<MemoryRuntime>, cluster: Arc<ClusterState>) -> Arc<Orchestrator> {
    let store = Arc::new(StateStore::open(dir.path(), 5).expect("open store"));
    let services = Arc::new(ServiceAllocator::new(
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        PORT_RANGE_START..=PORT_RANGE_START + 99,
    ));
    Arc::new(Orchestrator::new(
        store,
        services,
        runtime,
        cluster,
        OrchestratorSettings::for_state_dir(dir.path()),
    ))
}

pub fn demoapp() -> AppDefinition {
    AppDefinition::new("demoapp", "alpine:3.18").with_listener(Listener::new("web", 80))
}
