//! ---
//! hearth_section: "07-cluster-coordination"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Gating state derived from leadership and lock events."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hearth_common::config::ClusterConfig;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::resource::{ResourceKey, Role};

/// Why a mutation was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("node is locked")]
    Locked,
    #[error("not leader for {resource} (role {role})")]
    NotLeader { resource: ResourceKey, role: Role },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoleRecord {
    pub role: Role,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug)]
struct StateInner {
    locked: bool,
    roles: BTreeMap<ResourceKey, RoleRecord>,
}

/// Point-in-time copy of the observed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterSnapshot {
    pub node_id: String,
    pub locked: bool,
    pub roles: BTreeMap<ResourceKey, RoleRecord>,
}

/// Lock flag and per-resource roles as last observed.
///
/// Starts locked with every role unknown. Writers are the event observer;
/// readers are the gating checks.
#[derive(Debug)]
pub struct ClusterState {
    node_id: String,
    inner: RwLock<StateInner>,
}

impl ClusterState {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            inner: RwLock::new(StateInner {
                locked: true,
                roles: BTreeMap::new(),
            }),
        }
    }

    /// Unlocked, with this node leading the control plane.
    pub fn standalone(node_id: impl Into<String>) -> Self {
        let state = Self::new(node_id);
        {
            let mut inner = state.inner.write();
            inner.locked = false;
            inner.roles.insert(
                ResourceKey::ControlPlane,
                RoleRecord {
                    role: Role::Leader,
                    changed_at: Utc::now(),
                },
            );
        }
        state
    }

    pub fn from_config(config: &ClusterConfig) -> Self {
        if config.standalone {
            info!(node = %config.node_id, "standalone mode: control plane leader, unlocked");
            Self::standalone(config.node_id.clone())
        } else {
            Self::new(config.node_id.clone())
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn is_locked(&self) -> bool {
        self.inner.read().locked
    }

    /// Returns the previous value.
    pub fn set_locked(&self, locked: bool) -> bool {
        let mut inner = self.inner.write();
        let previous = std::mem::replace(&mut inner.locked, locked);
        if previous != locked {
            info!(node = %self.node_id, locked, "lock state changed");
        }
        previous
    }

    pub fn role(&self, resource: &ResourceKey) -> Role {
        self.inner
            .read()
            .roles
            .get(resource)
            .map(|record| record.role)
            .unwrap_or_default()
    }

    /// Whether any event has been observed for `resource`.
    pub fn has_role(&self, resource: &ResourceKey) -> bool {
        self.inner.read().roles.contains_key(resource)
    }

    /// Returns the previous role.
    pub fn set_role(&self, resource: ResourceKey, role: Role) -> Role {
        let mut inner = self.inner.write();
        let previous = inner
            .roles
            .insert(
                resource.clone(),
                RoleRecord {
                    role,
                    changed_at: Utc::now(),
                },
            )
            .map(|record| record.role)
            .unwrap_or_default();
        debug!(node = %self.node_id, %resource, from = %previous, to = %role, "role updated");
        previous
    }

    /// Lock first, then leadership of `resource`.
    pub fn check(&self, resource: &ResourceKey) -> Result<(), GateError> {
        let inner = self.inner.read();
        Self::check_locked(&inner, resource)
    }

    /// Resource that gates mutations of `app`: its own key once observed,
    /// otherwise the control plane.
    pub fn gate_resource_for(&self, app: &str) -> ResourceKey {
        let inner = self.inner.read();
        Self::app_gate(&inner, app)
    }

    pub fn check_app(&self, app: &str) -> Result<(), GateError> {
        let inner = self.inner.read();
        let resource = Self::app_gate(&inner, app);
        Self::check_locked(&inner, &resource)
    }

    pub fn snapshot(&self) -> ClusterSnapshot {
        let inner = self.inner.read();
        ClusterSnapshot {
            node_id: self.node_id.clone(),
            locked: inner.locked,
            roles: inner.roles.clone(),
        }
    }

    fn app_gate(inner: &StateInner, app: &str) -> ResourceKey {
        let key = ResourceKey::app(app);
        if inner.roles.contains_key(&key) {
            key
        } else {
            ResourceKey::ControlPlane
        }
    }

    fn check_locked(inner: &StateInner, resource: &ResourceKey) -> Result<(), GateError> {
        if inner.locked {
            return Err(GateError::Locked);
        }
        let role = inner
            .roles
            .get(resource)
            .map(|record| record.role)
            .unwrap_or_default();
        if role != Role::Leader {
            return Err(GateError::NotLeader {
                resource: resource.clone(),
                role,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_locked_and_unknown() {
        let state = ClusterState::new("node-a");
        assert!(state.is_locked());
        assert_eq!(state.role(&ResourceKey::ControlPlane), Role::Unknown);
        assert_eq!(state.check(&ResourceKey::ControlPlane), Err(GateError::Locked));
    }

    #[test]
    fn lock_is_checked_before_leadership() {
        let state = ClusterState::standalone("node-a");
        assert!(state.check(&ResourceKey::ControlPlane).is_ok());
        state.set_locked(true);
        assert_eq!(state.check(&ResourceKey::ControlPlane), Err(GateError::Locked));
    }

    #[test]
    fn only_leader_passes() {
        let state = ClusterState::new("node-a");
        state.set_locked(false);
        assert!(matches!(
            state.check(&ResourceKey::ControlPlane),
            Err(GateError::NotLeader { role: Role::Unknown, .. })
        ));
        state.set_role(ResourceKey::ControlPlane, Role::Follower);
        assert!(matches!(
            state.check(&ResourceKey::ControlPlane),
            Err(GateError::NotLeader { role: Role::Follower, .. })
        ));
    }

    #[test]
    fn app_gate_falls_back_to_control_plane() {
        let state = ClusterState::standalone("node-a");
        assert_eq!(state.gate_resource_for("notes"), ResourceKey::ControlPlane);
        assert!(state.check_app("notes").is_ok());

        let previous = state.set_role(ResourceKey::app("notes"), Role::Follower);
        assert_eq!(previous, Role::Unknown);
        assert_eq!(state.gate_resource_for("notes"), ResourceKey::app("notes"));
        assert!(state.check_app("notes").is_err());
        assert!(state.check_app("other").is_ok());

        let snapshot = state.snapshot();
        assert!(!snapshot.locked);
        assert_eq!(snapshot.roles.len(), 2);
    }
}
