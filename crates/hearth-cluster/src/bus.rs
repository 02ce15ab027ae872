//! ---
//! hearth_section: "07-cluster-coordination"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Typed leadership and lock event topics."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
use hearth_common::config::ClusterConfig;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::resource::{ResourceKey, Role};

/// Leadership of `resource` moved; `leader` is the current leader's address
/// when known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadershipRoleChanged {
    pub resource: ResourceKey,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader: Option<String>,
}

impl LeadershipRoleChanged {
    pub fn new(resource: ResourceKey, role: Role) -> Self {
        Self {
            resource,
            role,
            leader: None,
        }
    }

    pub fn with_leader(mut self, leader: impl Into<String>) -> Self {
        self.leader = Some(leader.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStateChanged {
    pub locked: bool,
}

/// Receivers for both topics, taken together so no event published after
/// subscription is missed.
#[derive(Debug)]
pub struct Subscriptions {
    pub leadership: broadcast::Receiver<LeadershipRoleChanged>,
    pub lock: broadcast::Receiver<LockStateChanged>,
}

/// Two bounded broadcast topics with ordered per-subscriber delivery.
#[derive(Debug, Clone)]
pub struct EventBus {
    leadership: broadcast::Sender<LeadershipRoleChanged>,
    lock: broadcast::Sender<LockStateChanged>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (leadership, _) = broadcast::channel(capacity);
        let (lock, _) = broadcast::channel(capacity);
        Self { leadership, lock }
    }

    pub fn from_config(config: &ClusterConfig) -> Self {
        Self::new(config.event_capacity)
    }

    pub fn subscribe(&self) -> Subscriptions {
        Subscriptions {
            leadership: self.leadership.subscribe(),
            lock: self.lock.subscribe(),
        }
    }

    /// Number of subscribers that received the event.
    pub fn publish_leadership(&self, event: LeadershipRoleChanged) -> usize {
        match self.leadership.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                debug!(resource = %event.resource, "leadership event dropped: no subscribers");
                0
            }
        }
    }

    pub fn publish_lock(&self, event: LockStateChanged) -> usize {
        match self.lock.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!(locked = event.locked, "lock event dropped: no subscribers");
                0
            }
        }
    }
}
