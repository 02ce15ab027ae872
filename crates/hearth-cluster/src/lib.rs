//! ---
//! hearth_section: "07-cluster-coordination"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Leadership roles, lock flag and cluster event distribution."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
//! Observed cluster state for a Hearth node.
//!
//! Leadership and the administrative lock are computed elsewhere in the fleet;
//! this crate only holds what has been observed so far and fans events out to
//! in-process subscribers.

mod bus;
mod resource;
mod state;

pub use bus::{EventBus, LeadershipRoleChanged, LockStateChanged, Subscriptions};
pub use resource::{ParseResourceKeyError, ResourceKey, Role};
pub use state::{ClusterSnapshot, ClusterState, GateError, RoleRecord};
