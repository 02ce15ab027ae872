//! ---
//! hearth_section: "05-networking"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Service endpoint allocation and listener reconciliation."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
use hearth_common::app::{Listener, ServiceEndpoint};

/// A listener that kept its name but moved to another guest port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestPortChange {
    pub previous: ServiceEndpoint,
    pub listener: Listener,
}

/// Delta between tracked endpoints and a new listener set.
///
/// `added`, `removed` and `guest_port_changed` are disjoint by listener name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub added: Vec<Listener>,
    pub removed: Vec<ServiceEndpoint>,
    pub guest_port_changed: Vec<GuestPortChange>,
    /// Some change cannot be applied to a live container in place.
    pub requires_recreate: bool,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.guest_port_changed.is_empty()
            && !self.requires_recreate
    }
}

/// Compare `current` endpoints against the desired `listeners`.
pub fn diff(current: &[ServiceEndpoint], listeners: &[Listener]) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();

    for listener in listeners {
        match current.iter().find(|ep| ep.listener == listener.name) {
            None => plan.added.push(listener.clone()),
            Some(existing) => {
                if existing.flow != listener.flow {
                    plan.requires_recreate = true;
                }
                if existing.guest_port != listener.port {
                    plan.guest_port_changed.push(GuestPortChange {
                        previous: existing.clone(),
                        listener: listener.clone(),
                    });
                }
            }
        }
    }

    plan.removed = current
        .iter()
        .filter(|ep| !listeners.iter().any(|l| l.name == ep.listener))
        .cloned()
        .collect();

    plan
}
