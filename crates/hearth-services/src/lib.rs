//! ---
//! hearth_section: "05-networking"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Service endpoint allocation and listener reconciliation."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
//! Host port allocation and listener reconciliation for installed apps.
//!
//! The allocator tracks two things: host port reservations (which survive a
//! stopped app) and live endpoint bookkeeping per app. Neither is the durable
//! source of truth; both are rebuilt from persisted metadata or from the
//! runtime's published ports.

mod allocator;
mod reconcile;

pub use allocator::{AppliedChanges, ServiceAllocator};
pub use reconcile::{diff, GuestPortChange, ReconcilePlan};

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("no free host port in {start}..={end} for app '{app}'")]
    Exhausted { app: String, start: u16, end: u16 },
    #[error("host port {port} is already reserved by app '{owner}'")]
    PortConflict { port: u16, owner: String },
    #[error("no live service bookkeeping for app '{0}'")]
    NotTracked(String),
}
