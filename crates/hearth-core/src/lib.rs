//! ---
//! hearth_section: "01-core-functionality"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Primary orchestration and lifecycle management."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
//! Lifecycle orchestrator, leadership observer and route registration for
//! Hearth nodes.

pub mod container;
pub mod error;
pub mod image;
pub mod observer;
pub mod orchestrator;
pub mod routes;

pub use container::OrchestratorSettings;
pub use error::{LifecycleError, Result};
pub use observer::{LeadershipObserver, ObserverHandle};
pub use orchestrator::{AutostartSummary, Orchestrator, DEFAULT_LOG_LINES};
pub use routes::{AppRoute, RouteError, RouteMode, RouteRegistrar, RouteTable};
