//! ---
//! hearth_section: "01-core-functionality"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Shared primitives and utilities for the control plane."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
//! Shared primitives for the Hearth control-plane workspace.
//! This crate exposes configuration loading, logging, and the declarative
//! application model consumed by the store, allocator and orchestrator.

pub mod app;
pub mod config;
pub mod logging;
pub mod validation;

pub use app::{
    AppDefinition, AppInstance, AppStatus, AppType, AppProtocol, BuildSource, Flow, Listener,
    NetworkMode, Permissions, PortBinding, ResourceLimits, ServiceEndpoint, StorageKind, StorageMount,
};
pub use config::{
    AppConfig, ClusterConfig, LoggingConfig, MetricsConfig, RuntimeBackend, RuntimeConfig,
    ServicesConfig, StoreConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use validation::ValidationError;
