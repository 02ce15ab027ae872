//! ---
//! hearth_section: "05-networking"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Route registration towards the request gateway."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::info;

/// Whether an app's traffic is served here or forwarded to its leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteMode {
    Local,
    Tunnel,
}

impl fmt::Display for RouteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteMode::Local => f.write_str("local"),
            RouteMode::Tunnel => f.write_str("tunnel"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppRoute {
    pub app: String,
    pub mode: RouteMode,
    /// `host:port` for local routes, the leader's address for tunnels. May be
    /// empty when unknown.
    pub target: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("gateway rejected route for '{app}': {reason}")]
    Rejected { app: String, reason: String },
}

/// Informs the request gateway where an app's traffic should go.
#[async_trait]
pub trait RouteRegistrar: Send + Sync + 'static {
    async fn register_app_route(
        &self,
        app: &str,
        mode: RouteMode,
        target: &str,
    ) -> Result<(), RouteError>;
}

/// In-process route table read by the gateway.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: RwLock<BTreeMap<String, AppRoute>>,
    history: Mutex<Vec<AppRoute>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, app: &str) -> Option<AppRoute> {
        self.routes.read().get(app).cloned()
    }

    pub fn routes(&self) -> Vec<AppRoute> {
        self.routes.read().values().cloned().collect()
    }

    /// Every registration in arrival order.
    pub fn history(&self) -> Vec<AppRoute> {
        self.history.lock().clone()
    }
}

#[async_trait]
impl RouteRegistrar for RouteTable {
    async fn register_app_route(
        &self,
        app: &str,
        mode: RouteMode,
        target: &str,
    ) -> Result<(), RouteError> {
        let route = AppRoute {
            app: app.to_owned(),
            mode,
            target: target.to_owned(),
        };
        info!(app, %mode, target, "app route registered");
        self.routes.write().insert(app.to_owned(), route.clone());
        self.history.lock().push(route);
        Ok(())
    }
}
