//! ---
//! hearth_section: "03-observability"
//! hearth_subsection: "module"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Metrics collection and export utilities."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{
    GaugeVec, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Registry shared by the daemon, the orchestrator and the exporter.
pub type SharedRegistry = Arc<Registry>;

pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Render every registered family in the Prometheus text exposition format.
pub fn render(registry: &Registry) -> Result<String> {
    TextEncoder::new()
        .encode_to_string(&registry.gather())
        .context("failed to encode metric families")
}

/// Serve `registry` at `GET /metrics` on `addr` until the returned handle
/// is shut down. Binding happens before this returns, so port 0 works.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let listener = bind_listener(addr)?;
    let bound = listener
        .local_addr()
        .context("failed to read metrics listener address")?;
    let router = Router::new()
        .route("/metrics", get(scrape))
        .with_state(registry);

    let (shutdown, signal) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = signal.await;
            })
            .await
            .context("metrics exporter stopped with an error")
    });
    info!(address = %bound, "metrics exporter listening");

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown),
        task,
    })
}

fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .context("failed to make metrics listener non-blocking")?;
    TcpListener::from_std(std_listener).context("failed to register metrics listener with tokio")
}

async fn scrape(State(registry): State<SharedRegistry>) -> Response {
    match render(&registry) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, HeaderValue::from_static(prometheus::TEXT_FORMAT))],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "metrics scrape failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error").into_response()
        }
    }
}

/// Running exporter; dropping it leaves the task detached.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting scrapes and wait for in-flight ones to finish.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.task.await.context("metrics exporter task panicked")?
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: GaugeVec,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "hearthd_starts_total",
            "Total number of times the Hearth daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "hearthd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new("hearthd_build_info", "Build metadata for the running daemon"),
            &["version", "profile", "runtime"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
            build_info,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str, profile: &str, runtime: &str) {
        self.build_info
            .with_label_values(&[version, profile, runtime])
            .set(1.0);
    }
}

/// Outcome label for a lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Rejected,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Ok => "ok",
            Outcome::Rejected => "rejected",
            Outcome::Failed => "failed",
        }
    }
}

/// Counters for orchestrator operations and cluster reactions.
#[derive(Clone, Debug)]
pub struct LifecycleMetrics {
    operations: IntCounterVec,
    operation_seconds: HistogramVec,
    gate_rejections: IntCounterVec,
    installed_apps: IntGauge,
    role_changes: IntCounterVec,
}

impl LifecycleMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let operations = IntCounterVec::new(
            Opts::new(
                "hearth_lifecycle_operations_total",
                "Lifecycle operations by operation and outcome",
            ),
            &["op", "outcome"],
        )?;
        registry.register(Box::new(operations.clone()))?;

        let operation_seconds = HistogramVec::new(
            HistogramOpts::new(
                "hearth_lifecycle_operation_seconds",
                "Wall time spent in lifecycle operations",
            ),
            &["op"],
        )?;
        registry.register(Box::new(operation_seconds.clone()))?;

        let gate_rejections = IntCounterVec::new(
            Opts::new(
                "hearth_gate_rejections_total",
                "Mutations refused by the lock or leadership gate",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(gate_rejections.clone()))?;

        let installed_apps = IntGauge::with_opts(Opts::new(
            "hearth_installed_apps",
            "Number of apps present in the state store",
        ))?;
        registry.register(Box::new(installed_apps.clone()))?;

        let role_changes = IntCounterVec::new(
            Opts::new(
                "hearth_role_changes_total",
                "Leadership events applied, by resource scope and new role",
            ),
            &["scope", "role"],
        )?;
        registry.register(Box::new(role_changes.clone()))?;

        Ok(Self {
            operations,
            operation_seconds,
            gate_rejections,
            installed_apps,
            role_changes,
        })
    }

    pub fn record_operation(&self, op: &str, outcome: Outcome, seconds: f64) {
        self.operations
            .with_label_values(&[op, outcome.as_str()])
            .inc();
        self.operation_seconds.with_label_values(&[op]).observe(seconds);
    }

    pub fn record_gate_rejection(&self, reason: &str) {
        self.gate_rejections.with_label_values(&[reason]).inc();
    }

    pub fn set_installed_apps(&self, count: usize) {
        self.installed_apps.set(count as i64);
    }

    pub fn record_role_change(&self, scope: &str, role: &str) {
        self.role_changes.with_label_values(&[scope, role]).inc();
    }
}

pub use prometheus;
