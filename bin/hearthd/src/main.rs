//! ---
//! hearth_section: "01-core-functionality"
//! hearth_subsection: "binary"
//! hearth_type: "source"
//! hearth_scope: "code"
//! hearth_description: "Binary entrypoint for the Hearth daemon."
//! hearth_version: "v0.0.0-prealpha"
//! hearth_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hearth_cluster::{ClusterState, EventBus};
use hearth_common::app::AppDefinition;
use hearth_common::config::{AppConfig, RuntimeBackend};
use hearth_common::logging::init_tracing;
use hearth_core::{LeadershipObserver, Orchestrator, OrchestratorSettings, RouteTable};
use hearth_metrics::{new_registry, spawn_http_server, DaemonMetrics, LifecycleMetrics};
use hearth_runtime::{ContainerRuntime, MemoryRuntime, PodmanRuntime};
use hearth_services::ServiceAllocator;
use hearth_store::StateStore;
use tokio::signal;
use tracing::{info, warn};

const PODMAN_OVERLAY_FILE: &str = "podman-ports.json";

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!("Hearth ", env!("CARGO_PKG_VERSION")),
    about = "Hearth node-local application lifecycle daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", env = "HEARTH_CONFIG", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "DIR", help = "Override the state directory")]
    state_dir: Option<PathBuf>,

    #[arg(long, help = "Start unlocked and leading the control plane")]
    standalone: bool,

    #[arg(long, value_enum, help = "Override the container runtime backend")]
    runtime: Option<CliRuntime>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliRuntime {
    Podman,
    Memory,
}

impl From<CliRuntime> for RuntimeBackend {
    fn from(value: CliRuntime) -> Self {
        match value {
            CliRuntime::Podman => RuntimeBackend::Podman,
            CliRuntime::Memory => RuntimeBackend::Memory,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the lifecycle daemon")]
    Run,
    #[command(about = "Check an app manifest without installing it")]
    Validate {
        #[arg(value_name = "MANIFEST")]
        manifest: PathBuf,
    },
    #[command(about = "List installed apps from the state directory")]
    List {
        #[arg(long, help = "Print JSON instead of one line per app")]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("/etc/hearth/hearthd.toml"));
    candidates.push(PathBuf::from("configs/hearthd.example.toml"));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let load_duration = load_started.elapsed();
    let mut config = loaded.config;
    if let Some(state_dir) = cli.state_dir {
        config.state_dir = state_dir;
    }
    if cli.standalone {
        config.cluster.standalone = true;
    }
    if let Some(runtime) = cli.runtime {
        config.runtime.backend = runtime.into();
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            init_tracing("hearthd", &config.logging)?;
            match &loaded.source {
                Some(path) => info!(config_path = %path.display(), "configuration loaded"),
                None => info!("configuration defaults in effect"),
            }
            run_daemon(config, load_duration.as_secs_f64()).await?
        }
        Commands::Validate { manifest } => validate_manifest(&manifest)?,
        Commands::List { json } => list_apps(&config, json)?,
    }

    Ok(())
}

async fn run_daemon(config: AppConfig, config_load_seconds: f64) -> Result<()> {
    let registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(registry.clone())?;
    daemon_metrics.observe_config_load(config_load_seconds);
    daemon_metrics.inc_start();

    let runtime: Arc<dyn ContainerRuntime> = match config.runtime.backend {
        RuntimeBackend::Podman => {
            let overlay_file = config.state_dir.join("runtime").join(PODMAN_OVERLAY_FILE);
            Arc::new(PodmanRuntime::from_config(&config.runtime).with_overlay_file(&overlay_file)?)
        }
        RuntimeBackend::Memory => {
            warn!("memory runtime selected; containers are simulated");
            Arc::new(MemoryRuntime::new())
        }
    };
    let profile = if cfg!(debug_assertions) { "debug" } else { "release" };
    daemon_metrics.set_build_info(env!("CARGO_PKG_VERSION"), profile, runtime.name());

    let metrics_server = if config.metrics.enabled {
        let server = spawn_http_server(registry.clone(), config.metrics.listen)?;
        info!(address = %server.addr(), "metrics exporter enabled");
        Some(server)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let store = Arc::new(
        StateStore::open(&config.state_dir, config.store.history_depth)
            .with_context(|| format!("unable to open state store at {}", config.state_dir.display()))?,
    );
    let services = Arc::new(ServiceAllocator::from_config(&config.services));
    let cluster = Arc::new(ClusterState::from_config(&config.cluster));
    let bus = EventBus::from_config(&config.cluster);
    if !config.cluster.standalone {
        warn!(
            node = cluster.node_id(),
            "cluster mode without a leadership source; node stays locked until events reach the bus"
        );
    }

    let orchestrator = Arc::new(
        Orchestrator::new(
            store,
            services,
            runtime,
            cluster.clone(),
            OrchestratorSettings::from_config(&config),
        )
        .with_metrics(LifecycleMetrics::new(&registry)?),
    );
    let routes = Arc::new(RouteTable::new());
    let observer = LeadershipObserver::new(orchestrator.clone(), routes).spawn(&bus);

    let summary = orchestrator.autostart_enabled().await;
    if !summary.skipped.is_empty() {
        info!(apps = ?summary.skipped, "enabled apps wait for leadership");
    }
    if !summary.failed.is_empty() {
        warn!(apps = ?summary.failed, "enabled apps failed to start");
    }

    info!(
        node = cluster.node_id(),
        locked = cluster.is_locked(),
        "daemon running; waiting for termination signal"
    );
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    observer.shutdown().await;
    drop(bus);
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

fn validate_manifest(path: &Path) -> Result<()> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("unable to read manifest {}", path.display()))?;
    let mut definition = AppDefinition::from_yaml_str(&contents)
        .with_context(|| format!("invalid manifest {}", path.display()))?;
    definition.apply_defaults();
    definition.validate()?;
    print!("{}", definition.to_yaml_string()?);
    Ok(())
}

fn list_apps(config: &AppConfig, json: bool) -> Result<()> {
    let store = StateStore::open(&config.state_dir, config.store.history_depth)
        .with_context(|| format!("unable to open state store at {}", config.state_dir.display()))?;
    let enabled = store.list_enabled();
    let records = store.list();

    if json {
        let instances: Vec<_> = records.iter().map(|record| &record.instance).collect();
        println!("{}", serde_json::to_string_pretty(&instances)?);
        return Ok(());
    }

    for record in records {
        let instance = record.instance;
        let ports = instance
            .endpoints
            .iter()
            .map(|ep| format!("{}={}", ep.listener, ep.socket_addr()))
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "{}\t{}\t{}\t{}\t{}",
            instance.name,
            instance.status,
            instance.image,
            if enabled.contains(&instance.name) { "enabled" } else { "-" },
            ports
        );
    }
    Ok(())
}
