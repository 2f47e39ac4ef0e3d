//! stepscaled — the stepscale daemon.
//!
//! Single binary that assembles the standalone controller:
//! - State store (redb) holding policies, target scales, and entities
//! - Metrics source (Prometheus, or an empty static source)
//! - Metrics window and scaling history caches
//! - Reconciliation controller + workers
//! - REST API
//!
//! # Usage
//!
//! ```text
//! stepscaled run --port 8480 --data-dir /var/lib/stepscale --config stepscale.toml
//! stepscaled config > stepscale.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};

use stepscale_api::{ApiState, build_router};
use stepscale_autoscale::{ReplicaCalculator, ScalingHistoryCache};
use stepscale_controller::{
    Controller, ControllerSettings, Reconciler, StaticResourceMapper, WorkQueue,
};
use stepscale_core::ControllerConfig;
use stepscale_metrics::{MetricsSource, MetricsWindowCache, PrometheusSource, StaticMetricsSource};
use stepscale_state::StateStore;

#[derive(Parser)]
#[command(name = "stepscaled", about = "stepscale autoscaling controller")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller and its API.
    Run {
        /// Path to stepscale.toml. Built-in defaults when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/stepscale")]
        data_dir: PathBuf,

        /// Port to listen on.
        #[arg(long, default_value = "8480")]
        port: u16,

        /// Full resync interval, e.g. "30s".
        #[arg(long)]
        resync_interval: Option<String>,

        /// Number of reconciliation workers.
        #[arg(long)]
        workers: Option<usize>,

        /// Prometheus base URL, e.g. "http://prometheus:9090".
        #[arg(long)]
        prometheus_url: Option<String>,
    },
    /// Print the default configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,stepscale=debug")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            data_dir,
            port,
            resync_interval,
            workers,
            prometheus_url,
        } => {
            let mut cfg = match config {
                Some(path) => ControllerConfig::from_file(&path)?,
                None => ControllerConfig::default(),
            };
            if let Some(interval) = resync_interval {
                cfg.resync_interval = interval;
            }
            if let Some(workers) = workers {
                cfg.workers = workers;
            }
            if prometheus_url.is_some() {
                cfg.metrics.prometheus_url = prometheus_url;
            }
            cfg.validate()?;
            run(cfg, data_dir, port).await
        }
        Command::Config => {
            print!("{}", ControllerConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

async fn run(cfg: ControllerConfig, data_dir: PathBuf, port: u16) -> anyhow::Result<()> {
    info!("stepscale daemon starting");

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("stepscale.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let window = Arc::new(MetricsWindowCache::new(
        cfg.metrics.window_capacity,
        cfg.metrics_ttl()?,
    ));
    let history = Arc::new(ScalingHistoryCache::new(
        cfg.history.capacity,
        cfg.history_ttl()?,
    ));

    let source: Arc<dyn MetricsSource> = match &cfg.metrics.prometheus_url {
        Some(url) => {
            info!(%url, "using prometheus metrics source");
            Arc::new(PrometheusSource::new(url, cfg.metrics_request_timeout()?)?)
        }
        None => {
            warn!("no prometheus_url configured, entities will report no metrics");
            Arc::new(StaticMetricsSource::new())
        }
    };

    let calculator = ReplicaCalculator::new(source, Arc::new(store.clone()), window);
    let reconciler = Reconciler::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(StaticResourceMapper::new()),
        calculator,
        history,
    );
    let queue = Arc::new(WorkQueue::new(cfg.backoff_base()?, cfg.backoff_max()?));
    let controller = Arc::new(Controller::new(
        reconciler,
        Arc::new(store.clone()),
        Arc::clone(&queue),
        ControllerSettings::from_config(&cfg)?,
    ));

    // ── Start controller ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let controller_handle = tokio::spawn(
        Arc::clone(&controller).run(store.subscribe(), shutdown_rx),
    );

    // ── Start API server ───────────────────────────────────────

    let router = build_router(ApiState {
        store,
        stats: Arc::clone(controller.stats()),
        queue,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    if let Err(e) = controller_handle.await {
        error!(error = %e, "controller task failed");
    }

    info!("stepscale daemon stopped");
    Ok(())
}
