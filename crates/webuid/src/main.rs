//! webuid: the web UI controller daemon.
//!
//! Single binary that assembles:
//! - Resource store (redb, or in-memory)
//! - Reconcile controller
//! - REST API
//!
//! # Usage
//!
//! ```text
//! webuid run --config /etc/webuid/webuid.toml --port 8480 --data-dir /var/lib/webuid
//! ```

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use webui_controller::{ChangeNotifier, Controller, ControllerConfig};
use webui_state::{KindRegistry, StateStore};

use crate::config::OperatorConfig;

const DEFAULT_FILTER: &str = "info,webuid=debug,webui=debug";
const DB_FILE: &str = "webuid.redb";

#[derive(Parser)]
#[command(name = "webuid", about = "Web UI controller daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the store, controller, and API in one process.
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port for the REST API.
    #[arg(long)]
    port: Option<u16>,

    /// Data directory for persistent state.
    #[arg(long, conflicts_with = "in_memory")]
    data_dir: Option<PathBuf>,

    /// Keep all state in memory; nothing survives a restart.
    #[arg(long)]
    in_memory: bool,

    /// Concurrent reconcile workers.
    #[arg(long)]
    workers: Option<usize>,

    /// Log output format.
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Effective settings after merging file and flags.
struct Settings {
    port: u16,
    /// `None` means in-memory.
    data_dir: Option<PathBuf>,
    controller: ControllerConfig,
}

impl Settings {
    fn resolve(args: &RunArgs) -> anyhow::Result<Self> {
        let file = match &args.config {
            Some(path) => OperatorConfig::from_file(path)?,
            None => OperatorConfig::default(),
        };

        let mut controller = file.controller()?;
        if let Some(workers) = args.workers {
            controller.workers = workers;
        }
        config::validate(&controller)?;

        let data_dir = if args.in_memory {
            None
        } else {
            Some(args.data_dir.clone().unwrap_or_else(|| file.data_dir()))
        };

        Ok(Self {
            port: args.port.unwrap_or_else(|| file.port()),
            data_dir,
            controller,
        })
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => {
            init_tracing(args.log_format);
            run(args).await
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let settings = Settings::resolve(&args).context("invalid configuration")?;
    info!(
        port = settings.port,
        workers = settings.controller.workers,
        "webuid starting"
    );

    // ── Initialize subsystems ──────────────────────────────────

    let registry = KindRegistry::standard();
    let store = match &settings.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating data directory {}", dir.display()))?;
            let path = dir.join(DB_FILE);
            let store = StateStore::open(&path, &registry).context("opening state store")?;
            info!(path = ?path, "state store opened");
            store
        }
        None => {
            let store = StateStore::open_in_memory(&registry).context("opening state store")?;
            info!("in-memory state store opened");
            store
        }
    };

    // Subscribe before the initial sync so no write is missed.
    let notifier = ChangeNotifier::new(store.subscribe());
    let controller = Controller::new(store.clone(), settings.controller);
    let statuses = controller.statuses();

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let controller_handle = tokio::spawn(controller.run(notifier, shutdown_rx));

    // ── Start API server ───────────────────────────────────────

    let router = webui_api::build_router(store, statuses);
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    controller_handle.await.context("controller task failed")?;

    info!("webuid stopped");
    Ok(())
}
