//! seedlingd — the Seedling daemon.
//!
//! Single binary that assembles the Seedling subsystems:
//! - Service catalog
//! - State store (redb)
//! - Helm deployment driver
//! - Orchestrator + port allocator
//! - Reconciler
//! - REST API
//!
//! # Usage
//!
//! ```text
//! seedlingd serve --config /etc/seedling/seedling.toml
//! seedlingd check-catalog /etc/seedling/catalog.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use seedling_api::{ApiState, PasswordHasher, TokenIssuer};
use seedling_core::{Catalog, Manager, SeedlingConfig};
use seedling_driver::HelmDriver;
use seedling_orchestrator::{Orchestrator, OrchestratorSettings, Reconciler};
use seedling_state::StateStore;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "seedlingd", about = "Seedling service-install daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the API server and background reconciler.
    Serve {
        /// Path to seedling.toml.
        #[arg(long, default_value = "/etc/seedling/seedling.toml")]
        config: PathBuf,

        /// Override the port from `server.listen`.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Validate a catalog file and print a summary.
    CheckCatalog {
        /// Path to the catalog (JSON, or TOML by extension).
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Serve { config, port } => run_serve(&config, port).await,
        Command::CheckCatalog { path } => check_catalog(&path),
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,seedlingd=debug,seedling=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn check_catalog(path: &Path) -> anyhow::Result<()> {
    let catalog = Catalog::from_file(path)
        .with_context(|| format!("invalid catalog {}", path.display()))?;

    let services: Vec<_> = catalog
        .services()
        .map(|def| {
            serde_json::json!({
                "key": def.key,
                "name": def.name,
                "chart": def.template.chart.chart_arg(),
                "version": def.template.chart_version,
                "uses_port_allocator": def.requires(Manager::PortAllocator),
            })
        })
        .collect();
    let summary = serde_json::json!({
        "services": services,
        "port_range": catalog.port_range(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run_serve(config_path: &Path, port: Option<u16>) -> anyhow::Result<()> {
    info!(config = ?config_path, "Seedling daemon starting");

    let mut config = SeedlingConfig::from_file(config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    if let Some(port) = port {
        config.server.listen.set_port(port);
    }

    // ── Initialize subsystems ──────────────────────────────────

    // Catalog. Relative paths are resolved against the config file.
    let catalog_path = match config_path.parent() {
        Some(dir) if config.catalog.path.is_relative() => dir.join(&config.catalog.path),
        _ => config.catalog.path.clone(),
    };
    let catalog = Arc::new(
        Catalog::from_file(&catalog_path)
            .with_context(|| format!("invalid catalog {}", catalog_path.display()))?,
    );
    info!(path = ?catalog_path, services = catalog.len(), "catalog loaded");

    // State store.
    std::fs::create_dir_all(&config.storage.data_dir)
        .with_context(|| format!("cannot create {}", config.storage.data_dir.display()))?;
    let db_path = config.database_path();
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    // Helm driver.
    let driver = Arc::new(
        HelmDriver::new(&config.cluster.helm_binary)
            .with_kube_context(config.cluster.kube_context.clone())
            .with_kubeconfig(config.cluster.kubeconfig.clone()),
    );
    info!(binary = ?config.cluster.helm_binary, "helm driver initialized");

    // Orchestrator.
    let orchestrator = Arc::new(Orchestrator::new(
        catalog,
        store,
        driver,
        OrchestratorSettings::from_config(&config),
    ));
    orchestrator.restore_allocations()?;

    // Reconciler.
    let reconciler = Reconciler::new(
        orchestrator.clone(),
        Duration::from_secs(config.reconcile.interval_secs),
    );
    if config.reconcile.enabled {
        match reconciler.reconcile_once().await {
            Ok(report) => info!(?report, "startup reconciliation complete"),
            Err(e) => warn!(error = %e, "startup reconciliation failed"),
        }
    }

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let reconcile_handle = if config.reconcile.enabled {
        let reconcile_shutdown = shutdown_rx.clone();
        info!(interval = config.reconcile.interval_secs, "reconciler started");
        Some(tokio::spawn(async move {
            reconciler.run(reconcile_shutdown).await;
        }))
    } else {
        info!("reconciler disabled");
        None
    };

    // ── Start API server ───────────────────────────────────────

    let state = ApiState::new(
        orchestrator,
        TokenIssuer::new(&config.auth.token_secret, config.auth.token_ttl()),
        PasswordHasher::new(config.auth.password_iterations),
    )
    .with_blocking_operations(config.server.blocking_operations)
    .with_shutdown(shutdown_rx);
    let router = seedling_api::build_router(state);

    let addr = config.server.listen;
    info!(%addr, blocking = config.server.blocking_operations, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    if let Some(handle) = reconcile_handle {
        let _ = handle.await;
    }

    info!("Seedling daemon stopped");
    Ok(())
}
