// src/main.rs
//
// =============================================================================
// SHORTLIST: NODE ENTRY POINT (v 0.1)
// =============================================================================
//
// Flags, region override, logger wiring. Boots the Node, Governor, and
// Healer loops as independent concurrent tasks sharing a single RepoClient
// and no in-memory state, and wires a cancellation signal from SIGTERM/
// SIGINT into all three.

mod config;
mod governor;
mod healer;
mod lease;
mod metrics;
mod model;
mod node;
mod renderer;
mod repo;
mod store;
mod throttle;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;

use crate::config::Config;
use crate::governor::Governor;
use crate::healer::Healer;
use crate::node::Node;
use crate::renderer::{RendererRegistry, RendererSupervisor};
use crate::repo::RepoClient;

#[derive(Parser)]
#[command(name = "shortlist-node", version, about = "Leaderless Git-coordinated task swarm node")]
struct Cli {
    /// Local working copy of the coordination repository.
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Branch used as the coordination branch.
    #[arg(long, default_value = "main")]
    branch: String,

    /// Regional shard override. Also accepted via SHORTLIST_REGION.
    #[arg(long, env = "SHORTLIST_REGION")]
    region: Option<String>,

    /// Comma-separated roles this node is eligible to claim.
    #[arg(long, value_delimiter = ',')]
    roles: Vec<String>,

    /// Explicit node id. Defaults to a UUID persisted next to the repo.
    #[arg(long)]
    node_id: Option<String>,

    /// Path to a renderer registry file overriding the built-in defaults.
    #[arg(long)]
    renderer_registry: Option<PathBuf>,

    #[arg(long)]
    disable_governor: bool,

    #[arg(long)]
    disable_healer: bool,
}

fn load_or_create_node_id(repo_root: &std::path::Path) -> Result<String> {
    let marker = repo_root.join(".shortlist_node_id");
    if let Ok(existing) = std::fs::read_to_string(&marker) {
        let trimmed = existing.trim().to_string();
        if !trimmed.is_empty() {
            return Ok(trimmed);
        }
    }
    let id = uuid::Uuid::new_v4().to_string();
    std::fs::write(&marker, &id).context("failed to persist node id")?;
    Ok(id)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let node_id = match cli.node_id {
        Some(id) => id,
        None => load_or_create_node_id(&cli.repo)?,
    };

    let mut cfg = Config::with_defaults(node_id.clone(), cli.repo.clone());
    cfg.region = cli.region;
    cfg.roles = cli.roles;
    cfg.enable_governor = !cli.disable_governor;
    cfg.enable_healer = !cli.disable_healer;

    log::info!("shortlist node {} starting (region={:?}, roles={:?})", node_id, cfg.region, cfg.roles);

    let repo: crate::repo::SharedRepo = Arc::new(tokio::sync::Mutex::new(
        RepoClient::open(&cli.repo, &cli.branch).context("failed to open coordination repository")?,
    ));

    let mut registry = RendererRegistry::with_defaults();
    if let Some(path) = &cli.renderer_registry {
        registry
            .load_overrides(path)
            .with_context(|| format!("failed to load renderer registry from {:?}", path))?;
    }

    let supervisor = RendererSupervisor::new(
        registry,
        cli.repo.clone(),
        cfg.health_probe_timeout,
        cfg.stop_grace,
        cfg.max_consecutive_failures,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut tasks = Vec::new();

    {
        let mut node = Node::new(cfg.clone(), repo.clone(), supervisor, shutdown_rx.clone());
        tasks.push(tokio::spawn(async move {
            if let Err(e) = node.run().await {
                log::error!("node loop exited with error: {}", e);
            }
        }));
    }

    if cfg.enable_governor {
        let mut governor = Governor::new(cfg.clone(), repo.clone(), shutdown_rx.clone());
        tasks.push(tokio::spawn(async move {
            if let Err(e) = governor.run().await {
                log::error!("governor loop exited with error: {}", e);
            }
        }));
    }

    if cfg.enable_healer {
        let mut healer = Healer::new(cfg.clone(), repo.clone(), shutdown_rx.clone());
        tasks.push(tokio::spawn(async move {
            if let Err(e) = healer.run().await {
                log::error!("healer loop exited with error: {}", e);
            }
        }));
    }

    wait_for_shutdown_signal().await;
    log::warn!("shutdown signal received, stopping loops at next safe checkpoint");
    let _ = shutdown_tx.send(true);

    let shutdown_window = Duration::from_secs(10);
    let _ = tokio::time::timeout(shutdown_window, futures_join_all(tasks)).await;

    log::info!("shortlist node {} stopped", node_id);
    Ok(())
}

async fn futures_join_all(tasks: Vec<tokio::task::JoinHandle<()>>) {
    for t in tasks {
        let _ = t.await;
    }
}

/// Waits for either SIGINT (Ctrl-C) or SIGTERM (the signal `docker stop` /
/// Kubernetes pod termination actually sends). Without the SIGTERM arm a
/// container kill skips straight to SIGKILL and every loop's best-effort
/// release path never runs.
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("failed to install SIGTERM handler: {}", e);
            tokio::signal::ctrl_c().await.ok();
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
}
